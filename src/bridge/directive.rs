// Chat directives understood by the bridge

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::errors::{CoordinationError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Directive {
    Assign {
        employee: String,
        description: String,
        files: Vec<String>,
    },
    Complete {
        employee: String,
    },
    Cancel {
        employee: String,
    },
    Help {
        employee: String,
        text: String,
    },
}

struct DirectivePatterns {
    assign: Regex,
    complete: Regex,
    cancel: Regex,
    help: Regex,
}

static DIRECTIVE_PATTERNS: OnceLock<DirectivePatterns> = OnceLock::new();

fn patterns() -> &'static DirectivePatterns {
    DIRECTIVE_PATTERNS.get_or_init(|| DirectivePatterns {
        assign: Regex::new(r"(?is)^assign\s+task\s+to\s+([\w.-]+)\s*:\s*(.+?)\s*,?\s*files\s*=\s*\[([^\]]*)\]\s*$")
            .expect("assign pattern is valid"),
        complete: Regex::new(r"(?i)^complete\s+task\s+for\s+([\w.-]+)\s*$").expect("complete pattern is valid"),
        cancel: Regex::new(r"(?i)^cancel\s+task\s+for\s+([\w.-]+)\s*$").expect("cancel pattern is valid"),
        help: Regex::new(r"(?is)^help\s+from\s+([\w.-]+)\s*:\s*(.+?)\s*$").expect("help pattern is valid"),
    })
}

fn split_files(list: &str) -> Vec<String> {
    list.split(',')
        .map(|file| file.trim().trim_matches(|c| c == '"' || c == '\''))
        .filter(|file| !file.is_empty())
        .map(str::to_string)
        .collect()
}

impl Directive {
    /// Parse one directive line, e.g. `assign task to alice: fix login, files=[a.py, b.py]`
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim().trim_start_matches('@').trim();
        let patterns = patterns();

        if let Some(caps) = patterns.assign.captures(input) {
            let files = split_files(&caps[3]);
            if files.is_empty() {
                return Err(CoordinationError::validation("assign directive needs at least one file"));
            }
            return Ok(Directive::Assign {
                employee: caps[1].to_string(),
                description: caps[2].trim_end_matches(',').trim().to_string(),
                files,
            });
        }
        if let Some(caps) = patterns.complete.captures(input) {
            return Ok(Directive::Complete {
                employee: caps[1].to_string(),
            });
        }
        if let Some(caps) = patterns.cancel.captures(input) {
            return Ok(Directive::Cancel {
                employee: caps[1].to_string(),
            });
        }
        if let Some(caps) = patterns.help.captures(input) {
            return Ok(Directive::Help {
                employee: caps[1].to_string(),
                text: caps[2].to_string(),
            });
        }

        Err(CoordinationError::validation(format!("unrecognised directive: {input}")))
    }

    pub fn employee(&self) -> &str {
        match self {
            Directive::Assign { employee, .. }
            | Directive::Complete { employee }
            | Directive::Cancel { employee }
            | Directive::Help { employee, .. } => employee,
        }
    }
}

impl std::str::FromStr for Directive {
    type Err = CoordinationError;

    fn from_str(s: &str) -> Result<Self> {
        Directive::parse(s)
    }
}
