// Lexical path normalisation so equivalent spellings share one lock

use crate::errors::{CoordinationError, Result};

/// Resolve `.` and `..`, collapse duplicate separators and strip a leading
/// `./`. Paths that climb above the shared root are rejected.
pub fn normalize_path(path: &str) -> Result<String> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(CoordinationError::validation("file path must not be empty"));
    }

    let absolute = trimmed.starts_with('/');
    let mut components: Vec<&str> = Vec::new();
    for component in trimmed.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                if components.pop().is_none() {
                    return Err(CoordinationError::validation(format!(
                        "file path escapes the shared tree: {path}"
                    )));
                }
            }
            c => components.push(c),
        }
    }

    if components.is_empty() {
        return Err(CoordinationError::validation(format!(
            "file path names no file: {path}"
        )));
    }

    let joined = components.join("/");
    Ok(if absolute { format!("/{joined}") } else { joined })
}

/// Normalise, sort and de-duplicate a batch of paths
pub fn normalize_paths(paths: &[String]) -> Result<Vec<String>> {
    let mut normalized = paths
        .iter()
        .map(|path| normalize_path(path))
        .collect::<Result<Vec<_>>>()?;
    normalized.sort();
    normalized.dedup();
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equivalent_spellings_normalise_identically() {
        assert_eq!(normalize_path("src/lib.rs").unwrap(), "src/lib.rs");
        assert_eq!(normalize_path("./src//lib.rs").unwrap(), "src/lib.rs");
        assert_eq!(normalize_path("src/../src/./lib.rs").unwrap(), "src/lib.rs");
        assert_eq!(normalize_path("/abs/file.py").unwrap(), "/abs/file.py");
    }

    #[test]
    fn test_malformed_paths_are_rejected() {
        assert!(normalize_path("").is_err());
        assert!(normalize_path("   ").is_err());
        assert!(normalize_path("../outside.py").is_err());
        assert!(normalize_path("./").is_err());
    }

    #[test]
    fn test_batches_are_sorted_and_deduplicated() {
        let batch = vec!["b.py".to_string(), "./a.py".to_string(), "a.py".to_string()];
        assert_eq!(normalize_paths(&batch).unwrap(), vec!["a.py", "b.py"]);
    }
}
