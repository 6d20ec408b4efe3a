//! Notification channel collaborator
//!
//! Nudges, help broadcasts and escalation alerts all leave the core through
//! a `NotificationChannel`. Inbound chat reaches the core as mentions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::errors::Result;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

/// A message addressed to the core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    pub from: String,
    pub text: String,
}

pub type MentionCallback = Box<dyn Fn(Mention) + Send + Sync>;

#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Deliver `text`; `None` targets the channel's default audience
    async fn send(&self, text: &str, target: Option<String>) -> Result<()>;

    fn on_mention(&self, callback: MentionCallback);
}

/// Channel that writes outbound messages to the log
#[derive(Default, Clone)]
pub struct LogNotificationChannel {
    callbacks: Arc<RwLock<Vec<MentionCallback>>>,
}

impl LogNotificationChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed an inbound message to every registered callback
    pub fn inject_mention(&self, mention: Mention) -> usize {
        let callbacks = self.callbacks.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        debug!(from = %mention.from, listeners = callbacks.len(), "Dispatching mention");
        for callback in callbacks.iter() {
            callback(mention.clone());
        }
        callbacks.len()
    }
}

#[async_trait]
impl NotificationChannel for LogNotificationChannel {
    async fn send(&self, text: &str, target: Option<String>) -> Result<()> {
        let target = target.as_deref().unwrap_or("everyone");
        info!(target = %target, message = %text, "Notification sent");
        Ok(())
    }

    fn on_mention(&self, callback: MentionCallback) {
        self.callbacks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(callback);
    }
}
