use anyhow::Result;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

/// Graceful shutdown coordinator for crew-warden.
///
/// Background loops hold a `watch::Receiver<bool>` from `subscribe` and stop
/// once it flips to `true`.
pub struct ShutdownCoordinator {
    trigger: watch::Sender<bool>,
    tasks: Vec<(String, JoinHandle<()>)>,
    grace: Duration,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl ShutdownCoordinator {
    pub fn new(grace: Duration) -> Self {
        let (trigger, _) = watch::channel(false);
        Self {
            trigger,
            tasks: Vec::new(),
            grace,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.trigger.subscribe()
    }

    /// Track a background task so shutdown waits for it
    pub fn track(&mut self, name: &str, task: JoinHandle<()>) {
        self.tasks.push((name.to_string(), task));
    }

    pub fn trigger(&self) {
        self.trigger.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.trigger.borrow()
    }

    /// Resolve on SIGINT, or SIGTERM on unix
    pub async fn wait_for_signal() -> Result<()> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut terminate = signal(SignalKind::terminate())?;
            tokio::select! {
                result = tokio::signal::ctrl_c() => result?,
                _ = terminate.recv() => {}
            }
        }
        #[cfg(not(unix))]
        tokio::signal::ctrl_c().await?;

        info!("Shutdown signal received");
        Ok(())
    }

    /// Signal every subscriber and wait up to the grace period per task
    pub async fn shutdown_all_services(self) {
        info!(tasks = self.tasks.len(), "Initiating graceful shutdown");
        self.trigger();

        for (name, mut task) in self.tasks {
            match timeout(self.grace, &mut task).await {
                Ok(Ok(())) => info!(task = %name, "Service stopped"),
                Ok(Err(e)) => warn!(task = %name, error = %e, "Service ended abnormally"),
                Err(_) => {
                    warn!(task = %name, "Service did not stop within grace period, aborting");
                    task.abort();
                }
            }
        }
        info!("Graceful shutdown completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_see_the_trigger() {
        let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        let mut rx = coordinator.subscribe();
        coordinator.track(
            "waiter",
            tokio::spawn(async move {
                while !*rx.borrow() {
                    if rx.changed().await.is_err() {
                        break;
                    }
                }
            }),
        );
        assert!(!coordinator.is_triggered());
        coordinator.shutdown_all_services().await;
    }

    #[tokio::test]
    async fn test_stubborn_tasks_are_aborted() {
        let mut coordinator = ShutdownCoordinator::new(Duration::from_millis(20));
        coordinator.track("sleeper", tokio::spawn(tokio::time::sleep(Duration::from_secs(60))));
        coordinator.shutdown_all_services().await;
    }
}
