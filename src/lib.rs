// Crew Warden Library - File ownership and agent liveness coordination
// This exposes the core components for testing and integration

pub mod bridge;
pub mod clock;
pub mod config;
pub mod errors;
pub mod health;
pub mod instance_lock;
pub mod notify;
pub mod ownership;
pub mod progress;
pub mod recovery;
pub mod scheduler;
pub mod shutdown;
pub mod store;
pub mod telemetry;
pub mod worker;

// Re-export key types for easy access
pub use bridge::{Assignment, CoordinationBridge, Directive, DirectiveOutcome, HealthReport, WardenRuntime};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{StoreBackend, WardenConfig};
pub use errors::{CoordinationError, EntityKind, LockConflict};
pub use health::{AgentHealthMonitor, AnomalyEvent, AnomalyKind, HealthState, HealthSummary, MonitorConfig, MonitorSignal};
pub use instance_lock::InstanceLock;
pub use notify::{LogNotificationChannel, Mention, NotificationChannel};
pub use ownership::{Employee, FileLock, FileOwnershipRegistry, FileRequest, RequestOutcome, RequestStatus};
pub use progress::{ProgressSourceKind, TaskProgressTracker, TaskRecord, TaskStatus};
pub use recovery::{AgentRecoveryManager, Escalation, EscalationNotifier, RecoveryAction, RecoveryConfig, RecoveryKind};
pub use shutdown::ShutdownCoordinator;
pub use store::{MemoryStore, TransactionalStore};
pub use telemetry::{create_coordination_span, generate_correlation_id, init_telemetry};
pub use worker::{ProcessWorkerLauncher, WorkerHandle, WorkerLauncher, WorkerState, WorkerStatus, WorkerTask};
