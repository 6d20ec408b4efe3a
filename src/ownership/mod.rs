//! File Ownership Registry
//!
//! Owns employees, file locks and transfer requests. Every operation is a
//! single store transaction, so a path never has more than one owner and a
//! failed batch leaves nothing behind.

pub mod paths;
pub mod types;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::errors::{CoordinationError, EntityKind, LockConflict, Result};
use crate::store::{StoreTables, TransactionalStore};

pub use paths::{normalize_path, normalize_paths};
pub use types::{
    Employee, FileLock, FileRequest, LockOutcome, OwnershipEvent, RequestOutcome, RequestStatus,
};

const EVENT_CAPACITY: usize = 256;

/// Outcome of firing an employee
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dismissal {
    pub employee: Employee,
    pub released: Vec<String>,
    pub denied_requests: Vec<FileRequest>,
}

pub struct FileOwnershipRegistry {
    store: Arc<dyn TransactionalStore>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<OwnershipEvent>,
}

impl FileOwnershipRegistry {
    pub fn new(store: Arc<dyn TransactionalStore>, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            clock,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OwnershipEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: OwnershipEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn publish_owner_change(&self, file_path: &str, from: Option<&str>, to: Option<&str>, at: DateTime<Utc>) {
        self.publish(OwnershipEvent::OwnerChanged {
            file_path: file_path.to_string(),
            from: from.map(str::to_string),
            to: to.map(str::to_string),
            at,
        });
    }

    pub async fn hire(&self, name: &str, role: &str, tier: u8) -> Result<Employee> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(CoordinationError::validation("employee name must not be empty"));
        }

        let employee = Employee {
            name: name.clone(),
            role: role.trim().to_string(),
            tier,
            hired_at: self.clock.now(),
        };
        let row = employee.clone();
        self.store
            .transaction(move |tables| {
                if tables.employees.contains_key(&row.name) {
                    return Err(CoordinationError::validation(format!(
                        "employee {} already exists",
                        row.name
                    )));
                }
                tables.employees.insert(row.name.clone(), row);
                Ok(())
            })
            .await?;

        info!(employee = %name, role = %employee.role, tier, "Hired employee");
        Ok(employee)
    }

    /// Force-release everything `name` holds, then remove the employee
    pub async fn fire(&self, name: &str) -> Result<Dismissal> {
        let now = self.clock.now();
        let name = name.to_string();
        let dismissal = self
            .store
            .transaction(move |tables| {
                let employee = tables
                    .employees
                    .get(&name)
                    .cloned()
                    .ok_or_else(|| CoordinationError::not_found(EntityKind::Employee, &name))?;

                let released: Vec<String> = tables
                    .locks_owned_by(&name)
                    .into_iter()
                    .map(|lock| lock.file_path.clone())
                    .collect();
                let mut denied_requests = Vec::new();
                for path in &released {
                    tables.locks.remove(path);
                    denied_requests.extend(deny_pending_for_path(tables, path, "lock released", now));
                }
                denied_requests.extend(tables.requests.update_where(
                    |request| request.is_pending() && request.requester == name,
                    |request| resolve(request, RequestStatus::Denied, "requester dismissed", now),
                ));
                tables.employees.remove(&name);

                Ok(Dismissal {
                    employee,
                    released,
                    denied_requests,
                })
            })
            .await?;

        for path in &dismissal.released {
            self.publish_owner_change(path, Some(dismissal.employee.name.as_str()), None, now);
        }
        for request in &dismissal.denied_requests {
            self.publish(OwnershipEvent::RequestResolved(request.clone()));
        }
        info!(
            employee = %dismissal.employee.name,
            released = dismissal.released.len(),
            "Fired employee"
        );
        Ok(dismissal)
    }

    /// All-or-nothing batch lock.
    ///
    /// Paths are normalised and acquired in lexicographic order. Paths the
    /// caller already owns are reported in `already_held` and not duplicated.
    pub async fn lock(&self, employee: &str, paths: &[String], description: &str) -> Result<LockOutcome> {
        let paths = normalize_paths(paths)?;
        if paths.is_empty() {
            return Err(CoordinationError::validation("no paths to lock"));
        }

        let now = self.clock.now();
        let owner = employee.to_string();
        let description = description.to_string();
        let result = self
            .store
            .transaction(move |tables| {
                if !tables.employees.contains_key(&owner) {
                    return Err(CoordinationError::not_found(EntityKind::Employee, &owner));
                }

                let blocking: Vec<LockConflict> = paths
                    .iter()
                    .filter_map(|path| tables.locks.get(path))
                    .filter(|lock| lock.owner != owner)
                    .map(|lock| LockConflict {
                        file_path: lock.file_path.clone(),
                        owner: lock.owner.clone(),
                    })
                    .collect();
                if !blocking.is_empty() {
                    return Err(CoordinationError::locked_by(blocking));
                }

                let mut outcome = LockOutcome::default();
                for path in paths {
                    if tables.locks.contains_key(&path) {
                        outcome.already_held.push(path);
                        continue;
                    }
                    let lock = FileLock {
                        id: tables.allocate_id(),
                        file_path: path.clone(),
                        owner: owner.clone(),
                        description: description.clone(),
                        locked_at: now,
                    };
                    tables.locks.insert(path, lock.clone());
                    outcome.acquired.push(lock);
                }
                Ok(outcome)
            })
            .await;

        match &result {
            Ok(outcome) => {
                for lock in &outcome.acquired {
                    self.publish_owner_change(&lock.file_path, None, Some(employee), now);
                }
                info!(
                    employee = %employee,
                    acquired = outcome.acquired.len(),
                    already_held = outcome.already_held.len(),
                    "Locked files"
                );
            }
            Err(CoordinationError::Conflict { blocking, .. }) => {
                warn!(
                    employee = %employee,
                    blocking = ?blocking,
                    "Lock batch rejected"
                );
            }
            Err(_) => {}
        }
        result
    }

    /// Release `paths`, or everything `employee` owns when `paths` is `None`.
    ///
    /// Returns the paths actually released; paths not owned by `employee`
    /// are skipped silently.
    pub async fn release(&self, employee: &str, paths: Option<&[String]>) -> Result<Vec<String>> {
        let targets = match paths {
            Some(paths) => Some(normalize_paths(paths)?),
            None => None,
        };

        let now = self.clock.now();
        let owner = employee.to_string();
        let (released, denied) = self
            .store
            .transaction(move |tables| {
                let candidates: Vec<String> = match targets {
                    Some(paths) => paths,
                    None => tables
                        .locks_owned_by(&owner)
                        .into_iter()
                        .map(|lock| lock.file_path.clone())
                        .collect(),
                };

                let mut released = Vec::new();
                let mut denied = Vec::new();
                for path in candidates {
                    let owned = tables
                        .locks
                        .get(&path)
                        .map(|lock| lock.owner == owner)
                        .unwrap_or(false);
                    if !owned {
                        continue;
                    }
                    tables.locks.remove(&path);
                    denied.extend(deny_pending_for_path(tables, &path, "lock released", now));
                    released.push(path);
                }
                Ok((released, denied))
            })
            .await?;

        for path in &released {
            self.publish_owner_change(path, Some(employee), None, now);
        }
        for request in denied {
            self.publish(OwnershipEvent::RequestResolved(request));
        }
        if released.is_empty() {
            debug!(employee = %employee, "Release was a no-op");
        } else {
            info!(employee = %employee, released = ?released, "Released files");
        }
        Ok(released)
    }

    /// Release a single path; `false` when `employee` did not own it
    pub async fn release_path(&self, employee: &str, path: &str) -> Result<bool> {
        let released = self.release(employee, Some(&[path.to_string()])).await?;
        Ok(!released.is_empty())
    }

    /// Lock `path` if free, otherwise file a pending request with its owner
    pub async fn request(&self, requester: &str, path: &str, reason: &str) -> Result<RequestOutcome> {
        let file_path = normalize_path(path)?;
        let now = self.clock.now();
        let who = requester.to_string();
        let reason = reason.to_string();
        let (outcome, newly_locked, newly_opened) = self
            .store
            .transaction(move |tables| {
                if !tables.employees.contains_key(&who) {
                    return Err(CoordinationError::not_found(EntityKind::Employee, &who));
                }

                let current = tables.locks.get(&file_path).cloned();
                match current {
                    None => {
                        let lock = FileLock {
                            id: tables.allocate_id(),
                            file_path: file_path.clone(),
                            owner: who.clone(),
                            description: reason,
                            locked_at: now,
                        };
                        tables.locks.insert(file_path, lock.clone());
                        Ok((RequestOutcome::Granted(lock), true, false))
                    }
                    Some(lock) if lock.owner == who => Ok((RequestOutcome::Granted(lock), false, false)),
                    Some(lock) => {
                        let existing = tables
                            .requests
                            .values()
                            .find(|r| r.is_pending() && r.requester == who && r.file_path == file_path)
                            .cloned();
                        if let Some(existing) = existing {
                            return Ok((RequestOutcome::Pending(existing), false, false));
                        }
                        let request = FileRequest {
                            id: tables.allocate_id(),
                            requester: who.clone(),
                            file_path,
                            owner: lock.owner,
                            reason,
                            status: RequestStatus::Pending,
                            requested_at: now,
                            resolved_at: None,
                            resolution_note: None,
                        };
                        tables.requests.insert(request.id, request.clone());
                        Ok((RequestOutcome::Pending(request), false, true))
                    }
                }
            })
            .await?;

        match &outcome {
            RequestOutcome::Granted(lock) => {
                if newly_locked {
                    self.publish_owner_change(&lock.file_path, None, Some(requester), now);
                }
                info!(employee = %requester, file_path = %lock.file_path, "File request granted immediately");
            }
            RequestOutcome::Pending(request) => {
                if newly_opened {
                    self.publish(OwnershipEvent::RequestOpened(request.clone()));
                }
                info!(
                    employee = %requester,
                    file_path = %request.file_path,
                    owner = %request.owner,
                    request_id = request.id,
                    "File request pending owner approval"
                );
            }
        }
        Ok(outcome)
    }

    /// Transfer the lock to the requester in one transaction
    pub async fn approve(&self, request_id: u64) -> Result<FileRequest> {
        let now = self.clock.now();
        let (request, previous_owner, superseded) = self
            .store
            .transaction(move |tables| {
                let mut request = pending_request(tables, request_id)?;
                if !tables.employees.contains_key(&request.requester) {
                    return Err(CoordinationError::not_found(EntityKind::Employee, &request.requester));
                }

                let previous_owner = match tables.locks.get_mut(&request.file_path) {
                    Some(lock) => {
                        let previous = std::mem::replace(&mut lock.owner, request.requester.clone());
                        lock.locked_at = now;
                        lock.description = request.reason.clone();
                        Some(previous)
                    }
                    None => {
                        let lock = FileLock {
                            id: tables.allocate_id(),
                            file_path: request.file_path.clone(),
                            owner: request.requester.clone(),
                            description: request.reason.clone(),
                            locked_at: now,
                        };
                        tables.locks.insert(lock.file_path.clone(), lock);
                        None
                    }
                };

                resolve(&mut request, RequestStatus::Approved, "approved", now);
                tables.requests.insert(request.id, request.clone());
                let note = format!("ownership transferred to {}", request.requester);
                let superseded = deny_pending_for_path(tables, &request.file_path, &note, now);
                Ok((request, previous_owner, superseded))
            })
            .await?;

        self.publish_owner_change(
            &request.file_path,
            previous_owner.as_deref(),
            Some(request.requester.as_str()),
            now,
        );
        self.publish(OwnershipEvent::RequestResolved(request.clone()));
        for other in superseded {
            self.publish(OwnershipEvent::RequestResolved(other));
        }
        info!(
            request_id,
            file_path = %request.file_path,
            from = ?previous_owner,
            to = %request.requester,
            "Approved file request"
        );
        Ok(request)
    }

    pub async fn deny(&self, request_id: u64, reason: Option<&str>) -> Result<FileRequest> {
        let now = self.clock.now();
        let note = reason.unwrap_or("denied by owner").to_string();
        let request = self
            .store
            .transaction(move |tables| {
                let mut request = pending_request(tables, request_id)?;
                resolve(&mut request, RequestStatus::Denied, &note, now);
                tables.requests.insert(request.id, request.clone());
                Ok(request)
            })
            .await?;

        self.publish(OwnershipEvent::RequestResolved(request.clone()));
        info!(request_id, file_path = %request.file_path, "Denied file request");
        Ok(request)
    }

    pub async fn owner_of(&self, path: &str) -> Result<Option<String>> {
        let path = normalize_path(path)?;
        self.store
            .read(move |tables| tables.locks.get(&path).map(|lock| lock.owner.clone()))
            .await
    }

    pub async fn get_employee(&self, name: &str) -> Result<Employee> {
        let key = name.to_string();
        self.store
            .read(move |tables| tables.employees.get(&key).cloned())
            .await?
            .ok_or_else(|| CoordinationError::not_found(EntityKind::Employee, name))
    }

    pub async fn list_employees(&self) -> Result<Vec<Employee>> {
        self.store
            .read(|tables| tables.employees.values().cloned().collect())
            .await
    }

    pub async fn locks_held_by(&self, employee: &str) -> Result<Vec<FileLock>> {
        let owner = employee.to_string();
        self.store
            .read(move |tables| tables.locks_owned_by(&owner).into_iter().cloned().collect())
            .await
    }

    pub async fn list_locks(&self) -> Result<Vec<FileLock>> {
        self.store
            .read(|tables| tables.locks.values().cloned().collect())
            .await
    }

    pub async fn get_request(&self, request_id: u64) -> Result<FileRequest> {
        self.store
            .read(move |tables| tables.requests.get(&request_id).cloned())
            .await?
            .ok_or_else(|| CoordinationError::not_found(EntityKind::Request, request_id.to_string()))
    }

    pub async fn list_requests(&self, status: Option<RequestStatus>) -> Result<Vec<FileRequest>> {
        self.store
            .read(move |tables| {
                tables
                    .requests
                    .values()
                    .filter(|request| status.map_or(true, |s| request.status == s))
                    .cloned()
                    .collect()
            })
            .await
    }
}

fn pending_request(tables: &StoreTables, request_id: u64) -> Result<FileRequest> {
    tables
        .requests
        .get(&request_id)
        .filter(|request| request.is_pending())
        .cloned()
        .ok_or_else(|| CoordinationError::not_found(EntityKind::Request, request_id.to_string()))
}

fn resolve(request: &mut FileRequest, status: RequestStatus, note: &str, now: DateTime<Utc>) {
    request.status = status;
    request.resolved_at = Some(now);
    request.resolution_note = Some(note.to_string());
}

/// Pending requests must always point at a file held by their `owner`
fn deny_pending_for_path(tables: &mut StoreTables, path: &str, note: &str, now: DateTime<Utc>) -> Vec<FileRequest> {
    tables.requests.update_where(
        |request| request.is_pending() && request.file_path == path,
        |request| resolve(request, RequestStatus::Denied, note, now),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    async fn registry_with(names: &[&str]) -> FileOwnershipRegistry {
        let registry = FileOwnershipRegistry::new(Arc::new(MemoryStore::new()), Arc::new(ManualClock::new()));
        for name in names {
            registry.hire(name, "engineer", 1).await.unwrap();
        }
        registry
    }

    fn paths(items: &[&str]) -> Vec<String> {
        items.iter().map(|p| p.to_string()).collect()
    }

    #[tokio::test]
    async fn test_hire_rejects_empty_and_duplicate_names() {
        let registry = registry_with(&["alice"]).await;

        assert!(matches!(
            registry.hire("  ", "engineer", 1).await,
            Err(CoordinationError::Validation(_))
        ));
        assert!(matches!(
            registry.hire("alice", "reviewer", 2).await,
            Err(CoordinationError::Validation(_))
        ));
        assert_eq!(registry.list_employees().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_lock_then_release_round_trip() {
        let registry = registry_with(&["alice"]).await;

        registry.lock("alice", &paths(&["p.rs"]), "edit").await.unwrap();
        assert_eq!(registry.owner_of("p.rs").await.unwrap().as_deref(), Some("alice"));

        let released = registry.release("alice", Some(&paths(&["p.rs"]))).await.unwrap();
        assert_eq!(released, paths(&["p.rs"]));
        assert_eq!(registry.owner_of("p.rs").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_relocking_own_path_is_idempotent() {
        let registry = registry_with(&["alice"]).await;

        let first = registry.lock("alice", &paths(&["a.py"]), "edit").await.unwrap();
        let second = registry.lock("alice", &paths(&["a.py", "b.py"]), "edit more").await.unwrap();

        assert_eq!(first.acquired.len(), 1);
        assert_eq!(second.already_held, paths(&["a.py"]));
        assert_eq!(second.acquired.len(), 1);
        assert_eq!(second.acquired[0].file_path, "b.py");
        assert_eq!(registry.list_locks().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_releasing_foreign_path_is_a_no_op() {
        let registry = registry_with(&["alice", "bob"]).await;
        registry.lock("alice", &paths(&["a.py"]), "edit").await.unwrap();

        assert!(!registry.release_path("bob", "a.py").await.unwrap());
        assert!(!registry.release_path("bob", "never-locked.py").await.unwrap());
        assert_eq!(registry.owner_of("a.py").await.unwrap().as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_batch_lock_is_all_or_nothing() {
        let registry = registry_with(&["alice", "bob"]).await;
        registry.lock("bob", &paths(&["b.py"]), "bob's work").await.unwrap();

        let err = registry
            .lock("alice", &paths(&["a.py", "b.py"]), "alice's work")
            .await
            .unwrap_err();

        assert_eq!(err.blocking_owners(), vec!["bob"]);
        assert_eq!(registry.owner_of("a.py").await.unwrap(), None);
        assert!(registry.locks_held_by("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_request_approve_transfers_ownership() {
        let registry = registry_with(&["alice", "bob"]).await;
        registry.lock("alice", &paths(&["a.py", "b.py"]), "feature").await.unwrap();

        assert!(matches!(
            registry.lock("bob", &paths(&["a.py"]), "fix").await,
            Err(CoordinationError::Conflict { .. })
        ));

        let request = match registry.request("bob", "a.py", "need to fix a bug").await.unwrap() {
            RequestOutcome::Pending(request) => request,
            other => panic!("expected pending request, got {other:?}"),
        };
        assert_eq!(request.owner, "alice");

        let approved = registry.approve(request.id).await.unwrap();
        assert_eq!(approved.status, RequestStatus::Approved);
        assert_eq!(registry.owner_of("a.py").await.unwrap().as_deref(), Some("bob"));
        assert_eq!(registry.owner_of("b.py").await.unwrap().as_deref(), Some("alice"));

        assert!(matches!(
            registry.approve(request.id).await,
            Err(CoordinationError::NotFound { kind: EntityKind::Request, .. })
        ));
    }

    #[tokio::test]
    async fn test_request_for_free_path_is_granted() {
        let registry = registry_with(&["bob"]).await;

        let outcome = registry.request("bob", "free.py", "new file").await.unwrap();
        assert!(matches!(outcome, RequestOutcome::Granted(ref lock) if lock.owner == "bob"));
        assert!(registry.list_requests(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_requests_collapse() {
        let registry = registry_with(&["alice", "bob"]).await;
        registry.lock("alice", &paths(&["a.py"]), "edit").await.unwrap();

        let first = registry.request("bob", "a.py", "please").await.unwrap();
        let second = registry.request("bob", "./a.py", "pretty please").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.list_requests(Some(RequestStatus::Pending)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_deny_keeps_owner_and_resolves_once() {
        let registry = registry_with(&["alice", "bob"]).await;
        registry.lock("alice", &paths(&["a.py"]), "edit").await.unwrap();
        let RequestOutcome::Pending(request) = registry.request("bob", "a.py", "please").await.unwrap() else {
            panic!("expected pending request");
        };

        let denied = registry.deny(request.id, Some("still editing")).await.unwrap();
        assert_eq!(denied.status, RequestStatus::Denied);
        assert_eq!(denied.resolution_note.as_deref(), Some("still editing"));
        assert_eq!(registry.owner_of("a.py").await.unwrap().as_deref(), Some("alice"));
        assert!(registry.deny(request.id, None).await.is_err());
    }

    #[tokio::test]
    async fn test_release_denies_requests_for_released_path() {
        let registry = registry_with(&["alice", "bob"]).await;
        registry.lock("alice", &paths(&["a.py"]), "edit").await.unwrap();
        let RequestOutcome::Pending(request) = registry.request("bob", "a.py", "please").await.unwrap() else {
            panic!("expected pending request");
        };

        registry.release("alice", None).await.unwrap();

        let request = registry.get_request(request.id).await.unwrap();
        assert_eq!(request.status, RequestStatus::Denied);
        assert_eq!(request.resolution_note.as_deref(), Some("lock released"));
    }

    #[tokio::test]
    async fn test_fire_force_releases_locks() {
        let registry = registry_with(&["alice", "bob"]).await;
        registry.lock("alice", &paths(&["a.py", "b.py"]), "edit").await.unwrap();

        let dismissal = registry.fire("alice").await.unwrap();
        assert_eq!(dismissal.released, paths(&["a.py", "b.py"]));
        assert_eq!(registry.owner_of("a.py").await.unwrap(), None);
        assert!(registry.get_employee("alice").await.is_err());

        assert!(matches!(
            registry.fire("alice").await,
            Err(CoordinationError::NotFound { kind: EntityKind::Employee, .. })
        ));
        registry.lock("bob", &paths(&["a.py"]), "take over").await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_by_unknown_employee_fails() {
        let registry = registry_with(&[]).await;
        assert!(matches!(
            registry.lock("ghost", &paths(&["a.py"]), "edit").await,
            Err(CoordinationError::NotFound { kind: EntityKind::Employee, .. })
        ));
    }

    #[tokio::test]
    async fn test_ownership_events_are_published() {
        let registry = registry_with(&["alice", "bob"]).await;
        let mut events = registry.subscribe();

        registry.lock("alice", &paths(&["a.py"]), "edit").await.unwrap();
        let RequestOutcome::Pending(request) = registry.request("bob", "a.py", "please").await.unwrap() else {
            panic!("expected pending request");
        };
        registry.approve(request.id).await.unwrap();

        let first = events.recv().await.unwrap();
        assert!(matches!(
            first,
            OwnershipEvent::OwnerChanged { ref to, ref from, .. } if to.as_deref() == Some("alice") && from.is_none()
        ));
        assert!(matches!(events.recv().await.unwrap(), OwnershipEvent::RequestOpened(_)));
        assert!(matches!(
            events.recv().await.unwrap(),
            OwnershipEvent::OwnerChanged { ref to, .. } if to.as_deref() == Some("bob")
        ));
    }

    #[tokio::test]
    async fn test_concurrent_locks_have_one_winner() {
        let registry = Arc::new(registry_with(&["alice", "bob"]).await);

        let a = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.lock("alice", &paths(&["x.py"]), "a").await })
        };
        let b = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.lock("bob", &paths(&["x.py"]), "b").await })
        };
        let results = vec![a.await.unwrap(), b.await.unwrap()];

        let winners: Vec<_> = results.iter().filter(|r| r.is_ok()).collect();
        assert_eq!(winners.len(), 1);
        let owner = registry.owner_of("x.py").await.unwrap().unwrap();
        let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert_eq!(loser.blocking_owners(), vec![owner.as_str()]);
    }
}
