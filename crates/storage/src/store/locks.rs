#![forbid(unsafe_code)]

//! Lease-based advisory file locks.
//!
//! A lease covers one or more files; each file also gets its own
//! `FileLock` document keyed by the hashed cleaned path. Acquisition is
//! all-or-nothing in canonical (sorted) order, which rules out AB/BA
//! deadlocks between concurrent acquirers. Expired locks are taken over;
//! a conflict rolls back everything acquired in the attempt.

use std::time::{Duration, Instant};

use tracing::debug;
use wg_core::model::{FileLock, Lease, TraceEvent, trace_event};
use wg_core::{gen_id, now_rfc3339, time::rfc3339_to_ms};

use crate::{CoordError, Result};

use super::LockService;
use super::fs::{clean_path, path_hash};

const DEFAULT_TTL_SEC: i64 = 120;
const BACKOFF_START: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(4);

impl LockService {
    /// Acquire leases on `files` atomically. With `wait_sec > 0`, retries
    /// with exponential backoff (500ms, ×1.5, capped at 4s) until the
    /// deadline.
    pub fn lock_files(
        &self,
        task_id: &str,
        owner: &str,
        files: &[String],
        ttl_sec: i64,
        wait_sec: i64,
    ) -> Result<Lease> {
        if owner.is_empty() || files.is_empty() {
            return Err(CoordError::InvalidArgument(
                "owner and files are required".to_string(),
            ));
        }
        let ttl_sec = if ttl_sec <= 0 { DEFAULT_TTL_SEC } else { ttl_sec };
        let wait_sec = wait_sec.max(0);

        let mut normalized: Vec<String> = files.iter().map(|f| clean_path(f)).collect();
        normalized.sort();
        normalized.dedup();

        let deadline = Instant::now() + Duration::from_secs(wait_sec as u64);
        let mut backoff = BACKOFF_START;

        loop {
            match self.try_lock_files(task_id, owner, &normalized, ttl_sec) {
                Ok(lease) => {
                    self.trace.log(TraceEvent {
                        event_type: trace_event::LOCK_ACQUIRED.to_string(),
                        actor: owner.to_string(),
                        subject: lease.lease_id.clone(),
                        detail: format!("files: {normalized:?}, ttl: {ttl_sec}s"),
                        ..TraceEvent::default()
                    });
                    return Ok(lease);
                }
                Err(err) => {
                    if Instant::now() >= deadline {
                        self.trace.log(TraceEvent {
                            event_type: trace_event::LOCK_FAILED.to_string(),
                            actor: owner.to_string(),
                            subject: normalized.join(", "),
                            detail: err.to_string(),
                            ..TraceEvent::default()
                        });
                        return Err(err);
                    }
                    std::thread::sleep(backoff);
                    backoff = (backoff * 3 / 2).min(BACKOFF_CAP);
                }
            }
        }
    }

    fn try_lock_files(
        &self,
        task_id: &str,
        owner: &str,
        files: &[String],
        ttl_sec: i64,
    ) -> Result<Lease> {
        self.store.with_lock(|| {
            let acquired_at = now_rfc3339();
            let expires_at = wg_core::ms_to_rfc3339(wg_core::now_ms() + ttl_sec * 1000);
            let lease_id = gen_id("l");
            let mut acquired: Vec<String> = Vec::new();

            let rollback = |store: &super::fs::FileStore, acquired: &[String]| {
                for file in acquired {
                    let _ = store.remove(
                        &store.path(&["locks", "files", &format!("{}.json", path_hash(file))]),
                    );
                }
            };

            for file in files {
                let lock_path = self
                    .store
                    .path(&["locks", "files", &format!("{}.json", path_hash(file))]);

                if let Ok(existing) = self.store.read_json::<FileLock>(&lock_path) {
                    let now = wg_core::now_ms();
                    let exp = rfc3339_to_ms(&existing.expires_at);
                    if now < exp {
                        if existing.owner != owner {
                            rollback(&self.store, &acquired);
                            return Err(CoordError::Conflict(format!(
                                "file '{file}' locked by '{}' (task: {}, expires: {})",
                                existing.owner, existing.task_id, existing.expires_at
                            )));
                        }
                        // Same owner is reentrant; the lock gets rewritten
                        // under the new lease below.
                    } else {
                        debug!(file = %file, previous_owner = %existing.owner, "taking over expired file lock");
                        self.trace.log(TraceEvent {
                            event_type: trace_event::LOCK_EXPIRED.to_string(),
                            actor: owner.to_string(),
                            subject: file.clone(),
                            detail: format!("took over expired lock from '{}'", existing.owner),
                            ..TraceEvent::default()
                        });
                    }
                }

                let lock = FileLock {
                    lease_id: lease_id.clone(),
                    owner: owner.to_string(),
                    task_id: task_id.to_string(),
                    file: file.clone(),
                    acquired_at: acquired_at.clone(),
                    expires_at: expires_at.clone(),
                    last_heartbeat: acquired_at.clone(),
                };
                if let Err(err) = self.store.write_json(&lock_path, &lock) {
                    rollback(&self.store, &acquired);
                    return Err(err);
                }
                acquired.push(file.clone());
            }

            let lease = Lease {
                lease_id: lease_id.clone(),
                owner: owner.to_string(),
                task_id: task_id.to_string(),
                files: files.to_vec(),
                acquired_at,
                expires_at,
                last_heartbeat: now_rfc3339(),
            };
            self.store.write_json(
                &self
                    .store
                    .path(&["locks", "leases", &format!("{lease_id}.json")]),
                &lease,
            )?;
            Ok(lease)
        })
    }

    pub fn get_lease(&self, lease_id: &str) -> Result<Lease> {
        if lease_id.is_empty() {
            return Err(CoordError::InvalidArgument("lease_id is required".to_string()));
        }
        self.store
            .read_json(&self.store.path(&["locks", "leases", &format!("{lease_id}.json")]))
            .map_err(|_| CoordError::NotFound(format!("lease '{lease_id}' not found")))
    }

    /// Extend a lease and every file lock still tied to it.
    pub fn heartbeat(&self, lease_id: &str, extend_sec: i64) -> Result<Lease> {
        if lease_id.is_empty() {
            return Err(CoordError::InvalidArgument("lease_id is required".to_string()));
        }
        let extend_sec = if extend_sec <= 0 { DEFAULT_TTL_SEC } else { extend_sec };

        let lease = self.store.with_lock(|| {
            let lease_path = self
                .store
                .path(&["locks", "leases", &format!("{lease_id}.json")]);
            let mut lease: Lease = self
                .store
                .read_json(&lease_path)
                .map_err(|_| CoordError::NotFound(format!("lease '{lease_id}' not found")))?;

            lease.expires_at = wg_core::ms_to_rfc3339(wg_core::now_ms() + extend_sec * 1000);
            lease.last_heartbeat = now_rfc3339();
            self.store.write_json(&lease_path, &lease)?;

            for file in &lease.files {
                let lock_path = self
                    .store
                    .path(&["locks", "files", &format!("{}.json", path_hash(file))]);
                if let Ok(mut fl) = self.store.read_json::<FileLock>(&lock_path) {
                    if fl.lease_id == lease_id {
                        fl.expires_at = lease.expires_at.clone();
                        fl.last_heartbeat = lease.last_heartbeat.clone();
                        let _ = self.store.write_json(&lock_path, &fl);
                    }
                }
            }
            Ok(lease)
        })?;

        self.trace.log(TraceEvent {
            event_type: trace_event::LOCK_HEARTBEAT.to_string(),
            actor: lease.owner.clone(),
            subject: lease_id.to_string(),
            ..TraceEvent::default()
        });
        Ok(lease)
    }

    /// Release a lease: file locks first (only those still belonging to
    /// the lease), then the lease record.
    pub fn unlock(&self, lease_id: &str) -> Result<()> {
        if lease_id.is_empty() {
            return Err(CoordError::InvalidArgument("lease_id is required".to_string()));
        }
        let lease = self.store.with_lock(|| {
            let lease_path = self
                .store
                .path(&["locks", "leases", &format!("{lease_id}.json")]);
            let lease: Lease = self
                .store
                .read_json(&lease_path)
                .map_err(|_| CoordError::NotFound(format!("lease '{lease_id}' not found")))?;

            for file in &lease.files {
                let lock_path = self
                    .store
                    .path(&["locks", "files", &format!("{}.json", path_hash(file))]);
                if let Ok(fl) = self.store.read_json::<FileLock>(&lock_path) {
                    if fl.lease_id == lease_id {
                        let _ = self.store.remove(&lock_path);
                    }
                }
            }
            self.store.remove(&lease_path)?;
            Ok(lease)
        })?;

        self.trace.log(TraceEvent {
            event_type: trace_event::LOCK_RELEASED.to_string(),
            actor: lease.owner.clone(),
            subject: lease_id.to_string(),
            detail: format!("files: {:?}", lease.files),
            ..TraceEvent::default()
        });
        Ok(())
    }

    /// Unconditional removal, lead-side escape hatch for wedged leases.
    pub fn force_unlock(&self, lease_id: &str, reason: &str) -> Result<()> {
        if lease_id.is_empty() {
            return Err(CoordError::InvalidArgument("lease_id is required".to_string()));
        }
        let lease = self.store.with_lock(|| {
            let lease_path = self
                .store
                .path(&["locks", "leases", &format!("{lease_id}.json")]);
            let lease: Lease = self
                .store
                .read_json(&lease_path)
                .map_err(|_| CoordError::NotFound(format!("lease '{lease_id}' not found")))?;
            for file in &lease.files {
                let _ = self.store.remove(
                    &self
                        .store
                        .path(&["locks", "files", &format!("{}.json", path_hash(file))]),
                );
            }
            self.store.remove(&lease_path)?;
            Ok(lease)
        })?;

        self.trace.log(TraceEvent {
            event_type: trace_event::LOCK_FORCED.to_string(),
            actor: "leader".to_string(),
            subject: lease_id.to_string(),
            detail: format!(
                "reason: {reason}, owner was: {}, files: {:?}",
                lease.owner, lease.files
            ),
            ..TraceEvent::default()
        });
        Ok(())
    }

    /// Active (unexpired) leases, optionally filtered by owner and files.
    pub fn list_locks(&self, owner: &str, files: &[String]) -> Result<Vec<Lease>> {
        let dir = self.store.path(&["locks", "leases"]);
        let now = wg_core::now_ms();
        let wanted: Vec<String> = files.iter().map(|f| clean_path(f)).collect();

        let mut out = Vec::new();
        for path in self.store.list_json_files(&dir)? {
            let Ok(lease) = self.store.read_json::<Lease>(&path) else {
                continue;
            };
            if now > rfc3339_to_ms(&lease.expires_at) {
                continue;
            }
            if !owner.is_empty() && lease.owner != owner {
                continue;
            }
            if !wanted.is_empty() {
                let held: Vec<String> = lease.files.iter().map(|f| clean_path(f)).collect();
                if !wanted.iter().any(|w| held.contains(w)) {
                    continue;
                }
            }
            out.push(lease);
        }
        Ok(out)
    }

    /// Drop expired leases (with their file locks) and orphaned expired
    /// file locks. Returns how many records were removed.
    pub fn clean_expired(&self) -> Result<i64> {
        self.store.with_lock(|| {
            let now = wg_core::now_ms();
            let mut cleaned = 0;

            let leases_dir = self.store.path(&["locks", "leases"]);
            for path in self.store.list_json_files(&leases_dir)? {
                let Ok(lease) = self.store.read_json::<Lease>(&path) else {
                    continue;
                };
                if now > rfc3339_to_ms(&lease.expires_at) {
                    for file in &lease.files {
                        let _ = self.store.remove(
                            &self
                                .store
                                .path(&["locks", "files", &format!("{}.json", path_hash(file))]),
                        );
                    }
                    let _ = self.store.remove(&path);
                    cleaned += 1;
                }
            }

            let files_dir = self.store.path(&["locks", "files"]);
            for path in self.store.list_json_files(&files_dir)? {
                let Ok(lock) = self.store.read_json::<FileLock>(&path) else {
                    continue;
                };
                if now > rfc3339_to_ms(&lock.expires_at) {
                    let _ = self.store.remove(&path);
                    cleaned += 1;
                }
            }

            Ok(cleaned)
        })
    }
}
