#![forbid(unsafe_code)]

//! Worker registration directory under `{root}/workers/`.

use wg_core::model::{TraceEvent, Worker, trace_event};
use wg_core::{gen_id, now_rfc3339};

use crate::{CoordError, Result};

use super::WorkerService;

impl WorkerService {
    /// Register a worker. An empty id mints a fresh `w_…` identity;
    /// re-registering an existing id just refreshes `updated_at`.
    pub fn register(&self, worker_id: &str) -> Result<Worker> {
        let worker_id = if worker_id.trim().is_empty() {
            gen_id("w")
        } else {
            worker_id.trim().to_string()
        };

        let worker = self.store.with_lock(|| {
            let path = self
                .store
                .path(&["workers", &format!("{worker_id}.json")]);
            if let Ok(mut existing) = self.store.read_json::<Worker>(&path) {
                existing.updated_at = now_rfc3339();
                self.store.write_json(&path, &existing)?;
                return Ok(existing);
            }
            let worker = Worker {
                id: worker_id.clone(),
                joined_at: now_rfc3339(),
                updated_at: now_rfc3339(),
            };
            self.store.write_json(&path, &worker)?;
            Ok(worker)
        })?;

        self.trace.log(TraceEvent {
            event_type: trace_event::WORKER_REGISTERED.to_string(),
            actor: worker.id.clone(),
            subject: worker.id.clone(),
            ..TraceEvent::default()
        });
        Ok(worker)
    }

    pub fn get(&self, worker_id: &str) -> Result<Worker> {
        if worker_id.is_empty() {
            return Err(CoordError::InvalidArgument("worker_id is required".to_string()));
        }
        self.store
            .read_json(&self.store.path(&["workers", &format!("{worker_id}.json")]))
            .map_err(|_| CoordError::NotFound(format!("worker '{worker_id}' not found")))
    }

    pub fn exists(&self, worker_id: &str) -> bool {
        !worker_id.is_empty() && self.store.exists(&["workers", &format!("{worker_id}.json")])
    }

    pub fn list(&self) -> Result<Vec<Worker>> {
        let dir = self.store.path(&["workers"]);
        let mut out = Vec::new();
        for path in self.store.list_json_files(&dir)? {
            if let Ok(worker) = self.store.read_json::<Worker>(&path) {
                out.push(worker);
            }
        }
        Ok(out)
    }
}
