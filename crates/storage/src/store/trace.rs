#![forbid(unsafe_code)]

//! Append-only audit sink. Consumers tail `{root}/trace/events.jsonl`;
//! the services never read it back.

use tracing::warn;
use wg_core::model::TraceEvent;
use wg_core::{gen_id, now_rfc3339};

use super::TraceService;

impl TraceService {
    /// Best-effort append. A failing trace write is logged and swallowed;
    /// auditing never fails the traced operation.
    pub fn log(&self, mut event: TraceEvent) {
        if event.id.is_empty() {
            event.id = gen_id("ev");
        }
        if event.timestamp.is_empty() {
            event.timestamp = now_rfc3339();
        }
        let path = self.store.path(&["trace", "events.jsonl"]);
        if let Err(err) = self.store.append_jsonl(&path, &event) {
            warn!(error = %err, event_type = %event.event_type, "trace append failed");
        }
    }
}
