#![forbid(unsafe_code)]

//! Validation and polling helpers shared across the services.

use std::path::Path;
use std::time::{Duration, Instant};

use wg_core::now_ms;

use crate::{CoordError, Result};

pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Trim `value`, failing with `invalid_argument` when nothing remains.
pub(crate) fn trim_required(name: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CoordError::InvalidArgument(format!("{name} is required")));
    }
    Ok(trimmed.to_string())
}

/// Normalize a doc name into a relative, extensionless path segment.
/// Subdirectories are allowed ("design/api"); escapes are not.
pub(crate) fn clean_doc_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CoordError::InvalidArgument("doc name is required".to_string()));
    }
    let mut cleaned = super::fs::clean_path(trimmed);
    if let Some(stripped) = cleaned.strip_prefix('/') {
        cleaned = stripped.to_string();
    }
    if let Some(stripped) = cleaned.strip_suffix(".md") {
        cleaned = stripped.to_string();
    }
    if cleaned == "." || cleaned == ".." || cleaned.starts_with("../") {
        return Err(CoordError::InvalidArgument("invalid doc name".to_string()));
    }
    Ok(cleaned)
}

pub(crate) fn write_doc_file(dir: &Path, filename: &str, content: &str) -> Result<()> {
    let path = dir.join(filename);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content.as_bytes())?;
    Ok(())
}

/// Wall-clock deadline for a blocking poll loop.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    end: Instant,
}

impl Deadline {
    pub(crate) fn after_secs(secs: i64) -> Self {
        let secs = if secs <= 0 { 0 } else { secs as u64 };
        Self {
            end: Instant::now() + Duration::from_secs(secs),
        }
    }

    pub(crate) fn expired(&self) -> bool {
        Instant::now() >= self.end
    }

    /// Sleep one poll interval, clipped to the remaining budget.
    pub(crate) fn sleep_poll(&self) {
        let remaining = self.end.saturating_duration_since(Instant::now());
        std::thread::sleep(remaining.min(POLL_INTERVAL));
    }
}

/// Absolute lease expiry from an extension request; `extend_sec <= 0`
/// falls back to `default_sec`, and a non-positive fallback disables the
/// lease (0 = never expires).
pub(crate) fn calc_lease_expiry_ms(extend_sec: i64, default_sec: i64) -> i64 {
    let sec = if extend_sec > 0 { extend_sec } else { default_sec };
    if sec <= 0 {
        return 0;
    }
    now_ms() + sec * 1000
}
