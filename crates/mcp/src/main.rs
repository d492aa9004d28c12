#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;
use wg_mcp::entry::run_stdio;
use wg_mcp::{McpServer, ServerConfig};
use wg_storage::{CoordConfig, FileStore};

fn env_i64(name: &str, default: i64) -> i64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(default)
}

fn data_root() -> PathBuf {
    if let Ok(root) = std::env::var("DATA_ROOT") {
        if !root.trim().is_empty() {
            return PathBuf::from(root.trim());
        }
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".waggle-mcp")
}

fn main() {
    // Stdout carries the protocol; all diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let root = data_root();

    let mut coord = CoordConfig {
        issue_ttl_sec: env_i64("ISSUE_TTL_SEC", 3600),
        task_ttl_sec: env_i64("TASK_TTL_SEC", 600),
        default_timeout_sec: env_i64("DEFAULT_TIMEOUT_SEC", 3600),
        max_task_count: env_i64("MAX_TASK_COUNT", 0),
        suggested_min_task_count: env_i64("SUGGESTED_MIN_TASK_COUNT", 0),
    };
    // Blocking calls promise collaborators at least an hour; a lower
    // configured default would let one side bail out early.
    if coord.default_timeout_sec < 3600 {
        coord.default_timeout_sec = 3600;
    }

    let role = std::env::var("WAGGLE_ROLE")
        .map(|v| v.trim().to_string())
        .unwrap_or_default();
    let role_code = wg_mcp::roles::expected_role_code(&role);
    let cfg = ServerConfig {
        role: role.clone(),
        role_code,
        suggested_min_task_count: coord.suggested_min_task_count,
    };

    let store = FileStore::new(&root);
    store.ensure_dir(&[]);
    store.ensure_dir(&["docs", "shared"]);
    store.ensure_dir(&["issues"]);
    store.ensure_dir(&["workers"]);
    store.ensure_dir(&["locks", "files"]);
    store.ensure_dir(&["locks", "leases"]);
    store.ensure_dir(&["deliveries", "inbox", "acceptor"]);
    store.ensure_dir(&["trace"]);

    info!(
        root = %root.display(),
        role = %role,
        issue_ttl_sec = coord.issue_ttl_sec,
        task_ttl_sec = coord.task_ttl_sec,
        "starting waggle-mcp"
    );

    let server = Arc::new(McpServer::new(root, coord, cfg));
    if let Err(err) = run_stdio(server) {
        tracing::error!(error = %err, "server stopped with error");
        std::process::exit(1);
    }
}
