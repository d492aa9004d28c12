#![forbid(unsafe_code)]

//! Role gating: per-role tool allowlists and the optional role code.
//!
//! A server process runs as one role (lead / worker / acceptor). The
//! allowlist is enforced on every `tools/call` and filters `tools/list`.
//! When a role code is configured via environment, every call must carry
//! a matching `role_code` argument and the code is injected into the
//! advertised input schemas as a required property.

use serde_json::{Value, json};

const LEAD_TOOLS: &[&str] = &[
    "myProfile",
    "swarmNow",
    "createIssue",
    "getIssue",
    "listIssues",
    "listOpenedIssues",
    "waitIssues",
    "updateIssueDocPaths",
    "extendIssueLease",
    "closeIssue",
    "reopenIssue",
    "createIssueTask",
    "getIssueTask",
    "listIssueTasks",
    "listIssueOpenedTasks",
    "reviewIssueTask",
    "resetIssueTask",
    "replyIssueTaskMessage",
    "waitIssueTaskEvents",
    "getNextStepToken",
    "submitDelivery",
    "getDelivery",
    "listDeliveries",
    "listOpenedDeliveries",
    "getIssueAcceptanceBundle",
    "writeSharedDoc",
    "readSharedDoc",
    "listSharedDocs",
    "writeIssueDoc",
    "readIssueDoc",
    "listIssueDocs",
    "writeTaskDoc",
    "readTaskDoc",
    "listTaskDocs",
    "listLocks",
    "forceUnlock",
    "listWorkers",
    "getWorker",
];

const WORKER_TOOLS: &[&str] = &[
    "myProfile",
    "swarmNow",
    "registerWorker",
    "getIssue",
    "getIssueTask",
    "listIssueTasks",
    "listIssueOpenedTasks",
    "waitIssueTasks",
    "claimIssueTask",
    "extendIssueTaskLease",
    "submitIssueTask",
    "askIssueTask",
    "postIssueTaskMessage",
    "readSharedDoc",
    "listSharedDocs",
    "readIssueDoc",
    "listIssueDocs",
    "writeTaskDoc",
    "readTaskDoc",
    "listTaskDocs",
    "lockFiles",
    "heartbeat",
    "unlock",
    "listLocks",
    "listWorkers",
    "getWorker",
];

const ACCEPTOR_TOOLS: &[&str] = &[
    "myProfile",
    "swarmNow",
    "waitDeliveries",
    "claimDelivery",
    "extendDeliveryLease",
    "reviewDelivery",
    "getDelivery",
    "listDeliveries",
    "listOpenedDeliveries",
    "getIssueAcceptanceBundle",
    "getIssue",
    "listIssueTasks",
    "readSharedDoc",
    "listSharedDocs",
    "readIssueDoc",
    "listIssueDocs",
    "readTaskDoc",
    "listTaskDocs",
];

/// An empty role means an unrestricted server (single-operator setups).
pub fn tool_allowed_for_role(role: &str, tool: &str) -> bool {
    match role.trim() {
        "" => true,
        "lead" => LEAD_TOOLS.contains(&tool),
        "worker" => WORKER_TOOLS.contains(&tool),
        "acceptor" => ACCEPTOR_TOOLS.contains(&tool),
        _ => false,
    }
}

pub fn tools_for_role(role: &str) -> Option<&'static [&'static str]> {
    match role.trim() {
        "lead" => Some(LEAD_TOOLS),
        "worker" => Some(WORKER_TOOLS),
        "acceptor" => Some(ACCEPTOR_TOOLS),
        _ => None,
    }
}

/// `WAGGLE_ROLE_CODE_<ROLE>` wins over the generic `WAGGLE_ROLE_CODE`;
/// empty means no code is enforced.
pub fn expected_role_code(role: &str) -> String {
    let role = role.trim().to_uppercase();
    if !role.is_empty() {
        if let Ok(v) = std::env::var(format!("WAGGLE_ROLE_CODE_{role}")) {
            if !v.trim().is_empty() {
                return v.trim().to_string();
            }
        }
    }
    std::env::var("WAGGLE_ROLE_CODE")
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

/// Add a required `role_code` property to each advertised tool schema.
pub fn inject_role_code_into_tools(tools: &mut [Value]) {
    for tool in tools.iter_mut() {
        let Some(schema) = tool.get_mut("inputSchema").and_then(|v| v.as_object_mut()) else {
            continue;
        };
        let props = schema
            .entry("properties")
            .or_insert_with(|| json!({}));
        if let Some(props) = props.as_object_mut() {
            props.entry("role_code").or_insert_with(|| {
                json!({
                    "type": "string",
                    "description": "Role code required for this server role."
                })
            });
        }
        let required = schema.entry("required").or_insert_with(|| json!([]));
        if let Some(required) = required.as_array_mut() {
            if !required.iter().any(|v| v == "role_code") {
                required.push(json!("role_code"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_role_allows_everything() {
        assert!(tool_allowed_for_role("", "reviewIssueTask"));
        assert!(tool_allowed_for_role("", "claimIssueTask"));
    }

    #[test]
    fn worker_cannot_review_or_close() {
        assert!(tool_allowed_for_role("worker", "claimIssueTask"));
        assert!(!tool_allowed_for_role("worker", "reviewIssueTask"));
        assert!(!tool_allowed_for_role("worker", "closeIssue"));
        assert!(!tool_allowed_for_role("worker", "forceUnlock"));
    }

    #[test]
    fn acceptor_is_delivery_scoped() {
        assert!(tool_allowed_for_role("acceptor", "reviewDelivery"));
        assert!(!tool_allowed_for_role("acceptor", "createIssue"));
        assert!(!tool_allowed_for_role("acceptor", "lockFiles"));
    }

    #[test]
    fn role_code_injection_marks_schemas_required() {
        let mut tools = vec![json!({
            "name": "getIssue",
            "inputSchema": {"type": "object", "properties": {"issue_id": {"type": "string"}}, "required": ["issue_id"]}
        })];
        inject_role_code_into_tools(&mut tools);
        let schema = &tools[0]["inputSchema"];
        assert!(schema["properties"]["role_code"].is_object());
        assert!(
            schema["required"]
                .as_array()
                .unwrap()
                .iter()
                .any(|v| v == "role_code")
        );
    }
}
