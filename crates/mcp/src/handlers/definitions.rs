#![forbid(unsafe_code)]

//! Tool definitions advertised by `tools/list`, filtered by role.

use serde_json::{Value, json};

use crate::roles;

fn obj_schema(properties: Value, required: &[&str]) -> Value {
    json!({ "type": "object", "properties": properties, "required": required })
}

fn string_prop(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

fn int_prop(description: &str) -> Value {
    json!({ "type": "integer", "description": description })
}

fn string_array_prop(description: &str) -> Value {
    json!({ "type": "array", "items": { "type": "string" }, "description": description })
}

fn doc_prop(description: &str) -> Value {
    json!({
        "type": "object",
        "description": description,
        "properties": {
            "name": { "type": "string" },
            "content": { "type": "string" }
        },
        "required": ["name", "content"]
    })
}

fn pagination_props() -> Value {
    json!({
        "status": { "type": "string", "description": "Status filter; empty or 'all' for everything." },
        "subject_contains": { "type": "string", "description": "Case-insensitive subject substring filter." },
        "sort_by": { "type": "string", "enum": ["created_at", "updated_at", "points"] },
        "sort_order": { "type": "string", "enum": ["asc", "desc"] },
        "offset": { "type": "integer" },
        "limit": { "type": "integer", "description": "Page size, default 50, max 200." }
    })
}

pub fn tool_definitions(role: &str) -> Vec<Value> {
    let mut tools = all_tool_definitions();
    if let Some(allowed) = roles::tools_for_role(role) {
        tools.retain(|t| {
            let name = t.get("name").and_then(|v| v.as_str()).unwrap_or("");
            allowed.contains(&name)
        });
    }
    tools.sort_by_key(|t| {
        t.get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string()
    });
    tools
}

fn all_tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "myProfile",
            "description": "Return the caller's member identity.",
            "inputSchema": obj_schema(json!({ "session_id": string_prop("Optional session id for a stable identity.") }), &[])
        }),
        json!({
            "name": "swarmNow",
            "description": "Server clock: unix milliseconds and RFC3339 UTC.",
            "inputSchema": obj_schema(json!({}), &[])
        }),
        // --- issues ---
        json!({
            "name": "createIssue",
            "description": "Create an issue with its mandatory user and lead docs.",
            "inputSchema": obj_schema(json!({
                "subject": string_prop("Issue subject."),
                "description": string_prop("Optional longer description."),
                "shared_doc_paths": string_array_prop("Shared doc references."),
                "project_doc_paths": string_array_prop("Project doc references."),
                "user_issue_doc": doc_prop("The user's issue statement."),
                "lead_issue_doc": doc_prop("The lead's working plan."),
                "user_other_docs": { "type": "array", "items": doc_prop("Additional doc.") }
            }), &["subject", "user_issue_doc", "lead_issue_doc"])
        }),
        json!({
            "name": "getIssue",
            "description": "Fetch one issue.",
            "inputSchema": obj_schema(json!({ "issue_id": string_prop("Issue id.") }), &["issue_id"])
        }),
        json!({
            "name": "listIssues",
            "description": "List issues with filter, sort and pagination.",
            "inputSchema": obj_schema(pagination_props(), &[])
        }),
        json!({
            "name": "listOpenedIssues",
            "description": "List open issues, newest first.",
            "inputSchema": obj_schema(json!({}), &[])
        }),
        json!({
            "name": "waitIssues",
            "description": "Block until at least one issue matches the status filter.",
            "inputSchema": obj_schema(json!({
                "status": string_prop("Status to wait for; defaults to open."),
                "timeout_sec": int_prop("Wait budget in seconds; floored at the server default."),
                "limit": int_prop("Maximum issues to return.")
            }), &[])
        }),
        json!({
            "name": "updateIssueDocPaths",
            "description": "Patch an issue's shared/project doc path lists.",
            "inputSchema": obj_schema(json!({
                "issue_id": string_prop("Issue id."),
                "shared_doc_paths": string_array_prop("Replacement shared doc paths."),
                "project_doc_paths": string_array_prop("Replacement project doc paths.")
            }), &["issue_id"])
        }),
        json!({
            "name": "extendIssueLease",
            "description": "Extend an open issue's lease.",
            "inputSchema": obj_schema(json!({
                "issue_id": string_prop("Issue id."),
                "extend_sec": int_prop("Extension in seconds; defaults to the issue TTL.")
            }), &["issue_id"])
        }),
        json!({
            "name": "closeIssue",
            "description": "Close an issue once every task is done.",
            "inputSchema": obj_schema(json!({
                "issue_id": string_prop("Issue id."),
                "summary": string_prop("Closing summary.")
            }), &["issue_id"])
        }),
        json!({
            "name": "reopenIssue",
            "description": "Reopen a done or canceled issue.",
            "inputSchema": obj_schema(json!({
                "issue_id": string_prop("Issue id."),
                "summary": string_prop("Why the issue is being reopened.")
            }), &["issue_id"])
        }),
        json!({
            "name": "getIssueAcceptanceBundle",
            "description": "Issue plus aggregated task artifacts for acceptance review.",
            "inputSchema": obj_schema(json!({ "issue_id": string_prop("Issue id.") }), &["issue_id"])
        }),
        // --- tasks ---
        json!({
            "name": "createIssueTask",
            "description": "Create a task under an issue; the spec block becomes its required doc.",
            "inputSchema": obj_schema(json!({
                "issue_id": string_prop("Issue id."),
                "subject": string_prop("Task subject."),
                "description": string_prop("Optional description."),
                "difficulty": { "type": "string", "enum": ["easy", "medium", "focus"] },
                "points": int_prop("Task points for the tiering logic."),
                "suggested_files": string_array_prop("Files likely touched."),
                "labels": string_array_prop("Free-form labels."),
                "doc_paths": string_array_prop("Extra doc references."),
                "context_task_ids": string_array_prop("Related task ids."),
                "spec": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "split_from": { "type": "string" },
                        "split_reason": { "type": "string" },
                        "impact_scope": { "type": "string" },
                        "context_task_ids": { "type": "array", "items": { "type": "string" } },
                        "goal": { "type": "string" },
                        "rules": { "type": "string" },
                        "constraints": { "type": "string" },
                        "conventions": { "type": "string" },
                        "acceptance": { "type": "string" }
                    },
                    "required": ["name", "split_from", "split_reason", "impact_scope", "goal", "rules", "constraints", "conventions", "acceptance"]
                }
            }), &["issue_id", "subject", "difficulty", "spec"])
        }),
        json!({
            "name": "getIssueTask",
            "description": "Fetch one task.",
            "inputSchema": obj_schema(json!({
                "issue_id": string_prop("Issue id."),
                "task_id": string_prop("Task id.")
            }), &["issue_id", "task_id"])
        }),
        json!({
            "name": "listIssueTasks",
            "description": "List an issue's tasks with filter, sort and pagination.",
            "inputSchema": obj_schema(json!({
                "issue_id": string_prop("Issue id."),
                "claimed_by": string_prop("Filter by claimer."),
                "submitter": string_prop("Filter by submitter."),
                "status": { "type": "string" },
                "subject_contains": { "type": "string" },
                "sort_by": { "type": "string", "enum": ["created_at", "updated_at", "points"] },
                "sort_order": { "type": "string", "enum": ["asc", "desc"] },
                "offset": { "type": "integer" },
                "limit": { "type": "integer" }
            }), &["issue_id"])
        }),
        json!({
            "name": "listIssueOpenedTasks",
            "description": "List an issue's open tasks, newest first.",
            "inputSchema": obj_schema(json!({ "issue_id": string_prop("Issue id.") }), &["issue_id"])
        }),
        json!({
            "name": "waitIssueTasks",
            "description": "Block until at least one task matches the status filter.",
            "inputSchema": obj_schema(json!({
                "issue_id": string_prop("Issue id."),
                "status": string_prop("Status to wait for; defaults to open."),
                "timeout_sec": int_prop("Wait budget in seconds."),
                "limit": int_prop("Maximum tasks to return.")
            }), &["issue_id"])
        }),
        json!({
            "name": "claimIssueTask",
            "description": "Claim an open task. Reserved tasks need the matching next_step_token.",
            "inputSchema": obj_schema(json!({
                "issue_id": string_prop("Issue id."),
                "task_id": string_prop("Task id."),
                "worker_id": string_prop("Registered worker id."),
                "next_step_token": string_prop("Token redeeming a reservation.")
            }), &["issue_id", "task_id", "worker_id"])
        }),
        json!({
            "name": "extendIssueTaskLease",
            "description": "Extend a claimed task's lease.",
            "inputSchema": obj_schema(json!({
                "issue_id": string_prop("Issue id."),
                "task_id": string_prop("Task id."),
                "worker_id": string_prop("Claiming worker id."),
                "extend_sec": int_prop("Extension in seconds; defaults to the task TTL.")
            }), &["issue_id", "task_id"])
        }),
        json!({
            "name": "submitIssueTask",
            "description": "Submit work for review; blocks until the lead approves or rejects.",
            "inputSchema": obj_schema(json!({
                "issue_id": string_prop("Issue id."),
                "task_id": string_prop("Task id."),
                "worker_id": string_prop("Registered worker id."),
                "artifacts": {
                    "type": "object",
                    "properties": {
                        "summary": { "type": "string" },
                        "changed_files": { "type": "array", "items": { "type": "string" } },
                        "diff": { "type": "string" },
                        "links": { "type": "array", "items": { "type": "string" } },
                        "test_cases": { "type": "array", "items": { "type": "string" } },
                        "test_result": { "type": "string", "enum": ["passed", "failed"] },
                        "test_output": { "type": "string" }
                    },
                    "required": ["summary", "changed_files", "test_cases", "test_result", "test_output"]
                }
            }), &["issue_id", "task_id", "worker_id", "artifacts"])
        }),
        json!({
            "name": "reviewIssueTask",
            "description": "Review the latest open submission; approval finishes the task.",
            "inputSchema": obj_schema(json!({
                "issue_id": string_prop("Issue id."),
                "task_id": string_prop("Task id."),
                "submission_id": string_prop("Explicit submission; defaults to the latest open one."),
                "verdict": { "type": "string", "enum": ["approved", "rejected"] },
                "completion_score": { "type": "integer", "enum": [1, 2, 5] },
                "feedback": string_prop("Overall feedback."),
                "artifacts": {
                    "type": "object",
                    "properties": {
                        "review_summary": { "type": "string" },
                        "reviewed_refs": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["review_summary", "reviewed_refs"]
                },
                "feedback_details": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "dimension": { "type": "string" },
                            "severity": { "type": "string" },
                            "file_path": { "type": "string" },
                            "line_range": { "type": "string" },
                            "content": { "type": "string" },
                            "suggestion": { "type": "string" }
                        },
                        "required": ["dimension", "severity", "content"]
                    }
                },
                "next_step_token": string_prop("Token from getNextStepToken; attached by this review.")
            }), &["issue_id", "task_id", "verdict", "completion_score", "artifacts", "feedback_details", "next_step_token"])
        }),
        json!({
            "name": "resetIssueTask",
            "description": "Return a task to never-claimed, erasing its execution history.",
            "inputSchema": obj_schema(json!({
                "issue_id": string_prop("Issue id."),
                "task_id": string_prop("Task id."),
                "reason": string_prop("Why the task is being reset.")
            }), &["issue_id", "task_id"])
        }),
        json!({
            "name": "getNextStepToken",
            "description": "Score a finished task and mint the worker's next-step token.",
            "inputSchema": obj_schema(json!({
                "issue_id": string_prop("Issue id."),
                "task_id": string_prop("The just-finished task id."),
                "worker_id": string_prop("Worker being scored."),
                "completion_score": { "type": "integer", "enum": [1, 2, 5] }
            }), &["issue_id", "task_id", "worker_id", "completion_score"])
        }),
        json!({
            "name": "waitIssueTaskEvents",
            "description": "Lead long-poll: claim the next submission or question signal.",
            "inputSchema": obj_schema(json!({
                "issue_id": string_prop("Issue id."),
                "session_id": string_prop("Session identity claiming the signal."),
                "timeout_sec": int_prop("Wait budget in seconds.")
            }), &["issue_id"])
        }),
        // --- messaging ---
        json!({
            "name": "askIssueTask",
            "description": "Post a question or blocker and block until the lead replies.",
            "inputSchema": obj_schema(json!({
                "issue_id": string_prop("Issue id."),
                "task_id": string_prop("Task id."),
                "worker_id": string_prop("Asking worker id."),
                "kind": { "type": "string", "enum": ["question", "blocker"] },
                "content": string_prop("The question."),
                "refs": string_prop("Optional references."),
                "timeout_sec": int_prop("Wait budget in seconds.")
            }), &["issue_id", "task_id", "worker_id", "content"])
        }),
        json!({
            "name": "postIssueTaskMessage",
            "description": "Post a question or blocker without waiting for the reply.",
            "inputSchema": obj_schema(json!({
                "issue_id": string_prop("Issue id."),
                "task_id": string_prop("Task id."),
                "worker_id": string_prop("Posting worker id."),
                "kind": { "type": "string", "enum": ["question", "blocker"] },
                "content": string_prop("Message content."),
                "refs": string_prop("Optional references.")
            }), &["issue_id", "task_id", "worker_id", "content"])
        }),
        json!({
            "name": "replyIssueTaskMessage",
            "description": "Reply to a task message (oldest open one by default).",
            "inputSchema": obj_schema(json!({
                "issue_id": string_prop("Issue id."),
                "task_id": string_prop("Task id."),
                "message_id": string_prop("Explicit message to reply to."),
                "content": string_prop("Reply content."),
                "refs": string_prop("Optional references.")
            }), &["issue_id", "task_id", "content"])
        }),
        // --- deliveries ---
        json!({
            "name": "submitDelivery",
            "description": "Package a finished issue and block until the acceptor reviews it.",
            "inputSchema": obj_schema(json!({
                "issue_id": string_prop("Issue id."),
                "summary": string_prop("Delivery summary."),
                "refs": string_prop("Optional references."),
                "artifacts": {
                    "type": "object",
                    "properties": {
                        "test_result": { "type": "string", "enum": ["passed", "failed"] },
                        "test_cases": { "type": "array", "items": { "type": "string" } },
                        "changed_files": { "type": "array", "items": { "type": "string" } },
                        "reviewed_refs": { "type": "array", "items": { "type": "string" } },
                        "test_output": { "type": "string" },
                        "known_risks": { "type": "string" }
                    },
                    "required": ["test_result", "test_cases", "changed_files", "reviewed_refs"]
                },
                "test_evidence": {
                    "type": "object",
                    "properties": {
                        "script_path": { "type": "string" },
                        "script_cmd": { "type": "string" },
                        "script_passed": { "type": "boolean" },
                        "script_result": { "type": "string" },
                        "doc_path": { "type": "string" },
                        "doc_commands": { "type": "array", "items": { "type": "string" } },
                        "doc_results": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "command": { "type": "string" },
                                    "passed": { "type": "boolean" },
                                    "exit_code": { "type": "integer" },
                                    "output": { "type": "string" }
                                },
                                "required": ["command", "passed"]
                            }
                        },
                        "doc_passed": { "type": "boolean" }
                    },
                    "required": ["script_path", "script_cmd", "script_result", "doc_path", "doc_commands", "doc_results"]
                },
                "timeout_sec": int_prop("Wait budget in seconds.")
            }), &["issue_id", "summary", "artifacts", "test_evidence"])
        }),
        json!({
            "name": "getDelivery",
            "description": "Fetch one delivery.",
            "inputSchema": obj_schema(json!({ "delivery_id": string_prop("Delivery id.") }), &["delivery_id"])
        }),
        json!({
            "name": "listDeliveries",
            "description": "List deliveries with filters and pagination.",
            "inputSchema": obj_schema(json!({
                "status": string_prop("Status filter; empty or 'all' for everything."),
                "issue_id": string_prop("Filter by issue."),
                "delivered_by": string_prop("Filter by deliverer."),
                "reviewed_by": string_prop("Filter by reviewer."),
                "offset": { "type": "integer" },
                "limit": { "type": "integer" }
            }), &[])
        }),
        json!({
            "name": "listOpenedDeliveries",
            "description": "List open deliveries.",
            "inputSchema": obj_schema(json!({}), &[])
        }),
        json!({
            "name": "waitDeliveries",
            "description": "Acceptor long-poll: returns the next delivery, already claimed into review.",
            "inputSchema": obj_schema(json!({
                "status": string_prop("Status to wait for; defaults to open."),
                "timeout_sec": int_prop("Wait budget in seconds."),
                "limit": int_prop("Maximum deliveries to return.")
            }), &[])
        }),
        json!({
            "name": "claimDelivery",
            "description": "Claim an open delivery into review.",
            "inputSchema": obj_schema(json!({
                "delivery_id": string_prop("Delivery id."),
                "extend_sec": int_prop("Review lease in seconds.")
            }), &["delivery_id"])
        }),
        json!({
            "name": "extendDeliveryLease",
            "description": "Extend an in-review delivery's lease.",
            "inputSchema": obj_schema(json!({
                "delivery_id": string_prop("Delivery id."),
                "extend_sec": int_prop("Extension in seconds.")
            }), &["delivery_id"])
        }),
        json!({
            "name": "reviewDelivery",
            "description": "Resolve an in-review delivery; verification must match its evidence.",
            "inputSchema": obj_schema(json!({
                "delivery_id": string_prop("Delivery id."),
                "verdict": { "type": "string", "enum": ["approved", "rejected"] },
                "feedback": string_prop("Review feedback."),
                "refs": string_prop("Additional references."),
                "verification": {
                    "type": "object",
                    "properties": {
                        "script_passed": { "type": "boolean" },
                        "script_result": { "type": "string" },
                        "doc_passed": { "type": "boolean" },
                        "doc_results": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "command": { "type": "string" },
                                    "passed": { "type": "boolean" },
                                    "exit_code": { "type": "integer" },
                                    "output": { "type": "string" }
                                },
                                "required": ["command", "passed"]
                            }
                        }
                    },
                    "required": ["doc_results"]
                }
            }), &["delivery_id", "verdict", "verification"])
        }),
        // --- workers ---
        json!({
            "name": "registerWorker",
            "description": "Register (or refresh) a worker identity.",
            "inputSchema": obj_schema(json!({
                "worker_id": string_prop("Existing id to refresh; empty to mint a new one.")
            }), &[])
        }),
        json!({
            "name": "listWorkers",
            "description": "List registered workers.",
            "inputSchema": obj_schema(json!({}), &[])
        }),
        json!({
            "name": "getWorker",
            "description": "Fetch one worker registration.",
            "inputSchema": obj_schema(json!({ "worker_id": string_prop("Worker id.") }), &["worker_id"])
        }),
        // --- docs ---
        json!({
            "name": "writeSharedDoc",
            "description": "Write a shared markdown doc.",
            "inputSchema": obj_schema(json!({
                "name": string_prop("Doc name; may contain subdirectories."),
                "content": string_prop("Markdown content.")
            }), &["name", "content"])
        }),
        json!({
            "name": "readSharedDoc",
            "description": "Read a shared markdown doc.",
            "inputSchema": obj_schema(json!({ "name": string_prop("Doc name.") }), &["name"])
        }),
        json!({
            "name": "listSharedDocs",
            "description": "List shared markdown docs.",
            "inputSchema": obj_schema(json!({}), &[])
        }),
        json!({
            "name": "writeIssueDoc",
            "description": "Write an issue-scoped markdown doc.",
            "inputSchema": obj_schema(json!({
                "issue_id": string_prop("Issue id."),
                "name": string_prop("Doc name."),
                "content": string_prop("Markdown content.")
            }), &["issue_id", "name", "content"])
        }),
        json!({
            "name": "readIssueDoc",
            "description": "Read an issue-scoped markdown doc.",
            "inputSchema": obj_schema(json!({
                "issue_id": string_prop("Issue id."),
                "name": string_prop("Doc name.")
            }), &["issue_id", "name"])
        }),
        json!({
            "name": "listIssueDocs",
            "description": "List an issue's markdown docs.",
            "inputSchema": obj_schema(json!({ "issue_id": string_prop("Issue id.") }), &["issue_id"])
        }),
        json!({
            "name": "writeTaskDoc",
            "description": "Write a task-scoped markdown doc.",
            "inputSchema": obj_schema(json!({
                "issue_id": string_prop("Issue id."),
                "task_id": string_prop("Task id."),
                "name": string_prop("Doc name."),
                "content": string_prop("Markdown content.")
            }), &["issue_id", "task_id", "name", "content"])
        }),
        json!({
            "name": "readTaskDoc",
            "description": "Read a task-scoped markdown doc.",
            "inputSchema": obj_schema(json!({
                "issue_id": string_prop("Issue id."),
                "task_id": string_prop("Task id."),
                "name": string_prop("Doc name.")
            }), &["issue_id", "task_id", "name"])
        }),
        json!({
            "name": "listTaskDocs",
            "description": "List a task's markdown docs.",
            "inputSchema": obj_schema(json!({
                "issue_id": string_prop("Issue id."),
                "task_id": string_prop("Task id.")
            }), &["issue_id", "task_id"])
        }),
        // --- locks ---
        json!({
            "name": "lockFiles",
            "description": "Acquire lease-based locks on files, atomically and in canonical order.",
            "inputSchema": obj_schema(json!({
                "worker_id": string_prop("Registered worker id."),
                "issue_id": string_prop("Required when task_id is set."),
                "task_id": string_prop("Task the lease belongs to."),
                "files": string_array_prop("Files to lock."),
                "ttl_sec": int_prop("Lease TTL in seconds, default 120."),
                "wait_sec": int_prop("How long to retry on conflict, default 0.")
            }), &["worker_id", "files"])
        }),
        json!({
            "name": "heartbeat",
            "description": "Extend a lease and its file locks.",
            "inputSchema": obj_schema(json!({
                "worker_id": string_prop("Lease owner."),
                "lease_id": string_prop("Lease id."),
                "extend_sec": int_prop("Extension in seconds, default 120.")
            }), &["worker_id", "lease_id"])
        }),
        json!({
            "name": "unlock",
            "description": "Release a lease and its file locks.",
            "inputSchema": obj_schema(json!({
                "worker_id": string_prop("Lease owner."),
                "lease_id": string_prop("Lease id.")
            }), &["worker_id", "lease_id"])
        }),
        json!({
            "name": "listLocks",
            "description": "List active leases, filtered by owner and files.",
            "inputSchema": obj_schema(json!({
                "owner": string_prop("Owner filter."),
                "worker_id": string_prop("Required for workers; defaults the owner filter."),
                "files": string_array_prop("File filter.")
            }), &[])
        }),
        json!({
            "name": "forceUnlock",
            "description": "Forcefully remove a lease regardless of owner.",
            "inputSchema": obj_schema(json!({
                "lease_id": string_prop("Lease id."),
                "reason": string_prop("Why the lease is being removed.")
            }), &["lease_id"])
        }),
    ]
}
