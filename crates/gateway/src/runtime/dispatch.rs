//! Tool dispatch: name resolution, argument validation, the approval
//! gate, and execution of the built-in catalog plus MCP tools.
//!
//! Validation failures never abort the turn; they become error
//! `ToolResult`s so every `ToolCall` keeps a matching result.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use tether_domain::config::ApprovalPolicy;
use tether_domain::item::ConversationItem;
use tether_domain::tool::{ToolDefinition, ToolInvocation};
use tether_mcp_client::McpManager;
use tether_tools::{patch, read_chunk, shell, todo::TodoStore};
use tether_protocol::{ApplyPatchRequest, ApprovalRequestPayload};

use super::approval::{
    self, ApprovalCoordinator, ApprovalDecision,
};
use super::outbound::OutboundSink;

/// The result of one tool invocation plus the turn-control verdict
/// (`no-exit` denials terminate the turn after the result is recorded).
pub struct DispatchOutcome {
    pub result: ConversationItem,
    pub stop_turn: bool,
}

impl DispatchOutcome {
    fn done(result: ConversationItem) -> Self {
        Self {
            result,
            stop_turn: false,
        }
    }
}

/// Hook surface the orchestrator drives; concrete dispatch lives in
/// [`Dispatcher`].
#[async_trait::async_trait]
pub trait ToolDispatch: Send + Sync {
    fn catalog(&self) -> Vec<ToolDefinition>;
    async fn dispatch(&self, invocation: &ToolInvocation) -> DispatchOutcome;
}

pub struct Dispatcher {
    workdir: PathBuf,
    shell_timeout: u64,
    sandbox: bool,
    policy: ApprovalPolicy,
    writable_roots: Vec<PathBuf>,
    todos: TodoStore,
    approvals: Arc<ApprovalCoordinator>,
    outbound: OutboundSink,
    mcp: Arc<McpManager>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        workdir: PathBuf,
        shell_timeout: u64,
        sandbox: bool,
        policy: ApprovalPolicy,
        configured_roots: &[PathBuf],
        todos: TodoStore,
        approvals: Arc<ApprovalCoordinator>,
        outbound: OutboundSink,
        mcp: Arc<McpManager>,
    ) -> Self {
        let writable_roots = approval::writable_roots(&workdir, configured_roots);
        Self {
            workdir,
            shell_timeout,
            sandbox,
            policy,
            writable_roots,
            todos,
            approvals,
            outbound,
            mcp,
        }
    }

    // ── Shell ──────────────────────────────────────────────────────

    async fn dispatch_shell(&self, invocation: &ToolInvocation) -> DispatchOutcome {
        let args = &invocation.arguments;

        let command = match parse_command(args) {
            Ok(c) => c,
            Err(message) => return error_result(invocation, message),
        };
        if let Some(workdir) = args.get("workdir") {
            if !workdir.is_string() && !workdir.is_null() {
                return error_result(invocation, "Error: 'workdir' must be a string".into());
            }
        }
        if let Some(timeout) = args.get("timeout") {
            if !timeout.is_number() && !timeout.is_null() {
                return error_result(invocation, "Error: 'timeout' must be a number".into());
            }
        }

        match command[0].as_str() {
            "apply_patch" => self.dispatch_patch(invocation, &command).await,
            "read_chunk" => self.dispatch_read_chunk(invocation, &command),
            _ => self.dispatch_plain_shell(invocation, command).await,
        }
    }

    async fn dispatch_plain_shell(
        &self,
        invocation: &ToolInvocation,
        command: Vec<String>,
    ) -> DispatchOutcome {
        if approval::command_requires_approval(self.policy, &command, &self.approvals) {
            let payload = ApprovalRequestPayload {
                command: command.clone(),
                apply_patch: None,
            };
            let elevation_key = command[0].clone();
            match self
                .approvals
                .request(&self.outbound, payload, elevation_key)
                .await
            {
                ApprovalDecision::Approved => {}
                ApprovalDecision::Denied { message, stop_turn } => {
                    return DispatchOutcome {
                        result: ConversationItem::tool_result(
                            &invocation.call_id,
                            message,
                            false,
                        ),
                        stop_turn,
                    };
                }
            }
        }

        let request = shell::ShellRequest {
            command,
            workdir: invocation
                .arguments
                .get("workdir")
                .and_then(Value::as_str)
                .map(str::to_string),
            timeout: invocation
                .arguments
                .get("timeout")
                .and_then(Value::as_u64)
                .or(Some(self.shell_timeout)),
        };
        let outcome = shell::run_shell(&request, &self.workdir, self.sandbox).await;
        let is_error = outcome.exit_code != 0 || outcome.timed_out;
        DispatchOutcome::done(ConversationItem::tool_result(
            &invocation.call_id,
            outcome.to_tool_output(),
            is_error,
        ))
    }

    // ── apply_patch (special shell first-arg) ──────────────────────

    async fn dispatch_patch(
        &self,
        invocation: &ToolInvocation,
        command: &[String],
    ) -> DispatchOutcome {
        let Some(patch_text) = command.get(1) else {
            return error_result(
                invocation,
                "Error: apply_patch requires the patch text as its second argument".into(),
            );
        };

        let targets = match patch::patch_targets(patch_text, &self.workdir) {
            Ok(t) => t,
            Err(e) => {
                return DispatchOutcome::done(tool_error_output(invocation, &e.to_string()));
            }
        };

        if approval::patch_requires_approval(
            self.policy,
            &targets,
            &self.writable_roots,
            &self.approvals,
        ) {
            let payload = ApprovalRequestPayload {
                command: command.to_vec(),
                apply_patch: Some(ApplyPatchRequest {
                    patch: patch_text.clone(),
                }),
            };
            match self
                .approvals
                .request(&self.outbound, payload, "apply_patch".into())
                .await
            {
                ApprovalDecision::Approved => {}
                ApprovalDecision::Denied { message, stop_turn } => {
                    return DispatchOutcome {
                        result: ConversationItem::tool_result(
                            &invocation.call_id,
                            message,
                            false,
                        ),
                        stop_turn,
                    };
                }
            }
        }

        let started = Instant::now();
        match patch::apply_patch(patch_text, &self.workdir) {
            Ok(summary) => {
                let outcome = shell::ShellOutcome {
                    output: summary,
                    exit_code: 0,
                    duration_seconds: started.elapsed().as_secs_f64(),
                    timed_out: false,
                };
                DispatchOutcome::done(ConversationItem::tool_result(
                    &invocation.call_id,
                    outcome.to_tool_output(),
                    false,
                ))
            }
            Err(e) => DispatchOutcome::done(tool_error_output(invocation, &e.to_string())),
        }
    }

    // ── read_chunk (special shell first-arg) ───────────────────────

    fn dispatch_read_chunk(
        &self,
        invocation: &ToolInvocation,
        command: &[String],
    ) -> DispatchOutcome {
        let (file_name, start, end) = match parse_read_chunk_args(command) {
            Ok(parsed) => parsed,
            Err(message) => return error_result(invocation, message),
        };
        match read_chunk::read_chunk(&self.workdir, &file_name, start, end) {
            Ok(window) => {
                let outcome = shell::ShellOutcome {
                    output: window,
                    exit_code: 0,
                    duration_seconds: 0.0,
                    timed_out: false,
                };
                DispatchOutcome::done(ConversationItem::tool_result(
                    &invocation.call_id,
                    outcome.to_tool_output(),
                    false,
                ))
            }
            Err(e) => DispatchOutcome::done(tool_error_output(invocation, &e.to_string())),
        }
    }

    // ── Todos ──────────────────────────────────────────────────────

    fn dispatch_add_todo(&self, invocation: &ToolInvocation) -> DispatchOutcome {
        let Some(description) = invocation
            .arguments
            .get("task_description")
            .and_then(Value::as_str)
        else {
            return error_result(
                invocation,
                "Error: 'task_description' must be a string".into(),
            );
        };
        match self.todos.add(description) {
            Ok(item) => DispatchOutcome::done(ConversationItem::tool_result(
                &invocation.call_id,
                format!(
                    "Added {} with status {}: {}",
                    item.id, item.status, item.short_task_description
                ),
                false,
            )),
            Err(e) => DispatchOutcome::done(tool_error_output(invocation, &e.to_string())),
        }
    }

    fn dispatch_update_todo(&self, invocation: &ToolInvocation) -> DispatchOutcome {
        let args = &invocation.arguments;
        let (Some(todo_id), Some(new_status)) = (
            args.get("todo_id").and_then(Value::as_str),
            args.get("new_status").and_then(Value::as_str),
        ) else {
            return error_result(
                invocation,
                "Error: 'todo_id' and 'new_status' must be strings".into(),
            );
        };
        match self.todos.update(todo_id, new_status) {
            Ok(item) => DispatchOutcome::done(ConversationItem::tool_result(
                &invocation.call_id,
                format!("Updated {} to {}", item.id, item.status),
                false,
            )),
            Err(e) => DispatchOutcome::done(tool_error_output(invocation, &e.to_string())),
        }
    }

    fn dispatch_show_todos(&self, invocation: &ToolInvocation) -> DispatchOutcome {
        match self.todos.render() {
            Ok(rendered) => DispatchOutcome::done(ConversationItem::tool_result(
                &invocation.call_id,
                rendered,
                false,
            )),
            Err(e) => DispatchOutcome::done(tool_error_output(invocation, &e.to_string())),
        }
    }

    // ── MCP ────────────────────────────────────────────────────────

    async fn dispatch_mcp(&self, invocation: &ToolInvocation) -> DispatchOutcome {
        match self
            .mcp
            .call(&invocation.name, invocation.arguments.clone())
            .await
        {
            Ok((content, is_error)) => DispatchOutcome::done(ConversationItem::tool_result(
                &invocation.call_id,
                content,
                is_error,
            )),
            Err(e) => DispatchOutcome::done(tool_error_output(invocation, &e.to_string())),
        }
    }
}

#[async_trait::async_trait]
impl ToolDispatch for Dispatcher {
    fn catalog(&self) -> Vec<ToolDefinition> {
        let mut defs = builtin_definitions();
        defs.extend(self.mcp.tool_definitions());
        defs
    }

    async fn dispatch(&self, invocation: &ToolInvocation) -> DispatchOutcome {
        tracing::debug!(
            tool = %invocation.name,
            call_id = %invocation.call_id,
            "dispatching tool"
        );
        match invocation.name.as_str() {
            "shell" => self.dispatch_shell(invocation).await,
            "AddTodo" => self.dispatch_add_todo(invocation),
            "UpdateTodo" => self.dispatch_update_todo(invocation),
            "ShowTodos" => self.dispatch_show_todos(invocation),
            name if self.mcp.has_tool(name) => self.dispatch_mcp(invocation).await,
            name => error_result(invocation, format!("Unknown tool: {name}")),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Catalog
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn builtin_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "shell".into(),
            description: "Run a command given as an argv array. A first element of \
                          'apply_patch' applies a textual patch; 'read_chunk' reads a \
                          line window from a file."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Argv vector; first element is the program"
                    },
                    "workdir": { "type": "string", "description": "Working directory" },
                    "timeout": { "type": "number", "description": "Hard timeout in seconds" }
                },
                "required": ["command"]
            }),
        },
        ToolDefinition {
            name: "AddTodo".into(),
            description: "Add a todo item for the current session.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "task_description": { "type": "string", "description": "Short task description" }
                },
                "required": ["task_description"]
            }),
        },
        ToolDefinition {
            name: "UpdateTodo".into(),
            description: "Change a todo's status (PENDING, IN_PROGRESS, COMPLETED, CANCELLED).".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "todo_id": { "type": "string", "description": "Todo id (e.g. 'todo-1')" },
                    "new_status": { "type": "string", "description": "New status" }
                },
                "required": ["todo_id", "new_status"]
            }),
        },
        ToolDefinition {
            name: "ShowTodos".into(),
            description: "List the session's todos.".into(),
            parameters: serde_json::json!({ "type": "object", "properties": {} }),
        },
    ]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_command(args: &Value) -> Result<Vec<String>, String> {
    let Some(raw) = args.get("command") else {
        return Err("Error: 'command' must be an array of strings".into());
    };
    let Some(array) = raw.as_array() else {
        return Err("Error: 'command' must be an array of strings".into());
    };
    let mut command = Vec::with_capacity(array.len());
    for element in array {
        match element.as_str() {
            Some(s) => command.push(s.to_string()),
            None => return Err("Error: 'command' must be an array of strings".into()),
        }
    }
    if command.is_empty() {
        return Err("Error: 'command' must not be empty".into());
    }
    Ok(command)
}

fn parse_read_chunk_args(command: &[String]) -> Result<(String, usize, usize), String> {
    if command.len() != 4 {
        return Err(
            "Error: read_chunk expects [\"read_chunk\", file_name, start_line, end_line]".into(),
        );
    }
    let start = command[2]
        .parse::<usize>()
        .map_err(|_| "Error: 'start_line' must be a number".to_string())?;
    let end = command[3]
        .parse::<usize>()
        .map_err(|_| "Error: 'end_line' must be a number".to_string())?;
    Ok((command[1].clone(), start, end))
}

fn error_result(invocation: &ToolInvocation, message: String) -> DispatchOutcome {
    DispatchOutcome::done(ConversationItem::tool_result(
        &invocation.call_id,
        message,
        true,
    ))
}

/// Failed execution rendered in the shell output contract.
fn tool_error_output(invocation: &ToolInvocation, diagnostic: &str) -> ConversationItem {
    let outcome = shell::ShellOutcome {
        output: diagnostic.to_string(),
        exit_code: 1,
        duration_seconds: 0.0,
        timed_out: false,
    };
    ConversationItem::tool_result(&invocation.call_id, outcome.to_tool_output(), true)
}
