//! JSON-RPC 2.0 dispatch shared by the stdio and HTTP transports.
//!
//! One [`dispatch_request`] call handles exactly one request object;
//! notifications (no `id`) return `None` so the transport can drop them
//! (stdio: no reply line; HTTP: omitted from a batch array, or a bare `204`
//! for a lone notification). Every branch is wrapped by `std::panic::catch_unwind`
//! at the call site in `main.rs`/`http.rs` so a handler panic still reaches
//! the client as `-32000` rather than killing the process.

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::sync::Notify;
use tracing::warn;

use crate::orchestrator::{Orchestrator, OrchestratorError};
use crate::watch::WatcherHandle;
use crate::weights::WeightManager;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

const ERR_METHOD_NOT_FOUND: i64 = -32601;
const ERR_INTERNAL: i64 = -32000;
const ERR_ROOT_NOT_ALLOWED: i64 = -32001;
const ERR_POLICY_DENIED: i64 = -32002;
const ERR_READ_FAILURE: i64 = -32003;

/// Tools fully implemented against the Orchestrator/Graph Store/Weight
/// Manager. `roots-list` mirrors the `roots/list` resource method but is
/// additionally exposed as a tool.
const IMPLEMENTED_TOOLS: &[&str] = &[
    "search_code",
    "get_file",
    "list_symbols",
    "find_refs",
    "summarize_architecture",
    "submit_feedback",
    "get_weights",
    "roots-list",
    "plan_refactor",
    "gen_patch",
    "apply_patch",
    "analyze_performance",
    "compare_versions",
    "detect_smells",
    "suggest_tests",
];

/// Registered so clients see a stable tool surface, but their collaborators
/// (shell execution, telemetry rendering, doc generation, LangChain) are out
/// of scope per the system's own non-goals; calling one answers with a
/// literal not-implemented result, not `-32601`.
const STUB_TOOLS: &[&str] = &["auto_docs", "run_tests", "run_task", "generate_telemetry_panel", "open_telemetry_webview", "langchain_query"];

const PROMPT_NAMES: &[&str] = &["refactor", "test", "perf"];

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub weights: Arc<WeightManager>,
    pub server_name: String,
    pub server_version: String,
    pub shutdown: ShutdownHandle,
}

/// Lets the `shutdown` RPC method reach into the watcher pipeline: closing
/// the watcher (stopping new fs events and flushing whatever debounced
/// change it's still sitting on) and waking `main`'s top-level select loop
/// so the process exits cleanly.
pub struct ShutdownHandle {
    pub notify: Arc<Notify>,
    pub watcher: Arc<Mutex<Option<WatcherHandle>>>,
}

impl ShutdownHandle {
    /// No watcher wired up — for callers (tests, `get_file`-only tooling)
    /// that only exercise the RPC surface, not the watch pipeline.
    pub fn inert() -> Self {
        ShutdownHandle { notify: Arc::new(Notify::new()), watcher: Arc::new(Mutex::new(None)) }
    }
}

fn error_response(id: Value, code: i64, message: impl Into<String>, data: Option<Value>) -> Value {
    let mut err = json!({ "code": code, "message": message.into() });
    if let Some(data) = data {
        err["data"] = data;
    }
    json!({ "jsonrpc": "2.0", "id": id, "error": err })
}

fn ok_response(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn orchestrator_error_to_response(id: Value, err: OrchestratorError) -> Value {
    match err {
        OrchestratorError::RootNotAllowed(msg) => error_response(id, ERR_ROOT_NOT_ALLOWED, "root not allowed", Some(json!(msg))),
        OrchestratorError::PolicyDenied(msg) => error_response(id, ERR_POLICY_DENIED, "path denied by policy", Some(json!(msg))),
        OrchestratorError::ReadFailure(msg) => error_response(id, ERR_READ_FAILURE, "read failure", Some(json!(msg))),
        OrchestratorError::Internal(msg) => error_response(id, ERR_INTERNAL, "internal error", Some(json!(msg))),
    }
}

/// Dispatch one JSON-RPC request object. Returns `None` for notifications.
pub async fn dispatch_request(state: &AppState, msg: &Value) -> Option<Value> {
    let method = msg.get("method").and_then(Value::as_str).unwrap_or("").to_string();
    let id = msg.get("id").cloned();

    if id.is_none() || method == "initialized" || method == "sessionConfigured" || method.starts_with("notifications/") {
        return None;
    }
    let id = id.unwrap();

    let response = match method.as_str() {
        "initialize" => handle_initialize(state, id),
        "ping" => ok_response(id, json!({})),
        "shutdown" => handle_shutdown(state, id),
        "tools/list" => ok_response(id, json!({ "tools": tool_definitions() })),
        "tools/call" => handle_tools_call(state, id, msg).await,
        "resources/list" => handle_resources_list(state, id),
        "resources/read" => handle_resources_read(state, id, msg),
        "roots/list" => ok_response(id, json!({ "roots": roots_payload(state) })),
        "prompts/list" => ok_response(id, json!({ "prompts": prompts_list() })),
        "prompts/call" => handle_prompts_call(state, id, msg),
        _ => error_response(id, ERR_METHOD_NOT_FOUND, "method not found", None),
    };

    Some(response)
}

/// Closes the watcher (stopping new fs events and flushing any pending
/// debounced job, best-effort) and wakes `main`'s select loop so the process
/// exits. The semantic engine has no child process to stop: it's either an
/// external HTTP collaborator this process never spawned, or the in-process
/// fallback, which needs no teardown.
fn handle_shutdown(state: &AppState, id: Value) -> Value {
    if let Ok(mut guard) = state.shutdown.watcher.lock() {
        if let Some(handle) = guard.take() {
            handle.close();
        }
    }
    state.shutdown.notify.notify_one();
    ok_response(id, json!({}))
}

fn handle_initialize(state: &AppState, id: Value) -> Value {
    ok_response(
        id,
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": { "listChanged": false },
                "resources": { "listChanged": false },
                "prompts": { "listChanged": false }
            },
            "serverInfo": {
                "name": state.server_name,
                "version": state.server_version
            }
        }),
    )
}

fn tool_definitions() -> Value {
    let mut tools = Vec::new();
    tools.push(json!({
        "name": "search_code",
        "description": "Hybrid semantic/lexical/graph search over the indexed codebase",
        "inputSchema": { "type": "object", "properties": { "query": {"type": "string"}, "topK": {"type": "integer"} }, "required": ["query"] }
    }));
    tools.push(json!({
        "name": "get_file",
        "description": "Read a file's preview, local symbols, imports, and dependents",
        "inputSchema": { "type": "object", "properties": { "path": {"type": "string"} }, "required": ["path"] }
    }));
    tools.push(json!({
        "name": "list_symbols",
        "description": "List symbols, optionally scoped to one file",
        "inputSchema": { "type": "object", "properties": { "file": {"type": "string"} } }
    }));
    tools.push(json!({
        "name": "find_refs",
        "description": "Find files referencing a symbol name (substring match)",
        "inputSchema": { "type": "object", "properties": { "symbol": {"type": "string"} }, "required": ["symbol"] }
    }));
    tools.push(json!({
        "name": "summarize_architecture",
        "description": "File/symbol/edge counts for the indexed tree",
        "inputSchema": { "type": "object", "properties": {} }
    }));
    tools.push(json!({
        "name": "submit_feedback",
        "description": "Nudge ranking weights towards or away from the semantic signal",
        "inputSchema": { "type": "object", "properties": { "up": {"type": "boolean"} }, "required": ["up"] }
    }));
    tools.push(json!({
        "name": "get_weights",
        "description": "Current ranking weights",
        "inputSchema": { "type": "object", "properties": {} }
    }));
    tools.push(json!({
        "name": "roots-list",
        "description": "Allowed filesystem roots",
        "inputSchema": { "type": "object", "properties": {} }
    }));
    tools.push(json!({
        "name": "plan_refactor",
        "description": "Produce a refactor plan from a file's symbols, imports, and dependents",
        "inputSchema": { "type": "object", "properties": { "path": {"type": "string"} }, "required": ["path"] }
    }));
    tools.push(json!({
        "name": "gen_patch",
        "description": "Preview a literal find/replace patch without writing it",
        "inputSchema": {
            "type": "object",
            "properties": { "path": {"type": "string"}, "find": {"type": "string"}, "replace": {"type": "string"} },
            "required": ["path", "find", "replace"]
        }
    }));
    tools.push(json!({
        "name": "apply_patch",
        "description": "Apply a literal find/replace patch to a file",
        "inputSchema": {
            "type": "object",
            "properties": { "path": {"type": "string"}, "find": {"type": "string"}, "replace": {"type": "string"} },
            "required": ["path", "find", "replace"]
        }
    }));
    tools.push(json!({
        "name": "analyze_performance",
        "description": "Static heuristics for long functions and potential nested-loop hotspots",
        "inputSchema": { "type": "object", "properties": { "path": {"type": "string"} }, "required": ["path"] }
    }));
    tools.push(json!({
        "name": "compare_versions",
        "description": "Line-level diff between two indexed or on-disk files",
        "inputSchema": {
            "type": "object",
            "properties": { "pathA": {"type": "string"}, "pathB": {"type": "string"} },
            "required": ["pathA", "pathB"]
        }
    }));
    tools.push(json!({
        "name": "detect_smells",
        "description": "Heuristic smells: long functions, duplicate symbol names, outstanding TODOs",
        "inputSchema": { "type": "object", "properties": { "path": {"type": "string"} }, "required": ["path"] }
    }));
    tools.push(json!({
        "name": "suggest_tests",
        "description": "Per-symbol test coverage suggestions for a file",
        "inputSchema": { "type": "object", "properties": { "path": {"type": "string"} }, "required": ["path"] }
    }));
    for name in STUB_TOOLS {
        tools.push(json!({
            "name": name,
            "description": format!("{name} (collaborator out of scope; registered for a stable tool surface)"),
            "inputSchema": { "type": "object", "properties": {} }
        }));
    }
    Value::Array(tools)
}

fn tool_result(text: Value, is_error: bool) -> Value {
    json!({ "content": [{ "type": "text", "text": text.to_string() }], "isError": is_error })
}

async fn handle_tools_call(state: &AppState, id: Value, msg: &Value) -> Value {
    let name = msg["params"]["name"].as_str().unwrap_or("");
    let args = msg["params"].get("arguments").cloned().unwrap_or_else(|| json!({}));

    if STUB_TOOLS.contains(&name) {
        return ok_response(id, tool_result(json!({ "status": "not_implemented", "tool": name }), false));
    }
    if !IMPLEMENTED_TOOLS.contains(&name) {
        return error_response(id, ERR_METHOD_NOT_FOUND, format!("unknown tool: {name}"), None);
    }

    match name {
        "search_code" => {
            let query = args["query"].as_str().unwrap_or("");
            let top_k = args["topK"].as_u64().map(|v| v as usize);
            match state.orchestrator.search(query, top_k).await {
                Ok((results, _profile)) => ok_response(id, tool_result(json!(results), false)),
                Err(e) => orchestrator_error_to_response(id, e),
            }
        }
        "get_file" => {
            let path = args["path"].as_str().unwrap_or("");
            match state.orchestrator.get_file(path) {
                Ok(view) => ok_response(
                    id,
                    tool_result(
                        json!({
                            "path": view.path,
                            "preview": view.preview,
                            "truncated": view.truncated,
                            "symbols": view.symbols,
                            "imports": view.imports,
                            "dependents": view.dependents
                        }),
                        false,
                    ),
                ),
                Err(e) => orchestrator_error_to_response(id, e),
            }
        }
        "list_symbols" => {
            let file = args["file"].as_str();
            match state.orchestrator.list_symbols(file) {
                Ok(symbols) => ok_response(id, tool_result(json!(symbols), false)),
                Err(e) => orchestrator_error_to_response(id, e),
            }
        }
        "find_refs" => {
            let symbol = args["symbol"].as_str().unwrap_or("");
            match state.orchestrator.find_refs(symbol) {
                Ok(files) => ok_response(id, tool_result(json!(files), false)),
                Err(e) => orchestrator_error_to_response(id, e),
            }
        }
        "summarize_architecture" => match state.orchestrator.architecture_summary() {
            Ok((files, symbols, edges)) => {
                ok_response(id, tool_result(json!({ "files": files, "symbols": symbols, "edges": edges }), false))
            }
            Err(e) => orchestrator_error_to_response(id, e),
        },
        "submit_feedback" => {
            let up = args["up"].as_bool().unwrap_or(true);
            let weights = state.weights.feedback(up);
            ok_response(id, tool_result(json!(weights), false))
        }
        "get_weights" => ok_response(id, tool_result(json!(state.weights.current()), false)),
        "roots-list" => ok_response(id, tool_result(json!(roots_payload(state)), false)),
        "plan_refactor" => {
            let path = args["path"].as_str().unwrap_or("");
            match state.orchestrator.plan_refactor(path) {
                Ok(plan) => ok_response(
                    id,
                    tool_result(
                        json!({ "path": plan.path, "symbols": plan.symbols, "imports": plan.imports, "dependents": plan.dependents, "steps": plan.steps }),
                        false,
                    ),
                ),
                Err(e) => orchestrator_error_to_response(id, e),
            }
        }
        "gen_patch" => {
            let path = args["path"].as_str().unwrap_or("");
            let find = args["find"].as_str().unwrap_or("");
            let replace = args["replace"].as_str().unwrap_or("");
            match state.orchestrator.gen_patch(path, find, replace) {
                Ok(p) => ok_response(
                    id,
                    tool_result(json!({ "path": p.path, "occurrences": p.occurrences, "diff": p.diff, "preview": p.preview_excerpt }), false),
                ),
                Err(e) => orchestrator_error_to_response(id, e),
            }
        }
        "apply_patch" => {
            let path = args["path"].as_str().unwrap_or("");
            let find = args["find"].as_str().unwrap_or("");
            let replace = args["replace"].as_str().unwrap_or("");
            match state.orchestrator.apply_patch(path, find, replace) {
                Ok(p) => ok_response(
                    id,
                    tool_result(json!({ "path": p.path, "occurrences": p.occurrences, "applied": p.applied, "preview": p.preview_excerpt }), false),
                ),
                Err(e) => orchestrator_error_to_response(id, e),
            }
        }
        "analyze_performance" => {
            let path = args["path"].as_str().unwrap_or("");
            match state.orchestrator.analyze_performance(path) {
                Ok(r) => ok_response(
                    id,
                    tool_result(json!({ "path": r.path, "nestedLoops": r.nested_loops, "longSymbols": r.long_symbols, "notes": r.notes }), false),
                ),
                Err(e) => orchestrator_error_to_response(id, e),
            }
        }
        "compare_versions" => {
            let path_a = args["pathA"].as_str().unwrap_or("");
            let path_b = args["pathB"].as_str().unwrap_or("");
            match state.orchestrator.compare_versions(path_a, path_b) {
                Ok(d) => ok_response(
                    id,
                    tool_result(
                        json!({ "pathA": d.path_a, "pathB": d.path_b, "addedCount": d.added_count, "removedCount": d.removed_count, "added": d.added, "removed": d.removed }),
                        false,
                    ),
                ),
                Err(e) => orchestrator_error_to_response(id, e),
            }
        }
        "detect_smells" => {
            let path = args["path"].as_str().unwrap_or("");
            match state.orchestrator.detect_smells(path) {
                Ok(r) => ok_response(id, tool_result(json!({ "path": r.path, "smells": r.smells }), false)),
                Err(e) => orchestrator_error_to_response(id, e),
            }
        }
        "suggest_tests" => {
            let path = args["path"].as_str().unwrap_or("");
            match state.orchestrator.suggest_tests(path) {
                Ok(suggestions) => ok_response(
                    id,
                    tool_result(
                        json!(suggestions.into_iter().map(|s| json!({ "symbol": s.symbol, "suggestion": s.suggestion })).collect::<Vec<_>>()),
                        false,
                    ),
                ),
                Err(e) => orchestrator_error_to_response(id, e),
            }
        }
        _ => error_response(id, ERR_METHOD_NOT_FOUND, format!("unknown tool: {name}"), None),
    }
}

fn roots_payload(state: &AppState) -> Vec<String> {
    state.orchestrator.roots().into_iter().map(|p| p.display().to_string()).collect()
}

fn handle_resources_list(state: &AppState, id: Value) -> Value {
    let resources: Vec<Value> = state
        .orchestrator
        .list_files()
        .into_iter()
        .map(|path| json!({ "uri": format!("file://{path}"), "name": path }))
        .collect();
    ok_response(id, json!({ "resources": resources }))
}

fn handle_resources_read(state: &AppState, id: Value, msg: &Value) -> Value {
    let uri = msg["params"]["uri"].as_str().unwrap_or("");
    let path = uri.strip_prefix("file://").unwrap_or(uri);
    match state.orchestrator.read_resource(path) {
        Ok(content) => ok_response(id, json!({ "contents": [{ "uri": uri, "text": content }] })),
        Err(e) => orchestrator_error_to_response(id, e),
    }
}

fn prompts_list() -> Value {
    json!(PROMPT_NAMES
        .iter()
        .map(|name| json!({
            "name": name,
            "description": format!("Context-enriched {name} prompt for a target file"),
            "arguments": [
                { "name": "path", "description": "Target file, relative to the index root", "required": true }
            ]
        }))
        .collect::<Vec<_>>())
}

fn handle_prompts_call(state: &AppState, id: Value, msg: &Value) -> Value {
    let name = msg["params"]["name"].as_str().unwrap_or("");
    if !PROMPT_NAMES.contains(&name) {
        return error_response(id, ERR_METHOD_NOT_FOUND, format!("unknown prompt: {name}"), None);
    }
    let args = msg["params"].get("arguments").cloned().unwrap_or_else(|| json!({}));
    let path = args["path"].as_str().unwrap_or("");

    let view = match state.orchestrator.get_file(path) {
        Ok(v) => v,
        Err(e) => return orchestrator_error_to_response(id, e),
    };
    let refs = state.orchestrator.find_refs(&view.path).unwrap_or_default();

    let intro = match name {
        "refactor" => "Refactor the following file, preserving its external behavior.",
        "test" => "Write tests covering the following file's public behavior.",
        "perf" => "Identify performance bottlenecks in the following file.",
        _ => unreachable!("checked above"),
    };

    let text = format!(
        "{intro}\n\nFile: {}\n\nPreview:\n{}\n\nLocal symbols: {}\n\nImports: {}\n\nDependents: {}\n\nReferences: {}",
        view.path,
        view.preview,
        view.symbols.iter().map(|s| s.name.clone()).collect::<Vec<_>>().join(", "),
        view.imports.join(", "),
        view.dependents.join(", "),
        refs.join(", "),
    );

    ok_response(
        id,
        json!({
            "description": format!("{name} context for {}", view.path),
            "messages": [{ "role": "user", "content": { "type": "text", "text": text } }]
        }),
    )
}
