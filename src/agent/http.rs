//! Plain-text HTTP command endpoints
//!
//! Every command is a single GET path segment, `<verb>` or
//! `<verb>=<argument>`, answered with a plain-text body. Failures are
//! reported in-band (`ERROR`) with status 200, which is what the
//! client side parses; only unknown verbs get a 404.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use super::AgentState;

/// Router serving the command protocol.
pub fn router(state: Arc<AgentState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/{command}", get(dispatch))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn index() -> String {
    format!("deploy-runner agent v{}", env!("CARGO_PKG_VERSION"))
}

async fn dispatch(
    State(state): State<Arc<AgentState>>,
    Path(command): Path<String>,
) -> (StatusCode, String) {
    if let Some(name) = command.strip_prefix("request=") {
        return ok(request(&state, name));
    }
    if let Some(rest) = command.strip_prefix("run=") {
        return ok(run(&state, rest).await);
    }
    if let Some(slot) = command.strip_prefix("delete=") {
        return ok(delete(&state, slot));
    }
    if let Some(slot) = command.strip_prefix("builddesc=") {
        return ok(describe(&state, slot));
    }

    match command.as_str() {
        "list" => ok(list(&state)),
        "info" => ok(info(&state)),
        "runinfo" => ok(runinfo(&state).await),
        "kill" => ok(kill(&state).await),
        _ => (StatusCode::NOT_FOUND, String::new()),
    }
}

fn ok(body: String) -> (StatusCode, String) {
    (StatusCode::OK, body)
}

/// `request=<name>`: mint and reserve a fresh slot.
fn request(state: &AgentState, name: &str) -> String {
    match state.store.reserve(name) {
        Ok(slot) => slot,
        Err(e) => {
            tracing::warn!(name, error = %e, "slot reservation failed");
            "ERROR".to_string()
        }
    }
}

/// `run=<slot>` or `run=<slot>&args=<base64>`: spawn the slot's run
/// target as the tracked child.
async fn run(state: &AgentState, rest: &str) -> String {
    let (slot, args) = match split_run_args(rest) {
        Ok(parts) => parts,
        Err(reason) => {
            tracing::warn!(rest, reason, "bad run arguments");
            return "ERROR".to_string();
        }
    };

    let (dir, executable) = match state.store.run_target(slot) {
        Ok(target) => target,
        Err(e) => {
            tracing::warn!(slot, error = %e, "run target unavailable");
            return "ERROR".to_string();
        }
    };

    match state.supervisor.spawn(&dir, &executable, &args).await {
        Ok(_) => "OK!".to_string(),
        Err(e) => {
            tracing::warn!(slot, error = %e, "spawn failed");
            "ERROR".to_string()
        }
    }
}

/// Split the `run=` payload into slot id and decoded argument list.
fn split_run_args(rest: &str) -> Result<(&str, Vec<String>), &'static str> {
    use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};

    let Some((slot, encoded)) = rest.split_once("&args=") else {
        return Ok((rest, Vec::new()));
    };
    let decoded = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|_| "arguments are not valid base64")?;
    let text = String::from_utf8(decoded).map_err(|_| "arguments are not valid utf-8")?;
    let args = text.split_whitespace().map(ToString::to_string).collect();
    Ok((slot, args))
}

/// `delete=<slot>`: remove the slot tree.
fn delete(state: &AgentState, slot: &str) -> String {
    match state.store.delete(slot) {
        Ok(()) => "OK".to_string(),
        Err(e) => {
            tracing::warn!(slot, error = %e, "delete failed");
            "ERROR".to_string()
        }
    }
}

/// `builddesc=<slot>`: first line of the `.desc` marker, empty when the
/// slot has none (or does not exist).
fn describe(state: &AgentState, slot: &str) -> String {
    match state.store.description(slot) {
        Ok(Some(description)) => description,
        Ok(None) => String::new(),
        Err(e) => {
            tracing::debug!(slot, error = %e, "description unavailable");
            String::new()
        }
    }
}

/// `list`: newline-terminated slot ids.
fn list(state: &AgentState) -> String {
    match state.store.list() {
        Ok(slots) => slots.into_iter().fold(String::new(), |mut out, slot| {
            out.push_str(&slot);
            out.push('\n');
            out
        }),
        Err(e) => {
            tracing::warn!(error = %e, "list failed");
            String::new()
        }
    }
}

/// `info`: host name, bind address (reserved field), OS — 3 lines.
fn info(state: &AgentState) -> String {
    format!(
        "{}\n{}\n{}",
        state.host_name,
        state.bind_address,
        std::env::consts::OS
    )
}

/// `runinfo`: executable and pid of the tracked child, or the idle
/// sentinel.
async fn runinfo(state: &AgentState) -> String {
    match state.supervisor.status().await {
        Some((executable, pid)) => format!("{executable}\n{pid}"),
        None => "No running process".to_string(),
    }
}

/// `kill`: terminate the tracked child; idempotent when idle.
async fn kill(state: &AgentState) -> String {
    match state.supervisor.kill().await {
        Some((executable, pid)) => format!("Killed process: {executable} (PID:{pid})"),
        None => "No running process".to_string(),
    }
}
