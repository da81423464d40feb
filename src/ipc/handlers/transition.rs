use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, db_conn_mut};
use crate::ipc::types::{AppState, Request};
use crate::transition::{self, orchestrator, RunMode};
use serde_json::json;

fn handle_transition_run(state: &mut AppState, req: &Request, mode: RunMode) -> serde_json::Value {
    let conn = match db_conn_mut(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match transition::run(conn, mode) {
        Ok(summary) => match serde_json::to_value(&summary) {
            Ok(v) => ok(&req.id, v),
            Err(e) => err(&req.id, "internal", e.to_string(), None),
        },
        Err(e) => {
            tracing::warn!(method = %req.method, code = e.code(), error = %e, "transition failed");
            err(&req.id, e.code(), e.to_string(), None)
        }
    }
}

fn handle_transition_history(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match orchestrator::run_history(conn) {
        Ok(runs) => ok(&req.id, json!({ "runs": runs })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "transition.run" => Some(handle_transition_run(state, req, RunMode::Commit)),
        "transition.preview" => Some(handle_transition_run(state, req, RunMode::Preview)),
        "transition.history" => Some(handle_transition_history(state, req)),
        _ => None,
    }
}
