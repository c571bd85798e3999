use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::conn;
use crate::ipc::types::{AppState, Request};
use crate::roster::RosterStats;
use crate::store;
use serde_json::json;

fn handle_dashboard_stats(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let conn = conn(state)?;
    let registry = store::load_registry(conn)
        .map_err(|e| HandlerErr::storage("db_query_failed", e))?;
    let roster = store::load_roster(conn).map_err(|e| HandlerErr::storage("db_query_failed", e))?;
    Ok(json!(RosterStats::compute(&roster, &registry)))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.stats" => Some(respond(&req.id, handle_dashboard_stats(state))),
        _ => None,
    }
}
