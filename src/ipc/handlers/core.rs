use crate::config::{
    CATALOG_SETTING_KEY, DEFAULT_RATE_SETTING_KEY, DEFAULT_SUBJECT_CATALOG, UPI_ID_SETTING_KEY,
};
use crate::db;
use crate::ipc::error::{err, ok, respond, HandlerErr};
use crate::ipc::helpers::{conn, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::info;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

/// Opens (creating if needed) the workspace database and makes it current.
pub fn select_workspace(state: &mut AppState, path: &Path) -> anyhow::Result<()> {
    // Close the previous connection before opening the next one.
    state.db = None;
    let conn = db::open_db(path)?;
    state.workspace = Some(path.to_path_buf());
    state.db = Some(conn);
    info!(workspace = %path.to_string_lossy(), "workspace opened");
    Ok(())
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match select_workspace(state, &path) {
        Ok(()) => ok(&req.id, json!({ "workspacePath": path.to_string_lossy() })),
        Err(e) => HandlerErr::storage("db_open_failed", e).response(&req.id),
    }
}

fn handle_settings_get(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = conn(state)?;
    let key = required_str(req, "key")?;
    let value = db::settings_get_json(conn, &key)
        .map_err(|e| HandlerErr::storage("db_query_failed", e))?;
    Ok(json!({ "key": key, "value": value }))
}

fn handle_settings_set(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = conn(state)?;
    let key = required_str(req, "key")?;
    let Some(value) = req.params.get("value") else {
        return Err(HandlerErr::new("bad_params", "missing value"));
    };
    let expected = match key.as_str() {
        CATALOG_SETTING_KEY => {
            let valid = value
                .as_array()
                .map(|a| a.iter().all(|v| v.is_string()))
                .unwrap_or(false);
            (!valid).then_some("an array of strings")
        }
        DEFAULT_RATE_SETTING_KEY => {
            let valid = value
                .as_u64()
                .map(|n| n > 0 && n <= u32::MAX as u64)
                .unwrap_or(false);
            (!valid).then_some("a positive integer")
        }
        UPI_ID_SETTING_KEY => {
            let valid = value.as_str().map(|s| s.contains('@')).unwrap_or(false);
            (!valid).then_some("a UPI id like name@bank")
        }
        _ => None,
    };
    if let Some(expected) = expected {
        return Err(HandlerErr::new("bad_params", format!("{key} must be {expected}")));
    }
    db::settings_set_json(conn, &key, value)
        .map_err(|e| HandlerErr::storage("db_update_failed", e))?;
    Ok(json!({ "ok": true }))
}

fn handle_subjects_catalog(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let conn = conn(state)?;
    let stored = db::settings_get_json(conn, CATALOG_SETTING_KEY)
        .map_err(|e| HandlerErr::storage("db_query_failed", e))?;
    let subjects: Vec<String> = match stored.as_ref().and_then(|v| v.as_array()) {
        Some(arr) => arr
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.to_string())
            .collect(),
        None => DEFAULT_SUBJECT_CATALOG.iter().map(|s| s.to_string()).collect(),
    };
    Ok(json!({ "subjects": subjects }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "settings.get" => Some(respond(&req.id, handle_settings_get(state, req))),
        "settings.set" => Some(respond(&req.id, handle_settings_set(state, req))),
        "subjects.catalog" => Some(respond(&req.id, handle_subjects_catalog(state))),
        _ => None,
    }
}
