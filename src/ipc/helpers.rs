use rusqlite::Connection;
use serde_json::json;

use crate::ipc::error::HandlerErr;
use crate::ipc::types::{AppState, Request};
use crate::model::{Student, Tutor};
use crate::sessions::Session;

pub fn conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn required_str(req: &Request, key: &str) -> Result<String, HandlerErr> {
    optional_str(req, key).ok_or_else(|| HandlerErr::new("bad_params", format!("missing {key}")))
}

/// Missing and `null` both mean "none"; any other non-string is rejected.
pub fn nullable_str(req: &Request, key: &str) -> Result<Option<String>, HandlerErr> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => {
            let t = s.trim();
            Ok(if t.is_empty() { None } else { Some(t.to_string()) })
        }
        Some(_) => Err(HandlerErr::new(
            "bad_params",
            format!("{key} must be a string or null"),
        )),
    }
}

/// Missing and `null` both mean "none"; anything else must be a positive
/// integer that fits in `u32`.
pub fn optional_rate(req: &Request, key: &str) -> Result<Option<u32>, HandlerErr> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .filter(|n| *n > 0)
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| {
                HandlerErr::new("bad_params", format!("{key} must be a positive integer"))
            }),
    }
}

pub fn optional_string_list(req: &Request, key: &str) -> Result<Option<Vec<String>>, HandlerErr> {
    let Some(v) = req.params.get(key) else {
        return Ok(None);
    };
    let Some(arr) = v.as_array() else {
        return Err(HandlerErr::new(
            "bad_params",
            format!("{key} must be an array of strings"),
        ));
    };
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        match item.as_str() {
            Some(s) => out.push(s.to_string()),
            None => {
                return Err(HandlerErr::new(
                    "bad_params",
                    format!("{key} must be an array of strings"),
                ))
            }
        }
    }
    Ok(Some(out))
}

pub fn string_list(req: &Request, key: &str) -> Result<Vec<String>, HandlerErr> {
    optional_string_list(req, key)?
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {key}")))
}

pub fn student_json(s: &Student) -> serde_json::Value {
    let mut v = serde_json::to_value(s).unwrap_or_else(|_| json!({ "id": s.id }));
    v["status"] = json!(s.status().as_str());
    v
}

pub fn tutor_json(t: &Tutor) -> serde_json::Value {
    serde_json::to_value(t).unwrap_or_else(|_| json!({ "id": t.id }))
}

pub fn session_json(s: &Session) -> serde_json::Value {
    let mut v = serde_json::to_value(s).unwrap_or_else(|_| json!({ "id": s.id }));
    v["durationMinutes"] = json!(s.duration_minutes());
    v["durationLabel"] = json!(s.duration_label());
    v["amount"] = json!(s.amount());
    v["tutorAmount"] = json!(s.tutor_amount());
    v
}
