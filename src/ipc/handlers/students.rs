use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{conn, optional_str, required_str, student_json, string_list};
use crate::ipc::types::{AppState, Request};
use crate::model::Student;
use crate::store;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

fn handle_students_list(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = conn(state)?;
    let roster = store::load_roster(conn).map_err(|e| HandlerErr::storage("db_query_failed", e))?;
    let search = optional_str(req, "search").unwrap_or_default();
    let students: Vec<serde_json::Value> = roster
        .search(&search)
        .into_iter()
        .map(student_json)
        .collect();
    Ok(json!({ "students": students }))
}

fn handle_students_get(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = conn(state)?;
    let student_id = required_str(req, "studentId")?;
    let student = store::load_student(conn, &student_id)
        .map_err(|e| HandlerErr::storage("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::new("not_found", "student not found"))?;
    Ok(json!({ "student": student_json(&student) }))
}

fn handle_students_create(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = conn(state)?;
    let name = required_str(req, "name")?;
    let email = required_str(req, "email")?;
    let subjects = string_list(req, "subjects")?;

    let student_id = Uuid::new_v4().to_string();
    let mut student = Student::new(student_id.clone(), name, subjects)
        .map_err(|e| HandlerErr::new("bad_params", e.to_string()))?;
    student.email = email;
    student.grade = optional_str(req, "grade");
    student.phone = optional_str(req, "phone");

    store::insert_student(conn, &student).map_err(|e| {
        HandlerErr::storage("db_insert_failed", e).with_details(json!({ "table": "students" }))
    })?;
    info!(student_id = %student_id, "student created");
    Ok(json!({ "studentId": student_id, "student": student_json(&student) }))
}

fn handle_students_delete(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = conn(state)?;
    let student_id = required_str(req, "studentId")?;
    let deleted = store::delete_student(conn, &student_id).map_err(|e| {
        HandlerErr::storage("db_delete_failed", e).with_details(json!({ "table": "students" }))
    })?;
    if !deleted {
        return Err(HandlerErr::new("not_found", "student not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "students.list" => handle_students_list(state, req),
        "students.get" => handle_students_get(state, req),
        "students.create" => handle_students_create(state, req),
        "students.delete" => handle_students_delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, res))
}
