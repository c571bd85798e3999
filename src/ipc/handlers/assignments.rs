use crate::engine::{self, AssignmentError};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{conn, nullable_str, required_str, student_json, string_list};
use crate::ipc::types::{AppState, Request};
use crate::model::{subject_set, Student, SubjectName};
use crate::store;
use rusqlite::Connection;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{info, warn};

fn load_student(conn: &Connection, student_id: &str) -> Result<Student, HandlerErr> {
    store::load_student(conn, student_id)
        .map_err(|e| HandlerErr::storage("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::new("not_found", "student not found"))
}

fn rejected(student_id: &str, errors: Vec<AssignmentError>) -> HandlerErr {
    warn!(
        student_id,
        count = errors.len(),
        codes = ?errors.iter().map(|e| e.code()).collect::<Vec<_>>(),
        "assignment proposal rejected"
    );
    let message = errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n");
    HandlerErr::new("assignment_rejected", message).with_details(json!({ "errors": errors }))
}

fn persist(conn: &Connection, student: &Student) -> Result<(), HandlerErr> {
    store::save_assignments(conn, student).map_err(|e| {
        HandlerErr::storage("db_update_failed", e)
            .with_details(json!({ "table": "student_assignments" }))
    })
}

fn handle_assignments_set(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = conn(state)?;
    let student_id = required_str(req, "studentId")?;
    let subject = required_str(req, "subject")?;
    let tutor_id = nullable_str(req, "tutorId")?;

    let student = load_student(conn, &student_id)?;
    let registry = store::load_registry(conn)
        .map_err(|e| HandlerErr::storage("db_query_failed", e))?;

    let next = engine::propose_assignment(&student, &subject, tutor_id.as_deref(), &registry)
        .map_err(|e| rejected(&student_id, vec![e]))?;
    persist(conn, &next)?;
    info!(
        student_id = %student_id,
        subject = %subject,
        status = next.status().as_str(),
        "assignment saved"
    );
    Ok(json!({ "student": student_json(&next) }))
}

fn parse_bulk_map(req: &Request) -> Result<BTreeMap<SubjectName, Option<String>>, HandlerErr> {
    let Some(obj) = req.params.get("assignments").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::new(
            "bad_params",
            "assignments must be an object of subject -> tutorId|null",
        ));
    };
    let mut out = BTreeMap::new();
    for (subject, v) in obj {
        let tutor_id = match v {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) if s.trim().is_empty() => None,
            serde_json::Value::String(s) => Some(s.trim().to_string()),
            _ => {
                return Err(HandlerErr::new(
                    "bad_params",
                    format!("assignments.{subject} must be a tutorId string or null"),
                ))
            }
        };
        out.insert(subject.trim().to_string(), tutor_id);
    }
    Ok(out)
}

fn handle_assignments_bulk_set(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = conn(state)?;
    let student_id = required_str(req, "studentId")?;
    let proposal = parse_bulk_map(req)?;

    let student = load_student(conn, &student_id)?;
    let registry = store::load_registry(conn)
        .map_err(|e| HandlerErr::storage("db_query_failed", e))?;

    let next = engine::propose_bulk_assignment(&student, &proposal, &registry)
        .map_err(|errors| rejected(&student_id, errors))?;
    persist(conn, &next)?;
    info!(student_id = %student_id, status = next.status().as_str(), "assignments replaced");
    Ok(json!({ "student": student_json(&next) }))
}

fn handle_assignments_preview_tutor_subjects(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = conn(state)?;
    let tutor_id = required_str(req, "tutorId")?;
    let new_subjects = subject_set(string_list(req, "subjects")?);
    let roster = store::load_roster(conn).map_err(|e| HandlerErr::storage("db_query_failed", e))?;
    let stale = engine::on_tutor_subjects_changed(
        &tutor_id,
        &new_subjects,
        roster.referencing(&tutor_id),
    );
    Ok(json!({ "tutorId": tutor_id, "staleAssignments": stale }))
}

fn handle_assignments_audit(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let conn = conn(state)?;
    let registry = store::load_registry(conn)
        .map_err(|e| HandlerErr::storage("db_query_failed", e))?;
    let roster = store::load_roster(conn).map_err(|e| HandlerErr::storage("db_query_failed", e))?;
    let findings = engine::audit(&roster, &registry);
    if !findings.is_empty() {
        warn!(count = findings.len(), "stale assignments present");
    }
    Ok(json!({ "findings": findings }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "assignments.set" => handle_assignments_set(state, req),
        "assignments.bulkSet" => handle_assignments_bulk_set(state, req),
        "assignments.previewTutorSubjects" => handle_assignments_preview_tutor_subjects(state, req),
        "assignments.audit" => handle_assignments_audit(state),
        _ => return None,
    };
    Some(respond(&req.id, res))
}
