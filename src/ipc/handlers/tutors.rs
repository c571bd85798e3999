use crate::engine;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{
    conn, optional_rate, optional_str, optional_string_list, required_str, tutor_json,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{subject_set, Tutor};
use crate::store;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

fn load_existing(conn: &rusqlite::Connection, tutor_id: &str) -> Result<Tutor, HandlerErr> {
    store::load_tutor(conn, tutor_id)
        .map_err(|e| HandlerErr::storage("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::new("not_found", "tutor not found"))
}

fn handle_tutors_list(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = conn(state)?;
    let registry = store::load_registry(conn)
        .map_err(|e| HandlerErr::storage("db_query_failed", e))?;
    let roster = store::load_roster(conn).map_err(|e| HandlerErr::storage("db_query_failed", e))?;
    let search = optional_str(req, "search").unwrap_or_default();

    let tutors: Vec<serde_json::Value> = registry
        .search(&search)
        .into_iter()
        .map(|t| {
            let assigned_count: usize = roster
                .iter()
                .map(|s| s.assigned().filter(|(_, a)| a.tutor_id == t.id).count())
                .sum();
            let mut v = tutor_json(t);
            v["assignedCount"] = json!(assigned_count);
            v
        })
        .collect();
    Ok(json!({ "tutors": tutors }))
}

fn handle_tutors_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = conn(state)?;
    let tutor_id = required_str(req, "tutorId")?;
    let tutor = load_existing(conn, &tutor_id)?;
    let roster = store::load_roster(conn).map_err(|e| HandlerErr::storage("db_query_failed", e))?;

    let mut students = Vec::new();
    for s in roster.referencing(&tutor_id) {
        for (subject, a) in s.assigned() {
            if a.tutor_id != tutor_id {
                continue;
            }
            students.push(json!({
                "studentId": s.id,
                "studentName": s.name,
                "subject": subject,
                "stale": !tutor.teaches(subject),
            }));
        }
    }

    let mut v = tutor_json(&tutor);
    v["students"] = json!(students);
    Ok(json!({ "tutor": v }))
}

fn handle_tutors_create(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = conn(state)?;
    let name = required_str(req, "name")?;
    let email = required_str(req, "email")?;
    let subjects = optional_string_list(req, "subjects")?.unwrap_or_default();

    let tutor_id = Uuid::new_v4().to_string();
    let mut tutor = Tutor::new(tutor_id.clone(), name, email, subjects)
        .map_err(|e| HandlerErr::new("bad_params", e.to_string()))?;
    tutor.phone = optional_str(req, "phone");
    tutor.qualification = optional_str(req, "qualification");
    tutor.hourly_rate = optional_rate(req, "hourlyRate")?;

    store::insert_tutor(conn, &tutor).map_err(|e| {
        HandlerErr::storage("db_insert_failed", e).with_details(json!({ "table": "tutors" }))
    })?;
    info!(tutor_id = %tutor_id, "tutor created");
    Ok(json!({ "tutorId": tutor_id }))
}

fn handle_tutors_update(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = conn(state)?;
    let tutor_id = required_str(req, "tutorId")?;
    let mut tutor = load_existing(conn, &tutor_id)?;

    if let Some(name) = optional_str(req, "name") {
        tutor.name = name;
    }
    if let Some(email) = optional_str(req, "email") {
        tutor.email = email;
    }
    if req.params.get("phone").is_some() {
        tutor.phone = optional_str(req, "phone");
    }
    if req.params.get("qualification").is_some() {
        tutor.qualification = optional_str(req, "qualification");
    }
    if req.params.get("hourlyRate").is_some() {
        tutor.hourly_rate = optional_rate(req, "hourlyRate")?;
    }

    // Stale assignments are reported, never cleared here.
    let mut stale = Vec::new();
    if let Some(subjects) = optional_string_list(req, "subjects")? {
        let new_subjects = subject_set(subjects);
        let roster = store::load_roster(conn)
            .map_err(|e| HandlerErr::storage("db_query_failed", e))?;
        stale = engine::on_tutor_subjects_changed(
            &tutor_id,
            &new_subjects,
            roster.referencing(&tutor_id),
        );
        tutor.subjects = new_subjects;
    }

    store::update_tutor(conn, &tutor).map_err(|e| {
        HandlerErr::storage("db_update_failed", e).with_details(json!({ "table": "tutors" }))
    })?;

    if !stale.is_empty() {
        warn!(tutor_id = %tutor_id, count = stale.len(), "tutor update left stale assignments");
    }
    Ok(json!({ "tutor": tutor_json(&tutor), "staleAssignments": stale }))
}

fn handle_tutors_delete(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = conn(state)?;
    let tutor_id = required_str(req, "tutorId")?;
    let _ = load_existing(conn, &tutor_id)?;

    let roster = store::load_roster(conn).map_err(|e| HandlerErr::storage("db_query_failed", e))?;
    let references: Vec<serde_json::Value> = roster
        .referencing(&tutor_id)
        .flat_map(|s| {
            s.assigned()
                .filter(|(_, a)| a.tutor_id == tutor_id)
                .map(|(subject, _)| {
                    json!({ "studentId": s.id, "studentName": s.name, "subject": subject })
                })
                .collect::<Vec<_>>()
        })
        .collect();
    if !references.is_empty() {
        return Err(HandlerErr::new(
            "tutor_in_use",
            "tutor still has assigned students; reassign them first",
        )
        .with_details(json!({ "assignments": references })));
    }

    store::delete_tutor(conn, &tutor_id).map_err(|e| {
        HandlerErr::storage("db_delete_failed", e).with_details(json!({ "table": "tutors" }))
    })?;
    Ok(json!({ "ok": true }))
}

fn handle_tutors_for_subject(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = conn(state)?;
    let subject = required_str(req, "subject")?;
    let registry = store::load_registry(conn)
        .map_err(|e| HandlerErr::storage("db_query_failed", e))?;
    let tutors: Vec<serde_json::Value> = registry
        .tutors_for_subject(&subject)
        .map(tutor_json)
        .collect();
    Ok(json!({ "subject": subject, "tutors": tutors }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "tutors.list" => handle_tutors_list(state, req),
        "tutors.get" => handle_tutors_get(state, req),
        "tutors.create" => handle_tutors_create(state, req),
        "tutors.update" => handle_tutors_update(state, req),
        "tutors.delete" => handle_tutors_delete(state, req),
        "tutors.forSubject" => handle_tutors_for_subject(state, req),
        _ => return None,
    };
    Some(respond(&req.id, res))
}

