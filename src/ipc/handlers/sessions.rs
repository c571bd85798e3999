use crate::config::DEFAULT_RATE_SETTING_KEY;
use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{conn, optional_rate, optional_str, required_str, session_json};
use crate::ipc::types::{AppState, Request};
use crate::sessions::{
    parse_timestamp, Month, Payment, PaymentKind, PaymentStatus, Session, SessionError,
    SessionFilter, DEFAULT_RATE_PER_HOUR,
};
use crate::store;
use rusqlite::Connection;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

pub(crate) fn session_err(e: SessionError) -> HandlerErr {
    HandlerErr::new("bad_params", e.to_string())
}

pub(crate) fn default_rate(conn: &Connection) -> Result<u32, HandlerErr> {
    let stored = db::settings_get_json(conn, DEFAULT_RATE_SETTING_KEY)
        .map_err(|e| HandlerErr::storage("db_query_failed", e))?;
    Ok(stored
        .and_then(|v| v.as_u64())
        .and_then(|n| u32::try_from(n).ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_RATE_PER_HOUR))
}

/// `month` parameter as a `Month`, if present.
pub(crate) fn optional_month(req: &Request) -> Result<Option<Month>, HandlerErr> {
    optional_str(req, "month")
        .map(|m| Month::parse(&m))
        .transpose()
        .map_err(session_err)
}

fn parse_filter(req: &Request) -> Result<SessionFilter, HandlerErr> {
    // "ALL" is what the list screen sends for an unset dropdown.
    let payment_status = match optional_str(req, "paymentStatus") {
        None => None,
        Some(s) if s.eq_ignore_ascii_case("all") => None,
        Some(s) => Some(PaymentStatus::parse(&s).ok_or_else(|| {
            HandlerErr::new("bad_params", "paymentStatus must be PAID, UNPAID or ALL")
        })?),
    };
    Ok(SessionFilter {
        tutor_id: optional_str(req, "tutorId"),
        student_id: optional_str(req, "studentId"),
        payment_status,
        subject: optional_str(req, "subject").filter(|s| !s.eq_ignore_ascii_case("all")),
        month: optional_month(req)?,
    })
}

fn load_existing(conn: &Connection, session_id: &str) -> Result<Session, HandlerErr> {
    store::load_session(conn, session_id)
        .map_err(|e| HandlerErr::storage("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::new("not_found", "session not found"))
}

fn handle_sessions_list(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = conn(state)?;
    let filter = parse_filter(req)?;
    let all = store::load_sessions(conn).map_err(|e| HandlerErr::storage("db_query_failed", e))?;
    let matched: Vec<&Session> = all.iter().filter(|s| filter.matches(s)).collect();

    let total_hours: f64 = matched.iter().map(|s| s.hours()).sum();
    let total_amount: u64 = matched.iter().map(|s| s.amount()).sum();
    let unpaid_amount: u64 = matched
        .iter()
        .filter(|s| !s.is_paid())
        .map(|s| s.amount())
        .sum();
    let sessions: Vec<serde_json::Value> = matched.iter().map(|s| session_json(s)).collect();
    Ok(json!({
        "sessions": sessions,
        "totalHours": total_hours,
        "totalAmount": total_amount,
        "unpaidAmount": unpaid_amount
    }))
}

fn handle_sessions_create(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = conn(state)?;
    let student_id = required_str(req, "studentId")?;
    let tutor_id = required_str(req, "tutorId")?;
    let subject = required_str(req, "subject")?;
    let start_time = parse_timestamp(&required_str(req, "startTime")?).map_err(session_err)?;
    let end_time = parse_timestamp(&required_str(req, "endTime")?).map_err(session_err)?;

    store::load_student(conn, &student_id)
        .map_err(|e| HandlerErr::storage("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::new("not_found", "student not found"))?;
    let tutor = store::load_tutor(conn, &tutor_id)
        .map_err(|e| HandlerErr::storage("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::new("not_found", "tutor not found"))?;

    let default = default_rate(conn)?;
    let session = Session {
        id: Uuid::new_v4().to_string(),
        student_id,
        tutor_id,
        subject,
        topic: optional_str(req, "topic"),
        start_time,
        end_time,
        rate_per_hour: optional_rate(req, "ratePerHour")?.unwrap_or(default),
        tutor_rate_per_hour: tutor.hourly_rate.unwrap_or(default),
        payment_status: PaymentStatus::Unpaid,
        paid_at: None,
    };
    session.validate().map_err(session_err)?;

    store::insert_session(conn, &session).map_err(|e| {
        HandlerErr::storage("db_insert_failed", e).with_details(json!({ "table": "sessions" }))
    })?;
    info!(session_id = %session.id, amount = session.amount(), "session recorded");
    Ok(json!({ "sessionId": session.id, "session": session_json(&session) }))
}

fn handle_sessions_mark_paid(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = conn(state)?;
    let session_id = required_str(req, "sessionId")?;
    let mut session = load_existing(conn, &session_id)?;
    if session.is_paid() {
        return Ok(json!({ "session": session_json(&session), "changed": false }));
    }

    let now = store::now_rfc3339();
    session.payment_status = PaymentStatus::Paid;
    session.paid_at = Some(now.clone());
    let payment = Payment {
        id: Uuid::new_v4().to_string(),
        kind: PaymentKind::StudentToAdmin,
        party_id: session.student_id.clone(),
        month: session.month(),
        amount: session.amount(),
        session_id: Some(session.id.clone()),
        note: optional_str(req, "note"),
        created_at: now,
    };
    store::mark_session_paid(conn, &session, &payment).map_err(|e| {
        HandlerErr::storage("db_update_failed", e).with_details(json!({ "table": "sessions" }))
    })?;
    info!(session_id = %session_id, amount = payment.amount, "session marked paid");
    Ok(json!({
        "session": session_json(&session),
        "changed": true,
        "paymentId": payment.id
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "sessions.list" => handle_sessions_list(state, req),
        "sessions.create" => handle_sessions_create(state, req),
        "sessions.markPaid" => handle_sessions_mark_paid(state, req),
        _ => return None,
    };
    Some(respond(&req.id, res))
}
