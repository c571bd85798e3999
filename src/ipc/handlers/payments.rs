use crate::config::UPI_ID_SETTING_KEY;
use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::handlers::sessions::{optional_month, session_err};
use crate::ipc::helpers::{conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::sessions::{self, Month, Payment, PaymentKind};
use crate::store;
use rusqlite::Connection;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

fn required_month(req: &Request) -> Result<Month, HandlerErr> {
    optional_month(req)?.ok_or_else(|| HandlerErr::new("bad_params", "missing month"))
}

fn load_payments(conn: &Connection) -> Result<Vec<Payment>, HandlerErr> {
    store::load_payments(conn).map_err(|e| HandlerErr::storage("db_query_failed", e))
}

fn load_sessions(conn: &Connection) -> Result<Vec<sessions::Session>, HandlerErr> {
    store::load_sessions(conn).map_err(|e| HandlerErr::storage("db_query_failed", e))
}

fn paid_out(payments: &[Payment], tutor_id: &str, month: Month) -> u64 {
    payments
        .iter()
        .filter(|p| {
            p.kind == PaymentKind::AdminToTutor && p.party_id == tutor_id && p.month == month
        })
        .map(|p| p.amount)
        .sum()
}

fn handle_payments_student_bill(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = conn(state)?;
    let student_id = required_str(req, "studentId")?;
    let month = required_month(req)?;
    let student = store::load_student(conn, &student_id)
        .map_err(|e| HandlerErr::storage("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::new("not_found", "student not found"))?;

    let all = load_sessions(conn)?;
    let bill = sessions::student_bill(&student_id, month, &all);

    // Agency VPA when configured, otherwise the student's phone handle.
    let configured = db::settings_get_json(conn, UPI_ID_SETTING_KEY)
        .map_err(|e| HandlerErr::storage("db_query_failed", e))?
        .and_then(|v| v.as_str().map(|s| s.to_string()));
    let payee = configured.or_else(|| student.phone.as_ref().map(|p| format!("{p}@upi")));

    let note = sessions::tuition_note(&student.name, month);
    let upi_url = match payee {
        Some(vpa) if bill.outstanding_amount > 0 => Some(
            sessions::upi_url(&vpa, &student.name, bill.outstanding_amount, &note)
                .map_err(|e| HandlerErr::new("bad_params", e.to_string()))?,
        ),
        _ => None,
    };
    Ok(json!({ "bill": bill, "note": note, "upiUrl": upi_url }))
}

fn handle_payments_tutor_earnings(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = conn(state)?;
    let tutor_id = required_str(req, "tutorId")?;
    let month = required_month(req)?;
    store::load_tutor(conn, &tutor_id)
        .map_err(|e| HandlerErr::storage("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::new("not_found", "tutor not found"))?;

    let all = load_sessions(conn)?;
    let payments = load_payments(conn)?;
    let paid = paid_out(&payments, &tutor_id, month);
    let bill = sessions::tutor_earnings(&tutor_id, month, &all, paid);
    Ok(json!({ "bill": bill }))
}

fn handle_payments_pay_tutor(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = conn(state)?;
    let tutor_id = required_str(req, "tutorId")?;
    let month = required_month(req)?;
    store::load_tutor(conn, &tutor_id)
        .map_err(|e| HandlerErr::storage("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::new("not_found", "tutor not found"))?;

    let all = load_sessions(conn)?;
    let payments = load_payments(conn)?;
    let paid = paid_out(&payments, &tutor_id, month);
    let due = sessions::tutor_earnings(&tutor_id, month, &all, paid).outstanding_amount;
    if due == 0 {
        return Err(HandlerErr::new(
            "bad_params",
            format!("nothing outstanding for this tutor in {month}"),
        ));
    }

    let payment = Payment {
        id: Uuid::new_v4().to_string(),
        kind: PaymentKind::AdminToTutor,
        party_id: tutor_id.clone(),
        month,
        amount: due,
        session_id: None,
        note: optional_str(req, "note"),
        created_at: store::now_rfc3339(),
    };
    store::insert_payment(conn, &payment).map_err(|e| {
        HandlerErr::storage("db_insert_failed", e)
            .with_details(json!({ "table": "session_payments" }))
    })?;
    info!(tutor_id = %tutor_id, month = %month, amount = due, "tutor payout recorded");
    Ok(json!({ "paymentId": payment.id, "amount": due }))
}

fn handle_payments_list(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = conn(state)?;
    let month = optional_month(req)?;
    let kind = match optional_str(req, "kind") {
        None => None,
        Some(k) => Some(PaymentKind::parse(&k).ok_or_else(|| {
            HandlerErr::new("bad_params", "kind must be student_to_admin or admin_to_tutor")
        })?),
    };
    let payments: Vec<Payment> = load_payments(conn)?
        .into_iter()
        .filter(|p| month.map_or(true, |m| p.month == m) && kind.map_or(true, |k| p.kind == k))
        .collect();
    Ok(json!({ "payments": payments }))
}

fn handle_payments_summary(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = conn(state)?;
    let month = optional_month(req)?;
    let all = load_sessions(conn)?;
    let payments = load_payments(conn)?;
    Ok(json!(sessions::summarize(month, &all, &payments)))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "payments.studentBill" => handle_payments_student_bill(state, req),
        "payments.tutorEarnings" => handle_payments_tutor_earnings(state, req),
        "payments.payTutor" => handle_payments_pay_tutor(state, req),
        "payments.list" => handle_payments_list(state, req),
        "payments.summary" => handle_payments_summary(state, req),
        _ => return None,
    };
    Some(respond(&req.id, res))
}
