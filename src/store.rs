//! Load snapshots out of the workspace database and write engine results back.

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;

use crate::model::{AssignmentMap, AssignmentRef, Student, Tutor};
use crate::registry::TutorRegistry;
use crate::roster::StudentRoster;
use crate::sessions::{parse_timestamp, Month, Payment, PaymentKind, PaymentStatus, Session};

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

struct TutorRow {
    id: String,
    name: String,
    email: String,
    phone: Option<String>,
    qualification: Option<String>,
    hourly_rate: Option<u32>,
}

fn tutor_from_row(row: TutorRow, subjects: Vec<String>) -> anyhow::Result<Tutor> {
    let mut t = Tutor::new(row.id, row.name, row.email, subjects)?;
    t.phone = row.phone;
    t.qualification = row.qualification;
    t.hourly_rate = row.hourly_rate;
    Ok(t)
}

fn query_tutor_rows(conn: &Connection, id: Option<&str>) -> anyhow::Result<Vec<TutorRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, email, phone, qualification, hourly_rate
         FROM tutors
         WHERE (?1 IS NULL OR id = ?1)
         ORDER BY name, id",
    )?;
    let rows = stmt
        .query_map([id], |row| {
            Ok(TutorRow {
                id: row.get(0)?,
                name: row.get(1)?,
                email: row.get(2)?,
                phone: row.get(3)?,
                qualification: row.get(4)?,
                hourly_rate: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn query_tutor_subjects(
    conn: &Connection,
    id: Option<&str>,
) -> anyhow::Result<HashMap<String, Vec<String>>> {
    let mut stmt = conn.prepare(
        "SELECT tutor_id, subject FROM tutor_subjects
         WHERE (?1 IS NULL OR tutor_id = ?1)",
    )?;
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    let mut rows = stmt.query([id])?;
    while let Some(row) = rows.next()? {
        let tutor_id: String = row.get(0)?;
        let subject: String = row.get(1)?;
        out.entry(tutor_id).or_default().push(subject);
    }
    Ok(out)
}

pub fn load_tutors(conn: &Connection) -> anyhow::Result<Vec<Tutor>> {
    let mut subjects = query_tutor_subjects(conn, None)?;
    query_tutor_rows(conn, None)?
        .into_iter()
        .map(|row| {
            let subj = subjects.remove(&row.id).unwrap_or_default();
            tutor_from_row(row, subj)
        })
        .collect()
}

pub fn load_registry(conn: &Connection) -> anyhow::Result<TutorRegistry> {
    Ok(TutorRegistry::new(load_tutors(conn)?))
}

pub fn load_tutor(conn: &Connection, tutor_id: &str) -> anyhow::Result<Option<Tutor>> {
    let Some(row) = query_tutor_rows(conn, Some(tutor_id))?.into_iter().next() else {
        return Ok(None);
    };
    let subjects = query_tutor_subjects(conn, Some(tutor_id))?
        .remove(tutor_id)
        .unwrap_or_default();
    Ok(Some(tutor_from_row(row, subjects)?))
}

fn write_tutor_subjects(conn: &Connection, tutor: &Tutor) -> anyhow::Result<()> {
    conn.execute("DELETE FROM tutor_subjects WHERE tutor_id = ?", [&tutor.id])?;
    let mut stmt = conn.prepare("INSERT INTO tutor_subjects(tutor_id, subject) VALUES(?, ?)")?;
    for s in &tutor.subjects {
        stmt.execute((&tutor.id, s))?;
    }
    Ok(())
}

pub fn insert_tutor(conn: &Connection, tutor: &Tutor) -> anyhow::Result<()> {
    let now = now_rfc3339();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO tutors(
            id, name, email, phone, qualification, hourly_rate, created_at, updated_at
         )
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &tutor.id,
            &tutor.name,
            &tutor.email,
            tutor.phone.as_deref(),
            tutor.qualification.as_deref(),
            tutor.hourly_rate,
            &now,
            &now,
        ),
    )
    .context("insert tutors")?;
    write_tutor_subjects(&tx, tutor).context("insert tutor_subjects")?;
    tx.commit()?;
    Ok(())
}

/// Overwrites the tutor row and its subject set. Assignment rows are left
/// alone, including their cached tutor name.
pub fn update_tutor(conn: &Connection, tutor: &Tutor) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE tutors
         SET name = ?, email = ?, phone = ?, qualification = ?, hourly_rate = ?, updated_at = ?
         WHERE id = ?",
        (
            &tutor.name,
            &tutor.email,
            tutor.phone.as_deref(),
            tutor.qualification.as_deref(),
            tutor.hourly_rate,
            now_rfc3339(),
            &tutor.id,
        ),
    )
    .context("update tutors")?;
    write_tutor_subjects(&tx, tutor).context("update tutor_subjects")?;
    tx.commit()?;
    Ok(())
}

pub fn delete_tutor(conn: &Connection, tutor_id: &str) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM tutor_subjects WHERE tutor_id = ?", [tutor_id])?;
    tx.execute("DELETE FROM tutors WHERE id = ?", [tutor_id])?;
    tx.commit()?;
    Ok(())
}

struct StudentRow {
    id: String,
    name: String,
    email: String,
    grade: Option<String>,
    phone: Option<String>,
}

fn query_student_rows(conn: &Connection, id: Option<&str>) -> anyhow::Result<Vec<StudentRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, email, grade, phone
         FROM students
         WHERE (?1 IS NULL OR id = ?1)
         ORDER BY sort_order, id",
    )?;
    let rows = stmt
        .query_map([id], |row| {
            Ok(StudentRow {
                id: row.get(0)?,
                name: row.get(1)?,
                email: row.get(2)?,
                grade: row.get(3)?,
                phone: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn query_student_subjects(
    conn: &Connection,
    id: Option<&str>,
) -> anyhow::Result<HashMap<String, Vec<String>>> {
    let mut stmt = conn.prepare(
        "SELECT student_id, subject FROM student_subjects
         WHERE (?1 IS NULL OR student_id = ?1)
         ORDER BY student_id, sort_order",
    )?;
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    let mut rows = stmt.query([id])?;
    while let Some(row) = rows.next()? {
        let student_id: String = row.get(0)?;
        let subject: String = row.get(1)?;
        out.entry(student_id).or_default().push(subject);
    }
    Ok(out)
}

fn query_student_assignments(
    conn: &Connection,
    id: Option<&str>,
) -> anyhow::Result<HashMap<String, AssignmentMap>> {
    let mut stmt = conn.prepare(
        "SELECT student_id, subject, tutor_id, tutor_name FROM student_assignments
         WHERE (?1 IS NULL OR student_id = ?1)",
    )?;
    let mut out: HashMap<String, AssignmentMap> = HashMap::new();
    let mut rows = stmt.query([id])?;
    while let Some(row) = rows.next()? {
        let student_id: String = row.get(0)?;
        let subject: String = row.get(1)?;
        let tutor_id: String = row.get(2)?;
        let tutor_name: String = row.get(3)?;
        out.entry(student_id).or_default().insert(
            subject,
            Some(AssignmentRef {
                tutor_id,
                tutor_name,
            }),
        );
    }
    Ok(out)
}

fn student_from_row(
    row: StudentRow,
    subjects: Vec<String>,
    assignments: AssignmentMap,
) -> anyhow::Result<Student> {
    let mut s = Student::from_parts(row.id, row.name, subjects, assignments)
        .context("stored student snapshot is inconsistent")?;
    s.email = row.email;
    s.grade = row.grade;
    s.phone = row.phone;
    Ok(s)
}

pub fn load_students(conn: &Connection) -> anyhow::Result<Vec<Student>> {
    let mut subjects = query_student_subjects(conn, None)?;
    let mut assignments = query_student_assignments(conn, None)?;
    query_student_rows(conn, None)?
        .into_iter()
        .map(|row| {
            let subj = subjects.remove(&row.id).unwrap_or_default();
            let asg = assignments.remove(&row.id).unwrap_or_default();
            student_from_row(row, subj, asg)
        })
        .collect()
}

pub fn load_roster(conn: &Connection) -> anyhow::Result<StudentRoster> {
    Ok(StudentRoster::new(load_students(conn)?))
}

pub fn load_student(conn: &Connection, student_id: &str) -> anyhow::Result<Option<Student>> {
    let Some(row) = query_student_rows(conn, Some(student_id))?.into_iter().next() else {
        return Ok(None);
    };
    let subjects = query_student_subjects(conn, Some(student_id))?
        .remove(student_id)
        .unwrap_or_default();
    let assignments = query_student_assignments(conn, Some(student_id))?
        .remove(student_id)
        .unwrap_or_default();
    Ok(Some(student_from_row(row, subjects, assignments)?))
}

pub fn insert_student(conn: &Connection, student: &Student) -> anyhow::Result<()> {
    let now = now_rfc3339();
    let tx = conn.unchecked_transaction()?;
    let sort_order: i64 = tx.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM students",
        [],
        |r| r.get(0),
    )?;
    tx.execute(
        "INSERT INTO students(id, name, email, grade, phone, sort_order, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student.id,
            &student.name,
            &student.email,
            student.grade.as_deref(),
            student.phone.as_deref(),
            sort_order,
            &now,
            &now,
        ),
    )
    .context("insert students")?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO student_subjects(student_id, subject, sort_order) VALUES(?, ?, ?)",
        )?;
        for (i, s) in student.required_subjects().iter().enumerate() {
            stmt.execute((&student.id, s, i as i64))?;
        }
    }
    write_assignments(&tx, student)?;
    tx.commit()?;
    Ok(())
}

pub fn delete_student(conn: &Connection, student_id: &str) -> anyhow::Result<bool> {
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get(0)
        })
        .optional()?;
    if exists.is_none() {
        return Ok(false);
    }
    // Explicit dependency order (no ON DELETE CASCADE).
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM student_assignments WHERE student_id = ?",
        [student_id],
    )?;
    tx.execute("DELETE FROM student_subjects WHERE student_id = ?", [student_id])?;
    tx.execute("DELETE FROM students WHERE id = ?", [student_id])?;
    tx.commit()?;
    Ok(true)
}

fn write_assignments(conn: &Connection, student: &Student) -> anyhow::Result<()> {
    conn.execute(
        "DELETE FROM student_assignments WHERE student_id = ?",
        [&student.id],
    )?;
    let now = now_rfc3339();
    let mut stmt = conn.prepare(
        "INSERT INTO student_assignments(student_id, subject, tutor_id, tutor_name, assigned_at)
         VALUES(?, ?, ?, ?, ?)",
    )?;
    for (subject, a) in student.assigned() {
        stmt.execute((&student.id, subject, &a.tutor_id, &a.tutor_name, &now))?;
    }
    Ok(())
}

/// Replace the stored assignment map of one student with the snapshot's.
pub fn save_assignments(conn: &Connection, student: &Student) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    write_assignments(&tx, student).context("write student_assignments")?;
    tx.execute(
        "UPDATE students SET updated_at = ? WHERE id = ?",
        (now_rfc3339(), &student.id),
    )?;
    tx.commit()?;
    Ok(())
}

const SESSION_COLUMNS: &str = "id, student_id, tutor_id, subject, topic, start_time, end_time,
     rate_per_hour, tutor_rate_per_hour, payment_status, paid_at";

fn session_from_row(row: &rusqlite::Row<'_>) -> anyhow::Result<Session> {
    let start: String = row.get(5)?;
    let end: String = row.get(6)?;
    let status: String = row.get(9)?;
    Ok(Session {
        id: row.get(0)?,
        student_id: row.get(1)?,
        tutor_id: row.get(2)?,
        subject: row.get(3)?,
        topic: row.get(4)?,
        start_time: parse_timestamp(&start)?,
        end_time: parse_timestamp(&end)?,
        rate_per_hour: row.get(7)?,
        tutor_rate_per_hour: row.get(8)?,
        payment_status: PaymentStatus::parse(&status)
            .with_context(|| format!("unknown payment_status {status:?}"))?,
        paid_at: row.get(10)?,
    })
}

/// Every session, newest first.
pub fn load_sessions(conn: &Connection) -> anyhow::Result<Vec<Session>> {
    let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions ORDER BY start_time DESC, id");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(session_from_row(row)?);
    }
    Ok(out)
}

pub fn load_session(conn: &Connection, session_id: &str) -> anyhow::Result<Option<Session>> {
    let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([session_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(session_from_row(row)?)),
        None => Ok(None),
    }
}

pub fn insert_session(conn: &Connection, session: &Session) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO sessions(
            id, student_id, tutor_id, subject, topic, start_time, end_time,
            rate_per_hour, tutor_rate_per_hour, payment_status, paid_at, created_at
         )
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &session.id,
            &session.student_id,
            &session.tutor_id,
            &session.subject,
            session.topic.as_deref(),
            session.start_time.to_rfc3339(),
            session.end_time.to_rfc3339(),
            session.rate_per_hour,
            session.tutor_rate_per_hour,
            session.payment_status.as_str(),
            session.paid_at.as_deref(),
            now_rfc3339(),
        ),
    )
    .context("insert sessions")?;
    Ok(())
}

pub fn insert_payment(conn: &Connection, payment: &Payment) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO session_payments(
            id, kind, party_id, month, amount, session_id, note, created_at
         )
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &payment.id,
            payment.kind.as_str(),
            &payment.party_id,
            payment.month.to_string(),
            payment.amount as i64,
            payment.session_id.as_deref(),
            payment.note.as_deref(),
            &payment.created_at,
        ),
    )
    .context("insert session_payments")?;
    Ok(())
}

/// Flip the session to paid and record the matching collection in one
/// transaction.
pub fn mark_session_paid(
    conn: &Connection,
    session: &Session,
    payment: &Payment,
) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE sessions SET payment_status = ?, paid_at = ? WHERE id = ?",
        (
            session.payment_status.as_str(),
            session.paid_at.as_deref(),
            &session.id,
        ),
    )
    .context("update sessions")?;
    insert_payment(&tx, payment)?;
    tx.commit()?;
    Ok(())
}

/// Every recorded payment, newest first.
pub fn load_payments(conn: &Connection) -> anyhow::Result<Vec<Payment>> {
    let mut stmt = conn.prepare(
        "SELECT id, kind, party_id, month, amount, session_id, note, created_at
         FROM session_payments
         ORDER BY created_at DESC, id",
    )?;
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let kind: String = row.get(1)?;
        let month: String = row.get(3)?;
        let amount: i64 = row.get(4)?;
        out.push(Payment {
            id: row.get(0)?,
            kind: PaymentKind::parse(&kind)
                .with_context(|| format!("unknown payment kind {kind:?}"))?,
            party_id: row.get(2)?,
            month: Month::parse(&month)?,
            amount: amount.max(0) as u64,
            session_id: row.get(5)?,
            note: row.get(6)?,
            created_at: row.get(7)?,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_db;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    #[test]
    fn students_and_assignments_roundtrip_through_sqlite() {
        let ws = temp_dir("tutordesk-store");
        let conn = open_db(&ws).expect("open db");

        let mut t = Tutor::new("t1", "Ravi", "ravi@example.com", ["Math"]).unwrap();
        t.qualification = Some("MSc".into());
        insert_tutor(&conn, &t).expect("insert tutor");

        let mut s = Student::new("s1", "Asha", ["Physics", "Math"]).unwrap();
        s.email = "asha@example.com".into();
        insert_student(&conn, &s).expect("insert student");

        let reg = load_registry(&conn).expect("registry");
        let next = crate::engine::propose_assignment(&s, "Math", Some("t1"), &reg).unwrap();
        save_assignments(&conn, &next).expect("save");

        let loaded = load_student(&conn, "s1").expect("load").expect("present");
        assert_eq!(loaded, next);
        assert_eq!(
            loaded.required_subjects(),
            &["Physics".to_string(), "Math".to_string()]
        );
        assert_eq!(load_tutor(&conn, "t1").unwrap().unwrap(), t);

        assert!(delete_student(&conn, "s1").unwrap());
        assert!(!delete_student(&conn, "s1").unwrap());
        assert!(load_roster(&conn).unwrap().is_empty());

        drop(conn);
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn sessions_and_payments_roundtrip_through_sqlite() {
        let ws = temp_dir("tutordesk-store-sessions");
        let conn = open_db(&ws).expect("open db");

        let mut session = Session {
            id: "x1".into(),
            student_id: "s1".into(),
            tutor_id: "t1".into(),
            subject: "Math".into(),
            topic: Some("Quadratics".into()),
            start_time: parse_timestamp("2024-03-04T16:00:00+05:30").unwrap(),
            end_time: parse_timestamp("2024-03-04T17:30:00+05:30").unwrap(),
            rate_per_hour: 500,
            tutor_rate_per_hour: 400,
            payment_status: PaymentStatus::Unpaid,
            paid_at: None,
        };
        insert_session(&conn, &session).expect("insert session");
        assert_eq!(load_session(&conn, "x1").unwrap().as_ref(), Some(&session));
        assert!(load_session(&conn, "nope").unwrap().is_none());

        session.payment_status = PaymentStatus::Paid;
        session.paid_at = Some(now_rfc3339());
        let payment = Payment {
            id: "p1".into(),
            kind: PaymentKind::StudentToAdmin,
            party_id: "s1".into(),
            month: session.month(),
            amount: session.amount(),
            session_id: Some("x1".into()),
            note: None,
            created_at: now_rfc3339(),
        };
        mark_session_paid(&conn, &session, &payment).expect("mark paid");

        assert_eq!(load_sessions(&conn).unwrap(), vec![session]);
        assert_eq!(load_payments(&conn).unwrap(), vec![payment]);

        drop(conn);
        let _ = std::fs::remove_dir_all(ws);
    }
}
