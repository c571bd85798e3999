use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "tutordesk.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.to_string_lossy()))?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tutors(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            phone TEXT,
            qualification TEXT,
            hourly_rate INTEGER,
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS tutor_subjects(
            tutor_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            PRIMARY KEY(tutor_id, subject),
            FOREIGN KEY(tutor_id) REFERENCES tutors(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tutor_subjects_subject ON tutor_subjects(subject)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            grade TEXT,
            phone TEXT,
            sort_order INTEGER NOT NULL,
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_subjects(
            student_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            PRIMARY KEY(student_id, subject),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    // No FK on tutor_id: rows outlive tutor edits and are checked by the audit.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_assignments(
            student_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            tutor_id TEXT NOT NULL,
            tutor_name TEXT NOT NULL,
            assigned_at TEXT,
            PRIMARY KEY(student_id, subject),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_assignments_tutor ON student_assignments(tutor_id)",
        [],
    )?;

    // Money history; rows outlive student and tutor deletes.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            tutor_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            topic TEXT,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            rate_per_hour INTEGER NOT NULL,
            tutor_rate_per_hour INTEGER NOT NULL,
            payment_status TEXT NOT NULL DEFAULT 'UNPAID',
            paid_at TEXT,
            created_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_tutor ON sessions(tutor_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_student ON sessions(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS session_payments(
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            party_id TEXT NOT NULL,
            month TEXT NOT NULL,
            amount INTEGER NOT NULL,
            session_id TEXT,
            note TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_session_payments_month ON session_payments(month)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    ensure_tutors_hourly_rate(&conn)?;

    Ok(conn)
}

fn ensure_tutors_hourly_rate(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "tutors", "hourly_rate")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE tutors ADD COLUMN hourly_rate INTEGER", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value_json FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("setting {key} is not valid JSON"))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn open_db_adds_hourly_rate_to_older_workspaces() {
        let ws = std::env::temp_dir().join(format!(
            "tutordesk-db-migrate-{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&ws).expect("create temp dir");
        {
            let conn = Connection::open(ws.join(DB_FILE_NAME)).expect("open raw db");
            conn.execute(
                "CREATE TABLE tutors(
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    email TEXT NOT NULL,
                    phone TEXT,
                    qualification TEXT,
                    created_at TEXT,
                    updated_at TEXT
                )",
                [],
            )
            .expect("create old tutors table");
            conn.execute(
                "INSERT INTO tutors(id, name, email) VALUES('t1', 'Ravi', 'ravi@example.com')",
                [],
            )
            .expect("insert old tutor");
        }

        let conn = open_db(&ws).expect("open db");
        assert!(table_has_column(&conn, "tutors", "hourly_rate").unwrap());
        let rate: Option<u32> = conn
            .query_row("SELECT hourly_rate FROM tutors WHERE id = 't1'", [], |r| r.get(0))
            .expect("read rate");
        assert_eq!(rate, None);
        drop(conn);

        let conn = open_db(&ws).expect("reopen db");
        assert!(table_has_column(&conn, "sessions", "payment_status").unwrap());
        drop(conn);
        let _ = std::fs::remove_dir_all(ws);
    }
}
