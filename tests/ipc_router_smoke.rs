use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
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

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_tutordeskd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .env_remove("TUTORDESK_WORKSPACE")
        .spawn()
        .expect("spawn tutordeskd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

fn error_code(v: &serde_json::Value) -> Option<&str> {
    v.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
}

#[test]
fn methods_require_a_workspace_until_one_is_selected() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["ok"], true);
    assert!(health["result"]["workspacePath"].is_null());

    for (i, method) in [
        "tutors.list",
        "students.list",
        "assignments.audit",
        "dashboard.stats",
        "subjects.catalog",
    ]
    .iter()
    .enumerate()
    {
        let res = request(&mut stdin, &mut reader, &format!("n{i}"), method, json!({}));
        assert_eq!(error_code(&res), Some("no_workspace"), "{method}");
    }

    let res = request(&mut stdin, &mut reader, "2", "workspace.select", json!({}));
    assert_eq!(error_code(&res), Some("bad_params"));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn malformed_and_unknown_requests_get_error_responses() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response");
    assert_eq!(value["ok"], false);
    assert_eq!(error_code(&value), Some("bad_json"));

    let payload = json!({ "id": "x", "method": "grades.compute", "params": {} });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response");
    assert_eq!(value["id"], "x");
    assert_eq!(error_code(&value), Some("not_implemented"));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("tutordesk-router-smoke");
    let bundle_out = workspace.join("smoke-backup.zip");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(&mut stdin, &mut reader, "1", "health", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let catalog = request(&mut stdin, &mut reader, "3", "subjects.catalog", json!({}));
    assert_eq!(catalog["result"]["subjects"][0], "Mathematics");
    let res = request(
        &mut stdin,
        &mut reader,
        "4",
        "settings.set",
        json!({ "key": "catalog.subjects", "value": "Mathematics" }),
    );
    assert_eq!(error_code(&res), Some("bad_params"));
    let _ = request(
        &mut stdin,
        &mut reader,
        "5",
        "settings.set",
        json!({ "key": "catalog.subjects", "value": ["Mathematics", "Art"] }),
    );
    let setting = request(
        &mut stdin,
        &mut reader,
        "6",
        "settings.get",
        json!({ "key": "catalog.subjects" }),
    );
    assert_eq!(setting["result"]["value"], json!(["Mathematics", "Art"]));
    let catalog = request(&mut stdin, &mut reader, "7", "subjects.catalog", json!({}));
    assert_eq!(catalog["result"]["subjects"], json!(["Mathematics", "Art"]));

    let tutor = request(
        &mut stdin,
        &mut reader,
        "8",
        "tutors.create",
        json!({ "name": "Smoke Tutor", "email": "tutor@example.com", "subjects": ["Art"] }),
    );
    let tutor_id = tutor["result"]["tutorId"].as_str().unwrap_or("").to_string();
    let student = request(
        &mut stdin,
        &mut reader,
        "9",
        "students.create",
        json!({ "name": "Smoke Student", "email": "student@example.com", "subjects": ["Art"] }),
    );
    let student_id = student["result"]["studentId"].as_str().unwrap_or("").to_string();
    let session = request(
        &mut stdin,
        &mut reader,
        "9a",
        "sessions.create",
        json!({
            "studentId": student_id,
            "tutorId": tutor_id,
            "subject": "Art",
            "startTime": "2024-03-04T10:00:00+05:30",
            "endTime": "2024-03-04T11:00:00+05:30"
        }),
    );
    let session_id = session["result"]["sessionId"].as_str().unwrap_or("").to_string();

    let calls = vec![
        ("10", "tutors.list", json!({})),
        ("11", "tutors.get", json!({ "tutorId": tutor_id })),
        ("12", "tutors.forSubject", json!({ "subject": "Art" })),
        ("13", "tutors.update", json!({ "tutorId": tutor_id, "phone": "555" })),
        ("14", "students.list", json!({ "search": "smoke" })),
        ("15", "students.get", json!({ "studentId": student_id })),
        (
            "16",
            "assignments.set",
            json!({ "studentId": student_id, "subject": "Art", "tutorId": tutor_id }),
        ),
        (
            "17",
            "assignments.bulkSet",
            json!({ "studentId": student_id, "assignments": { "Art": tutor_id } }),
        ),
        (
            "18",
            "assignments.previewTutorSubjects",
            json!({ "tutorId": tutor_id, "subjects": [] }),
        ),
        ("19", "assignments.audit", json!({})),
        ("20", "dashboard.stats", json!({})),
        ("20a", "sessions.list", json!({ "paymentStatus": "ALL" })),
        ("20b", "sessions.markPaid", json!({ "sessionId": session_id })),
        (
            "20c",
            "payments.studentBill",
            json!({ "studentId": student_id, "month": "2024-03" }),
        ),
        (
            "20d",
            "payments.tutorEarnings",
            json!({ "tutorId": tutor_id, "month": "2024-03" }),
        ),
        (
            "20e",
            "payments.payTutor",
            json!({ "tutorId": tutor_id, "month": "2024-03" }),
        ),
        ("20f", "payments.list", json!({ "month": "2024-03" })),
        ("20g", "payments.summary", json!({})),
        (
            "21",
            "backup.exportWorkspaceBundle",
            json!({ "outPath": bundle_out.to_string_lossy() }),
        ),
        (
            "22",
            "backup.importWorkspaceBundle",
            json!({ "inPath": bundle_out.to_string_lossy() }),
        ),
        ("23", "students.get", json!({ "studentId": student_id })),
        ("24", "students.delete", json!({ "studentId": student_id })),
        ("25", "tutors.delete", json!({ "tutorId": tutor_id })),
    ];
    for (id, method, params) in calls {
        let res = request(&mut stdin, &mut reader, id, method, params);
        assert_eq!(res["ok"], true, "{method}: {res}");
    }

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn rejected_bundle_import_leaves_the_workspace_usable() {
    let workspace = temp_dir("tutordesk-bad-import");
    let bad_bundle = workspace.join("broken.zip");
    std::fs::write(&bad_bundle, b"definitely not a zip archive").expect("write bad bundle");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "name": "Kept", "email": "kept@example.com", "subjects": ["Math"] }),
    );
    assert_eq!(created["ok"], true);

    let res = request(
        &mut stdin,
        &mut reader,
        "3",
        "backup.importWorkspaceBundle",
        json!({ "inPath": bad_bundle.to_string_lossy() }),
    );
    assert_eq!(error_code(&res), Some("io_failed"));

    let listed = request(&mut stdin, &mut reader, "4", "students.list", json!({}));
    assert_eq!(listed["ok"], true, "{listed}");
    let students = listed["result"]["students"].as_array().expect("students");
    assert_eq!(students.len(), 1);
    assert_eq!(students[0]["name"], "Kept");

    let health = request(&mut stdin, &mut reader, "5", "health", json!({}));
    assert_eq!(
        health["result"]["workspacePath"],
        workspace.to_string_lossy().to_string()
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
