mod backup;
mod config;
mod db;
mod engine;
mod ipc;
mod model;
mod registry;
mod roster;
mod sessions;
mod store;

use clap::Parser;
use std::io::{self, BufRead, Write};
use tracing::{error, info, warn};

fn main() {
    let args = config::Args::parse();
    config::init_tracing(&args.log_filter);
    info!("tutordeskd v{} starting", env!("CARGO_PKG_VERSION"));

    let mut state = ipc::AppState::default();
    if let Some(path) = args.workspace.as_deref() {
        if let Err(e) = ipc::select_workspace(&mut state, path) {
            error!(error = %format!("{e:#}"), "failed to open startup workspace");
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "stdin closed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    info!("tutordeskd exiting");
}
