use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Tutoring-agency admin sidecar: line-delimited JSON requests on stdin,
/// one JSON response per line on stdout.
#[derive(Debug, Clone, Parser)]
#[command(name = "tutordeskd", version, about)]
pub struct Args {
    /// Workspace directory to open at startup.
    #[arg(long, env = "TUTORDESK_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// tracing filter directive, e.g. `info` or `tutordeskd=debug`.
    #[arg(long, env = "TUTORDESK_LOG", default_value = "info")]
    pub log_filter: String,
}

/// Logs go to stderr; stdout carries the response stream.
pub fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

/// Subjects offered by the admin forms when the workspace has no
/// `catalog.subjects` setting.
pub const DEFAULT_SUBJECT_CATALOG: &[&str] = &[
    "Mathematics",
    "Physics",
    "Chemistry",
    "Biology",
    "English",
    "Hindi",
    "Computer Science",
    "Geography",
];

pub const CATALOG_SETTING_KEY: &str = "catalog.subjects";

/// Positive integer, rupees per hour. Applies to new sessions when the
/// request or tutor gives no rate.
pub const DEFAULT_RATE_SETTING_KEY: &str = "payments.defaultRate";

/// Payee VPA for generated UPI links, e.g. `agency@upi`.
pub const UPI_ID_SETTING_KEY: &str = "payments.upiId";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_default_without_flags() {
        let a = Args::try_parse_from(["tutordeskd"]).expect("parse");
        assert_eq!(a.log_filter, "info");
    }

    #[test]
    fn workspace_flag_is_parsed() {
        let a = Args::try_parse_from([
            "tutordeskd",
            "--workspace",
            "/tmp/ws",
            "--log-filter",
            "debug",
        ])
        .expect("parse");
        assert_eq!(a.workspace, Some(PathBuf::from("/tmp/ws")));
        assert_eq!(a.log_filter, "debug");
    }
}
