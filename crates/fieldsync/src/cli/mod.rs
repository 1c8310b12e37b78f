//! Command-line interface for fieldsync.
//!
//! This module provides the CLI structure and command handlers for the
//! `fieldsync` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    AttendanceArg, CaptureCommand, ConfigCommand, ConflictsCommand, KindArg, OutcomeArg,
    PendingCommand, ReleaseCommand, StatusCommand, SyncCommand,
};

/// fieldsync - Capture training records anywhere, sync them when you can
///
/// Records attendance, logbook entries, assessment results and photo
/// evidence. Captures made without connectivity are kept in a local queue
/// and delivered once the platform is reachable again.
#[derive(Debug, Parser)]
#[command(name = "fieldsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show connectivity and queue status
    Status(StatusCommand),

    /// Record a capture, queueing it if the platform is unreachable
    #[command(subcommand)]
    Capture(CaptureCommand),

    /// Deliver queued records now
    Sync(SyncCommand),

    /// List records that have not been delivered
    Pending(PendingCommand),

    /// Show audited sync conflicts
    Conflicts(ConflictsCommand),

    /// Return a quarantined record to the sync queue
    Release(ReleaseCommand),

    /// Remove delivered records past their retention
    Purge,

    /// Run in the foreground, syncing on reconnect until interrupted
    Run,

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        crate::logging::Verbosity::from_flags(self.quiet, self.verbose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_name() {
        assert_eq!(Cli::command().get_name(), "fieldsync");
    }

    #[test]
    fn test_verbosity() {
        use crate::logging::Verbosity;

        assert_eq!(parse(&["fieldsync", "-q", "run"]).verbosity(), Verbosity::Quiet);
        assert_eq!(parse(&["fieldsync", "run"]).verbosity(), Verbosity::Normal);
        assert_eq!(parse(&["fieldsync", "-v", "run"]).verbosity(), Verbosity::Verbose);
        assert_eq!(parse(&["fieldsync", "-vv", "run"]).verbosity(), Verbosity::Trace);
    }

    #[test]
    fn test_parse_with_config() {
        let cli = parse(&["fieldsync", "-c", "/custom/config.toml", "status"]);
        assert_eq!(cli.config, Some(PathBuf::from("/custom/config.toml")));
        assert!(matches!(cli.command, Command::Status(StatusCommand { json: false })));
    }

    #[test]
    fn test_parse_capture_attendance() {
        let cli = parse(&[
            "fieldsync",
            "capture",
            "attendance",
            "--learner",
            "42",
            "--status",
            "sick",
            "--date",
            "2024-03-01",
        ]);
        let Command::Capture(CaptureCommand::Attendance {
            learner,
            status,
            date,
            ..
        }) = cli.command
        else {
            panic!("expected attendance capture");
        };
        assert_eq!(learner, 42);
        assert_eq!(status, AttendanceArg::Sick);
        assert_eq!(date.map(|d| d.to_string()).as_deref(), Some("2024-03-01"));
    }

    #[test]
    fn test_parse_capture_assessment() {
        let cli = parse(&[
            "fieldsync", "capture", "assessment", "-s", "3", "-e", "9", "-a", "12", "-r", "nyc",
        ]);
        assert!(matches!(
            cli.command,
            Command::Capture(CaptureCommand::Assessment {
                schedule: 3,
                enrollment: 9,
                activity: 12,
                result: OutcomeArg::NotYetCompetent,
                ..
            })
        ));
    }

    #[test]
    fn test_parse_sync_evidence_only() {
        let cli = parse(&["fieldsync", "sync", "--evidence-only"]);
        assert!(matches!(
            cli.command,
            Command::Sync(SyncCommand {
                evidence_only: true,
                ..
            })
        ));
    }

    #[test]
    fn test_parse_pending_kind() {
        let cli = parse(&["fieldsync", "pending", "--kind", "evidence", "--json"]);
        assert!(matches!(
            cli.command,
            Command::Pending(PendingCommand {
                kind: Some(KindArg::Evidence),
                json: true,
            })
        ));
    }

    #[test]
    fn test_parse_release() {
        let cli = parse(&["fieldsync", "release", "logbook", "17"]);
        assert!(matches!(
            cli.command,
            Command::Release(ReleaseCommand {
                kind: KindArg::Logbook,
                id: 17,
            })
        ));
    }

    #[test]
    fn test_rejects_unknown_outcome() {
        let result = Cli::try_parse_from([
            "fieldsync", "capture", "assessment", "-s", "1", "-e", "1", "-a", "1", "-r", "pass",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_config_validate() {
        let cli = parse(&["fieldsync", "config", "validate", "-f", "/tmp/x.toml"]);
        assert!(matches!(
            cli.command,
            Command::Config(ConfigCommand::Validate { file: Some(_) })
        ));
    }
}
