//! # Terminal Rewind
//!
//! Records terminal commands together with the files they touched, and rolls
//! those changes back on request.
//!
//! ## Usage
//!
//! ```bash
//! trewind start --name refactor
//! trewind record "sed -i 's/foo/bar/' src/lib.rs"
//! trewind changes 12
//! trewind undo 12 --apply
//! trewind end
//! ```

use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use std::env;
use std::path::PathBuf;
use std::process;

use trewind::config::{self, Config};
use trewind::error::Result;
use trewind::models::{Command, CommandFilter};
use trewind::recorder::{LogEntry, RecordOptions, Recorder};
use trewind::rollback::{ActionKind, ActionStatus, RollbackManager, RollbackReport};
use trewind::version::{short_version, version_string};

/// Terminal Rewind - a flight recorder and undo button for the terminal
#[derive(Parser)]
#[command(name = "trewind")]
#[command(version = env!("TREWIND_VERSION"))]
#[command(about = "Record terminal commands and roll back their file changes", long_about = None)]
struct Cli {
    /// Show detailed version information
    #[arg(long = "version-full")]
    version_full: bool,

    /// Use this config file instead of the default locations
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new session (closes the active one)
    Start {
        #[arg(long)]
        name: Option<String>,
        /// Agent the commands are attributed to
        #[arg(long)]
        agent: Option<String>,
    },

    /// End the active session
    End,

    /// Log a command that already ran
    Log {
        command: String,
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        exit_code: i32,
        #[arg(long)]
        output: Option<String>,
        #[arg(long)]
        error_output: Option<String>,
        #[arg(long)]
        cwd: Option<PathBuf>,
        #[arg(long)]
        duration_ms: Option<u64>,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        notes: Option<String>,
    },

    /// Run a command, recording its output and file changes
    Record {
        command: String,
        /// Store the command without running it
        #[arg(long)]
        no_exec: bool,
        /// Run without file tracking
        #[arg(long)]
        no_track: bool,
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Track only these files instead of the working directory
        #[arg(long)]
        watch: Vec<PathBuf>,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        notes: Option<String>,
    },

    /// List recorded commands, newest first
    Show {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        session: Option<String>,
        /// Only commands with a nonzero exit code
        #[arg(long)]
        errors: bool,
        /// Substring to look for in command text and output
        #[arg(long)]
        search: Option<String>,
        /// Only commands from the last N hours
        #[arg(long)]
        hours: Option<i64>,
        /// Include captured output
        #[arg(long)]
        output: bool,
    },

    /// List the file changes of one command
    Changes { command_id: i64 },

    /// Roll back a command's file changes (dry run unless --apply)
    Undo {
        /// Command to roll back (default: most recent with file changes)
        command_id: Option<i64>,
        #[arg(long)]
        apply: bool,
    },

    /// List sessions, newest first
    Sessions {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show aggregate statistics
    Stats,

    /// Run the database integrity check
    Check,

    /// Generate example config file
    GenerateConfig,
}

fn main() -> Result<()> {
    // Initialize logging with WARN level by default (can be overridden with RUST_LOG env var)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    if cli.version_full {
        print!("{}", version_string());
        return Ok(());
    }

    if let Some(path) = &cli.config {
        env::set_var("TREWIND_CONFIG_PATH", path);
    }

    let command = match cli.command {
        Some(command) => command,
        None => {
            println!("trewind {}", short_version());
            println!("Run 'trewind --help' for usage.");
            return Ok(());
        }
    };

    if let Commands::GenerateConfig = command {
        let config_path = Config::default_config_path()?;
        println!("Generating example config file at: {:?}", config_path);
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&config_path, Config::example_toml())?;
        println!("Config file generated successfully!");
        println!("Edit {} to customize settings", config_path.display());
        return Ok(());
    }

    let mut recorder = Recorder::from_config(config::get_config())?;
    recorder.resume_active()?;

    match command {
        Commands::Start { name, agent } => {
            let handle = recorder.begin_session(name.as_deref(), agent.as_deref())?;
            println!("Started session {}", handle.id);
        }
        Commands::End => match recorder.end_session()? {
            Some(session) => println!(
                "Ended session {} ({} commands, {} ok, {} failed)",
                session.id, session.command_count, session.success_count, session.error_count
            ),
            None => println!("No active session"),
        },
        Commands::Log {
            command,
            exit_code,
            output,
            error_output,
            cwd,
            duration_ms,
            tags,
            notes,
        } => {
            let id = recorder.log(&LogEntry {
                command,
                exit_code,
                output,
                error_output,
                cwd,
                duration_ms,
                tags,
                notes,
            })?;
            println!("Logged command #{}", id);
        }
        Commands::Record {
            command,
            no_exec,
            no_track,
            cwd,
            watch,
            tags,
            notes,
        } => {
            let options = RecordOptions {
                execute: !no_exec,
                track_files: !no_exec && !no_track,
                cwd,
                watch,
                tags,
                notes,
            };
            let outcome = recorder.record(&command, &options)?;

            if let Some(stored) = recorder.store().get_command(outcome.command_id)? {
                if let Some(out) = &stored.output {
                    print!("{}", out);
                }
                if let Some(err) = &stored.error_output {
                    eprint!("{}", err);
                }
            }
            for change in &outcome.file_changes {
                eprintln!("  {:<8} {}", change.change_type, change.file_path.display());
            }
            for warning in &outcome.warnings {
                eprintln!("  warning: {}", warning);
            }
            eprintln!("Recorded command #{}", outcome.command_id);

            if let Some(code) = outcome.exit_code.filter(|c| *c != 0) {
                process::exit(code);
            }
        }
        Commands::Show {
            limit,
            session,
            errors,
            search,
            hours,
            output,
        } => {
            let filter = CommandFilter {
                session_id: session,
                since: hours.map(|h| Utc::now() - Duration::hours(h)),
                errors_only: errors,
                text: search,
                limit,
            };
            let commands = recorder.store().get_commands(&filter)?;
            if commands.is_empty() {
                println!("No commands found");
            }
            for cmd in &commands {
                println!("{}", format_command_row(cmd));
                if output {
                    if let Some(out) = &cmd.output {
                        for line in out.lines() {
                            println!("      {}", line);
                        }
                    }
                }
            }
        }
        Commands::Changes { command_id } => {
            let changes = recorder.store().get_file_changes(command_id)?;
            if changes.is_empty() {
                println!("No file changes recorded for command #{}", command_id);
            }
            for change in &changes {
                let restorable = if change.is_restorable() { "" } else { "  (not restorable)" };
                println!(
                    "{:<8} {}{}",
                    change.change_type,
                    change.file_path.display(),
                    restorable
                );
            }
        }
        Commands::Undo { command_id, apply } => {
            let manager = RollbackManager::new(recorder.store().clone());
            let report = match command_id {
                Some(id) => manager.execute(id, !apply)?,
                None => manager.rollback_last(!apply)?,
            };
            print_report(&report);
            if !report.success {
                process::exit(1);
            }
        }
        Commands::Sessions { limit } => {
            let sessions = recorder.store().get_sessions(limit)?;
            if sessions.is_empty() {
                println!("No sessions found");
            }
            for s in &sessions {
                let state = if s.is_active() { "active" } else { "ended" };
                println!(
                    "{}  {:<6}  {:>4} cmds  {:>4} ok  {:>4} failed  {}",
                    s.id,
                    state,
                    s.command_count,
                    s.success_count,
                    s.error_count,
                    s.name.as_deref().unwrap_or("")
                );
            }
        }
        Commands::Stats => {
            let stats = recorder.store().get_stats()?;
            println!("Commands:      {}", stats.total_commands);
            println!("  successful:  {}", stats.successful_commands);
            println!("  failed:      {}", stats.failed_commands);
            println!("  success rate {}%", stats.success_rate());
            println!("Sessions:      {}", stats.total_sessions);
            println!("File changes:  {}", stats.total_file_changes);
            println!(
                "Storage:       {} bytes ({})",
                stats.storage_bytes,
                stats.database_path.display()
            );
        }
        Commands::Check => {
            recorder.store().check_integrity()?;
            println!(
                "Store OK (schema v{})",
                recorder.store().schema_version()?
            );
        }
        Commands::GenerateConfig => {}
    }

    Ok(())
}

fn format_command_row(cmd: &Command) -> String {
    let status = match cmd.exit_code {
        Some(0) => "ok".to_string(),
        Some(code) => format!("exit {}", code),
        None => "-".to_string(),
    };
    let duration = cmd
        .duration_ms
        .map(|ms| format!("{}ms", ms))
        .unwrap_or_default();
    format!(
        "#{:<5} {}  {:<8} {:>8}  {}",
        cmd.id, cmd.timestamp, status, duration, cmd.command
    )
}

fn print_report(report: &RollbackReport) {
    let mode = if report.dry_run { "Dry run for" } else { "Rollback of" };
    println!("{} command #{}", mode, report.command_id);
    if report.outcomes.is_empty() {
        println!("  nothing to undo");
    }
    for outcome in &report.outcomes {
        let verb = match outcome.action.kind {
            ActionKind::Delete => "delete",
            ActionKind::Restore { .. } => "restore",
        };
        println!(
            "  {:<7} {}  [{}]",
            verb,
            outcome.action.file_path.display(),
            outcome.status
        );
        if let Some(warning) = &outcome.integrity_warning {
            println!("          warning: {}", warning);
        }
    }
    if report.dry_run && report.outcomes.iter().any(|o| o.status == ActionStatus::WouldApply) {
        println!("Re-run with --apply to make these changes.");
    }
}
