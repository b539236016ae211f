//! rrbot CLI
//!
//! Host harness for the weak blacklist plugin: feeds JSON-lines message events
//! through the plugin and runs admin commands

mod logging;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rrbot_config::{Config, TargetKind};
use rrbot_core::{commands, WeakBlacklist, COMMAND_PREFIX};
use rrbot_ipc::{InboundEvent, InboundMessage, OutboundReply, OutputLine};
use rrbot_policy::CategoryPolicy;
use std::fs;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

const CLI_SENDER_ID: &str = "cli";

#[derive(Parser)]
#[command(name = "rrbot")]
#[command(about = "Weak blacklist reply suppression for chat bots", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (overrides core.log_level)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Read message events as JSON lines from stdin and write verdicts to stdout
    Run,

    /// Run one admin command, e.g. `rrbot command add group 123`
    Command {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        text: Vec<String>,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Log management commands
    Logs {
        #[command(subcommand)]
        action: LogCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Check that the configuration file parses and validates
    Validate,
    /// Show the resolved blacklists and policy values
    Show,
}

#[derive(Subcommand)]
enum LogCommands {
    /// Show log files and sizes
    List,
    /// Delete old logs
    Clean {
        /// Keep only N days of logs
        #[arg(short, long, default_value_t = logging::LOG_RETENTION_DAYS)]
        days: u64,
    },
    /// Show the last N lines of today's log
    Tail {
        #[arg(short, long, default_value = "50")]
        lines: usize,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run => {
            let config = load_config(cli.config)?;
            let log_level = cli
                .log_level
                .unwrap_or_else(|| config.log_level().to_string());
            let _logging_guard = logging::init_logging(&config.log_dir(), &log_level)?;
            let plugin = WeakBlacklist::load(config)?;
            info!("Reading message events from stdin");
            run_loop(plugin).await?;
        }

        Commands::Command { text } => {
            let config = load_config(cli.config)?;
            let log_level = cli
                .log_level
                .unwrap_or_else(|| config.log_level().to_string());
            let _logging_guard = logging::init_logging(&config.log_dir(), &log_level)?;
            let text = command_text(&text.join(" "), config.command_identifier());
            let mut plugin = WeakBlacklist::load(config)?;
            match plugin.handle_command(&InboundMessage::new(CLI_SENDER_ID, &text)) {
                Some(response) => println!("{}", response),
                None => eprintln!("Command ignored: identifier does not match."),
            }
            plugin.terminate();
        }

        Commands::Config { action } => match action {
            ConfigCommands::Validate => match load_config(cli.config) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => eprintln!("Configuration is invalid: {:#}", e),
            },
            ConfigCommands::Show => {
                let config = load_config(cli.config)?;
                print_config_summary(config)?;
            }
        },

        Commands::Logs { action } => {
            let config = load_config(cli.config)?;
            let manager = logging::LogManager::new(config.log_dir());
            match action {
                LogCommands::List => {
                    let files = manager.log_files()?;
                    println!(
                        "Log files in {} ({} total):\n",
                        config.log_dir().display(),
                        logging::LogManager::format_size(manager.total_size()?)
                    );
                    for file in files {
                        let metadata = fs::metadata(&file)?;
                        let modified: chrono::DateTime<chrono::Local> =
                            metadata.modified()?.into();
                        println!(
                            "  {} ({}, modified {})",
                            file.file_name()
                                .map(|n| n.to_string_lossy().into_owned())
                                .unwrap_or_default(),
                            logging::LogManager::format_size(metadata.len()),
                            modified.format("%Y-%m-%d %H:%M:%S")
                        );
                    }
                }
                LogCommands::Clean { days } => {
                    let deleted = manager.cleanup_older_than(days)?;
                    println!("Cleaned {} old log file(s)", deleted);
                }
                LogCommands::Tail { lines } => {
                    let current_log = manager.current_log_path();
                    if current_log.exists() {
                        let content = fs::read_to_string(&current_log)?;
                        let all_lines: Vec<&str> = content.lines().collect();
                        let start = all_lines.len().saturating_sub(lines);
                        for line in &all_lines[start..] {
                            println!("{}", line);
                        }
                    } else {
                        println!("No log file found at {}", current_log.display());
                    }
                }
            }
        }
    }

    Ok(())
}

fn load_config(config_path: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => PathBuf::from(path),
        None => Config::default_path().context("No config directory available")?,
    };
    Config::load(&path).with_context(|| format!("loading config {}", path.display()))
}

/// Prefix bare subcommands with `/rrbot <identifier>` so the operator does not
/// have to repeat the secret already stored in the config.
fn command_text(text: &str, identifier: Option<&str>) -> String {
    match identifier {
        Some(identifier) if !commands::is_command(text) => {
            format!("{} {} {}", COMMAND_PREFIX, identifier, text.trim())
        }
        _ => text.to_string(),
    }
}

/// Turn one stdin line into an output line. Malformed lines are skipped.
///
/// Command messages go through the decision stage too, so a blacklisted
/// sender's command reply can be blanked like any other reply.
fn process_line(plugin: &mut WeakBlacklist, line: &str) -> Option<OutputLine> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let event = match InboundEvent::from_json(line) {
        Ok(event) => event,
        Err(e) => {
            warn!("Skipping malformed event line: {}", e);
            return None;
        }
    };
    let trace_id = event.message.trace_id.clone();

    if commands::is_command(&event.message.text) {
        let verdict = plugin.check(&event.message);
        let mut reply = OutboundReply::text(&plugin.handle_command(&event.message)?);
        let suppressed = plugin.decorate(&event.message, verdict, &mut reply);
        return Some(OutputLine::Command {
            trace_id,
            suppressed,
            text: reply.plain_text(),
        });
    }

    let mut reply = event.reply;
    let suppressed = plugin.handle_message(&event.message, reply.as_mut());
    Some(OutputLine::Reply {
        trace_id,
        suppressed,
        chain: reply.map(|r| r.chain).unwrap_or_default(),
    })
}

async fn run_loop(mut plugin: WeakBlacklist) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let result = async {
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        break;
                    };
                    if let Some(output) = process_line(&mut plugin, &line) {
                        stdout.write_all(output.to_json()?.as_bytes()).await?;
                        stdout.write_all(b"\n").await?;
                        stdout.flush().await?;
                    }
                }
                _ = &mut shutdown => {
                    info!("Interrupted, shutting down");
                    break;
                }
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    plugin.terminate();
    result
}

fn print_config_summary(config: Config) -> Result<()> {
    println!("Data dir: {}", config.data_dir().display());
    println!("Log dir: {}", config.log_dir().display());
    println!(
        "Command identifier: {}",
        if config.command_identifier().is_some() {
            "configured"
        } else {
            "not configured (commands disabled)"
        }
    );
    println!("Log blocked messages: {}", config.log_blocked_messages);

    let plugin = WeakBlacklist::load(config)?;
    let blacklists = plugin.blacklists();
    for kind in [TargetKind::User, TargetKind::Group] {
        let policy = CategoryPolicy::from_config(plugin.config(), kind);
        println!(
            "{}: enabled={}, blacklisted={} (static {}, dynamic {}), reply_probability={:.2}, max_interception_count={}",
            kind,
            plugin.config().is_enabled(kind),
            blacklists.targets(kind).len(),
            plugin.config().static_targets(kind).len(),
            plugin.managed().targets(kind).len(),
            policy.probability,
            policy.threshold
        );
    }
    Ok(())
}
