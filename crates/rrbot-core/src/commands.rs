//! `/rrbot` admin command interpreter
//!
//! Grammar: `/rrbot <identifier> <subcommand> [args...]`. Commands carrying the
//! wrong identifier are dropped without a reply.

use crate::WeakBlacklist;
use rand::Rng;
use rrbot_config::TargetKind;
use rrbot_ipc::InboundMessage;
use thiserror::Error;
use tracing::{error, info};

pub const COMMAND_PREFIX: &str = "/rrbot";
const COMMAND_NAME: &str = "rrbot";

fn kind_label(kind: &TargetKind) -> &'static str {
    match kind {
        TargetKind::User => "User",
        TargetKind::Group => "Group",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    List,
    Add { kind: TargetKind, id: String },
    Remove { kind: TargetKind, id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("No command identifier is configured, {} is unavailable.", COMMAND_PREFIX)]
    NotConfigured,
    #[error("Please use {} <identifier> help", COMMAND_PREFIX)]
    MissingIdentifier,
    #[error(
        "Invalid format, expected: {} {identifier} add/remove [user|group] <ID>",
        COMMAND_PREFIX
    )]
    MissingTarget { identifier: String },
    #[error("Unknown subcommand: {0}")]
    UnknownSubcommand(String),
    #[error("{} {id} is already in the weak blacklist.", kind_label(.kind))]
    AlreadyPresent { kind: TargetKind, id: String },
    #[error(
        "{} {id} comes from the configuration file, remove it there instead.",
        kind_label(.kind)
    )]
    StaticTarget { kind: TargetKind, id: String },
    #[error("{} {id} is not in the dynamic weak blacklist.", kind_label(.kind))]
    NotManaged { kind: TargetKind, id: String },
}

/// True when the first token of `text` is the command name, with or without
/// the leading slash.
pub fn is_command(text: &str) -> bool {
    text.trim()
        .trim_start_matches('/')
        .split_whitespace()
        .next()
        .is_some_and(|name| name == COMMAND_NAME)
}

/// `[user|u|group|g] <id>`; the kind defaults to user.
fn parse_target(args: &[&str]) -> Option<(TargetKind, String)> {
    let (kind, id) = match args {
        [] => return None,
        [first, rest @ ..] => match first.parse::<TargetKind>() {
            Ok(kind) => (kind, *rest.first()?),
            Err(_) => (TargetKind::User, *first),
        },
    };
    let id = id.trim();
    if id.is_empty() {
        return None;
    }
    Some((kind, id.to_string()))
}

/// Parse command text against the configured identifier. `Ok(None)` means the
/// command must be ignored silently.
pub fn parse(text: &str, identifier: Option<&str>) -> Result<Option<Command>, CommandError> {
    let parts: Vec<&str> = text.trim().trim_start_matches('/').split_whitespace().collect();
    let Some((_, args)) = parts.split_first() else {
        return Ok(None);
    };

    let Some(identifier) = identifier else {
        return Err(CommandError::NotConfigured);
    };
    let Some((given, args)) = args.split_first() else {
        return Err(CommandError::MissingIdentifier);
    };
    if *given != identifier {
        return Ok(None);
    }

    let subcommand = args.first().map(|s| s.to_lowercase()).unwrap_or_default();
    match subcommand.as_str() {
        "" | "help" => Ok(Some(Command::Help)),
        "list" => Ok(Some(Command::List)),
        "add" | "remove" => {
            let (kind, id) =
                parse_target(&args[1..]).ok_or_else(|| CommandError::MissingTarget {
                    identifier: identifier.to_string(),
                })?;
            if subcommand == "add" {
                Ok(Some(Command::Add { kind, id }))
            } else {
                Ok(Some(Command::Remove { kind, id }))
            }
        }
        other => Err(CommandError::UnknownSubcommand(other.to_string())),
    }
}

impl<R: Rng> WeakBlacklist<R> {
    /// Handle a `/rrbot` message. Returns the reply text, or `None` when the
    /// command is ignored.
    pub fn handle_command(&mut self, message: &InboundMessage) -> Option<String> {
        let command = match parse(&message.text, self.config.command_identifier()) {
            Ok(Some(command)) => command,
            Ok(None) => return None,
            Err(err) => return Some(err.to_string()),
        };

        let response = match command {
            Command::Help => Ok(self.help_text()),
            Command::List => Ok(self.list_text()),
            Command::Add { kind, id } => self.add_managed(kind, &id).inspect(|_| {
                info!(
                    "Weak blacklist command: add {} {} by {}",
                    kind, id, message.sender_id
                )
            }),
            Command::Remove { kind, id } => self.remove_managed(kind, &id).inspect(|_| {
                info!(
                    "Weak blacklist command: remove {} {} by {}",
                    kind, id, message.sender_id
                )
            }),
        };

        Some(response.unwrap_or_else(|err| err.to_string()))
    }

    pub fn help_text(&self) -> String {
        let identifier = self.config.command_identifier().unwrap_or("<identifier>");
        [
            "rrbot weak blacklist commands:".to_string(),
            format!("{} {} help  - show this help", COMMAND_PREFIX, identifier),
            format!(
                "{} {} list  - show the weak blacklist and interception counts",
                COMMAND_PREFIX, identifier
            ),
            format!(
                "{} {} add [user|group] <ID>    - add a user or group to the weak blacklist (default: user)",
                COMMAND_PREFIX, identifier
            ),
            format!(
                "{} {} remove [user|group] <ID> - remove a target from the dynamic weak blacklist",
                COMMAND_PREFIX, identifier
            ),
        ]
        .join("\n")
    }

    pub fn list_text(&self) -> String {
        let blacklists = self.blacklists();
        let mut lines = vec!["Weak blacklist status:".to_string()];

        for kind in [TargetKind::User, TargetKind::Group] {
            let targets = blacklists.targets(kind);
            if !self.config.is_enabled(kind) {
                lines.push(format!("{} weak blacklist: disabled.", kind_label(&kind)));
            } else if targets.is_empty() {
                lines.push(format!("{} blacklist is empty.", kind_label(&kind)));
            } else {
                lines.push(format!("{}s:", kind_label(&kind)));
                for id in targets {
                    let source = if self.managed.contains(kind, id) {
                        "dynamic"
                    } else {
                        "static"
                    };
                    lines.push(format!(
                        "- {} ({}, intercepted {} times)",
                        id,
                        source,
                        self.counters.get(kind, id)
                    ));
                }
            }
        }

        lines.join("\n")
    }

    pub fn add_managed(&mut self, kind: TargetKind, id: &str) -> Result<String, CommandError> {
        if self.config.static_targets(kind).contains(id) || self.managed.contains(kind, id) {
            return Err(CommandError::AlreadyPresent {
                kind,
                id: id.to_string(),
            });
        }

        self.managed.insert(kind, id);
        self.persist_managed();
        Ok(format!("Added {} {} to the weak blacklist.", kind, id))
    }

    /// Only managed entries can be removed. The target's counter is dropped
    /// right away.
    pub fn remove_managed(&mut self, kind: TargetKind, id: &str) -> Result<String, CommandError> {
        if self.managed.remove(kind, id) {
            self.counters.remove(kind, id);
            self.persist_managed();
            return Ok(format!("Removed {} {} from the weak blacklist.", kind, id));
        }

        if self.config.static_targets(kind).contains(id) {
            Err(CommandError::StaticTarget {
                kind,
                id: id.to_string(),
            })
        } else {
            Err(CommandError::NotManaged {
                kind,
                id: id.to_string(),
            })
        }
    }

    fn persist_managed(&self) {
        if let Err(e) = self.storage.save_managed_blacklist(&self.managed) {
            error!("Failed to save managed blacklist: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_command_name() {
        assert!(is_command("/rrbot secret list"));
        assert!(is_command("  rrbot"));
        assert!(!is_command("/rrbots list"));
        assert!(!is_command("hello /rrbot"));
        assert!(!is_command(""));
    }

    #[test]
    fn missing_identifier_configuration_is_reported() {
        assert_eq!(
            parse("/rrbot s3cret list", None),
            Err(CommandError::NotConfigured)
        );
    }

    #[test]
    fn bare_command_asks_for_identifier() {
        let err = parse("/rrbot", Some("s3cret")).expect_err("hint");
        assert_eq!(err, CommandError::MissingIdentifier);
        assert_eq!(err.to_string(), "Please use /rrbot <identifier> help");
    }

    #[test]
    fn wrong_identifier_is_ignored() {
        assert_eq!(parse("/rrbot guess list", Some("s3cret")), Ok(None));
        assert_eq!(parse("/rrbot guess add 1", Some("s3cret")), Ok(None));
    }

    #[test]
    fn help_is_the_default_subcommand() {
        assert_eq!(parse("/rrbot s3cret", Some("s3cret")), Ok(Some(Command::Help)));
        assert_eq!(
            parse("/rrbot s3cret HELP", Some("s3cret")),
            Ok(Some(Command::Help))
        );
        assert_eq!(
            parse("/rrbot s3cret List", Some("s3cret")),
            Ok(Some(Command::List))
        );
    }

    #[test]
    fn target_kind_defaults_to_user() {
        assert_eq!(
            parse("/rrbot s3cret add 12345", Some("s3cret")),
            Ok(Some(Command::Add {
                kind: TargetKind::User,
                id: "12345".to_string(),
            }))
        );
        assert_eq!(
            parse("/rrbot s3cret remove g 777", Some("s3cret")),
            Ok(Some(Command::Remove {
                kind: TargetKind::Group,
                id: "777".to_string(),
            }))
        );
    }

    #[test]
    fn missing_target_id_is_a_usage_error() {
        for text in ["/rrbot s3cret add", "/rrbot s3cret remove group"] {
            let err = parse(text, Some("s3cret")).expect_err("usage");
            assert_eq!(
                err.to_string(),
                "Invalid format, expected: /rrbot s3cret add/remove [user|group] <ID>"
            );
        }
    }

    #[test]
    fn unknown_subcommand_is_named() {
        let err = parse("/rrbot s3cret purge", Some("s3cret")).expect_err("unknown");
        assert_eq!(err.to_string(), "Unknown subcommand: purge");
    }

    #[test]
    fn error_messages_name_the_target() {
        let err = CommandError::StaticTarget {
            kind: TargetKind::Group,
            id: "9".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Group 9 comes from the configuration file, remove it there instead."
        );
    }
}
