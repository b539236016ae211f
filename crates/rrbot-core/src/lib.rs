//! rrbot Core
//!
//! The weak blacklist plugin: owns configuration, counters and the managed
//! blacklist, decides whether a reply is suppressed and blanks suppressed
//! replies in the output stage

pub mod commands;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::Rng;
use rrbot_config::{Config, TargetKind};
use rrbot_ipc::{InboundMessage, OutboundReply};
use rrbot_policy::{Blacklists, CategoryPolicy, Decision, Outcome, PolicyEngine, Target};
use rrbot_storage::{CounterStore, ManagedBlacklist, Storage};
use tracing::{error, info, warn};

pub use commands::{Command, CommandError, COMMAND_PREFIX};

const PREVIEW_CHARS: usize = 50;
const UNKNOWN_SENDER: &str = "unknown user";

/// Outcome of the decision stage, handed to [`WeakBlacklist::decorate`].
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    NotBlacklisted,
    Reply { target: Target, decision: Decision },
    Suppress { target: Target, decision: Decision },
}

impl Verdict {
    pub fn suppresses(&self) -> bool {
        matches!(self, Verdict::Suppress { .. })
    }

    pub fn target(&self) -> Option<&Target> {
        match self {
            Verdict::NotBlacklisted => None,
            Verdict::Reply { target, .. } | Verdict::Suppress { target, .. } => Some(target),
        }
    }
}

fn message_preview(text: &str) -> String {
    let mut chars = text.chars();
    let preview: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

fn log_identifier(target: &Target, sender_name: &str) -> String {
    match target.kind {
        TargetKind::User => format!("user: {}({})", sender_name, target.id),
        TargetKind::Group => format!("group: {}, user: {}", target.id, sender_name),
    }
}

pub struct WeakBlacklist<R: Rng = StdRng> {
    config: Config,
    storage: Storage,
    counters: CounterStore,
    managed: ManagedBlacklist,
    engine: PolicyEngine<R>,
}

impl WeakBlacklist<StdRng> {
    pub fn load(config: Config) -> Result<Self> {
        Self::load_with_engine(config, PolicyEngine::new())
    }
}

impl<R: Rng> WeakBlacklist<R> {
    /// Open storage under the configured data directory and restore counters
    /// and the managed blacklist. Unreadable state files start empty.
    pub fn load_with_engine(config: Config, engine: PolicyEngine<R>) -> Result<Self> {
        let storage = Storage::new(config.data_dir())?;
        let counters = storage.load_counter_store();
        let managed = storage.load_managed_blacklist();

        if config.command_identifier().is_none() {
            warn!(
                "command_identifier is not configured, {} commands are disabled",
                COMMAND_PREFIX
            );
        }

        let plugin = Self {
            config,
            storage,
            counters,
            managed,
            engine,
        };

        let blacklists = plugin.blacklists();
        info!(
            "Weak blacklist loaded, users: {}, groups: {}",
            blacklists.users.len(),
            blacklists.groups.len()
        );

        Ok(plugin)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn counters(&self) -> &CounterStore {
        &self.counters
    }

    pub fn managed(&self) -> &ManagedBlacklist {
        &self.managed
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn blacklists(&self) -> Blacklists {
        Blacklists::resolve(&self.config, &self.managed)
    }

    /// Decision stage. Updates counters in memory only; they are written by
    /// [`WeakBlacklist::terminate`].
    pub fn check(&mut self, message: &InboundMessage) -> Verdict {
        let group_id = message.group_id.as_deref();
        let Some(target) = self.blacklists().match_message(&message.sender_id, group_id) else {
            // No longer blacklisted: forget whatever was counted before.
            self.counters.remove(TargetKind::User, &message.sender_id);
            if let Some(gid) = group_id {
                self.counters.remove(TargetKind::Group, gid);
            }
            return Verdict::NotBlacklisted;
        };

        let policy = CategoryPolicy::from_config(&self.config, target.kind);
        let decision = self.engine.evaluate(&policy, &mut self.counters, &target);

        if self.config.log_blocked_messages {
            let sender_name = message
                .sender_name
                .as_deref()
                .filter(|name| !name.is_empty())
                .unwrap_or(UNKNOWN_SENDER);
            let identifier = log_identifier(&target, sender_name);
            match decision.outcome {
                Outcome::FloorReply => info!(
                    "Weak blacklist floor reply - {}, reached max interceptions: {}/{}",
                    identifier, decision.previous, policy.threshold
                ),
                Outcome::ProbabilityReply if decision.previous > 0 => info!(
                    "Weak blacklist reply allowed by probability - {}, probability: {:.2}, draw: {:.3}, counter reset",
                    identifier, policy.probability, decision.draw
                ),
                Outcome::ProbabilityReply => {}
                Outcome::Suppress => info!(
                    "Weak blacklist suppressed - {}, message: {}, interceptions: {}/{}",
                    identifier,
                    message_preview(&message.text),
                    decision.counter,
                    policy.threshold
                ),
            }
        }

        if decision.outcome.suppresses() {
            Verdict::Suppress { target, decision }
        } else {
            Verdict::Reply { target, decision }
        }
    }

    /// Output stage. A suppressing verdict blanks `reply`; returns whether it
    /// did.
    pub fn decorate(
        &self,
        message: &InboundMessage,
        verdict: Verdict,
        reply: &mut OutboundReply,
    ) -> bool {
        if !verdict.suppresses() {
            return false;
        }

        if self.config.log_blocked_messages {
            let identifier = match &message.group_id {
                Some(gid) => format!("group {} user {}", gid, message.sender_id),
                None => format!("user {}", message.sender_id),
            };
            info!(
                "Weak blacklist: replacing pending reply chain for {}, length: {}",
                identifier,
                reply.chain.len()
            );
        }

        reply.blank();
        true
    }

    /// Run both stages for one message. Returns whether the reply was
    /// suppressed.
    pub fn handle_message(
        &mut self,
        message: &InboundMessage,
        reply: Option<&mut OutboundReply>,
    ) -> bool {
        let verdict = self.check(message);
        match reply {
            Some(reply) => self.decorate(message, verdict, reply),
            None => verdict.suppresses(),
        }
    }

    pub fn save_counters(&self) -> Result<()> {
        self.storage.save_counter_store(&self.counters)
    }

    /// Shutdown hook: persist counters. Failures are logged, never fatal.
    pub fn terminate(&mut self) {
        match self.save_counters() {
            Ok(()) => info!("Weak blacklist stopped, interception counters saved"),
            Err(e) => error!("Failed to save interception counters: {}", e),
        }
    }
}
