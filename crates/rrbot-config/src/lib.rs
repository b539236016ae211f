//! rrbot Configuration
//!
//! TOML configuration for the weak blacklist plugin, with legacy key support

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

pub const DEFAULT_REPLY_PROBABILITY: f64 = 0.3;
pub const DEFAULT_USER_MAX_INTERCEPTION: i64 = 5;
pub const DEFAULT_GROUP_MAX_INTERCEPTION: i64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    User,
    Group,
}

impl TargetKind {
    pub fn default_max_interception(self) -> i64 {
        match self {
            TargetKind::User => DEFAULT_USER_MAX_INTERCEPTION,
            TargetKind::Group => DEFAULT_GROUP_MAX_INTERCEPTION,
        }
    }
}

impl std::str::FromStr for TargetKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" | "u" => Ok(TargetKind::User),
            "group" | "g" => Ok(TargetKind::Group),
            _ => Err(format!("Unknown target kind: {}", s)),
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::User => write!(f, "user"),
            TargetKind::Group => write!(f, "group"),
        }
    }
}

/// A user or group ID as written in the config. Numbers and strings are both
/// accepted and compared by their string form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TargetId {
    Number(i64),
    Text(String),
}

impl TargetId {
    pub fn as_key(&self) -> String {
        match self {
            TargetId::Number(n) => n.to_string(),
            TargetId::Text(s) => s.clone(),
        }
    }
}

/// A numeric setting kept in its raw TOML form so a malformed value can fall
/// back to a default instead of failing the whole load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawNumber(pub toml::Value);

impl RawNumber {
    pub fn as_f64(&self) -> anyhow::Result<f64> {
        let value = match &self.0 {
            toml::Value::Float(f) => *f,
            toml::Value::Integer(i) => *i as f64,
            toml::Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| anyhow::anyhow!("'{}' is not a number", s))?,
            other => anyhow::bail!("'{}' is not a number", other),
        };
        if value.is_nan() {
            anyhow::bail!("'{}' is not a number", self.0);
        }
        Ok(value)
    }

    pub fn as_i64(&self) -> anyhow::Result<i64> {
        match &self.0 {
            toml::Value::Integer(i) => Ok(*i),
            toml::Value::Float(f) if f.is_finite() => Ok(f.trunc() as i64),
            toml::Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| anyhow::anyhow!("'{}' is not an integer", s)),
            other => anyhow::bail!("'{}' is not an integer", other),
        }
    }
}

impl fmt::Display for RawNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub command_identifier: String,
    #[serde(default = "default_true")]
    pub log_blocked_messages: bool,
    #[serde(default)]
    pub user_settings: UserSettings,
    #[serde(default)]
    pub group_settings: GroupSettings,

    // Legacy flat keys, still honoured after the per-category sections.
    #[serde(default)]
    pub blacklisted_users: Vec<TargetId>,
    #[serde(default)]
    pub blacklisted_groups: Vec<TargetId>,
    pub reply_probability: Option<RawNumber>,
    pub group_reply_probability: Option<RawNumber>,
    pub max_interception_count: Option<RawNumber>,
    pub max_group_interception_count: Option<RawNumber>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            core: CoreConfig::default(),
            command_identifier: String::new(),
            log_blocked_messages: true,
            user_settings: UserSettings::default(),
            group_settings: GroupSettings::default(),
            blacklisted_users: Vec::new(),
            blacklisted_groups: Vec::new(),
            reply_probability: None,
            group_reply_probability: None,
            max_interception_count: None,
            max_group_interception_count: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoreConfig {
    pub data_dir: Option<String>,
    pub log_level: Option<String>,
    pub log_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSettings {
    #[serde(default = "default_true")]
    pub enable: bool,
    pub reply_probability: Option<RawNumber>,
    pub max_interception_count: Option<RawNumber>,
    #[serde(default)]
    pub blacklisted_users: Vec<TargetId>,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            enable: true,
            reply_probability: None,
            max_interception_count: None,
            blacklisted_users: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSettings {
    #[serde(default = "default_true")]
    pub enable: bool,
    pub reply_probability: Option<RawNumber>,
    pub max_interception_count: Option<RawNumber>,
    #[serde(default)]
    pub blacklisted_groups: Vec<TargetId>,
}

impl Default for GroupSettings {
    fn default() -> Self {
        Self {
            enable: true,
            reply_probability: None,
            max_interception_count: None,
            blacklisted_groups: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn expand_home(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            if path == "~" {
                return home;
            }
            return home.join(path.trim_start_matches("~/"));
        }
    }
    PathBuf::from(path)
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("rrbot").join("config.toml"))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(level) = &self.core.log_level {
            if level.trim().is_empty() {
                anyhow::bail!("core.log_level cannot be empty");
            }
        }

        let lists = [
            ("user_settings.blacklisted_users", &self.user_settings.blacklisted_users),
            ("group_settings.blacklisted_groups", &self.group_settings.blacklisted_groups),
            ("blacklisted_users", &self.blacklisted_users),
            ("blacklisted_groups", &self.blacklisted_groups),
        ];
        for (name, list) in lists {
            if list.iter().any(|id| id.as_key().trim().is_empty()) {
                anyhow::bail!("{} contains an empty ID", name);
            }
        }

        Ok(())
    }

    /// Directory holding counters and the managed blacklist.
    pub fn data_dir(&self) -> PathBuf {
        match self.core.data_dir.as_deref().map(str::trim) {
            Some(dir) if !dir.is_empty() => expand_home(dir),
            _ => dirs::home_dir()
                .map(|home| home.join(".rrbot"))
                .unwrap_or_else(|| PathBuf::from(".rrbot")),
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        match self.core.log_dir.as_deref().map(str::trim) {
            Some(dir) if !dir.is_empty() => expand_home(dir),
            _ => self.data_dir().join("logs"),
        }
    }

    pub fn log_level(&self) -> &str {
        self.core.log_level.as_deref().unwrap_or("info")
    }

    /// Shared secret for admin commands, `None` when commands are disabled.
    pub fn command_identifier(&self) -> Option<&str> {
        let identifier = self.command_identifier.trim();
        if identifier.is_empty() {
            None
        } else {
            Some(identifier)
        }
    }

    pub fn is_enabled(&self, kind: TargetKind) -> bool {
        match kind {
            TargetKind::User => self.user_settings.enable,
            TargetKind::Group => self.group_settings.enable,
        }
    }

    /// Statically configured IDs for a category (section key plus legacy key),
    /// regardless of whether the category is enabled.
    pub fn static_targets(&self, kind: TargetKind) -> BTreeSet<String> {
        let (current, legacy) = match kind {
            TargetKind::User => (&self.user_settings.blacklisted_users, &self.blacklisted_users),
            TargetKind::Group => (
                &self.group_settings.blacklisted_groups,
                &self.blacklisted_groups,
            ),
        };
        current.iter().chain(legacy).map(TargetId::as_key).collect()
    }

    /// The configured probability value for a category, section key first.
    pub fn raw_reply_probability(&self, kind: TargetKind) -> Option<&RawNumber> {
        match kind {
            TargetKind::User => self
                .user_settings
                .reply_probability
                .as_ref()
                .or(self.reply_probability.as_ref()),
            TargetKind::Group => self
                .group_settings
                .reply_probability
                .as_ref()
                .or(self.group_reply_probability.as_ref()),
        }
    }

    pub fn raw_max_interception_count(&self, kind: TargetKind) -> Option<&RawNumber> {
        match kind {
            TargetKind::User => self
                .user_settings
                .max_interception_count
                .as_ref()
                .or(self.max_interception_count.as_ref()),
            TargetKind::Group => self
                .group_settings
                .max_interception_count
                .as_ref()
                .or(self.max_group_interception_count.as_ref()),
        }
    }
}
