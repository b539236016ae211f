//! rrbot Storage
//!
//! JSON file persistence for interception counters and the managed blacklist

use anyhow::{anyhow, Context, Result};
use rrbot_config::{TargetId, TargetKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

const STORAGE_SUBDIR: &str = "WeakBlacklist";
const USER_COUNTERS_FILE: &str = "user_interception_counters.json";
const GROUP_COUNTERS_FILE: &str = "group_interception_counters.json";
const MANAGED_BLACKLIST_FILE: &str = "managed_blacklist.json";

/// Consecutive suppressed replies, keyed by target ID.
pub type Counters = BTreeMap<String, u32>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CounterStore {
    pub users: Counters,
    pub groups: Counters,
}

impl CounterStore {
    pub fn counters(&self, kind: TargetKind) -> &Counters {
        match kind {
            TargetKind::User => &self.users,
            TargetKind::Group => &self.groups,
        }
    }

    pub fn counters_mut(&mut self, kind: TargetKind) -> &mut Counters {
        match kind {
            TargetKind::User => &mut self.users,
            TargetKind::Group => &mut self.groups,
        }
    }

    pub fn get(&self, kind: TargetKind, id: &str) -> u32 {
        self.counters(kind).get(id).copied().unwrap_or(0)
    }

    pub fn set(&mut self, kind: TargetKind, id: &str, count: u32) {
        self.counters_mut(kind).insert(id.to_string(), count);
    }

    pub fn remove(&mut self, kind: TargetKind, id: &str) -> Option<u32> {
        self.counters_mut(kind).remove(id)
    }
}

/// Targets added at runtime through the admin command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManagedBlacklist {
    pub users: BTreeSet<String>,
    pub groups: BTreeSet<String>,
}

impl ManagedBlacklist {
    pub fn targets(&self, kind: TargetKind) -> &BTreeSet<String> {
        match kind {
            TargetKind::User => &self.users,
            TargetKind::Group => &self.groups,
        }
    }

    pub fn contains(&self, kind: TargetKind, id: &str) -> bool {
        self.targets(kind).contains(id)
    }

    /// Returns false if the target was already present.
    pub fn insert(&mut self, kind: TargetKind, id: &str) -> bool {
        match kind {
            TargetKind::User => self.users.insert(id.to_string()),
            TargetKind::Group => self.groups.insert(id.to_string()),
        }
    }

    pub fn remove(&mut self, kind: TargetKind, id: &str) -> bool {
        match kind {
            TargetKind::User => self.users.remove(id),
            TargetKind::Group => self.groups.remove(id),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ManagedBlacklistFile {
    #[serde(default)]
    users: Vec<TargetId>,
    #[serde(default)]
    groups: Vec<TargetId>,
}

fn parse_counter_value(key: &str, value: &serde_json::Value) -> Result<u32> {
    let parsed = match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64)),
        serde_json::Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| anyhow!("counter '{}' has invalid value {}", key, value))
}

fn parse_counters(content: &str) -> Result<Counters> {
    let raw: BTreeMap<String, serde_json::Value> = serde_json::from_str(content)?;
    raw.iter()
        .map(|(key, value)| Ok((key.clone(), parse_counter_value(key, value)?)))
        .collect()
}

fn parse_managed_blacklist(content: &str) -> Result<ManagedBlacklist> {
    let file: ManagedBlacklistFile = serde_json::from_str(content)?;
    Ok(ManagedBlacklist {
        users: file.users.iter().map(TargetId::as_key).collect(),
        groups: file.groups.iter().map(TargetId::as_key).collect(),
    })
}

fn write_pretty<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(value)?;
    fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    /// Files live in `<data_dir>/WeakBlacklist`, created if missing.
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let dir = data_dir.as_ref().join(STORAGE_SUBDIR);
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating storage directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn counters_path(&self, kind: TargetKind) -> PathBuf {
        match kind {
            TargetKind::User => self.dir.join(USER_COUNTERS_FILE),
            TargetKind::Group => self.dir.join(GROUP_COUNTERS_FILE),
        }
    }

    pub fn managed_blacklist_path(&self) -> PathBuf {
        self.dir.join(MANAGED_BLACKLIST_FILE)
    }

    /// A missing file yields an empty map; a corrupt one is logged and
    /// yields an empty map too.
    pub fn load_counters(&self, kind: TargetKind) -> Counters {
        let path = self.counters_path(kind);
        if !path.exists() {
            return Counters::new();
        }
        match fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|content| parse_counters(&content))
        {
            Ok(counters) => counters,
            Err(e) => {
                error!("Failed to load {} interception counters: {}", kind, e);
                Counters::new()
            }
        }
    }

    pub fn load_counter_store(&self) -> CounterStore {
        CounterStore {
            users: self.load_counters(TargetKind::User),
            groups: self.load_counters(TargetKind::Group),
        }
    }

    pub fn save_counter_store(&self, store: &CounterStore) -> Result<()> {
        write_pretty(&self.counters_path(TargetKind::User), &store.users)?;
        write_pretty(&self.counters_path(TargetKind::Group), &store.groups)?;
        debug!("Interception counters saved");
        Ok(())
    }

    pub fn load_managed_blacklist(&self) -> ManagedBlacklist {
        let path = self.managed_blacklist_path();
        if !path.exists() {
            return ManagedBlacklist::default();
        }
        match fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|content| parse_managed_blacklist(&content))
        {
            Ok(list) => list,
            Err(e) => {
                error!("Failed to load managed blacklist: {}", e);
                ManagedBlacklist::default()
            }
        }
    }

    pub fn save_managed_blacklist(&self, list: &ManagedBlacklist) -> Result<()> {
        let payload = ManagedBlacklistFile {
            users: list.users.iter().cloned().map(TargetId::Text).collect(),
            groups: list.groups.iter().cloned().map(TargetId::Text).collect(),
        };
        write_pretty(&self.managed_blacklist_path(), &payload)
    }
}
