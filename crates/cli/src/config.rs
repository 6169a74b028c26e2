//! Persistent configuration.
//!
//! Keys are addressed externally as `section.key` strings. Values live in
//! the workspace `config` file; application defaults sit underneath, so an
//! unset file key falls through to them.

use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use toml::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistentConfig {
    #[serde(default)]
    pub update: UpdateConfig,
    #[serde(default)]
    pub command: CommandConfig,
    #[serde(default)]
    pub repo: RepoConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Always refresh command sources and plugins automatically.
    #[serde(default)]
    pub always: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Command source repository, e.g. `https://xx.git`.
    #[serde(default)]
    pub repo: String,
    /// Local command source directory; wins only when `repo` is unset.
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoConfig {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

/// A single configuration entry for listings.
#[derive(Debug, Clone)]
pub struct Item {
    pub key: String,
    pub value: String,
    pub comment: String,
}

/// Every supported key with its help text.
pub const USABLE_CONFIGS: &[(&str, &str)] = &[
    ("update.always", "always update commands automatically"),
    ("command.repo", "the command source repository, e.g. https://xx.git"),
    ("command.path", "point the dynamic command set at a local directory"),
    ("repo.user", "the username to access command repositories"),
    ("repo.password", "the password to access command repositories"),
];

/// Loads and persists [`PersistentConfig`] with dotted-key access.
#[derive(Debug, Clone)]
pub struct Configurator {
    config_file: PathBuf,
    defaults: PersistentConfig,
}

impl Configurator {
    pub fn new(config_file: PathBuf, defaults: PersistentConfig) -> Result<Self> {
        let configurator = Self {
            config_file,
            defaults,
        };
        // Surface a corrupt file at startup rather than on first use.
        configurator.file_table()?;
        Ok(configurator)
    }

    /// The effective configuration: file values over application defaults.
    pub fn load(&self) -> PersistentConfig {
        let Ok(table) = self.file_table() else {
            return self.defaults.clone();
        };
        let mut merged = Value::try_from(&self.defaults)
            .unwrap_or(Value::Table(Default::default()));
        merge_tables(&mut merged, &Value::Table(table));
        merged.try_into().unwrap_or_else(|_| self.defaults.clone())
    }

    /// The value of `section.key`, from the file or the defaults.
    pub fn get(&self, key: &str) -> Result<String> {
        let (section, name) = split_key(key)?;
        let table = self.file_table()?;
        let from_file = table
            .get(section)
            .and_then(Value::as_table)
            .and_then(|s| s.get(name))
            .map(display_value);
        if let Some(value) = from_file {
            return Ok(value);
        }
        let defaults = Value::try_from(&self.defaults).context("encode defaults failed")?;
        defaults
            .get(section)
            .and_then(|s| s.get(name))
            .map(display_value)
            .ok_or_else(|| anyhow!("unknown config item: {key}"))
    }

    /// Sets `section.key`; an empty value unsets the file entry.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let (section, name) = split_key(key)?;
        if !USABLE_CONFIGS.iter().any(|(known, _)| *known == key) {
            return Err(anyhow!("unknown config item: {key}"));
        }
        let mut table = self.file_table()?;
        if value.is_empty() {
            if let Some(Value::Table(section_table)) = table.get_mut(section) {
                section_table.remove(name);
            }
        } else {
            let section_table = table
                .entry(section.to_string())
                .or_insert_with(|| Value::Table(Default::default()));
            if let Value::Table(section_table) = section_table {
                section_table.insert(name.to_string(), parse_value(value));
            }
        }
        self.save_table(table)
    }

    /// Entries that have actually been set in the file.
    pub fn list_used(&self) -> Result<Vec<Item>> {
        let table = self.file_table()?;
        let mut items = Vec::new();
        for (section, value) in &table {
            let Some(section_table) = value.as_table() else {
                continue;
            };
            for (name, value) in section_table {
                let key = format!("{section}.{name}");
                let comment = USABLE_CONFIGS
                    .iter()
                    .find(|(known, _)| *known == key)
                    .map(|(_, comment)| comment.to_string())
                    .unwrap_or_default();
                items.push(Item {
                    key,
                    value: display_value(value),
                    comment,
                });
            }
        }
        Ok(items)
    }

    /// Every supported entry, configured or not.
    pub fn list_usable(&self) -> Vec<Item> {
        USABLE_CONFIGS
            .iter()
            .map(|(key, comment)| Item {
                key: key.to_string(),
                value: self.get(key).unwrap_or_default(),
                comment: comment.to_string(),
            })
            .collect()
    }

    fn file_table(&self) -> Result<toml::Table> {
        if !self.config_file.exists() {
            return Ok(Default::default());
        }
        let content = fs::read_to_string(&self.config_file)
            .with_context(|| format!("load config [{}] failed", self.config_file.display()))?;
        content
            .parse()
            .with_context(|| format!("parse config [{}] failed", self.config_file.display()))
    }

    fn save_table(&self, table: toml::Table) -> Result<()> {
        if let Some(dir) = self.config_file.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let data = toml::to_string_pretty(&Value::Table(table))
            .context("serialize config failed")?;
        fs::write(&self.config_file, data)
            .with_context(|| format!("write config [{}] failed", self.config_file.display()))
    }
}

fn split_key(key: &str) -> Result<(&str, &str)> {
    key.split_once('.')
        .filter(|(section, name)| !section.is_empty() && !name.is_empty())
        .ok_or_else(|| anyhow!("the section of {key} is missing, expect: {{section}}.{key}"))
}

// Booleans keep their type so the typed view deserializes cleanly;
// everything else stays a string.
fn parse_value(value: &str) -> Value {
    match value {
        "true" => Value::Boolean(true),
        "false" => Value::Boolean(false),
        other => Value::String(other.to_string()),
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn merge_tables(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Table(base), Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) => merge_tables(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn configurator(dir: &std::path::Path) -> Configurator {
        Configurator::new(dir.join("config"), PersistentConfig::default()).unwrap()
    }

    #[test]
    fn set_get_round_trips() {
        let tmp = TempDir::new().unwrap();
        let config = configurator(tmp.path());

        config
            .set("command.repo", "https://github.com/g/r.git")
            .unwrap();
        assert_eq!(
            config.get("command.repo").unwrap(),
            "https://github.com/g/r.git"
        );
        assert_eq!(config.load().command.repo, "https://github.com/g/r.git");
    }

    #[test]
    fn booleans_deserialize_into_the_typed_view() {
        let tmp = TempDir::new().unwrap();
        let config = configurator(tmp.path());
        config.set("update.always", "true").unwrap();
        assert!(config.load().update.always);
        assert_eq!(config.get("update.always").unwrap(), "true");
    }

    #[test]
    fn empty_values_unset_keys() {
        let tmp = TempDir::new().unwrap();
        let config = configurator(tmp.path());
        config.set("command.path", "/somewhere").unwrap();
        config.set("command.path", "").unwrap();
        assert_eq!(config.get("command.path").unwrap(), "");
        assert!(config.load().command.path.is_empty());
    }

    #[test]
    fn defaults_show_through_until_overridden() {
        let tmp = TempDir::new().unwrap();
        let defaults = PersistentConfig {
            command: CommandConfig {
                repo: "https://github.com/modern-devops/plugins.git".to_string(),
                ..CommandConfig::default()
            },
            ..PersistentConfig::default()
        };
        let config = Configurator::new(tmp.path().join("config"), defaults).unwrap();
        assert_eq!(
            config.load().command.repo,
            "https://github.com/modern-devops/plugins.git"
        );
        config.set("command.repo", "https://other/r.git").unwrap();
        assert_eq!(config.load().command.repo, "https://other/r.git");
    }

    #[test]
    fn sectionless_and_unknown_keys_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let config = configurator(tmp.path());
        assert!(config.set("always", "true").is_err());
        assert!(config.set("nosuch.key", "x").is_err());
        assert!(config.get("nosuch.key").is_err());
    }

    #[test]
    fn listings_cover_used_and_usable() {
        let tmp = TempDir::new().unwrap();
        let config = configurator(tmp.path());
        assert!(config.list_used().unwrap().is_empty());
        assert_eq!(config.list_usable().len(), USABLE_CONFIGS.len());

        config.set("update.always", "true").unwrap();
        let used = config.list_used().unwrap();
        assert_eq!(used.len(), 1);
        assert_eq!(used[0].key, "update.always");
        assert_eq!(used[0].value, "true");
        assert!(!used[0].comment.is_empty());
    }
}
