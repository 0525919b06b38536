//! Configuration management commands.
//!
//! Stores CLI configuration in `~/.portal/config.toml`.

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::output::{self, OutputFormat};

pub const API_URL_KEY: &str = "api-url";
pub const ADMIN_TOKEN_KEY: &str = "admin-token";

const KNOWN_KEYS: &[&str] = &[API_URL_KEY, ADMIN_TOKEN_KEY];

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Set a configuration value
    Set {
        /// Configuration key (api-url or admin-token)
        key: String,
        /// Value to set
        value: String,
    },

    /// Get a configuration value
    Get {
        /// Configuration key
        key: String,
    },

    /// Show all configuration
    Show,

    /// Reset configuration to defaults
    Reset {
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },
}

/// Persistent CLI configuration stored on disk.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

impl CliConfig {
    /// Values safe to print; the admin token is masked.
    fn displayable(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .map(|(k, v)| {
                let shown = if k == ADMIN_TOKEN_KEY { mask(v) } else { v.clone() };
                (k.clone(), shown)
            })
            .collect()
    }
}

fn mask(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{}****", visible)
    }
}

fn check_key(key: &str) -> Result<()> {
    if KNOWN_KEYS.contains(&key) {
        Ok(())
    } else {
        anyhow::bail!(
            "Unknown configuration key '{}' (expected one of: {})",
            key,
            KNOWN_KEYS.join(", ")
        )
    }
}

/// Return the path to the configuration file (`~/.portal/config.toml`).
fn config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".portal").join("config.toml"))
}

fn load_from(path: &Path) -> Result<CliConfig> {
    if !path.exists() {
        return Ok(CliConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn save_to(path: &Path, cfg: &CliConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(cfg).context("Failed to serialize config")?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

fn load_config() -> Result<CliConfig> {
    load_from(&config_path()?)
}

/// Look up a stored value, ignoring a missing or unreadable file.
pub fn load_value(key: &str) -> Option<String> {
    load_config().ok().and_then(|cfg| cfg.values.get(key).cloned())
}

pub async fn execute(cmd: ConfigCommands, format: OutputFormat) -> Result<()> {
    match cmd {
        ConfigCommands::Set { key, value } => {
            check_key(&key)?;
            let path = config_path()?;
            let mut cfg = load_from(&path)?;
            cfg.values.insert(key.clone(), value.clone());
            save_to(&path, &cfg)?;

            let shown = if key == ADMIN_TOKEN_KEY { mask(&value) } else { value };
            match format {
                OutputFormat::Table => output::print_success(&format!("{} = {}", key, shown)),
                _ => output::print_item(&serde_json::json!({ "key": key, "value": shown }), format),
            }
        }

        ConfigCommands::Get { key } => {
            check_key(&key)?;
            let cfg = load_config()?;
            match cfg.displayable().get(&key) {
                Some(value) => match format {
                    OutputFormat::Table => println!("{}", value),
                    _ => output::print_item(
                        &serde_json::json!({ "key": key, "value": value }),
                        format,
                    ),
                },
                None => anyhow::bail!("Key '{}' is not set", key),
            }
        }

        ConfigCommands::Show => {
            let cfg = load_config()?;

            if cfg.values.is_empty() {
                output::print_info("No configuration values set.");
                return Ok(());
            }

            let values = cfg.displayable();
            match format {
                OutputFormat::Table => {
                    output::print_header("Configuration");
                    for (k, v) in &values {
                        output::print_detail(k, v);
                    }
                }
                _ => output::print_item(&values, format),
            }
        }

        ConfigCommands::Reset { force } => {
            if !force {
                output::print_info(
                    "This will reset all CLI configuration. Use --force to confirm.",
                );
                return Ok(());
            }

            let path = config_path()?;
            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }

            output::print_success("Configuration reset to defaults");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        assert!(load_from(&path).unwrap().values.is_empty());

        let mut cfg = CliConfig::default();
        cfg.values.insert(API_URL_KEY.into(), "http://portal:9000".into());
        save_to(&path, &cfg).unwrap();

        let loaded = load_from(&path).unwrap();
        assert_eq!(loaded.values.get(API_URL_KEY).unwrap(), "http://portal:9000");
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(check_key("api-url").is_ok());
        assert!(check_key("admin-token").is_ok());
        assert!(check_key("colour").is_err());
    }

    #[test]
    fn test_admin_token_masked() {
        let mut cfg = CliConfig::default();
        cfg.values.insert(ADMIN_TOKEN_KEY.into(), "s3cret-token".into());
        cfg.values.insert(API_URL_KEY.into(), "http://localhost:8080".into());

        let shown = cfg.displayable();
        assert_eq!(shown[ADMIN_TOKEN_KEY], "s3cr****");
        assert_eq!(shown[API_URL_KEY], "http://localhost:8080");
        assert_eq!(mask("abc"), "****");
    }
}
