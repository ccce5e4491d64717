//! Configuration for pagebot.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (FACEBOOK_*, GEMINI_*, PAGEBOT_*, CHECK_INTERVAL_SECONDS)
//! 2. Config file (.pagebot/config.yaml)
//! 3. Defaults (~/.pagebot)
//!
//! Config file discovery:
//! - Searches current directory and parents for .pagebot/config.yaml
//! - Paths in config file are relative to the .pagebot/ directory

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

use crate::adapters::gemini::{DEFAULT_GEMINI_API_BASE, DEFAULT_GEMINI_MODEL};
use crate::adapters::graph::DEFAULT_GRAPH_API_BASE;
use crate::adapters::{GeminiConfig, GraphConfig};
use crate::core::{PipelineSettings, MAX_CONTEXT_WINDOW};
use crate::webhook::WebhookConfig;

pub const DEFAULT_VERIFY_TOKEN: &str = "pagebot_verify";
pub const DEFAULT_BIND: &str = "0.0.0.0:8080";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub facebook: FacebookSection,
    #[serde(default)]
    pub gemini: GeminiSection,
    #[serde(default)]
    pub bot: BotSection,
    #[serde(default)]
    pub business: Option<BusinessInfo>,
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub server: ServerSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FacebookSection {
    pub page_id: Option<String>,
    pub access_token: Option<String>,
    pub app_secret: Option<String>,
    pub verify_token: Option<String>,
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeminiSection {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BotSection {
    pub check_interval_seconds: Option<u64>,
    pub call_timeout_seconds: Option<u64>,
    pub workers: Option<usize>,
    pub post_limit: Option<usize>,
    pub comment_limit: Option<usize>,
    pub conversation_limit: Option<usize>,
    pub context_window: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsSection {
    /// State directory (relative to .pagebot/)
    pub home: Option<String>,
    /// Ledger database file (relative to .pagebot/)
    pub database: Option<String>,
    /// Persona prompt file (relative to .pagebot/)
    pub persona: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerSection {
    pub bind: Option<String>,
}

/// Business facts woven into the default persona
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BusinessInfo {
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub hours: Option<String>,
}

impl Default for BusinessInfo {
    fn default() -> Self {
        Self {
            name: "our business".to_string(),
            location: None,
            hours: None,
        }
    }
}

/// Platform credentials and endpoints
#[derive(Debug, Clone)]
pub struct FacebookSettings {
    pub page_id: Option<String>,
    pub access_token: Option<String>,
    pub app_secret: Option<String>,
    pub verify_token: String,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub api_key: Option<String>,
    pub model: String,
    pub api_base: String,
}

/// Pipeline and scheduler tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotSettings {
    pub check_interval_seconds: u64,
    pub call_timeout_seconds: u64,
    pub workers: usize,
    pub post_limit: usize,
    pub comment_limit: usize,
    pub conversation_limit: usize,
    pub context_window: usize,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            check_interval_seconds: 60,
            call_timeout_seconds: 30,
            workers: 4,
            post_limit: 10,
            comment_limit: 100,
            conversation_limit: 25,
            context_window: MAX_CONTEXT_WINDOW,
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct Config {
    /// State directory
    pub home: PathBuf,
    /// Ledger database path
    pub database: PathBuf,
    /// Persona prompt file, if configured
    pub persona_file: Option<PathBuf>,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub facebook: FacebookSettings,
    pub gemini: GeminiSettings,
    pub bot: BotSettings,
    pub business: BusinessInfo,
    /// Webhook server listen address
    pub bind: String,
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".pagebot").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: Option<String>) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.map(|value| {
        value
            .trim()
            .parse::<T>()
            .with_context(|| format!("{} must be a whole number, got '{}'", name, value))
    })
    .transpose()
}

impl Config {
    /// Load configuration from the process environment and config file
    pub fn load() -> Result<Self> {
        let file = match find_config_file() {
            Some(path) => {
                let parsed = load_config_file(&path)?;
                Some((path, parsed))
            }
            None => None,
        };
        let default_home = dirs::home_dir()
            .context("Failed to determine home directory")?
            .join(".pagebot");

        Self::resolve(file, default_home, |name| std::env::var(name).ok())
    }

    /// Merge sources; `env` looks up one variable
    pub fn resolve<E>(
        file: Option<(PathBuf, ConfigFile)>,
        default_home: PathBuf,
        env: E,
    ) -> Result<Self>
    where
        E: Fn(&str) -> Option<String>,
    {
        // Blank variables count as unset
        let var = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        let (config_file, raw) = match file {
            Some((path, raw)) => (Some(path), raw),
            None => (None, ConfigFile::default()),
        };
        // Relative paths in the file hang off the .pagebot/ directory
        let config_dir = config_file
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf);
        let from_file = |value: &Option<String>| -> Option<PathBuf> {
            let value = value.as_deref()?;
            Some(match &config_dir {
                Some(dir) => resolve_path(dir, value),
                None => PathBuf::from(value),
            })
        };

        let home = var("PAGEBOT_HOME")
            .map(PathBuf::from)
            .or_else(|| from_file(&raw.paths.home))
            .unwrap_or(default_home);
        let database = var("PAGEBOT_DATABASE")
            .map(PathBuf::from)
            .or_else(|| from_file(&raw.paths.database))
            .unwrap_or_else(|| home.join("ledger.db"));
        let persona_file = var("PAGEBOT_PERSONA")
            .map(PathBuf::from)
            .or_else(|| from_file(&raw.paths.persona));

        let facebook = FacebookSettings {
            page_id: var("FACEBOOK_PAGE_ID").or(raw.facebook.page_id),
            access_token: var("FACEBOOK_PAGE_ACCESS_TOKEN").or(raw.facebook.access_token),
            app_secret: var("FACEBOOK_APP_SECRET").or(raw.facebook.app_secret),
            verify_token: var("FACEBOOK_VERIFY_TOKEN")
                .or(raw.facebook.verify_token)
                .unwrap_or_else(|| DEFAULT_VERIFY_TOKEN.to_string()),
            api_base: raw
                .facebook
                .api_base
                .unwrap_or_else(|| DEFAULT_GRAPH_API_BASE.to_string()),
        };

        let gemini = GeminiSettings {
            api_key: var("GEMINI_API_KEY").or(raw.gemini.api_key),
            model: var("GEMINI_MODEL")
                .or(raw.gemini.model)
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            api_base: raw
                .gemini
                .api_base
                .unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string()),
        };

        let defaults = BotSettings::default();
        let bot = BotSettings {
            check_interval_seconds: parse_number(
                "CHECK_INTERVAL_SECONDS",
                var("CHECK_INTERVAL_SECONDS"),
            )?
            .or(raw.bot.check_interval_seconds)
                .unwrap_or(defaults.check_interval_seconds),
            call_timeout_seconds: raw
                .bot
                .call_timeout_seconds
                .unwrap_or(defaults.call_timeout_seconds),
            workers: raw.bot.workers.unwrap_or(defaults.workers).max(1),
            post_limit: raw.bot.post_limit.unwrap_or(defaults.post_limit),
            comment_limit: raw.bot.comment_limit.unwrap_or(defaults.comment_limit),
            conversation_limit: raw
                .bot
                .conversation_limit
                .unwrap_or(defaults.conversation_limit),
            context_window: raw
                .bot
                .context_window
                .unwrap_or(defaults.context_window)
                .clamp(1, MAX_CONTEXT_WINDOW),
        };

        Ok(Self {
            home,
            database,
            persona_file,
            config_file,
            facebook,
            gemini,
            bot,
            business: raw.business.unwrap_or_default(),
            bind: var("PAGEBOT_BIND")
                .or(raw.server.bind)
                .unwrap_or_else(|| DEFAULT_BIND.to_string()),
        })
    }

    /// Report every missing required value at once
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.facebook.page_id.is_none() {
            errors.push("FACEBOOK_PAGE_ID is not set");
        }
        if self.facebook.access_token.is_none() {
            errors.push("FACEBOOK_PAGE_ACCESS_TOKEN is not set");
        }
        if self.gemini.api_key.is_none() {
            errors.push("GEMINI_API_KEY is not set");
        }
        if self.bot.check_interval_seconds == 0 {
            errors.push("CHECK_INTERVAL_SECONDS must be greater than zero");
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors: {}", errors.join(", "));
        }
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.bot.check_interval_seconds)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.bot.call_timeout_seconds)
    }

    /// System instruction for generation
    ///
    /// Falls back to a persona built from the business info when no prompt
    /// file is configured or it cannot be read.
    pub fn persona(&self) -> String {
        if let Some(path) = &self.persona_file {
            match std::fs::read_to_string(path) {
                Ok(text) if !text.trim().is_empty() => return text,
                Ok(_) => warn!(path = %path.display(), "Persona file is empty, using default"),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Persona file unreadable, using default"
                    )
                }
            }
        }
        self.default_persona()
    }

    pub fn default_persona(&self) -> String {
        let business = &self.business;
        let mut persona = format!(
            "You are a friendly customer service assistant for {}",
            business.name
        );
        if let Some(location) = &business.location {
            persona.push_str(&format!(" in {}", location));
        }
        persona.push_str(".\n\nGuidelines:\n- Be warm, professional, and helpful\n");
        if let Some(hours) = &business.hours {
            persona.push_str(&format!("- Opening hours: {}\n", hours));
        }
        persona.push_str(
            "- If you don't know something, say you'll have someone get back to them\n\
             - Keep responses concise (1-3 sentences)\n\
             - Use emojis sparingly",
        );
        persona
    }

    pub fn graph_config(&self) -> Result<GraphConfig> {
        Ok(GraphConfig {
            api_base: self.facebook.api_base.clone(),
            page_id: self
                .facebook
                .page_id
                .clone()
                .context("FACEBOOK_PAGE_ID is not set")?,
            access_token: self
                .facebook
                .access_token
                .clone()
                .context("FACEBOOK_PAGE_ACCESS_TOKEN is not set")?,
            timeout: self.call_timeout(),
            comments_per_post: self.bot.comment_limit,
        })
    }

    pub fn gemini_config(&self) -> Result<GeminiConfig> {
        Ok(GeminiConfig {
            api_base: self.gemini.api_base.clone(),
            api_key: self
                .gemini
                .api_key
                .clone()
                .context("GEMINI_API_KEY is not set")?,
            model: self.gemini.model.clone(),
            timeout: self.call_timeout(),
        })
    }

    pub fn pipeline_settings(
        &self,
        own_id: impl Into<String>,
        persona: impl Into<String>,
    ) -> PipelineSettings {
        PipelineSettings {
            call_timeout: self.call_timeout(),
            workers: self.bot.workers,
            post_limit: self.bot.post_limit,
            comment_limit: self.bot.comment_limit,
            conversation_limit: self.bot.conversation_limit,
            context_window: self.bot.context_window,
            ..PipelineSettings::new(own_id, persona)
        }
    }

    pub fn webhook_config(&self) -> WebhookConfig {
        WebhookConfig {
            verify_token: self.facebook.verify_token.clone(),
            app_secret: self.facebook.app_secret.clone(),
        }
    }
}

/// Display form of a secret: only the last four characters survive
pub fn mask(secret: Option<&str>) -> String {
    match secret {
        None => "(not set)".to_string(),
        Some(s) if s.chars().count() <= 4 => "****".to_string(),
        Some(s) => {
            let tail: String = s.chars().skip(s.chars().count() - 4).collect();
            format!("****{}", tail)
        }
    }
}
