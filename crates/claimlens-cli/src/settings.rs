use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};

pub const API_KEY_SETTING: &str = "insurance_app_api_key";
const SETTINGS_FILE: &str = "settings.json";

/// `$CLAIMLENS_HOME`, else `$HOME/.claimlens`.
pub fn claimlens_home() -> Result<PathBuf> {
    if let Some(home) = env::var_os("CLAIMLENS_HOME").filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    let home = env::var_os("HOME")
        .filter(|value| !value.is_empty())
        .context("neither CLAIMLENS_HOME nor HOME is set")?;
    Ok(PathBuf::from(home).join(".claimlens"))
}

/// The single API key persisted between runs, kept in `settings.json`
/// alongside whatever other settings the file already holds.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(SETTINGS_FILE),
        }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::in_dir(&claimlens_home()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<String>> {
        let settings = self.read_settings()?;
        Ok(settings
            .get(API_KEY_SETTING)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string))
    }

    pub fn save(&self, api_key: &str) -> Result<()> {
        let trimmed = api_key.trim();
        if trimmed.is_empty() {
            bail!("refusing to save an empty API key");
        }
        let mut settings = self.read_settings()?;
        settings.insert(API_KEY_SETTING.to_string(), Value::String(trimmed.to_string()));
        self.write_settings(&settings)?;
        log::info!("API_KEY_SAVED path={}", self.path.display());
        Ok(())
    }

    /// Returns whether a key was present.
    pub fn clear(&self) -> Result<bool> {
        let mut settings = self.read_settings()?;
        if settings.remove(API_KEY_SETTING).is_none() {
            return Ok(false);
        }
        self.write_settings(&settings)?;
        log::info!("API_KEY_CLEARED path={}", self.path.display());
        Ok(true)
    }

    fn read_settings(&self) -> Result<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed reading {}", self.path.display()))?;
        if raw.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&raw)
            .with_context(|| format!("invalid JSON in {}", self.path.display()))?
        {
            Value::Object(map) => Ok(map),
            _ => bail!("{} must hold a JSON object", self.path.display()),
        }
    }

    fn write_settings(&self, settings: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(settings)?)
            .with_context(|| format!("failed writing {}", self.path.display()))
    }
}

/// `sk-abcdef123456` -> `sk-a...3456`. Short keys are fully starred.
pub fn mask_key(api_key: &str) -> String {
    let chars: Vec<char> = api_key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}
