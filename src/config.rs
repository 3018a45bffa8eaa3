// src/config.rs
//
// Layered configuration:
//   defaults < <config_dir>/invarforge/config.toml < project file < env < CLI.
// Unreadable or malformed files are ignored, the same way a missing file is.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::forge::classify::ClassifierMode;
use crate::repair::Strategy;

pub const PROJECT_CONFIG: &str = "invarforge.toml";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAI,
    Anthropic,
}

impl Provider {
    pub fn parse(name: &str) -> Result<Self, String> {
        match name.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAI),
            "anthropic" => Ok(Provider::Anthropic),
            other => Err(format!("unknown provider: {other}")),
        }
    }

    fn key_var(self) -> &'static str {
        match self {
            Provider::OpenAI => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: Provider,
    pub model: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAI,
            model: "gpt-4o".into(),
            api_key: String::new(),
            base_url: None,
            request_timeout_secs: 1200,
            max_retries: 3,
            max_tokens: 8192,
            temperature: Some(0.0),
        }
    }
}

impl LlmConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    pub binary: String,
    pub extra_remappings: Vec<String>,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            binary: "forge".into(),
            extra_remappings: vec![
                "openzeppelin/contracts/=lib/openzeppelin-contracts/contracts/".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    pub budget_secs: u64,
    pub max_attempts: u32,
    pub workers: Option<usize>,
    pub strategy: Strategy,
    pub classifier: ClassifierMode,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            budget_secs: 36_000,
            max_attempts: 10,
            workers: None,
            strategy: Strategy::default(),
            classifier: ClassifierMode::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub contracts_dir: String,
    pub test_dir: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            contracts_dir: "src".into(),
            test_dir: "test".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub forge: ForgeConfig,
    pub repair: RepairConfig,
    pub layout: LayoutConfig,
}

impl AppConfig {
    /// Loads the layered configuration for `project`.
    ///
    /// `explicit` replaces the project-level file when given.
    pub fn load(project: &Path, explicit: Option<&Path>) -> Self {
        let project_file = explicit
            .map(Path::to_path_buf)
            .unwrap_or_else(|| project.join(PROJECT_CONFIG));

        let mut cfg = Self::load_from(&user_config_path(), &project_file);
        cfg.apply_env(|k| std::env::var(k).ok());
        cfg
    }

    /// File layers only: `project_file` over `user_file` over defaults.
    pub fn load_from(user_file: &Path, project_file: &Path) -> Self {
        let mut merged = toml::Value::Table(toml::map::Map::new());

        for path in [user_file, project_file] {
            if let Some(layer) = read_toml(path) {
                merge_toml(&mut merged, layer);
            }
        }

        merged.try_into().unwrap_or_default()
    }

    /// Environment overrides. `lookup` is `std::env::var` outside tests.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(p) = lookup("INVARFORGE_PROVIDER").and_then(|p| Provider::parse(&p).ok()) {
            self.llm.provider = p;
        }
        if let Some(model) = lookup("INVARFORGE_MODEL").filter(|m| !m.trim().is_empty()) {
            self.llm.model = model;
        }
        if let Some(key) = lookup(self.llm.provider.key_var()).filter(|k| !k.trim().is_empty()) {
            self.llm.api_key = key;
        }
    }

    /// Stores provider settings in the user-level file, keeping its other sections.
    pub fn save_llm(llm: &LlmConfig) -> Result<PathBuf, String> {
        let path = user_config_path();
        let mut cfg: AppConfig = read_toml(&path)
            .and_then(|v| v.try_into().ok())
            .unwrap_or_default();
        cfg.llm = llm.clone();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        let text = toml::to_string_pretty(&cfg).map_err(|e| e.to_string())?;
        fs::write(&path, text).map_err(|e| e.to_string())?;
        Ok(path)
    }
}

pub fn user_config_path() -> PathBuf {
    let mut dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    dir.push("invarforge");
    dir.push("config.toml");
    dir
}

fn read_toml(path: &Path) -> Option<toml::Value> {
    fs::read_to_string(path)
        .ok()
        .and_then(|s| toml::from_str(&s).ok())
}

/// Tables merge key by key; any other value in `overlay` replaces `base`.
fn merge_toml(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (k, v) in overlay {
                match base.get_mut(&k) {
                    Some(existing) => merge_toml(existing, v),
                    None => {
                        base.insert(k, v);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
