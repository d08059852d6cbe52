use std::{collections::HashMap, fs, path::Path, path::PathBuf, time::Duration};

use anyhow::Context;
use gemini_integration::{
    GeminiConfig, DEFAULT_ASPECT_RATIO, DEFAULT_BASE_URL, DEFAULT_EDIT_MODEL,
    DEFAULT_GENERATE_MODEL, DEFAULT_OUTPUT_MIME_TYPE,
};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_key: Option<String>,
    pub api_base_url: String,
    pub generate_model: String,
    pub edit_model: String,
    pub aspect_ratio: String,
    pub output_dir: PathBuf,
    pub request_timeout_seconds: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base_url: DEFAULT_BASE_URL.into(),
            generate_model: DEFAULT_GENERATE_MODEL.into(),
            edit_model: DEFAULT_EDIT_MODEL.into(),
            aspect_ratio: DEFAULT_ASPECT_RATIO.into(),
            output_dir: PathBuf::from("."),
            request_timeout_seconds: None,
        }
    }
}

impl Settings {
    pub fn gemini_config(&self) -> anyhow::Result<GeminiConfig> {
        let base_url = Url::parse(&self.api_base_url)
            .with_context(|| format!("invalid api base url '{}'", self.api_base_url))?;
        Ok(GeminiConfig {
            api_key: self.api_key.clone(),
            base_url,
            generate_model: self.generate_model.clone(),
            edit_model: self.edit_model.clone(),
            aspect_ratio: self.aspect_ratio.clone(),
            output_mime_type: DEFAULT_OUTPUT_MIME_TYPE.into(),
            request_timeout: self.request_timeout_seconds.map(Duration::from_secs),
        })
    }
}

/// Defaults, then `config_path` if it exists, then environment variables.
pub fn load_settings(config_path: &Path) -> Settings {
    load_settings_from(config_path, |key| std::env::var(key).ok())
}

fn load_settings_from(config_path: &Path, env: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(config_path) {
        match toml::from_str::<HashMap<String, toml::Value>>(&raw) {
            Ok(file_cfg) => apply_file_settings(&mut settings, &file_cfg),
            Err(err) => tracing::warn!(
                path = %config_path.display(),
                "ignoring unreadable config file: {err}"
            ),
        }
    }

    for key in ["API_KEY", "GEMINI_API_KEY", "APP__GEMINI_API_KEY"] {
        if let Some(v) = env(key).filter(|v| !v.trim().is_empty()) {
            settings.api_key = Some(v);
        }
    }
    if let Some(v) = env("APP__API_BASE_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = env("APP__GENERATE_MODEL") {
        settings.generate_model = v;
    }
    if let Some(v) = env("APP__EDIT_MODEL") {
        settings.edit_model = v;
    }
    if let Some(v) = env("APP__ASPECT_RATIO") {
        settings.aspect_ratio = v;
    }
    if let Some(v) = env("APP__OUTPUT_DIR") {
        settings.output_dir = PathBuf::from(v);
    }
    if let Some(v) = env("APP__REQUEST_TIMEOUT_SECONDS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.request_timeout_seconds = Some(parsed);
        }
    }

    settings
}

fn apply_file_settings(settings: &mut Settings, file_cfg: &HashMap<String, toml::Value>) {
    let string = |key: &str| file_cfg.get(key).and_then(|v| v.as_str()).map(str::to_string);

    if let Some(v) = string("api_key").filter(|v| !v.trim().is_empty()) {
        settings.api_key = Some(v);
    }
    if let Some(v) = string("api_base_url") {
        settings.api_base_url = v;
    }
    if let Some(v) = string("generate_model") {
        settings.generate_model = v;
    }
    if let Some(v) = string("edit_model") {
        settings.edit_model = v;
    }
    if let Some(v) = string("aspect_ratio") {
        settings.aspect_ratio = v;
    }
    if let Some(v) = string("output_dir") {
        settings.output_dir = PathBuf::from(v);
    }
    if let Some(v) = file_cfg
        .get("request_timeout_seconds")
        .and_then(|v| v.as_integer())
        .and_then(|v| u64::try_from(v).ok())
    {
        settings.request_timeout_seconds = Some(v);
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
