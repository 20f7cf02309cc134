use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::openai::{self, Settings as CompletionSettings};

/// Environment variable holding the OpenAI credential.
pub const OPENAI_API_KEY_VAR: &str = "OPENAI_API_KEY";

/// Upper bound for `completion_retries`.
pub const MAX_COMPLETION_RETRIES: u32 = 10;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file.
    #[error("failed to read config file '{}': {source}", .path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Failed to parse JSON.
    #[error("failed to parse config file '{}': {source}", .path.display())]
    ParseJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// Required environment variable is unset or empty.
    #[error("environment variable {0} is required")]
    MissingEnv(&'static str),
    /// Validation error.
    #[error("config validation error: {0}")]
    Validation(String),
}

#[derive(Deserialize)]
struct ConfigFile {
    whatsapp_access_token: String,
    /// Cloud API phone number ID (not the phone number itself)
    phone_number_id: String,
    /// Token Meta echoes back during webhook verification
    verify_token: String,
    /// App secret for X-Hub-Signature-256 checks. Unset = no signature checks.
    app_secret: Option<String>,
    #[serde(default = "default_graph_api_version")]
    graph_api_version: String,
    #[serde(default = "default_listen_addr")]
    listen_addr: String,
    #[serde(default = "default_knowledge_path")]
    knowledge_path: String,
    #[serde(default = "default_openai_model")]
    openai_model: String,
    #[serde(default = "default_openai_base_url")]
    openai_base_url: String,
    #[serde(default = "default_completion_timeout_secs")]
    completion_timeout_secs: u64,
    #[serde(default = "default_completion_retries")]
    completion_retries: u32,
    /// Directory for state files (logs). Defaults to current directory.
    data_dir: Option<String>,
}

fn default_graph_api_version() -> String {
    "v21.0".to_string()
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_knowledge_path() -> String {
    "knowledge.json".to_string()
}

fn default_openai_model() -> String {
    openai::DEFAULT_MODEL.to_string()
}

fn default_openai_base_url() -> String {
    openai::DEFAULT_BASE_URL.to_string()
}

fn default_completion_timeout_secs() -> u64 {
    30
}

fn default_completion_retries() -> u32 {
    2
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the config file.
    pub config_path: PathBuf,
    pub whatsapp_access_token: String,
    pub phone_number_id: String,
    pub verify_token: String,
    pub app_secret: Option<String>,
    pub graph_api_version: String,
    pub listen_addr: SocketAddr,
    /// Knowledge base file. Relative paths resolve against the config file's directory.
    pub knowledge_path: PathBuf,
    pub openai_api_key: String,
    pub openai_model: String,
    pub openai_base_url: String,
    pub completion_timeout: Duration,
    pub completion_retries: u32,
    /// Directory for state files (logs).
    pub data_dir: PathBuf,
}

impl Config {
    /// Load the config file and take the OpenAI key from the environment.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with_api_key(path, std::env::var(OPENAI_API_KEY_VAR).ok())
    }

    pub fn load_with_api_key<P: AsRef<Path>>(
        path: P,
        openai_api_key: Option<String>,
    ) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        let openai_api_key = openai_api_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingEnv(OPENAI_API_KEY_VAR))?;

        // Validate required fields
        if file.whatsapp_access_token.trim().is_empty() {
            return Err(ConfigError::Validation("whatsapp_access_token is required".into()));
        }
        if file.phone_number_id.is_empty() || !file.phone_number_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(ConfigError::Validation(
                "phone_number_id appears invalid (expected the numeric Cloud API phone number ID)".into(),
            ));
        }
        if file.verify_token.trim().is_empty() {
            return Err(ConfigError::Validation("verify_token is required".into()));
        }
        let listen_addr: SocketAddr = file.listen_addr.parse().map_err(|_| {
            ConfigError::Validation(format!(
                "listen_addr '{}' is not a socket address (expected e.g. 0.0.0.0:8080)",
                file.listen_addr
            ))
        })?;
        if file.completion_timeout_secs == 0 {
            return Err(ConfigError::Validation("completion_timeout_secs must be greater than 0".into()));
        }
        if file.completion_retries > MAX_COMPLETION_RETRIES {
            return Err(ConfigError::Validation(format!(
                "completion_retries must be at most {MAX_COMPLETION_RETRIES}"
            )));
        }

        let base_dir = config_path.parent().map(Path::to_path_buf).unwrap_or_default();
        let knowledge_path = {
            let p = PathBuf::from(&file.knowledge_path);
            if p.is_relative() { base_dir.join(p) } else { p }
        };

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            config_path,
            whatsapp_access_token: file.whatsapp_access_token,
            phone_number_id: file.phone_number_id,
            verify_token: file.verify_token,
            app_secret: file.app_secret.filter(|s| !s.is_empty()),
            graph_api_version: file.graph_api_version,
            listen_addr,
            knowledge_path,
            openai_api_key,
            openai_model: file.openai_model,
            openai_base_url: file.openai_base_url,
            completion_timeout: Duration::from_secs(file.completion_timeout_secs),
            completion_retries: file.completion_retries,
            data_dir,
        })
    }

    pub fn completion_settings(&self) -> CompletionSettings {
        CompletionSettings {
            model: self.openai_model.clone(),
            base_url: self.openai_base_url.clone(),
            timeout: self.completion_timeout,
            max_retries: self.completion_retries,
            ..CompletionSettings::new(self.openai_api_key.clone())
        }
    }
}
