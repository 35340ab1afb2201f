use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::sync::Arc;

/// Which model tier the analysis pipeline requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BotMode {
    #[serde(rename = "TEST")]
    Test,
    #[serde(rename = "DEPLOYMENT")]
    Deployment,
}

impl std::fmt::Display for BotMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BotMode::Test => "TEST",
            BotMode::Deployment => "DEPLOYMENT",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for BotMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "TEST" => Ok(BotMode::Test),
            "DEPLOYMENT" => Ok(BotMode::Deployment),
            other => anyhow::bail!("Unknown bot mode '{}' (expected TEST or DEPLOYMENT)", other),
        }
    }
}

/// Mode → model id mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMapping {
    pub test: String,
    pub deployment: String,
}

impl Default for ModelMapping {
    fn default() -> Self {
        Self {
            test: "gpt-4o-mini".to_string(),
            deployment: "gpt-4o".to_string(),
        }
    }
}

impl ModelMapping {
    pub fn model_for(&self, mode: BotMode) -> &str {
        match mode {
            BotMode::Test => &self.test,
            BotMode::Deployment => &self.deployment,
        }
    }
}

/// Shared, last-writer-wins mode flag. Cloning shares the same flag.
#[derive(Debug, Clone)]
pub struct ModeHandle {
    inner: Arc<RwLock<BotMode>>,
}

impl ModeHandle {
    pub fn new(mode: BotMode) -> Self {
        Self {
            inner: Arc::new(RwLock::new(mode)),
        }
    }

    pub fn current(&self) -> BotMode {
        *self.inner.read()
    }

    pub fn set_mode(&self, mode: BotMode) {
        *self.inner.write() = mode;
        log::info!("⚙️ [Config] Switched to {} mode", mode);
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub telegram_token: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub models: ModelMapping,
    pub max_tokens: u32,
    pub initial_mode: BotMode,
    pub dashboard_addr: String,
    pub admin_token: String,
    pub auto_start: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let telegram_token = env::var("TELEGRAM_BOT_TOKEN")
            .context("TELEGRAM_BOT_TOKEN must be set in .env file")?;

        let openai_api_key = match env::var("OPENAI_API_KEY") {
            Ok(key) => key,
            Err(_) => {
                let encrypted = env::var("OPENAI_API_KEY_ENC")
                    .context("OPENAI_API_KEY or OPENAI_API_KEY_ENC must be set in .env file")?;
                let secret = env::var("CONFIG_SECRET")
                    .context("CONFIG_SECRET is required to decode OPENAI_API_KEY_ENC")?;
                xor_decrypt(&encrypted, &secret)?
            }
        };

        let openai_base_url = env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

        let defaults = ModelMapping::default();
        let models = ModelMapping {
            test: env::var("TEST_MODEL").unwrap_or(defaults.test),
            deployment: env::var("DEPLOYMENT_MODEL").unwrap_or(defaults.deployment),
        };

        let max_tokens = match env::var("OPENAI_MAX_TOKENS") {
            Ok(value) => value
                .parse::<u32>()
                .context("OPENAI_MAX_TOKENS must be a positive number")?,
            Err(_) => 6000,
        };

        let initial_mode = match env::var("BOT_MODE") {
            Ok(value) => value.parse()?,
            Err(_) => BotMode::Test,
        };

        let dashboard_addr =
            env::var("DASHBOARD_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let admin_token = env::var("ADMIN_TOKEN").unwrap_or_else(|_| {
            log::warn!("⚠️ ADMIN_TOKEN not set, using default 'admin123' (INSECURE!)");
            "admin123".to_string()
        });

        let auto_start = env::var("AUTO_START")
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            telegram_token,
            openai_api_key,
            openai_base_url,
            models,
            max_tokens,
            initial_mode,
            dashboard_addr,
            admin_token,
            auto_start,
        })
    }
}

/// Decodes a base64 string XOR-ed with a repeating key.
///
/// Each decoded byte is one character code and is XOR-ed with a UTF-16 code
/// unit of the key, so non-ASCII keys and Latin-1 plaintext decode the same
/// way the browser-side encoder produced them.
pub fn xor_decrypt(encoded: &str, key: &str) -> Result<String> {
    let key: Vec<u16> = key.encode_utf16().collect();
    if key.is_empty() {
        anyhow::bail!("Decryption key is empty");
    }
    let bytes = general_purpose::STANDARD
        .decode(encoded.trim())
        .context("Encrypted value is not valid base64")?;
    let units: Vec<u16> = bytes
        .iter()
        .enumerate()
        .map(|(i, b)| u16::from(*b) ^ key[i % key.len()])
        .collect();
    String::from_utf16(&units).context("Decrypted value is not valid text")
}
