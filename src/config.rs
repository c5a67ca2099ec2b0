use crate::conversation_store::{
    BoundedConversationStore, ConversationStore, MemoryConversationStore,
};
use crate::error::ConfigError;
use crate::relay::{
    ChatRelay, DEFAULT_MAX_OUTPUT_TOKENS, DEFAULT_MODEL, DEFAULT_TEMPERATURE, SamplingConfig,
};
use crate::upstream::OpenAIResponsesClient;
use clap::Parser;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[arg(
        long,
        default_value = "127.0.0.1",
        help = "Host address to bind the server to"
    )]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 3000, help = "Port number to listen on")]
    pub port: u16,

    #[arg(
        long,
        env = "OPENAI_API_KEY",
        hide_env_values = true,
        help = "Credential for the completion API"
    )]
    pub api_key: Option<String>,

    #[arg(
        long,
        env = "OPENAI_BASE_URL",
        default_value = DEFAULT_BASE_URL,
        help = "Base URL of the OpenAI-compatible Responses API"
    )]
    pub base_url: String,

    #[arg(
        long,
        env = "RELAY_MODEL",
        default_value = DEFAULT_MODEL,
        help = "Model used for every completion"
    )]
    pub model: String,

    #[arg(
        long,
        env = "RELAY_TEMPERATURE",
        default_value_t = DEFAULT_TEMPERATURE,
        help = "Sampling temperature (0.0-2.0)"
    )]
    pub temperature: f32,

    #[arg(
        long,
        env = "RELAY_MAX_OUTPUT_TOKENS",
        default_value_t = DEFAULT_MAX_OUTPUT_TOKENS,
        help = "Upper bound on tokens generated per reply"
    )]
    pub max_output_tokens: u32,

    #[arg(
        long,
        env = "RELAY_TIMEOUT",
        help = "Timeout in seconds for each upstream request; unset means no timeout"
    )]
    pub timeout: Option<u64>,

    #[arg(
        long,
        env = "RELAY_STORE_CAPACITY",
        help = "Maximum number of tracked conversations; unset means unbounded"
    )]
    pub store_capacity: Option<usize>,

    #[arg(
        long,
        env = "RELAY_STORE_TTL",
        help = "Seconds after which an idle conversation is forgotten"
    )]
    pub store_ttl: Option<u64>,

    #[arg(
        long,
        env = "RELAY_SERIALIZE_CONVERSATIONS",
        default_value_t = false,
        help = "Process requests for the same conversation one at a time"
    )]
    pub serialize_conversations: bool,

    #[arg(
        long,
        env = "RELAY_LOG_LEVEL",
        default_value = "info",
        help = "Log level: error, warn, info, debug or trace"
    )]
    pub log_level: log::LevelFilter,
}

impl Args {
    pub fn into_config(self) -> RelayConfig {
        RelayConfig {
            host: self.host,
            port: self.port,
            api_key: self.api_key,
            base_url: self.base_url,
            sampling: SamplingConfig {
                model: self.model,
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
            },
            timeout: self.timeout,
            store_capacity: self.store_capacity,
            store_ttl: self.store_ttl,
            serialize_conversations: self.serialize_conversations,
            log_level: self.log_level,
        }
    }
}

#[derive(Clone)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub api_key: Option<String>,
    pub base_url: String,
    pub sampling: SamplingConfig,
    pub timeout: Option<u64>,
    pub store_capacity: Option<usize>,
    pub store_ttl: Option<u64>,
    pub serialize_conversations: bool,
    pub log_level: log::LevelFilter,
}

impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("sampling", &self.sampling)
            .field("timeout", &self.timeout)
            .field("store_capacity", &self.store_capacity)
            .field("store_ttl", &self.store_ttl)
            .field("serialize_conversations", &self.serialize_conversations)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            sampling: SamplingConfig::default(),
            timeout: None,
            store_capacity: None,
            store_ttl: None,
            serialize_conversations: false,
            log_level: log::LevelFilter::Info,
        }
    }
}

// large enough that the ttl, not the capacity, decides eviction
const TTL_ONLY_CAPACITY: usize = 1 << 20;

impl RelayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.api_key {
            Some(key) if !key.trim().is_empty() => {}
            _ => return Err(ConfigError::MissingApiKey),
        }
        let temperature = self.sampling.temperature;
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::InvalidTemperature(temperature));
        }
        if self.sampling.max_output_tokens == 0 {
            return Err(ConfigError::ZeroMaxOutputTokens);
        }
        if self.store_capacity == Some(0) {
            return Err(ConfigError::ZeroStoreCapacity);
        }
        Ok(())
    }

    pub fn build_store(&self) -> Arc<dyn ConversationStore> {
        let ttl = self.store_ttl.map(Duration::from_secs);
        if self.store_capacity.is_none() && ttl.is_none() {
            return Arc::new(MemoryConversationStore::new());
        }
        Arc::new(BoundedConversationStore::new(
            self.store_capacity.unwrap_or(TTL_ONLY_CAPACITY),
            ttl,
        ))
    }

    /// Validates the config and wires the store, upstream client and relay.
    pub fn build_relay(&self) -> anyhow::Result<ChatRelay> {
        self.validate()?;
        let api_key = self.api_key.clone().unwrap_or_default();
        let client = OpenAIResponsesClient::new(
            api_key,
            self.base_url.clone(),
            self.timeout.map(Duration::from_secs),
        )?;
        let relay = ChatRelay::new(self.build_store(), Arc::new(client), self.sampling.clone())
            .with_serialized_conversations(self.serialize_conversations);
        Ok(relay)
    }
}
