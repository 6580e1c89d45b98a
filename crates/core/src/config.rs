use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::flows::states::{ChannelFlows, FlowKind};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub telegram: TelegramConfig,
    pub whatsapp: WhatsappConfig,
    pub llm: LlmConfig,
    pub transcription: TranscriptionConfig,
    pub email: EmailConfig,
    pub session: SessionConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct TelegramConfig {
    pub enabled: bool,
    pub bot_token: SecretString,
    pub api_base_url: String,
    pub flow: FlowKind,
}

#[derive(Clone, Debug)]
pub struct WhatsappConfig {
    pub enabled: bool,
    pub account_sid: String,
    pub auth_token: SecretString,
    pub from_number: String,
    pub api_base_url: String,
    pub flow: FlowKind,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct TranscriptionConfig {
    pub enabled: bool,
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
    pub language: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct EmailConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<SecretString>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub ttl_hours: u32,
    pub recent_proposals_limit: u32,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
    pub internal_token: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub server_port: Option<u16>,
    pub session_ttl_hours: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://propbot.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            telegram: TelegramConfig {
                enabled: true,
                bot_token: String::new().into(),
                api_base_url: "https://api.telegram.org".to_string(),
                flow: FlowKind::AiAssisted,
            },
            whatsapp: WhatsappConfig {
                enabled: false,
                account_sid: String::new(),
                auth_token: String::new().into(),
                from_number: String::new(),
                api_base_url: "https://api.twilio.com".to_string(),
                flow: FlowKind::Structured,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 30,
                max_retries: 1,
            },
            transcription: TranscriptionConfig {
                enabled: false,
                api_key: None,
                base_url: "https://api.openai.com/v1".to_string(),
                model: "whisper-1".to_string(),
                language: "pt".to_string(),
                timeout_secs: 60,
            },
            email: EmailConfig { endpoint: None, api_key: None, timeout_secs: 15 },
            session: SessionConfig { ttl_hours: 24, recent_proposals_limit: 10 },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
                internal_token: None,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|anthropic|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("propbot.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn channel_flows(&self) -> ChannelFlows {
        ChannelFlows { telegram: self.telegram.flow, whatsapp: self.whatsapp.flow }
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.session.ttl_hours))
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(telegram) = patch.telegram {
            if let Some(enabled) = telegram.enabled {
                self.telegram.enabled = enabled;
            }
            if let Some(bot_token) = telegram.bot_token {
                self.telegram.bot_token = secret_value(bot_token);
            }
            if let Some(api_base_url) = telegram.api_base_url {
                self.telegram.api_base_url = api_base_url;
            }
            if let Some(flow) = telegram.flow {
                self.telegram.flow = flow;
            }
        }

        if let Some(whatsapp) = patch.whatsapp {
            if let Some(enabled) = whatsapp.enabled {
                self.whatsapp.enabled = enabled;
            }
            if let Some(account_sid) = whatsapp.account_sid {
                self.whatsapp.account_sid = account_sid;
            }
            if let Some(auth_token) = whatsapp.auth_token {
                self.whatsapp.auth_token = secret_value(auth_token);
            }
            if let Some(from_number) = whatsapp.from_number {
                self.whatsapp.from_number = from_number;
            }
            if let Some(api_base_url) = whatsapp.api_base_url {
                self.whatsapp.api_base_url = api_base_url;
            }
            if let Some(flow) = whatsapp.flow {
                self.whatsapp.flow = flow;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(transcription) = patch.transcription {
            if let Some(enabled) = transcription.enabled {
                self.transcription.enabled = enabled;
            }
            if let Some(api_key) = transcription.api_key {
                self.transcription.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = transcription.base_url {
                self.transcription.base_url = base_url;
            }
            if let Some(model) = transcription.model {
                self.transcription.model = model;
            }
            if let Some(language) = transcription.language {
                self.transcription.language = language;
            }
            if let Some(timeout_secs) = transcription.timeout_secs {
                self.transcription.timeout_secs = timeout_secs;
            }
        }

        if let Some(email) = patch.email {
            if let Some(endpoint) = email.endpoint {
                self.email.endpoint = Some(endpoint);
            }
            if let Some(api_key) = email.api_key {
                self.email.api_key = Some(secret_value(api_key));
            }
            if let Some(timeout_secs) = email.timeout_secs {
                self.email.timeout_secs = timeout_secs;
            }
        }

        if let Some(session) = patch.session {
            if let Some(ttl_hours) = session.ttl_hours {
                self.session.ttl_hours = ttl_hours;
            }
            if let Some(limit) = session.recent_proposals_limit {
                self.session.recent_proposals_limit = limit;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
            if let Some(internal_token) = server.internal_token {
                self.server.internal_token = Some(secret_value(internal_token));
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PROPBOT_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("PROPBOT_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("PROPBOT_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("PROPBOT_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("PROPBOT_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PROPBOT_TELEGRAM_ENABLED") {
            self.telegram.enabled = parse_bool("PROPBOT_TELEGRAM_ENABLED", &value)?;
        }
        if let Some(value) = read_env("PROPBOT_TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = secret_value(value);
        }
        if let Some(value) = read_env("PROPBOT_TELEGRAM_API_BASE_URL") {
            self.telegram.api_base_url = value;
        }
        if let Some(value) = read_env("PROPBOT_TELEGRAM_FLOW") {
            self.telegram.flow = parse_flow("PROPBOT_TELEGRAM_FLOW", &value)?;
        }

        if let Some(value) = read_env("PROPBOT_WHATSAPP_ENABLED") {
            self.whatsapp.enabled = parse_bool("PROPBOT_WHATSAPP_ENABLED", &value)?;
        }
        if let Some(value) = read_env("PROPBOT_WHATSAPP_ACCOUNT_SID") {
            self.whatsapp.account_sid = value;
        }
        if let Some(value) = read_env("PROPBOT_WHATSAPP_AUTH_TOKEN") {
            self.whatsapp.auth_token = secret_value(value);
        }
        if let Some(value) = read_env("PROPBOT_WHATSAPP_FROM_NUMBER") {
            self.whatsapp.from_number = value;
        }
        if let Some(value) = read_env("PROPBOT_WHATSAPP_API_BASE_URL") {
            self.whatsapp.api_base_url = value;
        }
        if let Some(value) = read_env("PROPBOT_WHATSAPP_FLOW") {
            self.whatsapp.flow = parse_flow("PROPBOT_WHATSAPP_FLOW", &value)?;
        }

        if let Some(value) = read_env("PROPBOT_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("PROPBOT_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("PROPBOT_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("PROPBOT_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("PROPBOT_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("PROPBOT_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("PROPBOT_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("PROPBOT_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("PROPBOT_TRANSCRIPTION_ENABLED") {
            self.transcription.enabled = parse_bool("PROPBOT_TRANSCRIPTION_ENABLED", &value)?;
        }
        if let Some(value) = read_env("PROPBOT_TRANSCRIPTION_API_KEY") {
            self.transcription.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("PROPBOT_TRANSCRIPTION_BASE_URL") {
            self.transcription.base_url = value;
        }
        if let Some(value) = read_env("PROPBOT_TRANSCRIPTION_MODEL") {
            self.transcription.model = value;
        }

        if let Some(value) = read_env("PROPBOT_EMAIL_ENDPOINT") {
            self.email.endpoint = Some(value);
        }
        if let Some(value) = read_env("PROPBOT_EMAIL_API_KEY") {
            self.email.api_key = Some(secret_value(value));
        }

        if let Some(value) = read_env("PROPBOT_SESSION_TTL_HOURS") {
            self.session.ttl_hours = parse_u32("PROPBOT_SESSION_TTL_HOURS", &value)?;
        }

        if let Some(value) = read_env("PROPBOT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("PROPBOT_SERVER_PORT") {
            self.server.port = parse_u16("PROPBOT_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("PROPBOT_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("PROPBOT_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }
        if let Some(value) = read_env("PROPBOT_SERVER_INTERNAL_TOKEN") {
            self.server.internal_token = Some(secret_value(value));
        }

        let log_level =
            read_env("PROPBOT_LOGGING_LEVEL").or_else(|| read_env("PROPBOT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PROPBOT_LOGGING_FORMAT").or_else(|| read_env("PROPBOT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(bot_token) = overrides.telegram_bot_token {
            self.telegram.bot_token = secret_value(bot_token);
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(ttl_hours) = overrides.session_ttl_hours {
            self.session.ttl_hours = ttl_hours;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_channels(&self.telegram, &self.whatsapp)?;
        validate_llm(&self.llm)?;
        validate_transcription(&self.transcription)?;
        validate_email(&self.email)?;
        validate_session(&self.session)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("propbot.toml"), PathBuf::from("config/propbot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_channels(
    telegram: &TelegramConfig,
    whatsapp: &WhatsappConfig,
) -> Result<(), ConfigError> {
    if !telegram.enabled && !whatsapp.enabled {
        return Err(ConfigError::Validation(
            "at least one channel must be enabled (telegram.enabled or whatsapp.enabled)"
                .to_string(),
        ));
    }

    if telegram.enabled {
        let token = telegram.bot_token.expose_secret();
        if token.trim().is_empty() {
            return Err(ConfigError::Validation(
                "telegram.bot_token is required when telegram is enabled. Get it from @BotFather \
                 with /newbot or /token"
                    .to_string(),
            ));
        }
        let well_formed = token
            .split_once(':')
            .is_some_and(|(bot_id, secret)| {
                !bot_id.is_empty()
                    && bot_id.chars().all(|ch| ch.is_ascii_digit())
                    && !secret.is_empty()
            });
        if !well_formed {
            return Err(ConfigError::Validation(
                "telegram.bot_token must look like `<bot id>:<secret>` as issued by @BotFather"
                    .to_string(),
            ));
        }
        validate_http_url("telegram.api_base_url", &telegram.api_base_url)?;
    }

    if whatsapp.enabled {
        if !whatsapp.account_sid.starts_with("AC") {
            return Err(ConfigError::Validation(
                "whatsapp.account_sid must be a Twilio account SID starting with `AC`".to_string(),
            ));
        }
        if whatsapp.auth_token.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation(
                "whatsapp.auth_token is required when whatsapp is enabled".to_string(),
            ));
        }
        if whatsapp.from_number.trim().is_empty() {
            return Err(ConfigError::Validation(
                "whatsapp.from_number is required (e.g. `whatsapp:+14155238886`)".to_string(),
            ));
        }
        validate_http_url("whatsapp.api_base_url", &whatsapp.api_base_url)?;
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::OpenAi | LlmProvider::Anthropic => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for openai/anthropic providers".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_transcription(transcription: &TranscriptionConfig) -> Result<(), ConfigError> {
    if !transcription.enabled {
        return Ok(());
    }

    let missing_key = transcription
        .api_key
        .as_ref()
        .map(|value| value.expose_secret().trim().is_empty())
        .unwrap_or(true);
    if missing_key {
        return Err(ConfigError::Validation(
            "transcription.api_key is required when transcription is enabled".to_string(),
        ));
    }
    if transcription.timeout_secs == 0 || transcription.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "transcription.timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    validate_http_url("transcription.base_url", &transcription.base_url)
}

fn validate_email(email: &EmailConfig) -> Result<(), ConfigError> {
    if let Some(endpoint) = &email.endpoint {
        validate_http_url("email.endpoint", endpoint)?;
    }
    if email.timeout_secs == 0 || email.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "email.timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    Ok(())
}

fn validate_session(session: &SessionConfig) -> Result<(), ConfigError> {
    if session.ttl_hours == 0 || session.ttl_hours > 24 * 30 {
        return Err(ConfigError::Validation(
            "session.ttl_hours must be in range 1..=720".to_string(),
        ));
    }
    if session.recent_proposals_limit == 0 || session.recent_proposals_limit > 50 {
        return Err(ConfigError::Validation(
            "session.recent_proposals_limit must be in range 1..=50".to_string(),
        ));
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_http_url(key: &str, value: &str) -> Result<(), ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!("{key} must start with http:// or https://")))
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_flow(key: &str, value: &str) -> Result<FlowKind, ConfigError> {
    value.parse::<FlowKind>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    telegram: Option<TelegramPatch>,
    whatsapp: Option<WhatsappPatch>,
    llm: Option<LlmPatch>,
    transcription: Option<TranscriptionPatch>,
    email: Option<EmailPatch>,
    session: Option<SessionPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TelegramPatch {
    enabled: Option<bool>,
    bot_token: Option<String>,
    api_base_url: Option<String>,
    flow: Option<FlowKind>,
}

#[derive(Debug, Default, Deserialize)]
struct WhatsappPatch {
    enabled: Option<bool>,
    account_sid: Option<String>,
    auth_token: Option<String>,
    from_number: Option<String>,
    api_base_url: Option<String>,
    flow: Option<FlowKind>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct TranscriptionPatch {
    enabled: Option<bool>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    language: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct EmailPatch {
    endpoint: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionPatch {
    ttl_hours: Option<u32>,
    recent_proposals_limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
    internal_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
