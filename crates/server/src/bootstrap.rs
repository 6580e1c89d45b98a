use std::sync::Arc;

use propbot_agent::commit::email_dispatcher_from_config;
use propbot_agent::extraction::{DisabledExtractor, LlmProposalExtractor, ProposalExtractor};
use propbot_agent::llm::client_from_config;
use propbot_agent::resilience::RetryPolicy;
use propbot_agent::transcription::transcriber_from_config;
use propbot_agent::{
    CommitError, ConversationRuntime, OperatorNotifier, ProposalCommitService, RuntimeDeps,
    TranscriptionError,
};
use propbot_channels::{TelegramTransport, TransportError, TransportSet, WhatsappTransport};
use propbot_core::config::{AppConfig, ConfigError};
use propbot_core::flows::ChannelLabels;
use propbot_core::ConversationMachine;
use propbot_db::{
    connect_with_settings, migrations, DbPool, OperatorDirectory, SqlOperatorDirectory,
    SqlProposalRepository, SqlSessionStore,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::audit::TracingAuditSink;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: Arc<ConversationRuntime>,
    pub notifier: Arc<OperatorNotifier>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("channel transport setup failed: {0}")]
    Transport(#[from] TransportError),
    #[error("transcription setup failed: {0}")]
    Transcription(#[from] TranscriptionError),
    #[error("email dispatcher setup failed: {0}")]
    Email(#[from] CommitError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let transports = transports_from_config(&config)?;
    let directory: Arc<dyn OperatorDirectory> = Arc::new(SqlOperatorDirectory::new(db_pool.clone()));
    let commits = Arc::new(ProposalCommitService::new(
        Arc::new(SqlProposalRepository::new(db_pool.clone())),
        email_dispatcher_from_config(&config.email)?,
        RetryPolicy::new(config.email.timeout_secs, config.llm.max_retries),
        config.session.recent_proposals_limit,
    ));

    let runtime = ConversationRuntime::new(RuntimeDeps {
        machine: ConversationMachine::new(ChannelLabels::default(), config.channel_flows()),
        sessions: Arc::new(SqlSessionStore::new(db_pool.clone(), config.session_ttl())),
        directory: directory.clone(),
        extractor: extractor_from_config(&config),
        transcriber: transcriber_from_config(&config.transcription, config.llm.max_retries)?,
        commits,
        transports: transports.clone(),
        audit: Arc::new(TracingAuditSink),
        session_ttl: config.session_ttl(),
    });
    info!(
        event_name = "system.bootstrap.runtime_ready",
        correlation_id = "bootstrap",
        channels = ?transports.channels(),
        llm_provider = ?config.llm.provider,
        transcription_enabled = config.transcription.enabled,
        "conversation runtime initialized"
    );

    Ok(Application {
        config,
        db_pool,
        runtime: Arc::new(runtime),
        notifier: Arc::new(OperatorNotifier::new(directory, transports)),
    })
}

fn transports_from_config(config: &AppConfig) -> Result<TransportSet, TransportError> {
    let mut transports = TransportSet::default();
    if config.telegram.enabled {
        transports = transports.with(Arc::new(TelegramTransport::new(
            &config.telegram.api_base_url,
            config.telegram.bot_token.clone(),
        )?));
    }
    if config.whatsapp.enabled {
        transports = transports.with(Arc::new(WhatsappTransport::new(
            &config.whatsapp.api_base_url,
            &config.whatsapp.account_sid,
            config.whatsapp.auth_token.clone(),
            &config.whatsapp.from_number,
        )?));
    }
    Ok(transports)
}

/// A broken LLM section degrades extraction instead of refusing to start; the structured
/// flow keeps working without a model.
fn extractor_from_config(config: &AppConfig) -> Arc<dyn ProposalExtractor> {
    match client_from_config(&config.llm) {
        Ok(client) => Arc::new(LlmProposalExtractor::new(
            client,
            RetryPolicy::new(config.llm.timeout_secs, config.llm.max_retries),
        )),
        Err(error) => {
            warn!(
                event_name = "system.bootstrap.llm_disabled",
                correlation_id = "bootstrap",
                error = %error,
                "llm client unavailable, free-text extraction disabled"
            );
            Arc::new(DisabledExtractor)
        }
    }
}

#[cfg(test)]
mod tests {
    use propbot_core::config::{AppConfig, ConfigOverrides, LlmProvider, LoadOptions};
    use propbot_core::Channel;

    use crate::bootstrap::{bootstrap_with_config, transports_from_config, Application, BootstrapError};

    async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
        bootstrap_with_config(AppConfig::load(options)?).await
    }

    fn valid_overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                telegram_bot_token: Some("123456:test-token".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_telegram_token() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                telegram_bot_token: Some("   ".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        assert!(result.is_err());
        let message = result.err().expect("error").to_string();
        assert!(message.contains("telegram.bot_token"));
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_wires_enabled_channels() {
        let app = bootstrap(valid_overrides("sqlite::memory:?cache=shared"))
            .await
            .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('chat_session', 'proposals', 'clients')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("expected proposal tables after bootstrap");
        assert_eq!(table_count, 3);

        assert_eq!(app.runtime.transports().channels(), vec![Channel::Telegram]);

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn hosted_llm_provider_requires_api_key() {
        let mut options = valid_overrides("sqlite::memory:");
        options.overrides.llm_provider = Some(LlmProvider::Anthropic);

        let message = bootstrap(options).await.err().expect("missing key").to_string();

        assert!(message.contains("llm.api_key"));
    }

    #[test]
    fn disabled_channels_get_no_transport() {
        let mut config = AppConfig::default();
        config.telegram.enabled = false;

        let transports = transports_from_config(&config).expect("transports");

        assert!(transports.get(Channel::Telegram).is_none());
        assert!(transports.get(Channel::Whatsapp).is_none());
    }
}
