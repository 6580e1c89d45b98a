use chrono::{DateTime, Duration, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use propbot_core::domain::draft::{ProposalDraft, DRAFT_SCHEMA_VERSION};
use propbot_core::{Channel, OperatorId, ProposalId, Session, SessionKey, Step};

use super::{format_timestamp, parse_timestamp, parse_u32, RepositoryError, SessionStore};
use crate::DbPool;

pub struct SqlSessionStore {
    pool: DbPool,
    ttl: Duration,
}

impl SqlSessionStore {
    pub fn new(pool: DbPool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[async_trait::async_trait]
impl SessionStore for SqlSessionStore {
    async fn load(
        &self,
        key: &SessionKey,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                channel,
                external_user_id,
                step,
                draft_json,
                draft_version,
                resolved_operator_id,
                last_proposal_id,
                extraction_failures,
                commit_pending,
                recent_message_ids_json,
                created_at,
                expires_at
             FROM chat_session
             WHERE channel = ? AND external_user_id = ?",
        )
        .bind(key.channel.as_str())
        .bind(&key.external_user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let session = session_from_row(row)?;
        if session.is_expired(now) {
            self.delete(key).await?;
            return Ok(None);
        }
        Ok(Some(session))
    }

    async fn save(
        &self,
        mut session: Session,
        now: DateTime<Utc>,
    ) -> Result<Session, RepositoryError> {
        session.expires_at = now + self.ttl;

        let draft_json = serde_json::to_string(&session.draft)
            .map_err(|error| RepositoryError::Decode(format!("draft serialization: {error}")))?;
        let recent_json = serde_json::to_string(&session.recent_message_ids).map_err(|error| {
            RepositoryError::Decode(format!("message id serialization: {error}"))
        })?;

        sqlx::query(
            "INSERT INTO chat_session (
                channel,
                external_user_id,
                step,
                draft_json,
                draft_version,
                resolved_operator_id,
                last_proposal_id,
                extraction_failures,
                commit_pending,
                recent_message_ids_json,
                created_at,
                updated_at,
                expires_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(channel, external_user_id) DO UPDATE SET
                step = excluded.step,
                draft_json = excluded.draft_json,
                draft_version = excluded.draft_version,
                resolved_operator_id = excluded.resolved_operator_id,
                last_proposal_id = excluded.last_proposal_id,
                extraction_failures = excluded.extraction_failures,
                commit_pending = excluded.commit_pending,
                recent_message_ids_json = excluded.recent_message_ids_json,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                expires_at = excluded.expires_at",
        )
        .bind(session.channel.as_str())
        .bind(&session.external_user_id)
        .bind(session.step.as_str())
        .bind(draft_json)
        .bind(i64::from(session.draft.version))
        .bind(session.resolved_operator_id.as_ref().map(|id| id.0.as_str()))
        .bind(session.last_proposal_id.as_ref().map(|id| id.0.as_str()))
        .bind(i64::from(session.extraction_failures))
        .bind(session.commit_pending)
        .bind(recent_json)
        .bind(format_timestamp(session.created_at))
        .bind(format_timestamp(now))
        .bind(format_timestamp(session.expires_at))
        .execute(&self.pool)
        .await?;

        Ok(session)
    }

    async fn delete(&self, key: &SessionKey) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM chat_session WHERE channel = ? AND external_user_id = ?")
            .bind(key.channel.as_str())
            .bind(&key.external_user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM chat_session WHERE expires_at <= ?")
            .bind(format_timestamp(now))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn session_from_row(row: SqliteRow) -> Result<Session, RepositoryError> {
    let channel_raw: String = row.try_get("channel")?;
    let channel = Channel::parse(&channel_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown channel `{channel_raw}`")))?;

    let step_raw: String = row.try_get("step")?;
    let step = Step::parse(&step_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown step `{step_raw}`")))?;

    let draft_version = parse_u32("draft_version", row.try_get("draft_version")?)?;
    if draft_version > DRAFT_SCHEMA_VERSION {
        return Err(RepositoryError::Decode(format!(
            "draft schema version {draft_version} is newer than supported {DRAFT_SCHEMA_VERSION}"
        )));
    }
    let draft_json: String = row.try_get("draft_json")?;
    let draft: ProposalDraft = serde_json::from_str(&draft_json)
        .map_err(|error| RepositoryError::Decode(format!("invalid `draft_json`: {error}")))?;

    let recent_json: String = row.try_get("recent_message_ids_json")?;
    let recent_message_ids: Vec<String> = serde_json::from_str(&recent_json).map_err(|error| {
        RepositoryError::Decode(format!("invalid `recent_message_ids_json`: {error}"))
    })?;

    Ok(Session {
        channel,
        external_user_id: row.try_get("external_user_id")?,
        step,
        draft,
        resolved_operator_id: row
            .try_get::<Option<String>, _>("resolved_operator_id")?
            .map(OperatorId),
        last_proposal_id: row.try_get::<Option<String>, _>("last_proposal_id")?.map(ProposalId),
        extraction_failures: parse_u32(
            "extraction_failures",
            row.try_get("extraction_failures")?,
        )?,
        commit_pending: row.try_get("commit_pending")?,
        recent_message_ids,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        expires_at: parse_timestamp("expires_at", row.try_get("expires_at")?)?,
    })
}
