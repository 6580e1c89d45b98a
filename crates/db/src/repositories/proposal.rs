use std::str::FromStr;

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};

use propbot_core::domain::proposal::{Client, ClientId, NewClient, NewProposal, Proposal};
use propbot_core::{OperatorId, ProposalId, ProposalStatus, ProposalSummary};

use super::{
    format_timestamp, new_record_id, parse_optional_date, parse_timestamp, ProposalRepository,
    RepositoryError,
};
use crate::DbPool;

pub struct SqlProposalRepository {
    pool: DbPool,
}

impl SqlProposalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ProposalRepository for SqlProposalRepository {
    async fn find_client_by_name(
        &self,
        operator_id: &OperatorId,
        name: &str,
    ) -> Result<Option<Client>, RepositoryError> {
        // SQLite NOCASE folds ASCII only; names like "João" are compared in Rust.
        let rows = sqlx::query(
            "SELECT id, operator_id, name, email, phone
             FROM clients
             WHERE operator_id = ?
             ORDER BY created_at ASC",
        )
        .bind(&operator_id.0)
        .fetch_all(&self.pool)
        .await?;

        let wanted = fold_name(name);
        for row in rows {
            let client = client_from_row(row)?;
            if fold_name(&client.name) == wanted {
                return Ok(Some(client));
            }
        }
        Ok(None)
    }

    async fn create_client(&self, client: NewClient) -> Result<Client, RepositoryError> {
        let id = new_record_id();
        sqlx::query(
            "INSERT INTO clients (id, operator_id, name, email, phone, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&client.operator_id.0)
        .bind(&client.name)
        .bind(&client.email)
        .bind(&client.phone)
        .bind(format_timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(Client {
            id: ClientId(id),
            operator_id: client.operator_id,
            name: client.name,
            email: client.email,
            phone: client.phone,
        })
    }

    async fn create_proposal(&self, proposal: NewProposal) -> Result<ProposalId, RepositoryError> {
        let id = new_record_id();
        let now = format_timestamp(Utc::now());

        sqlx::query(
            "INSERT INTO proposals (
                id,
                operator_id,
                client_id,
                title,
                service_description,
                detailed_description,
                value,
                delivery_time,
                validity_date,
                observations,
                status,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&proposal.operator_id.0)
        .bind(proposal.client_id.as_ref().map(|client| client.0.as_str()))
        .bind(&proposal.title)
        .bind(&proposal.service_description)
        .bind(&proposal.detailed_description)
        .bind(proposal.value.to_string())
        .bind(&proposal.delivery_time)
        .bind(proposal.validity_date.map(|date| date.format("%Y-%m-%d").to_string()))
        .bind(&proposal.observations)
        .bind(ProposalStatus::Draft.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(ProposalId(id))
    }

    async fn list_recent(
        &self,
        operator_id: &OperatorId,
        limit: u32,
    ) -> Result<Vec<ProposalSummary>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT p.id, p.title, c.name AS client_name, p.value, p.status, p.created_at
             FROM proposals p
             LEFT JOIN clients c ON c.id = p.client_id
             WHERE p.operator_id = ?
             ORDER BY p.created_at DESC, p.rowid DESC
             LIMIT ?",
        )
        .bind(&operator_id.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(summary_from_row).collect()
    }

    async fn find_proposal(&self, id: &ProposalId) -> Result<Option<Proposal>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                operator_id,
                client_id,
                title,
                value,
                delivery_time,
                validity_date,
                status,
                public_url,
                created_at
             FROM proposals
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(proposal_from_row).transpose()
    }

    async fn mark_sent(&self, id: &ProposalId, public_url: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE proposals SET status = ?, public_url = ?, updated_at = ? WHERE id = ?",
        )
        .bind(ProposalStatus::Sent.as_str())
        .bind(public_url)
        .bind(format_timestamp(Utc::now()))
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound { entity: "proposal", id: id.0.clone() });
        }
        Ok(())
    }
}

pub(crate) fn fold_name(name: &str) -> String {
    name.trim().to_lowercase()
}

fn client_from_row(row: SqliteRow) -> Result<Client, RepositoryError> {
    Ok(Client {
        id: ClientId(row.try_get("id")?),
        operator_id: OperatorId(row.try_get("operator_id")?),
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
    })
}

fn proposal_from_row(row: SqliteRow) -> Result<Proposal, RepositoryError> {
    Ok(Proposal {
        id: ProposalId(row.try_get("id")?),
        operator_id: OperatorId(row.try_get("operator_id")?),
        client_id: row.try_get::<Option<String>, _>("client_id")?.map(ClientId),
        title: row.try_get("title")?,
        value: parse_decimal(row.try_get("value")?)?,
        delivery_time: row.try_get("delivery_time")?,
        validity_date: parse_optional_date("validity_date", row.try_get("validity_date")?)?,
        status: parse_status(row.try_get("status")?)?,
        public_url: row.try_get("public_url")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn summary_from_row(row: SqliteRow) -> Result<ProposalSummary, RepositoryError> {
    Ok(ProposalSummary {
        id: ProposalId(row.try_get("id")?),
        title: row.try_get("title")?,
        client_name: row.try_get("client_name")?,
        value: parse_decimal(row.try_get("value")?)?,
        status: parse_status(row.try_get("status")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn parse_decimal(value: String) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(&value)
        .map_err(|error| RepositoryError::Decode(format!("invalid `value` `{value}`: {error}")))
}

fn parse_status(value: String) -> Result<ProposalStatus, RepositoryError> {
    ProposalStatus::parse(&value)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown status `{value}`")))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use propbot_core::domain::identity::NewOperator;
    use propbot_core::domain::proposal::{NewClient, NewProposal};
    use propbot_core::{OperatorId, ProposalId, ProposalStatus};

    use super::SqlProposalRepository;
    use crate::migrations;
    use crate::repositories::{
        OperatorDirectory, ProposalRepository, RepositoryError, SqlOperatorDirectory,
    };
    use crate::{connect_with_settings, DbPool};

    #[tokio::test]
    async fn client_lookup_is_case_insensitive_and_operator_scoped() {
        let pool = setup_pool().await;
        let operator = register(&pool, "5511999990001").await;
        let other = register(&pool, "5511999990002").await;
        let repo = SqlProposalRepository::new(pool.clone());

        let created = repo
            .create_client(NewClient {
                operator_id: operator.clone(),
                name: "João Silva".to_string(),
                email: Some("joao@example.com".to_string()),
                phone: None,
            })
            .await
            .expect("create client");

        let found =
            repo.find_client_by_name(&operator, "  JOÃO SILVA ").await.expect("find client");
        assert_eq!(found, Some(created));
        assert_eq!(repo.find_client_by_name(&other, "joão silva").await.expect("find"), None);

        pool.close().await;
    }

    #[tokio::test]
    async fn proposals_are_listed_newest_first_with_client_names() {
        let pool = setup_pool().await;
        let operator = register(&pool, "5511999990001").await;
        let repo = SqlProposalRepository::new(pool.clone());

        let client = repo
            .create_client(NewClient {
                operator_id: operator.clone(),
                name: "Acme".to_string(),
                email: None,
                phone: None,
            })
            .await
            .expect("create client");

        let first = repo
            .create_proposal(proposal(&operator, Some(client.id.clone()), "Site"))
            .await
            .expect("first proposal");
        let second =
            repo.create_proposal(proposal(&operator, None, "Logo")).await.expect("second");

        let listed = repo.list_recent(&operator, 10).await.expect("list");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second);
        assert_eq!(listed[0].client_name, None);
        assert_eq!(listed[1].id, first);
        assert_eq!(listed[1].client_name.as_deref(), Some("Acme"));
        assert_eq!(listed[1].value, Decimal::new(150000, 2));
        assert_eq!(listed[1].status, ProposalStatus::Draft);

        assert_eq!(repo.list_recent(&operator, 1).await.expect("list").len(), 1);

        let stored = repo.find_proposal(&first).await.expect("find").expect("proposal present");
        assert_eq!(stored.client_id, Some(client.id));
        assert_eq!(stored.validity_date, NaiveDate::from_ymd_opt(2026, 4, 30));
        assert_eq!(stored.public_url, None);

        pool.close().await;
    }

    #[tokio::test]
    async fn mark_sent_updates_status_and_rejects_unknown_ids() {
        let pool = setup_pool().await;
        let operator = register(&pool, "5511999990001").await;
        let repo = SqlProposalRepository::new(pool.clone());
        let id = repo.create_proposal(proposal(&operator, None, "Site")).await.expect("create");

        repo.mark_sent(&id, "https://app.example.com/p/abc").await.expect("mark sent");
        let stored = repo.find_proposal(&id).await.expect("find").expect("proposal present");
        assert_eq!(stored.status, ProposalStatus::Sent);
        assert_eq!(stored.public_url.as_deref(), Some("https://app.example.com/p/abc"));

        let error = repo
            .mark_sent(&ProposalId("missing".to_string()), "https://x")
            .await
            .expect_err("unknown proposal");
        assert!(matches!(error, RepositoryError::NotFound { entity: "proposal", .. }));

        pool.close().await;
    }

    fn proposal(
        operator: &OperatorId,
        client_id: Option<propbot_core::ClientId>,
        title: &str,
    ) -> NewProposal {
        NewProposal {
            operator_id: operator.clone(),
            client_id,
            title: title.to_string(),
            service_description: Some("Desenvolvimento".to_string()),
            detailed_description: None,
            value: Decimal::new(150000, 2),
            delivery_time: "30 dias".to_string(),
            validity_date: NaiveDate::from_ymd_opt(2026, 4, 30),
            observations: None,
        }
    }

    async fn register(pool: &DbPool, phone: &str) -> OperatorId {
        SqlOperatorDirectory::new(pool.clone())
            .register_operator(NewOperator {
                display_name: None,
                phone: phone.to_string(),
                company_name: None,
                company_phone: None,
            })
            .await
            .expect("register operator")
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }
}
