use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use propbot_core::domain::identity::{
    normalize_phone, NewOperator, OperatorProfile, TransportAddress,
};
use propbot_core::{Channel, OperatorId};

use super::{format_timestamp, new_record_id, OperatorDirectory, RepositoryError};
use crate::DbPool;

/// Shortest stored number considered by the containment lookup.
const MIN_CONTAINMENT_DIGITS: i64 = 10;

pub struct SqlOperatorDirectory {
    pool: DbPool,
}

impl SqlOperatorDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl OperatorDirectory for SqlOperatorDirectory {
    async fn find_by_phone_digits(
        &self,
        digits: &str,
    ) -> Result<Vec<OperatorProfile>, RepositoryError> {
        if digits.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT id, display_name, phone_digits, 0 AS source
             FROM profiles
             WHERE phone_digits = ?
             UNION
             SELECT p.id, p.display_name, c.phone_digits, 1 AS source
             FROM companies c
             JOIN profiles p ON p.id = c.owner_id
             WHERE c.phone_digits = ?
             ORDER BY source ASC, id ASC",
        )
        .bind(digits)
        .bind(digits)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(profile_from_row).collect()
    }

    async fn find_by_phone_containing(
        &self,
        digits: &str,
        limit: u32,
    ) -> Result<Vec<OperatorProfile>, RepositoryError> {
        if digits.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT id, display_name, phone_digits, 0 AS source
             FROM profiles
             WHERE length(phone_digits) >= ?
               AND (instr(phone_digits, ?) > 0 OR instr(?, phone_digits) > 0)
             UNION
             SELECT p.id, p.display_name, c.phone_digits, 1 AS source
             FROM companies c
             JOIN profiles p ON p.id = c.owner_id
             WHERE length(c.phone_digits) >= ?
               AND (instr(c.phone_digits, ?) > 0 OR instr(?, c.phone_digits) > 0)
             ORDER BY source ASC, id ASC
             LIMIT ?",
        )
        .bind(MIN_CONTAINMENT_DIGITS)
        .bind(digits)
        .bind(digits)
        .bind(MIN_CONTAINMENT_DIGITS)
        .bind(digits)
        .bind(digits)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(profile_from_row).collect()
    }

    async fn link_transport(
        &self,
        operator_id: &OperatorId,
        channel: Channel,
        transport_id: &str,
    ) -> Result<(), RepositoryError> {
        let statement = match channel {
            Channel::Telegram => {
                "UPDATE profiles SET telegram_chat_id = ?, updated_at = ? WHERE id = ?"
            }
            Channel::Whatsapp => "UPDATE profiles SET whatsapp_id = ?, updated_at = ? WHERE id = ?",
        };

        let result = sqlx::query(statement)
            .bind(transport_id)
            .bind(format_timestamp(Utc::now()))
            .bind(&operator_id.0)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound { entity: "operator", id: operator_id.0.clone() });
        }
        Ok(())
    }

    async fn transport_address(
        &self,
        operator_id: &OperatorId,
    ) -> Result<Option<TransportAddress>, RepositoryError> {
        let row = sqlx::query("SELECT telegram_chat_id, whatsapp_id FROM profiles WHERE id = ?")
            .bind(&operator_id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            Ok(TransportAddress {
                telegram_chat_id: row.try_get("telegram_chat_id")?,
                whatsapp_id: row.try_get("whatsapp_id")?,
            })
        })
        .transpose()
    }

    async fn register_operator(
        &self,
        operator: NewOperator,
    ) -> Result<OperatorId, RepositoryError> {
        let id = new_record_id();
        let now = format_timestamp(Utc::now());
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO profiles (id, display_name, phone, phone_digits, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&operator.display_name)
        .bind(&operator.phone)
        .bind(normalize_phone(&operator.phone))
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        if operator.company_name.is_some() || operator.company_phone.is_some() {
            let company_digits = operator.company_phone.as_deref().map(normalize_phone);
            sqlx::query(
                "INSERT INTO companies (id, owner_id, name, phone, phone_digits, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(new_record_id())
            .bind(&id)
            .bind(&operator.company_name)
            .bind(&operator.company_phone)
            .bind(company_digits)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(OperatorId(id))
    }
}

fn profile_from_row(row: SqliteRow) -> Result<OperatorProfile, RepositoryError> {
    Ok(OperatorProfile {
        id: OperatorId(row.try_get("id")?),
        display_name: row.try_get("display_name")?,
        phone_digits: row.try_get::<Option<String>, _>("phone_digits")?.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use propbot_core::domain::identity::{NewOperator, TransportAddress};
    use propbot_core::Channel;

    use super::SqlOperatorDirectory;
    use crate::migrations;
    use crate::repositories::{OperatorDirectory, RepositoryError};
    use crate::{connect_with_settings, DbPool};

    #[tokio::test]
    async fn exact_lookup_matches_profile_and_company_phones() {
        let pool = setup_pool().await;
        let directory = SqlOperatorDirectory::new(pool.clone());

        let ana = directory
            .register_operator(operator("Ana", "+55 11 99999-0001", Some("(11) 3333-4444")))
            .await
            .expect("register ana");

        let by_profile = directory.find_by_phone_digits("5511999990001").await.expect("lookup");
        assert_eq!(by_profile.len(), 1);
        assert_eq!(by_profile[0].id, ana);
        assert_eq!(by_profile[0].display_name.as_deref(), Some("Ana"));

        let by_company = directory.find_by_phone_digits("1133334444").await.expect("lookup");
        assert_eq!(by_company.len(), 1);
        assert_eq!(by_company[0].id, ana);

        assert!(directory.find_by_phone_digits("5511000000000").await.expect("lookup").is_empty());
        assert!(directory.find_by_phone_digits("").await.expect("lookup").is_empty());

        pool.close().await;
    }

    #[tokio::test]
    async fn containment_lookup_ignores_short_stored_numbers() {
        let pool = setup_pool().await;
        let directory = SqlOperatorDirectory::new(pool.clone());

        let bruno = directory
            .register_operator(operator("Bruno", "11988887777", None))
            .await
            .expect("register bruno");
        directory.register_operator(operator("Short", "98888", None)).await.expect("register");

        let matches =
            directory.find_by_phone_containing("5511988887777", 5).await.expect("containment");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, bruno);

        pool.close().await;
    }

    #[tokio::test]
    async fn transport_ids_are_stored_per_channel() {
        let pool = setup_pool().await;
        let directory = SqlOperatorDirectory::new(pool.clone());
        let id = directory
            .register_operator(operator("Carla", "5521977776666", None))
            .await
            .expect("register");

        directory.link_transport(&id, Channel::Telegram, "424242").await.expect("link telegram");
        directory
            .link_transport(&id, Channel::Whatsapp, "+5521977776666")
            .await
            .expect("link whatsapp");

        let address = directory.transport_address(&id).await.expect("address");
        assert_eq!(
            address,
            Some(TransportAddress {
                telegram_chat_id: Some("424242".to_string()),
                whatsapp_id: Some("+5521977776666".to_string()),
            })
        );

        pool.close().await;
    }

    #[tokio::test]
    async fn linking_unknown_operator_is_not_found() {
        let pool = setup_pool().await;
        let directory = SqlOperatorDirectory::new(pool.clone());

        let error = directory
            .link_transport(&propbot_core::OperatorId("missing".to_string()), Channel::Telegram, "1")
            .await
            .expect_err("unknown operator");

        assert!(matches!(error, RepositoryError::NotFound { entity: "operator", .. }));

        pool.close().await;
    }

    fn operator(name: &str, phone: &str, company_phone: Option<&str>) -> NewOperator {
        NewOperator {
            display_name: Some(name.to_string()),
            phone: phone.to_string(),
            company_name: company_phone.map(|_| format!("{name} Ltda")),
            company_phone: company_phone.map(str::to_string),
        }
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }
}
