use sqlx::PgPool;

use holdfast_core::PinResult;

/// Which users may act on which private networks.
#[derive(Clone)]
pub struct NetworkMemberRepository {
    pool: PgPool,
}

impl NetworkMemberRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[tracing::instrument(skip(self))]
    pub async fn is_member(&self, network_name: &str, user_name: &str) -> PinResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM network_members
                WHERE network_name = $1 AND user_name = $2
            )
            "#,
        )
        .bind(network_name)
        .bind(user_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    #[tracing::instrument(skip(self))]
    pub async fn add_member(&self, network_name: &str, user_name: &str) -> PinResult<()> {
        sqlx::query(
            r#"
            INSERT INTO network_members (network_name, user_name)
            VALUES ($1, $2)
            ON CONFLICT (network_name, user_name) DO NOTHING
            "#,
        )
        .bind(network_name)
        .bind(user_name)
        .execute(&self.pool)
        .await?;

        tracing::info!("Network member added");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_member(&self, network_name: &str, user_name: &str) -> PinResult<bool> {
        let result =
            sqlx::query("DELETE FROM network_members WHERE network_name = $1 AND user_name = $2")
                .bind(network_name)
                .bind(user_name)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn networks_for_user(&self, user_name: &str) -> PinResult<Vec<String>> {
        let networks = sqlx::query_scalar(
            r#"
            SELECT network_name FROM network_members
            WHERE user_name = $1
            ORDER BY network_name
            "#,
        )
        .bind(user_name)
        .fetch_all(&self.pool)
        .await?;
        Ok(networks)
    }
}
