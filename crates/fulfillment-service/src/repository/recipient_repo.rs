//! 收件人目录仓储
//!
//! 读收件人投影表 recipients。投影由上游用户系统同步，本服务只读。

use async_trait::async_trait;
use sqlx::PgPool;

use super::traits::RecipientDirectory;
use crate::error::Result;
use crate::models::Recipient;

/// PostgreSQL 收件人目录实现
pub struct PgRecipientDirectory {
    pool: PgPool,
}

impl PgRecipientDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecipientDirectory for PgRecipientDirectory {
    async fn find(&self, recipient_id: &str) -> Result<Option<Recipient>> {
        let recipient = sqlx::query_as::<_, Recipient>(
            r#"
            SELECT id, phone, email, display_name
            FROM recipients
            WHERE id = $1
            "#,
        )
        .bind(recipient_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(recipient)
    }
}
