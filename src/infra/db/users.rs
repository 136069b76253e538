use async_trait::async_trait;
use time::OffsetDateTime;

use crate::application::repos::{RepoError, UsersRepo};
use crate::domain::entities::UserProfileRecord;
use crate::domain::types::UserId;

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct UserRow {
    user_id: i64,
    name: String,
    email: String,
    is_administrator: bool,
    is_approved: bool,
    email_confirmed: bool,
    is_blocked: bool,
    unblock_time: Option<OffsetDateTime>,
}

#[async_trait]
impl UsersRepo for PostgresRepositories {
    async fn load_profile(&self, user_id: UserId) -> Result<Option<UserProfileRecord>, RepoError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT user_id, name, email, is_administrator, is_approved,
                   email_confirmed, is_blocked, unblock_time
            FROM users
            WHERE user_id = $1 AND NOT is_removed
            "#,
        )
        .bind(user_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let groups = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT group_id
            FROM user_memberships
            WHERE user_id = $1
            ORDER BY group_id
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(Some(UserProfileRecord {
            user_id: row.user_id,
            name: row.name,
            email: row.email,
            is_administrator: row.is_administrator,
            is_approved: row.is_approved,
            email_confirmed: row.email_confirmed,
            is_blocked: row.is_blocked,
            unblock_time: row.unblock_time,
            is_removed: false,
            groups,
        }))
    }
}
