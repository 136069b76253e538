use async_trait::async_trait;
use time::OffsetDateTime;

use crate::application::repos::{RepoError, SettingsRepo};
use crate::domain::entities::SiteConfigRecord;
use crate::domain::types::AccessLevel;

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct SiteConfigRow {
    site_name: String,
    users_can_register: bool,
    maintenance: bool,
    default_access: AccessLevel,
    updated_at: OffsetDateTime,
}

impl From<SiteConfigRow> for SiteConfigRecord {
    fn from(row: SiteConfigRow) -> Self {
        Self {
            site_name: row.site_name,
            users_can_register: row.users_can_register,
            maintenance: row.maintenance,
            default_access: row.default_access,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl SettingsRepo for PostgresRepositories {
    async fn load_site_config(&self) -> Result<SiteConfigRecord, RepoError> {
        let row = sqlx::query_as::<_, SiteConfigRow>(
            r#"
            SELECT site_name, users_can_register, maintenance, default_access, updated_at
            FROM site_settings
            WHERE id = 1
            "#,
        )
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let row = row.ok_or_else(|| RepoError::from_persistence("site settings row missing"))?;

        Ok(SiteConfigRecord::from(row))
    }
}
