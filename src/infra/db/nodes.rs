use async_trait::async_trait;

use crate::application::repos::{NodesRepo, RepoError};
use crate::domain::nodes::{AccessRuleRecord, NodeRecord};
use crate::domain::types::AccessLevel;

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct NodeRow {
    node_id: i64,
    parent_id: Option<i64>,
    position: i32,
    title: String,
    path: String,
    handler_id: String,
    enabled: bool,
    visible: bool,
    add_to_menu: bool,
}

impl From<NodeRow> for NodeRecord {
    fn from(row: NodeRow) -> Self {
        Self {
            node_id: row.node_id,
            parent_id: row.parent_id,
            order: row.position,
            title: row.title,
            path: row.path,
            handler_id: row.handler_id,
            enabled: row.enabled,
            visible: row.visible,
            add_to_menu: row.add_to_menu,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AccessRuleRow {
    node_id: i64,
    user_id: Option<i64>,
    group_id: Option<i64>,
    access: AccessLevel,
}

impl From<AccessRuleRow> for AccessRuleRecord {
    fn from(row: AccessRuleRow) -> Self {
        Self {
            node_id: row.node_id,
            user_id: row.user_id,
            group_id: row.group_id,
            level: row.access,
        }
    }
}

#[async_trait]
impl NodesRepo for PostgresRepositories {
    async fn list_nodes(&self) -> Result<Vec<NodeRecord>, RepoError> {
        let rows = sqlx::query_as::<_, NodeRow>(
            r#"
            SELECT node_id, parent_id, position, title, path, handler_id,
                   enabled, visible, add_to_menu
            FROM nodes
            ORDER BY parent_id NULLS FIRST, position, title
            "#,
        )
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(NodeRecord::from).collect())
    }

    async fn list_access_rules(&self) -> Result<Vec<AccessRuleRecord>, RepoError> {
        let rows = sqlx::query_as::<_, AccessRuleRow>(
            r#"
            SELECT node_id, user_id, group_id, access
            FROM node_access
            ORDER BY node_id
            "#,
        )
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(AccessRuleRecord::from).collect())
    }
}
