//! Media app rows.

use crate::error::Result;
use crate::types::Id;

use super::clients::missing_row;
use super::{AppRow, Database, NewApp, store_err};

const APP_COLUMNS: &str = r#"
    id, name, kind, url, api_key, category, downloads_path,
    cleanup_on_category_change, cleanup_on_remove, enabled,
    created_at, updated_at, deleted_at
"#;

impl Database {
    /// Insert an app or refresh the existing row with the same name
    pub async fn upsert_app(&self, app: &NewApp) -> Result<AppRow> {
        let now = Self::now();

        if let Some(existing) = self.get_app_by_name(&app.name).await? {
            sqlx::query(
                r#"
                UPDATE apps
                SET kind = ?, url = ?, api_key = ?, category = ?, downloads_path = ?,
                    cleanup_on_category_change = ?, cleanup_on_remove = ?, enabled = ?,
                    updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(&app.kind)
            .bind(&app.url)
            .bind(&app.api_key)
            .bind(&app.category)
            .bind(&app.downloads_path)
            .bind(app.cleanup_on_category_change)
            .bind(app.cleanup_on_remove)
            .bind(app.enabled)
            .bind(now)
            .bind(existing.id)
            .execute(&self.pool)
            .await
            .map_err(store_err("failed to update app"))?;

            return self
                .get_app(existing.id)
                .await?
                .ok_or_else(|| missing_row("app", existing.id));
        }

        let id = Id::generate();
        sqlx::query(
            r#"
            INSERT INTO apps (
                id, name, kind, url, api_key, category, downloads_path,
                cleanup_on_category_change, cleanup_on_remove, enabled,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(&app.name)
        .bind(&app.kind)
        .bind(&app.url)
        .bind(&app.api_key)
        .bind(&app.category)
        .bind(&app.downloads_path)
        .bind(app.cleanup_on_category_change)
        .bind(app.cleanup_on_remove)
        .bind(app.enabled)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(store_err("failed to insert app"))?;

        self.get_app(id)
            .await?
            .ok_or_else(|| missing_row("app", id))
    }

    /// Get an app by ID
    pub async fn get_app(&self, id: Id) -> Result<Option<AppRow>> {
        let row = sqlx::query_as::<_, AppRow>(&format!(
            "SELECT {APP_COLUMNS} FROM apps WHERE id = ? AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err("failed to get app"))?;

        Ok(row)
    }

    /// Get an app by unique name
    pub async fn get_app_by_name(&self, name: &str) -> Result<Option<AppRow>> {
        let row = sqlx::query_as::<_, AppRow>(&format!(
            "SELECT {APP_COLUMNS} FROM apps WHERE name = ? AND deleted_at IS NULL"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err("failed to get app by name"))?;

        Ok(row)
    }

    /// List all live apps, ordered by name
    pub async fn list_apps(&self) -> Result<Vec<AppRow>> {
        let rows = sqlx::query_as::<_, AppRow>(&format!(
            "SELECT {APP_COLUMNS} FROM apps WHERE deleted_at IS NULL ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err("failed to list apps"))?;

        Ok(rows)
    }

    /// All enabled apps claiming the given category
    ///
    /// Multiple apps may share a category: every match is notified.
    pub async fn apps_for_category(&self, category: &str) -> Result<Vec<AppRow>> {
        let rows = sqlx::query_as::<_, AppRow>(&format!(
            r#"
            SELECT {APP_COLUMNS} FROM apps
            WHERE category = ? AND enabled = 1 AND deleted_at IS NULL
            ORDER BY name
            "#
        ))
        .bind(category)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err("failed to query apps by category"))?;

        Ok(rows)
    }

    /// Soft-delete apps whose names are no longer configured
    pub async fn retire_apps_except(&self, names: &[String]) -> Result<()> {
        let now = Self::now();
        let rows = self.list_apps().await?;
        for row in rows {
            if !names.contains(&row.name) {
                sqlx::query("UPDATE apps SET deleted_at = ?, updated_at = ? WHERE id = ?")
                    .bind(now)
                    .bind(now)
                    .bind(row.id)
                    .execute(&self.pool)
                    .await
                    .map_err(store_err("failed to retire app"))?;
            }
        }
        Ok(())
    }
}
