//! Download client rows.
//!
//! Clients are declared in configuration and synced into the store at
//! engine start; they are immutable for the lifetime of the process
//! apart from the last-connected stamp.

use crate::error::Result;
use crate::types::Id;

use super::{ClientRow, Database, NewClient, store_err};

const CLIENT_COLUMNS: &str = r#"
    id, name, kind, url, username, password,
    ssh_host, ssh_port, ssh_user, ssh_key_file,
    enabled, last_connected_at, created_at, updated_at, deleted_at
"#;

impl Database {
    /// Insert a client or refresh the existing row with the same name
    ///
    /// Re-running the engine with changed configuration updates the row in
    /// place so download jobs keep their client foreign key.
    pub async fn upsert_client(&self, client: &NewClient) -> Result<ClientRow> {
        let now = Self::now();

        if let Some(existing) = self.get_client_by_name(&client.name).await? {
            sqlx::query(
                r#"
                UPDATE download_clients
                SET kind = ?, url = ?, username = ?, password = ?,
                    ssh_host = ?, ssh_port = ?, ssh_user = ?, ssh_key_file = ?,
                    enabled = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(&client.kind)
            .bind(&client.url)
            .bind(&client.username)
            .bind(&client.password)
            .bind(&client.ssh_host)
            .bind(client.ssh_port)
            .bind(&client.ssh_user)
            .bind(&client.ssh_key_file)
            .bind(client.enabled)
            .bind(now)
            .bind(existing.id)
            .execute(&self.pool)
            .await
            .map_err(store_err("failed to update download client"))?;

            return self
                .get_client(existing.id)
                .await?
                .ok_or_else(|| missing_row("download client", existing.id));
        }

        let id = Id::generate();
        sqlx::query(
            r#"
            INSERT INTO download_clients (
                id, name, kind, url, username, password,
                ssh_host, ssh_port, ssh_user, ssh_key_file,
                enabled, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(&client.name)
        .bind(&client.kind)
        .bind(&client.url)
        .bind(&client.username)
        .bind(&client.password)
        .bind(&client.ssh_host)
        .bind(client.ssh_port)
        .bind(&client.ssh_user)
        .bind(&client.ssh_key_file)
        .bind(client.enabled)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(store_err("failed to insert download client"))?;

        self.get_client(id)
            .await?
            .ok_or_else(|| missing_row("download client", id))
    }

    /// Get a client by ID
    pub async fn get_client(&self, id: Id) -> Result<Option<ClientRow>> {
        let row = sqlx::query_as::<_, ClientRow>(&format!(
            "SELECT {CLIENT_COLUMNS} FROM download_clients WHERE id = ? AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err("failed to get download client"))?;

        Ok(row)
    }

    /// Get a client by unique name
    pub async fn get_client_by_name(&self, name: &str) -> Result<Option<ClientRow>> {
        let row = sqlx::query_as::<_, ClientRow>(&format!(
            "SELECT {CLIENT_COLUMNS} FROM download_clients WHERE name = ? AND deleted_at IS NULL"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err("failed to get download client by name"))?;

        Ok(row)
    }

    /// List all live clients, oldest first
    pub async fn list_clients(&self) -> Result<Vec<ClientRow>> {
        let rows = sqlx::query_as::<_, ClientRow>(&format!(
            "SELECT {CLIENT_COLUMNS} FROM download_clients WHERE deleted_at IS NULL ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err("failed to list download clients"))?;

        Ok(rows)
    }

    /// Stamp a client's last validated connection time
    pub async fn touch_client_connected(&self, id: Id) -> Result<()> {
        let now = Self::now();
        sqlx::query(
            "UPDATE download_clients SET last_connected_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(store_err("failed to stamp client connection"))?;
        Ok(())
    }

    /// Soft-delete clients whose names are no longer configured
    pub async fn retire_clients_except(&self, names: &[String]) -> Result<()> {
        let now = Self::now();
        // Small set; one statement per retained name keeps this simple
        let rows = self.list_clients().await?;
        for row in rows {
            if !names.contains(&row.name) {
                sqlx::query(
                    "UPDATE download_clients SET deleted_at = ?, updated_at = ? WHERE id = ?",
                )
                .bind(now)
                .bind(now)
                .bind(row.id)
                .execute(&self.pool)
                .await
                .map_err(store_err("failed to retire download client"))?;
            }
        }
        Ok(())
    }
}

pub(crate) fn missing_row(entity: &str, id: Id) -> crate::error::Error {
    crate::error::Error::Store(crate::error::StoreError::RowNotFound(format!(
        "{} {} vanished after write",
        entity, id
    )))
}
