use std::sync::Arc;

use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, DbErr, EntityTrait, QueryFilter, TransactionTrait,
};

use crate::database::Database;
use crate::entities::library_snapshot;
use crate::error::HubError;
use crate::models::LibrarySnapshot;
use crate::provider::Provider;

/// Durable copy of the latest snapshot per (user, provider), used to warm the
/// in-memory cache after a restart.
pub struct SnapshotRepository {
    db: Arc<Database>,
}

impl SnapshotRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Store `snapshot` unless a newer one is already on file.
    /// Returns whether the row was written.
    pub async fn save(&self, snapshot: &LibrarySnapshot) -> Result<bool, HubError> {
        let payload = serde_json::to_string(snapshot)
            .map_err(|e| DbErr::Custom(format!("Failed to serialize snapshot: {e}")))?;
        let synced_at = snapshot.last_synced_at.timestamp_millis();

        let txn = self.db.conn.begin().await?;

        let existing = library_snapshot::Entity::find()
            .filter(library_snapshot::Column::UserId.eq(&snapshot.user_id))
            .filter(library_snapshot::Column::Service.eq(snapshot.provider))
            .one(&txn)
            .await?;
        if existing.is_some_and(|row| row.last_synced_at > synced_at) {
            txn.rollback().await?;
            return Ok(false);
        }

        library_snapshot::Entity::insert(library_snapshot::ActiveModel {
            user_id: Set(snapshot.user_id.clone()),
            service: Set(snapshot.provider),
            payload: Set(payload),
            last_synced_at: Set(synced_at),
            ..Default::default()
        })
        .on_conflict(
            OnConflict::columns([
                library_snapshot::Column::UserId,
                library_snapshot::Column::Service,
            ])
            .update_columns([
                library_snapshot::Column::Payload,
                library_snapshot::Column::LastSyncedAt,
            ])
            .to_owned(),
        )
        .exec_without_returning(&txn)
        .await?;

        txn.commit().await?;
        Ok(true)
    }

    pub async fn load_all(&self) -> Result<Vec<LibrarySnapshot>, HubError> {
        let rows = library_snapshot::Entity::find().all(&self.db.conn).await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| match serde_json::from_str::<LibrarySnapshot>(&row.payload) {
                Ok(snapshot) => Some(snapshot),
                Err(error) => {
                    tracing::warn!(
                        "Ignoring unreadable {} snapshot for {}: {}",
                        row.service,
                        row.user_id,
                        error
                    );
                    None
                }
            })
            .collect())
    }

    pub async fn delete(&self, user_id: &str, provider: Provider) -> Result<bool, HubError> {
        let result = library_snapshot::Entity::delete_many()
            .filter(library_snapshot::Column::UserId.eq(user_id))
            .filter(library_snapshot::Column::Service.eq(provider))
            .exec(&self.db.conn)
            .await?;
        Ok(result.rows_affected > 0)
    }
}
