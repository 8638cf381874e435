use std::sync::Arc;

use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};

use crate::database::Database;
use crate::entities::user_service;
use crate::error::HubError;
use crate::models::Credential;
use crate::provider::Provider;

/// Persists one credential per (user, provider).
///
/// Only the token lifecycle manager writes through this store.
pub struct CredentialStore {
    db: Arc<Database>,
}

impl CredentialStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn get(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<Credential>, HubError> {
        let row = user_service::Entity::find()
            .filter(user_service::Column::UserId.eq(user_id))
            .filter(user_service::Column::Service.eq(provider))
            .one(&self.db.conn)
            .await?;
        Ok(row.map(user_service::Model::into_credential))
    }

    /// Insert or replace the credential for its (user, provider) pair.
    pub async fn upsert(&self, credential: &Credential) -> Result<(), HubError> {
        tracing::debug!(
            "Saving {} credential for user {}",
            credential.provider,
            credential.user_id
        );

        user_service::Entity::insert(user_service::ActiveModel::from_credential(credential))
            .on_conflict(
                OnConflict::columns([user_service::Column::UserId, user_service::Column::Service])
                    .update_columns([
                        user_service::Column::AccessToken,
                        user_service::Column::RefreshToken,
                        user_service::Column::TokenExpiresAt,
                        user_service::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.db.conn)
            .await?;
        Ok(())
    }

    /// Returns whether a credential was removed.
    pub async fn delete(&self, user_id: &str, provider: Provider) -> Result<bool, HubError> {
        let result = user_service::Entity::delete_many()
            .filter(user_service::Column::UserId.eq(user_id))
            .filter(user_service::Column::Service.eq(provider))
            .exec(&self.db.conn)
            .await?;
        Ok(result.rows_affected > 0)
    }

    pub async fn providers_for(&self, user_id: &str) -> Result<Vec<Provider>, HubError> {
        let rows = user_service::Entity::find()
            .filter(user_service::Column::UserId.eq(user_id))
            .order_by_asc(user_service::Column::Service)
            .all(&self.db.conn)
            .await?;
        Ok(rows.into_iter().map(|row| row.service).collect())
    }

    pub async fn all(&self) -> Result<Vec<Credential>, HubError> {
        let rows = user_service::Entity::find()
            .order_by_asc(user_service::Column::UserId)
            .all(&self.db.conn)
            .await?;
        Ok(rows
            .into_iter()
            .map(user_service::Model::into_credential)
            .collect())
    }
}
