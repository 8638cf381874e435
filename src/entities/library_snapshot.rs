use async_trait::async_trait;
use sea_orm::entity::prelude::*;
use sea_orm::ActiveModelBehavior;

use crate::provider::Provider;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "library_snapshots")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: String,
    pub service: Provider,
    /// `LibrarySnapshot` serialized as JSON.
    pub payload: String,
    pub last_synced_at: i64,
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {}
