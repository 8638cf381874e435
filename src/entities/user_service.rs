use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue::Set};

use crate::models::Credential;
use crate::provider::Provider;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "user_services")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: String,
    pub service: Provider,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Model {
    pub fn into_credential(self) -> Credential {
        Credential {
            user_id: self.user_id,
            provider: self.service,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self
                .token_expires_at
                .and_then(DateTime::<Utc>::from_timestamp_millis),
        }
    }
}

impl ActiveModel {
    pub fn from_credential(credential: &Credential) -> Self {
        Self {
            user_id: Set(credential.user_id.clone()),
            service: Set(credential.provider),
            access_token: Set(credential.access_token.clone()),
            refresh_token: Set(credential.refresh_token.clone()),
            token_expires_at: Set(credential.expires_at.map(|at| at.timestamp_millis())),
            ..ActiveModel::new()
        }
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    fn new() -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            created_at: Set(now),
            updated_at: Set(now),
            ..ActiveModelTrait::default()
        }
    }

    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, sea_orm::DbErr>
    where
        C: ConnectionTrait,
    {
        if !insert {
            self.updated_at = Set(chrono::Utc::now().timestamp());
        }
        Ok(self)
    }
}
