use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "channels")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub channel_type: String,
    pub name: String,
    pub base_url: String,
    pub key: String,
    /// Comma-separated model list.
    pub models: String,
    /// Comma-separated group list.
    pub groups: String,
    /// 1 enabled, 2 disabled, 3 auto-disabled.
    pub status: i32,
    pub priority: i64,
    pub fallback_channel_id: Option<i64>,
    pub settings: Json,
    pub auto_ban: bool,
    pub disable_reason: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
