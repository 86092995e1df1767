use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "error_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: i64,
    pub token_id: i64,
    pub channel_id: i64,
    pub model: String,
    pub error_code: String,
    pub status_code: i32,
    pub message: String,
    pub other: Json,
    pub created_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
