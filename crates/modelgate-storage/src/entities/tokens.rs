use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "tokens")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: i64,
    #[sea_orm(unique)]
    pub key: String,
    pub name: String,
    pub unlimited_quota: bool,
    pub remain_quota: i64,
    /// Comma-separated CIDR list; empty means unrestricted.
    pub ip_allow_list: String,
    /// Group override; empty means the owner's group.
    #[sea_orm(column_name = "token_group")]
    pub group: String,
    /// Comma-separated model allow list; empty means all models.
    pub model_allow_list: String,
    pub cross_group_retry: bool,
    pub enabled: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
