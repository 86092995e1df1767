use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, ConnectionTrait, Database, DatabaseBackend,
    DatabaseConnection, EntityTrait, QueryFilter, Schema,
};
use time::OffsetDateTime;

use crate::entities;
use crate::snapshot::{ChannelRow, ChannelStatus, ErrorLogRow, StorageSnapshot, TokenRow, UserRow};
use crate::storage::{Storage, StorageError, StorageResult};

#[derive(Clone)]
pub struct SeaOrmStorage {
    db: DatabaseConnection,
}

impl SeaOrmStorage {
    pub async fn connect(dsn: &str) -> StorageResult<Self> {
        let db = Database::connect(dsn).await?;
        if db.get_database_backend() == DatabaseBackend::Sqlite {
            db.execute_unprepared("PRAGMA foreign_keys = ON").await?;
        }
        Ok(Self { db })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

fn status_to_i32(status: ChannelStatus) -> i32 {
    match status {
        ChannelStatus::Enabled => 1,
        ChannelStatus::Disabled => 2,
        ChannelStatus::AutoDisabled => 3,
    }
}

fn status_from_i32(value: i32) -> ChannelStatus {
    match value {
        2 => ChannelStatus::Disabled,
        3 => ChannelStatus::AutoDisabled,
        _ => ChannelStatus::Enabled,
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn join_list(items: &[String]) -> String {
    items.join(",")
}

#[async_trait]
impl Storage for SeaOrmStorage {
    async fn sync(&self) -> StorageResult<()> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::Channels)
            .register(entities::Users)
            .register(entities::Tokens)
            .register(entities::ErrorLogs)
            .sync(&self.db)
            .await?;
        Ok(())
    }

    async fn load_snapshot(&self) -> StorageResult<StorageSnapshot> {
        let channels = entities::Channels::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| ChannelRow {
                id: m.id,
                channel_type: m.channel_type,
                name: m.name,
                base_url: m.base_url,
                key: m.key,
                models: split_list(&m.models),
                groups: split_list(&m.groups),
                status: status_from_i32(m.status),
                priority: u32::try_from(m.priority).unwrap_or(0),
                fallback_channel_id: m.fallback_channel_id,
                settings_json: m.settings,
                auto_ban: m.auto_ban,
                updated_at: m.updated_at,
            })
            .collect();

        let users = entities::Users::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| UserRow {
                id: m.id,
                username: m.username,
                group: m.group,
                quota: m.quota,
                enabled: m.enabled,
                admin: m.admin,
                updated_at: m.updated_at,
            })
            .collect();

        let tokens = entities::Tokens::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| TokenRow {
                id: m.id,
                user_id: m.user_id,
                key: m.key,
                name: m.name,
                unlimited_quota: m.unlimited_quota,
                remain_quota: m.remain_quota,
                ip_allow_list: split_list(&m.ip_allow_list),
                group: m.group,
                model_allow_list: split_list(&m.model_allow_list),
                cross_group_retry: m.cross_group_retry,
                enabled: m.enabled,
                updated_at: m.updated_at,
            })
            .collect();

        Ok(StorageSnapshot {
            channels,
            users,
            tokens,
        })
    }

    async fn upsert_channel(&self, row: &ChannelRow) -> StorageResult<i64> {
        use entities::channels::Column;
        let now = OffsetDateTime::now_utc();
        let existing = entities::Channels::find()
            .filter(Column::Id.eq(row.id))
            .one(&self.db)
            .await?;
        match existing {
            Some(model) => {
                let mut active: entities::channels::ActiveModel = model.into();
                active.channel_type = ActiveValue::Set(row.channel_type.clone());
                active.name = ActiveValue::Set(row.name.clone());
                active.base_url = ActiveValue::Set(row.base_url.clone());
                active.key = ActiveValue::Set(row.key.clone());
                active.models = ActiveValue::Set(join_list(&row.models));
                active.groups = ActiveValue::Set(join_list(&row.groups));
                active.status = ActiveValue::Set(status_to_i32(row.status));
                active.priority = ActiveValue::Set(i64::from(row.priority));
                active.fallback_channel_id = ActiveValue::Set(row.fallback_channel_id);
                active.settings = ActiveValue::Set(row.settings_json.clone());
                active.auto_ban = ActiveValue::Set(row.auto_ban);
                active.updated_at = ActiveValue::Set(now);
                let model = active.update(&self.db).await?;
                Ok(model.id)
            }
            None => {
                let active = entities::channels::ActiveModel {
                    id: ActiveValue::NotSet,
                    channel_type: ActiveValue::Set(row.channel_type.clone()),
                    name: ActiveValue::Set(row.name.clone()),
                    base_url: ActiveValue::Set(row.base_url.clone()),
                    key: ActiveValue::Set(row.key.clone()),
                    models: ActiveValue::Set(join_list(&row.models)),
                    groups: ActiveValue::Set(join_list(&row.groups)),
                    status: ActiveValue::Set(status_to_i32(row.status)),
                    priority: ActiveValue::Set(i64::from(row.priority)),
                    fallback_channel_id: ActiveValue::Set(row.fallback_channel_id),
                    settings: ActiveValue::Set(row.settings_json.clone()),
                    auto_ban: ActiveValue::Set(row.auto_ban),
                    disable_reason: ActiveValue::Set(None),
                    created_at: ActiveValue::Set(now),
                    updated_at: ActiveValue::Set(now),
                };
                let model = active.insert(&self.db).await?;
                Ok(model.id)
            }
        }
    }

    async fn delete_channel(&self, channel_id: i64) -> StorageResult<()> {
        entities::Channels::delete_by_id(channel_id)
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn set_channel_status(
        &self,
        channel_id: i64,
        status: ChannelStatus,
        reason: Option<&str>,
    ) -> StorageResult<()> {
        let model = entities::Channels::find_by_id(channel_id)
            .one(&self.db)
            .await?
            .ok_or(StorageError::NotFound("channel"))?;
        let mut active: entities::channels::ActiveModel = model.into();
        active.status = ActiveValue::Set(status_to_i32(status));
        active.disable_reason = ActiveValue::Set(reason.map(str::to_string));
        active.updated_at = ActiveValue::Set(OffsetDateTime::now_utc());
        active.update(&self.db).await?;
        Ok(())
    }

    async fn apply_quota_delta(
        &self,
        user_id: i64,
        token_id: i64,
        delta: i64,
    ) -> StorageResult<()> {
        let user = entities::Users::find_by_id(user_id)
            .one(&self.db)
            .await?
            .ok_or(StorageError::NotFound("user"))?;
        let quota = user.quota.saturating_add(delta);
        let used = user.used_quota.saturating_sub(delta.min(0));
        let mut active: entities::users::ActiveModel = user.into();
        active.quota = ActiveValue::Set(quota);
        active.used_quota = ActiveValue::Set(used);
        active.updated_at = ActiveValue::Set(OffsetDateTime::now_utc());
        active.update(&self.db).await?;

        if let Some(token) = entities::Tokens::find_by_id(token_id).one(&self.db).await?
            && !token.unlimited_quota
        {
            let remain = token.remain_quota.saturating_add(delta);
            let mut active: entities::tokens::ActiveModel = token.into();
            active.remain_quota = ActiveValue::Set(remain);
            active.updated_at = ActiveValue::Set(OffsetDateTime::now_utc());
            active.update(&self.db).await?;
        }
        Ok(())
    }

    async fn append_error_log(&self, row: &ErrorLogRow) -> StorageResult<()> {
        let active = entities::error_logs::ActiveModel {
            id: ActiveValue::NotSet,
            user_id: ActiveValue::Set(row.user_id),
            token_id: ActiveValue::Set(row.token_id),
            channel_id: ActiveValue::Set(row.channel_id),
            model: ActiveValue::Set(row.model.clone()),
            error_code: ActiveValue::Set(row.error_code.clone()),
            status_code: ActiveValue::Set(row.status_code),
            message: ActiveValue::Set(row.message.clone()),
            other: ActiveValue::Set(row.other_json.clone()),
            created_at: ActiveValue::Set(row.created_at),
        };
        active.insert(&self.db).await?;
        Ok(())
    }
}
