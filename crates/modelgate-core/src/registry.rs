use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use modelgate_storage::ChannelStatus;

use crate::channel::Channel;

#[derive(Default)]
struct RouteTable {
    by_id: HashMap<i64, Arc<Channel>>,
    /// (group, model) -> eligible channels, eligibility baked in at build
    /// time: status enabled, model served, group matched.
    by_group_model: HashMap<(String, String), Vec<Arc<Channel>>>,
}

/// In-memory channel index. Readers load a lock-free snapshot; every write
/// path rebuilds and swaps the whole table so a reader never observes a torn
/// view.
pub struct ChannelRegistry {
    table: ArcSwap<RouteTable>,
}

impl ChannelRegistry {
    pub fn new(channels: impl IntoIterator<Item = Channel>) -> Self {
        Self {
            table: ArcSwap::from_pointee(build_table(channels)),
        }
    }

    pub fn lookup_by_id(&self, id: i64) -> Option<Arc<Channel>> {
        self.table.load().by_id.get(&id).cloned()
    }

    /// Channels able to serve `model` for `group`, in priority order.
    pub fn eligible(&self, group: &str, model: &str) -> Vec<Arc<Channel>> {
        self.table
            .load()
            .by_group_model
            .get(&(group.to_string(), model.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Republish from a fresh channel set. Called on any admin mutation;
    /// hard-deleted rows simply stop appearing.
    pub fn rebuild(&self, channels: impl IntoIterator<Item = Channel>) {
        self.table.store(Arc::new(build_table(channels)));
    }

    /// Flip one channel's status and republish. Used by the auto-disable
    /// side effect so routing reflects a ban without a full snapshot reload.
    pub fn set_status(&self, channel_id: i64, status: ChannelStatus) {
        let current = self.table.load();
        let channels: Vec<Channel> = current
            .by_id
            .values()
            .map(|ch| {
                let mut ch = (**ch).clone();
                if ch.id == channel_id {
                    ch.status = status;
                }
                ch
            })
            .collect();
        self.table.store(Arc::new(build_table(channels)));
    }
}

fn build_table(channels: impl IntoIterator<Item = Channel>) -> RouteTable {
    let mut table = RouteTable::default();
    for channel in channels {
        let channel = Arc::new(channel);
        table.by_id.insert(channel.id, channel.clone());
        if !channel.status.is_enabled() {
            continue;
        }
        for group in &channel.groups {
            for model in &channel.models {
                table
                    .by_group_model
                    .entry((group.clone(), model.clone()))
                    .or_default()
                    .push(channel.clone());
            }
        }
    }
    for pool in table.by_group_model.values_mut() {
        pool.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
    }
    table
}
