use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use modelgate_storage::{Storage, StorageSnapshot};

use crate::error::RelayError;

const SHARD_COUNT: usize = 16;

/// Handle returned by `pre_consume`. Exactly one of `refund` / `settle`
/// takes effect per handle; the other becomes a no-op.
#[derive(Debug, Clone)]
pub struct Reservation {
    id: u64,
    pub user_id: i64,
    pub token_id: i64,
    pub amount: i64,
}

impl Reservation {
    pub fn amount(&self) -> i64 {
        self.amount
    }
}

struct PendingReservation {
    user_id: i64,
    token_id: i64,
    amount: i64,
    created_at: Instant,
}

#[derive(Debug, Default, Clone, Copy)]
struct UserBalance {
    available: i64,
}

/// Per-user balance ledger. The ledger is the single writer of a user's
/// balance; mutations serialise on a per-user shard mutex. Settled costs are
/// written behind to storage; the in-memory view is authoritative while the
/// process lives.
pub struct QuotaLedger {
    shards: Vec<Mutex<HashMap<i64, UserBalance>>>,
    pending: Mutex<HashMap<u64, PendingReservation>>,
    next_id: AtomicU64,
    storage: Arc<dyn Storage>,
    reservation_ttl: Duration,
}

impl QuotaLedger {
    pub fn new(
        snapshot: &StorageSnapshot,
        storage: Arc<dyn Storage>,
        reservation_ttl: Duration,
    ) -> Arc<Self> {
        let mut maps: Vec<HashMap<i64, UserBalance>> = (0..SHARD_COUNT)
            .map(|_| HashMap::new())
            .collect();
        for user in &snapshot.users {
            let index = (user.id as u64 % SHARD_COUNT as u64) as usize;
            maps[index].insert(
                user.id,
                UserBalance {
                    available: user.quota,
                },
            );
        }
        let ledger = Arc::new(Self {
            shards: maps.into_iter().map(Mutex::new).collect(),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            storage,
            reservation_ttl,
        });
        ledger.clone().spawn_sweeper();
        ledger
    }

    fn shard(&self, user_id: i64) -> &Mutex<HashMap<i64, UserBalance>> {
        let index = (user_id as u64 % SHARD_COUNT as u64) as usize;
        &self.shards[index]
    }

    /// Reserve `amount` from the user's balance before dispatch. Free models
    /// and realtime sessions (whose usage is unknown up front) pass
    /// `amount = 0`; the pending entry is recorded regardless so settlement
    /// can still debit against it.
    pub async fn pre_consume(
        &self,
        user_id: i64,
        token_id: i64,
        amount: i64,
    ) -> Result<Reservation, RelayError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if amount > 0 {
            let mut shard = self.shard(user_id).lock().await;
            let balance = shard.entry(user_id).or_default();
            if balance.available < amount {
                return Err(RelayError::insufficient_quota());
            }
            balance.available -= amount;
        }
        self.pending.lock().await.insert(
            id,
            PendingReservation {
                user_id,
                token_id,
                amount,
                created_at: Instant::now(),
            },
        );
        Ok(Reservation {
            id,
            user_id,
            token_id,
            amount,
        })
    }

    /// Mark the reservation as still in use so the TTL sweeper leaves it
    /// alone. Long-lived streams and realtime tunnels call this while their
    /// connection is open; an already settled or refunded handle is a no-op.
    pub async fn touch(&self, reservation: &Reservation) {
        if let Some(entry) = self.pending.lock().await.get_mut(&reservation.id) {
            entry.created_at = Instant::now();
        }
    }

    /// Return the full reservation to the balance. Safe to call at most once
    /// per handle; a second call (or a call after settle) is a no-op.
    pub async fn refund(&self, reservation: &Reservation) {
        let Some(entry) = self.pending.lock().await.remove(&reservation.id) else {
            return;
        };
        let mut shard = self.shard(entry.user_id).lock().await;
        shard.entry(entry.user_id).or_default().available += entry.amount;
    }

    /// Reconcile the reservation against the actual cost: refund the excess
    /// or debit the shortfall, then persist the settled cost. Idempotent per
    /// handle.
    pub async fn settle(&self, reservation: &Reservation, actual_cost: i64) {
        let Some(entry) = self.pending.lock().await.remove(&reservation.id) else {
            return;
        };
        let delta = entry.amount - actual_cost;
        if delta != 0 {
            let mut shard = self.shard(entry.user_id).lock().await;
            shard.entry(entry.user_id).or_default().available += delta;
        }
        let storage = self.storage.clone();
        let (user_id, token_id) = (entry.user_id, entry.token_id);
        // Persistence is write-behind; it must never hold up the response.
        tokio::spawn(async move {
            if let Err(err) = storage.apply_quota_delta(user_id, token_id, -actual_cost).await {
                warn!(
                    event = "ledger_persist_failed",
                    user_id,
                    error = %err,
                    "settled cost not persisted"
                );
            }
        });
    }

    pub async fn balance(&self, user_id: i64) -> i64 {
        let shard = self.shard(user_id).lock().await;
        shard.get(&user_id).map(|b| b.available).unwrap_or(0)
    }

    pub async fn set_balance(&self, user_id: i64, available: i64) {
        let mut shard = self.shard(user_id).lock().await;
        shard.insert(user_id, UserBalance { available });
    }

    /// Reservations neither settled nor refunded within the TTL are swept
    /// back to the balance. Covers crashes of the dispatch task; live
    /// streams and tunnels stay out of reach by refreshing via `touch`.
    fn spawn_sweeper(self: Arc<Self>) {
        let ttl = self.reservation_ttl;
        if ttl.is_zero() {
            return;
        }
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(ttl / 4);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                let now = Instant::now();
                let expired: Vec<(u64, PendingReservation)> = {
                    let mut pending = self.pending.lock().await;
                    let ids: Vec<u64> = pending
                        .iter()
                        .filter(|(_, entry)| now.duration_since(entry.created_at) >= ttl)
                        .map(|(id, _)| *id)
                        .collect();
                    ids.into_iter()
                        .filter_map(|id| pending.remove(&id).map(|entry| (id, entry)))
                        .collect()
                };
                for (id, entry) in expired {
                    info!(
                        event = "ledger_reservation_swept",
                        reservation_id = id,
                        user_id = entry.user_id,
                        amount = entry.amount,
                        "abandoned reservation refunded"
                    );
                    let mut shard = self.shard(entry.user_id).lock().await;
                    shard.entry(entry.user_id).or_default().available += entry.amount;
                }
            }
        });
    }
}
