use std::sync::Arc;

use chrono::Utc;

use crate::donations::types::{CapturedPayment, DonationRecord};
use crate::identity::UserId;
use crate::kv::{KvKey, KvStore, StoreError, get_json, list_json, set_json};

const DONATIONS_NS: &str = "donations";
const TIMESTAMP_SEARCH_LIMIT: i64 = 1_000;

/// Append-only per-user donation log keyed by `["donations", user_id, timestamp_ms]`.
#[derive(Clone)]
pub struct DonationLedger {
    store: Arc<dyn KvStore>,
}

impl DonationLedger {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn record(&self, payment: CapturedPayment) -> Result<DonationRecord, StoreError> {
        self.record_at(payment, Utc::now().timestamp_millis()).await
    }

    /// Stores `payment` at the first free millisecond at or after `timestamp`.
    /// The search is a read-then-write, so two captures racing on the same
    /// millisecond for the same user can still overwrite one another.
    pub async fn record_at(
        &self,
        payment: CapturedPayment,
        timestamp: i64,
    ) -> Result<DonationRecord, StoreError> {
        let mut timestamp = timestamp;
        for _ in 0..TIMESTAMP_SEARCH_LIMIT {
            if self.store.get(&donation_key(payment.payer, timestamp)).await?.is_none() {
                break;
            }
            timestamp += 1;
        }

        let record = DonationRecord {
            user_id: payment.payer,
            stars: payment.stars,
            timestamp,
            payment_charge_id: payment.payment_charge_id,
            refunded: false,
        };
        set_json(
            self.store.as_ref(),
            &donation_key(record.user_id, record.timestamp),
            &record,
        )
        .await?;
        tracing::info!(
            user_id = record.user_id,
            stars = record.stars,
            timestamp = record.timestamp,
            "donation recorded"
        );
        Ok(record)
    }

    pub async fn get(
        &self,
        user_id: UserId,
        timestamp: i64,
    ) -> Result<Option<DonationRecord>, StoreError> {
        get_json(self.store.as_ref(), &donation_key(user_id, timestamp)).await
    }

    /// All donations for `user_id` in ascending timestamp order.
    pub async fn list_for_user(&self, user_id: UserId) -> Result<Vec<DonationRecord>, StoreError> {
        let prefix = KvKey::new(DONATIONS_NS).int(user_id);
        Ok(list_json::<DonationRecord>(self.store.as_ref(), &prefix)
            .await?
            .into_iter()
            .map(|(_, record)| record)
            .collect())
    }

    /// Flips `refunded` to true. The record is re-read immediately before the
    /// write; when another writer already flipped it the write is skipped, and
    /// since both writers would store the same terminal value the race is benign.
    /// Returns `None` when no record exists.
    pub async fn mark_refunded(
        &self,
        user_id: UserId,
        timestamp: i64,
    ) -> Result<Option<DonationRecord>, StoreError> {
        let Some(current) = self.get(user_id, timestamp).await? else {
            return Ok(None);
        };
        let Some(refundable) = current.clone().into_refundable() else {
            return Ok(Some(current));
        };
        let updated = refundable.into_refunded();
        set_json(
            self.store.as_ref(),
            &donation_key(user_id, timestamp),
            &updated,
        )
        .await?;
        Ok(Some(updated))
    }
}

fn donation_key(user_id: UserId, timestamp: i64) -> KvKey {
    KvKey::new(DONATIONS_NS).int(user_id).int(timestamp)
}
