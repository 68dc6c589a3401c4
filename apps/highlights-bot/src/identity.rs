//! Identity store: user records and the verification-key inverse index.
//!
//! Layout:
//! - `["users", user_id]` -> [`UserRecord`]
//! - `["user_keys", key]` -> `user_id`
//!
//! The per-user record is authoritative. The inverse index is a lookup
//! accelerator that may go stale after a crash or a racing rotation, so every
//! lookup through it is confirmed against the record before it is trusted.

use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::kv::{KvKey, KvStore, StoreError, get_json, set_json};

pub type UserId = i64;

const USERS_NS: &str = "users";
const USER_KEYS_NS: &str = "user_keys";

pub const VERIFICATION_KEY_LEN: usize = 8;
const VERIFICATION_KEY_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const KEY_GENERATION_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    Dark,
    Light,
}

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dark => "dark",
            Self::Light => "light",
        }
    }

    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Self::Dark => Self::Light,
            Self::Light => Self::Dark,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "dark" => Some(Self::Dark),
            "light" => Some(Self::Light),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub key: String,
    pub theme: Theme,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyResolution {
    Unknown,
    /// The index names a user that has no record.
    Orphaned(UserId),
    Resolved(UserId, UserRecord),
}

impl KeyResolution {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Self::Resolved(user_id, _) => Some(*user_id),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct IdentityStore {
    store: Arc<dyn KvStore>,
}

impl IdentityStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn get_record(&self, user_id: UserId) -> Result<Option<UserRecord>, StoreError> {
        get_json(self.store.as_ref(), &user_key(user_id)).await
    }

    pub async fn get_user_id_by_key(&self, key: &str) -> Result<Option<UserId>, StoreError> {
        get_json(self.store.as_ref(), &inverse_key(key)).await
    }

    /// Resolves a presented verification key to its owner. A dangling inverse
    /// entry whose user has since rotated away from `key` is `Unknown`.
    pub async fn resolve_key(&self, key: &str) -> Result<KeyResolution, StoreError> {
        let Some(user_id) = self.get_user_id_by_key(key).await? else {
            return Ok(KeyResolution::Unknown);
        };
        match self.get_record(user_id).await? {
            Some(record) if record.key == key => Ok(KeyResolution::Resolved(user_id, record)),
            Some(_) => {
                tracing::warn!(user_id, "stale verification key index entry");
                Ok(KeyResolution::Unknown)
            }
            None => Ok(KeyResolution::Orphaned(user_id)),
        }
    }

    /// Writes `record` for `user_id` and moves the inverse index with it.
    ///
    /// Order: drop the stale inverse entry, write the record, write the new
    /// inverse entry. Each step is a single-key write. A crash after the first
    /// step leaves the user temporarily unresolvable; a crash after the second
    /// leaves no entry for the new key. Neither state resolves a key to the
    /// wrong user, and `resolve_key` rejects any entry the record disowns.
    pub async fn set_record(&self, user_id: UserId, record: &UserRecord) -> Result<(), StoreError> {
        if let Some(existing) = self.get_record(user_id).await? {
            if existing.key != record.key {
                self.store.delete(&inverse_key(&existing.key)).await?;
            }
        }
        set_json(self.store.as_ref(), &user_key(user_id), record).await?;
        set_json(self.store.as_ref(), &inverse_key(&record.key), &user_id).await?;
        Ok(())
    }

    /// Returns the user's record, creating one with a fresh key and the dark
    /// theme when none exists. The flag reports whether a record was created.
    pub async fn ensure_record(&self, user_id: UserId) -> Result<(UserRecord, bool), StoreError> {
        if let Some(record) = self.get_record(user_id).await? {
            return Ok((record, false));
        }
        let record = UserRecord {
            key: self.generate_unused_key().await?,
            theme: Theme::Dark,
        };
        self.set_record(user_id, &record).await?;
        tracing::info!(user_id, "created user record");
        Ok((record, true))
    }

    /// Issues a new verification key, keeping the current theme.
    pub async fn rotate_key(&self, user_id: UserId) -> Result<UserRecord, StoreError> {
        let theme = self
            .get_record(user_id)
            .await?
            .map_or(Theme::Dark, |record| record.theme);
        let record = UserRecord {
            key: self.generate_unused_key().await?,
            theme,
        };
        self.set_record(user_id, &record).await?;
        tracing::info!(user_id, "rotated verification key");
        Ok(record)
    }

    pub async fn set_theme(
        &self,
        user_id: UserId,
        theme: Theme,
    ) -> Result<Option<UserRecord>, StoreError> {
        let Some(mut record) = self.get_record(user_id).await? else {
            return Ok(None);
        };
        record.theme = theme;
        self.set_record(user_id, &record).await?;
        Ok(Some(record))
    }

    async fn generate_unused_key(&self) -> Result<String, StoreError> {
        self.generate_unused_key_with(generate_verification_key).await
    }

    async fn generate_unused_key_with(
        &self,
        mut next_candidate: impl FnMut() -> String,
    ) -> Result<String, StoreError> {
        for _ in 0..KEY_GENERATION_ATTEMPTS {
            let candidate = next_candidate();
            if self.get_user_id_by_key(&candidate).await?.is_none() {
                return Ok(candidate);
            }
            tracing::warn!("verification key collision, regenerating");
        }
        Err(StoreError::Conflict(format!(
            "no unused verification key after {KEY_GENERATION_ATTEMPTS} attempts"
        )))
    }
}

pub fn generate_verification_key() -> String {
    let mut rng = rand::rng();
    (0..VERIFICATION_KEY_LEN)
        .map(|_| {
            let index = rng.random_range(0..VERIFICATION_KEY_ALPHABET.len());
            char::from(VERIFICATION_KEY_ALPHABET[index])
        })
        .collect()
}

fn user_key(user_id: UserId) -> KvKey {
    KvKey::new(USERS_NS).int(user_id)
}

fn inverse_key(key: &str) -> KvKey {
    KvKey::new(USER_KEYS_NS).str(key)
}
