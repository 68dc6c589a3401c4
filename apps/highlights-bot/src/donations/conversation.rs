use std::sync::Arc;

use crate::identity::UserId;
use crate::kv::{KvKey, KvStore, StoreError, get_json, set_json};
use crate::transport::MessageId;

const CUSTOM_PROMPT_NS: &str = "custom_donation_prompt";

/// Tracks the outstanding "enter a custom amount" prompt per user.
///
/// Only the latest prompt is honoured: a new prompt overwrites the previous
/// one, and a reply is accepted only when it answers the stored prompt id.
#[derive(Clone)]
pub struct ConversationTracker {
    store: Arc<dyn KvStore>,
}

impl ConversationTracker {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn set_pending_prompt(
        &self,
        user_id: UserId,
        prompt_message_id: MessageId,
    ) -> Result<(), StoreError> {
        set_json(self.store.as_ref(), &prompt_key(user_id), &prompt_message_id).await
    }

    pub async fn pending_prompt(&self, user_id: UserId) -> Result<Option<MessageId>, StoreError> {
        get_json(self.store.as_ref(), &prompt_key(user_id)).await
    }

    /// Deletes the pending prompt and returns true iff `reply_to` is exactly
    /// the stored prompt id. Anything else leaves the state untouched.
    pub async fn consume_if_matches(
        &self,
        user_id: UserId,
        reply_to: Option<MessageId>,
    ) -> Result<bool, StoreError> {
        let Some(reply_to) = reply_to else {
            return Ok(false);
        };
        match self.pending_prompt(user_id).await? {
            Some(prompt_id) if prompt_id == reply_to => {
                self.store.delete(&prompt_key(user_id)).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

fn prompt_key(user_id: UserId) -> KvKey {
    KvKey::new(CUSTOM_PROMPT_NS).int(user_id)
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::ConversationTracker;
    use crate::kv;

    #[tokio::test]
    async fn only_latest_prompt_is_consumed_once() -> Result<()> {
        let tracker = ConversationTracker::new(kv::memory());
        tracker.set_pending_prompt(1, 100).await?;
        tracker.set_pending_prompt(1, 105).await?;

        assert!(!tracker.consume_if_matches(1, Some(100)).await?);
        assert!(!tracker.consume_if_matches(1, None).await?);
        assert!(!tracker.consume_if_matches(2, Some(105)).await?);
        assert_eq!(tracker.pending_prompt(1).await?, Some(105));

        assert!(tracker.consume_if_matches(1, Some(105)).await?);
        assert!(!tracker.consume_if_matches(1, Some(105)).await?);
        assert_eq!(tracker.pending_prompt(1).await?, None);
        Ok(())
    }
}
