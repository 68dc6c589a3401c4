//! Recording fakes for the outbound collaborators, shared by unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::highlight::{HighlightCard, HighlightRenderer, RenderError};
use crate::identity::UserId;
use crate::kv::{self, KvEntry, KvKey, KvStore, StoreError};
use crate::transport::{
    ChatTransport, InvoiceRequest, MessageId, OutboundMessage, PaymentProvider, PrecheckDecision,
    TransportError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Message {
        chat_id: UserId,
        message_id: MessageId,
        message: OutboundMessage,
    },
    Photo {
        chat_id: UserId,
        bytes: usize,
        file_name: String,
    },
    Edit {
        chat_id: UserId,
        message_id: MessageId,
        message: OutboundMessage,
    },
    CallbackAnswer {
        id: String,
        text: Option<String>,
    },
}

#[derive(Default)]
pub struct RecordingChat {
    next_id: AtomicI64,
    sent: Mutex<Vec<Sent>>,
}

impl RecordingChat {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicI64::new(1000),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub async fn sent(&self) -> Vec<Sent> {
        self.sent.lock().await.clone()
    }

    /// Text of every message and edit delivered to `chat_id`, in order.
    pub async fn texts_to(&self, chat_id: UserId) -> Vec<String> {
        self.sent
            .lock()
            .await
            .iter()
            .filter_map(|sent| match sent {
                Sent::Message {
                    chat_id: to,
                    message,
                    ..
                }
                | Sent::Edit {
                    chat_id: to,
                    message,
                    ..
                } if *to == chat_id => Some(message.text.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn last_message_id(&self) -> Option<MessageId> {
        self.sent.lock().await.iter().rev().find_map(|sent| match sent {
            Sent::Message { message_id, .. } => Some(*message_id),
            _ => None,
        })
    }
}

#[async_trait]
impl ChatTransport for RecordingChat {
    async fn send_message(
        &self,
        chat_id: UserId,
        message: OutboundMessage,
    ) -> Result<MessageId, TransportError> {
        let message_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().await.push(Sent::Message {
            chat_id,
            message_id,
            message,
        });
        Ok(message_id)
    }

    async fn send_photo(
        &self,
        chat_id: UserId,
        image: Vec<u8>,
        file_name: &str,
    ) -> Result<MessageId, TransportError> {
        let message_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().await.push(Sent::Photo {
            chat_id,
            bytes: image.len(),
            file_name: file_name.to_string(),
        });
        Ok(message_id)
    }

    async fn edit_message_text(
        &self,
        chat_id: UserId,
        message_id: MessageId,
        message: OutboundMessage,
    ) -> Result<(), TransportError> {
        self.sent.lock().await.push(Sent::Edit {
            chat_id,
            message_id,
            message,
        });
        Ok(())
    }

    async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<(), TransportError> {
        self.sent.lock().await.push(Sent::CallbackAnswer {
            id: callback_query_id.to_string(),
            text: text.map(str::to_string),
        });
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingPayments {
    pub fail_invoices: AtomicBool,
    pub fail_reversals: AtomicBool,
    /// Number of upcoming pre-checkout answers to fail.
    pub fail_answers: AtomicUsize,
    invoices: Mutex<Vec<InvoiceRequest>>,
    prechecks: Mutex<Vec<(String, PrecheckDecision)>>,
    reversals: Mutex<Vec<(UserId, String)>>,
}

impl RecordingPayments {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn invoices(&self) -> Vec<InvoiceRequest> {
        self.invoices.lock().await.clone()
    }

    pub async fn prechecks(&self) -> Vec<(String, PrecheckDecision)> {
        self.prechecks.lock().await.clone()
    }

    pub async fn reversals(&self) -> Vec<(UserId, String)> {
        self.reversals.lock().await.clone()
    }
}

#[async_trait]
impl PaymentProvider for RecordingPayments {
    async fn issue_invoice(&self, invoice: InvoiceRequest) -> Result<(), TransportError> {
        if self.fail_invoices.load(Ordering::SeqCst) {
            return Err(TransportError::Api {
                code: 400,
                description: "Bad Request: invoice rejected".to_string(),
            });
        }
        self.invoices.lock().await.push(invoice);
        Ok(())
    }

    async fn answer_pre_checkout_query(
        &self,
        query_id: &str,
        decision: &PrecheckDecision,
    ) -> Result<(), TransportError> {
        let pending_failures = self.fail_answers.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.fail_answers.store(pending_failures - 1, Ordering::SeqCst);
            return Err(TransportError::Transport("connection reset".to_string()));
        }
        self.prechecks
            .lock()
            .await
            .push((query_id.to_string(), decision.clone()));
        Ok(())
    }

    async fn reverse_charge(&self, user_id: UserId, charge_id: &str) -> Result<(), TransportError> {
        if self.fail_reversals.load(Ordering::SeqCst) {
            return Err(TransportError::Api {
                code: 400,
                description: "Bad Request: refund rejected".to_string(),
            });
        }
        let mut reversals = self.reversals.lock().await;
        if reversals.iter().any(|(_, reversed)| reversed == charge_id) {
            return Err(TransportError::Api {
                code: 400,
                description: "Bad Request: CHARGE_ALREADY_REFUNDED".to_string(),
            });
        }
        reversals.push((user_id, charge_id.to_string()));
        Ok(())
    }
}

/// In-memory store whose writes can be switched to fail.
pub struct FlakyStore {
    inner: Arc<dyn KvStore>,
    pub fail_writes: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: kv::memory(),
            fail_writes: AtomicBool::new(false),
        })
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Db("connection reset".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for FlakyStore {
    async fn get(&self, key: &KvKey) -> Result<Option<Value>, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &KvKey, value: Value) -> Result<(), StoreError> {
        self.check_writable()?;
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &KvKey) -> Result<(), StoreError> {
        self.check_writable()?;
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &KvKey) -> Result<Vec<KvEntry>, StoreError> {
        self.inner.list(prefix).await
    }
}

/// Renderer that returns a fixed PNG signature and records each card.
#[derive(Default)]
pub struct RecordingRenderer {
    cards: Mutex<Vec<HighlightCard>>,
}

impl RecordingRenderer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn cards(&self) -> Vec<HighlightCard> {
        self.cards.lock().await.clone()
    }
}

#[async_trait]
impl HighlightRenderer for RecordingRenderer {
    async fn render(&self, card: &HighlightCard) -> Result<Vec<u8>, RenderError> {
        self.cards.lock().await.push(card.clone());
        Ok(b"\x89PNG\r\n\x1a\n".to_vec())
    }
}
