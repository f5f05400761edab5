//! Message definitions for the broker
//!
//! `Message` is the envelope that travels through topics and queues. The
//! payload is immutable once created; the delivery fields are owned by the
//! queue that currently holds the message.
//!
//! Notes on fields:
//! - `id`: unique id, assigned at creation and again for every fan-out copy
//! - `message_type`: application-level discriminator (e.g. `order.created`)
//! - `payload`: JSON-encoded body, decoded by the consumer
//! - `metadata`: provenance (`source_topic`, `delivery_id`) and correlation keys
//! - `timestamp`: creation time; copies keep the original
//! - `retry_count`: number of times the message has been leased
//! - `visible_at`: lease deadline; `None` means immediately visible
//! - `receipt_handle`: token of the current lease, required to ack or nack

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utils::error::{BrokerError, Result};

/// A message envelope as held by a topic or queue
/// Serializes as JSON for logging or forwarding; the lease fields (`visible_at`
/// and `receipt_handle`) belong to the holding queue and are not serialized, so a
/// deserialized message always starts out visible and unleased.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub payload: Vec<u8>,
    pub metadata: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
    #[serde(skip)]
    pub visible_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub receipt_handle: Option<String>,
}

impl Message {
    /// Create a message by serializing `payload` as JSON.
    pub fn new<T: Serialize + ?Sized>(message_type: &str, payload: &T) -> Result<Self> {
        let payload = serde_json::to_vec(payload).map_err(BrokerError::Encoding)?;

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            message_type: message_type.to_string(),
            payload,
            metadata: HashMap::new(),
            timestamp: Utc::now(),
            retry_count: 0,
            visible_at: None,
            receipt_handle: None,
        })
    }

    /// Decode the payload into the caller's shape.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.payload).map_err(BrokerError::Decoding)
    }

    /// Set a metadata entry, replacing any previous value for `key`.
    pub fn set_metadata(&mut self, key: &str, value: impl Into<String>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    /// Read a metadata value. Missing keys read as the empty string.
    pub fn get_metadata(&self, key: &str) -> &str {
        self.metadata.get(key).map(String::as_str).unwrap_or("")
    }

    /// Deep copy with a fresh identity.
    ///
    /// The copy gets a new id and a zero retry count and carries no lease; the
    /// original timestamp is preserved. Fan-out and dead-lettering use this so
    /// every holder owns an independent mutable message.
    pub fn fork(&self) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message_type: self.message_type.clone(),
            payload: self.payload.clone(),
            metadata: self.metadata.clone(),
            timestamp: self.timestamp,
            retry_count: 0,
            visible_at: None,
            receipt_handle: None,
        }
    }

    /// True iff no lease is outstanding or the lease deadline has passed.
    pub fn is_visible(&self) -> bool {
        self.is_visible_at(Utc::now())
    }

    pub(crate) fn is_visible_at(&self, now: DateTime<Utc>) -> bool {
        match self.visible_at {
            None => true,
            Some(deadline) => deadline <= now,
        }
    }

    /// Time elapsed since the message was created.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.timestamp
    }
}
