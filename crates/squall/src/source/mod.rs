//! Notification source: where change notifications come from.

mod pubsub;

pub use pubsub::{
    DEFAULT_PUBSUB_ENDPOINT, EMULATOR_HOST_ENV, PubSubSettings, PubSubSource, qualify_subscription,
    qualify_topic, temporary_subscription,
};

use async_trait::async_trait;
use bytes::Bytes;
use snafu::prelude::*;

use crate::auth::AuthError;
use crate::http::HttpError;

/// Errors talking to the notification channel.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SourceError {
    /// A Pub/Sub API call failed.
    #[snafu(display("Pub/Sub {operation} on {resource} failed: {source}"))]
    Request {
        operation: &'static str,
        resource: String,
        source: HttpError,
    },

    /// No access token could be obtained.
    #[snafu(display("Failed to authenticate Pub/Sub request: {source}"))]
    Auth { source: AuthError },
}

/// One message pulled from the channel, with its body already decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Handle used to acknowledge this delivery.
    pub ack_id: String,
    pub message_id: String,
    /// Decoded body, or the body as received when it could not be decoded.
    pub data: Bytes,
    /// Set when the wire encoding of the body was invalid.
    pub decode_error: Option<base64::DecodeError>,
}

impl ReceivedMessage {
    pub fn new(ack_id: impl Into<String>, message_id: impl Into<String>, data: Bytes) -> Self {
        Self {
            ack_id: ack_id.into(),
            message_id: message_id.into(),
            data,
            decode_error: None,
        }
    }
}

/// A pull-based notification channel.
#[async_trait]
pub trait NotificationSource: Send + Sync {
    /// Pull up to `max_messages` messages. An empty batch means nothing is
    /// waiting right now.
    async fn pull(&self, max_messages: usize) -> Result<Vec<ReceivedMessage>, SourceError>;

    /// Acknowledge deliveries so they are not redelivered.
    async fn ack(&self, ack_ids: &[String]) -> Result<(), SourceError>;

    /// Release deliveries for immediate redelivery.
    async fn nack(&self, ack_ids: &[String]) -> Result<(), SourceError>;

    /// Release any resources created for this job.
    async fn close(&self) -> Result<(), SourceError>;
}
