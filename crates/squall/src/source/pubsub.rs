//! Pub/Sub pull subscriber over the REST API.

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use snafu::prelude::*;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{AuthSnafu, NotificationSource, ReceivedMessage, RequestSnafu, SourceError};
use crate::auth::TokenProviderRef;
use crate::http;

/// Public Pub/Sub REST endpoint.
pub const DEFAULT_PUBSUB_ENDPOINT: &str = "https://pubsub.googleapis.com/v1";

/// When set, requests go to a local emulator over plain HTTP.
pub const EMULATOR_HOST_ENV: &str = "PUBSUB_EMULATOR_HOST";

/// Subscription IDs are limited to this many characters.
const MAX_SUBSCRIPTION_ID_LEN: usize = 255;

/// Where and how to subscribe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubSettings {
    pub endpoint: String,
    pub project_id: String,
    /// Topic name or full `projects/{p}/topics/{t}` path.
    pub topic: String,
    /// Existing subscription to read from. A temporary one is created when
    /// absent.
    pub subscription: Option<String>,
    pub ack_deadline_secs: u32,
}

impl PubSubSettings {
    pub fn new(project_id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_PUBSUB_ENDPOINT.to_string(),
            project_id: project_id.into(),
            topic: topic.into(),
            subscription: None,
            ack_deadline_secs: 60,
        }
    }

    /// Point at the emulator named by `PUBSUB_EMULATOR_HOST`, if set.
    ///
    /// Returns whether the emulator is in use.
    pub fn apply_emulator_env(&mut self) -> bool {
        match std::env::var(EMULATOR_HOST_ENV) {
            Ok(host) if !host.is_empty() => {
                self.endpoint = format!("http://{host}/v1");
                true
            }
            _ => false,
        }
    }
}

/// Full topic path for a topic given by name or path.
pub fn qualify_topic(project_id: &str, topic: &str) -> String {
    if topic.starts_with("projects/") {
        topic.to_string()
    } else {
        format!("projects/{project_id}/topics/{topic}")
    }
}

/// Full subscription path for a subscription given by name or path.
pub fn qualify_subscription(project_id: &str, subscription: &str) -> String {
    if subscription.starts_with("projects/") {
        subscription.to_string()
    } else {
        format!("projects/{project_id}/subscriptions/{subscription}")
    }
}

/// A fresh subscription path for reading `topic_path` once.
pub fn temporary_subscription(project_id: &str, topic_path: &str) -> String {
    let topic = topic_path.rsplit('/').next().unwrap_or(topic_path);
    let suffix = Uuid::new_v4().simple().to_string();
    let mut id = format!("squall-{topic}");
    id.truncate(MAX_SUBSCRIPTION_ID_LEN - suffix.len() - 1);
    qualify_subscription(project_id, &format!("{id}-{suffix}"))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<WireReceivedMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReceivedMessage {
    ack_id: String,
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(default)]
    data: String,
    #[serde(default)]
    message_id: String,
}

/// Pull subscriber for one subscription.
pub struct PubSubSource {
    client: reqwest::Client,
    tokens: TokenProviderRef,
    endpoint: String,
    subscription: String,
    temporary: bool,
}

impl std::fmt::Debug for PubSubSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubSource")
            .field("subscription", &self.subscription)
            .field("temporary", &self.temporary)
            .finish_non_exhaustive()
    }
}

impl PubSubSource {
    /// Attach to the configured subscription, creating a temporary one bound
    /// to the topic when none is configured.
    pub async fn connect(
        settings: PubSubSettings,
        client: reqwest::Client,
        tokens: TokenProviderRef,
    ) -> Result<Self, SourceError> {
        let topic = qualify_topic(&settings.project_id, &settings.topic);
        let (subscription, temporary) = match &settings.subscription {
            Some(name) => (qualify_subscription(&settings.project_id, name), false),
            None => (temporary_subscription(&settings.project_id, &topic), true),
        };

        let source = Self {
            client,
            tokens,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            subscription,
            temporary,
        };

        if temporary {
            source
                .create_subscription(&topic, settings.ack_deadline_secs)
                .await?;
            info!(
                subscription = %source.subscription,
                topic = %topic,
                "Created temporary subscription"
            );
        } else {
            info!(subscription = %source.subscription, "Using existing subscription");
        }

        Ok(source)
    }

    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}{}", self.endpoint, self.subscription, method)
    }

    async fn authorize(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, SourceError> {
        let token = self.tokens.token().await.context(AuthSnafu)?;
        Ok(http::authorize(request, token.as_deref()))
    }

    async fn create_subscription(
        &self,
        topic: &str,
        ack_deadline_secs: u32,
    ) -> Result<(), SourceError> {
        let body = json!({
            "topic": topic,
            "ackDeadlineSeconds": ack_deadline_secs,
        });
        let request = self
            .authorize(self.client.put(self.url("")).json(&body))
            .await?;
        match http::send_empty(request).await {
            Err(e) if e.is_conflict() => Ok(()),
            result => result.context(RequestSnafu {
                operation: "create subscription",
                resource: &self.subscription,
            }),
        }
    }

    async fn post(
        &self,
        method: &str,
        operation: &'static str,
        body: serde_json::Value,
    ) -> Result<(), SourceError> {
        let request = self
            .authorize(self.client.post(self.url(method)).json(&body))
            .await?;
        http::send_empty(request).await.context(RequestSnafu {
            operation,
            resource: &self.subscription,
        })
    }
}

#[async_trait]
impl NotificationSource for PubSubSource {
    async fn pull(&self, max_messages: usize) -> Result<Vec<ReceivedMessage>, SourceError> {
        let body = json!({ "maxMessages": max_messages });
        let request = self
            .authorize(self.client.post(self.url(":pull")).json(&body))
            .await?;
        let response: PullResponse = http::send_json(request).await.context(RequestSnafu {
            operation: "pull",
            resource: &self.subscription,
        })?;

        Ok(decode_messages(response.received_messages))
    }

    async fn ack(&self, ack_ids: &[String]) -> Result<(), SourceError> {
        if ack_ids.is_empty() {
            return Ok(());
        }
        self.post(":acknowledge", "acknowledge", json!({ "ackIds": ack_ids }))
            .await
    }

    async fn nack(&self, ack_ids: &[String]) -> Result<(), SourceError> {
        if ack_ids.is_empty() {
            return Ok(());
        }
        self.post(
            ":modifyAckDeadline",
            "modify ack deadline",
            json!({ "ackIds": ack_ids, "ackDeadlineSeconds": 0 }),
        )
        .await
    }

    async fn close(&self) -> Result<(), SourceError> {
        if !self.temporary {
            return Ok(());
        }
        let request = self.authorize(self.client.delete(self.url(""))).await?;
        match http::send_empty(request).await {
            Err(e) if e.is_not_found() => Ok(()),
            result => {
                result.context(RequestSnafu {
                    operation: "delete subscription",
                    resource: &self.subscription,
                })?;
                debug!(subscription = %self.subscription, "Deleted temporary subscription");
                Ok(())
            }
        }
    }
}

/// Decode the base64 bodies of wire messages.
///
/// A body that is not valid base64 is kept as received, with the decode
/// error attached, so the pipeline can fail it like any other malformed
/// input.
fn decode_messages(wire: Vec<WireReceivedMessage>) -> Vec<ReceivedMessage> {
    wire.into_iter()
        .map(|received| {
            let WireReceivedMessage { ack_id, message } = received;
            match base64::engine::general_purpose::STANDARD.decode(&message.data) {
                Ok(data) => ReceivedMessage::new(ack_id, message.message_id, Bytes::from(data)),
                Err(e) => {
                    warn!(
                        message_id = %message.message_id,
                        error = %e,
                        "Message body is not valid base64"
                    );
                    ReceivedMessage {
                        decode_error: Some(e),
                        ..ReceivedMessage::new(
                            ack_id,
                            message.message_id,
                            Bytes::from(message.data),
                        )
                    }
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualify_topic() {
        assert_eq!(
            qualify_topic("proj", "gcs-events"),
            "projects/proj/topics/gcs-events"
        );
        assert_eq!(
            qualify_topic("proj", "projects/other/topics/gcs-events"),
            "projects/other/topics/gcs-events"
        );
    }

    #[test]
    fn test_qualify_subscription() {
        assert_eq!(
            qualify_subscription("proj", "loader"),
            "projects/proj/subscriptions/loader"
        );
    }

    #[test]
    fn test_temporary_subscription_is_unique() {
        let a = temporary_subscription("proj", "projects/proj/topics/gcs-events");
        let b = temporary_subscription("proj", "projects/proj/topics/gcs-events");

        assert!(a.starts_with("projects/proj/subscriptions/squall-gcs-events-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_temporary_subscription_respects_length_limit() {
        let topic = format!("projects/proj/topics/{}", "t".repeat(400));
        let path = temporary_subscription("proj", &topic);
        let id = path.rsplit('/').next().unwrap();
        assert!(id.len() <= MAX_SUBSCRIPTION_ID_LEN);
    }

    #[test]
    fn test_pull_response_decoding() {
        let response: PullResponse = serde_json::from_value(json!({
            "receivedMessages": [
                {
                    "ackId": "a1",
                    "message": {
                        "data": base64::engine::general_purpose::STANDARD
                            .encode(r#"{"name":"orders/123.json","bucket":"raw-events"}"#),
                        "messageId": "m1",
                        "attributes": {"eventType": "OBJECT_FINALIZE"}
                    }
                },
                {"ackId": "a2", "message": {"data": "%%%", "messageId": "m2"}}
            ]
        }))
        .unwrap();

        let messages = decode_messages(response.received_messages);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].ack_id, "a1");
        assert_eq!(messages[0].message_id, "m1");
        assert_eq!(
            messages[0].data,
            Bytes::from_static(br#"{"name":"orders/123.json","bucket":"raw-events"}"#)
        );
        assert_eq!(messages[0].decode_error, None);

        // Undecodable bodies are passed on as received
        assert_eq!(messages[1].ack_id, "a2");
        assert_eq!(messages[1].data, Bytes::from_static(b"%%%"));
        assert!(messages[1].decode_error.is_some());
    }

    #[test]
    fn test_empty_pull_response() {
        let response: PullResponse = serde_json::from_str("{}").unwrap();
        assert!(response.received_messages.is_empty());
    }

    mod rest {
        use std::sync::Arc;

        use mockito::{Matcher, Server};

        use super::*;
        use crate::auth::NoAuth;

        const SUBSCRIPTION_PATH: &str = "/projects/proj/subscriptions/loader";

        fn settings(server: &Server, subscription: Option<&str>) -> PubSubSettings {
            let mut settings = PubSubSettings::new("proj", "gcs-events");
            settings.endpoint = server.url();
            settings.subscription = subscription.map(str::to_string);
            settings
        }

        async fn connect(settings: PubSubSettings) -> PubSubSource {
            PubSubSource::connect(settings, reqwest::Client::new(), Arc::new(NoAuth))
                .await
                .unwrap()
        }

        #[tokio::test]
        async fn test_existing_subscription_pull_and_settle() {
            let mut server = Server::new_async().await;
            let data = base64::engine::general_purpose::STANDARD
                .encode(r#"{"name":"orders/1.json","bucket":"raw-events"}"#);

            let pull = server
                .mock("POST", format!("{SUBSCRIPTION_PATH}:pull").as_str())
                .match_body(Matcher::Json(json!({"maxMessages": 10})))
                .with_status(200)
                .with_body(
                    json!({"receivedMessages": [
                        {"ackId": "a1", "message": {"data": data, "messageId": "m1"}},
                        {"ackId": "a2", "message": {"data": data, "messageId": "m2"}}
                    ]})
                    .to_string(),
                )
                .create_async()
                .await;
            let ack = server
                .mock("POST", format!("{SUBSCRIPTION_PATH}:acknowledge").as_str())
                .match_body(Matcher::Json(json!({"ackIds": ["a1"]})))
                .with_status(200)
                .with_body("{}")
                .create_async()
                .await;
            let nack = server
                .mock("POST", format!("{SUBSCRIPTION_PATH}:modifyAckDeadline").as_str())
                .match_body(Matcher::Json(
                    json!({"ackIds": ["a2"], "ackDeadlineSeconds": 0}),
                ))
                .with_status(200)
                .with_body("{}")
                .create_async()
                .await;

            let source = connect(settings(&server, Some("loader"))).await;
            let messages = source.pull(10).await.unwrap();
            source.ack(&["a1".to_string()]).await.unwrap();
            source.nack(&["a2".to_string()]).await.unwrap();
            // Nothing to delete for a subscription we do not own
            source.close().await.unwrap();

            pull.assert_async().await;
            ack.assert_async().await;
            nack.assert_async().await;
            assert_eq!(messages.len(), 2);
            assert_eq!(messages[0].message_id, "m1");
            assert_eq!(
                messages[0].data,
                Bytes::from_static(br#"{"name":"orders/1.json","bucket":"raw-events"}"#)
            );
        }

        #[tokio::test]
        async fn test_temporary_subscription_lifecycle() {
            let mut server = Server::new_async().await;
            let path = Matcher::Regex(
                r"^/projects/proj/subscriptions/squall-gcs-events-[0-9a-f]{32}$".to_string(),
            );

            // Already exists is fine
            let create = server
                .mock("PUT", path.clone())
                .match_body(Matcher::Json(json!({
                    "topic": "projects/proj/topics/gcs-events",
                    "ackDeadlineSeconds": 60
                })))
                .with_status(409)
                .with_body(r#"{"error": {"status": "ALREADY_EXISTS"}}"#)
                .create_async()
                .await;
            // Deleted concurrently is fine too
            let delete = server
                .mock("DELETE", path)
                .with_status(404)
                .create_async()
                .await;

            let source = connect(settings(&server, None)).await;
            source.close().await.unwrap();

            create.assert_async().await;
            delete.assert_async().await;
        }

        #[tokio::test]
        async fn test_failed_nack_is_an_error() {
            let mut server = Server::new_async().await;
            let nack = server
                .mock("POST", format!("{SUBSCRIPTION_PATH}:modifyAckDeadline").as_str())
                .with_status(403)
                .with_body("permission denied")
                .create_async()
                .await;

            let source = connect(settings(&server, Some("loader"))).await;
            let err = source.nack(&["a1".to_string()]).await.unwrap_err();

            nack.assert_async().await;
            assert!(matches!(err, SourceError::Request { operation: "modify ack deadline", .. }));
        }
    }
}
