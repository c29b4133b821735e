//! Paced telemetry publishing
//!
//! Builds the numbered payloads and hands them to a [`Transport`] one at a
//! time, sleeping a fixed interval after each publish.

use crate::config::PublisherConfig;
use crate::error::{PublisherError, PublisherResult};
use crate::publish_span;
use crate::transport::{OutgoingMessage, Transport};
use bytes::Bytes;
use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};

/// Text encoding applied to each payload before publishing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadEncoding {
    Utf8,
    /// Little-endian UTF-16 without BOM
    #[default]
    Utf16Le,
}

impl PayloadEncoding {
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            PayloadEncoding::Utf8 => text.as_bytes().to_vec(),
            PayloadEncoding::Utf16Le => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
        }
    }
}

/// What the loop does when a single publish is rejected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Log a warning and keep going
    #[default]
    BestEffort,
    /// Stop publishing and return the error
    Abort,
}

/// Payload text for message `ordinal`
pub fn build_payload(ordinal: u32) -> String {
    format!("Data packet #{ordinal} to GCP IoT Core.")
}

/// Everything the publish loop needs, resolved from configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PublishPlan {
    pub topic: String,
    pub message_count: u32,
    pub interval: Duration,
    pub retain: bool,
    pub encoding: PayloadEncoding,
    pub failure_policy: FailurePolicy,
}

impl PublishPlan {
    pub fn from_config(config: &PublisherConfig) -> Self {
        Self {
            topic: config.events_topic(),
            message_count: config.publish.message_count,
            interval: config.publish_interval(),
            retain: config.publish.retain,
            encoding: config.publish.encoding,
            failure_policy: config.publish.failure_policy,
        }
    }

    /// Message for ordinal `n`, always at-most-once
    pub fn message(&self, ordinal: u32) -> OutgoingMessage {
        OutgoingMessage {
            topic: self.topic.clone(),
            payload: Bytes::from(self.encoding.encode(&build_payload(ordinal))),
            qos: QoS::AtMostOnce,
            retain: self.retain,
        }
    }
}

/// Outcome of [`run_publish_loop`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub attempted: u32,
    pub published: u32,
    pub failed: u32,
    /// Shutdown was requested before all messages were sent
    pub interrupted: bool,
}

impl PublishReport {
    pub fn is_complete(&self, plan: &PublishPlan) -> bool {
        !self.interrupted && self.published == plan.message_count
    }
}

/// Resolves once `true` is sent on the shutdown channel
///
/// A dropped sender means shutdown can no longer be requested.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Publish `plan.message_count` messages in order, one interval apart
pub async fn run_publish_loop<T>(
    transport: &T,
    plan: &PublishPlan,
    shutdown: &mut watch::Receiver<bool>,
) -> PublisherResult<PublishReport>
where
    T: Transport + ?Sized,
{
    let span = publish_span!(topic = %plan.topic, count = plan.message_count);

    async move {
        let mut report = PublishReport::default();

        for ordinal in 1..=plan.message_count {
            if *shutdown.borrow() {
                report.interrupted = true;
                break;
            }

            report.attempted += 1;
            match transport.publish(plan.message(ordinal)).await {
                Ok(receipt) => {
                    report.published += 1;
                    debug!(ordinal, bytes = receipt.bytes, "Published message");
                    info!("Publish successful.");
                }
                Err(e) => {
                    report.failed += 1;
                    match plan.failure_policy {
                        FailurePolicy::BestEffort => {
                            warn!(ordinal, error = %e, "Publish failed, continuing");
                        }
                        FailurePolicy::Abort if !transport.is_connected() => {
                            warn!(ordinal, error = %e, "Publish attempted without a connection");
                            return Err(PublisherError::NotConnected);
                        }
                        FailurePolicy::Abort => {
                            return Err(PublisherError::publish(ordinal, e));
                        }
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(plan.interval) => {}
                _ = shutdown_requested(shutdown) => {
                    info!(ordinal, "Shutdown requested, stopping publish loop");
                    report.interrupted = ordinal < plan.message_count;
                    break;
                }
            }
        }

        Ok(report)
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PublisherConfig;
    use crate::testing::MockTransport;
    use proptest::prelude::*;

    fn test_plan(count: u32) -> PublishPlan {
        PublishPlan {
            topic: "/devices/dev-1/events".to_string(),
            message_count: count,
            interval: Duration::from_secs(1),
            retain: true,
            encoding: PayloadEncoding::Utf8,
            failure_policy: FailurePolicy::BestEffort,
        }
    }

    #[test]
    fn test_build_payload() {
        assert_eq!(build_payload(1), "Data packet #1 to GCP IoT Core.");
        assert_eq!(build_payload(10), "Data packet #10 to GCP IoT Core.");
    }

    #[test]
    fn test_utf16le_encoding() {
        assert_eq!(PayloadEncoding::Utf16Le.encode("Da#1"), b"D\0a\0#\01\0".to_vec());
    }

    #[test]
    fn test_utf8_encoding() {
        assert_eq!(PayloadEncoding::Utf8.encode("Data"), b"Data".to_vec());
    }

    #[test]
    fn test_plan_from_config() {
        let config = PublisherConfig::test_config();
        let plan = PublishPlan::from_config(&config);

        assert_eq!(plan.topic, config.events_topic());
        assert_eq!(plan.message_count, 10);
        assert_eq!(plan.interval, Duration::from_secs(1));
        assert!(plan.retain);
        assert_eq!(plan.encoding, PayloadEncoding::Utf16Le);
        assert_eq!(plan.failure_policy, FailurePolicy::BestEffort);
    }

    #[test]
    fn test_message_is_at_most_once() {
        let message = test_plan(1).message(3);

        assert_eq!(message.qos, QoS::AtMostOnce);
        assert!(message.retain);
        assert_eq!(message.topic, "/devices/dev-1/events");
        assert_eq!(&message.payload[..], b"Data packet #3 to GCP IoT Core.");
    }

    #[test]
    fn test_report_completeness() {
        let plan = test_plan(2);
        let complete = PublishReport {
            attempted: 2,
            published: 2,
            failed: 0,
            interrupted: false,
        };
        assert!(complete.is_complete(&plan));
        assert!(!PublishReport::default().is_complete(&plan));
    }

    #[test]
    fn test_policy_serde_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: FailurePolicy,
            encoding: PayloadEncoding,
        }

        let parsed: Wrapper =
            toml::from_str("policy = \"best-effort\"\nencoding = \"utf8\"").unwrap();
        assert_eq!(parsed.policy, FailurePolicy::BestEffort);
        assert_eq!(parsed.encoding, PayloadEncoding::Utf8);

        let parsed: Wrapper = toml::from_str("policy = \"abort\"\nencoding = \"utf16le\"").unwrap();
        assert_eq!(parsed.policy, FailurePolicy::Abort);
        assert_eq!(parsed.encoding, PayloadEncoding::Utf16Le);
    }

    #[tokio::test]
    async fn test_shutdown_requested_resolves_on_signal() {
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        shutdown_requested(&mut rx).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_requested_pends_when_sender_dropped() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);

        let result =
            tokio::time::timeout(Duration::from_secs(5), shutdown_requested(&mut rx)).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_without_connection_reports_not_connected() {
        let transport = MockTransport::default();
        let mut plan = test_plan(3);
        plan.failure_policy = FailurePolicy::Abort;
        let (_tx, mut rx) = watch::channel(false);

        let result = run_publish_loop(&transport, &plan, &mut rx).await;

        assert!(matches!(result, Err(PublisherError::NotConnected)));
        assert!(transport.recorder().get_published().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_best_effort_without_connection_counts_failures() {
        let transport = MockTransport::default();
        let (_tx, mut rx) = watch::channel(false);

        let report = run_publish_loop(&transport, &test_plan(3), &mut rx)
            .await
            .unwrap();

        assert_eq!(report.attempted, 3);
        assert_eq!(report.failed, 3);
        assert_eq!(report.published, 0);
    }

    proptest! {
        #[test]
        fn prop_payload_contains_ordinal(n in 1u32..=u32::MAX) {
            let marker = format!("#{n}");
            let payload = build_payload(n);
            prop_assert!(payload.contains(&marker));
        }

        #[test]
        fn prop_utf16_payload_is_twice_the_ascii_length(n in 1u32..100_000) {
            let text = build_payload(n);
            prop_assert_eq!(PayloadEncoding::Utf16Le.encode(&text).len(), text.len() * 2);
        }
    }
}
