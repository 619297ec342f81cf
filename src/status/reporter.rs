//! Status reporter
//!
//! Fire-and-forget publisher for status and registration payloads. Nothing
//! here is queued or retried, and no failure reaches the caller.

use crate::error::PublishError;
use crate::session::SessionHandle;
use crate::transport::Qos;
use bytes::Bytes;
use restart4g_shared::codec::{self, RegistrationRecord};
use restart4g_shared::{Status, Topics};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Publishes device status over the managed session
#[derive(Clone)]
pub struct StatusReporter {
    session: SessionHandle,
    topics: Topics,
    dropped: Arc<AtomicU64>,
}

impl StatusReporter {
    pub fn new(session: SessionHandle, topics: Topics) -> Self {
        Self {
            session,
            topics,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish `text` on `topic`, swallowing every failure
    pub async fn publish(&self, topic: &str, text: &str) {
        self.publish_bytes(topic, Bytes::copy_from_slice(text.as_bytes()))
            .await;
    }

    /// Publish a status report on the status topic
    pub async fn report(&self, status: &Status) {
        let text = status.to_string();
        self.publish(&self.topics.status, &text).await;
    }

    /// Publish a registration record on the registration topic
    pub async fn register(&self, record: &RegistrationRecord) {
        match codec::encode_registration(record) {
            Ok(payload) => {
                self.publish_bytes(&self.topics.register, Bytes::from(payload))
                    .await
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("[STATUS] Could not encode registration: {}", e);
            }
        }
    }

    /// Number of reports that did not go out
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    async fn publish_bytes(&self, topic: &str, payload: Bytes) {
        let len = payload.len();
        match self.session.publish(topic, Qos::AtLeastOnce, payload).await {
            Ok(()) => debug!("[STATUS] Published {} bytes to {}", len, topic),
            Err(PublishError::NotConnected) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("[STATUS] Not connected, dropped report for {}", topic);
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("[STATUS] Publish to {} failed: {}", topic, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_support::connected_session;
    use crate::session::{SessionConfig, SessionManager};
    use crate::transport::mock::MockConnector;
    use std::time::Duration;

    #[tokio::test]
    async fn test_report_while_disconnected_is_silent_noop() {
        let (connector, mut remotes) = MockConnector::new();
        let (manager, _messages) = SessionManager::new(SessionConfig::default(), Arc::new(connector));
        let reporter = StatusReporter::new(manager.handle(), Topics::default());

        reporter.report(&Status::Connected).await;
        reporter
            .register(&RegistrationRecord::new("oppo-device", "oppo-1"))
            .await;

        assert_eq!(reporter.dropped_count(), 2);
        assert!(remotes.try_recv().is_err());

        // Nothing is retried once a session exists
        manager.connect("tcp://broker.example:1883").await.unwrap();
        let mut remote = remotes.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(remote.published.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_report_on_status_topic() {
        let (manager, mut remote, _messages) = connected_session().await;
        let reporter = StatusReporter::new(manager.handle(), Topics::default());

        reporter.report(&Status::Restarting).await;

        let published = remote.next_publish().await;
        assert_eq!(published.topic, "device/oppo/status");
        assert_eq!(published.qos, Qos::AtLeastOnce);
        assert_eq!(published.text(), "restarting_4g");
        assert_eq!(reporter.dropped_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_failure_is_swallowed() {
        let (manager, remote, _messages) = connected_session().await;
        let reporter = StatusReporter::new(manager.handle(), Topics::default());

        // Link torn down underneath a session that still looks connected
        crate::transport::BrokerLink::disconnect(remote.link.as_ref())
            .await
            .unwrap();
        reporter.publish("device/oppo/status", "late").await;

        assert_eq!(reporter.dropped_count(), 1);
    }

    #[tokio::test]
    async fn test_report_after_disconnect_is_noop() {
        let (manager, mut remote, _messages) = connected_session().await;
        let reporter = StatusReporter::new(manager.handle(), Topics::default());

        manager.disconnect().await;
        reporter.report(&Status::RestartSucceeded).await;

        assert_eq!(reporter.dropped_count(), 1);
        assert!(remote.published.try_recv().is_err());
    }
}
