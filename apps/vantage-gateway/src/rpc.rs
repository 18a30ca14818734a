//! Request/reply calls bridged over broker topics.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use metrics::counter;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;
use vantage_wire::{RpcRequest, TopicScheme};

use crate::broker::BrokerHandle;
use crate::error::GatewayError;

/// Pending replies keyed by request id. Completion and expiry both take the
/// sender out of the table before using it, so the first writer wins and a
/// late reply finds nothing.
#[derive(Clone, Default)]
struct CorrelationTable {
    pending: Arc<DashMap<String, oneshot::Sender<Bytes>>>,
}

impl CorrelationTable {
    fn register(&self, request_id: &str) -> oneshot::Receiver<Bytes> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.to_string(), tx);
        rx
    }

    fn complete(&self, request_id: &str, payload: Bytes) -> bool {
        match self.pending.remove(request_id) {
            Some((_, tx)) => tx.send(payload).is_ok(),
            None => false,
        }
    }

    fn remove(&self, request_id: &str) -> bool {
        self.pending.remove(request_id).is_some()
    }

    fn len(&self) -> usize {
        self.pending.len()
    }
}

/// Issues RPC calls to fleet services over the broker.
#[derive(Clone)]
pub struct RpcBridge {
    broker: BrokerHandle,
    topics: TopicScheme,
    correlations: CorrelationTable,
}

impl RpcBridge {
    pub fn new(broker: BrokerHandle, topics: TopicScheme) -> Self {
        Self {
            broker,
            topics,
            correlations: CorrelationTable::default(),
        }
    }

    /// Routes an inbound reply payload to its waiting caller. Returns false
    /// when the call already finished.
    pub fn complete(&self, request_id: &str, payload: Bytes) -> bool {
        self.correlations.complete(request_id, payload)
    }

    /// Publishes one request and waits for its correlated reply.
    ///
    /// The reply topic stays subscribed only for the duration of the call
    /// and every exit path clears the correlation entry, so an expired
    /// request leaves nothing behind.
    pub async fn call<R: DeserializeOwned>(
        &self,
        op: &str,
        payload: impl Into<String>,
        timeout: Duration,
    ) -> Result<R, GatewayError> {
        let request_id = Uuid::new_v4().to_string();
        let reply_topic = self.topics.rpc_response(op, &request_id);
        let rx = self.correlations.register(&request_id);

        if let Err(err) = self.broker.subscribe(reply_topic.clone()).await {
            self.correlations.remove(&request_id);
            counter!("vantage_rpc_calls_total", 1, "outcome" => err.label());
            return Err(err);
        }

        let request = RpcRequest {
            payload: payload.into(),
            request_id: request_id.clone(),
        };
        let body = match serde_json::to_vec(&request) {
            Ok(body) => body,
            Err(err) => {
                self.finish(&request_id, &reply_topic).await;
                let err = GatewayError::Decode(err);
                counter!("vantage_rpc_calls_total", 1, "outcome" => err.label());
                return Err(err);
            }
        };

        if let Err(err) = self.broker.publish(self.topics.rpc_request(op), body).await {
            self.finish(&request_id, &reply_topic).await;
            counter!("vantage_rpc_calls_total", 1, "outcome" => err.label());
            return Err(err);
        }

        let outcome = tokio::time::timeout(timeout, rx).await;
        self.finish(&request_id, &reply_topic).await;

        let result = match outcome {
            Ok(Ok(payload)) => serde_json::from_slice(&payload).map_err(GatewayError::Decode),
            Ok(Err(_)) => Err(GatewayError::Transport("reply channel closed".to_string())),
            Err(_) => {
                debug!(op, %request_id, "rpc call expired");
                Err(GatewayError::Timeout(timeout))
            }
        };
        match &result {
            Ok(_) => counter!("vantage_rpc_calls_total", 1, "outcome" => "ok"),
            Err(err) => counter!("vantage_rpc_calls_total", 1, "outcome" => err.label()),
        }
        result
    }

    async fn finish(&self, request_id: &str, reply_topic: &str) {
        self.correlations.remove(request_id);
        if let Err(err) = self.broker.unsubscribe(reply_topic).await {
            warn!(topic = reply_topic, error = %err, "failed to drop reply subscription");
        }
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.correlations.len()
    }

    #[cfg(test)]
    pub(crate) fn pending_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .correlations
            .pending
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn bridge() -> RpcBridge {
        RpcBridge::new(BrokerHandle::stub_for_tests(), TopicScheme::new("/3ml"))
    }

    async fn wait_for_pending(bridge: &RpcBridge, count: usize) -> Vec<String> {
        loop {
            let ids = bridge.pending_ids();
            if ids.len() == count {
                return ids;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn delivers_correlated_reply_exactly_once() {
        let bridge = bridge();
        let call = {
            let bridge = bridge.clone();
            tokio::spawn(async move {
                bridge
                    .call::<Value>("echo", "img", Duration::from_secs(5))
                    .await
            })
        };

        let request_id = wait_for_pending(&bridge, 1).await.remove(0);
        assert!(bridge.complete(&request_id, Bytes::from_static(b"{\"ok\":true}")));

        let value = call.await.unwrap().unwrap();
        assert_eq!(value, serde_json::json!({"ok": true}));

        assert!(
            !bridge.complete(&request_id, Bytes::from_static(b"{}")),
            "a second delivery must find no waiter"
        );
        assert_eq!(bridge.pending(), 0);
    }

    #[tokio::test]
    async fn concurrent_calls_stay_isolated() {
        let bridge = bridge();
        let spawn_call = |bridge: RpcBridge| {
            tokio::spawn(async move {
                bridge
                    .call::<Value>("echo", "img", Duration::from_secs(5))
                    .await
            })
        };
        let first = spawn_call(bridge.clone());
        let second = spawn_call(bridge.clone());

        let ids = wait_for_pending(&bridge, 2).await;
        assert!(bridge.complete(&ids[0], Bytes::from_static(b"{\"n\":1}")));
        assert!(bridge.complete(&ids[1], Bytes::from_static(b"{\"n\":2}")));

        let mut ns = vec![
            first.await.unwrap().unwrap()["n"].as_i64().unwrap(),
            second.await.unwrap().unwrap()["n"].as_i64().unwrap(),
        ];
        ns.sort();
        assert_eq!(ns, vec![1, 2]);
        assert_eq!(bridge.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expires_at_the_deadline_and_clears_state() {
        let bridge = bridge();
        let started = tokio::time::Instant::now();
        let err = bridge
            .call::<Value>("echo", "img", Duration::from_secs(5))
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, GatewayError::Timeout(d) if d == Duration::from_secs(5)));
        assert!(
            elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(6),
            "expired after {elapsed:?}"
        );
        assert_eq!(bridge.pending(), 0);
    }

    #[tokio::test]
    async fn malformed_reply_surfaces_decode_error() {
        let bridge = bridge();
        let call = {
            let bridge = bridge.clone();
            tokio::spawn(async move {
                bridge
                    .call::<Value>("echo", "img", Duration::from_secs(5))
                    .await
            })
        };

        let request_id = wait_for_pending(&bridge, 1).await.remove(0);
        assert!(bridge.complete(&request_id, Bytes::from_static(b"not json")));

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, GatewayError::Decode(_)));
        assert_eq!(bridge.pending(), 0);
    }
}
