//! Device registration driven by first viewer contact.

use std::collections::HashSet;

use tokio::sync::Mutex;
use tracing::info;
use vantage_wire::TopicScheme;

use crate::broker::BrokerHandle;
use crate::error::GatewayError;

/// Devices whose frame topics the gateway currently receives.
///
/// Subscription happens lazily when the first viewer asks for a device and
/// is deduplicated under one lock, so racing requests produce exactly one
/// broker subscribe.
pub struct DeviceRegistry {
    broker: BrokerHandle,
    topics: TopicScheme,
    subscribed: Mutex<HashSet<String>>,
}

impl DeviceRegistry {
    pub fn new(broker: BrokerHandle, topics: TopicScheme) -> Self {
        Self {
            broker,
            topics,
            subscribed: Mutex::new(HashSet::new()),
        }
    }

    /// Subscribes the device's frame topic on first contact. Returns whether
    /// this call performed the registration.
    pub async fn ensure_subscribed(&self, device_id: &str) -> Result<bool, GatewayError> {
        let mut subscribed = self.subscribed.lock().await;
        if subscribed.contains(device_id) {
            return Ok(false);
        }
        // Holding the lock across the subscribe only serializes the enqueue;
        // the broker task does the network round-trip.
        self.broker
            .subscribe(self.topics.device_frames(device_id))
            .await?;
        subscribed.insert(device_id.to_string());
        info!(device_id, "registered device frame stream");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn registry() -> (BrokerHandle, Arc<DeviceRegistry>) {
        let broker = BrokerHandle::stub_for_tests();
        let registry = Arc::new(DeviceRegistry::new(broker.clone(), TopicScheme::new("/3ml")));
        (broker, registry)
    }

    #[tokio::test]
    async fn concurrent_first_contacts_register_once() {
        let (broker, registry) = registry();
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry.ensure_subscribed("cam-1").await
            }));
        }

        let mut fresh = 0;
        for task in tasks {
            if task.await.unwrap().unwrap() {
                fresh += 1;
            }
        }
        assert_eq!(fresh, 1);
        assert_eq!(
            broker.subscribed_topics().await,
            vec!["/3ml/device/cam-1/framed/out".to_string()]
        );
    }

    #[tokio::test]
    async fn distinct_devices_register_independently() {
        let (broker, registry) = registry();
        assert!(registry.ensure_subscribed("cam-1").await.unwrap());
        assert!(registry.ensure_subscribed("cam-2").await.unwrap());
        assert!(!registry.ensure_subscribed("cam-1").await.unwrap());
        assert_eq!(
            broker.subscribed_topics().await,
            vec![
                "/3ml/device/cam-1/framed/out".to_string(),
                "/3ml/device/cam-2/framed/out".to_string(),
            ]
        );
    }
}
