//! Shared state wired once at startup.

use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusHandle;
use vantage_wire::TopicScheme;

use crate::broker::BrokerHandle;
use crate::config::Config;
use crate::devices::DeviceRegistry;
use crate::notify::{ConnectionRegistry, WatchRegistry};
use crate::records::SharedRecordStore;
use crate::rpc::RpcBridge;
use crate::streams::{FrameStore, StreamHub};

pub struct GatewayState {
    pub topics: TopicScheme,
    pub rpc_timeout: Duration,
    pub broker: BrokerHandle,
    pub rpc: RpcBridge,
    pub frames: FrameStore,
    pub hub: StreamHub,
    pub devices: DeviceRegistry,
    pub connections: ConnectionRegistry,
    pub watches: WatchRegistry,
    pub store: SharedRecordStore,
    pub metrics: PrometheusHandle,
}

impl GatewayState {
    pub fn new(
        config: &Config,
        broker: BrokerHandle,
        store: SharedRecordStore,
        metrics: PrometheusHandle,
    ) -> Arc<Self> {
        let topics = TopicScheme::new(config.topic_namespace.clone());
        Arc::new(Self {
            rpc: RpcBridge::new(broker.clone(), topics.clone()),
            devices: DeviceRegistry::new(broker.clone(), topics.clone()),
            hub: StreamHub::new(config.stream_capacity),
            frames: FrameStore::default(),
            connections: ConnectionRegistry::default(),
            watches: WatchRegistry::default(),
            rpc_timeout: config.rpc_timeout,
            topics,
            broker,
            store,
            metrics,
        })
    }
}

#[cfg(test)]
impl GatewayState {
    /// State backed by a stub broker and a throwaway metrics recorder.
    pub(crate) fn stub_for_tests(store: SharedRecordStore) -> Arc<Self> {
        let metrics = metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle();
        Self::new(
            &Config::default(),
            BrokerHandle::stub_for_tests(),
            store,
            metrics,
        )
    }
}
