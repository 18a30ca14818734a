use std::env;
use std::time::Duration;

/// Runtime configuration, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP and WebSocket listen port.
    pub port: u16,
    /// MQTT broker host.
    pub broker_host: String,
    /// MQTT broker port.
    pub broker_port: u16,
    /// Prefix shared by every broker topic, leading slash included.
    pub topic_namespace: String,
    /// Per-attempt deadline for broker RPC calls.
    pub rpc_timeout: Duration,
    /// How long startup waits for the first broker handshake before failing.
    pub broker_connect_timeout: Duration,
    /// MQTT keep-alive interval.
    pub broker_keepalive: Duration,
    /// Pause between reconnect attempts after the broker drops.
    pub broker_reconnect_delay: Duration,
    /// Frames buffered per device for slow live viewers.
    pub stream_capacity: usize,
    /// Optional JSON seed file for the record store.
    pub records_path: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            port: env::var("VANTAGE_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            broker_host: env::var("VANTAGE_BROKER_HOST")
                .unwrap_or_else(|_| "127.0.0.1".to_string()),
            broker_port: env::var("VANTAGE_BROKER_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1883),
            topic_namespace: env::var("VANTAGE_TOPIC_NAMESPACE")
                .unwrap_or_else(|_| "/3ml".to_string()),
            rpc_timeout: secs_var("VANTAGE_RPC_TIMEOUT_SECS", 5),
            broker_connect_timeout: secs_var("VANTAGE_BROKER_CONNECT_TIMEOUT_SECS", 30),
            broker_keepalive: secs_var("VANTAGE_BROKER_KEEPALIVE_SECS", 5),
            broker_reconnect_delay: secs_var("VANTAGE_BROKER_RECONNECT_DELAY_SECS", 1),
            stream_capacity: env::var("VANTAGE_STREAM_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(16),
            records_path: env::var("VANTAGE_RECORDS_PATH")
                .ok()
                .filter(|v| !v.is_empty()),
        }
    }
}

fn secs_var(name: &str, default: u64) -> Duration {
    let secs = env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default);
    Duration::from_secs(secs)
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 8080,
            broker_host: "127.0.0.1".to_string(),
            broker_port: 1883,
            topic_namespace: "/3ml".to_string(),
            rpc_timeout: Duration::from_secs(5),
            broker_connect_timeout: Duration::from_secs(30),
            broker_keepalive: Duration::from_secs(5),
            broker_reconnect_delay: Duration::from_secs(1),
            stream_capacity: 16,
            records_path: None,
        }
    }
}
