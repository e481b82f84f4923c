//! Configuration system.
//!
//! Loads sync configuration from JSON strings (file IO left to app). Every
//! field has a default so partial documents are accepted. Durations are kept
//! as integer milliseconds and exposed through `Duration` accessors.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Log output settings, passed explicitly to `logging::init`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// 0 = info, 1 = debug, 2+ = trace.
    #[serde(default)]
    pub verbosity: u8,
    #[serde(default = "default_true")]
    pub colored: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            colored: true,
        }
    }
}

/// Root configuration shared by client/server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Server address the client connects to and the server binds.
    #[serde(default = "default_server_ip")]
    pub server_ip: String,
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    /// Port the server listens on for client telemetry.
    #[serde(default = "default_server_udp_port")]
    pub server_udp_port: u16,
    /// Port the client listens on for server deltas.
    #[serde(default = "default_client_udp_port")]
    pub client_udp_port: u16,
    /// Fixed size of every UDP packet.
    #[serde(default = "default_packet_size")]
    pub packet_size: usize,

    #[serde(default = "default_keepalive_timeout_ms")]
    pub keepalive_timeout_ms: u64,
    #[serde(default = "default_keepalive_check_ms")]
    pub keepalive_check_ms: u64,
    /// How often the client sends KEEPALIVE.
    #[serde(default = "default_keepalive_send_ms")]
    pub keepalive_send_ms: u64,
    #[serde(default = "default_udp_send_interval_ms")]
    pub udp_send_interval_ms: u64,
    /// How often the client sends its camera pose.
    #[serde(default = "default_telemetry_interval_ms")]
    pub telemetry_interval_ms: u64,
    /// Socket read timeout used to re-check termination flags.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long the server waits for each RSRC_EXCHANGE_ACK.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    /// Upper bound on datagrams the UDP sender emits per send interval.
    #[serde(default = "default_max_packets_per_tick")]
    pub max_packets_per_tick: usize,
    /// Copies of each geometry update queued for UDP.
    #[serde(default = "default_geom_redundancy")]
    pub geom_redundancy: u32,
    /// Consecutive socket read failures tolerated before disconnecting.
    #[serde(default = "default_max_recv_failures")]
    pub max_recv_failures: u32,
    /// Largest accepted TCP resource body.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Largest vertex or index count a client allocates for one model.
    #[serde(default = "default_max_model_elements")]
    pub max_model_elements: u32,

    /// Outbound UDP ceiling in bytes/s; `None` disables the limiter.
    #[serde(default)]
    pub bandwidth_limit: Option<u64>,
    #[serde(default = "default_bandwidth_window_ms")]
    pub bandwidth_window_ms: u64,
    /// Enables queued limiter mode.
    #[serde(default)]
    pub max_queueing_delay_ms: Option<u64>,

    #[serde(default)]
    pub log: LogConfig,
}

fn default_true() -> bool {
    true
}

fn default_server_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_tcp_port() -> u16 {
    1234
}

fn default_server_udp_port() -> u16 {
    1235
}

fn default_client_udp_port() -> u16 {
    1236
}

fn default_packet_size() -> usize {
    1024
}

fn default_keepalive_timeout_ms() -> u64 {
    5_000
}

fn default_keepalive_check_ms() -> u64 {
    1_000
}

fn default_keepalive_send_ms() -> u64 {
    1_000
}

fn default_udp_send_interval_ms() -> u64 {
    16
}

fn default_telemetry_interval_ms() -> u64 {
    33
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_ack_timeout_ms() -> u64 {
    5_000
}

fn default_max_packets_per_tick() -> usize {
    64
}

fn default_geom_redundancy() -> u32 {
    5
}

fn default_max_recv_failures() -> u32 {
    10
}

fn default_max_frame_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_max_model_elements() -> u32 {
    1 << 24
}

fn default_bandwidth_window_ms() -> u64 {
    100
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_ip: default_server_ip(),
            tcp_port: default_tcp_port(),
            server_udp_port: default_server_udp_port(),
            client_udp_port: default_client_udp_port(),
            packet_size: default_packet_size(),
            keepalive_timeout_ms: default_keepalive_timeout_ms(),
            keepalive_check_ms: default_keepalive_check_ms(),
            keepalive_send_ms: default_keepalive_send_ms(),
            udp_send_interval_ms: default_udp_send_interval_ms(),
            telemetry_interval_ms: default_telemetry_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            ack_timeout_ms: default_ack_timeout_ms(),
            max_packets_per_tick: default_max_packets_per_tick(),
            geom_redundancy: default_geom_redundancy(),
            max_recv_failures: default_max_recv_failures(),
            max_frame_bytes: default_max_frame_bytes(),
            max_model_elements: default_max_model_elements(),
            bandwidth_limit: None,
            bandwidth_window_ms: default_bandwidth_window_ms(),
            max_queueing_delay_ms: None,
            log: LogConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// `ip:tcp_port`.
    pub fn tcp_addr(&self) -> String {
        format!("{}:{}", self.server_ip, self.tcp_port)
    }

    pub fn keepalive_timeout(&self) -> Duration {
        Duration::from_millis(self.keepalive_timeout_ms)
    }

    pub fn keepalive_check(&self) -> Duration {
        Duration::from_millis(self.keepalive_check_ms)
    }

    pub fn keepalive_send(&self) -> Duration {
        Duration::from_millis(self.keepalive_send_ms)
    }

    pub fn udp_send_interval(&self) -> Duration {
        Duration::from_millis(self.udp_send_interval_ms)
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn bandwidth_window(&self) -> Duration {
        Duration::from_millis(self.bandwidth_window_ms)
    }

    pub fn max_queueing_delay(&self) -> Option<Duration> {
        self.max_queueing_delay_ms.map(Duration::from_millis)
    }
}
