use std::net::Ipv4Addr;

use serde::Deserialize;

/// Runtime options for the device host and the control point.
///
/// Everything has a workable default; hosts that load their configuration
/// from a file can embed this struct and rely on `serde(default)`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpnpConfig {
    /// Period for M-SEARCH re-emission during a discovery window
    pub msearch_repeat_ms: u64,
    /// Period for NOTIFY ssdp:alive re-emission (0 = announce once)
    pub post_alive_repeat_ms: u64,
    /// Requested subscription duration on SUBSCRIBE
    pub subscribe_repeat_sec: u32,
    /// Re-subscribe backoff when no NOTIFY arrives (0 = disabled)
    pub event_subscription_retry_ms: u64,
    /// Scheduler tick cadence
    pub scheduler_interval_ms: u64,
    /// Cadence of the device-side NOTIFY publish pass
    pub subscriptions_interval_ms: u64,
    /// Timeout for outbound HTTP calls
    pub http_request_timeout_ms: u64,
    /// IPv4 mask applied to SSDP peers; out-of-subnet peers are ignored
    pub discovery_netmask: Ipv4Addr,
    /// Per-notification retry cap before the pending entry is dropped
    pub max_notify_retries: u32,
}

impl Default for UpnpConfig {
    fn default() -> Self {
        Self {
            msearch_repeat_ms: 10_000,
            post_alive_repeat_ms: 0,
            subscribe_repeat_sec: 3600,
            event_subscription_retry_ms: 0,
            scheduler_interval_ms: 250,
            subscriptions_interval_ms: 500,
            http_request_timeout_ms: 20_000,
            discovery_netmask: Ipv4Addr::new(255, 255, 255, 0),
            max_notify_retries: 3,
        }
    }
}
