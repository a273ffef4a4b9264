//! Config schema for the gateway client.

use {secrecy::Secret, serde::Deserialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JanusConfig {
    pub gateway: GatewayConfig,
}

/// Connection settings for one Janus gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// WebSocket endpoint, `ws://` or `wss://`.
    pub url: String,

    /// Shared secret added to every request as `apisecret`.
    pub api_secret: Option<Secret<String>>,

    /// How long each request waits for its reply.
    pub request_timeout_ms: u64,

    /// How long an event waits on a full consumer queue before being dropped.
    pub delivery_timeout_ms: u64,

    /// WebSocket ping interval.
    pub ping_interval_secs: u64,

    /// Session keepalive interval (must stay below the server's session timeout).
    pub keepalive_interval_secs: u64,

    /// Retention window for event-continued and abandoned transactions.
    pub transaction_retention_secs: u64,

    /// Log every JSON frame sent and received.
    pub log_messages: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8188".into(),
            api_secret: None,
            request_timeout_ms: 1_000,
            delivery_timeout_ms: 1_000,
            ping_interval_secs: 30,
            keepalive_interval_secs: 20,
            transaction_retention_secs: 300,
            log_messages: false,
        }
    }
}

impl GatewayConfig {
    /// Reject settings the client cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let url = url::Url::parse(&self.url)
            .map_err(|e| anyhow::anyhow!("invalid gateway url '{}': {e}", self.url))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            anyhow::bail!(
                "gateway url must use ws:// or wss://, got '{}'",
                url.scheme()
            );
        }

        let durations = [
            ("request_timeout_ms", self.request_timeout_ms),
            ("delivery_timeout_ms", self.delivery_timeout_ms),
            ("ping_interval_secs", self.ping_interval_secs),
            ("keepalive_interval_secs", self.keepalive_interval_secs),
        ];
        for (name, value) in durations {
            if value == 0 {
                anyhow::bail!("gateway.{name} must be greater than zero");
            }
        }
        Ok(())
    }
}
