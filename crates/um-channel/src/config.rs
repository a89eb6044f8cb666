use serde::Deserialize;

/// Cloud MQTT connection settings, loadable from TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MqttConfig {
    /// Broker hostname (e.g., the AWS IoT ATS endpoint).
    pub broker_host: String,
    /// Broker port (default 8883 for TLS).
    #[serde(default = "default_port")]
    pub broker_port: u16,
    /// Client ID; must be unique per gateway.
    pub client_id: String,
    /// Enable mTLS. When false, connects plaintext (local dev).
    #[serde(default = "default_use_tls")]
    pub use_tls: bool,
    /// Path to the device X.509 certificate (PEM).
    #[serde(default)]
    pub client_cert_path: String,
    /// Path to the device private key (PEM).
    #[serde(default)]
    pub client_key_path: String,
    /// Path to the CA certificate (e.g., AmazonRootCA1.pem).
    #[serde(default)]
    pub ca_cert_path: String,
    /// Keep-alive interval in seconds.
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u16,
}

fn default_use_tls() -> bool {
    true
}

fn default_port() -> u16 {
    8883
}

fn default_keepalive() -> u16 {
    30
}
