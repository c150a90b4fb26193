//! Runtime configuration for one bridge.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use shadelink_proto::ClientConfig;

use crate::error::BridgeError;

/// Default interval between full device polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
/// Floor for configured poll intervals. The hub is a small embedded
/// box; polling it harder than this destabilizes it.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Settings for one MOTION bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// IP address of the hub on the local network.
    pub ip: String,
    /// 16-character pre-shared key from the vendor app.
    pub key: String,
    /// Display name for logs. Defaults to the ip.
    #[serde(default)]
    pub name: Option<String>,
    /// Interface to receive multicast notifications on.
    #[serde(default)]
    pub multicast_interface: Option<Ipv4Addr>,
    /// Seconds between device polls. Unset means the 60 s default;
    /// values below 30 s are floored.
    #[serde(default)]
    pub poll_interval: Option<u64>,
    /// Display names per device mac. Unlisted devices fall back to
    /// their mac.
    #[serde(default)]
    pub device_names: HashMap<String, String>,
}

impl BridgeConfig {
    pub fn new(ip: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            key: key.into(),
            name: None,
            multicast_interface: None,
            poll_interval: None,
            device_names: HashMap::new(),
        }
    }

    /// Check the required fields and parse the hub address.
    pub fn validate(&self) -> Result<IpAddr, BridgeError> {
        if self.key.is_empty() {
            return Err(BridgeError::Config("missing pre-shared key".into()));
        }
        if self.ip.is_empty() {
            return Err(BridgeError::Config("missing hub ip".into()));
        }
        self.ip
            .parse()
            .map_err(|_| BridgeError::Config(format!("invalid hub ip {:?}", self.ip)))
    }

    /// The poll interval after applying the default and the floor.
    pub fn effective_poll_interval(&self) -> Duration {
        match self.poll_interval {
            None => DEFAULT_POLL_INTERVAL,
            Some(secs) => Duration::from_secs(secs).max(MIN_POLL_INTERVAL),
        }
    }

    /// Display name of a device, falling back to its mac.
    pub fn device_name(&self, mac: &str) -> String {
        self.device_names
            .get(mac)
            .cloned()
            .unwrap_or_else(|| mac.to_owned())
    }

    /// Build the protocol-level client configuration.
    pub fn client_config(&self) -> Result<ClientConfig, BridgeError> {
        let hub_ip = self.validate()?;
        let mut client = ClientConfig::new(hub_ip, self.key.clone());
        client.name = self.name.clone();
        client.multicast_interface = self.multicast_interface;
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn unset_poll_interval_uses_the_default() {
        let config = BridgeConfig::new("192.168.1.50", "0123456789abcdef");
        assert_eq!(config.effective_poll_interval(), Duration::from_secs(60));
    }

    #[test]
    fn short_poll_interval_is_floored() {
        let mut config = BridgeConfig::new("192.168.1.50", "0123456789abcdef");
        config.poll_interval = Some(10);
        assert_eq!(config.effective_poll_interval(), Duration::from_secs(30));

        config.poll_interval = Some(120);
        assert_eq!(config.effective_poll_interval(), Duration::from_secs(120));
    }

    #[test]
    fn missing_key_or_ip_is_fatal() {
        let config = BridgeConfig::new("192.168.1.50", "");
        assert!(matches!(config.validate(), Err(BridgeError::Config(_))));

        let config = BridgeConfig::new("", "0123456789abcdef");
        assert!(matches!(config.validate(), Err(BridgeError::Config(_))));

        let config = BridgeConfig::new("not-an-ip", "0123456789abcdef");
        assert!(matches!(config.validate(), Err(BridgeError::Config(_))));
    }

    #[test]
    fn device_name_falls_back_to_the_mac() {
        let mut config = BridgeConfig::new("192.168.1.50", "0123456789abcdef");
        config
            .device_names
            .insert("a4cf12345678".into(), "Kitchen blind".into());

        assert_eq!(config.device_name("a4cf12345678"), "Kitchen blind");
        assert_eq!(config.device_name("a4cf87654321"), "a4cf87654321");
    }
}
