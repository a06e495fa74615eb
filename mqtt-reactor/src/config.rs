//! Construction-time configuration surface (§4.5, §6).
//!
//! In the manner of the teacher's `Connector` (`mqtt-sync-client::connect::Connector`) — and the
//! `haka_mqtt.reactor.ReactorProperties` this whole design descends from — `Config` is validated
//! once at construction and then handed to [`crate::reactor::Reactor::new`]. There is no runtime
//! mutation: changing configuration means building a new reactor.

use mqtt_core::{QoS, Will};

const MAX_CLIENT_ID_LEN: usize = 65535;

/// Address family hint for the (external) connecting adapter; the reactor core never resolves
/// addresses itself (§1 Out of scope).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Unspecified,
    Ipv4,
    Ipv6,
}

impl Default for AddressFamily {
    fn default() -> Self {
        AddressFamily::Unspecified
    }
}

/// Reasons [`Config::build`] can reject a configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("client_id is {0} bytes, exceeding the 65535-byte limit")]
    ClientIdTooLong(usize),

    #[error("endpoint port must be in [1, 65535], got 0")]
    PortZero,
}

/// A builder for the reactor's immutable construction-time configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    endpoint: (String, u16),
    client_id: String,
    clean_session: bool,
    keepalive_period_s: u16,
    will: Option<Will>,
    username: Option<String>,
    password: Option<Vec<u8>>,
    address_family: AddressFamily,
    ssl: bool,
}

impl Config {
    const DEFAULT_KEEPALIVE_S: u16 = 60;

    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Config {
            endpoint: (host.into(), port),
            client_id: client_id.into(),
            clean_session: true,
            keepalive_period_s: Self::DEFAULT_KEEPALIVE_S,
            will: None,
            username: None,
            password: None,
            address_family: AddressFamily::default(),
            ssl: false,
        }
    }

    pub fn clean_session(mut self, clean_session: bool) -> Self {
        self.clean_session = clean_session;
        self
    }

    pub fn keepalive_period(mut self, seconds: u16) -> Self {
        self.keepalive_period_s = seconds;
        self
    }

    pub fn will(mut self, qos: QoS, topic: impl Into<String>, message: Vec<u8>, retain: bool) -> Self {
        self.will = Some(Will {
            qos,
            topic: topic.into(),
            message,
            retain,
        });
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: Option<Vec<u8>>) -> Self {
        self.username = Some(username.into());
        self.password = password;
        self
    }

    pub fn address_family(mut self, family: AddressFamily) -> Self {
        self.address_family = family;
        self
    }

    pub fn ssl(mut self, ssl: bool) -> Self {
        self.ssl = ssl;
        self
    }

    /// Validates the accumulated options, as the teacher's `Connector` validates its `proto::Connect`
    /// before dialing.
    pub fn build(self) -> Result<Self, ConfigError> {
        if self.client_id.len() > MAX_CLIENT_ID_LEN {
            return Err(ConfigError::ClientIdTooLong(self.client_id.len()));
        }
        if self.endpoint.1 == 0 {
            return Err(ConfigError::PortZero);
        }
        Ok(self)
    }

    pub fn endpoint(&self) -> &(String, u16) {
        &self.endpoint
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn clean_session_enabled(&self) -> bool {
        self.clean_session
    }

    pub fn keepalive_period_s(&self) -> u16 {
        self.keepalive_period_s
    }

    pub fn will(&self) -> Option<&Will> {
        self.will.as_ref()
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&[u8]> {
        self.password.as_deref()
    }

    pub fn address_family_hint(&self) -> AddressFamily {
        self.address_family
    }

    pub fn ssl_requested(&self) -> bool {
        self.ssl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_oversized_client_id() {
        let config = Config::new("broker.example", 1883, "x".repeat(65536)).build();
        assert_eq!(config, Err(ConfigError::ClientIdTooLong(65536)));
    }

    #[test]
    fn rejects_port_zero() {
        let config = Config::new("broker.example", 0, "client").build();
        assert_eq!(config, Err(ConfigError::PortZero));
    }

    #[test]
    fn accepts_defaults() {
        let config = Config::new("broker.example", 1883, "client").build().unwrap();
        assert!(config.clean_session_enabled());
        assert_eq!(config.keepalive_period_s(), 60);
        assert!(config.will().is_none());
    }
}
