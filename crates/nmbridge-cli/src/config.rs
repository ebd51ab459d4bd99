//! Forwarding configuration file.
//!
//! ```toml
//! batch_size = 256
//! stats_interval_secs = 1
//!
//! [[port]]
//! port = "eth0"
//! tx_queues = 2
//! rx_queues = 2
//!
//! [[port]]
//! port = "eth1"
//! tx_queues = 2
//! rx_queues = 2
//!
//! [[forward]]
//! from = "eth0"
//! to = "eth1"
//! ring = 0
//! bidirectional = true
//! ```

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, bail};
use nmbridge_ring::PortConfig;
use serde::{Deserialize, Serialize};

fn default_batch_size() -> u32 {
    256
}

fn default_stats_interval() -> u64 {
    1
}

/// One forwarding worker: received packets of `from` leave through `to`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Route {
    /// Receiving port
    pub from: String,
    /// Transmitting port
    pub to: String,
    /// Ring id used on both ports
    #[serde(default)]
    pub ring: u16,
    /// Also forward from `to` back to `from` in the same worker
    #[serde(default)]
    pub bidirectional: bool,
}

impl Route {
    /// Both ends are the same ring of the same port
    pub fn is_hairpin(&self) -> bool {
        self.from == self.to
    }
}

/// CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Most packets moved per worker iteration
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Seconds between statistics reports (0 disables reporting)
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,

    /// Ports to configure
    #[serde(default, rename = "port")]
    pub ports: Vec<PortConfig>,

    /// Forwarding routes
    #[serde(default, rename = "forward")]
    pub routes: Vec<Route>,
}

impl Config {
    /// Parse a configuration file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Parse configuration text
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    fn port(&self, name: &str) -> Option<&PortConfig> {
        self.ports.iter().find(|p| p.port == name)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }

        let mut names = HashSet::new();
        for port in &self.ports {
            port.validate()?;
            if !names.insert(port.port.as_str()) {
                bail!("Port '{}' is configured more than once", port.port);
            }
        }

        // Every ring handle is owned by exactly one worker.
        let mut claimed = HashSet::new();
        for route in &self.routes {
            let from = self
                .port(&route.from)
                .with_context(|| format!("Route source '{}' is not a configured port", route.from))?;
            let to = self
                .port(&route.to)
                .with_context(|| format!("Route target '{}' is not a configured port", route.to))?;

            if route.ring >= from.rx_queues {
                bail!("Port '{}' has no receive ring {}", from.port, route.ring);
            }
            if route.ring >= to.tx_queues {
                bail!("Port '{}' has no transmit ring {}", to.port, route.ring);
            }
            if route.bidirectional && !route.is_hairpin() {
                if route.ring >= to.rx_queues {
                    bail!("Port '{}' has no receive ring {}", to.port, route.ring);
                }
                if route.ring >= from.tx_queues {
                    bail!("Port '{}' has no transmit ring {}", from.port, route.ring);
                }
            }

            let mut ends = vec![(route.from.as_str(), route.ring)];
            if !route.is_hairpin() {
                ends.push((route.to.as_str(), route.ring));
            }
            for end in ends {
                if !claimed.insert(end) {
                    bail!("Ring {} of '{}' is used by more than one route", end.1, end.0);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        batch_size = 128

        [[port]]
        port = "eth0"
        tx_queues = 2
        rx_queues = 2

        [[port]]
        port = "eth1"

        [[forward]]
        from = "eth0"
        to = "eth1"

        [[forward]]
        from = "eth0"
        to = "eth0"
        ring = 1
    "#;

    #[test]
    fn test_parse_sample() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.batch_size, 128);
        assert_eq!(config.stats_interval_secs, 1);
        assert_eq!(config.ports.len(), 2);
        assert_eq!(config.ports[1], PortConfig::new("eth1", 1, 1));
        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.routes[0].ring, 0);
        assert!(!config.routes[0].bidirectional);
        assert!(config.routes[1].is_hairpin());
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(Config::parse("batchsize = 1").is_err());
    }

    #[test]
    fn test_route_to_unknown_port() {
        let config = Config::parse(
            r#"
            [[port]]
            port = "eth0"

            [[forward]]
            from = "eth0"
            to = "eth9"
            "#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("eth9"));
    }

    #[test]
    fn test_ring_claimed_twice() {
        let config = Config::parse(
            r#"
            [[port]]
            port = "eth0"
            [[port]]
            port = "eth1"
            [[port]]
            port = "eth2"

            [[forward]]
            from = "eth0"
            to = "eth1"

            [[forward]]
            from = "eth2"
            to = "eth1"
            "#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("more than one route"));
    }

    #[test]
    fn test_route_ring_out_of_range() {
        let config = Config::parse(
            r#"
            [[port]]
            port = "eth0"
            rx_queues = 2
            [[port]]
            port = "eth1"

            [[forward]]
            from = "eth0"
            to = "eth1"
            ring = 1
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_port_and_zero_batch() {
        let dup = Config::parse(
            r#"
            [[port]]
            port = "eth0"
            [[port]]
            port = "eth0"
            "#,
        )
        .unwrap();
        assert!(dup.validate().is_err());

        let zero = Config::parse("batch_size = 0").unwrap();
        assert!(zero.validate().is_err());
    }
}
