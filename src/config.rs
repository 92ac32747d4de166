use {
    crate::version::VERSION,
    alloy_primitives::{Address, Selector},
    human_size::Size,
    serde::{
        Deserialize,
        de::{self, Deserializer},
    },
    std::{
        fs::read_to_string as read_to_string_sync,
        net::{IpAddr, Ipv4Addr, SocketAddr},
        path::Path,
        str::FromStr,
        time::Duration,
    },
};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub logs: ConfigLogs,
    pub metrics: Option<ConfigMetrics>,
    /// Gateway HTTP endpoint
    pub rpc: ConfigRpc,
    /// Upstream JSON-RPC nodes
    pub upstream: ConfigUpstream,
    /// Policy lists and interception tuning
    pub policy: ConfigPolicy,
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(file: P) -> anyhow::Result<Self> {
        let config = read_to_string_sync(&file)?;
        if matches!(
            file.as_ref().extension().and_then(|e| e.to_str()),
            Some("yml") | Some("yaml")
        ) {
            serde_yaml::from_str(&config).map_err(Into::into)
        } else {
            json5::from_str(&config).map_err(Into::into)
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ConfigLogs {
    pub json: bool,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ConfigMetrics {
    /// Endpoint of Prometheus service
    pub endpoint: SocketAddr,
}

impl Default for ConfigMetrics {
    fn default() -> Self {
        Self {
            endpoint: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8001),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ConfigRpc {
    /// Endpoint of the gateway service
    pub endpoint: SocketAddr,
    /// Max body size limit in bytes
    #[serde(deserialize_with = "deserialize_humansize_usize")]
    pub body_limit: usize,
    /// Max time to read the request body
    #[serde(with = "humantime_serde")]
    pub body_read_timeout: Duration,
}

impl Default for ConfigRpc {
    fn default() -> Self {
        Self {
            endpoint: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8545),
            body_limit: Self::default_body_limit(),
            body_read_timeout: Self::default_body_read_timeout(),
        }
    }
}

impl ConfigRpc {
    const fn default_body_limit() -> usize {
        50 * 1024 // 50KiB
    }

    const fn default_body_read_timeout() -> Duration {
        Duration::from_secs(10)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ConfigUpstream {
    /// Default public node, used unless a request overrides it
    pub default_url: String,
    /// Private transaction-submission service
    pub tx_manager_url: String,
    pub user_agent: String,
    /// Per-call timeout for outbound requests
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ConfigUpstream {
    fn default() -> Self {
        Self {
            default_url: "http://127.0.0.1:8546".to_owned(),
            tx_manager_url: "http://127.0.0.1:8547".to_owned(),
            user_agent: format!("palisade/v{}", VERSION.version),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ConfigPolicy {
    /// Client IPs refused at the door
    pub blocked_ips: Vec<IpAddr>,
    /// Sanctioned sender addresses
    pub ofac_addresses: Vec<Address>,
    /// Function selectors that never need frontrunning protection
    pub whitelisted_selectors: Vec<Selector>,
    /// How long a failed raw tx stays blacklisted
    #[serde(with = "humantime_serde")]
    pub blocked_tx_ttl: Duration,
    /// Synthetic nonce answers before an entry is retired
    pub nonce_retry_max: u64,
}

impl Default for ConfigPolicy {
    fn default() -> Self {
        Self {
            blocked_ips: Vec::new(),
            ofac_addresses: Vec::new(),
            whitelisted_selectors: default_whitelisted_selectors(),
            blocked_tx_ttl: Self::default_blocked_tx_ttl(),
            nonce_retry_max: Self::default_nonce_retry_max(),
        }
    }
}

impl ConfigPolicy {
    const fn default_blocked_tx_ttl() -> Duration {
        Duration::from_secs(4 * 60 * 60)
    }

    const fn default_nonce_retry_max() -> u64 {
        4
    }
}

// ERC20 transfer / approve / transferFrom, WETH deposit / withdraw.
fn default_whitelisted_selectors() -> Vec<Selector> {
    vec![
        Selector::new([0xa9, 0x05, 0x9c, 0xbb]),
        Selector::new([0x09, 0x5e, 0xa7, 0xb3]),
        Selector::new([0x23, 0xb8, 0x72, 0xdd]),
        Selector::new([0xd0, 0xe3, 0x0d, 0xb0]),
        Selector::new([0x2e, 0x1a, 0x7d, 0x4d]),
    ]
}

fn deserialize_humansize_usize<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    let size: String = Deserialize::deserialize(deserializer)?;

    Size::from_str(&size)
        .map(|size| size.to_bytes() as usize)
        .map_err(|error| de::Error::custom(format!("failed to parse size {size:?}: {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.policy.nonce_retry_max, 4);
        assert_eq!(
            config.policy.blocked_tx_ttl,
            Duration::from_secs(4 * 60 * 60)
        );
        assert_eq!(config.rpc.body_limit, 50 * 1024);
        assert!(!config.logs.json);
    }

    #[test]
    fn parses_yaml_with_humanized_values() {
        let config: Config = serde_yaml::from_str(
            r#"
rpc:
  endpoint: 0.0.0.0:9545
  body_limit: 1MiB
  body_read_timeout: 5s
upstream:
  default_url: https://rpc.example.net
  tx_manager_url: https://txm.example.net
policy:
  blocked_ips: ["10.0.0.7"]
  ofac_addresses: ["0x7f367cc41522ce07553e823bf3be79a889debe1b"]
  blocked_tx_ttl: 2h
  nonce_retry_max: 6
"#,
        )
        .unwrap();

        assert_eq!(config.rpc.body_limit, 1024 * 1024);
        assert_eq!(config.rpc.body_read_timeout, Duration::from_secs(5));
        assert_eq!(config.upstream.default_url, "https://rpc.example.net");
        assert_eq!(config.policy.blocked_ips.len(), 1);
        assert_eq!(config.policy.ofac_addresses.len(), 1);
        assert_eq!(config.policy.blocked_tx_ttl, Duration::from_secs(2 * 60 * 60));
        assert_eq!(config.policy.nonce_retry_max, 6);
        // selectors keep their defaults when the section omits them
        assert!(!config.policy.whitelisted_selectors.is_empty());
    }
}
