use {
    crate::{config::ConfigPolicy, util::HashSet},
    alloy_primitives::{Address, Selector},
    hyper::HeaderMap,
    std::net::SocketAddr,
};

/// Header name for the forwarded client address.
pub const XFF_HEADER: &str = "X-Forwarded-For";

/// The private relay rejects bundles below this gas limit, so such
/// transactions go straight to the mempool.
pub const PROTECT_GAS_FLOOR: u64 = 42_000;

#[derive(Debug)]
pub struct Policy {
    blocked_ips: HashSet<std::net::IpAddr>,
    ofac: HashSet<Address>,
    whitelisted_selectors: HashSet<Selector>,
}

impl Policy {
    pub fn new(config: &ConfigPolicy) -> Self {
        Self {
            blocked_ips: config.blocked_ips.iter().copied().collect(),
            ofac: config.ofac_addresses.iter().copied().collect(),
            whitelisted_selectors: config.whitelisted_selectors.iter().copied().collect(),
        }
    }

    pub fn is_ip_blocked(&self, ip: &str) -> bool {
        ip.parse()
            .map(|ip| self.blocked_ips.contains(&ip))
            .unwrap_or(false)
    }

    pub fn is_ofac_listed(&self, address: &Address) -> bool {
        self.ofac.contains(address)
    }

    pub fn is_whitelisted_selector(&self, selector: &Selector) -> bool {
        self.whitelisted_selectors.contains(selector)
    }

    /// Whether a decoded transaction must be routed through the tx-manager.
    ///
    /// Plenty of traffic has nothing to gain from protection: low-gas sends,
    /// cancellations (empty calldata), and calls to whitelisted functions
    /// such as plain ERC20 transfers.
    pub fn needs_frontrunning_protection(&self, gas_limit: u64, calldata: &[u8]) -> bool {
        if gas_limit < PROTECT_GAS_FLOOR {
            return false;
        }

        if calldata.is_empty() {
            return false;
        }

        match calldata.get(0..4) {
            Some(selector) => !self.is_whitelisted_selector(&Selector::from_slice(selector)),
            // calldata shorter than a selector never matches the whitelist
            None => true,
        }
    }
}

/// Forwarded address when present, peer address otherwise.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get(XFF_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_owned())
        .unwrap_or_else(|| peer.ip().to_string())
}
