use {
    crate::{config::ConfigUpstream, metrics::RPC_UPSTREAM_REQUESTS_TOTAL},
    anyhow::Context,
    hyper::body::Bytes,
    jsonrpsee_types::{Response, ResponsePayload},
    metrics::counter,
    reqwest::{Client, StatusCode, header::CONTENT_TYPE},
    serde_json::json,
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("request to upstream failed: {0}")]
    Transport(reqwest::Error),
    #[error("failed to collect bytes from upstream: {0}")]
    Body(reqwest::Error),
    #[error("failed to parse json-rpc from upstream (status {status})")]
    Decode { status: StatusCode },
}

/// A decoded reply, success or error payload alike. Anything that did not
/// come back as a JSON-RPC envelope is a [`ProxyError`].
#[derive(Debug)]
pub struct ProxyReply {
    pub status: StatusCode,
    pub response: Response<'static, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: Client,
}

impl UpstreamClient {
    pub fn new(config: &ConfigUpstream) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .build()?;

        Ok(Self { client })
    }

    /// Replays the original request bytes against `url`. Timeouts surface as
    /// transport errors through the client-level deadline.
    pub async fn forward(
        &self,
        target: &'static str,
        url: &str,
        body: Bytes,
    ) -> Result<ProxyReply, ProxyError> {
        counter!(RPC_UPSTREAM_REQUESTS_TOTAL, "target" => target).increment(1);

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(ProxyError::Transport)?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(ProxyError::Body)?;

        serde_json::from_slice(&bytes)
            .map(|response: Response<'_, serde_json::Value>| ProxyReply {
                status,
                response: response.into_owned(),
            })
            .map_err(|_error| ProxyError::Decode { status })
    }

    /// Current transaction count of `address` as seen by `url`.
    pub async fn fetch_nonce(&self, url: &str, address: &str) -> anyhow::Result<u64> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": "eth_getTransactionCount",
            "id": 0,
            "params": [address, "latest"]
        })
        .to_string();

        let reply = self.forward("default", url, body.into()).await?;
        match reply.response.payload {
            ResponsePayload::Success(value) => parse_quantity(value.as_ref()),
            ResponsePayload::Error(error) => {
                anyhow::bail!("failed to get transaction count: {error:?}")
            }
        }
    }
}

/// An `0x`-prefixed hex quantity per the Ethereum JSON-RPC conventions.
fn parse_quantity(value: &serde_json::Value) -> anyhow::Result<u64> {
    let quantity = value
        .as_str()
        .with_context(|| format!("expected quantity string, got: {value}"))?;
    let digits = quantity
        .strip_prefix("0x")
        .with_context(|| format!("quantity without 0x prefix: {quantity}"))?;
    u64::from_str_radix(digits, 16).with_context(|| format!("invalid quantity: {quantity}"))
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn parses_hex_quantities() {
        assert_eq!(parse_quantity(&json!("0x0")).unwrap(), 0);
        assert_eq!(parse_quantity(&json!("0x11")).unwrap(), 17);
        assert_eq!(parse_quantity(&json!("0xde0b6b3a7640000")).unwrap(), 1_000_000_000_000_000_000);
    }

    #[test]
    fn rejects_non_quantities() {
        assert!(parse_quantity(&json!(17)).is_err());
        assert!(parse_quantity(&json!("11")).is_err());
        assert!(parse_quantity(&json!("0xzz")).is_err());
    }
}
