use {
    crate::{
        config::Config,
        metrics::{FAIL_BUNDLE_TOTAL, RPC_REQUESTS_TOTAL},
        policy::{self, Policy},
        rpc::{
            response::{
                ResponseWriter, RpcResponse, jsonrpc_response_error, jsonrpc_response_success,
            },
            upstream::{ProxyReply, UpstreamClient},
        },
        stores::{BlockedTxStore, NonceRetryStore},
        tx::DecodedTx,
    },
    alloy_primitives::hex,
    http_body_util::{BodyExt, Limited},
    hyper::{
        StatusCode,
        body::{Bytes, Incoming as BodyIncoming},
        http::{Result as HttpResult, request::Parts},
    },
    jsonrpsee_types::{Id, Request, ResponsePayload},
    metrics::counter,
    serde_json::{Value, json},
    std::{
        net::SocketAddr,
        sync::Arc,
        time::{Duration, Instant},
    },
    tokio::time::timeout,
    tracing::{info, warn},
    uuid::Uuid,
};

/// `net_version` answer: Ethereum mainnet.
pub const NETWORK_VERSION: &str = "1";

/// Error message the tx-manager returns once a bundle has exhausted its
/// retries. Matching is exact.
pub const FAIL_BUNDLE_MESSAGE: &str = "Bundle submitted has already failed too many times";

const BLOCKED_TX_MESSAGE: &str = "rawTx blocked because bundle failed too many times";

/// Self-identification probe. A dApp that `eth_call`s this contract with
/// this selector receives [`PROBE_RESULT`] instead of a chain response,
/// which is the only way to detect the gateway without a side channel.
pub const PROBE_CONTRACT: &str = "0xf1a54b0759b58661cea17cff19dd37940a9b5f1a";
pub const PROBE_SELECTOR: &str = "0x98d5fdca";
pub const PROBE_RESULT: &str =
    "0x0000000000000000000000000000000000000000000000000000000000000001";

#[derive(Debug)]
pub struct State {
    body_limit: usize,
    body_read_timeout: Duration,
    default_upstream: String,
    tx_manager_upstream: String,
    upstream: UpstreamClient,
    policy: Policy,
    blocked_txs: BlockedTxStore,
    nonce_retries: NonceRetryStore,
}

impl State {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            body_limit: config.rpc.body_limit,
            body_read_timeout: config.rpc.body_read_timeout,
            default_upstream: config.upstream.default_url.clone(),
            tx_manager_upstream: config.upstream.tx_manager_url.clone(),
            upstream: UpstreamClient::new(&config.upstream)?,
            policy: Policy::new(&config.policy),
            blocked_txs: BlockedTxStore::new(config.policy.blocked_tx_ttl),
            nonce_retries: NonceRetryStore::new(config.policy.nonce_retry_max),
        })
    }
}

pub async fn on_request(
    req: hyper::Request<BodyIncoming>,
    peer: SocketAddr,
    state: Arc<State>,
) -> HttpResult<RpcResponse> {
    let (parts, body) = req.into_parts();

    let mut ctx = RequestCtx {
        default_upstream: state.default_upstream.clone(),
        state,
        uid: Uuid::new_v4(),
        started_at: Instant::now(),
        client_ip: policy::client_ip(&parts.headers, peer),
        id: Id::Null,
        method: String::new(),
        params_json: None,
        raw_tx_hex: String::new(),
        tx_from: String::new(),
        writer: ResponseWriter::default(),
    };

    ctx.process(&parts, body).await;

    let method = if ctx.method.is_empty() {
        "unknown".to_owned()
    } else {
        ctx.method.clone()
    };
    let outcome = ctx
        .writer
        .status()
        .unwrap_or(StatusCode::OK)
        .as_u16()
        .to_string();
    counter!(RPC_REQUESTS_TOTAL, "method" => method, "outcome" => outcome).increment(1);

    info!(
        uid = %ctx.uid,
        elapsed = ?ctx.started_at.elapsed(),
        "request finished"
    );
    ctx.writer.finish()
}

/// One inbound call, handled to completion on its own path. All output goes
/// through the writer; phases never write more than once.
struct RequestCtx {
    state: Arc<State>,
    uid: Uuid,
    started_at: Instant,
    client_ip: String,
    /// may be replaced for this request by the `url=` query override
    default_upstream: String,
    id: Id<'static>,
    method: String,
    params_json: Option<String>,
    raw_tx_hex: String,
    tx_from: String,
    writer: ResponseWriter,
}

impl RequestCtx {
    async fn process(&mut self, parts: &Parts, body: BodyIncoming) {
        info!(uid = %self.uid, ip = %self.client_ip, "POST request");

        if self.state.policy.is_ip_blocked(&self.client_ip) {
            info!(uid = %self.uid, ip = %self.client_ip, "blocked IP");
            self.writer.write_status(StatusCode::UNAUTHORIZED);
            return;
        }

        if let Some(url) = custom_upstream(parts.uri.query()) {
            info!(uid = %self.uid, url, "using custom upstream");
            self.default_upstream = url;
        }

        let limited = Limited::new(body, self.state.body_limit);
        let bytes = match timeout(self.state.body_read_timeout, limited.collect()).await {
            Ok(Ok(body)) => body.to_bytes(),
            Ok(Err(error)) => {
                warn!(uid = %self.uid, "failed to read request body: {error}");
                self.writer.write_status(StatusCode::BAD_REQUEST);
                return;
            }
            Err(_elapsed) => {
                warn!(uid = %self.uid, "timed out reading request body");
                self.writer.write_status(StatusCode::BAD_REQUEST);
                return;
            }
        };

        match serde_json::from_slice::<Request<'_>>(&bytes) {
            Ok(request) => {
                self.id = request.id.clone().into_owned();
                self.method = request.method.clone().into_owned();
                self.params_json = request.params.as_ref().map(|params| params.get().to_owned());
            }
            Err(error) => {
                warn!(uid = %self.uid, "failed to parse JSON-RPC request: {error}");
                self.writer.write_status(StatusCode::BAD_REQUEST);
                return;
            }
        }

        info!(uid = %self.uid, method = %self.method, ip = %self.client_ip, "JSON-RPC request");

        let method = self.method.clone();
        match method.as_str() {
            "eth_sendRawTransaction" => self.handle_send_raw_transaction(bytes).await,
            "net_version" => self.write_result(json!(NETWORK_VERSION)),
            method => {
                // normal proxy mode, after the interceptors had their say
                if method == "eth_getTransactionCount" && self.intercept_transaction_count().await
                {
                    return;
                }
                if method == "eth_call" && self.intercept_probe_call() {
                    return;
                }

                let url = self.default_upstream.clone();
                if let Some(reply) = self.proxy_to("default", &url, bytes).await {
                    self.writer.write_status(reply.status);
                    self.writer.write_envelope(&reply.response);
                }
            }
        }
    }

    async fn handle_send_raw_transaction(&mut self, body: Bytes) {
        let params = self.params_array().unwrap_or_default();
        // the first param is documented as a hex string; check the dynamic
        // type instead of trusting it
        let Some(raw_tx_hex) = params.first().and_then(Value::as_str) else {
            warn!(uid = %self.uid, "no raw tx in params");
            self.writer.write_status(StatusCode::BAD_REQUEST);
            return;
        };
        if raw_tx_hex.len() < 2 {
            warn!(uid = %self.uid, "invalid raw transaction (wrong length)");
            self.writer.write_status(StatusCode::BAD_REQUEST);
            return;
        }
        self.raw_tx_hex = raw_tx_hex.to_owned();

        if self.state.blocked_txs.contains(&self.raw_tx_hex).await {
            info!(uid = %self.uid, "rawTx blocked because bundle failed too many times");
            let response = jsonrpc_response_error(self.id.clone(), BLOCKED_TX_MESSAGE);
            self.writer.write_envelope(&response);
            return;
        }

        let tx = match DecodedTx::decode(&self.raw_tx_hex) {
            Ok(tx) => tx,
            Err(error) => {
                warn!(uid = %self.uid, "failed to decode raw transaction: {error}");
                self.writer.write_status(StatusCode::BAD_REQUEST);
                return;
            }
        };

        let sender = match tx.recover_sender() {
            Ok(sender) => sender,
            Err(error) => {
                warn!(uid = %self.uid, "couldn't get sender from raw tx: {error}");
                self.writer.write_status(StatusCode::BAD_REQUEST);
                return;
            }
        };
        self.tx_from = format!("0x{}", hex::encode(sender));

        if self.state.policy.is_ofac_listed(&sender) {
            warn!(uid = %self.uid, sender = %self.tx_from, "blocked tx from sanctioned address");
            self.writer.write_status(StatusCode::UNAUTHORIZED);
            return;
        }

        let needs_protection = self
            .state
            .policy
            .needs_frontrunning_protection(tx.gas_limit(), tx.calldata());
        let (target, url) = if needs_protection {
            ("tx_manager", self.state.tx_manager_upstream.clone())
        } else {
            ("default", self.default_upstream.clone())
        };
        info!(
            uid = %self.uid,
            gas = tx.gas_limit(),
            target,
            "eth_sendRawTransaction routing decision"
        );

        let Some(reply) = self.proxy_to(target, &url, body).await else {
            return;
        };

        self.writer.write_status(reply.status);
        match &reply.response.payload {
            ResponsePayload::Error(error) => {
                info!(uid = %self.uid, target, code = error.code(), message = error.message(), "eth_sendRawTransaction upstream error");
                if error.message() == FAIL_BUNDLE_MESSAGE {
                    self.handle_failed_bundle().await;
                }
                // pass the original error through to the wallet
                self.writer.write_envelope(&reply.response);
            }
            ResponsePayload::Success(_) => {
                // the tx-manager answers with a bundle hash; the wallet
                // expects the transaction hash
                let tx_hash = format!("0x{}", hex::encode(tx.hash()));
                info!(uid = %self.uid, target, tx_hash = %tx_hash, "eth_sendRawTransaction ok");
                self.write_result(json!(tx_hash));
            }
        }
    }

    /// Wallets keep re-sending a failed raw tx. Blacklist it and remember a
    /// nonce one past the chain's view: the next `eth_getTransactionCount`
    /// makes the wallet conclude the tx advanced, stopping the retry storm.
    async fn handle_failed_bundle(&mut self) {
        counter!(FAIL_BUNDLE_TOTAL).increment(1);

        let entries = self.state.blocked_txs.insert(&self.raw_tx_hex).await;
        info!(uid = %self.uid, entries, "rawTx added to blocklist");

        match self
            .state
            .upstream
            .fetch_nonce(&self.default_upstream, &self.tx_from)
            .await
        {
            Ok(nonce) => {
                self.state
                    .nonce_retries
                    .seed(&self.tx_from, nonce.saturating_add(1))
                    .await;
            }
            Err(error) => {
                warn!(uid = %self.uid, "failed getting nonce: {error:#}");
            }
        }
    }

    /// Synthesises `eth_getTransactionCount` for seeded senders. `false`
    /// means not handled and the request proxies normally.
    async fn intercept_transaction_count(&mut self) -> bool {
        let params = self.params_array().unwrap_or_default();
        let Some(address) = params.first().and_then(Value::as_str) else {
            return false;
        };

        let Some(nonce) = self.state.nonce_retries.next_synthetic(address).await else {
            return false;
        };

        info!(uid = %self.uid, address, nonce, "intercepted eth_getTransactionCount");
        self.write_result(json!(format!("0x{nonce:x}")));
        true
    }

    /// Answers the gateway-detection `eth_call` probe. `false` means not
    /// handled.
    fn intercept_probe_call(&mut self) -> bool {
        let params = self.params_array().unwrap_or_default();
        if !probe_matches(&params) {
            return false;
        }

        info!(uid = %self.uid, "intercepted eth_call to probe contract");
        self.write_result(json!(PROBE_RESULT));
        true
    }

    async fn proxy_to(&mut self, target: &'static str, url: &str, body: Bytes) -> Option<ProxyReply> {
        let proxy_started = Instant::now();
        match self.state.upstream.forward(target, url, body).await {
            Ok(reply) => {
                info!(
                    uid = %self.uid,
                    target,
                    status = %reply.status,
                    elapsed = ?proxy_started.elapsed(),
                    "proxy to upstream successful"
                );
                Some(reply)
            }
            Err(error) => {
                warn!(uid = %self.uid, target, "proxy to upstream failed: {error}");
                self.writer.write_status(StatusCode::INTERNAL_SERVER_ERROR);
                None
            }
        }
    }

    fn write_result(&mut self, result: Value) {
        let response = jsonrpc_response_success(self.id.clone(), result);
        self.writer.write_envelope(&response);
    }

    fn params_array(&self) -> Option<Vec<Value>> {
        let raw = self.params_json.as_deref()?;
        serde_json::from_str(raw).ok()
    }
}

fn custom_upstream(query: Option<&str>) -> Option<String> {
    let query = query?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "url")
        .map(|(_, value)| value.into_owned())
        .filter(|value| value.len() > 1)
}

fn probe_matches(params: &[Value]) -> bool {
    let Some(call) = params.first().and_then(Value::as_object) else {
        return false;
    };

    let to_matches = call
        .get("to")
        .and_then(Value::as_str)
        .is_some_and(|to| to.eq_ignore_ascii_case(PROBE_CONTRACT));
    let data_matches = call
        .get("data")
        .or_else(|| call.get("input"))
        .and_then(Value::as_str)
        .is_some_and(|data| data.starts_with(PROBE_SELECTOR));

    to_matches && data_matches
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn probe_requires_both_address_and_selector() {
        let full = json!([{"to": PROBE_CONTRACT, "data": PROBE_SELECTOR}]);
        assert!(probe_matches(full.as_array().unwrap()));

        let checksummed = json!([{
            "to": PROBE_CONTRACT.to_uppercase().replace("0X", "0x"),
            "data": PROBE_SELECTOR,
        }]);
        assert!(probe_matches(checksummed.as_array().unwrap()));

        let wrong_to = json!([{"to": "0x0000000000000000000000000000000000000001", "data": PROBE_SELECTOR}]);
        assert!(!probe_matches(wrong_to.as_array().unwrap()));

        let wrong_data = json!([{"to": PROBE_CONTRACT, "data": "0xdeadbeef"}]);
        assert!(!probe_matches(wrong_data.as_array().unwrap()));

        let no_data = json!([{"to": PROBE_CONTRACT}]);
        assert!(!probe_matches(no_data.as_array().unwrap()));

        let not_an_object = json!(["0xdeadbeef"]);
        assert!(!probe_matches(not_an_object.as_array().unwrap()));

        assert!(!probe_matches(&[]));
    }

    #[test]
    fn probe_accepts_the_input_alias() {
        let params = json!([{"to": PROBE_CONTRACT, "input": PROBE_SELECTOR}]);
        assert!(probe_matches(params.as_array().unwrap()));
    }

    #[test]
    fn custom_upstream_needs_a_usable_value() {
        assert_eq!(
            custom_upstream(Some("url=http://10.0.0.1:8545")),
            Some("http://10.0.0.1:8545".to_owned())
        );
        assert_eq!(
            custom_upstream(Some("foo=bar&url=http://10.0.0.1:8545")),
            Some("http://10.0.0.1:8545".to_owned())
        );
        // single-character override is ignored, as is an absent one
        assert_eq!(custom_upstream(Some("url=x")), None);
        assert_eq!(custom_upstream(Some("foo=bar")), None);
        assert_eq!(custom_upstream(None), None);
    }
}
