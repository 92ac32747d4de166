use {
    crate::{config::ConfigMetrics, version::VERSION as VERSION_INFO},
    anyhow::Context,
    http_body_util::{BodyExt, Empty as BodyEmpty, Full as BodyFull, combinators::BoxBody},
    hyper::{
        Request, Response, StatusCode,
        body::{Bytes, Incoming as BodyIncoming},
        service::service_fn,
    },
    hyper_util::{
        rt::tokio::{TokioExecutor, TokioIo},
        server::conn::auto::Builder as ServerBuilder,
    },
    metrics::{counter, describe_counter, describe_gauge},
    metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle},
    std::{future::Future, time::Duration},
    tokio::{net::TcpListener, sync::watch, task::JoinError, time::sleep},
    tracing::{debug, error, info},
};

pub const RPC_REQUESTS_TOTAL: &str = "rpc_requests_total"; // method, outcome
pub const RPC_UPSTREAM_REQUESTS_TOTAL: &str = "rpc_upstream_requests_total"; // target
pub const FAIL_BUNDLE_TOTAL: &str = "fail_bundle_total";
pub const BLOCKED_TXS_SIZE: &str = "blocked_txs_size";
pub const NONCE_RETRIES_SIZE: &str = "nonce_retries_size";

pub fn setup() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install prometheus exporter")?;

    describe_counter!("version", "Palisade version info");
    counter!(
        "version",
        "package" => VERSION_INFO.package,
        "version" => VERSION_INFO.version,
    )
    .absolute(1);

    describe_counter!(
        RPC_REQUESTS_TOTAL,
        "Number of handled requests by method and outcome"
    );
    describe_counter!(
        RPC_UPSTREAM_REQUESTS_TOTAL,
        "Number of proxied requests by upstream target"
    );
    describe_counter!(
        FAIL_BUNDLE_TOTAL,
        "Number of fail-bundle signals received from the tx-manager"
    );

    describe_gauge!(BLOCKED_TXS_SIZE, "Blacklisted raw transactions");
    describe_gauge!(NONCE_RETRIES_SIZE, "Seeded nonce-retry senders");

    Ok(handle)
}

pub async fn spawn_server(
    config: ConfigMetrics,
    handle: PrometheusHandle,
    mut shutdown: watch::Receiver<()>,
) -> anyhow::Result<impl Future<Output = Result<(), JoinError>>> {
    let recorder_handle = handle.clone();
    tokio::spawn(async move {
        loop {
            sleep(Duration::from_secs(1)).await;
            recorder_handle.run_upkeep();
        }
    });

    let listener = TcpListener::bind(config.endpoint).await?;
    info!("start metrics server at: {}", config.endpoint);

    let jh = tokio::spawn(async move {
        let http = ServerBuilder::new(TokioExecutor::new());

        loop {
            let stream = tokio::select! {
                incoming = listener.accept() => match incoming {
                    Ok((stream, addr)) => {
                        debug!("new metrics connection from {addr}");
                        stream
                    }
                    Err(error) => {
                        error!("failed to accept new metrics connection: {error}");
                        break;
                    }
                },
                _ = shutdown.changed() => break,
            };

            let service = service_fn({
                let handle = handle.clone();
                move |req: Request<BodyIncoming>| {
                    let handle = handle.clone();
                    async move {
                        match req.uri().path() {
                            "/metrics" => Response::builder()
                                .body(BodyFull::from(Bytes::from(handle.render())).boxed()),
                            "/health" => Response::builder().body(BodyFull::from("OK").boxed()),
                            _ => Response::builder()
                                .status(StatusCode::NOT_FOUND)
                                .body(empty_body()),
                        }
                    }
                }
            });

            let connection = http.serve_connection(TokioIo::new(stream), service).into_owned();
            tokio::spawn(async move {
                if let Err(error) = connection.await {
                    error!("Error serving metrics connection: {error:?}");
                }
            });
        }
    });

    Ok(jh)
}

fn empty_body() -> BoxBody<Bytes, std::convert::Infallible> {
    BodyEmpty::new().boxed()
}
