use {
    crate::{
        config::ConfigRpc,
        rpc::request::{self, State},
    },
    http_body_util::{BodyExt, Empty as BodyEmpty, Full as BodyFull},
    hyper::{
        Method, Request, Response, StatusCode, body::Incoming as BodyIncoming,
        service::service_fn,
    },
    hyper_util::{
        rt::tokio::{TokioExecutor, TokioIo},
        server::conn::auto::Builder as ServerBuilder,
    },
    std::{future::Future, net::SocketAddr, sync::Arc},
    tokio::{net::TcpListener, sync::watch, task::JoinError},
    tracing::{debug, error, info},
};

pub async fn spawn(
    config: ConfigRpc,
    state: Arc<State>,
    mut shutdown: watch::Receiver<()>,
) -> anyhow::Result<(SocketAddr, impl Future<Output = Result<(), JoinError>>)> {
    let listener = TcpListener::bind(config.endpoint).await?;
    let local_addr = listener.local_addr()?;
    info!("start server at: {local_addr}");

    let jh = tokio::spawn(async move {
        let http = ServerBuilder::new(TokioExecutor::new());
        let graceful = hyper_util::server::graceful::GracefulShutdown::new();

        loop {
            let (stream, addr) = tokio::select! {
                incoming = listener.accept() => match incoming {
                    Ok((stream, addr)) => {
                        debug!("new connection from {addr}");
                        (stream, addr)
                    }
                    Err(error) => {
                        error!("failed to accept new connection: {error}");
                        break;
                    }
                },
                _ = shutdown.changed() => break,
            };

            let service = service_fn({
                let state = Arc::clone(&state);
                move |req: Request<BodyIncoming>| {
                    let state = Arc::clone(&state);
                    async move {
                        match (req.method(), req.uri().path()) {
                            (&Method::POST, "/") => request::on_request(req, addr, state).await,
                            (&Method::GET, "/healthz") => {
                                Response::builder().body(BodyFull::from("OK").boxed())
                            }
                            _ => Response::builder()
                                .status(StatusCode::NOT_FOUND)
                                .body(BodyEmpty::new().boxed()),
                        }
                    }
                }
            });

            let connection = http.serve_connection(TokioIo::new(stream), service);
            let fut = graceful.watch(connection.into_owned());

            tokio::spawn(async move {
                if let Err(error) = fut.await {
                    error!("Error serving HTTP connection: {error:?}");
                }
            });
        }

        drop(listener);
        graceful.shutdown().await;
    });

    Ok((local_addr, jh))
}
