use {
    anyhow::Context,
    clap::Parser,
    futures::future::{BoxFuture, FutureExt, TryFutureExt, ready, try_join_all},
    palisade::{
        config::Config,
        log, metrics,
        rpc::{request::State, server},
    },
    std::sync::Arc,
    tokio::{signal, sync::watch},
    tracing::{info, warn},
};

#[derive(Debug, Parser)]
#[clap(
    author,
    version,
    about = "Palisade: JSON-RPC gateway shielding wallet transactions from frontrunning"
)]
struct Args {
    /// Path to config
    #[clap(short, long, default_value_t = String::from("config.yml"))]
    pub config: String,

    /// Only check config and exit
    #[clap(long, default_value_t = false)]
    pub check: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load_from_file(&args.config)
        .with_context(|| format!("failed to load config from {}", args.config))?;

    // Setup logs
    log::setup(config.logs.json)?;

    // Exit if we only check the config
    if args.check {
        info!("Config is OK!");
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("palisade")
        .build()?;

    runtime.block_on(async move {
        let (shutdown_tx, shutdown_rx) = watch::channel(());

        let metrics_fut: BoxFuture<'_, anyhow::Result<()>> =
            if let Some(metrics_config) = config.metrics {
                let handle = metrics::setup()?;
                metrics::spawn_server(metrics_config, handle, shutdown_rx.clone())
                    .await?
                    .map_err(anyhow::Error::from)
                    .boxed()
            } else {
                ready(Ok(())).boxed()
            };

        let state = Arc::new(State::new(&config)?);
        let (_addr, rpc_fut) = server::spawn(config.rpc.clone(), state, shutdown_rx).await?;

        tokio::spawn(async move {
            if let Err(error) = signal::ctrl_c().await {
                warn!("failed to listen for SIGINT: {error}");
            }
            info!("SIGINT received, shutting down...");
            let _ = shutdown_tx.send(());
        });

        let rpc_fut: BoxFuture<'_, anyhow::Result<()>> =
            rpc_fut.map_err(anyhow::Error::from).boxed();
        try_join_all(vec![metrics_fut, rpc_fut]).await.map(|_| ())
    })
}
