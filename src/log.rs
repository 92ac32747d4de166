use {
    std::io::{self, IsTerminal},
    thiserror::Error,
    tracing_subscriber::{
        filter::{EnvFilter, FromEnvError, LevelFilter},
        fmt::layer,
        layer::SubscriberExt,
        util::{SubscriberInitExt, TryInitError},
    },
};

#[derive(Debug, Error)]
pub enum LogSetupError {
    #[error(transparent)]
    FromEnv(#[from] FromEnvError),
    #[error(transparent)]
    Init(#[from] TryInitError),
}

pub fn setup(json: bool) -> Result<(), LogSetupError> {
    let env = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;

    let is_atty = io::stdout().is_terminal() && io::stderr().is_terminal();
    let io_layer = layer().with_ansi(is_atty).with_line_number(true);

    let registry = tracing_subscriber::registry().with(env);
    if json {
        registry.with(io_layer.json()).try_init()?;
    } else {
        registry.with(io_layer).try_init()?;
    }

    Ok(())
}
