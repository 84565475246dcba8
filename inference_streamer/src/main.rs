use inference_streamer::{config, start_app};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// The inference client blocks on its own executor, so main stays synchronous.
fn main() -> anyhow::Result<()> {
    let config = config::get_configuration()?;
    let log_level = config.log_level.as_str();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().json().with_level(true))
        .init();

    if let Err(e) = start_app(config) {
        tracing::error!("Streaming run failed: {:#}", e);
        return Err(e);
    }

    Ok(())
}
