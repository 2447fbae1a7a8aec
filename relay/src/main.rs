use args::Args;
use clap::Parser;
use tokio_util::sync::CancellationToken;

mod args;
mod logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logger::init(&args.log);

    let config = config::Config::load(&args.config)?;
    config.validate()?;

    let listen_address = args
        .listen
        .unwrap_or_else(|| config.server.listen_address_or_default());

    let shutdown_signal = CancellationToken::new();
    let shutdown_trigger = shutdown_signal.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("shutdown requested");
            shutdown_trigger.cancel();
        }
    });

    server::serve(server::ServeConfig {
        listen_address,
        config,
        shutdown_signal,
        version: env!("CARGO_PKG_VERSION").to_string(),
        bound_addr_sender: None,
    })
    .await
}
