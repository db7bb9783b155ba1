use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("interrupted, shutting down"),
                Err(err) => tracing::warn!("failed to listen for interrupt: {}", err),
            }
            cancel.cancel();
        }
    });
    lxcfs_webhook::cli::main(cancel).await
}
