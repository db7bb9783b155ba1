use crate::{scheme::Scheme, serve, sidecar::SidecarConfig, webhook::server::Server};
use anyhow::Context as _;
use clap::Parser;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio_util::sync::CancellationToken;

/// Admission webhook injecting lxcfs into annotated pods
#[derive(Parser, Debug)]
#[command(name = "lxcfs-webhook")]
pub struct Args {
    /// Webhook server port
    #[arg(long, default_value_t = 443)]
    pub port: u16,
    /// File containing the x509 certificate for HTTPS
    #[arg(long = "tlsCertFile", default_value = "/etc/webhook/certs/cert.pem")]
    pub tls_cert_file: PathBuf,
    /// File containing the x509 private key matching `--tlsCertFile`
    #[arg(long = "tlsKeyFile", default_value = "/etc/webhook/certs/key.pem")]
    pub tls_key_file: PathBuf,
    /// File containing the sidecar configuration
    #[arg(
        long = "sidecarCfgFile",
        default_value = "/etc/webhook/config/sidecarconfig.yaml"
    )]
    pub sidecar_cfg_file: PathBuf,
}

/// Builds everything the webhook needs before serving.
/// Any failure here must abort startup.
pub fn prepare(args: &Args) -> anyhow::Result<(Server, rustls::ServerConfig)> {
    let scheme = Scheme::with_defaults().context("failed to register known kinds")?;
    let sidecar = SidecarConfig::load(&args.sidecar_cfg_file)?;
    let tls = serve::load_tls(&args.tls_cert_file, &args.tls_key_file)?;

    let mut builder = Server::builder(scheme);
    builder.sidecar(sidecar);
    Ok((builder.build(), tls))
}

/// Webhook entry point.
///
/// This function parses command line arguments, loads configuration and
/// serves until `cancel` fires.
#[tracing::instrument(skip(cancel))]
pub async fn main(cancel: CancellationToken) -> anyhow::Result<()> {
    let args = Args::parse();
    tracing::info!(args = ?args, "parsed command-line arguments");
    let (server, tls) = prepare(&args)?;
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    serve::serve(Arc::new(server), addr, tls, cancel).await
}
