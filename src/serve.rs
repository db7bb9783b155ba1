//! HTTPS listener in front of the admission [`Server`]

use crate::{errors::WriteError, webhook::server::{Reply, Server}};
use anyhow::Context as _;
use http_body_util::{BodyExt, Full};
use hyper::{body::Bytes, header, Method, Request, Response, StatusCode};
use std::{convert::Infallible, net::SocketAddr, path::Path, sync::Arc};
use tokio_util::sync::CancellationToken;

pub const HEALTH_PATH: &str = "/healthz";

/// Builds TLS configuration from PEM-encoded certificate chain and key
pub fn load_tls(cert_file: &Path, key_file: &Path) -> anyhow::Result<rustls::ServerConfig> {
    let cert_pem = std::fs::read(cert_file)
        .with_context(|| format!("failed to read certificate {}", cert_file.display()))?;
    let key_pem = std::fs::read(key_file)
        .with_context(|| format!("failed to read private key {}", key_file.display()))?;

    let certs = rustls_pemfile::certs(&mut cert_pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .context("failed to parse certificate chain")?;
    if certs.is_empty() {
        anyhow::bail!("no certificate found in {}", cert_file.display());
    }
    let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
        .context("failed to parse private key")?
        .with_context(|| format!("no private key found in {}", key_file.display()))?;

    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("certificate and key do not form a valid pair")?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}

fn into_response(reply: Reply) -> Result<Response<Full<Bytes>>, WriteError> {
    let response = Response::builder()
        .status(reply.status)
        .header(header::CONTENT_TYPE, reply.content_type)
        .body(Full::new(Bytes::from(reply.body)))?;
    Ok(response)
}

async fn handle(
    server: Arc<Server>,
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path().to_string();
    if req.method() == Method::GET && path == HEALTH_PATH {
        let reply = Reply {
            status: StatusCode::OK,
            content_type: crate::webhook::server::TEXT_CONTENT_TYPE,
            body: b"ok".to_vec(),
        };
        return Ok(into_response(reply).unwrap_or_else(fallback));
    }

    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);
    // an unreadable body is treated as an empty one
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            tracing::warn!("failed to read request body: {}", err);
            Bytes::new()
        }
    };

    let reply = server.handle(&path, content_type.as_deref(), &body);
    Ok(into_response(reply).unwrap_or_else(fallback))
}

fn fallback(err: WriteError) -> Response<Full<Bytes>> {
    tracing::error!("can't write response: {}", err);
    let mut response = Response::new(Full::new(Bytes::from(format!(
        "could not write response: {}",
        err
    ))));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

/// Accepts connections until `cancel` fires.
///
/// Every connection is served on its own task; handshake and connection
/// failures are logged and never stop the listener.
pub async fn serve(
    server: Arc<Server>,
    addr: SocketAddr,
    tls: rustls::ServerConfig,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(tls));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to listen on {}", addr))?;
    tracing::info!(addr = %addr, "webhook server listening");

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(err) => {
                    tracing::warn!("failed to accept connection: {}", err);
                    continue;
                }
            },
            _ = cancel.cancelled() => break,
        };
        let acceptor = acceptor.clone();
        let server = server.clone();
        tokio::spawn(async move {
            let stream = match acceptor.accept(stream).await {
                Ok(s) => s,
                Err(err) => {
                    tracing::warn!(peer = %peer, "TLS handshake failed: {}", err);
                    return;
                }
            };
            let service = hyper::service::service_fn(move |req| handle(server.clone(), req));
            if let Err(err) = hyper::server::conn::http1::Builder::new()
                .serve_connection(hyper_util::rt::TokioIo::new(stream), service)
                .await
            {
                let err = WriteError::from(err);
                tracing::error!(peer = %peer, "{}", err);
            }
        });
    }

    tracing::info!("webhook server stopped");
    Ok(())
}
