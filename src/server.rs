//! TLS front door (C9): certificate loading, the listener, and the
//! accept loop that spawns one session task per connection.

use std::fs::File;
use std::io::BufReader as StdBufReader;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use crate::error::StartupError;
use crate::state::AppState;

fn load_certs(path: &std::path::Path) -> Result<Vec<CertificateDer<'static>>, StartupError> {
    let file = File::open(path).map_err(|source| StartupError::CertRead {
        path: path.display().to_string(),
        source,
    })?;
    let certs = rustls_pemfile::certs(&mut StdBufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| StartupError::CertRead { path: path.display().to_string(), source })?;

    if certs.is_empty() {
        return Err(StartupError::CertEmpty { path: path.display().to_string() });
    }

    Ok(certs)
}

fn load_key(path: &std::path::Path) -> Result<PrivateKeyDer<'static>, StartupError> {
    let file = File::open(path).map_err(|source| StartupError::KeyRead {
        path: path.display().to_string(),
        source,
    })?;
    let key = rustls_pemfile::private_key(&mut StdBufReader::new(file))
        .map_err(|source| StartupError::KeyRead { path: path.display().to_string(), source })?;

    key.ok_or_else(|| StartupError::KeyEmpty { path: path.display().to_string() })
}

fn build_tls_acceptor(state: &AppState) -> Result<TlsAcceptor, StartupError> {
    let certs = load_certs(&state.config.cert_file)?;
    let key = load_key(&state.config.key_file)?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(StartupError::TlsConfig)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Binds the listener and accepts connections until the process is
/// asked to shut down. Each accepted socket is TLS-wrapped and handed
/// to [`crate::session::handle_connection`] on its own task; a
/// handshake failure or a connection over `max_connections` only logs
/// and drops that one socket.
pub async fn run(state: Arc<AppState>, shutdown: impl std::future::Future<Output = ()>) -> Result<(), StartupError> {
    let acceptor = build_tls_acceptor(&state)?;
    let listener = TcpListener::bind(("0.0.0.0", state.config.port)).await.map_err(|source| {
        StartupError::Bind { port: state.config.port, source }
    })?;

    tracing::info!(port = state.config.port, "listening");

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                tracing::info!("shutting down");
                return Ok(());
            }

            accepted = listener.accept() => {
                let (socket, remote_addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };

                let current = state.shared.lock().unwrap().clients.count();
                if current >= state.config.max_connections {
                    tracing::warn!(%remote_addr, current, "rejecting connection, at capacity");
                    continue;
                }

                let acceptor = acceptor.clone();
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    match acceptor.accept(socket).await {
                        Ok(tls_stream) => {
                            crate::session::handle_connection(tls_stream, remote_addr, state).await;
                        }
                        Err(e) => {
                            tracing::warn!(%remote_addr, error = %e, "TLS handshake failed");
                        }
                    }
                });
            }
        }
    }
}
