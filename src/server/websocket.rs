use crate::cli::Args;
use crate::room::{ PeerId, RoomHandle, RoomId, RoomRegistry };

use std::error::Error;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::io::{ AsyncRead, AsyncWrite };
use tokio::sync::mpsc;

use tokio_tungstenite::{ accept_hdr_async_with_config, WebSocketStream };
use tokio_tungstenite::tungstenite::handshake::server::{ Request, Response, ErrorResponse };
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::{ Message, WebSocketConfig };
use tokio_rustls::TlsAcceptor;

use rustls::ServerConfig;
use rustls::pki_types::{ CertificateDer, PrivateKeyDer };
use rustls_pemfile::{ certs, pkcs8_private_keys };

use governor::{ DefaultDirectRateLimiter, Quota, RateLimiter };

use log::{ debug, info, warn, error };
use futures::{ SinkExt, StreamExt };

#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub max_message_size: usize,
    pub connection_rate_limit: u32,
}

impl From<&Args> for ConnectionSettings {
    fn from(args: &Args) -> Self {
        Self {
            max_message_size: args.max_message_size,
            connection_rate_limit: args.connection_rate_limit,
        }
    }
}

impl ConnectionSettings {
    /// tungstenite enforces the limit while reading, before an oversized
    /// frame is buffered in full.
    fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            max_message_size: Some(self.max_message_size),
            max_frame_size: Some(self.max_message_size),
            ..Default::default()
        }
    }
}

fn load_tls_config(
    cert_path: &str,
    key_path: &str
) -> Result<Arc<ServerConfig>, Box<dyn Error + Send + Sync>> {
    let cert_file = File::open(cert_path).map_err(|e|
        format!("Failed to open TLS certificate file '{}': {}", cert_path, e)
    )?;
    let key_file = File::open(key_path).map_err(|e|
        format!("Failed to open TLS key file '{}': {}", key_path, e)
    )?;

    let mut cert_reader = BufReader::new(cert_file);
    let mut key_reader = BufReader::new(key_file);
    let cert_chain: Vec<CertificateDer<'static>> = certs(&mut cert_reader)
        .collect::<Result<_, _>>()
        .map_err(|e| format!("Failed to read certificate(s): {}", e))?;

    let key = match pkcs8_private_keys(&mut key_reader).next() {
        Some(Ok(k)) => PrivateKeyDer::Pkcs8(k),
        Some(Err(e)) => {
            return Err(format!("Error reading private key: {}", e).into());
        }
        None => {
            return Err("No PKCS8 private key found in key file".into());
        }
    };

    let config = ServerConfig::builder().with_no_client_auth().with_single_cert(cert_chain, key)?;
    Ok(Arc::new(config))
}

fn tls_acceptor(args: &Args) -> Result<Option<TlsAcceptor>, Box<dyn Error + Send + Sync>> {
    if !args.enable_tls {
        info!("TLS not enabled. Running plain WebSocket (WS) server.");
        return Ok(None);
    }
    match (&args.tls_cert_path, &args.tls_key_path) {
        (Some(cert_path), Some(key_path)) => {
            info!(
                "TLS enabled. Loading certificate from '{}' and key from '{}'",
                cert_path,
                key_path
            );
            let config = load_tls_config(cert_path, key_path)?;
            Ok(Some(TlsAcceptor::from(config)))
        }
        (Some(_), None) | (None, Some(_)) => {
            error!("Both --tls-cert-path and --tls-key-path must be provided to enable TLS.");
            Err("Missing TLS certificate or key path".into())
        }
        (None, None) => {
            error!("--enable-tls was set but no certificate/key paths provided.");
            Err("TLS enabled without cert/key".into())
        }
    }
}

pub async fn start_ws_server(
    addr: &str,
    registry: Arc<RoomRegistry>,
    args: Args,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let tls = tls_acceptor(&args)?;
    let listener = TcpListener::bind(addr).await?;
    let protocol = if tls.is_some() { "wss" } else { "ws" };
    info!("{} server listening on: {}", protocol.to_uppercase(), addr);

    serve(listener, registry, tls, ConnectionSettings::from(&args)).await
}

/// Accepts connections until the listener fails.
pub async fn serve(
    listener: TcpListener,
    registry: Arc<RoomRegistry>,
    tls: Option<TlsAcceptor>,
    settings: ConnectionSettings,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let rate = NonZeroU32::new(settings.connection_rate_limit).unwrap_or(NonZeroU32::MIN);
    let limiter: DefaultDirectRateLimiter = RateLimiter::direct(Quota::per_second(rate));

    loop {
        let (stream, peer) = listener.accept().await?;

        if limiter.check().is_err() {
            warn!("Global connection rate limit exceeded for {}. Dropping connection.", peer);
            continue;
        }

        info!("Incoming connection from: {}", peer);
        let registry = Arc::clone(&registry);
        let tls = tls.clone();

        tokio::spawn(async move {
            let process_result = if let Some(acceptor) = tls {
                match acceptor.accept(stream).await {
                    Ok(tls_stream) => {
                        info!("TLS handshake successful for {}", peer);
                        process_connection(peer, tls_stream, registry, settings).await
                    }
                    Err(e) => {
                        error!("TLS handshake error for {}: {}", peer, e);
                        Err(Box::new(e) as Box<dyn Error + Send + Sync>)
                    }
                }
            } else {
                process_connection(peer, stream, registry, settings).await
            };

            if let Err(e) = process_result {
                error!("Failed to process connection for {}: {}", peer, e);
            }
        });
    }
}

async fn process_connection<S>(
    peer: SocketAddr,
    stream: S,
    registry: Arc<RoomRegistry>,
    settings: ConnectionSettings,
) -> Result<(), Box<dyn Error + Send + Sync>>
    where S: AsyncRead + AsyncWrite + Unpin + Send + 'static
{
    let mut requested: Option<RoomId> = None;
    let room_callback = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        match RoomId::from_request(req.uri().path(), req.uri().query()) {
            Ok(room) => {
                requested = room;
                Ok(response)
            }
            Err(e) => {
                warn!("{} asked for an invalid room '{}': {}", peer, req.uri().path(), e);
                let mut res = ErrorResponse::new(Some(format!("invalid room: {}", e)));
                *res.status_mut() = StatusCode::BAD_REQUEST;
                Err(res)
            }
        }
    };

    let accepted = accept_hdr_async_with_config(
        stream,
        room_callback,
        Some(settings.websocket_config())
    ).await;
    let ws = match accepted {
        Ok(ws) => ws,
        Err(e) => {
            error!("Handshake failed for {}: {}", peer, e);
            return Err(Box::new(e) as _);
        }
    };

    let room = requested.unwrap_or_else(|| {
        let room = RoomId::generate();
        info!("{} did not name a room, assigned {}", peer, room);
        room
    });
    let handle = registry.join(&room).await?;
    handle_connection(peer, ws, handle).await;
    Ok(())
}

/// Pumps one socket: text frames go to the room as raw events, and whatever
/// the room queues for this peer is written back out.
pub async fn handle_connection<S>(
    peer: SocketAddr,
    websocket: WebSocketStream<S>,
    room: RoomHandle,
)
    where S: AsyncRead + AsyncWrite + Unpin + Send + 'static
{
    let peer_id = PeerId::new_v4();
    info!("New WebSocket connection: {} as peer {} in room {}", peer, peer_id, room.room());

    let (mut tx, mut rx) = websocket.split();
    let (outbound, mut queued) = mpsc::unbounded_channel::<String>();
    if let Err(e) = room.connect(peer_id, outbound) {
        error!("Could not attach {} to room: {}", peer, e);
        return;
    }

    // Ends once the room drops this peer's sender.
    let writer = tokio::spawn(async move {
        while let Some(text) = queued.recv().await {
            if let Err(e) = tx.send(Message::Text(text)).await {
                debug!("Error sending to {}: {}", peer, e);
                break;
            }
        }
        let _ = tx.close().await;
    });

    while let Some(msg) = rx.next().await {
        match msg {
            Ok(message) => {
                match message {
                    Message::Text(text) => {
                        if let Err(e) = room.receive(peer_id, text) {
                            error!("Dropping event from {}: {}", peer, e);
                            break;
                        }
                    }
                    Message::Close(_) => {
                        info!("Received close frame from {}", peer);
                        break;
                    }
                    Message::Binary(_) => {
                        warn!("Ignoring binary message from {}", peer);
                    }
                    // tungstenite answers pings itself
                    Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                }
            }
            Err(e) => {
                match e {
                    | tokio_tungstenite::tungstenite::Error::ConnectionClosed
                    | tokio_tungstenite::tungstenite::Error::Protocol(_)
                    | tokio_tungstenite::tungstenite::Error::Utf8 => {
                        info!("WebSocket connection closed or protocol error for {}: {}", peer, e);
                    }
                    tokio_tungstenite::tungstenite::Error::Io(ref io_err) if
                        io_err.kind() == std::io::ErrorKind::ConnectionReset
                    => {
                        info!("WebSocket connection reset by peer {}", peer);
                    }
                    tokio_tungstenite::tungstenite::Error::Capacity(ref cap_err) => {
                        warn!("Message from {} exceeds size limit, closing: {}", peer, cap_err);
                    }
                    _ => {
                        error!("Error receiving message from {}: {}", peer, e);
                    }
                }
                break;
            }
        }
    }

    if room.disconnect(peer_id).is_err() {
        writer.abort();
    }
    let _ = writer.await;
    info!("WebSocket connection closed for {} (room {})", peer, room.room());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_limit_applies_to_messages_and_frames() {
        let settings = ConnectionSettings {
            max_message_size: 4096,
            connection_rate_limit: 10,
        };
        let config = settings.websocket_config();
        assert_eq!(config.max_message_size, Some(4096));
        assert_eq!(config.max_frame_size, Some(4096));
    }
}
