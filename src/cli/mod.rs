use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Server Args ---
    /// Host address and port for the WebSocket server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:1999")]
    pub server_addr: String,

    /// Optional port for the HTTP API (health, room list, room history).
    #[arg(long, env = "HTTP_PORT")]
    pub http_port: Option<u16>,

    /// Largest text frame accepted from a client, in bytes. File attachments travel
    /// base64-encoded inside a single frame.
    #[arg(long, env = "MAX_MESSAGE_SIZE", default_value = "8388608")]
    pub max_message_size: usize,

    /// New connections accepted per second across all rooms.
    #[arg(long, env = "CONNECTION_RATE_LIMIT", default_value = "10")]
    pub connection_rate_limit: u32,

    // --- Store Args ---
    /// Room history store type (sqlite, memory)
    #[arg(long, env = "STORE_TYPE", default_value = "sqlite")]
    pub store_type: String,

    /// Directory holding one SQLite database per room.
    #[arg(long, env = "DATA_DIR", default_value = "data")]
    pub data_dir: String,

    // --- General App Args ---
    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,

    /// Optional path to the TLS certificate file (PEM format) for enabling WSS. Requires --tls-key.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format) for enabling WSS. Requires --tls-cert.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,
}
