pub mod cli;
pub mod models;
pub mod room;
pub mod server;
pub mod store;

use cli::Args;
use log::info;
use room::RoomRegistry;
use server::Server;
use std::error::Error;
use std::sync::Arc;
use store::StoreBackend;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("HTTP API Port: {}", args.http_port.map_or("disabled".to_string(), |p| p.to_string()));
    info!("Store Type: {}", args.store_type);
    info!("Data Directory: {}", args.data_dir);
    info!("Max Message Size: {} bytes", args.max_message_size);
    info!("Connection Rate Limit: {}/s", args.connection_rate_limit);
    info!("TLS Enabled: {}", args.enable_tls);
    info!("-------------------------");

    let backend = StoreBackend::from_args(&args)?;
    let registry = Arc::new(RoomRegistry::new(backend));
    let server = Server::new(registry, args);
    server.run().await?;

    Ok(())
}
