pub mod api;
pub mod websocket;

use crate::cli::Args;
use crate::room::RoomRegistry;
use std::error::Error;
use std::sync::Arc;

pub struct Server {
    registry: Arc<RoomRegistry>,
    args: Args,
}

impl Server {
    pub fn new(registry: Arc<RoomRegistry>, args: Args) -> Self {
        Self { registry, args }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if let Some(http_port) = self.args.http_port {
            api::start_http_server(http_port, self.registry.clone(), self.args.clone()).await?;
        }

        websocket::start_ws_server(
            &self.args.server_addr,
            self.registry.clone(),
            self.args.clone(),
        ).await
    }
}
