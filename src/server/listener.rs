use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::config::Config;
use crate::http::connection::Connection;
use crate::proxy::Proxy;

/// Bind the configured address and serve until the accept loop fails.
pub async fn run(cfg: &Config, proxy: Arc<Proxy>) -> anyhow::Result<()> {
    let addr = cfg.server.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    serve(listener, proxy).await
}

/// Accept connections on an already bound listener, one task per connection.
pub async fn serve(listener: TcpListener, proxy: Arc<Proxy>) -> anyhow::Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        tracing::debug!("Accepted connection from {}", peer);

        let proxy = Arc::clone(&proxy);
        tokio::spawn(async move {
            let mut conn = Connection::new(socket, peer.to_string(), proxy);
            if let Err(e) = conn.run().await {
                tracing::error!("Connection error from {}: {}", peer, e);
            }
        });
    }
}
