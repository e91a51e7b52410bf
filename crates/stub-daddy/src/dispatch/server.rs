//! The dispatch front end: one listener serving both planes.

use super::handler::{handle_request, DispatchContext};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

pub struct DispatchServer {
    listener: TcpListener,
    ctx: Arc<DispatchContext>,
}

impl DispatchServer {
    /// Bind the listener. Passing port 0 picks an ephemeral port; use
    /// [`DispatchServer::local_addr`] to discover it (tests rely on this).
    pub async fn bind(addr: SocketAddr, ctx: Arc<DispatchContext>) -> Result<Self, anyhow::Error> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, ctx })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, anyhow::Error> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever, one task per connection. Requests on the
    /// same connection are served in order by HTTP/1.1; unrelated requests
    /// arrive on their own connections and never serialize behind each other.
    pub async fn run(self) -> Result<(), anyhow::Error> {
        info!(
            "stub-daddy listening on http://{}",
            self.listener.local_addr()?
        );

        loop {
            let (stream, _) = self.listener.accept().await?;
            let io = TokioIo::new(stream);
            let ctx = Arc::clone(&self.ctx);

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let ctx = Arc::clone(&ctx);
                    async move { handle_request(req, ctx).await }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("connection error: {}", e);
                }
            });
        }
    }
}
