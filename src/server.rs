use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use hyper::header::CONTENT_TYPE;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response};
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::config::SharedConfig;
use crate::proxy::ProxyHandler;
use crate::storage::Repository;

/// Minimal page served on UI hosts when no console is deployed. The full
/// admin console is an external collaborator behind the same host predicate.
const STATUS_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>PrismCat</title></head>
<body>
<h1>PrismCat</h1>
<p>The proxy is running. Point an SDK base URL at
<code>http://&lt;upstream&gt;.&lt;proxy-domain&gt;:&lt;port&gt;</code> to capture traffic.</p>
</body>
</html>
"#;

/// HTTP listener that dispatches UI hosts to the console surface and
/// everything else to the forwarder.
pub struct Server {
    config: SharedConfig,
    handler: ProxyHandler,
}

impl Server {
    pub fn new(config: SharedConfig, repo: Arc<dyn Repository>) -> Self {
        let handler = ProxyHandler::new(config.clone(), repo);
        Self { config, handler }
    }

    /// Run until `shutdown` resolves. Stops accepting, gives in-flight
    /// requests the configured grace period, then force-closes; record
    /// finalizers are also drained within the same budget.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let server_cfg = self.config.server_snapshot();
        let addr: SocketAddr = format!("{}:{}", server_cfg.bind, server_cfg.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid listen address: {}", e))?;

        let config = self.config.clone();
        let handler = self.handler.clone();
        let make_service = make_service_fn(move |_conn| {
            let config = config.clone();
            let handler = handler.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                    let config = config.clone();
                    let handler = handler.clone();
                    async move {
                        let host = req
                            .headers()
                            .get(hyper::header::HOST)
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or_default();
                        // Console traffic never reaches the forwarder.
                        if config.is_ui_host(host) {
                            return Ok::<_, Infallible>(status_page());
                        }
                        handler.handle(req).await
                    }
                }))
            }
        });

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = hyper::Server::try_bind(&addr)?
            .serve(make_service)
            .with_graceful_shutdown(async {
                stop_rx.await.ok();
            });

        info!("proxy listening on {}", addr);
        let mut server = tokio::spawn(server);

        tokio::select! {
            result = &mut server => {
                // The listener ended on its own (bind/accept error).
                result??;
                return Ok(());
            }
            _ = shutdown => {
                let _ = stop_tx.send(());
            }
        }

        let grace = Duration::from_secs(server_cfg.shutdown_timeout_secs.max(1));
        match tokio::time::timeout(grace, &mut server).await {
            Ok(result) => {
                if let Err(err) = result? {
                    error!("server shutdown error: {}", err);
                }
            }
            Err(_) => {
                warn!("graceful shutdown timed out; forcing close");
                server.abort();
            }
        }

        // Record finalizers may outlive their responses briefly; wait so the
        // async stage is not closed under them.
        let deadline = tokio::time::Instant::now() + grace;
        while self.handler.active_requests() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let still_active = self.handler.active_requests();
        if still_active > 0 {
            warn!("shutdown: {} request(s) still active after timeout", still_active);
        }

        Ok(())
    }
}

fn status_page() -> Response<Body> {
    Response::builder()
        .header(CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Body::from(STATUS_PAGE))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
