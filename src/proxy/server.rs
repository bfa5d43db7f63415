use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use actix_web::web::{self, Data};
use actix_web::{App, HttpServer};
use anyhow::{Context, Result};
use log::{error, info, warn};
use openssl::ssl::SslAcceptorBuilder;
use sd_notify::NotifyState;

use super::handler::ProxyHandler;
use super::store::{short_revision, ReloadSignal, RouteStore};

/// The ingress side of the proxy.
///
/// The server owns exactly one listening socket for its whole life. Route
/// reloads never touch it: the reload task swaps the route table the shared
/// [`ProxyHandler`] dispatches with, connections already being served keep
/// running and new requests see the new routes.
pub struct ProxyServer {
    listener: TcpListener,
    ssl: Option<SslAcceptorBuilder>,

    handler: Data<ProxyHandler>,
    store: Arc<RouteStore>,
    reload: Arc<ReloadSignal>,

    keep_alive_secs: Option<u64>,
    workers: Option<u64>,
    shutdown_timeout_secs: Option<u64>,
}

impl ProxyServer {
    pub fn bind(
        addr: SocketAddr,
        handler: Data<ProxyHandler>,
        store: Arc<RouteStore>,
        reload: Arc<ReloadSignal>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).with_context(|| format!("bind '{addr}'"))?;
        listener
            .set_nonblocking(true)
            .context("set listener nonblocking")?;

        Ok(Self {
            listener,
            ssl: None,
            handler,
            store,
            reload,
            keep_alive_secs: None,
            workers: None,
            shutdown_timeout_secs: None,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("get listener address")
    }

    pub fn set_ssl(&mut self, ssl: SslAcceptorBuilder) {
        self.ssl = Some(ssl);
    }

    pub fn set_keep_alive_secs(&mut self, keep_alive_secs: u64) {
        self.keep_alive_secs = Some(keep_alive_secs);
    }

    pub fn set_workers(&mut self, workers: u64) {
        self.workers = Some(workers);
    }

    pub fn set_shutdown_timeout_secs(&mut self, secs: u64) {
        self.shutdown_timeout_secs = Some(secs);
    }

    /// Serve until the server is stopped (SIGINT/SIGTERM). In-flight
    /// requests are drained for up to the shutdown timeout.
    pub async fn run(self) -> Result<()> {
        let addr = self.local_addr()?;

        let handler = self.handler.clone();
        // A client closing its side aborts the request, and with it the
        // upstream call.
        let mut srv = HttpServer::new(move || {
            App::new()
                .app_data(handler.clone())
                .default_service(web::route().to(ProxyHandler::handle))
        })
        .h1_allow_half_closed(false);

        if let Some(keep_alive) = self.keep_alive_secs {
            srv = srv.keep_alive(Duration::from_secs(keep_alive));
        }
        if let Some(workers) = self.workers {
            srv = srv.workers(workers as usize);
        }
        if let Some(secs) = self.shutdown_timeout_secs {
            srv = srv.shutdown_timeout(secs);
        }

        srv = match self.ssl {
            Some(ssl) => {
                info!("Listening on https://{addr}");
                srv.listen_openssl(self.listener, ssl)
                    .context("listen with ssl")?
            }
            None => {
                warn!("Using HTTP (without SSL). THIS IS DANGEROUS, DO NOT USE IN PRODUCTION");
                info!("Listening on http://{addr}");
                srv.listen(self.listener).context("listen without ssl")?
            }
        };

        let reloader = tokio::spawn(Self::reload_routes(
            self.reload.clone(),
            self.store.clone(),
            self.handler.clone(),
        ));

        if let Err(err) = sd_notify::notify(true, &[NotifyState::Ready]) {
            error!("Notify systemd error: {err:#}");
        }
        info!("Starting proxy server");
        let result = srv.run().await.context("run proxy server");
        reloader.abort();
        result?;

        info!("Proxy server stopped");
        Ok(())
    }

    /// Install every newly published route table into the handler.
    async fn reload_routes(
        reload: Arc<ReloadSignal>,
        store: Arc<RouteStore>,
        handler: Data<ProxyHandler>,
    ) {
        loop {
            reload.recv().await;
            let routes = store.current();
            info!(
                "Reload proxy handler with route table {} ({} routes)",
                short_revision(routes.revision()),
                routes.len()
            );
            handler.install(routes);
        }
    }
}
