use std::sync::Arc;

use actix_web::web::Data;
use anyhow::{Context, Result};
use log::info;
use openssl::ssl::SslAcceptorBuilder;

use crate::api::client::ApiClient;
use crate::config::ProxyConfig;

use super::handler::ProxyHandler;
use super::reconcile::Reconciler;
use super::server::ProxyServer;
use super::store::{ReloadSignal, RouteStore};
use super::tls::TlsSettings;

/// Wires the proxy components together from the configuration.
pub struct ProxyFactory {
    cfg: ProxyConfig,
    acceptor: Option<SslAcceptorBuilder>,
}

impl ProxyFactory {
    pub fn new(cfg: ProxyConfig) -> Self {
        Self {
            cfg,
            acceptor: None,
        }
    }

    /// Serve https with this acceptor instead of loading `cert_file` and
    /// `key_file` from disk.
    pub fn set_acceptor(&mut self, acceptor: SslAcceptorBuilder) {
        self.acceptor = Some(acceptor);
    }

    /// Build the server and its reconciler. The first reconciliation runs
    /// here, so the server starts with a populated route table; if it fails
    /// nothing is served.
    pub async fn build(self) -> Result<(ProxyServer, Reconciler)> {
        let api = Arc::new(self.build_api_client()?);
        let store = Arc::new(RouteStore::new());
        let reload = Arc::new(ReloadSignal::new());

        let reconciler = Reconciler::new(
            api.clone(),
            store.clone(),
            reload.clone(),
            self.cfg.refresh_duration(),
        );
        reconciler
            .reconcile()
            .await
            .context("initial reconcile of proxy resources")?;
        // The handler below starts on the current table already.
        reload.take();

        let routes = store.current();
        info!("Loaded {} proxy routes", routes.len());

        let upstream = self.build_upstream_client()?;
        let handler = ProxyHandler::new(routes, api, upstream, &self.cfg.identity_header);

        let addr = self.cfg.bind_address()?;
        let mut srv = ProxyServer::bind(addr, Data::new(handler), store, reload)?;
        if self.cfg.keep_alive_secs > 0 {
            srv.set_keep_alive_secs(self.cfg.keep_alive_secs);
        }
        if self.cfg.workers > 0 {
            srv.set_workers(self.cfg.workers);
        }
        srv.set_shutdown_timeout_secs(self.cfg.shutdown_timeout_secs);

        let tls_enabled = self.cfg.tls_enabled() || self.acceptor.is_some();
        if tls_enabled {
            let tls = match self.acceptor {
                Some(acceptor) => TlsSettings::with_acceptor(acceptor, &self.cfg.alpn),
                None => TlsSettings::new(&self.cfg.cert_file, &self.cfg.key_file, &self.cfg.alpn),
            };
            info!("Serving https with alpn {:?}", tls.next_protos());
            srv.set_ssl(tls.build().context("init ssl")?);
        }

        Ok((srv, reconciler))
    }

    fn build_api_client(&self) -> Result<ApiClient> {
        ApiClient::new(
            &self.cfg.api,
            &self.cfg.identity_header,
            self.cfg.request_timeout_duration(),
        )
        .context("init api client")
    }

    /// Client used to reach upstreams. Redirects are passed back to the
    /// caller untouched.
    fn build_upstream_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.cfg.request_timeout_duration())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("init upstream client")
    }
}
