//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every endpoint in a pool over plain HTTP
//! - Feed the results into the same state machine passive checks use

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use http::Request;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::sync::broadcast;
use tokio::time;

use crate::load_balancer::{Endpoint, EndpointPool};

#[derive(Debug, Clone)]
pub struct HealthCheckSettings {
    pub interval: Duration,
    pub timeout: Duration,
    /// Probed with `GET`; any 2xx counts as a success.
    pub path: String,
}

impl Default for HealthCheckSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(2),
            path: "/ping".to_owned(),
        }
    }
}

pub struct HealthMonitor {
    pool: Arc<EndpointPool>,
    settings: HealthCheckSettings,
    client: Client<HttpConnector, Body>,
}

impl HealthMonitor {
    pub fn new(pool: Arc<EndpointPool>, settings: HealthCheckSettings) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            pool,
            settings,
            client,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            service = %self.pool.service(),
            interval = ?self.settings.interval,
            path = %self.settings.path,
            "Health monitor starting"
        );

        let mut ticker = time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.check_all().await,
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    pub async fn check_all(&self) {
        let endpoints = self.pool.endpoints();
        let probes = endpoints.iter().map(|endpoint| self.check(endpoint));
        futures_util::future::join_all(probes).await;
    }

    async fn check(&self, endpoint: &Endpoint) {
        if self.probe(endpoint.address()).await {
            endpoint.mark_success();
        } else {
            endpoint.mark_failure();
        }
    }

    async fn probe(&self, address: &str) -> bool {
        let authority = address
            .split_once("://")
            .map_or(address, |(_, rest)| rest)
            .trim_end_matches('/');
        let uri = format!("http://{authority}{}", self.settings.path);

        let request = match Request::get(uri)
            .header(http::header::USER_AGENT, "tag-mesh-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(address = %address, error = %e, "Failed to build health check request");
                return false;
            }
        };

        match time::timeout(self.settings.timeout, self.client.request(request)).await {
            Ok(Ok(response)) if response.status().is_success() => true,
            Ok(Ok(response)) => {
                tracing::warn!(address = %address, status = %response.status(), "Health check failed: non-success status");
                false
            }
            Ok(Err(e)) => {
                tracing::warn!(address = %address, error = %e, "Health check failed: connection error");
                false
            }
            Err(_) => {
                tracing::warn!(address = %address, "Health check failed: timeout");
                false
            }
        }
    }
}
