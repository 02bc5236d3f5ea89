//! A single remote endpoint.
//!
//! # Responsibilities
//! - Own the lazily-connected channel to one `host:port`
//! - Carry the endpoint's health tracker
//! - Perform one unary wire call with the context's metadata and deadline

use std::time::Duration;

use http::uri::PathAndQuery;
use tonic::transport::Channel;
use tonic::Status;

use crate::health::passive::is_transport_failure;
use crate::health::state::{HealthState, HealthTracker, Thresholds};
use crate::observability::metrics;
use crate::rpc::client::ClientError;
use crate::rpc::context::{format_grpc_timeout, GRPC_TIMEOUT};
use crate::rpc::CallContext;

/// Connection and health settings shared by every endpoint of a pool.
#[derive(Debug, Clone)]
pub struct EndpointSettings {
    pub connect_timeout: Duration,
    pub thresholds: Thresholds,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(1),
            thresholds: Thresholds::default(),
        }
    }
}

#[derive(Debug)]
pub struct Endpoint {
    address: String,
    channel: Channel,
    health: HealthTracker,
}

impl Endpoint {
    /// Prepare a channel to `address`. No connection is made until the first call.
    pub fn connect_lazy(address: &str, settings: &EndpointSettings) -> Result<Self, ClientError> {
        let uri = if address.contains("://") {
            address.to_owned()
        } else {
            format!("http://{address}")
        };
        let channel = tonic::transport::Endpoint::from_shared(uri)
            .map_err(|source| ClientError::InvalidAddress {
                address: address.to_owned(),
                source,
            })?
            .connect_timeout(settings.connect_timeout)
            .connect_lazy();

        Ok(Self {
            address: address.to_owned(),
            channel,
            health: HealthTracker::new(settings.thresholds),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    pub fn is_available(&self) -> bool {
        self.health.is_available()
    }

    pub fn mark_success(&self) {
        if let Some(state) = self.health.record_success() {
            self.log_transition(state);
        }
    }

    pub fn mark_failure(&self) {
        if let Some(state) = self.health.record_failure() {
            self.log_transition(state);
        }
    }

    fn log_transition(&self, state: HealthState) {
        match state {
            HealthState::Unhealthy => {
                tracing::warn!(address = %self.address, "Endpoint marked unhealthy")
            }
            _ => tracing::info!(address = %self.address, state = ?state, "Endpoint health changed"),
        }
        metrics::record_endpoint_health(&self.address, self.is_available());
    }

    /// One unary call. The remaining deadline travels as `grpc-timeout`.
    pub async fn unary<Req, Res>(
        &self,
        mut ctx: CallContext,
        path: &'static str,
        req: Req,
    ) -> Result<Res, Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Res: prost::Message + Default + Send + Sync + 'static,
    {
        if let Some(remaining) = ctx.remaining() {
            if remaining.is_zero() {
                return Err(Status::deadline_exceeded("deadline exceeded"));
            }
            ctx.insert_metadata(GRPC_TIMEOUT, &format_grpc_timeout(remaining));
        }

        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        if let Err(e) = grpc.ready().await {
            self.mark_failure();
            return Err(Status::unavailable(format!(
                "endpoint {} not ready: {e}",
                self.address
            )));
        }

        let mut request = tonic::Request::new(req);
        *request.metadata_mut() = ctx.metadata().clone();

        let codec = tonic_prost::ProstCodec::<Req, Res>::default();
        let result = grpc
            .unary(request, PathAndQuery::from_static(path), codec)
            .await
            .map(tonic::Response::into_inner);

        match &result {
            Err(status) if is_transport_failure(status) => {
                tracing::debug!(address = %self.address, error = %status.message(), "Transport failure");
                self.mark_failure();
            }
            _ => self.mark_success(),
        }
        result
    }
}
