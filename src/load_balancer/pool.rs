//! Endpoint pool for one logical service.
//!
//! # Responsibilities
//! - Mirror the resolved address set as a list of `Endpoint`s
//! - Reuse endpoints (and their channels and health) across refreshes
//! - Pick an endpoint per call attempt through the balancer

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use tonic::Status;

use crate::load_balancer::{Endpoint, EndpointSettings, LoadBalancer, RoundRobin};
use crate::registry::ResolverWatch;
use crate::rpc::client::ClientError;

/// Where a pool's addresses come from.
#[derive(Debug)]
pub enum EndpointSource {
    /// Fixed addresses, e.g. from `--target`.
    Static(Vec<String>),
    /// Addresses kept current by a resolver subscription.
    Discovered(ResolverWatch),
}

#[derive(Debug)]
pub struct EndpointPool {
    service: String,
    source: EndpointSource,
    settings: EndpointSettings,
    balancer: Box<dyn LoadBalancer>,
    endpoints: ArcSwap<Vec<Arc<Endpoint>>>,
    by_address: DashMap<String, Arc<Endpoint>>,
    applied_version: AtomicU64,
    refresh_lock: Mutex<()>,
}

impl EndpointPool {
    /// Pool over fixed addresses. Fails on the first address that is not a valid URI authority.
    pub fn from_static(
        service: impl Into<String>,
        addresses: Vec<String>,
        settings: EndpointSettings,
    ) -> Result<Self, ClientError> {
        let pool = Self::with_source(service.into(), EndpointSource::Static(addresses.clone()), settings);
        let mut endpoints = Vec::with_capacity(addresses.len());
        for address in addresses {
            let endpoint = Arc::new(Endpoint::connect_lazy(&address, &pool.settings)?);
            pool.by_address.insert(address, Arc::clone(&endpoint));
            endpoints.push(endpoint);
        }
        pool.endpoints.store(Arc::new(endpoints));
        Ok(pool)
    }

    pub fn discovered(service: impl Into<String>, watch: ResolverWatch, settings: EndpointSettings) -> Self {
        let pool = Self::with_source(service.into(), EndpointSource::Discovered(watch), settings);
        pool.refresh();
        pool
    }

    fn with_source(service: String, source: EndpointSource, settings: EndpointSettings) -> Self {
        Self {
            service,
            source,
            settings,
            balancer: Box::new(RoundRobin::new()),
            endpoints: ArcSwap::from_pointee(Vec::new()),
            by_address: DashMap::new(),
            applied_version: AtomicU64::new(0),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Current endpoints, after catching up with the resolver.
    pub fn endpoints(&self) -> Arc<Vec<Arc<Endpoint>>> {
        self.refresh();
        self.endpoints.load_full()
    }

    /// Choose the endpoint for one call attempt.
    pub fn pick(&self) -> Result<Arc<Endpoint>, Status> {
        let endpoints = self.endpoints();
        if endpoints.is_empty() {
            return Err(Status::unavailable(format!(
                "no endpoints resolved for {}",
                self.service
            )));
        }
        self.balancer.pick(&endpoints).ok_or_else(|| {
            tracing::debug!(service = %self.service, endpoints = endpoints.len(), "All endpoints unhealthy");
            Status::unavailable(format!("no healthy endpoints for {}", self.service))
        })
    }

    fn refresh(&self) {
        let EndpointSource::Discovered(watch) = &self.source else {
            return;
        };
        let set = watch.current();
        if self.applied_version.load(Ordering::Acquire) == set.version {
            return;
        }

        let _guard = self.refresh_lock.lock().unwrap_or_else(|p| p.into_inner());
        if self.applied_version.load(Ordering::Acquire) == set.version {
            return;
        }
        self.apply(&set.addresses);
        self.applied_version.store(set.version, Ordering::Release);
        tracing::debug!(service = %self.service, version = set.version, endpoints = set.addresses.len(), "Endpoint pool refreshed");
    }

    fn apply(&self, addresses: &[String]) {
        let mut next = Vec::with_capacity(addresses.len());
        for address in addresses {
            if let Some(existing) = self.by_address.get(address) {
                next.push(Arc::clone(existing.value()));
                continue;
            }
            match Endpoint::connect_lazy(address, &self.settings) {
                Ok(endpoint) => {
                    let endpoint = Arc::new(endpoint);
                    self.by_address.insert(address.clone(), Arc::clone(&endpoint));
                    next.push(endpoint);
                }
                Err(e) => tracing::warn!(service = %self.service, address = %address, error = %e, "Skipping endpoint"),
            }
        }
        self.by_address.retain(|address, _| addresses.contains(address));
        self.endpoints.store(Arc::new(next));
    }
}
