//! Wires discovery, reconciliation and the registry into one service.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uascout_core::{AppConfig, ApplicationInfoModel, ApplicationRegistrationModel, EndpointInfoModel};
use uascout_discovery::{
    DiscovererIdentity, DiscoveryProgress, DiscoveryServices, DiscoveryServicesConfig,
    EndpointDiscovery, LoggingProgress,
};
use uascout_net::NetworkInfo;
use uascout_registry::{DiscoveryReconciler, InMemoryRepository};

use crate::catalog::CatalogEndpointDiscovery;
use crate::forwarder::ResultForwarder;

/// Builder for [`App`]
pub struct AppBuilder {
    config: AppConfig,
    network: Option<Arc<dyn NetworkInfo>>,
    endpoints: Option<Arc<dyn EndpointDiscovery>>,
    progress: Arc<dyn DiscoveryProgress>,
}

impl AppBuilder {
    /// Overrides the system network, mostly for tests
    pub fn network(mut self, network: Arc<dyn NetworkInfo>) -> Self {
        self.network = Some(network);
        self
    }

    /// Overrides the catalog backed endpoint discovery
    pub fn endpoint_discovery(mut self, endpoints: Arc<dyn EndpointDiscovery>) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    pub fn progress(mut self, progress: Arc<dyn DiscoveryProgress>) -> Self {
        self.progress = progress;
        self
    }

    /// Validates the configuration and starts the services.
    ///
    /// Must be called within a Tokio runtime.
    pub fn start(self) -> Result<App> {
        let config = self.config;
        config.validate().context("Invalid configuration")?;

        let applications = InMemoryRepository::<ApplicationInfoModel>::new();
        let endpoints = InMemoryRepository::<EndpointInfoModel>::new();
        let reconciler = Arc::new(
            DiscoveryReconciler::new(Arc::new(applications), Arc::new(endpoints))
                .with_max_update_retries(config.registry.max_update_retries),
        );

        let mut identity = DiscovererIdentity::new(config.discoverer.id.clone());
        if let Some(site_id) = &config.discoverer.site_id {
            identity = identity.with_site(site_id.clone());
        }

        let (forwarder, reconcile_task) =
            ResultForwarder::spawn(config.discoverer.id.clone(), reconciler.clone());

        let endpoint_discovery = self.endpoints.unwrap_or_else(|| {
            info!(servers = config.catalog.len(), "Using catalog endpoint discovery");
            Arc::new(CatalogEndpointDiscovery::new(config.catalog.clone()))
        });

        let mut builder = DiscoveryServices::builder(identity)
            .config(DiscoveryServicesConfig::from(&config.discovery))
            .endpoint_discovery(endpoint_discovery)
            .result_handler(Arc::new(forwarder.clone()))
            .progress(self.progress);
        if let Some(network) = self.network {
            builder = builder.network(network);
        }
        let services = builder.build().context("Failed to start discovery services")?;

        info!(
            discoverer_id = %config.discoverer.id,
            mode = %config.discovery.mode,
            "Discovery services started"
        );

        Ok(App {
            config,
            services,
            reconciler,
            forwarder,
            reconcile_task: Mutex::new(Some(reconcile_task)),
        })
    }
}

/// Running discovery service with its registry.
pub struct App {
    config: AppConfig,
    services: DiscoveryServices,
    reconciler: Arc<DiscoveryReconciler>,
    forwarder: ResultForwarder,
    reconcile_task: Mutex<Option<JoinHandle<()>>>,
}

impl App {
    pub fn builder(config: AppConfig) -> AppBuilder {
        AppBuilder {
            config,
            network: None,
            endpoints: None,
            progress: Arc::new(LoggingProgress),
        }
    }

    pub fn services(&self) -> &DiscoveryServices {
        &self.services
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Applies the configured standing discovery.
    pub async fn configure_standing(&self) {
        let settings = &self.config.discovery;
        self.services
            .configure(settings.mode, settings.configuration.clone())
            .await;
    }

    /// Returns the registrations of this discoverer.
    pub async fn registrations(&self) -> Result<Vec<ApplicationRegistrationModel>> {
        Ok(self
            .reconciler
            .registrations(Some(&self.config.discoverer.id))
            .await?)
    }

    /// Stops discovery, then waits for the queued batches to be reconciled.
    pub async fn shutdown(&self) {
        self.services.shutdown().await;
        self.forwarder.close();
        if let Some(task) = self.reconcile_task.lock().await.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Reconciliation task failed");
            }
        }
        info!("Shutdown complete");
    }
}
