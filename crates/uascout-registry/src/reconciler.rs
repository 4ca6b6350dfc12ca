//! Merges discovery results into the registry.
//!
//! One discovery run is reconciled at a time per discoverer. Entities seen in
//! the run become `Found`, entities of the same discoverer missing from the
//! run become `Lost`. Nothing is ever deleted and entities of other
//! discoverers are never written.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uascout_core::identity;
use uascout_core::{
    ApplicationInfoModel, ApplicationRegistrationModel, DiscoveryResultModel, EndpointInfoModel,
    OperationContextModel, Visibility,
};

use crate::error::{RegistryError, Result};
use crate::repository::{update_with, Repository, DEFAULT_MAX_UPDATE_RETRIES};

/// Outcome counts of one reconciliation, over applications and endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Entities inserted
    pub added: usize,
    /// Existing entities written because they changed or were found again
    pub updated: usize,
    /// Existing entities found again without any change
    pub unchanged: usize,
    /// Entities newly marked lost
    pub lost: usize,
    /// Results ignored: no application uri, or owned by another discoverer
    pub skipped: usize,
    /// Entities whose write failed
    pub failed: usize,
}

/// An application of the run with its endpoints.
struct Candidate {
    application: ApplicationInfoModel,
    endpoints: Vec<EndpointInfoModel>,
}

/// Result of writing one candidate application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApplicationWrite {
    Written,
    /// Owned by another discoverer
    Skipped,
    Failed,
}

/// Merges discovery batches into application and endpoint repositories.
pub struct DiscoveryReconciler {
    applications: Arc<dyn Repository<ApplicationInfoModel>>,
    endpoints: Arc<dyn Repository<EndpointInfoModel>>,
    max_update_retries: usize,
}

impl DiscoveryReconciler {
    pub fn new(
        applications: Arc<dyn Repository<ApplicationInfoModel>>,
        endpoints: Arc<dyn Repository<EndpointInfoModel>>,
    ) -> Self {
        Self {
            applications,
            endpoints,
            max_update_retries: DEFAULT_MAX_UPDATE_RETRIES,
        }
    }

    pub fn with_max_update_retries(mut self, retries: usize) -> Self {
        self.max_update_retries = retries.max(1);
        self
    }

    /// Reconciles the results of one discovery run of `discoverer_id`.
    ///
    /// # Errors
    ///
    /// Fails only if the discoverer's existing entities cannot be listed.
    /// Failed writes of single entities are counted in the summary.
    pub async fn process_discovery_results(
        &self,
        discoverer_id: &str,
        context: &OperationContextModel,
        results: &[DiscoveryResultModel],
    ) -> Result<ReconcileSummary> {
        let mut summary = ReconcileSummary::default();
        let candidates = group_results(discoverer_id, results, &mut summary);

        let existing_applications: HashSet<String> = self
            .applications
            .list_by_discoverer(discoverer_id)
            .await?
            .into_iter()
            .map(|a| a.application_id)
            .collect();
        let existing_endpoints: HashSet<String> = self
            .endpoints
            .list_by_discoverer(discoverer_id)
            .await?
            .into_iter()
            .map(|e| e.id)
            .collect();

        let mut seen_applications = HashSet::new();
        let mut seen_endpoints = HashSet::new();

        for candidate in candidates {
            let application_id = candidate.application.application_id.clone();
            let exists = existing_applications.contains(&application_id);
            let write = self
                .upsert_application(candidate.application, exists, context, &mut summary)
                .await;
            match write {
                ApplicationWrite::Skipped => {
                    summary.skipped += candidate.endpoints.len();
                    continue;
                }
                // Nothing of a new application was stored. Its endpoint ids
                // stay out of the lost pass until the next run.
                ApplicationWrite::Failed if !exists => {
                    seen_endpoints.extend(candidate.endpoints.into_iter().map(|e| e.id));
                    continue;
                }
                ApplicationWrite::Written | ApplicationWrite::Failed => {}
            }
            seen_applications.insert(application_id);

            for endpoint in candidate.endpoints {
                let endpoint_id = endpoint.id.clone();
                self.upsert_endpoint(
                    endpoint,
                    existing_endpoints.contains(&endpoint_id),
                    &mut summary,
                )
                .await;
                seen_endpoints.insert(endpoint_id);
            }
        }

        let now = Utc::now();
        for id in existing_applications.difference(&seen_applications) {
            let patch = |application: &mut ApplicationInfoModel| {
                let changed = application.mark_lost(now);
                if changed {
                    application.updated = Some(context.clone());
                }
                changed
            };
            self.mark_lost(&*self.applications, id, patch, &mut summary)
                .await;
        }
        for id in existing_endpoints.difference(&seen_endpoints) {
            let patch = |endpoint: &mut EndpointInfoModel| endpoint.mark_lost(now);
            self.mark_lost(&*self.endpoints, id, patch, &mut summary)
                .await;
        }

        info!(
            discoverer_id,
            added = summary.added,
            updated = summary.updated,
            unchanged = summary.unchanged,
            lost = summary.lost,
            skipped = summary.skipped,
            failed = summary.failed,
            "Discovery results reconciled"
        );
        Ok(summary)
    }

    /// Returns the registry content as registrations, optionally limited to
    /// one discoverer.
    pub async fn registrations(
        &self,
        discoverer_id: Option<&str>,
    ) -> Result<Vec<ApplicationRegistrationModel>> {
        let (applications, endpoints) = match discoverer_id {
            Some(id) => (
                self.applications.list_by_discoverer(id).await?,
                self.endpoints.list_by_discoverer(id).await?,
            ),
            None => (self.applications.list().await?, self.endpoints.list().await?),
        };

        let mut by_application: HashMap<String, Vec<EndpointInfoModel>> = HashMap::new();
        for endpoint in endpoints {
            by_application
                .entry(endpoint.application_id.clone())
                .or_default()
                .push(endpoint);
        }

        let mut registrations: Vec<_> = applications
            .into_iter()
            .map(|application| {
                let mut endpoints = by_application
                    .remove(&application.application_id)
                    .unwrap_or_default();
                endpoints.sort_by(|a, b| a.endpoint_url.cmp(&b.endpoint_url).then(a.id.cmp(&b.id)));
                ApplicationRegistrationModel {
                    application,
                    endpoints,
                }
            })
            .collect();
        registrations.sort_by(|a, b| {
            a.application
                .application_uri
                .cmp(&b.application.application_uri)
                .then(a.application.application_id.cmp(&b.application.application_id))
        });
        Ok(registrations)
    }

    /// Writes a candidate application.
    ///
    /// A failed write of an application this discoverer already owns still
    /// counts as seen by the caller, so it is never marked lost for it.
    async fn upsert_application(
        &self,
        candidate: ApplicationInfoModel,
        exists: bool,
        context: &OperationContextModel,
        summary: &mut ReconcileSummary,
    ) -> ApplicationWrite {
        let id = candidate.application_id.clone();
        if exists {
            let mut changed = false;
            let result = update_with(
                &*self.applications,
                &id,
                self.max_update_retries,
                |current: &mut ApplicationInfoModel| {
                    changed = current.patch_from(&candidate) | current.mark_found();
                    if changed {
                        current.updated = Some(context.clone());
                    }
                    changed
                },
            )
            .await;
            match result {
                Ok(Some(_)) => {
                    if changed {
                        summary.updated += 1;
                    } else {
                        summary.unchanged += 1;
                    }
                    return ApplicationWrite::Written;
                }
                Ok(None) => debug!(application_id = %id, "Application vanished, inserting"),
                Err(e) => {
                    warn!(application_id = %id, error = %e, "Failed to update application");
                    summary.failed += 1;
                    return ApplicationWrite::Failed;
                }
            }
        }

        let mut application = candidate;
        application.mark_found();
        application.created = Some(context.clone());
        application.updated = None;
        application.generation_id = None;
        match self.applications.add(application).await {
            Ok(_) => {
                summary.added += 1;
                ApplicationWrite::Written
            }
            Err(RegistryError::ResourceConflict { .. }) => {
                warn!(
                    application_id = %id,
                    "Application registered by another discoverer, skipping"
                );
                summary.skipped += 1;
                ApplicationWrite::Skipped
            }
            Err(e) => {
                warn!(application_id = %id, error = %e, "Failed to add application");
                summary.failed += 1;
                ApplicationWrite::Failed
            }
        }
    }

    async fn upsert_endpoint(
        &self,
        candidate: EndpointInfoModel,
        exists: bool,
        summary: &mut ReconcileSummary,
    ) {
        let id = candidate.id.clone();
        if exists {
            let mut changed = false;
            let result = update_with(
                &*self.endpoints,
                &id,
                self.max_update_retries,
                |current: &mut EndpointInfoModel| {
                    changed = current.patch_from(&candidate) | current.mark_found();
                    changed
                },
            )
            .await;
            match result {
                Ok(Some(_)) => {
                    if changed {
                        summary.updated += 1;
                    } else {
                        summary.unchanged += 1;
                    }
                    return;
                }
                Ok(None) => debug!(endpoint_id = %id, "Endpoint vanished, inserting"),
                Err(e) => {
                    warn!(endpoint_id = %id, error = %e, "Failed to update endpoint");
                    summary.failed += 1;
                    return;
                }
            }
        }

        let mut endpoint = candidate;
        endpoint.mark_found();
        endpoint.generation_id = None;
        match self.endpoints.add(endpoint).await {
            Ok(_) => summary.added += 1,
            Err(RegistryError::ResourceConflict { .. }) => {
                warn!(endpoint_id = %id, "Endpoint registered by another discoverer, skipping");
                summary.skipped += 1;
            }
            Err(e) => {
                warn!(endpoint_id = %id, error = %e, "Failed to add endpoint");
                summary.failed += 1;
            }
        }
    }

    async fn mark_lost<T, F>(
        &self,
        repository: &dyn Repository<T>,
        id: &str,
        patch: F,
        summary: &mut ReconcileSummary,
    ) where
        T: crate::repository::Entity,
        F: FnMut(&mut T) -> bool + Send,
    {
        let mut lost = false;
        let mut patch = patch;
        let result = update_with(repository, id, self.max_update_retries, |entity: &mut T| {
            lost = patch(entity);
            lost
        })
        .await;
        match result {
            Ok(_) if lost => {
                debug!(id, "Marked lost");
                summary.lost += 1;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(id, error = %e, "Failed to mark entity lost");
                summary.failed += 1;
            }
        }
    }
}

/// Groups the records of a run by application, deriving the ids of the
/// applications and endpoints.
///
/// The first record of an application supplies it; of several records for
/// the same endpoint the last one wins.
fn group_results(
    discoverer_id: &str,
    results: &[DiscoveryResultModel],
    summary: &mut ReconcileSummary,
) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for result in results {
        let (Some(application), Some(endpoint)) = (&result.application, &result.endpoint) else {
            if let Some(info) = &result.result {
                debug!(
                    discoverer_id,
                    request_id = info.id.as_deref().unwrap_or_default(),
                    "Reconciling discovery batch"
                );
            }
            continue;
        };

        let site_or_gateway =
            identity::site_or_gateway_id(application.site_id.as_deref(), discoverer_id);
        let Some(application_id) = identity::application_id(
            Some(site_or_gateway),
            &application.application_uri,
            application.application_type,
        ) else {
            debug!(discoverer_id, "Skipping result without application uri");
            summary.skipped += 1;
            continue;
        };

        let mut endpoint = endpoint.clone();
        endpoint.id = identity::endpoint_id(
            &endpoint.endpoint_url,
            &application_id,
            endpoint.security_mode,
            endpoint.security_policy.as_deref(),
        );
        endpoint.application_id = application_id.clone();
        endpoint.discoverer_id = Some(discoverer_id.to_string());
        endpoint.site_id = application.site_id.clone();

        let slot = *index.entry(application_id.clone()).or_insert_with(|| {
            let mut application = application.clone();
            application.application_id = application_id.clone();
            application.discoverer_id = Some(discoverer_id.to_string());
            application.visibility = Visibility::Found;
            application.not_seen_since = None;
            candidates.push(Candidate {
                application,
                endpoints: Vec::new(),
            });
            candidates.len() - 1
        });

        let endpoints = &mut candidates[slot].endpoints;
        match endpoints.iter_mut().find(|e| e.id == endpoint.id) {
            Some(existing) => *existing = endpoint,
            None => endpoints.push(endpoint),
        }
    }
    candidates
}
