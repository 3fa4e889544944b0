/// Hot-reload automation registry using ArcSwap
///
/// Readers resolve requests against an immutable snapshot loaded with a single
/// atomic pointer read. Writers build a complete new snapshot (automations plus
/// route table) and swap it in, so a request never observes a half-installed
/// automation. Writers are serialized by a mutex; readers never block.

use crate::automation::path::{split_segments, PathTemplate};
use crate::automation::{AutomationStatus, HttpMethod};
use crate::error::AutomationError;
use crate::runtime::{EndpointExecutor, LiveAutomation};
use arc_swap::ArcSwap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Owned registry instance; starts empty, dropping it drops every automation
#[derive(Debug, Default)]
pub struct AutomationRegistry {
    snapshot: ArcSwap<Snapshot>,
    writer: Mutex<()>,
}

#[derive(Debug, Default)]
struct Snapshot {
    automations: HashMap<String, Arc<LiveAutomation>>,
    /// Install order, for stable listings
    order: Vec<String>,
    /// Routable endpoints of active automations
    routes: Vec<Route>,
}

#[derive(Debug, Clone)]
struct Route {
    method: HttpMethod,
    template: PathTemplate,
    automation_id: String,
    endpoint_index: usize,
}

/// Listing entry for one installed automation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutomationSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub base_path: String,
    pub status: AutomationStatus,
    pub endpoint_count: usize,
    pub active_endpoint_count: usize,
    pub backend_type: String,
    pub collection_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl AutomationSummary {
    fn of(live: &LiveAutomation) -> Self {
        let definition = &live.compiled().definition;
        Self {
            id: definition.id.clone(),
            name: definition.name.clone(),
            description: definition.description.clone(),
            version: definition.version.clone(),
            base_path: definition.base_path.clone(),
            status: definition.status,
            endpoint_count: definition.endpoints.len(),
            active_endpoint_count: definition.endpoints.iter().filter(|e| e.active).count(),
            backend_type: definition.db_config.backend_type.clone(),
            collection_name: definition.db_config.collection_name.clone(),
            created_at: definition.created_at.clone(),
            updated_at: definition.updated_at.clone(),
        }
    }
}

/// A request matched to an endpoint of a live automation
#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    pub automation: Arc<LiveAutomation>,
    pub endpoint_index: usize,
    /// Placeholder values captured from the request path
    pub path_params: HashMap<String, String>,
}

impl ResolvedRoute {
    pub fn executor(&self) -> Option<&EndpointExecutor> {
        self.automation.executor(self.endpoint_index)
    }
}

impl AutomationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace an automation.
    ///
    /// All of its endpoints become routable at once, or none do: a route clash
    /// with another active automation leaves the registry untouched.
    /// Returns the automation previously installed under the same id.
    pub fn install(&self, automation: LiveAutomation) -> Result<Option<Arc<LiveAutomation>>, AutomationError> {
        self.install_shared(Arc::new(automation))
    }

    /// [`install`](Self::install) for an automation that is already shared, e.g. when restoring
    pub fn install_shared(
        &self,
        automation: Arc<LiveAutomation>,
    ) -> Result<Option<Arc<LiveAutomation>>, AutomationError> {
        let _guard = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let current = self.snapshot.load_full();
        let id = automation.id().to_string();

        if automation.is_active() {
            check_conflicts(&current, &automation)?;
        }

        let mut automations = current.automations.clone();
        let mut order = current.order.clone();
        if !automations.contains_key(&id) {
            order.push(id.clone());
        }
        let previous = automations.insert(id.clone(), automation);

        self.snapshot.store(Arc::new(Snapshot::build(automations, order)));
        tracing::info!(
            "🔄 Installed automation: {} ({})",
            id,
            if previous.is_some() { "replaced" } else { "new" }
        );

        Ok(previous)
    }

    /// Remove an automation; its routes disappear atomically
    pub fn remove(&self, id: &str) -> Option<Arc<LiveAutomation>> {
        let _guard = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let current = self.snapshot.load_full();
        if !current.automations.contains_key(id) {
            return None;
        }

        let mut automations = current.automations.clone();
        let removed = automations.remove(id);
        let order = current.order.iter().filter(|o| *o != id).cloned().collect();

        self.snapshot.store(Arc::new(Snapshot::build(automations, order)));
        tracing::info!("🗑️ Removed automation from registry: {}", id);

        removed
    }

    /// Drop every automation
    pub fn clear(&self) {
        let _guard = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.snapshot.store(Arc::new(Snapshot::default()));
    }

    /// Match a request to an active endpoint of an active automation.
    ///
    /// When several templates match, the one with a literal segment at the
    /// first position where they differ wins (`/tasks/stats` beats `/tasks/{id}`).
    pub fn resolve(&self, method: HttpMethod, path: &str) -> Option<ResolvedRoute> {
        let snapshot = self.snapshot.load();
        let segments = split_segments(path);

        let mut best: Option<(&Route, HashMap<String, String>, Vec<bool>)> = None;
        for route in snapshot.routes.iter().filter(|r| r.method == method) {
            let Some(captured) = route.template.matches(&segments) else {
                continue;
            };
            let specificity = route.template.specificity();
            if best.as_ref().map_or(true, |(_, _, top)| specificity > *top) {
                best = Some((route, captured, specificity));
            }
        }

        let (route, path_params, _) = best?;
        let automation = snapshot.automations.get(&route.automation_id)?.clone();
        Some(ResolvedRoute {
            automation,
            endpoint_index: route.endpoint_index,
            path_params,
        })
    }

    pub fn get(&self, id: &str) -> Option<Arc<LiveAutomation>> {
        self.snapshot.load().automations.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.snapshot.load().automations.contains_key(id)
    }

    /// Summaries in install order
    pub fn list(&self) -> Vec<AutomationSummary> {
        let snapshot = self.snapshot.load();
        snapshot
            .order
            .iter()
            .filter_map(|id| snapshot.automations.get(id))
            .map(|live| AutomationSummary::of(live))
            .collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.snapshot.load().order.clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().automations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Snapshot {
    fn build(automations: HashMap<String, Arc<LiveAutomation>>, order: Vec<String>) -> Self {
        let routes = order
            .iter()
            .filter_map(|id| automations.get(id))
            .flat_map(|live| routes_of(live))
            .collect();
        Self {
            automations,
            order,
            routes,
        }
    }
}

fn routes_of(live: &LiveAutomation) -> Vec<Route> {
    if !live.is_active() {
        return Vec::new();
    }
    live.compiled()
        .endpoints
        .iter()
        .enumerate()
        .filter(|(_, endpoint)| endpoint.definition.active)
        .map(|(index, endpoint)| Route {
            method: endpoint.method(),
            template: endpoint.template.clone(),
            automation_id: live.id().to_string(),
            endpoint_index: index,
        })
        .collect()
}

/// Reject an active automation whose routes overlap another automation's
fn check_conflicts(snapshot: &Snapshot, automation: &LiveAutomation) -> Result<(), AutomationError> {
    for candidate in routes_of(automation) {
        let shape = candidate.template.shape();
        let clash = snapshot.routes.iter().find(|existing| {
            existing.automation_id != candidate.automation_id
                && existing.method == candidate.method
                && existing.template.shape() == shape
        });
        if let Some(existing) = clash {
            return Err(AutomationError::RouteConflict {
                method: candidate.method.to_string(),
                path: candidate.template.to_string(),
                owner: existing.automation_id.clone(),
            });
        }
    }
    Ok(())
}
