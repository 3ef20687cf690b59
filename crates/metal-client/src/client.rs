//! Kubernetes-backed client

use crate::common::{MachineListParams, MachinePage};
use crate::error::MetalError;
use crate::metal_trait::MetalClientTrait;
use crds::{Machine, Oob, ReservationRequest};
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use serde_json::Value;
use tracing::debug;

/// Client reading and writing scheduling resources through the Kubernetes API
#[derive(Clone)]
pub struct MetalClient {
    namespace: String,
    machines: Api<Machine>,
    requests: Api<ReservationRequest>,
    oobs: Api<Oob>,
}

impl std::fmt::Debug for MetalClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetalClient")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl MetalClient {
    /// Create a client scoped to `namespace`
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            machines: Api::namespaced(client.clone(), namespace),
            requests: Api::namespaced(client.clone(), namespace),
            oobs: Api::namespaced(client, namespace),
        }
    }

    fn what(&self, kind: &str, name: &str) -> String {
        format!("{} {}/{}", kind, self.namespace, name)
    }
}

#[async_trait::async_trait]
impl MetalClientTrait for MetalClient {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get_machine(&self, name: &str) -> Result<Option<Machine>, MetalError> {
        self.machines
            .get_opt(name)
            .await
            .map_err(|e| MetalError::from_kube(e, &self.what("Machine", name)))
    }

    async fn list_machines(&self, params: &MachineListParams) -> Result<MachinePage, MetalError> {
        let mut lp = ListParams::default();
        if let Some(selector) = params.selector.as_ref().filter(|s| !s.is_empty()) {
            lp = lp.labels(&selector.to_string());
        }
        if let Some(limit) = params.limit {
            lp = lp.limit(limit);
        }
        if let Some(token) = params.continue_token.as_deref() {
            lp = lp.continue_token(token);
        }

        debug!(
            "Listing machines in {} (selector: {:?}, limit: {:?})",
            self.namespace,
            params.selector.as_ref().map(ToString::to_string),
            params.limit
        );
        let list = self
            .machines
            .list(&lp)
            .await
            .map_err(|e| MetalError::from_kube(e, &format!("Machine list in {}", self.namespace)))?;

        Ok(MachinePage {
            continue_token: list.metadata.continue_.filter(|t| !t.is_empty()),
            items: list.items,
        })
    }

    async fn create_machine(&self, machine: &Machine) -> Result<Machine, MetalError> {
        let name = machine.metadata.name.clone().unwrap_or_default();
        self.machines
            .create(&PostParams::default(), machine)
            .await
            .map_err(|e| MetalError::from_kube(e, &self.what("Machine", &name)))
    }

    async fn patch_machine(&self, name: &str, patch: &Value) -> Result<Machine, MetalError> {
        self.machines
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| MetalError::from_kube(e, &self.what("Machine", name)))
    }

    async fn patch_machine_status(&self, name: &str, patch: &Value) -> Result<Machine, MetalError> {
        self.machines
            .patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| MetalError::from_kube(e, &self.what("Machine", name)))
    }

    async fn get_request(&self, name: &str) -> Result<Option<ReservationRequest>, MetalError> {
        self.requests
            .get_opt(name)
            .await
            .map_err(|e| MetalError::from_kube(e, &self.what("ReservationRequest", name)))
    }

    async fn patch_request_status(&self, name: &str, patch: &Value) -> Result<ReservationRequest, MetalError> {
        self.requests
            .patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| MetalError::from_kube(e, &self.what("ReservationRequest", name)))
    }

    async fn get_oob(&self, name: &str) -> Result<Option<Oob>, MetalError> {
        self.oobs
            .get_opt(name)
            .await
            .map_err(|e| MetalError::from_kube(e, &self.what("Oob", name)))
    }

    async fn patch_oob(&self, name: &str, patch: &Value) -> Result<Oob, MetalError> {
        self.oobs
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| MetalError::from_kube(e, &self.what("Oob", name)))
    }
}
