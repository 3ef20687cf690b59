//! Mock MetalClient for unit testing
//!
//! In-memory implementation of `MetalClientTrait` that mimics the API server closely enough for
//! reconciler tests: JSON merge patch semantics, resourceVersion preconditions, status
//! subresource separation, label-selector paging with continue tokens, a write log and
//! per-operation failure injection.

use crate::common::{MachineListParams, MachinePage};
use crate::error::MetalError;
use crate::metal_trait::MetalClientTrait;
use crds::{Machine, Oob, ReservationRequest};
use kube::Resource;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Store operation, used to inspect writes and inject failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    GetMachine,
    ListMachines,
    CreateMachine,
    PatchMachine,
    PatchMachineStatus,
    GetRequest,
    PatchRequestStatus,
    GetOob,
    PatchOob,
}

impl MockOperation {
    /// True for operations that mutate the store
    pub fn is_write(self) -> bool {
        matches!(
            self,
            MockOperation::CreateMachine
                | MockOperation::PatchMachine
                | MockOperation::PatchMachineStatus
                | MockOperation::PatchRequestStatus
                | MockOperation::PatchOob
        )
    }

    /// True for writes against machines
    pub fn is_machine_write(self) -> bool {
        matches!(
            self,
            MockOperation::CreateMachine | MockOperation::PatchMachine | MockOperation::PatchMachineStatus
        )
    }
}

/// Failure returned by an operation configured with `fail`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    NotFound,
    Conflict,
    Api(String),
}

impl MockFailure {
    fn into_error(self, what: &str) -> MetalError {
        match self {
            MockFailure::NotFound => MetalError::NotFound(what.to_string()),
            MockFailure::Conflict => MetalError::Conflict(format!("{what}: injected conflict")),
            MockFailure::Api(message) => MetalError::Api(message),
        }
    }
}

/// Recorded write
#[derive(Debug, Clone, PartialEq)]
pub struct MockWrite {
    pub operation: MockOperation,
    pub name: String,
    pub body: Value,
}

#[derive(Clone, Copy)]
enum PatchScope {
    Main,
    Status,
}

/// Mock MetalClient for testing
#[derive(Clone, Debug)]
pub struct MockMetalClient {
    namespace: String,
    machines: Arc<Mutex<BTreeMap<String, Machine>>>,
    requests: Arc<Mutex<BTreeMap<String, ReservationRequest>>>,
    oobs: Arc<Mutex<BTreeMap<String, Oob>>>,
    writes: Arc<Mutex<Vec<MockWrite>>>,
    failures: Arc<Mutex<HashMap<MockOperation, MockFailure>>>,
    list_calls: Arc<Mutex<usize>>,
    // Counter for generating resourceVersions
    next_resource_version: Arc<Mutex<u64>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Apply an RFC 7386 JSON merge patch to `target`
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

impl MockMetalClient {
    /// Create an empty mock store scoped to `namespace`
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            machines: Arc::new(Mutex::new(BTreeMap::new())),
            requests: Arc::new(Mutex::new(BTreeMap::new())),
            oobs: Arc::new(Mutex::new(BTreeMap::new())),
            writes: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(HashMap::new())),
            list_calls: Arc::new(Mutex::new(0)),
            next_resource_version: Arc::new(Mutex::new(1)),
        }
    }

    fn bump_resource_version(&self) -> String {
        let mut next = lock(&self.next_resource_version);
        let rv = next.to_string();
        *next += 1;
        rv
    }

    fn prepare<K: Resource>(&self, resource: &mut K) -> String {
        let meta = resource.meta_mut();
        meta.namespace.get_or_insert_with(|| self.namespace.clone());
        meta.resource_version = Some(self.bump_resource_version());
        meta.name.clone().unwrap_or_default()
    }

    /// Add a machine to the mock store (for test setup)
    pub fn add_machine(&self, mut machine: Machine) {
        let name = self.prepare(&mut machine);
        lock(&self.machines).insert(name, machine);
    }

    /// Add a reservation request to the mock store (for test setup)
    pub fn add_request(&self, mut request: ReservationRequest) {
        let name = self.prepare(&mut request);
        lock(&self.requests).insert(name, request);
    }

    /// Add an OOB device to the mock store (for test setup)
    pub fn add_oob(&self, mut oob: Oob) {
        let name = self.prepare(&mut oob);
        lock(&self.oobs).insert(name, oob);
    }

    /// Remove a machine (simulates deletion)
    pub fn remove_machine(&self, name: &str) -> Option<Machine> {
        lock(&self.machines).remove(name)
    }

    /// Remove a reservation request (simulates deletion)
    pub fn remove_request(&self, name: &str) -> Option<ReservationRequest> {
        lock(&self.requests).remove(name)
    }

    /// Stored machine
    pub fn machine(&self, name: &str) -> Option<Machine> {
        lock(&self.machines).get(name).cloned()
    }

    /// Stored reservation request
    pub fn request(&self, name: &str) -> Option<ReservationRequest> {
        lock(&self.requests).get(name).cloned()
    }

    /// Stored OOB device
    pub fn oob(&self, name: &str) -> Option<Oob> {
        lock(&self.oobs).get(name).cloned()
    }

    /// Make every call of `operation` fail until cleared
    pub fn fail(&self, operation: MockOperation, failure: MockFailure) {
        lock(&self.failures).insert(operation, failure);
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    /// All recorded writes in order
    pub fn writes(&self) -> Vec<MockWrite> {
        lock(&self.writes).clone()
    }

    /// Number of writes against machines
    pub fn machine_write_count(&self) -> usize {
        lock(&self.writes)
            .iter()
            .filter(|w| w.operation.is_machine_write())
            .count()
    }

    /// Number of writes of any kind
    pub fn write_count(&self) -> usize {
        lock(&self.writes).len()
    }

    /// Number of list calls served
    pub fn list_count(&self) -> usize {
        *lock(&self.list_calls)
    }

    fn check_failure(&self, operation: MockOperation, what: &str) -> Result<(), MetalError> {
        match lock(&self.failures).get(&operation).cloned() {
            Some(failure) => Err(failure.into_error(what)),
            None => Ok(()),
        }
    }

    fn record(&self, operation: MockOperation, name: &str, body: Value) {
        lock(&self.writes).push(MockWrite {
            operation,
            name: name.to_string(),
            body,
        });
    }

    fn apply<K>(&self, stored: &K, patch: &Value, scope: PatchScope, what: &str) -> Result<K, MetalError>
    where
        K: Resource + Serialize + DeserializeOwned,
    {
        let expected = patch
            .pointer("/metadata/resourceVersion")
            .and_then(Value::as_str);
        if let Some(expected) = expected {
            if stored.meta().resource_version.as_deref() != Some(expected) {
                return Err(MetalError::Conflict(format!(
                    "{what}: resourceVersion {expected} is stale"
                )));
            }
        }

        let mut effective = patch.clone();
        if let Some(metadata) = effective.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.remove("resourceVersion");
        }
        let effective = match scope {
            PatchScope::Status => match effective.get("status") {
                Some(status) => serde_json::json!({ "status": status }),
                None => serde_json::json!({}),
            },
            PatchScope::Main => {
                if let Some(object) = effective.as_object_mut() {
                    object.remove("status");
                }
                effective
            }
        };

        let mut document = serde_json::to_value(stored)?;
        merge_patch(&mut document, &effective);
        let mut updated: K = serde_json::from_value(document)?;
        updated.meta_mut().resource_version = Some(self.bump_resource_version());
        Ok(updated)
    }

    fn patch_machine_scoped(
        &self,
        name: &str,
        patch: &Value,
        scope: PatchScope,
        operation: MockOperation,
    ) -> Result<Machine, MetalError> {
        let what = format!("Machine {}/{}", self.namespace, name);
        self.check_failure(operation, &what)?;
        let mut machines = lock(&self.machines);
        let stored = machines
            .get(name)
            .ok_or_else(|| MetalError::NotFound(what.clone()))?;
        let updated = self.apply(stored, patch, scope, &what)?;
        machines.insert(name.to_string(), updated.clone());
        drop(machines);
        self.record(operation, name, patch.clone());
        Ok(updated)
    }
}

#[async_trait::async_trait]
impl MetalClientTrait for MockMetalClient {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get_machine(&self, name: &str) -> Result<Option<Machine>, MetalError> {
        self.check_failure(MockOperation::GetMachine, name)?;
        Ok(self.machine(name))
    }

    async fn list_machines(&self, params: &MachineListParams) -> Result<MachinePage, MetalError> {
        self.check_failure(MockOperation::ListMachines, "Machine list")?;
        *lock(&self.list_calls) += 1;

        let machines = lock(&self.machines);
        let limit = params
            .limit
            .and_then(|l| usize::try_from(l).ok())
            .filter(|l| *l > 0)
            .unwrap_or(usize::MAX);
        let mut matching = machines
            .iter()
            .filter(|(name, _)| {
                params
                    .continue_token
                    .as_deref()
                    .is_none_or(|token| name.as_str() > token)
            })
            .filter(|(_, machine)| {
                params
                    .selector
                    .as_ref()
                    .is_none_or(|s| s.matches(machine.metadata.labels.as_ref()))
            })
            .map(|(_, machine)| machine.clone());

        let items: Vec<Machine> = matching.by_ref().take(limit).collect();
        let continue_token = if matching.next().is_some() {
            items.last().and_then(|m| m.metadata.name.clone())
        } else {
            None
        };
        Ok(MachinePage { items, continue_token })
    }

    async fn create_machine(&self, machine: &Machine) -> Result<Machine, MetalError> {
        let name = machine.metadata.name.clone().unwrap_or_default();
        let what = format!("Machine {}/{}", self.namespace, name);
        self.check_failure(MockOperation::CreateMachine, &what)?;
        if lock(&self.machines).contains_key(&name) {
            return Err(MetalError::Conflict(format!("{what} already exists")));
        }

        // Status is a subresource: the API server drops it on create.
        let mut created = machine.clone();
        created.status = None;
        created.metadata.uid = None;
        self.prepare(&mut created);
        lock(&self.machines).insert(name.clone(), created.clone());
        self.record(MockOperation::CreateMachine, &name, serde_json::to_value(machine)?);
        Ok(created)
    }

    async fn patch_machine(&self, name: &str, patch: &Value) -> Result<Machine, MetalError> {
        self.patch_machine_scoped(name, patch, PatchScope::Main, MockOperation::PatchMachine)
    }

    async fn patch_machine_status(&self, name: &str, patch: &Value) -> Result<Machine, MetalError> {
        self.patch_machine_scoped(name, patch, PatchScope::Status, MockOperation::PatchMachineStatus)
    }

    async fn get_request(&self, name: &str) -> Result<Option<ReservationRequest>, MetalError> {
        self.check_failure(MockOperation::GetRequest, name)?;
        Ok(self.request(name))
    }

    async fn patch_request_status(&self, name: &str, patch: &Value) -> Result<ReservationRequest, MetalError> {
        let what = format!("ReservationRequest {}/{}", self.namespace, name);
        self.check_failure(MockOperation::PatchRequestStatus, &what)?;
        let mut requests = lock(&self.requests);
        let stored = requests
            .get(name)
            .ok_or_else(|| MetalError::NotFound(what.clone()))?;
        let updated = self.apply(stored, patch, PatchScope::Status, &what)?;
        requests.insert(name.to_string(), updated.clone());
        drop(requests);
        self.record(MockOperation::PatchRequestStatus, name, patch.clone());
        Ok(updated)
    }

    async fn get_oob(&self, name: &str) -> Result<Option<Oob>, MetalError> {
        self.check_failure(MockOperation::GetOob, name)?;
        Ok(self.oob(name))
    }

    async fn patch_oob(&self, name: &str, patch: &Value) -> Result<Oob, MetalError> {
        let what = format!("Oob {}/{}", self.namespace, name);
        self.check_failure(MockOperation::PatchOob, &what)?;
        let mut oobs = lock(&self.oobs);
        let stored = oobs
            .get(name)
            .ok_or_else(|| MetalError::NotFound(what.clone()))?;
        let updated = self.apply(stored, patch, PatchScope::Main, &what)?;
        oobs.insert(name.to_string(), updated.clone());
        drop(oobs);
        self.record(MockOperation::PatchOob, name, patch.clone());
        Ok(updated)
    }
}
