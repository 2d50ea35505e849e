//! In-memory datacenter double backing the integration tests.
//!
//! One `FakeDatacenter` plays all four collaborator roles over a single
//! locked state, so a test can stand up hosts, clusters, and VMs, inject a
//! failure at any operation, and afterwards inspect exactly what the
//! engine left behind.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use vmshift_core::{
    CompatibilityReport, HostName, Incompatibility, MigrationPlan, Realization, StartAction,
    VmId, VmIdentity, VmPathSet, VmState,
};

use vmshift_engine::{
    ChildFilter, ClusterApi, Comparison, ComputeApi, EngineError, MigrationEvent, ProgressSink,
    SharedVolume, StorageApi, SwitchChoice, SwitchKind, TrustApi, VirtualSwitch, VmQuery,
    VmRecord,
};
use vmshift_engine::AdapterFix;

#[derive(Debug, Clone)]
struct Adapter {
    name: String,
    switch: Option<String>,
}

#[derive(Debug, Default)]
struct HostState {
    cluster: Option<String>,
    vms: BTreeMap<VmId, VmRecord>,
    switches: Vec<VirtualSwitch>,
}

#[derive(Debug, Default)]
struct ClusterState {
    nodes: Vec<HostName>,
    volumes: Vec<SharedVolume>,
    /// VM group -> (owner node, priority).
    groups: BTreeMap<VmId, (HostName, u32)>,
}

#[derive(Debug, Default)]
struct State {
    hosts: BTreeMap<HostName, HostState>,
    clusters: BTreeMap<String, ClusterState>,
    /// One shared filesystem; tests never place the same path on two hosts.
    fs: BTreeSet<PathBuf>,
    adapters: BTreeMap<VmId, Vec<Adapter>>,
    vm_paths: BTreeMap<VmId, VmPathSet>,
    /// (grantee, on) pairs currently holding administrative trust.
    grants: Vec<(HostName, HostName)>,
    /// Operations forced to fail.
    failing: BTreeSet<&'static str>,
    /// Operations that report success without doing anything.
    stalled: BTreeSet<&'static str>,
}

/// All four collaborator APIs over one in-memory state.
#[derive(Default)]
pub struct FakeDatacenter {
    state: Mutex<State>,
}

impl FakeDatacenter {
    /// Two standalone hosts `hv-a` and `hv-b`. The source knows a switch
    /// named `lab`; the destination only has `compute-net`, so migrated
    /// adapters need rebinding.
    pub fn standalone_pair() -> Arc<Self> {
        let dc = Self::default();
        {
            let mut state = dc.state.lock().expect("state lock");
            state.hosts.insert(
                HostName::new("hv-a"),
                HostState {
                    cluster: None,
                    vms: BTreeMap::new(),
                    switches: vec![VirtualSwitch::external("lab")],
                },
            );
            state.hosts.insert(
                HostName::new("hv-b"),
                HostState {
                    cluster: None,
                    vms: BTreeMap::new(),
                    switches: vec![
                        VirtualSwitch::external("compute-net"),
                        VirtualSwitch { name: "mgmt".to_owned(), kind: SwitchKind::Internal },
                    ],
                },
            );
        }
        Arc::new(dc)
    }

    /// One cluster `east` with nodes `hv-a` and `hv-b` and a shared volume
    /// at `c:/csv/vol1` owned by `hv-b`.
    pub fn clustered_pair() -> Arc<Self> {
        let dc = Self::standalone_pair();
        {
            let mut state = dc.state.lock().expect("state lock");
            for host in [HostName::new("hv-a"), HostName::new("hv-b")] {
                if let Some(h) = state.hosts.get_mut(&host) {
                    h.cluster = Some("east".to_owned());
                }
            }
            state.clusters.insert(
                "east".to_owned(),
                ClusterState {
                    nodes: vec![HostName::new("hv-a"), HostName::new("hv-b")],
                    volumes: vec![SharedVolume {
                        path: PathBuf::from("c:/csv/vol1"),
                        owner: HostName::new("hv-b"),
                    }],
                    groups: BTreeMap::new(),
                },
            );
        }
        dc
    }

    /// Add a VM on `host` with one adapter bound to switch `lab` and its
    /// files under `c:/vms/<name>`.
    pub fn add_vm(&self, host: &str, name: &str, state: VmState) -> VmIdentity {
        let host = HostName::new(host);
        let id = VmId::new();
        let record = VmRecord {
            id,
            name: name.to_owned(),
            state,
            realization: Realization::Realized,
            start_action: StartAction::Start,
            snapshot_count: 0,
        };
        let root = PathBuf::from(format!("c:/vms/{name}"));
        let vhd = root.join("disk0.vhdx");
        let mut s = self.state.lock().expect("state lock");
        s.fs.insert(root.clone());
        s.fs.insert(vhd.clone());
        s.vm_paths.insert(id, VmPathSet::rooted_at(root, vec![vhd]));
        s.adapters.insert(
            id,
            vec![Adapter { name: "Network Adapter".to_owned(), switch: Some("lab".to_owned()) }],
        );
        s.hosts.entry(host.clone()).or_default().vms.insert(id, record);
        VmIdentity::new(id, name, host)
    }

    /// Copy a VM record onto another host, same identity. Used to set up
    /// the duplicate-presence precondition.
    pub fn mirror_vm_to(&self, host: &str, vm: VmId) {
        let host = HostName::new(host);
        let mut s = self.state.lock().expect("state lock");
        let record = s
            .hosts
            .values()
            .find_map(|h| h.vms.get(&vm).cloned())
            .expect("VM to mirror must exist");
        s.hosts.entry(host).or_default().vms.insert(vm, record);
    }

    /// Attach snapshots to a VM.
    pub fn set_snapshot_count(&self, vm: VmId, count: u32) {
        let mut s = self.state.lock().expect("state lock");
        for host in s.hosts.values_mut() {
            if let Some(record) = host.vms.get_mut(&vm) {
                record.snapshot_count = count;
            }
        }
    }

    /// Register a cluster group for the VM.
    pub fn add_group(&self, cluster: &str, vm: VmId, owner: &str, priority: u32) {
        let mut s = self.state.lock().expect("state lock");
        if let Some(c) = s.clusters.get_mut(cluster) {
            c.groups.insert(vm, (HostName::new(owner), priority));
        }
    }

    /// Pre-create a filesystem path, as if an earlier run already made it.
    pub fn touch(&self, path: &str) {
        self.state.lock().expect("state lock").fs.insert(PathBuf::from(path));
    }

    /// Force the named operation to fail with a remote error.
    pub fn fail(&self, op: &'static str) {
        self.state.lock().expect("state lock").failing.insert(op);
    }

    /// Make the named operation report success without acting.
    pub fn stall(&self, op: &'static str) {
        self.state.lock().expect("state lock").stalled.insert(op);
    }

    fn check(&self, op: &'static str, host: &HostName) -> Result<bool, EngineError> {
        let s = self.state.lock().expect("state lock");
        if s.failing.contains(op) {
            return Err(EngineError::Remote {
                host: host.clone(),
                detail: format!("injected failure in {op}"),
            });
        }
        Ok(!s.stalled.contains(op))
    }

    // ── Post-run inspection ─────────────────────────────────────────────────

    pub fn vm_on(&self, host: &str, vm: VmId) -> Option<VmRecord> {
        let s = self.state.lock().expect("state lock");
        s.hosts.get(&HostName::new(host)).and_then(|h| h.vms.get(&vm)).cloned()
    }

    /// Hosts on which the VM is enumerable at all, planned or realized.
    pub fn hosts_with(&self, vm: VmId) -> Vec<HostName> {
        let s = self.state.lock().expect("state lock");
        s.hosts
            .iter()
            .filter(|(_, h)| h.vms.contains_key(&vm))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Hosts where the VM could come (back) to life: it is running there,
    /// or its start action would boot it with the host. A disarmed stale
    /// copy awaiting manual review does not count.
    pub fn armed_hosts(&self, vm: VmId) -> Vec<HostName> {
        let s = self.state.lock().expect("state lock");
        s.hosts
            .iter()
            .filter(|(_, h)| {
                h.vms.get(&vm).is_some_and(|r| {
                    r.realization == Realization::Realized
                        && (r.state.is_running() || r.start_action != StartAction::Nothing)
                })
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Hosts holding a realized copy of the VM.
    pub fn realized_hosts(&self, vm: VmId) -> Vec<HostName> {
        let s = self.state.lock().expect("state lock");
        s.hosts
            .iter()
            .filter(|(_, h)| {
                h.vms.get(&vm).is_some_and(|r| r.realization == Realization::Realized)
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn fs_contains(&self, path: &str) -> bool {
        let s = self.state.lock().expect("state lock");
        let path = Path::new(path);
        s.fs.iter().any(|p| p == path || p.starts_with(path))
    }

    pub fn outstanding_grants(&self) -> usize {
        self.state.lock().expect("state lock").grants.len()
    }

    pub fn group_of(&self, cluster: &str, vm: VmId) -> Option<(HostName, u32)> {
        let s = self.state.lock().expect("state lock");
        s.clusters.get(cluster).and_then(|c| c.groups.get(&vm)).cloned()
    }

    pub fn adapter_switches(&self, vm: VmId) -> Vec<Option<String>> {
        let s = self.state.lock().expect("state lock");
        s.adapters
            .get(&vm)
            .map(|a| a.iter().map(|n| n.switch.clone()).collect())
            .unwrap_or_default()
    }

    fn apply_fixes(state: &mut State, vm: VmId, fixes: &[AdapterFix]) {
        if let Some(adapters) = state.adapters.get_mut(&vm) {
            for fix in fixes {
                for adapter in adapters.iter_mut().filter(|a| a.name == fix.adapter) {
                    adapter.switch = match &fix.choice {
                        SwitchChoice::Rebind(switch) => Some(switch.clone()),
                        SwitchChoice::Disconnect => None,
                    };
                }
            }
        }
    }

    fn compare_against(state: &State, destination: &HostName, vm: VmId) -> CompatibilityReport {
        let available: BTreeSet<&str> = state
            .hosts
            .get(destination)
            .map(|h| h.switches.iter().map(|s| s.name.as_str()).collect())
            .unwrap_or_default();
        let mut incompatibilities = Vec::new();
        if let Some(adapters) = state.adapters.get(&vm) {
            for adapter in adapters {
                if let Some(switch) = &adapter.switch {
                    if !available.contains(switch.as_str()) {
                        incompatibilities.push(Incompatibility::missing_switch(
                            adapter.name.clone(),
                            format!("switch '{switch}' not found"),
                        ));
                    }
                }
            }
        }
        CompatibilityReport::with_incompatibilities(incompatibilities)
    }
}

#[async_trait]
impl ComputeApi for FakeDatacenter {
    async fn get_vm(
        &self,
        host: &HostName,
        query: &VmQuery,
    ) -> Result<Option<VmRecord>, EngineError> {
        self.check("get_vm", host)?;
        let s = self.state.lock().expect("state lock");
        let Some(h) = s.hosts.get(host) else { return Ok(None) };
        Ok(match query {
            VmQuery::ById(id) => h.vms.get(id).cloned(),
            VmQuery::ByName(name) => h.vms.values().find(|r| &r.name == name).cloned(),
        })
    }

    async fn vm_paths(&self, host: &HostName, vm: VmId) -> Result<VmPathSet, EngineError> {
        self.check("vm_paths", host)?;
        let s = self.state.lock().expect("state lock");
        s.vm_paths
            .get(&vm)
            .cloned()
            .ok_or_else(|| EngineError::VmNotFound { vm: vm.to_string(), host: host.clone() })
    }

    async fn export_vm(
        &self,
        host: &HostName,
        vm: VmId,
        destination_root: &Path,
    ) -> Result<(), EngineError> {
        self.check("export_vm", host)?;
        let mut s = self.state.lock().expect("state lock");
        let record = s
            .hosts
            .get(host)
            .and_then(|h| h.vms.get(&vm))
            .cloned()
            .ok_or_else(|| EngineError::VmNotFound { vm: vm.to_string(), host: host.clone() })?;
        if record.state != VmState::Off {
            return Err(EngineError::Remote {
                host: host.clone(),
                detail: format!("cannot export VM in state {:?}", record.state),
            });
        }
        // Writing into the destination's share needs the trust grant.
        if !s.grants.iter().any(|(grantee, _)| grantee == host) {
            return Err(EngineError::Remote {
                host: host.clone(),
                detail: "access denied to destination share".to_owned(),
            });
        }
        let export_dir = destination_root.join(&record.name);
        s.fs.insert(export_dir.join("config.vmcx"));
        s.fs.insert(export_dir.join("disk0.vhdx"));
        Ok(())
    }

    async fn compare_import(
        &self,
        destination: &HostName,
        export_dir: &Path,
        plan: &MigrationPlan,
    ) -> Result<Comparison, EngineError> {
        self.check("compare_import", destination)?;
        let mut s = self.state.lock().expect("state lock");
        if !s.fs.iter().any(|p| p.starts_with(export_dir)) {
            return Err(EngineError::Remote {
                host: destination.clone(),
                detail: format!("no export found at {}", export_dir.display()),
            });
        }
        let report = Self::compare_against(&s, destination, plan.vm.id);
        let planned = VmRecord {
            id: plan.vm.id,
            name: plan.vm.name.clone(),
            state: VmState::Off,
            realization: Realization::Planned,
            start_action: StartAction::Nothing,
            snapshot_count: 0,
        };
        s.hosts
            .entry(destination.clone())
            .or_default()
            .vms
            .insert(plan.vm.id, planned.clone());
        Ok(Comparison { report, planned: Some(planned) })
    }

    async fn realize_import(
        &self,
        destination: &HostName,
        planned: VmId,
        fixes: &[AdapterFix],
    ) -> Result<VmRecord, EngineError> {
        self.check("realize_import", destination)?;
        let mut s = self.state.lock().expect("state lock");
        Self::apply_fixes(&mut s, planned, fixes);
        let record = s
            .hosts
            .get_mut(destination)
            .and_then(|h| h.vms.get_mut(&planned))
            .ok_or_else(|| EngineError::Remote {
                host: destination.clone(),
                detail: format!("planned VM {planned} is gone"),
            })?;
        record.realization = Realization::Realized;
        Ok(record.clone())
    }

    async fn compare_move(
        &self,
        source: &HostName,
        vm: VmId,
        plan: &MigrationPlan,
    ) -> Result<Comparison, EngineError> {
        self.check("compare_move", source)?;
        let s = self.state.lock().expect("state lock");
        let report = Self::compare_against(&s, &plan.destination_host, vm);
        Ok(Comparison { report, planned: None })
    }

    async fn move_vm(
        &self,
        source: &HostName,
        vm: VmId,
        plan: &MigrationPlan,
        fixes: &[AdapterFix],
    ) -> Result<VmRecord, EngineError> {
        self.check("move_vm", source)?;
        let mut s = self.state.lock().expect("state lock");
        let record = s
            .hosts
            .get_mut(source)
            .and_then(|h| h.vms.remove(&vm))
            .ok_or_else(|| EngineError::VmNotFound { vm: vm.to_string(), host: source.clone() })?;
        Self::apply_fixes(&mut s, vm, fixes);
        s.hosts
            .entry(plan.destination_host.clone())
            .or_default()
            .vms
            .insert(vm, record.clone());
        Ok(record)
    }

    async fn stop_vm(&self, host: &HostName, vm: VmId) -> Result<(), EngineError> {
        self.check("stop_vm", host)?;
        let mut s = self.state.lock().expect("state lock");
        if let Some(record) = s.hosts.get_mut(host).and_then(|h| h.vms.get_mut(&vm)) {
            record.state = VmState::Off;
        }
        Ok(())
    }

    async fn start_vm(&self, host: &HostName, vm: VmId) -> Result<(), EngineError> {
        self.check("start_vm", host)?;
        let mut s = self.state.lock().expect("state lock");
        if let Some(record) = s.hosts.get_mut(host).and_then(|h| h.vms.get_mut(&vm)) {
            record.state = VmState::Running;
        }
        Ok(())
    }

    async fn remove_vm(&self, host: &HostName, vm: VmId) -> Result<(), EngineError> {
        if !self.check("remove_vm", host)? {
            // Stalled: pretend success, remove nothing.
            return Ok(());
        }
        let mut s = self.state.lock().expect("state lock");
        if let Some(h) = s.hosts.get_mut(host) {
            h.vms.remove(&vm);
        }
        Ok(())
    }

    async fn set_start_action(
        &self,
        host: &HostName,
        vm: VmId,
        action: StartAction,
    ) -> Result<(), EngineError> {
        self.check("set_start_action", host)?;
        let mut s = self.state.lock().expect("state lock");
        if let Some(record) = s.hosts.get_mut(host).and_then(|h| h.vms.get_mut(&vm)) {
            record.start_action = action;
        }
        Ok(())
    }

    async fn list_switches(&self, host: &HostName) -> Result<Vec<VirtualSwitch>, EngineError> {
        self.check("list_switches", host)?;
        let s = self.state.lock().expect("state lock");
        Ok(s.hosts.get(host).map(|h| h.switches.clone()).unwrap_or_default())
    }
}

#[async_trait]
impl ClusterApi for FakeDatacenter {
    async fn cluster_name(&self, host: &HostName) -> Result<Option<String>, EngineError> {
        self.check("cluster_name", host)?;
        let s = self.state.lock().expect("state lock");
        Ok(s.hosts.get(host).and_then(|h| h.cluster.clone()))
    }

    async fn nodes(&self, cluster: &str) -> Result<Vec<HostName>, EngineError> {
        let s = self.state.lock().expect("state lock");
        Ok(s.clusters.get(cluster).map(|c| c.nodes.clone()).unwrap_or_default())
    }

    async fn owner_node(&self, cluster: &str, vm: VmId) -> Result<Option<HostName>, EngineError> {
        let s = self.state.lock().expect("state lock");
        Ok(s.clusters
            .get(cluster)
            .and_then(|c| c.groups.get(&vm))
            .map(|(owner, _)| owner.clone()))
    }

    async fn group_priority(&self, cluster: &str, vm: VmId) -> Result<Option<u32>, EngineError> {
        let s = self.state.lock().expect("state lock");
        Ok(s.clusters
            .get(cluster)
            .and_then(|c| c.groups.get(&vm))
            .map(|(_, priority)| *priority))
    }

    async fn add_vm_role(
        &self,
        cluster: &str,
        vm: VmId,
        priority: Option<u32>,
    ) -> Result<(), EngineError> {
        let mut s = self.state.lock().expect("state lock");
        // The role lands on whichever node currently hosts the VM.
        let owner = s
            .hosts
            .iter()
            .find(|(_, h)| h.vms.contains_key(&vm))
            .map(|(name, _)| name.clone());
        if let (Some(c), Some(owner)) = (s.clusters.get_mut(cluster), owner) {
            c.groups.insert(vm, (owner, priority.unwrap_or(1000)));
        }
        Ok(())
    }

    async fn remove_group(
        &self,
        cluster: &str,
        vm: VmId,
        _remove_resources: bool,
    ) -> Result<(), EngineError> {
        if !self.check("remove_group", &HostName::new("cluster"))? {
            return Ok(());
        }
        let mut s = self.state.lock().expect("state lock");
        if let Some(c) = s.clusters.get_mut(cluster) {
            c.groups.remove(&vm);
        }
        Ok(())
    }

    async fn shared_volumes(&self, cluster: &str) -> Result<Vec<SharedVolume>, EngineError> {
        let s = self.state.lock().expect("state lock");
        Ok(s.clusters.get(cluster).map(|c| c.volumes.clone()).unwrap_or_default())
    }
}

#[async_trait]
impl StorageApi for FakeDatacenter {
    async fn path_exists(&self, host: &HostName, path: &Path) -> Result<bool, EngineError> {
        self.check("path_exists", host)?;
        let s = self.state.lock().expect("state lock");
        Ok(s.fs.iter().any(|p| p == path || p.starts_with(path)))
    }

    async fn create_dir(&self, host: &HostName, path: &Path) -> Result<(), EngineError> {
        self.check("create_dir", host)?;
        let mut s = self.state.lock().expect("state lock");
        s.fs.insert(path.to_path_buf());
        Ok(())
    }

    async fn remove_path(&self, host: &HostName, path: &Path) -> Result<(), EngineError> {
        self.check("remove_path", host)?;
        let mut s = self.state.lock().expect("state lock");
        s.fs.retain(|p| !(p == path || p.starts_with(path)));
        Ok(())
    }

    async fn list_children(
        &self,
        host: &HostName,
        path: &Path,
        filter: &ChildFilter,
    ) -> Result<Vec<PathBuf>, EngineError> {
        self.check("list_children", host)?;
        let s = self.state.lock().expect("state lock");
        Ok(s.fs
            .iter()
            .filter(|p| p.parent() == Some(path))
            .filter(|p| match &filter.name_contains {
                Some(needle) => p
                    .file_name()
                    .is_some_and(|n| n.to_string_lossy().contains(needle.as_str())),
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn resolve_unc(&self, host: &HostName, path: &Path) -> Result<PathBuf, EngineError> {
        self.check("resolve_unc", host)?;
        Ok(path.to_path_buf())
    }
}

#[async_trait]
impl TrustApi for FakeDatacenter {
    async fn grant(&self, grantee: &HostName, on: &HostName) -> Result<(), EngineError> {
        self.check("grant", on)?;
        let mut s = self.state.lock().expect("state lock");
        s.grants.push((grantee.clone(), on.clone()));
        Ok(())
    }

    async fn revoke(&self, grantee: &HostName, on: &HostName) -> Result<(), EngineError> {
        self.check("revoke", on)?;
        let mut s = self.state.lock().expect("state lock");
        s.grants.retain(|(g, o)| !(g == grantee && o == on));
        Ok(())
    }
}

/// Event sink collecting into a vector for assertions.
#[derive(Default)]
pub struct CollectSink {
    events: Mutex<Vec<MigrationEvent>>,
}

impl CollectSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<MigrationEvent> {
        self.events.lock().expect("event lock").clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                MigrationEvent::Warning { message } => Some(message),
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for CollectSink {
    fn emit(&self, event: &MigrationEvent) {
        self.events.lock().expect("event lock").push(event.clone());
    }
}
