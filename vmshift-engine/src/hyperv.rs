//! Hyper-V backend.
//!
//! Drives the hypervisor, the failover-cluster service, the remote
//! filesystem, and local-group trust through PowerShell commands executed
//! over the session broker. Structured data crosses the wire as
//! `ConvertTo-Json -Compress` output and is deserialized into small DTOs
//! here; nothing else in the engine sees PowerShell.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use vmshift_core::{
    CompatibilityReport, HostName, Incompatibility, MigrationPlan, Realization, StartAction,
    VmId, VmPathSet, VmState,
};

use crate::api::{
    ChildFilter, ClusterApi, Comparison, ComputeApi, SharedVolume, StorageApi, SwitchKind,
    TrustApi, VirtualSwitch, VmQuery, VmRecord,
};
use crate::broker::{CommandSpec, SessionBroker};
use crate::error::EngineError;
use crate::resolver::{AdapterFix, SwitchChoice};

/// Platform message identifier for "virtual switch not found".
const MSG_ID_MISSING_SWITCH: u32 = 33012;

/// All four collaborator APIs, backed by PowerShell over remote sessions.
#[derive(Clone)]
pub struct HyperVApi {
    broker: Arc<SessionBroker>,
}

impl HyperVApi {
    /// Creates a backend over the given session broker.
    #[must_use]
    pub fn new(broker: Arc<SessionBroker>) -> Self {
        Self { broker }
    }

    /// Run one PowerShell script on `host` and return its stdout.
    ///
    /// # Errors
    /// [`EngineError::Remote`] on a non-zero exit, carrying the script's
    /// stderr.
    async fn run_ps(&self, host: &HostName, script: &str) -> Result<String, EngineError> {
        let command = CommandSpec::new("powershell.exe")
            .arg("-NoProfile")
            .arg("-NonInteractive")
            .arg("-Command")
            .arg(script);
        let output = self.broker.execute(host, &command).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            let detail = if output.stderr.trim().is_empty() {
                format!("exit code {}", output.exit_code)
            } else {
                output.stderr.trim().to_owned()
            };
            Err(EngineError::Remote { host: host.clone(), detail })
        }
    }

    /// Like [`Self::run_ps`] but parses the JSON stdout; empty output maps
    /// to `None`.
    async fn run_ps_json<T: for<'de> Deserialize<'de>>(
        &self,
        host: &HostName,
        script: &str,
    ) -> Result<Option<T>, EngineError> {
        let stdout = self.run_ps(host, script).await?;
        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(trimmed)?))
    }

    /// The selection clause locating a VM for `Get-VM`.
    fn selector(query: &VmQuery) -> String {
        match query {
            VmQuery::ById(id) => format!("-Id '{id}'"),
            VmQuery::ByName(name) => format!("-Name {}", quote(name)),
        }
    }

    /// Apply adapter fixes to a realized VM, right after an import or a
    /// live move.
    async fn apply_fixes_directly(
        &self,
        host: &HostName,
        vm: VmId,
        fixes: &[AdapterFix],
    ) -> Result<(), EngineError> {
        for fix in fixes {
            let adapter = quote(&fix.adapter);
            let script = match &fix.choice {
                SwitchChoice::Rebind(switch) => format!(
                    "$ErrorActionPreference = 'Stop'\n\
                     Get-VMNetworkAdapter -VM (Get-VM -Id '{vm}') | Where-Object Name -eq {adapter} | \
                     Connect-VMNetworkAdapter -SwitchName {}",
                    quote(switch)
                ),
                SwitchChoice::Disconnect => format!(
                    "$ErrorActionPreference = 'Stop'\n\
                     Get-VMNetworkAdapter -VM (Get-VM -Id '{vm}') | Where-Object Name -eq {adapter} | \
                     Disconnect-VMNetworkAdapter"
                ),
            };
            self.run_ps(host, &script).await?;
        }
        Ok(())
    }

    /// Locate the VM's cluster resource by its VM identifier. Cluster
    /// groups are named after the VM's display name, which is not unique;
    /// the `VmId` resource parameter is.
    fn group_lookup(cluster: &str, vm: VmId) -> String {
        format!(
            "$res = Get-ClusterResource -Cluster {cluster} | \
             Where-Object ResourceType -eq 'Virtual Machine' | \
             Where-Object {{ ($_ | Get-ClusterParameter -Name VmId).Value -eq '{vm}' }} | \
             Select-Object -First 1\n",
            cluster = quote(cluster)
        )
    }
}

/// Single-quote a value for embedding in PowerShell.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn quote_path(path: &Path) -> String {
    quote(&path.display().to_string())
}

fn parse_state(raw: &str) -> VmState {
    // Transitional states report as e.g. "RunningCritical"; the leading
    // word is what matters.
    if raw.starts_with("Running") {
        VmState::Running
    } else if raw.starts_with("Paused") {
        VmState::Paused
    } else if raw.starts_with("Saved") {
        VmState::Saved
    } else {
        VmState::Off
    }
}

fn parse_start_action(raw: &str) -> StartAction {
    match raw {
        "Start" => StartAction::Start,
        "StartIfRunning" => StartAction::StartIfRunning,
        _ => StartAction::Nothing,
    }
}

fn start_action_keyword(action: StartAction) -> &'static str {
    match action {
        StartAction::Nothing => "Nothing",
        StartAction::StartIfRunning => "StartIfRunning",
        StartAction::Start => "Start",
    }
}

/// `ConvertTo-Json` emits a bare object for a single element and an array
/// otherwise; accept both.
fn parse_list<T: for<'de> Deserialize<'de>>(raw: &str) -> Result<Vec<T>, EngineError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        Ok(serde_json::from_str(trimmed)?)
    } else {
        Ok(vec![serde_json::from_str(trimmed)?])
    }
}

// ── Wire DTOs ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VmDto {
    id: VmId,
    name: String,
    state: String,
    planned: bool,
    start_action: String,
    snapshot_count: u32,
}

impl VmDto {
    fn into_record(self) -> VmRecord {
        VmRecord {
            id: self.id,
            name: self.name,
            state: parse_state(&self.state),
            realization: if self.planned { Realization::Planned } else { Realization::Realized },
            start_action: parse_start_action(&self.start_action),
            snapshot_count: self.snapshot_count,
        }
    }
}

/// Emits a [`VmDto`] JSON object for `$vm`, covering planned VMs too.
const VM_DTO_PROJECTION: &str = "[pscustomobject]@{ \
     Id = [string]$vm.Id; Name = $vm.Name; State = [string]$vm.State; \
     Planned = [bool]$planned; StartAction = [string]$vm.AutomaticStartAction; \
     SnapshotCount = if ($planned) { 0 } else { \
         @(Get-VMSnapshot -VM $vm -ErrorAction SilentlyContinue).Count } \
 } | ConvertTo-Json -Compress";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PathsDto {
    configuration: PathBuf,
    checkpoint: PathBuf,
    smart_paging: PathBuf,
    snapshot: PathBuf,
    #[serde(default)]
    vhds: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IncompatibilityDto {
    message_id: u32,
    message: String,
    adapter: Option<String>,
}

impl IncompatibilityDto {
    fn into_incompatibility(self) -> Incompatibility {
        match (self.message_id, self.adapter) {
            (MSG_ID_MISSING_SWITCH, Some(adapter)) => {
                Incompatibility::missing_switch(adapter, self.message)
            }
            (MSG_ID_MISSING_SWITCH, None) => Incompatibility {
                code: vmshift_core::IncompatibilityCode::MissingSwitch,
                message: self.message,
                adapter: None,
            },
            (code, _) => Incompatibility::unknown(code.to_string(), self.message),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ComparisonDto {
    planned: Option<VmDto>,
    #[serde(default)]
    incompatibilities: Vec<IncompatibilityDto>,
}

impl ComparisonDto {
    fn into_comparison(self) -> Comparison {
        Comparison {
            report: CompatibilityReport::with_incompatibilities(
                self.incompatibilities
                    .into_iter()
                    .map(IncompatibilityDto::into_incompatibility)
                    .collect(),
            ),
            planned: self.planned.map(VmDto::into_record),
        }
    }
}

/// Projects a `Compare-VM` report into a [`ComparisonDto`].
const COMPARISON_PROJECTION: &str = "$vm = $report.VM\n\
 [pscustomobject]@{ \
     Planned = if ($vm) { [pscustomobject]@{ \
         Id = [string]$vm.Id; Name = $vm.Name; State = [string]$vm.State; \
         Planned = $true; StartAction = [string]$vm.AutomaticStartAction; \
         SnapshotCount = 0 } } else { $null }; \
     Incompatibilities = @($report.Incompatibilities | ForEach-Object { \
         [pscustomobject]@{ \
             MessageId = $_.MessageId; Message = $_.Message; \
             Adapter = if ($_.Source -is [Microsoft.HyperV.PowerShell.VMNetworkAdapter]) { $_.Source.Name } else { $null } } }) \
 } | ConvertTo-Json -Compress -Depth 4";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SwitchDto {
    name: String,
    switch_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GroupDto {
    owner_node: String,
    priority: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VolumeDto {
    path: PathBuf,
    owner: String,
}

// ── ComputeApi ───────────────────────────────────────────────────────────────

#[async_trait]
impl ComputeApi for HyperVApi {
    async fn get_vm(
        &self,
        host: &HostName,
        query: &VmQuery,
    ) -> Result<Option<VmRecord>, EngineError> {
        let (selector, planned_match) = match query {
            VmQuery::ById(id) => (Self::selector(query), format!("$_.Name -eq '{id}'")),
            VmQuery::ByName(name) => {
                (Self::selector(query), format!("$_.ElementName -eq {}", quote(name)))
            }
        };
        // Planned VMs are invisible to Get-VM; they live in the
        // virtualization WMI namespace until realized or removed.
        let script = format!(
            "$ErrorActionPreference = 'Stop'\n\
             $planned = $false\n\
             $vm = Get-VM {selector} -ErrorAction SilentlyContinue | Select-Object -First 1\n\
             if ($null -eq $vm) {{\n\
                 $p = Get-CimInstance -Namespace root\\virtualization\\v2 \
                      -ClassName Msvm_PlannedComputerSystem -ErrorAction SilentlyContinue | \
                      Where-Object {{ {planned_match} }} | Select-Object -First 1\n\
                 if ($p) {{\n\
                     $planned = $true\n\
                     $vm = [pscustomobject]@{{ Id = $p.Name; Name = $p.ElementName; \
                           State = 'Off'; AutomaticStartAction = 'Nothing' }}\n\
                 }}\n\
             }}\n\
             if ($vm) {{ {VM_DTO_PROJECTION} }}"
        );
        let dto: Option<VmDto> = self.run_ps_json(host, &script).await?;
        Ok(dto.map(VmDto::into_record))
    }

    async fn vm_paths(&self, host: &HostName, vm: VmId) -> Result<VmPathSet, EngineError> {
        let script = format!(
            "$ErrorActionPreference = 'Stop'\n\
             $vm = Get-VM -Id '{vm}'\n\
             [pscustomobject]@{{ \
                 Configuration = $vm.ConfigurationLocation; \
                 Checkpoint = $vm.CheckpointFileLocation; \
                 SmartPaging = $vm.SmartPagingFilePath; \
                 Snapshot = $vm.SnapshotFileLocation; \
                 Vhds = @(Get-VMHardDiskDrive -VM $vm | Select-Object -ExpandProperty Path) \
             }} | ConvertTo-Json -Compress"
        );
        let dto: PathsDto = self
            .run_ps_json(host, &script)
            .await?
            .ok_or_else(|| EngineError::VmNotFound { vm: vm.to_string(), host: host.clone() })?;
        Ok(VmPathSet {
            configuration_root: dto.configuration,
            checkpoint_path: dto.checkpoint,
            smart_paging_path: dto.smart_paging,
            snapshot_path: dto.snapshot,
            vhd_paths: dto.vhds,
        })
    }

    async fn export_vm(
        &self,
        host: &HostName,
        vm: VmId,
        destination_root: &Path,
    ) -> Result<(), EngineError> {
        let script = format!(
            "$ErrorActionPreference = 'Stop'\n\
             Export-VM -VM (Get-VM -Id '{vm}') -Path {}",
            quote_path(destination_root)
        );
        self.run_ps(host, &script).await?;
        Ok(())
    }

    async fn compare_import(
        &self,
        destination: &HostName,
        export_dir: &Path,
        plan: &MigrationPlan,
    ) -> Result<Comparison, EngineError> {
        let storage = plan
            .destination_storage_path
            .as_ref()
            .map(|p| {
                format!(
                    " -VirtualMachinePath {root} -VhdDestinationPath {root}",
                    root = quote_path(p)
                )
            })
            .unwrap_or_default();
        let script = format!(
            "$ErrorActionPreference = 'Stop'\n\
             $config = Get-ChildItem -LiteralPath {dir} -Recurse -Filter *.vmcx | Select-Object -First 1\n\
             if ($null -eq $config) {{ throw \"no VM configuration found under {dir_raw}\" }}\n\
             $report = Compare-VM -Path $config.FullName -Copy -GenerateNewId:$false{storage}\n\
             {COMPARISON_PROJECTION}",
            dir = quote_path(export_dir),
            dir_raw = export_dir.display(),
        );
        let dto: ComparisonDto = self
            .run_ps_json(destination, &script)
            .await?
            .ok_or_else(|| EngineError::Remote {
                host: destination.clone(),
                detail: "compare produced no report".to_owned(),
            })?;
        Ok(dto.into_comparison())
    }

    async fn realize_import(
        &self,
        destination: &HostName,
        planned: VmId,
        fixes: &[AdapterFix],
    ) -> Result<VmRecord, EngineError> {
        // The planned system materialized by the comparison step is turned
        // into a real VM through the virtualization management service.
        let script = format!(
            "$ErrorActionPreference = 'Stop'\n\
             $p = Get-CimInstance -Namespace root\\virtualization\\v2 \
                  -ClassName Msvm_PlannedComputerSystem | \
                  Where-Object {{ $_.Name -eq '{planned}' }} | Select-Object -First 1\n\
             if ($null -eq $p) {{ throw 'planned VM {planned} is gone' }}\n\
             $svc = Get-CimInstance -Namespace root\\virtualization\\v2 \
                    -ClassName Msvm_VirtualSystemManagementService\n\
             Invoke-CimMethod -InputObject $svc -MethodName RealizePlannedSystem \
             -Arguments @{{ PlannedSystem = $p }} | Out-Null"
        );
        self.run_ps(destination, &script).await?;

        // Adapter fixes land on the realized VM before it is handed back.
        self.apply_fixes_directly(destination, planned, fixes).await?;

        self.get_vm(destination, &VmQuery::ById(planned))
            .await?
            .ok_or_else(|| EngineError::Remote {
                host: destination.clone(),
                detail: format!("VM {planned} not enumerable after realization"),
            })
    }

    async fn compare_move(
        &self,
        source: &HostName,
        vm: VmId,
        plan: &MigrationPlan,
    ) -> Result<Comparison, EngineError> {
        let storage = plan
            .destination_storage_path
            .as_ref()
            .map(|p| {
                format!(" -IncludeStorage -DestinationStoragePath {}", quote_path(p))
            })
            .unwrap_or_default();
        let script = format!(
            "$ErrorActionPreference = 'Stop'\n\
             $report = Compare-VM -VM (Get-VM -Id '{vm}') -DestinationHost {dest}{storage}\n\
             {COMPARISON_PROJECTION}",
            dest = quote(plan.destination_host.as_str()),
        );
        let dto: ComparisonDto = self
            .run_ps_json(source, &script)
            .await?
            .ok_or_else(|| EngineError::Remote {
                host: source.clone(),
                detail: "compare produced no report".to_owned(),
            })?;
        let mut comparison = dto.into_comparison();
        // A live-move comparison materializes nothing on the destination.
        comparison.planned = None;
        Ok(comparison)
    }

    async fn move_vm(
        &self,
        source: &HostName,
        vm: VmId,
        plan: &MigrationPlan,
        fixes: &[AdapterFix],
    ) -> Result<VmRecord, EngineError> {
        let storage = plan
            .destination_storage_path
            .as_ref()
            .map(|p| {
                format!(" -IncludeStorage -DestinationStoragePath {}", quote_path(p))
            })
            .unwrap_or_default();
        let script = format!(
            "$ErrorActionPreference = 'Stop'\n\
             Move-VM -VM (Get-VM -Id '{vm}') -DestinationHost {dest}{storage}",
            dest = quote(plan.destination_host.as_str()),
        );
        self.run_ps(source, &script).await?;

        // The move primitive has no fix hook of its own; adapters are
        // patched on the destination right after.
        self.apply_fixes_directly(&plan.destination_host, vm, fixes).await?;

        self.get_vm(&plan.destination_host, &VmQuery::ById(vm))
            .await?
            .ok_or_else(|| EngineError::VmNotFound {
                vm: vm.to_string(),
                host: plan.destination_host.clone(),
            })
    }

    async fn stop_vm(&self, host: &HostName, vm: VmId) -> Result<(), EngineError> {
        let script = format!(
            "$ErrorActionPreference = 'Stop'\nStop-VM -VM (Get-VM -Id '{vm}') -Force"
        );
        self.run_ps(host, &script).await?;
        Ok(())
    }

    async fn start_vm(&self, host: &HostName, vm: VmId) -> Result<(), EngineError> {
        let script = format!(
            "$ErrorActionPreference = 'Stop'\nStart-VM -VM (Get-VM -Id '{vm}')"
        );
        self.run_ps(host, &script).await?;
        Ok(())
    }

    async fn remove_vm(&self, host: &HostName, vm: VmId) -> Result<(), EngineError> {
        // Both representations must go; removing neither is still success.
        let script = format!(
            "$ErrorActionPreference = 'Stop'\n\
             $vm = Get-VM -Id '{vm}' -ErrorAction SilentlyContinue\n\
             if ($vm) {{ Remove-VM -VM $vm -Force }}\n\
             Get-CimInstance -Namespace root\\virtualization\\v2 \
             -ClassName Msvm_PlannedComputerSystem -ErrorAction SilentlyContinue | \
             Where-Object {{ $_.Name -eq '{vm}' }} | Remove-CimInstance"
        );
        self.run_ps(host, &script).await?;
        Ok(())
    }

    async fn set_start_action(
        &self,
        host: &HostName,
        vm: VmId,
        action: StartAction,
    ) -> Result<(), EngineError> {
        let script = format!(
            "$ErrorActionPreference = 'Stop'\n\
             Set-VM -VM (Get-VM -Id '{vm}') -AutomaticStartAction {}",
            start_action_keyword(action)
        );
        self.run_ps(host, &script).await?;
        Ok(())
    }

    async fn list_switches(&self, host: &HostName) -> Result<Vec<VirtualSwitch>, EngineError> {
        let script = "$ErrorActionPreference = 'Stop'\n\
             Get-VMSwitch | ForEach-Object { \
                 [pscustomobject]@{ Name = $_.Name; SwitchType = [string]$_.SwitchType } } | \
             ConvertTo-Json -Compress";
        let stdout = self.run_ps(host, script).await?;
        let dtos: Vec<SwitchDto> = parse_list(&stdout)?;
        Ok(dtos
            .into_iter()
            .map(|dto| VirtualSwitch {
                name: dto.name,
                kind: match dto.switch_type.as_str() {
                    "External" => SwitchKind::External,
                    "Private" => SwitchKind::Private,
                    _ => SwitchKind::Internal,
                },
            })
            .collect())
    }
}

// ── ClusterApi ───────────────────────────────────────────────────────────────

#[async_trait]
impl ClusterApi for HyperVApi {
    async fn cluster_name(&self, host: &HostName) -> Result<Option<String>, EngineError> {
        // No cluster service on the host is the standalone case, not a
        // fault.
        let script = "$c = Get-Cluster -ErrorAction SilentlyContinue\n\
             if ($c) { $c.Name }";
        let stdout = self.run_ps(host, script).await?;
        let name = stdout.trim();
        if name.is_empty() {
            Ok(None)
        } else {
            Ok(Some(name.to_owned()))
        }
    }

    async fn nodes(&self, cluster: &str) -> Result<Vec<HostName>, EngineError> {
        let script = format!(
            "$ErrorActionPreference = 'Stop'\n\
             Get-ClusterNode -Cluster {} | Select-Object -ExpandProperty Name | ConvertTo-Json -Compress",
            quote(cluster)
        );
        let stdout = self.run_ps(self.broker.local_host(), &script).await?;
        let names: Vec<String> = parse_list(&stdout)?;
        Ok(names.into_iter().map(HostName::new).collect())
    }

    async fn owner_node(&self, cluster: &str, vm: VmId) -> Result<Option<HostName>, EngineError> {
        let script = format!(
            "$ErrorActionPreference = 'Stop'\n\
             {lookup}\
             if ($res) {{ \
                 $g = $res.OwnerGroup\n\
                 [pscustomobject]@{{ OwnerNode = [string]$g.OwnerNode; Priority = [int]$g.Priority }} | \
                 ConvertTo-Json -Compress }}",
            lookup = Self::group_lookup(cluster, vm),
        );
        let dto: Option<GroupDto> = self.run_ps_json(self.broker.local_host(), &script).await?;
        Ok(dto.map(|g| HostName::new(g.owner_node)))
    }

    async fn group_priority(&self, cluster: &str, vm: VmId) -> Result<Option<u32>, EngineError> {
        let script = format!(
            "$ErrorActionPreference = 'Stop'\n\
             {lookup}\
             if ($res) {{ \
                 $g = $res.OwnerGroup\n\
                 [pscustomobject]@{{ OwnerNode = [string]$g.OwnerNode; Priority = [int]$g.Priority }} | \
                 ConvertTo-Json -Compress }}",
            lookup = Self::group_lookup(cluster, vm),
        );
        let dto: Option<GroupDto> = self.run_ps_json(self.broker.local_host(), &script).await?;
        Ok(dto.map(|g| g.priority))
    }

    async fn add_vm_role(
        &self,
        cluster: &str,
        vm: VmId,
        priority: Option<u32>,
    ) -> Result<(), EngineError> {
        let set_priority = priority
            .map(|p| format!("\n$group.Priority = {p}"))
            .unwrap_or_default();
        let script = format!(
            "$ErrorActionPreference = 'Stop'\n\
             $group = Add-ClusterVirtualMachineRole -Cluster {cluster} -VMId '{vm}'{set_priority}",
            cluster = quote(cluster),
        );
        self.run_ps(self.broker.local_host(), &script).await?;
        Ok(())
    }

    async fn remove_group(
        &self,
        cluster: &str,
        vm: VmId,
        remove_resources: bool,
    ) -> Result<(), EngineError> {
        let resources_flag = if remove_resources { " -RemoveResources" } else { "" };
        let script = format!(
            "$ErrorActionPreference = 'Stop'\n\
             {lookup}\
             if ($res) {{ Remove-ClusterGroup -Cluster {cluster} -Name $res.OwnerGroup.Name \
             -Force{resources_flag} }}",
            lookup = Self::group_lookup(cluster, vm),
            cluster = quote(cluster),
        );
        self.run_ps(self.broker.local_host(), &script).await?;
        Ok(())
    }

    async fn shared_volumes(&self, cluster: &str) -> Result<Vec<SharedVolume>, EngineError> {
        let script = format!(
            "$ErrorActionPreference = 'Stop'\n\
             Get-ClusterSharedVolume -Cluster {} | ForEach-Object {{ \
                 [pscustomobject]@{{ \
                     Path = $_.SharedVolumeInfo.FriendlyVolumeName; \
                     Owner = [string]$_.OwnerNode }} }} | ConvertTo-Json -Compress",
            quote(cluster)
        );
        let stdout = self.run_ps(self.broker.local_host(), &script).await?;
        let dtos: Vec<VolumeDto> = parse_list(&stdout)?;
        Ok(dtos
            .into_iter()
            .map(|dto| SharedVolume { path: dto.path, owner: HostName::new(dto.owner) })
            .collect())
    }
}

// ── StorageApi ───────────────────────────────────────────────────────────────

#[async_trait]
impl StorageApi for HyperVApi {
    async fn path_exists(&self, host: &HostName, path: &Path) -> Result<bool, EngineError> {
        let script = format!("Test-Path -LiteralPath {}", quote_path(path));
        let stdout = self.run_ps(host, &script).await?;
        Ok(stdout.trim().eq_ignore_ascii_case("true"))
    }

    async fn create_dir(&self, host: &HostName, path: &Path) -> Result<(), EngineError> {
        // -Force makes an existing directory a no-op instead of an error.
        let script = format!(
            "$ErrorActionPreference = 'Stop'\n\
             New-Item -ItemType Directory -Path {} -Force | Out-Null",
            quote_path(path)
        );
        self.run_ps(host, &script).await?;
        Ok(())
    }

    async fn remove_path(&self, host: &HostName, path: &Path) -> Result<(), EngineError> {
        let script = format!(
            "$ErrorActionPreference = 'Stop'\n\
             if (Test-Path -LiteralPath {p}) {{ Remove-Item -LiteralPath {p} -Recurse -Force }}",
            p = quote_path(path)
        );
        self.run_ps(host, &script).await?;
        Ok(())
    }

    async fn list_children(
        &self,
        host: &HostName,
        path: &Path,
        filter: &ChildFilter,
    ) -> Result<Vec<PathBuf>, EngineError> {
        let recurse = if filter.recurse { " -Recurse" } else { "" };
        let name_filter = filter
            .name_contains
            .as_ref()
            .map(|n| format!(" -Filter {}", quote(&format!("*{n}*"))))
            .unwrap_or_default();
        let script = format!(
            "$ErrorActionPreference = 'Stop'\n\
             @(Get-ChildItem -LiteralPath {p}{recurse}{name_filter} | \
             Select-Object -ExpandProperty FullName) | ConvertTo-Json -Compress",
            p = quote_path(path),
        );
        let stdout = self.run_ps(host, &script).await?;
        parse_list(&stdout)
    }

    async fn resolve_unc(&self, host: &HostName, path: &Path) -> Result<PathBuf, EngineError> {
        to_admin_share(host, path)
    }
}

/// `c:\vms\...` on `host` becomes `\\host\c$\vms\...`; already-UNC paths
/// pass through unchanged.
fn to_admin_share(host: &HostName, path: &Path) -> Result<PathBuf, EngineError> {
    let raw = path.display().to_string();
    if raw.starts_with("\\\\") {
        return Ok(path.to_path_buf());
    }
    let mut chars = raw.chars();
    let drive = chars.next().filter(char::is_ascii_alphabetic);
    match (drive, chars.next()) {
        (Some(drive), Some(':')) => {
            let rest: String = chars.collect();
            Ok(PathBuf::from(format!(
                "\\\\{host}\\{}${rest}",
                drive.to_ascii_lowercase()
            )))
        }
        _ => Err(EngineError::Remote {
            host: host.clone(),
            detail: format!("path '{raw}' has no drive letter to share"),
        }),
    }
}

// ── TrustApi ─────────────────────────────────────────────────────────────────

#[async_trait]
impl TrustApi for HyperVApi {
    async fn grant(&self, grantee: &HostName, on: &HostName) -> Result<(), EngineError> {
        // The grantee's machine account; granting an existing member again
        // is a no-op.
        let member = quote(&format!("{}$", grantee.as_str().to_ascii_uppercase()));
        let script = format!(
            "$ErrorActionPreference = 'Stop'\n\
             if (-not (Get-LocalGroupMember -Group 'Administrators' -Member {member} \
             -ErrorAction SilentlyContinue)) {{ \
             Add-LocalGroupMember -Group 'Administrators' -Member {member} }}"
        );
        self.run_ps(on, &script).await?;
        Ok(())
    }

    async fn revoke(&self, grantee: &HostName, on: &HostName) -> Result<(), EngineError> {
        let member = quote(&format!("{}$", grantee.as_str().to_ascii_uppercase()));
        let script = format!(
            "$ErrorActionPreference = 'Stop'\n\
             if (Get-LocalGroupMember -Group 'Administrators' -Member {member} \
             -ErrorAction SilentlyContinue) {{ \
             Remove-LocalGroupMember -Group 'Administrators' -Member {member} }}"
        );
        self.run_ps(on, &script).await?;
        Ok(())
    }
}
