//! Cluster state inspector.
//!
//! Answers three questions about a host: does it participate in a cluster,
//! which node owns a given VM's resource group, and which shared volumes
//! does its cluster expose. Answers are fetched fresh per migration
//! attempt — cluster membership can change between runs, so nothing here
//! is cached.

use std::path::Path;

use vmshift_core::{HostClusterInfo, HostName, VmId};

use crate::api::{ClusterApi, SharedVolume};
use crate::error::EngineError;

/// Thin, stateless wrapper over the cluster resource manager.
pub struct ClusterInspector<'a> {
    api: &'a dyn ClusterApi,
}

impl<'a> ClusterInspector<'a> {
    /// Creates an inspector over the given cluster API.
    #[must_use]
    pub fn new(api: &'a dyn ClusterApi) -> Self {
        Self { api }
    }

    /// The host's cluster participation. A host with no cluster service is
    /// standalone, not an error.
    ///
    /// # Errors
    /// Propagates faults from the cluster resource manager.
    pub async fn host_info(&self, host: &HostName) -> Result<HostClusterInfo, EngineError> {
        match self.api.cluster_name(host).await? {
            None => Ok(HostClusterInfo::standalone()),
            Some(cluster) => {
                let volumes = self.api.shared_volumes(&cluster).await?;
                Ok(HostClusterInfo::clustered(
                    cluster,
                    volumes.into_iter().map(|v| v.path),
                ))
            }
        }
    }

    /// The node currently hosting the VM's cluster resource group, or
    /// `None` if the VM has no group.
    pub async fn owner_of(
        &self,
        cluster: &str,
        vm: VmId,
    ) -> Result<Option<HostName>, EngineError> {
        self.api.owner_node(cluster, vm).await
    }

    /// The shared volume a path lands on, with its owning node — `None`
    /// when the path is off every shared volume.
    ///
    /// Longest-prefix match, consistent with
    /// [`HostClusterInfo::shared_volume_for`].
    pub async fn volume_owner(
        &self,
        cluster: &str,
        path: &Path,
    ) -> Result<Option<SharedVolume>, EngineError> {
        let volumes = self.api.shared_volumes(cluster).await?;
        Ok(volumes
            .into_iter()
            .filter(|v| path.starts_with(&v.path))
            .max_by_key(|v| v.path.components().count()))
    }
}
