use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A host's cluster participation, fetched fresh per migration attempt.
///
/// Never cached across runs — cluster membership can change between
/// migrations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct HostClusterInfo {
    /// Whether the host participates in a cluster at all. Absence of a
    /// cluster service is not an error.
    pub is_clustered: bool,
    /// The cluster's name, if clustered.
    pub cluster_name: Option<String>,
    /// Root paths of the shared volumes the cluster exposes.
    pub shared_volume_paths: BTreeSet<PathBuf>,
}

impl HostClusterInfo {
    /// Info for a host that is not a cluster member.
    #[must_use]
    pub fn standalone() -> Self {
        Self {
            is_clustered: false,
            cluster_name: None,
            shared_volume_paths: BTreeSet::new(),
        }
    }

    /// Info for a cluster member.
    pub fn clustered(
        cluster_name: impl Into<String>,
        shared_volume_paths: impl IntoIterator<Item = PathBuf>,
    ) -> Self {
        Self {
            is_clustered: true,
            cluster_name: Some(cluster_name.into()),
            shared_volume_paths: shared_volume_paths.into_iter().collect(),
        }
    }

    /// Returns the shared volume a path lands on, if any.
    ///
    /// Longest-prefix match, so nested volume mounts resolve to the most
    /// specific volume.
    #[must_use]
    pub fn shared_volume_for(&self, path: &Path) -> Option<&Path> {
        self.shared_volume_paths
            .iter()
            .filter(|volume| path.starts_with(volume))
            .max_by_key(|volume| volume.components().count())
            .map(PathBuf::as_path)
    }
}
