use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Every filesystem path a VM's identity touches on one host.
///
/// Used symmetrically: "does the VM still exist on disk here" and "what
/// must be deleted on the losing host" walk the same set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmPathSet {
    /// Directory holding the VM's configuration files.
    pub configuration_root: PathBuf,
    /// Checkpoint file location.
    pub checkpoint_path: PathBuf,
    /// Smart-paging file location.
    pub smart_paging_path: PathBuf,
    /// Snapshot file location.
    pub snapshot_path: PathBuf,
    /// Each virtual disk file.
    pub vhd_paths: Vec<PathBuf>,
}

impl VmPathSet {
    /// Builds a path set rooted at a single directory, the common layout
    /// when all VM files live under one folder.
    pub fn rooted_at(root: impl Into<PathBuf>, vhd_paths: Vec<PathBuf>) -> Self {
        let root = root.into();
        Self {
            configuration_root: root.clone(),
            checkpoint_path: root.clone(),
            smart_paging_path: root.clone(),
            snapshot_path: root,
            vhd_paths,
        }
    }

    /// Every directory that may hold remnants of this VM: the four
    /// configuration locations plus each disk's parent directory.
    #[must_use]
    pub fn folders(&self) -> BTreeSet<PathBuf> {
        let mut folders: BTreeSet<PathBuf> = [
            &self.configuration_root,
            &self.checkpoint_path,
            &self.smart_paging_path,
            &self.snapshot_path,
        ]
        .into_iter()
        .cloned()
        .collect();
        for vhd in &self.vhd_paths {
            if let Some(parent) = vhd.parent() {
                folders.insert(parent.to_path_buf());
            }
        }
        folders
    }

    /// Every individual path in the set, files and directories alike.
    #[must_use]
    pub fn all_paths(&self) -> BTreeSet<PathBuf> {
        let mut paths = self.folders();
        paths.extend(self.vhd_paths.iter().cloned());
        paths
    }

    /// Returns `true` if the given path belongs to this set.
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.all_paths().iter().any(|p| p == path)
    }
}
