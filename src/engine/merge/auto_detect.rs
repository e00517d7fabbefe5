use std::path::{Path, PathBuf};
use sysinfo::{DiskKind, Disks};
use tracing::debug;

/// Merges allowed to queue beyond the running threads before producers stall.
pub const EXTRA_QUEUED_MERGES: usize = 5;
/// Thread ceiling for non-rotational storage.
pub const MAX_DETECTED_THREADS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectedLimits {
    pub max_merge_count: usize,
    pub max_thread_count: usize,
    pub spins: bool,
}

/// Picks concurrency bounds for the machine and the disk holding `index_dir`.
pub fn detect(index_dir: Option<&Path>) -> DetectedLimits {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    let spins = index_dir.map(is_on_rotational_disk).unwrap_or(false);
    let limits = limits_for(cpus, spins);
    debug!(
        target: "snel_merge::auto_detect",
        cpus,
        spins,
        max_thread_count = limits.max_thread_count,
        max_merge_count = limits.max_merge_count,
        "Detected merge limits"
    );
    limits
}

/// Rotational disks get a single merge thread; seeks from concurrent merges
/// hurt more than they help there.
pub fn limits_for(cpus: usize, spins: bool) -> DetectedLimits {
    let max_thread_count = if spins {
        1
    } else {
        (cpus / 2).clamp(1, MAX_DETECTED_THREADS)
    };
    DetectedLimits {
        max_merge_count: max_thread_count + EXTRA_QUEUED_MERGES,
        max_thread_count,
        spins,
    }
}

pub fn is_on_rotational_disk(path: &Path) -> bool {
    let disks = Disks::new_with_refreshed_list();
    let mounts: Vec<(PathBuf, DiskKind)> = disks
        .list()
        .iter()
        .map(|disk| (disk.mount_point().to_path_buf(), disk.kind()))
        .collect();
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    rotational_for(&path, &mounts)
}

/// Uses the most specific mount containing `path`. Unknown kinds count as
/// non-rotational.
pub fn rotational_for(path: &Path, mounts: &[(PathBuf, DiskKind)]) -> bool {
    mounts
        .iter()
        .filter(|(mount, _)| path.starts_with(mount))
        .max_by_key(|(mount, _)| mount.components().count())
        .map(|(_, kind)| matches!(kind, DiskKind::HDD))
        .unwrap_or(false)
}
