//! Splitting a capture across workers.
//!
//! `W = clamp(ceil(N / per_worker), 1, min(cap, N))`. The N snapshots are cut
//! into W contiguous core ranges, the remainder going to the earliest ones.
//! Each worker also sees one neighbouring snapshot on every open side so it
//! can line its section up with the next, but only owns its core.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::capture::{Capture, Snapshot};

/// What page chrome a worker is responsible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Only worker: header and footer
    Solo,
    /// Top of the page: navigation
    First,
    /// Neither
    Middle,
    /// Bottom of the page: footer
    Last,
}

impl Role {
    pub fn owns_navigation(self) -> bool {
        matches!(self, Role::Solo | Role::First)
    }

    pub fn owns_footer(self) -> bool {
        matches!(self, Role::Solo | Role::Last)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::Solo => "solo",
            Role::First => "first",
            Role::Middle => "middle",
            Role::Last => "last",
        };
        write!(f, "{}", s)
    }
}

/// One worker's share of the capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// 0-based worker index
    pub index: usize,
    pub workers: usize,
    pub role: Role,
    /// Absolute snapshot range the worker sees, overlap included
    pub slice: Range<usize>,
    /// Owned range, relative to `slice`
    pub core: Range<usize>,
}

impl Partition {
    /// 1-based number used in labels and prompts.
    pub fn number(&self) -> usize {
        self.index + 1
    }

    pub fn label(&self) -> String {
        format!("worker-{}", self.number())
    }

    /// Owned range in capture coordinates.
    pub fn core_absolute(&self) -> Range<usize> {
        self.slice.start + self.core.start..self.slice.start + self.core.end
    }

    pub fn has_overlap_before(&self) -> bool {
        self.core.start > 0
    }

    pub fn has_overlap_after(&self) -> bool {
        self.core.end < self.slice.len()
    }

    pub fn snapshots<'a>(&self, capture: &'a Capture) -> &'a [Snapshot] {
        let end = self.slice.end.min(capture.snapshots.len());
        let start = self.slice.start.min(end);
        &capture.snapshots[start..end]
    }
}

/// Number of workers for `n` snapshots.
pub fn worker_count(n: usize, per_worker: usize, cap: usize) -> usize {
    if n == 0 {
        return 0;
    }
    let wanted = n.div_ceil(per_worker.max(1));
    wanted.clamp(1, cap.max(1).min(n))
}

/// Partition `n` snapshots. Empty for `n == 0`.
pub fn partition(n: usize, per_worker: usize, cap: usize) -> Vec<Partition> {
    let workers = worker_count(n, per_worker, cap);
    if workers == 0 {
        return Vec::new();
    }

    let base = n / workers;
    let remainder = n % workers;

    let mut partitions = Vec::with_capacity(workers);
    let mut start = 0;
    for index in 0..workers {
        let size = base + usize::from(index < remainder);
        let core_abs = start..start + size;
        start += size;

        let slice_start = if index > 0 { core_abs.start - 1 } else { core_abs.start };
        let slice_end = if index + 1 < workers { core_abs.end + 1 } else { core_abs.end };

        let role = match (workers, index) {
            (1, _) => Role::Solo,
            (_, 0) => Role::First,
            (w, i) if i + 1 == w => Role::Last,
            _ => Role::Middle,
        };

        partitions.push(Partition {
            index,
            workers,
            role,
            slice: slice_start..slice_end,
            core: core_abs.start - slice_start..core_abs.end - slice_start,
        });
    }
    partitions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seven_snapshots_cap_five() {
        let parts = partition(7, 1, 5);
        let sizes: Vec<usize> = parts.iter().map(|p| p.core.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1, 1, 1]);

        assert_eq!(parts[0].role, Role::First);
        assert_eq!(parts[4].role, Role::Last);
        assert!(parts[1..4].iter().all(|p| p.role == Role::Middle));

        // single-snapshot overlaps on open boundaries only
        assert!(!parts[0].has_overlap_before());
        assert_eq!(parts[0].slice, 0..3);
        assert_eq!(parts[1].slice, 1..5);
        assert_eq!(parts[1].core, 1..3);
        assert!(!parts[4].has_overlap_after());
        assert_eq!(parts[4].slice, 5..7);
        assert_eq!(parts[4].core_absolute(), 6..7);
    }

    #[test]
    fn test_core_ranges_cover_exactly_once() {
        for n in 1..=40 {
            for per_worker in 1..=4 {
                for cap in 1..=8 {
                    let parts = partition(n, per_worker, cap);
                    assert!(parts.len() <= n);
                    let mut next = 0;
                    for p in &parts {
                        let core = p.core_absolute();
                        assert_eq!(core.start, next, "gap or overlap at n={} cap={}", n, cap);
                        assert!(!core.is_empty());
                        assert!(p.slice.start <= core.start && core.end <= p.slice.end);
                        assert!(p.slice.len() <= core.len() + 2);
                        next = core.end;
                    }
                    assert_eq!(next, n);
                }
            }
        }
    }

    #[test]
    fn test_single_snapshot_is_solo_without_overlap() {
        let parts = partition(1, 1, 5);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].role, Role::Solo);
        assert_eq!(parts[0].slice, 0..1);
        assert!(parts[0].role.owns_navigation() && parts[0].role.owns_footer());
    }

    #[test]
    fn test_fewer_snapshots_than_cap() {
        assert_eq!(worker_count(3, 1, 5), 3);
        assert_eq!(worker_count(9, 2, 5), 5);
        assert_eq!(worker_count(4, 2, 5), 2);
        assert_eq!(worker_count(0, 1, 5), 0);
    }
}
