//! Delta-chain planning.
//!
//! Planning builds a small directed graph over the versions present in
//! the feed: delta entries are `base -> version` edges, and every
//! full-package entry is an edge usable from anywhere (a client with no
//! usable installed version, or one for which restarting from a full
//! package is cheaper than chaining deltas). The graph lives only for the
//! duration of one `plan` call.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use rollout_schema::{Feed, ReleaseEntry};
use semver::Version;
use tracing::debug;

/// Whether delta entries may participate in planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaPolicy {
    /// Use deltas whenever they are cheaper.
    Allow,
    /// Restrict the plan to a single full package.
    FullOnly,
}

/// Errors that can occur during planning.
#[derive(thiserror::Error, Debug)]
pub enum PlanError {
    /// The target has no full entry and no delta path reaches it.
    ///
    /// Non-retryable until the feed changes.
    #[error("no update path to version {target} exists in the feed")]
    NoPath {
        /// The unreachable target version.
        target: Version,
    },
}

/// The ordered sequence of artifacts to download and apply.
///
/// Immutable after creation; consumed once by the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePlan {
    entries: Vec<ReleaseEntry>,
    target_version: Version,
    is_full_package: bool,
}

impl UpdatePlan {
    /// The artifacts to fetch, in application order.
    pub fn entries(&self) -> &[ReleaseEntry] {
        &self.entries
    }

    /// The version this plan produces.
    pub fn target_version(&self) -> &Version {
        &self.target_version
    }

    /// True when the plan is a single full-package entry.
    pub fn is_full_package(&self) -> bool {
        self.is_full_package
    }

    /// Total bytes to download.
    pub fn total_download_size(&self) -> u64 {
        self.entries.iter().map(|e| e.file_size).sum()
    }
}

/// Compute the cheapest sequence of artifacts taking `installed` to
/// `target`.
///
/// Cost is total download size; equal-cost paths are broken toward fewer
/// hops (fewer round trips). An absent `installed` version restricts the
/// start to full-package entries.
///
/// # Errors
///
/// Returns [`PlanError::NoPath`] when `target` is unreachable.
pub fn plan(
    feed: &Feed,
    installed: Option<&Version>,
    target: &Version,
    policy: DeltaPolicy,
) -> Result<UpdatePlan, PlanError> {
    let no_path = || PlanError::NoPath {
        target: target.clone(),
    };

    // Intern every version we may touch as a node index.
    let mut index: HashMap<&Version, usize> = HashMap::new();
    for entry in feed.entries() {
        intern(&mut index, &entry.name.version);
        if let Some(base) = entry.name.delta_base() {
            intern(&mut index, base);
        }
    }
    if let Some(v) = installed {
        intern(&mut index, v);
    }
    let Some(&target_node) = index.get(target) else {
        return Err(no_path());
    };
    let node_count = index.len();

    // Delta adjacency, built in feed order for deterministic ties.
    let mut deltas: Vec<Vec<(usize, &ReleaseEntry)>> = vec![Vec::new(); node_count];
    if policy == DeltaPolicy::Allow {
        for (base, version, entry) in feed.delta_edges() {
            deltas[index[base]].push((index[version], entry));
        }
    }

    // Path cost ordered as (size, hops): Dijkstra with a lexicographic key.
    let mut best: Vec<Option<(u64, u32)>> = vec![None; node_count];
    let mut pred: Vec<Option<(Option<usize>, &ReleaseEntry)>> = vec![None; node_count];
    let mut heap = BinaryHeap::new();

    if let Some(v) = installed {
        seed(index[v], (0, 0), None, &mut best, &mut pred, &mut heap);
    }
    // Full packages are reachable from anywhere; since the virtual start
    // costs zero, seeding them directly is equivalent.
    for entry in feed.entries() {
        if !entry.is_delta() {
            let node = index[&entry.name.version];
            seed(
                node,
                (entry.file_size, 1),
                Some((None, entry)),
                &mut best,
                &mut pred,
                &mut heap,
            );
        }
    }

    while let Some(Reverse((size, hops, node))) = heap.pop() {
        if best[node] != Some((size, hops)) {
            continue;
        }
        if node == target_node {
            break;
        }
        for &(next, entry) in &deltas[node] {
            let cost = (size + entry.file_size, hops + 1);
            if best[next].is_none_or(|b| cost < b) {
                best[next] = Some(cost);
                pred[next] = Some((Some(node), entry));
                heap.push(Reverse((cost.0, cost.1, next)));
            }
        }
    }

    best[target_node].ok_or_else(no_path)?;

    let mut entries = Vec::new();
    let mut node = target_node;
    while let Some((prev, entry)) = pred[node] {
        entries.push(entry.clone());
        match prev {
            Some(p) => node = p,
            None => break,
        }
    }
    entries.reverse();

    let is_full_package = entries.len() == 1 && !entries[0].is_delta();
    debug!(
        target = %target,
        artifacts = entries.len(),
        bytes = entries.iter().map(|e| e.file_size).sum::<u64>(),
        full = is_full_package,
        "plan computed"
    );
    Ok(UpdatePlan {
        entries,
        target_version: target.clone(),
        is_full_package,
    })
}

fn intern<'f>(index: &mut HashMap<&'f Version, usize>, version: &'f Version) -> usize {
    let next = index.len();
    *index.entry(version).or_insert(next)
}

fn seed<'f>(
    node: usize,
    cost: (u64, u32),
    via: Option<(Option<usize>, &'f ReleaseEntry)>,
    best: &mut [Option<(u64, u32)>],
    pred: &mut [Option<(Option<usize>, &'f ReleaseEntry)>],
    heap: &mut BinaryHeap<Reverse<(u64, u32, usize)>>,
) {
    if best[node].is_none_or(|b| cost < b) {
        best[node] = Some(cost);
        pred[node] = via;
        heap.push(Reverse((cost.0, cost.1, node)));
    }
}
