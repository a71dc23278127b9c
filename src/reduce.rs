use crate::spawn::ExitEvent;
use anyhow::{bail, Context, Result};
use crossbeam_channel::Receiver;
use std::collections::HashSet;

/// Binary-reduction topology over `n` leaf partitions, `n` a power of two.
///
/// Partitions are numbered linearly: `0..n` are leaves, `n..=last` are merge
/// results in completion order, with `last = (n | (n - 1)) - 1` the root.
/// `companion` and `resulting` encode the tree shape; artifact naming
/// downstream depends on this exact numbering, so the arithmetic is kept
/// bit for bit.
#[derive(Debug, Clone, Copy)]
pub struct ReduceTree {
    last: usize,
}

impl ReduceTree {
    pub fn new(leaves: usize) -> Result<Self> {
        if leaves == 0 || !leaves.is_power_of_two() {
            bail!("pairwise reduction needs a power-of-two worker count, got {leaves}");
        }
        Ok(Self {
            last: (leaves | (leaves - 1)) - 1,
        })
    }

    /// Root partition index.
    pub fn last(&self) -> usize {
        self.last
    }

    pub fn leaves(&self) -> usize {
        self.last / 2 + 1
    }

    /// The sibling that must also complete before `i` can be merged, or
    /// `None` when `i` is the root.
    pub fn companion(&self, i: usize) -> Option<usize> {
        (i < self.last).then_some(i ^ 1)
    }

    /// Partition index assigned to the artifact produced by merging `i`
    /// with its companion.
    pub fn resulting(&self, i: usize) -> usize {
        self.last - (self.last - i - 1) / 2
    }
}

/// Single-threaded reducing loop: consumes child-exit events, pairs
/// completed siblings, and spawns one merge per pair via `spawn_merge(lo,
/// hi, into)` until the root partition completes. Returns the root index.
///
/// Sibling completion order is non-deterministic; an event for a partition
/// that was never spawned means the bookkeeping is broken and is fatal. Any
/// child that exits unsuccessfully aborts the reduction before dependent
/// merges are spawned.
pub fn reduce_loop(
    tree: ReduceTree,
    exits: &Receiver<ExitEvent>,
    mut spawn_merge: impl FnMut(usize, usize, usize) -> Result<()>,
) -> Result<usize> {
    let mut outstanding: HashSet<usize> = (0..tree.leaves()).collect();
    let mut completed: HashSet<usize> = HashSet::new();

    while !outstanding.is_empty() {
        let event = exits
            .recv()
            .context("exit channel closed before reduction finished")?;
        let i = event.partition;
        if !outstanding.remove(&i) {
            bail!("exit event for unknown partition {i}");
        }
        if !event.success {
            bail!("encode process for partition {i} exited with failure");
        }
        completed.insert(i);

        let Some(j) = tree.companion(i) else {
            return Ok(i);
        };
        if !completed.contains(&j) {
            continue;
        }

        completed.remove(&i);
        completed.remove(&j);
        let (lo, hi) = if i < j { (i, j) } else { (j, i) };
        let k = tree.resulting(hi);
        outstanding.insert(k);
        spawn_merge(lo, hi, k)?;
    }

    bail!("reduction drained without reaching the root partition");
}
