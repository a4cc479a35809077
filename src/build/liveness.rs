//! Per-variable liveness over the block graph
//!
//! Use and def sets come from a forward scan of each block's nodes; live-in
//! and live-out then iterate to a fixed point backward over all successors,
//! including exception-flow edges, since a value a handler reads is live
//! throughout the guarded range. The walk also needs to know, reference by
//! reference, whether a value survives past each point inside a block;
//! [`local_reference_deaths`] answers that from a single backward scan.

use crate::graph::FlowGraph;
use crate::ir::block::BlockId;
use crate::ir::node::{NodeId, OpKind};
use crate::ir::LocalId;
use tracing::debug;

/// Compute use/def and live-in/live-out sets for every block
///
/// The local table must be sealed first so tracked indices exist; they are
/// the bit positions of every set.
pub fn compute(graph: &mut FlowGraph) {
    compute_local_sets(graph);
    solve(graph);
}

fn compute_local_sets(graph: &mut FlowGraph) {
    let seq: Vec<BlockId> = graph.sequence().to_vec();
    for &bid in &seq {
        let mut uses = graph.new_var_set();
        let mut defs = graph.new_var_set();
        let node_ids = graph.block(bid).nodes.clone();
        for nid in node_ids {
            let node = graph.node(nid);
            match node.op {
                OpKind::LocalLoad(v) => {
                    if let Some(ti) = tracked_index(graph, v) {
                        if !defs.contains(ti) {
                            uses.insert(ti);
                        }
                    }
                }
                OpKind::LocalStore(v) => {
                    if let Some(ti) = tracked_index(graph, v) {
                        defs.insert(ti);
                    }
                }
                OpKind::SaveMulti { first } => {
                    for v in saved_locals(graph, nid, first) {
                        if let Some(ti) = tracked_index(graph, v) {
                            defs.insert(ti);
                        }
                    }
                }
                _ => {}
            }
        }
        let block = graph.block_mut(bid);
        block.var_use = uses;
        block.var_def = defs;
        block.live_in.clear();
        block.live_out.clear();
    }
}

fn solve(graph: &mut FlowGraph) {
    let seq: Vec<BlockId> = graph.sequence().to_vec();
    let mut passes = 0usize;
    loop {
        passes += 1;
        let mut changed = false;
        for &bid in seq.iter().rev() {
            let mut gather = graph.new_var_set();
            for succ in graph.all_successors(bid) {
                gather.union_with(&graph.block(succ).live_in);
            }
            let block = graph.block_mut(bid);
            changed |= block.live_out.union_with(&gather);
            let mut live_in = block.live_out.clone();
            live_in.remove_all(&block.var_def);
            live_in.union_with(&block.var_use);
            changed |= block.live_in.union_with(&live_in);
        }
        if !changed {
            break;
        }
    }
    debug!(unit = %graph.unit, passes, "liveness converged");
}

/// A tracked-local reference inside a block, with its in-block death mark
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LocalRef {
    /// Index into the block's node list, not a node id
    pub(crate) node_index: u32,
    pub(crate) local: LocalId,
    /// For a load: no later reference in this block reads the value and it
    /// is not live out. For a store: the stored value is never read.
    pub(crate) death: bool,
}

/// Death marks for every tracked-local reference of `block`, in node order
pub(crate) fn local_reference_deaths(graph: &FlowGraph, block: BlockId) -> Vec<LocalRef> {
    let b = graph.block(block);
    let mut live = b.live_out.clone();
    let mut out = Vec::new();
    for (idx, &nid) in b.nodes.iter().enumerate().rev() {
        let node = graph.node(nid);
        match node.op {
            OpKind::LocalLoad(v) => {
                if let Some(ti) = tracked_index(graph, v) {
                    out.push(LocalRef {
                        node_index: idx as u32,
                        local: v,
                        death: !live.contains(ti),
                    });
                    live.insert(ti);
                }
            }
            OpKind::LocalStore(v) => {
                if let Some(ti) = tracked_index(graph, v) {
                    out.push(LocalRef {
                        node_index: idx as u32,
                        local: v,
                        death: !live.contains(ti),
                    });
                    live.remove(ti);
                }
            }
            OpKind::SaveMulti { first } => {
                for v in saved_locals(graph, nid, first).into_iter().rev() {
                    if let Some(ti) = tracked_index(graph, v) {
                        out.push(LocalRef {
                            node_index: idx as u32,
                            local: v,
                            death: !live.contains(ti),
                        });
                        live.remove(ti);
                    }
                }
            }
            _ => {}
        }
    }
    out.reverse();
    out
}

/// Destination locals of a multi-register save, first to last
fn saved_locals(graph: &FlowGraph, nid: NodeId, first: LocalId) -> Vec<LocalId> {
    let node = graph.node(nid);
    let count = node
        .operands
        .first()
        .map(|&op| graph.node(op).result_count())
        .unwrap_or(0);
    (0..count as u32)
        .map(|k| LocalId(first.0 + k))
        .filter(|v| (v.0 as usize) < graph.local_count())
        .collect()
}

fn tracked_index(graph: &FlowGraph, v: LocalId) -> Option<u32> {
    if (v.0 as usize) < graph.local_count() {
        graph.local(v).tracked_index
    } else {
        None
    }
}
