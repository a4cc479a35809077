//! Exception-flow successors
//!
//! Control can leave a block two ways the jump kind does not show: an
//! instruction inside a protected region can raise, reaching the handler of
//! every region on the block's exception-flow chain; and a jump into the
//! first block of a try makes that region's handler (and the handlers of any
//! enclosing regions starting at the same block) reachable before a single
//! instruction of the region runs. Liveness and the builder must see both, or
//! values live only in handlers look dead in the main flow.

use crate::graph::FlowGraph;
use crate::ir::block::BlockId;

/// Ordinary successors followed by exception-flow successors
pub fn all_successors(graph: &FlowGraph, block: BlockId) -> Vec<BlockId> {
    let regular = graph.regular_successors(block);
    let mut out = regular.clone();
    append_eh_successors(graph, block, &regular, &mut out);
    out
}

/// Just the exception-flow successors
pub fn eh_successors(graph: &FlowGraph, block: BlockId) -> Vec<BlockId> {
    let regular = graph.regular_successors(block);
    let mut out = Vec::new();
    append_eh_successors(graph, block, &regular, &mut out);
    out
}

fn append_eh_successors(
    graph: &FlowGraph,
    block: BlockId,
    regular: &[BlockId],
    out: &mut Vec<BlockId>,
) {
    let table = &graph.eh_table;

    // Anything raised in this block lands in the handler of each region on
    // its exception-flow chain, innermost out. The empty continuation block
    // of a call-finally pair raises nothing itself.
    if !graph.is_call_finally_pair_tail(block) {
        let mut cur = graph.exn_flow_region(block);
        while let Some(i) = cur {
            out.push(table[i].exception_block());
            cur = table[i].enclosing_try;
        }
    }

    // Handlers acquired by entering a try region. Successors are scanned in
    // reverse order; that order is a determinism contract for downstream
    // consumers, nothing more.
    for &s in regular.iter().rev() {
        let region = match graph.try_index_of(s) {
            Some(r) if table[r].try_begin == s => r,
            _ => continue,
        };
        if graph.in_exn_flow_regions(region, block) {
            // Already counted on the block's own chain.
            continue;
        }
        out.push(table[region].exception_block());
        let mut cur = table[region].enclosing_try;
        while let Some(i) = cur {
            if table[i].try_begin != s {
                break;
            }
            out.push(table[i].exception_block());
            cur = table[i].enclosing_try;
        }
    }
}
