//! Region boundary normalization
//!
//! After the table is built, region boundaries can still coincide: a handler
//! can start at the same block where a nested try starts, several trys can
//! share a first block, and regions can share a last block. Later phases
//! want each boundary block to belong to exactly one region role, so that
//! growing or entering a region never requires rescanning the whole table.
//! Normalization restores that by splicing empty non-removable blocks at the
//! offending boundaries and repointing the table.
//!
//! Mutually protecting regions (identical try ranges implementing one try
//! with several handlers) are exempt where noted: their try ranges must stay
//! identical, so their shared boundary blocks are left alone or repointed in
//! lockstep.
//!
//! Predecessor edges must already be derived when this runs; boundary splits
//! move or retarget edges as they go.

use crate::eh::table::EhIndex;
use crate::graph::FlowGraph;
use crate::ir::block::{BlockId, BlockKind};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Which boundary rewrites to apply
#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    /// Also split last blocks shared between nested regions. Off by default:
    /// the extra blocks are unreachable whenever the shared last block ends
    /// in a jump, and most consumers only need unique begin blocks.
    pub shared_last_blocks: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        NormalizeOptions {
            shared_last_blocks: false,
        }
    }
}

impl NormalizeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shared_last_blocks(mut self, on: bool) -> Self {
        self.shared_last_blocks = on;
        self
    }
}

/// Blocks inserted per boundary rule
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeStats {
    pub handler_begins_split: u32,
    pub try_begins_split: u32,
    pub last_blocks_split: u32,
}

impl NormalizeStats {
    pub fn modified(&self) -> bool {
        self.handler_begins_split + self.try_begins_split + self.last_blocks_split > 0
    }
}

/// Enforce unique region boundary blocks on `graph`
pub fn normalize_regions(graph: &mut FlowGraph, options: &NormalizeOptions) -> NormalizeStats {
    let mut stats = NormalizeStats::default();
    if graph.eh_table.is_empty() {
        return stats;
    }

    // Handler begins first: afterwards only try begins can still collide,
    // which keeps the shared-begin pass to the try nesting chain.
    stats.handler_begins_split = split_handler_begins(graph);
    stats.try_begins_split = split_try_begins(graph);
    if options.shared_last_blocks {
        stats.last_blocks_split = split_last_blocks(graph);
    }

    if stats.modified() {
        debug!(unit = %graph.unit, ?stats, "normalized region boundaries");
    }
    stats
}

/// No block is both a handler begin and a try begin afterwards
///
/// Happens when a try nested inside a handler starts at the handler's first
/// block. The handler gets a fresh empty begin block spliced in front, living
/// outside the nested try.
fn split_handler_begins(graph: &mut FlowGraph) -> u32 {
    let mut inserted = 0;
    for i in 0..graph.eh_table.len() as u32 {
        let region = EhIndex(i);
        let hnd_begin = graph.eh_table[region].hnd_begin;
        let starts_a_try = match graph.try_index_of(hnd_begin) {
            Some(t) => graph.eh_table[t].try_begin == hnd_begin,
            None => false,
        };
        if !starts_a_try {
            continue;
        }

        let new_begin = graph.insert_block_before(BlockKind::Fallthrough, hnd_begin);
        let enclosing_try = graph.eh_table[region].enclosing_try;
        {
            let block = graph.block_mut(new_begin);
            block.try_index = enclosing_try;
            block.hnd_index = Some(region);
            block.internal = true;
            block.keep = true;
            block.label_target = true;
        }
        graph.eh_table[region].hnd_begin = new_begin;

        // Finally invocations name the handler by its first block; they enter
        // through the new one now.
        let callers: Vec<BlockId> = graph
            .block(hnd_begin)
            .preds
            .iter()
            .map(|e| e.pred)
            .collect();
        for caller in callers {
            let is_call = matches!(
                &graph.block(caller).kind,
                BlockKind::CallFinally { target } if *target == hnd_begin
            );
            if is_call {
                graph.replace_jump_target(caller, hnd_begin, new_begin);
            }
        }

        debug!(
            unit = %graph.unit,
            region = %region,
            new = %new_begin,
            old = %hnd_begin,
            "handler begin was also a try begin; split"
        );
        inserted += 1;
    }
    inserted
}

/// No two trys share a begin block afterwards, except mutual protection
///
/// Shared try begins only arise along the try nesting chain, so each region
/// walks outward from its own begin. Every enclosing try still starting at
/// the same block gets its own empty begin block in front of the blocks
/// inserted so far; incoming edges are distributed so each jump enters at
/// the level of its source region.
fn split_try_begins(graph: &mut FlowGraph) -> u32 {
    let mut inserted = 0;
    for i in 0..graph.eh_table.len() as u32 {
        let region = EhIndex(i);
        if graph.eh_table[region].enclosing_try.is_none() {
            continue;
        }
        let try_start = graph.eh_table[region].try_begin;
        let mut insert_before = try_start;
        // Identical try ranges must keep identical begin pointers, so track
        // the current mutual-protect anchor by its pre-update blocks.
        let mut mutual_beg = graph.eh_table[region].try_begin;
        let mut mutual_last = graph.eh_table[region].try_last;

        let mut outer = region;
        loop {
            outer = match graph.eh_table[outer].enclosing_try {
                Some(o) => o,
                None => break,
            };
            if graph.eh_table[outer].try_begin != try_start {
                // Nothing further out can share the begin either.
                break;
            }

            if graph.eh_table[outer].try_begin == mutual_beg
                && graph.eh_table[outer].try_last == mutual_last
            {
                // Mutual protect: keep the try identical, just follow any
                // begin block a more nested split already put in front.
                graph.eh_table[outer].try_begin = insert_before;
                debug!(
                    unit = %graph.unit,
                    region = %outer,
                    "mutually protecting try keeps shared begin"
                );
                continue;
            }
            mutual_beg = graph.eh_table[outer].try_begin;
            mutual_last = graph.eh_table[outer].try_last;

            let new_begin = graph.insert_block_before(BlockKind::Fallthrough, insert_before);
            let start_hnd = graph.handler_index_of(try_start);
            {
                let block = graph.block_mut(new_begin);
                block.try_index = Some(outer);
                block.hnd_index = start_hnd;
                block.internal = true;
                block.keep = true;
                block.label_target = true;
            }
            graph.eh_table[outer].try_begin = new_begin;

            // Distribute incoming edges: jumps from anywhere inside the inner
            // region stay on the inner begin, everything else enters one level
            // out. The layout fallthrough edge moved when the block was
            // spliced.
            let inner_region = graph.try_index_of(insert_before);
            let preds: Vec<BlockId> = graph
                .block(insert_before)
                .preds
                .iter()
                .map(|e| e.pred)
                .collect();
            for pred in preds {
                if pred == new_begin {
                    continue;
                }
                let inside_inner = match inner_region {
                    Some(inner) => graph.in_try_regions(inner, pred),
                    None => false,
                };
                if !inside_inner {
                    graph.replace_jump_target(pred, insert_before, new_begin);
                }
            }

            debug!(
                unit = %graph.unit,
                region = %outer,
                new = %new_begin,
                shared = %try_start,
                "try begin shared with a nested try; split"
            );
            insert_before = new_begin;
            inserted += 1;
        }
    }
    inserted
}

/// No two regions share a last block afterwards, except mutual protection
///
/// Four shapes reach this: a try or handler ending together with an enclosing
/// try, and a try or handler ending together with an enclosing handler. The
/// enclosing region is extended by an empty block after the shared last; when
/// the shared block ends in a jump the new block is simply unreachable.
fn split_last_blocks(graph: &mut FlowGraph) -> u32 {
    let mut inserted = 0;
    for i in 0..graph.eh_table.len() as u32 {
        let region = EhIndex(i);
        let (mut outer, mut outer_is_try) = match graph.eh_table[region].enclosing_region() {
            Some(found) => found,
            None => continue,
        };

        let mut inner = region;
        // Which side of `inner` matched; only meaningful once the walk has
        // advanced past the initial pair.
        let mut inner_is_try;
        let mut insert_block = true;
        // Region indices for the side of the new block that does not belong
        // to `outer`; updated while walking outward through alternations.
        let mut next_try: Option<EhIndex> = None;
        let mut next_hnd: Option<EhIndex> = None;
        let mut mutual: Option<(BlockId, BlockId)> = None;

        // Decide which last pointer of `inner` the enclosing region shares.
        // That block stays the comparison point for the whole outward walk,
        // while insertions advance the insert point past it.
        let shared;
        if outer_is_try {
            let outer_last = graph.eh_table[outer].try_last;
            if outer_last == graph.eh_table[inner].try_last {
                if graph.eh_table[outer].try_begin == graph.eh_table[inner].try_begin {
                    insert_block = false;
                } else {
                    next_hnd = graph.handler_index_of(outer_last);
                }
            } else if outer_last == graph.eh_table[inner].hnd_last {
                next_hnd = graph.eh_table[inner].enclosing_hnd;
            } else {
                continue;
            }
            shared = outer_last;
            mutual = Some((graph.eh_table[outer].try_begin, graph.eh_table[outer].try_last));
        } else {
            let outer_last = graph.eh_table[outer].hnd_last;
            if outer_last == graph.eh_table[inner].try_last {
                next_try = graph.eh_table[inner].enclosing_try;
            } else if outer_last == graph.eh_table[inner].hnd_last {
                next_try = graph.try_index_of(outer_last);
            } else {
                continue;
            }
            shared = outer_last;
        }
        let compare_last = shared;
        let mut insert_after = shared;

        loop {
            if insert_block {
                let new_last = graph.insert_block_after(BlockKind::Fallthrough, insert_after);
                {
                    let block = graph.block_mut(new_last);
                    if outer_is_try {
                        block.try_index = Some(outer);
                        block.hnd_index = next_hnd;
                    } else {
                        block.try_index = next_try;
                        block.hnd_index = Some(outer);
                    }
                    block.internal = true;
                }
                if outer_is_try {
                    graph.eh_table[outer].try_last = new_last;
                } else {
                    graph.eh_table[outer].hnd_last = new_last;
                }
                debug!(
                    unit = %graph.unit,
                    region = %outer,
                    new = %new_last,
                    shared = %compare_last,
                    "region last block shared with a nested region; extended"
                );
                insert_after = new_last;
                inserted += 1;
            }

            inner = outer;
            inner_is_try = outer_is_try;
            match graph.eh_table[outer].enclosing_region() {
                Some((o, t)) => {
                    outer = o;
                    outer_is_try = t;
                }
                None => break,
            }
            insert_block = true;

            if outer_is_try {
                if graph.eh_table[outer].try_last != compare_last {
                    break;
                }
                if inner_is_try
                    && mutual
                        == Some((graph.eh_table[outer].try_begin, graph.eh_table[outer].try_last))
                {
                    insert_block = false;
                    // Follow any block a more nested split already appended.
                    graph.eh_table[outer].try_last = insert_after;
                } else if inner_is_try {
                    next_hnd = graph.handler_index_of(insert_after);
                } else {
                    next_hnd = graph.eh_table[inner].enclosing_hnd;
                }
                mutual = Some((graph.eh_table[outer].try_begin, graph.eh_table[outer].try_last));
            } else {
                if graph.eh_table[outer].hnd_last != compare_last {
                    break;
                }
                if inner_is_try {
                    next_try = graph.eh_table[inner].enclosing_try;
                } else {
                    next_try = graph.try_index_of(insert_after);
                }
            }
        }
    }
    inserted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eh::clauses::RawClause;

    fn linear_graph(n: usize) -> (FlowGraph, Vec<BlockId>) {
        let mut graph = FlowGraph::new("test");
        let mut ids = Vec::new();
        for i in 0..n {
            let kind = if i + 1 == n {
                BlockKind::Return
            } else {
                BlockKind::Fallthrough
            };
            ids.push(graph.add_block(kind));
        }
        (graph, ids)
    }

    #[test]
    fn test_handler_begin_split_from_nested_try_begin() {
        let (mut graph, ids) = linear_graph(9);
        // A try nested in a handler, starting at the handler's first block.
        let clauses = [
            RawClause::catch((3, 5), (5, 7)),
            RawClause::catch((1, 3), (3, 8)),
        ];
        graph.attach_regions(&clauses).unwrap();
        graph.compute_pred_edges();

        let stats = normalize_regions(&mut graph, &NormalizeOptions::new());
        assert_eq!(stats.handler_begins_split, 1);
        assert_eq!(stats.try_begins_split, 0);
        assert_eq!(graph.block_count(), 10);

        let new_begin = graph.block_after(ids[2]).unwrap();
        assert_eq!(graph.eh_table[EhIndex(1)].hnd_begin, new_begin);
        assert!(graph.is_handler_begin(new_begin));
        assert!(!graph.is_handler_begin(ids[3]));
        // The nested try keeps its begin; the new block sits outside it.
        assert!(graph.is_try_begin(ids[3]));
        assert_eq!(graph.try_index_of(new_begin), None);
        assert_eq!(graph.handler_index_of(new_begin), Some(EhIndex(1)));
        let block = graph.block(new_begin);
        assert!(block.internal && block.keep && block.label_target);
    }

    #[test]
    fn test_shared_try_begins_get_per_level_headers() {
        let (mut graph, ids) = linear_graph(10);
        // Three nested trys all starting at the same block, plus a branch
        // into that block from the middle region.
        graph.block_mut(ids[5]).kind = BlockKind::Cond { target: ids[1] };
        let clauses = [
            RawClause::catch((1, 4), (4, 5)),
            RawClause::catch((1, 6), (6, 7)),
            RawClause::catch((1, 8), (8, 9)),
        ];
        graph.attach_regions(&clauses).unwrap();
        graph.compute_pred_edges();

        let stats = normalize_regions(&mut graph, &NormalizeOptions::new());
        assert_eq!(stats.try_begins_split, 2);
        assert_eq!(graph.block_count(), 12);

        // Layout: entry, outermost header, middle header, old shared begin.
        let middle = graph.block_before(ids[1]).unwrap();
        let outermost = graph.block_before(middle).unwrap();
        assert_eq!(graph.eh_table[EhIndex(0)].try_begin, ids[1]);
        assert_eq!(graph.eh_table[EhIndex(1)].try_begin, middle);
        assert_eq!(graph.eh_table[EhIndex(2)].try_begin, outermost);
        assert_eq!(graph.try_index_of(middle), Some(EhIndex(1)));
        assert_eq!(graph.try_index_of(outermost), Some(EhIndex(2)));
        assert!(graph.is_try_begin(ids[1]));
        assert!(graph.is_try_begin(middle));
        assert!(graph.is_try_begin(outermost));

        // The entry fallthrough enters at the outermost level; the branch
        // from the middle region enters at the middle level.
        assert!(graph.block(outermost).find_pred(ids[0]).is_some());
        assert!(matches!(
            graph.block(ids[5]).kind,
            BlockKind::Cond { target } if target == middle
        ));
        assert!(graph.block(middle).find_pred(ids[5]).is_some());
        assert!(graph.block(ids[1]).find_pred(ids[5]).is_none());
    }

    #[test]
    fn test_mutually_protecting_trys_keep_shared_begin() {
        let (mut graph, ids) = linear_graph(9);
        // Two handlers protecting the identical try, nested in a wider try.
        let clauses = [
            RawClause::catch((1, 4), (4, 5)),
            RawClause::catch((1, 4), (5, 6)),
            RawClause::catch((1, 7), (7, 8)),
        ];
        graph.attach_regions(&clauses).unwrap();
        graph.compute_pred_edges();

        let stats = normalize_regions(&mut graph, &NormalizeOptions::new());
        assert_eq!(stats.try_begins_split, 1);

        // The mutual pair still shares its begin; only the outer try got a
        // header block.
        assert_eq!(graph.eh_table[EhIndex(0)].try_begin, ids[1]);
        assert_eq!(graph.eh_table[EhIndex(1)].try_begin, ids[1]);
        let header = graph.block_before(ids[1]).unwrap();
        assert_eq!(graph.eh_table[EhIndex(2)].try_begin, header);
        assert_eq!(graph.try_index_of(header), Some(EhIndex(2)));
    }

    #[test]
    fn test_shared_last_blocks_left_alone_by_default() {
        let (mut graph, _ids) = linear_graph(9);
        let clauses = [
            RawClause::catch((2, 4), (4, 7)),
            RawClause::catch((1, 7), (7, 8)),
        ];
        graph.attach_regions(&clauses).unwrap();
        graph.compute_pred_edges();

        let stats = normalize_regions(&mut graph, &NormalizeOptions::new());
        assert_eq!(stats.last_blocks_split, 0);
        assert_eq!(graph.block_count(), 9);
    }

    #[test]
    fn test_shared_last_blocks_split_when_enabled() {
        let (mut graph, ids) = linear_graph(9);
        // The nested handler ends exactly where the enclosing try ends.
        let clauses = [
            RawClause::catch((2, 4), (4, 7)),
            RawClause::catch((1, 7), (7, 8)),
        ];
        graph.attach_regions(&clauses).unwrap();
        graph.compute_pred_edges();

        let options = NormalizeOptions::new().with_shared_last_blocks(true);
        let stats = normalize_regions(&mut graph, &options);
        assert_eq!(stats.last_blocks_split, 1);
        assert_eq!(graph.block_count(), 10);

        let tail = graph.block_after(ids[6]).unwrap();
        assert_eq!(graph.eh_table[EhIndex(1)].try_last, tail);
        // The nested handler keeps its own last block.
        assert_eq!(graph.eh_table[EhIndex(0)].hnd_last, ids[6]);
        assert_eq!(graph.try_index_of(tail), Some(EhIndex(1)));
        assert_eq!(graph.handler_index_of(tail), None);
        let block = graph.block(tail);
        assert!(block.internal && !block.keep);
    }
}
