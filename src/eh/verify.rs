//! Region table verifier
//!
//! Checks that the region table and the per-block membership indices agree
//! with each other and with the block layout. Runs after construction and
//! after any pass that edits blocks or regions; the checks get stricter when
//! the caller states which normalizations have been applied, since those
//! turn shared boundary blocks from expected input into corruption.
//!
//! The verifier never panics on a malformed table: every finding is reported
//! through [`VerifyResult`].

use crate::eh::table::{EhDescriptor, EhIndex, HandlerKind};
use crate::graph::FlowGraph;
use crate::ir::block::{BlockId, BlockKind};
use serde::{Deserialize, Serialize};

/// Verification outcome with all findings
#[derive(Debug)]
pub struct VerifyResult {
    /// Table and block membership are consistent
    pub valid: bool,
    /// Inconsistencies that make the table unusable
    pub errors: Vec<VerifyError>,
    /// Suspicious but legal shapes (non-fatal)
    pub warnings: Vec<String>,
    /// Statistics
    pub stats: RegionStats,
}

/// Region table statistics
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RegionStats {
    /// Number of table entries
    pub region_count: usize,
    /// Number of live blocks in the layout
    pub block_count: usize,
    /// Entries guarded by a filter
    pub filter_regions: usize,
    /// Longest enclosing-try chain
    pub max_try_depth: usize,
    /// Runs of adjacent entries protecting an identical try
    pub mutual_protect_groups: usize,
}

/// Inconsistencies the verifier can find
#[derive(Debug, Clone)]
pub enum VerifyError {
    /// A boundary pointer names a block that is no longer in the layout.
    RemovedBoundary {
        /// Offending table entry
        region: EhIndex,
        /// Which pointer: "try begin", "try last", "handler begin",
        /// "handler last" or "filter begin"
        role: &'static str,
        /// The removed block
        block: BlockId,
    },

    /// A begin block lost its keep or label marking.
    UnpinnedBegin {
        region: EhIndex,
        role: &'static str,
        block: BlockId,
    },

    /// A begin block comes after its matching last block in the layout.
    InvertedRange {
        region: EhIndex,
        role: &'static str,
        begin: BlockId,
        last: BlockId,
    },

    /// A filter does not lie strictly before its handler.
    FilterAfterHandler { region: EhIndex },

    /// The try range and the handler (or filter) range overlap.
    TryHandlerOverlap { region: EhIndex },

    /// An enclosing link does not name a later table entry.
    BadEnclosingLink {
        region: EhIndex,
        /// The try- or handler-side link that is out of order or dangling
        link: EhIndex,
    },

    /// A nested region sticks out of the region that encloses it.
    NestingEscape {
        region: EhIndex,
        enclosing: EhIndex,
        /// Which bound is violated
        bound: &'static str,
    },

    /// Two entries use the same handler begin block.
    SharedHandlerBegin { region: EhIndex, block: BlockId },

    /// Two non-mutually-protecting entries use the same try begin block.
    SharedTryBegin { region: EhIndex, block: BlockId },

    /// A block's stored try membership disagrees with the table.
    WrongTryIndex {
        block: BlockId,
        stored: Option<EhIndex>,
        expected: Option<EhIndex>,
    },

    /// A block's stored handler membership disagrees with the table.
    WrongHndIndex {
        block: BlockId,
        stored: Option<EhIndex>,
        expected: Option<EhIndex>,
    },

    /// A finally return block outside a finally or fault handler.
    StrayFinallyRet { block: BlockId },

    /// A filter verdict block outside a filter range.
    StrayFilterRet { block: BlockId },

    /// A catch exit block outside a catch or filter handler.
    StrayCatchRet { block: BlockId },
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyError::RemovedBoundary {
                region,
                role,
                block,
            } => {
                write!(f, "{} of {} is removed block {}", role, region, block)
            }
            VerifyError::UnpinnedBegin {
                region,
                role,
                block,
            } => {
                write!(f, "{} {} of {} is not pinned and labeled", role, block, region)
            }
            VerifyError::InvertedRange {
                region,
                role,
                begin,
                last,
            } => {
                write!(
                    f,
                    "{} range of {} is inverted: {} after {}",
                    role, region, begin, last
                )
            }
            VerifyError::FilterAfterHandler { region } => {
                write!(f, "filter of {} does not precede its handler", region)
            }
            VerifyError::TryHandlerOverlap { region } => {
                write!(f, "try and handler ranges of {} overlap", region)
            }
            VerifyError::BadEnclosingLink { region, link } => {
                write!(f, "enclosing link {} of {} is not a later entry", link, region)
            }
            VerifyError::NestingEscape {
                region,
                enclosing,
                bound,
            } => {
                write!(f, "{} escapes enclosing {}: {}", region, enclosing, bound)
            }
            VerifyError::SharedHandlerBegin { region, block } => {
                write!(f, "handler begin {} of {} is shared", block, region)
            }
            VerifyError::SharedTryBegin { region, block } => {
                write!(
                    f,
                    "try begin {} of {} is shared without mutual protection",
                    block, region
                )
            }
            VerifyError::WrongTryIndex {
                block,
                stored,
                expected,
            } => {
                write!(
                    f,
                    "block {} stores try index {:?}, table implies {:?}",
                    block, stored, expected
                )
            }
            VerifyError::WrongHndIndex {
                block,
                stored,
                expected,
            } => {
                write!(
                    f,
                    "block {} stores handler index {:?}, table implies {:?}",
                    block, stored, expected
                )
            }
            VerifyError::StrayFinallyRet { block } => {
                write!(f, "finally return {} is not in a finally or fault handler", block)
            }
            VerifyError::StrayFilterRet { block } => {
                write!(f, "filter verdict {} is not in a filter range", block)
            }
            VerifyError::StrayCatchRet { block } => {
                write!(f, "catch exit {} is not in a catch handler", block)
            }
        }
    }
}

/// Region table verifier
pub struct Verifier {
    /// Handler and try begin blocks have been made unique
    begins_normalized: bool,
    /// Last blocks have been made unique
    lasts_normalized: bool,
    /// Treat warnings as errors
    strict: bool,
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Verifier {
    /// Creates a verifier for an unnormalized table: shared boundary blocks
    /// are surfaced as warnings, not errors.
    pub fn new() -> Self {
        Verifier {
            begins_normalized: false,
            lasts_normalized: false,
            strict: false,
        }
    }

    /// Expect unique begin blocks (after begin-block normalization)
    pub fn begins_normalized(mut self) -> Self {
        self.begins_normalized = true;
        self
    }

    /// Expect unique last blocks (after last-block normalization)
    pub fn lasts_normalized(mut self) -> Self {
        self.lasts_normalized = true;
        self
    }

    /// Enable strict mode
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Verify `graph`'s region table against its blocks
    pub fn verify(&self, graph: &FlowGraph) -> VerifyResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let stats = RegionStats {
            region_count: graph.eh_table.len(),
            block_count: graph.block_count(),
            filter_regions: graph
                .eh_table
                .iter()
                .filter(|(_, d)| d.has_filter())
                .count(),
            max_try_depth: max_try_depth(graph),
            mutual_protect_groups: mutual_groups(graph),
        };

        self.check_boundary_blocks(graph, &mut errors);
        // Position math is only meaningful over live blocks.
        if errors.is_empty() {
            self.check_ranges(graph, &mut errors);
            self.check_nesting(graph, &mut errors);
            self.check_unique_begins(graph, &mut errors, &mut warnings);
            self.check_block_indices(graph, &mut errors);
            self.check_block_kinds(graph, &mut errors);
        }

        let valid = errors.is_empty() && (!self.strict || warnings.is_empty());
        VerifyResult {
            valid,
            errors,
            warnings,
            stats,
        }
    }

    fn check_boundary_blocks(&self, graph: &FlowGraph, errors: &mut Vec<VerifyError>) {
        for (region, desc) in graph.eh_table.iter() {
            let mut pointers = vec![
                ("try begin", desc.try_begin),
                ("try last", desc.try_last),
                ("handler begin", desc.hnd_begin),
                ("handler last", desc.hnd_last),
            ];
            if let Some(filter) = desc.filter_begin {
                pointers.push(("filter begin", filter));
            }
            for (role, block) in pointers {
                if graph.block(block).removed {
                    errors.push(VerifyError::RemovedBoundary {
                        region,
                        role,
                        block,
                    });
                }
            }
            if errors.iter().any(|e| {
                matches!(e, VerifyError::RemovedBoundary { region: r, .. } if *r == region)
            }) {
                continue;
            }

            // Begin blocks anchor labels and must survive block cleanup.
            let mut begins = vec![("try begin", desc.try_begin), ("handler begin", desc.hnd_begin)];
            if let Some(filter) = desc.filter_begin {
                begins.push(("filter begin", filter));
            }
            for (role, block) in begins {
                let b = graph.block(block);
                if !b.keep || !b.label_target {
                    errors.push(VerifyError::UnpinnedBegin {
                        region,
                        role,
                        block,
                    });
                }
            }
        }
    }

    fn check_ranges(&self, graph: &FlowGraph, errors: &mut Vec<VerifyError>) {
        for (region, desc) in graph.eh_table.iter() {
            let try_beg = graph.position(desc.try_begin);
            let try_last = graph.position(desc.try_last);
            let hnd_beg = graph.position(desc.hnd_begin);
            let hnd_last = graph.position(desc.hnd_last);

            if try_beg > try_last {
                errors.push(VerifyError::InvertedRange {
                    region,
                    role: "try",
                    begin: desc.try_begin,
                    last: desc.try_last,
                });
            }
            if hnd_beg > hnd_last {
                errors.push(VerifyError::InvertedRange {
                    region,
                    role: "handler",
                    begin: desc.hnd_begin,
                    last: desc.hnd_last,
                });
            }

            // The protected range on one side, the handler (with its filter)
            // on the other; the two never interleave.
            let guard_beg = match desc.filter_begin {
                Some(filter) => {
                    let filter_pos = graph.position(filter);
                    if filter_pos >= hnd_beg {
                        errors.push(VerifyError::FilterAfterHandler { region });
                    }
                    filter_pos
                }
                None => hnd_beg,
            };
            if !(hnd_last < try_beg || try_last < guard_beg) {
                errors.push(VerifyError::TryHandlerOverlap { region });
            }
        }
    }

    fn check_nesting(&self, graph: &FlowGraph, errors: &mut Vec<VerifyError>) {
        let table = &graph.eh_table;
        for (region, desc) in table.iter() {
            let try_beg = graph.position(desc.try_begin);
            let try_last = graph.position(desc.try_last);
            let hnd_beg = graph.position(desc.hnd_begin);
            let hnd_last = graph.position(desc.hnd_last);

            if let Some(outer_index) = desc.enclosing_try {
                match table.get(outer_index) {
                    Some(outer) if outer_index > region => {
                        // Identical try ranges are one protected region with
                        // several handlers; no containment to check.
                        if !EhDescriptor::same_try(desc, outer) {
                            let outer_beg = graph.position(outer.try_begin);
                            let outer_last = graph.position(outer.try_last);
                            self.check_bound(
                                region,
                                outer_index,
                                errors,
                                outer_beg < try_beg
                                    || (!self.begins_normalized && outer_beg == try_beg),
                                "try begins at or before the enclosing try",
                            );
                            self.check_bound(
                                region,
                                outer_index,
                                errors,
                                outer_beg < hnd_beg,
                                "handler begins at or before the enclosing try",
                            );
                            self.check_bound(
                                region,
                                outer_index,
                                errors,
                                try_last < outer_last
                                    || (!self.lasts_normalized && try_last == outer_last),
                                "try ends past the enclosing try",
                            );
                            self.check_bound(
                                region,
                                outer_index,
                                errors,
                                hnd_last < outer_last
                                    || (!self.lasts_normalized && hnd_last == outer_last),
                                "handler ends past the enclosing try",
                            );
                        }
                    }
                    _ => {
                        errors.push(VerifyError::BadEnclosingLink {
                            region,
                            link: outer_index,
                        });
                    }
                }
            }

            if let Some(outer_index) = desc.enclosing_hnd {
                match table.get(outer_index) {
                    Some(outer) if outer_index > region => {
                        let outer_beg = graph.position(outer.hnd_begin);
                        let outer_last = graph.position(outer.hnd_last);
                        self.check_bound(
                            region,
                            outer_index,
                            errors,
                            outer_beg < try_beg
                                || (!self.begins_normalized && outer_beg == try_beg),
                            "try begins at or before the enclosing handler",
                        );
                        self.check_bound(
                            region,
                            outer_index,
                            errors,
                            outer_beg < hnd_beg,
                            "handler begins at or before the enclosing handler",
                        );
                        self.check_bound(
                            region,
                            outer_index,
                            errors,
                            try_last < outer_last
                                || (!self.lasts_normalized && try_last == outer_last),
                            "try ends past the enclosing handler",
                        );
                        self.check_bound(
                            region,
                            outer_index,
                            errors,
                            hnd_last < outer_last
                                || (!self.lasts_normalized && hnd_last == outer_last),
                            "handler ends past the enclosing handler",
                        );
                    }
                    _ => {
                        errors.push(VerifyError::BadEnclosingLink {
                            region,
                            link: outer_index,
                        });
                    }
                }
            }
        }
    }

    fn check_bound(
        &self,
        region: EhIndex,
        enclosing: EhIndex,
        errors: &mut Vec<VerifyError>,
        holds: bool,
        bound: &'static str,
    ) {
        if !holds {
            errors.push(VerifyError::NestingEscape {
                region,
                enclosing,
                bound,
            });
        }
    }

    fn check_unique_begins(
        &self,
        graph: &FlowGraph,
        errors: &mut Vec<VerifyError>,
        warnings: &mut Vec<String>,
    ) {
        let n = graph.block_count();
        let mut hnd_begin_at = vec![false; n];
        let mut try_begin_at: Vec<Option<EhIndex>> = vec![None; n];

        for (region, desc) in graph.eh_table.iter() {
            let hnd_pos = graph.position(desc.hnd_begin) as usize;
            if hnd_begin_at[hnd_pos] {
                errors.push(VerifyError::SharedHandlerBegin {
                    region,
                    block: desc.hnd_begin,
                });
            }
            hnd_begin_at[hnd_pos] = true;
            if let Some(filter) = desc.filter_begin {
                let filter_pos = graph.position(filter) as usize;
                if hnd_begin_at[filter_pos] {
                    errors.push(VerifyError::SharedHandlerBegin {
                        region,
                        block: filter,
                    });
                }
                hnd_begin_at[filter_pos] = true;
            }

            let try_pos = graph.position(desc.try_begin) as usize;
            match try_begin_at[try_pos] {
                Some(earlier) if !graph.eh_table.is_mutually_protecting(earlier, region) => {
                    if self.begins_normalized {
                        errors.push(VerifyError::SharedTryBegin {
                            region,
                            block: desc.try_begin,
                        });
                    } else {
                        warnings.push(format!(
                            "{} and {} share try begin {}; expected before begin normalization only",
                            earlier, region, desc.try_begin
                        ));
                    }
                }
                _ => {}
            }
            try_begin_at[try_pos] = Some(region);
        }

        // A handler entered by falling out of a nested try defeats the point
        // of unique begins.
        for (region, desc) in graph.eh_table.iter() {
            let pos = graph.position(desc.hnd_begin) as usize;
            if let Some(t) = try_begin_at[pos] {
                if self.begins_normalized {
                    errors.push(VerifyError::SharedHandlerBegin {
                        region,
                        block: desc.hnd_begin,
                    });
                } else {
                    warnings.push(format!(
                        "handler begin of {} is also the try begin of {}; expected before begin normalization only",
                        region, t
                    ));
                }
            }
        }
    }

    /// Recompute what every block's membership should be and compare
    ///
    /// More nested entries come first in the table, so a first-wins walk of
    /// each entry's try range, then its handler range (from the filter when
    /// present), reproduces the innermost index for every block.
    fn check_block_indices(&self, graph: &FlowGraph, errors: &mut Vec<VerifyError>) {
        let n = graph.block_count();
        let mut expect_try: Vec<Option<EhIndex>> = vec![None; n];
        let mut expect_hnd: Vec<Option<EhIndex>> = vec![None; n];

        for (region, desc) in graph.eh_table.iter() {
            let try_beg = graph.position(desc.try_begin) as usize;
            let try_last = graph.position(desc.try_last) as usize;
            for slot in expect_try.iter_mut().take(try_last + 1).skip(try_beg) {
                if slot.is_none() {
                    *slot = Some(region);
                }
            }
            let hnd_from = match desc.filter_begin {
                Some(filter) => graph.position(filter) as usize,
                None => graph.position(desc.hnd_begin) as usize,
            };
            let hnd_last = graph.position(desc.hnd_last) as usize;
            for slot in expect_hnd.iter_mut().take(hnd_last + 1).skip(hnd_from) {
                if slot.is_none() {
                    *slot = Some(region);
                }
            }
        }

        for (pos, &id) in graph.sequence().iter().enumerate() {
            let block = graph.block(id);
            if block.try_index != expect_try[pos] {
                errors.push(VerifyError::WrongTryIndex {
                    block: id,
                    stored: block.try_index,
                    expected: expect_try[pos],
                });
            }
            if block.hnd_index != expect_hnd[pos] {
                errors.push(VerifyError::WrongHndIndex {
                    block: id,
                    stored: block.hnd_index,
                    expected: expect_hnd[pos],
                });
            }
        }
    }

    fn check_block_kinds(&self, graph: &FlowGraph, errors: &mut Vec<VerifyError>) {
        for &id in graph.sequence() {
            let block = graph.block(id);
            let handler_kind = block
                .hnd_index
                .and_then(|h| graph.eh_table.get(h))
                .map(|d| d.kind);
            match block.kind {
                BlockKind::EhFinallyRet => {
                    if !matches!(handler_kind, Some(k) if k.is_finally_or_fault()) {
                        errors.push(VerifyError::StrayFinallyRet { block: id });
                    }
                }
                BlockKind::EhFilterRet => {
                    let in_filter = match block.hnd_index {
                        Some(h) => graph.in_filter_range(h, id),
                        None => false,
                    };
                    if !in_filter {
                        errors.push(VerifyError::StrayFilterRet { block: id });
                    }
                }
                BlockKind::EhCatchRet { .. } => {
                    let in_catch = match handler_kind {
                        Some(HandlerKind::Catch) => true,
                        // The handler half of a filter region exits the same
                        // way a catch does.
                        Some(HandlerKind::Filter) => {
                            let h = block.hnd_index.unwrap_or(EhIndex(0));
                            !graph.in_filter_range(h, id)
                        }
                        _ => false,
                    };
                    if !in_catch {
                        errors.push(VerifyError::StrayCatchRet { block: id });
                    }
                }
                _ => {}
            }
        }
    }
}

fn max_try_depth(graph: &FlowGraph) -> usize {
    let mut max = 0;
    for (index, _) in graph.eh_table.iter() {
        let mut depth = 1;
        let mut cur = graph.eh_table[index].enclosing_try;
        while let Some(i) = cur {
            match graph.eh_table.get(i) {
                Some(d) if i > index => {
                    depth += 1;
                    cur = d.enclosing_try;
                }
                // Cyclic or dangling links are reported elsewhere.
                _ => break,
            }
        }
        max = max.max(depth);
    }
    max
}

fn mutual_groups(graph: &FlowGraph) -> usize {
    let table = &graph.eh_table;
    let mut groups = 0;
    let mut i = 0u32;
    while (i as usize) < table.len() {
        let mut run = 1u32;
        while ((i + run) as usize) < table.len()
            && table.is_mutually_protecting(EhIndex(i), EhIndex(i + run))
        {
            run += 1;
        }
        if run > 1 {
            groups += 1;
        }
        i += run;
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eh::clauses::RawClause;
    use crate::eh::normalize::{normalize_regions, NormalizeOptions};

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

    fn nested_graph() -> FlowGraph {
        let (mut graph, _) = linear_graph(8);
        let clauses = [
            RawClause::catch((2, 3), (3, 4)),
            RawClause::catch((1, 5), (5, 7)),
        ];
        graph.attach_regions(&clauses).unwrap();
        graph.compute_pred_edges();
        graph
    }

    #[test]
    fn test_well_formed_table_passes() {
        let graph = nested_graph();
        let result = Verifier::new().verify(&graph);
        assert!(result.valid, "errors: {:?}", result.errors);
        assert_eq!(result.stats.region_count, 2);
        assert_eq!(result.stats.max_try_depth, 2);
        assert_eq!(result.stats.mutual_protect_groups, 0);
    }

    #[test]
    fn test_normalized_graph_passes_strict_checks() {
        let (mut graph, _) = linear_graph(9);
        let clauses = [
            RawClause::catch((3, 5), (5, 7)),
            RawClause::catch((1, 3), (3, 8)),
        ];
        graph.attach_regions(&clauses).unwrap();
        graph.compute_pred_edges();

        // Before splitting, the aliased begin is only a warning.
        let before = Verifier::new().verify(&graph);
        assert!(before.valid);
        assert_eq!(before.warnings.len(), 1);
        assert!(!Verifier::new().begins_normalized().verify(&graph).valid);

        normalize_regions(&mut graph, &NormalizeOptions::new());
        let after = Verifier::new().begins_normalized().verify(&graph);
        assert!(after.valid, "errors: {:?}", after.errors);
        assert!(after.warnings.is_empty());
    }

    #[test]
    fn test_mutual_protect_begins_are_not_flagged() {
        let (mut graph, _) = linear_graph(7);
        let clauses = [
            RawClause::catch((1, 3), (3, 4)),
            RawClause::catch((1, 3), (4, 5)),
        ];
        graph.attach_regions(&clauses).unwrap();
        graph.compute_pred_edges();

        let result = Verifier::new().begins_normalized().verify(&graph);
        assert!(result.valid, "errors: {:?}", result.errors);
        assert_eq!(result.stats.mutual_protect_groups, 1);
    }

    #[test]
    fn test_tampered_membership_is_detected() {
        let mut graph = nested_graph();
        let victim = graph.sequence()[2];
        graph.block_mut(victim).try_index = Some(EhIndex(1));

        let result = Verifier::new().verify(&graph);
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| matches!(
            e,
            VerifyError::WrongTryIndex { block, expected: Some(EhIndex(0)), .. } if *block == victim
        )));
    }

    #[test]
    fn test_inverted_range_is_detected() {
        let mut graph = nested_graph();
        let begin = graph.eh_table[EhIndex(1)].try_begin;
        let last = graph.eh_table[EhIndex(1)].try_last;
        graph.eh_table[EhIndex(1)].try_begin = last;
        graph.eh_table[EhIndex(1)].try_last = begin;

        let result = Verifier::new().verify(&graph);
        assert!(!result.valid);
        assert!(result
            .errors
            .iter()
            .any(|e| matches!(e, VerifyError::InvertedRange { role: "try", .. })));
    }

    #[test]
    fn test_stray_finally_ret_is_detected() {
        let (mut graph, ids) = linear_graph(6);
        let clauses = [RawClause::catch((1, 3), (3, 5))];
        graph.attach_regions(&clauses).unwrap();
        graph.compute_pred_edges();
        graph.block_mut(ids[3]).kind = BlockKind::EhFinallyRet;

        let result = Verifier::new().verify(&graph);
        assert!(!result.valid);
        assert!(result
            .errors
            .iter()
            .any(|e| matches!(e, VerifyError::StrayFinallyRet { block } if *block == ids[3])));
    }

    #[test]
    fn test_unpinned_begin_is_detected() {
        let mut graph = nested_graph();
        let begin = graph.eh_table[EhIndex(0)].try_begin;
        graph.block_mut(begin).keep = false;

        let result = Verifier::new().verify(&graph);
        assert!(!result.valid);
        assert!(result
            .errors
            .iter()
            .any(|e| matches!(e, VerifyError::UnpinnedBegin { role: "try begin", .. })));
    }
}
