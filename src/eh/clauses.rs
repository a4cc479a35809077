//! Clause intake: nesting validation, sorting, table construction
//!
//! Raw clauses arrive in whatever order the front end recorded them. Intake
//! runs in four steps:
//!
//! 1. build a containment tree over all try/handler/filter extents and reject
//!    malformed nesting (overlaps, shared handlers, inner-after-outer trys)
//! 2. sort the clause list so every region nested inside a handler comes
//!    before that handler's own clause; nesting inside a try is already
//!    required to be in order, nesting inside a handler is not
//! 3. materialize one descriptor per clause, resolving layout positions to
//!    block handles and wiring up enclosing links innermost-first
//! 4. stamp each layout position with its innermost try and handler region
//!
//! Verification and normalization run later, against the flow graph.

use crate::eh::table::{EhDescriptor, EhIndex, EhTable, HandlerKind};
use crate::error::{Error, RegionDefect, Result};
use crate::ir::block::BlockId;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One protected-region clause as handed over by the front end
///
/// All ranges are half-open positions into the initial block layout. A filter
/// clause carries the filter's start position; the filter body always runs up
/// to the start of its handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawClause {
    pub kind: HandlerKind,
    pub try_range: (u32, u32),
    pub handler_range: (u32, u32),
    pub filter_start: Option<u32>,
}

impl RawClause {
    pub fn catch(try_range: (u32, u32), handler_range: (u32, u32)) -> Self {
        RawClause {
            kind: HandlerKind::Catch,
            try_range,
            handler_range,
            filter_start: None,
        }
    }

    pub fn finally(try_range: (u32, u32), handler_range: (u32, u32)) -> Self {
        RawClause {
            kind: HandlerKind::Finally,
            try_range,
            handler_range,
            filter_start: None,
        }
    }

    pub fn fault(try_range: (u32, u32), handler_range: (u32, u32)) -> Self {
        RawClause {
            kind: HandlerKind::Fault,
            try_range,
            handler_range,
            filter_start: None,
        }
    }

    pub fn filtered(try_range: (u32, u32), filter_start: u32, handler_range: (u32, u32)) -> Self {
        RawClause {
            kind: HandlerKind::Filter,
            try_range,
            handler_range,
            filter_start: Some(filter_start),
        }
    }
}

/// A block's region membership as computed from the clause list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegionAssignment {
    pub try_index: Option<EhIndex>,
    pub hnd_index: Option<EhIndex>,
}

/// Output of clause intake
#[derive(Debug)]
pub struct TableBuild {
    pub table: EhTable,
    /// One entry per layout position, innermost membership
    pub assignments: Vec<RegionAssignment>,
    /// True when the clause list had to be reordered
    pub sorted: bool,
}

/// Validate `clauses` and build the region table over `layout`
///
/// `layout` is the initial block sequence; clause positions index into it.
/// Defective clause lists come back as [`Error::BadRegions`] naming the first
/// offending clause in input order.
pub fn build_eh_table(unit: &str, clauses: &[RawClause], layout: &[BlockId]) -> Result<TableBuild> {
    let positions = layout.len() as u32;
    for (index, clause) in clauses.iter().enumerate() {
        let extent = clause.try_range.1.max(clause.handler_range.1);
        if extent > positions {
            return Err(Error::internal(format!(
                "clause {index} of '{unit}' reaches position {extent} but the layout has {positions} blocks"
            )));
        }
        if (clause.kind == HandlerKind::Filter) != clause.filter_start.is_some() {
            return Err(Error::internal(format!(
                "clause {index} of '{unit}': filter start and handler kind disagree"
            )));
        }
    }

    let mut checker = NestingChecker::new(unit);
    for (index, clause) in clauses.iter().enumerate() {
        checker.insert_clause(index, clause)?;
    }
    checker.check_nesting_levels()?;

    let mut order: Vec<usize> = (0..clauses.len()).collect();
    let sorted = checker.needs_sort;
    if sorted {
        sort_clause_order(unit, clauses, &mut order);
    }

    let mut table = EhTable::new();
    for &ci in &order {
        let clause = &clauses[ci];
        table.push(EhDescriptor {
            kind: clause.kind,
            try_begin: layout[clause.try_range.0 as usize],
            try_last: layout[(clause.try_range.1 - 1) as usize],
            hnd_begin: layout[clause.handler_range.0 as usize],
            hnd_last: layout[(clause.handler_range.1 - 1) as usize],
            filter_begin: clause.filter_start.map(|f| layout[f as usize]),
            enclosing_try: None,
            enclosing_hnd: None,
            try_off: clause.try_range,
            hnd_off: clause.handler_range,
            filter_off: clause.filter_start,
        })?;
    }

    let mut assignments = vec![RegionAssignment::default(); layout.len()];
    for xt in 0..table.len() as u32 {
        let desc = &table[EhIndex(xt)];
        // Filter blocks belong to their region's handler for membership.
        let hnd_from = desc.filter_off.unwrap_or(desc.hnd_off.0);
        let (hnd_to, try_rng) = (desc.hnd_off.1, desc.try_off);
        for pos in hnd_from..hnd_to {
            let slot = &mut assignments[pos as usize].hnd_index;
            if slot.is_none() {
                *slot = Some(EhIndex(xt));
            }
        }
        for pos in try_rng.0..try_rng.1 {
            let slot = &mut assignments[pos as usize].try_index;
            if slot.is_none() {
                *slot = Some(EhIndex(xt));
            }
        }
    }

    // Enclosing links. Earlier entries are more deeply nested, so for each
    // entry we link every earlier entry sitting inside its try or handler;
    // the first link set wins. An entry's try begin stands in for the whole
    // region, which the nesting check has made legitimate.
    for outer in 0..table.len() as u32 {
        let (try_rng, hnd_rng) = {
            let d = &table[EhIndex(outer)];
            (d.try_off, d.hnd_off)
        };
        for inner in 0..outer {
            let d = &mut table[EhIndex(inner)];
            let beg = d.try_off.0;
            if d.enclosing_try.is_none() && beg >= try_rng.0 && beg < try_rng.1 {
                d.enclosing_try = Some(EhIndex(outer));
            }
            if d.enclosing_hnd.is_none() && beg >= hnd_rng.0 && beg < hnd_rng.1 {
                d.enclosing_hnd = Some(EhIndex(outer));
            }
        }
    }

    debug!(
        unit,
        entries = table.len(),
        sorted,
        "built protected-region table"
    );

    Ok(TableBuild {
        table,
        assignments,
        sorted,
    })
}

/// Reorder clauses so a region nested inside another clause's handler (or
/// filter) comes first
///
/// Try nesting is already in order or the nesting check failed, so the
/// handler extent alone decides; try extents cannot be used because
/// mutually-protecting clauses share theirs.
fn sort_clause_order(unit: &str, clauses: &[RawClause], order: &mut [usize]) {
    fn nested(inner: (u32, u32), outer: (u32, u32)) -> bool {
        inner.0 >= outer.0 && inner.1 <= outer.1
    }

    for i in 0..order.len() {
        for j in (i + 1)..order.len() {
            let earlier = &clauses[order[i]];
            let later = &clauses[order[j]];
            let hnd = later.handler_range;
            let inside_filter = earlier
                .filter_start
                .map_or(false, |f| nested(hnd, (f, earlier.handler_range.0)));
            if nested(hnd, earlier.try_range)
                || nested(hnd, earlier.handler_range)
                || inside_filter
            {
                debug!(
                    unit,
                    inner = order[j],
                    outer = order[i],
                    "reordering clause nested inside a later handler"
                );
                order.swap(i, j);
            }
        }
    }
}

/// Which extent of a clause a tree node covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodePart {
    Try,
    Handler,
    Finally,
    Fault,
    Filter,
}

impl NodePart {
    fn is_try(self) -> bool {
        matches!(self, NodePart::Try)
    }

    fn is_finally_or_fault(self) -> bool {
        matches!(self, NodePart::Finally | NodePart::Fault)
    }
}

/// A node of the containment tree; offsets are inclusive on both ends
#[derive(Debug)]
struct ClauseNode {
    start: u32,
    end: u32,
    part: NodePart,
    clause: usize,
    next: Option<u32>,
    child: Option<u32>,
    /// For a try identical to an earlier try: the tree-resident twin
    equivalent: Option<u32>,
}

/// Where a tree edit writes its result
#[derive(Clone, Copy)]
enum Slot {
    Root,
    Next(u32),
    Child(u32),
}

/// Builds the containment tree clause by clause and rejects bad nesting
///
/// Each extent becomes a node; siblings are kept ordered by start offset and
/// children are fully contained in their parent. Mutually-protecting trys do
/// not enter the tree twice, the later one records its resident twin instead.
struct NestingChecker<'a> {
    unit: &'a str,
    nodes: Vec<ClauseNode>,
    root: Option<u32>,
    needs_sort: bool,
    /// (try, handler, filter) node ids per clause, input order
    clause_nodes: Vec<(u32, u32, Option<u32>)>,
}

impl<'a> NestingChecker<'a> {
    fn new(unit: &'a str) -> Self {
        NestingChecker {
            unit,
            nodes: Vec::new(),
            root: None,
            needs_sort: false,
            clause_nodes: Vec::new(),
        }
    }

    fn defect<T>(&self, clause: usize, defect: RegionDefect) -> Result<T> {
        Err(Error::bad_regions(self.unit, clause, defect))
    }

    fn alloc(&mut self, part: NodePart, clause: usize, start: u32, end: u32) -> u32 {
        let id = self.nodes.len() as u32;
        self.nodes.push(ClauseNode {
            start,
            end,
            part,
            clause,
            next: None,
            child: None,
            equivalent: None,
        });
        id
    }

    fn slot_get(&self, slot: Slot) -> Option<u32> {
        match slot {
            Slot::Root => self.root,
            Slot::Next(n) => self.nodes[n as usize].next,
            Slot::Child(n) => self.nodes[n as usize].child,
        }
    }

    fn slot_set(&mut self, slot: Slot, value: Option<u32>) {
        match slot {
            Slot::Root => self.root = value,
            Slot::Next(n) => self.nodes[n as usize].next = value,
            Slot::Child(n) => self.nodes[n as usize].child = value,
        }
    }

    /// Seed the 2-3 nodes of one clause and insert each into the tree
    fn insert_clause(&mut self, index: usize, clause: &RawClause) -> Result<()> {
        if clause.try_range.1 <= clause.try_range.0
            || clause.handler_range.1 <= clause.handler_range.0
        {
            return self.defect(index, RegionDefect::EmptyRange);
        }
        if let Some(f) = clause.filter_start {
            if clause.handler_range.0 <= f {
                return self.defect(index, RegionDefect::EmptyRange);
            }
        }

        let try_node = self.alloc(
            NodePart::Try,
            index,
            clause.try_range.0,
            clause.try_range.1 - 1,
        );
        let hnd_part = match clause.kind {
            HandlerKind::Finally => NodePart::Finally,
            HandlerKind::Fault => NodePart::Fault,
            HandlerKind::Catch | HandlerKind::Filter => NodePart::Handler,
        };
        let hnd_node = self.alloc(
            hnd_part,
            index,
            clause.handler_range.0,
            clause.handler_range.1 - 1,
        );
        let filter_node = clause
            .filter_start
            .map(|f| self.alloc(NodePart::Filter, index, f, clause.handler_range.0 - 1));
        self.clause_nodes.push((try_node, hnd_node, filter_node));

        self.insert(index, try_node)?;
        self.insert(index, hnd_node)?;
        if let Some(f) = filter_node {
            self.insert(index, f)?;
        }
        Ok(())
    }

    /// Place one node, keeping siblings ordered and children contained
    fn insert(&mut self, clause: usize, node: u32) -> Result<()> {
        let (n_start, n_end) = {
            let n = &self.nodes[node as usize];
            (n.start, n.end)
        };
        if n_start > n_end {
            return self.defect(clause, RegionDefect::EmptyRange);
        }

        let mut slot = Slot::Root;
        loop {
            let root = match self.slot_get(slot) {
                None => {
                    self.slot_set(slot, Some(node));
                    return Ok(());
                }
                Some(r) => r,
            };
            let (r_start, r_end) = {
                let r = &self.nodes[root as usize];
                (r.start, r.end)
            };

            if n_start < r_start {
                if n_end < r_start {
                    // Disjoint, new left sibling.
                    self.nodes[node as usize].next = Some(root);
                    self.slot_set(slot, Some(node));
                    return Ok(());
                }
                if n_end < r_end {
                    return self.defect(clause, RegionDefect::OverlappingTry);
                }
                return self.insert_parent(slot, root, clause, node);
            }

            if n_end > r_end {
                if n_start > r_end {
                    // Disjoint, continue along the sibling chain.
                    slot = Slot::Next(root);
                    continue;
                }
                if n_start == r_start {
                    if self.nodes[node as usize].part.is_try()
                        || self.nodes[root as usize].part.is_try()
                    {
                        return self.insert_parent(slot, root, clause, node);
                    }
                    return self.defect(clause, RegionDefect::HandlersAtSameOffset);
                }
                return self.defect(clause, RegionDefect::OverlappingTry);
            }

            if n_start != r_start || n_end != r_end {
                // Strictly inside the root.
                if self.nodes[root as usize].part.is_try() {
                    if self.nodes[node as usize].part.is_try() {
                        // An inner try must be listed before the trys that
                        // enclose it; landing inside a resident try means the
                        // list had them backwards.
                        return self.defect(clause, RegionDefect::InnerTryAfterOuter);
                    }
                } else {
                    // Nested within a handler or filter. Clause order is
                    // unconstrained here, so the table needs sorting.
                    self.needs_sort = true;
                    if n_start == r_start && !self.nodes[node as usize].part.is_try() {
                        return self.defect(clause, RegionDefect::HandlersAtSameOffset);
                    }
                }
                slot = Slot::Child(root);
                continue;
            }

            // Identical extent: only mutually-protecting trys may coincide.
            let node_try = self.nodes[node as usize].part.is_try();
            let root_try = self.nodes[root as usize].part.is_try();
            if !node_try && !root_try {
                return self.defect(clause, RegionDefect::SharedHandler);
            }
            if !node_try || !root_try {
                return self.defect(clause, RegionDefect::HandlerAliasesTry);
            }
            // Linking next to the twin keeps sibling walks working for the
            // node that never entered the tree.
            self.nodes[node as usize].equivalent = Some(root);
            self.nodes[node as usize].next = Some(root);

            let node_hnd = self.clause_nodes[self.nodes[node as usize].clause].1;
            let root_hnd = self.clause_nodes[self.nodes[root as usize].clause].1;
            if self.nodes[node_hnd as usize].part.is_finally_or_fault()
                || self.nodes[root_hnd as usize].part.is_finally_or_fault()
            {
                return self.defect(clause, RegionDefect::MixedMutualProtection);
            }
            return Ok(());
        }
    }

    /// Make `node` the parent of `first` and of every following sibling it
    /// fully contains
    fn insert_parent(&mut self, slot: Slot, first: u32, clause: usize, node: u32) -> Result<()> {
        if self.nodes[node as usize].part == NodePart::Filter {
            return self.defect(clause, RegionDefect::ProtectedRegionInFilter);
        }
        let n_end = self.nodes[node as usize].end;
        debug_assert!(self.nodes[node as usize].start <= self.nodes[first as usize].start);
        debug_assert!(n_end >= self.nodes[first as usize].end);

        let mut last_child = None;
        let mut sibling = self.nodes[first as usize].next;
        while let Some(sib) = sibling {
            if self.nodes[sib as usize].start > n_end {
                break;
            }
            if self.nodes[sib as usize].end > n_end {
                return self.defect(clause, RegionDefect::OverlappingTry);
            }
            last_child = Some(sib);
            sibling = self.nodes[sib as usize].next;
        }

        match last_child {
            Some(lc) => {
                self.nodes[node as usize].next = self.nodes[lc as usize].next;
                self.nodes[lc as usize].next = None;
            }
            None => {
                self.nodes[node as usize].next = self.nodes[first as usize].next;
                self.nodes[first as usize].next = None;
            }
        }
        self.nodes[node as usize].child = Some(first);
        self.slot_set(slot, Some(node));
        Ok(())
    }

    /// Each clause's extents must all sit at one nesting level: the later
    /// ones must be reachable along the earlier one's sibling chain
    fn check_nesting_levels(&self) -> Result<()> {
        for (index, &(try_node, hnd_node, filter_node)) in self.clause_nodes.iter().enumerate() {
            let (mut p1, mut p2) = (try_node, hnd_node);
            if self.nodes[p1 as usize].start == self.nodes[p2 as usize].start {
                return self.defect(index, RegionDefect::TryHandlerSameStart);
            }
            if self.nodes[p1 as usize].start > self.nodes[p2 as usize].start {
                std::mem::swap(&mut p1, &mut p2);
            }
            let mut ok = self.sibling_follows(p1, p2);

            if ok {
                if let Some(p3) = filter_node {
                    let f_start = self.nodes[p3 as usize].start;
                    let (from, target) = if f_start < self.nodes[p1 as usize].start {
                        (p3, p1)
                    } else if f_start < self.nodes[p2 as usize].start {
                        (p1, p3)
                    } else {
                        (p2, p3)
                    };
                    ok = self.sibling_follows(from, target);
                }
            }

            if !ok {
                return self.defect(index, RegionDefect::HandlerNotContained);
            }
        }
        Ok(())
    }

    /// Is `target` (or its resident twin) a later sibling of `from`?
    fn sibling_follows(&self, from: u32, target: u32) -> bool {
        let target = self.nodes[target as usize].equivalent.unwrap_or(target);
        let mut cursor = self.nodes[from as usize].next;
        while let Some(n) = cursor {
            if n == target {
                return true;
            }
            cursor = self.nodes[n as usize].next;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(n: u32) -> Vec<BlockId> {
        (0..n).map(BlockId).collect()
    }

    fn defect_of(err: Error) -> RegionDefect {
        match err {
            Error::BadRegions { defect, .. } => defect,
            other => panic!("expected a region defect, got {other}"),
        }
    }

    #[test]
    fn test_single_catch() {
        let clauses = [RawClause::catch((1, 3), (3, 5))];
        let built = build_eh_table("f", &clauses, &layout(6)).unwrap();
        assert_eq!(built.table.len(), 1);
        assert!(!built.sorted);

        let d = &built.table[EhIndex(0)];
        assert_eq!(d.try_begin, BlockId(1));
        assert_eq!(d.try_last, BlockId(2));
        assert_eq!(d.hnd_begin, BlockId(3));
        assert_eq!(d.hnd_last, BlockId(4));
        assert_eq!(d.enclosing_try, None);

        assert_eq!(built.assignments[0], RegionAssignment::default());
        assert_eq!(built.assignments[1].try_index, Some(EhIndex(0)));
        assert_eq!(built.assignments[2].try_index, Some(EhIndex(0)));
        assert_eq!(built.assignments[3].hnd_index, Some(EhIndex(0)));
        assert_eq!(built.assignments[4].hnd_index, Some(EhIndex(0)));
        assert_eq!(built.assignments[3].try_index, None);
    }

    #[test]
    fn test_nested_trys_inner_first() {
        // Inner try inside the outer try, listed first as required.
        let clauses = [
            RawClause::catch((2, 3), (3, 4)),
            RawClause::catch((1, 5), (5, 7)),
        ];
        let built = build_eh_table("f", &clauses, &layout(8)).unwrap();
        assert_eq!(built.table[EhIndex(0)].enclosing_try, Some(EhIndex(1)));
        assert_eq!(built.table[EhIndex(0)].enclosing_hnd, None);
        assert_eq!(built.table[EhIndex(1)].enclosing_try, None);
        // Innermost membership wins on shared positions.
        assert_eq!(built.assignments[2].try_index, Some(EhIndex(0)));
        assert_eq!(built.assignments[1].try_index, Some(EhIndex(1)));
        assert_eq!(built.assignments[3].try_index, Some(EhIndex(1)));
        assert_eq!(built.assignments[3].hnd_index, Some(EhIndex(0)));
    }

    #[test]
    fn test_inner_try_after_outer_rejected() {
        let clauses = [
            RawClause::catch((1, 5), (5, 7)),
            RawClause::catch((2, 3), (3, 4)),
        ];
        let err = build_eh_table("f", &clauses, &layout(8)).unwrap_err();
        assert_eq!(defect_of(err), RegionDefect::InnerTryAfterOuter);
    }

    #[test]
    fn test_overlap_rejected() {
        let clauses = [
            RawClause::catch((0, 4), (6, 7)),
            RawClause::catch((2, 6), (7, 8)),
        ];
        let err = build_eh_table("f", &clauses, &layout(8)).unwrap_err();
        assert_eq!(defect_of(err), RegionDefect::OverlappingTry);
    }

    #[test]
    fn test_empty_try_rejected() {
        let clauses = [RawClause::catch((2, 2), (3, 4))];
        let err = build_eh_table("f", &clauses, &layout(5)).unwrap_err();
        assert_eq!(defect_of(err), RegionDefect::EmptyRange);
    }

    #[test]
    fn test_mutual_protection_chains() {
        // Two catches over the same try; entries stay adjacent and the inner
        // one's enclosing link points at its partner.
        let clauses = [
            RawClause::catch((0, 3), (3, 5)),
            RawClause::catch((0, 3), (5, 7)),
        ];
        let built = build_eh_table("f", &clauses, &layout(7)).unwrap();
        assert!(built.table.is_mutually_protecting(EhIndex(0), EhIndex(1)));
        assert_eq!(built.table[EhIndex(0)].enclosing_try, Some(EhIndex(1)));
        assert_eq!(built.table.true_enclosing_try(EhIndex(0)), None);
        // Try blocks belong to the first (innermost) partner.
        assert_eq!(built.assignments[0].try_index, Some(EhIndex(0)));
    }

    #[test]
    fn test_mutual_protection_with_finally_rejected() {
        let clauses = [
            RawClause::catch((0, 3), (3, 5)),
            RawClause::finally((0, 3), (5, 7)),
        ];
        let err = build_eh_table("f", &clauses, &layout(7)).unwrap_err();
        assert_eq!(defect_of(err), RegionDefect::MixedMutualProtection);
    }

    #[test]
    fn test_nested_in_handler_gets_sorted() {
        // The region inside the catch handler is listed after it; intake must
        // reorder so the nested clause ends up first.
        let clauses = [
            RawClause::catch((0, 2), (2, 8)),
            RawClause::catch((3, 4), (5, 6)),
        ];
        let built = build_eh_table("f", &clauses, &layout(8)).unwrap();
        assert!(built.sorted);
        // Entry 0 is now the nested clause.
        assert_eq!(built.table[EhIndex(0)].try_begin, BlockId(3));
        assert_eq!(built.table[EhIndex(0)].enclosing_hnd, Some(EhIndex(1)));
        assert_eq!(built.table[EhIndex(0)].enclosing_try, None);
        assert_eq!(built.assignments[3].try_index, Some(EhIndex(0)));
        assert_eq!(built.assignments[3].hnd_index, Some(EhIndex(1)));
    }

    #[test]
    fn test_filter_blocks_marked_as_handler() {
        let clauses = [RawClause::filtered((0, 2), 2, (4, 6))];
        let built = build_eh_table("f", &clauses, &layout(6)).unwrap();
        let d = &built.table[EhIndex(0)];
        assert_eq!(d.filter_begin, Some(BlockId(2)));
        assert_eq!(d.exception_block(), BlockId(2));
        assert_eq!(built.assignments[2].hnd_index, Some(EhIndex(0)));
        assert_eq!(built.assignments[3].hnd_index, Some(EhIndex(0)));
        assert_eq!(built.assignments[4].hnd_index, Some(EhIndex(0)));
    }

    #[test]
    fn test_shared_handler_rejected() {
        let clauses = [
            RawClause::catch((0, 2), (4, 6)),
            RawClause::catch((2, 4), (4, 6)),
        ];
        let err = build_eh_table("f", &clauses, &layout(6)).unwrap_err();
        assert_eq!(defect_of(err), RegionDefect::SharedHandler);
    }

    #[test]
    fn test_try_matching_handler_rejected() {
        // Second clause's try is extent-identical to the first clause's
        // handler.
        let clauses = [
            RawClause::catch((0, 2), (2, 4)),
            RawClause::catch((2, 4), (4, 6)),
        ];
        let err = build_eh_table("f", &clauses, &layout(6)).unwrap_err();
        assert_eq!(defect_of(err), RegionDefect::HandlerAliasesTry);
    }

    #[test]
    fn test_handler_detached_from_try_rejected() {
        // The first clause's handler sits inside the second clause's try
        // while its own try sits outside, so the clause's parts end up at
        // different nesting levels.
        let clauses = [
            RawClause::catch((5, 6), (1, 2)),
            RawClause::catch((0, 3), (3, 5)),
        ];
        let err = build_eh_table("f", &clauses, &layout(7)).unwrap_err();
        assert_eq!(defect_of(err), RegionDefect::HandlerNotContained);
    }
}
