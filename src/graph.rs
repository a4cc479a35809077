//! The flow graph: blocks in layout order, locals, and the region table
//!
//! Blocks and nodes live in arenas and are addressed by handle. The graph
//! keeps the block layout as an explicit sequence plus a position lookup;
//! positional facts (fallthrough, call-finally pairing, filter ranges) are
//! derived from it rather than stored. Region membership queries follow the
//! table's innermost-first order: walking an enclosing chain can stop as soon
//! as it reaches or passes the queried region.
//!
//! Structural edits (block insertion, region add/remove) go through the graph
//! so sequence, predecessor edges and region indices stay consistent in one
//! place.

use crate::arena::Arena;
use crate::eh::clauses::{build_eh_table, RawClause};
use crate::eh::succ;
use crate::eh::table::{EhDescriptor, EhIndex, EhTable};
use crate::error::Result;
use crate::ir::block::{BasicBlock, BlockId, BlockKind};
use crate::ir::node::{IrNode, NodeId};
use crate::ir::{LocalId, LocalVar, VarSet};
use tracing::debug;

pub struct FlowGraph {
    /// Name of the compilation unit, used in diagnostics
    pub unit: String,
    blocks: Arena<BasicBlock>,
    nodes: Arena<IrNode>,
    locals: Vec<LocalVar>,
    pub eh_table: EhTable,
    /// Layout order of live blocks
    sequence: Vec<BlockId>,
    /// Block handle to layout position; stale for removed blocks
    positions: Vec<u32>,
    next_num: u32,
    tracked_count: u32,
}

impl FlowGraph {
    pub fn new(unit: impl Into<String>) -> Self {
        FlowGraph {
            unit: unit.into(),
            blocks: Arena::new(),
            nodes: Arena::new(),
            locals: Vec::new(),
            eh_table: EhTable::new(),
            sequence: Vec::new(),
            positions: Vec::new(),
            next_num: 1,
            tracked_count: 0,
        }
    }

    // ----- locals -----

    pub fn add_local(&mut self, var: LocalVar) -> LocalId {
        let id = LocalId(self.locals.len() as u32);
        self.locals.push(var);
        id
    }

    pub fn local(&self, id: LocalId) -> &LocalVar {
        &self.locals[id.0 as usize]
    }

    pub fn local_mut(&mut self, id: LocalId) -> &mut LocalVar {
        &mut self.locals[id.0 as usize]
    }

    pub fn locals(&self) -> impl Iterator<Item = (LocalId, &LocalVar)> {
        self.locals
            .iter()
            .enumerate()
            .map(|(i, v)| (LocalId(i as u32), v))
    }

    pub fn local_count(&self) -> usize {
        self.locals.len()
    }

    /// Assign dense tracked indices and size every block's liveness sets
    ///
    /// Run after the local table and block set are final; the universe of all
    /// [`VarSet`]s in the unit is fixed here.
    pub fn seal_locals(&mut self) -> u32 {
        let mut next = 0u32;
        for var in &mut self.locals {
            var.tracked_index = if var.tracked {
                let index = next;
                next += 1;
                Some(index)
            } else {
                None
            };
        }
        self.tracked_count = next;
        let universe = next as usize;
        for (_, block) in self.blocks.iter_mut() {
            block.var_use = VarSet::new(universe);
            block.var_def = VarSet::new(universe);
            block.live_in = VarSet::new(universe);
            block.live_out = VarSet::new(universe);
        }
        next
    }

    pub fn tracked_count(&self) -> u32 {
        self.tracked_count
    }

    /// Fresh set sized to the sealed universe
    pub fn new_var_set(&self) -> VarSet {
        VarSet::new(self.tracked_count as usize)
    }

    // ----- nodes -----

    pub fn add_node(&mut self, node: IrNode) -> NodeId {
        NodeId(self.nodes.alloc(node))
    }

    pub fn node(&self, id: NodeId) -> &IrNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut IrNode {
        &mut self.nodes[id.0]
    }

    /// Allocate a node and append it to `block`'s body
    pub fn append_node(&mut self, block: BlockId, node: IrNode) -> NodeId {
        let id = self.add_node(node);
        self.blocks[block.0].nodes.push(id);
        id
    }

    // ----- blocks and layout -----

    /// Append a block at the end of the layout
    pub fn add_block(&mut self, kind: BlockKind) -> BlockId {
        let block = self.new_block(kind);
        let id = BlockId(self.blocks.alloc(block));
        self.sequence.push(id);
        self.positions.push(self.sequence.len() as u32 - 1);
        id
    }

    fn new_block(&mut self, kind: BlockKind) -> BasicBlock {
        let num = self.next_num;
        self.next_num += 1;
        let mut block = BasicBlock::new(num, kind);
        if self.tracked_count > 0 {
            let universe = self.tracked_count as usize;
            block.var_use = VarSet::new(universe);
            block.var_def = VarSet::new(universe);
            block.live_in = VarSet::new(universe);
            block.live_out = VarSet::new(universe);
        }
        block
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.0]
    }

    /// Number of live blocks
    pub fn block_count(&self) -> usize {
        self.sequence.len()
    }

    /// Live blocks in layout order
    pub fn sequence(&self) -> &[BlockId] {
        &self.sequence
    }

    pub fn position(&self, id: BlockId) -> u32 {
        debug_assert!(!self.blocks[id.0].removed, "position of a removed block");
        self.positions[id.0 as usize]
    }

    pub fn first_block(&self) -> Option<BlockId> {
        self.sequence.first().copied()
    }

    pub fn last_block(&self) -> Option<BlockId> {
        self.sequence.last().copied()
    }

    /// Next block in layout order
    pub fn block_after(&self, id: BlockId) -> Option<BlockId> {
        let pos = self.position(id) as usize;
        self.sequence.get(pos + 1).copied()
    }

    /// Previous block in layout order
    pub fn block_before(&self, id: BlockId) -> Option<BlockId> {
        let pos = self.position(id) as usize;
        pos.checked_sub(1).map(|p| self.sequence[p])
    }

    fn rebuild_positions(&mut self) {
        self.positions.resize(self.blocks.len(), u32::MAX);
        for (pos, &id) in self.sequence.iter().enumerate() {
            self.positions[id.0 as usize] = pos as u32;
        }
    }

    /// Does control reach the next block in layout purely by position?
    fn falls_into_next(&self, id: BlockId) -> bool {
        matches!(
            self.blocks[id.0].kind,
            BlockKind::Fallthrough | BlockKind::Cond { .. }
        )
    }

    /// Splice an empty block into the layout immediately before `anchor`
    ///
    /// A fallthrough edge from the previous block moves onto the new block;
    /// the new block's own outgoing edges are registered from its kind.
    /// Region membership and table pointers are the caller's to set.
    pub fn insert_block_before(&mut self, kind: BlockKind, anchor: BlockId) -> BlockId {
        let pos = self.position(anchor) as usize;
        let block = self.new_block(kind);
        let id = BlockId(self.blocks.alloc(block));
        self.sequence.insert(pos, id);
        self.rebuild_positions();

        if pos > 0 {
            let prev = self.sequence[pos - 1];
            if self.falls_into_next(prev) {
                self.blocks[anchor.0].remove_pred(prev);
                self.blocks[id.0].add_pred(prev);
            }
        }
        self.link_outgoing(id);
        debug!(
            unit = %self.unit,
            new = %id,
            before = %anchor,
            "inserted block into layout"
        );
        id
    }

    /// Splice an empty block into the layout immediately after `anchor`
    pub fn insert_block_after(&mut self, kind: BlockKind, anchor: BlockId) -> BlockId {
        let pos = self.position(anchor) as usize;
        let block = self.new_block(kind);
        let id = BlockId(self.blocks.alloc(block));
        self.sequence.insert(pos + 1, id);
        self.rebuild_positions();

        if self.falls_into_next(anchor) {
            if let Some(old_next) = self.sequence.get(pos + 2).copied() {
                self.blocks[old_next.0].remove_pred(anchor);
            }
            self.blocks[id.0].add_pred(anchor);
        }
        self.link_outgoing(id);
        debug!(
            unit = %self.unit,
            new = %id,
            after = %anchor,
            "inserted block into layout"
        );
        id
    }

    fn link_outgoing(&mut self, id: BlockId) {
        for succ in self.regular_successors(id) {
            self.blocks[succ.0].add_pred(id);
        }
    }

    /// Mark `id` removed and take it out of the layout
    ///
    /// Outgoing edges are unlinked; the caller has already redirected or
    /// dropped incoming ones, and repairs any region pointers naming this
    /// block.
    pub fn remove_block(&mut self, id: BlockId) {
        debug_assert!(
            self.blocks[id.0].preds.is_empty(),
            "removing a block that still has predecessors"
        );
        for succ in self.regular_successors(id) {
            self.blocks[succ.0].remove_pred(id);
        }
        let pos = self.position(id) as usize;
        self.sequence.remove(pos);
        self.rebuild_positions();
        self.blocks[id.0].removed = true;
    }

    // ----- predecessor edges -----

    /// Derive every block's predecessor list from jump kinds and layout
    ///
    /// Finally-return edges depend on the call-finally predecessors of their
    /// handler's first block, so those are linked in a second pass.
    pub fn compute_pred_edges(&mut self) {
        let order: Vec<BlockId> = self.sequence.clone();
        for &id in &order {
            self.blocks[id.0].preds.clear();
        }
        let mut deferred = Vec::new();
        let mut edges = Vec::new();
        for &id in &order {
            if matches!(self.blocks[id.0].kind, BlockKind::EhFinallyRet) {
                deferred.push(id);
                continue;
            }
            for succ in self.regular_successors(id) {
                edges.push((id, succ));
            }
        }
        for (pred, succ) in edges.drain(..) {
            self.blocks[succ.0].add_pred(pred);
        }
        for id in deferred {
            for succ in self.regular_successors(id) {
                edges.push((id, succ));
            }
        }
        for (pred, succ) in edges {
            self.blocks[succ.0].add_pred(pred);
        }
    }

    /// Rewrite every jump in `block` targeting `old` to target `new`,
    /// moving the predecessor counts along
    pub fn replace_jump_target(&mut self, block: BlockId, old: BlockId, new: BlockId) {
        let mut moved = 0u32;
        match &mut self.blocks[block.0].kind {
            BlockKind::Always { target }
            | BlockKind::Leave { target }
            | BlockKind::Cond { target }
            | BlockKind::CallFinally { target }
            | BlockKind::EhCatchRet { target } => {
                if *target == old {
                    *target = new;
                    moved = 1;
                }
            }
            BlockKind::Switch { targets } => {
                for t in targets.iter_mut() {
                    if *t == old {
                        *t = new;
                        moved += 1;
                    }
                }
            }
            BlockKind::Fallthrough
            | BlockKind::Return
            | BlockKind::Throw
            | BlockKind::EhFinallyRet
            | BlockKind::EhFilterRet => {}
        }
        for _ in 0..moved {
            self.blocks[old.0].remove_pred(block);
            self.blocks[new.0].add_pred(block);
        }
    }

    // ----- successors -----

    /// Ordinary control-flow successors in forward order
    ///
    /// Conditional jumps yield the fallthrough block first; a finally return
    /// yields the continuation of every non-retless caller of its handler.
    pub fn regular_successors(&self, id: BlockId) -> Vec<BlockId> {
        let block = &self.blocks[id.0];
        match &block.kind {
            BlockKind::Fallthrough => self.block_after(id).into_iter().collect(),
            BlockKind::Always { target }
            | BlockKind::Leave { target }
            | BlockKind::CallFinally { target }
            | BlockKind::EhCatchRet { target } => vec![*target],
            BlockKind::Cond { target } => {
                let mut out = Vec::with_capacity(2);
                if let Some(next) = self.block_after(id) {
                    out.push(next);
                }
                out.push(*target);
                out
            }
            BlockKind::Switch { targets } => targets.clone(),
            BlockKind::Return | BlockKind::Throw => Vec::new(),
            BlockKind::EhFilterRet => {
                // The filter's verdict continues in its region's handler.
                match block.hnd_index {
                    Some(h) => vec![self.eh_table[h].hnd_begin],
                    None => Vec::new(),
                }
            }
            BlockKind::EhFinallyRet => {
                let mut out = Vec::new();
                if let Some(h) = block.hnd_index {
                    let fin_beg = self.eh_table[h].hnd_begin;
                    for edge in &self.blocks[fin_beg.0].preds {
                        let caller = &self.blocks[edge.pred.0];
                        if let BlockKind::CallFinally { target } = caller.kind {
                            if target == fin_beg && !caller.retless_call {
                                if let Some(tail) = self.block_after(edge.pred) {
                                    out.push(tail);
                                }
                            }
                        }
                    }
                }
                out
            }
        }
    }

    /// Ordinary successors plus exception-flow successors
    pub fn all_successors(&self, id: BlockId) -> Vec<BlockId> {
        succ::all_successors(self, id)
    }

    // ----- regions -----

    /// Validate `clauses`, build the region table, and stamp every block's
    /// innermost region membership
    ///
    /// Returns true when the clause list had to be reordered.
    pub fn attach_regions(&mut self, clauses: &[RawClause]) -> Result<bool> {
        let built = build_eh_table(&self.unit, clauses, &self.sequence)?;
        self.eh_table = built.table;
        for (pos, assign) in built.assignments.iter().enumerate() {
            let id = self.sequence[pos];
            let block = &mut self.blocks[id.0];
            block.try_index = assign.try_index;
            block.hnd_index = assign.hnd_index;
        }

        let mut anchors = Vec::new();
        for (_, desc) in self.eh_table.iter() {
            anchors.push(desc.try_begin);
            anchors.push(desc.hnd_begin);
            if let Some(f) = desc.filter_begin {
                anchors.push(f);
            }
        }
        for id in anchors {
            let block = &mut self.blocks[id.0];
            block.keep = true;
            block.label_target = true;
        }
        Ok(built.sorted)
    }

    pub fn try_index_of(&self, id: BlockId) -> Option<EhIndex> {
        self.blocks[id.0].try_index
    }

    pub fn handler_index_of(&self, id: BlockId) -> Option<EhIndex> {
        self.blocks[id.0].hnd_index
    }

    /// Innermost region containing the block; the bool is true when it is the
    /// try side
    pub fn innermost_region_of(&self, id: BlockId) -> Option<(EhIndex, bool)> {
        let block = &self.blocks[id.0];
        match (block.try_index, block.hnd_index) {
            (None, None) => None,
            (Some(t), None) => Some((t, true)),
            (None, Some(h)) => Some((h, false)),
            (Some(t), Some(h)) => {
                if t < h {
                    Some((t, true))
                } else {
                    Some((h, false))
                }
            }
        }
    }

    /// Is `id` within the try body of `region` (directly or nested)?
    pub fn in_try_regions(&self, region: EhIndex, id: BlockId) -> bool {
        self.eh_table.in_try_chain(region, self.blocks[id.0].try_index)
    }

    /// Is `id` within the handler body of `region` (directly or nested)?
    pub fn in_handler_regions(&self, region: EhIndex, id: BlockId) -> bool {
        self.eh_table.in_hnd_chain(region, self.blocks[id.0].hnd_index)
    }

    /// Would an exception raised in `id` be seen by `region`'s handler?
    pub fn in_exn_flow_regions(&self, region: EhIndex, id: BlockId) -> bool {
        self.eh_table.in_try_chain(region, self.exn_flow_region(id))
    }

    /// The innermost region whose handler sees exceptions raised in `id`
    ///
    /// Inside a filter this is not the filter's own region: an exception
    /// escaping a filter goes to whatever encloses the filter's region, since
    /// the filter runs on behalf of a still-unmatched exception.
    pub fn exn_flow_region(&self, id: BlockId) -> Option<EhIndex> {
        let block = &self.blocks[id.0];
        if let Some(h) = block.hnd_index {
            if self.in_filter_range(h, id) {
                return self.eh_table[h].enclosing_try;
            }
        }
        block.try_index
    }

    /// Is `id` one of the filter blocks of `region`?
    pub fn in_filter_range(&self, region: EhIndex, id: BlockId) -> bool {
        let desc = &self.eh_table[region];
        match desc.filter_begin {
            Some(filter) => {
                let pos = self.position(id);
                pos >= self.position(filter) && pos < self.position(desc.hnd_begin)
            }
            None => false,
        }
    }

    /// Is `id` the first block of its innermost try region?
    pub fn is_try_begin(&self, id: BlockId) -> bool {
        match self.blocks[id.0].try_index {
            Some(t) => self.eh_table[t].try_begin == id,
            None => false,
        }
    }

    /// Is `id` the first block of its innermost handler or of its filter?
    pub fn is_handler_begin(&self, id: BlockId) -> bool {
        match self.blocks[id.0].hnd_index {
            Some(h) => {
                let desc = &self.eh_table[h];
                desc.hnd_begin == id || desc.filter_begin == Some(id)
            }
            None => false,
        }
    }

    /// Is `id` the first block of a filter?
    pub fn is_filter_begin(&self, id: BlockId) -> bool {
        match self.blocks[id.0].hnd_index {
            Some(h) => self.eh_table[h].filter_begin == Some(id),
            None => false,
        }
    }

    /// Is `id` the last block of its innermost try region?
    pub fn is_try_last(&self, id: BlockId) -> bool {
        match self.blocks[id.0].try_index {
            Some(t) => self.eh_table[t].try_last == id,
            None => false,
        }
    }

    /// Is `id` the last block of its innermost handler region?
    pub fn is_handler_last(&self, id: BlockId) -> bool {
        match self.blocks[id.0].hnd_index {
            Some(h) => self.eh_table[h].hnd_last == id,
            None => false,
        }
    }

    /// Deepest try region containing both blocks
    pub fn innermost_common_try_region(&self, a: BlockId, b: BlockId) -> Option<EhIndex> {
        for (index, _) in self.eh_table.iter() {
            if self.in_try_regions(index, a) && self.in_try_regions(index, b) {
                return Some(index);
            }
        }
        None
    }

    /// The empty continuation block paired with a call-finally
    pub fn is_call_finally_pair_tail(&self, id: BlockId) -> bool {
        if !matches!(self.blocks[id.0].kind, BlockKind::Always { .. }) {
            return false;
        }
        match self.block_before(id) {
            Some(prev) => {
                let p = &self.blocks[prev.0];
                matches!(p.kind, BlockKind::CallFinally { .. }) && !p.retless_call
            }
            None => false,
        }
    }

    /// Repoint region last-block pointers from `old_last` to `new_last`
    ///
    /// Every region ending at `old_last` ends at `new_last` afterwards; used
    /// when a block is appended to or removed from the tail of regions.
    pub fn update_last_blocks(&mut self, old_last: BlockId, new_last: BlockId) {
        for i in 0..self.eh_table.len() as u32 {
            let desc = &mut self.eh_table[EhIndex(i)];
            if desc.try_last == old_last {
                desc.try_last = new_last;
            }
            if desc.hnd_last == old_last {
                desc.hnd_last = new_last;
            }
        }
    }

    /// Remove region `index` from the table and remap every block's indices
    ///
    /// Blocks of the removed region fall back to its enclosing region.
    pub fn remove_eh_region(&mut self, index: EhIndex) {
        let remap = self.eh_table.remove_entry(index);
        for (_, block) in self.blocks.iter_mut() {
            block.try_index = remap.map_try(block.try_index);
            block.hnd_index = remap.map_hnd(block.hnd_index);
        }
        debug!(unit = %self.unit, removed = %index, "removed region-table entry");
    }

    /// Insert `desc` at table position `index` and remap every block's
    /// indices
    ///
    /// The descriptor's enclosing links must already be in the post-insert
    /// index space; blocks belonging to the new region are stamped by the
    /// caller afterwards.
    pub fn add_eh_region(&mut self, index: EhIndex, desc: EhDescriptor) -> Result<()> {
        let remap = self.eh_table.add_entry(index, desc)?;
        for (_, block) in self.blocks.iter_mut() {
            block.try_index = remap.map_try(block.try_index);
            block.hnd_index = remap.map_hnd(block.hnd_index);
        }
        debug!(unit = %self.unit, inserted = %index, "inserted region-table entry");
        Ok(())
    }

    /// One line per region, for trace output
    pub fn region_summary(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        for (index, d) in self.eh_table.iter() {
            let _ = write!(out, "{index}: {:?} try {}..{}", d.kind, d.try_begin, d.try_last);
            if let Some(f) = d.filter_begin {
                let _ = write!(out, " filter {f}");
            }
            let _ = write!(out, " hnd {}..{}", d.hnd_begin, d.hnd_last);
            match d.enclosing_try {
                Some(t) => {
                    let _ = write!(out, " encl-try {t}");
                }
                None => {
                    let _ = write!(out, " encl-try -");
                }
            }
            match d.enclosing_hnd {
                Some(h) => {
                    let _ = writeln!(out, " encl-hnd {h}");
                }
                None => {
                    let _ = writeln!(out, " encl-hnd -");
                }
            }
        }
        out
    }
}
