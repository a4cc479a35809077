//! Interval and reference-position construction
//!
//! One linear pass over the flow graph turns lowered IR into the allocator's
//! working form: an [`Interval`] per value lifetime and a [`RefPosition`] per
//! point where a lifetime touches a register. The walk visits blocks in layout
//! order and nodes in execution order, handing every node a two-slot location
//! so that uses and register clobbers land on the node's own (even) location
//! and definitions on the following odd one.
//!
//! # Architecture
//!
//! - [`refpos`]: locations, reference kinds, positions, per-register chains
//! - [`interval`]: intervals and the preference-steering policy
//! - [`liveness`]: per-block use/def sets, the live-in fixpoint, death marks
//! - [`nodes`]: register shapes of each operation (operand/def candidates,
//!   read-modify-write, scratch needs)
//! - [`kills`]: which registers an operation clobbers
//! - [`pool`]: the pending-definition list connecting producers to consumers
//!
//! The walk itself lives here. Per block it elects a visited predecessor for
//! live-in register locations, fabricates boundary definitions for values that
//! appear out of thin air, emits one boundary position, then builds each
//! node's uses, kills, scratch pairs, and defs. Values still live at a block's
//! end with no downstream reference inside the walked range get exposed uses;
//! values flowing out keep their final reference demoted from "last use".
//!
//! # Usage
//!
//! ```rust,ignore
//! use lsra::build::{self, BuildOptions, Builder};
//!
//! // graph: a FlowGraph with sealed locals and predecessor edges
//! let product = build::build(&mut graph, &target)?;
//! product.validate()?;
//! for (id, pos) in product.timeline() {
//!     println!("{}", pos);
//! }
//! ```

pub mod interval;
pub mod kills;
pub mod liveness;
pub mod nodes;
pub mod pool;
pub mod refpos;

pub use interval::{DefaultPolicy, Interval, IntervalId, PreferencePolicy};
pub use nodes::{NodeConstraints, ScratchSpec};
pub use pool::DefList;
pub use refpos::{
    Location, RefChain, RefKind, RefPosId, RefPosition, Referent, RegRecord,
};

use crate::error::{Error, Result};
use crate::graph::FlowGraph;
use crate::ir::block::BlockId;
use crate::ir::node::{NodeId, OpKind};
use crate::ir::{LocalId, VarSet};
use crate::regs::{RegClass, RegMask, RegNum, TargetModel};
use crate::arena::Arena;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

/// Options controlling the build walk
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Give candidate locals their own intervals. When off, every local
    /// reference goes through memory and only tree temporaries get intervals.
    pub enregister_locals: bool,
    /// Zero-initialize every uninitialized live-in local at entry, not just
    /// GC references
    pub zero_init_uninit: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            enregister_locals: true,
            zero_init_uninit: false,
        }
    }
}

impl BuildOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enregister_locals(mut self, on: bool) -> Self {
        self.enregister_locals = on;
        self
    }

    pub fn with_zero_init_uninit(mut self, on: bool) -> Self {
        self.zero_init_uninit = on;
        self
    }
}

/// Counters reported after a build
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildStats {
    pub intervals: u32,
    pub local_intervals: u32,
    pub positions: u32,
    pub uses: u32,
    pub defs: u32,
    pub kills: u32,
    pub fixed_refs: u32,
    pub blocks: u32,
}

/// Result of the build walk
///
/// Positions sit in the arena in timeline order: nondecreasing location, and
/// within one location in the order the walk emitted them (fixed-register
/// companions before the positions that forced them, uses before kills before
/// defs of the same node).
#[derive(Debug)]
pub struct BuildProduct {
    pub intervals: Arena<Interval>,
    pub positions: Arena<RefPosition>,
    /// Per-register reference chains, indexed by global register number
    pub reg_records: Vec<RegRecord>,
    /// Interval of each candidate local, indexed by tracked index
    pub local_intervals: Vec<Option<IntervalId>>,
    /// Predecessor elected to supply live-in register locations, indexed by
    /// layout position of the block
    pub live_in_pred: Vec<Option<BlockId>>,
    pub stats: BuildStats,
}

impl BuildProduct {
    pub fn interval(&self, id: IntervalId) -> &Interval {
        &self.intervals[id.0]
    }

    pub fn position(&self, id: RefPosId) -> &RefPosition {
        &self.positions[id.0]
    }

    /// Interval of the candidate local with this tracked index
    pub fn local_interval(&self, tracked_index: u32) -> Option<IntervalId> {
        self.local_intervals
            .get(tracked_index as usize)
            .copied()
            .flatten()
    }

    /// All positions in timeline order
    pub fn timeline(&self) -> impl Iterator<Item = (RefPosId, &RefPosition)> {
        self.positions.iter().map(|(i, p)| (RefPosId(i), p))
    }

    /// Positions of one chain, first to last
    pub fn chain_positions(&self, chain: &RefChain) -> Vec<RefPosId> {
        let mut out = Vec::new();
        let mut cur = chain.first;
        while let Some(id) = cur {
            out.push(id);
            cur = self.positions[id.0].next;
        }
        out
    }

    /// Check the structural discipline of the product
    ///
    /// The timeline must never move backward; every chain must be ordered by
    /// location; a tree temporary's first reference must be a definition; a
    /// single-def interval may only be defined by its first position; and no
    /// local may be read in the same block after its value already died.
    pub fn validate(&self) -> Result<()> {
        let mut prev = Location::MIN;
        for (_, pos) in self.positions.iter() {
            if pos.location < prev {
                return Err(Error::internal(format!(
                    "position timeline regresses at {}",
                    pos.location
                )));
            }
            prev = pos.location;
        }
        for (idx, interval) in self.intervals.iter() {
            let mut cur = interval.chain.first;
            let mut prev_loc: Option<Location> = None;
            let mut defined = false;
            let mut last_use_block: Option<BlockId> = None;
            let mut first = true;
            while let Some(id) = cur {
                let pos = &self.positions[id.0];
                if let Some(p) = prev_loc {
                    if pos.location < p {
                        return Err(Error::internal(format!(
                            "interval {} chain out of order at {}",
                            idx, pos.location
                        )));
                    }
                }
                prev_loc = Some(pos.location);
                if first && !interval.is_local_var() && !pos.kind.is_def() {
                    return Err(Error::internal(format!(
                        "interval {} referenced before any definition",
                        idx
                    )));
                }
                if interval.is_local_var()
                    && !defined
                    && pos.kind.is_use()
                    && !pos.last_use
                    && last_use_block.is_some()
                    && pos.block == last_use_block
                {
                    return Err(Error::internal(format!(
                        "interval {} read at {} after its last use in the same block",
                        idx, pos.location
                    )));
                }
                if interval.is_single_def
                    && pos.kind.is_def()
                    && interval.chain.first != Some(id)
                {
                    return Err(Error::internal(format!(
                        "single-def interval {} redefined at {}",
                        idx, pos.location
                    )));
                }
                if pos.last_use {
                    defined = false;
                    last_use_block = pos.block;
                }
                if pos.kind.is_def() {
                    defined = true;
                }
                first = false;
                cur = pos.next;
            }
        }
        Ok(())
    }
}

/// The build walk
///
/// Construct with [`Builder::new`], or [`Builder::with_policy`] to steer
/// register preferences differently from [`DefaultPolicy`].
pub struct Builder<P: PreferencePolicy = DefaultPolicy> {
    options: BuildOptions,
    policy: P,
}

impl Builder<DefaultPolicy> {
    pub fn new(options: BuildOptions) -> Self {
        Builder {
            options,
            policy: DefaultPolicy,
        }
    }
}

impl<P: PreferencePolicy> Builder<P> {
    pub fn with_policy(options: BuildOptions, policy: P) -> Self {
        Builder { options, policy }
    }

    /// Run the walk over `graph`
    ///
    /// Locals must be sealed, predecessor edges computed, and liveness
    /// current; [`build`] takes care of the liveness pass itself.
    pub fn build(&self, graph: &FlowGraph, target: &TargetModel) -> Result<BuildProduct> {
        let mut walk = Walk::new(graph, target, &self.options, &self.policy);
        walk.run()?;
        let product = walk.finish();
        debug!(
            unit = %graph.unit,
            intervals = product.stats.intervals,
            positions = product.stats.positions,
            "build complete"
        );
        Ok(product)
    }
}

/// Recompute liveness and build with default options and policy
pub fn build(graph: &mut FlowGraph, target: &TargetModel) -> Result<BuildProduct> {
    liveness::compute(graph);
    Builder::new(BuildOptions::default()).build(graph, target)
}

/// What one operand use looked like, for read-modify-write and preference
/// decisions made while the node's defs are built
#[derive(Clone, Copy)]
struct UseInfo {
    pos: RefPosId,
    interval: IntervalId,
    is_local: bool,
    death: bool,
}

struct Walk<'a, P: PreferencePolicy> {
    graph: &'a FlowGraph,
    target: &'a TargetModel,
    options: &'a BuildOptions,
    policy: &'a P,
    intervals: Arena<Interval>,
    positions: Arena<RefPosition>,
    reg_records: Vec<RegRecord>,
    /// Interval per tracked index; `None` for tracked non-candidates
    local_intervals: Vec<Option<IntervalId>>,
    /// Local behind each tracked index
    tracked_local: Vec<LocalId>,
    /// Tracked indices of candidate locals
    candidate_vars: VarSet,
    /// Candidate locals live at the walk's current point
    live: VarSet,
    visited: Vec<bool>,
    live_in_pred: Vec<Option<BlockId>>,
    def_list: DefList,
    loc: Location,
    cur_block: Option<BlockId>,
    cur_node: Option<NodeId>,
    /// A scratch or operand use of the current node reaches into the def slot
    pending_delay_free: bool,
    internal_defs: Vec<RefPosId>,
}

impl<'a, P: PreferencePolicy> Walk<'a, P> {
    fn new(
        graph: &'a FlowGraph,
        target: &'a TargetModel,
        options: &'a BuildOptions,
        policy: &'a P,
    ) -> Self {
        Walk {
            graph,
            target,
            options,
            policy,
            intervals: Arena::new(),
            positions: Arena::new(),
            reg_records: refpos::build_reg_records(target),
            local_intervals: Vec::new(),
            tracked_local: Vec::new(),
            candidate_vars: graph.new_var_set(),
            live: graph.new_var_set(),
            visited: vec![false; graph.block_count()],
            live_in_pred: Vec::new(),
            def_list: DefList::new(),
            loc: Location::MIN,
            cur_block: None,
            cur_node: None,
            pending_delay_free: false,
            internal_defs: Vec::new(),
        }
    }

    fn run(&mut self) -> Result<()> {
        if self.options.enregister_locals {
            self.create_local_intervals();
            self.build_param_defs();
        }
        let sequence = self.graph.sequence().to_vec();
        for (i, &block) in sequence.iter().enumerate() {
            self.begin_block(block, i == 0);
            self.build_block_nodes(block)?;
            self.end_block(block)?;
        }
        if let Some(&last) = sequence.last() {
            // Control that leaves the walked range still needs a boundary to
            // resolve against.
            if !self.graph.regular_successors(last).is_empty() {
                self.new_position(self.loc, RefKind::BlockBoundary, Referent::None, RegMask::NONE);
            }
        }
        self.resolve_conflicts();
        Ok(())
    }

    fn finish(self) -> BuildProduct {
        let mut stats = BuildStats {
            intervals: self.intervals.len() as u32,
            local_intervals: self
                .local_intervals
                .iter()
                .filter(|iv| iv.is_some())
                .count() as u32,
            positions: self.positions.len() as u32,
            blocks: self.live_in_pred.len() as u32,
            ..BuildStats::default()
        };
        for (_, pos) in self.positions.iter() {
            match pos.kind {
                RefKind::Use | RefKind::ExposedUse => stats.uses += 1,
                RefKind::Def | RefKind::ParamDef | RefKind::ZeroInit | RefKind::DummyDef => {
                    stats.defs += 1
                }
                RefKind::Kill => stats.kills += 1,
                RefKind::FixedReg => stats.fixed_refs += 1,
                _ => {}
            }
        }
        BuildProduct {
            intervals: self.intervals,
            positions: self.positions,
            reg_records: self.reg_records,
            local_intervals: self.local_intervals,
            live_in_pred: self.live_in_pred,
            stats,
        }
    }

    // ----- locals and entry -----

    fn create_local_intervals(&mut self) {
        let graph = self.graph;
        let universe = graph.tracked_count() as usize;
        self.local_intervals = vec![None; universe];
        self.tracked_local = vec![LocalId(0); universe];
        for (id, var) in graph.locals() {
            let Some(ti) = var.tracked_index else { continue };
            self.tracked_local[ti as usize] = id;
            if !var.candidate {
                continue;
            }
            self.candidate_vars.insert(ti);
            let all = self.target.all_regs(var.class);
            let interval = Interval::for_local(id, var.class, all);
            self.local_intervals[ti as usize] = Some(IntervalId(self.intervals.alloc(interval)));
        }
    }

    /// Incoming parameters define their intervals before any block runs
    fn build_param_defs(&mut self) {
        let graph = self.graph;
        let params: Vec<(u32, Option<RegNum>)> = graph
            .locals()
            .filter(|(_, var)| var.is_param && var.candidate)
            .filter_map(|(_, var)| var.tracked_index.map(|ti| (ti, var.arg_reg)))
            .collect();
        for (ti, arg_reg) in params {
            let Some(interval) = self.local_intervals[ti as usize] else {
                continue;
            };
            let mask = arg_reg.map(RegMask::single).unwrap_or(RegMask::NONE);
            let id = self.new_position(
                Location::MIN,
                RefKind::ParamDef,
                Referent::Interval(interval),
                mask,
            );
            // A parameter nobody reads soon should not occupy a register.
            self.positions[id.0].reg_optional = true;
        }
    }

    /// Entry treatment of non-parameter live-in locals: GC references (and
    /// everything, when asked) get a zero-init definition; the rest start
    /// life on the stack
    fn insert_entry_defs(&mut self) {
        let graph = self.graph;
        let live: Vec<u32> = self.live.iter().collect();
        for ti in live {
            let local = self.tracked_local[ti as usize];
            let var = graph.local(local);
            if var.is_param {
                continue;
            }
            let Some(interval) = self.local_intervals[ti as usize] else {
                continue;
            };
            if var.is_gc_ref || self.options.zero_init_uninit {
                let id = self.new_position(
                    Location::MIN,
                    RefKind::ZeroInit,
                    Referent::Interval(interval),
                    RegMask::NONE,
                );
                self.positions[id.0].reg_optional = true;
            } else {
                trace!(local = %local, "uninitialized live-in starts spilled");
                self.intervals[interval.0].spilled_by_default = true;
            }
        }
    }

    // ----- block walk -----

    fn begin_block(&mut self, block: BlockId, is_entry: bool) {
        self.cur_block = Some(block);
        self.cur_node = None;
        let elected = self.elect_live_in_pred(block);
        self.live_in_pred.push(elected);
        if self.options.enregister_locals {
            let graph = self.graph;
            self.live.copy_from(&graph.block(block).live_in);
            self.live.intersect_with(&self.candidate_vars);
            if is_entry {
                self.insert_entry_defs();
            } else if !graph.is_handler_begin(block) && !graph.is_filter_begin(block) {
                // Handler entries get their state from the spill side, never
                // from a fabricated register definition.
                self.insert_dummy_defs(block, elected);
            }
        }
        if is_entry {
            // Entry definitions stay on location 0; the block timeline starts
            // past them.
            self.loc = Location::MIN.plus(2);
        }
        trace!(block = %block, location = %self.loc, "block boundary");
        self.new_position(self.loc, RefKind::BlockBoundary, Referent::None, RegMask::NONE);
        self.loc = self.loc.plus(2);
    }

    /// First already-walked predecessor, used to seed live-in register
    /// locations during resolution
    fn elect_live_in_pred(&self, block: BlockId) -> Option<BlockId> {
        self.graph
            .block(block)
            .preds
            .iter()
            .map(|e| e.pred)
            .find(|p| self.visited[p.0 as usize])
    }

    /// Values live into this block but dead out of the elected predecessor
    /// appear from nowhere; give each a throwaway definition at the boundary
    fn insert_dummy_defs(&mut self, block: BlockId, elected: Option<BlockId>) {
        let graph = self.graph;
        let mut fresh = self.live.clone();
        if let Some(pred) = elected {
            fresh.remove_all(&graph.block(pred).live_out);
        }
        let fresh: Vec<u32> = fresh.iter().collect();
        for ti in fresh {
            let Some(interval) = self.local_intervals[ti as usize] else {
                continue;
            };
            trace!(block = %block, tracked = ti, "dummy def");
            let id = self.new_position(
                self.loc,
                RefKind::DummyDef,
                Referent::Interval(interval),
                RegMask::NONE,
            );
            self.positions[id.0].reg_optional = true;
        }
    }

    fn build_block_nodes(&mut self, block: BlockId) -> Result<()> {
        let graph = self.graph;
        let node_list = graph.block(block).nodes.clone();
        let mut death_map: HashMap<(NodeId, LocalId), bool> = HashMap::new();
        if self.options.enregister_locals {
            for r in liveness::local_reference_deaths(graph, block) {
                death_map.insert((node_list[r.node_index as usize], r.local), r.death);
            }
        }
        let consumed = self.consumed_nodes(&node_list);
        for &nid in &node_list {
            if graph.node(nid).contained {
                // Contained nodes fold into their consumer and produce
                // nothing, but a folded local read still ends a lifetime.
                if let OpKind::LocalLoad(v) = graph.node(nid).op {
                    if death_map.get(&(nid, v)).copied().unwrap_or(false) {
                        if let Some(ti) = graph.local(v).tracked_index {
                            self.live.remove(ti);
                        }
                    }
                }
                self.loc = self.loc.plus(2);
                continue;
            }
            self.cur_node = Some(nid);
            self.build_refs_for_node(nid, &death_map, &consumed)?;
            self.cur_node = None;
            self.loc = self.loc.plus(2);
        }
        Ok(())
    }

    /// Nodes whose value is consumed by a later node of the same list
    fn consumed_nodes(&self, node_list: &[NodeId]) -> HashSet<NodeId> {
        let mut set = HashSet::new();
        for &nid in node_list {
            if self.graph.node(nid).contained {
                continue;
            }
            for op in nodes::register_operands(self.graph, nid) {
                set.insert(op);
            }
        }
        set
    }

    fn end_block(&mut self, block: BlockId) -> Result<()> {
        if !self.def_list.is_empty() {
            let pending = self.def_list.pending();
            return Err(Error::internal(format!(
                "block {}: {} produced values never consumed (first: {})",
                block,
                pending.len(),
                pending
                    .first()
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "?".into()),
            )));
        }
        self.visited[block.0 as usize] = true;
        if self.options.enregister_locals {
            self.insert_exposed_uses(block);
            self.demote_live_out_last_uses(block);
        }
        self.cur_block = None;
        Ok(())
    }

    /// Live-out values with no visible downstream reference get an exposed
    /// use at the boundary so their lifetime reaches past the block
    fn insert_exposed_uses(&mut self, block: BlockId) {
        let graph = self.graph;
        let mut exposed = graph.block(block).live_out.clone();
        exposed.intersect_with(&self.candidate_vars);
        if let Some(next) = graph.block_after(block) {
            exposed.remove_all(&graph.block(next).live_in);
        }
        for succ in graph.all_successors(block) {
            if exposed.is_empty() {
                break;
            }
            if !self.visited[succ.0 as usize] {
                exposed.remove_all(&graph.block(succ).live_in);
            }
        }
        let exposed: Vec<u32> = exposed.iter().collect();
        for ti in exposed {
            let Some(interval) = self.local_intervals[ti as usize] else {
                continue;
            };
            trace!(block = %block, tracked = ti, "exposed use");
            let id = self.new_position(
                self.loc,
                RefKind::ExposedUse,
                Referent::Interval(interval),
                RegMask::NONE,
            );
            self.positions[id.0].reg_optional = true;
        }
    }

    /// A value leaving the block is not done at its final in-block reference
    fn demote_live_out_last_uses(&mut self, block: BlockId) {
        let graph = self.graph;
        let mut out = graph.block(block).live_out.clone();
        out.intersect_with(&self.candidate_vars);
        let out: Vec<u32> = out.iter().collect();
        for ti in out {
            let Some(interval) = self.local_intervals[ti as usize] else {
                continue;
            };
            if let Some(last) = self.intervals[interval.0].chain.last {
                if self.positions[last.0].block == Some(block) {
                    self.positions[last.0].last_use = false;
                }
            }
        }
    }

    // ----- per-node construction -----

    fn build_refs_for_node(
        &mut self,
        nid: NodeId,
        death_map: &HashMap<(NodeId, LocalId), bool>,
        consumed: &HashSet<NodeId>,
    ) -> Result<()> {
        let graph = self.graph;
        let op = graph.node(nid).op.clone();
        self.pending_delay_free = false;
        self.internal_defs.clear();

        // A candidate local read surfaces at its consumer; one nobody
        // consumes still references the value here.
        if let OpKind::LocalLoad(v) = op {
            if let Some(interval) = self.candidate_local_interval(v) {
                if !consumed.contains(&nid) {
                    let death = death_map.get(&(nid, v)).copied().unwrap_or(false);
                    self.local_use(interval, v, RegMask::NONE, death);
                }
                return Ok(());
            }
        }
        if let OpKind::SaveMulti { first } = op {
            return self.build_multi_save(nid, first, death_map);
        }

        let cons = nodes::constraints(self.target, graph, nid);
        let operands = nodes::register_operands(graph, nid);

        let mut first_use: Option<UseInfo> = None;
        for (i, &operand) in operands.iter().enumerate() {
            let candidates = cons
                .operand_candidates
                .get(i)
                .copied()
                .flatten()
                .unwrap_or(RegMask::NONE);
            let info = self.build_operand_use(operand, candidates, death_map)?;
            if i == 0 {
                first_use = Some(info);
            } else if cons.rmw {
                self.mark_delay_free_use(info, first_use);
            }
        }

        self.build_kills(nid);

        if let Some(scratch) = cons.scratch {
            self.build_internal_pair(&scratch);
        }

        self.build_defs(nid, &cons, death_map, consumed, first_use)
    }

    fn build_operand_use(
        &mut self,
        operand: NodeId,
        candidates: RegMask,
        death_map: &HashMap<(NodeId, LocalId), bool>,
    ) -> Result<UseInfo> {
        let graph = self.graph;
        if let OpKind::LocalLoad(v) = graph.node(operand).op {
            if let Some(interval) = self.candidate_local_interval(v) {
                let death = death_map.get(&(operand, v)).copied().unwrap_or(false);
                let pos = self.local_use(interval, v, candidates, death);
                return Ok(UseInfo {
                    pos,
                    interval,
                    is_local: true,
                    death,
                });
            }
        }
        let pending = self.def_list.take(operand)?;
        let pos = self.new_position(
            self.loc,
            RefKind::Use,
            Referent::Interval(pending.interval),
            candidates,
        );
        Ok(UseInfo {
            pos,
            interval: pending.interval,
            is_local: false,
            death: true,
        })
    }

    fn local_use(
        &mut self,
        interval: IntervalId,
        local: LocalId,
        candidates: RegMask,
        death: bool,
    ) -> RefPosId {
        let pos = self.new_position(
            self.loc,
            RefKind::Use,
            Referent::Interval(interval),
            candidates,
        );
        if death {
            if let Some(ti) = self.graph.local(local).tracked_index {
                self.live.remove(ti);
            }
        }
        pos
    }

    /// A read-modify-write operand past the first must survive into the def
    /// slot, unless it is the very value being overwritten and one side of
    /// that pairing dies here
    fn mark_delay_free_use(&mut self, info: UseInfo, rmw: Option<UseInfo>) {
        let delay = match rmw {
            Some(r) if r.is_local && info.is_local && info.interval == r.interval => {
                !r.death && !info.death
            }
            _ => true,
        };
        if delay {
            self.positions[info.pos.0].delay_free = true;
            self.pending_delay_free = true;
        }
    }

    fn build_kills(&mut self, nid: NodeId) {
        let graph = self.graph;
        let mask = kills::kill_set(self.target, graph.node(nid));
        if !mask.is_empty() {
            trace!(node = %nid, kill = %mask, "kills");
            for reg in mask.iter() {
                let id = self.new_position(
                    self.loc,
                    RefKind::Kill,
                    Referent::Reg(reg),
                    RegMask::single(reg),
                );
                self.positions[id.0].last_use = true;
            }
            self.steer_live_across_kill(mask);
        }
        if kills::kills_gc_refs(graph.node(nid)) {
            let candidates = self
                .target
                .all_regs(RegClass::Int)
                .without(self.target.arg_regs(RegClass::Int));
            self.new_position(self.loc, RefKind::KillGcRefs, Referent::None, candidates);
        }
    }

    /// Values live across a clobber move their preferences toward the
    /// surviving registers; a full call clobber additionally marks them
    /// callee-save material
    fn steer_live_across_kill(&mut self, kill: RegMask) {
        let prefer_callee = self.target.is_full_call_kill(kill)
            && self.policy.prefer_callee_save_across_calls();
        let live: Vec<u32> = self.live.iter().collect();
        for ti in live {
            let Some(interval) = self.local_intervals[ti as usize] else {
                continue;
            };
            let class = self.intervals[interval.0].class;
            let class_regs = self.target.all_regs(class);
            if !kill.intersects(class_regs) {
                continue;
            }
            if prefer_callee {
                self.intervals[interval.0].prefer_callee_save = true;
            }
            let survivors = class_regs.without(kill);
            if !survivors.is_empty() {
                let aversion = self.policy.aversion_after_kill(self.target, class, kill);
                self.intervals[interval.0].register_aversion |= aversion;
                let current = self.intervals[interval.0].register_preferences;
                let merged = self
                    .policy
                    .merge_preferences(self.target, class, current, survivors);
                self.intervals[interval.0].register_preferences = merged;
            }
        }
    }

    /// Scratch registers live only across the node: a def and a use on the
    /// node's own location, optionally held into the def slot
    fn build_internal_pair(&mut self, scratch: &ScratchSpec) {
        for _ in 0..scratch.count {
            let all = self.target.all_regs(scratch.class);
            let interval = IntervalId(
                self.intervals
                    .alloc(Interval::internal(scratch.class, all)),
            );
            let def = self.new_position(
                self.loc,
                RefKind::Def,
                Referent::Interval(interval),
                scratch.candidates,
            );
            self.internal_defs.push(def);
        }
        for i in 0..self.internal_defs.len() {
            let def_id = self.internal_defs[i];
            let referent = self.positions[def_id.0].referent;
            let mask = self.positions[def_id.0].candidates;
            let use_id = self.new_position(self.loc, RefKind::Use, referent, mask);
            if scratch.delay_free {
                self.positions[use_id.0].delay_free = true;
                self.pending_delay_free = true;
            }
        }
    }

    fn build_defs(
        &mut self,
        nid: NodeId,
        cons: &NodeConstraints,
        death_map: &HashMap<(NodeId, LocalId), bool>,
        consumed: &HashSet<NodeId>,
        first_use: Option<UseInfo>,
    ) -> Result<()> {
        let graph = self.graph;
        let node = graph.node(nid);

        if let OpKind::LocalStore(v) = node.op {
            if let Some(interval) = self.candidate_local_interval(v) {
                self.new_position(
                    self.loc.plus(1),
                    RefKind::Def,
                    Referent::Interval(interval),
                    cons.def_candidates.unwrap_or(RegMask::NONE),
                );
                let death = death_map.get(&(nid, v)).copied().unwrap_or(false);
                if let Some(ti) = graph.local(v).tracked_index {
                    if death {
                        self.live.remove(ti);
                    } else {
                        self.live.insert(ti);
                    }
                }
            }
            return Ok(());
        }

        let count = node.result_count();
        if count == 0 {
            return Ok(());
        }
        let class = node.value_class.unwrap_or(RegClass::Int);
        if count == 1 {
            let all = self.target.all_regs(class);
            let mut interval = Interval::new(class, all);
            interval.is_constant = matches!(node.op, OpKind::LoadConst(_));
            if self.pending_delay_free {
                interval.has_interfering_uses = true;
            }
            let interval = IntervalId(self.intervals.alloc(interval));
            let id = self.new_position(
                self.loc.plus(1),
                RefKind::Def,
                Referent::Interval(interval),
                cons.def_candidates.unwrap_or(RegMask::NONE),
            );
            if consumed.contains(&nid) {
                self.def_list.push(nid, interval);
            } else {
                // The value goes nowhere; it lives for exactly this node.
                self.positions[id.0].is_local_def_use = true;
                self.positions[id.0].last_use = true;
            }
            self.apply_source_preference(interval, first_use, cons.source_preferred);
            return Ok(());
        }
        self.build_multi_defs(nid, class, count, consumed);
        Ok(())
    }

    /// A multi-register definition is one interval per register, fixed to the
    /// target's return sequence and chained through `related` so the consumer
    /// can recover every member from the staged last one
    fn build_multi_defs(
        &mut self,
        nid: NodeId,
        class: RegClass,
        count: u8,
        consumed: &HashSet<NodeId>,
    ) {
        let target = self.target;
        let regs: Vec<Option<RegNum>> = (0..count as usize)
            .map(|i| {
                target
                    .return_regs(class, count as usize)
                    .and_then(|seq| seq.get(i).copied())
            })
            .collect();
        let all = target.all_regs(class);
        let is_consumed = consumed.contains(&nid);
        let mut prev: Option<IntervalId> = None;
        for (i, reg) in regs.into_iter().enumerate() {
            let mut interval = Interval::new(class, all);
            interval.is_multi_reg = true;
            interval.related = prev;
            if self.pending_delay_free {
                interval.has_interfering_uses = true;
            }
            let interval = IntervalId(self.intervals.alloc(interval));
            let candidates = reg.map(RegMask::single).unwrap_or(RegMask::NONE);
            let id = self.new_position(
                self.loc.plus(1),
                RefKind::Def,
                Referent::Interval(interval),
                candidates,
            );
            self.positions[id.0].multi_reg_idx = i as u8;
            if !is_consumed {
                self.positions[id.0].is_local_def_use = true;
                self.positions[id.0].last_use = true;
            }
            prev = Some(interval);
        }
        if is_consumed {
            if let Some(last) = prev {
                self.def_list.push(nid, last);
            }
        }
    }

    /// Spread a staged multi-register value into consecutive locals: one use
    /// per member on this location, then a def per destination local
    fn build_multi_save(
        &mut self,
        nid: NodeId,
        first: LocalId,
        death_map: &HashMap<(NodeId, LocalId), bool>,
    ) -> Result<()> {
        let graph = self.graph;
        let Some(&producer) = graph.node(nid).operands.first() else {
            return Err(Error::internal(format!(
                "{}: multi-register save has no producer operand",
                nid
            )));
        };
        let count = graph.node(producer).result_count() as usize;
        let pending = self.def_list.take(producer)?;
        let mut members = Vec::with_capacity(count);
        let mut cur = Some(pending.interval);
        while let Some(interval) = cur {
            members.push(interval);
            if members.len() == count {
                break;
            }
            cur = self.intervals[interval.0].related;
        }
        if members.len() != count {
            return Err(Error::internal(format!(
                "{}: expected {} members of a multi-register value, found {}",
                nid,
                count,
                members.len()
            )));
        }
        members.reverse();
        for (i, &interval) in members.iter().enumerate() {
            let id = self.new_position(
                self.loc,
                RefKind::Use,
                Referent::Interval(interval),
                RegMask::NONE,
            );
            self.positions[id.0].multi_reg_idx = i as u8;
        }
        for i in 0..count {
            let local = LocalId(first.0 + i as u32);
            if local.0 as usize >= graph.local_count() {
                break;
            }
            let Some(interval) = self.candidate_local_interval(local) else {
                continue;
            };
            self.new_position(
                self.loc.plus(1),
                RefKind::Def,
                Referent::Interval(interval),
                RegMask::NONE,
            );
            let death = death_map.get(&(nid, local)).copied().unwrap_or(false);
            if let Some(ti) = graph.local(local).tracked_index {
                if death {
                    self.live.remove(ti);
                } else {
                    self.live.insert(ti);
                }
            }
        }
        Ok(())
    }

    /// When the operation favors reusing its source's register, relate the
    /// dying source interval to the def so allocation can chase the hint
    fn apply_source_preference(
        &mut self,
        def: IntervalId,
        first_use: Option<UseInfo>,
        wanted: bool,
    ) {
        if !wanted {
            return;
        }
        let Some(info) = first_use else { return };
        if !info.is_local || info.death {
            self.intervals[info.interval.0].set_related_if_unset(def);
        }
    }

    fn candidate_local_interval(&self, local: LocalId) -> Option<IntervalId> {
        let ti = self.graph.local(local).tracked_index? as usize;
        self.local_intervals.get(ti).copied().flatten()
    }

    // ----- position plumbing -----

    /// Allocate one position, with its fixed-register companion when the
    /// candidate set pins a single register
    fn new_position(
        &mut self,
        location: Location,
        kind: RefKind,
        referent: Referent,
        candidates: RegMask,
    ) -> RefPosId {
        let mut mask = candidates;
        if let Referent::Interval(interval) = referent {
            if mask.is_empty() {
                mask = self.target.all_regs(self.intervals[interval.0].class);
            }
            let wants_companion = match kind {
                RefKind::Def => true,
                RefKind::Use => !self.intervals[interval.0].is_internal,
                _ => false,
            };
            if wants_companion && mask.is_single_reg() {
                if let Some(reg) = mask.lowest() {
                    self.fixed_companion(location, reg);
                }
            }
        }
        let mut pos = RefPosition::new(location, kind, referent, mask);
        pos.fixed_reg_ref = mask.is_single_reg();
        pos.node = self.cur_node;
        pos.block = self.cur_block;
        let id = RefPosId(self.positions.alloc(pos));
        self.attach(id, kind, referent);
        id
    }

    /// The fixed-register position a pinned reference rides with; it keeps
    /// the register's chain aware of the claim
    fn fixed_companion(&mut self, location: Location, reg: RegNum) {
        let mut pos = RefPosition::new(
            location,
            RefKind::FixedReg,
            Referent::Reg(reg),
            RegMask::single(reg),
        );
        pos.fixed_reg_ref = true;
        pos.node = self.cur_node;
        pos.block = self.cur_block;
        let id = RefPosId(self.positions.alloc(pos));
        self.reg_records[reg.0 as usize].chain.push(id, &mut self.positions);
    }

    /// Thread the position onto its chain and update interval bookkeeping
    fn attach(&mut self, id: RefPosId, kind: RefKind, referent: Referent) {
        match referent {
            Referent::Interval(interval) => {
                let incoming = self.positions[id.0].candidates;
                let class = self.intervals[interval.0].class;
                let current = self.intervals[interval.0].register_preferences;
                let merged = self
                    .policy
                    .merge_preferences(self.target, class, current, incoming);
                self.intervals[interval.0].register_preferences = merged;
                if self.intervals[interval.0].is_local_var() {
                    if kind.is_use() {
                        // The previous reference in this block is no longer
                        // the final word on the value.
                        if let Some(prev) = self.intervals[interval.0].chain.last {
                            if self.positions[prev.0].block == self.positions[id.0].block {
                                self.positions[prev.0].last_use = false;
                            }
                        }
                    }
                    self.positions[id.0].last_use = !matches!(
                        kind,
                        RefKind::ExposedUse | RefKind::ParamDef | RefKind::ZeroInit
                    );
                } else if kind == RefKind::Use {
                    self.check_conflicting_def_use(interval, id);
                    self.positions[id.0].last_use = true;
                }
                self.intervals[interval.0].chain.push(id, &mut self.positions);
                if kind.is_def() {
                    let first = self.intervals[interval.0].chain.first;
                    self.intervals[interval.0].is_single_def = first == Some(id);
                }
            }
            Referent::Reg(reg) => {
                self.reg_records[reg.0 as usize].chain.push(id, &mut self.positions);
            }
            Referent::None => {}
        }
    }

    /// A tree temporary's use narrows its def's candidates when they overlap;
    /// disjoint sets flag the interval for the resolution pass
    fn check_conflicting_def_use(&mut self, interval: IntervalId, use_id: RefPosId) {
        let Some(def_id) = self.intervals[interval.0].chain.first else {
            return;
        };
        let def_mask = self.positions[def_id.0].candidates;
        let narrowed = def_mask & self.positions[use_id.0].candidates;
        if !narrowed.is_empty() {
            if !narrowed.is_single_reg() || !self.intervals[interval.0].has_interfering_uses {
                self.positions[def_id.0].candidates = narrowed;
            }
        } else {
            trace!(def = %self.positions[def_id.0].location, "conflicting def and use");
            self.intervals[interval.0].has_conflicting_def_use = true;
        }
    }

    // ----- def/use conflict resolution -----

    /// Reconcile single-def single-use temporaries whose def and use demand
    /// disjoint registers
    fn resolve_conflicts(&mut self) {
        for idx in 0..self.intervals.len() as u32 {
            let interval = &self.intervals[idx];
            if interval.is_local_var()
                || interval.is_internal
                || !interval.has_conflicting_def_use
            {
                continue;
            }
            let (Some(def_id), Some(use_id)) = (interval.chain.first, interval.chain.last)
            else {
                continue;
            };
            if def_id == use_id || self.positions[def_id.0].next != Some(use_id) {
                continue;
            }
            if self.positions[def_id.0].kind != RefKind::Def
                || self.positions[use_id.0].kind != RefKind::Use
            {
                continue;
            }
            self.resolve_def_use_pair(def_id, use_id);
        }
    }

    fn resolve_def_use_pair(&mut self, def_id: RefPosId, use_id: RefPosId) {
        let def_mask = self.positions[def_id.0].candidates;
        let use_mask = self.positions[use_id.0].candidates;
        let def_loc = self.positions[def_id.0].location;
        let use_loc = self.positions[use_id.0].location;
        let use_end = self.positions[use_id.0].end_location();
        let def_fixed = self.positions[def_id.0].fixed_reg_ref;
        let use_fixed = self.positions[use_id.0].fixed_reg_ref;
        // A delay-freed fixed use is load-bearing for the instruction shape;
        // leave it alone.
        let can_change_use = !(use_fixed && self.positions[use_id.0].delay_free);

        if def_fixed && can_change_use {
            if let Some(reg) = def_mask.lowest() {
                if !self.reg_referenced_after_def(reg, def_loc, use_end) {
                    trace!(reg = %reg, "conflict: def register free through the use");
                    self.positions[use_id.0].candidates = def_mask;
                    return;
                }
            }
        }
        if use_fixed {
            if let Some(reg) = use_mask.lowest() {
                if !self.reg_referenced_before_use(reg, def_loc, use_loc) {
                    trace!(reg = %reg, "conflict: use register free from the def");
                    self.positions[def_id.0].candidates = use_mask;
                    return;
                }
            }
        }
        if def_fixed && !use_fixed {
            // A copy at the def is cheaper than fighting the use.
            self.positions[def_id.0].candidates = use_mask;
            return;
        }
        if use_fixed && !def_fixed && can_change_use {
            self.positions[use_id.0].candidates = def_mask;
            return;
        }
        if def_fixed && use_fixed {
            let class = match self.positions[def_id.0].referent.interval() {
                Some(iv) => self.intervals[iv.0].class,
                None => RegClass::Int,
            };
            self.positions[def_id.0].candidates = self.target.all_regs(class);
            self.positions[def_id.0].fixed_reg_ref = false;
        }
    }

    /// Any reference on `reg` strictly after the def, up to and including the
    /// use's end
    fn reg_referenced_after_def(&self, reg: RegNum, def_loc: Location, use_end: Location) -> bool {
        self.reg_has_ref(reg, |loc| loc > def_loc && loc <= use_end)
    }

    /// Any reference on `reg` from the def up to but excluding the use
    fn reg_referenced_before_use(&self, reg: RegNum, def_loc: Location, use_loc: Location) -> bool {
        self.reg_has_ref(reg, |loc| loc >= def_loc && loc < use_loc)
    }

    fn reg_has_ref(&self, reg: RegNum, hit: impl Fn(Location) -> bool) -> bool {
        let mut cur = self.reg_records[reg.0 as usize].chain.first;
        while let Some(id) = cur {
            if hit(self.positions[id.0].location) {
                return true;
            }
            cur = self.positions[id.0].next;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::block::BlockKind;
    use crate::ir::node::IrNode;
    use crate::ir::LocalVar;

    fn target() -> TargetModel {
        TargetModel::synthetic()
    }

    fn finish(graph: &mut FlowGraph) {
        graph.seal_locals();
        graph.compute_pred_edges();
    }

    fn positions_of_node(product: &BuildProduct, node: NodeId) -> Vec<(RefKind, Location)> {
        product
            .timeline()
            .filter(|(_, p)| p.node == Some(node))
            .map(|(_, p)| (p.kind, p.location))
            .collect()
    }

    fn count_kind(product: &BuildProduct, kind: RefKind) -> usize {
        product.timeline().filter(|(_, p)| p.kind == kind).count()
    }

    #[test]
    fn test_add_emits_two_uses_then_a_def() {
        let mut graph = FlowGraph::new("add");
        let a = graph.add_local(LocalVar::new(RegClass::Int).param(Some(RegNum(0))));
        let b = graph.add_local(LocalVar::new(RegClass::Int).param(Some(RegNum(1))));
        let t = graph.add_local(LocalVar::new(RegClass::Int));
        let blk = graph.add_block(BlockKind::Return);
        let la = graph.append_node(blk, IrNode::new(OpKind::LocalLoad(a), Some(RegClass::Int), vec![]));
        let lb = graph.append_node(blk, IrNode::new(OpKind::LocalLoad(b), Some(RegClass::Int), vec![]));
        let add = graph.append_node(blk, IrNode::new(OpKind::Add, Some(RegClass::Int), vec![la, lb]));
        graph.append_node(blk, IrNode::new(OpKind::LocalStore(t), None, vec![add]));
        finish(&mut graph);

        let product = build(&mut graph, &target()).unwrap();
        product.validate().unwrap();

        let at_add = positions_of_node(&product, add);
        let uses: Vec<_> = at_add.iter().filter(|(k, _)| *k == RefKind::Use).collect();
        let defs: Vec<_> = at_add.iter().filter(|(k, _)| *k == RefKind::Def).collect();
        assert_eq!(uses.len(), 2);
        assert_eq!(defs.len(), 1);
        let use_loc = uses[0].1;
        assert_eq!(uses[1].1, use_loc);
        assert_eq!(defs[0].1, use_loc.plus(1));
        assert_eq!(count_kind(&product, RefKind::Kill), 0);
    }

    #[test]
    fn test_call_kills_land_before_the_def() {
        let mut graph = FlowGraph::new("call");
        let t = graph.add_local(LocalVar::new(RegClass::Int));
        let blk = graph.add_block(BlockKind::Return);
        let call = graph.append_node(
            blk,
            IrNode::new(OpKind::Call { args: 0 }, Some(RegClass::Int), vec![]),
        );
        graph.append_node(blk, IrNode::new(OpKind::LocalStore(t), None, vec![call]));
        finish(&mut graph);

        let tgt = target();
        let product = build(&mut graph, &tgt).unwrap();
        product.validate().unwrap();

        let at_call = positions_of_node(&product, call);
        let kills: Vec<_> = at_call.iter().filter(|(k, _)| *k == RefKind::Kill).collect();
        let defs: Vec<_> = at_call.iter().filter(|(k, _)| *k == RefKind::Def).collect();
        assert_eq!(kills.len() as u32, tgt.call_kill_mask().count());
        assert_eq!(defs.len(), 1);
        for (_, kloc) in &kills {
            assert!(*kloc < defs[0].1);
        }
        // Every clobber ends the register's availability outright.
        for (_, pos) in product.timeline() {
            if pos.kind == RefKind::Kill {
                assert!(pos.last_use);
            }
        }
    }

    #[test]
    fn test_param_defs_pin_argument_registers() {
        let mut graph = FlowGraph::new("params");
        let a = graph.add_local(LocalVar::new(RegClass::Int).param(Some(RegNum(0))));
        let b = graph.add_local(LocalVar::new(RegClass::Int).param(Some(RegNum(1))));
        let blk = graph.add_block(BlockKind::Return);
        let la = graph.append_node(blk, IrNode::new(OpKind::LocalLoad(a), Some(RegClass::Int), vec![]));
        let lb = graph.append_node(blk, IrNode::new(OpKind::LocalLoad(b), Some(RegClass::Int), vec![]));
        let add = graph.append_node(blk, IrNode::new(OpKind::Add, Some(RegClass::Int), vec![la, lb]));
        graph.append_node(
            blk,
            IrNode::new(OpKind::Return, None, vec![add]),
        );
        finish(&mut graph);

        let product = build(&mut graph, &target()).unwrap();
        let params: Vec<_> = product
            .timeline()
            .filter(|(_, p)| p.kind == RefKind::ParamDef)
            .collect();
        assert_eq!(params.len(), 2);
        for (_, p) in &params {
            assert_eq!(p.location, Location::MIN);
            assert!(p.candidates.is_single_reg());
            assert!(p.reg_optional);
        }
        let masks: Vec<RegMask> = params.iter().map(|(_, p)| p.candidates).collect();
        assert!(masks.contains(&RegMask::single(RegNum(0))));
        assert!(masks.contains(&RegMask::single(RegNum(1))));
    }

    #[test]
    fn test_uninitialized_live_in_zero_init_or_spilled() {
        // g is a GC reference, p is plain; both are live into the entry
        // block without a preceding store.
        let mut graph = FlowGraph::new("zeroinit");
        let g = graph.add_local(LocalVar::new(RegClass::Int).gc_ref());
        let p = graph.add_local(LocalVar::new(RegClass::Int));
        let blk = graph.add_block(BlockKind::Return);
        let lg = graph.append_node(blk, IrNode::new(OpKind::LocalLoad(g), Some(RegClass::Int), vec![]));
        let lp = graph.append_node(blk, IrNode::new(OpKind::LocalLoad(p), Some(RegClass::Int), vec![]));
        let add = graph.append_node(blk, IrNode::new(OpKind::Add, Some(RegClass::Int), vec![lg, lp]));
        graph.append_node(blk, IrNode::new(OpKind::Return, None, vec![add]));
        finish(&mut graph);

        let product = build(&mut graph, &target()).unwrap();
        product.validate().unwrap();

        let zero_inits: Vec<_> = product
            .timeline()
            .filter(|(_, p)| p.kind == RefKind::ZeroInit)
            .collect();
        assert_eq!(zero_inits.len(), 1);
        assert_eq!(zero_inits[0].1.location, Location::MIN);
        let g_iv = product
            .local_interval(graph.local(g).tracked_index.unwrap())
            .unwrap();
        assert_eq!(zero_inits[0].1.referent.interval(), Some(g_iv));
        let p_iv = product
            .local_interval(graph.local(p).tracked_index.unwrap())
            .unwrap();
        assert!(product.interval(p_iv).spilled_by_default);
        assert!(!product.interval(g_iv).spilled_by_default);
    }

    #[test]
    fn test_block_boundaries_one_per_block() {
        let mut graph = FlowGraph::new("bounds");
        let b0 = graph.add_block(BlockKind::Fallthrough);
        let b1 = graph.add_block(BlockKind::Return);
        graph.append_node(b0, IrNode::new(OpKind::Nop, None, vec![]));
        graph.append_node(b1, IrNode::new(OpKind::Nop, None, vec![]));
        finish(&mut graph);

        let product = build(&mut graph, &target()).unwrap();
        assert_eq!(count_kind(&product, RefKind::BlockBoundary), 2);
        let bounds: Vec<Location> = product
            .timeline()
            .filter(|(_, p)| p.kind == RefKind::BlockBoundary)
            .map(|(_, p)| p.location)
            .collect();
        assert_eq!(bounds[0], Location::MIN.plus(2));
        assert!(bounds[1] > bounds[0]);
    }

    #[test]
    fn test_trailing_loop_gets_a_final_boundary() {
        // The last block jumps backward, so control leaves the walked range.
        let mut graph = FlowGraph::new("tailloop");
        let v = graph.add_local(LocalVar::new(RegClass::Int));
        let b0 = graph.add_block(BlockKind::Fallthrough);
        let b1 = graph.add_block(BlockKind::Always { target: BlockId(1) });
        let c = graph.append_node(b0, IrNode::new(OpKind::LoadConst(1), Some(RegClass::Int), vec![]));
        graph.append_node(b0, IrNode::new(OpKind::LocalStore(v), None, vec![c]));
        let lv = graph.append_node(b1, IrNode::new(OpKind::LocalLoad(v), Some(RegClass::Int), vec![]));
        let neg = graph.append_node(b1, IrNode::new(OpKind::Neg, Some(RegClass::Int), vec![lv]));
        graph.append_node(b1, IrNode::new(OpKind::LocalStore(v), None, vec![neg]));
        assert_eq!(graph.sequence(), &[b0, b1]);
        finish(&mut graph);

        let product = build(&mut graph, &target()).unwrap();
        product.validate().unwrap();
        assert_eq!(count_kind(&product, RefKind::BlockBoundary), 3);
    }

    #[test]
    fn test_loop_live_value_gets_exposed_use_and_keeps_living() {
        // v is written in b0, read in the loop body b1, and live around the
        // back edge; its final read must not count as a last use, and the
        // lifetime must be held open across the edge.
        let mut graph = FlowGraph::new("loop");
        let v = graph.add_local(LocalVar::new(RegClass::Int));
        let b0 = graph.add_block(BlockKind::Fallthrough);
        let b1 = graph.add_block(BlockKind::Cond { target: BlockId(1) });
        let b2 = graph.add_block(BlockKind::Return);
        let c = graph.append_node(b0, IrNode::new(OpKind::LoadConst(7), Some(RegClass::Int), vec![]));
        graph.append_node(b0, IrNode::new(OpKind::LocalStore(v), None, vec![c]));
        let lv = graph.append_node(b1, IrNode::new(OpKind::LocalLoad(v), Some(RegClass::Int), vec![]));
        let cond = graph.append_node(b1, IrNode::new(OpKind::CondJump, None, vec![lv]));
        graph.append_node(b2, IrNode::new(OpKind::Return, None, vec![]));
        let _ = cond;
        finish(&mut graph);

        let product = build(&mut graph, &target()).unwrap();
        product.validate().unwrap();

        let v_iv = product
            .local_interval(graph.local(v).tracked_index.unwrap())
            .unwrap();
        let chain = product.chain_positions(&product.interval(v_iv).chain);
        let kinds: Vec<RefKind> = chain
            .iter()
            .map(|&id| product.position(id).kind)
            .collect();
        assert!(kinds.contains(&RefKind::Use));
        // Live out of b1 into the back edge: the read is not the end.
        let last_read = chain
            .iter()
            .rev()
            .find(|&&id| product.position(id).kind == RefKind::Use)
            .unwrap();
        assert!(!product.position(*last_read).last_use);
    }

    #[test]
    fn test_block_reached_only_from_later_block_gets_dummy_def() {
        // b0 jumps straight to b2; b1 is a loop body reached only through
        // b2's branch, which the walk has not seen when b1 comes up. v is
        // live into b1 with no walked predecessor to take locations from, so
        // its presence must be fabricated at the boundary.
        let mut graph = FlowGraph::new("dummy");
        let v = graph.add_local(LocalVar::new(RegClass::Int));
        let b0 = graph.add_block(BlockKind::Always { target: BlockId(2) });
        let b1 = graph.add_block(BlockKind::Fallthrough);
        let b2 = graph.add_block(BlockKind::Cond { target: BlockId(1) });
        let b3 = graph.add_block(BlockKind::Return);
        graph.append_node(b0, IrNode::new(OpKind::Nop, None, vec![]));
        let lv = graph.append_node(b1, IrNode::new(OpKind::LocalLoad(v), Some(RegClass::Int), vec![]));
        let neg = graph.append_node(b1, IrNode::new(OpKind::Neg, Some(RegClass::Int), vec![lv]));
        graph.append_node(b1, IrNode::new(OpKind::LocalStore(v), None, vec![neg]));
        let lv2 = graph.append_node(b2, IrNode::new(OpKind::LocalLoad(v), Some(RegClass::Int), vec![]));
        graph.append_node(b2, IrNode::new(OpKind::CondJump, None, vec![lv2]));
        graph.append_node(b3, IrNode::new(OpKind::Return, None, vec![]));
        finish(&mut graph);

        let product = build(&mut graph, &target()).unwrap();
        product.validate().unwrap();
        assert_eq!(product.live_in_pred[1], None);
        assert!(count_kind(&product, RefKind::DummyDef) >= 1);
        let dummy = product
            .timeline()
            .find(|(_, p)| p.kind == RefKind::DummyDef)
            .unwrap();
        assert!(dummy.1.reg_optional);
        let v_iv = product
            .local_interval(graph.local(v).tracked_index.unwrap())
            .unwrap();
        assert_eq!(dummy.1.referent.interval(), Some(v_iv));
    }

    #[test]
    fn test_last_use_demoted_by_later_read_in_block() {
        let mut graph = FlowGraph::new("lastuse");
        let a = graph.add_local(LocalVar::new(RegClass::Int).param(Some(RegNum(0))));
        let t = graph.add_local(LocalVar::new(RegClass::Int));
        let u = graph.add_local(LocalVar::new(RegClass::Int));
        let blk = graph.add_block(BlockKind::Return);
        let l1 = graph.append_node(blk, IrNode::new(OpKind::LocalLoad(a), Some(RegClass::Int), vec![]));
        let n1 = graph.append_node(blk, IrNode::new(OpKind::Neg, Some(RegClass::Int), vec![l1]));
        graph.append_node(blk, IrNode::new(OpKind::LocalStore(t), None, vec![n1]));
        let l2 = graph.append_node(blk, IrNode::new(OpKind::LocalLoad(a), Some(RegClass::Int), vec![]));
        let n2 = graph.append_node(blk, IrNode::new(OpKind::Neg, Some(RegClass::Int), vec![l2]));
        graph.append_node(blk, IrNode::new(OpKind::LocalStore(u), None, vec![n2]));
        finish(&mut graph);

        let product = build(&mut graph, &target()).unwrap();
        product.validate().unwrap();

        let a_iv = product
            .local_interval(graph.local(a).tracked_index.unwrap())
            .unwrap();
        let chain = product.chain_positions(&product.interval(a_iv).chain);
        let reads: Vec<&RefPosition> = chain
            .iter()
            .map(|&id| product.position(id))
            .filter(|p| p.kind == RefKind::Use)
            .collect();
        assert_eq!(reads.len(), 2);
        assert!(!reads[0].last_use);
        assert!(reads[1].last_use);
    }

    #[test]
    fn test_scratch_register_pairs_with_delay_free() {
        let mut graph = FlowGraph::new("copyblk");
        let blk = graph.add_block(BlockKind::Return);
        let dst = graph.append_node(blk, IrNode::new(OpKind::LoadConst(0), Some(RegClass::Int), vec![]));
        let src = graph.append_node(blk, IrNode::new(OpKind::LoadConst(64), Some(RegClass::Int), vec![]));
        let copy = graph.append_node(blk, IrNode::new(OpKind::CopyBlock, None, vec![dst, src]));
        finish(&mut graph);

        let product = build(&mut graph, &target()).unwrap();
        product.validate().unwrap();

        let at_copy = positions_of_node(&product, copy);
        let defs: Vec<_> = at_copy.iter().filter(|(k, _)| *k == RefKind::Def).collect();
        let uses: Vec<_> = at_copy.iter().filter(|(k, _)| *k == RefKind::Use).collect();
        // Two address operands plus the scratch pair's use; one scratch def.
        assert_eq!(defs.len(), 1);
        assert_eq!(uses.len(), 3);
        let scratch_use = product
            .timeline()
            .find(|(_, p)| p.node == Some(copy) && p.kind == RefKind::Use && p.delay_free)
            .unwrap();
        let scratch_iv = scratch_use.1.referent.interval().unwrap();
        assert!(product.interval(scratch_iv).is_internal);
        assert_eq!(scratch_use.1.end_location(), scratch_use.1.location.plus(1));
    }

    #[test]
    fn test_rmw_second_operand_held_into_def_slot() {
        let mut graph = FlowGraph::new("mul");
        let a = graph.add_local(LocalVar::new(RegClass::Int).param(Some(RegNum(0))));
        let b = graph.add_local(LocalVar::new(RegClass::Int).param(Some(RegNum(1))));
        let t = graph.add_local(LocalVar::new(RegClass::Int));
        let blk = graph.add_block(BlockKind::Return);
        let la = graph.append_node(blk, IrNode::new(OpKind::LocalLoad(a), Some(RegClass::Int), vec![]));
        let lb = graph.append_node(blk, IrNode::new(OpKind::LocalLoad(b), Some(RegClass::Int), vec![]));
        let mul = graph.append_node(blk, IrNode::new(OpKind::Mul, Some(RegClass::Int), vec![la, lb]));
        graph.append_node(blk, IrNode::new(OpKind::LocalStore(t), None, vec![mul]));
        finish(&mut graph);

        let product = build(&mut graph, &target()).unwrap();
        product.validate().unwrap();

        let b_iv = product
            .local_interval(graph.local(b).tracked_index.unwrap())
            .unwrap();
        let chain = product.chain_positions(&product.interval(b_iv).chain);
        let read = chain
            .iter()
            .map(|&id| product.position(id))
            .find(|p| p.kind == RefKind::Use)
            .unwrap();
        assert!(read.delay_free);
        // The def's temporary knows something reaches into its slot.
        let def = product
            .timeline()
            .find(|(_, p)| p.node == Some(mul) && p.kind == RefKind::Def)
            .unwrap();
        let def_iv = def.1.referent.interval().unwrap();
        assert!(product.interval(def_iv).has_interfering_uses);
    }

    #[test]
    fn test_multi_reg_call_defines_chained_members() {
        let mut graph = FlowGraph::new("callm");
        let x = graph.add_local(LocalVar::new(RegClass::Int));
        let y = graph.add_local(LocalVar::new(RegClass::Int));
        let blk = graph.add_block(BlockKind::Return);
        let call = graph.append_node(
            blk,
            IrNode::new(
                OpKind::CallMulti { args: 0, results: 2 },
                Some(RegClass::Int),
                vec![],
            ),
        );
        let save = graph.append_node(
            blk,
            IrNode::new(OpKind::SaveMulti { first: x }, None, vec![call]),
        );
        let _ = y;
        finish(&mut graph);

        let tgt = target();
        let product = build(&mut graph, &tgt).unwrap();
        product.validate().unwrap();

        let call_defs: Vec<&RefPosition> = product
            .timeline()
            .filter(|(_, p)| p.node == Some(call) && p.kind == RefKind::Def)
            .map(|(_, p)| p)
            .collect();
        assert_eq!(call_defs.len(), 2);
        assert_eq!(call_defs[0].multi_reg_idx, 0);
        assert_eq!(call_defs[1].multi_reg_idx, 1);
        let rets = tgt.return_regs(RegClass::Int, 2).unwrap();
        assert_eq!(call_defs[0].candidates, RegMask::single(rets[0]));
        assert_eq!(call_defs[1].candidates, RegMask::single(rets[1]));
        let first_iv = call_defs[0].referent.interval().unwrap();
        let second_iv = call_defs[1].referent.interval().unwrap();
        assert!(product.interval(first_iv).is_multi_reg);
        assert_eq!(product.interval(second_iv).related, Some(first_iv));

        // The save reads both members in order, then writes the locals.
        let save_uses: Vec<&RefPosition> = product
            .timeline()
            .filter(|(_, p)| p.node == Some(save) && p.kind == RefKind::Use)
            .map(|(_, p)| p)
            .collect();
        assert_eq!(save_uses.len(), 2);
        assert_eq!(save_uses[0].referent.interval(), Some(first_iv));
        assert_eq!(save_uses[1].referent.interval(), Some(second_iv));
        let save_defs = product
            .timeline()
            .filter(|(_, p)| p.node == Some(save) && p.kind == RefKind::Def)
            .count();
        assert_eq!(save_defs, 2);
    }

    #[test]
    fn test_fixed_companions_ride_with_pinned_refs() {
        let mut graph = FlowGraph::new("fixed");
        let t = graph.add_local(LocalVar::new(RegClass::Int));
        let blk = graph.add_block(BlockKind::Return);
        let call = graph.append_node(
            blk,
            IrNode::new(OpKind::Call { args: 0 }, Some(RegClass::Int), vec![]),
        );
        graph.append_node(blk, IrNode::new(OpKind::LocalStore(t), None, vec![call]));
        finish(&mut graph);

        let tgt = target();
        let product = build(&mut graph, &tgt).unwrap();
        let def = product
            .timeline()
            .find(|(_, p)| p.node == Some(call) && p.kind == RefKind::Def)
            .unwrap();
        assert!(def.1.fixed_reg_ref);
        assert!(def.1.candidates.is_single_reg());
        let reg = def.1.candidates.lowest().unwrap();
        let companion = product
            .timeline()
            .find(|(_, p)| {
                p.kind == RefKind::FixedReg
                    && p.location == def.1.location
                    && p.referent.reg() == Some(reg)
            });
        assert!(companion.is_some());
        // The companion precedes the def it rides with.
        assert!(companion.unwrap().0 .0 < def.0 .0);
    }

    #[test]
    fn test_conflicting_def_use_takes_the_free_def_register() {
        // The call's value lands in the return register but must be consumed
        // in argument register r2; nothing else touches the return register
        // in between, so the use moves to it.
        let mut graph = FlowGraph::new("conflict1");
        let blk = graph.add_block(BlockKind::Return);
        let call1 = graph.append_node(
            blk,
            IrNode::new(OpKind::Call { args: 0 }, Some(RegClass::Int), vec![]),
        );
        let put = graph.append_node(
            blk,
            IrNode::new(OpKind::PutArg { index: 2 }, Some(RegClass::Int), vec![call1]),
        );
        graph.append_node(
            blk,
            IrNode::new(OpKind::Call { args: 1 }, None, vec![put]),
        );
        finish(&mut graph);

        let tgt = target();
        let product = build(&mut graph, &tgt).unwrap();
        product.validate().unwrap();

        let ret_reg = tgt.return_regs(RegClass::Int, 1).unwrap()[0];
        let use_pos = product
            .timeline()
            .find(|(_, p)| p.node == Some(put) && p.kind == RefKind::Use)
            .unwrap();
        assert_eq!(use_pos.1.candidates, RegMask::single(ret_reg));
    }

    #[test]
    fn test_conflicting_def_use_with_busy_registers_widens_the_def() {
        // An intervening call clobbers both the producing call's return
        // register and the argument register of the consumer, so neither
        // side's register survives the span; the def gives up its pin.
        let mut graph = FlowGraph::new("conflict5");
        let blk = graph.add_block(BlockKind::Return);
        let call1 = graph.append_node(
            blk,
            IrNode::new(OpKind::Call { args: 0 }, Some(RegClass::Int), vec![]),
        );
        graph.append_node(
            blk,
            IrNode::new(OpKind::Call { args: 0 }, None, vec![]),
        );
        let put = graph.append_node(
            blk,
            IrNode::new(OpKind::PutArg { index: 2 }, Some(RegClass::Int), vec![call1]),
        );
        graph.append_node(
            blk,
            IrNode::new(OpKind::Call { args: 1 }, None, vec![put]),
        );
        finish(&mut graph);

        let tgt = target();
        let product = build(&mut graph, &tgt).unwrap();
        product.validate().unwrap();

        let def_pos = product
            .timeline()
            .find(|(_, p)| p.node == Some(call1) && p.kind == RefKind::Def)
            .unwrap();
        assert_eq!(def_pos.1.candidates, tgt.all_regs(RegClass::Int));
        assert!(!def_pos.1.fixed_reg_ref);
    }

    #[test]
    fn test_unconsumed_value_lives_for_its_own_node_only() {
        let mut graph = FlowGraph::new("unused");
        let blk = graph.add_block(BlockKind::Return);
        let c = graph.append_node(blk, IrNode::new(OpKind::LoadConst(3), Some(RegClass::Int), vec![]));
        finish(&mut graph);

        let product = build(&mut graph, &target()).unwrap();
        product.validate().unwrap();
        let def = product
            .timeline()
            .find(|(_, p)| p.node == Some(c) && p.kind == RefKind::Def)
            .unwrap();
        assert!(def.1.is_local_def_use);
        assert!(def.1.last_use);
        let iv = def.1.referent.interval().unwrap();
        assert!(product.interval(iv).is_constant);
    }

    #[test]
    fn test_full_call_clobber_steers_live_values_to_callee_saved() {
        let mut graph = FlowGraph::new("steer");
        let a = graph.add_local(LocalVar::new(RegClass::Int).param(Some(RegNum(0))));
        let t = graph.add_local(LocalVar::new(RegClass::Int));
        let blk = graph.add_block(BlockKind::Return);
        let call = graph.append_node(
            blk,
            IrNode::new(OpKind::Call { args: 0 }, Some(RegClass::Int), vec![]),
        );
        graph.append_node(blk, IrNode::new(OpKind::LocalStore(t), None, vec![call]));
        let la = graph.append_node(blk, IrNode::new(OpKind::LocalLoad(a), Some(RegClass::Int), vec![]));
        graph.append_node(blk, IrNode::new(OpKind::Return, None, vec![la]));
        finish(&mut graph);

        let tgt = target();
        let product = build(&mut graph, &tgt).unwrap();
        let a_iv = product
            .local_interval(graph.local(a).tracked_index.unwrap())
            .unwrap();
        let interval = product.interval(a_iv);
        assert!(interval.prefer_callee_save);
        assert!(interval
            .register_aversion
            .intersects(tgt.caller_saved(RegClass::Int)));
        assert_eq!(
            interval.register_preferences & tgt.caller_saved(RegClass::Int),
            RegMask::NONE
        );
    }

    #[test]
    fn test_gc_safepoint_bars_gc_refs_from_registers() {
        let mut graph = FlowGraph::new("safepoint");
        let blk = graph.add_block(BlockKind::Return);
        let sp = graph.append_node(blk, IrNode::new(OpKind::GcSafepoint, None, vec![]));
        finish(&mut graph);

        let tgt = target();
        let product = build(&mut graph, &tgt).unwrap();
        let pos = product
            .timeline()
            .find(|(_, p)| p.node == Some(sp) && p.kind == RefKind::KillGcRefs)
            .unwrap();
        assert_eq!(pos.1.referent, Referent::None);
        assert_eq!(
            pos.1.candidates,
            tgt.all_regs(RegClass::Int).without(tgt.arg_regs(RegClass::Int))
        );
        assert_eq!(count_kind(&product, RefKind::Kill), 0);
    }

    #[test]
    fn test_without_enregistering_locals_only_temps_get_intervals() {
        let mut graph = FlowGraph::new("noenreg");
        let a = graph.add_local(LocalVar::new(RegClass::Int).param(Some(RegNum(0))));
        let blk = graph.add_block(BlockKind::Return);
        let la = graph.append_node(blk, IrNode::new(OpKind::LocalLoad(a), Some(RegClass::Int), vec![]));
        let neg = graph.append_node(blk, IrNode::new(OpKind::Neg, Some(RegClass::Int), vec![la]));
        graph.append_node(blk, IrNode::new(OpKind::Return, None, vec![neg]));
        finish(&mut graph);

        liveness::compute(&mut graph);
        let options = BuildOptions::new().with_enregister_locals(false);
        let product = Builder::new(options).build(&graph, &target()).unwrap();
        product.validate().unwrap();

        assert_eq!(count_kind(&product, RefKind::ParamDef), 0);
        assert_eq!(count_kind(&product, RefKind::ZeroInit), 0);
        assert_eq!(count_kind(&product, RefKind::DummyDef), 0);
        assert_eq!(count_kind(&product, RefKind::ExposedUse), 0);
        // The load materializes the value from memory into a temporary.
        let load_def = product
            .timeline()
            .find(|(_, p)| p.node == Some(la) && p.kind == RefKind::Def);
        assert!(load_def.is_some());
        for (_, interval) in product.intervals.iter() {
            assert!(!interval.is_local_var());
        }
    }

    #[test]
    fn test_divide_pins_and_kills_its_pair() {
        let mut graph = FlowGraph::new("div");
        let a = graph.add_local(LocalVar::new(RegClass::Int).param(Some(RegNum(0))));
        let b = graph.add_local(LocalVar::new(RegClass::Int).param(Some(RegNum(1))));
        let t = graph.add_local(LocalVar::new(RegClass::Int));
        let blk = graph.add_block(BlockKind::Return);
        let la = graph.append_node(blk, IrNode::new(OpKind::LocalLoad(a), Some(RegClass::Int), vec![]));
        let lb = graph.append_node(blk, IrNode::new(OpKind::LocalLoad(b), Some(RegClass::Int), vec![]));
        let div = graph.append_node(blk, IrNode::new(OpKind::Div, Some(RegClass::Int), vec![la, lb]));
        graph.append_node(blk, IrNode::new(OpKind::LocalStore(t), None, vec![div]));
        finish(&mut graph);

        let tgt = target();
        let product = build(&mut graph, &tgt).unwrap();
        product.validate().unwrap();

        let at_div = positions_of_node(&product, div);
        let kills: Vec<_> = at_div.iter().filter(|(k, _)| *k == RefKind::Kill).collect();
        assert_eq!(kills.len() as u32, tgt.divide_kill().count());
        let def = product
            .timeline()
            .find(|(_, p)| p.node == Some(div) && p.kind == RefKind::Def)
            .unwrap();
        assert_eq!(
            def.1.candidates,
            RegMask::single(tgt.divide_kill().lowest().unwrap())
        );
    }

    #[test]
    fn test_validate_rejects_read_after_last_use() {
        let mut product = BuildProduct {
            intervals: Arena::new(),
            positions: Arena::new(),
            reg_records: refpos::build_reg_records(&target()),
            local_intervals: Vec::new(),
            live_in_pred: Vec::new(),
            stats: BuildStats::default(),
        };
        let all = target().all_regs(RegClass::Int);
        let iv = IntervalId(
            product
                .intervals
                .alloc(Interval::for_local(LocalId(0), RegClass::Int, all)),
        );
        let blk = Some(BlockId(0));
        let mut first = RefPosition::new(
            Location(4),
            RefKind::Use,
            Referent::Interval(iv),
            all,
        );
        first.last_use = true;
        first.block = blk;
        let first = RefPosId(product.positions.alloc(first));
        let mut second = RefPosition::new(
            Location(6),
            RefKind::Use,
            Referent::Interval(iv),
            all,
        );
        second.block = blk;
        let second = RefPosId(product.positions.alloc(second));
        let mut chain = RefChain::default();
        chain.push(first, &mut product.positions);
        chain.push(second, &mut product.positions);
        product.intervals[iv.0].chain = chain;

        assert!(product.validate().is_err());
    }

    #[test]
    fn test_stats_count_what_was_emitted() {
        let mut graph = FlowGraph::new("stats");
        let a = graph.add_local(LocalVar::new(RegClass::Int).param(Some(RegNum(0))));
        let blk = graph.add_block(BlockKind::Return);
        let la = graph.append_node(blk, IrNode::new(OpKind::LocalLoad(a), Some(RegClass::Int), vec![]));
        graph.append_node(blk, IrNode::new(OpKind::Return, None, vec![la]));
        finish(&mut graph);

        let product = build(&mut graph, &target()).unwrap();
        assert_eq!(product.stats.positions as usize, product.positions.len());
        assert_eq!(product.stats.intervals as usize, product.intervals.len());
        assert_eq!(product.stats.blocks, 1);
        assert!(product.stats.uses >= 1);
        assert!(product.stats.defs >= 1);
    }
}
