//! Basic blocks
//!
//! Blocks own an ordered node list and a jump kind. Region membership is a
//! pair of optional region-table indices (innermost try, innermost handler);
//! blocks outside any region carry `None`, not a sentinel index. Predecessor
//! edges carry a duplicate count so a switch jumping to the same target
//! through several cases stays a single edge.

use super::node::NodeId;
use super::VarSet;
use crate::eh::table::EhIndex;
use std::fmt;

/// Handle of a basic block in the flow graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// How control leaves a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    /// Fall into the next block in sequence
    Fallthrough,
    /// Unconditional jump
    Always { target: BlockId },
    /// Importer-produced unconditional exit from a protected region; behaves
    /// as an unconditional jump here
    Leave { target: BlockId },
    /// Conditional jump: taken target plus fallthrough to the next block
    Cond { target: BlockId },
    /// Jump table; duplicate targets allowed
    Switch { targets: Vec<BlockId> },
    Return,
    /// Ends in an unhandled throw; no ordinary successors
    Throw,
    /// Invoke a finally handler; paired with the next block in sequence,
    /// which receives control when the finally returns
    CallFinally { target: BlockId },
    /// Last block of a finally; flows back to the pair tails of its callers
    EhFinallyRet,
    /// Last block of a filter; flows into its handler with the decision value
    EhFilterRet,
    /// Leaves a catch handler for the given continuation
    EhCatchRet { target: BlockId },
}

impl BlockKind {
    /// Mnemonic used by trace output and dumps
    pub fn mnemonic(&self) -> &'static str {
        match self {
            BlockKind::Fallthrough => "fall",
            BlockKind::Always { .. } => "jmp",
            BlockKind::Leave { .. } => "leave",
            BlockKind::Cond { .. } => "jcc",
            BlockKind::Switch { .. } => "switch",
            BlockKind::Return => "ret",
            BlockKind::Throw => "throw",
            BlockKind::CallFinally { .. } => "callfin",
            BlockKind::EhFinallyRet => "finret",
            BlockKind::EhFilterRet => "filtret",
            BlockKind::EhCatchRet { .. } => "catchret",
        }
    }
}

/// Predecessor edge with duplicate count
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredEdge {
    pub pred: BlockId,
    /// Number of distinct jump sources within `pred` (switch fan-in)
    pub dup_count: u32,
}

/// A basic block
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// Stable sequence number; survives insertions and removals
    pub num: u32,
    pub kind: BlockKind,
    /// Nodes in linear execution order
    pub nodes: Vec<NodeId>,
    pub preds: Vec<PredEdge>,
    /// Innermost try region containing this block
    pub try_index: Option<EhIndex>,
    /// Innermost handler (or filter) region containing this block
    pub hnd_index: Option<EhIndex>,
    /// Compiler-inserted, carries no source code
    pub internal: bool,
    /// Must never be removed (region begin blocks and similar anchors)
    pub keep: bool,
    /// Target of a jump; needs a label
    pub label_target: bool,
    /// Marked dead; edges unlinked, skipped by walks
    pub removed: bool,
    /// A finally caller that never returns; its pair tail is absent
    pub retless_call: bool,
    pub var_use: VarSet,
    pub var_def: VarSet,
    pub live_in: VarSet,
    pub live_out: VarSet,
}

impl BasicBlock {
    pub fn new(num: u32, kind: BlockKind) -> Self {
        BasicBlock {
            num,
            kind,
            nodes: Vec::new(),
            preds: Vec::new(),
            try_index: None,
            hnd_index: None,
            internal: false,
            keep: false,
            label_target: false,
            removed: false,
            retless_call: false,
            var_use: VarSet::default(),
            var_def: VarSet::default(),
            live_in: VarSet::default(),
            live_out: VarSet::default(),
        }
    }

    /// True when the block carries no nodes
    pub fn is_empty_body(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Find the predecessor edge from `pred`, if present
    pub fn find_pred(&self, pred: BlockId) -> Option<&PredEdge> {
        self.preds.iter().find(|e| e.pred == pred)
    }

    /// Record one more jump from `pred` into this block
    pub fn add_pred(&mut self, pred: BlockId) {
        if let Some(edge) = self.preds.iter_mut().find(|e| e.pred == pred) {
            edge.dup_count += 1;
        } else {
            self.preds.push(PredEdge { pred, dup_count: 1 });
        }
    }

    /// Drop one jump from `pred`; removes the edge when its count reaches zero
    pub fn remove_pred(&mut self, pred: BlockId) {
        if let Some(pos) = self.preds.iter().position(|e| e.pred == pred) {
            if self.preds[pos].dup_count > 1 {
                self.preds[pos].dup_count -= 1;
            } else {
                self.preds.remove(pos);
            }
        }
    }
}
