//! Lowered IR nodes
//!
//! Nodes arrive in final linear execution order; the build walk assigns each
//! one a two-slot location and never reorders. Value edges are single-def
//! single-use: an operand entry consumes the listed node's value (all of its
//! values, for multi-register definitions). A *contained* node is folded into
//! its consumer, produces nothing of its own, and exposes its operands to the
//! consumer instead.

use super::LocalId;
use crate::regs::RegClass;
use std::fmt;

/// Handle of an IR node in the unit's node arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Operation kinds
///
/// The set is intentionally small but covers every register-shape the build
/// phase must handle: plain values, read-modify-write arithmetic, fixed
/// register constraints on defs and uses, kill sets, internal scratch
/// registers, and multi-register definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpKind {
    /// Integer or float constant material
    LoadConst(i64),
    /// Read a local variable
    LocalLoad(LocalId),
    /// Write a local variable; operand 0 is the value
    LocalStore(LocalId),
    /// Three-address add
    Add,
    /// Three-address subtract
    Sub,
    /// Read-modify-write multiply: the result overwrites operand 0's register,
    /// so operand 1 stays live into the def slot
    Mul,
    Neg,
    /// Load through operand 0's address
    Load,
    /// Store operand 1 through operand 0's address
    Store,
    /// Integer divide; dividend and quotient pinned to the divide register,
    /// scratch registers trashed
    Div,
    /// Shift by a variable amount; the count sits in the target's count register
    Shift,
    /// Move a call argument into argument register `index`
    PutArg { index: u8 },
    /// Call consuming `args` argument-register operands, producing one value
    Call { args: u8 },
    /// Call producing `results` register values
    CallMulti { args: u8, results: u8 },
    /// Spread a multi-register value into consecutive locals starting at
    /// `first`; operand 0 must be a multi-register definition
    SaveMulti { first: LocalId },
    /// Runtime hook after which no GC reference may remain in a register
    GcSafepoint,
    /// Block copy from operand 1's address to operand 0's address; needs a
    /// scratch register that must not alias either address
    CopyBlock,
    /// Compute a branch condition; the block's jump kind consumes it
    CondJump,
    /// Jump-table dispatch on operand 0; needs a scratch register for the
    /// table base
    SwitchJump,
    /// Return operand 0 (if any) in the return register
    Return,
    Nop,
}

impl OpKind {
    /// Short mnemonic used by trace output
    pub fn mnemonic(&self) -> &'static str {
        match self {
            OpKind::LoadConst(_) => "const",
            OpKind::LocalLoad(_) => "ldloc",
            OpKind::LocalStore(_) => "stloc",
            OpKind::Add => "add",
            OpKind::Sub => "sub",
            OpKind::Mul => "mul",
            OpKind::Neg => "neg",
            OpKind::Load => "load",
            OpKind::Store => "store",
            OpKind::Div => "div",
            OpKind::Shift => "shift",
            OpKind::PutArg { .. } => "putarg",
            OpKind::Call { .. } => "call",
            OpKind::CallMulti { .. } => "callm",
            OpKind::SaveMulti { .. } => "savem",
            OpKind::GcSafepoint => "safepoint",
            OpKind::CopyBlock => "copyblk",
            OpKind::CondJump => "condjmp",
            OpKind::SwitchJump => "switch",
            OpKind::Return => "ret",
            OpKind::Nop => "nop",
        }
    }
}

/// One lowered node
#[derive(Debug, Clone)]
pub struct IrNode {
    pub op: OpKind,
    /// Register class of the produced value; `None` for void nodes
    pub value_class: Option<RegClass>,
    /// Consumed nodes, in evaluation order
    pub operands: Vec<NodeId>,
    /// Folded into the consumer; produces no value and gets no own location
    /// treatment beyond exposing its operands
    pub contained: bool,
}

impl IrNode {
    pub fn new(op: OpKind, value_class: Option<RegClass>, operands: Vec<NodeId>) -> Self {
        IrNode {
            op,
            value_class,
            operands,
            contained: false,
        }
    }

    /// Builder-style setter marking the node contained
    pub fn contained(mut self) -> Self {
        self.contained = true;
        self
    }

    /// Number of register values this node defines
    pub fn result_count(&self) -> u8 {
        match self.op {
            OpKind::CallMulti { results, .. } => results,
            _ => {
                if self.value_class.is_some() && !self.contained {
                    1
                } else {
                    0
                }
            }
        }
    }
}
