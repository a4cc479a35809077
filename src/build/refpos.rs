//! Reference positions and per-register reference records
//!
//! A [`RefPosition`] is one event on the build timeline: a definition, a use,
//! a clobber, or one of the markers the block walk inserts (block boundaries,
//! entry definitions). Positions are allocated strictly in walk order, so
//! arena order doubles as location order. Each position belongs to at most
//! one referent (an interval or a physical register) and is threaded onto
//! that referent's chain as it is created.

use crate::arena::Arena;
use crate::ir::block::BlockId;
use crate::ir::node::NodeId;
use crate::regs::{RegClass, RegMask, RegNum, TargetModel};
use std::fmt;

use super::interval::IntervalId;

/// Handle of a reference position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefPosId(pub u32);

impl fmt::Display for RefPosId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A point on the build walk's timeline
///
/// Entry definitions (parameters, zero inits) sit at location 0. Block
/// boundaries and nodes occupy even locations; a node's uses and kills happen
/// at its own location and its definitions at the following odd location, so
/// a definition is never contemporaneous with the uses feeding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Location(pub u32);

impl Location {
    /// Location of entry definitions
    pub const MIN: Location = Location(0);

    /// The location `n` steps later
    pub fn plus(self, n: u32) -> Location {
        Location(self.0 + n)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// What a reference position records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    /// Value definition by a node
    Def,
    /// Value consumption by a node
    Use,
    /// Incoming parameter definition at entry
    ParamDef,
    /// Synthetic entry definition of a local the prolog zeroes
    ZeroInit,
    /// Synthetic definition at a block start for a value that arrives live
    /// without flowing out of the elected predecessor
    DummyDef,
    /// Use at a block end for a value whose liveness continues only along
    /// back edges
    ExposedUse,
    /// A physical register clobbered by an operation
    Kill,
    /// Point past which no register may hold an unreported GC reference
    KillGcRefs,
    /// Block boundary marker
    BlockBoundary,
    /// Companion on a physical register for a single-register use or def
    FixedReg,
}

impl RefKind {
    /// Definitions, including the synthetic entry and block-start forms
    pub fn is_def(self) -> bool {
        matches!(
            self,
            RefKind::Def | RefKind::ParamDef | RefKind::ZeroInit | RefKind::DummyDef
        )
    }

    /// Uses, including exposed uses
    pub fn is_use(self) -> bool {
        matches!(self, RefKind::Use | RefKind::ExposedUse)
    }

    /// Short name used in dumps
    pub fn mnemonic(self) -> &'static str {
        match self {
            RefKind::Def => "def",
            RefKind::Use => "use",
            RefKind::ParamDef => "param",
            RefKind::ZeroInit => "zero",
            RefKind::DummyDef => "ddef",
            RefKind::ExposedUse => "expuse",
            RefKind::Kill => "kill",
            RefKind::KillGcRefs => "kill-gc",
            RefKind::BlockBoundary => "bb",
            RefKind::FixedReg => "fixed",
        }
    }
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// What a position refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Referent {
    /// Boundary and GC-kill markers track no single owner
    None,
    /// An interval: a local variable, a node result, or a scratch temp
    Interval(IntervalId),
    /// A physical register: kills and fixed-register companions
    Reg(RegNum),
}

impl Referent {
    pub fn interval(self) -> Option<IntervalId> {
        match self {
            Referent::Interval(i) => Some(i),
            _ => None,
        }
    }

    pub fn reg(self) -> Option<RegNum> {
        match self {
            Referent::Reg(r) => Some(r),
            _ => None,
        }
    }
}

/// One definition, use, kill, or marker on the timeline
#[derive(Debug, Clone)]
pub struct RefPosition {
    pub location: Location,
    pub kind: RefKind,
    pub referent: Referent,
    /// Registers this reference may be satisfied by
    pub candidates: RegMask,
    /// No later reference reads this value. Starts as an estimate; the walk
    /// demotes it as later references of the same variable appear.
    pub last_use: bool,
    /// The register must stay held through the consuming node's definition
    /// location, not just to the use itself
    pub delay_free: bool,
    /// Candidates named exactly one register when the position was created
    pub fixed_reg_ref: bool,
    /// Giving this reference a register is profitable but not required
    pub reg_optional: bool,
    /// Definition whose value no node consumes
    pub is_local_def_use: bool,
    /// Result slot of a multi-register definition, or operand slot of a
    /// multi-register use
    pub multi_reg_idx: u8,
    /// Node this reference belongs to, when it maps to one
    pub node: Option<NodeId>,
    /// Block the position was emitted in; entry and trailing markers have none
    pub block: Option<BlockId>,
    /// Next position of the same referent
    pub next: Option<RefPosId>,
}

impl RefPosition {
    pub(crate) fn new(
        location: Location,
        kind: RefKind,
        referent: Referent,
        candidates: RegMask,
    ) -> Self {
        RefPosition {
            location,
            kind,
            referent,
            candidates,
            last_use: false,
            delay_free: false,
            fixed_reg_ref: false,
            reg_optional: false,
            is_local_def_use: false,
            multi_reg_idx: 0,
            node: None,
            block: None,
            next: None,
        }
    }

    /// Location through which this reference occupies its register
    ///
    /// A delayed-free use extends one step past its own location.
    pub fn end_location(&self) -> Location {
        if self.delay_free {
            self.location.plus(1)
        } else {
            self.location
        }
    }
}

impl fmt::Display for RefPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<5} {:<7}", self.location.to_string(), self.kind.mnemonic())?;
        match self.referent {
            Referent::None => {}
            Referent::Interval(i) => write!(f, " {}", i)?,
            Referent::Reg(r) => write!(f, " {}", r)?,
        }
        if !self.candidates.is_empty() {
            write!(f, " {}", self.candidates)?;
        }
        if self.last_use {
            write!(f, " last")?;
        }
        if self.delay_free {
            write!(f, " delay")?;
        }
        if self.reg_optional {
            write!(f, " opt")?;
        }
        Ok(())
    }
}

/// First and last reference of one referent, in emission order
#[derive(Debug, Clone, Copy, Default)]
pub struct RefChain {
    pub first: Option<RefPosId>,
    pub last: Option<RefPosId>,
}

impl RefChain {
    /// Append `id`, linking the previous tail to it
    pub(crate) fn push(&mut self, id: RefPosId, positions: &mut Arena<RefPosition>) {
        if let Some(prev) = self.last {
            positions[prev.0].next = Some(id);
        } else {
            self.first = Some(id);
        }
        self.last = Some(id);
    }
}

/// Reference history of one physical register
#[derive(Debug, Clone)]
pub struct RegRecord {
    pub num: RegNum,
    pub class: RegClass,
    pub callee_saved: bool,
    /// Position in the target's allocation order within the class
    pub alloc_rank: usize,
    pub chain: RefChain,
}

/// One record per register of the target, indexed by register number
pub(crate) fn build_reg_records(target: &TargetModel) -> Vec<RegRecord> {
    let mut out = Vec::new();
    for reg in target.all_regs_any().iter() {
        debug_assert_eq!(out.len(), reg.0 as usize);
        out.push(RegRecord {
            num: reg,
            class: reg.class(),
            callee_saved: target.callee_saved(reg.class()).contains(reg),
            alloc_rank: target.alloc_rank(reg),
            chain: RefChain::default(),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_partition() {
        for kind in [
            RefKind::Def,
            RefKind::Use,
            RefKind::ParamDef,
            RefKind::ZeroInit,
            RefKind::DummyDef,
            RefKind::ExposedUse,
            RefKind::Kill,
            RefKind::KillGcRefs,
            RefKind::BlockBoundary,
            RefKind::FixedReg,
        ] {
            assert!(!(kind.is_def() && kind.is_use()), "{} is both", kind);
        }
        assert!(RefKind::DummyDef.is_def());
        assert!(RefKind::ExposedUse.is_use());
        assert!(!RefKind::Kill.is_def());
    }

    #[test]
    fn test_chain_push_links_in_order() {
        let mut positions = Arena::new();
        let mut chain = RefChain::default();
        for i in 0..3 {
            let id = RefPosId(positions.alloc(RefPosition::new(
                Location(i * 2),
                RefKind::Use,
                Referent::None,
                RegMask::NONE,
            )));
            chain.push(id, &mut positions);
        }
        assert_eq!(chain.first, Some(RefPosId(0)));
        assert_eq!(chain.last, Some(RefPosId(2)));
        assert_eq!(positions[0].next, Some(RefPosId(1)));
        assert_eq!(positions[1].next, Some(RefPosId(2)));
        assert_eq!(positions[2].next, None);
    }

    #[test]
    fn test_delay_free_extends_end_location() {
        let mut pos = RefPosition::new(Location(8), RefKind::Use, Referent::None, RegMask::NONE);
        assert_eq!(pos.end_location(), Location(8));
        pos.delay_free = true;
        assert_eq!(pos.end_location(), Location(9));
    }

    #[test]
    fn test_reg_records_cover_the_target() {
        let target = TargetModel::synthetic();
        let records = build_reg_records(&target);
        assert_eq!(records.len(), 32);
        assert_eq!(records[5].num, RegNum(5));
        assert!(records[12].callee_saved);
        assert!(!records[3].callee_saved);
        assert_eq!(records[20].class, RegClass::Float);
        assert_eq!(records[5].alloc_rank, target.alloc_rank(RegNum(5)));
        let ranks: Vec<usize> = records
            .iter()
            .filter(|r| r.class == RegClass::Int)
            .map(|r| r.alloc_rank)
            .collect();
        // Every integer register appears exactly once in the order.
        let mut sorted = ranks.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..16).collect::<Vec<_>>());
    }
}
