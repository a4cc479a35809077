//! Intervals and the register preference policy
//!
//! An interval is the unit the assigner will allocate for: one per candidate
//! local variable, one per value a node produces, and one per scratch
//! register a node requests. References accumulate preferences on the
//! interval as they appear; the merge discipline sits behind
//! [`PreferencePolicy`] so a target can tune how preferences, callee-save
//! bias, and kill aversion combine without touching the walk itself.

use crate::ir::LocalId;
use crate::regs::{RegClass, RegMask, TargetModel};
use std::fmt;

use super::refpos::RefChain;

/// Handle of an interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntervalId(pub u32);

impl fmt::Display for IntervalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I{}", self.0)
    }
}

/// Allocation unit: a local variable, a node result, or a scratch temp
#[derive(Debug, Clone)]
pub struct Interval {
    pub class: RegClass,
    /// Registers the assigner should try first
    pub register_preferences: RegMask,
    /// Registers clobbers have made unattractive for this value
    pub register_aversion: RegMask,
    /// This interval's references, in timeline order
    pub chain: RefChain,
    /// Interval whose assignment this one would like to share
    pub related: Option<IntervalId>,
    /// Backing local variable, when this is not a temporary
    pub local: Option<LocalId>,
    /// Scratch register requested by a node rather than a produced value
    pub is_internal: bool,
    /// Defined by a constant, so the value can be rematerialized
    pub is_constant: bool,
    /// Live across a full call clobber; callee-saved registers avoid a
    /// save/restore around every such call
    pub prefer_callee_save: bool,
    /// Has uses that must not share a register with the definition
    pub has_interfering_uses: bool,
    /// Definition and use candidate sets were found disjoint
    pub has_conflicting_def_use: bool,
    /// Part of a multi-register definition chain
    pub is_multi_reg: bool,
    /// Exactly one definition on the chain
    pub is_single_def: bool,
    /// Keep in memory unless a reference demands a register
    pub spilled_by_default: bool,
}

impl Interval {
    pub(crate) fn new(class: RegClass, all_regs: RegMask) -> Self {
        Interval {
            class,
            register_preferences: all_regs,
            register_aversion: RegMask::NONE,
            chain: RefChain::default(),
            related: None,
            local: None,
            is_internal: false,
            is_constant: false,
            prefer_callee_save: false,
            has_interfering_uses: false,
            has_conflicting_def_use: false,
            is_multi_reg: false,
            is_single_def: false,
            spilled_by_default: false,
        }
    }

    pub(crate) fn for_local(local: LocalId, class: RegClass, all_regs: RegMask) -> Self {
        let mut interval = Interval::new(class, all_regs);
        interval.local = Some(local);
        interval
    }

    pub(crate) fn internal(class: RegClass, all_regs: RegMask) -> Self {
        let mut interval = Interval::new(class, all_regs);
        interval.is_internal = true;
        interval
    }

    /// True for intervals backed by a local variable
    pub fn is_local_var(&self) -> bool {
        self.local.is_some()
    }

    /// Adopt `other` as the related interval unless one is already set
    pub(crate) fn set_related_if_unset(&mut self, other: IntervalId) {
        if self.related.is_none() {
            self.related = Some(other);
        }
    }
}

/// How preferences move as references and clobbers appear
///
/// The walk reports events; the policy decides what the interval's masks do
/// in response. [`DefaultPolicy`] reproduces the stock discipline.
pub trait PreferencePolicy {
    /// Fold one reference's candidate set into the current preferences
    fn merge_preferences(
        &self,
        target: &TargetModel,
        class: RegClass,
        current: RegMask,
        incoming: RegMask,
    ) -> RegMask;

    /// Whether values live across a full call clobber should move toward
    /// callee-saved registers
    fn prefer_callee_save_across_calls(&self) -> bool {
        true
    }

    /// Registers to mark unattractive on a value live across a clobber of
    /// `kill`
    fn aversion_after_kill(&self, target: &TargetModel, class: RegClass, kill: RegMask) -> RegMask {
        target.all_regs(class) & kill
    }
}

/// The stock preference discipline
///
/// An intersection always wins. With nothing in common, a multi-register
/// newcomer (a clobber survivor set) displaces a stale preference, while a
/// multi-register current set holds against a single-register newcomer. Two
/// disjoint single registers fall back to the callee-saved part of their
/// union when it is nonempty, else the union.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPolicy;

impl PreferencePolicy for DefaultPolicy {
    fn merge_preferences(
        &self,
        target: &TargetModel,
        class: RegClass,
        current: RegMask,
        incoming: RegMask,
    ) -> RegMask {
        if incoming.is_empty() {
            return current;
        }
        let common = current & incoming;
        if !common.is_empty() {
            return common;
        }
        if !incoming.is_single_reg() {
            return incoming;
        }
        if !current.is_single_reg() {
            return current;
        }
        let union = current | incoming;
        let callee = union & target.callee_saved(class);
        if !callee.is_empty() {
            callee
        } else {
            union
        }
    }
}
