//! Lowered program representation consumed by the build phase
//!
//! The representation is deliberately small: linear nodes with single-def
//! single-use value edges ([`node`]), basic blocks with jump kinds and
//! region membership ([`block`]), plus the local-variable table and the dense
//! bitsets liveness runs on. Anything target-specific stays out of the IR and
//! in [`crate::regs::TargetModel`].

pub mod block;
pub mod node;

use crate::regs::{RegClass, RegNum};
use std::fmt;

/// Handle of a local variable in the unit's local table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(pub u32);

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// One entry of the local-variable table
///
/// Only tracked locals participate in liveness; their `tracked_index` is the
/// dense bit position used by [`VarSet`]. Untracked locals load and store
/// through memory and never become intervals.
#[derive(Debug, Clone)]
pub struct LocalVar {
    pub class: RegClass,
    /// Participates in liveness and may become an interval
    pub tracked: bool,
    /// Register candidate; tracked locals that must live on the stack
    /// (address-exposed and similar) stay non-candidates
    pub candidate: bool,
    pub is_param: bool,
    /// Incoming register for register-passed parameters
    pub arg_reg: Option<RegNum>,
    /// Holds a GC reference; must not reach a use uninitialized
    pub is_gc_ref: bool,
    /// Dense bit position among tracked locals, assigned by the flow graph
    pub tracked_index: Option<u32>,
}

impl LocalVar {
    /// A plain tracked register-candidate local
    pub fn new(class: RegClass) -> Self {
        LocalVar {
            class,
            tracked: true,
            candidate: true,
            is_param: false,
            arg_reg: None,
            is_gc_ref: false,
            tracked_index: None,
        }
    }

    /// Builder-style setter for parameters
    pub fn param(mut self, arg_reg: Option<RegNum>) -> Self {
        self.is_param = true;
        self.arg_reg = arg_reg;
        self
    }

    /// Builder-style setter marking a GC reference
    pub fn gc_ref(mut self) -> Self {
        self.is_gc_ref = true;
        self
    }

    /// Builder-style setter for non-candidate (memory-resident) locals
    pub fn non_candidate(mut self) -> Self {
        self.candidate = false;
        self
    }

    /// Builder-style setter for untracked locals
    pub fn untracked(mut self) -> Self {
        self.tracked = false;
        self.candidate = false;
        self
    }
}

/// Dense bitset over tracked-local indices
///
/// All sets of one unit share the same universe size, fixed when the flow
/// graph seals its local table.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct VarSet {
    words: Vec<u64>,
}

impl VarSet {
    /// Empty set over a universe of `universe` tracked locals
    pub fn new(universe: usize) -> Self {
        VarSet {
            words: vec![0; universe.div_ceil(64)],
        }
    }

    pub fn insert(&mut self, index: u32) {
        let (w, b) = (index as usize / 64, index as usize % 64);
        debug_assert!(w < self.words.len(), "tracked index out of universe");
        self.words[w] |= 1u64 << b;
    }

    pub fn remove(&mut self, index: u32) {
        let (w, b) = (index as usize / 64, index as usize % 64);
        if w < self.words.len() {
            self.words[w] &= !(1u64 << b);
        }
    }

    pub fn contains(&self, index: u32) -> bool {
        let (w, b) = (index as usize / 64, index as usize % 64);
        w < self.words.len() && self.words[w] & (1u64 << b) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    pub fn clear(&mut self) {
        for w in &mut self.words {
            *w = 0;
        }
    }

    pub fn copy_from(&mut self, other: &VarSet) {
        self.words.clear();
        self.words.extend_from_slice(&other.words);
    }

    /// `self |= other`; returns true when `self` grew
    pub fn union_with(&mut self, other: &VarSet) -> bool {
        let mut changed = false;
        for (dst, src) in self.words.iter_mut().zip(&other.words) {
            let next = *dst | *src;
            changed |= next != *dst;
            *dst = next;
        }
        changed
    }

    /// `self &= other`
    pub fn intersect_with(&mut self, other: &VarSet) {
        for (dst, src) in self.words.iter_mut().zip(&other.words) {
            *dst &= *src;
        }
        // A wider self keeps no bits beyond other's universe.
        for dst in self.words.iter_mut().skip(other.words.len()) {
            *dst = 0;
        }
    }

    /// `self &= !other`
    pub fn remove_all(&mut self, other: &VarSet) {
        for (dst, src) in self.words.iter_mut().zip(&other.words) {
            *dst &= !*src;
        }
    }

    /// True when the two sets share at least one member
    pub fn intersects(&self, other: &VarSet) -> bool {
        self.words
            .iter()
            .zip(&other.words)
            .any(|(a, b)| a & b != 0)
    }

    /// Iterate member indices in increasing order
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, w)| {
            let mut bits = *w;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let b = bits.trailing_zeros();
                bits &= bits - 1;
                Some(wi as u32 * 64 + b)
            })
        })
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}

impl fmt::Debug for VarSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        let mut first = true;
        for i in self.iter() {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "t{}", i)?;
            first = false;
        }
        write!(f, "}}")
    }
}
