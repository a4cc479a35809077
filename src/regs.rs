//! Physical register numbering, masks, and the target register model
//!
//! The allocator itself is target-neutral: everything it needs to know about a
//! machine is "a fixed set of registers partitioned into classes, some roles
//! (return, argument, shift count), callee-saved subsets, and a kill set per
//! operation". [`TargetModel`] captures exactly that. The crate ships one
//! synthetic 16+16 register model used by tests and as the worked example;
//! real targets are additional data, not additional code.

use lazy_static::lazy_static;
use std::fmt;

/// Number of integer registers in the synthetic model
pub const INT_REG_COUNT: u8 = 16;
/// Number of float registers in the synthetic model
pub const FLOAT_REG_COUNT: u8 = 16;
/// Global register number of the first float register
pub const FIRST_FLOAT_REG: u8 = INT_REG_COUNT;
/// Total registers across both classes
pub const TOTAL_REG_COUNT: u8 = INT_REG_COUNT + FLOAT_REG_COUNT;

/// A physical register, numbered globally across classes
///
/// Integer registers occupy numbers `0..16` (printed `r0..r15`), float
/// registers `16..32` (printed `f0..f15`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegNum(pub u8);

impl RegNum {
    /// Single-bit mask for this register
    pub fn mask(self) -> RegMask {
        RegMask(1u64 << self.0)
    }

    /// Which class this register belongs to
    pub fn class(self) -> RegClass {
        if self.0 < FIRST_FLOAT_REG {
            RegClass::Int
        } else {
            RegClass::Float
        }
    }
}

impl fmt::Display for RegNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 < FIRST_FLOAT_REG {
            write!(f, "r{}", self.0)
        } else {
            write!(f, "f{}", self.0 - FIRST_FLOAT_REG)
        }
    }
}

/// Register class partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegClass {
    Int,
    Float,
}

/// Bit set of physical registers
///
/// Bit `n` corresponds to `RegNum(n)`. Masks from different classes can be
/// unioned freely; class confusion is caught by the candidate-mask checks in
/// the builder, not here.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RegMask(pub u64);

impl RegMask {
    /// The empty mask
    pub const NONE: RegMask = RegMask(0);

    /// Mask containing exactly one register
    pub fn single(reg: RegNum) -> Self {
        reg.mask()
    }

    /// True when no register is present
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when exactly one register is present
    pub fn is_single_reg(self) -> bool {
        self.0 != 0 && (self.0 & (self.0 - 1)) == 0
    }

    /// Membership test
    pub fn contains(self, reg: RegNum) -> bool {
        self.0 & (1u64 << reg.0) != 0
    }

    /// Number of registers present
    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Lowest-numbered register present, if any
    pub fn lowest(self) -> Option<RegNum> {
        if self.0 == 0 {
            None
        } else {
            Some(RegNum(self.0.trailing_zeros() as u8))
        }
    }

    /// `self` with every register of `other` removed
    pub fn without(self, other: RegMask) -> RegMask {
        RegMask(self.0 & !other.0)
    }

    /// True when the two masks share at least one register
    pub fn intersects(self, other: RegMask) -> bool {
        self.0 & other.0 != 0
    }

    /// Iterate registers in increasing number order
    pub fn iter(self) -> RegMaskIter {
        RegMaskIter { bits: self.0 }
    }
}

/// Iterator over the registers of a [`RegMask`]
pub struct RegMaskIter {
    bits: u64,
}

impl Iterator for RegMaskIter {
    type Item = RegNum;

    fn next(&mut self) -> Option<RegNum> {
        if self.bits == 0 {
            return None;
        }
        let n = self.bits.trailing_zeros() as u8;
        self.bits &= self.bits - 1;
        Some(RegNum(n))
    }
}

impl std::ops::BitAnd for RegMask {
    type Output = RegMask;
    fn bitand(self, rhs: RegMask) -> RegMask {
        RegMask(self.0 & rhs.0)
    }
}

impl std::ops::BitOr for RegMask {
    type Output = RegMask;
    fn bitor(self, rhs: RegMask) -> RegMask {
        RegMask(self.0 | rhs.0)
    }
}

impl std::ops::Not for RegMask {
    type Output = RegMask;
    fn not(self) -> RegMask {
        RegMask(!self.0)
    }
}

impl std::ops::BitAndAssign for RegMask {
    fn bitand_assign(&mut self, rhs: RegMask) {
        self.0 &= rhs.0;
    }
}

impl std::ops::BitOrAssign for RegMask {
    fn bitor_assign(&mut self, rhs: RegMask) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for RegMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        let mut first = true;
        for reg in self.iter() {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{}", reg)?;
            first = false;
        }
        write!(f, "}}")
    }
}

impl fmt::Display for RegMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Register description for one target
///
/// Allocation order lists caller-saved registers before callee-saved ones so
/// short-lived intervals avoid registers that would force prolog saves.
#[derive(Debug, Clone)]
pub struct TargetModel {
    int_all: RegMask,
    float_all: RegMask,
    int_callee_saved: RegMask,
    float_callee_saved: RegMask,
    int_args: Vec<RegNum>,
    float_args: Vec<RegNum>,
    int_returns: Vec<RegNum>,
    float_returns: Vec<RegNum>,
    /// Registers trashed by integer divide (quotient and scratch)
    divide_kill: RegMask,
    /// Register holding a variable shift count
    shift_count: RegNum,
    int_alloc_order: Vec<RegNum>,
    float_alloc_order: Vec<RegNum>,
}

impl TargetModel {
    /// The synthetic 16 integer + 16 float register target
    ///
    /// Roles: `r0..r3` / `f0..f3` argument registers, `r0` (+`r1`) / `f0`
    /// return registers, `r8..r15` / `f8..f15` callee-saved, divide trashes
    /// `{r0, r3}`, variable shifts count in `r2`.
    pub fn synthetic() -> Self {
        let int_all = RegMask(0x0000_FFFF);
        let float_all = RegMask(0xFFFF_0000);
        let int_callee_saved = RegMask(0x0000_FF00);
        let float_callee_saved = RegMask(0xFF00_0000);

        let int_args: Vec<RegNum> = (0..4).map(RegNum).collect();
        let float_args: Vec<RegNum> = (FIRST_FLOAT_REG..FIRST_FLOAT_REG + 4).map(RegNum).collect();

        let mut int_alloc_order: Vec<RegNum> = (0..8).map(RegNum).collect();
        int_alloc_order.extend((8..INT_REG_COUNT).map(RegNum));
        let mut float_alloc_order: Vec<RegNum> =
            (FIRST_FLOAT_REG..FIRST_FLOAT_REG + 8).map(RegNum).collect();
        float_alloc_order.extend((FIRST_FLOAT_REG + 8..TOTAL_REG_COUNT).map(RegNum));

        TargetModel {
            int_all,
            float_all,
            int_callee_saved,
            float_callee_saved,
            int_args,
            float_args,
            int_returns: vec![RegNum(0), RegNum(1)],
            float_returns: vec![RegNum(FIRST_FLOAT_REG)],
            divide_kill: RegNum(0).mask() | RegNum(3).mask(),
            shift_count: RegNum(2),
            int_alloc_order,
            float_alloc_order,
        }
    }

    /// All registers of a class
    pub fn all_regs(&self, class: RegClass) -> RegMask {
        match class {
            RegClass::Int => self.int_all,
            RegClass::Float => self.float_all,
        }
    }

    /// All registers of both classes
    pub fn all_regs_any(&self) -> RegMask {
        self.int_all | self.float_all
    }

    /// Callee-saved registers of a class
    pub fn callee_saved(&self, class: RegClass) -> RegMask {
        match class {
            RegClass::Int => self.int_callee_saved,
            RegClass::Float => self.float_callee_saved,
        }
    }

    /// Caller-saved registers of a class
    pub fn caller_saved(&self, class: RegClass) -> RegMask {
        self.all_regs(class).without(self.callee_saved(class))
    }

    /// Everything a plain call clobbers: caller-saved registers of both classes
    pub fn call_kill_mask(&self) -> RegMask {
        self.caller_saved(RegClass::Int) | self.caller_saved(RegClass::Float)
    }

    /// True when `mask` is (at least) the full call clobber set
    pub fn is_full_call_kill(&self, mask: RegMask) -> bool {
        let call = self.call_kill_mask();
        mask & call == call && !call.is_empty()
    }

    /// The `i`-th argument register of a class, if the target has one
    pub fn arg_reg(&self, class: RegClass, i: usize) -> Option<RegNum> {
        match class {
            RegClass::Int => self.int_args.get(i).copied(),
            RegClass::Float => self.float_args.get(i).copied(),
        }
    }

    /// Mask of all argument registers of a class
    pub fn arg_regs(&self, class: RegClass) -> RegMask {
        let list = match class {
            RegClass::Int => &self.int_args,
            RegClass::Float => &self.float_args,
        };
        list.iter().fold(RegMask::NONE, |m, r| m | r.mask())
    }

    /// The register sequence for an `n`-register value return
    ///
    /// Returns `None` when the target cannot return `n` registers of this
    /// class at once.
    pub fn return_regs(&self, class: RegClass, n: usize) -> Option<&[RegNum]> {
        let list = match class {
            RegClass::Int => &self.int_returns,
            RegClass::Float => &self.float_returns,
        };
        if n == 0 || n > list.len() {
            None
        } else {
            Some(&list[..n])
        }
    }

    /// Registers trashed by an integer divide
    pub fn divide_kill(&self) -> RegMask {
        self.divide_kill
    }

    /// Register a variable shift count must sit in
    pub fn shift_count_reg(&self) -> RegNum {
        self.shift_count
    }

    /// Allocation-order rank of a register within its class (0 = first choice)
    pub fn alloc_rank(&self, reg: RegNum) -> usize {
        let order = match reg.class() {
            RegClass::Int => &self.int_alloc_order,
            RegClass::Float => &self.float_alloc_order,
        };
        order.iter().position(|r| *r == reg).unwrap_or(usize::MAX)
    }

    /// Registers of a class in allocation order
    pub fn alloc_order(&self, class: RegClass) -> &[RegNum] {
        match class {
            RegClass::Int => &self.int_alloc_order,
            RegClass::Float => &self.float_alloc_order,
        }
    }
}

lazy_static! {
    /// Shared default target used when callers do not supply their own model
    pub static ref DEFAULT_TARGET: TargetModel = TargetModel::synthetic();
}
