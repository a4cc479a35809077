//! The region table
//!
//! One descriptor per protected-region clause, kept innermost-first: a
//! descriptor's enclosing links always point at a *later* entry. Mutually-
//! protecting regions (one try, several handlers) are adjacent entries with
//! bit-identical try ranges; the innermost entry of such a group is the one
//! blocks inside the try point at.
//!
//! Structural edits go through [`EhTable::remove_entry`] and
//! [`EhTable::add_entry`], which return an [`EhRemap`] the flow graph applies
//! to every block in one step. Nothing patches indices ad hoc.

use crate::error::{Error, Result};
use crate::ir::block::BlockId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};

/// Handle of a region-table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EhIndex(pub u32);

impl fmt::Display for EhIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EH#{}", self.0)
    }
}

/// What kind of handler a region has
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    Catch,
    Filter,
    Finally,
    Fault,
}

impl HandlerKind {
    /// Finally and fault handlers run on the unwind path and cannot share a
    /// try with another handler
    pub fn is_finally_or_fault(self) -> bool {
        matches!(self, HandlerKind::Finally | HandlerKind::Fault)
    }
}

/// One region-table entry
///
/// Ranges are inclusive on both ends and named by block. The offset fields
/// record the clause's position in the initial linear layout; construction and
/// sorting use them, everything afterwards uses the block handles.
#[derive(Debug, Clone)]
pub struct EhDescriptor {
    pub kind: HandlerKind,
    pub try_begin: BlockId,
    pub try_last: BlockId,
    pub hnd_begin: BlockId,
    pub hnd_last: BlockId,
    /// First block of the filter; the filter runs up to (not including) the
    /// handler begin
    pub filter_begin: Option<BlockId>,
    /// Innermost try region this whole region is nested in
    pub enclosing_try: Option<EhIndex>,
    /// Innermost handler region this whole region is nested in
    pub enclosing_hnd: Option<EhIndex>,
    /// Source try range, half-open over the initial layout
    pub try_off: (u32, u32),
    /// Source handler range, half-open
    pub hnd_off: (u32, u32),
    /// Source filter start offset; the filter ends where the handler begins
    pub filter_off: Option<u32>,
}

impl EhDescriptor {
    pub fn has_filter(&self) -> bool {
        self.filter_begin.is_some()
    }

    /// Where a thrown exception enters this region: the filter when there is
    /// one, else the handler
    pub fn exception_block(&self) -> BlockId {
        self.filter_begin.unwrap_or(self.hnd_begin)
    }

    /// Bit-identical try ranges, the mutual-protection test
    pub fn same_try(a: &EhDescriptor, b: &EhDescriptor) -> bool {
        a.try_begin == b.try_begin && a.try_last == b.try_last
    }

    /// The innermost of the two enclosing links; the bool is true when it is
    /// the try side
    ///
    /// Inner regions have smaller indices, so the smaller link wins.
    pub fn enclosing_region(&self) -> Option<(EhIndex, bool)> {
        match (self.enclosing_try, self.enclosing_hnd) {
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
}

/// Hard cap on table size; indices must stay addressable by compact encodings
pub const MAX_REGIONS: usize = u16::MAX as usize;

/// The region table proper
#[derive(Debug, Clone, Default)]
pub struct EhTable {
    entries: Vec<EhDescriptor>,
}

impl EhTable {
    pub fn new() -> Self {
        EhTable {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: EhIndex) -> Option<&EhDescriptor> {
        self.entries.get(index.0 as usize)
    }

    pub fn get_mut(&mut self, index: EhIndex) -> Option<&mut EhDescriptor> {
        self.entries.get_mut(index.0 as usize)
    }

    /// Iterate `(index, descriptor)` pairs innermost-first
    pub fn iter(&self) -> impl Iterator<Item = (EhIndex, &EhDescriptor)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, d)| (EhIndex(i as u32), d))
    }

    /// Append a descriptor, keeping the table under [`MAX_REGIONS`]
    pub fn push(&mut self, desc: EhDescriptor) -> Result<EhIndex> {
        if self.entries.len() >= MAX_REGIONS {
            return Err(Error::Limit {
                what: "region table entries",
                limit: MAX_REGIONS,
            });
        }
        let index = EhIndex(self.entries.len() as u32);
        self.entries.push(desc);
        Ok(index)
    }

    /// Walk the enclosing-try chain starting at (and excluding) `index`
    pub fn enclosing_try_chain(&self, index: EhIndex) -> TryChain<'_> {
        TryChain {
            table: self,
            next: self[index].enclosing_try,
        }
    }

    /// Is `block_try` (a block's innermost try, `None` for none) inside the
    /// try body of `region`?
    ///
    /// Walks the chain outward; inner regions have smaller indices, so the
    /// walk can stop as soon as it reaches or passes `region`.
    pub fn in_try_chain(&self, region: EhIndex, block_try: Option<EhIndex>) -> bool {
        let mut cur = block_try;
        while let Some(i) = cur {
            if i >= region {
                return i == region;
            }
            cur = self[i].enclosing_try;
        }
        false
    }

    /// Is `block_hnd` (a block's innermost handler, `None` for none) inside
    /// the handler body of `region`?
    pub fn in_hnd_chain(&self, region: EhIndex, block_hnd: Option<EhIndex>) -> bool {
        let mut cur = block_hnd;
        while let Some(i) = cur {
            if i == region {
                return true;
            }
            cur = self[i].enclosing_hnd;
        }
        false
    }

    /// Enclosing try index skipping mutual-protect partners
    pub fn true_enclosing_try(&self, index: EhIndex) -> Option<EhIndex> {
        let root = &self[index];
        let mut cur = root.enclosing_try;
        while let Some(i) = cur {
            if !EhDescriptor::same_try(root, &self[i]) {
                return Some(i);
            }
            cur = self[i].enclosing_try;
        }
        None
    }

    /// True when the two entries protect bit-identical try ranges
    pub fn is_mutually_protecting(&self, a: EhIndex, b: EhIndex) -> bool {
        EhDescriptor::same_try(&self[a], &self[b])
    }

    /// The adjacent run of mutual-protect entries containing `index`,
    /// inclusive on both ends
    pub fn mutual_protect_group(&self, index: EhIndex) -> (EhIndex, EhIndex) {
        let mut first = index.0;
        while first > 0 && self.is_mutually_protecting(EhIndex(first - 1), index) {
            first -= 1;
        }
        let mut last = index.0;
        while (last + 1) < self.entries.len() as u32
            && self.is_mutually_protecting(EhIndex(last + 1), index)
        {
            last += 1;
        }
        (EhIndex(first), EhIndex(last))
    }

    /// Remove entry `index`, compact the table, and fix the surviving
    /// entries' enclosing links
    ///
    /// Returns the remap the flow graph must apply to block indices. Blocks
    /// still pointing at the removed region repoint to its enclosing region;
    /// they are expected to be dead or getting new membership from the caller.
    pub fn remove_entry(&mut self, index: EhIndex) -> EhRemap {
        let xt = index.0;
        let removed = self.entries.remove(xt as usize);

        let shift = |link: Option<EhIndex>, fallback: Option<EhIndex>| -> Option<EhIndex> {
            match link {
                Some(i) if i.0 == xt => fallback,
                Some(i) if i.0 > xt => Some(EhIndex(i.0 - 1)),
                other => other,
            }
        };

        // The removed entry's own links are outer, so they only ever shift.
        let try_fallback = shift(removed.enclosing_try, None);
        let hnd_fallback = shift(removed.enclosing_hnd, None);

        for d in &mut self.entries {
            d.enclosing_try = shift(d.enclosing_try, try_fallback);
            d.enclosing_hnd = shift(d.enclosing_hnd, hnd_fallback);
        }

        let old_len = self.entries.len() + 1;
        let map = (0..old_len as u32)
            .map(|i| {
                if i == xt {
                    None
                } else if i > xt {
                    Some(EhIndex(i - 1))
                } else {
                    Some(EhIndex(i))
                }
            })
            .collect();

        EhRemap {
            map,
            try_fallback,
            hnd_fallback,
        }
    }

    /// Insert `desc` at position `index`, shifting later entries outward
    ///
    /// The descriptor's own enclosing links must already be expressed in the
    /// post-insertion index space. Returns the remap for block indices.
    pub fn add_entry(&mut self, index: EhIndex, desc: EhDescriptor) -> Result<EhRemap> {
        if self.entries.len() >= MAX_REGIONS {
            return Err(Error::Limit {
                what: "region table entries",
                limit: MAX_REGIONS,
            });
        }
        let xt = index.0;
        debug_assert!(xt as usize <= self.entries.len());

        let bump = |link: Option<EhIndex>| -> Option<EhIndex> {
            match link {
                Some(i) if i.0 >= xt => Some(EhIndex(i.0 + 1)),
                other => other,
            }
        };
        for d in &mut self.entries {
            d.enclosing_try = bump(d.enclosing_try);
            d.enclosing_hnd = bump(d.enclosing_hnd);
        }
        self.entries.insert(xt as usize, desc);

        let old_len = self.entries.len() - 1;
        let map = (0..old_len as u32)
            .map(|i| {
                if i >= xt {
                    Some(EhIndex(i + 1))
                } else {
                    Some(EhIndex(i))
                }
            })
            .collect();

        Ok(EhRemap {
            map,
            try_fallback: None,
            hnd_fallback: None,
        })
    }
}

impl Index<EhIndex> for EhTable {
    type Output = EhDescriptor;

    fn index(&self, index: EhIndex) -> &EhDescriptor {
        &self.entries[index.0 as usize]
    }
}

impl IndexMut<EhIndex> for EhTable {
    fn index_mut(&mut self, index: EhIndex) -> &mut EhDescriptor {
        &mut self.entries[index.0 as usize]
    }
}

/// Iterator over an entry's enclosing-try chain
pub struct TryChain<'a> {
    table: &'a EhTable,
    next: Option<EhIndex>,
}

impl Iterator for TryChain<'_> {
    type Item = EhIndex;

    fn next(&mut self) -> Option<EhIndex> {
        let cur = self.next?;
        self.next = self.table[cur].enclosing_try;
        Some(cur)
    }
}

/// Old-index to new-index translation produced by a structural table edit
#[derive(Debug, Clone)]
pub struct EhRemap {
    map: Vec<Option<EhIndex>>,
    try_fallback: Option<EhIndex>,
    hnd_fallback: Option<EhIndex>,
}

impl EhRemap {
    /// Translate a block's try index
    pub fn map_try(&self, old: Option<EhIndex>) -> Option<EhIndex> {
        match old {
            None => None,
            Some(i) => self
                .map
                .get(i.0 as usize)
                .copied()
                .flatten()
                .or(self.try_fallback),
        }
    }

    /// Translate a block's handler index
    pub fn map_hnd(&self, old: Option<EhIndex>) -> Option<EhIndex> {
        match old {
            None => None,
            Some(i) => self
                .map
                .get(i.0 as usize)
                .copied()
                .flatten()
                .or(self.hnd_fallback),
        }
    }
}
