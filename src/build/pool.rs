//! Staging list for values defined but not yet consumed
//!
//! Inside a block, every node that produces a consumed value pushes one entry
//! here and the consuming node removes it again. The list is block-local by
//! construction: the walk refuses to end a block while entries remain. Entry
//! records are recycled through a free list since blocks allocate and release
//! them at a high rate.

use crate::error::{Error, Result};
use crate::ir::node::NodeId;

use super::interval::IntervalId;

/// One produced-but-unconsumed value
#[derive(Debug, Clone, Copy)]
pub struct PendingDef {
    pub node: NodeId,
    /// Interval holding the value; multi-register values chain the rest
    /// through their related intervals
    pub interval: IntervalId,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    def: PendingDef,
    next: Option<u32>,
}

/// Order-preserving list of pending definitions with entry recycling
#[derive(Debug, Default)]
pub struct DefList {
    entries: Vec<Entry>,
    head: Option<u32>,
    tail: Option<u32>,
    free: Option<u32>,
    len: usize,
}

impl DefList {
    pub fn new() -> Self {
        DefList::default()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Record the value produced by `node`
    pub fn push(&mut self, node: NodeId, interval: IntervalId) {
        let entry = Entry {
            def: PendingDef { node, interval },
            next: None,
        };
        let idx = match self.free {
            Some(i) => {
                self.free = self.entries[i as usize].next;
                self.entries[i as usize] = entry;
                i
            }
            None => {
                self.entries.push(entry);
                (self.entries.len() - 1) as u32
            }
        };
        match self.tail {
            Some(t) => self.entries[t as usize].next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        self.len += 1;
    }

    /// Remove and return the entry for `node`
    ///
    /// Consumers name the node that produced each operand; a missing entry
    /// means the walk lost track of a definition, or the input used a value
    /// across a block boundary.
    pub fn take(&mut self, node: NodeId) -> Result<PendingDef> {
        let mut prev: Option<u32> = None;
        let mut cur = self.head;
        while let Some(i) = cur {
            let entry = self.entries[i as usize];
            if entry.def.node == node {
                match prev {
                    Some(p) => self.entries[p as usize].next = entry.next,
                    None => self.head = entry.next,
                }
                if self.tail == Some(i) {
                    self.tail = prev;
                }
                self.entries[i as usize].next = self.free;
                self.free = Some(i);
                self.len -= 1;
                return Ok(entry.def);
            }
            prev = cur;
            cur = entry.next;
        }
        Err(Error::internal(format!(
            "operand {} has no pending definition",
            node
        )))
    }

    /// Nodes still pending, front to back
    pub fn pending(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cur = self.head;
        while let Some(i) = cur {
            out.push(self.entries[i as usize].def.node);
            cur = self.entries[i as usize].next;
        }
        out
    }
}
