#![allow(dead_code, unused_imports, unused_variables, missing_docs)]
//! # LSRA - Linear Scan Register Allocation, Build Phase
//!
//! [![Crates.io](https://img.shields.io/crates/v/lsra.svg)](https://crates.io/crates/lsra)
//! [![Documentation](https://docs.rs/lsra/badge.svg)](https://docs.rs/lsra)
//! [![License: MIT](https://img.shields.io/badge/License-MIT-yellow.svg)](https://opensource.org/licenses/MIT)
//!
//! The **front half of a linear scan register allocator** for a JIT-style
//! compiler back end: protected-region (exception handling) table
//! construction and normalization over a basic-block flow graph, followed by
//! the linear build walk that turns lowered IR into intervals and
//! reference positions ready for allocation.
//!
//! ## Features
//!
//! - **Region intake** - raw try/catch/finally/filter clauses become a
//!   validated, innermost-first region table; malformed nesting is rejected
//!   with a precise defect report
//! - **Normalization** - shared begin and last blocks between regions are
//!   split apart with inserted empty blocks, so later passes can reason about
//!   boundaries block-by-block
//! - **Oracle verifier** - an independent quadratic checker re-derives every
//!   block's region membership from scratch and reports disagreements instead
//!   of panicking
//! - **Build walk** - one pass over blocks and nodes emits parameter and
//!   zero-init definitions, block boundaries, uses, kills, scratch pairs,
//!   and defs on a two-slots-per-node location timeline
//! - **Target-neutral** - everything machine-specific lives in one
//!   [`regs::TargetModel`] value; the crate ships a synthetic 16+16 register
//!   model for tests and examples
//!
//! ## Quick Start
//!
//! Add LSRA to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! lsra = "0.5"
//! ```
//!
//! ### Building intervals for a function
//!
//! ```rust
//! use lsra::graph::FlowGraph;
//! use lsra::ir::block::BlockKind;
//! use lsra::ir::node::{IrNode, OpKind};
//! use lsra::ir::LocalVar;
//! use lsra::regs::{RegClass, RegNum, TargetModel};
//!
//! # fn main() -> lsra::Result<()> {
//! // int sum(int a, int b) { return a + b; }
//! let mut graph = FlowGraph::new("sum");
//! let a = graph.add_local(LocalVar::new(RegClass::Int).param(Some(RegNum(0))));
//! let b = graph.add_local(LocalVar::new(RegClass::Int).param(Some(RegNum(1))));
//! let block = graph.add_block(BlockKind::Return);
//! let la = graph.append_node(
//!     block,
//!     IrNode::new(OpKind::LocalLoad(a), Some(RegClass::Int), vec![]),
//! );
//! let lb = graph.append_node(
//!     block,
//!     IrNode::new(OpKind::LocalLoad(b), Some(RegClass::Int), vec![]),
//! );
//! let add = graph.append_node(
//!     block,
//!     IrNode::new(OpKind::Add, Some(RegClass::Int), vec![la, lb]),
//! );
//! graph.append_node(block, IrNode::new(OpKind::Return, None, vec![add]));
//! graph.seal_locals();
//! graph.compute_pred_edges();
//!
//! let target = TargetModel::synthetic();
//! let product = lsra::build::build(&mut graph, &target)?;
//! product.validate()?;
//!
//! // Two parameter definitions, one per argument register.
//! assert!(product.stats.defs >= 2);
//! for (_, pos) in product.timeline() {
//!     println!("{}", pos);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Protected regions
//!
//! ```rust
//! use lsra::eh::clauses::RawClause;
//! use lsra::eh::normalize::{normalize_regions, NormalizeOptions};
//! use lsra::eh::verify::Verifier;
//! use lsra::graph::FlowGraph;
//! use lsra::ir::block::BlockKind;
//!
//! # fn main() -> lsra::Result<()> {
//! let mut graph = FlowGraph::new("guarded");
//! for i in 0..8 {
//!     graph.add_block(if i == 7 {
//!         BlockKind::Return
//!     } else {
//!         BlockKind::Fallthrough
//!     });
//! }
//!
//! // An inner catch nested inside an outer one.
//! let clauses = [
//!     RawClause::catch((2, 3), (3, 4)),
//!     RawClause::catch((1, 5), (5, 7)),
//! ];
//! graph.attach_regions(&clauses)?;
//! graph.compute_pred_edges();
//!
//! normalize_regions(&mut graph, &NormalizeOptions::new());
//! let report = Verifier::new()
//!     .begins_normalized()
//!     .lasts_normalized()
//!     .verify(&graph);
//! assert!(report.valid, "{:?}", report.errors);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! The crate mirrors the phase order of the back end it serves:
//!
//! 1. [`graph`] - basic blocks, layout order, predecessor edges, and the
//!    region-aware successor queries everything downstream leans on
//! 2. [`eh`] - clause intake ([`eh::clauses`]), the region table
//!    ([`eh::table`]), boundary normalization ([`eh::normalize`]), exception
//!    successors ([`eh::succ`]), and the independent verifier
//!    ([`eh::verify`])
//! 3. [`build`] - liveness, the linear walk, intervals, reference positions,
//!    and def/use conflict resolution
//!
//! [`ir`] holds the lowered node and block representation, [`regs`] the
//! register model, [`arena`] the handle-based storage every phase allocates
//! from, and [`error`] the crate-wide error type.
//!
//! ## Invariants
//!
//! The build walk's product obeys a small contract, checkable at any time
//! with [`build::BuildProduct::validate`]:
//!
//! - the position timeline never moves backward
//! - every interval's chain is ordered by location
//! - a tree temporary is defined before it is used
//! - a single-def interval is only defined by its first position
//! - no local is read again in a block after its value died there
//!
//! ## License
//!
//! Licensed under the [MIT License](https://opensource.org/licenses/MIT).

#![allow(clippy::only_used_in_recursion)] // False positive for recursive helpers
#![allow(clippy::needless_range_loop)] // Index needed while mutating the arena

/// Version of the LSRA crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod arena;
pub mod build;
pub mod eh;
pub mod error;
pub mod graph;
pub mod ir;
pub mod regs;

// Re-export main types
pub use arena::{Arena, ArenaPool};
pub use build::{BuildOptions, BuildProduct, BuildStats, Builder, Interval, RefPosition};
pub use eh::clauses::RawClause;
pub use eh::normalize::{normalize_regions, NormalizeOptions, NormalizeStats};
pub use eh::table::{EhIndex, EhTable, HandlerKind};
pub use eh::verify::{Verifier, VerifyResult};
pub use error::{Error, Result};
pub use graph::FlowGraph;
pub use ir::block::{BasicBlock, BlockId, BlockKind};
pub use ir::node::{IrNode, NodeId, OpKind};
pub use ir::{LocalId, LocalVar, VarSet};
pub use regs::{RegClass, RegMask, RegNum, TargetModel};
