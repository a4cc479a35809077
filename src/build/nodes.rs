//! Per-opcode register constraints
//!
//! The position walk asks two questions about every node: which operands
//! actually occupy registers, and what the operation demands of them. Both
//! answers live here so the walk itself stays opcode-agnostic. Contained
//! operands never get positions of their own; their register sources are
//! folded into the consumer's operand list.

use crate::graph::FlowGraph;
use crate::ir::node::{NodeId, OpKind};
use crate::regs::{RegClass, RegMask, RegNum, TargetModel};

/// A scratch register the operation needs for its own duration
#[derive(Debug, Clone, Copy)]
pub struct ScratchSpec {
    pub count: u8,
    pub class: RegClass,
    pub candidates: RegMask,
    /// The scratch must not share a register with any source
    pub delay_free: bool,
}

/// What a node demands of the register file
#[derive(Debug, Clone)]
pub struct NodeConstraints {
    /// One entry per register operand, aligned with [`register_operands`]
    pub operand_candidates: Vec<Option<RegMask>>,
    /// Destination overwrites the first source in place
    pub rmw: bool,
    /// The result wants to land where the first source was
    pub source_preferred: bool,
    pub def_candidates: Option<RegMask>,
    pub scratch: Option<ScratchSpec>,
}

impl NodeConstraints {
    fn plain(operand_count: usize) -> Self {
        NodeConstraints {
            operand_candidates: vec![None; operand_count],
            rmw: false,
            source_preferred: false,
            def_candidates: None,
            scratch: None,
        }
    }
}

/// Operands of `node` that occupy registers, in evaluation order
///
/// Contained operands are transparent: their own register operands appear
/// in their place.
pub fn register_operands(graph: &FlowGraph, node: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    collect_register_operands(graph, node, &mut out);
    out
}

fn collect_register_operands(graph: &FlowGraph, node: NodeId, out: &mut Vec<NodeId>) {
    for &op in &graph.node(node).operands {
        let n = graph.node(op);
        if n.contained {
            collect_register_operands(graph, op, out);
        } else if n.result_count() > 0 {
            out.push(op);
        }
    }
}

/// Register constraints for `node`
pub fn constraints(target: &TargetModel, graph: &FlowGraph, node: NodeId) -> NodeConstraints {
    let ops = register_operands(graph, node);
    let n = graph.node(node);
    let mut c = NodeConstraints::plain(ops.len());
    match n.op {
        OpKind::Mul => {
            c.rmw = true;
            c.source_preferred = true;
        }
        OpKind::Div => {
            let kill = target.divide_kill();
            // The quotient lands in the low register of the clobber pair,
            // and the divisor must stay clear of the whole pair.
            let quotient = RegMask::single(kill.lowest().unwrap_or(RegNum(0)));
            let divisor = target.all_regs(RegClass::Int).without(kill);
            let dividend = n.operands.first().copied();
            for (i, &op) in ops.iter().enumerate() {
                c.operand_candidates[i] = if Some(op) == dividend {
                    Some(quotient)
                } else {
                    Some(divisor)
                };
            }
            c.def_candidates = Some(quotient);
        }
        OpKind::Shift => {
            let count = n.operands.get(1).copied();
            let count_in_reg = count.map(|op| !graph.node(op).contained).unwrap_or(false);
            if count_in_reg {
                let count_mask = target.shift_count_reg().mask();
                let free = target.all_regs(RegClass::Int).without(count_mask);
                for (i, &op) in ops.iter().enumerate() {
                    c.operand_candidates[i] = if Some(op) == count {
                        Some(count_mask)
                    } else {
                        Some(free)
                    };
                }
                c.def_candidates = Some(free);
            }
        }
        OpKind::PutArg { index } => {
            let class = n.value_class.unwrap_or(RegClass::Int);
            if let Some(reg) = target.arg_reg(class, index as usize) {
                let mask = RegMask::single(reg);
                if let Some(slot) = c.operand_candidates.first_mut() {
                    *slot = Some(mask);
                }
                c.def_candidates = Some(mask);
            }
        }
        OpKind::Call { .. } | OpKind::CallMulti { .. } => {
            for (i, &op) in ops.iter().enumerate() {
                if let OpKind::PutArg { index } = graph.node(op).op {
                    let class = graph.node(op).value_class.unwrap_or(RegClass::Int);
                    c.operand_candidates[i] =
                        target.arg_reg(class, index as usize).map(RegMask::single);
                }
            }
            if let (OpKind::Call { .. }, Some(class)) = (&n.op, n.value_class) {
                if let Some(regs) = target.return_regs(class, 1) {
                    c.def_candidates = Some(RegMask::single(regs[0]));
                }
            }
        }
        OpKind::Return => {
            for (i, &op) in ops.iter().enumerate() {
                let class = graph.node(op).value_class.unwrap_or(RegClass::Int);
                if let Some(regs) = target.return_regs(class, 1) {
                    c.operand_candidates[i] = Some(RegMask::single(regs[0]));
                }
            }
        }
        OpKind::CopyBlock => {
            c.scratch = Some(ScratchSpec {
                count: 1,
                class: RegClass::Int,
                candidates: target.all_regs(RegClass::Int),
                delay_free: true,
            });
        }
        OpKind::SwitchJump => {
            c.scratch = Some(ScratchSpec {
                count: 1,
                class: RegClass::Int,
                candidates: target.all_regs(RegClass::Int),
                delay_free: false,
            });
        }
        _ => {}
    }
    c
}
