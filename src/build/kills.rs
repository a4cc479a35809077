//! Clobber sets per operation
//!
//! What an operation destroys beyond its own results is a property of the
//! operation kind and the target, nothing else. The walk turns the mask into
//! individual kill positions and steers live values away from it.

use crate::ir::node::{IrNode, OpKind};
use crate::regs::{RegMask, TargetModel};

/// Registers clobbered by `node`, beyond its own definitions
pub fn kill_set(target: &TargetModel, node: &IrNode) -> RegMask {
    match node.op {
        OpKind::Call { .. } | OpKind::CallMulti { .. } => target.call_kill_mask(),
        OpKind::Div => target.divide_kill(),
        _ => RegMask::NONE,
    }
}

/// True when `node` invalidates every register-held GC reference
pub fn kills_gc_refs(node: &IrNode) -> bool {
    matches!(node.op, OpKind::GcSafepoint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::RegClass;

    fn node(op: OpKind) -> IrNode {
        IrNode::new(op, Some(RegClass::Int), Vec::new())
    }

    #[test]
    fn test_calls_clobber_caller_saved_registers() {
        let target = TargetModel::synthetic();
        let mask = kill_set(&target, &node(OpKind::Call { args: 0 }));
        assert_eq!(mask, target.call_kill_mask());
        assert!(target.is_full_call_kill(mask));
        let multi = kill_set(
            &target,
            &node(OpKind::CallMulti {
                args: 0,
                results: 2,
            }),
        );
        assert_eq!(multi, mask);
    }

    #[test]
    fn test_divide_clobbers_its_scratch_pair() {
        let target = TargetModel::synthetic();
        let mask = kill_set(&target, &node(OpKind::Div));
        assert_eq!(mask, target.divide_kill());
        assert!(!target.is_full_call_kill(mask));
    }

    #[test]
    fn test_plain_operations_clobber_nothing() {
        let target = TargetModel::synthetic();
        for op in [OpKind::Add, OpKind::Mul, OpKind::Shift, OpKind::Load] {
            assert_eq!(kill_set(&target, &node(op)), RegMask::NONE);
        }
    }

    #[test]
    fn test_safepoints_invalidate_gc_refs_without_killing() {
        let target = TargetModel::synthetic();
        let safepoint = IrNode::new(OpKind::GcSafepoint, None, Vec::new());
        assert!(kills_gc_refs(&safepoint));
        assert_eq!(kill_set(&target, &safepoint), RegMask::NONE);
        assert!(!kills_gc_refs(&node(OpKind::Call { args: 0 })));
    }
}
