// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use crate::ir::{ExprId, Instruction, Operand, Register};

use super::Opcode;

/// Space the FP/LR pair occupies on the stack.
const PAIR_SPILL_BYTES: i64 = 16;

/// `bl <target>`
#[must_use]
pub fn create_call(target: ExprId) -> Instruction {
    Instruction::new(Opcode::Bl, vec![Operand::Expr(target)])
}

/// `ret`
#[must_use]
pub fn create_return() -> Instruction {
    Instruction::new(Opcode::Ret, Vec::new())
}

/// `b <target>`
#[must_use]
pub fn create_unconditional_branch(target: ExprId) -> Instruction {
    Instruction::new(Opcode::B, vec![Operand::Expr(target)])
}

/// `stp first, second, [sp, #-16]!`. The written-back base comes first,
/// per the operand layout of writeback forms.
#[must_use]
pub fn create_push_pair(first: Register, second: Register) -> Instruction {
    Instruction::new(Opcode::StpXpre, vec![
        Operand::Register(Register::SP),
        Operand::Register(first),
        Operand::Register(second),
        Operand::Register(Register::SP),
        Operand::Immediate(-PAIR_SPILL_BYTES),
    ])
}

/// `ldp first, second, [sp], #16`
#[must_use]
pub fn create_pop_pair(first: Register, second: Register) -> Instruction {
    Instruction::new(Opcode::LdpXpost, vec![
        Operand::Register(Register::SP),
        Operand::Register(first),
        Operand::Register(second),
        Operand::Register(Register::SP),
        Operand::Immediate(PAIR_SPILL_BYTES),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_pop_pair_mirror_each_other() {
        let push = create_push_pair(Register::FP, Register::LR);
        let pop = create_pop_pair(Register::FP, Register::LR);

        assert!(push.opcode().is_push());
        assert!(push.opcode().may_store());
        assert!(pop.opcode().is_pop());
        assert!(pop.opcode().may_load());

        assert_eq!(push.operands().last().unwrap().as_immediate(), Some(-16));
        assert_eq!(pop.operands().last().unwrap().as_immediate(), Some(16));
    }

    #[test]
    fn call_and_branch_reference_the_given_expression() {
        let mut program = crate::Program::new();
        let target = program.create_symbol_expr("PLO_outlined_1");

        let call = create_call(target);
        assert!(call.opcode().is_call());
        assert_eq!(call.operands()[0].as_expr(), Some(target));

        let branch = create_unconditional_branch(target);
        assert!(branch.opcode().is_unconditional_branch());
        assert_eq!(branch.operands()[0].as_expr(), Some(target));
    }
}
