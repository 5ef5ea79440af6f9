// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::collections::HashMap;

use crate::ir::{Instruction, InstructionSequence, Operand, Register};

const FNV_OFFSET_BASIS: u64 = 14695981039346656037;
const FNV_PRIME: u64 = 1099511628211;

/// Placeholder contribution of an expression operand: expressions only
/// compare by identity, so their content never reaches the fingerprint.
const EXPR_SENTINEL: u64 = 0xDEADBEEF;

/// First label handed out when renaming general-purpose registers, far
/// away from any physical register number.
const FIRST_RENAMED_REGISTER: u64 = 1000;

/// Folds a 64-bit FNV-1a over the sequence: opcode, then each operand.
/// General-purpose registers are renamed through a per-sequence dense map
/// so that two sequences differing only in register choice collide; SP, FP
/// and LR keep their identity.
#[must_use]
pub(crate) fn sequence_fingerprint(sequence: &InstructionSequence) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    let mut renames: HashMap<u8, u64> = HashMap::new();
    let mut next_label = FIRST_RENAMED_REGISTER;

    let mut fold = |hash: &mut u64, value: u64| {
        *hash ^= value;
        *hash = hash.wrapping_mul(FNV_PRIME);
    };

    for instruction in sequence.iter() {
        fold(&mut hash, instruction.opcode() as u64);

        for operand in instruction.operands() {
            match operand {
                Operand::Register(register) => {
                    let label = normalize_register(*register, &mut renames, &mut next_label);
                    fold(&mut hash, label);
                }

                Operand::Immediate(value) => fold(&mut hash, *value as u64),

                Operand::Expr(_) => fold(&mut hash, EXPR_SENTINEL),

                Operand::FpImmediate(value) => fold(&mut hash, u64::from(value.to_bits())),
            }
        }
    }

    hash
}

fn normalize_register(
    register: Register,
    renames: &mut HashMap<u8, u64>,
    next_label: &mut u64,
) -> u64 {
    if register.is_special() {
        return u64::from(register.number());
    }

    *renames.entry(register.number()).or_insert_with(|| {
        let label = *next_label;
        *next_label += 1;
        label
    })
}

/// The re-check behind a fingerprint match: same opcodes, same arities,
/// and operand-by-operand compatibility. Guards against collisions and
/// carries the register-renaming tolerance of the fingerprint.
#[must_use]
pub(crate) fn structurally_compatible(a: &InstructionSequence, b: &InstructionSequence) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|(lhs, rhs)| instructions_compatible(lhs, rhs))
}

fn instructions_compatible(a: &Instruction, b: &Instruction) -> bool {
    if a.opcode() != b.opcode() {
        return false;
    }

    if a.operands().len() != b.operands().len() {
        return false;
    }

    a.operands()
        .iter()
        .zip(b.operands())
        .all(|(lhs, rhs)| match (lhs, rhs) {
            (Operand::Register(reg_a), Operand::Register(reg_b)) => {
                if reg_a.is_special() || reg_b.is_special() {
                    reg_a == reg_b
                } else {
                    // Renaming carries the binding between the sides.
                    true
                }
            }

            (Operand::Immediate(imm_a), Operand::Immediate(imm_b)) => {
                immediates_compatible(a, b, *imm_a, *imm_b)
            }

            (Operand::Expr(expr_a), Operand::Expr(expr_b)) => expr_a == expr_b,

            (Operand::FpImmediate(fp_a), Operand::FpImmediate(fp_b)) => {
                fp_a.to_bits() == fp_b.to_bits()
            }

            _ => false,
        })
}

fn immediates_compatible(a: &Instruction, b: &Instruction, imm_a: i64, imm_b: i64) -> bool {
    if imm_a == imm_b {
        return true;
    }

    // Stack-addressing offsets must match exactly.
    let both_memory = (a.opcode().may_load() || a.opcode().may_store())
        && (b.opcode().may_load() || b.opcode().may_store());
    if both_memory && (references_stack(a) || references_stack(b)) {
        return false;
    }

    // A shift amount off by one is usually a different strength-reduction
    // choice of the same computation.
    if a.opcode().is_shift() && b.opcode().is_shift() && (imm_a - imm_b).abs() <= 1 {
        return true;
    }

    if imm_a.abs() <= 15 && imm_b.abs() <= 15 && (imm_a - imm_b).abs() <= 1 {
        return true;
    }

    false
}

fn references_stack(instruction: &Instruction) -> bool {
    instruction.uses_register(Register::SP) || instruction.uses_register(Register::FP)
}

/// Whether the two sequences share an instruction position. Equality is
/// the proxy: any pair of equal instructions disqualifies the pairing.
#[must_use]
pub(crate) fn sequences_overlap(a: &InstructionSequence, b: &InstructionSequence) -> bool {
    a.iter()
        .any(|lhs| b.iter().any(|rhs| lhs == rhs))
}
