// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use crate::ir::{InstructionSequence, Register};

/// Every AArch64 instruction occupies four bytes.
pub(crate) const INSTRUCTION_SIZE: i64 = 4;

const CALL_SIZE: i64 = 4;
const SANDWICH_CALL_SIZE: i64 = 12;
const PROLOGUE_SIZE: i64 = 4;
const EPILOGUE_SIZE: i64 = 4;
const RETURN_SIZE: i64 = 4;

/// A pure sequence needs no frame in its outlined form: no load through
/// SP, no call, no conditional branch, no read of the frame pointer.
#[must_use]
pub(crate) fn is_pure_sequence(sequence: &InstructionSequence) -> bool {
    for instruction in sequence.iter() {
        if instruction.is_conditional_branch() {
            return false;
        }

        if instruction.opcode().is_call() {
            return false;
        }

        let memory = instruction.opcode().may_load() || instruction.opcode().may_store();
        if memory && instruction.uses_register(Register::SP) {
            return false;
        }

        if instruction.reads_register(Register::FP) {
            return false;
        }
    }

    true
}

/// The verdict of the size model on one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CostDecision {
    pub saved: i64,
    pub outlined_size: i64,
    pub call_cost: i64,
    pub net: i64,
    pub threshold: i64,
    pub pure: bool,
}

impl CostDecision {
    #[must_use]
    pub fn is_worthwhile(&self) -> bool {
        self.net > self.threshold
    }
}

/// Estimates the net byte effect of outlining a group, and the threshold
/// it has to beat. `weighted_frequency` is the sum of the occurrences'
/// block execution counts under PGO, otherwise the occurrence count.
#[must_use]
pub(crate) fn evaluate_group(
    len: usize,
    occurrences: usize,
    sandwich_count: usize,
    normal_count: usize,
    weighted_frequency: u64,
    pure: bool,
) -> CostDecision {
    let len = len as i64;

    let outlined_size = if pure {
        len * INSTRUCTION_SIZE + RETURN_SIZE
    } else {
        PROLOGUE_SIZE + len * INSTRUCTION_SIZE + EPILOGUE_SIZE + RETURN_SIZE
    };

    let call_cost =
        sandwich_count as i64 * SANDWICH_CALL_SIZE + normal_count as i64 * CALL_SIZE;

    let saved = len * INSTRUCTION_SIZE * weighted_frequency as i64;
    let net = saved - outlined_size - call_cost;

    let average_frequency = weighted_frequency / (occurrences.max(1) as u64);
    let threshold = if pure {
        if average_frequency >= 3 || occurrences >= 3 {
            -4
        } else if average_frequency >= 2 || occurrences >= 2 {
            0
        } else {
            4
        }
    } else {
        0
    };

    CostDecision {
        saved,
        outlined_size,
        call_cost,
        net,
        threshold,
        pure,
    }
}
