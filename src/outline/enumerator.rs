// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use log::debug;

use crate::{
    ir::{Function, Instruction, InstructionSequence},
    OutlinerConfig, Register,
};

use super::walk::{next_block_on_hottest_edge, MAX_CROSS_BLOCKS};

/// A block with a known execution count above this is hot and left alone
/// under PGO.
pub(crate) const HOT_EXECUTION_THRESHOLD: u64 = 1;

/// Why a window cannot be outlined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RejectReason {
    /// Opcode zero, pseudo instruction or CFI directive.
    PseudoOrCfi,

    /// Return anywhere, unconditional branch anywhere, or a call or
    /// conditional branch before the last position. Also a trailing call
    /// with an earlier store through SP (outgoing-argument marshalling).
    ControlFlow,

    /// ADR, ADRP or a literal-pool load: only correct at its original
    /// address.
    PcRelative,

    /// Any appearance of the frame pointer or the link register.
    FpOrLrUse,

    /// The stack pointer in a def position.
    SpWrite,

    /// A store through SP, or a non-load SP read in a short sequence.
    NonLoadSp,

    /// An SP read without an immediate offset in a short sequence.
    ComplexSp,
}

#[derive(Debug, Default, Clone, Copy)]
struct RejectionCounters {
    pseudo_or_cfi: usize,
    control_flow: usize,
    pc_relative: usize,
    fp_or_lr: usize,
    sp_write: usize,
    non_load_sp: usize,
    complex_sp: usize,
    cross_block: usize,
}

impl RejectionCounters {
    fn count(&mut self, reason: RejectReason) {
        match reason {
            RejectReason::PseudoOrCfi => self.pseudo_or_cfi += 1,
            RejectReason::ControlFlow => self.control_flow += 1,
            RejectReason::PcRelative => self.pc_relative += 1,
            RejectReason::FpOrLrUse => self.fp_or_lr += 1,
            RejectReason::SpWrite => self.sp_write += 1,
            RejectReason::NonLoadSp => self.non_load_sp += 1,
            RejectReason::ComplexSp => self.complex_sp += 1,
        }
    }

    fn total(&self) -> usize {
        self.pseudo_or_cfi
            + self.control_flow
            + self.pc_relative
            + self.fp_or_lr
            + self.sp_write
            + self.non_load_sp
            + self.complex_sp
    }
}

/// Decides whether an instruction may occupy a position in a length-`len`
/// window. `window_prefix` holds the instructions already accepted before
/// it, for the trailing-call stack-write check.
#[must_use]
pub(crate) fn reject_reason(
    instruction: &Instruction,
    len: usize,
    is_last: bool,
    window_prefix: &[Instruction],
) -> Option<RejectReason> {
    let opcode = instruction.opcode();

    if opcode == crate::Opcode::Invalid || opcode.is_pseudo() || opcode.is_cfi() {
        return Some(RejectReason::PseudoOrCfi);
    }

    if opcode.is_return() {
        return Some(RejectReason::ControlFlow);
    }

    if opcode.is_call() {
        if !is_last {
            return Some(RejectReason::ControlFlow);
        }

        // A store through SP ahead of the call may be filling the outgoing
        // argument area, which the outlined frame would displace.
        for earlier in window_prefix {
            if earlier.opcode().may_store() && earlier.uses_register(Register::SP) {
                return Some(RejectReason::ControlFlow);
            }
        }

        return None;
    }

    if opcode.is_branch() {
        if is_last && !opcode.is_unconditional_branch() {
            return None;
        }

        return Some(RejectReason::ControlFlow);
    }

    if opcode.is_pc_relative() {
        return Some(RejectReason::PcRelative);
    }

    let mut uses_sp = false;
    let mut writes_sp = false;
    let defs = opcode.num_defs() as usize;

    for (index, operand) in instruction.operands().iter().enumerate() {
        let Some(register) = operand.as_register() else {
            continue;
        };

        if register.is_sub_register_eq(&Register::FP) || register.is_sub_register_eq(&Register::LR)
        {
            return Some(RejectReason::FpOrLrUse);
        }

        if register.is_sub_register_eq(&Register::SP) {
            uses_sp = true;
            if index < defs {
                writes_sp = true;
            }
        }
    }

    if writes_sp {
        return Some(RejectReason::SpWrite);
    }

    if uses_sp {
        if opcode.may_store() {
            return Some(RejectReason::NonLoadSp);
        }

        // Short sequences only tolerate a plain immediate-offset load.
        if len < 5 {
            if !opcode.may_load() {
                return Some(RejectReason::NonLoadSp);
            }

            let has_immediate_offset = instruction
                .operands()
                .iter()
                .any(|operand| operand.as_immediate().is_some());
            if !has_immediate_offset {
                return Some(RejectReason::ComplexSp);
            }
        }
    }

    None
}

fn is_hot_block(count: Option<u64>, config: &OutlinerConfig) -> bool {
    config.enable_pgo && count.is_some_and(|count| count > HOT_EXECUTION_THRESHOLD)
}

/// Every legal length-`len` window of `function`, single-block windows
/// first, then windows extended across the hottest edge out of blocks too
/// small to hold one.
#[must_use]
pub(crate) fn collect_sequences(
    function: &Function,
    len: usize,
    config: &OutlinerConfig,
) -> Vec<InstructionSequence> {
    let mut sequences = Vec::new();

    if len < config.min_length || len > config.largest_length {
        return sequences;
    }

    if function.has_eh_ranges() {
        debug!(
            "function `{}` has exception-unwind ranges, not outlining from it",
            function.name()
        );
        return sequences;
    }

    let mut counters = RejectionCounters::default();

    for (block_index, block) in function.blocks().iter().enumerate() {
        if block.is_empty() {
            continue;
        }

        if is_hot_block(block.execution_count(), config) {
            continue;
        }

        let instructions = block.instructions();

        if len <= instructions.len() {
            for start in 0..=(instructions.len() - len) {
                let window = &instructions[start..start + len];
                let mut rejected = false;

                for (position, instruction) in window.iter().enumerate() {
                    let is_last = position == len - 1;
                    if let Some(reason) =
                        reject_reason(instruction, len, is_last, &window[..position])
                    {
                        counters.count(reason);
                        rejected = true;
                        break;
                    }
                }

                if !rejected {
                    sequences.push(InstructionSequence::new(window.to_vec()));
                }
            }
        }

        // Blocks strictly smaller than the window may still start one that
        // continues into their successors.
        if instructions.len() < len {
            for start in 0..instructions.len() {
                match extract_cross_block(function, block_index, start, len, config) {
                    Some(sequence) => sequences.push(sequence),
                    None => counters.cross_block += 1,
                }
            }
        }
    }

    if config.debug && counters.total() + counters.cross_block > 0 {
        debug!(
            "function `{}`, length {}: {} sequences, rejections: pseudo/CFI={} control-flow={} \
             PC-rel={} FP/LR={} SP-write={} non-load-SP={} complex-SP={} cross-block={}",
            function.name(),
            len,
            sequences.len(),
            counters.pseudo_or_cfi,
            counters.control_flow,
            counters.pc_relative,
            counters.fp_or_lr,
            counters.sp_write,
            counters.non_load_sp,
            counters.complex_sp,
            counters.cross_block,
        );
    }

    sequences
}

/// Collects a window that starts at `(start_block, start)` and continues
/// along the hottest edge, at most two blocks deep. Returns `None` when a
/// position fails the filter, the walk stalls, or a hot block intervenes.
fn extract_cross_block(
    function: &Function,
    start_block: usize,
    start: usize,
    len: usize,
    config: &OutlinerConfig,
) -> Option<InstructionSequence> {
    // A hot entry block disqualifies the whole attempt.
    if is_hot_block(function.block(start_block).execution_count(), config) {
        return None;
    }

    let mut collected: Vec<Instruction> = Vec::with_capacity(len);
    let mut current = start_block;
    let mut index = start;
    let mut blocks_used = 1;

    while collected.len() < len && blocks_used <= MAX_CROSS_BLOCKS {
        let block = function.blocks().get(current)?;
        if block.is_empty() || index >= block.len() {
            break;
        }

        if is_hot_block(block.execution_count(), config) {
            break;
        }

        while collected.len() < len && index < block.len() {
            let instruction = &block.instructions()[index];
            let is_last = collected.len() == len - 1;

            if reject_reason(instruction, len, is_last, &collected).is_some() {
                return None;
            }

            collected.push(instruction.clone());
            index += 1;

            let ends_window = instruction.opcode().is_call() || instruction.is_conditional_branch();
            if is_last && ends_window {
                break;
            }
        }

        if collected.len() < len && index >= block.len() {
            current = next_block_on_hottest_edge(function, current)?;
            index = 0;
            blocks_used += 1;
        } else {
            break;
        }
    }

    (collected.len() == len).then(|| InstructionSequence::new(collected))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use crate::{
        isa::{create_push_pair, create_return},
        Instruction, Opcode, Operand, Program, Register,
    };

    use super::*;

    fn add(dst: u8, src: u8, imm: i64) -> Instruction {
        Instruction::new(Opcode::AddXri, vec![
            Operand::Register(Register::general(dst)),
            Operand::Register(Register::general(src)),
            Operand::Immediate(imm),
        ])
    }

    fn sp_load(dst: u8, offset: i64) -> Instruction {
        Instruction::new(Opcode::LdrXui, vec![
            Operand::Register(Register::general(dst)),
            Operand::Register(Register::SP),
            Operand::Immediate(offset),
        ])
    }

    fn sp_store(src: u8, offset: i64) -> Instruction {
        Instruction::new(Opcode::StrXui, vec![
            Operand::Register(Register::general(src)),
            Operand::Register(Register::SP),
            Operand::Immediate(offset),
        ])
    }

    #[rstest]
    #[case(create_return(), Some(RejectReason::ControlFlow))]
    #[case(Instruction::new(Opcode::Cfi, Vec::new()), Some(RejectReason::PseudoOrCfi))]
    #[case(Instruction::new(Opcode::Kill, Vec::new()), Some(RejectReason::PseudoOrCfi))]
    #[case(
        Instruction::new(Opcode::Adrp, vec![
            Operand::Register(Register::X0),
            Operand::Immediate(0),
        ]),
        Some(RejectReason::PcRelative)
    )]
    #[case(
        Instruction::new(Opcode::AddXri, vec![
            Operand::Register(Register::X0),
            Operand::Register(Register::FP),
            Operand::Immediate(0),
        ]),
        Some(RejectReason::FpOrLrUse)
    )]
    #[case(
        Instruction::new(Opcode::SubXri, vec![
            Operand::Register(Register::SP),
            Operand::Register(Register::SP),
            Operand::Immediate(32),
        ]),
        Some(RejectReason::SpWrite)
    )]
    #[case(sp_store(0, 1), Some(RejectReason::NonLoadSp))]
    #[case(sp_load(0, 1), None)]
    #[case(add(0, 1, 2), None)]
    fn middle_position_filter(
        #[case] instruction: Instruction,
        #[case] expected: Option<RejectReason>,
    ) {
        assert_eq!(reject_reason(&instruction, 4, false, &[]), expected);
    }

    #[test]
    fn push_pair_writes_the_stack_pointer_and_uses_fp_lr() {
        let push = create_push_pair(Register::FP, Register::LR);
        assert_eq!(
            reject_reason(&push, 4, false, &[]),
            Some(RejectReason::FpOrLrUse)
        );
    }

    #[test]
    fn calls_are_last_position_only() {
        let mut program = Program::new();
        let callee = program.create_symbol_expr("callee");
        let call = crate::isa::create_call(callee);

        assert_eq!(reject_reason(&call, 4, false, &[]), Some(RejectReason::ControlFlow));
        assert_eq!(reject_reason(&call, 4, true, &[]), None);
    }

    #[test]
    fn a_trailing_call_after_a_stack_store_is_rejected() {
        let mut program = Program::new();
        let callee = program.create_symbol_expr("callee");
        let call = crate::isa::create_call(callee);

        let marshalling = [add(0, 0, 1), sp_store(1, 0)];
        assert_eq!(
            reject_reason(&call, 4, true, &marshalling),
            Some(RejectReason::ControlFlow)
        );

        let harmless = [add(0, 0, 1), add(1, 1, 1)];
        assert_eq!(reject_reason(&call, 4, true, &harmless), None);
    }

    #[test]
    fn conditional_branches_are_last_position_only() {
        let mut program = Program::new();
        let target = program.create_symbol_expr("target");
        let branch = Instruction::new(Opcode::BCond, vec![
            Operand::Immediate(0),
            Operand::Expr(target),
        ]);

        assert_eq!(reject_reason(&branch, 4, false, &[]), Some(RejectReason::ControlFlow));
        assert_eq!(reject_reason(&branch, 4, true, &[]), None);

        let unconditional = crate::isa::create_unconditional_branch(target);
        assert_eq!(
            reject_reason(&unconditional, 4, true, &[]),
            Some(RejectReason::ControlFlow)
        );
    }

    #[test]
    fn long_sequences_tolerate_plain_sp_reads() {
        // add x0, sp, #8 is an SP read that is not a load.
        let address_of = Instruction::new(Opcode::AddXri, vec![
            Operand::Register(Register::X0),
            Operand::Register(Register::SP),
            Operand::Immediate(8),
        ]);

        assert_eq!(reject_reason(&address_of, 4, false, &[]), Some(RejectReason::NonLoadSp));
        assert_eq!(reject_reason(&address_of, 5, false, &[]), None);
    }

    #[test]
    fn windows_are_enumerated_per_block() {
        let mut function = crate::Function::new("f");
        let entry = function.add_basic_block("entry");
        for i in 0..6 {
            function.block_mut(entry).add_instruction(add(0, 0, i));
        }

        let config = OutlinerConfig::default();
        let sequences = collect_sequences(&function, 4, &config);

        assert_eq!(sequences.len(), 3);
        assert!(sequences.iter().all(|seq| seq.len() == 4));
    }

    #[test]
    fn eh_range_functions_produce_nothing() {
        let mut function = crate::Function::new("f");
        let entry = function.add_basic_block("entry");
        for i in 0..6 {
            function.block_mut(entry).add_instruction(add(0, 0, i));
        }
        function.set_eh_ranges(true);

        let config = OutlinerConfig::default();
        assert!(collect_sequences(&function, 4, &config).is_empty());
    }

    #[test]
    fn hot_blocks_are_excluded_under_pgo() {
        let mut function = crate::Function::new("f");
        let entry = function.add_basic_block("entry");
        for i in 0..6 {
            function.block_mut(entry).add_instruction(add(0, 0, i));
        }
        function.block_mut(entry).set_execution_count(100);

        let cold = OutlinerConfig::default();
        assert_eq!(collect_sequences(&function, 4, &cold).len(), 3);

        let mut pgo = OutlinerConfig::default();
        pgo.enable_pgo = true;
        assert!(collect_sequences(&function, 4, &pgo).is_empty());
    }

    #[test]
    fn small_blocks_extend_across_the_fall_through_edge() {
        let mut function = crate::Function::new("f");
        let a = function.add_basic_block("a");
        let b = function.add_basic_block("b");
        function.block_mut(a).add_instruction(add(0, 0, 1));
        function.block_mut(a).add_instruction(add(1, 1, 1));
        function.block_mut(a).add_successor(b);
        function.block_mut(b).add_instruction(add(2, 2, 1));
        function.block_mut(b).add_instruction(add(3, 3, 1));
        function.block_mut(b).add_instruction(create_return());

        let config = OutlinerConfig::default();
        let sequences = collect_sequences(&function, 4, &config);

        // Only the window spanning a[0..2] + b[0..2]; starting at a[1]
        // would need the return at b[2].
        assert_eq!(sequences.len(), 1);
        assert_eq!(sequences[0].instructions()[0], add(0, 0, 1));
        assert_eq!(sequences[0].instructions()[3], add(3, 3, 1));
    }
}
