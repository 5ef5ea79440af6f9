// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use log::warn;

use crate::{
    ir::{Function, Instruction, InstructionSequence, Register},
    isa::{create_pop_pair, create_push_pair},
    OutlineResult,
};

use super::{
    locator::SequenceLocation,
    walk::{next_block_on_hottest_edge, MAX_CROSS_BLOCKS},
};

/// A real leaf never spilled its link register, so a call out of it must
/// save the pair around the call site. Synthesized procedures are not
/// "real": their prologue handling already accounts for the link register.
#[must_use]
pub(crate) fn is_real_leaf(function: &Function) -> bool {
    function.is_leaf() && !function.is_injected()
}

/// Whether the link register is provably spilled before the occurrence at
/// `(block, start)`.
///
/// The entry block is scanned for a push or store that names LR, up to the
/// occurrence when it sits in the entry block itself. Hitting a terminator
/// or a call first means no proof. An occurrence past a return, in its
/// own block or in any earlier block, is unsafe outright: the register
/// state after a return is anyone's guess.
#[must_use]
pub(crate) fn is_lr_saved_before(function: &Function, block: usize, start: usize) -> bool {
    for (block_index, candidate) in function.blocks().iter().enumerate() {
        let return_index = candidate
            .instructions()
            .iter()
            .position(|instruction| instruction.opcode().is_return());

        if block_index == block {
            if return_index.is_some_and(|index| start > index) {
                return false;
            }
            break;
        }

        if return_index.is_some() {
            return false;
        }
    }

    let Some(entry) = function.blocks().first() else {
        return false;
    };

    let limit = if block == 0 {
        start.min(entry.len())
    } else {
        entry.len()
    };

    for instruction in &entry.instructions()[..limit] {
        let opcode = instruction.opcode();

        if (opcode.is_push() || opcode.may_store()) && instruction.uses_register(Register::LR) {
            return true;
        }

        if opcode.is_terminator() || opcode.is_call() {
            return false;
        }
    }

    false
}

/// Whether a call at this occurrence needs the save/call/restore sandwich.
#[must_use]
pub(crate) fn needs_sandwich(function: &Function, location: &SequenceLocation) -> bool {
    is_real_leaf(function) || !is_lr_saved_before(function, location.block, location.start)
}

/// Splices a call to the outlined procedure over the occurrence and
/// deletes the rest of the matched range, spanning successor blocks when
/// the match does.
///
/// Returns `Ok(false)` when a boundary check fails; the occurrence is
/// skipped and the program is left untouched.
pub(crate) fn replace_with_call(
    function: &mut Function,
    location: &SequenceLocation,
    sequence: &InstructionSequence,
    call: Instruction,
    sandwich: bool,
) -> OutlineResult<bool> {
    if sequence.is_empty() {
        return Ok(false);
    }

    let Some(ranges) = matched_ranges(function, location, sequence) else {
        warn!(
            "occurrence at block {} index {} of `{}` no longer matches, skipping it",
            location.block,
            location.start,
            function.name()
        );
        return Ok(false);
    };

    let (first_block, first_start, first_take) = ranges[0];

    if sandwich {
        let push = create_push_pair(Register::FP, Register::LR);
        let pop = create_pop_pair(Register::FP, Register::LR);

        let block = function.block_mut(first_block);
        block.replace_at(first_start, push)?;
        block.insert_at(first_start + 1, call)?;
        block.insert_at(first_start + 2, pop)?;

        for _ in 1..first_take {
            block.erase_at(first_start + 3)?;
        }
    } else {
        let block = function.block_mut(first_block);
        block.replace_at(first_start, call)?;

        for _ in 1..first_take {
            block.erase_at(first_start + 1)?;
        }
    }

    for &(block_index, block_start, take) in &ranges[1..] {
        let block = function.block_mut(block_index);
        for _ in 0..take {
            block.erase_at(block_start)?;
        }
    }

    Ok(true)
}

/// Re-walks the occurrence against the current program state and returns
/// each block's (index, start, contribution). `None` when the range is
/// stale: out of bounds, the walk stalls, or the instructions no longer
/// equal the sequence.
fn matched_ranges(
    function: &Function,
    location: &SequenceLocation,
    sequence: &InstructionSequence,
) -> Option<Vec<(usize, usize, usize)>> {
    let mut ranges = Vec::new();
    let mut current = location.block;
    let mut start = location.start;
    let mut matched = 0;
    let mut blocks_used = 1;

    while matched < sequence.len() {
        let block = function.blocks().get(current)?;
        if start >= block.len() {
            return None;
        }

        let available = block.len() - start;
        let take = available.min(sequence.len() - matched);

        for offset in 0..take {
            if block.instructions()[start + offset] != sequence.instructions()[matched + offset] {
                return None;
            }
        }

        ranges.push((current, start, take));
        matched += take;

        if matched < sequence.len() {
            if blocks_used >= MAX_CROSS_BLOCKS {
                return None;
            }

            current = next_block_on_hottest_edge(function, current)?;
            start = 0;
            blocks_used += 1;
        }
    }

    Some(ranges)
}

#[cfg(test)]
mod tests {
    use crate::{create_call, Instruction, Opcode, Operand, Program};

    use super::*;

    fn add(dst: u8, imm: i64) -> Instruction {
        Instruction::new(Opcode::AddXri, vec![
            Operand::Register(Register::general(dst)),
            Operand::Register(Register::general(dst)),
            Operand::Immediate(imm),
        ])
    }

    fn lr_spill_entry(program: &mut Program, function: &mut Function) -> usize {
        let callee = program.create_symbol_expr("some_callee");
        let entry = function.add_basic_block("entry");
        function
            .block_mut(entry)
            .add_instruction(create_push_pair(Register::FP, Register::LR));
        function.block_mut(entry).add_instruction(create_call(callee));
        entry
    }

    #[test]
    fn a_push_of_the_pair_proves_the_link_register_saved() {
        let mut program = Program::new();
        let mut function = Function::new("f");
        let entry = lr_spill_entry(&mut program, &mut function);
        let body = function.add_basic_block("body");
        function.block_mut(entry).add_successor(body);
        function.block_mut(body).add_instruction(add(0, 1));

        assert!(is_lr_saved_before(&function, body, 0));
        assert!(!is_real_leaf(&function));
    }

    #[test]
    fn a_call_before_any_spill_means_no_proof() {
        let mut program = Program::new();
        let callee = program.create_symbol_expr("some_callee");

        let mut function = Function::new("f");
        let entry = function.add_basic_block("entry");
        function.block_mut(entry).add_instruction(create_call(callee));
        function
            .block_mut(entry)
            .add_instruction(create_push_pair(Register::FP, Register::LR));
        let body = function.add_basic_block("body");
        function.block_mut(entry).add_successor(body);
        function.block_mut(body).add_instruction(add(0, 1));

        assert!(!is_lr_saved_before(&function, body, 0));
    }

    #[test]
    fn entry_block_occurrences_only_trust_earlier_spills() {
        let mut program = Program::new();
        let mut function = Function::new("f");
        let entry = lr_spill_entry(&mut program, &mut function);
        function.block_mut(entry).add_instruction(add(0, 1));

        // The spill at index 0 precedes index 2.
        assert!(is_lr_saved_before(&function, entry, 2));

        // Nothing precedes index 0.
        assert!(!is_lr_saved_before(&function, entry, 0));
    }

    #[test]
    fn occurrences_past_a_return_are_unsafe() {
        let mut program = Program::new();
        let mut function = Function::new("f");
        let entry = lr_spill_entry(&mut program, &mut function);
        function
            .block_mut(entry)
            .add_instruction(crate::create_return());

        let late = function.add_basic_block("late");
        function.block_mut(late).add_instruction(add(0, 1));

        assert!(!is_lr_saved_before(&function, late, 0));
    }

    #[test]
    fn leaf_functions_force_the_sandwich() {
        let mut function = Function::new("f");
        let entry = function.add_basic_block("entry");
        function.block_mut(entry).add_instruction(add(0, 1));

        assert!(is_real_leaf(&function));
        let location = SequenceLocation {
            block: entry,
            start: 0,
            spans: Vec::new(),
        };
        assert!(needs_sandwich(&function, &location));
    }

    #[test]
    fn a_normal_rewrite_leaves_one_call_behind() {
        let mut program = Program::new();
        let mut function = Function::new("f");
        let entry = lr_spill_entry(&mut program, &mut function);
        let body = function.add_basic_block("body");
        function.block_mut(entry).add_successor(body);
        for i in 0..5 {
            function.block_mut(body).add_instruction(add(i, i as i64));
        }

        let sequence = InstructionSequence::new(vec![add(1, 1), add(2, 2), add(3, 3)]);
        let location = SequenceLocation {
            block: body,
            start: 1,
            spans: Vec::new(),
        };

        let target = program.create_symbol_expr("PLO_outlined_1");
        let replaced =
            replace_with_call(&mut function, &location, &sequence, create_call(target), false)
                .unwrap();

        assert!(replaced);
        let instructions = function.block(body).instructions();
        assert_eq!(instructions.len(), 3);
        assert_eq!(instructions[0], add(0, 0));
        assert!(instructions[1].opcode().is_call());
        assert_eq!(instructions[2], add(4, 4));
    }

    #[test]
    fn a_sandwich_rewrite_wraps_the_call_in_a_spill_pair() {
        let mut program = Program::new();
        let mut function = Function::new("leaf");
        let entry = function.add_basic_block("entry");
        for i in 0..4 {
            function.block_mut(entry).add_instruction(add(i, i as i64));
        }

        let sequence = InstructionSequence::new(vec![add(1, 1), add(2, 2), add(3, 3)]);
        let location = SequenceLocation {
            block: entry,
            start: 1,
            spans: Vec::new(),
        };

        let target = program.create_symbol_expr("PLO_outlined_1");
        let replaced =
            replace_with_call(&mut function, &location, &sequence, create_call(target), true)
                .unwrap();

        assert!(replaced);
        let instructions = function.block(entry).instructions();
        assert_eq!(instructions.len(), 4);
        assert_eq!(instructions[0], add(0, 0));
        assert!(instructions[1].opcode().is_push());
        assert!(instructions[2].opcode().is_call());
        assert!(instructions[3].opcode().is_pop());
    }

    #[test]
    fn cross_block_rewrites_erase_only_each_blocks_contribution() {
        let mut program = Program::new();
        let mut function = Function::new("f");
        let a = function.add_basic_block("a");
        let b = function.add_basic_block("b");
        function.block_mut(a).add_instruction(add(0, 0));
        function.block_mut(a).add_instruction(add(1, 1));
        function.block_mut(a).add_successor(b);
        function.block_mut(b).add_instruction(add(2, 2));
        function.block_mut(b).add_instruction(add(9, 9));

        let sequence = InstructionSequence::new(vec![add(1, 1), add(2, 2)]);
        let location = SequenceLocation {
            block: a,
            start: 1,
            spans: vec![(a, 1), (b, 0)],
        };

        let target = program.create_symbol_expr("PLO_outlined_1");
        let replaced =
            replace_with_call(&mut function, &location, &sequence, create_call(target), false)
                .unwrap();

        assert!(replaced);
        assert_eq!(function.block(a).len(), 2);
        assert!(function.block(a).instructions()[1].opcode().is_call());
        assert_eq!(function.block(b).instructions(), &[add(9, 9)]);
    }

    #[test]
    fn stale_occurrences_are_skipped_not_rewritten() {
        let mut program = Program::new();
        let mut function = Function::new("f");
        let entry = function.add_basic_block("entry");
        function.block_mut(entry).add_instruction(add(0, 0));

        let sequence = InstructionSequence::new(vec![add(1, 1), add(2, 2)]);
        let location = SequenceLocation {
            block: entry,
            start: 0,
            spans: Vec::new(),
        };

        let target = program.create_symbol_expr("PLO_outlined_1");
        let replaced =
            replace_with_call(&mut function, &location, &sequence, create_call(target), false)
                .unwrap();

        assert!(!replaced);
        assert_eq!(function.block(entry).instructions(), &[add(0, 0)]);
    }
}
