// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::collections::HashSet;

use log::debug;

use crate::{
    ir::{Function, Instruction, Program, Register},
    isa::create_call,
    OutlineResult,
};

use super::pass::OUTLINED_NAME_PREFIX;

/// Collapses synthesized procedures that are nothing but a forwarder:
/// every call site of a shell whose direct calls all target one symbol is
/// retargeted to that symbol, and the shell is marked ignored.
///
/// Candidates are the program's synthesized procedures, recognised by
/// their injected flag or their `PLO_outlined_` name, so a shell an
/// earlier invocation left behind is collapsed just like one from this
/// run. Runs to a fixpoint so that a shell exposed by an earlier collapse
/// is collapsed too. Shells whose target chain loops back onto themselves
/// are left in place.
pub(crate) fn collapse_redundant_shells(program: &mut Program) -> OutlineResult<usize> {
    let mut collapsed = 0;

    loop {
        let mut changed = false;

        for function_index in 0..program.function_count() {
            let function = program.function(function_index);

            if !function.is_injected() && !function.name().starts_with(OUTLINED_NAME_PREFIX) {
                continue;
            }

            if function.is_ignored() {
                continue;
            }

            if !is_pure_call_shell(function) {
                continue;
            }

            let Some(target) = shell_single_target(program, function_index) else {
                continue;
            };

            if target_chain_loops_back(program, function_index, &target) {
                debug!(
                    "shell `{}` is part of a forwarding cycle, leaving it in place",
                    program.function(function_index).name()
                );
                continue;
            }

            retarget_call_sites(program, function_index, &target)?;
            program.function_mut(function_index).set_ignored(true);

            debug!(
                "collapsed shell `{}` into direct calls to `{target}`",
                program.function(function_index).name()
            );

            collapsed += 1;
            changed = true;
        }

        if !changed {
            break;
        }
    }

    Ok(collapsed)
}

/// A body of nothing but direct calls, once stack pushes/pops, returns and
/// SP-adjusting ADD/SUB are ignored. Indirect calls disqualify the shell.
#[must_use]
pub(crate) fn is_pure_call_shell(function: &Function) -> bool {
    if function.is_empty() {
        return false;
    }

    let mut has_call = false;

    for block in function.blocks() {
        for instruction in block.instructions() {
            let opcode = instruction.opcode();

            if opcode.is_push() || opcode.is_pop() || opcode.is_return() {
                continue;
            }

            if opcode.is_call() {
                if opcode.is_indirect_call() {
                    return false;
                }

                has_call = true;
                continue;
            }

            if opcode.is_add_sub() && instruction.writes_register(Register::SP) {
                continue;
            }

            return false;
        }
    }

    has_call
}

/// The one symbol every direct call of the shell targets, if there is
/// exactly one.
#[must_use]
fn shell_single_target(program: &Program, function_index: usize) -> Option<String> {
    let mut target: Option<&str> = None;

    for block in program.function(function_index).blocks() {
        for instruction in block.instructions() {
            let Some(symbol) = direct_call_target(program, instruction) else {
                continue;
            };

            match target {
                None => target = Some(symbol),
                Some(existing) if existing == symbol => {}
                Some(_) => return None,
            }
        }
    }

    target.map(str::to_owned)
}

fn direct_call_target<'p>(program: &'p Program, instruction: &Instruction) -> Option<&'p str> {
    let opcode = instruction.opcode();
    if !opcode.is_call() || opcode.is_indirect_call() {
        return None;
    }

    let expr = instruction
        .operands()
        .iter()
        .find_map(crate::Operand::as_expr)?;
    Some(program.symbol_name(expr))
}

/// Follows `first_target` through live shells; `true` when the chain
/// comes back to the shell we started from.
fn target_chain_loops_back(program: &Program, start_index: usize, first_target: &str) -> bool {
    let start_name = program.function(start_index).name();
    let mut seen: HashSet<String> = HashSet::new();
    let mut current = first_target.to_owned();

    loop {
        if current == start_name {
            return true;
        }

        if !seen.insert(current.clone()) {
            return false;
        }

        let Some(index) = program.function_index_by_name(&current) else {
            return false;
        };

        let function = program.function(index);
        if function.is_ignored() || !function.is_injected() || !is_pure_call_shell(function) {
            return false;
        }

        let Some(next) = shell_single_target(program, index) else {
            return false;
        };
        current = next;
    }
}

/// Rewrites every direct call to the shell into a direct call to `target`.
fn retarget_call_sites(
    program: &mut Program,
    shell_index: usize,
    target: &str,
) -> OutlineResult<()> {
    let shell_name = program.function(shell_index).name().to_owned();

    let mut sites = Vec::new();
    for (function_index, function) in program.functions().iter().enumerate() {
        if function_index == shell_index {
            continue;
        }

        for (block_index, block) in function.blocks().iter().enumerate() {
            for (instruction_index, instruction) in block.instructions().iter().enumerate() {
                if direct_call_target(program, instruction) == Some(shell_name.as_str()) {
                    sites.push((function_index, block_index, instruction_index));
                }
            }
        }
    }

    for (function_index, block_index, instruction_index) in sites {
        let expr = program.create_symbol_expr(target);
        let function_name = program.function(function_index).name().to_owned();
        program
            .function_mut(function_index)
            .block_mut(block_index)
            .replace_at(instruction_index, create_call(expr))
            .map_err(|error| error.in_function(function_name))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::{
        isa::{create_pop_pair, create_push_pair, create_return},
        Opcode, Operand,
    };

    use super::*;

    fn shell(program: &mut Program, name: &str, target: &str) -> usize {
        let target = program.create_symbol_expr(target);
        let index = program.create_injected_function(name);
        let function = program.function_mut(index);
        let block = function.add_basic_block("outlined_bb");
        function
            .block_mut(block)
            .add_instruction(create_call(target));
        function.block_mut(block).add_instruction(create_return());
        index
    }

    fn caller(program: &mut Program, name: &str, callee: &str) -> usize {
        let callee = program.create_symbol_expr(callee);
        let index = program.add_function(Function::new(name));
        let function = program.function_mut(index);
        let entry = function.add_basic_block("entry");
        function
            .block_mut(entry)
            .add_instruction(create_push_pair(Register::FP, Register::LR));
        function.block_mut(entry).add_instruction(create_call(callee));
        function
            .block_mut(entry)
            .add_instruction(create_pop_pair(Register::FP, Register::LR));
        function.block_mut(entry).add_instruction(create_return());
        index
    }

    #[test]
    fn a_call_return_body_is_a_shell() {
        let mut program = Program::new();
        let index = shell(&mut program, "PLO_outlined_1", "memcpy");

        assert!(is_pure_call_shell(program.function(index)));
        assert_eq!(
            shell_single_target(&program, index),
            Some("memcpy".to_owned())
        );
    }

    #[test]
    fn indirect_calls_and_real_work_disqualify_a_shell() {
        let mut program = Program::new();

        let indirect = program.create_injected_function("PLO_outlined_1");
        let function = program.function_mut(indirect);
        let block = function.add_basic_block("outlined_bb");
        function.block_mut(block).add_instruction(Instruction::new(
            Opcode::Blr,
            vec![Operand::Register(Register::X8)],
        ));
        function.block_mut(block).add_instruction(create_return());
        assert!(!is_pure_call_shell(program.function(indirect)));

        let working = shell(&mut program, "PLO_outlined_2", "memcpy");
        program
            .function_mut(working)
            .block_mut(0)
            .insert_at(0, Instruction::new(Opcode::AddXri, vec![
                Operand::Register(Register::X0),
                Operand::Register(Register::X0),
                Operand::Immediate(1),
            ]))
            .unwrap();
        assert!(!is_pure_call_shell(program.function(working)));
    }

    #[test]
    fn shells_collapse_and_their_sites_retarget() {
        let mut program = Program::new();
        let shell_index = shell(&mut program, "PLO_outlined_1", "memcpy");
        let caller_index = caller(&mut program, "user", "PLO_outlined_1");

        let collapsed = collapse_redundant_shells(&mut program).unwrap();

        assert_eq!(collapsed, 1);
        assert!(program.function(shell_index).is_ignored());

        let entry = program.function(caller_index).block(0);
        let call = &entry.instructions()[1];
        assert_eq!(direct_call_target(&program, call), Some("memcpy"));
    }

    #[test]
    fn chains_of_shells_collapse_to_the_final_target() {
        let mut program = Program::new();
        shell(&mut program, "PLO_outlined_1", "memcpy");
        shell(&mut program, "PLO_outlined_2", "PLO_outlined_1");
        let caller_index = caller(&mut program, "user", "PLO_outlined_2");

        let collapsed = collapse_redundant_shells(&mut program).unwrap();

        assert_eq!(collapsed, 2);

        let entry = program.function(caller_index).block(0);
        let call = &entry.instructions()[1];
        assert_eq!(direct_call_target(&program, call), Some("memcpy"));
    }

    #[test]
    fn mutually_forwarding_shells_stay_in_place() {
        let mut program = Program::new();
        let a = shell(&mut program, "PLO_outlined_1", "PLO_outlined_2");
        let b = shell(&mut program, "PLO_outlined_2", "PLO_outlined_1");

        let collapsed = collapse_redundant_shells(&mut program).unwrap();

        assert_eq!(collapsed, 0);
        assert!(!program.function(a).is_ignored());
        assert!(!program.function(b).is_ignored());
    }
}
