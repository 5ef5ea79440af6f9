// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use log::debug;

use crate::{
    ir::{Function, Instruction, InstructionSequence, Operand, Program, Register},
    isa::{create_pop_pair, create_push_pair, create_return, create_unconditional_branch},
    OutlineResult,
};

/// Builds the outlined procedure for `sequence`: the instructions copied
/// verbatim into a fresh injected function, conditional branches rerouted
/// to a return trampoline, stack offsets fixed for the new frame, and a
/// prologue/epilogue installed unless the body is pure.
///
/// Returns `None` when there is nothing to outline after filtering.
pub(crate) fn synthesize_procedure(
    program: &mut Program,
    sequence: &InstructionSequence,
    called_via_sandwich: bool,
    name: String,
) -> OutlineResult<Option<usize>> {
    if sequence.is_empty() {
        return Ok(None);
    }

    let body: Vec<&Instruction> = sequence
        .iter()
        .filter(|instruction| {
            !instruction.opcode().is_cfi() && !instruction.opcode().is_pseudo()
        })
        .collect();

    if body.is_empty() {
        debug!("sequence for `{name}` is empty after filtering, nothing to synthesize");
        return Ok(None);
    }

    let has_conditional_branch = body
        .iter()
        .any(|instruction| instruction.is_conditional_branch());

    let return_label = format!("{name}_return");
    let trampoline_target = has_conditional_branch
        .then(|| program.create_symbol_expr(return_label.clone()));

    let body: Vec<Instruction> = body
        .into_iter()
        .map(|instruction| match trampoline_target {
            Some(target) if instruction.is_conditional_branch() => {
                retarget_branch(instruction, target)
            }

            _ => instruction.clone(),
        })
        .collect();

    let function_index = program.create_injected_function(name);
    let function = program.function_mut(function_index);

    let body_block = function.add_basic_block("outlined_bb");
    for instruction in body {
        function.block_mut(body_block).add_instruction(instruction);
    }

    if has_conditional_branch {
        // The fall-through path runs off the end of the body into the
        // trampoline; the taken path branches to it.
        let trampoline = function.add_basic_block(return_label);
        function.block_mut(trampoline).add_instruction(create_return());
        function.block_mut(body_block).add_successor(trampoline);
    } else {
        function.block_mut(body_block).add_instruction(create_return());
    }

    manage_stack_frame(function, called_via_sandwich)?;

    Ok(Some(function_index))
}

/// The copy of a conditional branch, aimed at the trampoline instead of
/// its original target.
fn retarget_branch(instruction: &Instruction, target: crate::ExprId) -> Instruction {
    let operands = instruction
        .operands()
        .iter()
        .map(|operand| match operand {
            Operand::Expr(_) => Operand::Expr(target),
            other => *other,
        })
        .collect();

    Instruction::new(instruction.opcode(), operands)
}

/// Fixes SP-relative offsets for the frame the prologue is about to
/// create, then installs the prologue/epilogue pair unless the body is
/// pure. A body ending in a direct call folds the call and the return
/// into a single tail branch instead of taking the epilogue.
fn manage_stack_frame(function: &mut Function, called_via_sandwich: bool) -> OutlineResult<()> {
    if function.is_empty() {
        debug!(
            "outlined function `{}` has no instructions, skipping frame management",
            function.name()
        );
        return Ok(());
    }

    // A sandwich caller pushes a pair before the call, so the body sees
    // the stack shifted twice.
    let byte_fix: i64 = if called_via_sandwich { 32 } else { 16 };

    let mut fixed_count = 0;
    for block in function.blocks_mut() {
        for instruction in block.instructions_mut() {
            let opcode = instruction.opcode();
            let is_load_store = opcode.may_load() || opcode.may_store();
            let is_address_arithmetic =
                opcode.is_add_sub() && !instruction.writes_register(Register::SP);

            if !is_load_store && !is_address_arithmetic {
                continue;
            }

            let scale = if is_load_store {
                opcode.stack_offset_scale()
            } else {
                1
            };

            if adjust_stack_offset(instruction, byte_fix / scale, is_load_store) {
                fixed_count += 1;
            }
        }
    }

    let has_stack_access = fixed_count > 0;
    let mut needs_link_register = false;
    let mut reads_frame_pointer = false;
    let mut has_conditional_branch = false;

    for block in function.blocks() {
        for instruction in block.instructions() {
            if instruction.is_conditional_branch() {
                has_conditional_branch = true;
            }

            if instruction.opcode().is_call() {
                needs_link_register = true;
            }

            if instruction.reads_register(Register::FP) {
                reads_frame_pointer = true;
            }
        }
    }

    let pure = !has_stack_access
        && !needs_link_register
        && !reads_frame_pointer
        && !has_conditional_branch;
    if pure {
        return Ok(());
    }

    // stp fp, lr, [sp, #-16]!
    function
        .block_mut(0)
        .insert_at(0, create_push_pair(Register::FP, Register::LR))?;

    if fold_tail_call(function)? {
        return Ok(());
    }

    // ldp fp, lr, [sp], #16 ahead of the return; with a trampoline the
    // body has no return of its own and the pop lands at its end.
    let body = function.block(0);
    let position = body
        .instructions()
        .iter()
        .position(|instruction| instruction.opcode().is_return())
        .unwrap_or(body.len());

    function
        .block_mut(0)
        .insert_at(position, create_pop_pair(Register::FP, Register::LR))?;

    Ok(())
}

/// `bl target; ret` at the end of the body becomes `b target`, dropping
/// the need for an epilogue. Only direct calls with a recoverable symbol
/// fold.
fn fold_tail_call(function: &mut Function) -> OutlineResult<bool> {
    let body = function.block(0);
    if body.len() < 2 {
        return Ok(false);
    }

    let return_index = body.len() - 1;
    let call_index = return_index - 1;
    let call = &body.instructions()[call_index];

    if !body.instructions()[return_index].opcode().is_return()
        || !call.opcode().is_call()
        || call.opcode().is_indirect_call()
    {
        return Ok(false);
    }

    let Some(target) = call.operands().iter().find_map(Operand::as_expr) else {
        return Ok(false);
    };

    function
        .block_mut(0)
        .replace_at(call_index, create_unconditional_branch(target))?;
    function.block_mut(0).erase_at(return_index)?;

    Ok(true)
}

fn adjust_stack_offset(
    instruction: &mut Instruction,
    adjustment: i64,
    is_load_store: bool,
) -> bool {
    let operand_count = instruction.operands().len();

    for index in 0..operand_count {
        let is_sp = instruction.operands()[index]
            .as_register()
            .is_some_and(|register| register.is_sub_register_eq(&Register::SP));
        if !is_sp {
            continue;
        }

        if is_load_store {
            // [sp, #imm]: the offset follows the base register.
            if index + 1 < operand_count {
                if let Operand::Immediate(value) = &mut instruction.operands_mut()[index + 1] {
                    *value += adjustment;
                    return true;
                }
            }
        } else {
            // add x0, sp, #imm: the first immediate after the base.
            for after in (index + 1)..operand_count {
                if let Operand::Immediate(value) = &mut instruction.operands_mut()[after] {
                    *value += adjustment;
                    return true;
                }
            }
        }
    }

    false
}
