// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::fmt::Display;

use crate::isa::Opcode;

use super::{Operand, Register};

/// A single machine instruction: an opcode plus its ordered operands.
/// Equality is structural, with expression operands comparing by identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    opcode: Opcode,
    operands: Vec<Operand>,
}

impl Instruction {
    #[must_use]
    pub fn new(opcode: Opcode, operands: Vec<Operand>) -> Self {
        Self {
            opcode,
            operands,
        }
    }

    #[must_use]
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    #[must_use]
    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    pub(crate) fn operands_mut(&mut self) -> &mut [Operand] {
        &mut self.operands
    }

    /// A branch that does not always take its target.
    #[must_use]
    pub fn is_conditional_branch(&self) -> bool {
        self.opcode.is_branch() && !self.opcode.is_unconditional_branch()
    }

    /// Whether `register` appears anywhere in the operand list, read or
    /// written.
    #[must_use]
    pub fn uses_register(&self, register: Register) -> bool {
        self.operands.iter().any(|operand| {
            operand
                .as_register()
                .is_some_and(|reg| reg.is_sub_register_eq(&register))
        })
    }

    /// Whether `register` appears in a def position (defs come first in
    /// the operand order, their count is given by the opcode).
    #[must_use]
    pub fn writes_register(&self, register: Register) -> bool {
        let defs = self.opcode.num_defs() as usize;
        self.operands[..defs.min(self.operands.len())]
            .iter()
            .any(|operand| {
                operand
                    .as_register()
                    .is_some_and(|reg| reg.is_sub_register_eq(&register))
            })
    }

    /// Whether `register` appears outside the def positions.
    #[must_use]
    pub fn reads_register(&self, register: Register) -> bool {
        let defs = self.opcode.num_defs() as usize;
        self.operands[defs.min(self.operands.len())..]
            .iter()
            .any(|operand| {
                operand
                    .as_register()
                    .is_some_and(|reg| reg.is_sub_register_eq(&register))
            })
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.opcode.name())?;

        for (index, operand) in self.operands.iter().enumerate() {
            if index == 0 {
                f.write_str(" ")?;
            } else {
                f.write_str(", ")?;
            }

            operand.fmt(f)?;
        }

        Ok(())
    }
}

/// An immutable run of instructions: the unit of matching, costing and
/// synthesis. Canonical sequences are identified by their index in the
/// per-length list built by the enumerator.
#[derive(Debug, Clone, PartialEq)]
pub struct InstructionSequence {
    instructions: Vec<Instruction>,
}

impl InstructionSequence {
    #[must_use]
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self {
            instructions,
        }
    }

    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions.iter()
    }
}

impl From<Vec<Instruction>> for InstructionSequence {
    fn from(instructions: Vec<Instruction>) -> Self {
        Self::new(instructions)
    }
}
