// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::fmt::Display;

use super::BasicBlock;

/// An ordered collection of basic blocks. Block 0 is the entry block.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub(crate) name: String,
    pub(crate) blocks: Vec<BasicBlock>,
    pub(crate) injected: bool,
    pub(crate) execution_count: Option<u64>,
    pub(crate) has_eh_ranges: bool,
    pub(crate) ignored: bool,
    pub(crate) section_name: Option<String>,
}

impl Function {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocks: Vec::new(),
            injected: false,
            execution_count: None,
            has_eh_ranges: false,
            ignored: false,
            section_name: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub(crate) fn blocks_mut(&mut self) -> &mut [BasicBlock] {
        &mut self.blocks
    }

    #[must_use]
    pub fn block(&self, index: usize) -> &BasicBlock {
        &self.blocks[index]
    }

    pub fn block_mut(&mut self, index: usize) -> &mut BasicBlock {
        &mut self.blocks[index]
    }

    /// Appends an empty block and returns its index.
    pub fn add_basic_block(&mut self, label: impl Into<String>) -> usize {
        self.blocks.push(BasicBlock::new(label));
        self.blocks.len() - 1
    }

    /// Distinguishes procedures synthesized by the pass from the program's
    /// original functions.
    #[must_use]
    pub fn is_injected(&self) -> bool {
        self.injected
    }

    #[must_use]
    pub fn execution_count(&self) -> Option<u64> {
        self.execution_count
    }

    pub fn set_execution_count(&mut self, count: u64) {
        self.execution_count = Some(count);
    }

    #[must_use]
    pub fn has_eh_ranges(&self) -> bool {
        self.has_eh_ranges
    }

    pub fn set_eh_ranges(&mut self, has_eh_ranges: bool) {
        self.has_eh_ranges = has_eh_ranges;
    }

    #[must_use]
    pub fn is_ignored(&self) -> bool {
        self.ignored
    }

    pub fn set_ignored(&mut self, ignored: bool) {
        self.ignored = ignored;
    }

    #[must_use]
    pub fn section_name(&self) -> Option<&str> {
        self.section_name.as_deref()
    }

    /// A function whose body contains no call instruction.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.blocks.iter().all(|block| {
            block
                .instructions()
                .iter()
                .all(|instruction| !instruction.opcode().is_call())
        })
    }

    /// No blocks, or nothing but empty blocks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(BasicBlock::is_empty)
    }
}

impl Display for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)?;
        f.write_str(":")?;

        for block in &self.blocks {
            f.write_fmt(format_args!("\n{}:", block.label()))?;

            for instruction in block.instructions() {
                f.write_fmt(format_args!("\n    {instruction}"))?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{isa, Opcode, Operand, Register};

    use super::*;

    #[test]
    fn leafness_is_the_absence_of_calls() {
        let mut function = Function::new("f");
        let entry = function.add_basic_block("entry");
        function.block_mut(entry).add_instruction(crate::Instruction::new(
            Opcode::AddXri,
            vec![
                Operand::Register(Register::X0),
                Operand::Register(Register::X0),
                Operand::Immediate(1),
            ],
        ));
        function.block_mut(entry).add_instruction(isa::create_return());

        assert!(function.is_leaf());

        function
            .block_mut(entry)
            .add_instruction(crate::Instruction::new(
                Opcode::Blr,
                vec![Operand::Register(Register::X8)],
            ));

        assert!(!function.is_leaf());
    }
}
