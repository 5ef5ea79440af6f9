// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use crate::ir::{Function, InstructionSequence};

use super::walk::{next_block_on_hottest_edge, MAX_CROSS_BLOCKS};

/// Where a canonical sequence occurs inside a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceLocation {
    /// Block holding the first matched instruction.
    pub block: usize,

    /// Index of the first matched instruction inside that block.
    pub start: usize,

    /// For matches continuing into successors: every (block, start-index)
    /// the match touches, in walk order. Empty for single-block matches.
    pub spans: Vec<(usize, usize)>,
}

impl SequenceLocation {
    #[must_use]
    pub fn is_cross_block(&self) -> bool {
        !self.spans.is_empty()
    }
}

/// Every occurrence of `sequence` in `function`, by exact per-instruction
/// equality. Blocks too small to hold the sequence are probed for
/// cross-block matches along the same edge the enumerator walks.
#[must_use]
pub(crate) fn find_sequence_locations(
    function: &Function,
    sequence: &InstructionSequence,
) -> Vec<SequenceLocation> {
    let mut locations = Vec::new();
    let len = sequence.len();

    if len == 0 {
        return locations;
    }

    for (block_index, block) in function.blocks().iter().enumerate() {
        let instructions = block.instructions();

        if instructions.len() >= len {
            for start in 0..=(instructions.len() - len) {
                let matches = sequence
                    .iter()
                    .zip(&instructions[start..start + len])
                    .all(|(wanted, found)| wanted == found);

                if matches {
                    locations.push(SequenceLocation {
                        block: block_index,
                        start,
                        spans: Vec::new(),
                    });
                }
            }
        }

        if !instructions.is_empty() && instructions.len() < len {
            for start in 0..instructions.len() {
                if let Some(spans) = match_cross_block(function, block_index, start, sequence) {
                    locations.push(SequenceLocation {
                        block: block_index,
                        start,
                        spans,
                    });
                }
            }
        }
    }

    locations
}

fn match_cross_block(
    function: &Function,
    start_block: usize,
    start: usize,
    sequence: &InstructionSequence,
) -> Option<Vec<(usize, usize)>> {
    let len = sequence.len();
    let mut current = start_block;
    let mut index = start;
    let mut matched = 0;
    let mut blocks_used = 1;
    let mut spans = vec![(start_block, start)];

    while matched < len && blocks_used <= MAX_CROSS_BLOCKS {
        let block = function.blocks().get(current)?;
        if block.is_empty() || index >= block.len() {
            return None;
        }

        while matched < len && index < block.len() {
            if block.instructions()[index] != sequence.instructions()[matched] {
                return None;
            }

            matched += 1;
            index += 1;
        }

        if matched < len && index >= block.len() {
            current = next_block_on_hottest_edge(function, current)?;
            index = 0;
            blocks_used += 1;
            spans.push((current, 0));
        } else {
            break;
        }
    }

    (matched == len).then_some(spans)
}
