// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use crate::ir::Function;

/// A sequence may span at most this many basic blocks: the starting block
/// and two more along the chosen edge.
pub(crate) const MAX_CROSS_BLOCKS: usize = 3;

/// The block a cross-block walk continues into, if any.
///
/// After a conditional branch the walk follows the hottest successor (the
/// first one when no counts are known). A block that simply falls through
/// continues into its unique successor, or the hottest of several. An
/// unconditional branch ends the walk: the sequence would no longer be
/// contiguous in the rewritten layout.
#[must_use]
pub(crate) fn next_block_on_hottest_edge(function: &Function, block_index: usize) -> Option<usize> {
    let block = function.blocks().get(block_index)?;
    let last = block.instructions().last()?;
    let successors = block.successors();

    let hottest = || {
        let mut next = None;
        let mut max_count = 0;
        for &successor in successors {
            let count = function
                .blocks()
                .get(successor)
                .and_then(|succ| succ.execution_count())
                .unwrap_or(0);
            if count > max_count {
                max_count = count;
                next = Some(successor);
            }
        }
        next
    };

    if last.is_conditional_branch() {
        if successors.is_empty() {
            return None;
        }

        if successors.len() == 1 {
            return Some(successors[0]);
        }

        Some(hottest().unwrap_or(successors[0]))
    } else if !last.opcode().is_branch() {
        match successors.len() {
            0 => None,
            1 => Some(successors[0]),
            _ => Some(hottest().unwrap_or(successors[0])),
        }
    } else {
        None
    }
}
