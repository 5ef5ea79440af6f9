// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::collections::HashSet;

use log::debug;

use crate::{
    ir::Program,
    isa::create_call,
    OutlineResult, OutlineStatistics, OutlinerConfig,
};

use super::{
    cleanup, cost,
    enumerator::{self, HOT_EXECUTION_THRESHOLD},
    fingerprint, locator, rewriter, synthesis,
};

/// Synthesized procedures are named `PLO_outlined_<n>`; the cleanup step
/// recognises them by this prefix as well as by the injected flag.
pub(crate) const OUTLINED_NAME_PREFIX: &str = "PLO_outlined_";

/// Runs the pass once over `program` with `config`.
pub fn outline_program(
    program: &mut Program,
    config: OutlinerConfig,
) -> OutlineResult<OutlineStatistics> {
    PostLinkOutliner::new(config).run(program)
}

/// The post-link outlining pass: finds repeated instruction sequences,
/// synthesizes one shared procedure per repeated pattern, and rewrites
/// every occurrence into a call to it.
#[derive(Debug)]
pub struct PostLinkOutliner {
    config: OutlinerConfig,

    /// Seeds the globally unique `PLO_outlined_<n>` names, scoped to this
    /// pass instance.
    outlined_count: usize,
}

impl PostLinkOutliner {
    #[must_use]
    pub fn new(config: OutlinerConfig) -> Self {
        Self {
            config,
            outlined_count: 0,
        }
    }

    /// Longer sequences are considered first, so a region consumed at one
    /// length can never be re-outlined at a shorter one. Functions created
    /// by the pass itself are not enumerated.
    pub fn run(&mut self, program: &mut Program) -> OutlineResult<OutlineStatistics> {
        debug!(
            "post-link outlining: lengths {}..={}, PGO {}",
            self.config.min_length, self.config.largest_length, self.config.enable_pgo,
        );

        let mut statistics = OutlineStatistics::default();
        let original_function_count = program.function_count();
        let hot_functions = self.hot_functions(program);

        let min_length = self.config.min_length.max(1);

        for len in (min_length..=self.config.largest_length).rev() {
            for function_index in 0..original_function_count {
                let function = program.function(function_index);

                if function.is_ignored() || function.is_empty() {
                    continue;
                }

                if hot_functions.contains(&function_index) {
                    continue;
                }

                self.process_function(program, function_index, len, &mut statistics)?;
            }
        }

        statistics.collapsed_shells = cleanup::collapse_redundant_shells(program)?;

        debug!(
            "post-link outlining done: {} procedures, {} call sites, {} shells collapsed",
            statistics.outlined_procedures,
            statistics.rewritten_call_sites,
            statistics.collapsed_shells,
        );

        Ok(statistics)
    }

    fn hot_functions(&self, program: &Program) -> HashSet<usize> {
        if !self.config.enable_pgo {
            return HashSet::new();
        }

        // Functions without profile data stay eligible.
        program
            .functions()
            .iter()
            .enumerate()
            .filter(|(_, function)| {
                function
                    .execution_count()
                    .is_some_and(|count| count > HOT_EXECUTION_THRESHOLD)
            })
            .map(|(index, _)| index)
            .collect()
    }

    fn process_function(
        &mut self,
        program: &mut Program,
        function_index: usize,
        len: usize,
        statistics: &mut OutlineStatistics,
    ) -> OutlineResult<()> {
        // The labelling set restarts with every per-function sequence
        // list; nothing leaks across functions.
        let sequences =
            enumerator::collect_sequences(program.function(function_index), len, &self.config);
        let count = sequences.len();
        if count == 0 {
            return Ok(());
        }

        let fingerprints: Vec<u64> = sequences
            .iter()
            .map(fingerprint::sequence_fingerprint)
            .collect();
        let mut labelled: HashSet<usize> = HashSet::new();

        for i in 0..count {
            labelled.insert(i);

            let mut accepted = vec![i];
            for j in (i + 1)..count {
                if labelled.contains(&j) {
                    continue;
                }

                if fingerprints[j] != fingerprints[i] {
                    continue;
                }

                if !fingerprint::structurally_compatible(&sequences[i], &sequences[j]) {
                    continue;
                }

                let overlaps = accepted
                    .iter()
                    .any(|&member| fingerprint::sequences_overlap(&sequences[member], &sequences[j]));
                if overlaps {
                    continue;
                }

                labelled.insert(j);
                accepted.push(j);
            }

            let frequency = accepted.len();
            let function = program.function(function_index);

            let locations = locator::find_sequence_locations(function, &sequences[i]);
            if locations.is_empty() {
                continue;
            }

            // Far fewer concrete occurrences than grouped matches means
            // the group was inflated by renaming or collisions.
            if locations.len() < frequency / 2 {
                debug!(
                    "group of {} in `{}` only located {} occurrences, skipping it",
                    frequency,
                    function.name(),
                    locations.len(),
                );
                continue;
            }

            let sandwich_flags: Vec<bool> = locations
                .iter()
                .map(|location| rewriter::needs_sandwich(function, location))
                .collect();
            let sandwich_count = sandwich_flags.iter().filter(|&&flag| flag).count();
            let normal_count = locations.len() - sandwich_count;

            let weighted_frequency: u64 = if self.config.enable_pgo {
                locations
                    .iter()
                    .map(|location| {
                        function
                            .block(location.block)
                            .execution_count()
                            .map_or(1, |count| count.max(1))
                    })
                    .sum()
            } else {
                locations.len() as u64
            };

            let pure = cost::is_pure_sequence(&sequences[i]);
            let decision = cost::evaluate_group(
                len,
                locations.len(),
                sandwich_count,
                normal_count,
                weighted_frequency,
                pure,
            );

            if !decision.is_worthwhile() {
                if frequency > 1 {
                    debug!(
                        "group of {} x length {} in `{}` not worthwhile: saved={} cost={} \
                         net={} threshold={}",
                        frequency,
                        len,
                        function.name(),
                        decision.saved,
                        decision.outlined_size + decision.call_cost,
                        decision.net,
                        decision.threshold,
                    );
                }
                continue;
            }

            self.outlined_count += 1;
            let name = format!("{OUTLINED_NAME_PREFIX}{}", self.outlined_count);

            let Some(callee_index) = synthesis::synthesize_procedure(
                program,
                &sequences[i],
                sandwich_count > 0,
                name.clone(),
            )?
            else {
                continue;
            };

            debug!(
                "outlining {} occurrence(s) of a length-{} sequence from `{}` into `{name}` \
                 (net {} bytes)",
                locations.len(),
                len,
                program.function(function_index).name(),
                decision.net,
            );

            // Descending start order keeps earlier indices valid while
            // rewriting.
            let mut order: Vec<usize> = (0..locations.len()).collect();
            order.sort_by(|&a, &b| {
                locations[a]
                    .block
                    .cmp(&locations[b].block)
                    .then(locations[b].start.cmp(&locations[a].start))
            });

            let mut replaced = 0;
            for position in order {
                let call = create_call(program.create_symbol_expr(name.clone()));
                let function_name = program.function(function_index).name().to_owned();

                let done = rewriter::replace_with_call(
                    program.function_mut(function_index),
                    &locations[position],
                    &sequences[i],
                    call,
                    sandwich_flags[position],
                )
                .map_err(|error| error.in_function(function_name))?;

                if done {
                    replaced += 1;
                }
            }

            if replaced == 0 {
                // Nothing calls the new procedure; drop it again.
                program.function_mut(callee_index).set_ignored(true);
                continue;
            }

            statistics.outlined_procedures += 1;
            statistics.rewritten_call_sites += replaced;
            statistics.estimated_net_savings += decision.net;
        }

        Ok(())
    }
}
