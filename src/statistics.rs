// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

/// What a completed run did to the program.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OutlineStatistics {
    /// Procedures synthesized and kept (at least one call site rewritten).
    pub outlined_procedures: usize,

    /// Occurrences replaced by a call or a save/call/restore sandwich.
    pub rewritten_call_sites: usize,

    /// Single-target shells collapsed by the post-pass cleanup.
    pub collapsed_shells: usize,

    /// Sum of the accepted groups' net byte savings, per the cost model.
    pub estimated_net_savings: i64,
}
