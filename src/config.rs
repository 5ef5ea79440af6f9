// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use serde::Deserialize;

/// Tuning knobs of the outlining pass. `Debug` only widens the diagnostic
/// output, it never changes what the pass does to the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
#[serde(rename_all = "kebab-case")]
pub struct OutlinerConfig {
    /// Upper bound on the window length, in instructions.
    pub largest_length: usize,

    /// Lower bound on the window length, in instructions.
    pub min_length: usize,

    /// Excludes hot functions and hot basic blocks, and weighs savings by
    /// block execution counts.
    pub enable_pgo: bool,

    pub debug: bool,
}

impl OutlinerConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for OutlinerConfig {
    fn default() -> Self {
        Self {
            largest_length: 32,
            min_length: 2,
            enable_pgo: false,
            debug: false,
        }
    }
}
