// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use thiserror::Error;

pub type OutlineResult<T> = Result<T, OutlineError>;

/// Failures that abort the whole pass. Everything softer (a group whose
/// benefit is too small, an occurrence whose boundary check fails) is
/// logged and skipped instead of reported here.
#[derive(Debug, Error)]
pub enum OutlineError {
    #[error("instruction index {index} is out of bounds in block `{block}`")]
    IndexOutOfBounds {
        block: String,
        index: usize,
    },

    #[error("function `{function}` violated a rewrite invariant: {source}")]
    Function {
        function: String,
        #[source]
        source: Box<OutlineError>,
    },
}

impl OutlineError {
    /// Attaches the identity of the function that was being rewritten.
    #[must_use]
    pub fn in_function(self, function: impl Into<String>) -> Self {
        match self {
            Self::Function { .. } => self,

            other => Self::Function {
                function: function.into(),
                source: Box::new(other),
            },
        }
    }
}
