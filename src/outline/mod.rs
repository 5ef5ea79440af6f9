// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

mod cleanup;
mod cost;
mod enumerator;
mod fingerprint;
mod locator;
mod pass;
mod rewriter;
mod synthesis;
mod walk;

pub use self::{
    locator::SequenceLocation,
    pass::{
        outline_program,
        PostLinkOutliner,
    },
};
