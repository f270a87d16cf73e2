//! The PTY screen-diff activity extractor: rule-driven conversion of
//! terminal changes into revisable activity entries, with frame-log replay.

pub mod extractor;
pub mod replay;
pub mod rules;

pub use extractor::{ActivityOutput, Extractor};
pub use replay::replay;
pub use rules::{Emit, Extract, Identity, Profile, Rule, TriggerRegion, UpdateWindow};
