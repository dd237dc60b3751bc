//! Identifiers shared by every participant of a match.

use std::fmt;

use bitcode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// One fixed-size simulation tick. Frame 0 is the state a stage starts in.
pub type Frame = u32;

/// Player slot identifier, assigned by the transport layer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Encode, Decode, Serialize,
    Deserialize,
)]
pub struct PlayerId(pub u16);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Identifier of a loaded stage (level) inside a course.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Encode, Decode, Serialize,
    Deserialize,
)]
pub struct StageId(pub u32);

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage-{}", self.0)
    }
}
