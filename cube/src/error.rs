//! FILENAME: cube/src/error.rs

use thiserror::Error;

use crate::schema::{HierarchyId, LevelId, MemberId};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CubeError {
    #[error("Unknown hierarchy: {0}")]
    UnknownHierarchy(HierarchyId),

    #[error("Unknown level: {0}")]
    UnknownLevel(LevelId),

    #[error("Unknown member: {0}")]
    UnknownMember(MemberId),

    #[error("Member {member} cannot parent a member of level {level}")]
    InvalidParent { member: MemberId, level: LevelId },

    #[error("Member {0} is not a measure")]
    NotAMeasure(MemberId),

    #[error("Fact row has {got} measure values, expected {expected}")]
    MeasureCountMismatch { expected: usize, got: usize },

    #[error("Data fetch failed: {0}")]
    Fetch(String),
}
