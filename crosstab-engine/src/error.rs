//! FILENAME: crosstab-engine/src/error.rs

use thiserror::Error;

use cube::{CubeError, LevelId};

use crate::definition::Axis;
use crate::node::NodeId;

#[derive(Error, Debug)]
pub enum CrossTabError {
    #[error("Cell ({col}, {row}) is outside the {col_count}x{row_count} grid")]
    CoordinateOutOfRange {
        col: u32,
        row: u32,
        col_count: u32,
        row_count: u32,
    },

    #[error("The cross-tab has not been built yet")]
    NotBuilt,

    #[error("Unknown {axis:?} node: {node}")]
    UnknownNode { axis: Axis, node: NodeId },

    #[error("Level {0} is not placed on a grid axis")]
    LevelNotOnAxis(LevelId),

    #[error("Invalid drill: {0}")]
    InvalidDrill(String),

    #[error("Page {page} is outside 1..={page_count}")]
    InvalidPage { page: u32, page_count: u32 },

    #[error("Cube error: {0}")]
    Cube(#[from] CubeError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),
}
