//! FILENAME: crosstab-engine/src/lib.rs
//! Cross-tab subsystem: builds and lays out a two-axis view over a cube.
//!
//! The crate talks to data only through `cube::CubeSource`, so any engine
//! that can enumerate members and answer values can back a grid.
//!
//! Layers:
//! - `definition`: Serializable layout (what the cross-tab SHOWS)
//! - `drill`, `session`: Interaction state that survives rebuilds
//! - `builder`, `span`, `sort`, `paging`: Tree construction and geometry (HOW we lay out)
//! - `request`: What the data engine is asked to prepare
//! - `cell`, `crosstab`: Renderable output and the operations on it

pub mod builder;
pub mod cell;
pub mod crosstab;
pub mod definition;
pub mod drill;
pub mod error;
pub mod host;
pub mod node;
pub mod paging;
pub mod request;
pub mod session;
pub mod sort;
pub mod span;

pub use cell::*;
pub use crosstab::{CrossTab, CrossTabContext};
pub use definition::*;
pub use drill::{DrillIndex, DrillMethod, DrillRecord, DrillRecordState, DrillRegistry, OptimizeReport};
pub use error::CrossTabError;
pub use host::{CrossTabHost, DefaultHost};
pub use node::{AxisLevel, DrillOption, ExpandStatus, NodeId, NodeKind, NodeTree, OutputNode, PageWindow, ROOT};
pub use session::{SessionSnapshot, SessionState};
pub use sort::{SortDirection, SortSelection};
