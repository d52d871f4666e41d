//! FILENAME: cube/src/lib.rs
//! PURPOSE: Shared cube types for the cross-tab engine.
//! CONTEXT: The cross-tab crate consumes a cube only through `CubeSource`;
//! `MemoryCube` is the in-process implementation.
//!
//! Layers:
//! - `schema`: Hierarchies, levels and members (what the cube LOOKS like)
//! - `address`: Addresses, values and requests (HOW we talk to the engine)
//! - `source`: The data-engine trait
//! - `memory`: In-memory engine with lazily computed aggregates

pub mod address;
pub mod error;
pub mod memory;
pub mod schema;
pub mod source;

pub use address::{CubeAddress, CubeValue, DataRequest};
pub use error::CubeError;
pub use memory::{Accumulator, Aggregation, CubeStats, MemoryCube, ShowValuesAs};
pub use schema::{
    CubeSchema, Hierarchy, HierarchyId, Level, LevelId, Member, MemberId, MemberKind,
    PagerSettings, TotalAppearance,
};
pub use source::CubeSource;
