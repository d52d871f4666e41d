//! FILENAME: cube/src/source.rs
//! The data-engine interface consumed by the cross-tab.

use crate::address::{CubeAddress, CubeValue, DataRequest};
use crate::error::CubeError;
use crate::schema::{CubeSchema, LevelId};

/// A multidimensional data source.
///
/// Calls are synchronous; a source may block while it fetches.
pub trait CubeSource {
    /// Read-only access to the cube metadata.
    fn schema(&self) -> &CubeSchema;

    /// Materializes every member of `level` if it was not fetched yet.
    fn ensure_members(&mut self, level: LevelId) -> Result<(), CubeError>;

    /// True if the aggregate at `address` is non-empty.
    fn has_data(&mut self, address: &CubeAddress) -> Result<bool, CubeError>;

    /// Announces the aggregates the caller is about to read.
    fn submit(&mut self, requests: &[DataRequest]) -> Result<(), CubeError>;

    /// Batch value lookup, one value per address.
    fn values(&mut self, addresses: &[CubeAddress]) -> Result<Vec<CubeValue>, CubeError>;

    /// Single value lookup.
    fn value(&mut self, address: &CubeAddress) -> Result<CubeValue, CubeError> {
        let mut values = self.values(std::slice::from_ref(address))?;
        Ok(values.pop().unwrap_or_default())
    }
}
