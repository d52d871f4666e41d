//! FILENAME: crosstab-engine/src/host.rs
//! Callbacks the embedding application may provide.

use log::error;

use cube::Member;

use crate::definition::Axis;
use crate::error::CrossTabError;

pub trait CrossTabHost {
    /// Extra admission filter applied after the non-empty check.
    fn admit_member(&self, _axis: Axis, _member: &Member) -> bool {
        true
    }

    /// Called when a rebuild fails. `last_good` is the JSON snapshot of the
    /// last session state that built successfully, if any.
    fn on_rebuild_error(&self, err: &CrossTabError, last_good: Option<&str>) {
        error!(
            "cross-tab rebuild failed: {} (rollback snapshot available: {})",
            err,
            last_good.is_some()
        );
    }
}

/// Host with the default behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHost;

impl CrossTabHost for DefaultHost {}
