//! FILENAME: crosstab-engine/src/session.rs
//! Session state - user interaction that survives rebuilds.
//!
//! The caller owns the session and passes it to every rebuild. It can be
//! snapshotted to JSON (keyed by unique names, so it survives schema
//! reloads) and restored; entries that no longer resolve are dropped.

use std::collections::BTreeMap;

use log::warn;
use serde::{Deserialize, Serialize};

use cube::CubeSchema;

use crate::drill::{DrillRecordState, DrillRegistry};
use crate::error::CrossTabError;
use crate::sort::SortSelection;

#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub drills: DrillRegistry,
    /// Current page (1-based) per sibling list, keyed by `page_key`.
    pub pages: BTreeMap<String, u32>,
    /// Cell comments keyed by cube address key.
    pub comments: BTreeMap<String, String>,
    pub sort: Option<SortSelection>,
}

/// Serializable form of a `SessionState`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    #[serde(default)]
    pub drills: Vec<DrillRecordState>,
    #[serde(default)]
    pub pages: BTreeMap<String, u32>,
    #[serde(default)]
    pub comments: BTreeMap<String, String>,
    #[serde(default)]
    pub sort: Option<SortSelection>,
}

impl SessionSnapshot {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl SessionState {
    pub fn new() -> Self {
        SessionState::default()
    }

    /// Forgets every drill, page, comment and sort.
    pub fn reset(&mut self) {
        self.drills.clear();
        self.pages.clear();
        self.comments.clear();
        self.sort = None;
    }

    pub fn set_comment(&mut self, key: String, text: Option<String>) {
        match text {
            Some(text) if !text.is_empty() => {
                self.comments.insert(key, text);
            }
            _ => {
                self.comments.remove(&key);
            }
        }
    }

    pub fn snapshot(&self, schema: &CubeSchema) -> SessionSnapshot {
        SessionSnapshot {
            drills: self
                .drills
                .records()
                .iter()
                .filter_map(|r| r.to_state(schema))
                .collect(),
            pages: self.pages.clone(),
            comments: self.comments.clone(),
            sort: self.sort.clone(),
        }
    }

    /// Rebuilds a session from a snapshot, silently dropping drill records
    /// that reference unknown levels or members.
    pub fn restore(snapshot: &SessionSnapshot, schema: &CubeSchema) -> Self {
        let mut drills = DrillRegistry::new();
        for state in &snapshot.drills {
            match state.resolve(schema) {
                Some(record) => drills.push(record),
                None => warn!("dropping unresolvable drill record {:?}", state),
            }
        }
        SessionState {
            drills,
            pages: snapshot.pages.clone(),
            comments: snapshot.comments.clone(),
            sort: snapshot.sort.clone(),
        }
    }

    pub fn to_json(&self, schema: &CubeSchema) -> Result<String, CrossTabError> {
        Ok(self.snapshot(schema).to_json()?)
    }

    pub fn from_json(json: &str, schema: &CubeSchema) -> Result<Self, CrossTabError> {
        Ok(SessionState::restore(&SessionSnapshot::from_json(json)?, schema))
    }
}
