//! Read-only status queries for polling consumers.
//!
//! Safe to call at arbitrary frequency; never writes. Progress is monotonic:
//! once a photo reaches `finished`, its canonical fields only change through
//! a later successful re-run, which is itself visible as the state moves
//! through `queued` and `in_progress` again.

use anyhow::Result;
use serde::Serialize;

use crate::db::{AnalysisState, Store};
use crate::validator::Classification;

/// Wire shape of a poll response. Canonical fields are empty until the
/// photo has finished at least one run.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub state: AnalysisState,
    pub caption: String,
    pub description: String,
    pub keywords: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
}

/// Look up the analysis status for a photo. `None` means the photo is not
/// known to the system.
pub fn get_status(store: &Store, photo_id: &str) -> Result<Option<StatusResponse>> {
    let Some(record) = store.photo(photo_id)? else {
        return Ok(None);
    };

    Ok(Some(StatusResponse {
        state: record.state,
        caption: record.caption,
        description: record.description,
        keywords: record.keywords,
        classification: record.classification,
    }))
}
