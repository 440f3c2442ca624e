use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::compact::{CourseMeta, SectionCompact};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerSlot {
    Published,
    Draft,
}

impl PointerSlot {
    /// Field name of the slot inside the metadata document.
    pub fn field(&self) -> &'static str {
        match self {
            PointerSlot::Published => "published",
            PointerSlot::Draft => "draft_snapshot",
        }
    }
}

/// Which blob is current for one slot of a course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pointer {
    pub blob_id: String,
    pub version: u64,
    pub hash: String,
    pub meta: CourseMeta,
    #[serde(default)]
    pub sections: Vec<SectionCompact>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub actor: Option<String>,
}
