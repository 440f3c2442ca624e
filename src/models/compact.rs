use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::course::BlockKind;

pub const BLOB_SCHEMA_VERSION: u32 = 2;

/// The small, frequently-read subset of a course kept beside the pointer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CourseMeta {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub instructor: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub duration: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionCompact {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub lesson_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LessonCompact {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default)]
    pub block_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockCompact {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: BlockKind,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// Immutable unit stored in the blob store. Maps are ordered so that the same
/// content always serializes to the same bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseBlob {
    pub v: u32,
    #[serde(default)]
    pub lesson_order: Vec<String>,
    #[serde(default)]
    pub lessons: BTreeMap<String, LessonCompact>,
    #[serde(default)]
    pub blocks: BTreeMap<String, BlockCompact>,
}

impl Default for CourseBlob {
    fn default() -> Self {
        Self {
            v: BLOB_SCHEMA_VERSION,
            lesson_order: Vec::new(),
            lessons: BTreeMap::new(),
            blocks: BTreeMap::new(),
        }
    }
}
