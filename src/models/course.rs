use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::compact::{CourseMeta, SectionCompact};

/// A course as the editor and the student views see it.
///
/// `published`, `created_at`, `updated_at`, `is_draft` and `dirty` live outside
/// the blob; they are filled in from the metadata document or pointer that the
/// course was resolved through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub instructor: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub lessons: Vec<Lesson>,
    #[serde(default)]
    pub sections: Vec<SectionCompact>,
    #[serde(default)]
    pub published: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_draft: bool,
    #[serde(default)]
    pub dirty: bool,
}

impl Course {
    pub fn meta(&self) -> CourseMeta {
        CourseMeta {
            title: self.title.clone(),
            description: self.description.clone(),
            thumbnail: self.thumbnail.clone(),
            instructor: self.instructor.clone(),
            category: self.category.clone(),
            level: self.level.clone(),
            duration: self.duration.clone(),
        }
    }

    pub fn apply_meta(&mut self, meta: CourseMeta) {
        self.title = meta.title;
        self.description = meta.description;
        self.thumbnail = meta.thumbnail;
        self.instructor = meta.instructor;
        self.category = meta.category;
        self.level = meta.level;
        self.duration = meta.duration;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub blocks: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    #[default]
    Paragraph,
    Heading,
    Image,
    Code,
    Quote,
    List,
    Divider,
    Video,
    Embed,
    Quiz,
    Table,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Paragraph => "paragraph",
            BlockKind::Heading => "heading",
            BlockKind::Image => "image",
            BlockKind::Code => "code",
            BlockKind::Quote => "quote",
            BlockKind::List => "list",
            BlockKind::Divider => "divider",
            BlockKind::Video => "video",
            BlockKind::Embed => "embed",
            BlockKind::Quiz => "quiz",
            BlockKind::Table => "table",
        }
    }
}

/// One content block inside a lesson.
///
/// Interactive kinds (quizzes, tables, multi-file code) keep their structure in
/// `payload`; `value` holds the plain-text rendering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: BlockKind,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub style: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub src: Option<String>,
    #[serde(default)]
    pub alt: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummarySource {
    Registry,
    Metadata,
    Drive,
}

/// Listing row: compact metadata only, never lesson content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseSummary {
    pub id: String,
    #[serde(flatten)]
    pub meta: CourseMeta,
    pub section_count: usize,
    pub is_published: bool,
    pub has_draft: bool,
    pub pending_sync: bool,
    pub updated_at: Option<DateTime<Utc>>,
    pub source: SummarySource,
}
