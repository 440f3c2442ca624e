pub mod compact;
pub mod course;
pub mod document;
pub mod pointer;

pub use compact::{BlockCompact, CourseBlob, CourseMeta, LessonCompact, SectionCompact};
pub use course::{BlockKind, ContentBlock, Course, CourseSummary, Lesson, SummarySource};
pub use document::{CourseDocument, LegacySnapshot, LocalRegistryEntry, StorageKind};
pub use pointer::{Pointer, PointerSlot};
