//! Course <-> CourseBlob conversion.
//!
//! Lessons and blocks are normalized into ID-keyed maps so that an edit to one
//! block only changes that block's entry. Blocks without an ID are keyed by a
//! hash of their content, which keeps unchanged content on the same ID across
//! saves and stores duplicated blocks once.
//!
//! Every block field round-trips, including the structured `payload` of
//! interactive blocks. Fields that live outside the blob (`published`,
//! timestamps, `is_draft`, `dirty`) come back as defaults and are filled in by
//! the caller.

use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::CodecError;
use crate::models::compact::BLOB_SCHEMA_VERSION;
use crate::models::{
    BlockCompact, ContentBlock, Course, CourseBlob, CourseMeta, Lesson, LessonCompact,
    SectionCompact,
};

const ID_HASH_LEN: usize = 12;

pub fn encode(course: &Course) -> (CourseBlob, CourseMeta, Vec<SectionCompact>) {
    let mut blob = CourseBlob::default();

    for (index, lesson) in course.lessons.iter().enumerate() {
        let mut lesson_id = if lesson.id.is_empty() {
            lesson_id_for(index, &lesson.title)
        } else {
            lesson.id.clone()
        };
        if blob.lessons.contains_key(&lesson_id) {
            lesson_id = format!("{}-{}", lesson_id, index);
        }

        let mut block_ids = Vec::with_capacity(lesson.blocks.len());
        for block in &lesson.blocks {
            let compact = compact_block(block);
            let id = match blob.blocks.get(&compact.id) {
                Some(existing) if *existing != compact => {
                    // Explicit ID reused for different content.
                    let mut renamed = compact.clone();
                    renamed.id = content_id(block);
                    let id = renamed.id.clone();
                    blob.blocks.insert(id.clone(), renamed);
                    id
                }
                _ => {
                    let id = compact.id.clone();
                    blob.blocks.insert(id.clone(), compact);
                    id
                }
            };
            block_ids.push(id);
        }

        blob.lesson_order.push(lesson_id.clone());
        blob.lessons.insert(
            lesson_id.clone(),
            LessonCompact {
                id: lesson_id,
                title: lesson.title.clone(),
                duration: lesson.duration.clone(),
                block_ids,
            },
        );
    }

    (blob, course.meta(), course.sections.clone())
}

pub fn decode(
    id: &str,
    meta: CourseMeta,
    sections: Vec<SectionCompact>,
    blob: &CourseBlob,
) -> Result<Course, CodecError> {
    if blob.v > BLOB_SCHEMA_VERSION {
        return Err(CodecError::UnsupportedVersion {
            found: blob.v,
            supported: BLOB_SCHEMA_VERSION,
        });
    }

    let mut order = blob.lesson_order.clone();
    // Lessons present in the map but missing from the order list go last.
    for lesson_id in blob.lessons.keys() {
        if !order.contains(lesson_id) {
            order.push(lesson_id.clone());
        }
    }

    let mut lessons = Vec::with_capacity(order.len());
    for lesson_id in &order {
        let compact = blob
            .lessons
            .get(lesson_id)
            .ok_or_else(|| CodecError::Malformed(format!("lesson order names unknown lesson {}", lesson_id)))?;

        let mut blocks = Vec::with_capacity(compact.block_ids.len());
        for block_id in &compact.block_ids {
            let block = blob.blocks.get(block_id).ok_or_else(|| CodecError::MissingBlock {
                lesson: lesson_id.clone(),
                block: block_id.clone(),
            })?;
            blocks.push(expand_block(block));
        }

        lessons.push(Lesson {
            id: compact.id.clone(),
            title: compact.title.clone(),
            duration: compact.duration.clone(),
            blocks,
        });
    }

    let mut course = Course {
        id: id.to_string(),
        lessons,
        sections,
        ..Default::default()
    };
    course.apply_meta(meta);
    Ok(course)
}

pub fn to_bytes(blob: &CourseBlob) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(blob)?)
}

/// Parses stored bytes, upgrading older schema versions first.
pub fn from_bytes(bytes: &[u8]) -> Result<CourseBlob, CodecError> {
    let raw: Value = serde_json::from_slice(bytes)?;
    let migrated = migrate(raw)?;
    Ok(serde_json::from_value(migrated)?)
}

/// Brings a raw blob up to the current schema version.
///
/// Version 1 had no `lesson_order`; lessons carried a numeric `position`
/// instead. A missing `v` is read as version 1.
pub fn migrate(mut raw: Value) -> Result<Value, CodecError> {
    let object = raw
        .as_object_mut()
        .ok_or_else(|| CodecError::Malformed("blob is not a JSON object".to_string()))?;

    let version = match object.get("v") {
        None => 1,
        Some(v) => {
            let raw = v
                .as_u64()
                .ok_or_else(|| CodecError::Malformed("blob version is not an integer".to_string()))?;
            u32::try_from(raw).map_err(|_| CodecError::UnsupportedVersion {
                found: u32::MAX,
                supported: BLOB_SCHEMA_VERSION,
            })?
        }
    };

    if version > BLOB_SCHEMA_VERSION {
        return Err(CodecError::UnsupportedVersion {
            found: version,
            supported: BLOB_SCHEMA_VERSION,
        });
    }

    if version < 2 {
        let mut positioned: Vec<(u64, String)> = Vec::new();
        if let Some(Value::Object(lessons)) = object.get_mut("lessons") {
            for (lesson_id, lesson) in lessons.iter_mut() {
                let position = lesson
                    .as_object_mut()
                    .and_then(|l| l.remove("position"))
                    .and_then(|p| p.as_u64())
                    .unwrap_or(u64::MAX);
                positioned.push((position, lesson_id.clone()));
            }
        }
        positioned.sort();
        let order: Vec<Value> = positioned.into_iter().map(|(_, id)| Value::String(id)).collect();
        object.insert("lesson_order".to_string(), Value::Array(order));
        object.insert("v".to_string(), Value::from(2));
    }

    Ok(raw)
}

/// SHA-256 hex digest, used for content hashes and derived IDs.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn lesson_id_for(index: usize, title: &str) -> String {
    let digest = sha256_hex(format!("{}:{}", index, title).as_bytes());
    format!("l_{}", &digest[..ID_HASH_LEN])
}

fn content_id(block: &ContentBlock) -> String {
    let fingerprint = serde_json::json!([
        block.kind.as_str(),
        block.value,
        block.style,
        block.src,
        block.alt,
        block.language,
        block.payload,
    ]);
    let digest = sha256_hex(fingerprint.to_string().as_bytes());
    format!("b_{}", &digest[..ID_HASH_LEN])
}

fn compact_block(block: &ContentBlock) -> BlockCompact {
    BlockCompact {
        id: block
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| content_id(block)),
        kind: block.kind,
        value: block.value.clone(),
        style: block.style.clone().filter(|s: &BTreeMap<String, String>| !s.is_empty()),
        src: block.src.clone(),
        alt: block.alt.clone(),
        language: block.language.clone(),
        payload: block.payload.clone(),
    }
}

fn expand_block(block: &BlockCompact) -> ContentBlock {
    ContentBlock {
        id: Some(block.id.clone()),
        kind: block.kind,
        value: block.value.clone(),
        style: block.style.clone(),
        src: block.src.clone(),
        alt: block.alt.clone(),
        language: block.language.clone(),
        payload: block.payload.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BlockKind;

    fn block(id: &str, kind: BlockKind, value: &str) -> ContentBlock {
        ContentBlock {
            id: Some(id.to_string()),
            kind,
            value: value.to_string(),
            ..Default::default()
        }
    }

    fn sample_course() -> Course {
        let mut style = BTreeMap::new();
        style.insert("align".to_string(), "center".to_string());

        Course {
            id: "c1".to_string(),
            title: "Intro".to_string(),
            description: "Basics".to_string(),
            instructor: "Sato".to_string(),
            thumbnail: Some("https://img.example/c1.png".to_string()),
            category: "programming".to_string(),
            level: "beginner".to_string(),
            duration: "2h".to_string(),
            lessons: vec![
                Lesson {
                    id: "l1".to_string(),
                    title: "Hello".to_string(),
                    duration: Some("10m".to_string()),
                    blocks: vec![
                        block("b1", BlockKind::Paragraph, "Hello"),
                        ContentBlock {
                            style: Some(style),
                            ..block("b2", BlockKind::Heading, "Welcome")
                        },
                        ContentBlock {
                            src: Some("https://img.example/a.png".to_string()),
                            alt: Some("diagram".to_string()),
                            ..block("b3", BlockKind::Image, "")
                        },
                    ],
                },
                Lesson {
                    id: "l2".to_string(),
                    title: "Practice".to_string(),
                    duration: None,
                    blocks: vec![
                        ContentBlock {
                            language: Some("rust".to_string()),
                            ..block("b4", BlockKind::Code, "fn main() {}")
                        },
                        ContentBlock {
                            payload: Some(serde_json::json!({
                                "question": "2 + 2?",
                                "options": ["3", "4"],
                                "answer": 1
                            })),
                            ..block("b5", BlockKind::Quiz, "2 + 2?")
                        },
                    ],
                },
            ],
            sections: vec![SectionCompact {
                id: "s1".to_string(),
                title: "Part 1".to_string(),
                lesson_ids: vec!["l1".to_string(), "l2".to_string()],
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_round_trip_preserves_content() {
        let course = sample_course();
        let (blob, meta, sections) = encode(&course);
        let decoded = decode("c1", meta, sections, &blob).expect("decode failed");
        assert_eq!(decoded, course);
    }

    #[test]
    fn test_round_trip_drops_fields_outside_blob() {
        let mut course = sample_course();
        course.published = true;
        course.is_draft = true;
        course.dirty = true;
        course.created_at = Some(chrono::Utc::now());
        course.updated_at = Some(chrono::Utc::now());

        let (blob, meta, sections) = encode(&course);
        let decoded = decode("c1", meta, sections, &blob).expect("decode failed");

        assert!(!decoded.published);
        assert!(!decoded.is_draft);
        assert!(!decoded.dirty);
        assert!(decoded.created_at.is_none());
        assert!(decoded.updated_at.is_none());
        assert_eq!(decoded.lessons, course.lessons);
    }

    #[test]
    fn test_unchanged_content_keeps_ids_and_bytes() {
        let mut course = sample_course();
        for lesson in &mut course.lessons {
            lesson.id.clear();
            for b in &mut lesson.blocks {
                b.id = None;
            }
        }

        let (first, _, _) = encode(&course);
        let (second, _, _) = encode(&course);
        assert_eq!(to_bytes(&first).unwrap(), to_bytes(&second).unwrap());

        course.lessons[1].blocks[0].value = "fn main() { println!(\"hi\"); }".to_string();
        let (edited, _, _) = encode(&course);
        let changed: Vec<_> = edited
            .blocks
            .keys()
            .filter(|id| !first.blocks.contains_key(*id))
            .collect();
        assert_eq!(changed.len(), 1);
        assert_eq!(edited.lesson_order, first.lesson_order);
    }

    #[test]
    fn test_identical_blocks_are_stored_once() {
        let mut course = sample_course();
        let divider = ContentBlock {
            kind: BlockKind::Divider,
            ..Default::default()
        };
        course.lessons[0].blocks = vec![divider.clone(), divider];

        let (blob, _, _) = encode(&course);
        let lesson = &blob.lessons["l1"];
        assert_eq!(lesson.block_ids.len(), 2);
        assert_eq!(lesson.block_ids[0], lesson.block_ids[1]);
        assert!(lesson.block_ids[0].starts_with("b_"));
    }

    #[test]
    fn test_reused_explicit_id_does_not_overwrite_content() {
        let mut course = sample_course();
        course.lessons[1].blocks[0].id = Some("b1".to_string());

        let (blob, meta, sections) = encode(&course);
        let decoded = decode("c1", meta, sections, &blob).expect("decode failed");
        assert_eq!(decoded.lessons[0].blocks[0].value, "Hello");
        assert_eq!(decoded.lessons[1].blocks[0].value, "fn main() {}");
    }

    #[test]
    fn test_decode_rejects_missing_block() {
        let (mut blob, meta, sections) = encode(&sample_course());
        blob.blocks.remove("b1");
        let err = decode("c1", meta, sections, &blob).unwrap_err();
        assert!(matches!(err, CodecError::MissingBlock { .. }));
    }

    #[test]
    fn test_migrates_version_one_blob() {
        let raw = serde_json::json!({
            "v": 1,
            "lessons": {
                "b-lesson": { "id": "b-lesson", "title": "Second", "position": 1, "block_ids": ["x"] },
                "a-lesson": { "id": "a-lesson", "title": "First", "position": 0, "block_ids": [] }
            },
            "blocks": {
                "x": { "id": "x", "type": "paragraph", "value": "text" }
            }
        });
        let blob = from_bytes(raw.to_string().as_bytes()).expect("migration failed");
        assert_eq!(blob.v, BLOB_SCHEMA_VERSION);
        assert_eq!(blob.lesson_order, vec!["a-lesson".to_string(), "b-lesson".to_string()]);

        let course = decode("c9", CourseMeta::default(), Vec::new(), &blob).unwrap();
        assert_eq!(course.lessons[0].title, "First");
        assert_eq!(course.lessons[1].blocks[0].value, "text");
    }

    #[test]
    fn test_rejects_future_version() {
        let raw = serde_json::json!({ "v": 99, "lessons": {}, "blocks": {} });
        let err = from_bytes(raw.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedVersion { found: 99, .. }));
    }

    #[test]
    fn test_rejects_version_beyond_u32() {
        let raw = serde_json::json!({ "v": 4_294_967_297u64, "lessons": {}, "blocks": {} });
        let err = from_bytes(raw.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedVersion { .. }));
    }
}
