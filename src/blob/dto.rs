use serde::Deserialize;

/// Envelope every Bot API method answers with.
#[derive(Debug, Deserialize)]
pub struct BotResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    #[serde(default)]
    pub error_code: Option<u16>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub document: Option<Document>,
}

#[derive(Debug, Deserialize)]
pub struct Document {
    pub file_id: String,
    #[serde(default)]
    pub file_unique_id: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct File {
    pub file_id: String,
    #[serde(default)]
    pub file_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_envelope_without_result() {
        let raw = r#"{"ok":false,"error_code":413,"description":"Request Entity Too Large"}"#;
        let response: BotResponse<Message> = serde_json::from_str(raw).unwrap();
        assert!(!response.ok);
        assert!(response.result.is_none());
        assert_eq!(response.error_code, Some(413));
    }

    #[test]
    fn test_file_envelope() {
        let raw = r#"{"ok":true,"result":{"file_id":"f1","file_path":"documents/file_1.json"}}"#;
        let response: BotResponse<File> = serde_json::from_str(raw).unwrap();
        let file = response.result.unwrap();
        assert_eq!(file.file_path.as_deref(), Some("documents/file_1.json"));
    }
}
