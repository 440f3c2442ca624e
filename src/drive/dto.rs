use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    #[serde(default)]
    pub files: Vec<FileResource>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FileResource {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFileRequest<'a> {
    pub name: &'a str,
    pub mime_type: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<&'a str>,
}
