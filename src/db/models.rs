use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Folder {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub documents: Vec<Document>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParseStatus {
    Success,
    Failed,
    Pending,
}

impl ParseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseStatus::Success => "success",
            ParseStatus::Failed => "failed",
            ParseStatus::Pending => "pending",
        }
    }
}

impl FromStr for ParseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(ParseStatus::Success),
            "failed" => Ok(ParseStatus::Failed),
            "pending" => Ok(ParseStatus::Pending),
            other => Err(format!("unknown parse status: {}", other)),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub folder_id: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: Option<i64>,
    pub storage_path: Option<String>,
    pub content: String,
    pub parse_status: ParseStatus,
    pub parse_error: Option<String>,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub created_at: String,
}

impl Document {
    /// Whether this document can contribute text to a chat context.
    pub fn is_usable(&self) -> bool {
        self.parse_status == ParseStatus::Success && !self.content.is_empty()
    }
}

/// Fields needed to insert a document row.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub folder_id: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: Option<i64>,
    pub storage_path: Option<String>,
    pub content: String,
    pub parse_status: ParseStatus,
    pub parse_error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub provider: String,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// One web source a search-grounded provider cited.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct GroundingChunk {
    pub uri: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct GroundingMetadata {
    pub chunks: Vec<GroundingChunk>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub web_search_queries: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub sources: Option<GroundingMetadata>,
    pub created_at: String,
}

/// Counts shown in the sidebar. `storage_bytes` sums the recorded upload sizes.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStats {
    pub folder_count: i64,
    pub document_count: i64,
    pub storage_bytes: i64,
    pub conversation_count: i64,
}
