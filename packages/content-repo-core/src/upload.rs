//! Upload field values and the storage driver collaborator.

use serde::{Deserialize, Serialize};

/// Visibility of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

/// Stored tuple of an upload field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadValue {
    /// Storage key
    pub key: String,
    pub filename: String,
    /// Size in bytes
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub visibility: Visibility,
}

/// File storage collaborator; materializes URLs at read time.
pub trait StorageDriver: Send + Sync {
    /// Returns the URL for a stored key, or `None` if it has none.
    fn url(&self, key: &str, visibility: Visibility) -> Option<String>;
}

/// Driver serving public files under a fixed base URL.
#[derive(Debug, Clone)]
pub struct PublicUrlDriver {
    base_url: String,
}

impl PublicUrlDriver {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl StorageDriver for PublicUrlDriver {
    fn url(&self, key: &str, visibility: Visibility) -> Option<String> {
        match visibility {
            Visibility::Public => Some(format!("{}/{}", self.base_url, key.trim_start_matches('/'))),
            Visibility::Private => None,
        }
    }
}
