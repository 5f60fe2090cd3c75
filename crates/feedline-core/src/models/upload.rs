use serde::{Deserialize, Serialize};

/// A file received with a create-feed request, already validated by the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingFile {
    pub original_filename: String,
    pub content_type: String,
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl IncomingFile {
    pub fn new(
        original_filename: impl Into<String>,
        content_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            original_filename: original_filename.into(),
            content_type: content_type.into(),
            data,
        }
    }

    /// Extension of the original filename, without the dot.
    pub fn extension(&self) -> Option<&str> {
        std::path::Path::new(&self.original_filename)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty())
    }
}
