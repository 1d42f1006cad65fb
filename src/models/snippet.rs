//! Snippet model

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unit of source code to run on a named kernel pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snippet {
    /// Execution identifier, used as the request message id
    pub id: Uuid,
    /// Pool name (lowercase)
    pub kernel: String,
    /// Source code
    pub source: String,
}

impl Snippet {
    pub fn new(kernel: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kernel: kernel.into().to_lowercase(),
            source: source.into(),
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }
}
