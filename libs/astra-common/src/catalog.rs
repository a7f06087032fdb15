use crate::types::Language;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Role a problem file plays; the runner only ever asks for testbenches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FileRole {
    Testbench,
    Template,
    Solution,
}

/// A problem file as stored by the catalog collaborator.
///
/// Either `content` holds the text inline, or `filename` points into the
/// uploads area where the file was stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestbenchRecord {
    pub problem_id: String,
    pub language: Language,
    pub role: FileRole,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

/// Lookup of testbench files by problem and language
#[async_trait]
pub trait TestbenchCatalog: Send + Sync {
    /// Matching testbench records, in catalog order. Empty when nothing matches.
    async fn find_testbenches(
        &self,
        problem_id: &str,
        language: Language,
    ) -> Result<Vec<TestbenchRecord>>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogFile {
    files: Vec<TestbenchRecord>,
}

/// Catalog backed by a JSON export of problem files
#[derive(Debug, Clone, Default)]
pub struct JsonCatalog {
    records: Vec<TestbenchRecord>,
}

impl JsonCatalog {
    pub fn from_records(records: Vec<TestbenchRecord>) -> Self {
        Self { records }
    }

    /// Load `{ "files": [...] }` from disk
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog {}", path.display()))?;
        let file: CatalogFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse catalog {}", path.display()))?;
        Ok(Self { records: file.files })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl TestbenchCatalog for JsonCatalog {
    async fn find_testbenches(
        &self,
        problem_id: &str,
        language: Language,
    ) -> Result<Vec<TestbenchRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|r| {
                r.problem_id == problem_id && r.language == language && r.role == FileRole::Testbench
            })
            .cloned()
            .collect())
    }
}
