//! Context persistence
//!
//! Every successful orchestrated execution leaves a context record behind so
//! later sessions can see what a role did to a project. The store is consumed
//! through a trait; the JSONL implementation here is append-only and its
//! on-disk format is not a contract.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;

/// One orchestrated execution, summarized for later recall.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextRecord {
    pub id: String,
    pub project_name: String,
    pub role_id: String,
    pub service: String,
    pub tool: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

impl ContextRecord {
    pub fn new(
        project_name: impl Into<String>,
        role_id: impl Into<String>,
        service: impl Into<String>,
        tool: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project_name: project_name.into(),
            role_id: role_id.into(),
            service: service.into(),
            tool: tool.into(),
            summary: summary.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContextStore: Send + Sync {
    async fn persist(&self, record: &ContextRecord) -> Result<()>;

    /// Most recent records for a project, newest first.
    async fn recent(&self, project: &str, limit: usize) -> Result<Vec<ContextRecord>>;
}

/// Append-only JSONL store. All mutations append to the file; nothing is
/// overwritten.
pub struct JsonlContextStore {
    path: PathBuf,
}

impl JsonlContextStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl ContextStore for JsonlContextStore {
    async fn persist(&self, record: &ContextRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    async fn recent(&self, project: &str, limit: usize) -> Result<Vec<ContextRecord>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let reader = BufReader::new(file);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<ContextRecord>(trimmed) {
                Ok(record) => {
                    if record.project_name == project {
                        records.push(record);
                    }
                }
                Err(e) => warn!(error = %e, "skipping malformed context line"),
            }
        }
        let start = records.len().saturating_sub(limit);
        let mut recent = records.split_off(start);
        recent.reverse();
        Ok(recent)
    }
}
