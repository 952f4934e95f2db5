use crate::domain::models::EffectiveRange;
use crate::infrastructure::error::InfraError;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait EnforcementSink: Send + Sync {
    fn update(&self, payload: &str) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct FileEnforcementSink {
    path: PathBuf,
}

impl FileEnforcementSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_ranges(&self) -> Result<Vec<EffectiveRange>, InfraError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

impl EnforcementSink for FileEnforcementSink {
    fn update(&self, payload: &str) -> Result<(), InfraError> {
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, payload)
            .map_err(|error| InfraError::Sink(format!("failed writing {}: {error}", staging.display())))?;
        fs::rename(&staging, &self.path).map_err(|error| {
            InfraError::Sink(format!("failed publishing {}: {error}", self.path.display()))
        })
    }
}

#[derive(Debug, Default)]
pub struct InMemoryEnforcementSink {
    payloads: Mutex<Vec<String>>,
}

impl InMemoryEnforcementSink {
    pub fn payloads(&self) -> Result<Vec<String>, InfraError> {
        let payloads = self
            .payloads
            .lock()
            .map_err(|error| InfraError::Sink(format!("sink lock poisoned: {error}")))?;
        Ok(payloads.clone())
    }

    pub fn last_ranges(&self) -> Result<Option<Vec<EffectiveRange>>, InfraError> {
        let payloads = self.payloads()?;
        payloads
            .last()
            .map(|raw| serde_json::from_str(raw).map_err(InfraError::from))
            .transpose()
    }
}

impl EnforcementSink for InMemoryEnforcementSink {
    fn update(&self, payload: &str) -> Result<(), InfraError> {
        let mut payloads = self
            .payloads
            .lock()
            .map_err(|error| InfraError::Sink(format!("sink lock poisoned: {error}")))?;
        payloads.push(payload.to_string());
        Ok(())
    }
}
