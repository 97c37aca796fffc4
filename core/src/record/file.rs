use std::io::ErrorKind;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;
use sha2::Digest;
use sha2::Sha256;
use tempfile::NamedTempFile;

use super::ExecutionOutcome;
use super::ExecutionRecord;
use super::RecordStore;
use crate::errors::RecordError;
use crate::session::SessionId;

/// One JSON document per session under `dir`. File names are the SHA-256 of
/// the session id so arbitrary ids never escape the directory.
#[derive(Debug, Clone)]
pub struct FileRecordStore {
    dir: PathBuf,
}

impl FileRecordStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, RecordError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|err| RecordError::io(&dir, err))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, session_id: &SessionId) -> PathBuf {
        let digest = Sha256::digest(session_id.as_str().as_bytes());
        let name: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
        self.dir.join(format!("{name}.json"))
    }
}

fn write_atomically(dir: &Path, path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn record_execution_complete(
        &self,
        session_id: &SessionId,
        outcome: ExecutionOutcome,
    ) -> Result<ExecutionRecord, RecordError> {
        let record = ExecutionRecord::from_outcome(session_id.clone(), outcome);
        let encoded =
            serde_json::to_vec_pretty(&record).map_err(|source| RecordError::Serialization {
                session_id: session_id.clone(),
                source,
            })?;

        let dir = self.dir.clone();
        let path = self.record_path(session_id);
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&dir, &target, &encoded))
            .await
            .map_err(|err| RecordError::Unavailable(format!("record writer task failed: {err}")))?
            .map_err(|err| RecordError::io(&path, err))?;

        tracing::debug!(session_id = %session_id, path = %path.display(), "execution record written");
        Ok(record)
    }

    async fn fetch(&self, session_id: &SessionId) -> Result<Option<ExecutionRecord>, RecordError> {
        let path = self.record_path(session_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(RecordError::io(&path, err)),
        };
        let record = serde_json::from_slice(&bytes).map_err(|source| RecordError::Serialization {
            session_id: session_id.clone(),
            source,
        })?;
        Ok(Some(record))
    }
}
