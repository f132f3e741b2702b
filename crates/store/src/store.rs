//! The session store proper.

use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};

use univoice_core::{
    FinalReport, HistoryBlock, Language, SessionMetadata, SessionRecord, Summary, VocabularyItem,
};

use crate::paths::{
    course_dir, parse_session_dir_name, sanitize_course_name, HISTORY_FILE, METADATA_FILE,
    REPORT_FILE, SUMMARY_FILE, VOCABULARY_FILE,
};
use crate::StoreError;

#[derive(Debug, Clone)]
pub struct StartSessionParams {
    pub course_name: String,
    pub source_language: Language,
    pub target_language: Language,
    /// Explicit number; otherwise the next free number for course+today.
    pub session_number: Option<u32>,
}

struct ActiveSession {
    dir: PathBuf,
    record: SessionRecord,
}

/// Single-writer store for one pipeline process. Readers elsewhere see only
/// atomic snapshots produced by rename.
pub struct SessionStore {
    root: PathBuf,
    active: Option<ActiveSession>,
}

impl SessionStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root, active: None }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn has_active_session(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_metadata(&self) -> Option<&SessionMetadata> {
        self.active.as_ref().map(|a| &a.record.metadata)
    }

    /// Create a new session directory and write its initial metadata.
    pub async fn start_session(
        &mut self,
        params: StartSessionParams,
    ) -> Result<SessionMetadata, StoreError> {
        let today = Utc::now().date_naive();
        let session_number = match params.session_number {
            Some(n) => n,
            None => self.next_session_number(&params.course_name, today)?,
        };

        let metadata = SessionMetadata {
            course_name: params.course_name.clone(),
            date: today,
            session_number,
            source_language: params.source_language,
            target_language: params.target_language,
            started_at: Utc::now(),
            ended_at: None,
            elapsed_ms: 0,
            total_word_count: 0,
        };

        let dir = course_dir(&self.root, &params.course_name).join(metadata.dir_name());
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let record = SessionRecord {
            metadata: metadata.clone(),
            history_blocks: Vec::new(),
            summaries: Vec::new(),
            final_report: None,
            vocabulary: None,
        };

        write_json_atomic(&dir.join(METADATA_FILE), &record.metadata).await?;
        write_json_atomic(&dir.join(HISTORY_FILE), &record.history_blocks).await?;
        write_json_atomic(&dir.join(SUMMARY_FILE), &record.summaries).await?;

        tracing::info!(
            course = %metadata.course_name,
            session = %metadata.dir_name(),
            "session started"
        );
        self.active = Some(ActiveSession { dir, record });
        Ok(metadata)
    }

    /// Rehydrate an existing session (same-day resume) as the active one.
    pub async fn resume_session(
        &mut self,
        metadata: &SessionMetadata,
    ) -> Result<SessionRecord, StoreError> {
        let record = self.load_session(
            &metadata.course_name,
            metadata.date,
            metadata.session_number,
        )?;
        let dir = course_dir(&self.root, &metadata.course_name).join(metadata.dir_name());
        tracing::info!(
            course = %metadata.course_name,
            session = %metadata.dir_name(),
            blocks = record.history_blocks.len(),
            summaries = record.summaries.len(),
            "session resumed"
        );
        self.active = Some(ActiveSession {
            dir,
            record: record.clone(),
        });
        Ok(record)
    }

    /// Append (or upgrade in place, when the block id already exists) and
    /// persist the whole history array atomically.
    pub async fn append_history_block(&mut self, block: HistoryBlock) -> Result<(), StoreError> {
        let active = self.active.as_mut().ok_or(StoreError::NoActiveSession)?;
        match active
            .record
            .history_blocks
            .iter_mut()
            .find(|b| b.id == block.id)
        {
            Some(existing) => *existing = block,
            None => active.record.history_blocks.push(block),
        }
        write_json_atomic(&active.dir.join(HISTORY_FILE), &active.record.history_blocks).await
    }

    pub async fn append_summary(&mut self, summary: Summary) -> Result<(), StoreError> {
        let active = self.active.as_mut().ok_or(StoreError::NoActiveSession)?;
        active.record.summaries.push(summary);
        write_json_atomic(&active.dir.join(SUMMARY_FILE), &active.record.summaries).await
    }

    /// Persist the final artifacts. Either may be absent; present ones are
    /// written atomically like everything else. The report's word count is
    /// stamped into the session metadata so a reload reconstructs it.
    pub async fn finalize(
        &mut self,
        final_report: Option<FinalReport>,
        vocabulary: Option<Vec<VocabularyItem>>,
    ) -> Result<(), StoreError> {
        let active = self.active.as_mut().ok_or(StoreError::NoActiveSession)?;
        if let Some(vocabulary) = vocabulary {
            write_json_atomic(&active.dir.join(VOCABULARY_FILE), &vocabulary).await?;
            active.record.vocabulary = Some(vocabulary);
        }
        if let Some(report) = final_report {
            write_bytes_atomic(&active.dir.join(REPORT_FILE), report.report.as_bytes()).await?;
            active.record.metadata.total_word_count = report.total_word_count;
            write_json_atomic(&active.dir.join(METADATA_FILE), &active.record.metadata).await?;
            active.record.final_report = Some(report);
        }
        Ok(())
    }

    /// Update accumulated listening time on the active session metadata.
    pub async fn save_elapsed(&mut self, elapsed_ms: u64) -> Result<(), StoreError> {
        let active = self.active.as_mut().ok_or(StoreError::NoActiveSession)?;
        active.record.metadata.elapsed_ms = elapsed_ms;
        write_json_atomic(&active.dir.join(METADATA_FILE), &active.record.metadata).await
    }

    /// Stamp the end time, flush metadata, and release the active session.
    pub async fn end_session(&mut self) -> Result<Option<SessionRecord>, StoreError> {
        let Some(mut active) = self.active.take() else {
            return Ok(None);
        };
        active.record.metadata.ended_at = Some(Utc::now());
        write_json_atomic(&active.dir.join(METADATA_FILE), &active.record.metadata).await?;
        tracing::info!(session = %active.record.metadata.dir_name(), "session ended");
        Ok(Some(active.record))
    }

    /// Newest session for the course today, if any.
    pub fn check_today_session(
        &self,
        course_name: &str,
    ) -> Result<Option<SessionMetadata>, StoreError> {
        let today = Utc::now().date_naive();
        let dir = course_dir(&self.root, course_name);
        if !dir.exists() {
            return Ok(None);
        }

        let mut newest: Option<(u32, SessionMetadata)> = None;
        for entry in fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))? {
            let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
            let name = entry.file_name();
            let Some((date, number)) = name.to_str().and_then(parse_session_dir_name) else {
                continue;
            };
            if date != today {
                continue;
            }
            if newest.as_ref().is_some_and(|(n, _)| *n >= number) {
                continue;
            }
            let metadata = read_json::<SessionMetadata>(&entry.path().join(METADATA_FILE))?;
            newest = Some((number, metadata));
        }
        Ok(newest.map(|(_, metadata)| metadata))
    }

    /// All known sessions, newest first, optionally filtered and limited.
    pub fn list_available_sessions(
        &self,
        course_name: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<SessionMetadata>, StoreError> {
        let mut sessions = Vec::new();

        let course_dirs: Vec<PathBuf> = match course_name {
            Some(course) => vec![course_dir(&self.root, course)],
            None => {
                if !self.root.exists() {
                    return Ok(Vec::new());
                }
                fs::read_dir(&self.root)
                    .map_err(|e| StoreError::io(&self.root, e))?
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.is_dir())
                    .collect()
            }
        };

        for dir in course_dirs {
            if !dir.exists() {
                continue;
            }
            for entry in fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))? {
                let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
                let name = entry.file_name();
                if name.to_str().and_then(parse_session_dir_name).is_none() {
                    continue;
                }
                match read_json::<SessionMetadata>(&entry.path().join(METADATA_FILE)) {
                    Ok(metadata) => sessions.push(metadata),
                    Err(e) => tracing::warn!("skipping unreadable session {:?}: {e}", entry.path()),
                }
            }
        }

        sessions.sort_by(|a, b| {
            (b.date, b.session_number).cmp(&(a.date, a.session_number))
        });
        if let Some(limit) = limit {
            sessions.truncate(limit);
        }
        Ok(sessions)
    }

    /// Load a full session record from disk.
    pub fn load_session(
        &self,
        course_name: &str,
        date: chrono::NaiveDate,
        session_number: u32,
    ) -> Result<SessionRecord, StoreError> {
        let dir = course_dir(&self.root, course_name)
            .join(format!("{}_{}", date.format("%Y%m%d"), session_number));
        if !dir.exists() {
            return Err(StoreError::NotFound(format!(
                "{}/{}_{}",
                sanitize_course_name(course_name),
                date.format("%Y%m%d"),
                session_number
            )));
        }

        let metadata = read_json::<SessionMetadata>(&dir.join(METADATA_FILE))?;
        let history_blocks =
            read_json_or_default::<Vec<HistoryBlock>>(&dir.join(HISTORY_FILE))?;
        let summaries = read_json_or_default::<Vec<Summary>>(&dir.join(SUMMARY_FILE))?;
        let vocabulary = read_json_optional::<Vec<VocabularyItem>>(&dir.join(VOCABULARY_FILE))?;

        let report_path = dir.join(REPORT_FILE);
        let final_report = if report_path.exists() {
            let report = fs::read_to_string(&report_path)
                .map_err(|e| StoreError::io(&report_path, e))?;
            Some(FinalReport {
                report,
                total_word_count: metadata.total_word_count,
                summary_count: summaries.len(),
                vocabulary_count: vocabulary.as_ref().map(|v| v.len()).unwrap_or(0),
            })
        } else {
            None
        };

        Ok(SessionRecord {
            metadata,
            history_blocks,
            summaries,
            final_report,
            vocabulary,
        })
    }

    fn next_session_number(
        &self,
        course_name: &str,
        date: chrono::NaiveDate,
    ) -> Result<u32, StoreError> {
        let dir = course_dir(&self.root, course_name);
        if !dir.exists() {
            return Ok(1);
        }
        let mut max = 0;
        for entry in fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))? {
            let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
            if let Some((d, n)) = entry.file_name().to_str().and_then(parse_session_dir_name) {
                if d == date {
                    max = max.max(n);
                }
            }
        }
        Ok(max + 1)
    }
}

/// Write JSON by serializing to a temp file in the target directory and
/// renaming over the destination. Rename on the same filesystem is atomic,
/// so readers and crash recovery only ever see complete snapshots.
async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| StoreError::Corrupt {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    write_bytes_atomic(path, &bytes).await
}

async fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let path = path.to_path_buf();
    let bytes = bytes.to_vec();
    tokio::task::spawn_blocking(move || {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StoreError::io(&path, e))?;
        use std::io::Write;
        tmp.write_all(&bytes).map_err(|e| StoreError::io(&path, e))?;
        tmp.as_file().sync_all().map_err(|e| StoreError::io(&path, e))?;
        tmp.persist(&path)
            .map_err(|e| StoreError::io(&path, e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| StoreError::Corrupt {
        path: "atomic write task".to_string(),
        reason: e.to_string(),
    })?
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let bytes = fs::read(path).map_err(|e| StoreError::io(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn read_json_or_default<T: serde::de::DeserializeOwned + Default>(
    path: &Path,
) -> Result<T, StoreError> {
    if !path.exists() {
        return Ok(T::default());
    }
    read_json(path)
}

fn read_json_optional<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    read_json(path).map(Some)
}
