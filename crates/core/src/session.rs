//! Session records persisted by the durable store.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::history::{FinalReport, HistoryBlock, Summary, VocabularyItem};
use crate::language::Language;

/// Identity and lifecycle of a recording session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub course_name: String,
    /// Local calendar date the session belongs to.
    pub date: NaiveDate,
    /// 1-based, auto-incremented per course+day.
    pub session_number: u32,
    pub source_language: Language,
    pub target_language: Language,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Accumulated listening time, surviving same-day resume.
    #[serde(default)]
    pub elapsed_ms: u64,
    /// Cumulative finalized source words, stamped when the final report is
    /// written so a reloaded report keeps its true word count.
    #[serde(default)]
    pub total_word_count: usize,
}

impl SessionMetadata {
    /// Directory name under the course folder: `<YYYYMMDD>_<n>`.
    pub fn dir_name(&self) -> String {
        format!("{}_{}", self.date.format("%Y%m%d"), self.session_number)
    }
}

/// Everything the store holds for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub metadata: SessionMetadata,
    #[serde(default)]
    pub history_blocks: Vec<HistoryBlock>,
    #[serde(default)]
    pub summaries: Vec<Summary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_report: Option<FinalReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vocabulary: Option<Vec<VocabularyItem>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_name_format() {
        let meta = SessionMetadata {
            course_name: "Math".into(),
            date: NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
            session_number: 2,
            source_language: Language::parse("en").unwrap(),
            target_language: Language::parse("ja").unwrap(),
            started_at: Utc::now(),
            ended_at: None,
            elapsed_ms: 0,
            total_word_count: 0,
        };
        assert_eq!(meta.dir_name(), "20260801_2");
    }
}
