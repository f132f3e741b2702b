//! Sentence combiner.
//!
//! Merges consecutive finalized transcript segments into sentence-level
//! units. Emission happens on sentence-terminal punctuation, on a full
//! buffer, on a quiet timeout, or on explicit flush at shutdown. The
//! combiner is a synchronous reactor: the orchestrator is its only caller
//! and routes whatever it returns.

use std::time::{Duration, Instant};

use univoice_config::constants;
use univoice_core::{CombinedSentence, TranscriptSegment};

#[derive(Debug, Clone)]
pub struct CombinerConfig {
    pub max_segments: usize,
    pub min_segments: usize,
    pub timeout: Duration,
}

impl Default for CombinerConfig {
    fn default() -> Self {
        Self {
            max_segments: constants::combiner::MAX_SEGMENTS,
            min_segments: constants::combiner::MIN_SEGMENTS,
            timeout: Duration::from_millis(constants::combiner::TIMEOUT_MS),
        }
    }
}

#[derive(Debug)]
pub struct SentenceCombiner {
    config: CombinerConfig,
    buffer: Vec<TranscriptSegment>,
    last_arrival: Option<Instant>,
    next_id: u64,
}

impl SentenceCombiner {
    pub fn new(config: CombinerConfig) -> Self {
        Self {
            config,
            buffer: Vec::new(),
            last_arrival: None,
            next_id: 1,
        }
    }

    pub fn pending_segments(&self) -> usize {
        self.buffer.len()
    }

    /// Append a finalized segment. Non-final or empty segments are ignored.
    /// Returns a sentence when an emission rule fires.
    pub fn add_segment(&mut self, segment: TranscriptSegment) -> Option<CombinedSentence> {
        if !segment.is_final {
            tracing::debug!(id = %segment.id, "combiner ignoring non-final segment");
            return None;
        }
        if segment.is_empty() {
            return None;
        }

        self.buffer.push(segment);
        self.last_arrival = Some(Instant::now());

        let ends_sentence = self
            .buffer
            .last()
            .map(|seg| {
                seg.text
                    .trim_end()
                    .chars()
                    .last()
                    .is_some_and(|c| constants::combiner::TERMINAL_PUNCTUATION.contains(&c))
            })
            .unwrap_or(false);

        if (ends_sentence || self.buffer.len() >= self.config.max_segments)
            && self.buffer.len() >= self.config.min_segments
        {
            return Some(self.emit());
        }
        None
    }

    /// Timeout rule: emit when no new segment arrived for the configured
    /// quiet period. Driven by the orchestrator's tick.
    pub fn check_timeout(&mut self, now: Instant) -> Option<CombinedSentence> {
        let last = self.last_arrival?;
        if self.buffer.len() >= self.config.min_segments
            && now.duration_since(last) >= self.config.timeout
        {
            return Some(self.emit());
        }
        None
    }

    /// Shutdown flush: emit whatever is buffered regardless of size.
    pub fn force_emit(&mut self) -> Option<CombinedSentence> {
        if self.buffer.is_empty() {
            return None;
        }
        Some(self.emit())
    }

    fn emit(&mut self) -> CombinedSentence {
        let segments = std::mem::take(&mut self.buffer);
        self.last_arrival = None;

        let id = format!("combined_{}", self.next_id);
        self.next_id += 1;

        let source_text = segments
            .iter()
            .map(|s| s.text.trim())
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string();

        CombinedSentence {
            id,
            segment_ids: segments.iter().map(|s| s.id.clone()).collect(),
            source_text,
            start_ms: segments.first().map(|s| s.start_ms).unwrap_or(0),
            end_ms: segments.last().map(|s| s.end_ms).unwrap_or(0),
            segment_count: segments.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use univoice_core::Language;

    fn segment(id: &str, text: &str, start_ms: u64, end_ms: u64) -> TranscriptSegment {
        TranscriptSegment {
            id: id.to_string(),
            text: text.to_string(),
            is_final: true,
            confidence: 0.95,
            start_ms,
            end_ms,
            language: Language::parse("en").unwrap(),
        }
    }

    fn combiner() -> SentenceCombiner {
        SentenceCombiner::new(CombinerConfig::default())
    }

    #[test]
    fn emits_on_terminal_punctuation() {
        let mut c = combiner();
        assert!(c.add_segment(segment("s1", "the quick brown", 0, 500)).is_none());
        let sentence = c.add_segment(segment("s2", "fox jumps.", 500, 1000)).unwrap();
        assert_eq!(sentence.source_text, "the quick brown fox jumps.");
        assert_eq!(sentence.segment_ids, vec!["s1", "s2"]);
        assert_eq!(sentence.segment_count, 2);
        assert_eq!(sentence.start_ms, 0);
        assert_eq!(sentence.end_ms, 1000);
        assert_eq!(c.pending_segments(), 0);
    }

    #[test]
    fn emits_on_cjk_punctuation() {
        let mut c = combiner();
        let sentence = c.add_segment(segment("s1", "今日は天気がいい。", 0, 900)).unwrap();
        assert_eq!(sentence.segment_count, 1);
    }

    #[test]
    fn emits_when_buffer_fills() {
        let mut c = combiner();
        for i in 0..9 {
            assert!(c
                .add_segment(segment(&format!("s{i}"), "no punctuation here", 0, 100))
                .is_none());
        }
        let sentence = c.add_segment(segment("s9", "still none", 0, 100)).unwrap();
        assert_eq!(sentence.segment_count, 10);
    }

    #[test]
    fn timeout_flushes_buffer() {
        let mut c = SentenceCombiner::new(CombinerConfig {
            timeout: Duration::from_millis(50),
            ..CombinerConfig::default()
        });
        assert!(c.add_segment(segment("s1", "dangling clause", 0, 400)).is_none());
        assert!(c.check_timeout(Instant::now()).is_none());
        let later = Instant::now() + Duration::from_millis(60);
        let sentence = c.check_timeout(later).unwrap();
        assert_eq!(sentence.source_text, "dangling clause");
        assert!(c.check_timeout(later + Duration::from_secs(1)).is_none());
    }

    #[test]
    fn force_emit_at_shutdown() {
        let mut c = combiner();
        assert!(c.force_emit().is_none());
        c.add_segment(segment("s1", "unfinished", 0, 300));
        let sentence = c.force_emit().unwrap();
        assert_eq!(sentence.source_text, "unfinished");
    }

    #[test]
    fn ids_are_monotonic() {
        let mut c = combiner();
        let first = c.add_segment(segment("s1", "One.", 0, 100)).unwrap();
        let second = c.add_segment(segment("s2", "Two.", 100, 200)).unwrap();
        assert_eq!(first.id, "combined_1");
        assert_eq!(second.id, "combined_2");
    }

    #[test]
    fn interim_and_empty_segments_ignored() {
        let mut c = combiner();
        let mut interim = segment("s1", "partial.", 0, 100);
        interim.is_final = false;
        assert!(c.add_segment(interim).is_none());
        assert!(c.add_segment(segment("s2", "   ", 0, 100)).is_none());
        assert_eq!(c.pending_segments(), 0);
    }

    #[test]
    fn whitespace_is_normalized() {
        let mut c = combiner();
        c.add_segment(segment("s1", "  leading and trailing  ", 0, 100));
        let sentence = c.add_segment(segment("s2", " done. ", 100, 200)).unwrap();
        assert_eq!(sentence.source_text, "leading and trailing done.");
    }
}
