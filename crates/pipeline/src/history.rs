//! History grouper.
//!
//! Accumulates translated sentences into display blocks and republishes a
//! block whenever a higher-quality translation upgrades one of its
//! sentences. Paragraphs are orthogonal units: a paragraph retranslation
//! produces its own block keyed by `paragraph_id` rather than rewriting
//! sentence blocks. Block composition never changes after emission.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use univoice_config::constants;
use univoice_core::{HistoryBlock, SentenceEntry};

#[derive(Debug, Clone)]
pub struct HistoryConfig {
    pub sentences_per_block: usize,
    pub quiet_gap: Duration,
    /// Keep the pre-upgrade target in the block's `raw_text` for diffing.
    pub retain_sentence_targets: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            sentences_per_block: constants::history::SENTENCES_PER_BLOCK,
            quiet_gap: Duration::from_millis(constants::history::QUIET_GAP_MS),
            retain_sentence_targets: false,
        }
    }
}

#[derive(Debug)]
pub struct HistoryGrouper {
    config: HistoryConfig,
    pending: Vec<SentenceEntry>,
    pending_started: Option<Instant>,
    last_sentence_at: Option<Instant>,
    blocks: Vec<HistoryBlock>,
    /// Sentence id -> emitted block id; a sentence lives in at most one block.
    sentence_index: HashMap<String, String>,
    /// Paragraph id -> block id for paragraph blocks.
    paragraph_index: HashMap<String, String>,
    next_block: u64,
}

impl HistoryGrouper {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            config,
            pending: Vec::new(),
            pending_started: None,
            last_sentence_at: None,
            blocks: Vec::new(),
            sentence_index: HashMap::new(),
            paragraph_index: HashMap::new(),
            next_block: 1,
        }
    }

    pub fn blocks(&self) -> &[HistoryBlock] {
        &self.blocks
    }

    pub fn pending_sentences(&self) -> usize {
        self.pending.len()
    }

    /// Add a translated sentence; emits a block at the size boundary.
    /// Sentences already placed in a block are rejected silently.
    pub fn add_sentence(&mut self, entry: SentenceEntry) -> Option<HistoryBlock> {
        if self.sentence_index.contains_key(&entry.id)
            || self.pending.iter().any(|s| s.id == entry.id)
        {
            tracing::debug!(id = %entry.id, "duplicate sentence ignored");
            return None;
        }
        if self.pending.is_empty() {
            self.pending_started = Some(Instant::now());
        }
        self.last_sentence_at = Some(Instant::now());
        self.pending.push(entry);

        if self.pending.len() >= self.config.sentences_per_block {
            return Some(self.emit_pending());
        }
        None
    }

    /// Quiet-interval boundary, driven by the orchestrator's tick.
    pub fn check_quiet_gap(&mut self, now: Instant) -> Option<HistoryBlock> {
        let last = self.last_sentence_at?;
        if !self.pending.is_empty() && now.duration_since(last) >= self.config.quiet_gap {
            return Some(self.emit_pending());
        }
        None
    }

    /// Shutdown flush of any pending sentences.
    pub fn flush(&mut self) -> Option<HistoryBlock> {
        if self.pending.is_empty() {
            return None;
        }
        Some(self.emit_pending())
    }

    /// Upgrade one sentence's translation in place. If the sentence is in
    /// an emitted block, the whole block is returned for republication.
    pub fn update_sentence_translation(&mut self, id: &str, text: &str) -> Option<HistoryBlock> {
        if let Some(pending) = self.pending.iter_mut().find(|s| s.id == id) {
            pending.target_text = text.to_string();
            return None;
        }

        let block_id = self.sentence_index.get(id)?.clone();
        let block = self.blocks.iter_mut().find(|b| b.id == block_id)?;
        let sentence = block.sentences.iter_mut().find(|s| s.id == id)?;

        if self.config.retain_sentence_targets && sentence.target_text != text {
            let previous = sentence.target_text.clone();
            match &mut block.raw_text {
                Some(raw) => {
                    raw.push('\n');
                    raw.push_str(&previous);
                }
                None => block.raw_text = Some(previous),
            }
        }
        sentence.target_text = text.to_string();
        Some(block.clone())
    }

    /// Declare a paragraph block awaiting its high-quality translation.
    pub fn register_paragraph(
        &mut self,
        paragraph_id: &str,
        raw_text: &str,
        segment_ids: Vec<String>,
        created_at: u64,
        duration_ms: Option<u64>,
    ) -> HistoryBlock {
        let id = format!("block_{}", self.next_block);
        self.next_block += 1;

        let block = HistoryBlock {
            id: id.clone(),
            sentences: vec![SentenceEntry {
                id: paragraph_id.to_string(),
                source_text: raw_text.to_string(),
                target_text: String::new(),
                timestamp: created_at,
            }],
            created_at,
            total_height: None,
            paragraph_id: Some(paragraph_id.to_string()),
            raw_text: Some(raw_text.to_string()),
            duration_ms,
            is_paragraph: true,
        };
        tracing::debug!(paragraph = paragraph_id, segments = segment_ids.len(), "paragraph block registered");
        self.paragraph_index.insert(paragraph_id.to_string(), id);
        self.blocks.push(block.clone());
        block
    }

    /// Fill or upgrade a paragraph block's translation; returns the block
    /// for republication.
    pub fn update_paragraph_translation(
        &mut self,
        paragraph_id: &str,
        text: &str,
    ) -> Option<HistoryBlock> {
        let block_id = self.paragraph_index.get(paragraph_id)?.clone();
        let block = self.blocks.iter_mut().find(|b| b.id == block_id)?;
        if let Some(sentence) = block.sentences.first_mut() {
            sentence.target_text = text.to_string();
        }
        Some(block.clone())
    }

    /// Rebuild grouper state from persisted blocks on same-day resume.
    pub fn hydrate(&mut self, blocks: Vec<HistoryBlock>) {
        self.reset();
        for block in &blocks {
            if let Some(paragraph_id) = &block.paragraph_id {
                self.paragraph_index
                    .insert(paragraph_id.clone(), block.id.clone());
            } else {
                for sentence in &block.sentences {
                    self.sentence_index
                        .insert(sentence.id.clone(), block.id.clone());
                }
            }
            if let Some(n) = block
                .id
                .strip_prefix("block_")
                .and_then(|n| n.parse::<u64>().ok())
            {
                self.next_block = self.next_block.max(n + 1);
            }
        }
        self.blocks = blocks;
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.pending_started = None;
        self.last_sentence_at = None;
        self.blocks.clear();
        self.sentence_index.clear();
        self.paragraph_index.clear();
        self.next_block = 1;
    }

    fn emit_pending(&mut self) -> HistoryBlock {
        let sentences = std::mem::take(&mut self.pending);
        self.last_sentence_at = None;
        let started = self.pending_started.take();

        let id = format!("block_{}", self.next_block);
        self.next_block += 1;

        for sentence in &sentences {
            self.sentence_index.insert(sentence.id.clone(), id.clone());
        }

        let created_at = sentences.first().map(|s| s.timestamp).unwrap_or(0);
        let block = HistoryBlock {
            id,
            sentences,
            created_at,
            total_height: None,
            paragraph_id: None,
            raw_text: None,
            duration_ms: started.map(|s| s.elapsed().as_millis() as u64),
            is_paragraph: false,
        };
        self.blocks.push(block.clone());
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, target: &str) -> SentenceEntry {
        SentenceEntry {
            id: id.to_string(),
            source_text: format!("source {id}"),
            target_text: target.to_string(),
            timestamp: 1_700_000_000_000,
        }
    }

    fn grouper(per_block: usize) -> HistoryGrouper {
        HistoryGrouper::new(HistoryConfig {
            sentences_per_block: per_block,
            quiet_gap: Duration::from_millis(100),
            retain_sentence_targets: false,
        })
    }

    #[test]
    fn emits_at_size_boundary() {
        let mut g = grouper(3);
        assert!(g.add_sentence(entry("s1", "t1")).is_none());
        assert!(g.add_sentence(entry("s2", "t2")).is_none());
        let block = g.add_sentence(entry("s3", "t3")).unwrap();
        assert_eq!(block.sentences.len(), 3);
        assert_eq!(block.id, "block_1");
        assert_eq!(g.pending_sentences(), 0);
    }

    #[test]
    fn quiet_gap_emits_partial_block() {
        let mut g = grouper(5);
        g.add_sentence(entry("s1", "t1"));
        assert!(g.check_quiet_gap(Instant::now()).is_none());
        let block = g
            .check_quiet_gap(Instant::now() + Duration::from_millis(150))
            .unwrap();
        assert_eq!(block.sentences.len(), 1);
    }

    #[test]
    fn upgrade_republishes_emitted_block() {
        let mut g = grouper(2);
        g.add_sentence(entry("s1", "rough"));
        let block = g.add_sentence(entry("s2", "t2")).unwrap();

        let republished = g.update_sentence_translation("s1", "polished").unwrap();
        assert_eq!(republished.id, block.id);
        assert_eq!(republished.sentences[0].target_text, "polished");
        // Grouper state reflects the upgrade too.
        assert_eq!(g.blocks()[0].sentences[0].target_text, "polished");
    }

    #[test]
    fn upgrade_of_pending_sentence_stays_pending() {
        let mut g = grouper(3);
        g.add_sentence(entry("s1", "rough"));
        assert!(g.update_sentence_translation("s1", "polished").is_none());
        g.add_sentence(entry("s2", "t2"));
        let block = g.add_sentence(entry("s3", "t3")).unwrap();
        assert_eq!(block.sentences[0].target_text, "polished");
    }

    #[test]
    fn retain_mode_keeps_previous_target() {
        let mut g = HistoryGrouper::new(HistoryConfig {
            sentences_per_block: 1,
            quiet_gap: Duration::from_millis(100),
            retain_sentence_targets: true,
        });
        g.add_sentence(entry("s1", "rough")).unwrap();
        let block = g.update_sentence_translation("s1", "polished").unwrap();
        assert_eq!(block.raw_text.as_deref(), Some("rough"));
        assert_eq!(block.sentences[0].target_text, "polished");
    }

    #[test]
    fn duplicate_sentences_rejected() {
        let mut g = grouper(1);
        assert!(g.add_sentence(entry("s1", "t1")).is_some());
        assert!(g.add_sentence(entry("s1", "t1 again")).is_none());
        assert_eq!(g.blocks().len(), 1);
    }

    #[test]
    fn paragraph_blocks_are_orthogonal() {
        let mut g = grouper(1);
        g.add_sentence(entry("s1", "t1")).unwrap();

        let para = g.register_paragraph("para_1", "full raw text", vec!["s1".into()], 10, Some(2000));
        assert!(para.is_paragraph);
        assert_eq!(para.sentences[0].target_text, "");

        let upgraded = g.update_paragraph_translation("para_1", "paragraph translation").unwrap();
        assert_eq!(upgraded.sentences[0].target_text, "paragraph translation");
        // Sentence block untouched.
        assert_eq!(g.blocks()[0].sentences[0].target_text, "t1");
        assert_eq!(g.blocks().len(), 2);
    }

    #[test]
    fn flush_emits_remainder() {
        let mut g = grouper(10);
        g.add_sentence(entry("s1", "t1"));
        g.add_sentence(entry("s2", "t2"));
        let block = g.flush().unwrap();
        assert_eq!(block.sentences.len(), 2);
        assert!(g.flush().is_none());
    }
}
