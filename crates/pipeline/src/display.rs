//! Realtime three-line display synchronizer.
//!
//! Keeps up to three (source, target) caption rows. New segments enter at
//! `recent`, pushing existing rows toward `oldest`; the row past `oldest` is
//! evicted. Rotation is monotonic: a row never moves back toward `recent`.
//! Purely reactive; the orchestrator is the single writer.

use std::collections::VecDeque;

use univoice_core::{DisplayPair, DisplayPosition, DisplaySnapshot, DisplayText};

const MAX_PAIRS: usize = 3;

#[derive(Debug, Default)]
pub struct DisplaySync {
    /// Front is the most recent row.
    pairs: VecDeque<DisplayPair>,
}

impl DisplaySync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update (or create) the row for an ASR segment. Creating a new row
    /// rotates the trio and may evict the oldest.
    pub fn update_source(
        &mut self,
        id: &str,
        text: &str,
        is_final: bool,
        now_ms: u64,
    ) -> DisplaySnapshot {
        if let Some(pair) = self.pairs.iter_mut().find(|p| p.id == id) {
            pair.source.text = text.to_string();
            pair.source.is_final = is_final;
            pair.source.timestamp = now_ms;
            return self.snapshot();
        }

        self.pairs.push_front(DisplayPair {
            id: id.to_string(),
            source: DisplayText {
                text: text.to_string(),
                is_final,
                timestamp: now_ms,
            },
            target: DisplayText {
                text: String::new(),
                is_final: false,
                timestamp: now_ms,
            },
            position: DisplayPosition::Recent,
            opacity: DisplayPosition::Recent.opacity(),
            height: None,
        });
        if self.pairs.len() > MAX_PAIRS {
            let evicted = self.pairs.pop_back();
            if let Some(evicted) = evicted {
                tracing::trace!(id = %evicted.id, "display row evicted");
            }
        }
        self.snapshot()
    }

    /// Append a streamed translation delta to a row's target column.
    /// Returns `None` when the row has already rotated out.
    pub fn append_target_delta(
        &mut self,
        id: &str,
        delta: &str,
        now_ms: u64,
    ) -> Option<DisplaySnapshot> {
        let pair = self.pairs.iter_mut().find(|p| p.id == id)?;
        if pair.target.is_final {
            return None;
        }
        pair.target.text.push_str(delta);
        pair.target.timestamp = now_ms;
        Some(self.snapshot())
    }

    /// Current accumulated target text for a row, if still displayed.
    pub fn target_text(&self, id: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.target.text.as_str())
    }

    /// Set the terminal target text; the row is then completed.
    pub fn finalize_target(&mut self, id: &str, text: &str, now_ms: u64) -> Option<DisplaySnapshot> {
        let pair = self.pairs.iter_mut().find(|p| p.id == id)?;
        pair.target.text = text.to_string();
        pair.target.is_final = true;
        pair.target.timestamp = now_ms;
        Some(self.snapshot())
    }

    /// Renderer-measured height feedback for one row.
    pub fn report_height(&mut self, id: &str, height: f32) -> Option<DisplaySnapshot> {
        let pair = self.pairs.iter_mut().find(|p| p.id == id)?;
        pair.height = Some(height);
        Some(self.snapshot())
    }

    pub fn reset(&mut self) {
        self.pairs.clear();
    }

    /// The current rows and unified height, without mutating anything.
    /// Positions are always up to date because every mutator reassigns them.
    pub fn current_snapshot(&self) -> DisplaySnapshot {
        let max_height = self
            .pairs
            .iter()
            .filter_map(|p| p.height)
            .fold(None, |acc: Option<f32>, h| Some(acc.map_or(h, |a| a.max(h))));
        DisplaySnapshot {
            pairs: self.pairs.iter().cloned().collect(),
            max_height,
        }
    }

    /// Reassign positions by recency and publish the unified max height.
    /// Opacity is a function of position only, identical for both columns.
    fn snapshot(&mut self) -> DisplaySnapshot {
        for (index, pair) in self.pairs.iter_mut().enumerate() {
            pair.position = match index {
                0 => DisplayPosition::Recent,
                1 => DisplayPosition::Older,
                _ => DisplayPosition::Oldest,
            };
            pair.opacity = pair.position.opacity();
        }
        let max_height = self
            .pairs
            .iter()
            .filter_map(|p| p.height)
            .fold(None, |acc: Option<f32>, h| Some(acc.map_or(h, |a| a.max(h))));
        DisplaySnapshot {
            pairs: self.pairs.iter().cloned().collect(),
            max_height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sync_with_rows(ids: &[&str]) -> DisplaySync {
        let mut sync = DisplaySync::new();
        for (i, id) in ids.iter().enumerate() {
            sync.update_source(id, &format!("text {id}"), true, i as u64);
        }
        sync
    }

    #[test]
    fn new_rows_enter_at_recent() {
        let mut sync = DisplaySync::new();
        let snap = sync.update_source("s1", "hello", false, 1);
        assert_eq!(snap.pairs.len(), 1);
        assert_eq!(snap.pairs[0].position, DisplayPosition::Recent);
        assert_eq!(snap.pairs[0].opacity, 1.0);
        assert_eq!(snap.pairs[0].target.text, "");
    }

    #[test]
    fn trio_positions_and_opacity_contract() {
        let mut sync = sync_with_rows(&["s1", "s2"]);
        let snap = sync.update_source("s3", "third", true, 3);
        let opacities: Vec<f32> = snap.pairs.iter().map(|p| p.opacity).collect();
        assert_eq!(opacities, vec![1.0, 0.6, 0.3]);
        assert_eq!(snap.pairs[0].id, "s3");
        assert_eq!(snap.pairs[2].id, "s1");
    }

    #[test]
    fn fourth_row_evicts_oldest() {
        let mut sync = sync_with_rows(&["s1", "s2", "s3"]);
        let snap = sync.update_source("s4", "fourth", true, 4);
        assert_eq!(snap.pairs.len(), 3);
        assert!(!snap.pairs.iter().any(|p| p.id == "s1"));
        // Once evicted, updates for the old row are no-ops.
        assert!(sync.append_target_delta("s1", "late", 5).is_none());
    }

    #[test]
    fn rotation_is_monotonic() {
        let mut sync = sync_with_rows(&["s1", "s2"]);
        let pos_of = |snap: &DisplaySnapshot, id: &str| {
            snap.pairs.iter().find(|p| p.id == id).map(|p| p.position)
        };
        let snap = sync.update_source("s3", "x", true, 3);
        assert_eq!(pos_of(&snap, "s1"), Some(DisplayPosition::Oldest));
        // Updating s1's target does not move it back up.
        let snap = sync.finalize_target("s1", "done", 4).unwrap();
        assert_eq!(pos_of(&snap, "s1"), Some(DisplayPosition::Oldest));
    }

    #[test]
    fn deltas_accumulate_until_final() {
        let mut sync = sync_with_rows(&["s1"]);
        sync.append_target_delta("s1", "こん", 2).unwrap();
        let snap = sync.append_target_delta("s1", "にちは", 3).unwrap();
        assert_eq!(snap.pairs[0].target.text, "こんにちは");
        assert!(!snap.pairs[0].target.is_final);

        let snap = sync.finalize_target("s1", "こんにちは世界。", 4).unwrap();
        assert!(snap.pairs[0].target.is_final);
        // Further deltas are refused once final.
        assert!(sync.append_target_delta("s1", "!", 5).is_none());
    }

    #[test]
    fn max_height_unifies_the_trio() {
        let mut sync = sync_with_rows(&["s1", "s2", "s3"]);
        sync.report_height("s1", 24.0);
        sync.report_height("s2", 48.0);
        let snap = sync.report_height("s3", 30.0).unwrap();
        assert_eq!(snap.max_height, Some(48.0));
    }

    #[test]
    fn interim_update_reuses_the_row() {
        let mut sync = DisplaySync::new();
        sync.update_source("s1", "hel", false, 1);
        let snap = sync.update_source("s1", "hello world", true, 2);
        assert_eq!(snap.pairs.len(), 1);
        assert!(snap.pairs[0].source.is_final);
    }
}
