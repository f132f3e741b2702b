//! Fixed operating constants.
//!
//! Values here are contract-level: changing them changes observable pipeline
//! behavior, so they live in one place rather than scattered defaults.

/// Audio wire format: 16 kHz mono PCM16 LE.
pub mod audio {
    pub const SAMPLE_RATE_HZ: u32 = 16_000;
    /// 20 ms of PCM16 mono at 16 kHz.
    pub const FRAME_BYTES: usize = 640;
    pub const FRAME_DURATION_MS: u64 = 20;
}

/// ASR endpointing defaults (milliseconds).
pub mod asr {
    pub const ENDPOINTING_MS: u32 = 800;
    pub const UTTERANCE_END_MS: u32 = 1000;
    /// Keep-alive cadence while the stream is open.
    pub const KEEPALIVE_INTERVAL_SECS: u64 = 5;
}

/// Sentence combiner defaults.
pub mod combiner {
    pub const MAX_SEGMENTS: usize = 10;
    pub const MIN_SEGMENTS: usize = 1;
    pub const TIMEOUT_MS: u64 = 2000;
    /// Sentence-terminal punctuation, Latin and CJK.
    pub const TERMINAL_PUNCTUATION: &[char] = &['.', '!', '?', '。', '！', '？'];
}

/// Translation queue caps.
pub mod queue {
    pub const CONCURRENCY: usize = 3;
    pub const CAPACITY: usize = 100;
    /// Hard per-request cap enforced by the queue itself.
    pub const HARD_TIMEOUT_SECS: u64 = 30;
    /// Orchestrator-level dynamic deadline bounds for realtime requests.
    pub const REALTIME_TIMEOUT_MIN_MS: u64 = 7_000;
    pub const REALTIME_TIMEOUT_MAX_MS: u64 = 10_000;
    /// Grace period for draining in-flight work at shutdown.
    pub const DRAIN_GRACE_MS: u64 = 2_000;
}

/// Progressive summary thresholds: 400, 800, 1600, 2400, then +800 each.
pub mod summary {
    pub const FIRST_THRESHOLD: usize = 400;
    pub const SECOND_THRESHOLD: usize = 800;
    pub const THIRD_THRESHOLD: usize = 1600;
    pub const STEP_AFTER_THIRD: usize = 800;

    /// The cumulative word count that triggers the `n`th summary (0-based).
    pub fn threshold_at(n: usize) -> usize {
        match n {
            0 => FIRST_THRESHOLD,
            1 => SECOND_THRESHOLD,
            2 => THIRD_THRESHOLD,
            _ => THIRD_THRESHOLD + STEP_AFTER_THIRD * (n - 2),
        }
    }
}

/// History grouper defaults; boundary policy is tunable but not user-visible.
pub mod history {
    pub const SENTENCES_PER_BLOCK: usize = 3;
    pub const QUIET_GAP_MS: u64 = 2_500;
}

/// Vocabulary extraction bounds.
pub mod vocabulary {
    pub const MIN_TERMS: usize = 5;
    pub const MAX_TERMS: usize = 15;
}

#[cfg(test)]
mod tests {
    use super::summary::threshold_at;

    #[test]
    fn threshold_sequence() {
        assert_eq!(threshold_at(0), 400);
        assert_eq!(threshold_at(1), 800);
        assert_eq!(threshold_at(2), 1600);
        assert_eq!(threshold_at(3), 2400);
        assert_eq!(threshold_at(4), 3200);
        assert_eq!(threshold_at(5), 4000);
    }
}
