//! Live-stream configuration and the provider language mapping.

use univoice_config::constants;
use univoice_core::Language;

/// Models that only accept `en` or the multilingual tag on live streams.
const MULTI_ONLY_MODELS: &[&str] = &["nova-3", "nova-3-general"];

/// Configuration for one live recognition stream.
#[derive(Debug, Clone)]
pub struct AsrLiveConfig {
    /// WebSocket endpoint, e.g. `wss://api.deepgram.com/v1/listen`.
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    /// The session's source language; mapped to the provider's accepted set
    /// by [`AsrLiveConfig::wire_language`].
    pub source_language: Language,
    pub sample_rate: u32,
    pub channels: u8,
    pub interim_results: bool,
    /// Silence (ms) after speech that finalizes a segment.
    pub endpointing_ms: u32,
    /// Silence (ms) that closes an utterance.
    pub utterance_end_ms: u32,
    pub smart_format: bool,
    pub no_delay: bool,
}

impl AsrLiveConfig {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        source_language: Language,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            source_language,
            sample_rate: constants::audio::SAMPLE_RATE_HZ,
            channels: 1,
            interim_results: true,
            endpointing_ms: constants::asr::ENDPOINTING_MS,
            utterance_end_ms: constants::asr::UTTERANCE_END_MS,
            smart_format: true,
            no_delay: true,
        }
    }

    /// The language tag actually sent to the provider. Some models accept
    /// only English or the multilingual stream tag; for those, any other
    /// configured language is substituted with `multi`. This mapping is
    /// encapsulated here and not exposed to the rest of the pipeline.
    pub fn wire_language(&self) -> Language {
        let base_model = self.model.split(':').next().unwrap_or(&self.model);
        if MULTI_ONLY_MODELS.contains(&base_model) && self.source_language.as_str() != "en" {
            Language::multi()
        } else {
            self.source_language.clone()
        }
    }

    /// Full request URL with the stream options as query parameters.
    pub fn request_url(&self) -> String {
        format!(
            "{}?model={}&language={}&sample_rate={}&channels={}&encoding=linear16\
             &interim_results={}&endpointing={}&utterance_end_ms={}&smart_format={}&no_delay={}",
            self.endpoint,
            self.model,
            self.wire_language(),
            self.sample_rate,
            self.channels,
            self.interim_results,
            self.endpointing_ms,
            self.utterance_end_ms,
            self.smart_format,
            self.no_delay,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(model: &str, lang: &str) -> AsrLiveConfig {
        AsrLiveConfig::new(
            "wss://api.example.com/v1/listen",
            "key",
            model,
            Language::parse(lang).unwrap(),
        )
    }

    #[test]
    fn multi_substitution_applies_per_model() {
        assert_eq!(config("nova-3", "ja").wire_language(), Language::multi());
        assert_eq!(config("nova-3", "en").wire_language().as_str(), "en");
        assert_eq!(config("nova-2", "ja").wire_language().as_str(), "ja");
    }

    #[test]
    fn url_carries_stream_options() {
        let url = config("nova-3", "ja").request_url();
        assert!(url.contains("language=multi"));
        assert!(url.contains("sample_rate=16000"));
        assert!(url.contains("endpointing=800"));
        assert!(url.contains("utterance_end_ms=1000"));
        assert!(url.contains("encoding=linear16"));
    }
}
