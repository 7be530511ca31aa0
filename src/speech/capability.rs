//! The speech-synthesis seam.
//!
//! The sequencer only talks to a `SpeechCapability`; the default
//! implementation lives in `espeak`, tests use a scripted double.

use std::future::Future;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("speech backend unavailable: {0}")]
    Unavailable(String),
    #[error("synthesis failed: {0}")]
    Synthesis(String),
    #[error("speech cancelled")]
    Cancelled,
}

/// A voice offered by the backend. `id` is stable across runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    pub id: String,
    pub name: String,
    pub lang: String,
}

pub trait SpeechCapability: Send + Sync {
    fn voices(&self) -> impl Future<Output = Vec<Voice>> + Send;

    /// Speak `text` and resolve when the utterance has finished playing.
    fn speak(
        &self,
        text: &str,
        voice: Option<&str>,
    ) -> impl Future<Output = Result<(), SpeechError>> + Send;

    fn pause(&self);

    fn resume(&self);

    /// Abort the current utterance. A pending `speak` resolves soon after.
    fn cancel(&self);

    /// Whether audio is actively playing right now (false while paused).
    fn is_speaking(&self) -> bool;
}

pub fn korean_voices(voices: Vec<Voice>) -> Vec<Voice> {
    voices
        .into_iter()
        .filter(|v| v.lang.to_lowercase().contains("ko"))
        .collect()
}

/// Prefer a Google voice, otherwise the first one.
pub fn preferred_voice(voices: &[Voice]) -> Option<&Voice> {
    voices
        .iter()
        .find(|v| {
            v.name.to_lowercase().contains("google") || v.id.to_lowercase().contains("google")
        })
        .or_else(|| voices.first())
}

/// Speak a short greeting with the given voice, without segmentation.
pub async fn test_voice<S: SpeechCapability>(
    speech: &S,
    voice: Option<&str>,
) -> Result<(), SpeechError> {
    speech.speak("안녕하세요", voice).await
}
