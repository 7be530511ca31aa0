//! Microphone recording with cpal.
//!
//! Captures the reader's voice while a prayer is read aloud and writes it
//! out as 16-bit PCM WAV.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::RecordingConfig;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("no input audio device available")]
    NoDevice,
    #[error("audio stream error: {0}")]
    Stream(String),
    #[error("failed to write WAV: {0}")]
    Wav(#[from] hound::Error),
    #[error("nothing was recorded")]
    Empty,
}

impl RecorderError {
    pub fn user_message(&self) -> &'static str {
        "녹음 중 오류가 발생했습니다."
    }
}

/// Audio recorder; the stream is opened once and gated by `start`/`stop`.
pub struct AudioRecorder {
    config: RecordingConfig,
    shared: Arc<Mutex<RecorderInner>>,
    _stream: Option<Stream>,
}

struct RecorderInner {
    is_recording: bool,
    buffer: Vec<f32>,
    max_samples: usize,
    limit_reached: bool,
}

impl AudioRecorder {
    pub fn new(config: RecordingConfig) -> Self {
        let max_samples = (config.max_duration
            * f64::from(config.sample_rate)
            * f64::from(config.channels)) as usize;

        Self {
            config,
            shared: Arc::new(Mutex::new(RecorderInner {
                is_recording: false,
                buffer: Vec::new(),
                max_samples,
                limit_reached: false,
            })),
            _stream: None,
        }
    }

    pub fn open_stream(&mut self) -> Result<(), RecorderError> {
        if self._stream.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = match self.config.device_index {
            Some(index) => host
                .input_devices()
                .map_err(|e| RecorderError::Stream(e.to_string()))?
                .nth(index),
            None => host.default_input_device(),
        }
        .ok_or(RecorderError::NoDevice)?;

        info!(
            "Using audio device: {}",
            device.name().unwrap_or("unknown".into())
        );

        let stream_config = StreamConfig {
            channels: self.config.channels,
            sample_rate: SampleRate(self.config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let shared = Arc::clone(&self.shared);
        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    let Ok(mut inner) = shared.lock() else {
                        return;
                    };
                    if !inner.is_recording {
                        return;
                    }

                    let remaining = inner.max_samples.saturating_sub(inner.buffer.len());
                    let to_copy = data.len().min(remaining);
                    inner.buffer.extend_from_slice(&data[..to_copy]);

                    if inner.buffer.len() >= inner.max_samples {
                        warn!("Max recording duration reached");
                        inner.is_recording = false;
                        inner.limit_reached = true;
                    }
                },
                move |err| {
                    warn!("Audio stream error: {err}");
                },
                None,
            )
            .map_err(|e| RecorderError::Stream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| RecorderError::Stream(e.to_string()))?;
        debug!("Input stream opened");

        self._stream = Some(stream);
        Ok(())
    }

    pub fn start(&self) {
        if let Ok(mut inner) = self.shared.lock() {
            inner.buffer.clear();
            inner.is_recording = true;
            inner.limit_reached = false;
        }
        info!("Recording started");
    }

    /// Stop recording and return the captured interleaved samples.
    pub fn stop(&self) -> Vec<f32> {
        let samples = match self.shared.lock() {
            Ok(mut inner) => {
                inner.is_recording = false;
                std::mem::take(&mut inner.buffer)
            }
            Err(_) => Vec::new(),
        };
        info!(
            "Recording stopped: {:.1}s",
            duration_secs(samples.len(), &self.config)
        );
        samples
    }

    pub fn limit_reached(&self) -> bool {
        self.shared.lock().map(|i| i.limit_reached).unwrap_or(false)
    }

    pub fn config(&self) -> &RecordingConfig {
        &self.config
    }
}

fn duration_secs(samples: usize, config: &RecordingConfig) -> f64 {
    samples as f64 / (f64::from(config.sample_rate) * f64::from(config.channels.max(1)))
}

/// Write f32 samples in [-1, 1] as 16-bit PCM WAV.
pub fn save_wav(path: &Path, samples: &[f32], config: &RecordingConfig) -> Result<(), RecorderError> {
    if samples.is_empty() {
        return Err(RecorderError::Empty);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(hound::Error::IoError)?;
    }

    let spec = hound::WavSpec {
        channels: config.channels,
        sample_rate: config.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in samples {
        // f32 [-1, 1] → i16
        let s = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
        writer.write_sample(s)?;
    }
    writer.finalize()?;
    info!(
        "Saved {:.1}s recording to {}",
        duration_secs(samples.len(), config),
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_wav_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        let config = RecordingConfig {
            sample_rate: 8000,
            ..Default::default()
        };
        save_wav(&path, &[0.0, 0.5, -0.5, 2.0], &config).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 8000);
        let samples: Vec<i16> = reader.into_samples().map(Result::unwrap).collect();
        assert_eq!(samples, vec![0, 16383, -16383, 32767]);
    }

    #[test]
    fn test_save_wav_rejects_empty() {
        let dir = tempfile::tempdir().unwrap();
        let err = save_wav(&dir.path().join("x.wav"), &[], &RecordingConfig::default()).unwrap_err();
        assert!(matches!(err, RecorderError::Empty));
    }

    #[test]
    fn test_max_samples_from_config() {
        let recorder = AudioRecorder::new(RecordingConfig {
            sample_rate: 1000,
            channels: 2,
            max_duration: 1.5,
            device_index: None,
        });
        assert_eq!(recorder.shared.lock().unwrap().max_samples, 3000);
        assert!(!recorder.limit_reached());
    }
}
