//! espeak-ng synthesis + rodio playback.
//!
//! Pipeline per utterance:
//! 1. `espeak-ng --stdout` renders the text to WAV bytes
//! 2. hound decodes them to f32 samples
//! 3. samples play on a rodio `Sink` that pause/resume/cancel act on

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rodio::buffer::SamplesBuffer;
use rodio::mixer::Mixer;
use rodio::{OutputStreamBuilder, Sink};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::capability::{SpeechCapability, SpeechError, Voice};
use crate::config::SpeechConfig;

const DEFAULT_WORDS_PER_MINUTE: f32 = 175.0;
const DEFAULT_PITCH: f32 = 50.0;
const DEFAULT_AMPLITUDE: f32 = 100.0;
const FALLBACK_VOICE: &str = "ko";
const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct EspeakSpeech {
    program: String,
    default_voice: String,
    words_per_minute: u32,
    pitch: u32,
    amplitude: u32,

    // The output stream lives on its own thread; dropping this sender ends it.
    mixer: Mixer,
    _stream_guard: std::sync::mpsc::Sender<()>,

    generation: Arc<AtomicU64>,
    active_sink: Arc<Mutex<Option<Arc<Sink>>>>,
    // Pause requested before the sink for the utterance existed.
    paused: AtomicBool,
}

impl EspeakSpeech {
    /// Open the default audio output and check that the synthesizer runs.
    pub async fn open(config: &SpeechConfig) -> Result<Self, SpeechError> {
        let probe = Command::new(&config.program)
            .arg("--version")
            .output()
            .await
            .map_err(|e| SpeechError::Unavailable(format!("{}: {e}", config.program)))?;
        debug!(
            "{} {}",
            config.program,
            String::from_utf8_lossy(&probe.stdout).trim()
        );

        let (mixer, guard) = open_output_stream()?;

        let default_voice = if config.voice.is_empty() {
            FALLBACK_VOICE.to_string()
        } else {
            config.voice.clone()
        };

        info!("Speech ready ({} voice {default_voice})", config.program);

        Ok(Self {
            program: config.program.clone(),
            default_voice,
            words_per_minute: (DEFAULT_WORDS_PER_MINUTE * config.rate).round() as u32,
            pitch: (DEFAULT_PITCH * config.pitch).clamp(0.0, 99.0).round() as u32,
            amplitude: (DEFAULT_AMPLITUDE * config.volume).clamp(0.0, 200.0).round() as u32,
            mixer,
            _stream_guard: guard,
            generation: Arc::new(AtomicU64::new(0)),
            active_sink: Arc::new(Mutex::new(None)),
            paused: AtomicBool::new(false),
        })
    }

    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, SpeechError> {
        let output = Command::new(&self.program)
            .arg("-v")
            .arg(voice)
            .arg("-s")
            .arg(self.words_per_minute.to_string())
            .arg("-p")
            .arg(self.pitch.to_string())
            .arg("-a")
            .arg(self.amplitude.to_string())
            .arg("--stdout")
            .arg(text)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SpeechError::Unavailable(format!("{}: {e}", self.program)))?;

        if !output.status.success() {
            return Err(SpeechError::Synthesis(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(output.stdout)
    }

    /// Play samples until they run out or the utterance is cancelled.
    async fn play(&self, source: SamplesBuffer, generation: u64) -> Result<(), SpeechError> {
        let sink = Arc::new(Sink::connect_new(&self.mixer));
        {
            let mut active = self.active_sink.lock().unwrap();
            if self.paused.load(Ordering::SeqCst) {
                sink.pause();
            }
            sink.append(source);
            *active = Some(Arc::clone(&sink));
        }

        let current = Arc::clone(&self.generation);
        let polled = Arc::clone(&sink);
        let cancelled = tokio::task::spawn_blocking(move || loop {
            if current.load(Ordering::SeqCst) != generation {
                polled.stop();
                return true;
            }
            if polled.empty() {
                return false;
            }
            std::thread::sleep(POLL_INTERVAL);
        })
        .await
        .unwrap_or(true);

        {
            let mut active = self.active_sink.lock().unwrap();
            if active.as_ref().is_some_and(|s| Arc::ptr_eq(s, &sink)) {
                *active = None;
            }
        }

        if cancelled {
            Err(SpeechError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl SpeechCapability for EspeakSpeech {
    async fn voices(&self) -> Vec<Voice> {
        match Command::new(&self.program).arg("--voices").output().await {
            Ok(output) if output.status.success() => {
                parse_voice_list(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(output) => {
                warn!("{} --voices exited with {}", self.program, output.status);
                Vec::new()
            }
            Err(e) => {
                warn!("Failed to list voices: {e}");
                Vec::new()
            }
        }
    }

    async fn speak(&self, text: &str, voice: Option<&str>) -> Result<(), SpeechError> {
        let generation = self.generation.load(Ordering::SeqCst);
        let voice = voice.unwrap_or(&self.default_voice);

        let t_gen = Instant::now();
        let wav = self.synthesize(text.trim(), voice).await?;
        if self.generation.load(Ordering::SeqCst) != generation {
            return Err(SpeechError::Cancelled);
        }

        let source = decode_wav(&wav)?;
        debug!(
            "Synthesized {} chars in {:.0}ms",
            text.chars().count(),
            t_gen.elapsed().as_secs_f64() * 1000.0
        );

        self.play(source, generation).await
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        if let Some(sink) = self.active_sink.lock().unwrap().as_ref() {
            sink.pause();
        }
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        if let Some(sink) = self.active_sink.lock().unwrap().as_ref() {
            sink.play();
        }
    }

    fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        if let Some(sink) = self.active_sink.lock().unwrap().take() {
            sink.stop();
        }
        debug!("Speech cancelled");
    }

    fn is_speaking(&self) -> bool {
        self.active_sink
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|s| !s.is_paused() && !s.empty())
    }
}

/// Open the default output on a dedicated thread and hand back its mixer.
fn open_output_stream() -> Result<(Mixer, std::sync::mpsc::Sender<()>), SpeechError> {
    let (mixer_tx, mixer_rx) = std::sync::mpsc::channel();
    let (guard_tx, guard_rx) = std::sync::mpsc::channel::<()>();

    std::thread::Builder::new()
        .name("audio-output".into())
        .spawn(move || match OutputStreamBuilder::open_default_stream() {
            Ok(stream) => {
                let _ = mixer_tx.send(Ok(stream.mixer().clone()));
                // Blocks until the owning EspeakSpeech is dropped.
                let _ = guard_rx.recv();
                drop(stream);
            }
            Err(e) => {
                let _ = mixer_tx.send(Err(e.to_string()));
            }
        })
        .map_err(|e| SpeechError::Unavailable(format!("audio thread: {e}")))?;

    let mixer = mixer_rx
        .recv()
        .map_err(|_| SpeechError::Unavailable("audio thread exited".into()))?
        .map_err(|e| SpeechError::Unavailable(format!("audio output: {e}")))?;
    Ok((mixer, guard_tx))
}

/// Decode espeak's WAV output. Streaming output carries a bogus length
/// header, so samples are read until the first error.
fn decode_wav(bytes: &[u8]) -> Result<SamplesBuffer, SpeechError> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| SpeechError::Synthesis(format!("invalid WAV from synthesizer: {e}")))?;
    let spec = reader.spec();
    let scale = f32::from(i16::MAX);
    let samples: Vec<f32> = reader
        .samples::<i16>()
        .map_while(Result::ok)
        .map(|s| f32::from(s) / scale)
        .collect();
    Ok(SamplesBuffer::new(spec.channels, spec.sample_rate, samples))
}

/// Parse `espeak-ng --voices` output:
///
/// ```text
/// Pty Language       Age/Gender VoiceName          File                 Other Languages
///  5  ko              --/M      Korean             roa/ko
/// ```
pub fn parse_voice_list(output: &str) -> Vec<Voice> {
    let mut voices: Vec<Voice> = Vec::new();
    for line in output.lines().skip(1) {
        let columns: Vec<&str> = line.split_whitespace().collect();
        let [_priority, lang, _gender, name, ..] = columns.as_slice() else {
            continue;
        };
        if voices.iter().any(|v| v.id == *lang) {
            continue;
        }
        voices.push(Voice {
            id: lang.to_string(),
            name: name.replace('_', " "),
            lang: lang.to_string(),
        });
    }
    voices
}

#[cfg(test)]
mod tests {
    use super::*;

    const VOICES: &str = "\
Pty Language       Age/Gender VoiceName          File                 Other Languages
 5  en-us           --/M      English_(America)  gmw/en-US            (en 2)
 5  ja              --/M      Japanese           jpx/ja
 5  ko              --/M      Korean             roa/ko
 5  ko              --/F      Korean_2           roa/ko2
";

    #[test]
    fn test_parse_voice_list() {
        let voices = parse_voice_list(VOICES);
        assert_eq!(voices.len(), 3);
        assert_eq!(voices[0].name, "English (America)");
        let korean = crate::speech::capability::korean_voices(voices);
        assert_eq!(korean.len(), 1);
        assert_eq!(korean[0].id, "ko");
        assert_eq!(korean[0].name, "Korean");
    }

    #[test]
    fn test_parse_voice_list_ignores_garbage() {
        assert!(parse_voice_list("").is_empty());
        assert!(parse_voice_list("header only\n\n  \n").is_empty());
    }

    #[test]
    fn test_decode_wav_reads_samples() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut bytes = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut bytes, spec).unwrap();
            for s in [0i16, i16::MAX, i16::MIN + 1] {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        assert!(decode_wav(bytes.get_ref()).is_ok());
        assert!(decode_wav(b"not a wav").is_err());
    }
}
