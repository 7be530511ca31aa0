//! Command orchestration: ties generation, storage, speech, export and
//! recording together behind the CLI subcommands.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::export::{
    self, PrayerDocument, DEFAULT_DOCX_NAME, OPEN_FAILED, PRINT_FAILED, WORD_FAILED,
};
use crate::generator::PrayerGenerator;
use crate::notifier::Notifier;
use crate::prayer::PrayerRequest;
use crate::recorder::{save_wav, AudioRecorder};
use crate::speech::capability::{korean_voices, preferred_voice, test_voice, SpeechCapability};
use crate::speech::espeak::EspeakSpeech;
use crate::speech::sequencer::{PlaybackOptions, PlaybackOutcome, PlaybackState, SpeechSequencer};
use crate::storage::{PrayerStore, SaveOutcome, SavedPrayer, Settings};

pub const API_KEY_ENV: &str = "PRAYER_API_KEY";

const OVERWRITE_PROMPT: &str = "동일한 파일명의 기도문이 있습니다. 기존 기도문을 수정하시겠습니까?";
const DELETE_PROMPT: &str = "선택한 기도문을 삭제하시겠습니까?";
const RECORD_POLL: Duration = Duration::from_millis(100);

/// What to do with a freshly generated prayer.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub save: bool,
    pub speak: bool,
    pub print: bool,
    /// `Some(None)` exports to the default location.
    pub word: Option<Option<PathBuf>>,
    pub assume_yes: bool,
}

/// Where the text to speak comes from.
#[derive(Debug, Clone)]
pub enum SpeakSource {
    Saved(String),
    File(PathBuf),
}

pub struct PrayerService {
    config: Config,
    store: PrayerStore,
    notifier: Notifier,
}

impl PrayerService {
    pub fn new(config: Config) -> Self {
        let store = PrayerStore::new(config.storage.resolved_dir());
        let notifier = Notifier::new(config.feedback.notifications);
        debug!("Data directory: {}", store.dir().display());

        Self {
            config,
            store,
            notifier,
        }
    }

    /// Settings with the environment override applied.
    pub fn settings(&self) -> Settings {
        let mut settings = self.store.load_settings();
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                settings.api_key = key;
            }
        }
        if settings.model.is_empty() {
            settings.model = self.config.generation.default_model.clone();
        }
        settings
    }

    pub fn show_settings(&self) {
        let settings = self.settings();
        println!("API 모델: {}", settings.model);
        println!("API Key: {}", mask_key(&settings.api_key));
        println!("저장 위치: {}", self.store.dir().display());
    }

    pub fn set_settings(&self, api_key: Option<String>, model: Option<String>) {
        let mut settings = self.store.load_settings();
        let key_changed = api_key.is_some();
        if let Some(key) = api_key {
            settings.api_key = key.trim().to_string();
        }
        if let Some(model) = model {
            settings.model = model;
        }

        match self.store.save_settings(&settings) {
            Ok(()) if key_changed => self.notifier.success("API Key가 저장되었습니다."),
            Ok(()) => self.notifier.success("설정이 저장되었습니다."),
            Err(e) => {
                warn!("{e}");
                self.notifier.error(e.user_message());
            }
        }
    }

    pub async fn generate(
        &self,
        request: PrayerRequest,
        options: GenerateOptions,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let settings = self.settings();
        let generator = PrayerGenerator::new(&self.config.generation)?;

        info!(
            "Generating prayer ({}, {}, {}, {}분)",
            request.service_type,
            request.style,
            request.audience,
            request.length()
        );
        let content = match generator.generate(&settings.api_key, &request).await {
            Ok(content) => content,
            Err(e) => {
                self.notifier.error(e.user_message());
                return Err(e.into());
            }
        };

        println!("{content}");
        println!();
        self.notifier.success("기도문이 생성되었습니다.");

        let saved = SavedPrayer::new(&request, content);
        if options.save {
            self.save(saved.clone(), options.assume_yes);
        }

        let doc = PrayerDocument {
            content: &saved.content,
            service_type: saved.service_type,
            style: saved.style,
            audience: saved.audience,
            length: saved.length,
            date: None,
        };
        if options.print {
            self.print_document(&doc);
        }
        if let Some(path) = options.word {
            self.export_document(&doc, path);
        }
        if options.speak {
            self.speak_text(&saved.content).await;
        }
        Ok(())
    }

    fn save(&self, prayer: SavedPrayer, assume_yes: bool) {
        match self.store.find_match(&prayer) {
            Ok(Some(existing)) => {
                if !confirm(OVERWRITE_PROMPT, assume_yes) {
                    info!("Kept existing prayer {}", existing.id);
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!("{e}");
                self.notifier.error(e.user_message());
                return;
            }
        }

        match self.store.save(prayer) {
            Ok(SaveOutcome::Inserted { id }) => {
                self.notifier.success("기도문이 저장되었습니다.");
                println!("ID: {id}");
            }
            Ok(SaveOutcome::Updated { id }) => {
                self.notifier.success("기도문이 수정되었습니다.");
                println!("ID: {id}");
            }
            Err(e) => {
                warn!("{e}");
                self.notifier.error(e.user_message());
            }
        }
    }

    pub fn list(&self) {
        let prayers = match self.store.load_sorted() {
            Ok(prayers) => prayers,
            Err(e) => {
                warn!("{e}");
                self.notifier.error(e.user_message());
                return;
            }
        };

        if prayers.is_empty() {
            println!("저장된 기도문이 없습니다.");
            return;
        }
        for prayer in &prayers {
            println!("{:>15}  {}", prayer.id, prayer.title());
        }
    }

    pub fn show(&self, id: &str) {
        if let Some(prayer) = self.lookup(id) {
            println!("{}", prayer.title());
            println!();
            println!("{}", prayer.content);
        }
    }

    /// Open the prayer in `$EDITOR` and store the edited text.
    pub async fn edit(&self, id: &str) -> Result<(), Box<dyn std::error::Error>> {
        let Some(mut prayer) = self.lookup(id) else {
            return Ok(());
        };

        let path = std::env::temp_dir().join(format!("prayer-{}.txt", prayer.id));
        std::fs::write(&path, &prayer.content)?;

        let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vi".into());
        let (program, args) = split_command(&editor).ok_or("EDITOR is empty")?;
        let status = tokio::process::Command::new(program)
            .args(args)
            .arg(&path)
            .status()
            .await?;

        let edited = std::fs::read_to_string(&path)?;
        if let Err(e) = std::fs::remove_file(&path) {
            debug!("Failed to remove {}: {e}", path.display());
        }

        if !status.success() {
            warn!("{editor} exited with {status}");
            return Ok(());
        }
        let edited = edited.trim_end().to_string();
        if edited == prayer.content {
            println!("변경 사항이 없습니다.");
            return Ok(());
        }

        prayer.content = edited;
        self.save(prayer, true);
        Ok(())
    }

    pub fn delete(&self, id: &str, assume_yes: bool) {
        if !confirm(DELETE_PROMPT, assume_yes) {
            return;
        }
        match self.store.delete(id) {
            Ok(true) => self.notifier.success("기도문이 삭제되었습니다."),
            Ok(false) => println!("기도문을 찾을 수 없습니다: {id}"),
            Err(e) => {
                warn!("{e}");
                self.notifier.error(e.user_message());
            }
        }
    }

    pub async fn speak(&self, source: SpeakSource) -> Result<(), Box<dyn std::error::Error>> {
        let text = match source {
            SpeakSource::Saved(id) => match self.lookup(&id) {
                Some(prayer) => {
                    println!("{}", prayer.title());
                    prayer.content
                }
                None => return Ok(()),
            },
            SpeakSource::File(path) => std::fs::read_to_string(&path)?,
        };
        self.speak_text(&text).await;
        Ok(())
    }

    async fn speak_text(&self, text: &str) {
        let speech = match EspeakSpeech::open(&self.config.speech).await {
            Ok(speech) => Arc::new(speech),
            Err(e) => {
                warn!("{e}");
                self.notifier.error("음성 변환 중 오류가 발생했습니다.");
                return;
            }
        };
        let voice = self.pick_voice(&*speech).await;

        let (sequencer, handle) =
            SpeechSequencer::new(speech, PlaybackOptions::from(&self.config.speech));
        println!("[p] 일시정지  [r] 계속 재생  [s] 중지  [h] 화면 숨김  [v] 화면 복귀");

        let mut input = spawn_stdin_reader();
        let mut states = handle.subscribe();
        let play = sequencer.play(text, voice.as_deref(), |range| {
            if let Some(range) = range {
                println!("▶ {}", text[range].trim());
            }
        });
        tokio::pin!(play);

        let result = loop {
            tokio::select! {
                result = &mut play => break result,
                Some(line) = input.recv() => match line.trim() {
                    "p" => handle.pause(),
                    "r" => handle.resume(),
                    "s" | "q" => handle.stop(),
                    "h" => handle.hidden(),
                    "v" => handle.visible(),
                    other => debug!("Ignoring input {other:?} ({})", handle.state()),
                },
                Ok(()) = states.changed() => {
                    let state = *states.borrow_and_update();
                    match state {
                        PlaybackState::Paused => println!("[일시정지]"),
                        PlaybackState::Playing => println!("[재생]"),
                        PlaybackState::Idle | PlaybackState::Stopped => {}
                    }
                }
            }
        };

        match result {
            Ok(PlaybackOutcome::Completed) => println!("재생이 끝났습니다."),
            Ok(PlaybackOutcome::Stopped) => println!("재생을 중지했습니다."),
            Ok(PlaybackOutcome::Abandoned) => println!("오래 멈춰 있어 재생을 종료했습니다."),
            Err(e) => self.notifier.error(e.user_message()),
        }
    }

    async fn pick_voice<S: SpeechCapability>(&self, speech: &S) -> Option<String> {
        if !self.config.speech.voice.is_empty() {
            return Some(self.config.speech.voice.clone());
        }
        let voices = korean_voices(speech.voices().await);
        debug!("Korean voices: {voices:?}");
        preferred_voice(&voices).map(|v| v.id.clone())
    }

    pub async fn voices(&self, test: Option<String>) {
        let speech = match EspeakSpeech::open(&self.config.speech).await {
            Ok(speech) => speech,
            Err(e) => {
                warn!("{e}");
                self.notifier.error("음성 변환 중 오류가 발생했습니다.");
                return;
            }
        };

        let voices = korean_voices(speech.voices().await);
        if voices.is_empty() {
            println!("사용 가능한 한국어 음성이 없습니다.");
        }
        let preferred = preferred_voice(&voices).map(|v| v.id.clone());
        for voice in &voices {
            let mark = if preferred.as_ref() == Some(&voice.id) { "*" } else { " " };
            println!("{mark} {:<20} {} ({})", voice.id, voice.name, voice.lang);
        }

        if let Some(id) = test {
            let voice = if id.is_empty() { preferred } else { Some(id) };
            if let Err(e) = test_voice(&speech, voice.as_deref()).await {
                warn!("Voice test failed: {e}");
                self.notifier.error("음성 변환 중 오류가 발생했습니다.");
            }
        }
    }

    pub fn print(&self, id: &str) {
        if let Some(prayer) = self.lookup(id) {
            self.print_document(&saved_document(&prayer));
        }
    }

    fn print_document(&self, doc: &PrayerDocument<'_>) {
        let path = match export::print(doc, &self.config.export_dir()) {
            Ok(path) => path,
            Err(e) => {
                warn!("{e}");
                self.notifier.error(PRINT_FAILED);
                return;
            }
        };
        println!("인쇄 페이지: {}", path.display());

        let export = &self.config.export;
        if !export.auto_open || export.open_command.is_empty() {
            return;
        }
        if let Err(e) = export::open_with(&export.open_command, &path) {
            warn!("{e}");
            self.notifier
                .error(&format!("{OPEN_FAILED} 파일을 직접 열어 주세요: {}", path.display()));
        }
    }

    pub fn export(&self, id: &str, output: Option<PathBuf>) {
        if let Some(prayer) = self.lookup(id) {
            self.export_document(&saved_document(&prayer), output);
        }
    }

    fn export_document(&self, doc: &PrayerDocument<'_>, output: Option<PathBuf>) {
        let path = output.unwrap_or_else(|| self.config.export_dir().join(DEFAULT_DOCX_NAME));
        match export::save_to_word(doc, &path) {
            Ok(path) => {
                self.notifier.success("Word 파일이 저장되었습니다.");
                println!("{}", path.display());
            }
            Err(e) => {
                warn!("{e}");
                self.notifier.error(WORD_FAILED);
            }
        }
    }

    /// Record the reader while the prayer is shown; Enter stops.
    pub async fn record(&self, id: &str, output: Option<PathBuf>) {
        let Some(prayer) = self.lookup(id) else {
            return;
        };

        let mut recorder = AudioRecorder::new(self.config.recording.clone());
        if let Err(e) = recorder.open_stream() {
            warn!("{e}");
            self.notifier.error(e.user_message());
            return;
        }

        println!("{}", prayer.title());
        println!();
        println!("{}", prayer.content);
        println!();
        println!(
            "녹음 중입니다. Enter를 누르면 종료합니다. (최대 {:.0}초)",
            recorder.config().max_duration
        );

        let mut input = spawn_stdin_reader();
        let mut poll = tokio::time::interval(RECORD_POLL);
        recorder.start();
        loop {
            tokio::select! {
                Some(_) = input.recv() => break,
                _ = poll.tick() => {
                    if recorder.limit_reached() {
                        println!("최대 녹음 시간에 도달했습니다.");
                        break;
                    }
                }
            }
        }
        let samples = recorder.stop();

        let path = output.unwrap_or_else(|| {
            self.config
                .export_dir()
                .join(format!("{}.wav", saved_document(&prayer).file_stem()))
        });
        match save_wav(&path, &samples, recorder.config()) {
            Ok(()) => {
                self.notifier.success("녹음이 저장되었습니다.");
                println!("{}", path.display());
            }
            Err(e) => {
                warn!("{e}");
                self.notifier.error(e.user_message());
            }
        }
    }

    /// Find a saved prayer, reporting failures to the user.
    fn lookup(&self, id: &str) -> Option<SavedPrayer> {
        match self.store.get(id) {
            Ok(Some(prayer)) => Some(prayer),
            Ok(None) => {
                self.notifier.error(&format!("기도문을 찾을 수 없습니다: {id}"));
                None
            }
            Err(e) => {
                warn!("{e}");
                self.notifier.error(e.user_message());
                None
            }
        }
    }
}

fn saved_document(prayer: &SavedPrayer) -> PrayerDocument<'_> {
    PrayerDocument {
        content: &prayer.content,
        service_type: prayer.service_type,
        style: prayer.style,
        audience: prayer.audience,
        length: prayer.length,
        date: Some(prayer.day()),
    }
}

/// Forward stdin lines from a plain thread so a pending read never holds up
/// runtime shutdown.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        warn!("Failed to start input reader: {e}");
    }
    rx
}

fn confirm(message: &str, assume_yes: bool) -> bool {
    if assume_yes {
        return true;
    }
    print!("{message} [y/N] ");
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    if io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    is_yes(&answer)
}

fn is_yes(answer: &str) -> bool {
    matches!(
        answer.trim().to_lowercase().as_str(),
        "y" | "yes" | "예" | "네"
    )
}

fn mask_key(key: &str) -> String {
    if key.is_empty() {
        return "(없음)".into();
    }
    let visible: String = key.chars().take(3).collect();
    format!("{visible}{}", "*".repeat(key.chars().count().saturating_sub(3).min(8)))
}

fn split_command(command: &str) -> Option<(&str, Vec<&str>)> {
    let mut parts = command.split_whitespace();
    let program = parts.next()?;
    Some((program, parts.collect()))
}
