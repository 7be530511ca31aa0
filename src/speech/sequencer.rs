//! Segment-by-segment speech playback with highlighting.
//!
//! One `SpeechSequencer` drives one playback session:
//!
//! IDLE → PLAYING ⇄ PAUSED → (STOPPED) → IDLE
//!
//! Control arrives through a cloneable `PlaybackHandle`. Stop raises a shared
//! flag first so that nothing started after the request can highlight, then
//! the sequencer cancels the backend. A watchdog restarts a segment when the
//! backend silently stops producing audio, and a pause caused by the view
//! being hidden expires after `stale_pause`.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::capability::{SpeechCapability, SpeechError};
use super::segment::segment;
use crate::config::SpeechConfig;

/// Consecutive silent watchdog observations before a segment is restarted.
const SILENT_TICKS_BEFORE_RESTART: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
    Stopped,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Playing => write!(f, "PLAYING"),
            Self::Paused => write!(f, "PAUSED"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// How a playback session ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed,
    Stopped,
    /// Hidden for longer than the stale window; not resumed.
    Abandoned,
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("segment {index} failed: {source}")]
    Synthesis {
        index: usize,
        #[source]
        source: SpeechError,
    },
    #[error("segment {index} halted {restarts} times")]
    Halted { index: usize, restarts: u32 },
}

impl PlaybackError {
    pub fn user_message(&self) -> &'static str {
        "음성 합성 중 오류가 발생했습니다."
    }
}

#[derive(Debug, Clone)]
pub struct PlaybackOptions {
    pub sentence_gap: Duration,
    pub newline_pause: Duration,
    pub watchdog_interval: Duration,
    pub stale_pause: Duration,
    pub max_restarts: u32,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self::from(&SpeechConfig::default())
    }
}

impl From<&SpeechConfig> for PlaybackOptions {
    fn from(config: &SpeechConfig) -> Self {
        Self {
            sentence_gap: Duration::from_millis(config.sentence_gap_ms),
            newline_pause: Duration::from_millis(config.newline_pause_ms),
            watchdog_interval: Duration::from_millis(config.watchdog_interval_ms.max(1)),
            stale_pause: Duration::from_secs(config.stale_pause_secs),
            max_restarts: config.max_restarts,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Command {
    Pause,
    Resume,
    Stop,
    Hidden,
    Visible,
}

/// Control side of a playback session.
#[derive(Debug, Clone)]
pub struct PlaybackHandle {
    commands: mpsc::UnboundedSender<Command>,
    stop_requested: Arc<AtomicBool>,
    state: watch::Receiver<PlaybackState>,
}

impl PlaybackHandle {
    pub fn pause(&self) {
        let _ = self.commands.send(Command::Pause);
    }

    pub fn resume(&self) {
        let _ = self.commands.send(Command::Resume);
    }

    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        let _ = self.commands.send(Command::Stop);
    }

    /// The view playing the prayer went out of sight.
    pub fn hidden(&self) {
        let _ = self.commands.send(Command::Hidden);
    }

    /// The view came back; resumes unless the pause has gone stale.
    pub fn visible(&self) {
        let _ = self.commands.send(Command::Visible);
    }

    pub fn state(&self) -> PlaybackState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.state.clone()
    }
}

#[derive(Debug, Clone, Copy)]
struct Pause {
    since: Instant,
    hidden: bool,
}

enum Effect {
    Continue,
    Stop,
    Abandon,
    Restart,
}

enum SegmentEnd {
    Finished,
    Interrupted(PlaybackOutcome),
}

pub struct SpeechSequencer<S> {
    speech: Arc<S>,
    options: PlaybackOptions,
    commands: mpsc::UnboundedReceiver<Command>,
    detached: bool,
    stop_requested: Arc<AtomicBool>,
    state: watch::Sender<PlaybackState>,
    paused: Option<Pause>,
}

impl<S: SpeechCapability> SpeechSequencer<S> {
    pub fn new(speech: Arc<S>, options: PlaybackOptions) -> (Self, PlaybackHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(PlaybackState::Idle);
        let stop_requested = Arc::new(AtomicBool::new(false));

        let handle = PlaybackHandle {
            commands: command_tx,
            stop_requested: Arc::clone(&stop_requested),
            state: state_rx,
        };
        let sequencer = Self {
            speech,
            options,
            commands: command_rx,
            detached: false,
            stop_requested,
            state: state_tx,
            paused: None,
        };
        (sequencer, handle)
    }

    /// Speak `text` segment by segment. `on_highlight` receives the byte
    /// range of each segment before it is spoken, and `None` whenever the
    /// highlight should be cleared.
    pub async fn play<F>(
        mut self,
        text: &str,
        voice: Option<&str>,
        mut on_highlight: F,
    ) -> Result<PlaybackOutcome, PlaybackError>
    where
        F: FnMut(Option<Range<usize>>) + Send,
    {
        while self.commands.try_recv().is_ok() {}
        self.stop_requested.store(false, Ordering::SeqCst);
        self.set_state(PlaybackState::Playing);

        let result = self.run(text, voice, &mut on_highlight).await;
        on_highlight(None);

        match &result {
            Ok(PlaybackOutcome::Completed) => info!("Playback finished"),
            Ok(outcome) => {
                self.speech.cancel();
                self.set_state(PlaybackState::Stopped);
                info!("Playback ended: {outcome:?}");
            }
            Err(e) => {
                self.speech.cancel();
                self.set_state(PlaybackState::Stopped);
                warn!("Playback failed: {e}");
            }
        }
        self.set_state(PlaybackState::Idle);
        result
    }

    async fn run<F>(
        &mut self,
        text: &str,
        voice: Option<&str>,
        on_highlight: &mut F,
    ) -> Result<PlaybackOutcome, PlaybackError>
    where
        F: FnMut(Option<Range<usize>>) + Send,
    {
        let segments = segment(text);
        let total = segments.len();
        debug!("Playing {total} segments");

        for (index, seg) in segments.iter().enumerate() {
            if let Some(outcome) = self.checkpoint().await {
                return Ok(outcome);
            }

            if seg.is_newline() {
                on_highlight(None);
                if let Some(outcome) = self.hold(self.options.newline_pause).await {
                    return Ok(outcome);
                }
                continue;
            }
            if seg.is_blank() {
                continue;
            }

            on_highlight(Some(seg.range()));
            match self.speak_segment(index, seg.text, voice).await? {
                SegmentEnd::Finished => {}
                SegmentEnd::Interrupted(outcome) => return Ok(outcome),
            }

            if index + 1 < total {
                if let Some(outcome) = self.hold(self.options.sentence_gap).await {
                    return Ok(outcome);
                }
            }
        }

        Ok(PlaybackOutcome::Completed)
    }

    /// Speak one segment, handling control commands and the watchdog while
    /// it is in flight.
    async fn speak_segment(
        &mut self,
        index: usize,
        text: &str,
        voice: Option<&str>,
    ) -> Result<SegmentEnd, PlaybackError> {
        let speech = Arc::clone(&self.speech);
        let period = self.options.watchdog_interval;
        let mut restarts = 0;

        'attempt: loop {
            if restarts > self.options.max_restarts {
                return Err(PlaybackError::Halted { index, restarts });
            }
            if restarts > 0 {
                info!("Restarting segment {index} (attempt {})", restarts + 1);
            }

            let speak = speech.speak(text, voice);
            tokio::pin!(speak);

            let mut watchdog = interval_at(Instant::now() + period, period);
            watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut silent_ticks = 0;

            loop {
                tokio::select! {
                    biased;

                    result = &mut speak => {
                        if self.stop_requested() {
                            return Ok(SegmentEnd::Interrupted(PlaybackOutcome::Stopped));
                        }
                        return match result {
                            Ok(()) => Ok(SegmentEnd::Finished),
                            Err(source) => Err(PlaybackError::Synthesis { index, source }),
                        };
                    }

                    command = self.commands.recv(), if !self.detached => {
                        let Some(command) = command else {
                            self.detached = true;
                            if self.paused.is_some() {
                                // Nobody left to resume us.
                                speech.cancel();
                                return Ok(SegmentEnd::Interrupted(PlaybackOutcome::Stopped));
                            }
                            continue;
                        };
                        match self.apply(command, true) {
                            Effect::Continue => {}
                            Effect::Stop => {
                                speech.cancel();
                                return Ok(SegmentEnd::Interrupted(PlaybackOutcome::Stopped));
                            }
                            Effect::Abandon => {
                                speech.cancel();
                                return Ok(SegmentEnd::Interrupted(PlaybackOutcome::Abandoned));
                            }
                            Effect::Restart => {
                                speech.cancel();
                                restarts += 1;
                                continue 'attempt;
                            }
                        }
                    }

                    _ = watchdog.tick() => {
                        if self.paused.is_some() || speech.is_speaking() {
                            silent_ticks = 0;
                            continue;
                        }
                        silent_ticks += 1;
                        if silent_ticks >= SILENT_TICKS_BEFORE_RESTART {
                            warn!("Speech halted silently during segment {index}");
                            speech.cancel();
                            restarts += 1;
                            continue 'attempt;
                        }
                    }
                }
            }
        }
    }

    /// Between segments: apply queued commands and block while paused.
    async fn checkpoint(&mut self) -> Option<PlaybackOutcome> {
        loop {
            while let Ok(command) = self.commands.try_recv() {
                match self.apply(command, false) {
                    Effect::Stop => return Some(PlaybackOutcome::Stopped),
                    Effect::Abandon => return Some(PlaybackOutcome::Abandoned),
                    Effect::Continue | Effect::Restart => {}
                }
            }
            if self.stop_requested() {
                return Some(PlaybackOutcome::Stopped);
            }
            if self.paused.is_none() {
                return None;
            }

            match self.commands.recv().await {
                Some(command) => match self.apply(command, false) {
                    Effect::Stop => return Some(PlaybackOutcome::Stopped),
                    Effect::Abandon => return Some(PlaybackOutcome::Abandoned),
                    Effect::Continue | Effect::Restart => {}
                },
                None => {
                    // Nobody left to resume us.
                    self.detached = true;
                    return Some(PlaybackOutcome::Stopped);
                }
            }
        }
    }

    /// Wait out a fixed pause between segments, still honoring commands.
    async fn hold(&mut self, duration: Duration) -> Option<PlaybackOutcome> {
        let deadline = Instant::now() + duration;
        loop {
            if self.stop_requested() {
                return Some(PlaybackOutcome::Stopped);
            }
            tokio::select! {
                _ = sleep_until(deadline) => return None,
                command = self.commands.recv(), if !self.detached => {
                    let Some(command) = command else {
                        self.detached = true;
                        continue;
                    };
                    match self.apply(command, false) {
                        Effect::Stop => return Some(PlaybackOutcome::Stopped),
                        Effect::Abandon => return Some(PlaybackOutcome::Abandoned),
                        Effect::Continue | Effect::Restart => {}
                    }
                }
            }
        }
    }

    fn apply(&mut self, command: Command, in_flight: bool) -> Effect {
        debug!("Playback command {command:?} ({})", *self.state.borrow());
        match command {
            Command::Stop => Effect::Stop,
            Command::Pause | Command::Hidden => {
                if self.paused.is_none() {
                    self.paused = Some(Pause {
                        since: Instant::now(),
                        hidden: matches!(command, Command::Hidden),
                    });
                    self.speech.pause();
                    self.set_state(PlaybackState::Paused);
                }
                Effect::Continue
            }
            Command::Resume => {
                if self.paused.take().is_some() {
                    self.speech.resume();
                    self.set_state(PlaybackState::Playing);
                }
                Effect::Continue
            }
            Command::Visible => {
                let Some(pause) = self.paused.filter(|p| p.hidden) else {
                    return Effect::Continue;
                };
                if pause.since.elapsed() > self.options.stale_pause {
                    info!(
                        "Hidden for {:.0}s, abandoning playback",
                        pause.since.elapsed().as_secs_f64()
                    );
                    self.paused = None;
                    return Effect::Abandon;
                }
                self.paused = None;
                self.speech.resume();
                self.set_state(PlaybackState::Playing);
                if in_flight && !self.speech.is_speaking() {
                    Effect::Restart
                } else {
                    Effect::Continue
                }
            }
        }
    }

    fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: PlaybackState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Playback state: {previous} → {state}");
        }
    }
}
