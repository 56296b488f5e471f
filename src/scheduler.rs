//! Background capture scheduler
//!
//! A dedicated capture thread slices microphone audio into utterances and
//! queues them on a channel. A single processing task takes them off the
//! queue one at a time, so an exchange (recognition through the last
//! spoken sentence) always finishes before the next one starts while
//! capture keeps running.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio::task;

use crate::config::ListenerConfig;
use crate::session::UtteranceHandler;
use crate::voice::{AudioCapture, Utterance, UtteranceDetector};
use crate::{Error, Result};

/// How often the capture thread drains the device buffer
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Audio input the capture thread reads from
///
/// Created on the capture thread itself, so implementations need not be
/// `Send`.
pub trait AudioSource {
    /// Begin delivering samples
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be started
    fn start(&mut self) -> Result<()>;

    /// Samples captured since the previous call
    fn take_samples(&mut self) -> Vec<f32>;

    /// Unrecoverable device error, if one occurred
    fn failure(&self) -> Option<String>;

    /// Sample rate of delivered samples
    fn sample_rate(&self) -> u32;
}

impl AudioSource for AudioCapture {
    fn start(&mut self) -> Result<()> {
        Self::start(self)
    }

    fn take_samples(&mut self) -> Vec<f32> {
        self.take_buffer()
    }

    fn failure(&self) -> Option<String> {
        Self::failure(self)
    }

    fn sample_rate(&self) -> u32 {
        Self::sample_rate(self)
    }
}

/// Listener lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Not started
    Idle,
    /// Capturing and dispatching utterances
    Listening,
    /// Intake has ended; queued utterances may still be processing
    Stopped,
}

/// Continuously listens and feeds utterances to a handler
pub struct BackgroundListener {
    config: ListenerConfig,
    state: Arc<Mutex<ListenerState>>,
    stop: Arc<AtomicBool>,
    capture_thread: Option<JoinHandle<()>>,
    processor: Option<task::JoinHandle<()>>,
}

impl BackgroundListener {
    /// Create an idle listener
    #[must_use]
    pub fn new(config: ListenerConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(ListenerState::Idle)),
            stop: Arc::new(AtomicBool::new(false)),
            capture_thread: None,
            processor: None,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ListenerState {
        self.state
            .lock()
            .map_or(ListenerState::Stopped, |state| *state)
    }

    /// Start listening on the default microphone
    ///
    /// # Errors
    ///
    /// Returns error if already started or the device cannot be opened
    pub async fn start<H>(&mut self, handler: H) -> Result<()>
    where
        H: UtteranceHandler + 'static,
    {
        self.start_with(AudioCapture::new, handler).await
    }

    /// Start listening on the source built by `open`
    ///
    /// `open` runs on the capture thread. Ambient noise is calibrated once
    /// before the first utterance.
    ///
    /// # Errors
    ///
    /// Returns error if already started or the source fails to start
    pub async fn start_with<S, F, H>(&mut self, open: F, handler: H) -> Result<()>
    where
        S: AudioSource,
        F: FnOnce() -> Result<S> + Send + 'static,
        H: UtteranceHandler + 'static,
    {
        if self.state() != ListenerState::Idle {
            return Err(Error::Audio("listener already started".to_string()));
        }

        let (utterance_tx, utterance_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let config = self.config.clone();
        let stop = Arc::clone(&self.stop);
        let state = Arc::clone(&self.state);
        set_state(&self.state, ListenerState::Listening);

        let spawned = std::thread::Builder::new()
            .name("lookchill-capture".to_string())
            .spawn(move || {
                capture_loop(open, &config, &stop, &utterance_tx, ready_tx);
                set_state(&state, ListenerState::Stopped);
            });
        let capture_thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                set_state(&self.state, ListenerState::Idle);
                return Err(e.into());
            }
        };

        let startup = ready_rx.await.unwrap_or_else(|_| {
            Err(Error::Audio("capture thread exited during startup".to_string()))
        });
        if let Err(e) = startup {
            let _ = task::spawn_blocking(move || capture_thread.join()).await;
            // Never listened, so a retry is allowed
            set_state(&self.state, ListenerState::Idle);
            return Err(e);
        }

        self.capture_thread = Some(capture_thread);
        self.processor = Some(spawn_processor(utterance_rx, handler));

        tracing::info!("listening in the background");
        Ok(())
    }

    /// Stop intake
    ///
    /// Signals the capture thread and returns without waiting for it or for
    /// in-flight processing.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        set_state(&self.state, ListenerState::Stopped);
        tracing::info!("background listening stopped");
    }

    /// Wait for capture to end and every queued utterance to be processed
    pub async fn join(&mut self) {
        if let Some(thread) = self.capture_thread.take() {
            let _ = task::spawn_blocking(move || thread.join()).await;
        }
        if let Some(processor) = self.processor.take() {
            if let Err(e) = processor.await {
                tracing::error!(error = %e, "utterance processor failed");
            }
        }
    }
}

impl Drop for BackgroundListener {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Process utterances from `utterances` strictly one at a time
///
/// Ends once the channel is closed and drained.
pub fn spawn_processor<H>(
    mut utterances: mpsc::UnboundedReceiver<Utterance>,
    mut handler: H,
) -> task::JoinHandle<()>
where
    H: UtteranceHandler + 'static,
{
    tokio::spawn(async move {
        while let Some(utterance) = utterances.recv().await {
            tracing::debug!(
                sequence = utterance.sequence,
                seconds = utterance.duration_secs(),
                "processing utterance"
            );
            handler.handle(utterance).await;
        }
        tracing::debug!("utterance queue closed");
    })
}

fn set_state(state: &Mutex<ListenerState>, next: ListenerState) {
    if let Ok(mut current) = state.lock() {
        *current = next;
    }
}

fn capture_loop<S, F>(
    open: F,
    config: &ListenerConfig,
    stop: &AtomicBool,
    utterances: &mpsc::UnboundedSender<Utterance>,
    ready: oneshot::Sender<Result<()>>,
) where
    S: AudioSource,
    F: FnOnce() -> Result<S>,
{
    let mut source = match open().and_then(|mut source| source.start().map(|()| source)) {
        Ok(source) => source,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let sample_rate = source.sample_rate();
    let mut detector = UtteranceDetector::new(config, sample_rate);
    let mut sequence = 0_u64;

    // Ambient calibration
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let calibration_len = (config.calibration_secs.max(0.0) * sample_rate as f32) as usize;
    let mut ambient = Vec::with_capacity(calibration_len);
    while ambient.len() < calibration_len && !stop.load(Ordering::SeqCst) {
        std::thread::sleep(POLL_INTERVAL);
        ambient.extend(source.take_samples());
    }
    detector.calibrate(&ambient);

    // Audio past the calibration window belongs to the first utterance
    let leftover = ambient.split_off(calibration_len.min(ambient.len()));
    let mut pending = leftover;

    while !stop.load(Ordering::SeqCst) {
        if let Some(failure) = source.failure() {
            tracing::error!(error = %failure, "capture device failed, stopping");
            break;
        }

        pending.extend(source.take_samples());
        let phrases = detector.process(&pending);
        let fed_at = Instant::now();
        let fed = detector.samples_seen();

        for phrase in phrases {
            let started_at = onset_instant(fed_at, fed, phrase.onset, sample_rate);
            let utterance =
                Utterance::new(sequence, phrase.samples, sample_rate).with_start(started_at);
            tracing::debug!(
                sequence,
                seconds = utterance.duration_secs(),
                "utterance captured"
            );
            sequence += 1;

            if utterances.send(utterance).is_err() {
                tracing::debug!("utterance queue closed, stopping capture");
                return;
            }
        }
        pending.clear();

        std::thread::sleep(POLL_INTERVAL);
    }

    tracing::debug!(utterances = sequence, "capture loop finished");
}

/// Wall-clock time of stream offset `onset`, given that the newest sample
/// (offset `fed`) arrived at `fed_at`
fn onset_instant(fed_at: Instant, fed: u64, onset: u64, sample_rate: u32) -> Instant {
    #[allow(clippy::cast_precision_loss)]
    let behind = fed.saturating_sub(onset) as f64 / f64::from(sample_rate.max(1));
    fed_at
        .checked_sub(Duration::from_secs_f64(behind))
        .unwrap_or(fed_at)
}
