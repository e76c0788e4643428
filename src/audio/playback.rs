//! Speaker playback pipeline
//!
//! Renders inbound audio gaplessly despite irregular network delivery. Two
//! implementations of [`PlaybackPipeline`]:
//!
//! - [`StreamPlayback`] feeds a live output stream from a shared
//!   [`SampleBank`]; when the bank runs dry the stream renders silence
//!   rather than stalling.
//! - [`QueuedPlayback`] plays whole chunks one at a time with completion
//!   polling, for hosts whose playback API only accepts complete units.
//!
//! Both accept raw little-endian PCM16 at the wire rate (24kHz) and resample
//! to the device's actual output rate, which is queried, never assumed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio_util::sync::CancellationToken;

use crate::audio::{pcm, resample, TRANSPORT_OUTPUT_RATE};
use crate::config::AudioConfig;
use crate::{Error, Result};

/// Common contract for the streaming and whole-unit playback variants
pub trait PlaybackPipeline: Send {
    /// Open the output sink
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceUnavailable`] if no output device can be opened
    fn start(&mut self) -> Result<()>;

    /// Queue raw wire-rate PCM16 bytes for rendering
    ///
    /// # Errors
    ///
    /// Returns [`Error::Audio`] if the pipeline has not been started
    fn play(&mut self, pcm: &[u8]) -> Result<()>;

    /// Atomically discard all pending audio without closing the sink
    fn clear(&mut self);

    /// Discard pending audio and release the sink; idempotent
    fn stop(&mut self);

    /// Whether the sink is currently open
    fn is_running(&self) -> bool;
}

/// Select the playback variant for this platform at startup
#[must_use]
pub fn platform_default(config: &AudioConfig) -> Box<dyn PlaybackPipeline> {
    #[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
    {
        let _ = config;
        Box::new(StreamPlayback::new())
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        Box::new(QueuedPlayback::new(config.playback_poll_interval_ms))
    }
}

/// Growable FIFO sample accumulator consumed by a render callback
///
/// Pure state: the render path pulls `next_sample` per output slot and gets
/// silence when the accumulator is exhausted, so playback never stalls and
/// never repeats the last sample.
#[derive(Debug, Default)]
pub struct SampleBank {
    pending: VecDeque<f32>,
}

impl SampleBank {
    /// Create an empty accumulator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append decoded samples at the device rate
    pub fn push(&mut self, samples: &[f32]) {
        self.pending.extend(samples);
    }

    /// Pull the next sample, or silence if nothing is pending
    pub fn next_sample(&mut self) -> f32 {
        self.pending.pop_front().unwrap_or(0.0)
    }

    /// Serve one render period: FIFO samples first, zero-fill the rest
    ///
    /// Returns how many real (non-silence) samples were served.
    pub fn fill(&mut self, out: &mut [f32]) -> usize {
        let served = out.len().min(self.pending.len());
        for slot in out.iter_mut() {
            *slot = self.next_sample();
        }
        served
    }

    /// Discard everything pending
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Samples currently pending
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Handle to the thread that owns a live cpal output stream
struct OutputHandle {
    stop_tx: mpsc::Sender<()>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl OutputHandle {
    fn stop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for OutputHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Open the default output device on a dedicated thread, rendering from the
/// given bank; returns the device's actual output rate
fn open_output(bank: Arc<Mutex<SampleBank>>) -> Result<(u32, OutputHandle)> {
    let (ready_tx, ready_rx) = mpsc::channel::<Result<u32>>();
    let (stop_tx, stop_rx) = mpsc::channel::<()>();

    let join = std::thread::spawn(move || {
        let host = cpal::default_host();
        let Some(device) = host.default_output_device() else {
            let _ = ready_tx.send(Err(Error::DeviceUnavailable(
                "no output device available".to_string(),
            )));
            return;
        };

        let supported = match device.default_output_config() {
            Ok(c) => c,
            Err(e) => {
                let _ = ready_tx.send(Err(Error::DeviceUnavailable(e.to_string())));
                return;
            }
        };

        let config = supported.config();
        let device_rate = config.sample_rate.0;
        let channels = config.channels as usize;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = device_rate,
            channels = config.channels,
            "output sink opened"
        );

        let stream = device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let Ok(mut bank) = bank.lock() else {
                    data.fill(0.0);
                    return;
                };
                for frame in data.chunks_mut(channels) {
                    let sample = bank.next_sample();
                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "playback stream fault");
            },
            None,
        );

        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                let _ = ready_tx.send(Err(Error::DeviceUnavailable(e.to_string())));
                return;
            }
        };

        if let Err(e) = stream.play() {
            let _ = ready_tx.send(Err(Error::DeviceUnavailable(e.to_string())));
            return;
        }

        let _ = ready_tx.send(Ok(device_rate));

        let _ = stop_rx.recv();
        drop(stream);
        tracing::debug!("output sink released");
    });

    match ready_rx.recv() {
        Ok(Ok(rate)) => Ok((
            rate,
            OutputHandle {
                stop_tx,
                join: Some(join),
            },
        )),
        Ok(Err(e)) => {
            let _ = join.join();
            Err(e)
        }
        Err(_) => {
            let _ = join.join();
            Err(Error::DeviceUnavailable(
                "playback thread exited before reporting readiness".to_string(),
            ))
        }
    }
}

/// Streaming playback over a continuously running output stream
pub struct StreamPlayback {
    bank: Arc<Mutex<SampleBank>>,
    handle: Option<OutputHandle>,
    device_rate: Option<u32>,
}

impl Default for StreamPlayback {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamPlayback {
    /// Create a streaming playback pipeline
    #[must_use]
    pub fn new() -> Self {
        Self {
            bank: Arc::new(Mutex::new(SampleBank::new())),
            handle: None,
            device_rate: None,
        }
    }
}

impl PlaybackPipeline for StreamPlayback {
    fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        let (device_rate, handle) = open_output(Arc::clone(&self.bank))?;
        self.device_rate = Some(device_rate);
        self.handle = Some(handle);
        tracing::debug!(device_rate, "streaming playback started");
        Ok(())
    }

    fn play(&mut self, pcm_bytes: &[u8]) -> Result<()> {
        let Some(device_rate) = self.device_rate else {
            return Err(Error::Audio("playback not started".to_string()));
        };
        let samples = pcm::pcm16_to_f32(pcm_bytes);
        let samples = resample(&samples, TRANSPORT_OUTPUT_RATE, device_rate);
        if let Ok(mut bank) = self.bank.lock() {
            bank.push(&samples);
        }
        Ok(())
    }

    fn clear(&mut self) {
        if let Ok(mut bank) = self.bank.lock() {
            bank.clear();
        }
    }

    fn stop(&mut self) {
        self.clear();
        if let Some(mut handle) = self.handle.take() {
            handle.stop();
            tracing::debug!("streaming playback stopped");
        }
        self.device_rate = None;
    }

    fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

/// Whole-unit playback: chunks queue FIFO and a single serialized consumer
/// plays one unit to completion before dequeuing the next
///
/// Completion is detected by bounded-interval polling because the unit API
/// offers no completion event. `clear` empties the queue atomically; a unit
/// already rendering finishes. Must be started from within a tokio runtime.
pub struct QueuedPlayback {
    queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
    notify: Arc<tokio::sync::Notify>,
    poll_interval_ms: u64,
    cancel: Option<CancellationToken>,
}

impl QueuedPlayback {
    /// Create a whole-unit playback pipeline
    #[must_use]
    pub fn new(poll_interval_ms: u64) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            notify: Arc::new(tokio::sync::Notify::new()),
            poll_interval_ms,
            cancel: None,
        }
    }

    /// Chunks waiting to be played
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }
}

impl PlaybackPipeline for QueuedPlayback {
    fn start(&mut self) -> Result<()> {
        if self.cancel.is_some() {
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let consumer_cancel = cancel.clone();
        let queue = Arc::clone(&self.queue);
        let notify = Arc::clone(&self.notify);
        let poll_ms = self.poll_interval_ms;

        tokio::spawn(async move {
            loop {
                let next = queue.lock().ok().and_then(|mut q| q.pop_front());
                let Some(pcm_bytes) = next else {
                    tokio::select! {
                        () = consumer_cancel.cancelled() => break,
                        () = notify.notified() => continue,
                    }
                };

                let unit_cancel = consumer_cancel.clone();
                let played = tokio::task::spawn_blocking(move || {
                    play_unit_blocking(&pcm_bytes, poll_ms, &unit_cancel)
                })
                .await;

                match played {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(error = %e, "playback unit failed"),
                    Err(e) => tracing::warn!(error = %e, "playback unit panicked"),
                }

                if consumer_cancel.is_cancelled() {
                    break;
                }
            }
        });

        self.cancel = Some(cancel);
        tracing::debug!("queued playback started");
        Ok(())
    }

    fn play(&mut self, pcm_bytes: &[u8]) -> Result<()> {
        if self.cancel.is_none() {
            return Err(Error::Audio("playback not started".to_string()));
        }
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(pcm_bytes.to_vec());
        }
        self.notify.notify_one();
        Ok(())
    }

    fn clear(&mut self) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.clear();
        }
    }

    fn stop(&mut self) {
        self.clear();
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
            self.notify.notify_one();
            tracing::debug!("queued playback stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.cancel.is_some()
    }
}

/// Play one chunk to completion on a transient output stream
///
/// Polls a finished flag on a bounded interval; the cancellation token
/// aborts the wait early during teardown.
fn play_unit_blocking(pcm_bytes: &[u8], poll_ms: u64, cancel: &CancellationToken) -> Result<()> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::DeviceUnavailable("no output device".to_string()))?;
    let supported = device
        .default_output_config()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;
    let config = supported.config();
    let device_rate = config.sample_rate.0;
    let channels = config.channels as usize;

    let samples = pcm::pcm16_to_f32(pcm_bytes);
    let samples = resample(&samples, TRANSPORT_OUTPUT_RATE, device_rate);
    if samples.is_empty() {
        return Ok(());
    }
    let total = samples.len();

    let finished = Arc::new(AtomicBool::new(false));
    let finished_render = Arc::clone(&finished);
    let mut position = 0usize;

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let sample = if position < samples.len() {
                        let s = samples[position];
                        position += 1;
                        s
                    } else {
                        finished_render.store(true, Ordering::Release);
                        0.0
                    };
                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "playback unit stream fault");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    // Upper bound: chunk duration plus slack, in case the finished flag is
    // never observed (device pulled mid-unit)
    let duration_ms = (total as u64 * 1000) / u64::from(device_rate);
    let deadline = std::time::Instant::now() + Duration::from_millis(duration_ms + 500);

    while !finished.load(Ordering::Acquire) && !cancel.is_cancelled() {
        if std::time::Instant::now() > deadline {
            break;
        }
        std::thread::sleep(Duration::from_millis(poll_ms));
    }

    drop(stream);
    tracing::debug!(samples = total, "playback unit complete");
    Ok(())
}
