//! Microphone capture pipeline
//!
//! Turns the native-rate sample stream into fixed-duration, transport-rate,
//! base64-encoded chunks. Two implementations of [`CapturePipeline`] share
//! the pure [`Chunker`]:
//!
//! - [`StreamCapture`] emits chunks directly from the audio callback.
//! - [`PolledCapture`] drains the device buffer on a bounded interval, for
//!   hosts whose recording API only supports record-then-read cycles.
//!
//! The cpal stream lives on a dedicated thread because streams are not
//! `Send`; the pipeline handle itself is, so sessions can own it freely.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleRate;
use tokio_util::sync::CancellationToken;

use crate::audio::{pcm, resample, AudioChunk, TRANSPORT_BITS, TRANSPORT_CHANNELS, TRANSPORT_INPUT_RATE};
use crate::config::AudioConfig;
use crate::{Error, Result};

/// Receives each encoded chunk, exactly once, in temporal order
pub type ChunkSink = Arc<dyn Fn(AudioChunk) + Send + Sync>;

/// Receives a hard capture fault, at most once per start
pub type FaultSink = Arc<dyn Fn(Error) + Send + Sync>;

/// Common contract for the streaming and segment-based capture variants
pub trait CapturePipeline: Send {
    /// Acquire the microphone and begin emitting chunks
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] or [`Error::DeviceUnavailable`]
    /// if the microphone cannot be acquired
    fn start(&mut self, on_chunk: ChunkSink, on_error: FaultSink) -> Result<()>;

    /// Release the microphone; idempotent
    fn stop(&mut self);

    /// Whether the microphone is currently held
    fn is_running(&self) -> bool;
}

/// Select the capture variant for this platform at startup
#[must_use]
pub fn platform_default(config: &AudioConfig) -> Box<dyn CapturePipeline> {
    #[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
    {
        Box::new(StreamCapture::new(config.chunk_duration_ms))
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        Box::new(PolledCapture::new(
            config.chunk_duration_ms,
            config.capture_poll_interval_ms,
        ))
    }
}

/// Accumulates native-rate samples and slices whole transport chunks
///
/// Pure state machine: push samples in arbitrary increments, pop chunks when
/// a full window is buffered. FIFO with remainder carry, so concatenating
/// every popped chunk reconstructs the input stream exactly.
pub struct Chunker {
    native_rate: u32,
    chunk_len: usize,
    buffer: Vec<f32>,
    emitted: u64,
}

impl Chunker {
    /// Create a chunker for the given native rate and chunk duration
    #[must_use]
    pub fn new(native_rate: u32, chunk_duration_ms: u32) -> Self {
        let chunk_len = ((native_rate as usize) * (chunk_duration_ms as usize) / 1000).max(1);
        Self {
            native_rate,
            chunk_len,
            buffer: Vec::new(),
            emitted: 0,
        }
    }

    /// Append native-rate samples to the accumulator
    pub fn push(&mut self, samples: &[f32]) {
        self.buffer.extend_from_slice(samples);
    }

    /// Slice one full chunk off the front, if enough audio is buffered
    ///
    /// The slice is resampled to the transport rate and transport-encoded.
    pub fn pop_chunk(&mut self) -> Option<AudioChunk> {
        if self.buffer.len() < self.chunk_len {
            return None;
        }
        let window: Vec<f32> = self.buffer.drain(..self.chunk_len).collect();
        let samples = resample(&window, self.native_rate, TRANSPORT_INPUT_RATE);
        self.emitted += 1;
        Some(AudioChunk {
            data: pcm::encode_transport(&samples),
            sample_rate: TRANSPORT_INPUT_RATE,
            bits_per_sample: TRANSPORT_BITS,
            channels: TRANSPORT_CHANNELS,
        })
    }

    /// Number of chunks emitted so far
    #[must_use]
    pub const fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Native-rate samples currently buffered (the pending remainder)
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// One-shot latch recording a hard stream fault
///
/// The data callback stops feeding once the latch trips, the stream-owner
/// thread is woken so the device is released, and `is_running` reports the
/// dead stream without waiting for an explicit `stop`.
#[derive(Debug, Default)]
struct FaultLatch {
    tripped: AtomicBool,
}

impl FaultLatch {
    /// Record the fault; true only for the first trip
    fn trip(&self) -> bool {
        !self.tripped.swap(true, Ordering::AcqRel)
    }

    /// Whether a fault has been recorded
    fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }
}

/// Handle to the thread that owns a live cpal input stream
struct InputHandle {
    stop_tx: mpsc::Sender<()>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl InputHandle {
    fn stop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for InputHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Classify a microphone acquisition failure
fn acquisition_error(message: String) -> Error {
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("permission") || lowered.contains("denied") {
        Error::PermissionDenied(message)
    } else {
        Error::DeviceUnavailable(message)
    }
}

/// Open the default input device on a dedicated thread
///
/// `make_on_data` is invoked once with the device's native rate and returns
/// the callback that receives mono samples. `on_error` fires at most once;
/// after it fires, the data callback is never invoked again, the owning
/// thread drops the stream, and the microphone is released.
fn open_input<F>(
    latch: Arc<FaultLatch>,
    make_on_data: F,
    on_error: FaultSink,
) -> Result<(u32, InputHandle)>
where
    F: FnOnce(u32) -> Box<dyn FnMut(&[f32]) + Send> + Send + 'static,
{
    let (ready_tx, ready_rx) = mpsc::channel::<Result<u32>>();
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let stop_on_fault = stop_tx.clone();

    let join = std::thread::spawn(move || {
        let host = cpal::default_host();
        let Some(device) = host.default_input_device() else {
            let _ = ready_tx.send(Err(Error::DeviceUnavailable(
                "no input device available".to_string(),
            )));
            return;
        };

        // Prefer a mono config; otherwise downmix whatever the device offers
        let supported = device
            .supported_input_configs()
            .ok()
            .and_then(|mut configs| {
                configs
                    .find(|c| {
                        c.channels() == 1
                            && c.min_sample_rate() <= SampleRate(TRANSPORT_INPUT_RATE)
                            && c.max_sample_rate() >= SampleRate(TRANSPORT_INPUT_RATE)
                    })
                    .map(|c| c.with_sample_rate(SampleRate(TRANSPORT_INPUT_RATE)))
            })
            .or_else(|| device.default_input_config().ok());

        let Some(supported) = supported else {
            let _ = ready_tx.send(Err(Error::DeviceUnavailable(
                "no suitable input config found".to_string(),
            )));
            return;
        };

        let config = supported.config();
        let native_rate = config.sample_rate.0;
        let channels = config.channels as usize;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = native_rate,
            channels = config.channels,
            "microphone acquired"
        );

        let latch_data = Arc::clone(&latch);
        let mut on_data = make_on_data(native_rate);
        let mut mono = Vec::new();

        let stream = device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if latch_data.is_tripped() {
                    return;
                }
                if channels == 1 {
                    on_data(data);
                } else {
                    mono.clear();
                    for frame in data.chunks(channels) {
                        mono.push(frame.iter().sum::<f32>() / frame.len() as f32);
                    }
                    on_data(&mono);
                }
            },
            move |err| {
                if latch.trip() {
                    on_error(Error::Audio(format!("capture stream fault: {err}")));
                    // Wake the parked owner thread so the stream is dropped
                    // and the microphone released
                    let _ = stop_on_fault.send(());
                }
            },
            None,
        );

        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                let _ = ready_tx.send(Err(acquisition_error(e.to_string())));
                return;
            }
        };

        if let Err(e) = stream.play() {
            let _ = ready_tx.send(Err(acquisition_error(e.to_string())));
            return;
        }

        let _ = ready_tx.send(Ok(native_rate));

        // Park until told to stop; dropping the stream releases the device
        let _ = stop_rx.recv();
        drop(stream);
        tracing::debug!("microphone released");
    });

    match ready_rx.recv() {
        Ok(Ok(rate)) => Ok((
            rate,
            InputHandle {
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
                "capture thread exited before reporting readiness".to_string(),
            ))
        }
    }
}

/// Streaming capture: chunks are sliced and emitted inside the audio
/// callback itself
pub struct StreamCapture {
    chunk_duration_ms: u32,
    handle: Option<InputHandle>,
    latch: Option<Arc<FaultLatch>>,
}

impl StreamCapture {
    /// Create a streaming capture pipeline
    #[must_use]
    pub const fn new(chunk_duration_ms: u32) -> Self {
        Self {
            chunk_duration_ms,
            handle: None,
            latch: None,
        }
    }
}

impl CapturePipeline for StreamCapture {
    fn start(&mut self, on_chunk: ChunkSink, on_error: FaultSink) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }

        let latch = Arc::new(FaultLatch::default());
        let chunk_ms = self.chunk_duration_ms;
        let (_, handle) = open_input(
            Arc::clone(&latch),
            move |native_rate| {
                let mut chunker = Chunker::new(native_rate, chunk_ms);
                Box::new(move |data: &[f32]| {
                    chunker.push(data);
                    while let Some(chunk) = chunker.pop_chunk() {
                        on_chunk(chunk);
                    }
                })
            },
            on_error,
        )?;

        self.handle = Some(handle);
        self.latch = Some(latch);
        tracing::debug!("streaming capture started");
        Ok(())
    }

    fn stop(&mut self) {
        self.latch = None;
        if let Some(mut handle) = self.handle.take() {
            handle.stop();
            tracing::debug!("streaming capture stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.handle.is_some() && !self.latch.as_ref().is_some_and(|l| l.is_tripped())
    }
}

/// Segment-based capture: the device buffer is drained on a bounded
/// interval and fed through the same chunker
///
/// Presents the identical external contract as [`StreamCapture`]; any gap
/// introduced by drain latency is an accepted platform limitation. Must be
/// started from within a tokio runtime.
pub struct PolledCapture {
    chunk_duration_ms: u32,
    poll_interval_ms: u64,
    handle: Option<InputHandle>,
    latch: Option<Arc<FaultLatch>>,
    cancel: Option<CancellationToken>,
}

impl PolledCapture {
    /// Create a segment-based capture pipeline
    #[must_use]
    pub const fn new(chunk_duration_ms: u32, poll_interval_ms: u64) -> Self {
        Self {
            chunk_duration_ms,
            poll_interval_ms,
            handle: None,
            latch: None,
            cancel: None,
        }
    }
}

impl CapturePipeline for PolledCapture {
    fn start(&mut self, on_chunk: ChunkSink, on_error: FaultSink) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }

        let buffer: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
        let fill = Arc::clone(&buffer);

        let latch = Arc::new(FaultLatch::default());
        let cancel = CancellationToken::new();
        let cancel_on_fault = cancel.clone();
        let on_fault: FaultSink = Arc::new(move |e| {
            // A dead stream has nothing left to drain
            cancel_on_fault.cancel();
            on_error(e);
        });

        let (native_rate, handle) = open_input(
            Arc::clone(&latch),
            move |_| {
                Box::new(move |data: &[f32]| {
                    if let Ok(mut buf) = fill.lock() {
                        buf.extend_from_slice(data);
                    }
                })
            },
            on_fault,
        )?;

        let poll = cancel.clone();
        let chunk_ms = self.chunk_duration_ms;
        let interval_ms = self.poll_interval_ms;
        tokio::spawn(async move {
            let mut chunker = Chunker::new(native_rate, chunk_ms);
            let mut tick = tokio::time::interval(Duration::from_millis(interval_ms));
            loop {
                tokio::select! {
                    () = poll.cancelled() => break,
                    _ = tick.tick() => {
                        let drained = buffer
                            .lock()
                            .map(|mut buf| std::mem::take(&mut *buf))
                            .unwrap_or_default();
                        if drained.is_empty() {
                            continue;
                        }
                        chunker.push(&drained);
                        while let Some(chunk) = chunker.pop_chunk() {
                            on_chunk(chunk);
                        }
                    }
                }
            }
        });

        self.handle = Some(handle);
        self.latch = Some(latch);
        self.cancel = Some(cancel);
        tracing::debug!(interval_ms, "polled capture started");
        Ok(())
    }

    fn stop(&mut self) {
        self.latch = None;
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(mut handle) = self.handle.take() {
            handle.stop();
            tracing::debug!("polled capture stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.handle.is_some() && !self.latch.as_ref().is_some_and(|l| l.is_tripped())
    }
}
