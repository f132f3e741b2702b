//! Device capture.
//!
//! A dedicated thread owns the cpal stream (cpal streams are not `Send`)
//! and runs the drain loop; control flows through atomics so the handle
//! stays cheap to share.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::HeapRb;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use univoice_config::constants;
use univoice_core::{AudioFrame, Channels, SampleRate};

use crate::framer::FrameAssembler;
use crate::AudioError;

/// Ring capacity: two seconds at the device rate, mono-folded.
const RING_SECONDS: usize = 2;
const DRAIN_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Default)]
pub struct CaptureConfig {
    /// Specific device name; the system default when absent.
    pub device_name: Option<String>,
}

/// Running capture session. Dropping the handle stops the device.
pub struct AudioCapture {
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl AudioCapture {
    /// Open the device and start delivering 640-byte PCM16 frames to
    /// `frame_tx` in arrival order.
    pub fn start(
        config: CaptureConfig,
        frame_tx: mpsc::Sender<Vec<u8>>,
    ) -> Result<Self, AudioError> {
        let running = Arc::new(AtomicBool::new(true));
        let paused = Arc::new(AtomicBool::new(false));

        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), AudioError>>();
        let thread_running = running.clone();
        let thread_paused = paused.clone();

        let thread = std::thread::Builder::new()
            .name("univoice-capture".into())
            .spawn(move || {
                capture_thread(config, frame_tx, thread_running, thread_paused, ready_tx);
            })
            .map_err(|e| AudioError::Device(e.to_string()))?;

        // Surface device/stream setup failures synchronously.
        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                running,
                paused,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(AudioError::Device("capture thread died during setup".into()))
            }
        }
    }

    /// Stop delivering frames; the device stays open.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn capture_thread(
    config: CaptureConfig,
    frame_tx: mpsc::Sender<Vec<u8>>,
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    ready_tx: std::sync::mpsc::Sender<Result<(), AudioError>>,
) {
    let setup = open_stream(&config, paused.clone());
    let (stream, mut consumer, device_rate, device_channels) = match setup {
        Ok(parts) => parts,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(AudioError::Stream(e.to_string())));
        return;
    }
    let _ = ready_tx.send(Ok(()));
    tracing::info!(device_rate, channels = device_channels, "audio capture started");

    let mut assembler = FrameAssembler::default();
    let mut sequence: u64 = 0;
    let mut scratch = vec![0f32; device_rate as usize / 4];

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(DRAIN_INTERVAL);

        let drained = consumer.pop_slice(&mut scratch);
        if drained == 0 {
            continue;
        }
        if paused.load(Ordering::SeqCst) {
            // Delivery stops while paused; drained samples are discarded so
            // resume does not replay stale audio.
            continue;
        }

        let channels = if device_channels >= 2 {
            Channels::Stereo
        } else {
            Channels::Mono
        };
        let rate = SampleRate::from_device_rate(device_rate).unwrap_or(SampleRate::Hz48000);
        let frame = AudioFrame::new(scratch[..drained].to_vec(), rate, channels, sequence);
        sequence += 1;

        let frame = if channels == Channels::Stereo {
            frame.to_mono()
        } else {
            frame
        };
        let frame = frame.resample(SampleRate::Hz16000);
        let pcm16 = frame.to_pcm16();

        for out in assembler.push(&pcm16) {
            debug_assert_eq!(out.len(), constants::audio::FRAME_BYTES);
            if frame_tx.blocking_send(out).is_err() {
                tracing::info!("frame receiver dropped; stopping capture");
                running.store(false, Ordering::SeqCst);
                break;
            }
        }
    }

    drop(stream);
    tracing::info!("audio capture stopped");
}

type StreamParts = (cpal::Stream, ringbuf::HeapConsumer<f32>, u32, u16);

fn open_stream(config: &CaptureConfig, paused: Arc<AtomicBool>) -> Result<StreamParts, AudioError> {
    let host = cpal::default_host();

    let device = match &config.device_name {
        Some(name) => host
            .input_devices()
            .map_err(|e| AudioError::Device(e.to_string()))?
            .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
            .ok_or_else(|| AudioError::Device(format!("input device not found: {name}")))?,
        None => host.default_input_device().ok_or(AudioError::NoDevice)?,
    };

    let default_config = device
        .default_input_config()
        .map_err(|e| AudioError::Device(e.to_string()))?;
    let device_rate = default_config.sample_rate().0;
    let device_channels = default_config.channels();
    if SampleRate::from_device_rate(device_rate).is_none() {
        tracing::warn!(device_rate, "unrecognized device rate; resampling assumes 48kHz");
    }

    let ring = HeapRb::<f32>::new(device_rate as usize * device_channels as usize * RING_SECONDS);
    let (mut producer, consumer) = ring.split();

    let stream_config: cpal::StreamConfig = default_config.config();
    let err_fn = |e| tracing::warn!("capture stream error: {e}");

    // The callback runs on the OS audio thread: no locks, no allocation,
    // only a ring-buffer push. Overruns drop the oldest-unread audio.
    let stream = match default_config.sample_format() {
        cpal::SampleFormat::F32 => device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _| {
                    if !paused.load(Ordering::Relaxed) {
                        let pushed = producer.push_slice(data);
                        if pushed < data.len() {
                            tracing::trace!(dropped = data.len() - pushed, "capture ring overrun");
                        }
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| AudioError::Stream(e.to_string()))?,
        cpal::SampleFormat::I16 => device
            .build_input_stream(
                &stream_config,
                move |data: &[i16], _| {
                    if !paused.load(Ordering::Relaxed) {
                        for &sample in data {
                            let _ = producer.push(sample as f32 / 32768.0);
                        }
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| AudioError::Stream(e.to_string()))?,
        other => return Err(AudioError::Unsupported(format!("{other:?}"))),
    };

    Ok((stream, consumer, device_rate, device_channels))
}
