//! Microphone capture on cpal
//!
//! cpal streams are not `Send`, so every capture runs on its own thread that
//! owns the stream until the track is stopped. Captured audio is down-mixed
//! to mono and metered; encoding happens further down the media stack.

use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Host, Sample, SampleFormat, Stream, StreamConfig};
use parley_common::media::VOICE_SAMPLE_RATE;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::devices::{AudioDevice, DeviceDirection, MediaDevices, MediaError};
use super::track::{AudioTrack, TrackFormat, TrackMeter};

// =============================================================================
// Constants
// =============================================================================

/// Scaling factor for RMS to UI level conversion (provides headroom for typical speech)
const RMS_DISPLAY_SCALE: f64 = 2.0;

/// Sample formats the capture callback can convert
const SUPPORTED_FORMATS: [SampleFormat; 3] =
    [SampleFormat::F32, SampleFormat::I16, SampleFormat::U16];

/// Name given to capture threads
const CAPTURE_THREAD_NAME: &str = "parley-capture";

// =============================================================================
// Device Lookup
// =============================================================================

fn get_host() -> Host {
    cpal::default_host()
}

fn device_name(device: &Device) -> Option<String> {
    device.description().ok().map(|desc| desc.name().to_string())
}

fn list_devices(direction: DeviceDirection) -> Result<Vec<AudioDevice>, MediaError> {
    let host = get_host();
    let found: Vec<Device> = match direction {
        DeviceDirection::Input => host
            .input_devices()
            .map_err(|e| MediaError::Unavailable(e.to_string()))?
            .collect(),
        DeviceDirection::Output => host
            .output_devices()
            .map_err(|e| MediaError::Unavailable(e.to_string()))?
            .collect(),
    };

    let mut devices = vec![AudioDevice::system_default(direction)];
    for name in found.iter().filter_map(device_name) {
        if !devices.iter().any(|d| d.name == name) {
            devices.push(AudioDevice::new(name, direction));
        }
    }
    Ok(devices)
}

/// Find an input device by exact name, or the default when `name` is empty
fn find_input_device(name: &str) -> Result<Device, MediaError> {
    let host = get_host();

    if name.is_empty() {
        return host
            .default_input_device()
            .ok_or_else(|| MediaError::NotFound("no default input device".to_string()));
    }

    host.input_devices()
        .map_err(|e| MediaError::Unavailable(e.to_string()))?
        .find(|d| device_name(d).is_some_and(|n| n == name))
        .ok_or_else(|| MediaError::NotFound(name.to_string()))
}

/// Pick a 48kHz configuration, preferring mono over stereo
fn pick_input_format(device: &Device) -> Result<(u16, SampleFormat), MediaError> {
    for channels in [1u16, 2] {
        let config = device
            .supported_input_configs()
            .map_err(|e| MediaError::Unavailable(e.to_string()))?
            .find(|c| {
                c.channels() == channels
                    && c.min_sample_rate() <= VOICE_SAMPLE_RATE
                    && c.max_sample_rate() >= VOICE_SAMPLE_RATE
                    && SUPPORTED_FORMATS.contains(&c.sample_format())
            });
        if let Some(config) = config {
            return Ok((channels, config.sample_format()));
        }
    }

    Err(MediaError::Unsupported(format!(
        "input device does not offer {VOICE_SAMPLE_RATE}Hz mono or stereo"
    )))
}

fn map_build_error(err: cpal::BuildStreamError) -> MediaError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => {
            MediaError::Unavailable("device no longer available".to_string())
        }
        cpal::BuildStreamError::StreamConfigNotSupported => {
            MediaError::Unsupported("stream configuration rejected".to_string())
        }
        e @ cpal::BuildStreamError::BackendSpecific { .. } => {
            MediaError::PermissionDenied(e.to_string())
        }
        other => MediaError::Unavailable(other.to_string()),
    }
}

// =============================================================================
// Capture Stream
// =============================================================================

/// Build an input stream that meters down-mixed mono audio into `meter`
fn build_capture_stream<T>(
    device: &Device,
    config: &StreamConfig,
    meter: Arc<TrackMeter>,
) -> Result<Stream, MediaError>
where
    T: Sample + cpal::SizedSample,
    f32: FromSample<T>,
{
    let channels = usize::from(config.channels.max(1));

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if !meter.is_enabled() {
                    meter.set_level(0.0);
                    return;
                }

                let mut sum_squares = 0.0f64;
                let mut frames = 0usize;
                for frame in data.chunks_exact(channels) {
                    let mono = frame.iter().map(|s| f32::from_sample(*s)).sum::<f32>()
                        / channels as f32;
                    sum_squares += f64::from(mono) * f64::from(mono);
                    frames += 1;
                }

                if frames > 0 {
                    let rms = (sum_squares / frames as f64).sqrt();
                    meter.set_level((rms * RMS_DISPLAY_SCALE).min(1.0) as f32);
                }
            },
            |err| warn!(error = %err, "audio capture stream error"),
            None,
        )
        .map_err(map_build_error)
}

/// Open and start a capture stream on the calling thread
fn open_capture(name: &str, meter: Arc<TrackMeter>) -> Result<Stream, MediaError> {
    let device = find_input_device(name)?;
    let (channels, sample_format) = pick_input_format(&device)?;

    let config = StreamConfig {
        channels,
        sample_rate: VOICE_SAMPLE_RATE,
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = match sample_format {
        SampleFormat::F32 => build_capture_stream::<f32>(&device, &config, meter),
        SampleFormat::I16 => build_capture_stream::<i16>(&device, &config, meter),
        SampleFormat::U16 => build_capture_stream::<u16>(&device, &config, meter),
        other => Err(MediaError::Unsupported(format!("sample format {other:?}"))),
    }?;

    stream
        .play()
        .map_err(|e| MediaError::Unavailable(format!("failed to start capture: {e}")))?;

    debug!(device = %name, channels, ?sample_format, "capture stream started");
    Ok(stream)
}

// =============================================================================
// Cpal Devices
// =============================================================================

/// [`MediaDevices`] backed by the platform's default cpal host
#[derive(Debug, Default)]
pub struct CpalDevices {
    /// Selected playback device (empty = system default)
    output_device: Mutex<String>,
}

impl CpalDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently selected playback device (empty = system default)
    pub fn output_device(&self) -> String {
        self.output_device
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl MediaDevices for CpalDevices {
    async fn acquire_capture(&self, device_id: Option<&str>) -> Result<AudioTrack, MediaError> {
        let name = device_id.unwrap_or_default().to_string();
        let track = AudioTrack::new(name.clone(), TrackFormat::VOICE_MONO);
        let meter = track.meter();

        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread_name = name.clone();
        std::thread::Builder::new()
            .name(CAPTURE_THREAD_NAME.to_string())
            .spawn(move || match open_capture(&thread_name, meter) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    // Blocks until the track is stopped or dropped
                    let _ = stop_rx.recv();
                    drop(stream);
                    debug!(device = %thread_name, "capture stream released");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| MediaError::Unavailable(format!("cannot spawn capture thread: {e}")))?;

        ready_rx
            .await
            .map_err(|_| MediaError::Unavailable("capture thread exited".to_string()))??;

        track.set_release(move || {
            let _ = stop_tx.send(());
        });

        info!(device = %name, "microphone acquired");
        Ok(track)
    }

    fn input_devices(&self) -> Result<Vec<AudioDevice>, MediaError> {
        list_devices(DeviceDirection::Input)
    }

    fn output_devices(&self) -> Result<Vec<AudioDevice>, MediaError> {
        list_devices(DeviceDirection::Output)
    }

    fn set_output_device(&self, device_id: Option<&str>) -> Result<(), MediaError> {
        let name = device_id.unwrap_or_default();
        if !name.is_empty() {
            let known = list_devices(DeviceDirection::Output)?
                .iter()
                .any(|d| d.id == name);
            if !known {
                return Err(MediaError::NotFound(name.to_string()));
            }
        }

        *self
            .output_device
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = name.to_string();
        info!(device = %name, "playback device selected");
        Ok(())
    }
}
