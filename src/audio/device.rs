//! Audio device lookup and stream format negotiation

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{SampleFormat, StreamConfig};

use crate::audio::StreamParams;
use crate::error::AudioError;

/// Sample formats we can convert from/to i16, in order of preference
const PREFERRED_FORMATS: [SampleFormat; 3] = [SampleFormat::I16, SampleFormat::F32, SampleFormat::U16];

/// Wrapper around cpal device
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
}

impl AudioDevice {
    pub fn from_cpal(device: cpal::Device) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self {
            inner: device,
            name,
        }
    }

    pub fn inner(&self) -> &cpal::Device {
        &self.inner
    }

    /// Pick an input config matching the fixed stream parameters
    pub fn input_config(&self, params: &StreamParams) -> Result<(StreamConfig, SampleFormat), AudioError> {
        let ranges: Vec<cpal::SupportedStreamConfigRange> = self
            .inner
            .supported_input_configs()
            .map_err(|e| AudioError::CpalError(e.to_string()))?
            .collect();
        select_config(&self.name, ranges, params)
    }

    /// Pick an output config matching the fixed stream parameters
    pub fn output_config(&self, params: &StreamParams) -> Result<(StreamConfig, SampleFormat), AudioError> {
        let ranges: Vec<cpal::SupportedStreamConfigRange> = self
            .inner
            .supported_output_configs()
            .map_err(|e| AudioError::CpalError(e.to_string()))?
            .collect();
        select_config(&self.name, ranges, params)
    }
}

fn select_config(
    device_name: &str,
    ranges: Vec<cpal::SupportedStreamConfigRange>,
    params: &StreamParams,
) -> Result<(StreamConfig, SampleFormat), AudioError> {
    let rate = cpal::SampleRate(params.sample_rate);

    for format in PREFERRED_FORMATS {
        let found = ranges.iter().find(|range| {
            range.sample_format() == format
                && range.channels() == params.channels
                && rate >= range.min_sample_rate()
                && rate <= range.max_sample_rate()
        });
        if let Some(range) = found {
            let config = StreamConfig {
                channels: params.channels,
                sample_rate: rate,
                buffer_size: cpal::BufferSize::Default,
            };
            return Ok((config, range.sample_format()));
        }
    }

    Err(AudioError::UnsupportedFormat(format!(
        "{} does not support {} Hz, {} channels as i16/f32/u16",
        device_name, params.sample_rate, params.channels
    )))
}

/// Find an input device by name, or the host default when `name` is `None`
pub fn find_input_device(name: Option<&str>) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_input_device()
            .map(AudioDevice::from_cpal)
            .ok_or_else(|| AudioError::DeviceNotFound("No default input device".to_string())),
        Some(name) => {
            let devices = host
                .input_devices()
                .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;
            find_by_name(devices, name)
        }
    }
}

/// Find an output device by name, or the host default when `name` is `None`
pub fn find_output_device(name: Option<&str>) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .map(AudioDevice::from_cpal)
            .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string())),
        Some(name) => {
            let devices = host
                .output_devices()
                .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;
            find_by_name(devices, name)
        }
    }
}

fn find_by_name(devices: impl Iterator<Item = cpal::Device>, name: &str) -> Result<AudioDevice, AudioError> {
    for device in devices {
        if let Ok(device_name) = device.name() {
            if device_name == name {
                return Ok(AudioDevice::from_cpal(device));
            }
        }
    }
    Err(AudioError::DeviceNotFound(name.to_string()))
}
