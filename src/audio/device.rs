//! Audio device enumeration and exclusive ownership

use cpal::traits::{DeviceTrait, HostTrait};
use dashmap::DashSet;
use serde::Serialize;
use std::sync::LazyLock;

use crate::error::AudioError;

/// Device description for listings and the control panel
#[derive(Debug, Clone, Serialize)]
pub struct AudioDeviceInfo {
    pub id: String,
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// Wrapper around cpal device
pub struct AudioDevice {
    inner: cpal::Device,
    pub id: String,
    pub name: String,
    pub is_input: bool,
}

impl AudioDevice {
    pub fn from_cpal(device: cpal::Device, is_input: bool) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let id = format!("{}:{}", if is_input { "input" } else { "output" }, name);
        Self {
            inner: device,
            id,
            name,
            is_input,
        }
    }

    pub fn inner(&self) -> &cpal::Device {
        &self.inner
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }

    /// Get default input config
    pub fn default_input_config(&self) -> Result<cpal::SupportedStreamConfig, AudioError> {
        Ok(self.inner.default_input_config()?)
    }

    /// Get default output config
    pub fn default_output_config(&self) -> Result<cpal::SupportedStreamConfig, AudioError> {
        Ok(self.inner.default_output_config()?)
    }
}

/// List all available audio devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            if let Ok(name) = device.name() {
                let (sample_rates, channels) = get_device_capabilities(&device, true);
                devices.push(AudioDeviceInfo {
                    id: format!("input:{}", name),
                    is_default: default_input_name.as_ref() == Some(&name),
                    name,
                    is_input: true,
                    is_output: false,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                let (sample_rates, channels) = get_device_capabilities(&device, false);
                devices.push(AudioDeviceInfo {
                    id: format!("output:{}", name),
                    is_default: default_output_name.as_ref() == Some(&name),
                    name,
                    is_input: false,
                    is_output: true,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    devices
}

/// Get device capabilities
fn get_device_capabilities(device: &cpal::Device, is_input: bool) -> (Vec<u32>, Vec<u16>) {
    let configs: Vec<cpal::SupportedStreamConfigRange> = if is_input {
        device
            .supported_input_configs()
            .map(|c| c.collect())
            .unwrap_or_default()
    } else {
        device
            .supported_output_configs()
            .map(|c| c.collect())
            .unwrap_or_default()
    };

    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();
    for config in &configs {
        for rate_val in [16000u32, 24000, 44100, 48000, 96000] {
            let rate = cpal::SampleRate(rate_val);
            if rate >= config.min_sample_rate()
                && rate <= config.max_sample_rate()
                && !sample_rates.contains(&rate_val)
            {
                sample_rates.push(rate_val);
            }
        }
        if !channels.contains(&config.channels()) {
            channels.push(config.channels());
        }
    }

    sample_rates.sort_unstable();
    channels.sort_unstable();
    (sample_rates, channels)
}

/// Resolve an input device by id, or the default input
pub fn resolve_input(id: Option<&str>) -> Result<AudioDevice, AudioError> {
    match id {
        Some(id) => get_device_by_id(id, true),
        None => get_default_input_device(),
    }
}

/// Resolve an output device by id, or the default output
pub fn resolve_output(id: Option<&str>) -> Result<AudioDevice, AudioError> {
    match id {
        Some(id) => get_device_by_id(id, false),
        None => get_default_output_device(),
    }
}

/// Get a device by its ID (`input:<name>` / `output:<name>`, or a bare name)
pub fn get_device_by_id(id: &str, is_input: bool) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    let prefix = if is_input { "input:" } else { "output:" };
    let name = id.strip_prefix(prefix).unwrap_or(id);

    let devices = if is_input {
        host.input_devices()?
    } else {
        host.output_devices()?
    };

    devices
        .into_iter()
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
        .map(|d| AudioDevice::from_cpal(d, is_input))
        .ok_or_else(|| AudioError::DeviceUnavailable(id.to_string()))
}

/// Get default input device
pub fn get_default_input_device() -> Result<AudioDevice, AudioError> {
    cpal::default_host()
        .default_input_device()
        .map(|d| AudioDevice::from_cpal(d, true))
        .ok_or_else(|| AudioError::DeviceUnavailable("no default input device".to_string()))
}

/// Get default output device
pub fn get_default_output_device() -> Result<AudioDevice, AudioError> {
    cpal::default_host()
        .default_output_device()
        .map(|d| AudioDevice::from_cpal(d, false))
        .ok_or_else(|| AudioError::DeviceUnavailable("no default output device".to_string()))
}

/// Devices currently owned by a running pipeline, process-wide
static CLAIMED: LazyLock<DashSet<String>> = LazyLock::new(DashSet::new);

/// Exclusive ownership of a device for as long as the claim lives
#[derive(Debug)]
pub struct DeviceClaim {
    device_id: String,
}

impl DeviceClaim {
    /// Claim `device_id`; fails if another pipeline already holds it
    pub fn acquire(device_id: &str) -> Result<Self, AudioError> {
        if !CLAIMED.insert(device_id.to_string()) {
            return Err(AudioError::DeviceUnavailable(format!(
                "{} is already in use by another capture pipeline",
                device_id
            )));
        }
        Ok(Self {
            device_id: device_id.to_string(),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn is_claimed(device_id: &str) -> bool {
        CLAIMED.contains(device_id)
    }
}

impl Drop for DeviceClaim {
    fn drop(&mut self) {
        CLAIMED.remove(&self.device_id);
    }
}
