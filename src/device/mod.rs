//! Signaling device.
//!
//! The device side: a long-lived relay connection serving any number of
//! client channels. See [`SignalingDevice`].

#[allow(clippy::module_inception)]
mod device;
mod driver;

pub use device::{DeviceConfig, SignalingDevice, SignalingDeviceBuilder};
