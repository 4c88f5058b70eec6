use thiserror::Error;
use tracing::{info, trace, warn};

use crate::{
    device::{DeviceError, DeviceHandle, FanPolicy},
    telemetry::MEM_OFFSET_SCALE,
};

pub const MIN_FAN_SPEED: i64 = 30;
pub const MAX_FAN_SPEED: i64 = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("\"{0}\" is not a valid whole number")]
    NotANumber(String),
    #[error("Refusing to set fan speed below {MIN_FAN_SPEED}% ({0}%)")]
    FanTooLow(i64),
    #[error("Invalid fan speed value: {0}%")]
    FanInvalid(i64),
    #[error("Clock offset {0} MHz is out of range")]
    OffsetOutOfRange(i64),
    #[error("Power limit {0} W is out of range")]
    PowerOutOfRange(i64),
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

pub type ControlResult<T> = Result<T, ControlError>;

pub fn parse_int(input: &str) -> Result<i64, ValidationError> {
    let trimmed = input.trim();

    trimmed
        .parse::<i64>()
        .map_err(|_| ValidationError::NotANumber(trimmed.to_string()))
}

/// Check a requested fan duty, the driver accepts values the fans can't
/// safely run at.
pub fn validate_fan_speed(percent: i64) -> Result<u32, ValidationError> {
    if percent < MIN_FAN_SPEED {
        return Err(ValidationError::FanTooLow(percent));
    }

    if percent > MAX_FAN_SPEED {
        return Err(ValidationError::FanInvalid(percent));
    }

    // The range check guarantees the conversion
    Ok(percent as u32)
}

// Convert a nominal MHz offset into the driver's units
fn hardware_offset(nominal: i64, scale: i64) -> Result<i32, ValidationError> {
    nominal
        .checked_mul(scale)
        .and_then(|v| i32::try_from(v).ok())
        .ok_or(ValidationError::OffsetOutOfRange(nominal))
}

pub fn core_hardware_offset(mhz: i64) -> Result<i32, ValidationError> {
    hardware_offset(mhz, 1)
}

// The driver expects twice the offset other overclocking tools display
pub fn mem_hardware_offset(mhz: i64) -> Result<i32, ValidationError> {
    hardware_offset(mhz, MEM_OFFSET_SCALE)
}

pub fn power_milliwatts(watts: i64) -> Result<u32, ValidationError> {
    watts
        .checked_mul(1000)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or(ValidationError::PowerOutOfRange(watts))
}

pub fn set_core_offset(device: &mut dyn DeviceHandle, mhz: i64) -> ControlResult<()> {
    let offset = core_hardware_offset(mhz)?;

    trace!("Setting core clock offset to {} MHz", offset);

    device.set_core_offset(offset).inspect_err(log_rejected)?;

    Ok(())
}

pub fn set_mem_offset(device: &mut dyn DeviceHandle, mhz: i64) -> ControlResult<()> {
    let offset = mem_hardware_offset(mhz)?;

    trace!("Setting memory clock offset to {} MHz ({} hardware)", mhz, offset);

    device.set_mem_offset(offset).inspect_err(log_rejected)?;

    Ok(())
}

pub fn set_clock_offsets(
    device: &mut dyn DeviceHandle,
    core: i64,
    mem: i64,
) -> ControlResult<()> {
    // Validate both before touching the device
    core_hardware_offset(core)?;
    mem_hardware_offset(mem)?;

    set_core_offset(device, core)?;
    set_mem_offset(device, mem)?;

    Ok(())
}

pub fn set_power_limit(device: &mut dyn DeviceHandle, watts: i64) -> ControlResult<()> {
    let milliwatts = power_milliwatts(watts)?;

    trace!("Setting power limit to {} mW", milliwatts);

    device.set_power_limit(milliwatts).inspect_err(log_rejected)?;

    Ok(())
}

/// Pin every fan to the given duty. Returns the number of fans changed.
pub fn set_custom_fan(device: &mut dyn DeviceHandle, percent: i64) -> ControlResult<u32> {
    let speed = validate_fan_speed(percent)?;

    let count = for_each_fan(device, |dev, i| {
        dev.set_fan_policy(i, FanPolicy::Manual)?;
        dev.set_fan_speed(i, speed)
    })?;

    info!("Set {} fans to {}%", count, speed);

    Ok(count)
}

pub fn set_max_fan(device: &mut dyn DeviceHandle) -> ControlResult<u32> {
    set_custom_fan(device, MAX_FAN_SPEED)
}

/// Hand every fan back to the driver's temperature based control.
pub fn set_auto_fan(device: &mut dyn DeviceHandle) -> ControlResult<u32> {
    let count = for_each_fan(device, |dev, i| {
        dev.set_fan_policy(i, FanPolicy::Auto)?;
        dev.set_default_fan_speed(i)
    })?;

    info!("Restored automatic control on {} fans", count);

    Ok(count)
}

pub fn enable_persistence(device: &mut dyn DeviceHandle) -> ControlResult<()> {
    device.set_persistence(true).inspect_err(log_rejected)?;

    info!("Persistence mode enabled on GPU {}", device.index());

    Ok(())
}

// Utility to execute a function for all fans on a GPU
fn for_each_fan(
    device: &mut dyn DeviceHandle,
    mut f: impl FnMut(&mut dyn DeviceHandle, u32) -> Result<(), DeviceError>,
) -> ControlResult<u32> {
    let fan_count = device.num_fans()?;

    for i in 0..fan_count {
        f(device, i).inspect_err(log_rejected)?;
    }

    Ok(fan_count)
}

fn log_rejected(err: &DeviceError) {
    warn!("Device rejected change: {err}");
}
