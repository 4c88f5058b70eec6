use std::fs;

use nvml_wrapper::{
    Device, Nvml,
    enum_wrappers::device::{Clock, TemperatureSensor},
    enums::device::{FanControlPolicy, UsedGpuMemory},
    error::NvmlError,
    struct_wrappers::device::ProcessInfo,
};
use thiserror::Error;
use tracing::{debug, info};

// A failed call into the management layer, tagged with the operation
// that was attempted so the message can be shown as-is to the user
#[derive(Debug, Error)]
#[error("{operation}: {source}")]
pub struct DeviceError {
    pub operation: &'static str,
    #[source]
    pub source: NvmlError,
}

impl DeviceError {
    pub fn new(operation: &'static str, source: NvmlError) -> Self {
        Self { operation, source }
    }
}

pub type DeviceResult<T> = Result<T, DeviceError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanPolicy {
    Auto,
    Manual,
}

impl FanPolicy {
    // On-disk representation used by the profile files
    pub fn as_code(self) -> i64 {
        match self {
            FanPolicy::Auto => 0,
            FanPolicy::Manual => 1,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(FanPolicy::Auto),
            1 => Some(FanPolicy::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    pub used: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Utilization {
    pub core: u32,
    pub memory: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKind {
    Compute,
    Graphics,
}

// One process running on the GPU. The name is filled in from the OS
// process table and is not reported by the management layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub kind: ProcessKind,
    pub pid: u32,
    pub used_memory_bytes: Option<u64>,
    pub name: String,
}

/// Capability object for one GPU.
///
/// Reads take `&self`, control changes take `&mut self`. Every call may
/// fail independently with a [`DeviceError`]; callers decide whether a
/// failure is fatal.
pub trait DeviceHandle {
    fn index(&self) -> u32;

    fn name(&self) -> DeviceResult<String>;

    // Clocks in MHz
    fn core_clock(&self) -> DeviceResult<u32>;
    fn mem_clock(&self) -> DeviceResult<u32>;
    fn max_core_clock(&self) -> DeviceResult<u32>;
    fn max_mem_clock(&self) -> DeviceResult<u32>;

    // Raw clock offsets as reported by the driver, before normalization.
    // The memory offset is in hardware units (twice the nominal MHz)
    fn core_offset_raw(&self) -> DeviceResult<i64>;
    fn mem_offset_raw(&self) -> DeviceResult<i64>;

    // Power values in milliwatts
    fn power_usage(&self) -> DeviceResult<u32>;
    fn power_limit(&self) -> DeviceResult<u32>;
    fn default_power_limit(&self) -> DeviceResult<u32>;

    fn temperature(&self) -> DeviceResult<u32>;
    fn num_fans(&self) -> DeviceResult<u32>;
    fn fan_speed(&self, fan: u32) -> DeviceResult<u32>;
    fn fan_policy(&self, fan: u32) -> DeviceResult<FanPolicy>;

    fn memory_usage(&self) -> DeviceResult<MemoryUsage>;
    fn utilization(&self) -> DeviceResult<Utilization>;

    fn compute_processes(&self) -> DeviceResult<Vec<ProcessEntry>>;
    fn graphics_processes(&self) -> DeviceResult<Vec<ProcessEntry>>;

    fn set_persistence(&mut self, enabled: bool) -> DeviceResult<()>;
    // Offsets in hardware units
    fn set_core_offset(&mut self, offset: i32) -> DeviceResult<()>;
    fn set_mem_offset(&mut self, offset: i32) -> DeviceResult<()>;
    // Milliwatts
    fn set_power_limit(&mut self, limit: u32) -> DeviceResult<()>;
    fn set_fan_policy(&mut self, fan: u32, policy: FanPolicy) -> DeviceResult<()>;
    fn set_fan_speed(&mut self, fan: u32, speed: u32) -> DeviceResult<()>;
    fn set_default_fan_speed(&mut self, fan: u32) -> DeviceResult<()>;

    // End the management session. Called exactly once on every exit path
    fn release(self: Box<Self>) -> DeviceResult<()>;
}

// Store the NVML session and the index of the GPU it controls
pub struct NvmlDevice {
    nvml: Nvml,

    index: u32,
}

impl NvmlDevice {
    // Initialize NVML and check that the requested GPU is reachable
    pub fn open(index: u32) -> DeviceResult<Self> {
        let nvml = Nvml::init().map_err(|e| DeviceError::new("nvmlInit", e))?;

        info!("NVML successfully initialized");

        let device = Self { nvml, index };

        // Fail early if the index doesn't map to a device
        device.get()?;

        debug!("Opened Nvidia device {}", index);

        Ok(device)
    }

    // Return a device handle.
    // This function can fail and return an error
    fn get(&self) -> DeviceResult<Device<'_>> {
        self.nvml
            .device_by_index(self.index)
            .map_err(|e| DeviceError::new("device by index", e))
    }

    fn read<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&Device<'_>) -> Result<T, NvmlError>,
    ) -> DeviceResult<T> {
        let device = self.get()?;

        f(&device).map_err(|e| DeviceError::new(operation, e))
    }

    fn write(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut Device<'_>) -> Result<(), NvmlError>,
    ) -> DeviceResult<()> {
        let mut device = self.get()?;

        f(&mut device).map_err(|e| DeviceError::new(operation, e))
    }
}

impl DeviceHandle for NvmlDevice {
    fn index(&self) -> u32 {
        self.index
    }

    fn name(&self) -> DeviceResult<String> {
        self.read("device name", |d| d.name())
    }

    fn core_clock(&self) -> DeviceResult<u32> {
        self.read("core clock", |d| d.clock_info(Clock::Graphics))
    }

    fn mem_clock(&self) -> DeviceResult<u32> {
        self.read("memory clock", |d| d.clock_info(Clock::Memory))
    }

    fn max_core_clock(&self) -> DeviceResult<u32> {
        self.read("max core clock", |d| d.max_clock_info(Clock::Graphics))
    }

    fn max_mem_clock(&self) -> DeviceResult<u32> {
        self.read("max memory clock", |d| d.max_clock_info(Clock::Memory))
    }

    fn core_offset_raw(&self) -> DeviceResult<i64> {
        self.read("core clock offset", |d| {
            d.gpc_clock_vf_offset().map(i64::from)
        })
    }

    fn mem_offset_raw(&self) -> DeviceResult<i64> {
        self.read("memory clock offset", |d| {
            d.mem_clock_vf_offset().map(i64::from)
        })
    }

    fn power_usage(&self) -> DeviceResult<u32> {
        self.read("power usage", |d| d.power_usage())
    }

    fn power_limit(&self) -> DeviceResult<u32> {
        self.read("power limit", |d| d.power_management_limit())
    }

    fn default_power_limit(&self) -> DeviceResult<u32> {
        self.read("default power limit", |d| {
            d.power_management_limit_default()
        })
    }

    fn temperature(&self) -> DeviceResult<u32> {
        self.read("temperature", |d| d.temperature(TemperatureSensor::Gpu))
    }

    fn num_fans(&self) -> DeviceResult<u32> {
        self.read("fan count", |d| d.num_fans())
    }

    fn fan_speed(&self, fan: u32) -> DeviceResult<u32> {
        self.read("fan speed", |d| d.fan_speed(fan))
    }

    fn fan_policy(&self, fan: u32) -> DeviceResult<FanPolicy> {
        self.read("fan control policy", |d| {
            d.fan_control_policy(fan).map(|policy| match policy {
                FanControlPolicy::TemperatureContinousSw => FanPolicy::Auto,
                FanControlPolicy::Manual => FanPolicy::Manual,
            })
        })
    }

    fn memory_usage(&self) -> DeviceResult<MemoryUsage> {
        self.read("memory info", |d| {
            d.memory_info().map(|info| MemoryUsage {
                used: info.used,
                total: info.total,
            })
        })
    }

    fn utilization(&self) -> DeviceResult<Utilization> {
        self.read("utilization rates", |d| {
            d.utilization_rates().map(|rates| Utilization {
                core: rates.gpu,
                memory: rates.memory,
            })
        })
    }

    fn compute_processes(&self) -> DeviceResult<Vec<ProcessEntry>> {
        self.read("compute processes", |d| {
            d.running_compute_processes().map(|procs| {
                procs
                    .into_iter()
                    .map(|p| process_entry(ProcessKind::Compute, p))
                    .collect()
            })
        })
    }

    fn graphics_processes(&self) -> DeviceResult<Vec<ProcessEntry>> {
        self.read("graphics processes", |d| {
            d.running_graphics_processes().map(|procs| {
                procs
                    .into_iter()
                    .map(|p| process_entry(ProcessKind::Graphics, p))
                    .collect()
            })
        })
    }

    fn set_persistence(&mut self, enabled: bool) -> DeviceResult<()> {
        self.write("set persistence mode", |d| d.set_persistent(enabled))
    }

    fn set_core_offset(&mut self, offset: i32) -> DeviceResult<()> {
        self.write("set core clock offset", |d| {
            d.set_gpc_clock_vf_offset(offset)
        })
    }

    fn set_mem_offset(&mut self, offset: i32) -> DeviceResult<()> {
        self.write("set memory clock offset", |d| {
            d.set_mem_clock_vf_offset(offset)
        })
    }

    fn set_power_limit(&mut self, limit: u32) -> DeviceResult<()> {
        self.write("set power limit", |d| d.set_power_management_limit(limit))
    }

    fn set_fan_policy(&mut self, fan: u32, policy: FanPolicy) -> DeviceResult<()> {
        let policy = match policy {
            FanPolicy::Auto => FanControlPolicy::TemperatureContinousSw,
            FanPolicy::Manual => FanControlPolicy::Manual,
        };

        self.write("set fan control policy", |d| {
            d.set_fan_control_policy(fan, policy)
        })
    }

    fn set_fan_speed(&mut self, fan: u32, speed: u32) -> DeviceResult<()> {
        self.write("set fan speed", |d| d.set_fan_speed(fan, speed))
    }

    fn set_default_fan_speed(&mut self, fan: u32) -> DeviceResult<()> {
        self.write("restore default fan speed", |d| {
            d.set_default_fan_speed(fan)
        })
    }

    fn release(self: Box<Self>) -> DeviceResult<()> {
        info!("Shutting down NVML");

        self.nvml
            .shutdown()
            .map_err(|e| DeviceError::new("nvmlShutdown", e))
    }
}

fn process_entry(kind: ProcessKind, info: ProcessInfo) -> ProcessEntry {
    let used_memory_bytes = match info.used_gpu_memory {
        UsedGpuMemory::Used(bytes) => Some(bytes),
        UsedGpuMemory::Unavailable => None,
    };

    ProcessEntry {
        kind,
        pid: info.pid,
        used_memory_bytes,
        name: process_name(info.pid),
    }
}

// Look the process name up in procfs, the management layer only reports PIDs
fn process_name(pid: u32) -> String {
    fs::read_to_string(format!("/proc/{pid}/comm"))
        .map(|name| name.trim().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}
