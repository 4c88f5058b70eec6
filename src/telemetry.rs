use std::cmp::Reverse;

use tracing::debug;

use crate::device::{DeviceHandle, DeviceResult, FanPolicy, ProcessEntry};

// Offsets at or above this value are negative numbers that went through
// an unsigned truncation in the driver
pub const OFFSET_WRAP_THRESHOLD: i64 = 100_000;
pub const OFFSET_WRAP_CORRECTION: i64 = 4_294_966;

// Hardware memory offset units per nominal MHz
pub const MEM_OFFSET_SCALE: i64 = 2;

/// Undo the unsigned wraparound of a raw clock offset read.
pub fn normalize_offset(raw: i64) -> i64 {
    if raw >= OFFSET_WRAP_THRESHOLD {
        raw - OFFSET_WRAP_CORRECTION
    } else {
        raw
    }
}

/// `100 * part / whole`, or `None` when the total is zero.
pub fn percentage(part: f64, whole: f64) -> Option<f64> {
    if whole == 0.0 {
        None
    } else {
        Some(100.0 * part / whole)
    }
}

fn milliwatts_to_watts(mw: u32) -> f64 {
    f64::from(mw) / 1000.0
}

// A failing read only hides its own field
fn field<T>(result: DeviceResult<T>) -> Option<T> {
    result
        .map_err(|e| debug!("Telemetry field unavailable: {e}"))
        .ok()
}

/// One polling cycle worth of device state.
///
/// Every field is read on its own; `None` means the read failed and the
/// field is rendered as unknown while the rest of the snapshot stays usable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetrySnapshot {
    pub gpu_index: u32,
    pub name: Option<String>,

    // Current and max clocks in MHz
    pub core_clock: Option<u32>,
    pub max_core_clock: Option<u32>,
    pub core_clock_percent: Option<f64>,
    pub mem_clock: Option<u32>,
    pub max_mem_clock: Option<u32>,
    pub mem_clock_percent: Option<f64>,

    // Overclocking offsets in nominal MHz
    pub core_offset: Option<i64>,
    pub mem_offset: Option<i64>,

    // Power in watts
    pub power_usage: Option<f64>,
    pub power_limit: Option<f64>,
    pub default_power_limit: Option<f64>,
    pub power_offset: Option<f64>,
    pub power_percent: Option<f64>,

    pub temperature: Option<u32>,
    pub fan_speed: Option<u32>,
    pub fan_policy: Option<FanPolicy>,

    // VRAM in bytes
    pub memory_used: Option<u64>,
    pub memory_total: Option<u64>,
    pub memory_percent: Option<f64>,

    pub core_utilization: Option<u32>,
    pub memory_utilization: Option<u32>,
}

impl TelemetrySnapshot {
    pub fn capture(device: &dyn DeviceHandle) -> Self {
        let mut snapshot = Self {
            gpu_index: device.index(),
            name: field(device.name()),
            ..Self::default()
        };

        snapshot.core_clock = field(device.core_clock());
        snapshot.max_core_clock = field(device.max_core_clock());
        snapshot.mem_clock = field(device.mem_clock());
        snapshot.max_mem_clock = field(device.max_mem_clock());

        snapshot.core_offset =
            field(device.core_offset_raw()).map(normalize_offset);
        snapshot.mem_offset = field(device.mem_offset_raw())
            .map(|raw| normalize_offset(raw) / MEM_OFFSET_SCALE);

        snapshot.power_usage = field(device.power_usage()).map(milliwatts_to_watts);
        snapshot.power_limit = field(device.power_limit()).map(milliwatts_to_watts);
        snapshot.default_power_limit =
            field(device.default_power_limit()).map(milliwatts_to_watts);

        snapshot.temperature = field(device.temperature());
        snapshot.fan_speed = field(device.fan_speed(0));
        snapshot.fan_policy = field(device.fan_policy(0));

        if let Some(memory) = field(device.memory_usage()) {
            snapshot.memory_used = Some(memory.used);
            snapshot.memory_total = Some(memory.total);
        }

        if let Some(utilization) = field(device.utilization()) {
            snapshot.core_utilization = Some(utilization.core);
            snapshot.memory_utilization = Some(utilization.memory);
        }

        snapshot.derive();
        snapshot
    }

    // Fill in the percentage and offset fields from the raw readings
    fn derive(&mut self) {
        self.core_clock_percent = ratio(self.core_clock, self.max_core_clock);
        self.mem_clock_percent = ratio(self.mem_clock, self.max_mem_clock);

        self.power_percent = match (self.power_usage, self.power_limit) {
            (Some(usage), Some(limit)) => percentage(usage, limit),
            _ => None,
        };
        self.power_offset = match (self.power_limit, self.default_power_limit) {
            (Some(limit), Some(default)) => Some(limit - default),
            _ => None,
        };

        self.memory_percent = match (self.memory_used, self.memory_total) {
            (Some(used), Some(total)) => percentage(used as f64, total as f64),
            _ => None,
        };
    }
}

fn ratio(current: Option<u32>, max: Option<u32>) -> Option<f64> {
    match (current, max) {
        (Some(current), Some(max)) => {
            percentage(f64::from(current), f64::from(max))
        }
        _ => None,
    }
}

/// Merge the compute and graphics process lists, biggest VRAM users first.
///
/// A failing enumeration only drops its own half of the list; the call
/// fails when neither list could be read.
pub fn capture_processes(device: &dyn DeviceHandle) -> DeviceResult<Vec<ProcessEntry>> {
    let compute = device.compute_processes();
    let graphics = device.graphics_processes();

    let mut processes = match (compute, graphics) {
        (Err(e), Err(_)) => return Err(e),
        (compute, graphics) => {
            let mut merged = field(compute).unwrap_or_default();
            merged.extend(field(graphics).unwrap_or_default());
            merged
        }
    };

    processes.sort_by_key(|p| (Reverse(p.used_memory_bytes), p.pid));

    Ok(processes)
}
