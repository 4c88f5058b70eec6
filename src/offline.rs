use std::io::Write;

use anyhow::Result;
use tracing::{error, info};

use crate::{
    EXIT_DEVICE_INIT, EXIT_OK,
    config::OfflineAction,
    control,
    device::DeviceHandle,
    errors::BntError,
    profile_store::ProfileStore,
};

const BANNER: &str = "\
WARNING: changing clocks, power limits and fan speeds can damage your hardware.
You are responsible for any change applied by this tool.";

/// Apply a single `--set-*` action and report the result on `out`.
///
/// Device and validation errors are printed, not returned; only output
/// failures end up in the `Err` branch.
pub fn run(
    action: OfflineAction,
    device: &mut dyn DeviceHandle,
    store: &ProfileStore,
    out: &mut impl Write,
) -> Result<u8> {
    writeln!(out, "{BANNER}")?;
    writeln!(out)?;

    if let Err(err) = control::enable_persistence(device) {
        error!("Failed to enable persistence mode: {err}");
        writeln!(out, "Failed to enable persistence mode: {err}")?;

        return Ok(EXIT_DEVICE_INIT);
    }

    info!("Offline action: {:?}", action);

    match apply(action, device, store) {
        Ok(message) => writeln!(out, "{message}")?,
        Err(err) => {
            error!("Offline action failed: {err}");
            writeln!(out, "{err}")?;
        }
    }

    Ok(EXIT_OK)
}

fn apply(
    action: OfflineAction,
    device: &mut dyn DeviceHandle,
    store: &ProfileStore,
) -> Result<String, BntError> {
    let message = match action {
        OfflineAction::SetClocks { core, mem } => {
            control::set_clock_offsets(device, core, mem)?;
            format!("Clock offsets set to {core:+} MHz core and {mem:+} MHz memory")
        }
        OfflineAction::SetPowerLimit(watts) => {
            control::set_power_limit(device, watts)?;
            format!("Power limit set to {watts} W")
        }
        OfflineAction::SetMaxFan => {
            let fans = control::set_max_fan(device)?;
            format!("Set {fans} fans to {}%", control::MAX_FAN_SPEED)
        }
        OfflineAction::SetAutoFan => {
            let fans = control::set_auto_fan(device)?;
            format!("Restored automatic control on {fans} fans")
        }
        OfflineAction::SetCustomFan(percent) => {
            let fans = control::set_custom_fan(device, percent)?;
            format!("Set {fans} fans to {percent}%")
        }
        OfflineAction::SetProfile(slot) => {
            store.load(slot, device)?;
            format!("Loaded profile {slot}")
        }
    };

    Ok(message)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::{
        device::{
            FanPolicy,
            mock::{MockDevice, Write as DeviceWrite},
        },
        profile_store::Slot,
    };

    // Run an action against a mock and return the output with the writes
    fn run_action(
        dir: &TempDir,
        mut device: MockDevice,
        action: OfflineAction,
    ) -> (u8, String, Vec<DeviceWrite>) {
        let store = ProfileStore::new(dir.path());
        let mut out = Vec::new();

        let code = run(action, &mut device, &store, &mut out).unwrap();

        (code, String::from_utf8(out).unwrap(), device.writes)
    }

    fn without_persistence(writes: Vec<DeviceWrite>) -> Vec<DeviceWrite> {
        writes
            .into_iter()
            .filter(|w| !matches!(w, DeviceWrite::Persistence(_)))
            .collect()
    }

    #[test]
    fn power_limit_is_written_once_in_milliwatts() {
        let dir = TempDir::new().unwrap();

        let (code, out, writes) =
            run_action(&dir, MockDevice::new(), OfflineAction::SetPowerLimit(300));

        assert_eq!(code, EXIT_OK);
        assert!(out.contains("Power limit set to 300 W"));
        assert_eq!(writes.first(), Some(&DeviceWrite::Persistence(true)));
        assert_eq!(
            without_persistence(writes),
            vec![DeviceWrite::PowerLimit(300_000)]
        );
    }

    #[test]
    fn low_fan_speed_is_refused_without_writes() {
        let dir = TempDir::new().unwrap();

        let (code, out, writes) =
            run_action(&dir, MockDevice::new(), OfflineAction::SetCustomFan(15));

        assert_eq!(code, EXIT_OK);
        assert!(out.contains("Refusing"));
        assert!(without_persistence(writes).is_empty());
    }

    #[test]
    fn out_of_range_fan_speed_is_invalid() {
        let dir = TempDir::new().unwrap();

        let (_, out, writes) =
            run_action(&dir, MockDevice::new(), OfflineAction::SetCustomFan(101));

        assert!(out.contains("Invalid"));
        assert!(without_persistence(writes).is_empty());
    }

    #[test]
    fn clock_offsets_write_core_then_doubled_mem() {
        let dir = TempDir::new().unwrap();

        let (_, _, writes) = run_action(
            &dir,
            MockDevice::new(),
            OfflineAction::SetClocks { core: -150, mem: 500 },
        );

        assert_eq!(
            without_persistence(writes),
            vec![DeviceWrite::CoreOffset(-150), DeviceWrite::MemOffset(1000)]
        );
    }

    #[test]
    fn max_fan_pins_every_fan_to_full_speed() {
        let dir = TempDir::new().unwrap();

        let (_, out, writes) = run_action(&dir, MockDevice::new(), OfflineAction::SetMaxFan);

        assert!(out.contains("Set 2 fans to 100%"));
        assert_eq!(
            without_persistence(writes),
            vec![
                DeviceWrite::FanPolicy(0, FanPolicy::Manual),
                DeviceWrite::FanSpeed(0, 100),
                DeviceWrite::FanPolicy(1, FanPolicy::Manual),
                DeviceWrite::FanSpeed(1, 100),
            ]
        );
    }

    #[test]
    fn saved_profile_is_applied() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("profile2.bnt"), "-100\n200\n250\n0\n50\n").unwrap();

        let (code, out, writes) = run_action(
            &dir,
            MockDevice::new(),
            OfflineAction::SetProfile(Slot::new(2).unwrap()),
        );

        assert_eq!(code, EXIT_OK);
        assert!(out.contains("Loaded profile 2"));
        assert_eq!(
            without_persistence(writes),
            vec![
                DeviceWrite::CoreOffset(-100),
                DeviceWrite::MemOffset(400),
                DeviceWrite::PowerLimit(250_000),
                DeviceWrite::FanPolicy(0, FanPolicy::Auto),
                DeviceWrite::DefaultFanSpeed(0),
                DeviceWrite::FanPolicy(1, FanPolicy::Auto),
                DeviceWrite::DefaultFanSpeed(1),
            ]
        );
    }

    #[test]
    fn missing_profile_is_reported() {
        let dir = TempDir::new().unwrap();

        let (code, out, _) = run_action(
            &dir,
            MockDevice::new(),
            OfflineAction::SetProfile(Slot::new(4).unwrap()),
        );

        assert_eq!(code, EXIT_OK);
        assert!(out.contains("Profile 4 not found"));
    }

    #[test]
    fn persistence_failure_stops_before_any_change() {
        let dir = TempDir::new().unwrap();
        let device = MockDevice { reject_writes: true, ..MockDevice::new() };

        let (code, out, writes) =
            run_action(&dir, device, OfflineAction::SetPowerLimit(300));

        assert_eq!(code, EXIT_DEVICE_INIT);
        assert!(out.contains("Failed to enable persistence mode"));
        assert!(without_persistence(writes).is_empty());
    }
}
