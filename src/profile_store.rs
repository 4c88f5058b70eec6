use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::{
    control::{self, ControlError},
    device::{DeviceError, DeviceHandle, FanPolicy},
    telemetry::TelemetrySnapshot,
};

pub const SLOT_COUNT: usize = 4;

const PROFILE_EXTENSION: &str = "bnt";
const PROFILE_LINES: usize = 5;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("Profile slot {0} does not exist, slots are 1 to {SLOT_COUNT}")]
    SlotOutOfRange(i64),
    #[error("Profile {0} not found")]
    NotFound(Slot),
    #[error("Profile {slot} is invalid: {reason}")]
    Invalid { slot: Slot, reason: String },
    #[error("Profile {slot} was rejected by the device: {source}")]
    DeviceRejected {
        slot: Slot,
        #[source]
        source: DeviceError,
    },
    #[error("Cannot save profile {slot}: {field} is unavailable")]
    Unavailable { slot: Slot, field: &'static str },
    #[error("Profile {slot} file error: {source}")]
    Io {
        slot: Slot,
        #[source]
        source: io::Error,
    },
}

/// A profile slot id, always in `1..=SLOT_COUNT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot(u8);

impl Slot {
    pub const ALL: [Slot; SLOT_COUNT] = [Slot(1), Slot(2), Slot(3), Slot(4)];

    pub fn new(id: i64) -> Result<Self, ProfileError> {
        match u8::try_from(id) {
            Ok(id) if (1..=SLOT_COUNT as u8).contains(&id) => Ok(Slot(id)),
            _ => Err(ProfileError::SlotOutOfRange(id)),
        }
    }

    pub fn id(self) -> u8 {
        self.0
    }

    fn position(self) -> usize {
        usize::from(self.0) - 1
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// The settings bundle stored in one slot, in file order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Profile {
    pub core_offset: i64,
    // Nominal MHz, the device write doubles it
    pub mem_offset: i64,
    // Watts
    pub power_limit: i64,
    pub fan_policy: FanPolicy,
    // Only meaningful with a manual fan policy
    pub fan_speed: i64,
}

impl Profile {
    // Build a profile from the current device state
    pub fn from_snapshot(
        slot: Slot,
        snapshot: &TelemetrySnapshot,
    ) -> Result<Self, ProfileError> {
        let missing = |field| ProfileError::Unavailable { slot, field };

        let fan_policy = snapshot.fan_policy.ok_or_else(|| missing("fan policy"))?;

        let fan_speed = match fan_policy {
            FanPolicy::Manual => {
                snapshot.fan_speed.ok_or_else(|| missing("fan speed"))?
            }
            FanPolicy::Auto => snapshot.fan_speed.unwrap_or(0),
        };

        Ok(Self {
            core_offset: snapshot
                .core_offset
                .ok_or_else(|| missing("core clock offset"))?,
            mem_offset: snapshot
                .mem_offset
                .ok_or_else(|| missing("memory clock offset"))?,
            power_limit: snapshot
                .power_limit
                .map(|w| w.round() as i64)
                .ok_or_else(|| missing("power limit"))?,
            fan_policy,
            fan_speed: i64::from(fan_speed),
        })
    }

    /// Parse and validate the contents of a profile file.
    ///
    /// Everything the device writes would check is checked here, so a
    /// profile that parses can only fail on the device side.
    pub fn parse(slot: Slot, contents: &str) -> Result<Self, ProfileError> {
        let invalid = |reason: String| ProfileError::Invalid { slot, reason };

        let lines: Vec<&str> = contents.lines().map(str::trim).collect();

        // Tolerate trailing blank lines left by editors
        let used = lines
            .iter()
            .rposition(|line| !line.is_empty())
            .map_or(0, |last| last + 1);

        if used != PROFILE_LINES {
            return Err(invalid(format!(
                "expected {PROFILE_LINES} lines, found {used}"
            )));
        }

        let mut values = [0i64; PROFILE_LINES];
        for (i, line) in lines[..PROFILE_LINES].iter().enumerate() {
            values[i] = control::parse_int(line)
                .map_err(|e| invalid(format!("line {}: {e}", i + 1)))?;
        }

        let [core_offset, mem_offset, power_limit, policy, fan_speed] = values;

        let fan_policy = FanPolicy::from_code(policy)
            .ok_or_else(|| invalid(format!("unknown fan policy {policy}")))?;

        control::core_hardware_offset(core_offset)
            .map_err(|e| invalid(e.to_string()))?;
        control::mem_hardware_offset(mem_offset)
            .map_err(|e| invalid(e.to_string()))?;
        control::power_milliwatts(power_limit)
            .map_err(|e| invalid(e.to_string()))?;

        if fan_policy == FanPolicy::Manual {
            control::validate_fan_speed(fan_speed)
                .map_err(|e| invalid(e.to_string()))?;
        }

        Ok(Self {
            core_offset,
            mem_offset,
            power_limit,
            fan_policy,
            fan_speed,
        })
    }

    // One decimal value per line, no trailing metadata
    pub fn to_file_contents(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}\n{}\n",
            self.core_offset,
            self.mem_offset,
            self.power_limit,
            self.fan_policy.as_code(),
            self.fan_speed,
        )
    }

    /// Write the profile to the device in file order.
    ///
    /// There is no rollback: when a write fails the earlier ones stay
    /// applied.
    pub fn apply(
        &self,
        slot: Slot,
        device: &mut dyn DeviceHandle,
    ) -> Result<(), ProfileError> {
        let to_profile_error = |err: ControlError| match err {
            ControlError::Device(source) => {
                ProfileError::DeviceRejected { slot, source }
            }
            ControlError::Validation(e) => ProfileError::Invalid {
                slot,
                reason: e.to_string(),
            },
        };

        control::set_core_offset(device, self.core_offset)
            .map_err(to_profile_error)?;
        control::set_mem_offset(device, self.mem_offset)
            .map_err(to_profile_error)?;
        control::set_power_limit(device, self.power_limit)
            .map_err(to_profile_error)?;

        match self.fan_policy {
            FanPolicy::Manual => {
                control::set_custom_fan(device, self.fan_speed)
                    .map_err(to_profile_error)?;
            }
            FanPolicy::Auto => {
                control::set_auto_fan(device).map_err(to_profile_error)?;
            }
        }

        Ok(())
    }
}

// Manage the profile files stored in the tool directory
pub struct ProfileStore {
    dir: PathBuf,

    // Which slots have a file on disk, refreshed on start-up
    // and after every save or delete
    presence: [bool; SLOT_COUNT],
}

impl ProfileStore {
    pub fn new(dir: &Path) -> Self {
        let mut store = Self {
            dir: dir.to_path_buf(),
            presence: [false; SLOT_COUNT],
        };

        store.refresh();
        store
    }

    pub fn path(&self, slot: Slot) -> PathBuf {
        self.dir
            .join(format!("profile{}.{PROFILE_EXTENSION}", slot.id()))
    }

    // Re-check every slot on disk
    pub fn refresh(&mut self) {
        for slot in Slot::ALL {
            self.presence[slot.position()] = self.exists(slot);
        }

        trace!("Profile presence: {:?}", self.presence);
    }

    pub fn exists(&self, slot: Slot) -> bool {
        self.path(slot).is_file()
    }

    // Cached presence, as of the last refresh
    pub fn is_present(&self, slot: Slot) -> bool {
        self.presence[slot.position()]
    }

    /// Store the settings of `snapshot` in `slot`, overwriting any
    /// previous profile.
    pub fn save(
        &mut self,
        slot: Slot,
        snapshot: &TelemetrySnapshot,
    ) -> Result<Profile, ProfileError> {
        let profile = Profile::from_snapshot(slot, snapshot)?;
        let path = self.path(slot);

        debug!("Saving profile {} to {:?}", slot, path);

        let written = fs::write(&path, profile.to_file_contents())
            .map_err(|source| ProfileError::Io { slot, source });

        self.refresh();
        written?;

        info!("Saved profile {}: {:?}", slot, profile);

        Ok(profile)
    }

    pub fn read(&self, slot: Slot) -> Result<Profile, ProfileError> {
        let path = self.path(slot);

        let contents = fs::read_to_string(&path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ProfileError::NotFound(slot)
            } else {
                ProfileError::Io { slot, source }
            }
        })?;

        Profile::parse(slot, &contents)
    }

    /// Read the profile in `slot` and apply it to the device.
    ///
    /// Returns the slot so the caller can mark it active.
    pub fn load(
        &self,
        slot: Slot,
        device: &mut dyn DeviceHandle,
    ) -> Result<Slot, ProfileError> {
        let profile = self.read(slot)?;

        debug!("Applying profile {}: {:?}", slot, profile);

        profile.apply(slot, device)?;

        info!("Loaded profile {}", slot);

        Ok(slot)
    }

    /// Remove the profile file, returns false when there was nothing to
    /// delete.
    pub fn delete(&mut self, slot: Slot) -> Result<bool, ProfileError> {
        let path = self.path(slot);

        let removed = match fs::remove_file(&path) {
            Ok(()) => {
                info!("Deleted profile {}", slot);
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => {
                warn!("Failed to delete profile {}: {source}", slot);
                Err(ProfileError::Io { slot, source })
            }
        };

        self.refresh();

        removed
    }
}
