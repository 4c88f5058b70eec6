use std::{path::PathBuf, time::Duration};

use crate::{
    dashboard::palette::Palette,
    device::{DeviceHandle, DeviceResult},
    profile_store::{ProfileStore, Slot},
};

// One-shot change applied without starting the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineAction {
    SetClocks { core: i64, mem: i64 },
    SetPowerLimit(i64),
    SetMaxFan,
    SetAutoFan,
    SetCustomFan(i64),
    SetProfile(Slot),
}

// Run configuration, fixed once the command line is parsed
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    pub gpu_index: u32,
    pub refresh: Duration,

    pub interactive: bool,
    pub reactive_color: bool,
    pub no_color: bool,

    // At most one offline action, its presence skips the dashboard
    pub action: Option<OfflineAction>,

    pub profile_dir: PathBuf,
    pub log_file: Option<PathBuf>,
}

/// Everything the dashboard and the offline path work with, built once at
/// start-up and handed down by reference.
pub struct AppContext {
    pub config: Configuration,
    pub device: Box<dyn DeviceHandle>,
    pub store: ProfileStore,
    pub palette: Palette,
}

impl AppContext {
    pub fn new(config: Configuration, device: Box<dyn DeviceHandle>) -> Self {
        let store = ProfileStore::new(&config.profile_dir);
        let palette = Palette::new(!config.no_color);

        Self {
            config,
            device,
            store,
            palette,
        }
    }

    // Give the management session back, consumes the context
    pub fn release(self) -> DeviceResult<()> {
        self.device.release()
    }
}
