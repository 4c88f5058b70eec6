use std::{env, path::PathBuf, time::Duration};

use anyhow::{Context, Result, anyhow};
use clap::{ArgGroup, Parser};

use crate::{
    config::{Configuration, OfflineAction},
    profile_store::Slot,
};

/// Monitor and tune an Nvidia GPU from the terminal
#[derive(Parser, Debug)]
#[command(name = "bnt", version, about)]
#[command(group(ArgGroup::new("offline").multiple(false)))]
pub struct ArgsOptions {
    /// GPU index to monitor
    #[arg(long, default_value_t = 0)]
    pub gpu_number: u32,

    /// Dashboard refresh interval in milliseconds
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    pub refresh_rate: u64,

    /// Color values by how close they are to their limits
    #[arg(long)]
    pub reactive_color: bool,

    /// Disable all colors
    #[arg(long)]
    pub no_color: bool,

    /// Enable the dashboard keys that change device settings
    #[arg(long)]
    pub interactive: bool,

    /// Set core and memory clock offsets in MHz, e.g. --set-clocks -150 500
    #[arg(
        long,
        num_args = 2,
        value_names = ["CORE", "MEM"],
        allow_negative_numbers = true,
        group = "offline"
    )]
    pub set_clocks: Option<Vec<i64>>,

    /// Set the power limit in watts
    #[arg(long, value_name = "WATTS", allow_negative_numbers = true, group = "offline")]
    pub set_power_limit: Option<i64>,

    /// Run every fan at full speed
    #[arg(long, group = "offline")]
    pub set_max_fan: bool,

    /// Hand fan control back to the driver
    #[arg(long, group = "offline")]
    pub set_auto_fan: bool,

    /// Run every fan at the given percentage (30 to 100)
    #[arg(long, value_name = "PERCENT", allow_negative_numbers = true, group = "offline")]
    pub set_custom_fan: Option<i64>,

    /// Apply a saved profile
    #[arg(
        long,
        value_name = "SLOT",
        value_parser = clap::value_parser!(i64).range(1..=4),
        group = "offline"
    )]
    pub set_profile: Option<i64>,

    /// Directory holding the profile files, defaults to the executable's directory
    #[arg(long, value_name = "DIR")]
    pub profile_dir: Option<PathBuf>,

    /// Log file used while the dashboard owns the terminal
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

impl ArgsOptions {
    // Resolve the parsed flags into the immutable run configuration
    pub fn into_configuration(self) -> Result<Configuration> {
        let action = self.offline_action()?;

        let profile_dir = match self.profile_dir {
            Some(dir) => dir,
            None => tool_dir()?,
        };

        Ok(Configuration {
            gpu_index: self.gpu_number,
            refresh: Duration::from_millis(self.refresh_rate),
            interactive: self.interactive,
            reactive_color: self.reactive_color,
            no_color: self.no_color,
            action,
            profile_dir,
            log_file: self.log_file,
        })
    }

    fn offline_action(&self) -> Result<Option<OfflineAction>> {
        if let Some(clocks) = &self.set_clocks {
            let [core, mem] = clocks[..] else {
                return Err(anyhow!("--set-clocks needs a core and a memory offset"));
            };

            return Ok(Some(OfflineAction::SetClocks { core, mem }));
        }

        if let Some(watts) = self.set_power_limit {
            return Ok(Some(OfflineAction::SetPowerLimit(watts)));
        }

        if self.set_max_fan {
            return Ok(Some(OfflineAction::SetMaxFan));
        }

        if self.set_auto_fan {
            return Ok(Some(OfflineAction::SetAutoFan));
        }

        if let Some(percent) = self.set_custom_fan {
            return Ok(Some(OfflineAction::SetCustomFan(percent)));
        }

        if let Some(slot) = self.set_profile {
            return Ok(Some(OfflineAction::SetProfile(Slot::new(slot)?)));
        }

        Ok(None)
    }
}

// Profiles live next to the executable
fn tool_dir() -> Result<PathBuf> {
    let exe = env::current_exe().with_context(|| "Failed to locate the executable")?;

    exe.parent()
        .map(|dir| dir.to_path_buf())
        .ok_or_else(|| anyhow!("Executable path {:?} has no parent directory", exe))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Configuration> {
        let mut argv = vec!["bnt", "--profile-dir", "/tmp/bnt"];
        argv.extend_from_slice(args);

        ArgsOptions::try_parse_from(argv)?.into_configuration()
    }

    #[test]
    fn defaults_start_the_read_only_dashboard() {
        let config = parse(&[]).unwrap();

        assert_eq!(config.gpu_index, 0);
        assert_eq!(config.refresh, Duration::from_millis(1000));
        assert!(!config.interactive);
        assert!(!config.reactive_color);
        assert!(!config.no_color);
        assert_eq!(config.action, None);
        assert_eq!(config.profile_dir, PathBuf::from("/tmp/bnt"));
    }

    #[test]
    fn set_clocks_accepts_negative_offsets() {
        let config = parse(&["--set-clocks", "-150", "500"]).unwrap();

        assert_eq!(
            config.action,
            Some(OfflineAction::SetClocks { core: -150, mem: 500 })
        );
    }

    #[test]
    fn only_one_offline_action_is_accepted() {
        assert!(parse(&["--set-max-fan", "--set-auto-fan"]).is_err());
        assert!(parse(&["--set-power-limit", "300", "--set-profile", "1"]).is_err());
    }

    #[test]
    fn profile_slot_must_be_between_one_and_four() {
        assert!(parse(&["--set-profile", "0"]).is_err());
        assert!(parse(&["--set-profile", "5"]).is_err());

        let config = parse(&["--set-profile", "4"]).unwrap();
        assert_eq!(
            config.action,
            Some(OfflineAction::SetProfile(Slot::new(4).unwrap()))
        );
    }

    #[test]
    fn dashboard_flags_are_carried_over() {
        let config = parse(&[
            "--gpu-number", "1",
            "--refresh-rate", "250",
            "--interactive",
            "--reactive-color",
        ])
        .unwrap();

        assert_eq!(config.gpu_index, 1);
        assert_eq!(config.refresh, Duration::from_millis(250));
        assert!(config.interactive);
        assert!(config.reactive_color);
    }

    #[test]
    fn zero_refresh_rate_is_rejected() {
        assert!(parse(&["--refresh-rate", "0"]).is_err());
    }
}
