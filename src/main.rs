use std::process::ExitCode;

use anyhow::Result;
use bnt::{
    EXIT_DEVICE_INIT,
    arg_parser::ArgsOptions,
    config::AppContext,
    dashboard,
    device::NvmlDevice,
    logger, offline,
};
use clap::Parser;
use tracing::{error, info};

const DASHBOARD_LOG: &str = "bnt.log";

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            for e in err.chain() {
                error!("{e}");
            }
            eprintln!("Error: {err:#}");

            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<u8> {
    // Parse the command line arguments
    let config = ArgsOptions::parse().into_configuration()?;

    // The dashboard owns the terminal, its logs go to a file
    let log_file = match (&config.log_file, config.action) {
        (Some(path), _) => Some(path.clone()),
        (None, None) => Some(config.profile_dir.join(DASHBOARD_LOG)),
        (None, Some(_)) => None,
    };
    logger::init_logging(log_file.as_deref());

    let device = match NvmlDevice::open(config.gpu_index) {
        Ok(device) => device,
        Err(err) => {
            error!("Failed to open GPU {}: {err}", config.gpu_index);
            eprintln!("Failed to open GPU {}: {err}", config.gpu_index);

            return Ok(EXIT_DEVICE_INIT);
        }
    };

    let mut ctx = AppContext::new(config, Box::new(device));

    let result = dispatch(&mut ctx).await;

    // Release the management session on every exit path
    if let Err(err) = ctx.release() {
        error!("Failed to release the device: {err}");
    }

    result
}

async fn dispatch(ctx: &mut AppContext) -> Result<u8> {
    match ctx.config.action {
        Some(action) => {
            let mut stdout = std::io::stdout().lock();
            offline::run(action, ctx.device.as_mut(), &ctx.store, &mut stdout)
        }
        None => {
            info!("Starting the dashboard on GPU {}", ctx.config.gpu_index);
            dashboard::start(ctx).await
        }
    }
}
