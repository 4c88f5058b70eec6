pub mod arg_parser;
pub mod config;
pub mod control;
pub mod dashboard;
pub mod device;
pub mod errors;
pub mod logger;
pub mod offline;
pub mod profile_store;
pub mod telemetry;

// Process exit codes
pub const EXIT_OK: u8 = 0;
pub const EXIT_USER_QUIT: u8 = 1;
pub const EXIT_DEVICE_INIT: u8 = 8;
