pub mod clients;
pub mod platform;
pub mod task;

mod app;
pub mod commands;
pub mod config;

// Re-export App and config from modules
pub use app::App;
pub use app::RunReport;
pub use app::TaskOutcome;
pub use config::PlatformConfig;
pub use config::new_platform;

// Disable colors for all tests to get clean output
#[cfg(test)]
#[ctor::ctor]
fn init_tests() {
    colored::control::set_override(false);
}
