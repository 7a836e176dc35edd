//! Process Tracer is an in-process activity tracer. Once loaded into a target
//! process it redirects a fixed set of operating-system entry points and
//! reports every interception to an external controller.
//!
//! At high level it's made of:
//!
//! - a [tracer](crate::tracer::Tracer) driven by the loader notifications of
//!   the host, which binds to the controller and installs the redirections
//! - the monitor modules the redirected entry points land in:
//!   [process_monitor] and [file_system_monitor]
//! - the [channel_logger] transport delivering events to the controller
//!
//! Every child process created by a traced process is traced as well: the
//! module is injected into the child before it runs and the controller
//! identity is handed down to it.
//!
//! ## Configuration
//!
//! The tracer reads an optional `INI` file named by the
//! `PROCESS_TRACER_CONFIG` environment variable, see
//! [`TracerConfig`](crate::tracer::TracerConfig). A traced host never fails
//! because of configuration: any problem falls back to the defaults.

pub mod tracer;

use log::LevelFilter;

use crate::tracer::TracerConfig;

pub mod metadata {
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

/// Init logger. The level comes from the configuration and defaults to off,
/// leaving the host's stderr untouched.
/// If RUST_LOG is set, we assume the user wants to debug something
/// and use env_logger default behaviour.
///
/// A logger already installed by the host is kept.
pub fn init_logger(level_filter: LevelFilter) {
    let result = if std::env::var_os("RUST_LOG").is_some() {
        env_logger::try_init()
    } else {
        env_logger::builder().filter_level(level_filter).try_init()
    };

    if result.is_err() {
        log::debug!("logger already initialized by the host");
    }
}

/// Loads the configuration and initializes logging from it.
///
/// Configuration problems are logged and the defaults used.
pub fn configure() -> TracerConfig {
    match TracerConfig::from_env() {
        Ok(config) => {
            init_logger(config.log_level());
            config
        }
        Err(err) => {
            init_logger(LevelFilter::Off);
            log::error!("Using default configuration: {err:?}");
            TracerConfig::default()
        }
    }
}
