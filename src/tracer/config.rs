use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::LevelFilter;
use tracer_core::pdk::ModuleConfig;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "PROCESS_TRACER_CONFIG";

/// Section holding the settings of the tracer itself.
pub const TRACER_SECTION: &str = "tracer";

/// Configuration of the tracer and of every monitor module.
///
/// It is backed by an `INI` file, one section per module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracerConfig {
    log_level: LevelFilter,
    channel: channel_logger::Config,
    process_monitor: process_monitor::Config,
    file_system_monitor: file_system_monitor::Config,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            log_level: LevelFilter::Off,
            channel: channel_logger::Config::default(),
            process_monitor: process_monitor::Config::default(),
            file_system_monitor: file_system_monitor::Config::default(),
        }
    }
}

impl TracerConfig {
    /// Loads the file named by [`CONFIG_ENV`].
    ///
    /// A missing variable or a missing file yields the defaults, only a file
    /// that exists but can't be used is an error.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_optional_file(&PathBuf::from(path)),
            None => Ok(Self::default()),
        }
    }

    fn from_optional_file(config_file: &Path) -> Result<Self> {
        if !config_file.exists() {
            log::debug!(
                "Configuration file {} not found, using defaults",
                config_file.display()
            );
            return Ok(Self::default());
        }
        Self::from_file(config_file)
    }

    pub fn from_file(config_file: &Path) -> Result<Self> {
        let conf = ini::Ini::load_from_file(config_file)
            .with_context(|| format!("Error loading configuration from {config_file:?}"))?;
        Self::from_ini(&conf)
    }

    pub fn from_ini(conf: &ini::Ini) -> Result<Self> {
        let mut configs: HashMap<String, ModuleConfig> = HashMap::new();

        for (section, prop) in conf {
            if let Some(section) = section {
                let mod_config = configs.entry(section.to_string()).or_default();
                for (key, value) in prop.iter() {
                    log::debug!("{}.{}={}", section, key, value);
                    mod_config.insert(key, value);
                }
            }
        }

        Self::from_module_configs(&configs)
    }

    pub fn from_module_configs(configs: &HashMap<String, ModuleConfig>) -> Result<Self> {
        let empty = ModuleConfig::default();
        let section = |name: &str| configs.get(name).unwrap_or(&empty);

        let tracer = section(TRACER_SECTION);
        Ok(Self {
            log_level: tracer
                .with_default("log_level", LevelFilter::Off)
                .context("Invalid [tracer] configuration")?,
            channel: channel_logger::Config::try_from(tracer)
                .context("Invalid [tracer] configuration")?,
            process_monitor: process_monitor::Config::try_from(section(
                process_monitor::MODULE_NAME,
            ))
            .with_context(|| format!("Invalid [{}] configuration", process_monitor::MODULE_NAME))?,
            file_system_monitor: file_system_monitor::Config::try_from(section(
                file_system_monitor::MODULE_NAME,
            ))
            .with_context(|| {
                format!(
                    "Invalid [{}] configuration",
                    file_system_monitor::MODULE_NAME
                )
            })?,
        })
    }

    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    pub fn channel(&self) -> &channel_logger::Config {
        &self.channel
    }

    pub fn process_monitor(&self) -> &process_monitor::Config {
        &self.process_monitor
    }

    pub fn file_system_monitor(&self) -> &file_system_monitor::Config {
        &self.file_system_monitor
    }
}
