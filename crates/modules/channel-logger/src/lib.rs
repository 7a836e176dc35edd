use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    str::FromStr,
};

use tracer_core::{
    event::Event,
    pdk::{ChannelError, ConfigError, ModuleConfig, Transport},
};

/// File name part of the controller channel.
pub const CHANNEL_NAME: &str = "ProcessTracerPipe";

/// Where controllers listen when nothing else is configured.
pub fn default_channel_base() -> PathBuf {
    #[cfg(windows)]
    {
        PathBuf::from(r"\\.\pipe").join(CHANNEL_NAME)
    }
    #[cfg(not(windows))]
    {
        std::env::temp_dir().join(CHANNEL_NAME)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Plaintext,
    Json,
}

impl FromStr for OutputFormat {
    type Err = ConfigError;
    fn from_str(format: &str) -> Result<Self, Self::Err> {
        match format.to_lowercase().as_str() {
            "plaintext" => Ok(OutputFormat::Plaintext),
            "json" => Ok(OutputFormat::Json),
            _ => Err(ConfigError::InvalidValue {
                field: String::from("output_format"),
                value: format.to_string(),
                err: String::from("Output format must be one of [plaintext, json]"),
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    channel_base: PathBuf,
    output_format: OutputFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channel_base: default_channel_base(),
            output_format: OutputFormat::Plaintext,
        }
    }
}

impl TryFrom<&ModuleConfig> for Config {
    type Error = ConfigError;

    fn try_from(config: &ModuleConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            channel_base: config
                .optional::<String>("channel_base")?
                .map(PathBuf::from)
                .unwrap_or_else(default_channel_base),
            output_format: config.with_default("output_format", OutputFormat::Plaintext)?,
        })
    }
}

/// One-shot client of the controller channel.
///
/// Every [`Transport::send`] opens the channel of the controller, writes a
/// single line and closes it again. No connection outlives a call.
#[derive(Debug, Clone)]
pub struct ChannelClient {
    channel_base: PathBuf,
    /// Last component of `channel_base`, what resolved names end with.
    channel_name: String,
    output_format: OutputFormat,
}

impl ChannelClient {
    pub fn new(config: &Config) -> Self {
        let channel_name = config
            .channel_base
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| config.channel_base.to_string_lossy().into_owned());
        Self {
            channel_base: config.channel_base.clone(),
            channel_name,
            output_format: config.output_format.clone(),
        }
    }

    pub fn channel_base(&self) -> &Path {
        &self.channel_base
    }

    /// Address of the channel `controller_id` listens on.
    pub fn address(&self, controller_id: u32) -> String {
        format!("{}:{controller_id}", self.channel_base.display())
    }

    fn render(&self, event: &Event) -> Result<String, ChannelError> {
        match self.output_format {
            OutputFormat::Plaintext => Ok(event.to_string()),
            OutputFormat::Json => Ok(serde_json::to_string(event)? + "\n"),
        }
    }
}

impl Transport for ChannelClient {
    fn send(&self, controller_id: u32, event: &Event) -> Result<(), ChannelError> {
        let line = self.render(event)?;
        let address = self.address(controller_id);

        let mut options = OpenOptions::new();
        #[cfg(windows)]
        options.write(true);
        #[cfg(not(windows))]
        options.append(true);

        let mut channel = options
            .open(&address)
            .map_err(|source| ChannelError::Open {
                address: address.clone(),
                source,
            })?;
        channel
            .write_all(line.as_bytes())
            .map_err(|source| ChannelError::Write { address, source })?;
        log::trace!("sent {} bytes to controller {controller_id}", line.len());
        Ok(())
    }

    /// `name` must end with the channel name as a whole path component.
    fn is_channel(&self, name: &str, controller_id: u32) -> bool {
        let channel = format!("{}:{controller_id}", self.channel_name);
        name.strip_suffix(&channel)
            .is_some_and(|rest| rest.is_empty() || rest.ends_with(['\\', '/']))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use hook_common::EntryPoint;

    use super::*;

    fn client(format: &str) -> (ChannelClient, PathBuf) {
        let base = std::env::temp_dir().join(format!("channel-{}", uuid::Uuid::new_v4()));
        let base_str = base.to_string_lossy().into_owned();
        let config: ModuleConfig = [
            ("channel_base", base_str.as_str()),
            ("output_format", format),
        ]
        .into_iter()
        .collect();
        let config = Config::try_from(&config).unwrap();
        (ChannelClient::new(&config), base)
    }

    #[test]
    fn every_event_is_one_line() {
        let (client, _base) = client("plaintext");
        let address = client.address(4242);
        fs::File::create(&address).unwrap();

        client
            .send(4242, &Event::hook(7, EntryPoint::ShellLaunch, "verb:open"))
            .unwrap();
        client
            .send(4242, &Event::info(7, "Permission Request"))
            .unwrap();

        assert_eq!(
            fs::read_to_string(&address).unwrap(),
            "pid:7 [Hook] ShellExecuteExW verb:open\npid:7 [Info] Permission Request\n"
        );
        fs::remove_file(&address).unwrap();
    }

    #[test]
    fn json_lines() {
        let (client, _base) = client("JSON");
        let address = client.address(1);
        fs::File::create(&address).unwrap();

        client
            .send(1, &Event::hook_error(7, EntryPoint::ProcessCreate, "failed with 2"))
            .unwrap();

        let written = fs::read_to_string(&address).unwrap();
        assert!(written.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(written.trim_end()).unwrap();
        assert_eq!(value["subject_pid"], 7);
        assert_eq!(value["tag"], "HookError");
        assert_eq!(value["source"], "CreateProcessInternalW");
        assert_eq!(value["message"], "failed with 2");
        fs::remove_file(&address).unwrap();
    }

    #[test]
    fn unreachable_controller() {
        let (client, _base) = client("plaintext");
        let err = client.send(99, &Event::info(7, "lost")).unwrap_err();
        assert!(matches!(err, ChannelError::Open { .. }));
        assert!(!Path::new(&client.address(99)).exists());
    }

    #[test]
    fn channel_names() {
        let (client, base) = client("plaintext");
        let name = base.file_name().unwrap().to_string_lossy().into_owned();
        assert!(client.is_channel(&client.address(4242), 4242));
        assert!(client.is_channel(&format!(r"\Device\NamedPipe\{name}:4242"), 4242));
        assert!(!client.is_channel(&client.address(4242), 424));
        assert!(!client.is_channel(&format!("{name}:42425"), 4242));
        assert!(!client.is_channel(&format!(r"\Device\NamedPipe\My{name}:4242"), 4242));
        assert!(client.is_channel(&format!("{name}:4242"), 4242));
        assert!(!client.is_channel("/var/log/app.log", 4242));
    }

    #[test]
    fn default_config() {
        let config = Config::try_from(&ModuleConfig::default()).unwrap();
        assert_eq!(config, Config::default());
        assert!(config.channel_base.ends_with(CHANNEL_NAME));
        assert!("xml".parse::<OutputFormat>().is_err());
    }
}
