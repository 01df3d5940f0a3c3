use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use bridge_transfer::{
    DEFAULT_EXTENSION, DEFAULT_PORT, DirectorySource, FileSource, PayloadSource, SessionConfig,
    WireLayout,
};

/// Which handshake/transfer variant to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Simple,
    Manifest,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub protocol: Protocol,
    pub payload_dir: PathBuf,
    pub payload_ext: String,
    pub payload_file: Option<PathBuf>,
    pub layout: WireLayout,
    pub framed_status: bool,
    pub half_close: Option<bool>,
    pub restart: bool,
}

impl ServerConfig {
    /// Read `BRIDGE_*` variables from the process environment. `arg_file`
    /// (the first command-line argument) overrides `BRIDGE_PAYLOAD_FILE`.
    pub fn from_env(arg_file: Option<String>) -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok(), arg_file)
    }

    pub fn from_lookup<F>(lookup: F, arg_file: Option<String>) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host: IpAddr = match lookup("BRIDGE_HOST") {
            Some(v) => v.parse().with_context(|| format!("BRIDGE_HOST={}", v))?,
            None => IpAddr::from([0, 0, 0, 0]),
        };
        let port: u16 = match lookup("BRIDGE_PORT") {
            Some(v) => v.parse().with_context(|| format!("BRIDGE_PORT={}", v))?,
            None => DEFAULT_PORT,
        };
        let bind_addr = SocketAddr::new(host, port);

        let protocol = match lookup("BRIDGE_PROTOCOL").as_deref() {
            None | Some("manifest") => Protocol::Manifest,
            Some("simple") => Protocol::Simple,
            Some(other) => bail!("BRIDGE_PROTOCOL must be 'manifest' or 'simple', got '{}'", other),
        };

        let layout = match lookup("BRIDGE_WIRE").as_deref() {
            None | Some("legacy") => WireLayout::legacy(),
            Some("network") => WireLayout::network(),
            Some(other) => bail!("BRIDGE_WIRE must be 'legacy' or 'network', got '{}'", other),
        };

        let framed_status = match lookup("BRIDGE_STATUS").as_deref() {
            None | Some("raw") => false,
            Some("framed") => true,
            Some(other) => bail!("BRIDGE_STATUS must be 'raw' or 'framed', got '{}'", other),
        };

        let half_close = lookup("BRIDGE_HALF_CLOSE")
            .map(|v| parse_bool("BRIDGE_HALF_CLOSE", &v))
            .transpose()?;
        let restart = lookup("BRIDGE_RESTART")
            .map(|v| parse_bool("BRIDGE_RESTART", &v))
            .transpose()?
            .unwrap_or(false);

        let payload_file = arg_file
            .or_else(|| lookup("BRIDGE_PAYLOAD_FILE"))
            .map(PathBuf::from);
        if protocol == Protocol::Simple && payload_file.is_none() {
            bail!("simple protocol needs a payload file (argument or BRIDGE_PAYLOAD_FILE)");
        }

        Ok(Self {
            bind_addr,
            protocol,
            payload_dir: lookup("BRIDGE_PAYLOAD_DIR")
                .unwrap_or_else(|| "dylibs".into())
                .into(),
            payload_ext: lookup("BRIDGE_PAYLOAD_EXT").unwrap_or_else(|| DEFAULT_EXTENSION.into()),
            payload_file,
            layout,
            framed_status,
            half_close,
            restart,
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        let mut config = match self.protocol {
            Protocol::Simple => SessionConfig::simple(),
            Protocol::Manifest => SessionConfig::manifest_with(self.layout),
        }
        .with_bind_addr(self.bind_addr);
        if self.framed_status {
            config = config.with_framed_status();
        }
        if let Some(half_close) = self.half_close {
            config.half_close = half_close;
        }
        config
    }

    /// The manifest variant scans a directory unless a single file was given.
    pub fn payload_source(&self) -> Box<dyn PayloadSource> {
        match &self.payload_file {
            Some(path) => Box::new(FileSource::single(path.clone())),
            None => Box::new(DirectorySource::with_extension(
                self.payload_dir.clone(),
                &self.payload_ext,
            )),
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("{} must be a boolean, got '{}'", key, value),
    }
}
