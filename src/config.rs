//! Configuration loading (external collaborator given a
//! concrete shape here): a TOML file deserialized with `serde`, plus a
//! `clap`-derived CLI for the handful of overrides worth toggling
//! without editing the file.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FtpConfig {
    pub enabled: bool,
    pub port: u16,
    pub ftps_enabled: bool,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
    pub control_timeout_secs: u64,
}

impl Default for FtpConfig {
    fn default() -> Self {
        FtpConfig {
            enabled: true,
            port: 21,
            ftps_enabled: false,
            tls_cert_path: None,
            tls_key_path: None,
            control_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NfsConfig {
    pub enabled: bool,
    pub tcp_port: u16,
    pub udp_port: u16,
    pub port_mapper_port: i32,
    pub io_timer_secs: u64,
    pub close_timer_secs: u64,
    pub client_timeout_secs: u64,
}

impl Default for NfsConfig {
    fn default() -> Self {
        NfsConfig {
            enabled: true,
            tcp_port: 2049,
            udp_port: 2049,
            port_mapper_port: -1,
            io_timer_secs: 5,
            close_timer_secs: 30,
            client_timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SmbConfig {
    pub enabled: bool,
    pub port: u16,
    pub netbios_port: u16,
    pub use_netbios: bool,
    pub enabled_dialects: Vec<String>,
    pub max_virtual_circuits: u32,
    pub read_timeout_secs: u64,
    pub load_balancer_hosts: Vec<IpAddr>,
    pub terminal_server_hosts: Vec<IpAddr>,
}

impl Default for SmbConfig {
    fn default() -> Self {
        SmbConfig {
            enabled: true,
            port: 445,
            netbios_port: 139,
            use_netbios: false,
            enabled_dialects: vec!["SMB2_002".into(), "SMB2_1".into(), "SMB3_0".into()],
            max_virtual_circuits: 16,
            read_timeout_secs: 900,
            load_balancer_hosts: Vec::new(),
            terminal_server_hosts: Vec::new(),
        }
    }
}

/// Default MLST fact mask: every fact `ON` by default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MlstFacts {
    pub size: bool,
    pub modify: bool,
    pub create: bool,
    pub file_type: bool,
    pub unique: bool,
    pub perm: bool,
    pub media_type: bool,
}

impl Default for MlstFacts {
    fn default() -> Self {
        MlstFacts {
            size: true,
            modify: true,
            create: true,
            file_type: true,
            unique: true,
            perm: true,
            media_type: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub buffer_size: usize,
    pub buffer_count: usize,
    pub dynamic_budget: usize,
    pub thread_pool_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            buffer_size: 64 * 1024,
            buffer_count: 256,
            dynamic_budget: 64 * 1024 * 1024,
            thread_pool_size: 32,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ftp: FtpConfig,
    pub nfs: NfsConfig,
    pub smb: SmbConfig,
    pub mlst_facts: MlstFacts,
    pub pool: PoolConfig,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ftp: FtpConfig::default(),
            nfs: NfsConfig::default(),
            smb: SmbConfig::default(),
            mlst_facts: MlstFacts::default(),
            pool: PoolConfig::default(),
            log_level: "info".into(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&text).map_err(ConfigError::Parse)
    }

    /// Applies CLI overrides on top of a loaded/default config.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(v) = cli.no_ftp.then_some(false) {
            self.ftp.enabled = v;
        }
        if let Some(v) = cli.no_nfs.then_some(false) {
            self.nfs.enabled = v;
        }
        if let Some(v) = cli.no_smb.then_some(false) {
            self.smb.enabled = v;
        }
        if let Some(level) = &cli.log_level {
            self.log_level = level.clone();
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config file: {0}")]
    Io(std::io::Error),
    #[error("parsing config file: {0}")]
    Parse(toml::de::Error),
}

/// CLI overrides: enable flags per
/// protocol, config file path, log level.
#[derive(Debug, clap::Parser)]
#[command(name = "sharefsd", about = "Multi-protocol network file server")]
pub struct Cli {
    /// Path to a TOML config file. Defaults are used if absent.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub no_ftp: bool,

    #[arg(long)]
    pub no_nfs: bool,

    #[arg(long)]
    pub no_smb: bool,

    #[arg(long)]
    pub log_level: Option<String>,
}
