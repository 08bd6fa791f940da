use crate::buffer::DEFAULT_CAPACITY;
use crate::net::{ListenerConfig, DEFAULT_MAX_CONNECTIONS, DEFAULT_PORT};
use crate::render::font::DEFAULT_FONT_SIZE;
use crate::telemetry::logging::{LogConfig, LogLevel};
use anyhow::Context;
use clap::{builder::BoolishValueParser, ArgAction, Args, Parser};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_REFRESH: Duration = Duration::from_millis(1000);
pub const DEFAULT_SURFACE_WIDTH: u32 = 800;
pub const DEFAULT_SURFACE_HEIGHT: u32 = 480;
pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(
    name = "dashterm",
    about = "Rolling text display fed by newline-delimited TCP clients",
    author,
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "DASHTERM_BIND_HOST",
        default_value = "0.0.0.0",
        help = "Address the TCP listener binds to"
    )]
    pub bind_host: String,

    #[arg(long, env = "DASHTERM_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    #[arg(
        long,
        env = "DASHTERM_CAPACITY",
        default_value_t = DEFAULT_CAPACITY as u64,
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Number of recent lines kept for display"
    )]
    pub capacity: u64,

    #[arg(
        long,
        env = "DASHTERM_REFRESH_MS",
        default_value_t = 1000,
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Periodic redraw interval while a surface is attached"
    )]
    pub refresh_ms: u64,

    #[arg(
        long,
        env = "DASHTERM_FONT_SIZE",
        default_value_t = DEFAULT_FONT_SIZE,
        help = "Font size in pixels; the largest built-in font not taller than this is used"
    )]
    pub font_size: u32,

    #[arg(
        long,
        env = "DASHTERM_MAX_CONNECTIONS",
        default_value_t = DEFAULT_MAX_CONNECTIONS as u64,
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Clients served at once; extra clients wait in the accept backlog"
    )]
    pub max_connections: u64,

    #[arg(
        long,
        env = "DASHTERM_NO_BANNER",
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value_t = false,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new(),
        value_name = "BOOL",
        help = "Start with an empty buffer instead of the listening banner"
    )]
    pub no_banner: bool,

    #[command(flatten)]
    pub host: HostArgs,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

/// Headless host options used by the `dashterm` binary.
#[derive(Args, Debug, Clone)]
pub struct HostArgs {
    #[arg(long, env = "DASHTERM_SURFACE_WIDTH", default_value_t = DEFAULT_SURFACE_WIDTH)]
    pub surface_width: u32,

    #[arg(long, env = "DASHTERM_SURFACE_HEIGHT", default_value_t = DEFAULT_SURFACE_HEIGHT)]
    pub surface_height: u32,

    #[arg(
        long,
        value_name = "PATH",
        env = "DASHTERM_SNAPSHOT",
        help = "Write the latest frame to this PNG periodically and at exit"
    )]
    pub snapshot: Option<PathBuf>,

    #[arg(
        long,
        env = "DASHTERM_SNAPSHOT_SECS",
        default_value_t = 5,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub snapshot_secs: u64,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "DASHTERM_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "DASHTERM_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

/// Everything the display component graph needs.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayConfig {
    pub bind_host: IpAddr,
    pub port: u16,
    pub capacity: usize,
    pub refresh_interval: Duration,
    pub font_size: u32,
    pub max_connections: usize,
    pub banner: bool,
}

impl DisplayConfig {
    pub fn listener_config(&self) -> ListenerConfig {
        ListenerConfig {
            bind_host: self.bind_host,
            max_connections: self.max_connections,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            capacity: DEFAULT_CAPACITY,
            refresh_interval: DEFAULT_REFRESH,
            font_size: DEFAULT_FONT_SIZE,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            banner: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub surface_width: u32,
    pub surface_height: u32,
    pub snapshot: Option<PathBuf>,
    pub snapshot_interval: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            surface_width: DEFAULT_SURFACE_WIDTH,
            surface_height: DEFAULT_SURFACE_HEIGHT,
            snapshot: None,
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub display: DisplayConfig,
    pub host: HostConfig,
    pub log: LogConfig,
}

impl TryFrom<Cli> for AppConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let bind_host: IpAddr = cli
            .bind_host
            .parse()
            .with_context(|| format!("invalid bind host: {}", cli.bind_host))?;
        let capacity = usize::try_from(cli.capacity)
            .with_context(|| format!("capacity out of range: {}", cli.capacity))?;
        let max_connections = usize::try_from(cli.max_connections)
            .with_context(|| format!("max connections out of range: {}", cli.max_connections))?;
        if cli.host.surface_width == 0 || cli.host.surface_height == 0 {
            anyhow::bail!(
                "surface must be non-empty, got {}x{}",
                cli.host.surface_width,
                cli.host.surface_height
            );
        }

        Ok(AppConfig {
            display: DisplayConfig {
                bind_host,
                port: cli.port,
                capacity,
                refresh_interval: Duration::from_millis(cli.refresh_ms),
                font_size: cli.font_size,
                max_connections,
                banner: !cli.no_banner,
            },
            host: HostConfig {
                surface_width: cli.host.surface_width,
                surface_height: cli.host.surface_height,
                snapshot: cli.host.snapshot,
                snapshot_interval: Duration::from_secs(cli.host.snapshot_secs),
            },
            log: cli.logging.to_config(),
        })
    }
}
