use std::env;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

/// Top-level configuration for the payroll service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub storage: StorageConfig,
    pub engine: EngineConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let host = env::var("PAYROLL_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parse_var("PAYROLL_PORT", 3000u16)?;
        let log_level = env::var("PAYROLL_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let data_dir = env::var("PAYROLL_DATA_DIR")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);
        let seed_reference_data = parse_var("PAYROLL_SEED_REFERENCE_DATA", false)?;

        let params_dir = env::var("PAYROLL_PARAMS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("legal_params"));
        let reference_year = parse_var("PAYROLL_REFERENCE_YEAR", 2025i32)?;
        let worker_threads = parse_var("PAYROLL_WORKER_THREADS", 0usize)?;

        Ok(Self {
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            storage: StorageConfig {
                data_dir,
                seed_reference_data,
            },
            engine: EngineConfig {
                params_dir,
                reference_year,
                worker_threads,
            },
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        Err(_) => Ok(default),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Where records live.  No data directory means an in-memory store.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub data_dir: Option<PathBuf>,
    pub seed_reference_data: bool,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding legal parameter JSON files.
    pub params_dir: PathBuf,
    /// Year registered from the reference figures when `params_dir`
    /// holds no files.
    pub reference_year: i32,
    /// Batch pool size; 0 lets rayon decide.
    pub worker_threads: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} has an invalid value: {value:?}")]
    InvalidValue { name: &'static str, value: String },
    #[error("PAYROLL_HOST must parse to an IPv4 or IPv6 address")]
    InvalidHost { source: std::net::AddrParseError },
}
