use std::{collections::BTreeMap, fmt::Debug, net::SocketAddr, time::Duration};

use anyhow::{anyhow, Result};
use blob_store::BlobStorageConfig;
use figment::{
    providers::{Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

const LOCAL_ENV: &str = "local";

pub const DEFAULT_BLOB_SERVER_PORT: u16 = 3001;
pub const DEFAULT_UPLOAD_PORT: u16 = 9991;
pub const DEFAULT_DOWNLOAD_PORT: u16 = 9992;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enable_tracing: bool,
    pub enable_metrics: bool,
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for BlobServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_BLOB_SERVER_PORT,
        }
    }
}

impl BlobServerConfig {
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        parse_listen_addr(&self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiServerConfig {
    pub host: String,
    pub upload_port: u16,
    pub download_port: u16,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            upload_port: DEFAULT_UPLOAD_PORT,
            download_port: DEFAULT_DOWNLOAD_PORT,
        }
    }
}

impl ApiServerConfig {
    pub fn upload_addr(&self) -> Result<SocketAddr> {
        parse_listen_addr(&self.host, self.upload_port)
    }

    pub fn download_addr(&self) -> Result<SocketAddr> {
        parse_listen_addr(&self.host, self.download_port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Budget for handling one inbound request, body included.
    pub request_timeout_secs: u64,
    /// Connect timeout for calls made to blob-servers. 0 keeps the client
    /// default.
    pub connect_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 15,
            connect_timeout_secs: 5,
        }
    }
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_secs > 0).then(|| Duration::from_secs(self.connect_timeout_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub env: String,
    pub structured_logging: bool,
    pub telemetry: TelemetryConfig,
    /// Blob-server locations keyed by group name.
    pub servers: BTreeMap<String, Vec<String>>,
    pub blob_server: BlobServerConfig,
    pub blob_storage: BlobStorageConfig,
    pub api_server: ApiServerConfig,
    pub http: HttpConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            env: LOCAL_ENV.to_string(),
            structured_logging: false,
            telemetry: Default::default(),
            servers: BTreeMap::new(),
            blob_server: Default::default(),
            blob_storage: BlobStorageConfig::new("data"),
            api_server: Default::default(),
            http: Default::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_path(path: &str) -> Result<ServerConfig> {
        let config_str = std::fs::read_to_string(path)?;
        Self::from_yaml(&config_str)
    }

    /// Parses the file without checking role-specific settings, so a value
    /// one role cannot use never hides the rest of the file from another.
    pub fn from_yaml(config_str: &str) -> Result<ServerConfig> {
        let config: ServerConfig = Figment::new().merge(Yaml::string(config_str)).extract()?;
        Ok(config)
    }

    /// Checks the settings a blob-server binds.
    pub fn validate_blob_server(&self) -> Result<()> {
        self.blob_server.listen_addr()?;
        self.blob_storage
            .local_dir()
            .map_err(|e| anyhow!("invalid blob_storage: {}", e))?;
        self.validate_http()
    }

    /// Checks the settings an api-server binds.
    pub fn validate_api_server(&self) -> Result<()> {
        self.api_server.upload_addr()?;
        self.api_server.download_addr()?;
        if self.api_server.upload_port == self.api_server.download_port {
            return Err(anyhow!(
                "upload and download ports must differ: {}",
                self.api_server.upload_port
            ));
        }
        self.validate_http()
    }

    fn validate_http(&self) -> Result<()> {
        if self.http.request_timeout_secs == 0 {
            return Err(anyhow!("http.request_timeout_secs must be greater than 0"));
        }
        Ok(())
    }
}

fn parse_listen_addr(host: &str, port: u16) -> Result<SocketAddr> {
    let addr = if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    };
    addr.parse::<SocketAddr>()
        .map_err(|e| anyhow!("invalid listen address {}: {}", addr, e))
}
