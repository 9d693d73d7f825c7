//! Settings data structures

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Connection settings snapshotted by each transfer at creation time.
///
/// Changing the engine's settings only affects transfers created afterwards;
/// a running transfer keeps the snapshot it was created with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Per-operation network timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Ceiling on manual retries and transport-level automatic retries
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Read buffer size for streaming, in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// User-Agent header sent with HTTP requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Whether to validate TLS certificates
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,

    /// Forward proxy for HTTP(S) transfers
    #[serde(default)]
    pub proxy: Option<ProxySettings>,

    /// FTP passive-mode toggle
    #[serde(default = "default_ftp_passive")]
    pub ftp_passive: bool,

    /// Directory new transfers are saved into
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            chunk_size: default_chunk_size(),
            user_agent: default_user_agent(),
            verify_tls: default_verify_tls(),
            proxy: None,
            ftp_passive: default_ftp_passive(),
            download_dir: default_download_dir(),
        }
    }
}

impl Settings {
    /// Network timeout as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Forward proxy endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySettings {
    pub host: String,
    pub port: u16,
}

impl ProxySettings {
    /// Proxy endpoint as an `http://host:port` URL
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_chunk_size() -> usize {
    8192
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string()
}

fn default_verify_tls() -> bool {
    true
}

fn default_ftp_passive() -> bool {
    true
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| PathBuf::from("./downloads"))
}
