use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs, io};

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::api::config::ApiConfig;
use crate::logs::LogsConfig;

pub struct PathSet {
    pub config_path: PathBuf,
}

impl PathSet {
    const DEFAULT_CONFIG_PATH: &'static str = "/etc/foulkon";

    pub fn new(config_path: Option<PathBuf>) -> Self {
        let config_path = if let Some(path) = config_path {
            path
        } else if let Ok(path) = env::var("FOULKON_CONFIG") {
            PathBuf::from(path)
        } else {
            PathBuf::from(Self::DEFAULT_CONFIG_PATH)
        };

        Self { config_path }
    }

    pub fn load_config<T, F>(&self, name: &str, default_func: F) -> Result<T>
    where
        T: CommonConfig + DeserializeOwned,
        F: FnOnce() -> T,
    {
        let path = self.config_file(name);
        let mut cfg: T = match fs::read_to_string(&path) {
            Ok(s) => toml::from_str(&s).context("parse config toml")?,
            // Reported by the caller once logging is up.
            Err(err) if err.kind() == io::ErrorKind::NotFound => default_func(),
            Err(err) => {
                return Err(err).context(format!("read config file: {}", path.display()));
            }
        };

        cfg.complete(self).context("validate config")?;
        Ok(cfg)
    }

    pub fn config_file(&self, name: &str) -> PathBuf {
        self.config_path.join(format!("{name}.toml"))
    }

    /// Resolve a possibly relative file path against the config directory.
    pub fn resolve(&self, path: &str) -> String {
        if path.is_empty() || Path::new(path).is_absolute() {
            return path.to_string();
        }
        format!("{}", self.config_path.join(path).display())
    }
}

pub trait CommonConfig {
    fn default() -> Self;
    fn complete(&mut self, ps: &PathSet) -> Result<()>;
}

/// See: [`shellexpand::full`].
pub fn expandenv(name: &str, s: impl AsRef<str>) -> Result<String> {
    let s =
        shellexpand::full(s.as_ref()).with_context(|| format!("expand env value for '{name}'"))?;
    Ok(s.to_string())
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProxyConfig {
    #[serde(default = "ProxyConfig::default_host")]
    pub host: String,

    #[serde(default = "ProxyConfig::default_port")]
    pub port: String,

    #[serde(default = "ProxyConfig::default_cert_file")]
    pub cert_file: String,

    #[serde(default = "ProxyConfig::default_key_file")]
    pub key_file: String,

    /// Extra ALPN protocols set on the TLS acceptor, `http/1.1` is always
    /// added. Only `h2` and `http/1.1` are accepted. Note that actix installs
    /// its own protocol selection when the listener starts, which offers
    /// both `h2` and `http/1.1` whatever is configured here.
    #[serde(default = "ProxyConfig::default_alpn")]
    pub alpn: Vec<String>,

    /// How often proxy resources are fetched again, e.g. "10s".
    #[serde(default = "ProxyConfig::default_refresh_time")]
    pub refresh_time: String,

    #[serde(default = "ProxyConfig::default_identity_header")]
    pub identity_header: String,

    #[serde(default = "ProxyConfig::default_request_timeout")]
    pub request_timeout: String,

    #[serde(default = "ProxyConfig::default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    #[serde(default = "ProxyConfig::default_workers")]
    pub workers: u64,

    #[serde(default = "ProxyConfig::default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    #[serde(default = "ApiConfig::default")]
    pub api: ApiConfig,

    #[serde(default = "LogsConfig::default")]
    pub logs: LogsConfig,

    #[serde(skip)]
    refresh_duration: Duration,

    #[serde(skip)]
    request_timeout_duration: Duration,
}

impl CommonConfig for ProxyConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            cert_file: Self::default_cert_file(),
            key_file: Self::default_key_file(),
            alpn: Self::default_alpn(),
            refresh_time: Self::default_refresh_time(),
            identity_header: Self::default_identity_header(),
            request_timeout: Self::default_request_timeout(),
            keep_alive_secs: Self::default_keep_alive_secs(),
            workers: Self::default_workers(),
            shutdown_timeout_secs: Self::default_shutdown_timeout_secs(),
            api: ApiConfig::default(),
            logs: LogsConfig::default(),
            refresh_duration: Duration::ZERO,
            request_timeout_duration: Duration::ZERO,
        }
    }

    fn complete(&mut self, ps: &PathSet) -> Result<()> {
        self.host = expandenv("host", &self.host)?;
        self.port = expandenv("port", &self.port)?;

        self.cert_file = ps.resolve(&expandenv("cert_file", &self.cert_file)?);
        self.key_file = ps.resolve(&expandenv("key_file", &self.key_file)?);

        for proto in self.alpn.iter() {
            if !Self::SUPPORTED_ALPN.contains(&proto.as_str()) {
                bail!(
                    "unsupported alpn protocol '{proto}', expect one of {:?}",
                    Self::SUPPORTED_ALPN
                );
            }
        }

        self.refresh_duration = humantime::parse_duration(&self.refresh_time)
            .with_context(|| format!("parse refresh_time '{}'", self.refresh_time))?;
        if self.refresh_duration.is_zero() {
            bail!("refresh_time must be greater than 0");
        }

        self.request_timeout_duration = humantime::parse_duration(&self.request_timeout)
            .with_context(|| format!("parse request_timeout '{}'", self.request_timeout))?;
        if self.request_timeout_duration.is_zero() {
            bail!("request_timeout must be greater than 0");
        }

        self.identity_header = expandenv("identity_header", &self.identity_header)?;
        if self.identity_header.is_empty() {
            bail!("identity_header cannot be empty");
        }

        self.bind_address().context("resolve bind address")?;

        self.api.complete(ps).context("api")?;
        self.logs.complete(ps).context("logs")?;

        Ok(())
    }
}

impl ProxyConfig {
    const SUPPORTED_ALPN: [&'static str; 2] = ["h2", "http/1.1"];

    const HTTP_PORT: &'static str = "80";
    const HTTPS_PORT: &'static str = "443";

    pub fn tls_enabled(&self) -> bool {
        !self.cert_file.is_empty() || !self.key_file.is_empty()
    }

    /// The address the listener binds. An empty port falls back to the
    /// well-known port of the scheme in use.
    pub fn bind_address(&self) -> Result<SocketAddr> {
        let host = if self.host.is_empty() {
            "0.0.0.0"
        } else {
            self.host.as_str()
        };
        let port = if !self.port.is_empty() {
            self.port.as_str()
        } else if self.tls_enabled() {
            Self::HTTPS_PORT
        } else {
            Self::HTTP_PORT
        };

        let addr = format!("{host}:{port}");
        let mut addrs = addr
            .to_socket_addrs()
            .with_context(|| format!("invalid bind address '{addr}'"))?;
        match addrs.next() {
            Some(addr) => Ok(addr),
            None => bail!("bind address '{addr}' resolved to nothing"),
        }
    }

    pub fn refresh_duration(&self) -> Duration {
        self.refresh_duration
    }

    pub fn request_timeout_duration(&self) -> Duration {
        self.request_timeout_duration
    }

    pub fn default_host() -> String {
        String::new()
    }

    pub fn default_port() -> String {
        String::new()
    }

    pub fn default_cert_file() -> String {
        String::new()
    }

    pub fn default_key_file() -> String {
        String::new()
    }

    pub fn default_alpn() -> Vec<String> {
        vec![]
    }

    pub fn default_refresh_time() -> String {
        String::from("10s")
    }

    pub fn default_identity_header() -> String {
        String::from("Authorization")
    }

    pub fn default_request_timeout() -> String {
        String::from("30s")
    }

    pub fn default_keep_alive_secs() -> u64 {
        0
    }

    pub fn default_workers() -> u64 {
        0
    }

    pub fn default_shutdown_timeout_secs() -> u64 {
        30
    }
}
