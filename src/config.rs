//! 配置加载与校验

use crate::error::{Result, XapiError};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

fn default_port() -> u16 {
    9000
}

fn default_keep_alive_time_ms() -> u64 {
    3_600_000
}

fn default_keep_alive_timeout_ms() -> u64 {
    30_000
}

fn default_max_message_size() -> usize {
    104 * 1024 * 1024
}

fn default_max_retry_count() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_probe_host() -> String {
    "www.google.com".to_string()
}

fn default_probe_port() -> u16 {
    80
}

fn default_probe_timeout_ms() -> u64 {
    3000
}

/// xAPI 会话配置
#[derive(Debug, Clone, Deserialize)]
pub struct XapiConfig {
    /// 网关主机名
    pub server: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub domain: String,
    /// 可用 XAPI_PASSWORD 环境变量覆盖
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub locale: String,
    /// 为 true 时必须配置存在的根证书文件
    #[serde(default)]
    pub ssl: bool,
    #[serde(default)]
    pub cert_file_path: Option<PathBuf>,
    /// 为 true 时使用 SRP 握手登录, 否则明文登录
    #[serde(default)]
    pub srp_login: bool,
    #[serde(default = "default_keep_alive_time_ms")]
    pub keep_alive_time_ms: u64,
    #[serde(default = "default_keep_alive_timeout_ms")]
    pub keep_alive_timeout_ms: u64,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u32,
    /// 退避基准延迟, backoff(n) = 2^n * retry_delay_ms
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// 本地连通性探测目标
    #[serde(default = "default_probe_host")]
    pub probe_host: String,
    #[serde(default = "default_probe_port")]
    pub probe_port: u16,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

impl XapiConfig {
    /// 从 TOML 文件加载配置并校验
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| XapiError::Config(format!("{}: {e}", path.as_ref().display())))?;
        let mut config: XapiConfig =
            toml::from_str(&raw).map_err(|e| XapiError::Config(e.to_string()))?;
        if let Ok(password) = env::var("XAPI_PASSWORD") {
            if !password.is_empty() {
                config.password = password;
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// 校验配置的自洽性
    pub fn validate(&self) -> Result<()> {
        if self.server.is_empty() {
            return Err(XapiError::Config("server must not be empty".to_string()));
        }
        if self.user.is_empty() {
            return Err(XapiError::Config("user must not be empty".to_string()));
        }
        if self.max_retry_count == 0 {
            return Err(XapiError::Config(
                "max_retry_count must be at least 1".to_string(),
            ));
        }
        if self.ssl {
            match &self.cert_file_path {
                Some(path) if path.exists() => {}
                Some(path) => return Err(XapiError::CertificateNotFound(path.clone())),
                None => {
                    return Err(XapiError::Config(
                        "ssl enabled but cert_file_path is not set".to_string(),
                    ))
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn minimal_toml() -> &'static str {
        "server = \"ems.example.com\"\nuser = \"jdoe\"\n"
    }

    #[test]
    fn test_defaults() {
        let config: XapiConfig = toml::from_str(minimal_toml()).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.keep_alive_time_ms, 3_600_000);
        assert_eq!(config.keep_alive_timeout_ms, 30_000);
        assert_eq!(config.max_message_size, 104 * 1024 * 1024);
        assert_eq!(config.max_retry_count, 3);
        assert_eq!(config.retry_delay_ms, 1000);
        assert!(!config.ssl);
        assert!(!config.srp_login);
        config.validate().unwrap();
    }

    #[test]
    fn test_ssl_requires_existing_cert() {
        let mut config: XapiConfig = toml::from_str(minimal_toml()).unwrap();
        config.ssl = true;
        config.cert_file_path = Some(PathBuf::from("/nonexistent/roots.pem"));
        assert!(matches!(
            config.validate(),
            Err(XapiError::CertificateNotFound(_))
        ));

        let cert = tempfile::NamedTempFile::new().unwrap();
        config.cert_file_path = Some(cert.path().to_path_buf());
        config.validate().unwrap();
    }

    #[test]
    fn test_ssl_without_cert_path_rejected() {
        let mut config: XapiConfig = toml::from_str(minimal_toml()).unwrap();
        config.ssl = true;
        config.cert_file_path = None;
        assert!(matches!(config.validate(), Err(XapiError::Config(_))));
    }

    #[test]
    fn test_from_file_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "server = \"ems.example.com\"\nuser = \"jdoe\"\nport = 19000\nsrp_login = true\n"
        )
        .unwrap();
        let config = XapiConfig::from_file(file.path()).unwrap();
        assert_eq!(config.port, 19000);
        assert!(config.srp_login);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = XapiConfig::from_file("/nonexistent/config.toml").unwrap_err();
        assert!(matches!(err, XapiError::Config(_)));
    }
}
