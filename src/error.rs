//! 错误类型定义

use std::path::PathBuf;
use thiserror::Error;

/// xAPI 客户端错误类型
#[derive(Error, Debug)]
pub enum XapiError {
    /// WebSocket 错误
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// 服务端拒绝了 RPC 帧
    #[error("RPC error: {0}")]
    Rpc(String),

    /// 协议错误 (帧无法解析)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// 登录失败 (凭证错误与传输错误合并, 原因可通过 source() 获取)
    #[error("Login failed: {message}")]
    Login {
        message: String,
        #[source]
        source: Option<Box<XapiError>>,
    },

    /// 本地网络不可用
    #[error("Network not available: {0}")]
    NetworkUnavailable(String),

    /// 服务器不可达
    #[error("Server not available: {0}")]
    ServerUnavailable(String),

    /// 服务端不再识别会话 token
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// 服务端已有活跃的心跳订阅
    #[error("Streaming already exists: {0}")]
    StreamingAlreadyExists(String),

    /// SRP 运算产生了无效值
    #[error("SRP math error: {0}")]
    AuthMath(String),

    /// 根证书文件不存在
    #[error("Certificate file {0} does not exist")]
    CertificateNotFound(PathBuf),

    /// TLS 配置错误
    #[error("TLS error: {0}")]
    Tls(String),

    /// 配置错误
    #[error("Config error: {0}")]
    Config(String),

    /// 未登录
    #[error("User needs to login first")]
    NotLoggedIn,

    /// 通道已关闭
    #[error("Channel closed")]
    ChannelClosed,

    /// 上一个心跳循环未在限时内停止
    #[error("Previous heartbeat loop did not stop within {0:?}")]
    ShutdownTimeout(std::time::Duration),

    /// 重试次数耗尽
    #[error("Could not succeed even after {attempts} retries, aborting the operation")]
    RetriesExhausted { attempts: u32 },
}

impl XapiError {
    /// 包装为登录失败错误, 保留底层原因
    pub(crate) fn into_login_failed(self) -> XapiError {
        match self {
            err @ XapiError::Login { .. } => err,
            err => XapiError::Login {
                message: err.to_string(),
                source: Some(Box::new(err)),
            },
        }
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, XapiError>;
