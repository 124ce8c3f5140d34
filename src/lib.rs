//! EMS xAPI Session Client Library
//!
//! 用于连接 EMS xAPI 交易网关的 Rust 客户端库
//!
//! # 功能
//! - SRP 安全登录与明文登录
//! - WebSocket 会话通道 (可选 TLS)
//! - 心跳监护与指数退避自动重连
//! - 行情/订单服务桩透传
//!
//! # 示例
//! ```no_run
//! use xapi_client::{XapiClient, XapiConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = XapiConfig::from_file("xapi.toml")?;
//!
//!     let client = XapiClient::connect(config).await?;
//!     client.login().await?;
//!     client.start_listening_heartbeat(30).await?;
//!
//!     // ... 会话保持期间使用行情/订单服务 ...
//!
//!     client.stop_listening_heartbeat().await?;
//!     client.logout().await?;
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod protocol;
pub mod srp;
pub mod types;

pub use auth::Authenticator;
pub use channel::{
    HeartBeatStream, MarketDataStub, OrderStub, SessionChannel, UtilityService, UtilityStub,
};
pub use client::XapiClient;
pub use config::XapiConfig;
pub use error::{Result, XapiError};
pub use heartbeat::{HeartbeatHandle, RetryPolicy, SupervisedGateway};
pub use srp::{SrpProof, SrpTransaction};
pub use types::*;
