//! 客户端门面: 会话生命周期的唯一入口
//!
//! 一个 [`XapiClient`] 对应一个会话。登录/登出/心跳监护/关闭
//! 都经过内部会话状态的互斥锁, 通道句柄在刷新时被整体换掉,
//! 不存在半新半旧的连接。

use crate::auth::Authenticator;
use crate::channel::{HeartBeatStream, MarketDataStub, OrderStub, SessionChannel, UtilityService};
use crate::config::XapiConfig;
use crate::error::{Result, XapiError};
use crate::heartbeat::{HeartbeatHandle, RetryPolicy, SupervisedGateway};
use crate::types::{DisconnectRequest, SubscribeHeartBeatRequest};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// 等待心跳循环退出的时限
const STOP_WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct SessionState {
    channel: Option<Arc<SessionChannel>>,
    user_token: Option<String>,
    heartbeat: Option<HeartbeatHandle>,
    heartbeat_timeout_secs: u32,
}

/// 会话内部状态, 在客户端与心跳监护循环之间共享
struct SessionInner {
    config: XapiConfig,
    state: Mutex<SessionState>,
}

impl SessionInner {
    /// 返回当前通道, 没有或已失效则打开新通道
    async fn ensure_channel(&self) -> Result<Arc<SessionChannel>> {
        let mut state = self.state.lock().await;
        if let Some(channel) = &state.channel {
            if channel.is_open() {
                return Ok(channel.clone());
            }
        }
        let fresh = Arc::new(SessionChannel::open(&self.config).await?);
        state.channel = Some(fresh.clone());
        Ok(fresh)
    }

    async fn login(&self) -> Result<()> {
        let channel = self.ensure_channel().await?;
        let utility = channel.utility();
        let token = Authenticator::new(&utility, &self.config).login().await?;
        self.state.lock().await.user_token = Some(token);
        tracing::info!("User {} logged in", self.config.user);
        Ok(())
    }
}

#[async_trait]
impl SupervisedGateway for SessionInner {
    async fn is_logged_in(&self) -> bool {
        self.state.lock().await.user_token.is_some()
    }

    async fn refresh_login(&self) -> Result<()> {
        self.login().await
    }

    async fn refresh_channel(&self) -> Result<()> {
        let stale = self.state.lock().await.channel.take();
        if let Some(channel) = stale {
            channel.close().await;
        }
        let fresh = Arc::new(SessionChannel::open(&self.config).await?);
        self.state.lock().await.channel = Some(fresh);
        tracing::info!("Channel refreshed");
        Ok(())
    }

    async fn subscribe(&self) -> Result<HeartBeatStream> {
        let (channel, token, timeout_in_seconds) = {
            let state = self.state.lock().await;
            (
                state.channel.clone(),
                state.user_token.clone(),
                state.heartbeat_timeout_secs,
            )
        };
        let channel = channel.ok_or(XapiError::ChannelClosed)?;
        let token = token.ok_or(XapiError::NotLoggedIn)?;
        channel
            .utility()
            .subscribe_heart_beat(SubscribeHeartBeatRequest {
                user_token: token,
                timeout_in_seconds,
            })
            .await
    }
}

/// xAPI 会话客户端
pub struct XapiClient {
    inner: Arc<SessionInner>,
}

impl XapiClient {
    /// 创建客户端; 校验配置但不建立连接
    pub fn new(config: XapiConfig) -> Result<Self> {
        config.validate()?;
        Ok(XapiClient {
            inner: Arc::new(SessionInner {
                config,
                state: Mutex::new(SessionState::default()),
            }),
        })
    }

    /// 创建客户端并立即打开通道
    pub async fn connect(config: XapiConfig) -> Result<Self> {
        let client = XapiClient::new(config)?;
        client.inner.ensure_channel().await?;
        Ok(client)
    }

    /// 登录, 必要时先打开通道
    pub async fn login(&self) -> Result<()> {
        self.inner.login().await
    }

    /// 当前会话 token
    pub async fn user_token(&self) -> Option<String> {
        self.inner.state.lock().await.user_token.clone()
    }

    /// 登出
    ///
    /// 未登录时是空操作, 不发任何请求。会话状态在发请求之前
    /// 清掉, 服务端拒绝也不会让本地留在已登录状态; 登出请求
    /// 本身的失败只记日志。
    pub async fn logout(&self) -> Result<()> {
        let (channel, token) = {
            let mut state = self.inner.state.lock().await;
            (state.channel.clone(), state.user_token.take())
        };
        let Some(token) = token else {
            tracing::debug!("Logout skipped: not logged in");
            return Ok(());
        };
        let Some(channel) = channel else {
            return Ok(());
        };
        match channel
            .utility()
            .disconnect(DisconnectRequest { user_token: token })
            .await
        {
            Ok(resp) => {
                if let Some(message) = resp.optional_fields.get("ErrorMessage") {
                    tracing::warn!("Logout reported: {message}");
                }
                tracing::info!("User logged out: {}", resp.server_response);
            }
            Err(err) => tracing::warn!("Logout request failed: {err}"),
        }
        Ok(())
    }

    /// 启动心跳监护
    ///
    /// 要求已登录。若上一个监护循环还在运行, 先让它停下, 限时
    /// 内停不下来则报 ShutdownTimeout 且不启动新循环。
    pub async fn start_listening_heartbeat(&self, timeout_in_seconds: u32) -> Result<()> {
        let previous = {
            let mut state = self.inner.state.lock().await;
            if state.user_token.is_none() {
                return Err(XapiError::NotLoggedIn);
            }
            state.heartbeat_timeout_secs = timeout_in_seconds.max(1);
            state.heartbeat.take()
        };
        if let Some(handle) = previous {
            match handle.stop(STOP_WAIT).await {
                Ok(()) => {}
                Err(err @ XapiError::ShutdownTimeout(_)) => return Err(err),
                // 上一轮循环以错误收场不妨碍重新启动
                Err(err) => tracing::warn!("Previous heartbeat loop ended with: {err}"),
            }
        }
        let handle = HeartbeatHandle::spawn(
            self.inner.clone(),
            RetryPolicy::from_config(&self.inner.config),
        );
        self.inner.state.lock().await.heartbeat = Some(handle);
        tracing::info!("Heartbeat supervision started");
        Ok(())
    }

    /// 停止心跳监护; 没有在运行的循环时是空操作
    pub async fn stop_listening_heartbeat(&self) -> Result<()> {
        let handle = self.inner.state.lock().await.heartbeat.take();
        match handle {
            Some(handle) => handle.stop(STOP_WAIT).await,
            None => Ok(()),
        }
    }

    /// 关闭会话: 停掉心跳监护, 关闭通道; 幂等
    ///
    /// 不做隐式登出, 要干净退出请先 logout 再 close。
    pub async fn close(&self) -> Result<()> {
        if let Some(handle) = self.inner.state.lock().await.heartbeat.take() {
            if let Err(err) = handle.stop(STOP_WAIT).await {
                tracing::warn!("Heartbeat loop stop during close: {err}");
            }
        }
        let channel = self.inner.state.lock().await.channel.take();
        if let Some(channel) = channel {
            channel.close().await;
        }
        Ok(())
    }

    /// 行情服务桩 (操作由上层自定义)
    pub async fn market_data(&self) -> Result<MarketDataStub> {
        Ok(self.inner.ensure_channel().await?.market_data())
    }

    /// 订单服务桩 (操作由上层自定义)
    pub async fn order(&self) -> Result<OrderStub> {
        Ok(self.inner.ensure_channel().await?.order())
    }
}
