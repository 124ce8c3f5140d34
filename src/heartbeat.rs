//! 心跳监护: 订阅心跳流并在故障后按指数退避重试
//!
//! 监护循环只依赖 [`SupervisedGateway`] 抽象, 不直接触碰通道,
//! 因此故障注入测试无需真实网关。每轮尝试前检查关停信号,
//! 重试上限与登录状态, 三者的顺序固定: 关停优先, 其次耗尽,
//! 最后登出。

use crate::error::{Result, XapiError};
use crate::protocol::MSG_STREAMING_EXISTS;
use crate::types::HeartBeatStatus;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// 监护循环对网关的全部要求
#[async_trait]
pub trait SupervisedGateway: Send + Sync {
    /// 会话当前是否已登录
    async fn is_logged_in(&self) -> bool;
    /// 重新登录 (刷新会话 token)
    async fn refresh_login(&self) -> Result<()>;
    /// 丢弃当前通道并打开新通道
    async fn refresh_channel(&self) -> Result<()>;
    /// 在当前通道上发起心跳订阅
    async fn subscribe(&self) -> Result<crate::channel::HeartBeatStream>;
}

/// 重试策略
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// 允许的最大尝试计数
    pub max_retry_count: u32,
    /// 退避基准延迟 (毫秒)
    pub base_delay_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &crate::config::XapiConfig) -> Self {
        RetryPolicy {
            max_retry_count: config.max_retry_count,
            base_delay_ms: config.retry_delay_ms,
        }
    }
}

/// 第 n 次尝试失败后的退避时长: 2^n * 基准延迟
fn backoff_delay(attempt: u32, base_delay_ms: u64) -> Duration {
    let factor = 2u64.saturating_pow(attempt);
    Duration::from_millis(factor.saturating_mul(base_delay_ms))
}

/// 故障后下一轮尝试前要做的刷新动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct RetryFlags {
    refresh_login: bool,
    refresh_channel: bool,
}

/// 按错误类别决定刷新动作; None 表示不可恢复
fn classify(err: &XapiError) -> Option<RetryFlags> {
    match err {
        // 传输层故障: 换一条通道再试
        XapiError::WebSocket(_) | XapiError::Rpc(_) | XapiError::ChannelClosed => {
            Some(RetryFlags {
                refresh_login: false,
                refresh_channel: true,
            })
        }
        // 会话失效: 通道还能用, 重新登录即可
        XapiError::SessionNotFound(_) => Some(RetryFlags {
            refresh_login: true,
            refresh_channel: false,
        }),
        // 服务端已有订阅: 等它超时释放, 什么都不刷新
        XapiError::StreamingAlreadyExists(_) => Some(RetryFlags::default()),
        XapiError::ServerUnavailable(_) => Some(RetryFlags {
            refresh_login: true,
            refresh_channel: true,
        }),
        XapiError::NetworkUnavailable(_) => Some(RetryFlags {
            refresh_login: false,
            refresh_channel: true,
        }),
        _ => None,
    }
}

/// 监护循环
///
/// 正常返回 Ok: 收到关停信号, 或会话已登出。重试耗尽与不可
/// 恢复的故障返回 Err。
pub async fn run<G: SupervisedGateway>(
    gateway: &G,
    policy: RetryPolicy,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut retry_count: u32 = 0;
    let mut flags = RetryFlags::default();

    loop {
        if *shutdown.borrow() {
            tracing::info!("Heartbeat loop stopping: shutdown requested");
            return Ok(());
        }
        if retry_count >= policy.max_retry_count {
            tracing::error!(
                "Heartbeat loop giving up after {retry_count} attempts"
            );
            return Err(XapiError::RetriesExhausted {
                attempts: retry_count,
            });
        }
        if !gateway.is_logged_in().await {
            tracing::info!("Heartbeat loop stopping: session logged out");
            return Ok(());
        }

        retry_count += 1;
        let pending = std::mem::take(&mut flags);

        let outcome = attempt(gateway, pending, &mut shutdown, &mut retry_count).await;
        match outcome {
            Attempt::Shutdown => return Ok(()),
            Attempt::Fatal(err) => {
                tracing::error!("Heartbeat loop stopping on unrecoverable error: {err}");
                return Err(err);
            }
            // 流正常结束: 不退避, 立即开始下一轮
            Attempt::StreamEnded => continue,
            Attempt::Failed(err, next) => {
                flags = next;
                let delay = backoff_delay(retry_count, policy.base_delay_ms);
                tracing::warn!(
                    "Heartbeat attempt {retry_count} failed ({err}), retrying in {delay:?}"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }
}

enum Attempt {
    /// 收到关停信号
    Shutdown,
    /// 流被服务端干净地结束
    StreamEnded,
    /// 本轮失败, 带下一轮的刷新动作
    Failed(XapiError, RetryFlags),
    /// 不可恢复
    Fatal(XapiError),
}

async fn attempt<G: SupervisedGateway>(
    gateway: &G,
    pending: RetryFlags,
    shutdown: &mut watch::Receiver<bool>,
    retry_count: &mut u32,
) -> Attempt {
    // 先换通道再登录, 登录要走新通道
    if pending.refresh_channel {
        if let Err(err) = gateway.refresh_channel().await {
            return fail_or_fatal(err);
        }
    }
    if pending.refresh_login {
        if let Err(err) = gateway.refresh_login().await {
            return fail_or_fatal(err);
        }
    }

    let mut stream = match gateway.subscribe().await {
        Ok(stream) => stream,
        Err(err) => return fail_or_fatal(err),
    };

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return Attempt::Shutdown;
                }
            }
            item = stream.recv() => match item {
                None => return Attempt::StreamEnded,
                Some(Err(err)) => return fail_or_fatal(normalize(err)),
                Some(Ok(beat)) => {
                    // 状态优先, 重复订阅提示只在状态正常时生效
                    match beat.status {
                        HeartBeatStatus::Dead => {
                            return fail_or_fatal(XapiError::SessionNotFound(
                                "heart beat reported DEAD session".to_string(),
                            ));
                        }
                        HeartBeatStatus::Unknown => {
                            return Attempt::Fatal(XapiError::Protocol(
                                "unrecognized heart beat status".to_string(),
                            ));
                        }
                        HeartBeatStatus::Live if beat.server_message == MSG_STREAMING_EXISTS => {
                            return fail_or_fatal(XapiError::StreamingAlreadyExists(
                                beat.server_message,
                            ));
                        }
                        HeartBeatStatus::Live => {
                            tracing::debug!("Heart beat is LIVE");
                            // 连接恢复健康, 计数回到基线
                            *retry_count = 1;
                        }
                    }
                }
            }
        }
    }
}

/// 服务端把重复订阅报告成普通 RPC 错误, 归一成专用类别
fn normalize(err: XapiError) -> XapiError {
    match err {
        XapiError::Rpc(msg) if msg.contains(MSG_STREAMING_EXISTS) => {
            XapiError::StreamingAlreadyExists(msg)
        }
        other => other,
    }
}

fn fail_or_fatal(err: XapiError) -> Attempt {
    match classify(&err) {
        Some(flags) => Attempt::Failed(err, flags),
        None => Attempt::Fatal(err),
    }
}

/// 正在运行的监护循环的句柄
pub struct HeartbeatHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

impl HeartbeatHandle {
    /// 启动监护循环
    pub fn spawn<G: SupervisedGateway + 'static>(gateway: Arc<G>, policy: RetryPolicy) -> Self {
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(async move { run(gateway.as_ref(), policy, rx).await });
        HeartbeatHandle { shutdown: tx, task }
    }

    /// 循环是否已自行结束
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// 发出关停信号并在限时内等待循环退出
    ///
    /// 限时内未退出返回 ShutdownTimeout; 循环自身的结果原样
    /// 传出。
    pub async fn stop(self, wait: Duration) -> Result<()> {
        let _ = self.shutdown.send(true);
        match tokio::time::timeout(wait, self.task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(XapiError::Protocol(format!(
                "heartbeat task panicked: {join_err}"
            ))),
            Err(_) => Err(XapiError::ShutdownTimeout(wait)),
        }
    }
}
