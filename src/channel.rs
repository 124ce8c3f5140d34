//! 会话通道: WebSocket 传输与三个远程服务桩
//!
//! 通道持有到交易网关的唯一连接。请求按编号多路复用: 一元调用
//! 等待单个响应帧, 流式调用 (心跳) 持续接收同编号的帧。重新打开
//! 通道会返回全新的句柄, 由持有者显式替换旧句柄。

use crate::config::XapiConfig;
use crate::error::{Result, XapiError};
use crate::protocol::{RequestFrame, ResponseFrame, RpcMethod, ServiceKind};
use crate::types::{
    CompleteLoginSrpRequest, CompleteLoginSrpResponse, ConnectRequest, ConnectResponse,
    DisconnectRequest, DisconnectResponse, HeartBeat, StartLoginSrpRequest, StartLoginSrpResponse,
    SubscribeHeartBeatRequest,
};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector};

/// 关闭时等待连接转入空闲的时限
const CLOSE_WAIT: Duration = Duration::from_secs(5);

/// 心跳流
pub type HeartBeatStream = mpsc::Receiver<Result<HeartBeat>>;

/// 工具服务的五个远程操作 (登录/登出/心跳)
///
/// 生产实现是 [`UtilityStub`]; 测试注入脚本化的假服务。
#[async_trait]
pub trait UtilityService: Send + Sync {
    async fn connect(&self, req: ConnectRequest) -> Result<ConnectResponse>;
    async fn start_login_srp(&self, req: StartLoginSrpRequest) -> Result<StartLoginSrpResponse>;
    async fn complete_login_srp(
        &self,
        req: CompleteLoginSrpRequest,
    ) -> Result<CompleteLoginSrpResponse>;
    async fn disconnect(&self, req: DisconnectRequest) -> Result<DisconnectResponse>;
    async fn subscribe_heart_beat(&self, req: SubscribeHeartBeatRequest)
        -> Result<HeartBeatStream>;
}

enum Pending {
    Unary(oneshot::Sender<ResponseFrame>),
    Stream(mpsc::Sender<Result<Value>>),
}

struct ChannelCore {
    writer: mpsc::Sender<Message>,
    pending: StdMutex<HashMap<u64, Pending>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    /// 最近一次收到任何入站帧的毫秒时间戳, 供保活任务判断超时
    last_rx_ms: AtomicU64,
}

impl ChannelCore {
    fn now_ms() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    async fn send_frame(&self, frame: RequestFrame) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(XapiError::ChannelClosed);
        }
        let text = serde_json::to_string(&frame)
            .map_err(|e| XapiError::Protocol(format!("failed to encode frame: {e}")))?;
        self.writer
            .send(Message::Text(text))
            .await
            .map_err(|_| XapiError::ChannelClosed)
    }

    async fn call(&self, service: ServiceKind, method: RpcMethod, body: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending map poisoned")
            .insert(id, Pending::Unary(tx));
        if let Err(err) = self
            .send_frame(RequestFrame {
                id,
                service,
                method,
                body,
            })
            .await
        {
            self.pending.lock().expect("pending map poisoned").remove(&id);
            return Err(err);
        }
        match rx.await {
            Ok(frame) => frame.into_result(),
            Err(_) => Err(XapiError::ChannelClosed),
        }
    }

    async fn subscribe(
        &self,
        service: ServiceKind,
        method: RpcMethod,
        body: Value,
    ) -> Result<mpsc::Receiver<Result<Value>>> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(64);
        self.pending
            .lock()
            .expect("pending map poisoned")
            .insert(id, Pending::Stream(tx));
        if let Err(err) = self
            .send_frame(RequestFrame {
                id,
                service,
                method,
                body,
            })
            .await
        {
            self.pending.lock().expect("pending map poisoned").remove(&id);
            return Err(err);
        }
        Ok(rx)
    }

    /// 入站帧按编号路由到等待者
    async fn dispatch(&self, frame: ResponseFrame) {
        let id = frame.id;
        let target = {
            let mut pending = self.pending.lock().expect("pending map poisoned");
            if matches!(pending.get(&id), Some(Pending::Unary(_))) {
                pending.remove(&id)
            } else if let Some(Pending::Stream(tx)) = pending.get(&id) {
                Some(Pending::Stream(tx.clone()))
            } else {
                None
            }
        };
        match target {
            Some(Pending::Unary(tx)) => {
                let _ = tx.send(frame);
            }
            Some(Pending::Stream(tx)) => {
                if tx.send(frame.into_result()).await.is_err() {
                    // 订阅方已放弃接收
                    self.pending.lock().expect("pending map poisoned").remove(&id);
                }
            }
            None => tracing::debug!("Dropping frame for unknown call id {id}"),
        }
    }

    /// 连接终止: 所有未完成的调用以 ChannelClosed 收尾
    async fn fail_pending(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let drained: Vec<Pending> = {
            let mut pending = self.pending.lock().expect("pending map poisoned");
            pending.drain().map(|(_, p)| p).collect()
        };
        for entry in drained {
            match entry {
                Pending::Unary(_) => {} // oneshot 丢弃即为 ChannelClosed
                Pending::Stream(tx) => {
                    let _ = tx.send(Err(XapiError::ChannelClosed)).await;
                }
            }
        }
    }
}

/// 会话通道句柄
pub struct SessionChannel {
    core: Arc<ChannelCore>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SessionChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionChannel").finish_non_exhaustive()
    }
}

impl SessionChannel {
    /// 打开到网关的新通道
    ///
    /// 先做本地连通性探测, 再探测网关端口, 然后建立 (可选 TLS 的)
    /// WebSocket 连接并启动写入/读取/保活任务。
    pub async fn open(config: &XapiConfig) -> Result<SessionChannel> {
        probe_network(config).await?;
        probe_server(config).await?;

        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(config.max_message_size);
        ws_config.max_frame_size = Some(config.max_message_size);

        let (scheme, connector) = if config.ssl {
            let cert_path = config
                .cert_file_path
                .as_deref()
                .ok_or_else(|| XapiError::Config("ssl enabled but cert_file_path is not set".to_string()))?;
            let tls = load_root_certificates(cert_path)?;
            ("wss", Some(Connector::Rustls(Arc::new(tls))))
        } else {
            ("ws", None)
        };

        let url = format!("{scheme}://{}:{}", config.server, config.port);
        tracing::info!("Opening channel to {url}");
        let (ws_stream, _) =
            connect_async_tls_with_config(url.as_str(), Some(ws_config), false, connector).await?;
        let (mut sink, mut stream) = ws_stream.split();

        let (write_tx, mut write_rx) = mpsc::channel::<Message>(32);
        let core = Arc::new(ChannelCore {
            writer: write_tx.clone(),
            pending: StdMutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            last_rx_ms: AtomicU64::new(ChannelCore::now_ms()),
        });

        // 写入任务
        tokio::spawn(async move {
            while let Some(msg) = write_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = sink.send(msg).await {
                    tracing::error!("WebSocket write error: {e}");
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // 保活任务: 无论有无在途调用都按间隔发 Ping
        let ping_core = Arc::downgrade(&core);
        let ka_time = config.keep_alive_time_ms.max(1);
        let ka_timeout = config.keep_alive_timeout_ms;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(ka_time));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await; // 第一个 tick 立即完成
            loop {
                interval.tick().await;
                let Some(core) = ping_core.upgrade() else { break };
                if core.closed.load(Ordering::SeqCst) {
                    break;
                }
                let idle = ChannelCore::now_ms().saturating_sub(core.last_rx_ms.load(Ordering::SeqCst));
                if idle > ka_time + ka_timeout {
                    tracing::warn!("Keepalive timeout after {idle} ms, closing channel");
                    let _ = core.writer.send(Message::Close(None)).await;
                    break;
                }
                if core.writer.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        });

        // 读取任务: 解析入站帧并按编号分发
        let reader_core = core.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                reader_core
                    .last_rx_ms
                    .store(ChannelCore::now_ms(), Ordering::SeqCst);
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ResponseFrame>(&text) {
                        Ok(frame) => reader_core.dispatch(frame).await,
                        Err(e) => {
                            tracing::warn!("Unparseable frame: {e}");
                        }
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("Server closed the channel");
                        break;
                    }
                    Ok(_) => {} // Ping/Pong 由 tungstenite 自动应答
                    Err(e) => {
                        tracing::error!("WebSocket read error: {e}");
                        break;
                    }
                }
            }
            reader_core.fail_pending().await;
        });

        Ok(SessionChannel {
            core,
            reader: Mutex::new(Some(reader)),
        })
    }

    /// 工具服务桩
    pub fn utility(&self) -> UtilityStub {
        UtilityStub {
            core: self.core.clone(),
        }
    }

    /// 行情服务桩
    pub fn market_data(&self) -> MarketDataStub {
        MarketDataStub {
            core: self.core.clone(),
        }
    }

    /// 订单服务桩
    pub fn order(&self) -> OrderStub {
        OrderStub {
            core: self.core.clone(),
        }
    }

    /// 通道是否仍可用
    pub fn is_open(&self) -> bool {
        !self.core.closed.load(Ordering::SeqCst)
    }

    /// 关闭通道
    ///
    /// 幂等: 关闭已关闭的通道是空操作。短暂等待连接转入空闲,
    /// 等不到也不报错。
    pub async fn close(&self) {
        if self.core.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.core.writer.send(Message::Close(None)).await;
        if let Some(task) = self.reader.lock().await.take() {
            if tokio::time::timeout(CLOSE_WAIT, task).await.is_err() {
                tracing::warn!("Channel did not go idle within {CLOSE_WAIT:?}");
            }
        }
    }
}

/// 工具服务桩 (登录/登出/心跳)
#[derive(Clone)]
pub struct UtilityStub {
    core: Arc<ChannelCore>,
}

#[async_trait]
impl UtilityService for UtilityStub {
    async fn connect(&self, req: ConnectRequest) -> Result<ConnectResponse> {
        self.unary(RpcMethod::Connect, &req).await
    }

    async fn start_login_srp(&self, req: StartLoginSrpRequest) -> Result<StartLoginSrpResponse> {
        self.unary(RpcMethod::StartLoginSrp, &req).await
    }

    async fn complete_login_srp(
        &self,
        req: CompleteLoginSrpRequest,
    ) -> Result<CompleteLoginSrpResponse> {
        self.unary(RpcMethod::CompleteLoginSrp, &req).await
    }

    async fn disconnect(&self, req: DisconnectRequest) -> Result<DisconnectResponse> {
        self.unary(RpcMethod::Disconnect, &req).await
    }

    async fn subscribe_heart_beat(
        &self,
        req: SubscribeHeartBeatRequest,
    ) -> Result<HeartBeatStream> {
        let mut raw = self
            .core
            .subscribe(ServiceKind::Utility, RpcMethod::SubscribeHeartBeat, to_body(&req)?)
            .await?;
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            while let Some(item) = raw.recv().await {
                let mapped = item.and_then(from_body::<HeartBeat>);
                if tx.send(mapped).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

impl UtilityStub {
    async fn unary<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        method: RpcMethod,
        req: &Req,
    ) -> Result<Resp> {
        let body = self
            .core
            .call(ServiceKind::Utility, method, to_body(req)?)
            .await?;
        from_body(body)
    }
}

/// 行情服务桩; 其操作不在本层建模, 仅透传
#[derive(Clone)]
pub struct MarketDataStub {
    core: Arc<ChannelCore>,
}

impl MarketDataStub {
    pub async fn call(&self, method: &'static str, body: Value) -> Result<Value> {
        self.core
            .call(ServiceKind::MarketData, RpcMethod::Raw(method), body)
            .await
    }
}

/// 订单服务桩; 其操作不在本层建模, 仅透传
#[derive(Clone)]
pub struct OrderStub {
    core: Arc<ChannelCore>,
}

impl OrderStub {
    pub async fn call(&self, method: &'static str, body: Value) -> Result<Value> {
        self.core
            .call(ServiceKind::Order, RpcMethod::Raw(method), body)
            .await
    }
}

fn to_body<T: Serialize>(req: &T) -> Result<Value> {
    serde_json::to_value(req).map_err(|e| XapiError::Protocol(format!("failed to encode body: {e}")))
}

fn from_body<T: DeserializeOwned>(body: Value) -> Result<T> {
    serde_json::from_value(body)
        .map_err(|e| XapiError::Protocol(format!("failed to decode body: {e}")))
}

/// 本地连通性探测: 连不上公共端点视为本地网络故障
async fn probe_network(config: &XapiConfig) -> Result<()> {
    probe(
        &config.probe_host,
        config.probe_port,
        config.probe_timeout_ms,
    )
    .await
    .map_err(|e| XapiError::NetworkUnavailable(e.to_string()))
}

/// 网关端口探测: 本地网络正常但网关不应答视为服务器不可用
async fn probe_server(config: &XapiConfig) -> Result<()> {
    probe(&config.server, config.port, config.probe_timeout_ms)
        .await
        .map_err(|_| {
            XapiError::ServerUnavailable(format!(
                "Server {} not responding, might be down.",
                config.server
            ))
        })
}

async fn probe(host: &str, port: u16, timeout_ms: u64) -> std::io::Result<()> {
    let attempt = TcpStream::connect((host, port));
    match tokio::time::timeout(Duration::from_millis(timeout_ms), attempt).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("{host}:{port} probe timed out after {timeout_ms} ms"),
        )),
    }
}

/// 从 PEM 文件加载根证书
fn load_root_certificates(cert_path: &Path) -> Result<rustls::ClientConfig> {
    let file = std::fs::File::open(cert_path)
        .map_err(|_| XapiError::CertificateNotFound(cert_path.to_path_buf()))?;
    let mut reader = std::io::BufReader::new(file);
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(|e| {
            XapiError::Tls(format!("failed to read {}: {e}", cert_path.display()))
        })?;
        roots
            .add(cert)
            .map_err(|e| XapiError::Tls(e.to_string()))?;
    }
    if roots.is_empty() {
        return Err(XapiError::Tls(format!(
            "no certificates found in {}",
            cert_path.display()
        )));
    }
    Ok(rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth())
}
