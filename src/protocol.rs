//! xAPI 网关协议常量和帧结构

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 服务端成功状态字符串
pub const STATUS_SUCCESS: &str = "success";

/// 服务端重复心跳订阅的提示消息
pub const MSG_STREAMING_EXISTS: &str = "Error: Active streaming subscription already exists.";

/// SRP 协议中 N / g / A / B 的固定字节宽度
pub const SRP_VALUE_WIDTH: usize = 128;

/// 远程服务类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServiceKind {
    /// 工具服务 (登录/心跳/登出)
    Utility,
    /// 行情服务
    MarketData,
    /// 订单服务
    Order,
}

/// 远程方法名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RpcMethod {
    /// 明文登录
    Connect,
    /// SRP 登录第一步
    StartLoginSrp,
    /// SRP 登录第二步
    CompleteLoginSrp,
    /// 登出
    Disconnect,
    /// 订阅心跳流
    SubscribeHeartBeat,
    /// 未建模的透传调用 (行情/订单服务)
    #[serde(untagged)]
    Raw(&'static str),
}

/// 客户端请求帧
#[derive(Debug, Serialize)]
pub struct RequestFrame {
    /// 调用编号, 响应按此路由
    #[serde(rename = "Id")]
    pub id: u64,
    #[serde(rename = "Service")]
    pub service: ServiceKind,
    #[serde(rename = "Method")]
    pub method: RpcMethod,
    #[serde(rename = "Body")]
    pub body: Value,
}

/// 服务端响应帧 (一元调用一帧, 流式调用多帧)
#[derive(Debug, Deserialize)]
pub struct ResponseFrame {
    #[serde(rename = "Id")]
    pub id: u64,
    /// 服务端侧的调用失败原因
    #[serde(rename = "Error", default)]
    pub error: Option<String>,
    #[serde(rename = "Body", default)]
    pub body: Value,
}

impl ResponseFrame {
    /// 转为调用结果
    pub fn into_result(self) -> crate::error::Result<Value> {
        match self.error {
            Some(err) => Err(crate::error::XapiError::Rpc(err)),
            None => Ok(self.body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_frame_wire_shape() {
        let frame = RequestFrame {
            id: 7,
            service: ServiceKind::Utility,
            method: RpcMethod::StartLoginSrp,
            body: json!({"UserName": "jdoe", "Domain": "acme"}),
        };
        let wire = serde_json::to_value(&frame).unwrap();
        assert_eq!(wire["Id"], 7);
        assert_eq!(wire["Service"], "Utility");
        assert_eq!(wire["Method"], "StartLoginSrp");
        assert_eq!(wire["Body"]["UserName"], "jdoe");
    }

    #[test]
    fn test_response_frame_error_maps_to_rpc() {
        let frame: ResponseFrame =
            serde_json::from_value(json!({"Id": 3, "Error": "unimplemented"})).unwrap();
        let err = frame.into_result().unwrap_err();
        assert!(matches!(err, crate::error::XapiError::Rpc(_)));
    }

    #[test]
    fn test_response_frame_body_passthrough() {
        let frame: ResponseFrame =
            serde_json::from_value(json!({"Id": 3, "Body": {"UserToken": "t-1"}})).unwrap();
        let body = frame.into_result().unwrap();
        assert_eq!(body["UserToken"], "t-1");
    }
}
