//! 数据类型定义

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 明文登录请求
#[derive(Debug, Clone, Serialize)]
pub struct ConnectRequest {
    #[serde(rename = "UserName")]
    pub user_name: String,
    #[serde(rename = "Domain")]
    pub domain: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Locale")]
    pub locale: String,
}

/// 明文登录响应
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectResponse {
    #[serde(rename = "UserToken", default)]
    pub user_token: String,
}

/// SRP 登录第一步请求
#[derive(Debug, Clone, Serialize)]
pub struct StartLoginSrpRequest {
    #[serde(rename = "UserName")]
    pub user_name: String,
    #[serde(rename = "Domain")]
    pub domain: String,
}

/// SRP 登录第一步响应: 事务号, 群参数, 服务端临时公钥与盐
#[derive(Debug, Clone, Deserialize)]
pub struct StartLoginSrpResponse {
    #[serde(rename = "Response", default)]
    pub response: String,
    #[serde(rename = "srpTransactId", default)]
    pub srp_transact_id: String,
    /// 生成元 g, 十六进制
    #[serde(rename = "srpg", default)]
    pub srp_g: String,
    /// 群模数 N, 十六进制
    #[serde(rename = "srpN", default)]
    pub srp_n: String,
    /// 服务端临时公钥 B, 十六进制
    #[serde(rename = "srpb", default)]
    pub srp_b: String,
    /// 盐, 十六进制
    #[serde(rename = "srpSalt", default)]
    pub srp_salt: String,
}

/// SRP 登录第二步请求
#[derive(Debug, Clone, Serialize)]
pub struct CompleteLoginSrpRequest {
    /// "USER@DOMAIN" (大写)
    #[serde(rename = "Identity")]
    pub identity: String,
    #[serde(rename = "srpTransactId")]
    pub srp_transact_id: String,
    /// 客户端临时公钥 A, 十进制字符串
    #[serde(rename = "strEphA")]
    pub str_eph_a: String,
    /// 证明 M, 大写十六进制 (无 0x 前缀)
    #[serde(rename = "strMc")]
    pub str_mc: String,
    #[serde(rename = "UserName")]
    pub user_name: String,
    #[serde(rename = "Domain")]
    pub domain: String,
    #[serde(rename = "Locale")]
    pub locale: String,
}

/// SRP 登录第二步响应
#[derive(Debug, Clone, Deserialize)]
pub struct CompleteLoginSrpResponse {
    #[serde(rename = "Response", default)]
    pub response: String,
    #[serde(rename = "UserToken", default)]
    pub user_token: String,
}

/// 登出请求
#[derive(Debug, Clone, Serialize)]
pub struct DisconnectRequest {
    #[serde(rename = "UserToken")]
    pub user_token: String,
}

/// 登出响应
#[derive(Debug, Clone, Deserialize)]
pub struct DisconnectResponse {
    #[serde(rename = "ServerResponse", default)]
    pub server_response: String,
    #[serde(rename = "OptionalFields", default)]
    pub optional_fields: HashMap<String, String>,
}

/// 心跳订阅请求
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeHeartBeatRequest {
    #[serde(rename = "UserToken")]
    pub user_token: String,
    #[serde(rename = "TimeoutInSeconds")]
    pub timeout_in_seconds: u32,
}

/// 心跳状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum HeartBeatStatus {
    #[serde(rename = "LIVE")]
    Live,
    #[serde(rename = "DEAD")]
    Dead,
    /// 未识别的状态值一律归为 UNKNOWN
    #[serde(other)]
    Unknown,
}

/// 单条心跳
#[derive(Debug, Clone, Deserialize)]
pub struct HeartBeat {
    #[serde(rename = "Status", default = "HeartBeat::default_status")]
    pub status: HeartBeatStatus,
    #[serde(rename = "ServerResponse", default)]
    pub server_message: String,
}

impl HeartBeat {
    fn default_status() -> HeartBeatStatus {
        HeartBeatStatus::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_heartbeat_status_parsing() {
        let hb: HeartBeat =
            serde_json::from_value(json!({"Status": "LIVE", "ServerResponse": "ok"})).unwrap();
        assert_eq!(hb.status, HeartBeatStatus::Live);

        let hb: HeartBeat = serde_json::from_value(json!({"Status": "DEAD"})).unwrap();
        assert_eq!(hb.status, HeartBeatStatus::Dead);

        // 无法识别的状态必须落到 UNKNOWN, 而不是解析失败
        let hb: HeartBeat = serde_json::from_value(json!({"Status": "SOMETHING_NEW"})).unwrap();
        assert_eq!(hb.status, HeartBeatStatus::Unknown);

        let hb: HeartBeat = serde_json::from_value(json!({})).unwrap();
        assert_eq!(hb.status, HeartBeatStatus::Unknown);
    }

    #[test]
    fn test_complete_login_srp_wire_names() {
        let req = CompleteLoginSrpRequest {
            identity: "JDOE@ACME".to_string(),
            srp_transact_id: "tx-1".to_string(),
            str_eph_a: "12345".to_string(),
            str_mc: "ABCDEF".to_string(),
            user_name: "jdoe".to_string(),
            domain: "ACME".to_string(),
            locale: "EN_US".to_string(),
        };
        let wire = serde_json::to_value(&req).unwrap();
        assert_eq!(wire["srpTransactId"], "tx-1");
        assert_eq!(wire["strEphA"], "12345");
        assert_eq!(wire["strMc"], "ABCDEF");
        assert_eq!(wire["Identity"], "JDOE@ACME");
    }
}
