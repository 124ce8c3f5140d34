//! 登录认证: 明文登录与 SRP 安全登录两条路径
//!
//! 认证器不持有连接, 只依赖 [`UtilityService`] 抽象, 由调用方
//! 注入当前通道的服务桩。握手过程中的传输错误统一包装为登录
//! 失败, 底层原因保留在 source 链上。

use crate::channel::UtilityService;
use crate::config::XapiConfig;
use crate::error::{Result, XapiError};
use crate::protocol::STATUS_SUCCESS;
use crate::srp::SrpTransaction;
use crate::types::{
    CompleteLoginSrpRequest, ConnectRequest, StartLoginSrpRequest,
};

/// 登录认证器
pub struct Authenticator<'a> {
    utility: &'a dyn UtilityService,
    config: &'a XapiConfig,
}

impl<'a> Authenticator<'a> {
    pub fn new(utility: &'a dyn UtilityService, config: &'a XapiConfig) -> Self {
        Authenticator { utility, config }
    }

    /// 登录并返回会话 token
    ///
    /// SRP 数学错误原样上抛; 其余错误包装为 Login, 原因可经
    /// source() 获取。
    pub async fn login(&self) -> Result<String> {
        let outcome = if self.config.srp_login {
            self.login_srp().await
        } else {
            self.login_plain().await
        };
        match outcome {
            Ok(token) if !token.is_empty() => Ok(token),
            Ok(_) => Err(XapiError::Login {
                message: "server returned an empty user token".to_string(),
                source: None,
            }),
            Err(err @ XapiError::AuthMath(_)) => Err(err),
            Err(err) => Err(err.into_login_failed()),
        }
    }

    async fn login_plain(&self) -> Result<String> {
        tracing::info!("Logging in user {} (plain)", self.config.user);
        let resp = self
            .utility
            .connect(ConnectRequest {
                user_name: self.config.user.clone(),
                domain: self.config.domain.clone(),
                password: self.config.password.clone(),
                locale: self.config.locale.clone(),
            })
            .await?;
        Ok(resp.user_token)
    }

    async fn login_srp(&self) -> Result<String> {
        tracing::info!("Logging in user {} (SRP)", self.config.user);
        let start = self
            .utility
            .start_login_srp(StartLoginSrpRequest {
                user_name: self.config.user.clone(),
                domain: self.config.domain.clone(),
            })
            .await?;
        // 状态必须恰好是 "success", 缺失也算失败
        if start.response != STATUS_SUCCESS {
            return Err(XapiError::Login {
                message: reject_message("StartLoginSrp", start.response),
                source: None,
            });
        }

        // 身份串固定为大写的 USER@DOMAIN
        let identity = format!(
            "{}@{}",
            self.config.user.to_uppercase(),
            self.config.domain.to_uppercase()
        );
        let transaction =
            SrpTransaction::begin(&identity, &self.config.password, &start.srp_n, &start.srp_g)?;
        let proof = transaction.process_server_challenge(&start.srp_salt, &start.srp_b)?;

        let resp = self
            .utility
            .complete_login_srp(CompleteLoginSrpRequest {
                identity,
                srp_transact_id: start.srp_transact_id,
                str_eph_a: transaction.ephemeral_a_decimal(),
                str_mc: proof.proof_m_hex,
                user_name: self.config.user.clone(),
                domain: self.config.domain.to_uppercase(),
                locale: self.config.locale.to_uppercase(),
            })
            .await?;
        if resp.response != STATUS_SUCCESS {
            return Err(XapiError::Login {
                message: reject_message("CompleteLoginSrp", resp.response),
                source: None,
            });
        }
        Ok(resp.user_token)
    }
}

fn reject_message(step: &str, response: String) -> String {
    if response.is_empty() {
        format!("{step} returned no status")
    } else {
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::HeartBeatStream;
    use crate::types::{
        CompleteLoginSrpResponse, ConnectResponse, DisconnectRequest, DisconnectResponse,
        StartLoginSrpResponse, SubscribeHeartBeatRequest,
    };
    use async_trait::async_trait;
    use std::error::Error;
    use std::sync::Mutex;

    // RFC 5054 的 1024 位测试群
    const N_HEX: &str = "EEAF0AB9ADB38DD69C33F80AFA8FC5E86072618775FF3C0B9EA2314C\
        9C256576D674DF7496EA81D3383B4813D692C6E0E0D5D8E250B98BE4\
        8E495C1D6089DAD15DC7D7B46154D6B6CE8EF4AD69B15D4982559B29\
        7BCF1885C529F566660E57EC68EDBC3C05726CC02FD4CBF4976EAA9A\
        FD5138FE8376435B9FC61D2FC0EB06E3";

    fn test_config(srp: bool) -> XapiConfig {
        XapiConfig {
            server: "localhost".to_string(),
            port: 9000,
            user: "jdoe".to_string(),
            domain: "acme".to_string(),
            password: "correct horse battery staple".to_string(),
            locale: "en_US".to_string(),
            ssl: false,
            cert_file_path: None,
            srp_login: srp,
            keep_alive_time_ms: 3_600_000,
            keep_alive_timeout_ms: 30_000,
            max_message_size: 1024,
            max_retry_count: 3,
            retry_delay_ms: 10,
            probe_host: "localhost".to_string(),
            probe_port: 80,
            probe_timeout_ms: 1000,
        }
    }

    /// 脚本化的工具服务
    #[derive(Default)]
    struct FakeUtility {
        connect_token: Option<String>,
        /// None 时返回 "success"
        start_response: Option<String>,
        srp_b_hex: Option<String>,
        complete_token: Option<String>,
        completions: Mutex<Vec<CompleteLoginSrpRequest>>,
    }

    #[async_trait]
    impl UtilityService for FakeUtility {
        async fn connect(&self, _req: ConnectRequest) -> crate::error::Result<ConnectResponse> {
            match &self.connect_token {
                Some(token) => Ok(ConnectResponse {
                    user_token: token.clone(),
                }),
                None => Err(XapiError::Rpc("deadline exceeded".to_string())),
            }
        }

        async fn start_login_srp(
            &self,
            _req: StartLoginSrpRequest,
        ) -> crate::error::Result<StartLoginSrpResponse> {
            Ok(StartLoginSrpResponse {
                response: self
                    .start_response
                    .clone()
                    .unwrap_or_else(|| "success".to_string()),
                srp_transact_id: "tx-42".to_string(),
                srp_g: "02".to_string(),
                srp_n: N_HEX.to_string(),
                srp_b: self
                    .srp_b_hex
                    .clone()
                    .expect("fake has no srpb configured"),
                srp_salt: "5f2a9c1be477d30441dd9fba0a3bcf2d".to_string(),
            })
        }

        async fn complete_login_srp(
            &self,
            req: CompleteLoginSrpRequest,
        ) -> crate::error::Result<CompleteLoginSrpResponse> {
            self.completions.lock().unwrap().push(req);
            Ok(CompleteLoginSrpResponse {
                response: "success".to_string(),
                user_token: self.complete_token.clone().unwrap_or_default(),
            })
        }

        async fn disconnect(
            &self,
            _req: DisconnectRequest,
        ) -> crate::error::Result<DisconnectResponse> {
            unimplemented!("not used by login tests")
        }

        async fn subscribe_heart_beat(
            &self,
            _req: SubscribeHeartBeatRequest,
        ) -> crate::error::Result<HeartBeatStream> {
            unimplemented!("not used by login tests")
        }
    }

    #[tokio::test]
    async fn test_plain_login_returns_token() {
        let utility = FakeUtility {
            connect_token: Some("tok-7".to_string()),
            ..Default::default()
        };
        let config = test_config(false);
        let token = Authenticator::new(&utility, &config).login().await.unwrap();
        assert_eq!(token, "tok-7");
    }

    #[tokio::test]
    async fn test_transport_error_wrapped_as_login_failure() {
        let utility = FakeUtility::default(); // connect 返回 Rpc 错误
        let config = test_config(false);
        let err = Authenticator::new(&utility, &config)
            .login()
            .await
            .unwrap_err();
        match &err {
            XapiError::Login { source, .. } => {
                assert!(matches!(source.as_deref(), Some(XapiError::Rpc(_))));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
        assert!(err.source().is_some());
    }

    #[tokio::test]
    async fn test_srp_login_sends_well_formed_proof() {
        let utility = FakeUtility {
            // 任意合法 (非零 mod N) 的服务端公钥即可驱动握手
            srp_b_hex: Some("0badc0de".to_string()),
            complete_token: Some("tok-9".to_string()),
            ..Default::default()
        };
        let config = test_config(true);
        let token = Authenticator::new(&utility, &config).login().await.unwrap();
        assert_eq!(token, "tok-9");

        let completions = utility.completions.lock().unwrap();
        let req = &completions[0];
        assert_eq!(req.identity, "JDOE@ACME");
        assert_eq!(req.srp_transact_id, "tx-42");
        // A 为十进制字符串
        assert!(req.str_eph_a.chars().all(|c| c.is_ascii_digit()));
        // M 为大写十六进制, SHA-256 输出 64 个字符
        assert_eq!(req.str_mc.len(), 64);
        assert!(req
            .str_mc
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[tokio::test]
    async fn test_invalid_server_ephemeral_surfaces_auth_math() {
        let utility = FakeUtility {
            srp_b_hex: Some("00".to_string()),
            ..Default::default()
        };
        let config = test_config(true);
        let err = Authenticator::new(&utility, &config)
            .login()
            .await
            .unwrap_err();
        // 数学错误不包装成登录失败
        assert!(matches!(err, XapiError::AuthMath(_)));
    }

    #[tokio::test]
    async fn test_missing_start_status_is_login_failure() {
        // Response 为空不是成功, 和显式的失败状态一样拒绝
        let utility = FakeUtility {
            start_response: Some(String::new()),
            srp_b_hex: Some("0badc0de".to_string()),
            ..Default::default()
        };
        let config = test_config(true);
        let err = Authenticator::new(&utility, &config)
            .login()
            .await
            .unwrap_err();
        match err {
            XapiError::Login { message, .. } => assert!(message.contains("no status")),
            other => panic!("unexpected variant: {other:?}"),
        }
        assert!(utility.completions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_start_status_is_login_failure() {
        let utility = FakeUtility {
            start_response: Some("user unknown".to_string()),
            srp_b_hex: Some("0badc0de".to_string()),
            ..Default::default()
        };
        let config = test_config(true);
        let err = Authenticator::new(&utility, &config)
            .login()
            .await
            .unwrap_err();
        match err {
            XapiError::Login { message, .. } => assert_eq!(message, "user unknown"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_token_is_login_failure() {
        let utility = FakeUtility {
            connect_token: Some(String::new()),
            ..Default::default()
        };
        let config = test_config(false);
        let err = Authenticator::new(&utility, &config)
            .login()
            .await
            .unwrap_err();
        assert!(matches!(err, XapiError::Login { .. }));
    }
}
