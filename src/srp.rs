//! SRP-6a 客户端握手运算 (纯计算, 无 I/O)
//!
//! 网关的 SRP 实现有一处与常见库默认值不同: 乘数 k 取
//! `SHA-256(pad(N) || pad(g))`, 其中 N 和 g 都补齐到 128 字节。
//! k 不一致时服务端的验证失败与密码错误无法区分, 因此这里必须
//! 逐位复现。各中间值的字节宽度也要和服务端逐位一致: k 和 u
//! 用 128 字节补零宽度, 证明 M 中的 A/B 和密钥 K 中的 S 用
//! 最短大端编码 (前导零字节被去掉)。A、B 或 S 带前导零时两种
//! 编码产生不同哈希, 错一处登录就会被当成密码错误拒绝。

use crate::error::{Result, XapiError};
use crate::protocol::SRP_VALUE_WIDTH;
use num_bigint::BigUint;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// 握手完成后得到的证明与共享密钥
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrpProof {
    /// 证明 M, 大写十六进制 (无 0x 前缀)
    pub proof_m_hex: String,
    /// 共享密钥 K (32 字节)
    pub shared_key: Vec<u8>,
}

/// 单次登录的 SRP 事务: 群参数与客户端临时密钥对
///
/// 在握手开始时创建, 握手结束 (无论成败) 即丢弃, 不落盘。
pub struct SrpTransaction {
    identity: String,
    password: String,
    n: BigUint,
    g: BigUint,
    k: BigUint,
    /// 临时私钥 a
    a: BigUint,
    /// 临时公钥 A = g^a mod N
    big_a: BigUint,
}

impl std::fmt::Debug for SrpTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SrpTransaction").finish_non_exhaustive()
    }
}

impl SrpTransaction {
    /// 开始一次握手: 解析群参数并生成临时密钥对
    pub fn begin(identity: &str, password: &str, n_hex: &str, g_hex: &str) -> Result<Self> {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self::begin_with_ephemeral(identity, password, n_hex, g_hex, &secret)
    }

    /// 以给定的临时私钥开始握手 (确定性, 供测试注入固定向量)
    fn begin_with_ephemeral(
        identity: &str,
        password: &str,
        n_hex: &str,
        g_hex: &str,
        secret: &[u8],
    ) -> Result<Self> {
        let n = decode_hex_int("srpN", n_hex)?;
        let g = decode_hex_int("srpg", g_hex)?;
        if n.bits() == 0 || g.bits() == 0 {
            return Err(XapiError::AuthMath(
                "group parameters must be non-zero".to_string(),
            ));
        }

        // 乘数 k = SHA-256(pad(N) || pad(g)), 网关侧约定
        let k = hash_as_int(&[&pad(&n)?, &pad(&g)?]);

        let a = BigUint::from_bytes_be(secret);
        if a.bits() == 0 {
            return Err(XapiError::AuthMath("null ephemeral key".to_string()));
        }
        let big_a = g.modpow(&a, &n);

        Ok(Self {
            identity: identity.to_string(),
            password: password.to_string(),
            n,
            g,
            k,
            a,
            big_a,
        })
    }

    /// 临时公钥 A 的十进制表示 (CompleteLoginSrp 要求十进制字符串)
    pub fn ephemeral_a_decimal(&self) -> String {
        self.big_a.to_str_radix(10)
    }

    /// 处理服务端挑战: 由盐和服务端临时公钥 B 计算证明 M 与共享密钥 K
    pub fn process_server_challenge(&self, salt_hex: &str, b_hex: &str) -> Result<SrpProof> {
        let salt = hex::decode(salt_hex)
            .map_err(|e| XapiError::AuthMath(format!("invalid srpSalt hex: {e}")))?;
        let big_b = decode_hex_int("srpb", b_hex)?;

        // SRP-6a 安全检查: B ≡ 0 (mod N) 必须拒绝
        if (&big_b % &self.n).bits() == 0 {
            return Err(XapiError::AuthMath(
                "server ephemeral B is zero modulo N".to_string(),
            ));
        }

        let u = hash_as_int(&[&pad(&self.big_a)?, &pad(&big_b)?]);
        if u.bits() == 0 {
            return Err(XapiError::AuthMath(
                "scrambling parameter u is zero".to_string(),
            ));
        }

        // x = H(salt || H(identity ":" password))
        let inner = sha256(&[format!("{}:{}", self.identity, self.password).as_bytes()]);
        let x = hash_as_int(&[&salt, &inner]);

        // S = (B - k * g^x)^(a + u*x) mod N
        let v = self.g.modpow(&x, &self.n);
        let kv = (&self.k * &v) % &self.n;
        let base = ((&big_b % &self.n) + &self.n - kv) % &self.n;
        let exponent = &self.a + &u * &x;
        let s = base.modpow(&exponent, &self.n);

        // K 和 M 里的 S/A/B 用最短编码, 服务端按该宽度验证
        let shared_key = sha256(&[&s.to_bytes_be()]);

        // M = H((H(pad N) xor H(pad g)) || H(identity) || salt || A || B || K)
        let hn = sha256(&[&pad(&self.n)?]);
        let hg = sha256(&[&pad(&self.g)?]);
        let hxor: Vec<u8> = hn.iter().zip(hg.iter()).map(|(p, q)| p ^ q).collect();
        let hi = sha256(&[self.identity.as_bytes()]);
        let m = sha256(&[
            &hxor,
            &hi,
            &salt,
            &self.big_a.to_bytes_be(),
            &big_b.to_bytes_be(),
            &shared_key,
        ]);

        Ok(SrpProof {
            proof_m_hex: hex::encode(&m).to_uppercase(),
            shared_key,
        })
    }

    #[cfg(test)]
    fn multiplier_k_hex(&self) -> String {
        hex::encode(self.k.to_bytes_be())
    }
}

/// 大端字节表示, 左侧补零到协议宽度 (128 字节)
fn pad(value: &BigUint) -> Result<Vec<u8>> {
    let bytes = value.to_bytes_be();
    if bytes.len() > SRP_VALUE_WIDTH {
        return Err(XapiError::AuthMath(format!(
            "value exceeds protocol width: {} > {SRP_VALUE_WIDTH} bytes",
            bytes.len()
        )));
    }
    let mut out = vec![0u8; SRP_VALUE_WIDTH - bytes.len()];
    out.extend_from_slice(&bytes);
    Ok(out)
}

fn decode_hex_int(field: &str, hex_str: &str) -> Result<BigUint> {
    // 服务端的十六进制串可能是奇数长度
    let normalized = if hex_str.len() % 2 == 0 {
        hex_str.to_string()
    } else {
        format!("0{hex_str}")
    };
    let bytes = hex::decode(&normalized)
        .map_err(|e| XapiError::AuthMath(format!("invalid {field} hex: {e}")))?;
    Ok(BigUint::from_bytes_be(&bytes))
}

fn sha256(parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().to_vec()
}

fn hash_as_int(parts: &[&[u8]]) -> BigUint {
    BigUint::from_bytes_be(&sha256(parts))
}
