//! 供应商请求签名模块
//!
//! 发卡供应商 API 的每个请求都携带 HMAC-SHA256 签名，
//! 客户端与 mock 供应商共用本模块以保证两侧对规范化串的理解一致。
//!
//! 签名规范：
//! - 规范化串: `"{timestamp}\n{METHOD}\n{path}\n{body}"`
//! - `X-Signature`: 规范化串的 hex(HMAC-SHA256)
//! - `X-Signature-Timestamp`: Unix 秒级时间戳，接收方拒绝偏移超过 300 秒的请求

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Result, RewardError};

type HmacSha256 = Hmac<Sha256>;

/// 签名请求头
pub const SIGNATURE_HEADER: &str = "x-signature";
/// 签名时间戳请求头
pub const TIMESTAMP_HEADER: &str = "x-signature-timestamp";
/// 允许的最大时钟偏移（秒）
pub const MAX_TIMESTAMP_SKEW_SECS: i64 = 300;

/// 构造参与签名的规范化串
///
/// 方法名统一大写，body 为空时该段为空串（换行符仍保留），
/// 两侧必须逐字节一致，否则验签失败。
pub fn canonical_string(timestamp: i64, method: &str, path: &str, body: &str) -> String {
    format!("{}\n{}\n{}\n{}", timestamp, method.to_uppercase(), path, body)
}

/// 计算请求签名（hex 编码的 HMAC-SHA256）
pub fn sign_request(
    secret: &str,
    timestamp: i64,
    method: &str,
    path: &str,
    body: &str,
) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| RewardError::Internal("HMAC 初始化失败".to_string()))?;
    mac.update(canonical_string(timestamp, method, path, body).as_bytes());
    Ok(hex_encode(&mac.finalize().into_bytes()))
}

/// 验证请求签名
///
/// 使用 `Mac::verify_slice` 做常量时间比较，防止时序侧信道。
/// 签名格式非法（非 hex）按验证失败处理而不是报错，
/// 避免给伪造方返回可区分的错误信息。
pub fn verify_signature(
    secret: &str,
    timestamp: i64,
    method: &str,
    path: &str,
    body: &str,
    signature: &str,
) -> Result<bool> {
    let Ok(expected) = hex_decode(signature) else {
        return Ok(false);
    };

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| RewardError::Internal("HMAC 初始化失败".to_string()))?;
    mac.update(canonical_string(timestamp, method, path, body).as_bytes());

    Ok(mac.verify_slice(&expected).is_ok())
}

/// 时间戳是否在允许的偏移窗口内
pub fn is_timestamp_fresh(timestamp: i64, now: i64) -> bool {
    (now - timestamp).abs() <= MAX_TIMESTAMP_SKEW_SECS
}

/// 将字节数组编码为小写 hex 字符串
///
/// 不依赖外部 crate，手动实现避免引入额外依赖。
pub fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// 将 hex 字符串解码为字节数组
fn hex_decode(hex: &str) -> std::result::Result<Vec<u8>, String> {
    if hex.len() % 2 != 0 {
        return Err(format!("hex 字符串长度必须为偶数，实际 {}", hex.len()));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| format!("位置 {i} 处无效的 hex 字符: {e}"))
        })
        .collect()
}

// ============================================================
// 脱敏辅助函数
// ============================================================

/// 邮箱脱敏：保留首字符和 @ 后域名
///
/// 示例: `kevin@example.com` -> `k***@example.com`
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            if local.is_empty() {
                return format!("***@{domain}");
            }
            let first_char: String = local.chars().take(1).collect();
            format!("{first_char}***@{domain}")
        }
        // 格式不合法时全部遮蔽
        None => "***".to_string(),
    }
}

/// 手机号脱敏：保留前 3 位和后 4 位
///
/// 示例: `13812345678` -> `138****5678`
/// 不足 7 位的短号码全部遮蔽，防止反推原始号码。
pub fn mask_phone(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 7 {
        return "****".to_string();
    }
    let prefix: String = digits[..3].iter().collect();
    let suffix: String = digits[digits.len() - 4..].iter().collect();
    format!("{prefix}****{suffix}")
}

/// 按投递方式脱敏地址
pub fn mask_address(method: &str, address: &str) -> String {
    match method {
        "sms" => mask_phone(address),
        "email" => mask_email(address),
        _ => "***".to_string(),
    }
}
