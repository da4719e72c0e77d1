use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

const BLOCK_SIZE: usize = 64;

/// HMAC-SHA256（RFC 2104）
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut block = [0u8; BLOCK_SIZE];
    if key.len() > BLOCK_SIZE {
        block[..32].copy_from_slice(&Sha256::digest(key));
    } else {
        block[..key.len()].copy_from_slice(key);
    }

    let mut inner = Sha256::new();
    inner.update(block.map(|b| b ^ 0x36));
    inner.update(data);
    let inner_hash = inner.finalize();

    let mut outer = Sha256::new();
    outer.update(block.map(|b| b ^ 0x5c));
    outer.update(inner_hash);
    outer.finalize().into()
}

/// 钉钉加签：`HmacSHA256(key=secret, "{timestamp}\n{secret}")`，Base64 后再 URL 编码
///
/// `timestamp` 为毫秒。
pub fn dingtalk_sign(secret: &str, timestamp_ms: i64) -> String {
    let payload = format!("{}\n{}", timestamp_ms, secret);
    let digest = hmac_sha256(secret.as_bytes(), payload.as_bytes());
    urlencoding::encode(&STANDARD.encode(digest)).into_owned()
}

/// 飞书签名校验：以 `"{timestamp}\n{secret}"` 为密钥对空串做 HmacSHA256，再 Base64
///
/// `timestamp` 为秒。
pub fn feishu_sign(secret: &str, timestamp_secs: i64) -> String {
    let key = format!("{}\n{}", timestamp_secs, secret);
    let digest = hmac_sha256(key.as_bytes(), &[]);
    STANDARD.encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_rfc4231_case2() {
        let digest = hmac_sha256(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(
            hex_string(&digest),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_hmac_long_key() {
        // RFC 4231 case 6：131 字节密钥
        let key = [0xaau8; 131];
        let digest = hmac_sha256(&key, b"Test Using Larger Than Block-Size Key - Hash Key First");
        assert_eq!(
            hex_string(&digest),
            "60e431591ee0b67f0d8a26aacbf5b77f8e0bc6213728c5140546040f0ee37f54"
        );
    }

    #[test]
    fn test_signatures_are_stable() {
        let a = dingtalk_sign("SEC000", 1_700_000_000_000);
        let b = dingtalk_sign("SEC000", 1_700_000_000_000);
        assert_eq!(a, b);
        assert!(!a.contains('+') && !a.contains('/') && !a.contains('='));

        let f = feishu_sign("secret", 1_700_000_000);
        assert_eq!(STANDARD.decode(&f).unwrap().len(), 32);
    }

    fn hex_string(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }
}
