use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};

/// 32バイトのランダムトークンを生成（URL安全な Base64）
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// トークンをSHA256でハッシュ化
///
/// ストアのキーにはこのハッシュを使い、平文トークンは保存しない
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// メールアドレスの正規化（前後の空白除去・小文字化）
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
