use secrecy::SecretBox;
use serde::Deserialize;
use time::Duration;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub database_url: SecretBox<String>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    // メール送信設定（SMTP は email 機能有効時のみ使用）
    #[serde(default = "default_mail_from_address")]
    pub mail_from_address: String,
    pub resend_api_key: Option<SecretBox<String>>,
    #[serde(default)]
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_username: Option<SecretBox<String>>,
    pub smtp_password: Option<SecretBox<String>>,

    // 登録確認設定
    #[serde(default = "default_verification_url_base")]
    pub verification_url_base: String,
    /// 確認成功後のリダイレクト先（未設定なら JSON を返す）
    #[serde(default)]
    pub verified_redirect_url: Option<String>,
    #[serde(default = "default_pending_registration_ttl_secs")]
    pub pending_registration_ttl_secs: i64,
    /// 登録を許可するメールドメイン（カンマ区切り、空なら制限なし）
    #[serde(default = "default_allowed_email_domains")]
    pub allowed_email_domains: Vec<String>,

    // パスワードリセット設定
    #[serde(default = "default_password_reset_url_base")]
    pub password_reset_url_base: String,
    #[serde(default = "default_password_reset_token_ttl_secs")]
    pub password_reset_token_ttl_secs: i64,

    // レートリミット設定
    #[serde(default = "default_rate_limit_capacity")]
    pub rate_limit_capacity: u32,
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: i64,
    #[serde(default = "default_rate_limit_retention_secs")]
    pub rate_limit_retention_secs: i64,
    #[serde(default = "default_rate_limit_cleanup_interval_secs")]
    pub rate_limit_cleanup_interval_secs: u64,
    /// X-Forwarded-For の先頭をクライアント識別子として使うか
    #[serde(default)]
    pub trust_forwarded_for: bool,

    // バックグラウンド処理
    #[serde(default = "default_token_sweep_interval_secs")]
    pub token_sweep_interval_secs: u64,

    #[serde(default)]
    pub cors_allowed_origin: Option<String>,
}

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_MAIL_FROM_ADDRESS: &str = "no-reply@localhost";
const DEFAULT_VERIFICATION_URL_BASE: &str = "http://localhost:3000/api/v1/auth/verify";
const DEFAULT_PASSWORD_RESET_URL_BASE: &str = "http://localhost:5173/reset-password";
const DEFAULT_PENDING_REGISTRATION_TTL_SECS: i64 = 24 * 60 * 60;
const DEFAULT_PASSWORD_RESET_TOKEN_TTL_SECS: i64 = 15 * 60;
const DEFAULT_RATE_LIMIT_CAPACITY: u32 = 5;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: i64 = 10 * 60;
const DEFAULT_RATE_LIMIT_RETENTION_SECS: i64 = 60 * 60;
const DEFAULT_RATE_LIMIT_CLEANUP_INTERVAL_SECS: u64 = 60 * 60;
const DEFAULT_TOKEN_SWEEP_INTERVAL_SECS: u64 = 5 * 60;

const DEFAULT_ALLOWED_EMAIL_DOMAINS: &[&str] = &[
    "gmail.com",
    "yahoo.com",
    "hotmail.com",
    "outlook.com",
    "icloud.com",
    "protonmail.com",
    "proton.me",
    "mail.ru",
    "yandex.ru",
    "yandex.com",
    "ya.ru",
    "rambler.ru",
    "bk.ru",
    "inbox.ru",
    "list.ru",
    "internet.ru",
    "ukr.net",
    "i.ua",
];

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}

fn default_mail_from_address() -> String {
    DEFAULT_MAIL_FROM_ADDRESS.to_string()
}

fn default_verification_url_base() -> String {
    DEFAULT_VERIFICATION_URL_BASE.to_string()
}

fn default_password_reset_url_base() -> String {
    DEFAULT_PASSWORD_RESET_URL_BASE.to_string()
}

fn default_pending_registration_ttl_secs() -> i64 {
    DEFAULT_PENDING_REGISTRATION_TTL_SECS
}

fn default_password_reset_token_ttl_secs() -> i64 {
    DEFAULT_PASSWORD_RESET_TOKEN_TTL_SECS
}

fn default_rate_limit_capacity() -> u32 {
    DEFAULT_RATE_LIMIT_CAPACITY
}

fn default_rate_limit_window_secs() -> i64 {
    DEFAULT_RATE_LIMIT_WINDOW_SECS
}

fn default_rate_limit_retention_secs() -> i64 {
    DEFAULT_RATE_LIMIT_RETENTION_SECS
}

fn default_rate_limit_cleanup_interval_secs() -> u64 {
    DEFAULT_RATE_LIMIT_CLEANUP_INTERVAL_SECS
}

fn default_token_sweep_interval_secs() -> u64 {
    DEFAULT_TOKEN_SWEEP_INTERVAL_SECS
}

fn default_allowed_email_domains() -> Vec<String> {
    DEFAULT_ALLOWED_EMAIL_DOMAINS
        .iter()
        .map(|domain| domain.to_string())
        .collect()
}

impl Config {
    pub fn load() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    /// 仮登録の有効期間
    pub fn pending_registration_ttl(&self) -> Duration {
        Duration::seconds(self.pending_registration_ttl_secs)
    }

    /// パスワードリセット要求の有効期間
    pub fn password_reset_ttl(&self) -> Duration {
        Duration::seconds(self.password_reset_token_ttl_secs)
    }

    pub fn token_sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.token_sweep_interval_secs)
    }

    pub fn rate_limit_cleanup_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.rate_limit_cleanup_interval_secs)
    }

    /// テスト用設定（DATABASE_URL 以外はすべてデフォルト値）
    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::from_pairs(&[("DATABASE_URL", "postgres://localhost/verigate_test")])
    }

    #[cfg(test)]
    pub(crate) fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        envy::from_iter(
            pairs
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string())),
        )
        .expect("test config must deserialize")
    }
}
