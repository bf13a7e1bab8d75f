use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretBox};
use serde::Serialize;

use crate::config::Config;
use crate::error::AppError;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("メール送信APIとの通信に失敗")]
    Http(#[from] reqwest::Error),

    #[cfg(feature = "email")]
    #[error("SMTP送信エラー")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[cfg(feature = "email")]
    #[error("メール構築エラー")]
    Message(#[from] lettre::error::Error),

    #[cfg(feature = "email")]
    #[error("メールアドレス形式エラー")]
    Address(#[from] lettre::address::AddressError),

    #[error("メール送信が拒否されました: {0}")]
    Rejected(String),
}

/// 通知送信の抽象
///
/// 失敗の扱いは呼び出し側ごとに異なる（初回登録はログのみ、再送はエラーを返す）。
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_verification(&self, to: &str, link: &str) -> Result<(), NotifyError>;

    async fn send_password_reset(&self, to: &str, link: &str) -> Result<(), NotifyError>;
}

/// メールに記載するリンクの有効期限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkValidity {
    pub verification: time::Duration,
    pub password_reset: time::Duration,
}

impl LinkValidity {
    pub fn from_config(config: &Config) -> Self {
        Self {
            verification: config.pending_registration_ttl(),
            password_reset: config.password_reset_ttl(),
        }
    }
}

/// 有効期限を「24時間」「15分」の形で表す
fn describe_validity(ttl: time::Duration) -> String {
    let secs = ttl.whole_seconds();
    if secs >= 3600 && secs % 3600 == 0 {
        format!("{}時間", secs / 3600)
    } else if secs >= 60 && secs % 60 == 0 {
        format!("{}分", secs / 60)
    } else {
        format!("{secs}秒")
    }
}

/// メール本文
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailContent {
    pub subject: &'static str,
    pub html: String,
}

impl MailContent {
    pub fn verification(link: &str, ttl: time::Duration) -> Self {
        let validity = describe_validity(ttl);
        Self {
            subject: "メールアドレスの確認",
            html: format!(
                r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
<h2>ご登録ありがとうございます</h2>
<p>以下のボタンからメールアドレスを確認してください。</p>
<p><a href="{link}">メールアドレスを確認する</a></p>
<p>このリンクの有効期限は{validity}です。期限が切れると仮登録は削除され、再登録が必要になります。</p>
</div>"#
            ),
        }
    }

    pub fn password_reset(link: &str, ttl: time::Duration) -> Self {
        let validity = describe_validity(ttl);
        Self {
            subject: "パスワードの再設定",
            html: format!(
                r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
<h2>パスワード再設定のご案内</h2>
<p>以下のボタンから新しいパスワードを設定してください。</p>
<p><a href="{link}">パスワードを再設定する</a></p>
<p>このリンクは{validity}で失効します。心当たりがない場合はこのメールを無視してください。</p>
</div>"#
            ),
        }
    }
}

/// メール送信スタブ（開発環境: ログ出力のみ）
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_verification(&self, to: &str, _link: &str) -> Result<(), NotifyError> {
        tracing::info!(to = %to, "確認メール送信（開発モード）");
        Ok(())
    }

    async fn send_password_reset(&self, to: &str, _link: &str) -> Result<(), NotifyError> {
        tracing::info!(to = %to, "パスワードリセットメール送信（開発モード）");
        Ok(())
    }
}

const RESEND_API_URL: &str = "https://api.resend.com/emails";
const RESEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct ResendEmail<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

/// Resend の HTTP API でメールを送信
pub struct ResendNotifier {
    client: reqwest::Client,
    api_key: SecretBox<String>,
    from: String,
    validity: LinkValidity,
}

impl ResendNotifier {
    pub fn new(
        api_key: SecretBox<String>,
        from: String,
        validity: LinkValidity,
    ) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(RESEND_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_key,
            from,
            validity,
        })
    }

    async fn send(&self, to: &str, content: MailContent) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(RESEND_API_URL)
            .bearer_auth(self.api_key.expose_secret())
            .json(&ResendEmail {
                from: &self.from,
                to: [to],
                subject: content.subject,
                html: &content.html,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, to = %to, "メール送信APIがエラーを返却");
            return Err(NotifyError::Rejected(format!("{status}: {body}")));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for ResendNotifier {
    async fn send_verification(&self, to: &str, link: &str) -> Result<(), NotifyError> {
        let content = MailContent::verification(link, self.validity.verification);
        self.send(to, content).await?;
        tracing::info!(to = %to, "確認メール送信完了");
        Ok(())
    }

    async fn send_password_reset(&self, to: &str, link: &str) -> Result<(), NotifyError> {
        let content = MailContent::password_reset(link, self.validity.password_reset);
        self.send(to, content).await?;
        tracing::info!(to = %to, "パスワードリセットメール送信完了");
        Ok(())
    }
}

#[cfg(feature = "email")]
pub use smtp::SmtpNotifier;

#[cfg(feature = "email")]
mod smtp {
    use lettre::message::{Mailbox, header::ContentType};
    use lettre::transport::smtp::authentication::Credentials;
    use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

    use super::*;

    /// SMTP（STARTTLS）でメールを送信
    pub struct SmtpNotifier {
        transport: AsyncSmtpTransport<Tokio1Executor>,
        from: Mailbox,
        validity: LinkValidity,
    }

    impl SmtpNotifier {
        pub fn new(
            host: &str,
            port: u16,
            username: Option<&SecretBox<String>>,
            password: Option<&SecretBox<String>>,
            from: &str,
            validity: LinkValidity,
        ) -> Result<Self, NotifyError> {
            let mut builder =
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?.port(port);
            if let (Some(username), Some(password)) = (username, password) {
                builder = builder.credentials(Credentials::new(
                    username.expose_secret().clone(),
                    password.expose_secret().clone(),
                ));
            }
            Ok(Self {
                transport: builder.build(),
                from: from.parse()?,
                validity,
            })
        }

        async fn send(&self, to: &str, content: MailContent) -> Result<(), NotifyError> {
            let message = Message::builder()
                .from(self.from.clone())
                .to(to.parse()?)
                .subject(content.subject)
                .header(ContentType::TEXT_HTML)
                .body(content.html)?;
            self.transport.send(message).await?;
            Ok(())
        }
    }

    #[async_trait]
    impl Notifier for SmtpNotifier {
        async fn send_verification(&self, to: &str, link: &str) -> Result<(), NotifyError> {
            let content = MailContent::verification(link, self.validity.verification);
            self.send(to, content).await?;
            tracing::info!(to = %to, "確認メール送信完了（SMTP）");
            Ok(())
        }

        async fn send_password_reset(&self, to: &str, link: &str) -> Result<(), NotifyError> {
            let content = MailContent::password_reset(link, self.validity.password_reset);
            self.send(to, content).await?;
            tracing::info!(to = %to, "パスワードリセットメール送信完了（SMTP）");
            Ok(())
        }
    }
}

/// 設定に応じて送信手段を選ぶ（SMTP → Resend → ログ出力）
pub fn build_notifier(config: &Config) -> Result<Arc<dyn Notifier>, AppError> {
    #[cfg(feature = "email")]
    if let Some(host) = &config.smtp_host {
        tracing::info!(smtp_host = %host, "SMTP メール送信を使用");
        let notifier = SmtpNotifier::new(
            host,
            config.smtp_port,
            config.smtp_username.as_ref(),
            config.smtp_password.as_ref(),
            &config.mail_from_address,
            LinkValidity::from_config(config),
        )
        .map_err(|e| AppError::Internal(anyhow::Error::new(e)))?;
        return Ok(Arc::new(notifier));
    }

    if let Some(api_key) = &config.resend_api_key {
        tracing::info!("Resend API によるメール送信を使用");
        let notifier = ResendNotifier::new(
            SecretBox::new(Box::new(api_key.expose_secret().clone())),
            config.mail_from_address.clone(),
            LinkValidity::from_config(config),
        )
        .map_err(|e| AppError::Internal(anyhow::Error::new(e)))?;
        return Ok(Arc::new(notifier));
    }

    tracing::warn!("メール送信が未設定のためログ出力のみ");
    Ok(Arc::new(LogNotifier))
}

#[cfg(test)]
pub use recording::{RecordingNotifier, SentMail};
