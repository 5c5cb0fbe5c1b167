use async_trait::async_trait;
use lettre::{
    message::header::ContentType,
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::info;

use crate::config::SmtpConfig;

/// Out-of-band notification channel. Callers treat every send as
/// fire-and-forget: a failure is logged, never surfaced in the response.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_welcome(&self, email: &str, username: &str) -> anyhow::Result<()>;
    async fn send_password_changed(&self, email: &str, username: &str) -> anyhow::Result<()>;
    async fn send_account_cancelled(&self, email: &str, username: &str) -> anyhow::Result<()>;
    async fn send_reset_link(&self, email: &str, username: &str, link: &str) -> anyhow::Result<()>;
}

fn welcome_body(username: &str) -> String {
    format!(
        "Welcome to Libris, {username}!\n\
        \n\
        Your account is ready. Log in and start browsing the catalogue.\n\
        \n\
        Best regards,\n\
        The Libris Team"
    )
}

fn password_changed_body(username: &str) -> String {
    format!(
        "Hi {username},\n\
        \n\
        Your Libris password was just changed. If this was not you,\n\
        reset your password immediately.\n\
        \n\
        Best regards,\n\
        The Libris Team"
    )
}

fn account_cancelled_body(username: &str) -> String {
    format!(
        "Hi {username},\n\
        \n\
        Your Libris account has been deleted. We are sorry to see you go.\n\
        \n\
        Best regards,\n\
        The Libris Team"
    )
}

fn reset_link_body(username: &str, link: &str) -> String {
    format!(
        "Hi {username},\n\
        \n\
        A password reset was requested for your Libris account.\n\
        Follow this link to choose a new password:\n\
        \n\
        {link}\n\
        \n\
        The link expires in 30 minutes. If you did not request a reset,\n\
        you can ignore this mail.\n\
        \n\
        Best regards,\n\
        The Libris Team"
    )
}

/// SMTP delivery over lettre's tokio transport.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    pub fn new(cfg: &SmtpConfig) -> anyhow::Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.host)?
            .credentials(Credentials::new(cfg.username.clone(), cfg.password.clone()))
            .port(cfg.port)
            .build();
        Ok(Self {
            transport,
            from: cfg.from.clone(),
        })
    }

    async fn send(&self, to: &str, subject: &str, body: String) -> anyhow::Result<()> {
        let message = Message::builder()
            .from(self.from.parse()?)
            .to(to.parse()?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)?;
        self.transport.send(message).await?;
        Ok(())
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_welcome(&self, email: &str, username: &str) -> anyhow::Result<()> {
        self.send(email, "Welcome to Libris", welcome_body(username)).await
    }

    async fn send_password_changed(&self, email: &str, username: &str) -> anyhow::Result<()> {
        self.send(email, "Your Libris password was changed", password_changed_body(username))
            .await
    }

    async fn send_account_cancelled(&self, email: &str, username: &str) -> anyhow::Result<()> {
        self.send(email, "Your Libris account was deleted", account_cancelled_body(username))
            .await
    }

    async fn send_reset_link(&self, email: &str, username: &str, link: &str) -> anyhow::Result<()> {
        self.send(email, "Reset your Libris password", reset_link_body(username, link))
            .await
    }
}

/// Fallback when no SMTP block is configured: mails go to the log only.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_welcome(&self, email: &str, username: &str) -> anyhow::Result<()> {
        info!(%email, %username, "welcome mail (log only)");
        Ok(())
    }

    async fn send_password_changed(&self, email: &str, username: &str) -> anyhow::Result<()> {
        info!(%email, %username, "password-changed mail (log only)");
        Ok(())
    }

    async fn send_account_cancelled(&self, email: &str, username: &str) -> anyhow::Result<()> {
        info!(%email, %username, "account-cancelled mail (log only)");
        Ok(())
    }

    async fn send_reset_link(&self, email: &str, username: &str, link: &str) -> anyhow::Result<()> {
        info!(%email, %username, %link, "reset mail (log only)");
        Ok(())
    }
}
