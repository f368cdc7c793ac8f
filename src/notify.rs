//! Outcome notifications.
//!
//! Notifications are fire-and-forget: the engine goes through
//! [`deliver_text`] and [`deliver_artifact`], which log delivery failures
//! and never hand them back.

use crate::config::{NotifierConfig, NotifierKind};
use crate::error::{PontoError, Result};
use crate::portal::SnapshotArtifact;
use crate::schedule::{ClockTime, SlotId};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Messaging channel contract.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Stable channel identifier (e.g. `telegram`).
    fn id(&self) -> &'static str;

    async fn send_text(&self, text: &str) -> anyhow::Result<()>;

    /// Upload a diagnostic image with a caption.
    async fn send_artifact(&self, artifact: &SnapshotArtifact, caption: &str)
    -> anyhow::Result<()>;
}

/// Send a text, logging instead of failing.
pub async fn deliver_text(notifier: &dyn Notifier, text: &str) {
    if let Err(e) = notifier.send_text(text).await {
        tracing::warn!(channel = notifier.id(), "notification failed: {e:#}");
    }
}

/// Send an artifact, logging instead of failing.
pub async fn deliver_artifact(notifier: &dyn Notifier, artifact: &SnapshotArtifact, caption: &str) {
    if let Err(e) = notifier.send_artifact(artifact, caption).await {
        tracing::warn!(
            channel = notifier.id(),
            path = %artifact.path.display(),
            "snapshot notification failed: {e:#}"
        );
    }
}

/// Build the notifier selected in config.
///
/// # Errors
///
/// Returns an error when the Telegram token cannot be resolved or the
/// HTTP client cannot be built.
pub fn build_notifier(config: &NotifierConfig) -> Result<Arc<dyn Notifier>> {
    match config.kind {
        NotifierKind::Log => Ok(Arc::new(LogNotifier)),
        NotifierKind::Telegram => {
            let token = config.bot_token.resolve("notifier.bot_token")?;
            let notifier = TelegramNotifier::new(token, config.chat_id.clone())
                .with_api_base(config.api_base.clone())
                .with_timeout(Duration::from_secs(config.timeout_secs))?;
            Ok(Arc::new(notifier))
        }
    }
}

/// Writes notifications to the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn id(&self) -> &'static str {
        "log"
    }

    async fn send_text(&self, text: &str) -> anyhow::Result<()> {
        tracing::info!(channel = "log", "{text}");
        Ok(())
    }

    async fn send_artifact(
        &self,
        artifact: &SnapshotArtifact,
        caption: &str,
    ) -> anyhow::Result<()> {
        tracing::info!(channel = "log", path = %artifact.path.display(), "{caption}");
        Ok(())
    }
}

/// Telegram Bot API notifier.
pub struct TelegramNotifier {
    token: String,
    chat_id: String,
    api_base: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for TelegramNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("chat_id", &self.chat_id)
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl TelegramNotifier {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            chat_id: chat_id.into(),
            api_base: "https://api.telegram.org".to_owned(),
            client: reqwest::Client::new(),
        }
    }

    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_owned();
        self
    }

    /// Rebuild the HTTP client with a request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`PontoError::Notifier`] if the client cannot be built.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PontoError::Notifier(e.to_string()))?;
        Ok(self)
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token)
    }

    async fn check(response: reqwest::Response, method: &str) -> anyhow::Result<()> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("telegram {method} failed ({status}): {body}");
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn id(&self) -> &'static str {
        "telegram"
    }

    async fn send_text(&self, text: &str) -> anyhow::Result<()> {
        if self.token.trim().is_empty() {
            anyhow::bail!("telegram bot token is empty");
        }
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
        });
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&body)
            .send()
            .await?;
        Self::check(response, "sendMessage").await
    }

    async fn send_artifact(
        &self,
        artifact: &SnapshotArtifact,
        caption: &str,
    ) -> anyhow::Result<()> {
        if self.token.trim().is_empty() {
            anyhow::bail!("telegram bot token is empty");
        }
        let bytes = tokio::fs::read(&artifact.path).await?;
        let file_name = artifact
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "snapshot.png".to_owned());
        let form = reqwest::multipart::Form::new()
            .text("chat_id", self.chat_id.clone())
            .text("caption", caption.to_owned())
            .part(
                "photo",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            );
        let response = self
            .client
            .post(self.method_url("sendPhoto"))
            .multipart(form)
            .send()
            .await?;
        Self::check(response, "sendPhoto").await
    }
}

/// User-facing message texts.
pub mod messages {
    use super::{ClockTime, SlotId};

    pub fn punch_confirmed(slot: SlotId, observed: ClockTime) -> String {
        format!("✅ Ponto registrado: {} às {observed}", slot.label())
    }

    pub fn already_registered(slot: SlotId, target: ClockTime) -> String {
        format!("ℹ️ Ponto já registrado: {} às {target}", slot.label())
    }

    pub fn punch_unconfirmed(slot: SlotId, target: ClockTime, attempts: u32) -> String {
        format!(
            "⚠️ Ponto de {} ({target}) não apareceu no portal após {attempts} verificações",
            slot.label()
        )
    }

    pub fn snapshot_caption(slot: SlotId, target: ClockTime) -> String {
        format!("Tela do portal após tentativa de {} ({target})", slot.label())
    }

    pub fn run_started() -> String {
        "▶️ Automação de ponto iniciada".to_owned()
    }

    pub fn run_stopped() -> String {
        "⏹️ Automação de ponto parada".to_owned()
    }

    pub fn critical_stop(reason: &str) -> String {
        format!("❌ Automação interrompida após falhas repetidas: {reason}")
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::credentials::CredentialRef;

    #[tokio::test]
    async fn log_notifier_never_fails() {
        let notifier = LogNotifier;
        notifier.send_text("olá").await.unwrap();
        let artifact = SnapshotArtifact {
            path: "/nonexistent.png".into(),
        };
        notifier.send_artifact(&artifact, "legenda").await.unwrap();
    }

    #[tokio::test]
    async fn empty_token_is_rejected_before_any_request() {
        let notifier = TelegramNotifier::new("", "42").with_api_base("http://127.0.0.1:9");
        assert!(notifier.send_text("x").await.is_err());
    }

    #[tokio::test]
    async fn deliver_swallows_errors() {
        let notifier = TelegramNotifier::new("", "42");
        deliver_text(&notifier, "x").await;
        let artifact = SnapshotArtifact {
            path: "/nonexistent.png".into(),
        };
        deliver_artifact(&notifier, &artifact, "y").await;
    }

    #[test]
    fn build_log_notifier_by_default() {
        let notifier = build_notifier(&NotifierConfig::default()).unwrap();
        assert_eq!(notifier.id(), "log");
    }

    #[test]
    fn build_telegram_requires_token() {
        let config = NotifierConfig {
            kind: NotifierKind::Telegram,
            chat_id: "42".to_owned(),
            ..NotifierConfig::default()
        };
        assert!(build_notifier(&config).is_err());

        let config = NotifierConfig {
            bot_token: CredentialRef::Plaintext("123:abc".to_owned()),
            ..config
        };
        assert_eq!(build_notifier(&config).unwrap().id(), "telegram");
    }

    #[test]
    fn api_base_trailing_slash_is_trimmed() {
        let notifier = TelegramNotifier::new("t", "1").with_api_base("http://host/");
        assert_eq!(notifier.method_url("sendMessage"), "http://host/bott/sendMessage");
    }

    #[test]
    fn messages_use_slot_labels() {
        let at = ClockTime::from_hm(12, 1).unwrap();
        assert!(messages::punch_confirmed(SlotId::Saida1, at).contains("Saída para almoço"));
        assert!(messages::punch_unconfirmed(SlotId::Entrada1, at, 10).contains("10 verificações"));
    }
}
