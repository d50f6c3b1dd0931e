//! Delivery backends
//!
//! A [`MailBackend`] takes a fully assembled [`lettre::Message`] and delivers
//! it. The SMTP backend talks to the configured relay; the console and memory
//! backends exist for dry runs and tests.

use crate::config::{Encryption, TransportConfig};
use crate::{ConfigError, ConfigResult};
use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
	#[error("SMTP Error: {0}")]
	Smtp(#[from] lettre::transport::smtp::Error),

	#[error("Recipient rejected: {0}")]
	Rejected(String),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
}

#[async_trait]
pub trait MailBackend: Send + Sync {
	/// Deliver one message to every address in its envelope.
	async fn deliver(&self, message: Message) -> Result<(), TransportError>;

	/// Short backend name used in log events.
	fn name(&self) -> &str;
}

/// SMTP relay backend.
///
/// Port 465 connects with implicit TLS; every other port requires STARTTLS.
///
/// # Examples
///
/// ```rust,no_run
/// use relay_mailer::{SmtpBackend, TransportConfig};
///
/// let config = TransportConfig::new("smtp.example.com", 587)
///     .with_credentials("mailer@example.com", "secret");
/// let backend = SmtpBackend::new(&config)?;
/// # Ok::<(), relay_mailer::ConfigError>(())
/// ```
pub struct SmtpBackend {
	transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpBackend {
	pub fn new(config: &TransportConfig) -> ConfigResult<Self> {
		let parameters = TlsParameters::new(config.host().to_string())
			.map_err(|e| ConfigError::Tls(e.to_string()))?;
		let tls = match config.encryption() {
			Encryption::Smtps => Tls::Wrapper(parameters),
			Encryption::StartTls => Tls::Required(parameters),
		};

		let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(config.host())
			.port(config.port())
			.tls(tls)
			.timeout(Some(config.timeout()));

		if !config.username().is_empty() {
			builder = builder.credentials(Credentials::new(
				config.username().to_string(),
				config.password().to_string(),
			));
		}

		Ok(Self {
			transport: builder.build(),
		})
	}

	/// Open a connection and issue `NOOP` to check reachability.
	pub async fn test_connection(&self) -> Result<bool, TransportError> {
		Ok(self.transport.test_connection().await?)
	}
}

#[async_trait]
impl MailBackend for SmtpBackend {
	async fn deliver(&self, message: Message) -> Result<(), TransportError> {
		let response = self.transport.send(message).await?;
		tracing::debug!(code = %response.code(), "SMTP relay accepted message");
		Ok(())
	}

	fn name(&self) -> &str {
		"smtp"
	}
}

/// A message captured by the console or memory backend.
#[derive(Debug, Clone)]
pub struct SentMessage {
	/// Envelope sender
	pub from: Option<String>,
	/// Envelope recipients, including BCC
	pub recipients: Vec<String>,
	/// Full RFC 5322 rendering
	pub formatted: String,
}

impl SentMessage {
	pub fn from_message(message: &Message) -> Self {
		let envelope = message.envelope();
		Self {
			from: envelope.from().map(|address| address.to_string()),
			recipients: envelope.to().iter().map(|address| address.to_string()).collect(),
			formatted: String::from_utf8_lossy(&message.formatted()).into_owned(),
		}
	}

	/// Look up a top-level header by name, unfolding continuation lines.
	pub fn header(&self, name: &str) -> Option<String> {
		let mut current: Option<(String, String)> = None;

		for line in self.formatted.split("\r\n") {
			if line.is_empty() {
				break;
			}
			if line.starts_with(' ') || line.starts_with('\t') {
				if let Some((_, value)) = current.as_mut() {
					value.push_str(line);
				}
				continue;
			}
			if let Some((header, value)) = current.take() {
				if header.eq_ignore_ascii_case(name) {
					return Some(value);
				}
			}
			current = line
				.split_once(':')
				.map(|(header, value)| (header.trim().to_string(), value.trim().to_string()));
		}

		current
			.filter(|(header, _)| header.eq_ignore_ascii_case(name))
			.map(|(_, value)| value)
	}

	/// Message body: everything after the header block.
	pub fn body(&self) -> &str {
		self.formatted
			.split_once("\r\n\r\n")
			.map(|(_, body)| body)
			.unwrap_or("")
	}
}

/// Writes each message to a writer instead of sending it.
pub struct ConsoleBackend {
	writer: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleBackend {
	pub fn new() -> Self {
		Self::with_writer(std::io::stdout())
	}

	pub fn with_writer(writer: impl Write + Send + 'static) -> Self {
		Self {
			writer: Mutex::new(Box::new(writer)),
		}
	}
}

impl Default for ConsoleBackend {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl MailBackend for ConsoleBackend {
	async fn deliver(&self, message: Message) -> Result<(), TransportError> {
		let sent = SentMessage::from_message(&message);
		let mut writer = self.writer.lock();
		writeln!(writer, "{}", "-".repeat(72))?;
		writeln!(writer, "Envelope-To: {}", sent.recipients.join(", "))?;
		writeln!(writer, "{}", sent.formatted.replace("\r\n", "\n"))?;
		writer.flush()?;
		Ok(())
	}

	fn name(&self) -> &str {
		"console"
	}
}

/// Records messages in memory.
///
/// Clones share the same storage, so a test can keep one handle while the
/// session owns another. Individual recipients can be set up to be rejected.
#[derive(Clone, Default)]
pub struct MemoryBackend {
	outbox: Arc<Mutex<Vec<SentMessage>>>,
	attempts: Arc<Mutex<Vec<SentMessage>>>,
	rejections: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryBackend {
	pub fn new() -> Self {
		Self::default()
	}

	/// Reject any message whose envelope includes `address`.
	pub fn reject(&self, address: impl Into<String>, reason: impl Into<String>) {
		self.rejections.lock().insert(address.into(), reason.into());
	}

	/// Messages delivered successfully, in order.
	pub fn outbox(&self) -> Vec<SentMessage> {
		self.outbox.lock().clone()
	}

	/// Every message handed to the backend, rejected ones included.
	pub fn attempts(&self) -> Vec<SentMessage> {
		self.attempts.lock().clone()
	}

	pub fn len(&self) -> usize {
		self.outbox.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.outbox.lock().is_empty()
	}

	pub fn clear(&self) {
		self.outbox.lock().clear();
		self.attempts.lock().clear();
	}
}

#[async_trait]
impl MailBackend for MemoryBackend {
	async fn deliver(&self, message: Message) -> Result<(), TransportError> {
		let sent = SentMessage::from_message(&message);
		self.attempts.lock().push(sent.clone());

		let rejected = {
			let rejections = self.rejections.lock();
			sent.recipients.iter().find_map(|address| {
				rejections
					.get(address)
					.map(|reason| (address.clone(), reason.clone()))
			})
		};
		if let Some((address, reason)) = rejected {
			return Err(TransportError::Rejected(format!("{}: {}", address, reason)));
		}

		self.outbox.lock().push(sent);
		Ok(())
	}

	fn name(&self) -> &str {
		"memory"
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	fn sample_message(to: &str) -> Message {
		Message::builder()
			.from("sender@example.com".parse().unwrap())
			.to(to.parse().unwrap())
			.subject("Sample")
			.body("Sample body".to_string())
			.unwrap()
	}

	#[rstest]
	#[tokio::test]
	async fn test_memory_backend_records_message() {
		// Arrange
		let backend = MemoryBackend::new();

		// Act
		backend.deliver(sample_message("a@x.com")).await.unwrap();

		// Assert
		let outbox = backend.outbox();
		assert_eq!(outbox.len(), 1);
		assert_eq!(outbox[0].recipients, vec!["a@x.com"]);
		assert_eq!(outbox[0].from.as_deref(), Some("sender@example.com"));
		assert_eq!(outbox[0].header("subject").as_deref(), Some("Sample"));
		assert!(outbox[0].body().contains("Sample body"));
	}

	#[rstest]
	#[tokio::test]
	async fn test_memory_backend_rejects_configured_recipient() {
		let backend = MemoryBackend::new();
		backend.reject("b@x.com", "550 mailbox unavailable");

		let result = backend.deliver(sample_message("b@x.com")).await;

		assert!(matches!(result, Err(TransportError::Rejected(ref msg)) if msg.contains("550")));
		assert!(backend.is_empty());
		assert_eq!(backend.attempts().len(), 1);
	}

	#[rstest]
	#[tokio::test]
	async fn test_memory_backend_clones_share_storage() {
		let backend = MemoryBackend::new();
		let handle = backend.clone();

		backend.deliver(sample_message("a@x.com")).await.unwrap();

		assert_eq!(handle.len(), 1);
	}

	#[rstest]
	#[tokio::test]
	async fn test_console_backend_writes_message() {
		// Arrange
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("console.log");
		let file = std::fs::File::create(&path).unwrap();
		let backend = ConsoleBackend::with_writer(file);

		// Act
		backend.deliver(sample_message("a@x.com")).await.unwrap();

		// Assert
		let output = std::fs::read_to_string(&path).unwrap();
		assert!(output.contains("Envelope-To: a@x.com"));
		assert!(output.contains("Subject: Sample"));
	}

	#[rstest]
	#[tokio::test]
	async fn test_smtp_backend_builds_for_both_modes() {
		let smtps = TransportConfig::new("smtp.example.com", 465).with_credentials("u", "p");
		let starttls = TransportConfig::new("smtp.example.com", 587).with_credentials("u", "p");

		assert!(SmtpBackend::new(&smtps).is_ok());
		assert!(SmtpBackend::new(&starttls).is_ok());
	}

	#[rstest]
	fn test_sent_message_header_unfolds_continuation() {
		let sent = SentMessage {
			from: None,
			recipients: vec![],
			formatted: "To: a@x.com,\r\n b@x.com\r\nSubject: Hi\r\n\r\nbody".to_string(),
		};

		assert_eq!(sent.header("to").as_deref(), Some("a@x.com, b@x.com"));
		assert_eq!(sent.header("Subject").as_deref(), Some("Hi"));
		assert_eq!(sent.header("Cc"), None);
		assert_eq!(sent.body(), "body");
	}
}
