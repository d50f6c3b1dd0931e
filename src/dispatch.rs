//! Message dispatch
//!
//! [`Mailer`] maps a [`MessageRequest`] onto its [`MailSession`] and sends
//! it. Whatever the outcome, the session's recipient lists are cleared
//! before `send` returns, so a reused mailer never leaks recipients from one
//! message into the next.

use crate::address::AddressSpec;
use crate::backends::{MailBackend, SmtpBackend};
use crate::config::TransportConfig;
use crate::message::MessageRequest;
use crate::session::{MailSession, RecipientKind, SessionError};
use crate::{ConfigResult, SendError, SendResult};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A mailer shared between tasks; sends are serialized by the lock.
pub type SharedMailer = Arc<Mutex<Mailer>>;

/// Clears the session's recipient lists when dropped.
///
/// Holding the session through this guard keeps the cleanup in place on
/// every exit path, including a send future dropped mid-flight.
struct RecipientScope<'a> {
	session: &'a mut MailSession,
}

impl<'a> RecipientScope<'a> {
	fn new(session: &'a mut MailSession) -> Self {
		Self { session }
	}
}

impl Deref for RecipientScope<'_> {
	type Target = MailSession;

	fn deref(&self) -> &MailSession {
		self.session
	}
}

impl DerefMut for RecipientScope<'_> {
	fn deref_mut(&mut self) -> &mut MailSession {
		self.session
	}
}

impl Drop for RecipientScope<'_> {
	fn drop(&mut self) {
		self.session.clear_all_recipients();
	}
}

/// Sends [`MessageRequest`]s through one session.
///
/// # Examples
///
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use relay_mailer::{Mailer, MemoryBackend, MessageRequest, TransportConfig};
///
/// let config = TransportConfig::new("smtp.example.com", 465)
///     .with_credentials("mailer@example.com", "secret");
/// let backend = MemoryBackend::new();
/// let mut mailer = Mailer::new(config, Box::new(backend.clone()));
///
/// mailer.send(&MessageRequest::new("a@x.com", "Hello", "Hi there")).await?;
/// assert_eq!(backend.len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Mailer {
	session: MailSession,
}

impl Mailer {
	pub fn new(config: TransportConfig, backend: Box<dyn MailBackend>) -> Self {
		Self {
			session: MailSession::new(config, backend),
		}
	}

	/// Mailer over the SMTP backend described by `config`.
	pub fn smtp(config: TransportConfig) -> ConfigResult<Self> {
		config.validate()?;
		let backend = SmtpBackend::new(&config)?;
		Ok(Self::new(config, Box::new(backend)))
	}

	/// Mailer over SMTP with settings read from the environment.
	pub fn from_env() -> ConfigResult<Self> {
		Self::smtp(TransportConfig::from_env()?)
	}

	pub fn from_session(session: MailSession) -> Self {
		Self { session }
	}

	pub fn into_shared(self) -> SharedMailer {
		Arc::new(Mutex::new(self))
	}

	pub fn session(&self) -> &MailSession {
		&self.session
	}

	pub fn config(&self) -> &TransportConfig {
		self.session.config()
	}

	/// Send one message.
	///
	/// Address and assembly failures as well as backend failures come back as
	/// [`SendError`], carrying the session's diagnostic and the cause.
	pub async fn send(&mut self, request: &MessageRequest) -> SendResult<()> {
		let mut scope = RecipientScope::new(&mut self.session);

		match Self::apply_and_send(&mut scope, request).await {
			Ok(()) => {
				tracing::info!(
					backend = scope.backend_name(),
					subject = %request.subject,
					"Message sent"
				);
				Ok(())
			}
			Err(cause) => {
				let error = SendError::new(scope.error_info(), cause);
				tracing::warn!(error = %error, "Message delivery failed");
				Err(error)
			}
		}
	}

	async fn apply_and_send(
		session: &mut MailSession,
		request: &MessageRequest,
	) -> Result<(), SessionError> {
		let options = &request.options;

		let default_from = session.config().username().to_string();
		let from = options.from_address.as_deref().unwrap_or(&default_from);
		session.set_from(from, options.from_name.as_deref())?;

		add_all(session, RecipientKind::To, &request.recipients)?;
		for (kind, spec) in [
			(RecipientKind::Cc, &options.cc),
			(RecipientKind::Bcc, &options.bcc),
			(RecipientKind::ReplyTo, &options.reply_to),
		] {
			if let Some(spec) = spec.as_ref().filter(|spec| !spec.is_empty()) {
				add_all(session, kind, spec)?;
			}
		}

		session.set_html(options.is_html);
		session.set_subject(request.subject.as_str());
		session.set_body(request.body.as_str());
		session.set_alt_body(options.alt_body.clone());
		session.set_priority(options.priority);

		session.send().await
	}
}

fn add_all(
	session: &mut MailSession,
	kind: RecipientKind,
	spec: &AddressSpec,
) -> Result<(), SessionError> {
	for resolved in spec.resolve() {
		session.add_recipient(kind, &resolved.address, resolved.name.as_deref())?;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::backends::MemoryBackend;
	use rstest::rstest;

	fn mailer_with(backend: &MemoryBackend) -> Mailer {
		let config = TransportConfig::new("smtp.example.com", 465)
			.with_credentials("mailer@example.com", "secret");
		Mailer::new(config, Box::new(backend.clone()))
	}

	#[rstest]
	#[tokio::test]
	async fn test_scope_clears_on_invalid_address() {
		// Arrange
		let backend = MemoryBackend::new();
		let mut mailer = mailer_with(&backend);
		let request = MessageRequest::builder()
			.to("a@x.com")
			.to("broken address")
			.subject("s")
			.body("b")
			.build();

		// Act
		let error = mailer.send(&request).await.unwrap_err();

		// Assert
		assert!(error.is_local());
		assert!(error.diagnostic.contains("broken address"));
		assert!(mailer.session().has_no_recipients());
		assert!(backend.attempts().is_empty());
	}

	#[rstest]
	#[tokio::test]
	async fn test_default_sender_is_username() {
		let backend = MemoryBackend::new();
		let mut mailer = mailer_with(&backend);

		mailer
			.send(&MessageRequest::new("a@x.com", "s", "b"))
			.await
			.unwrap();

		assert_eq!(backend.outbox()[0].from.as_deref(), Some("mailer@example.com"));
	}

	#[rstest]
	#[tokio::test]
	async fn test_shared_mailer_serializes_sends() {
		let backend = MemoryBackend::new();
		let shared = mailer_with(&backend).into_shared();

		let mut handles = Vec::new();
		for i in 0..4 {
			let shared = shared.clone();
			handles.push(tokio::spawn(async move {
				let request = MessageRequest::new(format!("user{}@x.com", i), "s", "b");
				shared.lock().await.send(&request).await
			}));
		}
		for handle in handles {
			handle.await.unwrap().unwrap();
		}

		let outbox = backend.outbox();
		assert_eq!(outbox.len(), 4);
		assert!(outbox.iter().all(|sent| sent.recipients.len() == 1));
	}
}
