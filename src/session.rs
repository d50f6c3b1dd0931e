//! Transport session
//!
//! [`MailSession`] is the stateful half of the mailer: it accumulates the
//! sender, recipient lists and content of the next message, then assembles
//! a [`lettre::Message`] and hands it to its backend. Recipient lists stay
//! populated until cleared, so one session must not be shared between
//! concurrent sends; mutation goes through `&mut self`.

use crate::backends::{MailBackend, TransportError};
use crate::config::TransportConfig;
use crate::message::Priority;
use lettre::Message;
use lettre::message::header::{self, ContentType, Header, HeaderName, HeaderValue};
use lettre::message::{Mailbox, Mailboxes, MultiPart, SinglePart};
use lettre::Address;
use std::fmt;
use thiserror::Error;

/// Which address list a recipient goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientKind {
	To,
	Cc,
	Bcc,
	ReplyTo,
}

impl fmt::Display for RecipientKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::To => f.write_str("to"),
			Self::Cc => f.write_str("cc"),
			Self::Bcc => f.write_str("bcc"),
			Self::ReplyTo => f.write_str("Reply-To"),
		}
	}
}

#[derive(Debug, Error)]
pub enum SessionError {
	#[error("Invalid address ({kind}): {address}")]
	InvalidAddress { kind: RecipientKind, address: String },

	#[error("Invalid sender address: {0}")]
	InvalidSender(String),

	#[error("Message could not be assembled: {0}")]
	Build(String),

	#[error(transparent)]
	Transport(#[from] TransportError),
}

/// `X-Priority` header carrying the numeric priority marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XPriority(pub u8);

impl Header for XPriority {
	fn name() -> HeaderName {
		HeaderName::new_from_ascii_str("X-Priority")
	}

	fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
		Ok(Self(s.trim().parse()?))
	}

	fn display(&self) -> HeaderValue {
		HeaderValue::new(Self::name(), self.0.to_string())
	}
}

/// Stateful message assembly bound to one backend.
///
/// # Examples
///
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use relay_mailer::{MailSession, MemoryBackend, RecipientKind, TransportConfig};
///
/// let config = TransportConfig::new("smtp.example.com", 465)
///     .with_credentials("mailer@example.com", "secret");
/// let mut session = MailSession::new(config, Box::new(MemoryBackend::new()));
///
/// session.set_from("mailer@example.com", None)?;
/// session.add_recipient(RecipientKind::To, "a@x.com", Some("Alice"))?;
/// session.set_subject("Hello");
/// session.set_body("Hi Alice");
/// session.send().await?;
/// session.clear_all_recipients();
/// # Ok(())
/// # }
/// ```
pub struct MailSession {
	config: TransportConfig,
	backend: Box<dyn MailBackend>,
	from: Option<Mailbox>,
	to: Vec<Mailbox>,
	cc: Vec<Mailbox>,
	bcc: Vec<Mailbox>,
	reply_to: Vec<Mailbox>,
	is_html: bool,
	subject: String,
	body: String,
	alt_body: Option<String>,
	priority: Option<Priority>,
	error_info: String,
}

impl MailSession {
	pub fn new(config: TransportConfig, backend: Box<dyn MailBackend>) -> Self {
		if !config.is_utf8() {
			tracing::warn!(
				charset = config.charset(),
				"Charset is not UTF-8; bodies are still encoded as UTF-8"
			);
		}

		Self {
			config,
			backend,
			from: None,
			to: Vec::new(),
			cc: Vec::new(),
			bcc: Vec::new(),
			reply_to: Vec::new(),
			is_html: false,
			subject: String::new(),
			body: String::new(),
			alt_body: None,
			priority: None,
			error_info: String::new(),
		}
	}

	pub fn config(&self) -> &TransportConfig {
		&self.config
	}

	pub fn backend_name(&self) -> &str {
		self.backend.name()
	}

	/// The last diagnostic recorded by a failed operation.
	pub fn error_info(&self) -> &str {
		&self.error_info
	}

	fn mailbox(address: &str, name: Option<&str>) -> Option<Mailbox> {
		let address: Address = address.trim().parse().ok()?;
		let name = name
			.map(str::trim)
			.filter(|n| !n.is_empty())
			.map(str::to_string);
		Some(Mailbox::new(name, address))
	}

	pub fn set_from(&mut self, address: &str, name: Option<&str>) -> Result<(), SessionError> {
		match Self::mailbox(address, name) {
			Some(mailbox) => {
				self.from = Some(mailbox);
				Ok(())
			}
			None => {
				self.error_info = format!("Invalid address: (From): {}", address);
				Err(SessionError::InvalidSender(address.to_string()))
			}
		}
	}

	/// Append an address to one of the recipient lists.
	pub fn add_recipient(
		&mut self,
		kind: RecipientKind,
		address: &str,
		name: Option<&str>,
	) -> Result<(), SessionError> {
		let Some(mailbox) = Self::mailbox(address, name) else {
			self.error_info = format!("Invalid address: ({}): {}", kind, address);
			return Err(SessionError::InvalidAddress {
				kind,
				address: address.to_string(),
			});
		};

		self.list_mut(kind).push(mailbox);
		Ok(())
	}

	fn list_mut(&mut self, kind: RecipientKind) -> &mut Vec<Mailbox> {
		match kind {
			RecipientKind::To => &mut self.to,
			RecipientKind::Cc => &mut self.cc,
			RecipientKind::Bcc => &mut self.bcc,
			RecipientKind::ReplyTo => &mut self.reply_to,
		}
	}

	pub fn recipients(&self, kind: RecipientKind) -> &[Mailbox] {
		match kind {
			RecipientKind::To => &self.to,
			RecipientKind::Cc => &self.cc,
			RecipientKind::Bcc => &self.bcc,
			RecipientKind::ReplyTo => &self.reply_to,
		}
	}

	pub fn clear_addresses(&mut self) {
		self.to.clear();
	}

	pub fn clear_ccs(&mut self) {
		self.cc.clear();
	}

	pub fn clear_bccs(&mut self) {
		self.bcc.clear();
	}

	pub fn clear_reply_tos(&mut self) {
		self.reply_to.clear();
	}

	/// Empty the to, cc, bcc and reply-to lists.
	pub fn clear_all_recipients(&mut self) {
		self.clear_addresses();
		self.clear_ccs();
		self.clear_bccs();
		self.clear_reply_tos();
	}

	/// Whether every recipient list is empty.
	pub fn has_no_recipients(&self) -> bool {
		self.to.is_empty() && self.cc.is_empty() && self.bcc.is_empty() && self.reply_to.is_empty()
	}

	pub fn set_html(&mut self, is_html: bool) {
		self.is_html = is_html;
	}

	pub fn set_subject(&mut self, subject: impl Into<String>) {
		self.subject = subject.into();
	}

	pub fn set_body(&mut self, body: impl Into<String>) {
		self.body = body.into();
	}

	pub fn set_alt_body(&mut self, alt_body: Option<String>) {
		self.alt_body = alt_body.filter(|text| !text.is_empty());
	}

	pub fn set_priority(&mut self, priority: Option<Priority>) {
		self.priority = priority;
	}

	fn content_type(&self, mime: &str) -> Result<ContentType, SessionError> {
		ContentType::parse(&format!("{}; charset={}", mime, self.config.charset()))
			.map_err(|e| SessionError::Build(format!("content type: {}", e)))
	}

	/// Assemble the current state into a message.
	pub fn build_message(&self) -> Result<Message, SessionError> {
		let from = self
			.from
			.clone()
			.ok_or_else(|| SessionError::Build("sender is not set".to_string()))?;

		let mut builder = Message::builder().from(from).subject(self.subject.as_str());
		if let Some(to) = mailboxes(&self.to) {
			builder = builder.header(header::To::from(to));
		}
		if let Some(cc) = mailboxes(&self.cc) {
			builder = builder.header(header::Cc::from(cc));
		}
		if let Some(bcc) = mailboxes(&self.bcc) {
			builder = builder.header(header::Bcc::from(bcc));
		}
		if let Some(reply_to) = mailboxes(&self.reply_to) {
			builder = builder.header(header::ReplyTo::from(reply_to));
		}
		if let Some(priority) = self.priority {
			builder = builder.header(XPriority(priority.header_value()));
		}

		let body_type = if self.is_html { "text/html" } else { "text/plain" };
		let primary = SinglePart::builder()
			.header(self.content_type(body_type)?)
			.body(self.body.clone());

		let message = match &self.alt_body {
			Some(alt_body) => {
				let plain = SinglePart::builder()
					.header(self.content_type("text/plain")?)
					.body(alt_body.clone());
				builder.multipart(MultiPart::alternative().singlepart(plain).singlepart(primary))
			}
			None => builder.singlepart(primary),
		};

		message.map_err(|e| SessionError::Build(e.to_string()))
	}

	/// Assemble and deliver the current message.
	///
	/// Recipient lists are left untouched; callers clear them.
	pub async fn send(&mut self) -> Result<(), SessionError> {
		let message = match self.build_message() {
			Ok(message) => message,
			Err(e) => {
				self.error_info = e.to_string();
				return Err(e);
			}
		};

		tracing::debug!(
			backend = self.backend.name(),
			to = self.to.len(),
			cc = self.cc.len(),
			bcc = self.bcc.len(),
			html = self.is_html,
			"Handing message to backend"
		);

		match self.backend.deliver(message).await {
			Ok(()) => Ok(()),
			Err(e) => {
				self.error_info = e.to_string();
				Err(SessionError::Transport(e))
			}
		}
	}
}

// One header per list keeps the insertion order of the addresses.
fn mailboxes(list: &[Mailbox]) -> Option<Mailboxes> {
	if list.is_empty() {
		return None;
	}
	let mut mailboxes = Mailboxes::new();
	for mailbox in list {
		mailboxes.push(mailbox.clone());
	}
	Some(mailboxes)
}

impl fmt::Debug for MailSession {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MailSession")
			.field("config", &self.config)
			.field("backend", &self.backend.name())
			.field("to", &self.to.len())
			.field("cc", &self.cc.len())
			.field("bcc", &self.bcc.len())
			.field("reply_to", &self.reply_to.len())
			.finish_non_exhaustive()
	}
}
