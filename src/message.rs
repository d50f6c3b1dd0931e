//! Message requests
//!
//! [`MessageRequest`] describes one message declaratively: recipients,
//! subject, body and the optional [`MessageOptions`]. It is built in code
//! through [`MessageRequest::builder`] or read from a JSON document.

use crate::address::AddressSpec;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Message priority, written as an `X-Priority` header.
///
/// # Examples
///
/// ```
/// use relay_mailer::Priority;
///
/// assert_eq!(Priority::from_label("HIGH"), Some(Priority::High));
/// assert_eq!(Priority::from_label("urgent"), None);
/// assert_eq!(Priority::High.header_value(), 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
	High,
	Normal,
	Low,
}

impl Priority {
	/// Case-insensitive lookup; unknown labels yield `None`.
	pub fn from_label(label: &str) -> Option<Self> {
		label.parse().ok()
	}

	/// Numeric `X-Priority` value: 1 is highest, 5 lowest.
	pub fn header_value(self) -> u8 {
		match self {
			Self::High => 1,
			Self::Normal => 3,
			Self::Low => 5,
		}
	}
}

#[derive(Debug, Error)]
#[error("Unknown priority: {0}")]
pub struct ParsePriorityError(String);

impl FromStr for Priority {
	type Err = ParsePriorityError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"high" => Ok(Self::High),
			"normal" => Ok(Self::Normal),
			"low" => Ok(Self::Low),
			_ => Err(ParsePriorityError(s.to_string())),
		}
	}
}

impl fmt::Display for Priority {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::High => f.write_str("high"),
			Self::Normal => f.write_str("normal"),
			Self::Low => f.write_str("low"),
		}
	}
}

// Unknown labels are ignored rather than rejected.
fn lenient_priority<'de, D>(deserializer: D) -> Result<Option<Priority>, D::Error>
where
	D: Deserializer<'de>,
{
	let label: Option<String> = Option::deserialize(deserializer)?;
	Ok(label.as_deref().and_then(Priority::from_label))
}

/// Errors raised while loading a request document.
#[derive(Debug, Error)]
pub enum RequestError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Invalid request document: {0}")]
	Json(#[from] serde_json::Error),
}

/// Optional message fields, shared by every message of a bulk send.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MessageOptions {
	/// Plain-text fallback for clients that cannot render the body
	pub alt_body: Option<String>,
	/// Sender address; the transport username when absent
	#[serde(alias = "fromEmail")]
	pub from_address: Option<String>,
	pub from_name: Option<String>,
	pub cc: Option<AddressSpec>,
	pub bcc: Option<AddressSpec>,
	pub reply_to: Option<AddressSpec>,
	#[serde(deserialize_with = "lenient_priority")]
	pub priority: Option<Priority>,
	pub is_html: bool,
}

/// One message to send.
///
/// Built with [`MessageRequest::builder`] or deserialized from the
/// declarative JSON form:
///
/// ```
/// use relay_mailer::{MessageRequest, Priority};
///
/// let request = MessageRequest::from_json(r#"{
///     "email": {"0": "x@y.com", "a@x.com": "Alice"},
///     "subject": "Hi",
///     "body": "<b>hi</b>",
///     "isHtml": true,
///     "altBody": "hi",
///     "priority": "High"
/// }"#)?;
///
/// assert_eq!(request.recipients.resolve().len(), 2);
/// assert_eq!(request.options.priority, Some(Priority::High));
/// # Ok::<(), relay_mailer::RequestError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageRequest {
	#[serde(alias = "email")]
	pub recipients: AddressSpec,
	#[serde(default)]
	pub subject: String,
	#[serde(default)]
	pub body: String,
	#[serde(flatten)]
	pub options: MessageOptions,
}

impl MessageRequest {
	pub fn new(
		recipients: impl Into<AddressSpec>,
		subject: impl Into<String>,
		body: impl Into<String>,
	) -> Self {
		Self {
			recipients: recipients.into(),
			subject: subject.into(),
			body: body.into(),
			options: MessageOptions::default(),
		}
	}

	pub fn builder() -> MessageRequestBuilder {
		MessageRequestBuilder::default()
	}

	pub fn with_options(mut self, options: MessageOptions) -> Self {
		self.options = options;
		self
	}

	pub fn from_json(json: &str) -> Result<Self, RequestError> {
		Ok(serde_json::from_str(json)?)
	}

	pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RequestError> {
		let raw = std::fs::read_to_string(path)?;
		Self::from_json(&raw)
	}
}

#[derive(Default)]
pub struct MessageRequestBuilder {
	recipients: Vec<AddressSpec>,
	subject: String,
	body: String,
	options: MessageOptions,
}

impl MessageRequestBuilder {
	/// Add a recipient; repeated calls accumulate in order.
	pub fn to(mut self, recipient: impl Into<AddressSpec>) -> Self {
		self.recipients.push(recipient.into());
		self
	}

	pub fn subject(mut self, subject: impl Into<String>) -> Self {
		self.subject = subject.into();
		self
	}

	pub fn body(mut self, body: impl Into<String>) -> Self {
		self.body = body.into();
		self
	}

	pub fn alt_body(mut self, alt_body: impl Into<String>) -> Self {
		self.options.alt_body = Some(alt_body.into());
		self
	}

	pub fn from(mut self, address: impl Into<String>) -> Self {
		self.options.from_address = Some(address.into());
		self
	}

	pub fn from_name(mut self, name: impl Into<String>) -> Self {
		self.options.from_name = Some(name.into());
		self
	}

	pub fn cc(mut self, cc: impl Into<AddressSpec>) -> Self {
		self.options.cc = Some(cc.into());
		self
	}

	pub fn bcc(mut self, bcc: impl Into<AddressSpec>) -> Self {
		self.options.bcc = Some(bcc.into());
		self
	}

	pub fn reply_to(mut self, reply_to: impl Into<AddressSpec>) -> Self {
		self.options.reply_to = Some(reply_to.into());
		self
	}

	pub fn priority(mut self, priority: Priority) -> Self {
		self.options.priority = Some(priority);
		self
	}

	/// Set the priority from a label; unknown labels leave it unchanged.
	pub fn priority_label(mut self, label: &str) -> Self {
		if let Some(priority) = Priority::from_label(label) {
			self.options.priority = Some(priority);
		}
		self
	}

	pub fn html(mut self, is_html: bool) -> Self {
		self.options.is_html = is_html;
		self
	}

	pub fn build(self) -> MessageRequest {
		let recipients = match self.recipients.len() {
			1 => self.recipients.into_iter().next().unwrap_or_default(),
			_ => AddressSpec::List(self.recipients),
		};

		MessageRequest {
			recipients,
			subject: self.subject,
			body: self.body,
			options: self.options,
		}
	}
}
