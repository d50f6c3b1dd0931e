//! # Relay Mailer
//!
//! Environment-configured SMTP sending built on top of [`lettre`].
//!
//! The crate contributes the glue between a declarative message request and
//! an SMTP relay: connection settings come from the environment, recipients
//! and options are mapped onto a stateful [`MailSession`], and bulk sends are
//! paced to stay under provider rate limits. The protocol work itself (SMTP
//! handshake, MIME, TLS) is left to `lettre`.
//!
//! ## Features
//!
//! - **Connection configuration**: `MAIL_SERVICE*` variables, SMTPS on port
//!   465 and STARTTLS everywhere else, 30 second connection timeout
//! - **Address resolution**: single addresses, named addresses and lists,
//!   including the "numeric key means bare address" mapping form
//! - **Message dispatch**: HTML or plain bodies, plain-text alternatives,
//!   CC/BCC/Reply-To and an `X-Priority` header
//! - **Bulk dispatch**: sequential sends with a random 1-3 second pause,
//!   abort or collect-and-continue on failure, cancellable pauses
//! - **Backends**: SMTP for production, console for dry runs, memory for tests
//!
//! ## Examples
//!
//! ### Single message
//!
//! ```rust,no_run
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use relay_mailer::{Mailer, MessageRequest, Priority};
//!
//! let mut mailer = Mailer::from_env()?;
//!
//! let request = MessageRequest::builder()
//!     .to("x@y.com")
//!     .subject("Hi")
//!     .body("<b>hi</b>")
//!     .html(true)
//!     .alt_body("hi")
//!     .priority(Priority::High)
//!     .build();
//!
//! mailer.send(&request).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Bulk sending
//!
//! ```rust,no_run
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use relay_mailer::{BulkOptions, BulkRecipients, BulkRequest, Mailer, OnError};
//!
//! let mut mailer = Mailer::from_env()?;
//!
//! let recipients = BulkRecipients::from_pairs([
//!     ("a@x.com", "Alice"),
//!     ("b@x.com", "Bob"),
//! ]);
//! let request = BulkRequest::new(recipients, "Newsletter", "Monthly news");
//! let options = BulkOptions::new().with_on_error(OnError::CollectAndContinue);
//!
//! let report = mailer.send_bulk(&request, &options).await?;
//! println!("{} of {} delivered", report.delivered(), report.len());
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod backends;
pub mod bulk;
pub mod config;
pub mod dispatch;
pub mod message;
pub mod session;

use thiserror::Error;

pub use address::{AddressSpec, ResolvedAddress};
pub use backends::{
	ConsoleBackend, MailBackend, MemoryBackend, SentMessage, SmtpBackend, TransportError,
};
pub use bulk::{BulkError, BulkOptions, BulkRecipients, BulkReport, BulkRequest, OnError, Pacing};
pub use config::{Encryption, TransportConfig};
pub use dispatch::{Mailer, SharedMailer};
pub use message::{MessageOptions, MessageRequest, MessageRequestBuilder, Priority, RequestError};
pub use session::{MailSession, RecipientKind, SessionError};

/// Errors raised while assembling transport settings.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("Missing required setting: {0}")]
	MissingVariable(String),

	#[error("Invalid value for {key}: {value:?}")]
	InvalidValue { key: String, value: String },

	#[error("TLS setup failed: {0}")]
	Tls(String),
}

/// A message could not be delivered.
///
/// `diagnostic` is the session's last diagnostic string at the time of the
/// failure (empty when the session recorded none); `cause` is the error that
/// triggered it.
#[derive(Debug, Error)]
#[error("Mail delivery failed: {diagnostic} - {cause}")]
pub struct SendError {
	pub diagnostic: String,
	#[source]
	pub cause: SessionError,
}

impl SendError {
	pub fn new(diagnostic: impl Into<String>, cause: SessionError) -> Self {
		Self {
			diagnostic: diagnostic.into(),
			cause,
		}
	}

	/// Whether the failure happened before anything reached the backend.
	pub fn is_local(&self) -> bool {
		!matches!(self.cause, SessionError::Transport(_))
	}
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
pub type SendResult<T> = std::result::Result<T, SendError>;
