//! Paced bulk sending
//!
//! A bulk send expands one [`BulkRequest`] into a message per recipient and
//! sends them strictly in order, pausing a random whole number of seconds
//! between sends to stay under provider rate limits.

use crate::address::AddressSpec;
use crate::dispatch::Mailer;
use crate::message::{MessageOptions, MessageRequest, RequestError};
use crate::SendError;
use indexmap::IndexMap;
use rand::Rng;
use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Ordered bulk recipients, each under the key its outcome is reported by.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkRecipients {
	entries: Vec<(String, AddressSpec)>,
}

impl BulkRecipients {
	pub fn new() -> Self {
		Self::default()
	}

	/// Build from a key/value mapping.
	///
	/// Numeric keys carry a bare address as their value; any other key is
	/// the address and the value its display name. A repeated key keeps its
	/// first position and takes the later value.
	///
	/// # Examples
	///
	/// ```
	/// use relay_mailer::BulkRecipients;
	///
	/// let recipients = BulkRecipients::from_pairs([("a@x.com", "Alice"), ("0", "b@x.com")]);
	/// let keys: Vec<_> = recipients.keys().collect();
	/// assert_eq!(keys, vec!["a@x.com", "0"]);
	/// ```
	pub fn from_pairs<I, K, V>(pairs: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		let mut recipients = Self::new();
		for (key, value) in pairs {
			let key = key.into();
			let spec = AddressSpec::from_entry(&key, value.into());
			recipients.push(key, spec);
		}
		recipients
	}

	/// Build from a plain address list, keyed by position.
	pub fn from_addresses<I, A>(addresses: I) -> Self
	where
		I: IntoIterator<Item = A>,
		A: Into<String>,
	{
		let entries = addresses
			.into_iter()
			.enumerate()
			.map(|(index, address)| (index.to_string(), AddressSpec::Single(address.into())))
			.collect();
		Self { entries }
	}

	/// Append a recipient. Keys are unique: pushing an existing key
	/// replaces its address in place and keeps the original position.
	pub fn push(&mut self, key: impl Into<String>, spec: impl Into<AddressSpec>) {
		let key = key.into();
		let spec = spec.into();
		match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
			Some((_, slot)) => *slot = spec,
			None => self.entries.push((key, spec)),
		}
	}

	pub fn keys(&self) -> impl Iterator<Item = &str> {
		self.entries.iter().map(|(key, _)| key.as_str())
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &AddressSpec)> {
		self.entries.iter().map(|(key, spec)| (key.as_str(), spec))
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRecipients {
	Map(IndexMap<String, String>),
	List(Vec<String>),
}

impl<'de> Deserialize<'de> for BulkRecipients {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		Ok(match RawRecipients::deserialize(deserializer)? {
			RawRecipients::Map(map) => Self::from_pairs(map),
			RawRecipients::List(list) => Self::from_addresses(list),
		})
	}
}

/// Subject, body and shared options for a batch of recipients.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BulkRequest {
	#[serde(alias = "email")]
	pub recipients: BulkRecipients,
	#[serde(default)]
	pub subject: String,
	#[serde(default)]
	pub body: String,
	#[serde(default)]
	pub options: MessageOptions,
}

impl BulkRequest {
	pub fn new(
		recipients: BulkRecipients,
		subject: impl Into<String>,
		body: impl Into<String>,
	) -> Self {
		Self {
			recipients,
			subject: subject.into(),
			body: body.into(),
			options: MessageOptions::default(),
		}
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

	/// The per-recipient requests, in send order, paired with their keys.
	pub fn expand(&self) -> Vec<(String, MessageRequest)> {
		self.recipients
			.iter()
			.map(|(key, spec)| {
				let request = MessageRequest {
					recipients: spec.clone(),
					subject: self.subject.clone(),
					body: self.body.clone(),
					options: self.options.clone(),
				};
				(key.to_string(), request)
			})
			.collect()
	}
}

/// What to do when one recipient fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OnError {
	/// Stop the batch and return the error; later recipients are skipped.
	#[default]
	Abort,
	/// Record the failure and carry on with the next recipient.
	CollectAndContinue,
}

/// Pause inserted between consecutive sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
	min_secs: u64,
	max_secs: u64,
}

impl Pacing {
	/// Uniformly random whole seconds in `min_secs..=max_secs`.
	pub fn random_secs(min_secs: u64, max_secs: u64) -> Self {
		Self {
			min_secs: min_secs.min(max_secs),
			max_secs: min_secs.max(max_secs),
		}
	}

	pub fn fixed(secs: u64) -> Self {
		Self::random_secs(secs, secs)
	}

	pub fn disabled() -> Self {
		Self::fixed(0)
	}

	pub fn min(&self) -> Duration {
		Duration::from_secs(self.min_secs)
	}

	pub fn max(&self) -> Duration {
		Duration::from_secs(self.max_secs)
	}

	pub fn is_disabled(&self) -> bool {
		self.max_secs == 0
	}

	/// Draw the next pause.
	pub fn next_delay(&self) -> Duration {
		if self.min_secs == self.max_secs {
			return Duration::from_secs(self.min_secs);
		}
		let secs = rand::thread_rng().gen_range(self.min_secs..=self.max_secs);
		Duration::from_secs(secs)
	}
}

impl Default for Pacing {
	fn default() -> Self {
		Self::random_secs(1, 3)
	}
}

/// Policy for one bulk send.
#[derive(Debug, Clone, Default)]
pub struct BulkOptions {
	pub on_error: OnError,
	pub pacing: Pacing,
	pub cancel: Option<CancellationToken>,
}

impl BulkOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_on_error(mut self, on_error: OnError) -> Self {
		self.on_error = on_error;
		self
	}

	pub fn with_pacing(mut self, pacing: Pacing) -> Self {
		self.pacing = pacing;
		self
	}

	pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
		self.cancel = Some(token);
		self
	}

	fn is_cancelled(&self) -> bool {
		self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
	}
}

/// Per-recipient outcomes of a bulk send.
#[derive(Debug, Default)]
pub struct BulkReport {
	/// Outcome per recipient key, in send order
	pub results: IndexMap<String, bool>,
	/// Errors of the recipients recorded as `false`
	pub failures: IndexMap<String, SendError>,
	/// Every pause taken between sends
	pub delays: Vec<Duration>,
}

impl BulkReport {
	pub fn len(&self) -> usize {
		self.results.len()
	}

	pub fn is_empty(&self) -> bool {
		self.results.is_empty()
	}

	pub fn delivered(&self) -> usize {
		self.results.values().filter(|ok| **ok).count()
	}

	pub fn failed(&self) -> usize {
		self.results.len() - self.delivered()
	}

	pub fn all_delivered(&self) -> bool {
		self.failed() == 0
	}
}

#[derive(Debug, Error)]
pub enum BulkError {
	#[error("Bulk send aborted at {key}: {source}")]
	Aborted {
		key: String,
		report: BulkReport,
		#[source]
		source: SendError,
	},

	#[error("Bulk send cancelled after {} recipient(s)", .report.len())]
	Cancelled { report: BulkReport },
}

impl BulkError {
	/// Outcomes recorded before the batch stopped.
	pub fn report(&self) -> &BulkReport {
		match self {
			Self::Aborted { report, .. } | Self::Cancelled { report } => report,
		}
	}
}

impl Mailer {
	/// Send one message per recipient of `request`, in order.
	///
	/// Between two sends the mailer sleeps for a delay drawn from
	/// `options.pacing`; no pause follows the last send. A cancelled token
	/// interrupts the pause and stops the batch.
	pub async fn send_bulk(
		&mut self,
		request: &BulkRequest,
		options: &BulkOptions,
	) -> Result<BulkReport, BulkError> {
		let messages = request.expand();
		let total = messages.len();
		let mut report = BulkReport::default();

		tracing::info!(recipients = total, "Starting bulk send");

		for (index, (key, message)) in messages.into_iter().enumerate() {
			if options.is_cancelled() {
				tracing::info!(sent = report.len(), "Bulk send cancelled");
				return Err(BulkError::Cancelled { report });
			}

			match self.send(&message).await {
				Ok(()) => {
					report.results.insert(key, true);
				}
				Err(error) => match options.on_error {
					OnError::Abort => {
						tracing::warn!(key = %key, "Aborting bulk send");
						return Err(BulkError::Aborted {
							key,
							report,
							source: error,
						});
					}
					OnError::CollectAndContinue => {
						report.results.insert(key.clone(), false);
						report.failures.insert(key, error);
					}
				},
			}

			if index + 1 < total && !options.pacing.is_disabled() {
				let delay = options.pacing.next_delay();
				tracing::debug!(delay_secs = delay.as_secs(), "Pausing before next send");
				if !pause(delay, options.cancel.as_ref()).await {
					tracing::info!(sent = report.len(), "Bulk send cancelled");
					return Err(BulkError::Cancelled { report });
				}
				report.delays.push(delay);
			}
		}

		tracing::info!(
			delivered = report.delivered(),
			failed = report.failed(),
			"Bulk send finished"
		);
		Ok(report)
	}
}

/// Sleep for `delay`; returns `false` when cancelled first.
async fn pause(delay: Duration, cancel: Option<&CancellationToken>) -> bool {
	match cancel {
		Some(token) => tokio::select! {
			_ = tokio::time::sleep(delay) => true,
			_ = token.cancelled() => false,
		},
		None => {
			tokio::time::sleep(delay).await;
			true
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::address::is_index_key;
	use rstest::rstest;

	#[rstest]
	fn test_pacing_default_range() {
		let pacing = Pacing::default();

		for _ in 0..100 {
			let delay = pacing.next_delay();
			assert!(delay >= Duration::from_secs(1) && delay <= Duration::from_secs(3));
			assert_eq!(delay.subsec_nanos(), 0);
		}
	}

	#[rstest]
	fn test_pacing_swapped_bounds() {
		let pacing = Pacing::random_secs(5, 2);

		assert_eq!(pacing.min(), Duration::from_secs(2));
		assert_eq!(pacing.max(), Duration::from_secs(5));
	}

	#[rstest]
	fn test_pacing_disabled() {
		assert!(Pacing::disabled().is_disabled());
		assert_eq!(Pacing::disabled().next_delay(), Duration::ZERO);
	}

	#[rstest]
	fn test_expand_numeric_and_named_keys() {
		// Arrange
		let recipients = BulkRecipients::from_pairs([("0", "a@x.com"), ("b@x.com", "Bob")]);
		let request = BulkRequest::new(recipients, "Subject", "Body");

		// Act
		let expanded = request.expand();

		// Assert
		assert_eq!(expanded.len(), 2);
		assert_eq!(expanded[0].0, "0");
		assert_eq!(expanded[0].1.recipients, AddressSpec::single("a@x.com"));
		assert_eq!(expanded[1].0, "b@x.com");
		assert_eq!(expanded[1].1.recipients, AddressSpec::named("b@x.com", "Bob"));
		assert!(expanded.iter().all(|(_, r)| r.subject == "Subject" && r.body == "Body"));
	}

	#[rstest]
	fn test_push_replaces_duplicate_key() {
		// Arrange
		let mut recipients = BulkRecipients::from_addresses(["a@x.com", "b@x.com"]);

		// Act
		recipients.push("0", "c@x.com");
		recipients.push("d@x.com", AddressSpec::named("d@x.com", "Dan"));

		// Assert
		let entries: Vec<_> = recipients.iter().collect();
		assert_eq!(recipients.len(), 3);
		assert_eq!(entries[0], ("0", &AddressSpec::single("c@x.com")));
		assert_eq!(entries[1], ("1", &AddressSpec::single("b@x.com")));
		assert_eq!(entries[2].0, "d@x.com");
	}

	#[rstest]
	fn test_from_pairs_duplicate_key_later_value_wins() {
		let recipients =
			BulkRecipients::from_pairs([("a@x.com", "Alice"), ("b@x.com", "Bob"), ("a@x.com", "Ann")]);

		let entries: Vec<_> = recipients.iter().collect();

		assert_eq!(recipients.len(), 2);
		assert_eq!(entries[0], ("a@x.com", &AddressSpec::named("a@x.com", "Ann")));
		assert_eq!(entries[1].0, "b@x.com");
	}

	#[rstest]
	fn test_recipients_from_list_keyed_by_index() {
		let recipients = BulkRecipients::from_addresses(["a@x.com", "b@x.com"]);

		let keys: Vec<_> = recipients.keys().collect();

		assert_eq!(keys, vec!["0", "1"]);
		assert!(recipients.keys().all(is_index_key));
	}

	#[rstest]
	fn test_bulk_request_from_json() {
		let json = r#"{
			"recipients": {"a@x.com": "Alice", "0": "b@x.com"},
			"subject": "News",
			"body": "<p>news</p>",
			"options": {"isHtml": true, "priority": "low", "cc": "audit@x.com"}
		}"#;

		let request = BulkRequest::from_json(json).unwrap();

		assert_eq!(request.recipients.len(), 2);
		assert!(request.options.is_html);
		assert_eq!(request.options.priority, Some(crate::Priority::Low));
		assert_eq!(request.options.cc, Some(AddressSpec::single("audit@x.com")));
	}

	#[rstest]
	fn test_bulk_request_from_json_list() {
		let request =
			BulkRequest::from_json(r#"{"email": ["a@x.com", "b@x.com"], "subject": "s"}"#).unwrap();

		let keys: Vec<_> = request.recipients.keys().collect();
		assert_eq!(keys, vec!["0", "1"]);
	}
}
