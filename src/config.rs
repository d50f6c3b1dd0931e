//! Transport settings
//!
//! Connection settings for the SMTP relay, read from the process environment
//! or assembled through the builder methods.

use crate::{ConfigError, ConfigResult};
use lettre::message::header::ContentType;
use std::fmt;
use std::time::Duration;
use zeroize::Zeroizing;

/// Relay host name
pub const ENV_HOST: &str = "MAIL_SERVICE";
/// Account used for authentication, also the default sender address
pub const ENV_USER: &str = "MAIL_SERVICE_USER";
pub const ENV_PASSWORD: &str = "MAIL_SERVICE_PASSWORD";
pub const ENV_PORT: &str = "MAIL_SERVICE_PORT";
pub const ENV_CHARSET: &str = "MAIL_SERVICE_CHARSET";

pub const DEFAULT_PORT: u16 = 465;
pub const DEFAULT_CHARSET: &str = "UTF-8";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How the connection to the relay is encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encryption {
	/// Implicit TLS from the first byte (SMTPS)
	Smtps,
	/// Plain connection upgraded with STARTTLS, which the server must offer
	StartTls,
}

impl Encryption {
	/// Select the encryption mode for a port.
	///
	/// Port 465 is implicit TLS. 587 and 25 use STARTTLS, and so does every
	/// other port: there is no unencrypted fallback.
	///
	/// # Examples
	///
	/// ```
	/// use relay_mailer::Encryption;
	///
	/// assert_eq!(Encryption::for_port(465), Encryption::Smtps);
	/// assert_eq!(Encryption::for_port(587), Encryption::StartTls);
	/// assert_eq!(Encryption::for_port(2525), Encryption::StartTls);
	/// ```
	pub fn for_port(port: u16) -> Self {
		match port {
			465 => Self::Smtps,
			587 | 25 => Self::StartTls,
			_ => Self::StartTls,
		}
	}
}

impl fmt::Display for Encryption {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Smtps => f.write_str("smtps"),
			Self::StartTls => f.write_str("starttls"),
		}
	}
}

/// Settings for one relay connection.
///
/// Immutable once built; the password buffer is wiped on drop and never
/// printed by `Debug`.
#[derive(Clone)]
pub struct TransportConfig {
	host: String,
	username: String,
	password: Zeroizing<String>,
	port: u16,
	charset: String,
	encryption: Encryption,
	timeout: Duration,
}

impl TransportConfig {
	/// Create settings for `host:port` with no credentials.
	///
	/// The encryption mode follows [`Encryption::for_port`].
	///
	/// # Examples
	///
	/// ```
	/// use relay_mailer::{Encryption, TransportConfig};
	/// use std::time::Duration;
	///
	/// let config = TransportConfig::new("smtp.example.com", 587)
	///     .with_credentials("mailer@example.com", "secret");
	///
	/// assert_eq!(config.encryption(), Encryption::StartTls);
	/// assert_eq!(config.timeout(), Duration::from_secs(30));
	/// assert_eq!(config.charset(), "UTF-8");
	/// ```
	pub fn new(host: impl Into<String>, port: u16) -> Self {
		Self {
			host: host.into(),
			username: String::new(),
			password: Zeroizing::new(String::new()),
			port,
			charset: DEFAULT_CHARSET.to_string(),
			encryption: Encryption::for_port(port),
			timeout: DEFAULT_TIMEOUT,
		}
	}

	/// Read the settings from the process environment.
	///
	/// Host, user and password are required; port defaults to 465 and
	/// charset to `UTF-8`.
	pub fn from_env() -> ConfigResult<Self> {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	/// Read the settings through an arbitrary key lookup.
	///
	/// # Examples
	///
	/// ```
	/// use relay_mailer::{Encryption, TransportConfig};
	/// use std::collections::HashMap;
	///
	/// let vars = HashMap::from([
	///     ("MAIL_SERVICE", "smtp.example.com"),
	///     ("MAIL_SERVICE_USER", "mailer@example.com"),
	///     ("MAIL_SERVICE_PASSWORD", "secret"),
	/// ]);
	///
	/// let config = TransportConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()))?;
	/// assert_eq!(config.port(), 465);
	/// assert_eq!(config.encryption(), Encryption::Smtps);
	/// # Ok::<(), relay_mailer::ConfigError>(())
	/// ```
	pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
	where
		F: Fn(&str) -> Option<String>,
	{
		let required = |key: &str| -> ConfigResult<String> {
			lookup(key)
				.filter(|value| !value.trim().is_empty())
				.ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
		};

		let host = required(ENV_HOST)?;
		let username = required(ENV_USER)?;
		let password = required(ENV_PASSWORD)?;

		let port = match lookup(ENV_PORT).filter(|value| !value.trim().is_empty()) {
			Some(raw) => raw
				.trim()
				.parse::<u16>()
				.map_err(|_| ConfigError::InvalidValue {
					key: ENV_PORT.to_string(),
					value: raw.clone(),
				})?,
			None => DEFAULT_PORT,
		};

		let charset = lookup(ENV_CHARSET)
			.filter(|value| !value.trim().is_empty())
			.unwrap_or_else(|| DEFAULT_CHARSET.to_string());

		let config = Self::new(host, port)
			.with_credentials(username, password)
			.with_charset(charset);
		config.validate()?;
		Ok(config)
	}

	pub fn with_credentials(
		mut self,
		username: impl Into<String>,
		password: impl Into<String>,
	) -> Self {
		self.username = username.into();
		self.password = Zeroizing::new(password.into());
		self
	}

	pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
		self.charset = charset.into();
		self
	}

	/// Override the port-derived encryption mode.
	pub fn with_encryption(mut self, encryption: Encryption) -> Self {
		self.encryption = encryption;
		self
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	/// Check that the settings can authenticate against a relay.
	pub fn validate(&self) -> ConfigResult<()> {
		if self.host.trim().is_empty() {
			return Err(ConfigError::MissingVariable(ENV_HOST.to_string()));
		}
		if self.username.trim().is_empty() {
			return Err(ConfigError::MissingVariable(ENV_USER.to_string()));
		}
		if self.password.trim().is_empty() {
			return Err(ConfigError::MissingVariable(ENV_PASSWORD.to_string()));
		}
		if self.port == 0 {
			return Err(ConfigError::InvalidValue {
				key: ENV_PORT.to_string(),
				value: "0".to_string(),
			});
		}
		// The charset ends up as a Content-Type parameter on every message.
		let content_type = format!("text/plain; charset={}", self.charset);
		if self.charset.trim().is_empty() || ContentType::parse(&content_type).is_err() {
			return Err(ConfigError::InvalidValue {
				key: ENV_CHARSET.to_string(),
				value: self.charset.clone(),
			});
		}
		Ok(())
	}

	pub fn host(&self) -> &str {
		&self.host
	}

	pub fn username(&self) -> &str {
		&self.username
	}

	pub fn password(&self) -> &str {
		&self.password
	}

	pub fn port(&self) -> u16 {
		self.port
	}

	pub fn charset(&self) -> &str {
		&self.charset
	}

	/// Whether the configured charset names UTF-8.
	pub fn is_utf8(&self) -> bool {
		matches!(
			self.charset.to_ascii_lowercase().as_str(),
			"utf-8" | "utf8"
		)
	}

	pub fn encryption(&self) -> Encryption {
		self.encryption
	}

	pub fn timeout(&self) -> Duration {
		self.timeout
	}
}

impl fmt::Debug for TransportConfig {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TransportConfig")
			.field("host", &self.host)
			.field("username", &self.username)
			.field("password", &"[REDACTED]")
			.field("port", &self.port)
			.field("charset", &self.charset)
			.field("encryption", &self.encryption)
			.field("timeout", &self.timeout)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;
	use std::collections::HashMap;

	fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
		let map: HashMap<String, String> = vars
			.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect();
		move |key| map.get(key).cloned()
	}

	fn base_vars() -> Vec<(&'static str, &'static str)> {
		vec![
			(ENV_HOST, "smtp.example.com"),
			(ENV_USER, "mailer@example.com"),
			(ENV_PASSWORD, "hunter2"),
		]
	}

	#[rstest]
	#[case(465, Encryption::Smtps)]
	#[case(587, Encryption::StartTls)]
	#[case(25, Encryption::StartTls)]
	#[case(2525, Encryption::StartTls)]
	#[case(1, Encryption::StartTls)]
	fn test_encryption_for_port(#[case] port: u16, #[case] expected: Encryption) {
		assert_eq!(Encryption::for_port(port), expected);
	}

	#[rstest]
	fn test_from_lookup_defaults() {
		// Arrange
		let lookup = lookup_from(&base_vars());

		// Act
		let config = TransportConfig::from_lookup(lookup).unwrap();

		// Assert
		assert_eq!(config.host(), "smtp.example.com");
		assert_eq!(config.username(), "mailer@example.com");
		assert_eq!(config.password(), "hunter2");
		assert_eq!(config.port(), 465);
		assert_eq!(config.charset(), "UTF-8");
		assert_eq!(config.encryption(), Encryption::Smtps);
		assert_eq!(config.timeout(), Duration::from_secs(30));
	}

	#[rstest]
	fn test_from_lookup_port_and_charset() {
		// Arrange
		let mut vars = base_vars();
		vars.push((ENV_PORT, "587"));
		vars.push((ENV_CHARSET, "ISO-8859-1"));

		// Act
		let config = TransportConfig::from_lookup(lookup_from(&vars)).unwrap();

		// Assert
		assert_eq!(config.port(), 587);
		assert_eq!(config.encryption(), Encryption::StartTls);
		assert_eq!(config.charset(), "ISO-8859-1");
		assert!(!config.is_utf8());
	}

	#[rstest]
	#[case(ENV_HOST)]
	#[case(ENV_USER)]
	#[case(ENV_PASSWORD)]
	fn test_from_lookup_missing_required(#[case] missing: &str) {
		// Arrange
		let vars: Vec<_> = base_vars()
			.into_iter()
			.filter(|(key, _)| *key != missing)
			.collect();

		// Act
		let result = TransportConfig::from_lookup(lookup_from(&vars));

		// Assert
		match result {
			Err(ConfigError::MissingVariable(key)) => assert_eq!(key, missing),
			other => panic!("expected MissingVariable, got {:?}", other),
		}
	}

	#[rstest]
	fn test_from_lookup_empty_host_is_missing() {
		let mut vars = base_vars();
		vars[0] = (ENV_HOST, "  ");

		let result = TransportConfig::from_lookup(lookup_from(&vars));

		assert!(matches!(result, Err(ConfigError::MissingVariable(_))));
	}

	#[rstest]
	#[case("not-a-port")]
	#[case("70000")]
	#[case("0")]
	fn test_from_lookup_invalid_port(#[case] port: &str) {
		let mut vars = base_vars();
		vars.push((ENV_PORT, port));

		let result = TransportConfig::from_lookup(lookup_from(&vars));

		assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
	}

	#[rstest]
	#[case("utf 8")]
	#[case("ISO 8859-1")]
	fn test_from_lookup_invalid_charset(#[case] charset: &str) {
		// Arrange
		let mut vars = base_vars();
		vars.push((ENV_CHARSET, charset));

		// Act
		let result = TransportConfig::from_lookup(lookup_from(&vars));

		// Assert
		match result {
			Err(ConfigError::InvalidValue { key, .. }) => assert_eq!(key, ENV_CHARSET),
			other => panic!("expected InvalidValue, got {:?}", other),
		}
	}

	#[rstest]
	fn test_validate_rejects_malformed_charset() {
		let config = TransportConfig::new("smtp.example.com", 465)
			.with_credentials("mailer@example.com", "hunter2")
			.with_charset("utf 8");

		assert!(matches!(
			config.validate(),
			Err(ConfigError::InvalidValue { ref key, .. }) if key == ENV_CHARSET
		));
	}

	#[rstest]
	fn test_validate_rejects_blank_password() {
		let config = TransportConfig::new("smtp.example.com", 465)
			.with_credentials("mailer@example.com", "   ");

		assert!(matches!(
			config.validate(),
			Err(ConfigError::MissingVariable(ref key)) if key == ENV_PASSWORD
		));
	}

	#[rstest]
	fn test_with_encryption_overrides_port_default() {
		let config =
			TransportConfig::new("smtp.example.com", 2465).with_encryption(Encryption::Smtps);

		assert_eq!(config.encryption(), Encryption::Smtps);
	}

	#[rstest]
	fn test_debug_redacts_password() {
		let config = TransportConfig::new("smtp.example.com", 465)
			.with_credentials("mailer@example.com", "hunter2");

		let rendered = format!("{:?}", config);

		assert!(!rendered.contains("hunter2"));
		assert!(rendered.contains("[REDACTED]"));
	}
}
