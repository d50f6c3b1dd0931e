//! Recipient address resolution
//!
//! Callers describe recipients as a single address, a named address, or a
//! list of either. [`AddressSpec::resolve`] flattens any of these into
//! concrete `(address, display name)` pairs.

use serde::{Deserialize, Deserializer};
use std::fmt;

/// A resolved recipient: the address plus an optional display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddress {
	pub address: String,
	pub name: Option<String>,
}

impl ResolvedAddress {
	pub fn new(address: impl Into<String>, name: Option<String>) -> Self {
		Self {
			address: address.into(),
			name: name.filter(|n| !n.trim().is_empty()),
		}
	}
}

impl fmt::Display for ResolvedAddress {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.name {
			Some(name) => write!(f, "{} <{}>", name, self.address),
			None => f.write_str(&self.address),
		}
	}
}

/// Recipient description accepted by the dispatcher.
///
/// # Examples
///
/// ```
/// use relay_mailer::AddressSpec;
///
/// let spec = AddressSpec::from_pairs([("0", "a@x.com"), ("b@x.com", "Bob")]);
/// let resolved = spec.resolve();
///
/// assert_eq!(resolved[0].address, "a@x.com");
/// assert_eq!(resolved[0].name, None);
/// assert_eq!(resolved[1].address, "b@x.com");
/// assert_eq!(resolved[1].name.as_deref(), Some("Bob"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressSpec {
	Single(String),
	Named { address: String, name: String },
	List(Vec<AddressSpec>),
}

impl AddressSpec {
	pub fn single(address: impl Into<String>) -> Self {
		Self::Single(address.into())
	}

	pub fn named(address: impl Into<String>, name: impl Into<String>) -> Self {
		Self::Named {
			address: address.into(),
			name: name.into(),
		}
	}

	/// An empty list, which resolves to no recipients.
	pub fn empty() -> Self {
		Self::List(Vec::new())
	}

	/// Build a list from key/value pairs.
	///
	/// A key made only of ASCII digits is a positional index: the value is
	/// the address and no display name is given. Any other key is the
	/// address and the value its display name.
	pub fn from_pairs<I, K, V>(pairs: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: AsRef<str>,
		V: Into<String>,
	{
		Self::List(
			pairs
				.into_iter()
				.map(|(key, value)| Self::from_entry(key.as_ref(), value.into()))
				.collect(),
		)
	}

	/// Resolve one mapping entry with the numeric-key rule.
	pub fn from_entry(key: &str, value: String) -> Self {
		if is_index_key(key) {
			Self::Single(value)
		} else {
			Self::Named {
				address: key.to_string(),
				name: value,
			}
		}
	}

	/// Flatten into concrete recipients, in order.
	pub fn resolve(&self) -> Vec<ResolvedAddress> {
		let mut resolved = Vec::new();
		self.resolve_into(&mut resolved);
		resolved
	}

	fn resolve_into(&self, out: &mut Vec<ResolvedAddress>) {
		match self {
			Self::Single(address) => out.push(ResolvedAddress::new(address.trim(), None)),
			Self::Named { address, name } => {
				out.push(ResolvedAddress::new(address.trim(), Some(name.clone())))
			}
			Self::List(items) => {
				for item in items {
					item.resolve_into(out);
				}
			}
		}
	}

	/// Whether this resolves to no recipients at all.
	pub fn is_empty(&self) -> bool {
		match self {
			Self::Single(address) => address.trim().is_empty(),
			Self::Named { address, .. } => address.trim().is_empty(),
			Self::List(items) => items.iter().all(Self::is_empty),
		}
	}
}

impl Default for AddressSpec {
	fn default() -> Self {
		Self::empty()
	}
}

impl From<&str> for AddressSpec {
	fn from(address: &str) -> Self {
		Self::single(address)
	}
}

impl From<String> for AddressSpec {
	fn from(address: String) -> Self {
		Self::Single(address)
	}
}

impl From<(&str, &str)> for AddressSpec {
	fn from((address, name): (&str, &str)) -> Self {
		Self::named(address, name)
	}
}

impl<T: Into<AddressSpec>> From<Vec<T>> for AddressSpec {
	fn from(items: Vec<T>) -> Self {
		Self::List(items.into_iter().map(Into::into).collect())
	}
}

/// Positional keys are made of ASCII digits only.
pub(crate) fn is_index_key(key: &str) -> bool {
	!key.is_empty() && key.bytes().all(|b| b.is_ascii_digit())
}

/// Wire shape of an address spec: a string, a key/value object, or an array.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawAddressSpec {
	One(String),
	Map(indexmap::IndexMap<String, String>),
	Seq(Vec<RawAddressSpec>),
}

impl From<RawAddressSpec> for AddressSpec {
	fn from(raw: RawAddressSpec) -> Self {
		match raw {
			RawAddressSpec::One(address) => Self::Single(address),
			RawAddressSpec::Map(map) => Self::from_pairs(map),
			RawAddressSpec::Seq(items) => Self::List(items.into_iter().map(Into::into).collect()),
		}
	}
}

impl<'de> Deserialize<'de> for AddressSpec {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		RawAddressSpec::deserialize(deserializer).map(Into::into)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	fn test_numeric_key_is_bare_address() {
		// Arrange
		let spec = AddressSpec::from_pairs([("0", "a@x.com")]);

		// Act
		let resolved = spec.resolve();

		// Assert
		assert_eq!(resolved, vec![ResolvedAddress::new("a@x.com", None)]);
	}

	#[rstest]
	fn test_address_key_carries_display_name() {
		let spec = AddressSpec::from_pairs([("a@x.com", "Alice")]);

		let resolved = spec.resolve();

		assert_eq!(resolved.len(), 1);
		assert_eq!(resolved[0].address, "a@x.com");
		assert_eq!(resolved[0].name.as_deref(), Some("Alice"));
	}

	#[rstest]
	#[case("0", true)]
	#[case("17", true)]
	#[case("", false)]
	#[case("a@x.com", false)]
	#[case("1a", false)]
	#[case("-1", false)]
	fn test_is_index_key(#[case] key: &str, #[case] expected: bool) {
		assert_eq!(is_index_key(key), expected);
	}

	#[rstest]
	fn test_empty_display_name_is_dropped() {
		let resolved = AddressSpec::named("a@x.com", "  ").resolve();

		assert_eq!(resolved[0].name, None);
	}

	#[rstest]
	fn test_nested_list_keeps_order() {
		let spec = AddressSpec::List(vec![
			AddressSpec::single("a@x.com"),
			AddressSpec::List(vec![
				AddressSpec::named("b@x.com", "Bob"),
				AddressSpec::single("c@x.com"),
			]),
		]);

		let addresses: Vec<_> = spec.resolve().into_iter().map(|r| r.address).collect();

		assert_eq!(addresses, vec!["a@x.com", "b@x.com", "c@x.com"]);
	}

	#[rstest]
	#[case(AddressSpec::empty(), true)]
	#[case(AddressSpec::single(""), true)]
	#[case(AddressSpec::List(vec![AddressSpec::single(" ")]), true)]
	#[case(AddressSpec::single("a@x.com"), false)]
	fn test_is_empty(#[case] spec: AddressSpec, #[case] expected: bool) {
		assert_eq!(spec.is_empty(), expected);
	}

	#[rstest]
	fn test_deserialize_object_applies_numeric_key_rule() {
		// Arrange
		let json = r#"{"0": "a@x.com", "b@x.com": "Bob", "1": "c@x.com"}"#;

		// Act
		let spec: AddressSpec = serde_json::from_str(json).unwrap();

		// Assert
		assert_eq!(
			spec.resolve(),
			vec![
				ResolvedAddress::new("a@x.com", None),
				ResolvedAddress::new("b@x.com", Some("Bob".to_string())),
				ResolvedAddress::new("c@x.com", None),
			]
		);
	}

	#[rstest]
	fn test_deserialize_string_and_array() {
		let single: AddressSpec = serde_json::from_str(r#""a@x.com""#).unwrap();
		let list: AddressSpec = serde_json::from_str(r#"["a@x.com", {"b@x.com": "Bob"}]"#).unwrap();

		assert_eq!(single, AddressSpec::single("a@x.com"));
		assert_eq!(list.resolve().len(), 2);
		assert_eq!(list.resolve()[1].name.as_deref(), Some("Bob"));
	}

	#[rstest]
	fn test_display_resolved_address() {
		assert_eq!(
			ResolvedAddress::new("a@x.com", Some("Alice".into())).to_string(),
			"Alice <a@x.com>"
		);
		assert_eq!(ResolvedAddress::new("a@x.com", None).to_string(), "a@x.com");
	}
}
