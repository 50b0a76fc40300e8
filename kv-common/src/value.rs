//! # Record Value
//!
//! The five-field record stored under each key, plus the `Key` alias used
//! throughout the engine and codec crates.

/// A non-empty string naming one record. Equality is by-value; the tree
/// engine additionally orders keys lexicographically.
pub type Key = String;

/// The record stored under a [`Key`].
///
/// Text fields carry no validation beyond parsing; the external codec (see
/// `kv-codec`) is responsible for quoting fields that contain spaces.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Value {
    /// Last name.
    pub lastname: String,
    /// First name.
    pub name: String,
    /// Birth year.
    pub birth_year: i64,
    /// City of residence.
    pub city: String,
    /// Coin balance.
    pub coins: i64,
}

impl Value {
    /// Builds a value from its five fields.
    pub fn new(
        lastname: impl Into<String>,
        name: impl Into<String>,
        birth_year: i64,
        city: impl Into<String>,
        coins: i64,
    ) -> Self {
        Value {
            lastname: lastname.into(),
            name: name.into(),
            birth_year,
            city: city.into(),
            coins,
        }
    }
}
