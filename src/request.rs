//! Typed, validated operation requests built from host input slots.

use crate::context::ActivityContext;
use crate::document::{Cas, Document, Expiry};
use crate::error::{Error, Result};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Names of the input and output slots.
pub mod slot {
    /// Document key.
    pub const KEY: &str = "key";
    /// Document value.
    pub const DATA: &str = "data";
    /// Operation to perform.
    pub const METHOD: &str = "method";
    /// Time-to-live in seconds.
    pub const EXPIRY: &str = "expiry";
    /// Cluster address.
    pub const SERVER: &str = "server";
    /// Cluster user.
    pub const USERNAME: &str = "username";
    /// Cluster password.
    pub const PASSWORD: &str = "password";
    /// Bucket name.
    pub const BUCKET: &str = "bucket";
    /// Bucket password.
    pub const BUCKET_PASSWORD: &str = "bucketPassword";
    /// The single output slot.
    pub const OUTPUT: &str = "output";
}

/// Longest key accepted, in bytes.
pub const MAX_KEY_LEN: usize = 250;

/// The key/value primitive to invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Create a document; fail if the key exists.
    Insert,
    /// Create or overwrite a document.
    Upsert,
    /// Delete a document; fail if the key does not exist.
    Remove,
    /// Read a document; fail if the key does not exist.
    Get,
}

impl Method {
    /// Every method, in declaration order.
    pub const ALL: [Self; 4] = [Self::Insert, Self::Upsert, Self::Remove, Self::Get];

    /// The method name as it appears in the `method` slot.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "Insert",
            Self::Upsert => "Upsert",
            Self::Remove => "Remove",
            Self::Get => "Get",
        }
    }

    /// Whether the method writes a document value.
    pub const fn writes_value(self) -> bool {
        matches!(self, Self::Insert | Self::Upsert)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|method| method.as_str() == s)
            .ok_or_else(|| Error::UnsupportedMethod(s.to_owned()))
    }
}

/// A username and password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// The user name.
    pub username: String,
    /// The password, in clear text.
    pub password: String,
}

impl Credentials {
    /// Pair a username with a password.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One key/value operation, fully validated.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    /// The operation to perform.
    pub method: Method,
    /// The document key.
    pub key: String,
    /// The value to write. Always present for `Insert` and `Upsert`.
    pub data: Option<Value>,
    /// The document's lifetime. Only meaningful for `Insert` and `Upsert`.
    pub expiry: Expiry,
    /// The cluster address.
    pub server: String,
    /// The cluster credentials.
    pub credentials: Credentials,
    /// The bucket to operate on.
    pub bucket: String,
    /// The bucket password; empty when the bucket has none.
    pub bucket_password: String,
}

impl OperationRequest {
    /// Build a request from the input slots of `context`.
    ///
    /// The method is checked first, so an unknown method is reported even when other slots are
    /// also wrong. Slots of the wrong type are rejected rather than defaulted.
    pub fn from_context(context: &dyn ActivityContext) -> Result<Self> {
        let method: Method = required_str(context, slot::METHOD)?.parse()?;

        let key = required_str(context, slot::KEY)?.to_owned();
        validate_key(&key)?;

        let data = match context.input(slot::DATA) {
            Some(value) => Some(value.clone()),
            None if method.writes_value() => {
                return Err(Error::invalid_input(
                    slot::DATA,
                    format!("required by {method}"),
                ))
            }
            None => None,
        };

        let expiry = match context.input(slot::EXPIRY) {
            None | Some(Value::Null) => Expiry::NEVER,
            Some(value) => {
                let secs = value
                    .as_u64()
                    .ok_or_else(|| {
                        Error::invalid_input(slot::EXPIRY, "expected a non-negative integer")
                    })?
                    .try_into()
                    .map_err(|_| Error::invalid_input(slot::EXPIRY, "out of range"))?;
                Expiry::from_secs(secs)
            }
        };

        Ok(Self {
            method,
            key,
            data,
            expiry,
            server: required_str(context, slot::SERVER)?.to_owned(),
            credentials: Credentials::new(
                required_str(context, slot::USERNAME)?,
                required_str(context, slot::PASSWORD)?,
            ),
            bucket: required_str(context, slot::BUCKET)?.to_owned(),
            bucket_password: optional_str(context, slot::BUCKET_PASSWORD)?
                .unwrap_or_default()
                .to_owned(),
        })
    }
}

/// The value produced by a successful operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult {
    /// A change token for mutations, or the document for `Get`.
    pub value: Value,
}

impl From<Cas> for OperationResult {
    fn from(cas: Cas) -> Self {
        Self { value: cas.into() }
    }
}

impl From<Document> for OperationResult {
    fn from(document: Document) -> Self {
        Self {
            value: document.value,
        }
    }
}

/// Reject keys the cluster cannot store.
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::invalid_input(slot::KEY, "must not be empty"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(Error::invalid_input(
            slot::KEY,
            format!("longer than {MAX_KEY_LEN} bytes"),
        ));
    }
    Ok(())
}

/// A string slot that must be bound.
fn required_str<'a>(context: &'a dyn ActivityContext, name: &'static str) -> Result<&'a str> {
    optional_str(context, name)?.ok_or_else(|| Error::invalid_input(name, "missing"))
}

/// A string slot that may be unbound or null.
fn optional_str<'a>(
    context: &'a dyn ActivityContext,
    name: &'static str,
) -> Result<Option<&'a str>> {
    match context.input(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value)),
        Some(other) => Err(Error::invalid_input(
            name,
            format!("expected a string, got {}", json_type(other)),
        )),
    }
}

/// The JSON type name of a value, for error messages.
const fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
