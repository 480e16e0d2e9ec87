//! The descriptor a host reads to learn an activity's slots.

use crate::request::{slot, Method};
use serde::{Deserialize, Serialize};

/// The type of an input or output slot.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    Any,
}

/// One input or output slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    /// The slot name.
    pub name: String,
    /// The value type the slot accepts.
    #[serde(rename = "type")]
    pub slot_type: SlotType,
    /// Whether the host must bind the slot.
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
    /// The only values the slot accepts, if restricted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<String>,
}

impl Attribute {
    /// An optional slot.
    pub fn new(name: &str, slot_type: SlotType) -> Self {
        Self {
            name: name.to_owned(),
            slot_type,
            required: false,
            allowed: Vec::new(),
        }
    }

    /// Mark the slot as required.
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Restrict the slot to a set of values.
    #[must_use]
    pub fn allowed<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = values.into_iter().map(Into::into).collect();
        self
    }
}

/// For `skip_serializing_if`.
#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_false(value: &bool) -> bool {
    !*value
}

/// An activity descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Unique activity name.
    pub name: String,
    /// Descriptor kind, always `flogo:activity` for activities.
    #[serde(rename = "type")]
    pub kind: String,
    /// Import reference of the implementation.
    #[serde(rename = "ref")]
    pub reference: String,
    /// Implementation version.
    pub version: String,
    /// Human-readable title.
    pub title: String,
    /// What the activity does.
    #[serde(default)]
    pub description: String,
    /// Input slots.
    #[serde(default)]
    pub inputs: Vec<Attribute>,
    /// Output slots.
    #[serde(default)]
    pub outputs: Vec<Attribute>,
}

impl Metadata {
    /// The descriptor of [`KeyValueActivity`](crate::KeyValueActivity).
    pub fn key_value() -> Self {
        Self {
            name: "kv-activity".to_owned(),
            kind: "flogo:activity".to_owned(),
            reference: env!("CARGO_PKG_NAME").to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            title: "Key/Value".to_owned(),
            description: "Insert, upsert, remove or get a document in a bucket".to_owned(),
            inputs: vec![
                Attribute::new(slot::KEY, SlotType::String).required(),
                Attribute::new(slot::DATA, SlotType::Any),
                Attribute::new(slot::METHOD, SlotType::String)
                    .required()
                    .allowed(Method::ALL.map(Method::as_str)),
                Attribute::new(slot::EXPIRY, SlotType::Integer),
                Attribute::new(slot::SERVER, SlotType::String).required(),
                Attribute::new(slot::USERNAME, SlotType::String).required(),
                Attribute::new(slot::PASSWORD, SlotType::String).required(),
                Attribute::new(slot::BUCKET, SlotType::String).required(),
                Attribute::new(slot::BUCKET_PASSWORD, SlotType::String),
            ],
            outputs: vec![Attribute::new(slot::OUTPUT, SlotType::Any)],
        }
    }

    /// Parse a descriptor from JSON.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Render the descriptor as pretty-printed JSON.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// The input slot called `name`.
    pub fn input(&self, name: &str) -> Option<&Attribute> {
        self.inputs.iter().find(|attribute| attribute.name == name)
    }

    /// The output slot called `name`.
    pub fn output(&self, name: &str) -> Option<&Attribute> {
        self.outputs.iter().find(|attribute| attribute.name == name)
    }
}
