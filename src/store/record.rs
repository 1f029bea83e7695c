//! Raw records returned by batch reads.

use crate::durable::Item;

/// A record as the backend holds it, before decoding.
///
/// Batch reads hand these back so callers can decode only what they need.
/// Each backend's `decode_value` accepts its own variant and rejects the
/// other one.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRecord {
    /// Serialized JSON from the in-memory backend.
    Memory { key: String, json: Vec<u8> },
    /// A provider-native attribute map from the durable backend.
    Attributes(Item),
}

impl RawRecord {
    /// Name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            RawRecord::Memory { .. } => "in-memory record",
            RawRecord::Attributes(_) => "attribute map",
        }
    }
}
