// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The byte codec between cached values and the tiers.
//!
//! Both tiers store bytes. A [`Serializer`] turns a value into bytes on the way in and
//! back into a value on the way out; the cache never looks inside the bytes.

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Describes how a value was encoded. Passed back to the serializer unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SerializationMetadata {
    /// Format name, such as `"json"`.
    pub format: String,
    /// Codec-specific annotations.
    pub extra: BTreeMap<String, String>,
}

impl SerializationMetadata {
    /// Metadata naming only the format.
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            extra: BTreeMap::new(),
        }
    }
}

/// The output of [`Serializer::serialize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedValue {
    /// The encoded value.
    pub bytes: Bytes,
    /// How it was encoded.
    pub metadata: SerializationMetadata,
}

/// A value could not be encoded or decoded.
#[derive(Debug, Clone, thiserror::Error)]
#[error("serialization failed: {message}")]
pub struct SerializationError {
    message: String,
    #[source]
    source: Option<Arc<dyn StdError + Send + Sync>>,
}

impl SerializationError {
    /// Creates an error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an error caused by `source`.
    pub fn with_source(message: impl Into<String>, source: impl StdError + Send + Sync + 'static) -> Self {
        Self {
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// Human-readable description of the failure.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Converts values of type `V` to bytes and back.
pub trait Serializer<V>: Send + Sync + 'static {
    /// Encodes `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be represented.
    fn serialize(&self, value: &V) -> Result<SerializedValue, SerializationError>;

    /// Decodes bytes produced by [`serialize`](Self::serialize).
    ///
    /// `metadata` is `None` when the bytes came from a tier that does not keep it.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid encoding.
    fn deserialize(&self, bytes: &[u8], metadata: Option<&SerializationMetadata>) -> Result<V, SerializationError>;
}

/// Encodes values as JSON through `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl<V> Serializer<V> for JsonSerializer
where
    V: Serialize + DeserializeOwned,
{
    fn serialize(&self, value: &V) -> Result<SerializedValue, SerializationError> {
        let bytes = serde_json::to_vec(value).map_err(|e| SerializationError::with_source("cannot encode value as json", e))?;
        Ok(SerializedValue {
            bytes: Bytes::from(bytes),
            metadata: SerializationMetadata::new("json"),
        })
    }

    fn deserialize(&self, bytes: &[u8], _metadata: Option<&SerializationMetadata>) -> Result<V, SerializationError> {
        serde_json::from_slice(bytes).map_err(|e| SerializationError::with_source("cannot decode json value", e))
    }
}

/// Adapts a pair of closures into a [`Serializer`].
///
/// # Examples
///
/// ```
/// use strata::{FnSerializer, SerializationError, Serializer};
///
/// let codec = FnSerializer::new(
///     |value: &String| Ok(value.clone().into_bytes()),
///     |bytes: &[u8]| String::from_utf8(bytes.to_vec()).map_err(|e| SerializationError::with_source("not utf-8", e)),
/// );
/// let encoded = codec.serialize(&"hello".to_owned()).unwrap();
/// assert_eq!(codec.deserialize(&encoded.bytes, None).unwrap(), "hello");
/// ```
pub struct FnSerializer<V, E, D> {
    encode: E,
    decode: D,
    _value: PhantomData<fn() -> V>,
}

impl<V, E, D> FnSerializer<V, E, D>
where
    E: Fn(&V) -> Result<Vec<u8>, SerializationError>,
    D: Fn(&[u8]) -> Result<V, SerializationError>,
{
    /// Creates a serializer from an encoder and a decoder.
    pub fn new(encode: E, decode: D) -> Self {
        Self {
            encode,
            decode,
            _value: PhantomData,
        }
    }
}

impl<V, E, D> std::fmt::Debug for FnSerializer<V, E, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnSerializer").finish_non_exhaustive()
    }
}

impl<V, E, D> Serializer<V> for FnSerializer<V, E, D>
where
    V: 'static,
    E: Fn(&V) -> Result<Vec<u8>, SerializationError> + Send + Sync + 'static,
    D: Fn(&[u8]) -> Result<V, SerializationError> + Send + Sync + 'static,
{
    fn serialize(&self, value: &V) -> Result<SerializedValue, SerializationError> {
        Ok(SerializedValue {
            bytes: Bytes::from((self.encode)(value)?),
            metadata: SerializationMetadata::new("custom"),
        })
    }

    fn deserialize(&self, bytes: &[u8], _metadata: Option<&SerializationMetadata>) -> Result<V, SerializationError> {
        (self.decode)(bytes)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct User {
        id: u32,
        name: String,
    }

    static_assertions::assert_impl_all!(JsonSerializer: Serializer<User>, Send, Sync);
    static_assertions::assert_impl_all!(SerializationError: Clone, Send, Sync);

    #[test]
    fn json_tags_format() {
        let user = User {
            id: 1,
            name: "ada".to_owned(),
        };
        let encoded = JsonSerializer.serialize(&user).unwrap();
        assert_eq!(encoded.metadata.format, "json");
        assert_eq!(&encoded.bytes[..], br#"{"id":1,"name":"ada"}"#);

        let decoded: User = JsonSerializer.deserialize(&encoded.bytes, Some(&encoded.metadata)).unwrap();
        assert_eq!(decoded, user);
    }

    #[test]
    fn json_rejects_garbage() {
        let err = <JsonSerializer as Serializer<User>>::deserialize(&JsonSerializer, b"not json", None).unwrap_err();
        assert_eq!(err.message(), "cannot decode json value");
        assert!(std::error::Error::source(&err).is_some());
    }
}
