//! Encode/decode capability for remote cell values.
//!
//! A remote cell never stores structured data directly, only the string a
//! [`Codec`] produces for it. Codecs must be injective:
//! `decode(encode(x)) == x` for every value.

use std::fmt;
use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::ResultExt;

use crate::error::CodecError;
use crate::error::JsonSnafu;

/// Converts values of `T` to and from their stored string form.
pub trait Codec<T>: Send + Sync {
    /// Encode a value for storage.
    fn encode(&self, value: &T) -> Result<String, CodecError>;

    /// Decode a stored value.
    fn decode(&self, raw: &str) -> Result<T, CodecError>;
}

/// JSON codec for any serde type.
///
/// Tagged enums should carry `#[serde(tag = "kind")]` so the stored form
/// names its variant explicitly.
pub struct JsonCodec<T>(PhantomData<fn() -> T>);

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<T: Serialize + DeserializeOwned> Codec<T> for JsonCodec<T> {
    fn encode(&self, value: &T) -> Result<String, CodecError> {
        serde_json::to_string(value).context(JsonSnafu)
    }

    fn decode(&self, raw: &str) -> Result<T, CodecError> {
        serde_json::from_str(raw).context(JsonSnafu)
    }
}

/// Identity codec for plain string payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringCodec;

impl Codec<String> for StringCodec {
    fn encode(&self, value: &String) -> Result<String, CodecError> {
        Ok(value.clone())
    }

    fn decode(&self, raw: &str) -> Result<String, CodecError> {
        Ok(raw.to_string())
    }
}
