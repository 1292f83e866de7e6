//! Message body serializers.
//!
//! A [`BodySerializer`] turns the raw bytes of a message into the payload type
//! a handler works with. Registrations use [`JsonSerializer`] unless they
//! supply their own strategy.
//!
//! Serializers are pure: they never perform I/O, and they report every failure
//! as a [`DeserializationError`] instead of panicking.
//!
//! ```rust,ignore
//! use conduit_core::serializer::{BodySerializer, serializer_fn};
//!
//! // A legacy wire format: "<order id>;<amount>"
//! let legacy = serializer_fn(|body: &[u8]| {
//!     let text = std::str::from_utf8(body)
//!         .map_err(|e| DeserializationError::new::<Order>(e.to_string()))?;
//!     parse_legacy_order(text)
//! });
//! ```

use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{DeserializationError, DeserializeResult};

/// A strategy for deserializing message bodies into `M`.
pub trait BodySerializer<M>: Send + Sync {
    /// Attempts to deserialize `body` into a message of type `M`.
    fn deserialize(&self, body: &[u8]) -> DeserializeResult<M>;
}

// ============================================================================
// JsonSerializer
// ============================================================================

/// The default, contract-based serializer backed by `serde_json`.
///
/// A body matches when it is valid JSON and carries every field `M` requires.
/// Unknown fields are ignored unless `M` itself denies them.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer {
    objects_only: bool,
}

impl JsonSerializer {
    /// Creates the default lenient serializer.
    pub const fn new() -> Self {
        Self {
            objects_only: false,
        }
    }

    /// Creates a serializer that only accepts JSON objects at the top level.
    ///
    /// Scalars and arrays are rejected before `M` is consulted, so a body like
    /// `42` never matches a newtype payload.
    pub const fn strict() -> Self {
        Self { objects_only: true }
    }
}

impl<M> BodySerializer<M> for JsonSerializer
where
    M: DeserializeOwned,
{
    fn deserialize(&self, body: &[u8]) -> DeserializeResult<M> {
        if !self.objects_only {
            return serde_json::from_slice(body).map_err(DeserializationError::json::<M>);
        }

        match serde_json::from_slice::<Value>(body) {
            Ok(value @ Value::Object(_)) => {
                serde_json::from_value(value).map_err(DeserializationError::json::<M>)
            }
            Ok(other) => Err(DeserializationError::new::<M>(format!(
                "expected a JSON object, found {}",
                json_kind(&other)
            ))),
            Err(e) => Err(DeserializationError::json::<M>(e)),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ============================================================================
// Closure serializers
// ============================================================================

/// A serializer backed by a closure. Created by [`serializer_fn`].
pub struct SerializerFn<F, M> {
    f: F,
    _marker: PhantomData<fn() -> M>,
}

impl<F: Clone, M> Clone for SerializerFn<F, M> {
    fn clone(&self) -> Self {
        Self {
            f: self.f.clone(),
            _marker: PhantomData,
        }
    }
}

impl<F, M> fmt::Debug for SerializerFn<F, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializerFn")
            .field("target", &std::any::type_name::<M>())
            .finish()
    }
}

impl<F, M> BodySerializer<M> for SerializerFn<F, M>
where
    F: Fn(&[u8]) -> DeserializeResult<M> + Send + Sync,
{
    fn deserialize(&self, body: &[u8]) -> DeserializeResult<M> {
        (self.f)(body)
    }
}

/// Wraps a closure as a [`BodySerializer`].
pub fn serializer_fn<F, M>(f: F) -> SerializerFn<F, M>
where
    F: Fn(&[u8]) -> DeserializeResult<M> + Send + Sync,
{
    SerializerFn {
        f,
        _marker: PhantomData,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Order {
        order_id: u64,
        #[serde(default)]
        amount: u64,
    }

    #[derive(Debug, PartialEq, Deserialize)]
    struct Quantity(u32);

    #[test]
    fn test_json_matches_contract() {
        let order: Order = JsonSerializer::new()
            .deserialize(br#"{"orderId":1,"customer":"ignored"}"#)
            .unwrap();
        assert_eq!(
            order,
            Order {
                order_id: 1,
                amount: 0
            }
        );
    }

    #[test]
    fn test_json_rejects_missing_required_field() {
        let result: DeserializeResult<Order> = JsonSerializer::new().deserialize(br#"{"amount":50}"#);
        let err = result.unwrap_err();
        assert!(err.reason.contains("orderId"));
        assert!(err.target.ends_with("Order"));
    }

    #[test]
    fn test_json_rejects_malformed_body() {
        let result: DeserializeResult<Order> = JsonSerializer::new().deserialize(b"<order/>");
        assert!(result.is_err());
    }

    #[test]
    fn test_strict_rejects_scalars() {
        let lenient: DeserializeResult<Quantity> = JsonSerializer::new().deserialize(b"42");
        assert_eq!(lenient.unwrap(), Quantity(42));

        let strict: DeserializeResult<Quantity> = JsonSerializer::strict().deserialize(b"42");
        let err = strict.unwrap_err();
        assert!(err.reason.contains("expected a JSON object, found a number"));
    }

    #[test]
    fn test_serializer_fn() {
        let csv = serializer_fn(|body: &[u8]| {
            let text = std::str::from_utf8(body)
                .map_err(|e| DeserializationError::new::<Order>(e.to_string()))?;
            let (id, amount) = text
                .split_once(';')
                .ok_or_else(|| DeserializationError::new::<Order>("missing ';'"))?;
            Ok(Order {
                order_id: id.parse().map_err(|_| DeserializationError::new::<Order>("bad id"))?,
                amount: amount
                    .parse()
                    .map_err(|_| DeserializationError::new::<Order>("bad amount"))?,
            })
        });

        assert_eq!(
            csv.deserialize(b"7;120").unwrap(),
            Order {
                order_id: 7,
                amount: 120
            }
        );
        assert!(csv.deserialize(b"7").is_err());
    }
}
