//! Lossless-enough mapping from msgpack values to [`serde_json::Value`].
//!
//! `serde_json::Value` rejects two things msgpack peers send routinely:
//! extension values (the engine uses them for buffer/window handles) and
//! binary strings. This visitor folds handles into their integer payload and
//! binary strings into UTF-8 (lossy).

use std::fmt;

use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde_json::{Map, Number, Value};

/// Decoded msgpack value.
pub(crate) struct WireValue(pub Value);

impl<'de> Deserialize<'de> for WireValue {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		deserializer.deserialize_any(WireVisitor).map(WireValue)
	}
}

struct WireVisitor;

impl<'de> Visitor<'de> for WireVisitor {
	type Value = Value;

	fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("a msgpack value")
	}

	fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
		Ok(Value::Bool(v))
	}

	fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
		Ok(Value::from(v))
	}

	fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
		Ok(Value::from(v))
	}

	fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
		Ok(Number::from_f64(v).map_or(Value::Null, Value::Number))
	}

	fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
		Ok(Value::String(v.to_owned()))
	}

	fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
		Ok(Value::String(v))
	}

	fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Value, E> {
		Ok(Value::String(String::from_utf8_lossy(v).into_owned()))
	}

	fn visit_none<E: de::Error>(self) -> Result<Value, E> {
		Ok(Value::Null)
	}

	fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
		Ok(Value::Null)
	}

	fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
		deserializer.deserialize_any(self)
	}

	fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
		let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(4096));
		while let Some(WireValue(item)) = seq.next_element()? {
			items.push(item);
		}
		Ok(Value::Array(items))
	}

	fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
		let mut out = Map::new();
		while let Some((WireValue(key), WireValue(value))) = map.next_entry()? {
			let key = match key {
				Value::String(s) => s,
				other => other.to_string(),
			};
			out.insert(key, value);
		}
		Ok(Value::Object(out))
	}

	/// rmp-serde hands extension values over as a newtype wrapping `(tag, data)`.
	fn visit_newtype_struct<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
		let (tag, ExtData(data)) = <(i8, ExtData)>::deserialize(deserializer)?;
		match rmp_serde::from_slice::<i64>(&data) {
			Ok(handle) => Ok(Value::from(handle)),
			Err(_) => {
				tracing::trace!(tag, len = data.len(), "opaque msgpack extension value");
				Ok(Value::Array(data.into_iter().map(Value::from).collect()))
			}
		}
	}
}

/// Raw payload of an extension value.
struct ExtData(Vec<u8>);

impl<'de> Deserialize<'de> for ExtData {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		struct BytesVisitor;

		impl<'de> Visitor<'de> for BytesVisitor {
			type Value = Vec<u8>;

			fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				f.write_str("extension payload bytes")
			}

			fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Vec<u8>, E> {
				Ok(v.to_vec())
			}

			fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Vec<u8>, E> {
				Ok(v)
			}

			fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<u8>, A::Error> {
				let mut out = Vec::new();
				while let Some(byte) = seq.next_element::<u8>()? {
					out.push(byte);
				}
				Ok(out)
			}
		}

		deserializer.deserialize_bytes(BytesVisitor).map(ExtData)
	}
}
