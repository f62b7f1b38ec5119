use std::sync::Arc;

use serde_derive::Serialize;

use crate::error::SerializationError;
use crate::value::Kind;
use crate::value::Value;

/// An addressed, typed message: a source/target/type header plus an
/// ordered list of [`Value`]s.
///
/// Values are held behind `Arc` so [`Container::copy`] with `deep: false`
/// can share them with the original instead of duplicating payloads — a
/// copy-on-write contract. Handlers must not mutate a shared container;
/// take a deep copy first.
///
/// `Serialize` (via serde's `rc` feature, to serialize through the `Arc`
/// wrapper) is for diagnostic JSON dumps — logging a container in a
/// human-readable form — never for the wire; [`Container::serialize`] is
/// the only format peers round-trip through.
#[derive(Clone, Debug, Serialize)]
pub struct Container {
    source_id: u64,
    source_sub_id: u32,
    target_id: u64,
    target_sub_id: u32,
    message_type: String,
    values: Vec<Arc<Value>>,
}

impl PartialEq for Container {
    fn eq(&self, other: &Self) -> bool {
        self.source_id == other.source_id
            && self.source_sub_id == other.source_sub_id
            && self.target_id == other.target_id
            && self.target_sub_id == other.target_sub_id
            && self.message_type == other.message_type
            && self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(other.values.iter())
                .all(|(a, b)| **a == **b)
    }
}

impl Eq for Container {}

impl Container {
    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::default()
    }

    pub fn source_id(&self) -> u64 {
        self.source_id
    }

    pub fn source_sub_id(&self) -> u32 {
        self.source_sub_id
    }

    pub fn target_id(&self) -> u64 {
        self.target_id
    }

    pub fn target_sub_id(&self) -> u32 {
        self.target_sub_id
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    /// The first value named `name`, if any.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.iter().map(AsRef::as_ref).find(|v| v.name() == name)
    }

    /// Every value named `name`, in insertion order.
    pub fn values(&self, name: &str) -> Vec<&Value> {
        self.values
            .iter()
            .map(AsRef::as_ref)
            .filter(|v| v.name() == name)
            .collect()
    }

    /// All values, in insertion (and serialization) order.
    pub fn all(&self) -> impl Iterator<Item = &Value> {
        self.values.iter().map(AsRef::as_ref)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Exchanges source and target (id and sub-id pairs). Its own inverse:
    /// calling it twice restores the original header.
    pub fn swap_header(&mut self) {
        std::mem::swap(&mut self.source_id, &mut self.target_id);
        std::mem::swap(&mut self.source_sub_id, &mut self.target_sub_id);
    }

    /// Duplicates this container. With `deep: false` the returned
    /// container shares its values' underlying storage with `self`
    /// (cheap, copy-on-write); with `deep: true` every value is fully
    /// duplicated so the copies can diverge independently.
    pub fn copy(&self, deep: bool) -> Container {
        let values = if deep {
            self.values
                .iter()
                .map(|v| Arc::new((**v).clone()))
                .collect()
        } else {
            self.values.clone()
        };
        Container {
            source_id: self.source_id,
            source_sub_id: self.source_sub_id,
            target_id: self.target_id,
            target_sub_id: self.target_sub_id,
            message_type: self.message_type.clone(),
            values,
        }
    }

    /// The routing key the topic router uses: an explicit `topic` string
    /// value if one was attached, otherwise `message_type`.
    pub fn routing_topic(&self) -> &str {
        match self.get("topic") {
            Some(v) if v.kind() == Kind::String => v.as_str().unwrap_or(&self.message_type),
            _ => &self.message_type,
        }
    }

    /// Encodes this container to its bit-exact binary wire format.
    ///
    /// Layout: `source_id:u64le source_sub_id:u32le target_id:u64le
    /// target_sub_id:u32le message_type:(len:u32le, utf8 bytes)
    /// value_count:u32le [value]*`, where each value is
    /// `name:(len:u32le, utf8 bytes) kind:u8 payload:(len:u32le, bytes)`.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + self.message_type.len());
        out.extend_from_slice(&self.source_id.to_le_bytes());
        out.extend_from_slice(&self.source_sub_id.to_le_bytes());
        out.extend_from_slice(&self.target_id.to_le_bytes());
        out.extend_from_slice(&self.target_sub_id.to_le_bytes());
        write_length_prefixed(&mut out, self.message_type.as_bytes());
        out.extend_from_slice(&(self.values.len() as u32).to_le_bytes());
        for value in &self.values {
            write_length_prefixed(&mut out, value.name().as_bytes());
            out.push(value.kind().tag());
            write_length_prefixed(&mut out, value.raw_payload());
        }
        out
    }

    /// Decodes a container previously produced by [`Container::serialize`].
    /// Never panics on malformed input — always returns a typed error.
    pub fn deserialize(bytes: &[u8]) -> Result<Container, SerializationError> {
        let mut cursor = Cursor::new(bytes);
        let source_id = cursor.read_u64()?;
        let source_sub_id = cursor.read_u32()?;
        let target_id = cursor.read_u64()?;
        let target_sub_id = cursor.read_u32()?;
        let message_type_bytes = cursor.read_length_prefixed()?;
        let message_type = String::from_utf8(message_type_bytes.to_vec())
            .map_err(|_| SerializationError::InvalidMessageType)?;
        let value_count = cursor.read_u32()? as usize;
        let mut values = Vec::with_capacity(value_count);
        for _ in 0..value_count {
            let name_bytes = cursor.read_length_prefixed()?;
            let name =
                String::from_utf8(name_bytes.to_vec()).map_err(|_| SerializationError::InvalidName)?;
            let tag = cursor.read_u8()?;
            let kind = Kind::from_tag(tag)?;
            let payload = cursor.read_length_prefixed()?.to_vec();
            if kind == Kind::String && std::str::from_utf8(&payload).is_err() {
                return Err(SerializationError::InvalidStringPayload);
            }
            values.push(Arc::new(Value::from_parts(name, kind, payload)));
        }
        if !cursor.is_empty() {
            return Err(SerializationError::TrailingBytes(cursor.remaining()));
        }
        Ok(Container {
            source_id,
            source_sub_id,
            target_id,
            target_sub_id,
            message_type,
            values,
        })
    }
}

fn write_length_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SerializationError> {
        if self.remaining() < n {
            return Err(SerializationError::Truncated {
                expected: n,
                found: self.remaining(),
            });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, SerializationError> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32, SerializationError> {
        let raw: [u8; 4] = self.take(4)?.try_into().expect("checked length");
        Ok(u32::from_le_bytes(raw))
    }

    fn read_u64(&mut self) -> Result<u64, SerializationError> {
        let raw: [u8; 8] = self.take(8)?.try_into().expect("checked length");
        Ok(u64::from_le_bytes(raw))
    }

    fn read_length_prefixed(&mut self) -> Result<&'a [u8], SerializationError> {
        let len = self.read_u32()?;
        if len as usize > self.remaining() {
            return Err(SerializationError::LengthOutOfRange(len));
        }
        self.take(len as usize)
    }
}

/// Builds a [`Container`] fluently: `Container::builder().source(a, b)
/// .target(c, d).message_type(t).add(value)...build()`.
#[derive(Default)]
pub struct ContainerBuilder {
    source_id: u64,
    source_sub_id: u32,
    target_id: u64,
    target_sub_id: u32,
    message_type: String,
    values: Vec<Arc<Value>>,
}

impl ContainerBuilder {
    pub fn source(mut self, id: u64, sub_id: u32) -> Self {
        self.source_id = id;
        self.source_sub_id = sub_id;
        self
    }

    pub fn target(mut self, id: u64, sub_id: u32) -> Self {
        self.target_id = id;
        self.target_sub_id = sub_id;
        self
    }

    pub fn message_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = message_type.into();
        self
    }

    pub fn add(mut self, value: Value) -> Self {
        self.values.push(Arc::new(value));
        self
    }

    pub fn build(self) -> Container {
        Container {
            source_id: self.source_id,
            source_sub_id: self.source_sub_id,
            target_id: self.target_id,
            target_sub_id: self.target_sub_id,
            message_type: self.message_type,
            values: self.values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Container {
        Container::builder()
            .source(1, 0)
            .target(2, 5)
            .message_type("user.created")
            .add(Value::string("name", "alice"))
            .add(Value::u64("age", 31))
            .add(Value::bytes("blob", (0u8..=255).collect::<Vec<u8>>()))
            .add(Value::null("nothing"))
            .add(Value::bool("active", true))
            .build()
    }

    #[test]
    fn round_trips_exactly() {
        let c = sample();
        let bytes = c.serialize();
        let back = Container::deserialize(&bytes).expect("decodes");
        assert_eq!(c, back);
    }

    #[test]
    fn round_trips_nested_container() {
        let inner = sample();
        let outer = Container::builder()
            .source(9, 0)
            .target(10, 0)
            .message_type("wrapper")
            .add(Value::container("inner", &inner))
            .build();
        let bytes = outer.serialize();
        let back = Container::deserialize(&bytes).expect("decodes");
        assert_eq!(outer, back);
        let decoded_inner = back.get("inner").unwrap().as_container().unwrap();
        assert_eq!(decoded_inner, inner);
    }

    #[test]
    fn empty_container_round_trips() {
        let c = Container::builder().message_type("ping").build();
        let bytes = c.serialize();
        let back = Container::deserialize(&bytes).unwrap();
        assert_eq!(c, back);
        assert!(back.is_empty());
    }

    #[test]
    fn swap_header_is_its_own_inverse() {
        let mut c = sample();
        let before = c.clone();
        c.swap_header();
        assert_ne!(c, before);
        c.swap_header();
        assert_eq!(c, before);
    }

    #[test]
    fn deep_copy_is_independent_and_idempotent() {
        let c = sample();
        let deep1 = c.copy(true);
        let deep2 = deep1.copy(true);
        assert_eq!(c, deep1);
        assert_eq!(deep1, deep2);
    }

    #[test]
    fn get_returns_first_match_values_returns_all() {
        let c = Container::builder()
            .message_type("t")
            .add(Value::i32("x", 1))
            .add(Value::i32("x", 2))
            .build();
        assert_eq!(c.get("x").unwrap().as_i32().unwrap(), 1);
        let all = c.values("x");
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].as_i32().unwrap(), 2);
    }

    #[test]
    fn truncated_input_is_an_error_not_a_panic() {
        let bytes = vec![1, 2, 3];
        let err = Container::deserialize(&bytes).unwrap_err();
        assert!(matches!(err, SerializationError::Truncated { .. }));
    }

    #[test]
    fn unknown_kind_tag_is_an_error() {
        let mut c = sample().serialize();
        // flip the first value's kind tag to something unused.
        // header is 8+4+8+4 = 24 bytes + message_type prefix+bytes.
        let mt_len = u32::from_le_bytes(c[24..28].try_into().unwrap()) as usize;
        let values_start = 24 + 4 + mt_len + 4; // + value_count
        let first_name_len =
            u32::from_le_bytes(c[values_start..values_start + 4].try_into().unwrap()) as usize;
        let tag_pos = values_start + 4 + first_name_len;
        c[tag_pos] = b'z';
        let err = Container::deserialize(&c).unwrap_err();
        assert!(matches!(err, SerializationError::UnknownKind(b'z')));
    }

    #[test]
    fn serializes_to_diagnostic_json() {
        let c = sample();
        let json = serde_json::to_value(&c).expect("container serializes to json");
        assert_eq!(json["message_type"], "user.created");
        assert_eq!(json["values"].as_array().unwrap().len(), c.len());
    }

    #[test]
    fn routing_topic_prefers_explicit_topic_value() {
        let c = Container::builder()
            .message_type("user.created")
            .add(Value::string("topic", "user.created.v2"))
            .build();
        assert_eq!(c.routing_topic(), "user.created.v2");

        let c2 = Container::builder().message_type("user.created").build();
        assert_eq!(c2.routing_topic(), "user.created");
    }
}
