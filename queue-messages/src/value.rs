use std::fmt;

use serde_derive::Serialize;

use crate::container::Container;
use crate::error::SerializationError;
use crate::error::TypeMismatch;

/// The kind of a [`Value`]'s payload.
///
/// Each variant maps to a single ASCII wire tag byte (`'0'..'9'`, `'a'..'e'`)
/// per spec; the tag is what travels on the wire, not the variant's
/// discriminant, so reordering this enum never changes wire compatibility.
/// `Serialize` here is for diagnostic JSON dumps only — the binary wire
/// format in [`crate::Container::serialize`] is the one format peers
/// actually round-trip through.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Kind {
    Null,
    Bool,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    I128,
    U128,
    F32,
    F64,
    Bytes,
    String,
    Container,
}

impl Kind {
    pub(crate) fn tag(self) -> u8 {
        match self {
            Kind::Null => b'0',
            Kind::Bool => b'1',
            Kind::I16 => b'2',
            Kind::U16 => b'3',
            Kind::I32 => b'4',
            Kind::U32 => b'5',
            Kind::I64 => b'6',
            Kind::U64 => b'7',
            Kind::I128 => b'8',
            Kind::U128 => b'9',
            Kind::F32 => b'a',
            Kind::F64 => b'b',
            Kind::Bytes => b'c',
            Kind::String => b'd',
            Kind::Container => b'e',
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Result<Self, SerializationError> {
        Ok(match tag {
            b'0' => Kind::Null,
            b'1' => Kind::Bool,
            b'2' => Kind::I16,
            b'3' => Kind::U16,
            b'4' => Kind::I32,
            b'5' => Kind::U32,
            b'6' => Kind::I64,
            b'7' => Kind::U64,
            b'8' => Kind::I128,
            b'9' => Kind::U128,
            b'a' => Kind::F32,
            b'b' => Kind::F64,
            b'c' => Kind::Bytes,
            b'd' => Kind::String,
            b'e' => Kind::Container,
            other => return Err(SerializationError::UnknownKind(other)),
        })
    }

    fn name(self) -> &'static str {
        match self {
            Kind::Null => "null",
            Kind::Bool => "bool",
            Kind::I16 => "i16",
            Kind::U16 => "u16",
            Kind::I32 => "i32",
            Kind::U32 => "u32",
            Kind::I64 => "i64",
            Kind::U64 => "u64",
            Kind::I128 => "i128",
            Kind::U128 => "u128",
            Kind::F32 => "f32",
            Kind::F64 => "f64",
            Kind::Bytes => "bytes",
            Kind::String => "string",
            Kind::Container => "container",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A single named, typed leaf inside a [`Container`].
///
/// `payload` holds the value's native little-endian (or UTF-8, for
/// string/bytes) encoding; a `Kind::Container` payload is itself a fully
/// serialized [`Container`], nested recursively.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Value {
    name: String,
    kind: Kind,
    payload: Vec<u8>,
}

macro_rules! int_ctor_accessor {
    ($ctor:ident, $getter:ident, $ty:ty, $kind:ident) => {
        pub fn $ctor(name: impl Into<String>, value: $ty) -> Self {
            Value {
                name: name.into(),
                kind: Kind::$kind,
                payload: value.to_le_bytes().to_vec(),
            }
        }

        pub fn $getter(&self) -> Result<$ty, TypeMismatch> {
            self.expect_kind(Kind::$kind)?;
            let bytes: [u8; std::mem::size_of::<$ty>()] =
                self.payload.as_slice().try_into().map_err(|_| {
                    self.mismatch(Kind::$kind)
                })?;
            Ok(<$ty>::from_le_bytes(bytes))
        }
    };
}

impl Value {
    pub fn null(name: impl Into<String>) -> Self {
        Value {
            name: name.into(),
            kind: Kind::Null,
            payload: Vec::new(),
        }
    }

    pub fn bool(name: impl Into<String>, value: bool) -> Self {
        Value {
            name: name.into(),
            kind: Kind::Bool,
            payload: vec![value as u8],
        }
    }

    pub fn as_bool(&self) -> Result<bool, TypeMismatch> {
        self.expect_kind(Kind::Bool)?;
        Ok(self.payload.first().copied().unwrap_or(0) != 0)
    }

    int_ctor_accessor!(i16, as_i16, i16, I16);
    int_ctor_accessor!(u16, as_u16, u16, U16);
    int_ctor_accessor!(i32, as_i32, i32, I32);
    int_ctor_accessor!(u32, as_u32, u32, U32);
    int_ctor_accessor!(i64, as_i64, i64, I64);
    int_ctor_accessor!(u64, as_u64, u64, U64);
    int_ctor_accessor!(i128, as_i128, i128, I128);
    int_ctor_accessor!(u128, as_u128, u128, U128);
    int_ctor_accessor!(f32, as_f32, f32, F32);
    int_ctor_accessor!(f64, as_f64, f64, F64);

    pub fn bytes(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Value {
            name: name.into(),
            kind: Kind::Bytes,
            payload: value.into(),
        }
    }

    pub fn as_bytes(&self) -> Result<&[u8], TypeMismatch> {
        self.expect_kind(Kind::Bytes)?;
        Ok(&self.payload)
    }

    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Value {
            name: name.into(),
            kind: Kind::String,
            payload: value.into().into_bytes(),
        }
    }

    pub fn as_str(&self) -> Result<&str, TypeMismatch> {
        self.expect_kind(Kind::String)?;
        std::str::from_utf8(&self.payload).map_err(|_| self.mismatch(Kind::String))
    }

    pub fn container(name: impl Into<String>, value: &Container) -> Self {
        Value {
            name: name.into(),
            kind: Kind::Container,
            payload: value.serialize(),
        }
    }

    pub fn as_container(&self) -> Result<Container, SerializationError> {
        if self.kind != Kind::Container {
            return Err(SerializationError::NestedContainer(Box::new(
                SerializationError::UnknownKind(self.kind.tag()),
            )));
        }
        Container::deserialize(&self.payload)
            .map_err(|e| SerializationError::NestedContainer(Box::new(e)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub(crate) fn raw_payload(&self) -> &[u8] {
        &self.payload
    }

    pub(crate) fn from_parts(name: String, kind: Kind, payload: Vec<u8>) -> Self {
        Value { name, kind, payload }
    }

    /// A human-readable rendering of this value, regardless of kind.
    pub fn to_display_string(&self) -> String {
        match self.kind {
            Kind::Null => "null".to_string(),
            Kind::Bool => self.as_bool().map(|b| b.to_string()).unwrap_or_default(),
            Kind::I16 => self.as_i16().map(|v| v.to_string()).unwrap_or_default(),
            Kind::U16 => self.as_u16().map(|v| v.to_string()).unwrap_or_default(),
            Kind::I32 => self.as_i32().map(|v| v.to_string()).unwrap_or_default(),
            Kind::U32 => self.as_u32().map(|v| v.to_string()).unwrap_or_default(),
            Kind::I64 => self.as_i64().map(|v| v.to_string()).unwrap_or_default(),
            Kind::U64 => self.as_u64().map(|v| v.to_string()).unwrap_or_default(),
            Kind::I128 => self.as_i128().map(|v| v.to_string()).unwrap_or_default(),
            Kind::U128 => self.as_u128().map(|v| v.to_string()).unwrap_or_default(),
            Kind::F32 => self.as_f32().map(|v| v.to_string()).unwrap_or_default(),
            Kind::F64 => self.as_f64().map(|v| v.to_string()).unwrap_or_default(),
            Kind::Bytes => self
                .payload
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect::<String>(),
            Kind::String => self.as_str().unwrap_or_default().to_string(),
            Kind::Container => format!("<container {} byte(s)>", self.payload.len()),
        }
    }

    /// Widens any integer-kind value to `i64`, saturating at the target's
    /// range. Returns a [`TypeMismatch`] for non-integer kinds.
    pub fn to_i64_saturating(&self) -> Result<i64, TypeMismatch> {
        Ok(match self.kind {
            Kind::I16 => self.as_i16()? as i64,
            Kind::U16 => self.as_u16()? as i64,
            Kind::I32 => self.as_i32()? as i64,
            Kind::U32 => self.as_u32()? as i64,
            Kind::I64 => self.as_i64()?,
            Kind::U64 => self.as_u64()?.min(i64::MAX as u64) as i64,
            Kind::I128 => self.as_i128()?.clamp(i64::MIN as i128, i64::MAX as i128) as i64,
            Kind::U128 => self.as_u128()?.min(i64::MAX as u128) as i64,
            Kind::Bool => self.as_bool()? as i64,
            _ => return Err(self.mismatch(Kind::I64)),
        })
    }

    fn expect_kind(&self, expected: Kind) -> Result<(), TypeMismatch> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(self.mismatch(expected))
        }
    }

    fn mismatch(&self, expected: Kind) -> TypeMismatch {
        TypeMismatch {
            name: self.name.clone(),
            expected: expected.name(),
            found: self.kind,
        }
    }
}
