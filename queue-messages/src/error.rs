use thiserror::Error;

/// A malformed, truncated, or otherwise unparseable wire payload.
///
/// Never produced by panicking: [`crate::Container::deserialize`] always
/// returns one of these instead of unwinding on untrusted input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SerializationError {
    #[error("buffer truncated: expected at least {expected} more byte(s), found {found}")]
    Truncated { expected: usize, found: usize },

    #[error("unknown value kind tag: `{0}` (0x{0:02x})")]
    UnknownKind(u8),

    #[error("declared length {0} exceeds remaining buffer")]
    LengthOutOfRange(u32),

    #[error("value name is not valid UTF-8")]
    InvalidName,

    #[error("message_type is not valid UTF-8")]
    InvalidMessageType,

    #[error("string value payload is not valid UTF-8")]
    InvalidStringPayload,

    #[error("trailing bytes after a complete container: {0} byte(s) unconsumed")]
    TrailingBytes(usize),

    #[error("nested container payload failed to decode: {0}")]
    NestedContainer(Box<SerializationError>),
}

/// A scalar accessor was called against a [`crate::Value`] whose [`crate::Kind`]
/// is incompatible with the requested type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("type mismatch on value `{name}`: expected {expected}, found {found:?}")]
pub struct TypeMismatch {
    pub name: String,
    pub expected: &'static str,
    pub found: crate::value::Kind,
}
