//! Typed, addressed message container with a bit-exact binary wire format.
//!
//! This is the payload that producers, the priority queue, workers and the
//! topic router all pass around: a [`Container`] carries a source/target
//! address, a message type, and an ordered list of typed [`Value`]s, and
//! round-trips through [`Container::serialize`]/[`Container::deserialize`]
//! byte-for-byte.

pub mod container;
pub mod error;
pub mod routing;
pub mod value;

pub use container::Container;
pub use container::ContainerBuilder;
pub use error::SerializationError;
pub use error::TypeMismatch;
pub use value::Kind;
pub use value::Value;
