//! RFC 1035 message framing: the wire data model plus serialisation
//! and deserialisation to and from raw datagrams.

pub mod deserialise;
pub mod serialise;
pub mod types;
