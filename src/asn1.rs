//! Low level ASN.1 helpers shared by the decoders.

pub mod oid;
pub mod tlv;

pub use tlv::{Tlv, TlvError, encode_tlv, read_tlv};
