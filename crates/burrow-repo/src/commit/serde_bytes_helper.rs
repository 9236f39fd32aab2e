//! `bytes::Bytes` as a CBOR byte string

use bytes::Bytes;
use serde::{Deserializer, Serializer};

pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serde_bytes::serialize(bytes.as_ref(), serializer)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
where
    D: Deserializer<'de>,
{
    serde_bytes::deserialize::<Vec<u8>, D>(deserializer).map(Bytes::from)
}
