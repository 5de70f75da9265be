//! Document codec
//!
//! The engine never looks inside documents. It only asks the codec how many
//! bytes a document needs, encodes it into a buffer, and decodes stored bytes
//! back into a value when an iterator materializes it.

use crate::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};

/// Anything the store can persist.
pub trait Document: Serialize + DeserializeOwned + Clone {}

impl<T> Document for T where T: Serialize + DeserializeOwned + Clone {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DocumentCodec {
    /// Self-describing; any document can be read back as `serde_json::Value`.
    #[default]
    Json,
    /// Compact, but documents must be decoded into the type they were written as.
    Bincode,
}

impl DocumentCodec {
    /// Encoded size of `doc` in bytes.
    pub fn length_of<T: Serialize + ?Sized>(&self, doc: &T) -> Result<usize> {
        match self {
            DocumentCodec::Json => {
                let mut counter = ByteCounter(0);
                serde_json::to_writer(&mut counter, doc)?;
                Ok(counter.0)
            }
            DocumentCodec::Bincode => Ok(bincode::serialized_size(doc)? as usize),
        }
    }

    /// Appends the encoding of `doc` to `buf`.
    pub fn encode<T: Serialize + ?Sized>(&self, buf: &mut Vec<u8>, doc: &T) -> Result<()> {
        match self {
            DocumentCodec::Json => serde_json::to_writer(buf, doc)?,
            DocumentCodec::Bincode => bincode::serialize_into(buf, doc)?,
        }
        Ok(())
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            DocumentCodec::Json => Ok(serde_json::from_slice(bytes)?),
            DocumentCodec::Bincode => Ok(bincode::deserialize(bytes)?),
        }
    }

    /// Sizes a buffer with `length_of` and encodes into it.
    pub fn to_bytes<T: Serialize + ?Sized>(&self, doc: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.length_of(doc)?);
        self.encode(&mut buf, doc)?;
        Ok(buf)
    }

    pub fn name(&self) -> &'static str {
        match self {
            DocumentCodec::Json => "json",
            DocumentCodec::Bincode => "bincode",
        }
    }
}

struct ByteCounter(usize);

impl Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Endpoint {
        host: String,
        port: u16,
        tags: Vec<String>,
        weights: BTreeMap<String, i64>,
        backup: Option<Box<Endpoint>>,
    }

    fn sample() -> Endpoint {
        let mut weights = BTreeMap::new();
        weights.insert("primary".to_string(), 10);
        Endpoint {
            host: "10.0.0.1".into(),
            port: 8080,
            tags: vec!["edge".into(), "eu".into()],
            weights,
            backup: Some(Box::new(Endpoint {
                host: "10.0.0.2".into(),
                port: 8081,
                tags: vec![],
                weights: BTreeMap::new(),
                backup: None,
            })),
        }
    }

    #[test]
    fn test_codecs_preserve_documents() {
        for codec in [DocumentCodec::Json, DocumentCodec::Bincode] {
            let doc = sample();
            let bytes = codec.to_bytes(&doc).unwrap();
            assert_eq!(bytes.len(), codec.length_of(&doc).unwrap());
            let back: Endpoint = codec.decode(&bytes).unwrap();
            assert_eq!(back, doc, "codec {}", codec.name());
        }
    }

    #[test]
    fn test_json_reads_back_as_value() {
        let bytes = DocumentCodec::Json.to_bytes(&sample()).unwrap();
        let value: serde_json::Value = DocumentCodec::Json.decode(&bytes).unwrap();
        assert_eq!(value["port"], 8080);
    }

    #[test]
    fn test_decode_garbage_is_serialization_error() {
        let err = DocumentCodec::Json
            .decode::<Endpoint>(b"{not json")
            .unwrap_err();
        assert!(matches!(err, crate::ConfDbError::Serialization(_)));
    }
}
