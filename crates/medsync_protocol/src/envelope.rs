//! Versioned CBOR envelope for persisted records.
//!
//! Every record written to a store is wrapped as
//! `{ "v": <version>, "kind": <kind>, "body": <record> }` so that the
//! record shape can evolve without breaking stores written by older builds.

use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Current record schema version.
pub const SCHEMA_VERSION: u16 = 1;

/// A record type that can be stored through the envelope.
pub trait Persisted: Serialize + DeserializeOwned {
    /// Kind tag written into the envelope.
    const KIND: &'static str;

    /// Store key of this record.
    fn key(&self) -> &str;
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    v: u16,
    kind: &'a str,
    body: &'a T,
}

#[derive(Deserialize)]
struct Header {
    v: u16,
    kind: String,
}

#[derive(Deserialize)]
struct Envelope<T> {
    body: T,
}

/// Encodes a record into envelope bytes.
pub fn encode_record<T: Persisted>(record: &T) -> ProtocolResult<Vec<u8>> {
    let envelope = EnvelopeRef {
        v: SCHEMA_VERSION,
        kind: T::KIND,
        body: record,
    };
    let mut out = Vec::new();
    ciborium::ser::into_writer(&envelope, &mut out)
        .map_err(|e| ProtocolError::Encode(e.to_string()))?;
    Ok(out)
}

/// Decodes envelope bytes into a record.
///
/// # Errors
///
/// Returns an error if:
/// - The bytes are not a valid envelope
/// - The envelope holds a different kind of record
/// - The envelope was written by a newer schema version
pub fn decode_record<T: Persisted>(bytes: &[u8]) -> ProtocolResult<T> {
    let header: Header =
        ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))?;

    if header.v > SCHEMA_VERSION {
        return Err(ProtocolError::UnsupportedVersion {
            found: header.v,
            supported: SCHEMA_VERSION,
        });
    }
    if header.kind != T::KIND {
        return Err(ProtocolError::UnexpectedKind {
            expected: T::KIND,
            found: header.kind,
        });
    }

    let envelope: Envelope<T> =
        ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))?;
    Ok(envelope.body)
}
