//! Hex id to UUID shaping
//!
//! Trace ids are 16 bytes and map onto a UUID byte for byte. Span ids are
//! 8 bytes and fill the low half of a UUID whose high half is zero.

use std::fmt;

use uuid::Uuid;

pub const TRACE_ID_LEN: usize = 16;
pub const SPAN_ID_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    InvalidHex(String),
    WrongLength { expected: usize, actual: usize },
}

impl fmt::Display for IdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdError::InvalidHex(e) => write!(f, "invalid hex: {}", e),
            IdError::WrongLength { expected, actual } => {
                write!(f, "expected {} bytes, got {}", expected, actual)
            }
        }
    }
}

fn decode(hex_id: &str, expected: usize) -> Result<Vec<u8>, IdError> {
    // Accept dashed UUID spelling for trace ids
    let cleaned: String = hex_id.trim().chars().filter(|c| *c != '-').collect();
    let bytes = hex::decode(&cleaned).map_err(|e| IdError::InvalidHex(e.to_string()))?;
    if bytes.len() != expected {
        return Err(IdError::WrongLength {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(bytes)
}

pub fn trace_id_to_uuid(hex_id: &str) -> Result<Uuid, IdError> {
    let bytes = decode(hex_id, TRACE_ID_LEN)?;
    let mut out = [0u8; 16];
    out.copy_from_slice(&bytes);
    Ok(Uuid::from_bytes(out))
}

pub fn span_id_to_uuid(hex_id: &str) -> Result<Uuid, IdError> {
    let bytes = decode(hex_id, SPAN_ID_LEN)?;
    let mut out = [0u8; 16];
    out[SPAN_ID_LEN..].copy_from_slice(&bytes);
    Ok(Uuid::from_bytes(out))
}

/// Span id hex of a UUID built by `span_id_to_uuid`
pub fn uuid_to_span_hex(id: &Uuid) -> String {
    hex::encode(&id.as_bytes()[SPAN_ID_LEN..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_id_maps_bytes_directly() {
        let id = trace_id_to_uuid("0af7651916cd43dd8448eb211c80319c").unwrap();
        assert_eq!(id.to_string(), "0af76519-16cd-43dd-8448-eb211c80319c");
    }

    #[test]
    fn test_trace_id_accepts_dashed_form() {
        let id = trace_id_to_uuid("0af76519-16cd-43dd-8448-eb211c80319c").unwrap();
        assert_eq!(id.simple().to_string(), "0af7651916cd43dd8448eb211c80319c");
    }

    #[test]
    fn test_span_id_fills_low_half() {
        let id = span_id_to_uuid("b7ad6b7169203331").unwrap();
        assert_eq!(id.to_string(), "00000000-0000-0000-b7ad-6b7169203331");
        assert_eq!(uuid_to_span_hex(&id), "b7ad6b7169203331");
    }

    #[test]
    fn test_rejects_bad_hex() {
        assert!(matches!(
            trace_id_to_uuid("not-a-trace-id"),
            Err(IdError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_rejects_wrong_length() {
        assert_eq!(
            span_id_to_uuid("0af7651916cd43dd8448eb211c80319c"),
            Err(IdError::WrongLength {
                expected: 8,
                actual: 16
            })
        );
    }
}
