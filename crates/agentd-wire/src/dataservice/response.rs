//! Response codec.
//!
//! Every response starts with `method_id:u32_be, offset:u32_be,
//! status:u32_be`. The method identifier must equal the request's; the
//! offset echoes the caller-supplied child index (zero for root-level
//! calls); status zero is success. A body follows only on success and only
//! for methods that return data.

use super::request::Method;
use super::CodecError;
use crate::inet::{put_u32, take_id, take_u32};

/// The common response prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Method this response answers.
    pub method: Method,
    /// Echo of the caller-supplied child index.
    pub offset: u32,
    /// Zero on success, a status-code envelope value otherwise.
    pub status: u32,
}

/// Serializes a response.
pub fn encode(method: Method, offset: u32, status: u32, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(12 + body.len());
    put_u32(&mut out, method as u32);
    put_u32(&mut out, offset);
    put_u32(&mut out, status);
    out.extend_from_slice(body);
    out
}

/// Parses the response prefix, returning the header and the body slice.
pub fn decode(raw: &[u8]) -> Result<(ResponseHeader, &[u8]), CodecError> {
    let (method_id, rest) = take_u32(raw).ok_or(CodecError::InvalidSize)?;
    let method = Method::from_u32(method_id).ok_or(CodecError::UnknownMethod(method_id))?;
    let (offset, rest) = take_u32(rest).ok_or(CodecError::InvalidSize)?;
    let (status, body) = take_u32(rest).ok_or(CodecError::InvalidSize)?;
    Ok((
        ResponseHeader {
            method,
            offset,
            status,
        },
        body,
    ))
}

/// Parses the response prefix and verifies the method identifier.
pub fn expect(raw: &[u8], method: Method) -> Result<(ResponseHeader, &[u8]), CodecError> {
    let (header, body) = decode(raw)?;
    if header.method != method {
        return Err(CodecError::UnexpectedMethod {
            expected: method,
            actual: header.method,
        });
    }
    Ok((header, body))
}

/// Parses a body that must be exactly one 16-byte identifier.
pub fn decode_id_body(body: &[u8]) -> Result<[u8; 16], CodecError> {
    let (id, rest) = take_id(body).ok_or(CodecError::InvalidSize)?;
    if !rest.is_empty() {
        return Err(CodecError::InvalidSize);
    }
    Ok(id)
}

/// Parses a body that must be exactly one `u32`.
pub fn decode_u32_body(body: &[u8]) -> Result<u32, CodecError> {
    let (v, rest) = take_u32(body).ok_or(CodecError::InvalidSize)?;
    if !rest.is_empty() {
        return Err(CodecError::InvalidSize);
    }
    Ok(v)
}

/// Parses a body that must be empty.
pub fn decode_empty_body(body: &[u8]) -> Result<(), CodecError> {
    if body.is_empty() {
        Ok(())
    } else {
        Err(CodecError::InvalidSize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{Service, data, error_status};

    #[test]
    fn envelope_round_trip() {
        let raw = encode(Method::BlockRead, 3, 0, b"body");
        let (header, body) = decode(&raw).unwrap();
        assert_eq!(header.method, Method::BlockRead);
        assert_eq!(header.offset, 3);
        assert_eq!(header.status, 0);
        assert_eq!(body, b"body");
    }

    #[test]
    fn error_status_round_trip() {
        let status = error_status(Service::Data, data::NOT_AUTHORIZED);
        let raw = encode(Method::TransactionSubmit, 9, status, b"");
        let (header, body) = decode(&raw).unwrap();
        assert_eq!(header.method, Method::TransactionSubmit);
        assert_eq!(header.offset, 9);
        assert_eq!(header.status, status);
        assert!(body.is_empty());
    }

    #[test]
    fn expect_rejects_method_mismatch() {
        let raw = encode(Method::BlockRead, 0, 0, b"");
        assert!(matches!(
            expect(&raw, Method::TransactionRead),
            Err(CodecError::UnexpectedMethod { .. })
        ));
    }

    #[test]
    fn truncated_header_rejected() {
        let raw = encode(Method::BlockRead, 0, 0, b"");
        assert_eq!(decode(&raw[..7]), Err(CodecError::InvalidSize));
    }

    #[test]
    fn id_body_round_trip() {
        assert_eq!(decode_id_body(&[0xAB; 16]).unwrap(), [0xAB; 16]);
        assert_eq!(decode_id_body(&[0xAB; 17]), Err(CodecError::InvalidSize));
        assert_eq!(decode_id_body(&[0xAB; 15]), Err(CodecError::InvalidSize));
    }

    #[test]
    fn u32_body_round_trip() {
        assert_eq!(decode_u32_body(&[0, 0, 0, 5]).unwrap(), 5);
        assert_eq!(decode_u32_body(&[0, 0, 0]), Err(CodecError::InvalidSize));
    }

    #[test]
    fn empty_body_checked() {
        assert!(decode_empty_body(b"").is_ok());
        assert_eq!(decode_empty_body(b"x"), Err(CodecError::InvalidSize));
    }
}
