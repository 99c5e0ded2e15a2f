//! PAX extended-header body parsing, including the order-sensitive GNU
//! sparse `offset`/`numbytes` record accumulation.

use std::collections::BTreeMap;

use crate::codec::parse_pax_record;
use crate::error::{Error, PaxError, Result};

/// The records decoded from one PAX extended-header body, with the GNU
/// 0.0-style `GNU.sparse.offset`/`GNU.sparse.numbytes` pairs already folded
/// into a normalized `GNU.sparse.map` (0.1 form: `offset,size,offset,size,...`).
#[derive(Debug, Default, Clone)]
pub struct PaxBody {
    pub records: BTreeMap<String, String>,
}

/// Parses a full PAX extended-header body (the payload of an XHEADER or
/// XGLOBAL_HEADER entry) into records, normalizing GNU 0.0 sparse keys.
/// `max_record_len` bounds any single record's rendered length in bytes.
pub fn parse_pax_body(body: &[u8], max_record_len: usize) -> Result<PaxBody> {
    let mut records = BTreeMap::new();
    let mut pending_offset: Option<String> = None;
    let mut sparse_pairs: Vec<(String, String)> = Vec::new();

    let mut rest = body;
    while !rest.is_empty() {
        // PAX bodies are sometimes padded with trailing NULs up to the
        // block boundary; a record never starts with NUL or whitespace-only
        // garbage, so stop cleanly once nothing left looks like a record.
        if rest[0] == 0 {
            break;
        }
        let rec = parse_pax_record(rest)?;
        if rec.consumed > max_record_len {
            return Err(Error::Pax(PaxError::RecordTooLong(rec.consumed)));
        }
        match rec.key.as_str() {
            "GNU.sparse.offset" => {
                if pending_offset.is_some() {
                    return Err(Error::Pax(PaxError::SparseKeyOutOfOrder("GNU.sparse.numbytes")));
                }
                if rec.value.contains(',') {
                    return Err(Error::Pax(PaxError::InvalidKeyBytes));
                }
                pending_offset = Some(rec.value);
            },
            "GNU.sparse.numbytes" => {
                let Some(offset) = pending_offset.take() else {
                    return Err(Error::Pax(PaxError::SparseKeyOutOfOrder("GNU.sparse.offset")));
                };
                if rec.value.contains(',') {
                    return Err(Error::Pax(PaxError::InvalidKeyBytes));
                }
                sparse_pairs.push((offset, rec.value));
            },
            _ => {
                records.insert(rec.key, rec.value);
            },
        }
        rest = &rest[rec.consumed..];
    }

    if pending_offset.is_some() {
        return Err(Error::Pax(PaxError::SparseKeyOutOfOrder("GNU.sparse.numbytes")));
    }

    if !sparse_pairs.is_empty() {
        let joined = sparse_pairs
            .iter()
            .flat_map(|(o, n)| [o.as_str(), n.as_str()])
            .collect::<Vec<_>>()
            .join(",");
        records.insert("GNU.sparse.map".to_string(), joined);
    }

    Ok(PaxBody { records })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::format_pax_record;

    #[test]
    fn parses_ordinary_records() {
        let mut body = String::new();
        body.push_str(&format_pax_record("path", "a/b"));
        body.push_str(&format_pax_record("mtime", "123.456"));
        let parsed = parse_pax_body(body.as_bytes(), 1 << 20).unwrap();
        assert_eq!(parsed.records.get("path").unwrap(), "a/b");
        assert_eq!(parsed.records.get("mtime").unwrap(), "123.456");
    }

    #[test]
    fn folds_gnu_sparse_0_0_pairs_into_map() {
        let mut body = String::new();
        body.push_str(&format_pax_record("GNU.sparse.offset", "0"));
        body.push_str(&format_pax_record("GNU.sparse.numbytes", "100"));
        body.push_str(&format_pax_record("GNU.sparse.offset", "200"));
        body.push_str(&format_pax_record("GNU.sparse.numbytes", "300"));
        let parsed = parse_pax_body(body.as_bytes(), 1 << 20).unwrap();
        assert_eq!(parsed.records.get("GNU.sparse.map").unwrap(), "0,100,200,300");
    }

    #[test]
    fn rejects_out_of_order_sparse_keys() {
        let mut body = String::new();
        body.push_str(&format_pax_record("GNU.sparse.numbytes", "100"));
        assert!(parse_pax_body(body.as_bytes(), 1 << 20).is_err());
    }

    #[test]
    fn ignores_trailing_nul_padding() {
        let mut bytes = format_pax_record("path", "a").into_bytes();
        bytes.resize(512, 0);
        let parsed = parse_pax_body(&bytes, 1 << 20).unwrap();
        assert_eq!(parsed.records.get("path").unwrap(), "a");
    }

    #[test]
    fn record_over_the_limit_is_rejected() {
        let body = format_pax_record("path", "a/b");
        assert!(parse_pax_body(body.as_bytes(), body.len() - 1).is_err());
        assert!(parse_pax_body(body.as_bytes(), body.len()).is_ok());
    }
}
