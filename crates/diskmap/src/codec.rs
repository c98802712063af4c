//! Engine key layout for namespaced maps.
//!
//! ```text
//! prefix(namespace) ++ user_key [++ sequence: u64 BE]
//! ```
//!
//! `prefix` is an order-preserving unsigned varint: ids up to 109 take the
//! single byte `136 + id`, larger ids take a length byte `245 + n` followed by
//! their `n` significant big-endian bytes. Comparing two prefixes bytewise
//! compares the ids, and no prefix is a prefix of another, so every key of a
//! namespace sorts inside `[prefix(id), prefix(id + 1))`.
//!
//! User keys are not length-delimited. With the sequence suffix, a key that
//! is a proper prefix of another key of the same map can sort among that
//! key's entries.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{DiskMapError, Result};

const SMALL_BASE: u8 = 136;
const SMALL_MAX: u64 = 109;
const LARGE_BASE: u8 = 245;

/// Width of the duplicate-mode sequence suffix.
pub const SEQUENCE_LEN: usize = 8;

/// Appends the prefix of `namespace` to `buf`.
pub fn put_prefix(buf: &mut Vec<u8>, namespace: u64) {
    if namespace <= SMALL_MAX {
        buf.push(SMALL_BASE + namespace as u8);
        return;
    }
    let bytes = namespace.to_be_bytes();
    let skip = (namespace.leading_zeros() / 8) as usize;
    buf.push(LARGE_BASE + (8 - skip) as u8);
    buf.extend_from_slice(&bytes[skip..]);
}

pub fn prefix(namespace: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(9);
    put_prefix(&mut buf, namespace);
    buf
}

/// `[prefix(namespace), prefix(namespace + 1))`, the whole key range of one
/// namespace. `namespace` must be below `u64::MAX`.
pub fn namespace_bounds(namespace: u64) -> (Vec<u8>, Vec<u8>) {
    debug_assert!(namespace < u64::MAX);
    (prefix(namespace), prefix(namespace.saturating_add(1)))
}

pub fn encode_key(namespace: u64, key: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(9 + key.len());
    put_prefix(&mut buf, namespace);
    buf.extend_from_slice(key);
    buf
}

/// Like [`encode_key`], followed by `seq` so equal keys sort by insertion.
pub fn encode_key_with_sequence(namespace: u64, key: &[u8], seq: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(9 + key.len() + SEQUENCE_LEN);
    put_prefix(&mut buf, namespace);
    buf.extend_from_slice(key);
    let mut suffix = [0u8; SEQUENCE_LEN];
    BigEndian::write_u64(&mut suffix, seq);
    buf.extend_from_slice(&suffix);
    buf
}

/// Reads a prefix, returning the namespace id and the prefix length.
fn read_prefix(encoded: &[u8]) -> Option<(u64, usize)> {
    let first = *encoded.first()?;
    if (SMALL_BASE..=SMALL_BASE + SMALL_MAX as u8).contains(&first) {
        return Some(((first - SMALL_BASE) as u64, 1));
    }
    if first > LARGE_BASE && first <= LARGE_BASE + 8 {
        let n = (first - LARGE_BASE) as usize;
        let body = encoded.get(1..1 + n)?;
        return Some((BigEndian::read_uint(body, n), 1 + n));
    }
    None
}

fn corrupt(namespace: u64, reason: String, encoded: &[u8]) -> DiskMapError {
    DiskMapError::Corruption {
        namespace,
        reason,
        key: encoded.to_vec(),
    }
}

/// Byte range of the user key inside `encoded`, after checking that the
/// prefix names `namespace` and, with `with_sequence`, that a suffix fits.
pub fn user_key_span(namespace: u64, encoded: &[u8], with_sequence: bool) -> Result<(usize, usize)> {
    let (found, start) = read_prefix(encoded)
        .ok_or_else(|| corrupt(namespace, "unreadable namespace prefix".into(), encoded))?;
    if found != namespace {
        return Err(corrupt(
            namespace,
            format!("key belongs to namespace {}", found),
            encoded,
        ));
    }

    let mut end = encoded.len();
    if with_sequence {
        if end - start < SEQUENCE_LEN {
            return Err(corrupt(
                namespace,
                "key is shorter than its sequence suffix".into(),
                encoded,
            ));
        }
        end -= SEQUENCE_LEN;
    }
    Ok((start, end))
}

/// Strips the prefix (and the sequence suffix, with `with_sequence`) from
/// `encoded`, returning the user key.
pub fn decode_key(namespace: u64, encoded: &[u8], with_sequence: bool) -> Result<&[u8]> {
    let (start, end) = user_key_span(namespace, encoded, with_sequence)?;
    Ok(&encoded[start..end])
}

/// The sequence suffix of a duplicate-mode key.
pub fn decode_sequence(namespace: u64, encoded: &[u8]) -> Result<u64> {
    let (_, end) = user_key_span(namespace, encoded, true)?;
    Ok(BigEndian::read_u64(&encoded[end..]))
}
