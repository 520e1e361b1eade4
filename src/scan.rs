//! Prefix-bounded forward scans over a cursor's composite key space.
//!
//! A prefix is a tuple no wider than the cursor key. A prefix field holding
//! its type's zero value (0, "", empty blob) is a wildcard: it matches any
//! stored field. A stored zero in a constrained position is therefore
//! indistinguishable from "don't care"; keys should not rely on zero values.
//!
//! The cursor is positioned once with `search_near` on the leading run of
//! non-wildcard fields, then walked forward while that run still matches.
//! Rows inside the run that fail a later non-wildcard field are skipped.
//! Results come back in ascending key order, the order the cursor visits
//! them. The cursor is reset before returning, whether or not the scan
//! succeeded.

use crate::engine::{Cursor, NearMatch};
use crate::errors::AtomGraphError;
use crate::schema::{Tuple, Value, check_tuple};

/// One `(key, value)` pair returned by a scan.
pub type ScanRow = (Tuple, Tuple);

/// True when every non-wildcard field of `prefix` equals the field at the same position in `key`.
pub fn prefix_matches(prefix: &[Value], key: &[Value]) -> bool {
    prefix.len() <= key.len()
        && prefix
            .iter()
            .zip(key)
            .all(|(want, have)| want.is_zero() || want == have)
}

/// The fields before the first wildcard; they bound the scan in key order.
fn seek_bound(prefix: &[Value]) -> &[Value] {
    let fixed = prefix.iter().take_while(|field| !field.is_zero()).count();
    &prefix[..fixed]
}

pub fn range_scan(
    cursor: &mut dyn Cursor,
    prefix: &[Value],
) -> Result<Vec<ScanRow>, AtomGraphError> {
    counted_scan(cursor, prefix).map(|(rows, _)| rows)
}

/// [`range_scan`] that also reports how many rows the cursor stepped onto.
pub(crate) fn counted_scan(
    cursor: &mut dyn Cursor,
    prefix: &[Value],
) -> Result<(Vec<ScanRow>, u64), AtomGraphError> {
    check_tuple(prefix, cursor.key_types(), "scan prefix")?;
    let mut visited = 0;
    let collected = collect(cursor, prefix, &mut visited);
    let reset = cursor.reset();
    let rows = collected?;
    reset?;
    Ok((rows, visited))
}

fn collect(
    cursor: &mut dyn Cursor,
    prefix: &[Value],
    visited: &mut u64,
) -> Result<Vec<ScanRow>, AtomGraphError> {
    let bound = seek_bound(prefix);
    cursor.set_key(bound.to_vec());
    let mut positioned = match cursor.search_near()? {
        NearMatch::NotFound => return Ok(Vec::new()),
        NearMatch::AtOrAfter => true,
        NearMatch::Before => cursor.next()?,
    };
    let mut rows = Vec::new();
    while positioned {
        *visited += 1;
        let key = cursor.key()?;
        if !prefix_matches(bound, &key) {
            break;
        }
        if prefix_matches(prefix, &key) {
            let value = cursor.value()?;
            rows.push((key, value));
        }
        positioned = cursor.next()?;
    }
    Ok(rows)
}
