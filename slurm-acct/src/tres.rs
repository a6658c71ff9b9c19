// Copyright 2018 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the MIT License

/*! Trackable resource ("TRES") lists.

Slurm reports resource amounts as comma-separated `key=value` lists, like
`cpu=4,mem=8000M,billing=400` or `gres/gpu=2`. Both the QoS caps and the
per-job allocations come in this form.

*/

use errors::AcctError;
use std::collections::BTreeMap;


/// The name of the TRES that encodes a job's billing weight.
pub const BILLING: &str = "billing";

/// Unit suffixes that Slurm may tack onto a TRES amount.
const UNIT_SUFFIXES: &[char] = &['K', 'M', 'G', 'T', 'P'];


/// A parsed TRES list, mapping resource names to amounts.
pub type TresMap = BTreeMap<String, u64>;


/// Parse a TRES list such as `cpu=4,mem=8000M,billing=400`.
///
/// A single trailing unit suffix is dropped from each amount; the amount is
/// *not* rescaled, so `mem=8000M` and `mem=8000` both give 8000. Since the
/// usage query runs with `--noconvert`, Slurm reports everything in its
/// base units anyway. An empty list gives an empty map.
///
/// `field` names the column being parsed, for error messages.
pub fn parse_tres(field: &str, text: &str) -> Result<TresMap, AcctError> {
    let mut tres = TresMap::new();
    let text = text.trim();

    if text.is_empty() {
        return Ok(tres);
    }

    for item in text.split(',') {
        let mut pieces = item.splitn(2, '=');
        let key = pieces.next().unwrap_or("").trim();

        let value = match pieces.next() {
            Some(v) => v.trim(),
            None => {
                return Err(AcctError::malformed_field(field, item, "expected key=value"));
            }
        };

        if key.is_empty() {
            return Err(AcctError::malformed_field(field, item, "empty resource name"));
        }

        tres.insert(key.to_owned(), parse_amount(field, value)?);
    }

    Ok(tres)
}


/// Parse one TRES amount, dropping a unit suffix if present.
pub fn parse_amount(field: &str, value: &str) -> Result<u64, AcctError> {
    let digits = value.trim_end_matches(UNIT_SUFFIXES);

    // Only one suffix is allowed; "10MM" is garbage, not ten megamegs.
    if value.len() - digits.len() > 1 {
        return Err(AcctError::malformed_field(field, value, "unrecognized unit suffix"));
    }

    digits.parse::<u64>()
        .map_err(|e| AcctError::malformed_field(field, value, e))
}
