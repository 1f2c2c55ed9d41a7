use crate::ByteRange;

/// Parse a `Range` request header against a resource of `length` bytes.
///
/// Returns the requested ranges sorted ascending by start position, with
/// overlapping and adjacent ranges consolidated. A `Some` result always
/// contains at least one range, and every range satisfies
/// `from <= to <= length - 1`.
///
/// Returns `None` if the header is malformed or if any requested range
/// cannot be satisfied, in which case the appropriate response is
/// 416 Range Not Satisfiable.
pub fn parse_range_header(header: &str, length: u64) -> Option<Vec<ByteRange>> {
    let (unit, specs) = header.split_once('=')?;

    if !unit.eq_ignore_ascii_case("bytes") {
        return None;
    }

    // no byte of an empty resource is addressable
    if length == 0 {
        return None;
    }

    let last_pos = length - 1;

    let mut result = Vec::new();

    for spec in specs.split(',') {
        let (first, last) = spec.trim().split_once('-')?;

        let range = match (first.is_empty(), last.is_empty()) {
            // from-to, with to clamped to the end of the resource
            (false, false) => ByteRange {
                from: parse_bound(first)?,
                to: std::cmp::min(parse_bound(last)?, last_pos),
            },
            // from- reads to the end of the resource
            (false, true) => ByteRange {
                from: parse_bound(first)?,
                to: last_pos,
            },
            // -n selects the final n bytes. a suffix longer than the
            // resource selects the whole resource
            (true, false) => ByteRange {
                from: length.saturating_sub(parse_bound(last)?),
                to: last_pos,
            },
            // bare '-'
            (true, true) => return None,
        };

        if range.from > range.to {
            return None;
        }

        result.push(range);
    }

    if result.len() == 1 {
        return Some(result);
    }

    // sort and consolidate ranges
    result.sort_by_key(|range| range.from);

    let mut consolidated: Vec<ByteRange> = Vec::with_capacity(result.len());

    for range in result {
        match consolidated.last_mut() {
            // ranges overlap or touch. the merged end position is taken
            // from the later range, even when the earlier one reached
            // further
            Some(last) if range.from <= last.to + 1 => last.to = range.to,
            _ => consolidated.push(range),
        }
    }

    Some(consolidated)
}

// strict digit parse. u64::from_str also accepts a leading '+', which the
// range grammar does not
fn parse_bound(digits: &str) -> Option<u64> {
    if digits.bytes().all(|b| b.is_ascii_digit()) {
        digits.parse().ok()
    } else {
        None
    }
}
