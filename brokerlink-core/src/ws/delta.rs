//! Decodes the tab-separated delta instructions the server sends for `D`
//! frames, reconstructing the full textual payload from the previous one.

use crate::error::{Error, Result};

/// Applies a `D` frame's delta instructions to the previous rendered text,
/// producing the new full text.
///
/// Instructions are separated by tabs. Unknown instruction tokens and
/// empty segments between consecutive tabs are silently skipped, as the
/// protocol allows. Counts are byte offsets into `previous` (its transport
/// encoding is UTF-8); a count that would split a multi-byte character is
/// rejected as a transport error rather than producing invalid UTF-8.
pub fn apply_delta(previous: &str, instructions: &str) -> Result<String> {
    let mut out = String::with_capacity(previous.len());
    let mut cursor = 0usize;

    for token in instructions.split('\t') {
        if token.is_empty() {
            continue;
        }
        let (marker, rest) = token.split_at(1);
        match marker {
            "=" => {
                let n = parse_count(rest)?;
                let end = checked_advance(previous, cursor, n)?;
                out.push_str(&previous[cursor..end]);
                cursor = end;
            }
            "-" => {
                let n = parse_count(rest)?;
                cursor = checked_advance(previous, cursor, n)?;
            }
            "+" => {
                out.push_str(&url_decode(rest));
            }
            _ => {
                // unknown instruction token: skip silently
            }
        }
    }

    Ok(out)
}

fn parse_count(rest: &str) -> Result<usize> {
    rest.parse::<usize>()
        .map_err(|_| Error::Transport(format!("malformed delta count: {rest:?}")))
}

fn checked_advance(previous: &str, cursor: usize, n: usize) -> Result<usize> {
    let end = cursor
        .checked_add(n)
        .ok_or_else(|| Error::Transport("delta instruction count overflowed".to_string()))?;
    if end > previous.len() {
        return Err(Error::Transport(
            "delta instruction read past end of previous text".to_string(),
        ));
    }
    if !previous.is_char_boundary(cursor) || !previous.is_char_boundary(end) {
        return Err(Error::Transport(
            "delta instruction split a multi-byte character".to_string(),
        ));
    }
    Ok(end)
}

/// Decodes `application/x-www-form-urlencoded`-style text: `%NN` to a raw
/// byte, `+` to a space.
fn url_decode(s: &str) -> String {
    let with_spaces = s.replace('+', " ");
    percent_encoding::percent_decode_str(&with_spaces)
        .decode_utf8_lossy()
        .into_owned()
}
