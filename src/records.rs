//! Directory record parsing.
//!
//! The directory query tool prints one record per block of consecutive
//! non-empty lines, with blocks separated by one or more blank lines.
//! Within a block there are two sub-grammars: simple attribute lines
//! (`name: value`, or `name:: <base64>` for values that need encoding)
//! and composite DN-style lines (`key=value` pairs joined by commas,
//! where a key may repeat).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

/// Split raw directory output into record blocks.
///
/// A block is a maximal run of non-empty lines; a trailing block without
/// a closing blank line still counts. Lines are trimmed of the carriage
/// return only, since leading indentation is meaningful to attribute
/// parsing.
pub fn split_blocks(text: &str) -> Vec<Vec<&str>> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

/// Collect every decoded value of `name` across one record block, in order.
///
/// An absent attribute yields an empty vec; by itself that is never an
/// error. A `name:: <base64>` line is decoded as UTF-8 text; values that
/// fail to decode are dropped with a warning rather than aborting the
/// run. Value-less lines (`name:` with nothing after it) contribute
/// nothing.
pub fn parse_attribute(lines: &[&str], name: &str) -> Vec<String> {
    let mut values = Vec::new();
    for line in lines {
        let trimmed = line.trim_start();
        let Some(rest) = trimmed.strip_prefix(name) else {
            continue;
        };
        if let Some(encoded) = rest.strip_prefix(":: ") {
            match decode_base64_text(encoded.trim()) {
                Some(value) if !value.is_empty() => values.push(value),
                Some(_) => {}
                None => {
                    tracing::warn!(attribute = name, line = *line, "undecodable base64 value");
                }
            }
        } else if let Some(value) = rest.strip_prefix(": ") {
            // A value-less line carries nothing worth keeping; admitting
            // the empty string here would let it masquerade as an
            // address downstream.
            if !value.is_empty() {
                values.push(value.to_string());
            }
        }
    }
    values
}

/// First decoded value of `name` in the block, if any.
pub fn parse_attribute_first(lines: &[&str], name: &str) -> Option<String> {
    parse_attribute(lines, name).into_iter().next()
}

/// Collect every `key=value` component of one composite DN-style line.
///
/// The key may repeat (multiple `dc=` components reconstruct a domain);
/// values are returned in line order. A line without the requested key
/// yields an empty vec and a warning; malformed references are
/// tolerated, not rejected.
pub fn parse_composite_field(line: &str, key: &str) -> Vec<String> {
    let mut values = Vec::new();
    for segment in line.split(',') {
        let segment = segment.trim();
        if let Some((seg_key, value)) = segment.split_once('=') {
            if seg_key.trim() == key && !value.is_empty() {
                values.push(value.to_string());
            }
        }
    }
    if values.is_empty() {
        tracing::warn!(key, line, "composite line missing requested key");
    }
    values
}

fn decode_base64_text(encoded: &str) -> Option<String> {
    let bytes = BASE64.decode(encoded.as_bytes()).ok()?;
    String::from_utf8(bytes).ok()
}
