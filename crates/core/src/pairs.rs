//! Registration text parsing.
//!
//! Users register vocabulary as `term:definition` pairs, one per line or
//! separated by `;`／`；`. Within a pair the first run of separator
//! characters (`:` `：` `,` `，` `、` or whitespace) splits term from
//! definition; lines that don't split cleanly are skipped.

/// Characters that separate one pair from the next.
fn is_chunk_separator(c: char) -> bool {
    matches!(c, '\n' | ';' | '；')
}

/// Characters that separate a term from its definition within a pair.
fn is_pair_separator(c: char) -> bool {
    matches!(c, ':' | '：' | ',' | '，' | '、') || c.is_whitespace()
}

/// Parse free-form registration text into `(term, definition)` pairs.
///
/// Invalid chunks are ignored rather than reported — the command surface
/// echoes back what was actually registered.
pub fn parse_pairs(text: &str) -> Vec<(String, String)> {
    text.split(is_chunk_separator)
        .filter_map(split_pair)
        .collect()
}

fn split_pair(chunk: &str) -> Option<(String, String)> {
    let chunk = chunk.trim();
    if chunk.is_empty() {
        return None;
    }

    // First separator wins; the definition may itself contain separators.
    let (sep_at, _) = chunk.char_indices().find(|&(_, c)| is_pair_separator(c))?;
    let term = chunk[..sep_at].trim();
    let definition = chunk[sep_at..].trim_start_matches(is_pair_separator).trim();
    if term.is_empty() || definition.is_empty() {
        return None;
    }
    Some((term.to_string(), definition.to_string()))
}
