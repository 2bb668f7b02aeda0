//! Partial structured-output parsing.
//!
//! While a model streams a JSON document, the accumulated buffer is almost
//! never valid JSON. [`parse_partial`] repairs the buffer into the best
//! complete document it can and deserializes that into the target shape.
//!
//! Repair strategy, in order of preference:
//!
//! 1. The buffer already contains a complete top-level value: use it and
//!    ignore whatever follows (closing code fences, trailing prose).
//! 2. Close the buffer as-is: terminate an open string, drop a dangling
//!    comma, give a dangling key a `null`, then close every open container.
//! 3. For each open container, innermost first, cut back to its last value
//!    boundary (after the opener, after a closed child, or before a `,`)
//!    and close from there.
//!
//! Anything leading up to the first `{` or `[` is skipped, so prose or a
//! ```` ```json ```` fence in front of the document is tolerated.
//!
//! Parsing never fails loudly: "not yet parseable" is `None`.

use serde::de::DeserializeOwned;

/// Deserialize the best repair of `buffer` into `T`, or `None` if no repair
/// yields a value of that shape yet.
///
/// A complete value that does not fit `T` (say `{x}` in leading prose) is
/// skipped and the next document start is tried. An unfinished value is the
/// document still streaming, so nothing after it is tried.
pub fn parse_partial<T: DeserializeOwned>(buffer: &str) -> Option<T> {
    let mut offset = 0;
    while let Some(found) = buffer[offset..].find(['{', '[']) {
        let start = offset + found;
        let (candidates, scan) = repair_from(&buffer[start..]);
        if let Some(value) = candidates
            .iter()
            .find_map(|candidate| serde_json::from_str::<T>(candidate).ok())
        {
            return Some(value);
        }
        offset = match scan {
            Scan::Complete(end) => start + end,
            Scan::Broken => start + 1,
            Scan::Open => return None,
        };
    }
    None
}

/// Complete JSON documents derived from a partial buffer, best first.
pub fn repair_candidates(buffer: &str) -> Vec<String> {
    match buffer.find(['{', '[']) {
        Some(start) => repair_from(&buffer[start..]).0,
        None => Vec::new(),
    }
}

/// How the value at the front of a body ended.
enum Scan {
    /// Closed at this byte offset.
    Complete(usize),
    /// Still open at the end of the buffer.
    Open,
    /// A closer did not match its opener.
    Broken,
}

/// Candidates for the value that starts at `body[0]`.
fn repair_from(body: &str) -> (Vec<String>, Scan) {
    // Closers still owed, innermost last, and for each open container the
    // latest position where the document can be cut and closed.
    let mut stack: Vec<char> = Vec::new();
    let mut cuts: Vec<usize> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in body.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' | '[' => {
                stack.push(if c == '{' { '}' } else { ']' });
                cuts.push(i + 1);
            }
            '}' | ']' => {
                if stack.pop() != Some(c) {
                    return (Vec::new(), Scan::Broken);
                }
                cuts.pop();
                match cuts.last_mut() {
                    Some(cut) => *cut = i + 1,
                    None => return (vec![body[..=i].to_string()], Scan::Complete(i + 1)),
                }
            }
            ',' => {
                if let Some(cut) = cuts.last_mut() {
                    *cut = i;
                }
            }
            _ => {}
        }
    }

    let mut candidates = Vec::with_capacity(stack.len() + 1);

    let mut closed = body.to_string();
    if in_string {
        if escaped {
            closed.pop();
        } else if let Some(pos) = dangling_unicode_escape(&closed) {
            closed.truncate(pos);
        }
        closed.push('"');
    }
    let trimmed = closed.trim_end().len();
    closed.truncate(trimmed);
    if closed.ends_with(',') {
        closed.pop();
    }
    if closed.ends_with(':') {
        closed.push_str("null");
    }
    close_containers(&mut closed, &stack);
    candidates.push(closed);

    // Deepest container first: it loses the least content.
    for depth in (1..=cuts.len()).rev() {
        let mut cut = body[..cuts[depth - 1]].to_string();
        close_containers(&mut cut, &stack[..depth]);
        if !candidates.contains(&cut) {
            candidates.push(cut);
        }
    }

    (candidates, Scan::Open)
}

fn close_containers(doc: &mut String, owed: &[char]) {
    doc.extend(owed.iter().rev());
}

/// Position of a `\u` escape at the end of `s` that is missing hex digits.
fn dangling_unicode_escape(s: &str) -> Option<usize> {
    let pos = s.rfind("\\u")?;
    let tail = &s[pos + 2..];
    if tail.len() >= 4 || !tail.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let preceding = s[..pos].chars().rev().take_while(|&c| c == '\\').count();
    (preceding % 2 == 0).then_some(pos)
}
