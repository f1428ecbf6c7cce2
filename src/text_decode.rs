//! Decoding of stored text fields.
//!
//! The database stores lightly-HTML-formatted text, and the strings arrive
//! with UTF-8 bytes smuggled through a Latin-1 round trip (each byte became
//! one char). [`decode_text`] undoes both: it re-decodes the byte sequence as
//! UTF-8, resolves the small fixed set of entities the data actually uses,
//! turns `<br>`/`<p>` markup into newlines, and strips whatever simple tags
//! remain. Non-string values never pass through here.

/// Decodes one stored text value into a clean display string.
///
/// The passes run in a fixed order; later passes see the output of earlier
/// ones, which matters for the stray `br/>` remnants left by the lenient
/// `<br` match.
///
/// # Examples
///
/// ```
/// use cheatbase::text_decode::decode_text;
///
/// assert_eq!(
///     decode_text("Jump &amp; Run<br>Use at own risk"),
///     "Jump & Run\nUse at own risk"
/// );
/// ```
pub fn decode_text(stored: &str) -> String {
    let bytes: Vec<u8> = stored.chars().map(|c| c as u32 as u8).collect();
    let text = String::from_utf8_lossy(&bytes).into_owned();

    let text = decode_numeric_references(&text);
    let text = text
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "'");
    let text = replace_line_breaks(&text);
    let text = replace_stray_breaks(&text);
    let text = replace_paragraphs(&text);
    let text = strip_simple_tags(&text);
    text.trim().to_string()
}

/// Resolves `&#NNN;` numeric character references.
fn decode_numeric_references(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find("&#") {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 2..];
        let digits_len = after.bytes().take_while(|b| b.is_ascii_digit()).count();
        let replaced = if digits_len > 0 && after[digits_len..].starts_with(';') {
            after[..digits_len]
                .parse::<u32>()
                .ok()
                .and_then(char::from_u32)
        } else {
            None
        };
        match replaced {
            Some(c) => {
                out.push(c);
                rest = &after[digits_len + 1..];
            }
            None => {
                out.push_str("&#");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Replaces `<br`, `<br>`, `<br/>` and `<br />` (any case) with a newline.
///
/// The closing `>` is optional, matching the forgiving behavior the data was
/// authored against; a leftover `br/>` half is cleaned up by
/// [`replace_stray_breaks`].
fn replace_line_breaks(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    loop {
        let Some(pos) = find_ci(rest, "<br") else {
            out.push_str(rest);
            return out;
        };
        out.push_str(&rest[..pos]);
        out.push('\n');
        rest = skip_break_suffix(&rest[pos + 3..]);
    }
}

/// Replaces bare `br>` / `br />` remnants with a newline.
fn replace_stray_breaks(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    loop {
        let Some(pos) = find_break_remnant(rest) else {
            out.push_str(rest);
            return out;
        };
        out.push_str(&rest[..pos.0]);
        out.push('\n');
        rest = &rest[pos.1..];
    }
}

/// Replaces `<p>` and `</p>` with a newline, eating surrounding whitespace.
fn replace_paragraphs(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    loop {
        let open = find_ci(rest, "<p>");
        let close = find_ci(rest, "</p>");
        let (pos, len) = match (open, close) {
            (Some(o), Some(c)) if o < c => (o, 3),
            (Some(o), None) => (o, 3),
            (_, Some(c)) => (c, 4),
            (None, None) => {
                out.push_str(rest);
                return out;
            }
        };
        out.push_str(rest[..pos].trim_end());
        out.push('\n');
        let mut next = pos + len;
        while rest.as_bytes().get(next) == Some(&b' ') {
            next += 1;
        }
        rest = &rest[next..];
    }
}

/// Strips remaining simple tags: `<word>`, `<word/>`, `<word />`, `</word>`,
/// each together with trailing spaces.
fn strip_simple_tags(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    'outer: loop {
        let Some(pos) = rest.find('<') else {
            out.push_str(rest);
            return out;
        };
        let after = &rest[pos + 1..];
        let body = after.strip_prefix('/').unwrap_or(after);
        let name_len = body.bytes().take_while(|b| b.is_ascii_alphabetic()).count();
        if name_len > 0 {
            let closing = after.starts_with('/');
            let mut tail = &body[name_len..];
            if !closing {
                tail = tail.strip_prefix(' ').unwrap_or(tail);
                tail = tail.strip_prefix('/').unwrap_or(tail);
            }
            if let Some(mut remaining) = tail.strip_prefix('>') {
                while let Some(stripped) = remaining.strip_prefix(' ') {
                    remaining = stripped;
                }
                out.push_str(&rest[..pos]);
                rest = remaining;
                continue 'outer;
            }
        }
        out.push_str(&rest[..pos + 1]);
        rest = after;
    }
}

/// Case-insensitive substring search over ASCII needles.
fn find_ci(haystack: &str, needle: &str) -> Option<usize> {
    let haystack = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len()).find(|&i| {
        haystack[i..i + needle.len()]
            .iter()
            .zip(needle)
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
    })
}

/// Consumes an optional space, optional `/`, and optional closing `>` after
/// a matched `<br`.
fn skip_break_suffix(rest: &str) -> &str {
    let mut rest = rest.strip_prefix(' ').unwrap_or(rest);
    rest = rest.strip_prefix('/').unwrap_or(rest);
    rest.strip_prefix('>').unwrap_or(rest)
}

/// Finds a `br[ ][/]>` remnant, returning (start, end) byte offsets.
fn find_break_remnant(haystack: &str) -> Option<(usize, usize)> {
    let mut search_from = 0;
    loop {
        let pos = find_ci(&haystack[search_from..], "br")? + search_from;
        let mut end = pos + 2;
        let bytes = haystack.as_bytes();
        if bytes.get(end) == Some(&b' ') {
            end += 1;
        }
        if bytes.get(end) == Some(&b'/') {
            end += 1;
        }
        if bytes.get(end) == Some(&b'>') {
            return Some((pos, end + 1));
        }
        search_from = pos + 2;
    }
}
