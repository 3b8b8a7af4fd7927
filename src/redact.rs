use std::borrow::Cow;

const TOKEN_FIELDS: [&str; 2] = ["\"accessToken\"", "\"refreshToken\""];

fn is_token_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '~' | '+' | '/' | '=')
}

fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let hay = haystack.as_bytes();
    let nee = needle.as_bytes();
    if nee.is_empty() {
        return Some(0);
    }
    if nee.len() > hay.len() {
        return None;
    }
    (0..=hay.len() - nee.len()).find(|&i| hay[i..i + nee.len()].eq_ignore_ascii_case(nee))
}

/// Replaces the credential following every `Bearer ` (any case) with `REDACTED`.
pub fn redact_bearer(input: &str) -> Cow<'_, str> {
    const SCHEME: &str = "bearer ";
    if find_ascii_case_insensitive(input, SCHEME).is_none() {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(idx) = find_ascii_case_insensitive(rest, SCHEME) {
        let end = idx + SCHEME.len();
        out.push_str(&rest[..end]);
        rest = &rest[end..];

        let consumed: usize = rest
            .chars()
            .take_while(|c| is_token_char(*c))
            .map(char::len_utf8)
            .sum();
        if consumed > 0 {
            out.push_str("REDACTED");
        }
        rest = &rest[consumed..];
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn redact_json_field(text: String, field: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_str();
    while let Some(idx) = rest.find(field) {
        out.push_str(&rest[..idx + field.len()]);
        rest = &rest[idx + field.len()..];

        // Keep `: "` as written, then swallow the string body.
        let separator: usize = rest
            .chars()
            .take_while(|c| c.is_whitespace() || *c == ':')
            .map(char::len_utf8)
            .sum();
        out.push_str(&rest[..separator]);
        rest = &rest[separator..];

        let Some(body) = rest.strip_prefix('"') else {
            continue;
        };
        let Some(close) = body.find('"') else {
            out.push_str("\"REDACTED");
            rest = "";
            break;
        };
        out.push_str("\"REDACTED\"");
        rest = &body[close + 1..];
    }
    out.push_str(rest);
    out
}

/// Scrubs bearer credentials and token fields of auth payloads out of free text.
pub fn redact_secrets(input: &str) -> Cow<'_, str> {
    let mut value = redact_bearer(input).into_owned();
    for field in TOKEN_FIELDS {
        if value.contains(field) {
            value = redact_json_field(value, field);
        }
    }

    if value == input {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(value)
    }
}
