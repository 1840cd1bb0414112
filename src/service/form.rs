//! `application/x-www-form-urlencoded` decoding.

use std::collections::HashMap;

/// Content type of HTML form submissions.
pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Decodes `+` as space and `%XX` as a byte. A `%` not followed by two hex
/// digits is kept literally; invalid UTF-8 is replaced lossily.
pub fn url_decode(input: &[u8]) -> String {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        match input[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < input.len() => {
                match (hex_value(input[i + 1]), hex_value(input[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Splits a form body into decoded `key => value` pairs. A repeated key
/// keeps the last value; a pair without `=` maps to an empty value.
pub fn parse_form_data(body: &[u8]) -> HashMap<String, String> {
    body.split(|&b| b == b'&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.iter().position(|&b| b == b'=') {
            Some(eq) => (url_decode(&pair[..eq]), url_decode(&pair[eq + 1..])),
            None => (url_decode(pair), String::new()),
        })
        .collect()
}

/// True when a `Content-Type` header value names a urlencoded form.
pub fn is_form_urlencoded(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(FORM_URLENCODED))
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_decode() {
        assert_eq!(url_decode(b"hello+world"), "hello world");
        assert_eq!(url_decode(b"a%20b%2Fc"), "a b/c");
        assert_eq!(url_decode(b"%E4%BD%A0"), "你");
    }

    #[test]
    fn test_url_decode_bad_escape_kept() {
        assert_eq!(url_decode(b"100%"), "100%");
        assert_eq!(url_decode(b"%zz"), "%zz");
        assert_eq!(url_decode(b"%4"), "%4");
    }

    #[test]
    fn test_parse_form_data() {
        let form = parse_form_data(b"username=ariz+k&password=p%40ss&flag");
        assert_eq!(form.get("username").map(String::as_str), Some("ariz k"));
        assert_eq!(form.get("password").map(String::as_str), Some("p@ss"));
        assert_eq!(form.get("flag").map(String::as_str), Some(""));
    }

    #[test]
    fn test_parse_form_last_value_wins() {
        let form = parse_form_data(b"a=1&&a=2");
        assert_eq!(form.len(), 1);
        assert_eq!(form["a"], "2");
    }

    #[test]
    fn test_is_form_urlencoded() {
        assert!(is_form_urlencoded("application/x-www-form-urlencoded"));
        assert!(is_form_urlencoded("Application/X-WWW-Form-Urlencoded; charset=UTF-8"));
        assert!(!is_form_urlencoded("multipart/form-data"));
    }
}
