//! `Authorization` header parsing (Basic and Bearer schemes).

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Extract `(username, password)` from a Basic `Authorization` header.
pub fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let encoded = strip_scheme(value, "Basic")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Extract the token from a Bearer `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = strip_scheme(value, "Bearer")?.trim();
    (!token.is_empty()).then_some(token)
}

fn strip_scheme<'a>(value: &'a str, scheme: &str) -> Option<&'a str> {
    let (given, rest) = value.split_once(' ')?;
    given.eq_ignore_ascii_case(scheme).then_some(rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn with_auth(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn parses_basic() {
        let encoded = STANDARD.encode("alice:s3cret:with:colons");
        let headers = with_auth(&format!("Basic {encoded}"));
        assert_eq!(
            basic_credentials(&headers),
            Some(("alice".into(), "s3cret:with:colons".into()))
        );
    }

    #[test]
    fn guest_with_empty_password() {
        let encoded = STANDARD.encode("guest:");
        let headers = with_auth(&format!("basic {encoded}"));
        assert_eq!(basic_credentials(&headers), Some(("guest".into(), String::new())));
    }

    #[test]
    fn rejects_malformed_basic() {
        assert!(basic_credentials(&HeaderMap::new()).is_none());
        assert!(basic_credentials(&with_auth("Basic !!!")).is_none());
        assert!(basic_credentials(&with_auth(&format!("Basic {}", STANDARD.encode("nocolon")))).is_none());
        assert!(basic_credentials(&with_auth("Bearer abc")).is_none());
    }

    #[test]
    fn parses_bearer() {
        assert_eq!(bearer_token(&with_auth("Bearer abc123")), Some("abc123"));
        assert_eq!(bearer_token(&with_auth("Bearer ")), None);
        assert_eq!(bearer_token(&with_auth("Basic abc")), None);
    }
}
