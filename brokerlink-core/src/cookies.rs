//! Parses `Set-Cookie` response headers and renders the `Cookie` request
//! header sent on every subsequent call.

use time::OffsetDateTime;

/// A single cookie as stored by the jar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCookie {
    /// Cookie name.
    pub name: String,
    /// Cookie value.
    pub value: String,
    /// Domain this cookie applies to (leading dot stripped).
    pub domain: String,
    /// Path this cookie applies to. Defaults to `/`.
    pub path: String,
    /// Best-effort parsed expiration. `None` if absent or unparseable.
    pub expires: Option<OffsetDateTime>,
}

/// A jar of cookies scoped to a single API host.
///
/// Cookies are replaced wholesale whenever a refresh returns a new set, so
/// the jar itself holds no synchronization — callers (the auth controller)
/// already serialize access to it.
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    api_host: String,
    cookies: Vec<StoredCookie>,
}

impl CookieJar {
    /// Creates an empty jar scoped to `api_host` (e.g. `api.example.com`).
    pub fn new(api_host: impl Into<String>) -> Self {
        Self {
            api_host: api_host.into(),
            cookies: Vec::new(),
        }
    }

    /// Whether any cookies have been stored.
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Replaces the jar's contents wholesale.
    pub fn replace(&mut self, cookies: Vec<StoredCookie>) {
        self.cookies = cookies;
    }

    /// Parses every `Set-Cookie` header in `raw_headers` and replaces the
    /// jar's contents with the result.
    pub fn store_set_cookie_headers<'a>(&mut self, raw_headers: impl Iterator<Item = &'a str>) {
        let mut parsed = Vec::new();
        for raw in raw_headers {
            for piece in split_set_cookie_header(raw) {
                if let Some(cookie) = self.parse_one(&piece) {
                    parsed.push(cookie);
                }
            }
        }
        self.cookies = parsed;
    }

    fn parse_one(&self, raw: &str) -> Option<StoredCookie> {
        let parsed = cookie::Cookie::parse(raw.to_owned()).ok()?;
        let name = parsed.name().to_string();
        let value = parsed.value().to_string();
        if name.is_empty() {
            return None;
        }
        let domain = parsed
            .domain()
            .map(|d| d.trim_start_matches('.').to_string())
            .unwrap_or_else(|| self.api_host.clone());
        let path = parsed.path().unwrap_or("/").to_string();
        let expires = parsed.expires().and_then(|e| e.datetime());
        Some(StoredCookie {
            name,
            value,
            domain,
            path,
            expires,
        })
    }

    /// Renders the `Cookie` request header: `name=value` pairs of every
    /// cookie whose domain ends with the API host, joined with `"; "`.
    pub fn render_header(&self) -> String {
        self.cookies
            .iter()
            .filter(|c| c.domain.ends_with(&self.api_host))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Splits a single (possibly comma-folded) `Set-Cookie` header value into
/// individual cookie strings.
///
/// Transports that preserve repeated headers as separate values never need
/// this; it exists for ones that fold them, splitting only on commas that
/// are followed by what looks like the start of a new `name=value` pair.
fn split_set_cookie_header(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut start = 0;
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b',' {
            let rest = raw[i + 1..].trim_start();
            if looks_like_cookie_start(rest) {
                parts.push(raw[start..i].trim().to_string());
                start = i + 1;
            }
        }
        i += 1;
    }
    parts.push(raw[start..].trim().to_string());
    parts
}

fn looks_like_cookie_start(rest: &str) -> bool {
    match rest.find('=') {
        Some(eq) => {
            let name = &rest[..eq];
            !name.is_empty()
                && !name.contains(';')
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        }
        None => false,
    }
}
