//! HTTP/1 message heads as the relay sees them
//!
//! Only the heads are materialized: the bodies stream through the relay
//! buffers and are described here by their [`BodyLength`] framing.
pub mod codec;
pub mod editor;
pub mod parser;

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Head,
    Options,
    Put,
    Delete,
    Trace,
    Connect,
    Patch,
    Custom(String),
}

impl Method {
    pub fn new(s: &str) -> Method {
        if s.eq_ignore_ascii_case("GET") {
            Method::Get
        } else if s.eq_ignore_ascii_case("POST") {
            Method::Post
        } else if s.eq_ignore_ascii_case("HEAD") {
            Method::Head
        } else if s.eq_ignore_ascii_case("OPTIONS") {
            Method::Options
        } else if s.eq_ignore_ascii_case("PUT") {
            Method::Put
        } else if s.eq_ignore_ascii_case("DELETE") {
            Method::Delete
        } else if s.eq_ignore_ascii_case("TRACE") {
            Method::Trace
        } else if s.eq_ignore_ascii_case("CONNECT") {
            Method::Connect
        } else if s.eq_ignore_ascii_case("PATCH") {
            Method::Patch
        } else {
            Method::Custom(String::from(s))
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Trace => "TRACE",
            Method::Connect => "CONNECT",
            Method::Patch => "PATCH",
            Method::Custom(s) => s,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Version {
    V10,
    V11,
}

impl Version {
    pub fn as_str(self) -> &'static str {
        match self {
            Version::V10 => "HTTP/1.0",
            Version::V11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered list of headers, names are compared case insensitively
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    list: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// first value of the header
    pub fn get(&self, name: &str) -> Option<&str> {
        self.list
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.list
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// true if one of the comma separated values of the header is `token`
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .flat_map(|value| value.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.list.push((name.into(), value.into()));
    }

    /// replace every value of the header with a single one
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.remove(name);
        self.append(name, value);
    }

    /// returns the number of removed headers
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.list.len();
        self.list.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        before - self.list.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.list.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        Headers {
            list: iter
                .into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        }
    }
}

/// How the body following a head is delimited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyLength {
    /// no body at all
    None,
    /// `Content-Length` bytes
    Length(u64),
    /// `Transfer-Encoding: chunked`
    Chunked,
    /// everything until the peer closes, responses only
    UntilClose,
}

impl BodyLength {
    pub fn is_none(&self) -> bool {
        matches!(self, BodyLength::None | BodyLength::Length(0))
    }
}

/// Per request parameters, merged with the relay wide defaults before the
/// request is forwarded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpParams {
    pub user_agent: Option<String>,
    pub version: Option<Version>,
}

impl HttpParams {
    /// values set here win, the unset ones are taken from `defaults`
    pub fn defaulted(&self, defaults: &HttpParams) -> HttpParams {
        HttpParams {
            user_agent: self
                .user_agent
                .clone()
                .or_else(|| defaults.user_agent.clone()),
            version: self.version.or(defaults.version),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub uri: String,
    pub version: Version,
    pub headers: Headers,
    pub body: BodyLength,
    /// the client wants the connection to persist, computed from the
    /// version and `Connection` header before they are stripped
    pub keep_alive: bool,
    pub params: HttpParams,
}

impl Request {
    pub fn new(method: Method, uri: impl Into<String>, version: Version) -> Self {
        Request {
            method,
            uri: uri.into(),
            version,
            headers: Headers::new(),
            body: BodyLength::None,
            keep_alive: version == Version::V11,
            params: HttpParams::default(),
        }
    }

    pub fn has_body(&self) -> bool {
        !self.body.is_none()
    }

    pub fn request_line(&self) -> String {
        format!("{} {} {}", self.method, self.uri, self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub version: Version,
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: BodyLength,
    /// the origin accepts another request on this connection
    pub keep_alive: bool,
}

impl Response {
    pub fn new(status: u16, reason: impl Into<String>, version: Version) -> Self {
        Response {
            version,
            status,
            reason: reason.into(),
            headers: Headers::new(),
            body: BodyLength::None,
            keep_alive: version == Version::V11,
        }
    }

    pub fn is_informational(&self) -> bool {
        self.status < 200
    }

    pub fn status_line(&self) -> String {
        format!("{} {} {}", self.version, self.status, self.reason)
    }

    /// metric key of the status class
    pub fn status_class(&self) -> &'static str {
        match self.status {
            100..=199 => "status.1xx",
            200..=299 => "status.2xx",
            300..=399 => "status.3xx",
            400..=499 => "status.4xx",
            500..=599 => "status.5xx",
            _ => "status.other",
        }
    }
}

/// whether a response to `method` with `status` carries a body
pub fn body_expected(method: &Method, status: u16) -> bool {
    if *method == Method::Head {
        return false;
    }
    status >= 200 && status != 204 && status != 205 && status != 304
}

pub fn can_have_body(request: &Request, response: &Response) -> bool {
    body_expected(&request.method, response.status)
}

#[cfg(test)]
mod tests {
    use super::*;

    const METHODS: &[&str] = &[
        "GET", "POST", "HEAD", "OPTIONS", "PUT", "DELETE", "TRACE", "CONNECT", "PATCH", "PURGE",
    ];

    #[test]
    fn body_expected_table() {
        let cases: &[(&str, u16, bool)] = &[
            ("HEAD", 200, false),
            ("HEAD", 404, false),
            ("HEAD", 500, false),
            ("GET", 100, false),
            ("GET", 150, false),
            ("GET", 199, false),
            ("GET", 200, true),
            ("GET", 204, false),
            ("GET", 205, false),
            ("GET", 206, true),
            ("GET", 304, false),
            ("GET", 301, true),
            ("POST", 201, true),
            ("POST", 204, false),
            ("PUT", 500, true),
        ];

        for (method, status, expected) in cases {
            assert_eq!(
                body_expected(&Method::new(method), *status),
                *expected,
                "{method} {status}"
            );
        }
    }

    #[test]
    fn body_expected_every_method_and_status() {
        for method in METHODS {
            let method = Method::new(method);
            for status in 100..600u16 {
                let expected = method != Method::Head
                    && !(status < 200 || status == 204 || status == 205 || status == 304);
                assert_eq!(body_expected(&method, status), expected, "{method} {status}");
            }
        }
    }

    #[test]
    fn can_have_body_uses_request_method() {
        let get = Request::new(Method::Get, "/", Version::V11);
        let head = Request::new(Method::new("head"), "/", Version::V11);
        let ok = Response::new(200, "OK", Version::V11);
        let no_content = Response::new(204, "No Content", Version::V11);

        assert!(can_have_body(&get, &ok));
        assert!(!can_have_body(&head, &ok));
        assert!(!can_have_body(&get, &no_content));
    }

    #[test]
    fn headers_are_case_insensitive() {
        let mut headers: Headers = [("Host", "a"), ("x-Tag", "1"), ("X-TAG", "2")]
            .into_iter()
            .collect();

        assert_eq!(headers.get("host"), Some("a"));
        assert_eq!(headers.get_all("x-tag").collect::<Vec<_>>(), vec!["1", "2"]);

        headers.set("X-Tag", "3");
        assert_eq!(headers.get_all("x-tag").collect::<Vec<_>>(), vec!["3"]);
        assert_eq!(headers.remove("HOST"), 1);
        assert!(!headers.contains("host"));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn header_value_outlives_the_name() {
        let headers: Headers = [("Content-Type", "text/plain")].into_iter().collect();
        let value = {
            let name = String::from("content-type");
            headers.get(&name)
        };
        assert_eq!(value, Some("text/plain"));
    }

    #[test]
    fn connection_tokens() {
        let mut headers = Headers::new();
        headers.append("Connection", "Keep-Alive, Upgrade");
        assert!(headers.has_token("connection", "keep-alive"));
        assert!(headers.has_token("connection", "upgrade"));
        assert!(!headers.has_token("connection", "close"));
    }

    #[test]
    fn defaulted_params() {
        let defaults = HttpParams {
            user_agent: Some("relay".to_owned()),
            version: Some(Version::V11),
        };
        let own = HttpParams {
            user_agent: Some("curl".to_owned()),
            version: None,
        };

        let merged = own.defaulted(&defaults);
        assert_eq!(merged.user_agent.as_deref(), Some("curl"));
        assert_eq!(merged.version, Some(Version::V11));
        assert_eq!(HttpParams::default().defaulted(&defaults), defaults);
    }

    #[test]
    fn status_classes() {
        assert_eq!(Response::new(101, "", Version::V11).status_class(), "status.1xx");
        assert_eq!(Response::new(404, "", Version::V11).status_class(), "status.4xx");
        assert_eq!(Response::new(99, "", Version::V11).status_class(), "status.other");
    }
}
