//! HTTP/1 head parsing and serialization
use std::io::Write;

use crate::protocol::http::{BodyLength, Headers, Method, Request, Response, Version};

/// maximum number of header lines in one message head
pub const MAX_HEADERS: usize = 96;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid message head: {0}")]
    Invalid(httparse::Error),
    #[error("unsupported HTTP version 1.{0}")]
    UnsupportedVersion(u8),
    #[error("header {0} is not valid UTF-8")]
    NotUtf8(String),
    #[error("invalid content-length {0:?}")]
    InvalidContentLength(String),
    #[error("unsupported transfer-encoding {0:?}")]
    UnsupportedTransferEncoding(String),
}

impl From<httparse::Error> for ParseError {
    fn from(error: httparse::Error) -> Self {
        ParseError::Invalid(error)
    }
}

fn version_from(minor: Option<u8>) -> Result<Version, ParseError> {
    match minor {
        Some(0) => Ok(Version::V10),
        Some(1) | None => Ok(Version::V11),
        Some(other) => Err(ParseError::UnsupportedVersion(other)),
    }
}

fn collect_headers(raw: &[httparse::Header]) -> Result<Headers, ParseError> {
    let mut headers = Headers::new();
    for header in raw {
        let value = std::str::from_utf8(header.value)
            .map_err(|_| ParseError::NotUtf8(header.name.to_owned()))?;
        headers.append(header.name, value.trim());
    }
    Ok(headers)
}

/// keep-alive as announced by the head, before the hop-by-hop headers go away
fn wants_keep_alive(version: Version, headers: &Headers) -> bool {
    match version {
        Version::V11 => !headers.has_token("Connection", "close"),
        Version::V10 => headers.has_token("Connection", "keep-alive"),
    }
}

/// framing announced by the headers, `None` when neither length nor chunking
/// is given
fn framing(headers: &Headers) -> Result<Option<BodyLength>, ParseError> {
    if let Some(encoding) = headers.get_all("Transfer-Encoding").last() {
        let last = encoding.rsplit(',').next().unwrap_or("").trim();
        if last.eq_ignore_ascii_case("chunked") {
            return Ok(Some(BodyLength::Chunked));
        }
        return Err(ParseError::UnsupportedTransferEncoding(encoding.to_owned()));
    }

    let mut lengths = headers.get_all("Content-Length");
    match lengths.next() {
        None => Ok(None),
        Some(value) => {
            let length = value
                .parse::<u64>()
                .map_err(|_| ParseError::InvalidContentLength(value.to_owned()))?;
            // repeated headers must agree
            if lengths.any(|other| other != value) {
                return Err(ParseError::InvalidContentLength(value.to_owned()));
            }
            Ok(Some(BodyLength::Length(length)))
        }
    }
}

/// Parse a request head at the start of `buf`. Returns the request and the
/// size of its head, or `None` if the head is not complete yet.
pub fn parse_request(buf: &[u8]) -> Result<Option<(Request, usize)>, ParseError> {
    let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut raw = httparse::Request::new(&mut raw_headers);

    let head_size = match raw.parse(buf)? {
        httparse::Status::Complete(size) => size,
        httparse::Status::Partial => return Ok(None),
    };

    let version = version_from(raw.version)?;
    let headers = collect_headers(raw.headers)?;
    let body = match framing(&headers)? {
        Some(BodyLength::Length(0)) | None => BodyLength::None,
        Some(body) => body,
    };

    let request = Request {
        method: Method::new(raw.method.unwrap_or("GET")),
        uri: raw.path.unwrap_or("/").to_owned(),
        version,
        keep_alive: wants_keep_alive(version, &headers),
        headers,
        body,
        params: Default::default(),
    };
    Ok(Some((request, head_size)))
}

/// Parse a response head at the start of `buf`. The framing does not take
/// the request method into account, see
/// [`can_have_body`](crate::protocol::http::can_have_body).
pub fn parse_response(buf: &[u8]) -> Result<Option<(Response, usize)>, ParseError> {
    let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut raw = httparse::Response::new(&mut raw_headers);

    let head_size = match raw.parse(buf)? {
        httparse::Status::Complete(size) => size,
        httparse::Status::Partial => return Ok(None),
    };

    let version = version_from(raw.version)?;
    let status = raw.code.unwrap_or(200);
    let headers = collect_headers(raw.headers)?;
    let body = if status < 200 || status == 204 || status == 205 || status == 304 {
        BodyLength::None
    } else {
        framing(&headers)?.unwrap_or(BodyLength::UntilClose)
    };

    let response = Response {
        version,
        status,
        reason: raw.reason.unwrap_or("").to_owned(),
        keep_alive: wants_keep_alive(version, &headers) && body != BodyLength::UntilClose,
        headers,
        body,
    };
    Ok(Some((response, head_size)))
}

pub fn write_request_head(request: &Request, out: &mut Vec<u8>) {
    // writing to a Vec can not fail
    let _ = write!(out, "{}\r\n", request.request_line());
    write_headers(&request.headers, out);
}

pub fn write_response_head(response: &Response, out: &mut Vec<u8>) {
    let _ = write!(out, "{}\r\n", response.status_line());
    write_headers(&response.headers, out);
}

fn write_headers(headers: &Headers, out: &mut Vec<u8>) {
    for (name, value) in headers.iter() {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
}
