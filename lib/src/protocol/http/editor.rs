use relay_command_lib::config::TargetAddress;
use rusty_ulid::Ulid;

use crate::{
    protocol::http::{body_expected, BodyLength, Headers, Request, Response, Version},
    TransportError,
};

/// Headers that only make sense on one connection, they are removed before a
/// message is forwarded and regenerated by the outbound side when needed
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "content-length",
    "transfer-encoding",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "upgrade",
    "host",
];

/// Strip the hop-by-hop headers, returns how many header lines were removed
pub fn remove_hop_by_hop_headers(headers: &mut Headers) -> usize {
    HOP_BY_HOP_HEADERS
        .iter()
        .map(|name| headers.remove(name))
        .sum()
}

/// What the processors and the reuse strategy know about the exchange
#[derive(Debug, Clone, Copy)]
pub struct ExchangeContext<'a> {
    pub id: Ulid,
    pub target: &'a TargetAddress,
    pub request: Option<&'a Request>,
}

/// Runs on a sanitized request right before it is submitted to the origin
pub trait RequestProcessor: Send + Sync {
    fn process_request(
        &self,
        request: &mut Request,
        context: &ExchangeContext,
    ) -> Result<(), TransportError>;
}

/// Runs on a sanitized copy of the origin response right before it is
/// submitted to the client. It decides the client side framing in
/// `response.body` and whether the client connection persists in
/// `response.keep_alive`.
pub trait ResponseProcessor: Send + Sync {
    fn process_response(
        &self,
        response: &mut Response,
        context: &ExchangeContext,
    ) -> Result<(), TransportError>;
}

#[derive(Debug, Default, Clone)]
pub struct DefaultRequestProcessor;

impl RequestProcessor for DefaultRequestProcessor {
    fn process_request(
        &self,
        request: &mut Request,
        context: &ExchangeContext,
    ) -> Result<(), TransportError> {
        if let Some(version) = request.params.version {
            request.version = version;
        }

        let target = context.target;
        let host = if target.port == 80 {
            target.host.clone()
        } else {
            target.to_string()
        };
        request.headers.set("Host", host);

        match request.body {
            BodyLength::None => {}
            BodyLength::Length(length) => request.headers.set("Content-Length", length.to_string()),
            BodyLength::Chunked if request.version == Version::V10 => {
                return Err(TransportError::ChunkedNotAllowed(request.version))
            }
            BodyLength::Chunked => request.headers.set("Transfer-Encoding", "chunked"),
            BodyLength::UntilClose => {
                return Err(TransportError::Framing(
                    "a request body can not be delimited by the connection close".to_owned(),
                ))
            }
        }

        request.headers.set("Connection", "keep-alive");

        if !request.headers.contains("User-Agent") {
            if let Some(user_agent) = &request.params.user_agent {
                request.headers.append("User-Agent", user_agent.clone());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct DefaultResponseProcessor;

impl ResponseProcessor for DefaultResponseProcessor {
    fn process_response(
        &self,
        response: &mut Response,
        context: &ExchangeContext,
    ) -> Result<(), TransportError> {
        let (method, client_version) = match context.request {
            Some(request) => (request.method.clone(), request.version),
            None => return Err(TransportError::Framing("response without a request".to_owned())),
        };

        if !body_expected(&method, response.status) {
            // a HEAD response still advertises the length of the resource
            if let BodyLength::Length(length) = response.body {
                if response.status >= 200 && response.status != 204 && response.status != 304 {
                    response.headers.set("Content-Length", length.to_string());
                }
            }
            response.body = BodyLength::None;
        } else {
            response.body = match response.body {
                BodyLength::None => BodyLength::Length(0),
                BodyLength::Chunked if client_version == Version::V10 => BodyLength::UntilClose,
                other => other,
            };
            match response.body {
                BodyLength::Length(length) => {
                    response.headers.set("Content-Length", length.to_string())
                }
                BodyLength::Chunked => response.headers.set("Transfer-Encoding", "chunked"),
                BodyLength::None | BodyLength::UntilClose => {}
            }
        }

        if response.body == BodyLength::UntilClose {
            response.keep_alive = false;
        }
        response.version = client_version;
        response.headers.set(
            "Connection",
            if response.keep_alive {
                "keep-alive"
            } else {
                "close"
            },
        );
        Ok(())
    }
}
