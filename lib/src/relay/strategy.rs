use relay_command_lib::config::Config;

use crate::protocol::http::{
    editor::{
        DefaultRequestProcessor, DefaultResponseProcessor, ExchangeContext, RequestProcessor,
        ResponseProcessor,
    },
    BodyLength, HttpParams, Response, Version,
};

/// Decides if a connection may carry another exchange once the current
/// response is complete
pub trait ReuseStrategy: Send + Sync {
    fn keep_alive(&self, response: &Response, context: &ExchangeContext) -> bool;
}

#[derive(Debug, Default, Clone)]
pub struct DefaultReuseStrategy;

impl ReuseStrategy for DefaultReuseStrategy {
    fn keep_alive(&self, response: &Response, _context: &ExchangeContext) -> bool {
        if response.body == BodyLength::UntilClose {
            return false;
        }
        if response.headers.has_token("Connection", "close") {
            return false;
        }
        if response.version == Version::V10
            && !response.headers.has_token("Connection", "keep-alive")
        {
            return false;
        }
        true
    }
}

/// The collaborators both legs consult, shared by every exchange of a relay
pub struct RelaySettings {
    pub request_processor: Box<dyn RequestProcessor>,
    pub response_processor: Box<dyn ResponseProcessor>,
    pub reuse_strategy: Box<dyn ReuseStrategy>,
    /// defaults merged into every forwarded request
    pub params: HttpParams,
}

impl Default for RelaySettings {
    fn default() -> Self {
        RelaySettings {
            request_processor: Box::new(DefaultRequestProcessor),
            response_processor: Box::new(DefaultResponseProcessor),
            reuse_strategy: Box::new(DefaultReuseStrategy),
            params: HttpParams::default(),
        }
    }
}

impl RelaySettings {
    pub fn from_config(config: &Config) -> Self {
        RelaySettings {
            params: HttpParams {
                user_agent: config.user_agent.clone(),
                version: None,
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use relay_command_lib::config::TargetAddress;
    use rusty_ulid::Ulid;

    use super::*;

    fn keep_alive(response: &Response) -> bool {
        let target = TargetAddress {
            host: "localhost".to_owned(),
            port: 80,
        };
        let context = ExchangeContext {
            id: Ulid::generate(),
            target: &target,
            request: None,
        };
        DefaultReuseStrategy.keep_alive(response, &context)
    }

    #[test]
    fn http_1_1_persists_by_default() {
        let mut response = Response::new(200, "OK", Version::V11);
        response.body = BodyLength::Length(3);
        assert!(keep_alive(&response));

        response.headers.append("Connection", "Close");
        assert!(!keep_alive(&response));
    }

    #[test]
    fn http_1_0_needs_keep_alive() {
        let mut response = Response::new(200, "OK", Version::V10);
        response.body = BodyLength::Length(3);
        assert!(!keep_alive(&response));

        response.headers.append("Connection", "keep-alive");
        assert!(keep_alive(&response));
    }

    #[test]
    fn close_delimited_body_can_not_persist() {
        let mut response = Response::new(200, "OK", Version::V11);
        response.body = BodyLength::UntilClose;
        assert!(!keep_alive(&response));
    }
}
