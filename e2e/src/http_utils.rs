/// A complete HTTP/1.1 request, a non empty content is framed with
/// Content-Length
pub fn http_request<S1: Into<String>, S2: Into<String>, S3: Into<String>, S4: Into<String>>(
    method: S1,
    uri: S2,
    content: S3,
    host: S4,
) -> String {
    let content = content.into();
    let length = if content.is_empty() {
        String::new()
    } else {
        format!("Content-Length: {}\r\n", content.len())
    };
    format!(
        "{} {} HTTP/1.1\r\nHost: {}\r\nConnection: keep-alive\r\n{}\r\n{}",
        method.into(),
        uri.into(),
        host.into(),
        length,
        content,
    )
}

/// A request without a body, closing the connection after the response
pub fn http_request_close<S1: Into<String>, S2: Into<String>>(method: S1, uri: S2) -> String {
    format!(
        "{} {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        method.into(),
        uri.into(),
    )
}

pub fn http_ok_response<S: Into<String>>(content: S) -> String {
    let content = content.into();
    format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: keep-alive\r\n\r\n{}",
        content.len(),
        content,
    )
}

/// The head of [`http_ok_response`], as answered to a HEAD request
pub fn http_ok_head<S: Into<String>>(content: S) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: keep-alive\r\n\r\n",
        content.into().len(),
    )
}

/// Value of the first header named `name`, case insensitive
pub fn header_value<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.split("\r\n").skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then_some(value.trim())
    })
}

/// Length of the head, terminator included, once it is complete
pub fn head_length(data: &[u8]) -> Option<usize> {
    data.windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|position| position + 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_helpers() {
        let request = http_request("POST", "/upload", "abc", "localhost");
        let length = head_length(request.as_bytes()).expect("complete head");
        let head = &request[..length];

        assert_eq!(&request[length..], "abc");
        assert_eq!(header_value(head, "content-length"), Some("3"));
        assert_eq!(header_value(head, "HOST"), Some("localhost"));
        assert_eq!(header_value(head, "Transfer-Encoding"), None);
        assert_eq!(head_length(b"GET / HTTP/1.1\r\n"), None);

        let request = http_request("GET", "/", "", "localhost");
        assert_eq!(header_value(&request, "Content-Length"), None);
        assert!(request.ends_with("\r\n\r\n"));
    }
}
