use eventhttp::http::request::{Method, Request, RequestBuilder, Version};

fn get(version: Version, headers: &[(&str, &str)]) -> Request {
    let mut builder = RequestBuilder::new()
        .method(Method::GET)
        .uri("/")
        .version(version);
    for (k, v) in headers {
        builder = builder.header(*k, *v);
    }
    builder.build().unwrap()
}

#[test]
fn test_request_header_retrieval() {
    let req = get(
        Version::Http11,
        &[("Host", "example.com"), ("Content-Type", "application/json")],
    );

    assert_eq!(req.header("Host"), Some("example.com"));
    assert_eq!(req.header("content-type"), Some("application/json"));
    assert_eq!(req.header("Missing"), None);
    assert_eq!(req.host(), Some("example.com"));
}

#[test]
fn test_request_content_length_parsing() {
    let req = get(Version::Http11, &[("Content-Length", "42")]);

    assert_eq!(req.content_length(), 42);
}

#[test]
fn test_request_content_length_missing() {
    let req = get(Version::Http11, &[]);

    assert_eq!(req.content_length(), 0);
}

#[test]
fn test_request_content_length_invalid() {
    let req = get(Version::Http11, &[("Content-Length", "not-a-number")]);

    assert_eq!(req.content_length(), 0);
}

#[test]
fn test_request_keep_alive_http11_default() {
    // HTTP/1.1 defaults to keep-alive
    assert!(get(Version::Http11, &[]).keep_alive());
}

#[test]
fn test_request_keep_alive_explicit_header() {
    assert!(get(Version::Http11, &[("Connection", "keep-alive")]).keep_alive());
}

#[test]
fn test_request_keep_alive_close() {
    assert!(!get(Version::Http11, &[("Connection", "close")]).keep_alive());
}

#[test]
fn test_request_keep_alive_close_in_token_list() {
    assert!(!get(Version::Http11, &[("connection", "Upgrade, Close")]).keep_alive());
}

#[test]
fn test_request_keep_alive_http10() {
    assert!(!get(Version::Http10, &[]).keep_alive());
    assert!(get(Version::Http10, &[("Connection", "Keep-Alive")]).keep_alive());
}

#[test]
fn test_request_method_equality() {
    assert_eq!(Method::GET, Method::GET);
    assert_ne!(Method::GET, Method::POST);
}

#[test]
fn test_request_method_from_string() {
    assert_eq!(Method::from_str("GET"), Some(Method::GET));
    assert_eq!(Method::from_str("POST"), Some(Method::POST));
    assert_eq!(Method::from_str("TRACE"), Some(Method::TRACE));
    assert_eq!(Method::from_str("INVALID"), None);
    assert_eq!(Method::from_str("get"), None); // Case-sensitive
}

#[test]
fn test_request_method_display() {
    assert_eq!(Method::DELETE.to_string(), "DELETE");
    assert_eq!(Version::Http10.to_string(), "HTTP/1.0");
}

#[test]
fn test_request_with_body() {
    let body_content = b"test body content".to_vec();
    let req = RequestBuilder::new()
        .method(Method::POST)
        .uri("/api")
        .body(body_content.clone())
        .build()
        .unwrap();

    assert_eq!(req.body, body_content);
    assert_eq!(req.version, Version::Http11);
}

#[test]
fn test_request_builder_splits_query() {
    let req = RequestBuilder::new()
        .method(Method::GET)
        .uri("/search?q=rust&page=2")
        .build()
        .unwrap();

    assert_eq!(req.uri, "/search?q=rust&page=2");
    assert_eq!(req.path, "/search");
    assert_eq!(req.query.as_deref(), Some("q=rust&page=2"));
}

#[test]
fn test_request_builder_requires_method_and_uri() {
    assert!(RequestBuilder::new().uri("/").build().is_err());
    assert!(RequestBuilder::new().method(Method::GET).build().is_err());
    assert!(
        RequestBuilder::new()
            .method(Method::GET)
            .uri("ftp://example.com/")
            .build()
            .is_err()
    );
}
