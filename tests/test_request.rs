use courier::http::headers::Headers;
use courier::http::request::{Method, Request, RequestBuilder};

fn request(method: Method, target: &str, headers: Headers) -> Request {
    Request {
        method,
        target: target.to_string(),
        version: "HTTP/1.1".to_string(),
        headers,
        body: Default::default(),
    }
}

#[test]
fn test_request_header_retrieval_is_case_insensitive() {
    let headers: Headers = [("Host", "example.com"), ("Content-Type", "application/json")]
        .into_iter()
        .collect();
    let req = request(Method::GET, "/", headers);

    assert_eq!(req.header("host"), Some("example.com"));
    assert_eq!(req.header("CONTENT-TYPE"), Some("application/json"));
    assert_eq!(req.header("Missing"), None);
}

#[test]
fn test_request_multi_valued_header() {
    let headers: Headers = [("Cookie", "a=1"), ("X-Other", "x"), ("cookie", "b=2")]
        .into_iter()
        .collect();

    assert_eq!(headers.get_all("Cookie").collect::<Vec<_>>(), vec!["a=1", "b=2"]);
}

#[test]
fn test_request_path_and_query_split() {
    let req = request(Method::GET, "/api/proxy/orders?page=2&size=10", Headers::new());

    assert_eq!(req.path(), "/api/proxy/orders");
    assert_eq!(req.query(), "?page=2&size=10");
}

#[test]
fn test_request_without_query() {
    let req = request(Method::GET, "/api/proxy/orders", Headers::new());

    assert_eq!(req.path(), "/api/proxy/orders");
    assert_eq!(req.query(), "");
}

#[test]
fn test_request_lone_question_mark_is_empty_query() {
    let req = request(Method::GET, "/api/proxy/orders?", Headers::new());

    assert_eq!(req.path(), "/api/proxy/orders");
    assert_eq!(req.query(), "");
}

#[test]
fn test_request_keep_alive_http11_default() {
    let req = request(Method::GET, "/", Headers::new());
    assert!(req.keep_alive());
}

#[test]
fn test_request_keep_alive_close() {
    let headers: Headers = [("Connection", "close")].into_iter().collect();
    let req = request(Method::GET, "/", headers);

    assert!(!req.keep_alive());
}

#[test]
fn test_request_keep_alive_close_among_tokens() {
    let headers: Headers = [("Connection", "Upgrade, Close")].into_iter().collect();
    let req = request(Method::GET, "/", headers);

    assert!(!req.keep_alive());
}

#[test]
fn test_request_http10_defaults_to_close() {
    let mut req = request(Method::GET, "/", Headers::new());
    req.version = "HTTP/1.0".to_string();
    assert!(!req.keep_alive());

    req.headers.append("Connection", "Keep-Alive");
    assert!(req.keep_alive());
}

#[test]
fn test_request_method_from_string() {
    assert_eq!(Method::from_str("GET"), Some(Method::GET));
    assert_eq!(Method::from_str("OPTIONS"), Some(Method::OPTIONS));
    assert_eq!(Method::from_str("INVALID"), None);
    assert_eq!(Method::from_str("get"), None); // Case-sensitive
}

#[test]
fn test_method_body_permission() {
    assert!(!Method::GET.permits_body());
    assert!(!Method::HEAD.permits_body());

    for method in [Method::POST, Method::PUT, Method::PATCH, Method::DELETE, Method::OPTIONS] {
        assert!(method.permits_body(), "{} should carry a body", method);
    }
}

#[test]
fn test_request_builder() {
    let req = RequestBuilder::new()
        .method(Method::POST)
        .target("/api/proxy/offers")
        .header("Content-Type", "application/json")
        .body(&b"{}"[..])
        .build()
        .unwrap();

    assert_eq!(req.version, "HTTP/1.1");
    assert_eq!(req.header("content-type"), Some("application/json"));
    assert_eq!(&req.body[..], b"{}");
}

#[test]
fn test_request_builder_requires_method() {
    let result = RequestBuilder::new().target("/").build();
    assert!(result.is_err());
}
