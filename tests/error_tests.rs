// Error handling tests
// Author: kelexine (https://github.com/kelexine)

use axum::http::StatusCode;
use axum::response::IntoResponse;
use gencache::error::CacheError;

#[test]
fn test_error_display_messages() {
    let errors = vec![
        CacheError::KeyDerivation("too deep".to_string()),
        CacheError::StoreRead("timeout".to_string()),
        CacheError::StoreWrite("readonly".to_string()),
        CacheError::JailUpdate("conflict".to_string()),
        CacheError::Upstream("HTTP 500".to_string()),
        CacheError::InvalidRequest("Bad request".to_string()),
        CacheError::TooManyRequests("Rate limited".to_string()),
        CacheError::ServiceUnavailable("Service down".to_string()),
    ];

    for error in errors {
        let display = format!("{}", error);
        assert!(!display.is_empty(), "Error should have display message");
    }
}

#[test]
fn test_error_kinds() {
    assert_eq!(CacheError::KeyDerivation(String::new()).kind(), "key_derivation");
    assert_eq!(CacheError::StoreRead(String::new()).kind(), "store_read");
    assert_eq!(CacheError::StoreWrite(String::new()).kind(), "store_write");
    assert_eq!(CacheError::JailUpdate(String::new()).kind(), "jail_update");
    assert_eq!(CacheError::TooManyRequests(String::new()).kind(), "upstream");
}

#[test]
fn test_status_codes() {
    let cases = [
        (CacheError::InvalidRequest("x".to_string()), StatusCode::BAD_REQUEST),
        (CacheError::TooManyRequests("x".to_string()), StatusCode::TOO_MANY_REQUESTS),
        (CacheError::ServiceUnavailable("x".to_string()), StatusCode::SERVICE_UNAVAILABLE),
        (CacheError::Upstream("x".to_string()), StatusCode::BAD_GATEWAY),
        (CacheError::StoreRead("x".to_string()), StatusCode::INTERNAL_SERVER_ERROR),
    ];

    for (error, expected) in cases {
        assert_eq!(error.into_response().status(), expected);
    }
}

#[test]
fn test_json_error_converts() {
    let parse_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let error: CacheError = parse_error.into();
    assert_eq!(error.kind(), "json");
}
