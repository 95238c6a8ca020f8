//! Service error parsing and matching.

use polygram_remote::ServiceError;

#[test]
fn numeric_suffix_becomes_value() {
    let e = ServiceError::from_remote(420, "FLOOD_WAIT_30");
    assert_eq!(e.name, "FLOOD_WAIT");
    assert_eq!(e.value, Some(30));
    assert_eq!(e.retry_after_seconds(), Some(30));
}

#[test]
fn plain_names_keep_no_value() {
    let e = ServiceError::from_remote(401, "SESSION_PASSWORD_NEEDED");
    assert_eq!(e.name, "SESSION_PASSWORD_NEEDED");
    assert_eq!(e.value, None);
    assert_eq!(e.retry_after_seconds(), None);
}

#[test]
fn wildcard_matching() {
    let e = ServiceError::from_remote(400, "PHONE_CODE_INVALID");
    assert!(e.is("PHONE_CODE_INVALID"));
    assert!(e.is("PHONE_CODE_*"));
    assert!(e.is("*_INVALID"));
    assert!(!e.is("PHONE_CODE_EXPIRED"));
}

#[test]
fn forbidden_suffix_matches() {
    let e = ServiceError::from_remote(403, "CHAT_WRITE_FORBIDDEN");
    assert!(e.is("*_FORBIDDEN"));
}
