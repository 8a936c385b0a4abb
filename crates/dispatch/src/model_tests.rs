use yare::parameterized;

use super::*;

#[test]
fn session_id_accepts_uuid_v4() {
    let id = SessionId::new();
    assert!(SessionId::parse(id.as_str()).is_ok());
    assert!(!id.is_legacy_form());
}

#[test]
fn session_id_accepts_legacy_form() {
    let id = SessionId::parse("pty-1737936000-4af1").expect("legacy id should parse");
    assert!(id.is_legacy_form());
}

#[test]
fn session_id_rejects_non_legacy_three_part_strings() {
    let id = SessionId::parse("foo-123-bar").expect("should still parse as an opaque id");
    assert!(!id.is_legacy_form());
}

#[test]
fn session_id_rejects_too_long() {
    let too_long = "a".repeat(SessionId::MAX_LEN + 1);
    assert!(SessionId::parse(&too_long).is_err());
}

#[test]
fn session_id_rejects_non_url_safe_chars() {
    assert!(SessionId::parse("has a space").is_err());
    assert!(SessionId::parse("has/slash").is_err());
}

#[parameterized(
    pty = { SessionKind::Pty, "pty" },
    ai = { SessionKind::Ai, "ai" },
    web_view = { SessionKind::WebView, "web-view" },
)]
fn session_kind_round_trips_through_str(kind: SessionKind, label: &str) {
    assert_eq!(kind.as_str(), label);
    assert_eq!(SessionKind::parse(kind.as_str()), Some(kind));
}

#[test]
fn session_kind_parse_rejects_unknown_labels() {
    assert_eq!(SessionKind::parse("unknown-kind"), None);
}

#[test]
fn workspace_requires_absolute_path() {
    assert!(Workspace::new("relative/path").is_err());
    assert!(Workspace::new("/tmp").is_ok());
}

#[test]
fn workspace_normalizes_parent_dir_segments_lexically() {
    // A nonexistent path falls back to lexical normalization rather than
    // failing, so a workspace can be declared before the directory exists.
    let ws = Workspace::new("/tmp/does-not-exist-xyz/../does-not-exist-xyz").unwrap();
    assert_eq!(ws.path(), Path::new("/tmp/does-not-exist-xyz"));
}

#[test]
fn closed_status_is_terminal() {
    assert!(SessionStatus::Closed.is_terminal());
    assert!(!SessionStatus::Running.is_terminal());
    assert!(!SessionStatus::Error.is_terminal());
}

#[test]
fn payload_bytes_serializes_as_base64_json_string() {
    let payload = Payload::Bytes(vec![0, 1, 2, 255]);
    let json = serde_json::to_string(&payload).unwrap();
    assert_eq!(json, "\"AAEC/w==\"");

    // `Payload` is untagged and both `String` and `Bytes` serialize to a bare
    // JSON string, so deserializing that string back lands in `String` (it is
    // tried first) rather than `Bytes` — the channel, not the payload shape,
    // is what tells a reader to base64-decode. See DESIGN.md's "Known
    // tradeoff" note on `Payload`.
    let back: Payload = serde_json::from_str(&json).unwrap();
    assert_eq!(back, Payload::String("AAEC/w==".to_owned()));
}

#[test]
fn run_session_starts_in_starting_state_with_zero_seq() {
    let ws = Workspace::new("/tmp").unwrap();
    let session = RunSession::new(SessionId::new(), SessionKind::Pty, "u1".to_owned(), &ws);
    assert_eq!(session.status, SessionStatus::Starting);
    assert_eq!(session.last_seq, 0);
    assert!(!session.pinned);
}
