use ledgerbridge_types::EngineVersion;
use proptest::prelude::*;
use std::collections::BTreeSet;

// ── Parsing ───────────────────────────────────────────────────────

#[test]
fn version_display_is_dotted() {
    assert_eq!(EngineVersion::new(32, 0).to_string(), "32.0");
    assert_eq!(EngineVersion::new(29, 11).to_string(), "29.11");
}

#[test]
fn version_from_str() {
    let v: EngineVersion = "31.2".parse().unwrap();
    assert_eq!(v.major(), 31);
    assert_eq!(v.minor(), 2);
}

#[test]
fn version_major_only_defaults_minor_to_zero() {
    let v = EngineVersion::parse("28").unwrap();
    assert_eq!(v, EngineVersion::new(28, 0));
}

#[test]
fn version_rejects_negative() {
    assert!(EngineVersion::parse("-1.0").is_err());
}

// ── Ordering ──────────────────────────────────────────────────────

#[test]
fn version_orders_numerically() {
    let set: BTreeSet<EngineVersion> = ["32.10", "32.2", "31.9", "32.0"]
        .iter()
        .map(|s| EngineVersion::parse(s).unwrap())
        .collect();
    let ordered: Vec<String> = set.iter().map(ToString::to_string).collect();
    assert_eq!(ordered, vec!["31.9", "32.0", "32.2", "32.10"]);
}

#[test]
fn version_same_major() {
    let a = EngineVersion::new(32, 0);
    assert!(a.same_major(&EngineVersion::new(32, 4)));
    assert!(!a.same_major(&EngineVersion::new(31, 0)));
}

// ── Serde ─────────────────────────────────────────────────────────

#[test]
fn version_serializes_as_string() {
    let json = serde_json::to_string(&EngineVersion::new(30, 1)).unwrap();
    assert_eq!(json, "\"30.1\"");
    let parsed: EngineVersion = serde_json::from_str("\"v30.1\"").unwrap();
    assert_eq!(parsed, EngineVersion::new(30, 1));
}

#[test]
fn version_deserialize_invalid_fails() {
    assert!(serde_json::from_str::<EngineVersion>("\"thirty\"").is_err());
}

proptest! {
    #[test]
    fn version_display_parse_agree(major in 0u16..1000, minor in 0u16..1000) {
        let v = EngineVersion::new(major, minor);
        prop_assert_eq!(EngineVersion::parse(&v.to_string()).unwrap(), v);
    }

    #[test]
    fn version_parse_never_panics(s in "\\PC*") {
        let _ = EngineVersion::parse(&s);
    }
}
