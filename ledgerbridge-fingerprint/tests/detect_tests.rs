use ledgerbridge_fingerprint::{
    DetectionMethod, FingerprintConfig, VersionFingerprinter, DATA_SUBDIR, GUID_V32,
};
use ledgerbridge_types::EngineVersion;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn data_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join(DATA_SUBDIR)).unwrap();
    dir
}

fn write_artifact(dir: &Path, name: &str, bytes: &[u8]) {
    fs::write(dir.join(DATA_SUBDIR).join(name), bytes).unwrap();
}

fn format_artifact(offset: usize, format: u32) -> Vec<u8> {
    let mut bytes = vec![0xAAu8; offset];
    bytes.extend_from_slice(&format.to_le_bytes());
    bytes.extend_from_slice(&[0u8; 16]);
    bytes
}

// ── Status GUID ───────────────────────────────────────────────────

#[test]
fn status_guid_maps_to_v32() {
    let dir = data_dir();
    let mut bytes = vec![0u8, 7, 0x1F];
    bytes.extend_from_slice(b"5D3EB135-3317-413B-99DE-47C6B044134D");
    bytes.extend_from_slice(&[0u8; 64]);
    write_artifact(dir.path(), "ACCSTAT.DTA", &bytes);

    let detection = VersionFingerprinter::default()
        .detect_detailed(dir.path())
        .unwrap();
    assert_eq!(detection.version, EngineVersion::new(32, 0));
    assert_eq!(detection.method, DetectionMethod::StatusGuid);
    assert_eq!(detection.raw_token, GUID_V32);
}

#[test]
fn status_guid_in_utf16_is_found() {
    let dir = data_dir();
    let bytes: Vec<u8> = format!("{{{}}}", GUID_V32.to_lowercase())
        .encode_utf16()
        .flat_map(u16::to_le_bytes)
        .collect();
    write_artifact(dir.path(), "ACCSTAT.DTA", &bytes);

    assert_eq!(
        VersionFingerprinter::default().detect(dir.path()),
        Some(EngineVersion::new(32, 0))
    );
}

#[test]
fn unmapped_guid_yields_unknown() {
    let dir = data_dir();
    write_artifact(
        dir.path(),
        "ACCSTAT.DTA",
        b"00000000-1111-2222-3333-444444444444",
    );
    assert_eq!(VersionFingerprinter::default().detect(dir.path()), None);
}

#[test]
fn guid_outside_window_is_ignored() {
    let dir = data_dir();
    let mut config = FingerprintConfig::default();
    config.guid_window = 16;
    let mut bytes = vec![b'.'; 32];
    bytes.extend_from_slice(GUID_V32.as_bytes());
    write_artifact(dir.path(), "ACCSTAT.DTA", &bytes);

    assert_eq!(VersionFingerprinter::new(config).detect(dir.path()), None);
}

// ── Format integer ────────────────────────────────────────────────

#[test]
fn format_version_maps_through_table() {
    let dir = data_dir();
    let mut config = FingerprintConfig::default();
    config.insert_format(0x1C, EngineVersion::new(30, 0));
    write_artifact(dir.path(), "SETUP.DTA", &format_artifact(4, 0x1C));

    let detection = VersionFingerprinter::new(config)
        .detect_detailed(dir.path())
        .unwrap();
    assert_eq!(detection.version, EngineVersion::new(30, 0));
    assert_eq!(detection.method, DetectionMethod::FormatVersion);
    assert_eq!(detection.raw_token, "28");
}

#[test]
fn format_version_respects_offset() {
    let dir = data_dir();
    let mut config = FingerprintConfig::default();
    config.format_offset = 0x20;
    config.insert_format(5, EngineVersion::new(29, 0));
    write_artifact(dir.path(), "SETUP.DTA", &format_artifact(0x20, 5));

    assert_eq!(
        VersionFingerprinter::new(config).detect(dir.path()),
        Some(EngineVersion::new(29, 0))
    );
}

#[test]
fn unmapped_format_yields_unknown() {
    let dir = data_dir();
    write_artifact(dir.path(), "SETUP.DTA", &format_artifact(4, 0xDEAD));
    assert_eq!(VersionFingerprinter::default().detect(dir.path()), None);
}

// ── Install-path year ─────────────────────────────────────────────

#[test]
fn install_path_year_maps_linearly() {
    let dir = data_dir();
    write_artifact(
        dir.path(),
        "COMPANY",
        br"DATA=C:\ProgramData\Accounts\2024\Company.000\ACCDATA",
    );

    let detection = VersionFingerprinter::default()
        .detect_detailed(dir.path())
        .unwrap();
    assert_eq!(detection.version, EngineVersion::new(30, 0));
    assert_eq!(detection.method, DetectionMethod::InstallPathYear);
    assert_eq!(detection.raw_token, "2024");
}

#[test]
fn year_outside_range_yields_unknown() {
    let dir = data_dir();
    write_artifact(dir.path(), "COMPANY", br"C:\Archive\2005\Company");
    assert_eq!(VersionFingerprinter::default().detect(dir.path()), None);
}

#[test]
fn company_file_in_root_is_found() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("company"), "/srv/accounts/2026/data\n").unwrap();
    assert_eq!(
        VersionFingerprinter::default().detect(dir.path()),
        Some(EngineVersion::new(32, 0))
    );
}

// ── Version marker ────────────────────────────────────────────────

#[test]
fn version_marker_picks_highest_literal() {
    let dir = data_dir();
    write_artifact(dir.path(), "HEADER.DTA", b"upgraded from 28.0 to 31.0\0\0");

    let detection = VersionFingerprinter::default()
        .detect_detailed(dir.path())
        .unwrap();
    assert_eq!(detection.version, EngineVersion::new(31, 0));
    assert_eq!(detection.method, DetectionMethod::VersionMarker);
}

#[test]
fn version_marker_without_known_literal_is_unknown() {
    let dir = data_dir();
    write_artifact(dir.path(), "HEADER.DTA", b"build 132.05 of nothing");
    assert_eq!(VersionFingerprinter::default().detect(dir.path()), None);
}

// ── Precedence ────────────────────────────────────────────────────

#[test]
fn earlier_method_wins() {
    let dir = data_dir();
    write_artifact(dir.path(), "ACCSTAT.DTA", GUID_V32.as_bytes());
    write_artifact(dir.path(), "COMPANY", br"C:\Accounts\2021\x");
    write_artifact(dir.path(), "HEADER.DTA", b"29.0");

    let detection = VersionFingerprinter::default()
        .detect_detailed(dir.path())
        .unwrap();
    assert_eq!(detection.method, DetectionMethod::StatusGuid);
}

#[test]
fn failing_method_falls_through_to_next() {
    let dir = data_dir();
    write_artifact(dir.path(), "ACCSTAT.DTA", b"no guid here");
    write_artifact(dir.path(), "SETUP.DTA", &[1, 2]);
    write_artifact(dir.path(), "HEADER.DTA", b"v27.0");

    assert_eq!(
        VersionFingerprinter::default().detect(dir.path()),
        Some(EngineVersion::new(27, 0))
    );
}

#[test]
fn empty_directory_is_unknown() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(VersionFingerprinter::default().detect(dir.path()), None);
}

// ── Configuration ─────────────────────────────────────────────────

#[test]
fn config_parses_from_toml() {
    let toml_str = r#"
        status_artifact = "STATUS.BIN"
        format_offset = 8

        [guid_versions]
        "ABCDEF01-2345-6789-ABCD-EF0123456789" = "31.0"

        [[format_versions]]
        format = 27
        version = "29.0"

        [year_mapping]
        base_year = 2020
        base_major = 26
        min_year = 2018
        max_year = 2030
    "#;
    let config: FingerprintConfig = toml::from_str(toml_str).unwrap();
    assert_eq!(config.status_artifact, "STATUS.BIN");
    assert_eq!(config.metadata_artifact, "SETUP.DTA");
    assert_eq!(config.format_offset, 8);
    assert_eq!(
        config.version_for_guid("abcdef01-2345-6789-abcd-ef0123456789"),
        Some(EngineVersion::new(31, 0))
    );
    assert_eq!(config.version_for_format(27), Some(EngineVersion::new(29, 0)));
    assert_eq!(config.year_mapping.version_for(2030), Some(EngineVersion::new(36, 0)));
}

proptest! {
    #[test]
    fn arbitrary_artifacts_never_panic(
        status in proptest::collection::vec(any::<u8>(), 0..512),
        header in proptest::collection::vec(any::<u8>(), 0..512),
    ) {
        let dir = data_dir();
        write_artifact(dir.path(), "ACCSTAT.DTA", &status);
        write_artifact(dir.path(), "SETUP.DTA", &status);
        write_artifact(dir.path(), "COMPANY", &header);
        write_artifact(dir.path(), "HEADER.DTA", &header);
        let _ = VersionFingerprinter::default().detect(dir.path());
    }
}
