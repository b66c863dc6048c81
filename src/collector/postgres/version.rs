//! Server version resolution.
//!
//! Everything downstream selects queries by the resolved version, so an
//! unparsable version string fails the whole run rather than guessing.

use regex::Regex;
use semver::Version;
use sqlx::postgres::PgPool;
use thiserror::Error;

const VERSION_QUERY: &str = "SHOW server_version";

// Distribution packages append a parenthetical build tag to the reported
// version, e.g. "9.6.1 (Ubuntu 9.6.1-1.pgdg16.04+1)".
const VENDOR_MARKERS: [&str; 2] = [" (Ubuntu", " (Debian"];

#[derive(Error, Debug)]
pub enum VersionError {
    #[error("version query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("unparsable server version {0:?}")]
    Unparsable(String),
}

/// Query the server for its reported version and parse it
pub async fn resolve(pool: &PgPool) -> Result<Version, VersionError> {
    let raw: String = sqlx::query_scalar(VERSION_QUERY).fetch_one(pool).await?;
    parse_server_version(&raw)
}

/// Parse a `server_version` string, tolerating vendor packaging suffixes
/// and missing minor/patch components
pub fn parse_server_version(raw: &str) -> Result<Version, VersionError> {
    let core = match VENDOR_MARKERS.iter().find_map(|marker| raw.find(marker)) {
        Some(idx) => &raw[..idx],
        None => raw,
    };

    parse_lenient(core).ok_or_else(|| VersionError::Unparsable(raw.to_string()))
}

fn parse_lenient(core: &str) -> Option<Version> {
    let pattern = Regex::new(r"^\s*(\d+)(?:\.(\d+))?(?:\.(\d+))?").expect("valid version pattern");
    let captures = pattern.captures(core)?;

    let component = |idx: usize| {
        captures
            .get(idx)
            .map_or(Some(0), |m| m.as_str().parse::<u64>().ok())
    };

    Some(Version::new(component(1)?, component(2)?, component(3)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_version() {
        assert_eq!(
            parse_server_version("9.6.1").unwrap(),
            Version::new(9, 6, 1)
        );
    }

    #[test]
    fn test_missing_patch_and_minor() {
        assert_eq!(
            parse_server_version("10.3").unwrap(),
            Version::new(10, 3, 0)
        );
        assert_eq!(parse_server_version("12").unwrap(), Version::new(12, 0, 0));
    }

    #[test]
    fn test_ubuntu_suffix_matches_truncated_core() {
        let packaged = parse_server_version("9.6.1 (Ubuntu 9.6.1-1.pgdg16.04+1)").unwrap();
        assert_eq!(packaged, parse_server_version("9.6.1").unwrap());
    }

    #[test]
    fn test_debian_suffix_matches_truncated_core() {
        let packaged = parse_server_version("15.4 (Debian 15.4-1.pgdg110+1)").unwrap();
        assert_eq!(packaged, parse_server_version("15.4").unwrap());
        assert_eq!(packaged, Version::new(15, 4, 0));
    }

    #[test]
    fn test_garbage_is_a_hard_failure() {
        let err = parse_server_version("PostgreSQL").unwrap_err();
        assert!(matches!(err, VersionError::Unparsable(_)));
        assert!(parse_server_version("").is_err());
    }

    #[test]
    fn test_versions_are_ordered() {
        let old = parse_server_version("9.6.1 (Ubuntu 9.6.1-1)").unwrap();
        let new = parse_server_version("12.3").unwrap();
        assert!(old < new);
        assert!(new >= Version::new(10, 0, 0));
    }
}
