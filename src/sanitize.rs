//! Validation and normalization of untrusted, rule-supplied destination paths.
//!
//! Every check is a standalone function so each rule can be exercised on its own; [`PathSanitizer`]
//! runs them in a fixed order and the first failure wins.
//!
//! The output, [`SanitizedPath`], is purely lexical. Joining it to a base directory and proving the
//! result still lives under that base against live filesystem state is [`ensure_within`]'s job.
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Error, PathRejection, Result};
use crate::policy::PathRules;

/// Component names that address OS-managed locations. Matched case-insensitively.
pub const RESERVED_NAMES: &[&str] = &[
    ".Trash",
    ".Trashes",
    ".Spotlight-V100",
    ".DocumentRevisions-V100",
    ".fseventsd",
    ".DS_Store",
    ".TemporaryItems",
    ".VolumeIcon.icns",
    ".vol",
    "System",
    "Library",
    "private",
    "bin",
    "sbin",
    "usr",
    "var",
    "tmp",
    "etc",
    "dev",
    "cores",
    "proc",
];

/// Leading segments that name system roots even without a leading slash (`Users/alice`).
///
/// Only roots with no plausible meaning as a folder inside home belong here; `Applications`,
/// for one, is an ordinary per-user folder.
pub const SYSTEM_PREFIXES: &[&str] = &[
    "Users", "Volumes", "System", "Library", "private", "bin", "sbin", "usr", "etc", "var", "dev",
];

/// Characters refused inside any component, in addition to NUL.
pub const FORBIDDEN_CHARACTERS: &[char] = &[':', '<', '>', '|', '"'];

/// A destination path that passed every sanitizer rule.
///
/// Never contains `.`/`..`, a leading separator, a reserved name, a NUL byte, or an over-long
/// component; only [`PathSanitizer::sanitize`] constructs one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SanitizedPath {
    components: Vec<String>,
}

impl SanitizedPath {
    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn to_path_buf(&self) -> PathBuf {
        self.components.iter().collect()
    }

    /// Lexically join onto `base`. Callers must still run [`ensure_within`] once the directories
    /// exist.
    pub fn join_onto(&self, base: &Path) -> PathBuf {
        let mut out = base.to_path_buf();
        for component in &self.components {
            out.push(component);
        }
        out
    }
}

impl fmt::Display for SanitizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.components.join("/"))
    }
}

pub fn check_not_empty(trimmed: &str) -> std::result::Result<(), PathRejection> {
    if trimmed.is_empty() {
        return Err(PathRejection::Empty);
    }
    Ok(())
}

pub fn check_no_nul(raw: &str) -> std::result::Result<(), PathRejection> {
    if raw.contains('\0') {
        return Err(PathRejection::NulByte);
    }
    Ok(())
}

pub fn check_not_absolute(raw: &str) -> std::result::Result<(), PathRejection> {
    if raw.starts_with('/') || raw.starts_with('\\') {
        return Err(PathRejection::Absolute);
    }
    if raw.starts_with('~') {
        return Err(PathRejection::HomeShorthand);
    }
    Ok(())
}

pub fn check_no_system_prefix(raw: &str) -> std::result::Result<(), PathRejection> {
    let first = raw.split('/').next().unwrap_or(raw);
    match SYSTEM_PREFIXES
        .iter()
        .find(|prefix| prefix.eq_ignore_ascii_case(first))
    {
        Some(prefix) => Err(PathRejection::SystemPrefix {
            prefix: format!("{prefix}/"),
        }),
        None => Ok(()),
    }
}

pub fn check_total_length(raw: &str, max_chars: usize) -> std::result::Result<(), PathRejection> {
    let chars = raw.chars().count();
    if chars > max_chars {
        return Err(PathRejection::TooLong { chars, max_chars });
    }
    Ok(())
}

/// Checks a single component against dot, length, character, and reserved-name rules.
pub fn check_component(
    component: &str,
    max_chars: usize,
    extra_reserved: &[String],
) -> std::result::Result<(), PathRejection> {
    if component == "." || component == ".." {
        return Err(PathRejection::DotComponent);
    }
    let chars = component.chars().count();
    if chars > max_chars {
        return Err(PathRejection::ComponentTooLong { chars, max_chars });
    }
    if component.contains('\0') {
        return Err(PathRejection::NulByte);
    }
    if let Some(character) = component
        .chars()
        .find(|ch| FORBIDDEN_CHARACTERS.contains(ch))
    {
        return Err(PathRejection::ForbiddenCharacter { character });
    }
    if is_reserved_name(component, extra_reserved) {
        return Err(PathRejection::ReservedName {
            name: component.to_string(),
        });
    }
    Ok(())
}

pub fn is_reserved_name(component: &str, extra_reserved: &[String]) -> bool {
    RESERVED_NAMES
        .iter()
        .any(|name| name.eq_ignore_ascii_case(component))
        || extra_reserved
            .iter()
            .any(|name| name.eq_ignore_ascii_case(component))
}

#[derive(Debug, Clone, Default)]
pub struct PathSanitizer {
    rules: PathRules,
}

impl PathSanitizer {
    pub fn new(rules: PathRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &PathRules {
        &self.rules
    }

    pub fn sanitize(&self, destination_relative_path: &str) -> Result<SanitizedPath> {
        self.sanitize_reason(destination_relative_path)
            .map_err(Error::PathRejected)
    }

    fn sanitize_reason(&self, raw: &str) -> std::result::Result<SanitizedPath, PathRejection> {
        let trimmed = raw.trim();
        check_not_empty(trimmed)?;
        check_no_nul(trimmed)?;
        check_not_absolute(trimmed)?;
        check_no_system_prefix(trimmed)?;
        check_total_length(trimmed, self.rules.max_path_chars)?;

        let mut components = Vec::new();
        // Empty segments from `a//b` or a trailing `/` carry no meaning and are dropped.
        for component in trimmed.split('/').filter(|part| !part.is_empty()) {
            check_component(
                component,
                self.rules.max_component_chars,
                &self.rules.extra_reserved_names,
            )?;
            components.push(component.to_string());
        }
        if components.is_empty() {
            return Err(PathRejection::Empty);
        }
        Ok(SanitizedPath { components })
    }

    /// Re-check one component that is about to be created on disk.
    pub fn recheck_component(&self, component: &str) -> Result<()> {
        check_component(
            component,
            self.rules.max_component_chars,
            &self.rules.extra_reserved_names,
        )
        .map_err(Error::PathRejected)
    }
}

/// Canonicalize `candidate` (which must exist) and confirm it is `base` or a descendant of it.
///
/// `base` must already be canonical. Symlinks anywhere along `candidate` are resolved first, so a
/// linked intermediate directory pointing elsewhere is caught here.
pub fn ensure_within(base: &Path, candidate: &Path) -> Result<PathBuf> {
    let canonical = candidate
        .canonicalize()
        .map_err(|err| Error::io_path("canonicalize", candidate, err))?;
    if !canonical.starts_with(base) {
        tracing::debug!(
            base = %base.display(),
            candidate = %canonical.display(),
            "destination escapes boundary"
        );
        return Err(Error::PathRejected(PathRejection::EscapesBoundary));
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sanitizer() -> PathSanitizer {
        PathSanitizer::default()
    }

    fn rejection(raw: &str) -> PathRejection {
        match sanitizer().sanitize(raw) {
            Err(Error::PathRejected(reason)) => reason,
            other => panic!("expected rejection for {raw:?}, got {other:?}"),
        }
    }

    #[test]
    fn accepts_documented_examples() {
        for raw in ["Pictures", "Documents/Work", ".hidden", "My Documents"] {
            let sanitized = sanitizer().sanitize(raw).expect("accepted");
            assert_eq!(sanitized.to_string(), raw);
        }
    }

    #[test]
    fn accepts_punctuation_and_unicode() {
        let sanitized = sanitizer()
            .sanitize("Projects/2024 (Q1) - Notes/Café & Co")
            .expect("accepted");
        assert_eq!(sanitized.components().len(), 3);
    }

    #[test]
    fn trims_whitespace_and_drops_empty_segments() {
        let sanitized = sanitizer().sanitize("  Documents//Work/  ").expect("accepted");
        assert_eq!(sanitized.to_string(), "Documents/Work");
    }

    #[test]
    fn sanitize_is_idempotent() {
        for raw in [
            "Pictures",
            " Documents/Work ",
            "a//b/c/",
            ".hidden/.nested",
            "My Documents/Tax 2023",
        ] {
            let once = sanitizer().sanitize(raw).expect("first pass");
            let twice = sanitizer().sanitize(&once.to_string()).expect("second pass");
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn rejects_empty_and_whitespace() {
        assert_eq!(rejection(""), PathRejection::Empty);
        assert_eq!(rejection("   \t"), PathRejection::Empty);
        assert_eq!(rejection("///"), PathRejection::Absolute);
    }

    #[test]
    fn rejects_null_bytes() {
        assert_eq!(rejection("Documents\0/x"), PathRejection::NulByte);
        assert_eq!(check_component("a\0b", 255, &[]), Err(PathRejection::NulByte));
    }

    #[test]
    fn rejects_absolute_and_home_shorthand() {
        assert_eq!(rejection("/etc/passwd"), PathRejection::Absolute);
        assert_eq!(rejection("~/Documents"), PathRejection::HomeShorthand);
        assert_eq!(rejection("~root"), PathRejection::HomeShorthand);
    }

    #[test]
    fn rejects_system_prefixes_case_insensitively() {
        for raw in ["Users/alice", "volumes/External", "SYSTEM/Library", "Library/Caches"] {
            assert!(
                matches!(rejection(raw), PathRejection::SystemPrefix { .. }),
                "{raw}"
            );
        }
        assert!(check_no_system_prefix("UsersGuide/x").is_ok());
    }

    #[test]
    fn accepts_ordinary_home_folders_named_like_other_roots() {
        for raw in ["Applications", "Applications/Utilities", "home/Projects", "opt", "Network"] {
            let sanitized = sanitizer().sanitize(raw).expect("accepted");
            assert_eq!(sanitized.to_string(), raw);
        }
    }

    #[test]
    fn rejects_dot_components_anywhere() {
        assert_eq!(rejection(".."), PathRejection::DotComponent);
        assert_eq!(rejection("Documents/../.."), PathRejection::DotComponent);
        assert_eq!(rejection("a/./b"), PathRejection::DotComponent);
    }

    #[test]
    fn rejects_forbidden_characters() {
        for ch in FORBIDDEN_CHARACTERS {
            let raw = format!("Docs/a{ch}b");
            assert_eq!(
                rejection(&raw),
                PathRejection::ForbiddenCharacter { character: *ch }
            );
        }
    }

    #[test]
    fn rejects_reserved_names_case_insensitively() {
        assert!(matches!(
            rejection("Documents/.trash"),
            PathRejection::ReservedName { .. }
        ));
        assert!(matches!(
            rejection("Archive/TMP/x"),
            PathRejection::ReservedName { .. }
        ));
        assert!(matches!(
            rejection("Photos/.ds_store"),
            PathRejection::ReservedName { .. }
        ));
    }

    #[test]
    fn honors_extra_reserved_names() {
        let rules = PathRules {
            extra_reserved_names: vec!["Secrets".to_string()],
            ..PathRules::default()
        };
        let err = PathSanitizer::new(rules)
            .sanitize("Documents/secrets")
            .expect_err("extra reserved");
        assert_eq!(err.code(), "path_rejected");
    }

    #[test]
    fn enforces_length_limits_in_characters() {
        let long_component = "é".repeat(256);
        assert_eq!(
            rejection(&long_component),
            PathRejection::ComponentTooLong {
                chars: 256,
                max_chars: 255
            }
        );
        let exactly_255 = "é".repeat(255);
        sanitizer().sanitize(&exactly_255).expect("255 chars is fine");

        let long_path = vec!["abcd"; 210].join("/");
        assert!(matches!(
            rejection(&long_path),
            PathRejection::TooLong { max_chars: 1024, .. }
        ));
    }

    #[test]
    fn rejection_messages_do_not_echo_absolute_paths() {
        let err = sanitizer().sanitize("/Users/alice/secret").expect_err("absolute");
        assert!(!err.to_string().contains("alice"));
    }

    #[test]
    fn ensure_within_accepts_descendants_and_rejects_symlink_escape() {
        let base = tempfile::tempdir().expect("tempdir");
        let outside = tempfile::tempdir().expect("tempdir");
        let base_canonical = base.path().canonicalize().expect("canonicalize");
        std::fs::create_dir(base.path().join("inside")).expect("mkdir");

        let ok = ensure_within(&base_canonical, &base.path().join("inside")).expect("inside");
        assert!(ok.starts_with(&base_canonical));

        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(outside.path(), base.path().join("link"))
                .expect("symlink");
            let err = ensure_within(&base_canonical, &base.path().join("link"))
                .expect_err("escape");
            assert!(matches!(
                err,
                Error::PathRejected(PathRejection::EscapesBoundary)
            ));
        }
        let _ = outside;
    }
}
