//! Directory arguments and their resolution
//!
//! A dir-spec is `<path>` (sub-mount, mirrored at its own absolute path inside
//! the sandbox) or `<path>:` (layer, merged at the sandbox root). Anything
//! after the colon is an explicit target, which parses but is not supported.

use eyre::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// What the part after the first colon asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSpecifier {
    /// No colon at all
    Mirror,
    /// Colon with nothing after it
    Root,
    /// Colon followed by text
    Explicit(String),
}

impl TargetSpecifier {
    pub fn is_root(&self) -> bool {
        matches!(self, TargetSpecifier::Root)
    }
}

/// Split a raw argument into its source path and target specifier
pub fn split_spec(raw: &str) -> (&str, TargetSpecifier) {
    match raw.split_once(':') {
        None => (raw, TargetSpecifier::Mirror),
        Some((source, "")) => (source, TargetSpecifier::Root),
        Some((source, target)) => (source, TargetSpecifier::Explicit(target.to_string())),
    }
}

/// One user-supplied directory after resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorySpec {
    pub raw: String,
    /// Absolute, symlink-free path of the source
    pub source: PathBuf,
    pub target: TargetSpecifier,
}

impl DirectorySpec {
    /// Parse `raw` and resolve its source to a canonical absolute path.
    ///
    /// The source must exist; this is checked with a stat before resolving.
    pub fn resolve(raw: &str) -> Result<Self> {
        let (source, target) = split_spec(raw);

        fs::metadata(source).wrap_err_with(|| format!("'{}'", source))?;
        let resolved =
            fs::canonicalize(source).wrap_err_with(|| format!("realpath('{}') failed", source))?;

        log::info!("source '{}' target {:?}", resolved.display(), target);

        Ok(Self {
            raw: raw.to_string(),
            source: resolved,
            target,
        })
    }
}

/// Resolve every argument, stopping at the first one that does not exist
pub fn resolve_all<S: AsRef<str>>(raws: &[S]) -> Result<Vec<DirectorySpec>> {
    raws.iter().map(|raw| DirectorySpec::resolve(raw.as_ref())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    #[test]
    fn test_split_without_colon_is_mirror() {
        assert_eq!(split_spec("/data"), ("/data", TargetSpecifier::Mirror));
    }

    #[test]
    fn test_split_trailing_colon_is_root() {
        assert_eq!(split_spec("/data:"), ("/data", TargetSpecifier::Root));
    }

    #[test]
    fn test_split_explicit_target() {
        assert_eq!(
            split_spec("/src:/custom"),
            ("/src", TargetSpecifier::Explicit("/custom".to_string()))
        );
    }

    #[test]
    fn test_split_only_first_colon_counts() {
        assert_eq!(
            split_spec("a:b:c"),
            ("a", TargetSpecifier::Explicit("b:c".to_string()))
        );
    }

    #[test]
    fn test_resolve_is_idempotent() -> Result<()> {
        let tmp = TempDir::new()?;
        let dir = tmp.path().join("layer");
        fs::create_dir(&dir)?;
        let raw = format!("{}:", dir.display());

        let first = DirectorySpec::resolve(&raw)?;
        let second = DirectorySpec::resolve(&raw)?;
        assert_eq!(first, second);
        assert!(first.source.is_absolute());
        assert_eq!(first.target, TargetSpecifier::Root);

        Ok(())
    }

    #[test]
    fn test_resolve_follows_symlinks() -> Result<()> {
        let tmp = TempDir::new()?;
        let real = tmp.path().join("real");
        let link = tmp.path().join("link");
        fs::create_dir(&real)?;
        symlink(&real, &link)?;

        let spec = DirectorySpec::resolve(link.to_str().unwrap())?;
        assert_eq!(spec.source, fs::canonicalize(&real)?);
        assert_eq!(spec.target, TargetSpecifier::Mirror);

        Ok(())
    }

    #[test]
    fn test_resolve_missing_source_fails() {
        let result = DirectorySpec::resolve("/this/path/absolutely/does/not/exist:");
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_keeps_explicit_target_for_later_rejection() -> Result<()> {
        let tmp = TempDir::new()?;
        let raw = format!("{}:/custom", tmp.path().display());

        let spec = DirectorySpec::resolve(&raw)?;
        assert_eq!(spec.target, TargetSpecifier::Explicit("/custom".to_string()));
        assert_eq!(spec.raw, raw);

        Ok(())
    }

    #[test]
    fn test_resolve_all_stops_on_missing() -> Result<()> {
        let tmp = TempDir::new()?;
        let good = tmp.path().display().to_string();
        let raws = vec![good, "/nonexistent/source".to_string()];

        assert!(resolve_all(&raws).is_err());
        Ok(())
    }
}
