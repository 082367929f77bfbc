//! Filesystem mount operations

use crate::error::RexError;
use eyre::{Context, Result};
use nix::mount::{MntFlags, MsFlags, mount, umount2};
use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

/// Layers for an overlay mount, most precedent first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverlayOptions {
    pub lowerdirs: Vec<PathBuf>,
    pub upperdir: Option<PathBuf>,
    pub workdir: Option<PathBuf>,
}

impl OverlayOptions {
    /// Render the `-o` string handed to the kernel
    pub fn to_option_string(&self) -> Result<OsString> {
        let all = self
            .lowerdirs
            .iter()
            .chain(self.upperdir.iter())
            .chain(self.workdir.iter());
        for path in all {
            check_option_path(path)?;
        }

        let mut options = OsString::from("lowerdir=");
        for (i, lowerdir) in self.lowerdirs.iter().enumerate() {
            if i > 0 {
                options.push(":");
            }
            options.push(lowerdir);
        }
        if let Some(upperdir) = &self.upperdir {
            options.push(",upperdir=");
            options.push(upperdir);
        }
        if let Some(workdir) = &self.workdir {
            options.push(",workdir=");
            options.push(workdir);
        }
        Ok(options)
    }
}

/// Reject paths the overlay option syntax cannot carry
pub fn check_option_path(path: &Path) -> Result<()> {
    if path.as_os_str().as_bytes().iter().any(|b| *b == b':' || *b == b',') {
        return Err(RexError::UnsupportedPath {
            path: path.to_path_buf(),
        }
        .into());
    }
    Ok(())
}

/// Mount an overlay filesystem
pub fn mount_overlay<P: AsRef<Path>>(target: P, overlay: &OverlayOptions) -> Result<()> {
    let options = overlay.to_option_string()?;

    log::info!(
        "mount -t overlay -o {} none {}",
        options.to_string_lossy(),
        target.as_ref().display()
    );
    mount(
        Some("none"),
        target.as_ref(),
        Some("overlay"),
        MsFlags::empty(),
        Some(options.as_os_str()),
    )
    .wrap_err_with(|| format!("Failed to mount overlay on {}", target.as_ref().display()))?;
    log::debug!("Successfully mounted overlay");

    Ok(())
}

/// Lazily unmount `target`
pub fn unmount<P: AsRef<Path>>(target: P) -> Result<()> {
    log::info!("umount -l {}", target.as_ref().display());
    umount2(target.as_ref(), MntFlags::MNT_DETACH)
        .wrap_err_with(|| format!("Failed to unmount {}", target.as_ref().display()))?;

    Ok(())
}

/// Every mount point visible to this process
pub fn mount_points() -> Result<HashSet<PathBuf>> {
    let table = fs::read("/proc/self/mountinfo").wrap_err("Failed to read mountinfo")?;
    Ok(parse_mountinfo(&table))
}

/// Pull the mount point (fifth field) out of each mountinfo line
fn parse_mountinfo(table: &[u8]) -> HashSet<PathBuf> {
    table
        .split(|b| *b == b'\n')
        .filter_map(|line| line.split(|b| *b == b' ').nth(4))
        .map(|field| PathBuf::from(OsString::from_vec(unescape_octal(field))))
        .collect()
}

/// Undo the kernel's `\040`-style escaping of whitespace and backslashes
fn unescape_octal(field: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(field.len());
    let mut i = 0;
    while i < field.len() {
        if field[i] == b'\\' && i + 3 < field.len() {
            let digits = &field[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                if let Ok(byte) = u8::try_from(value) {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(field[i]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_overlay_options_lowerdirs_only() -> Result<()> {
        let overlay = OverlayOptions {
            lowerdirs: vec![
                PathBuf::from("/tmp/.rex/rex.abc123"),
                PathBuf::from("/srv/a"),
                PathBuf::from("/srv/b"),
            ],
            upperdir: None,
            workdir: None,
        };
        assert_eq!(
            overlay.to_option_string()?,
            "lowerdir=/tmp/.rex/rex.abc123:/srv/a:/srv/b"
        );
        Ok(())
    }

    #[test]
    fn test_overlay_options_with_upper() -> Result<()> {
        let overlay = OverlayOptions {
            lowerdirs: vec![PathBuf::from("/tmp/.rex/rex.abc123")],
            upperdir: Some(PathBuf::from("/srv/up")),
            workdir: Some(PathBuf::from("/srv/up.work.XyZ123")),
        };
        assert_eq!(
            overlay.to_option_string()?,
            "lowerdir=/tmp/.rex/rex.abc123,upperdir=/srv/up,workdir=/srv/up.work.XyZ123"
        );
        Ok(())
    }

    #[test]
    fn test_overlay_options_reject_separators() {
        for bad in ["/srv/a,b", "/srv/a:b"] {
            let overlay = OverlayOptions {
                lowerdirs: vec![PathBuf::from(bad)],
                ..Default::default()
            };
            let err = overlay.to_option_string().unwrap_err();
            assert!(matches!(
                err.downcast_ref::<RexError>(),
                Some(RexError::UnsupportedPath { .. })
            ));
        }
    }

    #[test]
    fn test_parse_mountinfo() {
        let table = b"22 1 0:21 / / rw,relatime shared:1 - ext4 /dev/sda1 rw\n\
36 22 0:32 / /tmp/with\\040space rw - tmpfs tmpfs rw\n\
37 22 0:33 / /proc rw,nosuid - proc proc rw\n";
        let points = parse_mountinfo(table);

        assert!(points.contains(Path::new("/")));
        assert!(points.contains(Path::new("/proc")));
        assert!(points.contains(Path::new("/tmp/with space")));
        assert_eq!(points.len(), 3);
    }

    #[test]
    fn test_unescape_leaves_plain_backslash() {
        assert_eq!(unescape_octal(b"a\\b"), b"a\\b".to_vec());
        assert_eq!(unescape_octal(b"a\\134b"), b"a\\b".to_vec());
        assert_eq!(unescape_octal(b"end\\04"), b"end\\04".to_vec());
    }

    #[test]
    fn test_mount_overlay_nonexistent_target() {
        let overlay = OverlayOptions {
            lowerdirs: vec![
                PathBuf::from("/nonexistent/a"),
                PathBuf::from("/nonexistent/b"),
            ],
            ..Default::default()
        };
        let result = mount_overlay("/nonexistent/overlay/mount/point", &overlay);
        assert!(result.is_err());
    }

    #[test]
    fn test_mount_overlay_needs_privileges() {
        let tmp = TempDir::new().unwrap();
        let lower = tmp.path().join("lower");
        let target = tmp.path().join("merged");
        std::fs::create_dir(&lower).unwrap();
        std::fs::create_dir(&target).unwrap();

        let overlay = OverlayOptions {
            lowerdirs: vec![target.clone(), lower],
            ..Default::default()
        };
        // Only assert the unprivileged outcome; as root this would really mount
        if nix::unistd::getuid().as_raw() != 0 {
            let result = mount_overlay(&target, &overlay);
            assert!(result.is_err());
            let err_msg = format!("{:#}", result.unwrap_err());
            assert!(
                err_msg.contains("Operation not permitted")
                    || err_msg.contains("Failed to mount overlay")
            );
        }
    }

    #[test]
    fn test_unmount_nonexistent_target() {
        let result = unmount("/nonexistent/mount/point");
        assert!(result.is_err());
    }

    #[test]
    fn test_unmount_not_mounted() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("notmounted");
        std::fs::create_dir(&target).unwrap();

        // Lazy unmount still refuses a plain directory
        let result = unmount(&target);
        assert!(result.is_err());
    }
}
