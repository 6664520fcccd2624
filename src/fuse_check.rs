//! FUSE availability checks, run before anything touches the mount point.

#[cfg(any(target_os = "linux", target_os = "macos"))]
use std::path::Path;

/// Errors that can occur when verifying FUSE availability.
#[derive(Debug, thiserror::Error)]
pub enum FuseCheckError {
    /// `/dev/fuse` is missing — the kernel module is not loaded or the
    /// environment (e.g. a container) does not expose it.
    #[error(
        "/dev/fuse is not available. studip-fuse needs the FUSE kernel module;\n\
         try `modprobe fuse`, or grant the container access to /dev/fuse."
    )]
    DeviceMissing,

    /// macFUSE is not installed.
    #[error(
        "macFUSE is not installed. studip-fuse requires macFUSE to mount filesystems.\n\
         Install it from: https://macfuse.github.io/"
    )]
    NotInstalled,
}

/// Verify that FUSE is usable on the current platform.
#[cfg(target_os = "linux")]
pub fn ensure_fuse() -> Result<(), FuseCheckError> {
    if Path::new("/dev/fuse").exists() {
        Ok(())
    } else {
        Err(FuseCheckError::DeviceMissing)
    }
}

/// Verify that FUSE is usable on the current platform.
#[cfg(target_os = "macos")]
pub fn ensure_fuse() -> Result<(), FuseCheckError> {
    let installed = Path::new("/Library/Filesystems/macfuse.fs").is_dir()
        || Path::new("/Library/Filesystems/osxfuse.fs").is_dir();
    if installed {
        Ok(())
    } else {
        Err(FuseCheckError::NotInstalled)
    }
}

/// Verify that FUSE is usable on the current platform.
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn ensure_fuse() -> Result<(), FuseCheckError> {
    Ok(())
}
