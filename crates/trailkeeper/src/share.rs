//! File hand-off capability.
//!
//! Exported GPX files leave the app through a [`ShareTarget`]. On a phone this
//! is the platform share sheet; the CLI drops files into an outbox directory.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// MIME type of GPX documents.
pub const GPX_MIME_TYPE: &str = "application/gpx+xml";

/// Uniform type identifier of GPX documents.
pub const GPX_UTI: &str = "com.topografix.gpx";

/// Presentation hints for a share request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareOptions {
    /// MIME type of the shared file.
    pub mime_type: String,
    /// Title shown on the share dialog, if any.
    pub dialog_title: Option<String>,
    /// Uniform type identifier, if the platform uses them.
    pub uti: Option<String>,
}

impl ShareOptions {
    /// Options for sharing a GPX file.
    #[must_use]
    pub fn gpx(dialog_title: impl Into<String>) -> Self {
        Self {
            mime_type: GPX_MIME_TYPE.to_string(),
            dialog_title: Some(dialog_title.into()),
            uti: Some(GPX_UTI.to_string()),
        }
    }
}

/// Something a file can be handed off to.
#[async_trait]
pub trait ShareTarget: Send + Sync + fmt::Debug {
    /// Whether sharing is possible right now.
    async fn is_available(&self) -> bool;

    /// Hand `path` off to the target.
    ///
    /// # Errors
    ///
    /// Returns an error if the hand-off fails.
    async fn share(&self, path: &Path, options: &ShareOptions) -> Result<()>;
}

/// Copies shared files into a directory.
#[derive(Debug, Clone)]
pub struct DirectoryShareTarget {
    outbox: PathBuf,
}

impl DirectoryShareTarget {
    /// Create a target that copies into `outbox`, created on first use.
    #[must_use]
    pub fn new(outbox: impl Into<PathBuf>) -> Self {
        Self {
            outbox: outbox.into(),
        }
    }

    /// The outbox directory.
    #[must_use]
    pub fn outbox(&self) -> &Path {
        &self.outbox
    }
}

#[async_trait]
impl ShareTarget for DirectoryShareTarget {
    async fn is_available(&self) -> bool {
        true
    }

    async fn share(&self, path: &Path, options: &ShareOptions) -> Result<()> {
        tokio::fs::create_dir_all(&self.outbox)
            .await
            .map_err(|source| Error::DirectoryCreate {
                path: self.outbox.clone(),
                source,
            })?;

        let file_name = path
            .file_name()
            .ok_or_else(|| Error::internal(format!("not a file: {}", path.display())))?;
        let destination = self.outbox.join(file_name);
        tokio::fs::copy(path, &destination).await?;

        info!(
            file = %destination.display(),
            mime_type = %options.mime_type,
            "Shared file to outbox"
        );
        Ok(())
    }
}

/// A target that is never available, for devices without a share sheet.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableShareTarget;

#[async_trait]
impl ShareTarget for UnavailableShareTarget {
    async fn is_available(&self) -> bool {
        false
    }

    async fn share(&self, path: &Path, _options: &ShareOptions) -> Result<()> {
        debug!(file = %path.display(), "Share requested on unavailable target");
        Err(Error::SharingUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpx_options() {
        let options = ShareOptions::gpx("Share Morning Ride");
        assert_eq!(options.mime_type, "application/gpx+xml");
        assert_eq!(options.uti.as_deref(), Some("com.topografix.gpx"));
        assert_eq!(options.dialog_title.as_deref(), Some("Share Morning Ride"));
    }

    #[tokio::test]
    async fn test_directory_target_copies_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("ride.gpx");
        std::fs::write(&source, "<gpx/>").unwrap();

        let target = DirectoryShareTarget::new(dir.path().join("outbox"));
        assert!(target.is_available().await);
        target
            .share(&source, &ShareOptions::gpx("Share"))
            .await
            .unwrap();

        let copied = std::fs::read_to_string(target.outbox().join("ride.gpx")).unwrap();
        assert_eq!(copied, "<gpx/>");
    }

    #[tokio::test]
    async fn test_unavailable_target() {
        let target = UnavailableShareTarget;
        assert!(!target.is_available().await);
        let err = target
            .share(Path::new("x.gpx"), &ShareOptions::gpx("Share"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SharingUnavailable));
    }
}
