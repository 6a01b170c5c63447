//! [`MountTable`] backed by the running host.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use tokio::fs::DirBuilder;
use tokio::process::Command;
use tracing::debug;

use super::{MountArgs, MountEntry, MountTable, PathKind};
use crate::error::CsiError;

const PROC_MOUNTS: &str = "/proc/self/mounts";

/// Reads `/proc/self/mounts` and runs `mount(8)` / `umount(8)`.
#[derive(Debug, Clone)]
pub struct SystemMountTable {
    mounts_file: PathBuf,
}

impl Default for SystemMountTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemMountTable {
    /// Table over `/proc/self/mounts`.
    pub fn new() -> Self {
        Self {
            mounts_file: PathBuf::from(PROC_MOUNTS),
        }
    }

    /// Table that reads mount entries from `mounts_file` instead of procfs.
    pub fn with_mounts_file(mounts_file: impl Into<PathBuf>) -> Self {
        Self {
            mounts_file: mounts_file.into(),
        }
    }
}

/// Parse the contents of a `/proc/<pid>/mounts` style file.
///
/// Format: `<device> <mountpoint> <fstype> <options> <dump> <pass>`.
/// Fields use octal escapes (`\040` for space, etc.); lines with fewer than
/// four fields are skipped.
pub(crate) fn parse_mounts(contents: &str) -> Vec<MountEntry> {
    contents
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let path = fields.next()?;
            let fs_type = fields.next()?;
            let options = fields.next()?;
            Some(MountEntry {
                source: unescape(source),
                path: PathBuf::from(unescape(path)),
                fs_type: fs_type.to_owned(),
                options: options.split(',').map(str::to_owned).collect(),
            })
        })
        .collect()
}

/// Decode the `\ooo` escapes the kernel uses for whitespace and backslashes.
fn unescape(field: &str) -> String {
    if !field.contains('\\') {
        return field.to_owned();
    }
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..=i + 3].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let value = bytes[i + 1..=i + 3]
                .iter()
                .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
            if let Ok(byte) = u8::try_from(value) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Join stdout and stderr of a finished command for error reporting.
fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(stderr);
    }
    if text.is_empty() {
        text = format!("exited with {}", output.status);
    }
    text
}

#[async_trait]
impl MountTable for SystemMountTable {
    async fn mounts(&self) -> Result<Vec<MountEntry>, CsiError> {
        let contents = tokio::fs::read_to_string(&self.mounts_file)
            .await
            .map_err(|e| {
                CsiError::Internal(format!(
                    "could not reliably determine existing mount status: read {}: {e}",
                    self.mounts_file.display()
                ))
            })?;
        Ok(parse_mounts(&contents))
    }

    async fn mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<(), CsiError> {
        let target_str = target.to_string_lossy();
        let args = MountArgs::new(source, &target_str)
            .fs_type(fs_type)
            .options(options)
            .build();
        debug!(?args, "mount");

        let output = Command::new("mount")
            .args(&args)
            .output()
            .await
            .map_err(|e| CsiError::MountFailed {
                path: target_str.to_string(),
                reason: format!("spawn mount: {e}"),
            })?;

        if !output.status.success() {
            return Err(CsiError::MountFailed {
                path: target_str.to_string(),
                reason: combined_output(&output),
            });
        }
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> Result<(), CsiError> {
        debug!(target = %target.display(), "umount");

        let output = Command::new("umount")
            .arg(target)
            .output()
            .await
            .map_err(|e| CsiError::UnmountFailed {
                path: target.display().to_string(),
                reason: format!("spawn umount: {e}"),
            })?;

        if !output.status.success() {
            return Err(CsiError::UnmountFailed {
                path: target.display().to_string(),
                reason: combined_output(&output),
            });
        }
        Ok(())
    }

    async fn path_kind(&self, path: &Path) -> Result<PathKind, CsiError> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => Ok(PathKind::Directory),
            Ok(_) => Ok(PathKind::Other),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(PathKind::Missing),
            Err(e) => Err(CsiError::Internal(format!(
                "stat {}: {e}",
                path.display()
            ))),
        }
    }

    async fn mkdir(&self, path: &Path) -> Result<bool, CsiError> {
        match self.path_kind(path).await? {
            PathKind::Directory => Ok(false),
            PathKind::Other => Err(CsiError::Internal(format!(
                "existing path {} is not a directory",
                path.display()
            ))),
            PathKind::Missing => {
                DirBuilder::new()
                    .mode(0o755)
                    .create(path)
                    .await
                    .map_err(|e| {
                        CsiError::Internal(format!("create dir {}: {e}", path.display()))
                    })?;
                debug!(path = %path.display(), "created directory");
                Ok(true)
            }
        }
    }

    async fn remove_dir(&self, path: &Path) -> Result<(), CsiError> {
        tokio::fs::remove_dir(path)
            .await
            .map_err(|e| CsiError::Internal(format!("remove dir {}: {e}", path.display())))
    }
}
