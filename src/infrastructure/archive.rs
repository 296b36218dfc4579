//! Tarball acquisition for local-upload sources.
//!
//! Downloads a signed-URL gzip tarball and unpacks it into the work
//! directory. Extraction is hardened: entries whose cleaned path escapes the
//! destination and symlinks with absolute or escaping targets are rejected.

use crate::error::FetchError;
use flate2::read::GzDecoder;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tar::Archive;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Download `url` and extract it into `dest`.
pub async fn fetch_and_extract(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<(), FetchError> {
    let download_failed = |message: String| FetchError::DownloadFailed {
        url: url.to_string(),
        message,
    };

    info!("📥 Downloading source bundle");
    let response = tokio::select! {
        response = client.get(url).send() => {
            response.map_err(|e| download_failed(e.to_string()))?
        }
        _ = cancel.cancelled() => {
            return Err(download_failed("download cancelled".to_string()));
        }
    };

    if !response.status().is_success() {
        return Err(download_failed(format!("status {}", response.status())));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| download_failed(e.to_string()))?;

    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || extract_tar_gz(bytes.as_ref(), &dest))
        .await
        .map_err(|e| FetchError::ExtractFailed(e.to_string()))?
}

/// Unpack a gzip tarball from `reader` into `dest`.
pub fn extract_tar_gz<R: Read>(reader: R, dest: &Path) -> Result<(), FetchError> {
    let tar = GzDecoder::new(reader);
    let mut archive = Archive::new(tar);
    archive.set_overwrite(true);

    let entries = archive
        .entries()
        .map_err(|e| FetchError::ExtractFailed(e.to_string()))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| FetchError::ExtractFailed(e.to_string()))?;
        let raw_path = entry
            .path()
            .map_err(|e| FetchError::ExtractFailed(e.to_string()))?
            .into_owned();

        let cleaned = clean_entry_path(&raw_path)?;

        if entry.header().entry_type().is_symlink() {
            check_symlink(&raw_path, &cleaned, &entry)?;
        }

        let target = dest.join(&cleaned);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| FetchError::ExtractFailed(e.to_string()))?;
        }
        entry
            .unpack(&target)
            .map_err(|e| FetchError::ExtractFailed(e.to_string()))?;
    }

    Ok(())
}

/// Normalize an entry path, rejecting absolute paths and `..` escapes.
fn clean_entry_path(path: &Path) -> Result<PathBuf, FetchError> {
    let escape = || FetchError::PathEscape {
        path: path.display().to_string(),
    };

    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => cleaned.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !cleaned.pop() {
                    return Err(escape());
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(escape()),
        }
    }
    Ok(cleaned)
}

fn check_symlink<R: Read>(
    raw_path: &Path,
    cleaned: &Path,
    entry: &tar::Entry<'_, R>,
) -> Result<(), FetchError> {
    let link = entry
        .link_name()
        .map_err(|e| FetchError::ExtractFailed(e.to_string()))?
        .ok_or_else(|| {
            FetchError::ExtractFailed(format!("symlink {} has no target", raw_path.display()))
        })?;

    if link.is_absolute() {
        return Err(FetchError::AbsoluteSymlink {
            path: raw_path.display().to_string(),
            target: link.display().to_string(),
        });
    }

    // The target resolves relative to the link's own directory; it must stay
    // inside the destination.
    let base = cleaned.parent().unwrap_or_else(|| Path::new(""));
    clean_entry_path(&base.join(&link)).map_err(|_| FetchError::PathEscape {
        path: raw_path.display().to_string(),
    })?;

    Ok(())
}
