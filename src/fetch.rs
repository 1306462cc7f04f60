//! Repository snapshot acquisition: download a zip archive of the tracked
//! branch and unpack it into a freshly emptied working directory.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info};
use zip::ZipArchive;

use crate::error::{DeployError, Result};

/// File name prefix of the downloaded archive while it is being extracted.
pub const ARCHIVE_PREFIX: &str = "site-";

/// An extracted copy of the repository at fetch time.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub root: PathBuf,
    /// First path component of every archive entry, sorted.
    pub top_level: Vec<String>,
}

impl Snapshot {
    /// Directory holding the site sources. GitHub archives wrap everything
    /// in a single `{repo}-{branch}/` directory; otherwise the root is used.
    pub fn source_dir(&self) -> PathBuf {
        match self.top_level.as_slice() {
            [only] if self.root.join(only).is_dir() => self.root.join(only),
            _ => self.root.clone(),
        }
    }
}

#[derive(Clone, Default)]
pub struct ArchiveFetcher {
    client: reqwest::Client,
}

impl ArchiveFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Purge `work_dir`, download `url` and extract it there. Single attempt.
    pub async fn fetch(&self, url: &str, work_dir: &Path) -> Result<Snapshot> {
        reset_dir(work_dir).await?;

        info!("Downloading archive from {}", url);
        let body = self.download(url).await?;
        debug!("Downloaded {} bytes", body.len());

        let work_dir = work_dir.to_path_buf();
        let scratch = scratch_dir(&work_dir);
        tokio::task::spawn_blocking(move || -> Result<Snapshot> {
            // Removed from disk when dropped, on every return path.
            let mut archive = tempfile::Builder::new()
                .prefix(ARCHIVE_PREFIX)
                .suffix(".zip")
                .tempfile_in(&scratch)?;
            archive.write_all(&body)?;
            archive.flush()?;

            let top_level = extract_zip(archive.path(), &work_dir)?;
            Ok(Snapshot {
                root: work_dir,
                top_level,
            })
        })
        .await
        .map_err(|e| DeployError::Extraction(format!("extraction task failed: {}", e)))?
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DeployError::Transport(format!("GET {} failed: {}", url, e)))?
            .error_for_status()
            .map_err(|e| DeployError::Transport(format!("GET {} failed: {}", url, e)))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| DeployError::Transport(format!("reading body of {} failed: {}", url, e)))?;
        Ok(bytes.to_vec())
    }
}

/// Where the downloaded archive is kept during extraction: next to the work
/// dir, so it never ends up inside the tree being extracted.
pub fn scratch_dir(work_dir: &Path) -> PathBuf {
    work_dir
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(std::env::temp_dir)
}

/// Remove `dir` entirely and recreate it empty.
pub async fn reset_dir(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!("Removed stale work dir {}", dir.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    tokio::fs::create_dir_all(dir).await?;
    Ok(())
}

/// Extract every entry of `archive` under `target`, keeping unix modes.
/// Returns the sorted set of top-level names. Anything wrong with an entry,
/// including a bad checksum, is an extraction error.
pub fn extract_zip(archive: &Path, target: &Path) -> Result<Vec<String>> {
    info!("Unzipping site contents into {}", target.display());
    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(file)
        .map_err(|e| DeployError::Extraction(format!("cannot read archive: {}", e)))?;

    fs::create_dir_all(target)?;
    let mut top_level = BTreeSet::new();
    // Directory modes are applied once their children are in place.
    let mut dir_modes = Vec::new();

    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|e| DeployError::Extraction(format!("cannot read entry {}: {}", index, e)))?;
        let name = entry.name().to_string();
        let entry_error = |e: io::Error| DeployError::Extraction(format!("{}: {}", name, e));

        let destination = confined_path(target, &name)?;
        if destination == target {
            continue;
        }
        if let Ok(relative) = destination.strip_prefix(target) {
            if let Some(Component::Normal(first)) = relative.components().next() {
                top_level.insert(first.to_string_lossy().into_owned());
            }
        }

        if entry.is_dir() {
            fs::create_dir_all(&destination).map_err(entry_error)?;
            if let Some(mode) = entry.unix_mode() {
                dir_modes.push((destination, mode));
            }
            continue;
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(entry_error)?;
        }
        let mut output = File::create(&destination).map_err(entry_error)?;
        io::copy(&mut entry, &mut output).map_err(entry_error)?;

        if let Some(mode) = entry.unix_mode() {
            set_mode(&destination, mode).map_err(entry_error)?;
        }
    }

    // Deepest first, so a restrictive parent never blocks its children.
    for (dir, mode) in dir_modes.iter().rev() {
        set_mode(dir, *mode)
            .map_err(|e| DeployError::Extraction(format!("{}: {}", dir.display(), e)))?;
    }

    Ok(top_level.into_iter().collect())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Resolve an archive entry name under `root`, refusing anything that
/// could land outside it.
pub fn confined_path(root: &Path, name: &str) -> Result<PathBuf> {
    let mut path = root.to_path_buf();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(DeployError::Extraction(format!(
                    "entry '{}' escapes the extraction root",
                    name
                )));
            }
        }
    }
    Ok(path)
}
