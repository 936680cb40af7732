//! Artifact fetcher
//!
//! Downloads run artifacts into the scratch directory and stages cluster access
//! archives into the output directory.

use async_trait::async_trait;
use clusterpool_client::Credentials;
use reqwest::{Client, Url};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::service::error::ArtifactError;

pub type Result<T> = std::result::Result<T, ArtifactError>;

/// Service trait for retrieving run artifacts
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Downloads `url` into the scratch directory and returns the local path
    async fn fetch(&self, url: &str) -> Result<PathBuf>;

    /// Downloads an access archive and stages its contents
    ///
    /// The archive must hold a single top-level directory named like the
    /// archive without its extension. That directory's children end up directly
    /// in the output directory, which is returned.
    async fn fetch_and_unpack(&self, url: &str) -> Result<PathBuf>;
}

/// Fetcher that downloads over authenticated HTTP and unpacks with `tar`
pub struct HttpArtifactFetcher {
    client: Client,
    credentials: Credentials,
    scratch_dir: PathBuf,
    output_dir: PathBuf,
}

impl HttpArtifactFetcher {
    pub fn new(
        client: Client,
        credentials: Credentials,
        scratch_dir: PathBuf,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            client,
            credentials,
            scratch_dir,
            output_dir,
        }
    }
}

#[async_trait]
impl ArtifactFetcher for HttpArtifactFetcher {
    async fn fetch(&self, url: &str) -> Result<PathBuf> {
        let file_name =
            file_name_from_url(url).ok_or_else(|| ArtifactError::InvalidUrl(url.to_string()))?;
        let path = self.scratch_dir.join(file_name);

        let transport = |source: reqwest::Error| ArtifactError::Transport {
            url: url.to_string(),
            source,
        };

        let mut response = self
            .client
            .get(url)
            .basic_auth(&self.credentials.user, Some(&self.credentials.token))
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ArtifactError::Download {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|e| ArtifactError::io(&self.scratch_dir, e))?;
        let mut file = fs::File::create(&path)
            .await
            .map_err(|e| ArtifactError::io(&path, e))?;

        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(transport)? {
            file.write_all(&chunk)
                .await
                .map_err(|e| ArtifactError::io(&path, e))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| ArtifactError::io(&path, e))?;

        info!("Downloaded {} ({} bytes)", path.display(), written);
        Ok(path)
    }

    async fn fetch_and_unpack(&self, url: &str) -> Result<PathBuf> {
        let archive = self.fetch(url).await?;
        unpack_archive(&archive, &self.output_dir).await?;
        info!("Cluster access details staged in {}", self.output_dir.display());
        Ok(self.output_dir.clone())
    }
}

/// Last path segment of a URL, ignoring any query string
///
/// The segment keeps its percent-encoding, so an encoded `/` can never turn
/// into a path separator on disk.
pub fn file_name_from_url(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    let name = url.path_segments()?.next_back()?;
    match name {
        "" | "." | ".." => None,
        name => Some(name.to_string()),
    }
}

/// Unpacks `archive` and moves its top-level directory's children into `output_dir`
///
/// The layout is checked against the archive listing before anything is written,
/// so a mismatch leaves `output_dir` untouched. The staging directory is removed
/// whether or not the extraction succeeds.
pub async fn unpack_archive(archive: &Path, output_dir: &Path) -> Result<()> {
    let expected = archive
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| ArtifactError::InvalidUrl(archive.display().to_string()))?
        .to_string();

    let listing = run_tar(&[OsStr::new("-tf"), archive.as_os_str()]).await?;
    let top_level = top_level_entries(&listing);
    if top_level != [format!("{}/", expected)] {
        return Err(ArtifactError::ArchiveLayout {
            archive: archive.to_path_buf(),
            expected: format!("{}/", expected),
            found: top_level,
        });
    }

    // Staging lives inside the output dir so the final moves are plain renames
    let staging = output_dir.join(format!(".{}.unpack", expected));
    remove_path(&staging).await?;

    let staged = extract_into(archive, &staging, &expected, output_dir).await;
    let cleaned = remove_path(&staging).await;
    staged.and(cleaned)
}

async fn extract_into(
    archive: &Path,
    staging: &Path,
    root_name: &str,
    output_dir: &Path,
) -> Result<()> {
    fs::create_dir_all(staging)
        .await
        .map_err(|e| ArtifactError::io(staging, e))?;

    run_tar(&[
        OsStr::new("-xf"),
        archive.as_os_str(),
        OsStr::new("-C"),
        staging.as_os_str(),
    ])
    .await?;
    debug!("Extracted {} into {}", archive.display(), staging.display());

    let root = staging.join(root_name);
    let mut entries = fs::read_dir(&root)
        .await
        .map_err(|e| ArtifactError::io(&root, e))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ArtifactError::io(&root, e))?
    {
        let target = output_dir.join(entry.file_name());
        remove_path(&target).await?;
        fs::rename(entry.path(), &target)
            .await
            .map_err(|e| ArtifactError::io(&target, e))?;
    }

    Ok(())
}

/// Distinct top-level names in a `tar -t` listing, in first-seen order
///
/// Directories carry a trailing `/`, whether the listing names them directly or
/// only through their children.
fn top_level_entries(listing: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for line in listing.lines() {
        let entry = line.trim_start_matches("./");
        let name = match entry.split_once('/') {
            Some((first, _)) => format!("{}/", first),
            None => entry.to_string(),
        };
        if matches!(name.as_str(), "" | "/" | "." | "./") {
            continue;
        }
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

async fn run_tar(args: &[&OsStr]) -> Result<String> {
    let command = format!(
        "tar {}",
        args.iter()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    );

    let output = Command::new("tar")
        .args(args)
        .output()
        .await
        .map_err(|e| ArtifactError::io("tar", e))?;

    if !output.status.success() {
        return Err(ArtifactError::CommandFailed {
            command,
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

async fn remove_path(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(ArtifactError::io(path, e)),
    };

    let removed = if meta.is_dir() {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    };
    removed.map_err(|e| ArtifactError::io(path, e))
}
