use std::{
    fs, io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, Url};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, ToolchainError};

/// Fetches remote archives and expands them in place.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Downloads `url` into the file `archive`.
    async fn download(&self, url: &str, archive: &Path) -> Result<()>;

    /// Expands `archive` into `dest`, then removes the archive.
    async fn expand(&self, archive: &Path, dest: &Path) -> Result<()>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("tryit/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ToolchainError::Download {
                url: String::new(),
                detail: format!("failed to build http client: {e}"),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn download(&self, url: &str, archive: &Path) -> Result<()> {
        let parsed = parse_download_url(url)?;
        info!("Downloading artifact {url}");
        download_artifact(&self.client, parsed, archive).await?;
        info!("Saved artifact {}", archive.display());
        Ok(())
    }

    async fn expand(&self, archive: &Path, dest: &Path) -> Result<()> {
        let archive = archive.to_path_buf();
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || extract_zip(&archive, &dest))
            .await
            .map_err(|e| ToolchainError::io("archive extraction task failed", io::Error::other(e)))?
    }
}

pub fn parse_download_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).map_err(|e| ToolchainError::MalformedUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(ToolchainError::MalformedUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme {other}"),
        }),
    }
}

async fn download_artifact(client: &Client, url: Url, dest: &Path) -> Result<()> {
    let url_str = url.to_string();
    let download_err = |detail: String| ToolchainError::Download {
        url: url_str.clone(),
        detail,
    };

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| ToolchainError::io(format!("failed to create {}", parent.display()), e))?;
    }

    let resp = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| download_err(e.to_string()))?;
    if !resp.status().is_success() {
        return Err(download_err(format!("server answered {}", resp.status())));
    }

    let tmp = dest.with_extension(format!("tmp-{}", Uuid::new_v4()));
    let mut file = tokio::fs::File::create(&tmp)
        .await
        .map_err(|e| ToolchainError::io(format!("failed to create {}", tmp.display()), e))?;

    let mut stream = resp.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(download_err(format!("read failed: {e}")));
            }
        };
        if let Err(e) = file.write_all(&chunk).await {
            let _ = fs::remove_file(&tmp);
            return Err(ToolchainError::io("failed to write download", e));
        }
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| ToolchainError::io("failed to flush download", e))?;
    drop(file);

    fs::rename(&tmp, dest)
        .map_err(|e| ToolchainError::io(format!("failed to finalize {}", dest.display()), e))?;
    debug!("downloaded {written} bytes from {url_str}");
    Ok(())
}

/// Expands a zip archive into `dest` and deletes the archive afterwards.
/// Entries that would escape `dest` are rejected.
pub fn extract_zip(archive: &Path, dest: &Path) -> Result<()> {
    let archive_err = |detail: String| ToolchainError::Archive {
        archive: archive.to_path_buf(),
        detail,
    };

    info!(
        "Extracting archive {} into {}",
        archive.display(),
        dest.display()
    );
    let file = fs::File::open(archive).map_err(|e| archive_err(e.to_string()))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| archive_err(e.to_string()))?;
    fs::create_dir_all(dest).map_err(|e| archive_err(e.to_string()))?;

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(|e| archive_err(e.to_string()))?;
        let relative: PathBuf = match entry.enclosed_name() {
            Some(path) => path.to_path_buf(),
            None => return Err(archive_err(format!("unsafe entry path {}", entry.name()))),
        };
        let out_path = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| archive_err(e.to_string()))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| archive_err(e.to_string()))?;
        }
        let mut out = fs::File::create(&out_path).map_err(|e| archive_err(e.to_string()))?;
        io::copy(&mut entry, &mut out).map_err(|e| archive_err(e.to_string()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&out_path, fs::Permissions::from_mode(mode & 0o7777))
                    .map_err(|e| archive_err(e.to_string()))?;
            }
        }
    }

    fs::remove_file(archive).map_err(|e| archive_err(format!("failed to remove archive: {e}")))?;
    Ok(())
}
