//! Fetch-by-URL downloader.
//!
//! A download either yields a complete file or fails: bytes land in a `.part`
//! file and are renamed into place only after the body was fully read.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::hash::sha256_bytes;

/// Errors raised by a [`Downloader`].
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("GET {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("GET {url} failed: {message}")]
    Network { url: String, message: String },

    #[error("unsupported URL scheme '{scheme}' in {url}")]
    UnsupportedScheme { url: String, scheme: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn io_err(path: impl Into<PathBuf>, source: io::Error) -> TransportError {
    TransportError::Io {
        path: path.into(),
        source,
    }
}

/// Fetches a URL into a local file inside `workdir`.
pub trait Downloader: Send + Sync {
    /// Download `url` and return the path of the fully downloaded file.
    fn fetch(&self, url: &Url, workdir: &Path) -> Result<PathBuf, TransportError>;
}

/// `http`/`https` via `ureq`, `file` via a local copy.
#[derive(Clone)]
pub struct UrlDownloader {
    agent: ureq::Agent,
    retries: u32,
}

impl Default for UrlDownloader {
    fn default() -> Self {
        Self::new(filemirror_core::types::DEFAULT_RETRIES)
    }
}

impl UrlDownloader {
    /// A downloader retrying network failures and 5xx responses `retries` times.
    pub fn new(retries: u32) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(30))
            .timeout_read(Duration::from_secs(300))
            .build();
        Self { agent, retries }
    }

    fn fetch_http(&self, url: &Url, part: &Path) -> Result<(), TransportError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let retry = attempt <= self.retries;
            match self.agent.get(url.as_str()).call() {
                Ok(response) => {
                    let mut file = File::create(part).map_err(|e| io_err(part, e))?;
                    let mut body = response.into_reader();
                    match io::copy(&mut body, &mut file) {
                        Ok(_) => return Ok(()),
                        Err(e) if retry => {
                            tracing::warn!("GET {url} interrupted ({e}), retrying");
                        }
                        Err(e) => {
                            return Err(TransportError::Network {
                                url: url.to_string(),
                                message: e.to_string(),
                            })
                        }
                    }
                }
                Err(ureq::Error::Status(status, _)) if status >= 500 && retry => {
                    tracing::warn!("GET {url} returned HTTP {status}, retrying");
                }
                Err(ureq::Error::Status(status, _)) => {
                    return Err(TransportError::Status {
                        url: url.to_string(),
                        status,
                    })
                }
                Err(ureq::Error::Transport(t)) if retry => {
                    tracing::warn!("GET {url} failed ({t}), retrying");
                }
                Err(ureq::Error::Transport(t)) => {
                    return Err(TransportError::Network {
                        url: url.to_string(),
                        message: t.to_string(),
                    })
                }
            }
            std::thread::sleep(Duration::from_millis(250 * u64::from(attempt)));
        }
    }

    fn fetch_file(&self, url: &Url, part: &Path) -> Result<(), TransportError> {
        let src = url.to_file_path().map_err(|()| TransportError::Network {
            url: url.to_string(),
            message: "not a local file path".to_string(),
        })?;
        std::fs::copy(&src, part).map_err(|e| io_err(&src, e))?;
        Ok(())
    }
}

impl Downloader for UrlDownloader {
    fn fetch(&self, url: &Url, workdir: &Path) -> Result<PathBuf, TransportError> {
        // One file per URL, so a URL fetched twice in a sync is served from disk.
        let dest = workdir.join(sha256_bytes(url.as_str().as_bytes()));
        if dest.exists() {
            return Ok(dest);
        }
        let part = dest.with_extension("part");

        let result = match url.scheme() {
            "http" | "https" => self.fetch_http(url, &part),
            "file" => self.fetch_file(url, &part),
            other => Err(TransportError::UnsupportedScheme {
                url: url.to_string(),
                scheme: other.to_string(),
            }),
        };
        if let Err(e) = result {
            let _ = std::fs::remove_file(&part);
            return Err(e);
        }

        std::fs::rename(&part, &dest).map_err(|e| io_err(&dest, e))?;
        tracing::debug!("fetched {url}");
        Ok(dest)
    }
}
