//! Content-addressed storage for compiler environment archives.
//!
//! Everything icecream is handed goes through two links: a stable handle under
//! a name we control, and a second link named after the SHA-256 of the bytes.

use std::{
    env,
    fs::{self, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::blocking::Client;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("icewrap-store/", env!("CARGO_PKG_VERSION"));
const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// Prefix of the fingerprint-named link placed next to the stable handle.
pub const FINGERPRINT_LINK_PREFIX: &str = "icewrap_csig_";
pub const FINGERPRINT_LINK_SUFFIX: &str = ".tar.gz";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkMethod {
    HardLink,
    Copy,
}

/// Trusted alias for a toolchain archive inside the build output directory.
#[derive(Debug, Clone, Serialize)]
pub struct StableHandle {
    pub path: PathBuf,
    pub method: LinkMethod,
    /// Always false: a hard link is free to recreate and a copy is not worth caching.
    pub cacheable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Fingerprint {
    pub digest: String,
    pub digest_file: PathBuf,
    pub link: PathBuf,
    pub pointer_file: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadedArchive {
    pub path: PathBuf,
    pub sha256: String,
    pub size: u64,
}

/// Link `source` to `dest`, copying when the filesystem refuses the link.
///
/// # Errors
///
/// Returns an error if neither a hard link nor a copy can be produced.
pub fn stabilize(source: &Path, dest: &Path) -> Result<StableHandle> {
    let method = link_or_copy(source, dest).with_context(|| {
        format!(
            "failed to stabilize {} as {}",
            source.display(),
            dest.display()
        )
    })?;
    debug!(source = %source.display(), dest = %dest.display(), ?method, "stabilized toolchain archive");
    Ok(StableHandle {
        path: dest.to_path_buf(),
        method,
        cacheable: false,
    })
}

/// Hash `handle` and publish the digest, the fingerprint-named link, and the
/// pointer file next to it.
///
/// # Errors
///
/// Returns an error if the handle cannot be read or any output cannot be written.
pub fn fingerprint(handle: &Path, id: &str) -> Result<Fingerprint> {
    let dir = handle
        .parent()
        .ok_or_else(|| anyhow!("{} has no parent directory", handle.display()))?;
    let dir = absolutize(dir.to_path_buf())?;

    let digest = compute_sha256(handle)?;
    let digest_file = dir.join(format!("{id}.sha256"));
    fs::write(&digest_file, format!("{digest}\n"))
        .with_context(|| format!("failed to write {}", digest_file.display()))?;

    let link = dir.join(fingerprint_link_name(&digest));
    link_or_copy(handle, &link)
        .with_context(|| format!("failed to link {}", link.display()))?;

    let pointer_file = dir.join(format!("{id}.sha256.path"));
    fs::write(&pointer_file, format!("{}\n", link.display()))
        .with_context(|| format!("failed to write {}", pointer_file.display()))?;

    debug!(%digest, link = %link.display(), "fingerprinted toolchain archive");
    Ok(Fingerprint {
        digest,
        digest_file,
        link,
        pointer_file,
    })
}

#[must_use]
pub fn fingerprint_link_name(digest: &str) -> String {
    format!("{FINGERPRINT_LINK_PREFIX}{digest}{FINGERPRINT_LINK_SUFFIX}")
}

/// Fetch `url` into `dest` in a single attempt.
///
/// # Errors
///
/// Returns an error on transport failures, non-success statuses, or write errors.
pub fn download_archive(url: &str, dest: &Path) -> Result<DownloadedArchive> {
    let client = http_client()?;
    let mut response = client
        .get(url)
        .send()
        .with_context(|| format!("failed to fetch {url}"))?
        .error_for_status()
        .with_context(|| format!("unexpected response for {url}"))?;

    let parent = dest
        .parent()
        .ok_or_else(|| anyhow!("{} has no parent directory", dest.display()))?;
    fs::create_dir_all(parent)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let read = response
            .read(&mut buffer)
            .with_context(|| format!("stream error for {url}"))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        tmp.write_all(&buffer[..read])?;
        size += read as u64;
    }
    tmp.persist(dest)
        .map_err(|err| anyhow!("unable to persist download of {url}: {err}"))?;
    let sha256 = hex::encode(hasher.finalize());
    debug!(%url, dest = %dest.display(), size, "downloaded toolchain archive");
    Ok(DownloadedArchive {
        path: dest.to_path_buf(),
        sha256,
        size,
    })
}

/// Bytes left alone when a URL becomes a file name: RFC 3986 unreserved marks.
const URL_NAME_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// File name used for a downloaded archive: the whole URL, fully escaped.
#[must_use]
pub fn quote_url(url: &str) -> String {
    utf8_percent_encode(url, URL_NAME_SET).to_string()
}

/// Stream a file through SHA-256 and return the lowercase hex digest.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn compute_sha256(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 32 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn link_or_copy(from: &Path, to: &Path) -> io::Result<LinkMethod> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::symlink_metadata(to) {
        Ok(_) => fs::remove_file(to)?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    match fs::hard_link(from, to) {
        Ok(()) => Ok(LinkMethod::HardLink),
        Err(link_err) => {
            warn!(
                from = %from.display(),
                to = %to.display(),
                error = %link_err,
                "hard link failed; copying archive"
            );
            fs::copy(from, to)?;
            Ok(LinkMethod::Copy)
        }
    }
}

fn http_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("failed to build http client")
}

fn absolutize(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(env::current_dir()?.join(path))
    }
}
