//! Pinned UPX release cache
//!
//! The compressor is downloaded once per version and host platform and kept
//! under `<cache_dir>/upx-<version>-<platform>/`. A present binary is reused
//! without touching the network.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use topt_target::{Arch, Os};

use super::ToolError;

/// Version fetched when the configuration does not pin one
pub const DEFAULT_UPX_VERSION: &str = "4.2.4";

/// Release download URL; `{version}`, `{platform}` and `{ext}` are substituted
pub const UPX_URL_TEMPLATE: &str =
    "https://github.com/upx/upx/releases/download/v{version}/upx-{version}-{platform}.{ext}";

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Release archive formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarXz,
}

impl ArchiveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::TarXz => "tar.xz",
        }
    }
}

/// Release platform name and archive format for a host, if one is published
pub fn upx_platform(os: Os, arch: Arch) -> Option<(&'static str, ArchiveFormat)> {
    match (os, arch) {
        (Os::Windows, _) => Some(("win64", ArchiveFormat::Zip)),
        (Os::Linux, Arch::Amd64) => Some(("amd64_linux", ArchiveFormat::TarXz)),
        (Os::Linux, Arch::Arm64) => Some(("arm64_linux", ArchiveFormat::TarXz)),
        _ => None,
    }
}

/// Compressor acquisition errors
#[derive(Debug, thiserror::Error)]
pub enum CompressorError {
    #[error("no compressor release published for {os}/{arch}")]
    UnsupportedHost { os: Os, arch: Arch },

    #[error("download of {url} failed: {message}")]
    Download { url: String, message: String },

    #[error("extracting {url} failed: {message}")]
    Extract { url: String, message: String },

    #[error("compressor binary missing from release archive: {0}")]
    MissingBinary(PathBuf),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

/// Fetches bytes from a URL
pub trait Fetch: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, CompressorError>;
}

/// Blocking HTTPS fetcher
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    timeout: Duration,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self {
            timeout: DOWNLOAD_TIMEOUT,
        }
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, CompressorError> {
        let download_error = |e: reqwest::Error| CompressorError::Download {
            url: url.to_string(),
            message: e.to_string(),
        };

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(download_error)?;
        let response = client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(download_error)?;
        let bytes = response.bytes().map_err(download_error)?;
        Ok(bytes.to_vec())
    }
}

/// Versioned on-disk cache of the compressor binary
pub struct CompressorCache {
    cache_dir: PathBuf,
    version: String,
    url_template: String,
    os: Os,
    arch: Arch,
    fetcher: Box<dyn Fetch>,
}

impl CompressorCache {
    pub fn new(cache_dir: impl Into<PathBuf>, version: impl Into<String>, os: Os, arch: Arch) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            version: version.into(),
            url_template: UPX_URL_TEMPLATE.to_string(),
            os,
            arch,
            fetcher: Box::new(HttpFetcher::default()),
        }
    }

    pub fn with_fetcher(mut self, fetcher: Box<dyn Fetch>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_url_template(mut self, template: impl Into<String>) -> Self {
        self.url_template = template.into();
        self
    }

    fn platform(&self) -> Result<(&'static str, ArchiveFormat), CompressorError> {
        upx_platform(self.os, self.arch).ok_or(CompressorError::UnsupportedHost {
            os: self.os,
            arch: self.arch,
        })
    }

    /// `upx-<version>-<platform>`, the top-level directory inside the release archive
    pub fn package_dir_name(&self) -> Result<String, CompressorError> {
        let (platform, _) = self.platform()?;
        Ok(format!("upx-{}-{}", self.version, platform))
    }

    pub fn download_url(&self) -> Result<String, CompressorError> {
        let (platform, format) = self.platform()?;
        Ok(self
            .url_template
            .replace("{version}", &self.version)
            .replace("{platform}", platform)
            .replace("{ext}", format.extension()))
    }

    fn binary_name(&self) -> &'static str {
        if self.os == Os::Windows {
            "upx.exe"
        } else {
            "upx"
        }
    }

    /// Where the binary lives once cached
    pub fn cached_binary(&self) -> Result<PathBuf, CompressorError> {
        Ok(self
            .cache_dir
            .join(self.package_dir_name()?)
            .join(self.binary_name()))
    }

    /// Path to the compressor, downloading it on first use
    pub fn resolve(&self) -> Result<PathBuf, CompressorError> {
        let binary = self.cached_binary()?;
        if binary.is_file() {
            debug!(path = %binary.display(), "compressor cache hit");
            return Ok(binary);
        }

        let (_, format) = self.platform()?;
        let url = self.download_url()?;
        info!(url = %url, "downloading compressor");
        let bytes = self.fetcher.fetch(&url)?;

        fs::create_dir_all(&self.cache_dir)?;
        let staging = tempfile::Builder::new()
            .prefix(".upx-download-")
            .tempdir_in(&self.cache_dir)?;
        extract(&bytes, format, staging.path()).map_err(|message| CompressorError::Extract {
            url: url.clone(),
            message,
        })?;

        let package_dir = self.package_dir_name()?;
        let extracted = staging.path().join(&package_dir);
        if !extracted.join(self.binary_name()).is_file() {
            return Err(CompressorError::MissingBinary(
                PathBuf::from(&package_dir).join(self.binary_name()),
            ));
        }

        let final_dir = self.cache_dir.join(&package_dir);
        if final_dir.exists() {
            fs::remove_dir_all(&final_dir)?;
        }
        fs::rename(&extracted, &final_dir)?;
        info!(path = %binary.display(), "compressor cached");
        Ok(binary)
    }
}

fn extract(bytes: &[u8], format: ArchiveFormat, dest: &Path) -> Result<(), String> {
    match format {
        ArchiveFormat::Zip => {
            let mut archive =
                zip::ZipArchive::new(io::Cursor::new(bytes)).map_err(|e| e.to_string())?;
            archive.extract(dest).map_err(|e| e.to_string())
        }
        ArchiveFormat::TarXz => {
            let decoder = xz2::read::XzDecoder::new(bytes);
            tar::Archive::new(decoder)
                .unpack(dest)
                .map_err(|e| e.to_string())
        }
    }
}
