//! Shared-memory region URIs.
//!
//! Grammar: `shm:file?path=<absolute path>[|require_hugepages=<true|false>]`
//!
//! Huge-page backing is required when `require_hugepages=true` is present
//! or when the path lives under a hugetlbfs mount point.

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

const SCHEME_PREFIX: &str = "shm:file?";

/// Conventional hugetlbfs mount points.
pub const HUGETLBFS_MOUNTS: [&str; 2] = ["/dev/hugepages", "/mnt/huge"];

/// URI parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UriError {
    /// Scheme other than `shm:file`.
    #[error("Unsupported region URI scheme: {0}")]
    UnsupportedScheme(String),

    /// Syntactically invalid URI.
    #[error("Malformed region URI: {0}")]
    Malformed(String),

    /// Path is not absolute.
    #[error("Region path must be absolute: {0}")]
    RelativePath(String),
}

/// Parsed region URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShmUri {
    path: PathBuf,
    require_hugepages: bool,
}

impl ShmUri {
    /// URI for a plain file-backed region.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            require_hugepages: false,
        }
    }

    /// Parse a region URI.
    ///
    /// # Errors
    /// - `UnsupportedScheme` for any scheme other than `shm:file`
    /// - `Malformed` for missing/duplicate/unknown parameters
    /// - `RelativePath` if `path` is not absolute or contains `..`
    pub fn parse(uri: &str) -> Result<Self, UriError> {
        let Some(params) = uri.strip_prefix(SCHEME_PREFIX) else {
            let scheme = uri.split('?').next().unwrap_or(uri);
            return Err(UriError::UnsupportedScheme(scheme.to_string()));
        };

        let mut path = None;
        let mut require_hugepages = false;
        for param in params.split('|') {
            let (key, value) = param
                .split_once('=')
                .ok_or_else(|| UriError::Malformed(uri.to_string()))?;
            match key {
                "path" if path.is_none() => path = Some(value),
                "require_hugepages" => {
                    require_hugepages = value
                        .parse::<bool>()
                        .map_err(|_| UriError::Malformed(uri.to_string()))?;
                }
                _ => return Err(UriError::Malformed(uri.to_string())),
            }
        }

        let path = path
            .filter(|p| !p.is_empty())
            .ok_or_else(|| UriError::Malformed(uri.to_string()))?;
        let path = PathBuf::from(path);
        if !path.is_absolute() || path.components().any(|c| c.as_os_str() == "..") {
            return Err(UriError::RelativePath(path.display().to_string()));
        }

        Ok(Self {
            path,
            require_hugepages,
        })
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the region must be huge-page backed.
    pub fn is_hugepage_backed(&self) -> bool {
        self.require_hugepages || HUGETLBFS_MOUNTS.iter().any(|m| self.path.starts_with(m))
    }

    /// Same URI with the huge-page requirement set.
    pub fn with_hugepages(mut self, required: bool) -> Self {
        self.require_hugepages = required;
        self
    }
}

impl fmt::Display for ShmUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME_PREFIX}path={}", self.path.display())?;
        if self.require_hugepages {
            write!(f, "|require_hugepages=true")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for ShmUri {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
