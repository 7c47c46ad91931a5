use crate::error::InvalidRequest;
use std::fmt;
use std::io::ErrorKind as StdIoErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// A validated track identifier: `[A-Za-z0-9_-]+`, never a path fragment
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn parse(raw: &str) -> Result<Self, InvalidRequest> {
        if raw.is_empty()
            || !raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(InvalidRequest::MalformedResourceId);
        }

        // Unreachable through the charset above, kept so a widened charset
        // can never let a traversal through.
        if raw.contains("..") || raw.contains('/') || raw.contains('\\') {
            return Err(InvalidRequest::UnsafeResourceId);
        }

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("Track not found")]
    NotFound,

    #[error("Access denied")]
    OutsideRoot,

    #[error("I/O error while resolving track")]
    Io(#[source] std::io::Error),
}

/// A track file that exists inside the library root
#[derive(Debug, Clone)]
pub struct ResolvedResource {
    pub id: ResourceId,
    pub filename: String,
    pub path: PathBuf,
    pub len: u64,
}

/// Directory of servable audio files
#[derive(Debug, Clone)]
pub struct AudioLibrary {
    root: PathBuf,
    extension: String,
}

impl AudioLibrary {
    /// Open the library, canonicalizing its root once up front
    pub fn open(dir: &Path, extension: &str) -> std::io::Result<Self> {
        let root = std::fs::canonicalize(dir)?;
        if !root.is_dir() {
            return Err(std::io::Error::new(
                StdIoErrorKind::InvalidInput,
                format!("{} is not a directory", root.display()),
            ));
        }

        Ok(Self {
            root,
            extension: extension.trim_start_matches('.').to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// On-disk basename for a track
    pub fn filename(&self, id: &ResourceId) -> String {
        format!("{id}.{}", self.extension)
    }

    /// Map a requested basename back to its track id
    pub fn parse_filename(&self, filename: &str) -> Result<ResourceId, InvalidRequest> {
        let stem = filename
            .strip_suffix(self.extension.as_str())
            .and_then(|s| s.strip_suffix('.'))
            .ok_or(InvalidRequest::MalformedResourceId)?;
        ResourceId::parse(stem)
    }

    /// Resolve a track to a regular file whose canonical path stays inside the root
    pub async fn resolve(&self, id: &ResourceId) -> Result<ResolvedResource, ResourceError> {
        let filename = self.filename(id);
        let candidate = self.root.join(&filename);

        let canonical = match tokio::fs::canonicalize(&candidate).await {
            Ok(path) => path,
            // A name the filesystem cannot hold cannot name an existing file
            Err(error)
                if matches!(
                    error.kind(),
                    StdIoErrorKind::NotFound | StdIoErrorKind::InvalidFilename
                ) =>
            {
                debug!(track_id = %id, %error, "Track file not found");
                return Err(ResourceError::NotFound);
            }
            Err(error) => return Err(ResourceError::Io(error)),
        };

        if !canonical.starts_with(&self.root) {
            warn!(track_id = %id, "Track resolves outside the audio directory");
            return Err(ResourceError::OutsideRoot);
        }

        let metadata = tokio::fs::metadata(&canonical)
            .await
            .map_err(ResourceError::Io)?;
        if !metadata.is_file() {
            debug!(track_id = %id, "Track path is not a regular file");
            return Err(ResourceError::NotFound);
        }

        Ok(ResolvedResource {
            id: id.clone(),
            filename,
            path: canonical,
            len: metadata.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("audio-signer-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(dir.join("audio")).unwrap();
        dir
    }

    #[test]
    fn test_resource_id_accepts_safe_charset() {
        for id in ["track001", "Track_01", "a-b-c", "_", "-", "ABCxyz0189"] {
            assert_eq!(ResourceId::parse(id).unwrap().as_str(), id);
        }
    }

    #[test]
    fn test_resource_id_rejects_everything_else() {
        for id in [
            "",
            "..",
            "../etc/passwd",
            "track/001",
            "track.mp3",
            "track 001",
            "track%2F001",
            "tr\\ack",
            "トラック",
            "track\0",
        ] {
            assert!(ResourceId::parse(id).is_err(), "{id:?} should be rejected");
        }
    }

    #[test]
    fn test_resource_id_has_no_length_cap() {
        let long = "a".repeat(1000);
        assert_eq!(ResourceId::parse(&long).unwrap().as_str(), long);
    }

    #[test]
    fn test_parse_filename() {
        let dir = workspace();
        let library = AudioLibrary::open(&dir.join("audio"), ".mp3").unwrap();

        assert_eq!(library.extension(), "mp3");
        assert_eq!(
            library.parse_filename("track001.mp3").unwrap().as_str(),
            "track001"
        );
        assert!(library.parse_filename("track001.ogg").is_err());
        assert!(library.parse_filename("track001mp3").is_err());
        assert!(library.parse_filename(".mp3").is_err());
        assert!(library.parse_filename("../x.mp3").is_err());

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_open_rejects_missing_or_file_root() {
        let dir = workspace();
        assert!(AudioLibrary::open(&dir.join("missing"), "mp3").is_err());

        std::fs::write(dir.join("plain"), b"x").unwrap();
        assert!(AudioLibrary::open(&dir.join("plain"), "mp3").is_err());

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_resolve_existing_and_missing() {
        let dir = workspace();
        std::fs::write(dir.join("audio/track001.mp3"), b"ID3data").unwrap();
        std::fs::create_dir_all(dir.join("audio/folder.mp3")).unwrap();
        let library = AudioLibrary::open(&dir.join("audio"), "mp3").unwrap();

        let found = library
            .resolve(&ResourceId::parse("track001").unwrap())
            .await
            .unwrap();
        assert_eq!(found.filename, "track001.mp3");
        assert_eq!(found.len, 7);
        assert!(found.path.starts_with(library.root()));

        let missing = library
            .resolve(&ResourceId::parse("doesnotexist").unwrap())
            .await;
        assert!(matches!(missing, Err(ResourceError::NotFound)));

        let directory = library.resolve(&ResourceId::parse("folder").unwrap()).await;
        assert!(matches!(directory, Err(ResourceError::NotFound)));

        // Longer than any filesystem name component
        let too_long = ResourceId::parse(&"a".repeat(300)).unwrap();
        assert!(matches!(
            library.resolve(&too_long).await,
            Err(ResourceError::NotFound)
        ));

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolve_rejects_symlink_escape() {
        let dir = workspace();
        std::fs::write(dir.join("secret.mp3"), b"outside").unwrap();
        std::os::unix::fs::symlink(dir.join("secret.mp3"), dir.join("audio/escape.mp3")).unwrap();
        std::fs::write(dir.join("audio/real.mp3"), b"inside").unwrap();
        std::os::unix::fs::symlink(dir.join("audio/real.mp3"), dir.join("audio/alias.mp3"))
            .unwrap();
        let library = AudioLibrary::open(&dir.join("audio"), "mp3").unwrap();

        let escaped = library.resolve(&ResourceId::parse("escape").unwrap()).await;
        assert!(matches!(escaped, Err(ResourceError::OutsideRoot)));

        // A link that stays inside the root is fine
        let alias = library
            .resolve(&ResourceId::parse("alias").unwrap())
            .await
            .unwrap();
        assert_eq!(alias.filename, "alias.mp3");
        assert!(alias.path.ends_with("real.mp3"));

        std::fs::remove_dir_all(dir).unwrap();
    }
}
