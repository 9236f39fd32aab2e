//! Server configuration

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

const DEFAULT_BIND_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 2583);

/// Failure to read or parse a config file
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read {path}")]
    #[diagnostic(code(burrow::config::read))]
    Read {
        /// Config path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// File is not valid TOML for [`Config`]
    #[error("failed to parse {path}")]
    #[diagnostic(
        code(burrow::config::parse),
        help("see the README for the config file format")
    )]
    Parse {
        /// Config path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: toml::de::Error,
    },
}

/// Server configuration
///
/// Usually loaded from a TOML file with [`Config::load`]. [`Default`] gives a config
/// suitable for local development: embedded block store under `./burrow-data`,
/// HTTP on localhost.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory for all on-disk state
    pub data_dir: PathBuf,
    /// HTTP listener
    pub http: HttpConfig,
    /// Block store backend
    pub blockstore: BlockstoreKind,
    /// When set, getBlob redirects to this URL instead of serving bytes
    pub blob_cdn_url: Option<Url>,
    /// Largest accepted blob, in bytes
    pub max_blob_size: usize,
    /// Page sizes for the listing endpoints
    pub pagination: PaginationConfig,
    /// Deadline for each block store call
    pub storage_timeout_secs: u64,
    /// Seconds between garbage collection passes
    pub gc_interval_secs: u64,
    /// Events buffered per live subscriber before it is dropped
    pub sequencer_capacity: usize,
    /// Default tracing filter, overridden by `BURROW_LOG`
    pub log_level: String,
    /// Where `create-signing-key` writes keys and repositories load them from
    pub signing_key_dir: Option<PathBuf>,
    /// Server rotation key file; defaults to `rotation.key` in the key directory
    pub rotation_key_path: Option<PathBuf>,
}

/// HTTP listener config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address to bind
    pub bind_addr: SocketAddr,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR,
        }
    }
}

/// Block store backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockstoreKind {
    /// Process memory; lost on restart
    Memory,
    /// Embedded redb database
    #[default]
    Redb,
    /// One file per block under a directory
    Object,
}

/// Default and maximum page sizes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// listRepos default limit
    pub list_repos_default: usize,
    /// listRepos maximum limit
    pub list_repos_max: usize,
    /// listBlobs default limit
    pub list_blobs_default: usize,
    /// listBlobs maximum limit
    pub list_blobs_max: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            list_repos_default: 500,
            list_repos_max: 500,
            list_blobs_default: 50,
            list_blobs_max: 1000,
        }
    }
}

impl PaginationConfig {
    /// Effective listRepos limit
    pub fn repos_limit(&self, requested: Option<usize>) -> usize {
        clamp_limit(requested, self.list_repos_default, self.list_repos_max)
    }

    /// Effective listBlobs limit
    pub fn blobs_limit(&self, requested: Option<usize>) -> usize {
        clamp_limit(requested, self.list_blobs_default, self.list_blobs_max)
    }
}

fn clamp_limit(requested: Option<usize>, default: usize, max: usize) -> usize {
    requested.unwrap_or(default).clamp(1, max.max(1))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("burrow-data"),
            http: HttpConfig::default(),
            blockstore: BlockstoreKind::default(),
            blob_cdn_url: None,
            max_blob_size: 5 * 1024 * 1024,
            pagination: PaginationConfig::default(),
            storage_timeout_secs: 30,
            gc_interval_secs: 3600,
            sequencer_capacity: 1024,
            log_level: "burrow=info,tower_http=info".to_string(),
            signing_key_dir: None,
            rotation_key_path: None,
        }
    }
}

impl Config {
    /// Load the config from a TOML file
    pub async fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let s = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        toml::from_str(&s).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Config for tests: everything under `dir`, in-memory blocks
    pub fn for_tests(dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: dir.into(),
            blockstore: BlockstoreKind::Memory,
            storage_timeout_secs: 5,
            ..Default::default()
        }
    }

    /// Storage deadline as a duration
    pub fn storage_timeout(&self) -> Duration {
        Duration::from_secs(self.storage_timeout_secs)
    }

    /// Pause between garbage collection passes
    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs.max(1))
    }

    /// Metadata database file
    pub fn meta_path(&self) -> PathBuf {
        self.data_dir.join("meta.redb")
    }

    /// Embedded block store file
    pub fn blocks_path(&self) -> PathBuf {
        self.data_dir.join("blocks.redb")
    }

    /// Directory for the object block store
    pub fn objects_dir(&self) -> PathBuf {
        self.data_dir.join("objects")
    }

    /// Directory for blob bytes
    pub fn blobs_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }

    /// Directory for per-repository signing keys
    pub fn keys_dir(&self) -> PathBuf {
        self.signing_key_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("keys"))
    }

    /// File `create-rotation-key` writes to and startup reads from
    pub fn rotation_key_file(&self) -> PathBuf {
        self.rotation_key_path
            .clone()
            .unwrap_or_else(|| self.keys_dir().join("rotation.key"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            data_dir = "/var/lib/burrow"
            blockstore = "object"
            blob_cdn_url = "https://cdn.example.com"

            [pagination]
            list_blobs_default = 25
            "#,
        )
        .unwrap();

        assert_eq!(config.blockstore, BlockstoreKind::Object);
        assert_eq!(config.pagination.list_blobs_default, 25);
        assert_eq!(config.pagination.list_blobs_max, 1000);
        assert_eq!(config.pagination.list_repos_default, 500);
        assert_eq!(config.http.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(config.keys_dir(), PathBuf::from("/var/lib/burrow/keys"));
        assert_eq!(
            config.blob_cdn_url.as_ref().map(Url::as_str),
            Some("https://cdn.example.com/")
        );
    }

    #[test]
    fn key_locations() {
        let config: Config = toml::from_str(r#"data_dir = "/srv/burrow""#).unwrap();
        assert_eq!(
            config.rotation_key_file(),
            PathBuf::from("/srv/burrow/keys/rotation.key")
        );

        let config: Config = toml::from_str(
            r#"
            data_dir = "/srv/burrow"
            signing_key_dir = "/etc/burrow/repo-keys"
            rotation_key_path = "/etc/burrow/rotation.key"
            "#,
        )
        .unwrap();
        assert_eq!(config.keys_dir(), PathBuf::from("/etc/burrow/repo-keys"));
        assert_eq!(
            config.rotation_key_file(),
            PathBuf::from("/etc/burrow/rotation.key")
        );
    }

    #[test]
    fn limits_are_clamped() {
        let pagination = PaginationConfig::default();
        assert_eq!(pagination.blobs_limit(None), 50);
        assert_eq!(pagination.blobs_limit(Some(5000)), 1000);
        assert_eq!(pagination.blobs_limit(Some(0)), 1);
        assert_eq!(pagination.repos_limit(None), 500);
        assert_eq!(pagination.repos_limit(Some(10)), 10);
    }

    #[tokio::test]
    async fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(dir.path().join("nope.toml")).await.unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
