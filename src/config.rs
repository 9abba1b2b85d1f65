use anyhow::{Context, Result, bail};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub owncloud: Option<OwnCloudConfig>,
    /// Server-side at-rest key. Content is stored as uploaded when unset.
    pub aes_key: Option<Vec<u8>>,
    pub share_ttl_hours: i64,
    pub max_chunk_bytes: usize,
}

#[derive(Clone)]
pub struct OwnCloudConfig {
    pub url: String,
    pub username: String,
    pub password: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Encrypted file sharing service")]
pub struct Args {
    /// Host to bind to (overrides FILE_SERVICE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILE_SERVICE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory for the local object store (overrides FILE_SERVICE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides FILE_SERVICE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// WebDAV root; objects go to ownCloud instead of the local directory
    #[arg(long, env = "OWNCLOUD_URL")]
    pub owncloud_url: Option<String>,

    #[arg(long, env = "OWNCLOUD_USERNAME", default_value = "")]
    pub owncloud_username: String,

    #[arg(long, env = "OWNCLOUD_PASSWORD", default_value = "", hide_env_values = true)]
    pub owncloud_password: String,

    /// 32-byte key for at-rest encryption
    #[arg(long, env = "AES_KEY", hide_env_values = true)]
    pub aes_key: Option<String>,

    /// Lifetime of new share grants in hours (overrides FILE_SERVICE_SHARE_TTL_HOURS)
    #[arg(long)]
    pub share_ttl_hours: Option<i64>,

    /// Upper bound on one request body (overrides FILE_SERVICE_MAX_CHUNK_BYTES)
    #[arg(long)]
    pub max_chunk_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        Self::from_args(Args::parse())
    }

    pub fn from_args(args: Args) -> Result<(Self, bool)> {
        // --- Environment fallback ---
        let env_host = env::var("FILE_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parse("FILE_SERVICE_PORT", 8081u16)?;
        let env_storage =
            env::var("FILE_SERVICE_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("FILE_SERVICE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/files.db".into());
        let env_ttl = env_parse("FILE_SERVICE_SHARE_TTL_HOURS", 48i64)?;
        let env_max_chunk = env_parse("FILE_SERVICE_MAX_CHUNK_BYTES", 50usize << 20)?;

        let aes_key = match args.aes_key.filter(|k| !k.is_empty()) {
            Some(key) if key.len() != 32 => {
                bail!("AES_KEY must be exactly 32 bytes, got {}", key.len())
            }
            Some(key) => Some(key.into_bytes()),
            None => None,
        };

        let share_ttl_hours = args.share_ttl_hours.unwrap_or(env_ttl);
        if share_ttl_hours <= 0 {
            bail!("share TTL must be positive, got {share_ttl_hours}");
        }

        let owncloud = args
            .owncloud_url
            .filter(|url| !url.is_empty())
            .map(|url| OwnCloudConfig {
                url,
                username: args.owncloud_username,
                password: args.owncloud_password,
            });

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            owncloud,
            aes_key,
            share_ttl_hours,
            max_chunk_bytes: args.max_chunk_bytes.unwrap_or(env_max_chunk),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

// Secrets stay out of the startup log.
impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("storage_dir", &self.storage_dir)
            .field("database_url", &self.database_url)
            .field("owncloud_url", &self.owncloud.as_ref().map(|o| &o.url))
            .field("aes_key", &self.aes_key.as_ref().map(|_| "<set>"))
            .field("share_ttl_hours", &self.share_ttl_hours)
            .field("max_chunk_bytes", &self.max_chunk_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Result<(AppConfig, bool)> {
        let mut full = vec!["sfsp-file-service"];
        full.extend_from_slice(argv);
        AppConfig::from_args(Args::try_parse_from(full)?)
    }

    #[test]
    fn cli_flags_win() {
        let (cfg, migrate) = parse(&[
            "--host",
            "127.0.0.1",
            "--port",
            "9000",
            "--share-ttl-hours",
            "12",
            "--migrate",
        ])
        .unwrap();
        assert_eq!(cfg.addr(), "127.0.0.1:9000");
        assert_eq!(cfg.share_ttl_hours, 12);
        assert!(migrate);
    }

    #[test]
    fn aes_key_must_be_32_bytes() {
        assert!(parse(&["--aes-key", "too-short"]).is_err());
        let (cfg, _) = parse(&["--aes-key", "0123456789abcdef0123456789abcdef"]).unwrap();
        assert_eq!(cfg.aes_key.as_deref().map(<[u8]>::len), Some(32));
    }

    #[test]
    fn owncloud_is_selected_by_url() {
        let (cfg, _) = parse(&[
            "--owncloud-url",
            "http://cloud/remote.php/webdav",
            "--owncloud-username",
            "svc",
        ])
        .unwrap();
        let oc = cfg.owncloud.unwrap();
        assert_eq!(oc.username, "svc");
        assert_eq!(oc.password, "");
    }

    #[test]
    fn debug_hides_secrets() {
        let (cfg, _) = parse(&["--aes-key", "0123456789abcdef0123456789abcdef"]).unwrap();
        let shown = format!("{cfg:?}");
        assert!(!shown.contains("0123456789abcdef"));
        assert!(shown.contains("<set>"));
    }
}
