//! Configuration loading and validation.
//!
//! Values are layered, later sources overriding earlier ones:
//!
//! 1. Built-in defaults ([`Config::default`]).
//! 2. An optional configuration file; TOML, YAML or JSON by extension.
//! 3. The deployment variables `stage` and `SFTP_SECRET_NAME`.
//! 4. Variables prefixed with `FERRY_`, with `__` separating nested keys
//!    (`FERRY_MIRROR__HOST`, `FERRY_POLICY__PUBLISH`).

pub mod error;

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use ferry_pipeline::{Policies, RunOptions};
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const ENV_PREFIX: &str = "FERRY_";
/// Largest page S3 will return, and the default.
pub const MAX_PAGE_SIZE: i32 = 1000;
/// S3's minimum size for every multipart part but the last.
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Deployment stage; the bucket defaults to `s3-storage-{stage}`.
    pub stage: Option<String>,
    /// Explicit bucket name, taking precedence over `stage`.
    pub bucket: Option<String>,
    pub region: String,
    /// Custom S3 endpoint (for S3-compatible stores); enables path-style addressing.
    pub endpoint: Option<String>,
    /// Keys requested per listing page.
    pub page_size: i32,
    /// Bytes buffered per multipart upload part.
    pub part_size: usize,
    /// Cap on concurrently running tasks; unbounded if unset.
    pub max_in_flight: Option<usize>,
    pub policy: Policies,
    pub unzip: UnzipConfig,
    pub mirror: MirrorConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnzipConfig {
    /// Prefix the archives are listed under; `{date}` becomes the run date.
    pub source_prefix: String,
    pub destination_root: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// SFTP server as `host:port`.
    pub host: String,
    /// Remote directory to mirror.
    pub root: String,
    /// Secrets Manager secret holding `{"username", "password"}`.
    pub secret_name: Option<String>,
    pub connect_timeout_secs: u64,
    pub destination_root: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stage: None,
            bucket: None,
            region: "eu-west-1".to_string(),
            endpoint: None,
            page_size: MAX_PAGE_SIZE,
            part_size: MIN_PART_SIZE,
            max_in_flight: None,
            policy: Policies::default(),
            unzip: UnzipConfig::default(),
            mirror: MirrorConfig::default(),
        }
    }
}

impl Default for UnzipConfig {
    fn default() -> Self {
        Self { source_prefix: "new-bucket/{date}/path/".to_string(), destination_root: "new-bucket/unzipped".to_string() }
    }
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            host: "example.com:22".to_string(),
            root: "/path".to_string(),
            secret_name: None,
            connect_timeout_secs: 15 * 60,
            destination_root: "new-bucket".to_string(),
        }
    }
}

impl Config {
    /// The layered sources, without extracting or validating them.
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = file {
            figment = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path)),
                Some("json") => figment.merge(Json::file_exact(path)),
                _ => figment.merge(Toml::file_exact(path)),
            };
        }
        figment
            .merge(Env::raw().only(&["stage"]))
            .merge(Env::raw().only(&["SFTP_SECRET_NAME"]).map(|_| "mirror.secret_name".into()))
            .merge(Env::prefixed(ENV_PREFIX).ignore(&["config", "log_format"]).split("__"))
    }

    /// Load and validate the configuration, reading `file` if given.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        if let Some(path) = file {
            if !path.is_file() {
                exn::bail!(ErrorKind::FileNotFound(path.display().to_string()));
            }
        }
        let config: Config = Self::figment(file).extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        tracing::debug!(?config, "Loaded configuration");
        Ok(config)
    }

    /// Destination bucket: `bucket` if set, otherwise derived from `stage`.
    pub fn bucket_name(&self) -> Option<String> {
        match (&self.bucket, &self.stage) {
            (Some(bucket), _) if !bucket.is_empty() => Some(bucket.clone()),
            (_, Some(stage)) if !stage.is_empty() => Some(format!("s3-storage-{stage}")),
            _ => None,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.mirror.connect_timeout_secs)
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions { policies: self.policy, max_in_flight: self.max_in_flight }
    }

    /// Checks shared by every command.
    pub fn validate(&self) -> Result<()> {
        if self.bucket_name().is_none() {
            exn::bail!(ErrorKind::Invalid("no destination bucket: set `bucket` or `stage`".to_string()));
        }
        if self.region.is_empty() {
            exn::bail!(ErrorKind::Invalid("`region` is empty".to_string()));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.page_size) {
            exn::bail!(ErrorKind::Invalid(format!("`page_size` must be between 1 and {MAX_PAGE_SIZE}")));
        }
        if self.part_size < MIN_PART_SIZE {
            exn::bail!(ErrorKind::Invalid(format!("`part_size` must be at least {MIN_PART_SIZE} bytes")));
        }
        if self.max_in_flight == Some(0) {
            exn::bail!(ErrorKind::Invalid("`max_in_flight` must be greater than zero".to_string()));
        }
        if self.unzip.destination_root.is_empty() || self.mirror.destination_root.is_empty() {
            exn::bail!(ErrorKind::Invalid("destination roots must not be empty".to_string()));
        }
        Ok(())
    }

    /// Extra checks before mirroring a remote tree.
    pub fn validate_mirror(&self) -> Result<()> {
        if self.mirror.secret_name.as_deref().is_none_or(str::is_empty) {
            exn::bail!(ErrorKind::Invalid("no SFTP secret: set `SFTP_SECRET_NAME` or `mirror.secret_name`".to_string()));
        }
        if self.mirror.host.is_empty() {
            exn::bail!(ErrorKind::Invalid("`mirror.host` is empty".to_string()));
        }
        if !self.mirror.root.starts_with('/') {
            exn::bail!(ErrorKind::Invalid(format!("`mirror.root` must be absolute, got {:?}", self.mirror.root)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_pipeline::Policy;
    use figment::Jail;
    use rstest::rstest;
    use std::io::Write;

    #[test]
    fn test_defaults_from_stage() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("stage", "dev");
            let config = Config::load(None).unwrap();
            assert_eq!(config.bucket_name().as_deref(), Some("s3-storage-dev"));
            assert_eq!(config.region, "eu-west-1");
            assert_eq!(config.mirror.host, "example.com:22");
            assert_eq!(config.mirror.root, "/path");
            assert_eq!(config.connect_timeout(), Duration::from_secs(900));
            assert_eq!(config.unzip.source_prefix, "new-bucket/{date}/path/");
            assert_eq!(config.page_size, 1000);
            assert_eq!(config.run_options(), RunOptions::default());
            Ok(())
        });
    }

    #[test]
    fn test_missing_bucket_is_invalid() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            let err = Config::load(None).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Invalid(_)));
            Ok(())
        });
    }

    #[test]
    fn test_toml_file_then_env() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file(
                "ferry.toml",
                r#"
                bucket = "archive-bucket"
                max_in_flight = 16

                [policy]
                publish = "abort"

                [mirror]
                host = "sftp.internal:2222"
                "#,
            )?;
            jail.set_env("stage", "prod");
            jail.set_env("SFTP_SECRET_NAME", "sftp/prod");
            jail.set_env("FERRY_MIRROR__HOST", "override:22");
            jail.set_env("FERRY_LOG_FORMAT", "json");
            let config = Config::load(Some(Path::new("ferry.toml"))).unwrap();
            assert_eq!(config.bucket_name().as_deref(), Some("archive-bucket"));
            assert_eq!(config.max_in_flight, Some(16));
            assert_eq!(config.policy.publish, Policy::Abort);
            assert_eq!(config.policy.fetch, Policy::Isolate);
            assert_eq!(config.mirror.host, "override:22");
            assert_eq!(config.mirror.secret_name.as_deref(), Some("sftp/prod"));
            config.validate_mirror().unwrap();
            Ok(())
        });
    }

    #[test]
    fn test_prefixed_env_beats_legacy_variable() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("stage", "dev");
            jail.set_env("FERRY_STAGE", "qa");
            assert_eq!(Config::load(None).unwrap().bucket_name().as_deref(), Some("s3-storage-qa"));
            Ok(())
        });
    }

    #[rstest]
    #[case::yaml(".yaml", "bucket: from-yaml\npage_size: 50\n")]
    #[case::json(".json", r#"{"bucket": "from-json", "page_size": 50}"#)]
    fn test_file_formats(#[case] suffix: &str, #[case] contents: &str) {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        let path = file.path().to_path_buf();
        Jail::expect_with(move |jail| {
            jail.clear_env();
            let config = Config::load(Some(&path)).unwrap();
            assert!(config.bucket_name().unwrap().starts_with("from-"));
            assert_eq!(config.page_size, 50);
            Ok(())
        });
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(&*err, ErrorKind::FileNotFound(_)));
    }

    #[test]
    fn test_wrong_type_fails_to_load() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("stage", "dev");
            jail.set_env("FERRY_POLICY__FETCH", "sometimes");
            assert!(matches!(&*Config::load(None).unwrap_err(), ErrorKind::Load));
            Ok(())
        });
    }

    #[rstest]
    #[case::page_size_zero(Config { page_size: 0, ..valid() })]
    #[case::page_size_too_large(Config { page_size: 1001, ..valid() })]
    #[case::tiny_parts(Config { part_size: 1024, ..valid() })]
    #[case::no_concurrency(Config { max_in_flight: Some(0), ..valid() })]
    #[case::empty_region(Config { region: String::new(), ..valid() })]
    #[case::empty_stage(Config { stage: Some(String::new()), ..Config::default() })]
    fn test_validate_rejects(#[case] config: Config) {
        assert!(matches!(&*config.validate().unwrap_err(), ErrorKind::Invalid(_)));
    }

    #[rstest]
    #[case::no_secret(MirrorConfig { secret_name: None, ..valid().mirror })]
    #[case::empty_secret(MirrorConfig { secret_name: Some(String::new()), ..valid().mirror })]
    #[case::relative_root(MirrorConfig { root: "path".to_string(), ..valid().mirror })]
    fn test_validate_mirror_rejects(#[case] mirror: MirrorConfig) {
        let config = Config { mirror, ..valid() };
        assert!(config.validate_mirror().is_err());
    }

    fn valid() -> Config {
        Config {
            stage: Some("dev".to_string()),
            mirror: MirrorConfig { secret_name: Some("sftp".to_string()), ..MirrorConfig::default() },
            ..Config::default()
        }
    }

    #[test]
    fn test_valid_passes() {
        valid().validate().unwrap();
        valid().validate_mirror().unwrap();
    }
}
