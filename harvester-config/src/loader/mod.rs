pub mod error;

use once_cell::sync::Lazy;
use std::{
    fmt::Display,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use harvester_core::config::{
    BackfillSettings, FeedSettings, HarvesterSettings, ScannerSettings, WorkerSettings,
};

use crate::models::{
    Config, ConfigMetadata, RedisConfig,
    sources::{EnvConfig, FileConfig, FileRedisConfig},
};
use crate::util::parse_duration;
use crate::validation::{self, ConfigWarnings};

use error::ConfigLoadError;

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("harvester.toml"),
        PathBuf::from("config/harvester.toml"),
    ]
});

/// A loaded configuration plus anything worth telling the operator about it.
#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

/// Resolves configuration from `.env`, the environment and an optional TOML
/// file. Environment values win over the file; defaults fill the rest.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathProvenance {
    Explicit,
    Env,
    Default,
}

#[derive(Debug, Default)]
struct ConfigPathSource {
    explicit: Option<PathBuf>,
    env: Option<PathBuf>,
    default: Option<PathBuf>,
}

impl ConfigPathSource {
    fn resolved_path(self) -> Option<(PathBuf, PathProvenance)> {
        self.explicit
            .map(|path| (path, PathProvenance::Explicit))
            .or_else(|| self.env.map(|path| (path, PathProvenance::Env)))
            .or_else(|| self.default.map(|path| (path, PathProvenance::Default)))
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path)
                .map(|_| true)
                .or_else(|err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                })?,
            None => dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
        };

        self.load_with_env(EnvConfig::gather(), env_file_loaded)
    }

    /// Same as [`ConfigLoader::load`] with an already gathered environment.
    pub fn load_with_env(
        &self,
        env: EnvConfig,
        env_file_loaded: bool,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let (file_config, config_path) = self.load_file_config(&env)?;
        let (config, warnings) = compose_config(file_config, env, config_path, env_file_loaded)?;
        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let mut source = ConfigPathSource::default();

        if let Some(explicit) = &self.options.config_path {
            source.explicit = Some(explicit.clone());
        } else if let Some(from_env) = &env.config_path {
            source.env = Some(from_env.clone());
        } else {
            source.default = DEFAULT_CONFIG_LOCATIONS
                .iter()
                .find(|candidate| candidate.exists())
                .cloned();
        }

        let Some((path, provenance)) = source.resolved_path() else {
            return Ok((None, None));
        };

        if !path.exists() {
            if provenance != PathProvenance::Default {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        let contents = fs::read_to_string(&path).map_err(|err| ConfigLoadError::Io {
            path: path.clone(),
            source: err,
        })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
                path: path.clone(),
                source: err,
            })?;

        Ok((Some(file_config), Some(path)))
    }
}

fn compose_config(
    file_config: Option<FileConfig>,
    env: EnvConfig,
    config_path: Option<PathBuf>,
    env_file_loaded: bool,
) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
    let mut warnings = ConfigWarnings::default();

    if file_config.is_none() {
        warnings.push_with_hint(
            "No harvester.toml detected; using environment variables and defaults",
            "Create harvester.toml or point HARVESTER_CONFIG at a configuration file",
        );
    }

    let FileConfig {
        redis: file_redis,
        feed_prefix: file_feed_prefix,
        feed: file_feed,
        backfill: file_backfill,
        scanner: file_scanner,
        worker: file_worker,
    } = file_config.unwrap_or_default();

    let redis = resolve_redis(&env, file_redis)?;

    let feed_defaults = FeedSettings::default();
    let feed = FeedSettings {
        base_url: env
            .feed_base_url
            .clone()
            .or(file_feed.base_url)
            .unwrap_or_else(|| feed_defaults.base_url.clone()),
        request_timeout_ms: millis(pick_duration(
            "HN_REQUEST_TIMEOUT",
            "feed.request_timeout",
            env.feed_request_timeout.as_deref(),
            file_feed.request_timeout.as_deref(),
            feed_defaults.request_timeout(),
        )?),
        retry_attempts: pick(
            "HN_RETRY_ATTEMPTS",
            env.feed_retry_attempts.as_deref(),
            file_feed.retry_attempts,
            feed_defaults.retry_attempts,
        )?,
        retry_delay_ms: millis(pick_duration(
            "HN_RETRY_DELAY",
            "feed.retry_delay",
            env.feed_retry_delay.as_deref(),
            file_feed.retry_delay.as_deref(),
            feed_defaults.retry_delay(),
        )?),
    };

    let backfill_defaults = BackfillSettings::default();
    let backfill = BackfillSettings {
        interval_ms: millis(pick_duration(
            "BACKFILL_INTERVAL",
            "backfill.interval",
            env.backfill_interval.as_deref(),
            file_backfill.interval.as_deref(),
            backfill_defaults.interval(),
        )?),
        start_id: pick(
            "BACKFILL_START_ID",
            env.backfill_start_id.as_deref(),
            file_backfill.start_id,
            backfill_defaults.start_id,
        )?,
        enqueue_chunk: pick(
            "BACKFILL_ENQUEUE_CHUNK",
            env.backfill_enqueue_chunk.as_deref(),
            file_backfill.enqueue_chunk,
            backfill_defaults.enqueue_chunk,
        )?,
        result_ttl_secs: pick_duration(
            "BACKFILL_RESULT_TTL",
            "backfill.result_ttl",
            env.backfill_result_ttl.as_deref(),
            file_backfill.result_ttl.as_deref(),
            backfill_defaults.result_ttl(),
        )?
        .as_secs(),
    };

    let scanner_defaults = ScannerSettings::default();
    let scanner = ScannerSettings {
        interval_ms: millis(pick_duration(
            "SCAN_INTERVAL",
            "scanner.interval",
            env.scan_interval.as_deref(),
            file_scanner.interval.as_deref(),
            scanner_defaults.interval(),
        )?),
        page_size: pick(
            "SCAN_PAGE_SIZE",
            env.scan_page_size.as_deref(),
            file_scanner.page_size,
            scanner_defaults.page_size,
        )?,
        score_threshold: pick(
            "SCAN_SCORE_THRESHOLD",
            env.scan_score_threshold.as_deref(),
            file_scanner.score_threshold,
            scanner_defaults.score_threshold,
        )?,
        result_ttl_secs: pick_duration(
            "SCAN_RESULT_TTL",
            "scanner.result_ttl",
            env.scan_result_ttl.as_deref(),
            file_scanner.result_ttl.as_deref(),
            scanner_defaults.result_ttl(),
        )?
        .as_secs(),
        run_budget_ms: millis(pick_duration(
            "SCAN_RUN_BUDGET",
            "scanner.run_budget",
            env.scan_run_budget.as_deref(),
            file_scanner.run_budget.as_deref(),
            scanner_defaults.run_budget(),
        )?),
    };

    let worker_defaults = WorkerSettings::default();
    let worker = WorkerSettings {
        concurrency: pick(
            "WORKER_CONCURRENCY",
            env.worker_concurrency.as_deref(),
            file_worker.concurrency,
            worker_defaults.concurrency,
        )?,
        poll_interval_ms: millis(pick_duration(
            "WORKER_POLL_INTERVAL",
            "worker.poll_interval",
            env.worker_poll_interval.as_deref(),
            file_worker.poll_interval.as_deref(),
            worker_defaults.poll_interval(),
        )?),
        failure_ttl_secs: pick_duration(
            "WORKER_FAILURE_TTL",
            "worker.failure_ttl",
            env.worker_failure_ttl.as_deref(),
            file_worker.failure_ttl.as_deref(),
            worker_defaults.failure_ttl(),
        )?
        .as_secs(),
        lease_ttl_ms: millis(pick_duration(
            "WORKER_LEASE_TTL",
            "worker.lease_ttl",
            env.worker_lease_ttl.as_deref(),
            file_worker.lease_ttl.as_deref(),
            worker_defaults.lease_ttl(),
        )?),
        max_attempts: pick(
            "WORKER_MAX_ATTEMPTS",
            env.worker_max_attempts.as_deref(),
            file_worker.max_attempts,
            worker_defaults.max_attempts,
        )?,
        retry_base_delay_ms: millis(pick_duration(
            "WORKER_RETRY_BASE_DELAY",
            "worker.retry_base_delay",
            env.worker_retry_base_delay.as_deref(),
            file_worker.retry_base_delay.as_deref(),
            Duration::from_millis(worker_defaults.retry_base_delay_ms),
        )?),
        retry_max_delay_ms: millis(pick_duration(
            "WORKER_RETRY_MAX_DELAY",
            "worker.retry_max_delay",
            env.worker_retry_max_delay.as_deref(),
            file_worker.retry_max_delay.as_deref(),
            Duration::from_millis(worker_defaults.retry_max_delay_ms),
        )?),
    };

    let harvester = HarvesterSettings {
        feed_prefix: env
            .feed_prefix
            .clone()
            .or(file_feed_prefix)
            .unwrap_or_else(|| HarvesterSettings::default().feed_prefix),
        feed,
        backfill,
        scanner,
        worker,
    };

    let config = Config {
        redis,
        harvester,
        metadata: ConfigMetadata {
            config_path,
            env_file_loaded,
        },
    };

    warnings.extend(validation::apply_guard_rails(&config)?);
    Ok((config, warnings))
}

/// Role specific URLs beat the shared `REDIS_URL` / `redis.url`, and the
/// environment beats the file at each level.
fn resolve_redis(env: &EnvConfig, file: FileRedisConfig) -> Result<RedisConfig, ConfigLoadError> {
    let shared = env.redis_url.clone().or(file.url);
    let queue_url = env
        .redis_queue_url
        .clone()
        .or(file.queue_url)
        .or_else(|| shared.clone())
        .unwrap_or_else(|| RedisConfig::DEFAULT_URL.to_string());
    let store_url = env
        .redis_store_url
        .clone()
        .or(file.store_url)
        .or(shared)
        .unwrap_or_else(|| RedisConfig::DEFAULT_URL.to_string());

    let password = match env.redis_password.clone() {
        Some(password) => Some(password),
        None => match env.redis_password_file.as_ref().or(file.password_file.as_ref()) {
            Some(path) => read_secret_file(path)?,
            None => None,
        },
    };

    let (queue_url, store_url) = match password {
        Some(password) => (
            with_password("queue", &queue_url, &password)?,
            with_password("store", &store_url, &password)?,
        ),
        None => (queue_url, store_url),
    };

    Ok(RedisConfig {
        queue_url,
        store_url,
        response_timeout: pick_duration(
            "REDIS_RESPONSE_TIMEOUT",
            "redis.response_timeout",
            env.redis_response_timeout.as_deref(),
            file.response_timeout.as_deref(),
            RedisConfig::DEFAULT_RESPONSE_TIMEOUT,
        )?,
        namespace: env
            .queue_namespace
            .clone()
            .or(file.namespace)
            .unwrap_or_else(|| RedisConfig::DEFAULT_NAMESPACE.to_string()),
    })
}

/// URLs that already carry a password keep it. Unparseable URLs pass through
/// untouched for the guard rails to report.
fn with_password(role: &'static str, raw: &str, password: &str) -> Result<String, ConfigLoadError> {
    let Ok(mut parsed) = url::Url::parse(raw) else {
        return Ok(raw.to_string());
    };
    if parsed.password().is_some() {
        return Ok(raw.to_string());
    }
    parsed
        .set_password(Some(password))
        .map_err(|_| ConfigLoadError::InvalidRedisPassword { role })?;
    Ok(parsed.to_string())
}

fn read_secret_file(path: &Path) -> Result<Option<String>, ConfigLoadError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigLoadError::SecretFileIo {
        path: path.to_path_buf(),
        source,
    })?;
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        Ok(None)
    } else {
        Ok(Some(trimmed.to_string()))
    }
}

fn pick<T>(
    env_key: &'static str,
    env: Option<&str>,
    file: Option<T>,
    default: T,
) -> Result<T, ConfigLoadError>
where
    T: FromStr,
    T::Err: Display,
{
    match env {
        Some(raw) => raw.parse().map_err(|err: T::Err| ConfigLoadError::InvalidValue {
            key: env_key,
            value: raw.to_string(),
            reason: err.to_string(),
        }),
        None => Ok(file.unwrap_or(default)),
    }
}

fn pick_duration(
    env_key: &'static str,
    file_key: &'static str,
    env: Option<&str>,
    file: Option<&str>,
    default: Duration,
) -> Result<Duration, ConfigLoadError> {
    let (key, raw) = match (env, file) {
        (Some(raw), _) => (env_key, raw),
        (None, Some(raw)) => (file_key, raw),
        (None, None) => return Ok(default),
    };
    parse_duration(raw).map_err(|err| ConfigLoadError::InvalidValue {
        key,
        value: raw.to_string(),
        reason: err.to_string(),
    })
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        file.write_all(contents.as_bytes()).expect("write config");
        file
    }

    fn load(file: Option<&Path>, env: EnvConfig) -> Result<ConfigLoad, ConfigLoadError> {
        let loader = match file {
            Some(path) => ConfigLoader::new().with_config_path(path),
            None => ConfigLoader::new(),
        };
        loader.load_with_env(env, false)
    }

    #[test]
    fn file_values_override_defaults() {
        let file = write_config(
            r#"
feed_prefix = "lobsters"

[redis]
url = "redis://shared:6379/2"
response_timeout = "2s"

[scanner]
interval = "30s"
score_threshold = 250

[worker]
failure_ttl = "1day"
lease_ttl = "2min"
max_attempts = 8
"#,
        );

        let loaded = load(Some(file.path()), EnvConfig::default()).expect("load");
        let config = loaded.config;

        assert_eq!(config.harvester.feed_prefix, "lobsters");
        assert_eq!(config.redis.queue_url, "redis://shared:6379/2");
        assert!(config.redis.shares_database());
        assert_eq!(config.redis.response_timeout, Duration::from_secs(2));
        assert_eq!(config.harvester.scanner.interval_ms, 30_000);
        assert_eq!(config.harvester.scanner.score_threshold, 250);
        assert_eq!(config.harvester.scanner.page_size, 10_000);
        assert_eq!(config.harvester.worker.failure_ttl_secs, 86_400);
        assert_eq!(config.harvester.worker.lease_ttl_ms, 120_000);
        assert_eq!(config.harvester.worker.max_attempts, 8);
        assert_eq!(config.metadata.config_path.as_deref(), Some(file.path()));
        assert!(loaded.warnings.is_empty());
    }

    #[test]
    fn environment_takes_precedence_over_file() {
        let file = write_config(
            r#"
[redis]
queue_url = "redis://file-queue:6379/0"
store_url = "redis://file-store:6379/0"

[scanner]
score_threshold = 250
"#,
        );
        let env = EnvConfig {
            redis_store_url: Some("redis://env-store:6379/1".to_string()),
            scan_score_threshold: Some("75".to_string()),
            backfill_interval: Some("500ms".to_string()),
            worker_retry_base_delay: Some("5s".to_string()),
            ..EnvConfig::default()
        };

        let config = load(Some(file.path()), env).expect("load").config;

        assert_eq!(config.redis.queue_url, "redis://file-queue:6379/0");
        assert_eq!(config.redis.store_url, "redis://env-store:6379/1");
        assert_eq!(config.harvester.scanner.score_threshold, 75);
        assert_eq!(config.harvester.backfill.interval_ms, 500);
        assert_eq!(config.harvester.worker.retry_base_delay_ms, 5_000);
        assert_eq!(config.harvester.worker.max_attempts, 5);
    }

    #[test]
    fn role_urls_beat_the_shared_url() {
        let env = EnvConfig {
            redis_url: Some("redis://shared:6379/0".to_string()),
            redis_store_url: Some("redis://items:6379/3".to_string()),
            ..EnvConfig::default()
        };

        let config = load(None, env).expect("load").config;

        assert_eq!(config.redis.queue_url, "redis://shared:6379/0");
        assert_eq!(config.redis.store_url, "redis://items:6379/3");
    }

    #[test]
    fn password_is_attached_to_both_urls() {
        let env = EnvConfig {
            redis_queue_url: Some("redis://queue:6379/0".to_string()),
            redis_store_url: Some("redis://:kept@store:6379/1".to_string()),
            redis_password: Some("s3cret".to_string()),
            ..EnvConfig::default()
        };

        let config = load(None, env).expect("load").config;

        assert_eq!(config.redis.queue_url, "redis://:s3cret@queue:6379/0");
        assert_eq!(config.redis.store_url, "redis://:kept@store:6379/1");
    }

    #[test]
    fn password_file_is_read_and_trimmed() {
        let secret = write_config("  from-file\n");
        let env = EnvConfig {
            redis_url: Some("redis://cache:6379/0".to_string()),
            redis_password_file: Some(secret.path().to_path_buf()),
            ..EnvConfig::default()
        };

        let config = load(None, env).expect("load").config;

        assert_eq!(config.redis.queue_url, "redis://:from-file@cache:6379/0");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let missing = dir.path().join("absent.toml");

        let err = load(Some(&missing), EnvConfig::default()).expect_err("missing file");

        assert!(matches!(err, ConfigLoadError::MissingConfig { path } if path == missing));
    }

    #[test]
    fn missing_file_from_env_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let env = EnvConfig {
            config_path: Some(dir.path().join("nope.toml")),
            ..EnvConfig::default()
        };

        assert!(matches!(
            load(None, env),
            Err(ConfigLoadError::MissingConfig { .. })
        ));
    }

    #[test]
    fn malformed_toml_reports_the_path() {
        let file = write_config("[scanner\npage_size = 5");

        let err = load(Some(file.path()), EnvConfig::default()).expect_err("bad toml");

        assert!(matches!(err, ConfigLoadError::Parse { ref path, .. } if path == file.path()));
    }

    #[test]
    fn bad_env_values_name_their_variable() {
        let env = EnvConfig {
            scan_page_size: Some("lots".to_string()),
            ..EnvConfig::default()
        };
        assert!(matches!(
            load(None, env),
            Err(ConfigLoadError::InvalidValue {
                key: "SCAN_PAGE_SIZE",
                ..
            })
        ));

        let env = EnvConfig {
            scan_run_budget: Some("forever".to_string()),
            ..EnvConfig::default()
        };
        assert!(matches!(
            load(None, env),
            Err(ConfigLoadError::InvalidValue {
                key: "SCAN_RUN_BUDGET",
                ..
            })
        ));
    }

    #[test]
    fn guard_rails_reject_zero_concurrency() {
        let env = EnvConfig {
            worker_concurrency: Some("0".to_string()),
            ..EnvConfig::default()
        };

        assert!(matches!(
            load(None, env),
            Err(ConfigLoadError::GuardRail(_))
        ));
    }

    #[test]
    fn env_file_is_loaded_before_gathering() {
        let mut env_file = tempfile::NamedTempFile::new().expect("env file");
        writeln!(env_file, "HARVESTER_LOADER_TEST_QUEUE_URL=redis://dotenv:6379/4")
            .expect("write env file");
        let file = write_config("");

        let loaded = ConfigLoader::new()
            .with_config_path(file.path())
            .with_env_file(env_file.path())
            .load()
            .expect("load");

        assert!(loaded.config.metadata.env_file_loaded);
        assert_eq!(
            std::env::var("HARVESTER_LOADER_TEST_QUEUE_URL").as_deref(),
            Ok("redis://dotenv:6379/4")
        );
    }

    #[test]
    fn absent_env_file_is_not_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let file = write_config("");

        let loaded = ConfigLoader::new()
            .with_config_path(file.path())
            .with_env_file(dir.path().join(".env"))
            .load()
            .expect("load");

        assert!(!loaded.config.metadata.env_file_loaded);
    }
}
