use crate::services::raster::MAX_WEBP_DIMENSION;
use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, fmt::Display, path::PathBuf, str::FromStr};

const ENV_PREFIX: &str = "THUMBNAILER_";

/// Where the source and destination buckets live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Buckets on local disk, metadata in SQLite.
    Local,
    /// Amazon S3 or an S3-compatible endpoint.
    S3,
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "s3" => Ok(Self::S3),
            other => bail!("unknown backend `{}` (expected `local` or `s3`)", other),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub source_bucket: String,
    pub destination_bucket: String,
    pub backend: Backend,
    pub storage_dir: String,
    pub database_url: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub scratch_dir: PathBuf,
    pub max_dimension: u32,
    pub density: u32,
    pub quality: f32,
    pub concurrency: usize,
    pub pdfium_path: Option<PathBuf>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Bucket-triggered thumbnail generator")]
pub struct Args {
    /// Host to bind to (overrides THUMBNAILER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides THUMBNAILER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Bucket originals are read from (overrides THUMBNAILER_SOURCE_BUCKET)
    #[arg(long)]
    pub source_bucket: Option<String>,

    /// Bucket thumbnails are written to (overrides THUMBNAILER_DESTINATION_BUCKET)
    #[arg(long)]
    pub destination_bucket: Option<String>,

    /// Storage backend (overrides THUMBNAILER_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Directory for the local backend's payloads (overrides THUMBNAILER_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL for the local backend (overrides THUMBNAILER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// AWS region (overrides THUMBNAILER_REGION)
    #[arg(long)]
    pub region: Option<String>,

    /// Custom S3 endpoint, path-style (overrides THUMBNAILER_ENDPOINT)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Directory for intermediate page rasters (overrides THUMBNAILER_SCRATCH_DIR)
    #[arg(long)]
    pub scratch_dir: Option<PathBuf>,

    /// Longest thumbnail edge in pixels (overrides THUMBNAILER_MAX_DIMENSION)
    #[arg(long)]
    pub max_dimension: Option<u32>,

    /// Document rasterization density in DPI (overrides THUMBNAILER_DENSITY)
    #[arg(long)]
    pub density: Option<u32>,

    /// WebP quality 0-100 (overrides THUMBNAILER_QUALITY)
    #[arg(long)]
    pub quality: Option<f32>,

    /// Keys processed concurrently per batch (overrides THUMBNAILER_CONCURRENCY)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Directory containing the PDFium shared library (overrides THUMBNAILER_PDFIUM_PATH)
    #[arg(long)]
    pub pdfium_path: Option<PathBuf>,

    /// Process one notification batch from a JSON file and exit
    #[arg(long)]
    pub event_file: Option<PathBuf>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the
    /// optional one-shot event file.
    pub fn from_env_and_args() -> Result<(Self, Option<PathBuf>)> {
        let mut args = Args::parse();
        let event_file = args.event_file.take();
        let cfg = Self::merge(args, |name| env::var(format!("{ENV_PREFIX}{name}")).ok())?;
        Ok((cfg, event_file))
    }

    /// Merge CLI values over environment values over defaults.
    /// `lookup` resolves an unprefixed variable name.
    pub fn merge(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let cfg = Self {
            host: args
                .host
                .or_else(|| lookup("HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: pick(args.port, &lookup, "PORT", 3000)?,
            source_bucket: args
                .source_bucket
                .or_else(|| lookup("SOURCE_BUCKET"))
                .unwrap_or_else(|| "documents".into()),
            destination_bucket: args
                .destination_bucket
                .or_else(|| lookup("DESTINATION_BUCKET"))
                .unwrap_or_else(|| "thumbnails".into()),
            backend: pick(args.backend, &lookup, "BACKEND", Backend::Local)?,
            storage_dir: args
                .storage_dir
                .or_else(|| lookup("STORAGE_DIR"))
                .unwrap_or_else(|| "./data/objects".into()),
            database_url: args
                .database_url
                .or_else(|| lookup("DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/thumbnailer.db".into()),
            region: args
                .region
                .or_else(|| lookup("REGION"))
                .unwrap_or_else(|| "ap-northeast-2".into()),
            endpoint: args.endpoint.or_else(|| lookup("ENDPOINT")),
            scratch_dir: args
                .scratch_dir
                .or_else(|| lookup("SCRATCH_DIR").map(PathBuf::from))
                .unwrap_or_else(env::temp_dir),
            max_dimension: pick(args.max_dimension, &lookup, "MAX_DIMENSION", 1440)?,
            density: pick(args.density, &lookup, "DENSITY", 200)?,
            quality: pick(args.quality, &lookup, "QUALITY", 80.0)?,
            concurrency: pick(args.concurrency, &lookup, "CONCURRENCY", 4)?,
            pdfium_path: args
                .pdfium_path
                .or_else(|| lookup("PDFIUM_PATH").map(PathBuf::from)),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.max_dimension == 0 || self.max_dimension > MAX_WEBP_DIMENSION {
            bail!(
                "max_dimension must be within 1-{}, got {}",
                MAX_WEBP_DIMENSION,
                self.max_dimension
            );
        }
        if self.density == 0 {
            bail!("density must be greater than zero");
        }
        if self.concurrency == 0 {
            bail!("concurrency must be greater than zero");
        }
        if !(0.0..=100.0).contains(&self.quality) {
            bail!("quality must be within 0-100, got {}", self.quality);
        }
        if self.source_bucket == self.destination_bucket {
            bail!(
                "source and destination bucket are both `{}`; thumbnails would overwrite originals",
                self.source_bucket
            );
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// CLI value, else parsed environment value, else `default`.
fn pick<T>(cli: Option<T>, lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    if let Some(value) = cli {
        return Ok(value);
    }
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{}", err))
            .with_context(|| format!("parsing {ENV_PREFIX}{name} value `{}`", raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn defaults_apply_without_input() {
        let cfg = AppConfig::merge(Args::default(), env_of(&[])).unwrap();

        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.source_bucket, "documents");
        assert_eq!(cfg.destination_bucket, "thumbnails");
        assert_eq!(cfg.backend, Backend::Local);
        assert_eq!(cfg.region, "ap-northeast-2");
        assert_eq!(cfg.max_dimension, 1440);
        assert_eq!(cfg.density, 200);
        assert_eq!(cfg.quality, 80.0);
        assert_eq!(cfg.concurrency, 4);
        assert_eq!(cfg.scratch_dir, env::temp_dir());
        assert!(cfg.endpoint.is_none());
    }

    #[test]
    fn cli_overrides_environment() {
        let args = Args {
            port: Some(9000),
            backend: Some(Backend::Local),
            ..Args::default()
        };
        let cfg = AppConfig::merge(
            args,
            env_of(&[("PORT", "8080"), ("BACKEND", "s3"), ("DENSITY", "150")]),
        )
        .unwrap();

        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.backend, Backend::Local);
        assert_eq!(cfg.density, 150);
    }

    #[test]
    fn unparsable_environment_value_names_the_variable() {
        let err = AppConfig::merge(Args::default(), env_of(&[("PORT", "eighty")])).unwrap_err();
        assert!(format!("{err:#}").contains("THUMBNAILER_PORT"));

        let err = AppConfig::merge(Args::default(), env_of(&[("BACKEND", "ftp")])).unwrap_err();
        assert!(format!("{err:#}").contains("ftp"));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        for (name, value) in [
            ("MAX_DIMENSION", "0"),
            ("MAX_DIMENSION", "16384"),
            ("DENSITY", "0"),
            ("CONCURRENCY", "0"),
            ("QUALITY", "101"),
        ] {
            assert!(
                AppConfig::merge(Args::default(), env_of(&[(name, value)])).is_err(),
                "{name}={value} accepted"
            );
        }
    }

    #[test]
    fn largest_webp_edge_is_accepted() {
        let cfg = AppConfig::merge(Args::default(), env_of(&[("MAX_DIMENSION", "16383")])).unwrap();
        assert_eq!(cfg.max_dimension, 16383);
    }

    #[test]
    fn identical_buckets_are_rejected() {
        let err = AppConfig::merge(
            Args::default(),
            env_of(&[("SOURCE_BUCKET", "media"), ("DESTINATION_BUCKET", "media")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("media"));
    }
}
