// src/config.rs

use anyhow::{bail, Context, Result};
use std::{
    env, fmt,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, info};

pub const DEFAULT_ENV_FILE: &str = ".env";
pub const DEFAULT_OUTPUT_PATH: &str = "output/cropland_fraction_hectarage.csv";
pub const DEFAULT_SHAPEFILE_SRID: i32 = 4326;

/// Connection settings for the PostGIS database.
#[derive(Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub name: String,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

/// Everything the loaders and the aggregation job read from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub db: DbConfig,
    pub shapefile_path: PathBuf,
    pub shapefile_srid: i32,
    pub cdl_base_path: PathBuf,
    pub cdl_years: Vec<u16>,
    pub output_path: PathBuf,
    pub parquet_path: Option<PathBuf>,
    pub raster2pgsql_bin: String,
    pub psql_bin: String,
}

impl Config {
    /// Layer the env file (`CROPLAND_ENV_FILE`, else `.env`) under the process
    /// environment, then read the config from the result.
    pub fn load() -> Result<Self> {
        let env_file = env::var("CROPLAND_ENV_FILE").unwrap_or_else(|_| DEFAULT_ENV_FILE.into());
        load_env_file(Path::new(&env_file))?;
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| -> Option<String> {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let require = |key: &str| -> Result<String> {
            get(key).with_context(|| format!("missing required configuration variable {key}"))
        };

        let db = DbConfig {
            name: require("POSTGRES_DB")?,
            user: require("POSTGRES_USER")?,
            password: require("POSTGRES_PASSWORD")?,
            host: require("POSTGRES_HOST")?,
            port: parse_var("POSTGRES_PORT", &require("POSTGRES_PORT")?)?,
        };

        let cdl_years = parse_years(&require("CDL_YEARS")?).context("invalid CDL_YEARS")?;

        let shapefile_srid = match get("SHAPEFILE_SRID") {
            Some(raw) => parse_var("SHAPEFILE_SRID", &raw)?,
            None => DEFAULT_SHAPEFILE_SRID,
        };

        Ok(Self {
            db,
            shapefile_path: PathBuf::from(require("SHAPEFILE_PATH")?),
            shapefile_srid,
            cdl_base_path: PathBuf::from(require("CDL_BASE_PATH")?),
            cdl_years,
            output_path: get("CROPLAND_OUTPUT_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_PATH)),
            parquet_path: get("CROPLAND_PARQUET_PATH").map(PathBuf::from),
            raster2pgsql_bin: get("RASTER2PGSQL_BIN").unwrap_or_else(|| "raster2pgsql".into()),
            psql_bin: get("PSQL_BIN").unwrap_or_else(|| "psql".into()),
        })
    }
}

/// Load `path` into the process environment without overriding variables
/// that are already set. A missing file is fine.
fn load_env_file(path: &Path) -> Result<()> {
    match dotenvy::from_path(path) {
        Ok(()) => {
            info!(path = %path.display(), "loaded env file");
            Ok(())
        }
        Err(e) if e.not_found() => {
            debug!(path = %path.display(), "no env file; using process environment");
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("reading env file {}", path.display())),
    }
}

fn parse_var<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse::<T>()
        .with_context(|| format!("configuration variable {key} has invalid value {raw:?}"))
}

/// Accepts `2020,2021` as well as a literal list such as `[2020, 2021]`.
pub fn parse_years(raw: &str) -> Result<Vec<u16>> {
    let inner = raw
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim();

    let years = inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u16>()
                .with_context(|| format!("year {s:?} is not an integer"))
        })
        .collect::<Result<Vec<_>>>()?;

    if years.is_empty() {
        bail!("year list {raw:?} is empty");
    }
    Ok(years)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_vars() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("POSTGRES_DB", "gis"),
            ("POSTGRES_USER", "loader"),
            ("POSTGRES_PASSWORD", "s3cret"),
            ("POSTGRES_HOST", "localhost"),
            ("POSTGRES_PORT", "5432"),
            ("SHAPEFILE_PATH", "data/ne_10m_admin_1_states_provinces.shp"),
            ("CDL_BASE_PATH", "data/cdl"),
            ("CDL_YEARS", "2020,2021"),
        ])
    }

    fn from_map(vars: &HashMap<&'static str, &'static str>) -> Result<Config> {
        Config::from_lookup(|k| vars.get(k).map(|v| v.to_string()))
    }

    #[test]
    fn reads_required_and_defaults() -> Result<()> {
        let cfg = from_map(&base_vars())?;
        assert_eq!(cfg.db.name, "gis");
        assert_eq!(cfg.db.port, 5432);
        assert_eq!(cfg.cdl_years, vec![2020, 2021]);
        assert_eq!(cfg.shapefile_srid, 4326);
        assert_eq!(cfg.output_path, PathBuf::from(DEFAULT_OUTPUT_PATH));
        assert_eq!(cfg.parquet_path, None);
        assert_eq!(cfg.raster2pgsql_bin, "raster2pgsql");
        assert_eq!(cfg.psql_bin, "psql");
        Ok(())
    }

    #[test]
    fn missing_variable_is_named_in_error() {
        let mut vars = base_vars();
        vars.remove("CDL_BASE_PATH");
        let err = from_map(&vars).unwrap_err();
        assert!(format!("{err:#}").contains("CDL_BASE_PATH"));
    }

    #[test]
    fn blank_variable_counts_as_missing() {
        let mut vars = base_vars();
        vars.insert("POSTGRES_HOST", "   ");
        let err = from_map(&vars).unwrap_err();
        assert!(format!("{err:#}").contains("POSTGRES_HOST"));
    }

    #[test]
    fn bad_port_fails_fast() {
        let mut vars = base_vars();
        vars.insert("POSTGRES_PORT", "five");
        let err = from_map(&vars).unwrap_err();
        assert!(format!("{err:#}").contains("POSTGRES_PORT"));
    }

    #[test]
    fn optional_overrides() -> Result<()> {
        let mut vars = base_vars();
        vars.insert("SHAPEFILE_SRID", "3857");
        vars.insert("CROPLAND_OUTPUT_PATH", "/tmp/out.csv");
        vars.insert("CROPLAND_PARQUET_PATH", "/tmp/out.parquet");
        vars.insert("PSQL_BIN", "/usr/lib/postgresql/16/bin/psql");
        let cfg = from_map(&vars)?;
        assert_eq!(cfg.shapefile_srid, 3857);
        assert_eq!(cfg.output_path, PathBuf::from("/tmp/out.csv"));
        assert_eq!(cfg.parquet_path, Some(PathBuf::from("/tmp/out.parquet")));
        assert_eq!(cfg.psql_bin, "/usr/lib/postgresql/16/bin/psql");
        Ok(())
    }

    #[test]
    fn years_accept_list_literal() -> Result<()> {
        assert_eq!(parse_years("[2020, 2021, 2022]")?, vec![2020, 2021, 2022]);
        assert_eq!(parse_years(" 2023 ")?, vec![2023]);
        assert_eq!(parse_years("2021,2020,")?, vec![2021, 2020]);
        Ok(())
    }

    #[test]
    fn years_reject_garbage_and_empty() {
        assert!(parse_years("2020,twenty").is_err());
        assert!(parse_years("[]").is_err());
        assert!(parse_years(",").is_err());
    }

    #[test]
    fn debug_redacts_password() -> Result<()> {
        let cfg = from_map(&base_vars())?;
        let dbg = format!("{:?}", cfg);
        assert!(!dbg.contains("s3cret"));
        assert!(dbg.contains("<redacted>"));
        Ok(())
    }

    #[test]
    fn missing_env_file_is_not_an_error() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        load_env_file(&tmp.path().join("absent.env"))?;
        Ok(())
    }
}
