use std::{env, fmt::Display, path::PathBuf, str::FromStr};

use tracing::{info, warn};

use crate::error::{AppError, AppResult};

/// Application settings read from `BOOKWISE_*` environment variables.
/// Rocket's own settings (address, port, template dir) come from
/// `Rocket.toml` and `ROCKET_*` as usual.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub db_file: String,
    pub max_sessions: i64,
}

impl Config {
    pub fn load() -> AppResult<Self> {
        Ok(Self {
            data_dir: try_load("BOOKWISE_DATA_DIR", "data")?,
            db_file: try_load("BOOKWISE_DB_FILE", "bookwise.sqlite")?,
            max_sessions: try_load("BOOKWISE_MAX_SESSIONS", "5")?,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_file)
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> AppResult<T>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    raw.parse().map_err(|e| {
        warn!("Invalid {key} value: {e}");
        AppError::Config(format!("invalid {key} value {raw:?}: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_path_joins_dir_and_file() {
        let config = Config {
            data_dir: PathBuf::from("/var/lib/bookwise"),
            db_file: "books.sqlite".into(),
            max_sessions: 5,
        };
        assert_eq!(
            config.database_path(),
            PathBuf::from("/var/lib/bookwise/books.sqlite")
        );
    }

    #[test]
    fn unset_variable_falls_back_to_default() {
        let value: i64 = try_load("BOOKWISE_TEST_UNSET_VARIABLE", "7").unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn unparseable_default_is_a_config_error() {
        let err = try_load::<i64>("BOOKWISE_TEST_UNSET_VARIABLE", "seven").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
