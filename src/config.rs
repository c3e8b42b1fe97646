//! Driver configuration, read from `DAGRAD_*` environment variables.

use std::path::PathBuf;

use thiserror::Error;

const ENV_PREFIX: &str = "DAGRAD_";

const ENV_SEED: &str = "SEED";
const ENV_EPOCHS: &str = "EPOCHS";
const ENV_LEARNING_RATE: &str = "LEARNING_RATE";
const ENV_LOG_EVERY: &str = "LOG_EVERY";
const ENV_HIDDEN: &str = "HIDDEN";
const ENV_DOT_PATH: &str = "DOT_PATH";

const DEFAULT_SEED: u64 = 42;
const DEFAULT_EPOCHS: usize = 500;
const DEFAULT_LEARNING_RATE: f64 = 0.1;
const DEFAULT_LOG_EVERY: usize = 50;
const DEFAULT_HIDDEN: usize = 4;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
  #[error("config validation: {0}")]
  Validation(String),

  #[error("env var {key}: {message}")]
  EnvVar { key: String, message: String },

  #[error("env var {key}={value:?}: {message}")]
  Parse {
    key: String,
    value: String,
    message: String,
  },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
  /// Seed for weight initialisation
  pub seed: u64,
  /// Passes over the four XOR samples
  pub epochs: usize,
  pub learning_rate: f64,
  /// Log the mean loss every this many epochs
  pub log_every: usize,
  /// Width of the hidden layer
  pub hidden: usize,
  /// Where to write the scenario graph as DOT, if anywhere
  pub dot_path: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      seed: DEFAULT_SEED,
      epochs: DEFAULT_EPOCHS,
      learning_rate: DEFAULT_LEARNING_RATE,
      log_every: DEFAULT_LOG_EVERY,
      hidden: DEFAULT_HIDDEN,
      dot_path: None,
    }
  }
}

impl Config {
  /// Unset variables fall back to [`Config::default`]; set but malformed ones are errors
  pub fn from_env() -> Result<Self, ConfigError> {
    let default = Config::default();
    Ok(Self {
      seed: env_parsed(&env_key(ENV_SEED))?.unwrap_or(default.seed),
      epochs: env_parsed(&env_key(ENV_EPOCHS))?.unwrap_or(default.epochs),
      learning_rate: env_parsed(&env_key(ENV_LEARNING_RATE))?.unwrap_or(default.learning_rate),
      log_every: env_parsed(&env_key(ENV_LOG_EVERY))?.unwrap_or(default.log_every),
      hidden: env_parsed(&env_key(ENV_HIDDEN))?.unwrap_or(default.hidden),
      dot_path: env_string(&env_key(ENV_DOT_PATH))?.map(PathBuf::from),
    })
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.epochs == 0 {
      return Err(ConfigError::Validation("epochs must be greater than 0".to_string()));
    }
    if self.hidden == 0 {
      return Err(ConfigError::Validation("hidden must be greater than 0".to_string()));
    }
    if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
      return Err(ConfigError::Validation(format!(
        "learning_rate must be positive, got {}",
        self.learning_rate
      )));
    }
    Ok(())
  }
}

/// `SEED` -> `DAGRAD_SEED`
pub fn env_key(suffix: &str) -> String {
  format!("{ENV_PREFIX}{suffix}")
}

fn env_string(key: &str) -> Result<Option<String>, ConfigError> {
  match std::env::var(key) {
    Ok(s) => Ok(Some(s)),
    Err(std::env::VarError::NotPresent) => Ok(None),
    Err(e) => Err(ConfigError::EnvVar {
      key: key.to_string(),
      message: e.to_string(),
    }),
  }
}

fn env_parsed<T>(key: &str) -> Result<Option<T>, ConfigError>
where
  T: std::str::FromStr,
  T::Err: std::fmt::Display,
{
  let Some(s) = env_string(key)? else {
    return Ok(None);
  };
  match s.trim().parse() {
    Ok(t) => Ok(Some(t)),
    Err(e) => Err(ConfigError::Parse {
      key: key.to_string(),
      message: e.to_string(),
      value: s,
    }),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  use std::sync::Mutex;

  static ENV_LOCK: Mutex<()> = Mutex::new(());

  const ALL: [&str; 6] = [
    ENV_SEED,
    ENV_EPOCHS,
    ENV_LEARNING_RATE,
    ENV_LOG_EVERY,
    ENV_HIDDEN,
    ENV_DOT_PATH,
  ];

  fn with_env<R>(vars: &[(&str, &str)], f: impl FnOnce() -> R) -> R {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    for suffix in ALL {
      std::env::remove_var(env_key(suffix));
    }
    for (suffix, value) in vars {
      std::env::set_var(env_key(suffix), value);
    }
    let out = f();
    for (suffix, _) in vars {
      std::env::remove_var(env_key(suffix));
    }
    out
  }

  #[test]
  fn defaults_when_unset() {
    let config = with_env(&[], Config::from_env).unwrap();
    assert_eq!(config, Config::default());
    assert!(config.validate().is_ok());
  }

  #[test]
  fn reads_prefixed_vars() {
    let config = with_env(
      &[
        (ENV_SEED, "7"),
        (ENV_EPOCHS, "20"),
        (ENV_LEARNING_RATE, "0.5"),
        (ENV_HIDDEN, " 8 "),
        (ENV_DOT_PATH, "graph.dot"),
      ],
      Config::from_env,
    )
    .unwrap();
    assert_eq!(config.seed, 7);
    assert_eq!(config.epochs, 20);
    assert_eq!(config.learning_rate, 0.5);
    assert_eq!(config.log_every, DEFAULT_LOG_EVERY);
    assert_eq!(config.hidden, 8);
    assert_eq!(config.dot_path, Some(PathBuf::from("graph.dot")));
  }

  #[test]
  fn malformed_value_names_the_key() {
    let err = with_env(&[(ENV_EPOCHS, "many")], Config::from_env).unwrap_err();
    match err {
      ConfigError::Parse { key, value, .. } => {
        assert_eq!(key, "DAGRAD_EPOCHS");
        assert_eq!(value, "many");
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn validation() {
    let bad = [
      Config {
        epochs: 0,
        ..Config::default()
      },
      Config {
        hidden: 0,
        ..Config::default()
      },
      Config {
        learning_rate: 0.0,
        ..Config::default()
      },
      Config {
        learning_rate: f64::NAN,
        ..Config::default()
      },
    ];
    for config in bad {
      assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }
  }
}
