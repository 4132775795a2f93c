//! Process configuration: loads and validates environment variables at boot.
//!
//! Missing required variables fail fast with the full enumerated list
//! rather than one-at-a-time, so an operator fixes a broken deployment in
//! one pass instead of playing whack-a-mole with restarts.

use std::env;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("missing required environment variable(s): {}", .0.join(", "))]
  MissingRequired(Vec<String>),

  #[error("invalid value for {name}: {value:?} ({reason})")]
  InvalidValue {
    name: &'static str,
    value: String,
    reason: String,
  },
}

/// Boot-time configuration for the stitch binary.
#[derive(Debug, Clone)]
pub struct Config {
  /// SQLite connection string the store connects to.
  pub database_url: String,
  /// Base URL used to build worker `callback_url`s.
  pub public_base_url: String,
  /// Address the HTTP surface binds to.
  pub bind_addr: String,
  /// Webhook ingress token-bucket refill rate.
  pub rate_limit_per_second: f64,
  /// Webhook ingress token-bucket capacity.
  pub rate_limit_burst: f64,
  /// `tracing_subscriber::EnvFilter` directive.
  pub rust_log: String,
}

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_RATE_LIMIT_PER_SECOND: f64 = 5.0;
const DEFAULT_RATE_LIMIT_BURST: f64 = 10.0;
const DEFAULT_RUST_LOG: &str = "info";

impl Config {
  /// Reads configuration from the process environment. Collects every
  /// missing required variable before returning, so the caller sees the
  /// whole list at once rather than one failure per restart.
  pub fn from_env() -> Result<Self, ConfigError> {
    let mut missing = Vec::new();

    let database_url = read_required("DATABASE_URL", &mut missing);
    let public_base_url = read_required("PUBLIC_BASE_URL", &mut missing);

    if !missing.is_empty() {
      return Err(ConfigError::MissingRequired(missing));
    }

    let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
    let rate_limit_per_second = read_optional_f64(
      "RATE_LIMIT_PER_SECOND",
      DEFAULT_RATE_LIMIT_PER_SECOND,
    )?;
    let rate_limit_burst = read_optional_f64("RATE_LIMIT_BURST", DEFAULT_RATE_LIMIT_BURST)?;
    let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_RUST_LOG.to_string());

    Ok(Config {
      database_url: database_url.expect("checked above"),
      public_base_url: public_base_url.expect("checked above"),
      bind_addr,
      rate_limit_per_second,
      rate_limit_burst,
      rust_log,
    })
  }
}

fn read_required(name: &'static str, missing: &mut Vec<String>) -> Option<String> {
  match env::var(name) {
    Ok(value) if !value.is_empty() => Some(value),
    _ => {
      missing.push(name.to_string());
      None
    }
  }
}

fn read_optional_f64(name: &'static str, default: f64) -> Result<f64, ConfigError> {
  match env::var(name) {
    Ok(value) => value.parse::<f64>().map_err(|e| ConfigError::InvalidValue {
      name,
      value,
      reason: e.to_string(),
    }),
    Err(_) => Ok(default),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex;

  // Environment variables are process-global; serialize tests that touch
  // them so they don't race.
  static ENV_LOCK: Mutex<()> = Mutex::new(());

  fn clear_all() {
    for key in [
      "DATABASE_URL",
      "PUBLIC_BASE_URL",
      "BIND_ADDR",
      "RATE_LIMIT_PER_SECOND",
      "RATE_LIMIT_BURST",
      "RUST_LOG",
    ] {
      unsafe { env::remove_var(key) };
    }
  }

  #[test]
  fn missing_required_vars_are_all_enumerated() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_all();
    let err = Config::from_env().unwrap_err();
    match err {
      ConfigError::MissingRequired(names) => {
        assert!(names.contains(&"DATABASE_URL".to_string()));
        assert!(names.contains(&"PUBLIC_BASE_URL".to_string()));
      }
      other => panic!("expected MissingRequired, got {other:?}"),
    }
  }

  #[test]
  fn defaults_apply_when_optional_vars_absent() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_all();
    unsafe {
      env::set_var("DATABASE_URL", "sqlite::memory:");
      env::set_var("PUBLIC_BASE_URL", "http://localhost:8080");
    }
    let config = Config::from_env().unwrap();
    assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
    assert_eq!(config.rate_limit_per_second, DEFAULT_RATE_LIMIT_PER_SECOND);
    assert_eq!(config.rate_limit_burst, DEFAULT_RATE_LIMIT_BURST);
    clear_all();
  }

  #[test]
  fn invalid_numeric_override_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_all();
    unsafe {
      env::set_var("DATABASE_URL", "sqlite::memory:");
      env::set_var("PUBLIC_BASE_URL", "http://localhost:8080");
      env::set_var("RATE_LIMIT_PER_SECOND", "not-a-number");
    }
    let err = Config::from_env().unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { name: "RATE_LIMIT_PER_SECOND", .. }));
    clear_all();
  }
}
