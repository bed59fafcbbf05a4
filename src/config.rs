use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
    pub test_before_acquire: bool,
}

/// Session cookie settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub ttl_days: i64,
    pub cookie_secure: bool,
}

/// Aligo SMS gateway settings. Without an API key the client runs in simulation mode.
#[derive(Debug, Clone)]
pub struct SmsConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub user_id: Option<String>,
    pub sender_phone: Option<String>,
    pub low_balance_threshold: i64,
}

/// Passport collection settings
#[derive(Debug, Clone)]
pub struct PassportConfig {
    pub base_url: String,
    pub upload_dir: PathBuf,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub session: SessionConfig,
    pub sms: SmsConfig,
    pub passport: PassportConfig,
    pub log_level: String,
    pub log_format: String,
    pub http_port: u16,
    pub environment: String,
    pub housekeeping_interval_secs: u64,
    pub migrations_path: String,
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.parse::<T>().ok())
}

fn env_non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|s| !s.trim().is_empty())
}

impl DatabaseConfig {
    /// Create database config from environment variables
    pub fn from_env() -> Result<Self, String> {
        let url = env::var("DATABASE_URL")
            .map_err(|_| "DATABASE_URL environment variable is required")?;

        let max_connections = env_parse::<u32>("DATABASE_MAX_CONNECTIONS").unwrap_or(10);
        let acquire_timeout_secs = env_parse::<u64>("DATABASE_ACQUIRE_TIMEOUT_SECS").unwrap_or(30);
        let idle_timeout_secs = env_parse::<u64>("DATABASE_IDLE_TIMEOUT_SECS").unwrap_or(600); // 10 minutes
        let max_lifetime_secs = env_parse::<u64>("DATABASE_MAX_LIFETIME_SECS").unwrap_or(1800); // 30 minutes
        let test_before_acquire = env_parse::<bool>("DATABASE_TEST_BEFORE_ACQUIRE").unwrap_or(true);

        if max_connections == 0 {
            return Err("DATABASE_MAX_CONNECTIONS must be greater than 0".to_string());
        }

        if acquire_timeout_secs == 0 {
            return Err("DATABASE_ACQUIRE_TIMEOUT_SECS must be greater than 0".to_string());
        }

        Ok(Self {
            url,
            max_connections,
            acquire_timeout_secs,
            idle_timeout_secs,
            max_lifetime_secs,
            test_before_acquire,
        })
    }

    /// Get acquire timeout as Duration
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    /// Get idle timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Get max lifetime as Duration
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/cruise_guide".to_string(),
            max_connections: 10,
            acquire_timeout_secs: 30,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
            test_before_acquire: true,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "cg.sid.v2".to_string(),
            ttl_days: 30,
            cookie_secure: false,
        }
    }
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://apis.aligo.in".to_string(),
            api_key: None,
            user_id: None,
            sender_phone: None,
            low_balance_threshold: 0,
        }
    }
}

impl SmsConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: env_non_empty("ALIGO_BASE_URL")
                .unwrap_or_else(|| "https://apis.aligo.in".to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: env_non_empty("ALIGO_API_KEY"),
            user_id: env_non_empty("ALIGO_USER_ID"),
            sender_phone: env_non_empty("ALIGO_SENDER_PHONE"),
            low_balance_threshold: env_parse::<i64>("ALIGO_REMAIN_ALERT_THRESHOLD").unwrap_or(0),
        }
    }

    /// All three credentials are needed for a live send
    pub fn is_live(&self) -> bool {
        self.api_key.is_some() && self.user_id.is_some() && self.sender_phone.is_some()
    }
}

impl Default for PassportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            upload_dir: PathBuf::from("./uploads"),
        }
    }
}

impl AppConfig {
    /// Create application config from environment variables
    pub fn from_env() -> Result<Self, String> {
        let database = DatabaseConfig::from_env()?;

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_format = env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
        let http_port = env_parse::<u16>("HTTP_PORT").unwrap_or(3000);
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        // Validate log level
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid LOG_LEVEL: {}. Must be one of: {:?}",
                log_level, valid_log_levels
            ));
        }

        let valid_log_formats = ["pretty", "json"];
        if !valid_log_formats.contains(&log_format.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid LOG_FORMAT: {}. Must be one of: {:?}",
                log_format, valid_log_formats
            ));
        }

        // Validate environment
        let valid_environments = ["development", "staging", "production"];
        if !valid_environments.contains(&environment.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid ENVIRONMENT: {}. Must be one of: {:?}",
                environment, valid_environments
            ));
        }
        let environment = environment.to_lowercase();

        let ttl_days = env_parse::<i64>("SESSION_TTL_DAYS").unwrap_or(30);
        if ttl_days <= 0 {
            return Err("SESSION_TTL_DAYS must be greater than 0".to_string());
        }
        let session = SessionConfig {
            cookie_name: "cg.sid.v2".to_string(),
            ttl_days,
            cookie_secure: env_parse::<bool>("COOKIE_SECURE")
                .unwrap_or(environment == "production"),
        };

        let passport = PassportConfig {
            base_url: env_non_empty("PASSPORT_BASE_URL")
                .unwrap_or_else(|| "http://localhost:3000".to_string())
                .trim_end_matches('/')
                .to_string(),
            upload_dir: PathBuf::from(
                env_non_empty("UPLOAD_DIR").unwrap_or_else(|| "./uploads".to_string()),
            ),
        };

        let housekeeping_interval_secs =
            env_parse::<u64>("HOUSEKEEPING_INTERVAL_SECS").unwrap_or(3600);
        if housekeeping_interval_secs == 0 {
            return Err("HOUSEKEEPING_INTERVAL_SECS must be greater than 0".to_string());
        }

        Ok(Self {
            database,
            session,
            sms: SmsConfig::from_env(),
            passport,
            log_level: log_level.to_lowercase(),
            log_format: log_format.to_lowercase(),
            http_port,
            environment,
            housekeeping_interval_secs,
            migrations_path: env_non_empty("MIGRATIONS_PATH")
                .unwrap_or_else(|| "./migrations".to_string()),
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Check if running in development
    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    /// Get database URL (convenience method)
    pub fn database_url(&self) -> &str {
        &self.database.url
    }

    pub fn housekeeping_interval(&self) -> Duration {
        Duration::from_secs(self.housekeeping_interval_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            session: SessionConfig::default(),
            sms: SmsConfig::default(),
            passport: PassportConfig::default(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            http_port: 3000,
            environment: "development".to_string(),
            housekeeping_interval_secs: 3600,
            migrations_path: "./migrations".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_config_default() {
        let config = DatabaseConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.acquire_timeout_secs, 30);
    }

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.http_port, 3000);
        assert!(config.is_development());
        assert!(!config.is_production());
        assert_eq!(config.session.cookie_name, "cg.sid.v2");
        assert_eq!(config.session.ttl_days, 30);
    }

    #[test]
    fn test_sms_config_needs_all_credentials() {
        let mut sms = SmsConfig::default();
        assert!(!sms.is_live());

        sms.api_key = Some("key".to_string());
        sms.user_id = Some("user".to_string());
        assert!(!sms.is_live());

        sms.sender_phone = Some("01000000000".to_string());
        assert!(sms.is_live());
    }
}
