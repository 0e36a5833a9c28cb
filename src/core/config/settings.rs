use std::path::PathBuf;

use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_cors_origins, parse_environment,
    parse_pass_rule, parse_store_backend, parse_u16, parse_u32, parse_u64,
};
use super::types::{
    ApiSettings, ConfigError, CorsSettings, DatabaseSettings, ProgressionSettings, RedisSettings,
    RuntimeSettings, ServerHost, ServerPort, ServerSettings, Settings, StoreBackend,
    TelemetrySettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("PROGRESSION_HOST", "0.0.0.0");
        let port = env_or_default("PROGRESSION_PORT", "8000");

        let environment = parse_environment(
            env_optional("PROGRESSION_ENV").or_else(|| env_optional("ENVIRONMENT")),
        );
        let strict_config = env_optional("PROGRESSION_STRICT_CONFIG")
            .map(|value| parse_bool(&value))
            .unwrap_or(false)
            || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "School Progression API");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "progression");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "school_progression");
        let database_url = env_optional("DATABASE_URL");
        let max_connections = parse_u32(
            "POSTGRES_MAX_CONNECTIONS",
            env_or_default("POSTGRES_MAX_CONNECTIONS", "20"),
        )?;

        let redis_host = env_or_default("REDIS_HOST", "localhost");
        let redis_port = parse_u16("REDIS_PORT", env_or_default("REDIS_PORT", "6379"))?;
        let redis_db = parse_u16("REDIS_DB", env_or_default("REDIS_DB", "0"))?;
        let redis_password = env_or_default("REDIS_PASSWORD", "");

        let store = parse_store_backend(env_optional("PROGRESSION_STORE"))?;
        let catalog_path = env_optional("PROGRESSION_CATALOG_PATH").map(PathBuf::from);
        let pass_rule = parse_pass_rule(env_optional("PROGRESSION_PASS_RULE"))?;
        let recovery_enabled = env_optional("PROGRESSION_RECOVERY_ENABLED")
            .map(|value| parse_bool(&value))
            .unwrap_or(true);
        let auto_finalize = env_optional("PROGRESSION_AUTO_FINALIZE")
            .map(|value| parse_bool(&value))
            .unwrap_or(true);
        let sweep_interval_seconds = parse_u64(
            "PROGRESSION_SWEEP_INTERVAL_SECONDS",
            env_or_default("PROGRESSION_SWEEP_INTERVAL_SECONDS", "300"),
        )?;
        let progress_cache_ttl_seconds = parse_u64(
            "PROGRESSION_PROGRESS_CACHE_TTL_SECONDS",
            env_or_default("PROGRESSION_PROGRESS_CACHE_TTL_SECONDS", "60"),
        )?;

        let log_level = env_or_default("PROGRESSION_LOG_LEVEL", "info");
        let json =
            env_optional("PROGRESSION_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, version, api_v1_str },
            cors: CorsSettings { origins: cors_origins },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
                max_connections,
            },
            redis: RedisSettings {
                host: redis_host,
                port: redis_port,
                db: redis_db,
                password: redis_password,
            },
            progression: ProgressionSettings {
                store,
                catalog_path,
                pass_rule,
                recovery_enabled,
                auto_finalize,
                sweep_interval_seconds,
                progress_cache_ttl_seconds,
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn redis(&self) -> &RedisSettings {
        &self.redis
    }

    pub(crate) fn progression(&self) -> &ProgressionSettings {
        &self.progression
    }

    #[cfg(test)]
    pub(crate) fn progression_mut(&mut self) -> &mut ProgressionSettings {
        &mut self.progression
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.progression.sweep_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "PROGRESSION_SWEEP_INTERVAL_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "POSTGRES_MAX_CONNECTIONS",
                value: "0".to_string(),
            });
        }

        if let Some(path) = &self.progression.catalog_path {
            if self.progression.store == StoreBackend::Memory && !path.is_file() {
                return Err(ConfigError::InvalidValue {
                    field: "PROGRESSION_CATALOG_PATH",
                    value: path.display().to_string(),
                });
            }
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.progression.store == StoreBackend::Memory {
            return Err(ConfigError::InvalidValue {
                field: "PROGRESSION_STORE",
                value: self.progression.store.as_str().to_string(),
            });
        }

        if self.database.database_url.is_none() && self.database.postgres_password.is_empty() {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::core::config::{PassRule, Settings, StoreBackend};
    use crate::test_support;

    #[tokio::test]
    async fn defaults_select_postgres_and_terminal_rule() {
        let _guard = test_support::env_lock().await;
        test_support::clear_progression_env();
        std::env::remove_var("PROGRESSION_STORE");

        let settings = Settings::load().expect("settings");
        assert_eq!(settings.progression().store, StoreBackend::Postgres);
        assert_eq!(settings.progression().pass_rule, PassRule::TerminalPeriod);
        assert!(settings.progression().recovery_enabled);
        assert!(settings.progression().auto_finalize);
        assert_eq!(settings.api().api_v1_str, "/api/v1");
    }

    #[tokio::test]
    async fn strict_config_rejects_memory_store() {
        let _guard = test_support::env_lock().await;
        test_support::clear_progression_env();
        std::env::set_var("PROGRESSION_STORE", "memory");
        std::env::set_var("PROGRESSION_STRICT_CONFIG", "1");

        let result = Settings::load();
        std::env::remove_var("PROGRESSION_STRICT_CONFIG");
        std::env::remove_var("PROGRESSION_STORE");

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn zero_sweep_interval_is_rejected() {
        let _guard = test_support::env_lock().await;
        test_support::clear_progression_env();
        std::env::set_var("PROGRESSION_SWEEP_INTERVAL_SECONDS", "0");

        let result = Settings::load();
        std::env::remove_var("PROGRESSION_SWEEP_INTERVAL_SECONDS");

        assert!(result.is_err());
    }
}
