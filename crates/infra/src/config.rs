use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_env: String,
    pub port: u16,
    pub log_level: String,
    pub subdomain: String,
    pub data_backend: String,
    pub event_backend: String,
    pub redis_url: String,
    pub broker_enabled: bool,
    pub broker_base_url: String,
    pub broker_platform_token: String,
    pub rpc_timeout_advisory_ms: u64,
    pub rpc_timeout_mandatory_ms: u64,
    pub rpc_retry_max_attempts: u32,
    pub rpc_backoff_base_ms: u64,
    pub rpc_backoff_max_ms: u64,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let cfg = config::Config::builder()
            .set_default("app_env", "development")?
            .set_default("port", 4100)?
            .set_default("log_level", "info")?
            .set_default("subdomain", "os")?
            .set_default("data_backend", "memory")?
            .set_default("event_backend", "memory")?
            .set_default("redis_url", "redis://127.0.0.1:6379")?
            .set_default("broker_enabled", false)?
            .set_default("broker_base_url", "http://127.0.0.1:4000/rpc")?
            .set_default("broker_platform_token", "")?
            .set_default("rpc_timeout_advisory_ms", 5_000)?
            .set_default("rpc_timeout_mandatory_ms", 10_000)?
            .set_default("rpc_retry_max_attempts", 3)?
            .set_default("rpc_backoff_base_ms", 200)?
            .set_default("rpc_backoff_max_ms", 2_000)?
            .add_source(config::Environment::default().separator("__"))
            .build()?;
        cfg.try_deserialize()
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }
}
