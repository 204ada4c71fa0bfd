/// Environment-variable configuration. Every recognised key has a documented default so the service is
/// runnable out of the box against a local stack.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// `DATABASE_URL`: relational store connection string.
    pub database_url: String,

    /// `KV_URL` (or a sentinel set, not modelled separately here): key-value
    /// store endpoint.
    pub kv_url: String,

    /// `LOG_BROKERS`: comma-separated event log broker endpoints.
    pub log_brokers: String,
    /// `LOG_SASL_USER` / `LOG_SASL_PW` / `LOG_CA_CERT`: optional TLS/SASL.
    pub log_sasl_user: Option<String>,
    pub log_sasl_password: Option<String>,
    pub log_ca_cert: Option<String>,

    /// `BUSINESS_OPEN_HOUR` / `_MIN` / `CLOSE_HOUR` / `_MIN`, UTC.
    pub business_open_hour: u32,
    pub business_open_minute: u32,
    pub business_close_hour: u32,
    pub business_close_minute: u32,

    /// `PORT`: HTTP (dashboard egress) listen port.
    pub http_port: u16,
    /// `GRPC_PORT`: RPC (order intake) listen port.
    pub grpc_port: u16,

    /// Default per-slot monetary capacity (minor units) used when a slot has
    /// no explicit `SetMaxCapacity` on record (the admission script's
    /// `max_capacity_default` input). Not one of the externally documented
    /// keys; an internal default a real deployment would otherwise seed via
    /// the slot admin API.
    pub default_slot_capacity: i64,

    /// Consumer group name for the materialiser.
    pub consumer_group: String,
}

impl AppConfig {
    /// Reads and validates every recognised key. A key that is present but
    /// fails to parse is a configuration error, not a silent fallback to the
    /// default: this exits the process with code 1 before any subsystem
    /// starts, so a typo'd port or hour is caught at boot rather than
    /// surfacing as a confusing runtime failure later.
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://pizzeria_dev.db".to_string()),
            kv_url: std::env::var("KV_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            log_brokers: std::env::var("LOG_BROKERS")
                .unwrap_or_else(|_| "localhost:9092".to_string()),
            log_sasl_user: std::env::var("LOG_SASL_USER").ok(),
            log_sasl_password: std::env::var("LOG_SASL_PW").ok(),
            log_ca_cert: std::env::var("LOG_CA_CERT").ok(),

            business_open_hour: parse_env_or("BUSINESS_OPEN_HOUR", 9),
            business_open_minute: parse_env_or("BUSINESS_OPEN_MIN", 0),
            business_close_hour: parse_env_or("BUSINESS_CLOSE_HOUR", 23),
            business_close_minute: parse_env_or("BUSINESS_CLOSE_MIN", 45),

            http_port: parse_env_or("PORT", 8080),
            grpc_port: parse_env_or("GRPC_PORT", 50051),

            default_slot_capacity: parse_env_or("DEFAULT_SLOT_CAPACITY_MINOR_UNITS", 10_000),
            consumer_group: std::env::var("CONSUMER_GROUP")
                .unwrap_or_else(|_| "orders-core".to_string()),
        }
    }

    pub fn business_hours(&self) -> crate::domain::BusinessHours {
        crate::domain::BusinessHours {
            open_h: self.business_open_hour,
            open_m: self.business_open_minute,
            close_h: self.business_close_hour,
            close_m: self.business_close_minute,
        }
    }
}

/// Unset: use `default`. Set but unparsable: a configuration error, fatal
/// at boot (`std::process::exit(1)`, before any subsystem starts).
fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Err(_) => default,
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::error!(key, value = %raw, "unparsable configuration value");
            std::process::exit(1);
        }),
    }
}
