use anyhow::Result;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub ws_bind_addr: String,
    pub kafka_bootstrap_servers: String,
    pub kafka_topic: String,
    pub kafka_group_id: String,
    pub kafka_auto_offset_reset: String,
    pub kafka_sasl_mechanism: String,
    pub kafka_username: String,
    pub kafka_password: String,
    pub kafka_security_protocol: String,
    pub kafka_max_retries: u32,
    pub kafka_circuit_breaker_cooldown: u64,
    pub database_url: String,
    pub routes_api_url: String,
    pub routes_api_key: String,
    pub log_level: String,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();

        let ws_bind_addr = env::var("WS_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8001".to_string());

        let kafka_bootstrap_servers =
            env::var("KAFKA_BOOTSTRAP_SERVERS").unwrap_or_else(|_| "localhost:9092".to_string());
        let kafka_topic =
            env::var("KAFKA_TOPIC").unwrap_or_else(|_| "trip_location_updates".to_string());
        let kafka_group_id =
            env::var("KAFKA_GROUP_ID").unwrap_or_else(|_| "trip_location_group".to_string());
        // Earliest so a brand-new consumer group replays the retained log.
        let kafka_auto_offset_reset =
            env::var("KAFKA_AUTO_OFFSET_RESET").unwrap_or_else(|_| "earliest".to_string());
        let kafka_sasl_mechanism =
            env::var("KAFKA_SASL_MECHANISM").unwrap_or_else(|_| "SCRAM-SHA-256".to_string());
        let kafka_username = env::var("KAFKA_USERNAME").unwrap_or_default();
        let kafka_password = env::var("KAFKA_PASSWORD").unwrap_or_default();
        let kafka_security_protocol =
            env::var("KAFKA_SECURITY_PROTOCOL").unwrap_or_else(|_| "SASL_PLAINTEXT".to_string());
        let kafka_max_retries = env::var("KAFKA_MAX_RETRIES")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .unwrap_or(5);
        let kafka_circuit_breaker_cooldown = env::var("KAFKA_CIRCUIT_BREAKER_COOLDOWN")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .unwrap_or(300);

        let db_host = env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string());
        let db_port = env::var("DB_PORT").unwrap_or_else(|_| "5432".to_string());
        let db_name = env::var("DB_DATABASE").unwrap_or_else(|_| "coride".to_string());
        let db_user = env::var("DB_USER").unwrap_or_else(|_| "coride".to_string());
        let db_pwd = env::var("DB_PWD").unwrap_or_else(|_| "coride".to_string());

        let database_url = format!(
            "postgres://{}:{}@{}:{}/{}",
            db_user, db_pwd, db_host, db_port, db_name
        );

        let routes_api_url = env::var("ROUTES_API_URL")
            .unwrap_or_else(|_| "https://routes.googleapis.com/directions/v2".to_string());
        let routes_api_key = env::var("ROUTES_API_KEY").unwrap_or_default();

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            ws_bind_addr,
            kafka_bootstrap_servers,
            kafka_topic,
            kafka_group_id,
            kafka_auto_offset_reset,
            kafka_sasl_mechanism,
            kafka_username,
            kafka_password,
            kafka_security_protocol,
            kafka_max_retries,
            kafka_circuit_breaker_cooldown,
            database_url,
            routes_api_url,
            routes_api_key,
            log_level,
        })
    }
}
