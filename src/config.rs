use std::env;
use secrecy::SecretString;

#[derive(Clone, Debug)]
pub struct Config {
    pub mongo_conn_string: String,
    pub mongo_db_name: String,
    pub web_server_host: String,
    pub web_server_port: u16,

    // Reading evaluation service (Gateway A, signed WebSocket)
    pub ise_host: String,
    pub ise_path: String,
    pub ise_app_id: String,
    pub ise_api_key: String,
    pub ise_api_secret: SecretString,
    pub ise_max_concurrent: usize,
    pub ise_result_timeout_secs: u64,

    // Dialogue evaluation service (Gateway B, streamed chat completions)
    pub omni_base_url: String,
    pub omni_api_key: SecretString,
    pub omni_model: String,
    pub omni_requests_per_minute: u32,

    pub queue_poll_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            mongo_conn_string: env::var("MONGO_CONN_STRING")
                .unwrap_or_else(|_| "mongodb://localhost:27017".to_string()),
            mongo_db_name: env::var("MONGO_DB_NAME").unwrap_or_else(|_| "viva-local".to_string()),
            web_server_host: env::var("WEB_SERVER_HOST")
                .unwrap_or_else(|_| "localhost".to_string()),
            web_server_port: env::var("WEB_SERVER_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            ise_host: env::var("ISE_HOST").unwrap_or_else(|_| "ise-api.xfyun.cn".to_string()),
            ise_path: env::var("ISE_PATH").unwrap_or_else(|_| "/v2/open-ise".to_string()),
            ise_app_id: env::var("ISE_APP_ID").unwrap_or_else(|_| "ise_app_id".to_string()),
            ise_api_key: env::var("ISE_API_KEY").unwrap_or_else(|_| "ise_api_key".to_string()),
            ise_api_secret: SecretString::from(
                env::var("ISE_API_SECRET").unwrap_or_else(|_| "ise_api_secret".to_string()),
            ),
            ise_max_concurrent: env::var("ISE_MAX_CONCURRENT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(50),
            ise_result_timeout_secs: env::var("ISE_RESULT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            omni_base_url: env::var("OMNI_BASE_URL").unwrap_or_else(|_| {
                "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string()
            }),
            omni_api_key: SecretString::from(
                env::var("OMNI_API_KEY").unwrap_or_else(|_| "omni_api_key".to_string()),
            ),
            omni_model: env::var("OMNI_MODEL").unwrap_or_else(|_| "qwen-omni-turbo".to_string()),
            omni_requests_per_minute: env::var("OMNI_REQUESTS_PER_MINUTE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            queue_poll_interval_secs: env::var("QUEUE_POLL_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
        }
    }

    /// Validate that production-critical configuration is set
    /// Panics if required credentials are using default values
    pub fn validate_for_production(&self) {
        use secrecy::ExposeSecret;

        if self.ise_app_id == "ise_app_id" || self.ise_api_key == "ise_api_key" {
            panic!(
                "FATAL: ISE credentials are using default values! Set ISE_APP_ID and ISE_API_KEY environment variables."
            );
        }

        if self.ise_api_secret.expose_secret() == "ise_api_secret" {
            panic!("FATAL: ISE_API_SECRET is using default value! Set ISE_API_SECRET environment variable.");
        }

        if self.omni_api_key.expose_secret() == "omni_api_key" {
            panic!("FATAL: OMNI_API_KEY is using default value! Set OMNI_API_KEY environment variable.");
        }
    }

    #[cfg(test)]
    pub fn test_config() -> Self {
        Self {
            mongo_conn_string: "mongodb://localhost:27017".to_string(),
            mongo_db_name: "viva-test".to_string(),
            web_server_host: "127.0.0.1".to_string(),
            web_server_port: 8080,
            ise_host: "ise-api.xfyun.cn".to_string(),
            ise_path: "/v2/open-ise".to_string(),
            ise_app_id: "test_app_id".to_string(),
            ise_api_key: "test_api_key".to_string(),
            ise_api_secret: SecretString::from("test_api_secret".to_string()),
            ise_max_concurrent: 2,
            ise_result_timeout_secs: 5,
            omni_base_url: "http://localhost:9999/v1".to_string(),
            omni_api_key: SecretString::from("test_omni_key".to_string()),
            omni_model: "test-omni".to_string(),
            omni_requests_per_minute: 60,
            queue_poll_interval_secs: 1,
        }
    }
}
