use config::{Config, ConfigError, Environment, File};
use infrastructure::{HttpServerConfig, MonitoringConfig, MqttConfig};
use serde::Deserialize;

use crate::homegraph::RetryConfig;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub mqtt: MqttConfig,
    pub http_server: HttpServerConfig,
    pub monitoring: MonitoringConfig,
    pub google_home: GoogleHomeSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Keys contain underscores, so nesting in variable names uses a double one,
        // e.g. GBRIDGE_GOOGLE_HOME__ACCESS_TOKEN
        let builder = Config::builder()
            .add_source(File::with_name("config.toml"))
            .add_source(Environment::with_prefix("GBRIDGE").separator("__").list_separator(","));

        let s = builder.build()?;
        s.try_deserialize()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GoogleHomeSettings {
    pub agent_user_id: String,
    pub device_config_file: String,
    #[serde(default = "default_topic_root")]
    pub topic_root: String,
    #[serde(default = "default_homegraph_url")]
    pub homegraph_url: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_topic_root() -> String {
    "google".to_string()
}

fn default_homegraph_url() -> String {
    "https://homegraph.googleapis.com".to_string()
}

impl GoogleHomeSettings {
    /// Any message on this topic triggers a device sync.
    pub fn control_topic(&self) -> String {
        format!("{}/REQUEST_SYNC", self.topic_root.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use config::FileFormat;

    use super::*;

    fn parse(toml: &str) -> Settings {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    const MINIMAL: &str = r#"
        [mqtt]
        host = "localhost"
        port = 1883
        client_id = "gbridge"

        [http_server]
        port = 8080

        [monitoring]
        service_name = "gbridge"
        logs = { default_level = "info" }
        traces = { default_level = "info" }

        [google_home]
        agent_user_id = "user-1"
        device_config_file = "devices.json"
    "#;

    #[test]
    fn test_google_home_defaults() {
        let settings = parse(MINIMAL);

        assert_eq!(settings.google_home.control_topic(), "google/REQUEST_SYNC");
        assert_eq!(settings.google_home.homegraph_url, "https://homegraph.googleapis.com");
        assert_eq!(settings.google_home.access_token, None);
        assert_eq!(settings.google_home.retry, RetryConfig::default());
        assert_eq!(settings.http_server.host, "0.0.0.0");
    }

    #[test]
    fn test_control_topic_below_custom_root() {
        let toml = format!("{}\ntopic_root = \"home/assistant/\"\nretry = {{ max_attempts = 5 }}\n", MINIMAL);

        let settings = parse(&toml);

        assert_eq!(settings.google_home.control_topic(), "home/assistant/REQUEST_SYNC");
        assert_eq!(settings.google_home.retry.max_attempts, 5);
        assert_eq!(settings.google_home.retry.base_delay_ms, RetryConfig::default().base_delay_ms);
    }
}
