use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub remote: RemoteConfig,
    /// Path of the LED value: a database path for Firebase, a topic for MQTT.
    pub led_key: String,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Clone)]
pub enum RemoteConfig {
    Firebase(FirebaseConfig),
    Mqtt(MqttConfig),
}

#[derive(Debug, Clone)]
pub struct FirebaseConfig {
    pub database_url: String,
    pub auth: Option<String>,
    /// Silence on the event stream longer than this drops the connection.
    pub idle_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
}

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    /// Label shown in the header next to the title.
    pub project: String,
    pub state_dir: PathBuf,
    pub log_file: PathBuf,
}

impl RemoteConfig {
    /// Human-readable backend name, used in the startup log entry.
    pub fn backend_name(&self) -> &'static str {
        match self {
            RemoteConfig::Firebase(_) => "Firebase",
            RemoteConfig::Mqtt(_) => "MQTT",
        }
    }

    fn default_project(&self) -> String {
        match self {
            RemoteConfig::Firebase(fb) => fb
                .database_url
                .split("://")
                .last()
                .unwrap_or(&fb.database_url)
                .split(['.', '/'])
                .next()
                .unwrap_or_default()
                .to_string(),
            RemoteConfig::Mqtt(mqtt) => mqtt.broker_host.clone(),
        }
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn required(&self, key: &str) -> Result<String, String> {
        (self.lookup)(key).ok_or_else(|| format!("{key} environment variable is required"))
    }

    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.is_empty())
    }

    fn or_default<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        (self.lookup)(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let vars = Vars { lookup };

        let backend = vars.or_default("LED_BACKEND", "firebase".to_string());
        let remote = match backend.to_ascii_lowercase().as_str() {
            "firebase" => RemoteConfig::Firebase(FirebaseConfig {
                database_url: vars
                    .required("FIREBASE_DATABASE_URL")?
                    .trim_end_matches('/')
                    .to_string(),
                auth: vars.optional("FIREBASE_AUTH"),
                idle_timeout: Duration::from_secs(vars.or_default("FIREBASE_IDLE_TIMEOUT_SECS", 90)),
            }),
            "mqtt" => RemoteConfig::Mqtt(MqttConfig {
                broker_host: vars.required("MQTT_BROKER_HOST")?,
                broker_port: vars.or_default("MQTT_BROKER_PORT", 1883),
                username: vars.optional("MQTT_USERNAME"),
                password: vars.optional("MQTT_PASSWORD"),
                client_id: vars.or_default("MQTT_CLIENT_ID", "led-dashboard".to_string()),
            }),
            other => return Err(format!("Unknown LED_BACKEND '{other}' (expected firebase or mqtt)")),
        };

        let state_dir: PathBuf = vars
            .optional("DASHBOARD_STATE_DIR")
            .unwrap_or_else(|| ".led-dashboard".to_string())
            .into();
        let log_file = vars
            .optional("DASHBOARD_LOG_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| state_dir.join("dashboard.log"));
        let project = vars
            .optional("DASHBOARD_PROJECT")
            .unwrap_or_else(|| remote.default_project());

        let config = Self {
            remote,
            led_key: vars
                .or_default("LED_KEY", "ledtest".to_string())
                .trim_matches('/')
                .to_string(),
            dashboard: DashboardConfig {
                project,
                state_dir,
                log_file,
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.led_key.is_empty() {
            return Err("LED_KEY must not be empty".into());
        }
        match &self.remote {
            RemoteConfig::Firebase(fb) => {
                if !fb.database_url.starts_with("https://") && !fb.database_url.starts_with("http://") {
                    return Err("FIREBASE_DATABASE_URL must be an http(s) URL".into());
                }
                if fb.idle_timeout.is_zero() {
                    return Err("FIREBASE_IDLE_TIMEOUT_SECS must be > 0".into());
                }
            }
            RemoteConfig::Mqtt(mqtt) => {
                if mqtt.broker_host.is_empty() {
                    return Err("MQTT_BROKER_HOST must not be empty".into());
                }
                if self.led_key.contains(['+', '#']) {
                    return Err("LED_KEY must not contain MQTT wildcards".into());
                }
            }
        }
        Ok(())
    }
}
