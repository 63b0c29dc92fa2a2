//! Session configuration (layered: code > env > config file).

pub mod locale;

use std::path::Path;
use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::error::{CblError, Result};

pub use locale::{accept_language, DEFAULT_ACCEPT_LANGUAGE};

pub const DEFAULT_CODE_PAIR_URL: &str = "https://api.amazon.com/auth/O2/create/codepair";
pub const DEFAULT_TOKEN_URL: &str = "https://api.amazon.com/auth/O2/token";
pub const DEFAULT_USER_PROFILE_URL: &str = "https://api.amazon.com/user/profile";

/// Scope requested for every code pair.
const SCOPE_ALEXA_ALL: &str = "alexa:all";

/// Immutable configuration of one code-based-linking provider.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use cbl_auth::config::CblConfig;
///
/// let config = CblConfig::builder()
///     .client_id("amzn1.application-oa2-client.abc")
///     .product_id("my_device")
///     .device_serial_number("1234")
///     .access_token_refresh_head_start(Duration::from_secs(300))
///     .build();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
pub struct CblConfig {
    #[builder(into)]
    pub client_id: String,
    #[builder(into)]
    pub product_id: String,
    #[builder(into)]
    pub device_serial_number: String,

    #[builder(into, default = DEFAULT_CODE_PAIR_URL.to_string())]
    #[serde(default = "default_code_pair_url")]
    pub code_pair_url: String,

    /// Used for both the device-code token request and refresh requests.
    #[builder(into, default = DEFAULT_TOKEN_URL.to_string())]
    #[serde(default = "default_token_url")]
    pub token_url: String,

    #[builder(into, default = DEFAULT_USER_PROFILE_URL.to_string())]
    #[serde(default = "default_user_profile_url")]
    pub user_profile_url: String,

    /// Bound on every individual HTTP request.
    #[builder(default = Duration::from_secs(60))]
    #[serde(default = "default_request_timeout", with = "duration_secs")]
    pub request_timeout: Duration,

    /// How long to keep retrying the code-pair request before giving up.
    #[builder(default = Duration::from_secs(50))]
    #[serde(default = "default_code_pair_request_timeout", with = "duration_secs")]
    pub code_pair_request_timeout: Duration,

    /// How long before expiry the access token is refreshed.
    #[builder(default = Duration::from_secs(600))]
    #[serde(default = "default_refresh_head_start", with = "duration_secs")]
    pub access_token_refresh_head_start: Duration,

    #[builder(into, default = DEFAULT_ACCEPT_LANGUAGE.to_string())]
    #[serde(default = "default_locale")]
    pub locale: String,

    /// Fetch the user's name and email after the first token grant.
    #[builder(default = false)]
    #[serde(default)]
    pub enable_user_profile: bool,
}

fn default_code_pair_url() -> String {
    DEFAULT_CODE_PAIR_URL.to_string()
}

fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.to_string()
}

fn default_user_profile_url() -> String {
    DEFAULT_USER_PROFILE_URL.to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_code_pair_request_timeout() -> Duration {
    Duration::from_secs(50)
}

fn default_refresh_head_start() -> Duration {
    Duration::from_secs(600)
}

fn default_locale() -> String {
    DEFAULT_ACCEPT_LANGUAGE.to_string()
}

impl CblConfig {
    /// Parse a TOML document. Durations are given in seconds.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Build a config from `CBL_*` environment variables (a `.env` file is
    /// loaded first if present).
    ///
    /// `CBL_CLIENT_ID`, `CBL_PRODUCT_ID` and `CBL_DEVICE_SERIAL_NUMBER` are
    /// required; everything else falls back to defaults.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let required = |name: &str| {
            std::env::var(name)
                .map_err(|_| CblError::Configuration(format!("Environment variable {name} not set")))
        };
        let seconds = |name: &str| -> Result<Option<Duration>> {
            match std::env::var(name) {
                Ok(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(|secs| Some(Duration::from_secs(secs)))
                    .map_err(|_| CblError::Configuration(format!("{name} must be whole seconds"))),
                Err(_) => Ok(None),
            }
        };

        let mut config = Self::builder()
            .client_id(required("CBL_CLIENT_ID")?)
            .product_id(required("CBL_PRODUCT_ID")?)
            .device_serial_number(required("CBL_DEVICE_SERIAL_NUMBER")?)
            .build();

        if let Ok(url) = std::env::var("CBL_CODE_PAIR_URL") {
            config.code_pair_url = url;
        }
        if let Ok(url) = std::env::var("CBL_TOKEN_URL") {
            config.token_url = url;
        }
        if let Ok(url) = std::env::var("CBL_USER_PROFILE_URL") {
            config.user_profile_url = url;
        }
        if let Ok(locale) = std::env::var("CBL_LOCALE") {
            config.locale = locale;
        }
        if let Some(timeout) = seconds("CBL_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = timeout;
        }
        if let Some(timeout) = seconds("CBL_CODE_PAIR_REQUEST_TIMEOUT_SECS")? {
            config.code_pair_request_timeout = timeout;
        }
        if let Some(head_start) = seconds("CBL_REFRESH_HEAD_START_SECS")? {
            config.access_token_refresh_head_start = head_start;
        }
        if let Ok(flag) = std::env::var("CBL_ENABLE_USER_PROFILE") {
            config.enable_user_profile = matches!(flag.trim(), "1" | "true" | "yes");
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configs that cannot possibly authorize.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("client_id", &self.client_id),
            ("product_id", &self.product_id),
            ("device_serial_number", &self.device_serial_number),
            ("code_pair_url", &self.code_pair_url),
            ("token_url", &self.token_url),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(CblError::Configuration(format!("{name} must not be empty")));
            }
        }
        if self.enable_user_profile && self.user_profile_url.trim().is_empty() {
            return Err(CblError::Configuration(
                "user_profile_url must not be empty when the user profile is enabled".into(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(CblError::Configuration("request_timeout must be positive".into()));
        }
        Ok(())
    }

    /// The `scope` form value for code-pair requests.
    pub fn scope(&self) -> String {
        if self.enable_user_profile {
            format!("{SCOPE_ALEXA_ALL} profile")
        } else {
            SCOPE_ALEXA_ALL.to_string()
        }
    }

    /// The `scope_data` form value for code-pair requests.
    pub fn scope_data(&self) -> String {
        serde_json::json!({
            "alexa:all": {
                "productID": self.product_id,
                "productInstanceAttributes": {
                    "deviceSerialNumber": self.device_serial_number,
                },
            },
        })
        .to_string()
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config() -> CblConfig {
        CblConfig::builder()
            .client_id("client")
            .product_id("product")
            .device_serial_number("serial-1")
            .build()
    }

    #[test]
    fn builder_fills_defaults() {
        let config = config();
        assert_eq!(config.code_pair_url, DEFAULT_CODE_PAIR_URL);
        assert_eq!(config.token_url, DEFAULT_TOKEN_URL);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.access_token_refresh_head_start, Duration::from_secs(600));
        assert_eq!(config.locale, "en-US");
        assert!(!config.enable_user_profile);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn scope_includes_profile_only_when_enabled() {
        let mut config = config();
        assert_eq!(config.scope(), "alexa:all");
        config.enable_user_profile = true;
        assert_eq!(config.scope(), "alexa:all profile");
    }

    #[test]
    fn scope_data_carries_product_and_serial() {
        let data: serde_json::Value = serde_json::from_str(&config().scope_data()).unwrap();
        assert_eq!(data["alexa:all"]["productID"], "product");
        assert_eq!(
            data["alexa:all"]["productInstanceAttributes"]["deviceSerialNumber"],
            "serial-1"
        );
    }

    #[test]
    fn validate_rejects_empty_client_id() {
        let mut config = config();
        config.client_id = "  ".into();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, CblError::Configuration(_)));
    }

    #[test]
    fn toml_durations_are_seconds() {
        let raw = r#"
            client_id = "client"
            product_id = "product"
            device_serial_number = "serial"
            request_timeout = 15
            access_token_refresh_head_start = 120
            enable_user_profile = true
        "#;
        let config = CblConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(config.access_token_refresh_head_start, Duration::from_secs(120));
        assert_eq!(config.code_pair_request_timeout, Duration::from_secs(50));
        assert!(config.enable_user_profile);
    }

    #[test]
    fn load_from_path_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "client_id = \"c\"\nproduct_id = \"p\"\ndevice_serial_number = \"s\"\nlocale = \"de-DE\""
        )
        .unwrap();
        let config = CblConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.locale, "de-DE");
    }

    #[test]
    fn toml_missing_required_field_fails() {
        let err = CblConfig::from_toml_str("client_id = \"c\"").unwrap_err();
        assert!(matches!(err, CblError::Toml(_)));
    }
}
