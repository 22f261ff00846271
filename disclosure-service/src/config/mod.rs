use rust_decimal::Decimal;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

use crate::services::fees::FeeSchedule;

#[derive(Debug, Clone)]
pub struct DisclosureConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub verification: VerificationConfig,
    pub fees: FeeSchedule,
    pub notification: NotificationConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// One-time code policy.
#[derive(Debug, Clone, Deserialize)]
pub struct VerificationConfig {
    pub expiry_seconds: i64,
    pub attempt_limit: i32,
    pub code_length: u32,
    /// Key for the code hash. Codes are short, so an unkeyed hash would be trivially reversible.
    pub hash_secret: String,
    /// Return plaintext codes in API responses. Development only.
    pub expose_codes: bool,
    /// Period of the stale-challenge sweep; zero disables it.
    pub sweep_interval_seconds: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            expiry_seconds: 600,
            attempt_limit: 5,
            code_length: 6,
            hash_secret: "dev-only-otp-secret".to_string(),
            expose_codes: false,
            sweep_interval_seconds: 0,
        }
    }
}

pub const MIN_CODE_LENGTH: u32 = 4;
pub const MAX_CODE_LENGTH: u32 = 9;

#[derive(Debug, Clone, Default)]
pub struct NotificationConfig {
    pub smtp: Option<SmtpConfig>,
    pub sms: Option<SmsGatewayConfig>,
    /// Copied on every activation confirmation when set.
    pub compliance_cc: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
}

#[derive(Debug, Clone)]
pub struct SmsGatewayConfig {
    pub url: String,
    pub api_key: String,
    pub sender_id: String,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub admin_api_key: String,
    pub allowed_origins: Vec<String>,
    pub gateway: GatewayConfig,
}

/// Credentials of the gateway that forwards caller identities.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub client_id: String,
    pub signing_secret: String,
    /// Also reject anonymous requests that arrive unsigned.
    pub require_signed_requests: bool,
    pub max_clock_skew_seconds: i64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            client_id: "gateway".to_string(),
            signing_secret: "dev-only-gateway-secret".to_string(),
            require_signed_requests: false,
            max_clock_skew_seconds: 60,
        }
    }
}

impl DisclosureConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let environment: Environment = get_env("ENVIRONMENT", Some("dev"))?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;
        let defaults = VerificationConfig::default();
        let fee_defaults = FeeSchedule::default();
        let gateway_defaults = GatewayConfig::default();

        let config = DisclosureConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("disclosure-service"))?,
            log_level: get_env("LOG_LEVEL", Some("info"))?,
            otlp_endpoint: get_optional_env("OTLP_ENDPOINT"),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", 1)?,
            },
            verification: VerificationConfig {
                expiry_seconds: parse_env("OTP_EXPIRY_SECONDS", defaults.expiry_seconds)?,
                attempt_limit: parse_env("OTP_ATTEMPT_LIMIT", defaults.attempt_limit)?,
                code_length: parse_env("OTP_CODE_LENGTH", defaults.code_length)?,
                hash_secret: if is_prod {
                    get_env("OTP_HASH_SECRET", None)?
                } else {
                    get_env("OTP_HASH_SECRET", Some(&defaults.hash_secret))?
                },
                expose_codes: parse_env("OTP_EXPOSE_CODES", false)?,
                sweep_interval_seconds: parse_env("OTP_SWEEP_INTERVAL_SECONDS", 0)?,
            },
            fees: FeeSchedule {
                basic_rate: parse_env("FEE_BASIC_RATE", fee_defaults.basic_rate)?,
                basic_displayed_percentage: parse_env(
                    "FEE_BASIC_DISPLAYED_PERCENTAGE",
                    fee_defaults.basic_displayed_percentage,
                )?,
                plus_rate: parse_env("FEE_PLUS_RATE", fee_defaults.plus_rate)?,
                plus_displayed_percentage: parse_env(
                    "FEE_PLUS_DISPLAYED_PERCENTAGE",
                    fee_defaults.plus_displayed_percentage,
                )?,
                plus_partnership_percentage: parse_env(
                    "FEE_PLUS_PARTNERSHIP_PERCENTAGE",
                    fee_defaults.plus_partnership_percentage,
                )?,
                marketing_commission_rate: parse_env(
                    "FEE_MARKETING_COMMISSION_RATE",
                    fee_defaults.marketing_commission_rate,
                )?,
                refund_gateway_rate: parse_env(
                    "FEE_REFUND_GATEWAY_RATE",
                    fee_defaults.refund_gateway_rate,
                )?,
            },
            notification: NotificationConfig {
                smtp: match get_optional_env("SMTP_HOST") {
                    Some(host) => Some(SmtpConfig {
                        host,
                        port: parse_env("SMTP_PORT", 587)?,
                        user: get_env("SMTP_USER", None)?,
                        password: get_env("SMTP_PASSWORD", None)?,
                        from_email: get_env("SMTP_FROM", None)?,
                        from_name: get_env("SMTP_FROM_NAME", Some("Project Disclosure"))?,
                    }),
                    None => None,
                },
                sms: match get_optional_env("SMS_GATEWAY_URL") {
                    Some(url) => Some(SmsGatewayConfig {
                        url,
                        api_key: get_env("SMS_GATEWAY_API_KEY", None)?,
                        sender_id: get_env("SMS_SENDER_ID", Some("VERIFY"))?,
                    }),
                    None => None,
                },
                compliance_cc: get_optional_env("COMPLIANCE_CC_EMAIL"),
            },
            security: SecurityConfig {
                admin_api_key: get_env("ADMIN_API_KEY", None)?,
                allowed_origins: get_env("ALLOWED_ORIGINS", Some("http://localhost:3000"))?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                gateway: GatewayConfig {
                    client_id: get_env("GATEWAY_CLIENT_ID", Some(&gateway_defaults.client_id))?,
                    signing_secret: if is_prod {
                        get_env("GATEWAY_SIGNING_SECRET", None)?
                    } else {
                        get_env(
                            "GATEWAY_SIGNING_SECRET",
                            Some(&gateway_defaults.signing_secret),
                        )?
                    },
                    require_signed_requests: parse_env(
                        "GATEWAY_REQUIRE_SIGNED_REQUESTS",
                        gateway_defaults.require_signed_requests,
                    )?,
                    max_clock_skew_seconds: parse_env(
                        "GATEWAY_MAX_CLOCK_SKEW_SECONDS",
                        gateway_defaults.max_clock_skew_seconds,
                    )?,
                },
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let v = &self.verification;

        if v.expiry_seconds <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "OTP_EXPIRY_SECONDS must be positive"
            )));
        }

        if v.attempt_limit <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "OTP_ATTEMPT_LIMIT must be positive"
            )));
        }

        if !(MIN_CODE_LENGTH..=MAX_CODE_LENGTH).contains(&v.code_length) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "OTP_CODE_LENGTH must be between {} and {}",
                MIN_CODE_LENGTH,
                MAX_CODE_LENGTH
            )));
        }

        if v.hash_secret.is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "OTP_HASH_SECRET must not be empty"
            )));
        }

        self.fees
            .validate()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;

        if self.security.admin_api_key.len() < 16 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "ADMIN_API_KEY must be at least 16 characters"
            )));
        }

        let gateway = &self.security.gateway;
        if gateway.client_id.trim().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "GATEWAY_CLIENT_ID must not be empty"
            )));
        }

        if gateway.signing_secret.len() < 16 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "GATEWAY_SIGNING_SECRET must be at least 16 characters"
            )));
        }

        if gateway.max_clock_skew_seconds <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "GATEWAY_MAX_CLOCK_SKEW_SECONDS must be positive"
            )));
        }

        if self.environment == Environment::Prod {
            if v.expose_codes {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "OTP_EXPOSE_CODES cannot be enabled in production"
                )));
            }

            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }
        }

        Ok(())
    }

    /// Plaintext codes may only leave the service in development with the flag set.
    pub fn codes_exposed(&self) -> bool {
        self.environment == Environment::Dev && self.verification.expose_codes
    }
}

fn get_env(key: &str, default: Option<&str>) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => match default {
            Some(def) => Ok(def.to_string()),
            None => Err(AppError::ConfigError(anyhow::anyhow!(
                "{} is required but not set",
                key
            ))),
        },
    }
}

fn get_optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val.trim().parse().map_err(|e: T::Err| {
            AppError::ConfigError(anyhow::anyhow!("{} has an invalid value: {}", key, e))
        }),
        Err(_) => Ok(default),
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

/// Rates are fractions, so they must lie in `[0, 1]`.
pub(crate) fn check_rate(name: &str, rate: Decimal) -> Result<(), String> {
    if rate < Decimal::ZERO || rate > Decimal::ONE {
        return Err(format!("{} must be between 0 and 1, got {}", name, rate));
    }
    Ok(())
}
