//! Provider credentials read from the environment.
//!
//! Settings are read once when the channel registry is built. Tests use
//! [`ProviderSettings::from_lookup`] with a map instead of mutating the
//! process environment.

use std::str::FromStr;

use tracing::warn;

use crate::channels::SyslogSeverity;

/// Default SMTP submission port.
pub const DEFAULT_SMTP_PORT: u16 = 587;

/// Default syslog tag.
pub const DEFAULT_SYSLOG_TAG: &str = "wx-alarms";

/// SMTP relay settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    /// Relay host.
    pub host: String,
    /// Relay port; 465 uses implicit TLS.
    pub port: u16,
    /// Login user.
    pub username: Option<String>,
    /// Login password.
    pub password: Option<String>,
    /// Envelope sender.
    pub from_address: Option<String>,
    /// Display name for the sender.
    pub from_name: Option<String>,
    /// Upgrade with STARTTLS on non-465 ports.
    pub use_tls: bool,
}

/// Microsoft Graph client-credentials settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphSettings {
    /// Application (client) id.
    pub client_id: String,
    /// Client secret.
    pub client_secret: String,
    /// Directory (tenant) id.
    pub tenant_id: String,
    /// Mailbox used as sender.
    pub from_address: Option<String>,
}

/// Email provider settings; Graph is preferred when present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailSettings {
    /// SMTP relay, if `SMTP_HOST` is set.
    pub smtp: Option<SmtpSettings>,
    /// Graph API, if all three `MS365_*` credentials are set.
    pub graph: Option<GraphSettings>,
}

/// Twilio REST settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwilioSettings {
    /// Account SID.
    pub account_sid: String,
    /// Auth token.
    pub auth_token: String,
    /// Sending number.
    pub from_number: String,
}

/// Generic HTTP SMS gateway settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySettings {
    /// Endpoint receiving `{"to", "message"}` JSON.
    pub url: String,
    /// Bearer token.
    pub api_key: Option<String>,
}

/// SMS provider settings; Twilio is preferred when present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SmsSettings {
    /// Twilio, if all three `TWILIO_*` values are set.
    pub twilio: Option<TwilioSettings>,
    /// Gateway, if `SMS_GATEWAY_URL` is set.
    pub gateway: Option<GatewaySettings>,
}

/// Syslog target settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyslogSettings {
    /// `udp` or `tcp`; only used with an address.
    pub network: Option<String>,
    /// Remote `host:port`; the local socket is used when absent.
    pub address: Option<String>,
    /// Severity attached to alarm messages.
    pub severity: SyslogSeverity,
    /// Program tag.
    pub tag: String,
}

impl Default for SyslogSettings {
    fn default() -> Self {
        Self {
            network: None,
            address: None,
            severity: SyslogSeverity::Warning,
            tag: DEFAULT_SYSLOG_TAG.to_string(),
        }
    }
}

/// All provider settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderSettings {
    /// Email providers.
    pub email: EmailSettings,
    /// SMS providers.
    pub sms: SmsSettings,
    /// Syslog target.
    pub syslog: SyslogSettings,
}

impl ProviderSettings {
    /// Reads settings from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`; blank values count as unset.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let smtp = get("SMTP_HOST").map(|host| SmtpSettings {
            host,
            port: parse_or("SMTP_PORT", get("SMTP_PORT"), DEFAULT_SMTP_PORT),
            username: get("SMTP_USERNAME"),
            password: get("SMTP_PASSWORD"),
            from_address: get("SMTP_FROM_ADDRESS"),
            from_name: get("SMTP_FROM_NAME"),
            use_tls: get("SMTP_USE_TLS").is_none_or(|v| parse_bool(&v)),
        });

        let graph = match (
            get("MS365_CLIENT_ID"),
            get("MS365_CLIENT_SECRET"),
            get("MS365_TENANT_ID"),
        ) {
            (Some(client_id), Some(client_secret), Some(tenant_id)) => Some(GraphSettings {
                client_id,
                client_secret,
                tenant_id,
                from_address: get("MS365_FROM_ADDRESS"),
            }),
            _ => None,
        };

        let twilio = match (
            get("TWILIO_ACCOUNT_SID"),
            get("TWILIO_AUTH_TOKEN"),
            get("TWILIO_FROM_NUMBER"),
        ) {
            (Some(account_sid), Some(auth_token), Some(from_number)) => Some(TwilioSettings {
                account_sid,
                auth_token,
                from_number,
            }),
            _ => None,
        };

        let gateway = get("SMS_GATEWAY_URL").map(|url| GatewaySettings {
            url,
            api_key: get("SMS_GATEWAY_API_KEY"),
        });

        let syslog = SyslogSettings {
            network: get("SYSLOG_NETWORK").map(|n| n.to_ascii_lowercase()),
            address: get("SYSLOG_ADDRESS"),
            severity: parse_or("SYSLOG_PRIORITY", get("SYSLOG_PRIORITY"), SyslogSeverity::Warning),
            tag: get("SYSLOG_TAG").unwrap_or_else(|| DEFAULT_SYSLOG_TAG.to_string()),
        };

        Self {
            email: EmailSettings { smtp, graph },
            sms: SmsSettings { twilio, gateway },
            syslog,
        }
    }
}

fn parse_or<T: FromStr + Copy>(key: &str, value: Option<String>, default: T) -> T {
    let Some(value) = value else {
        return default;
    };
    value.parse().unwrap_or_else(|_| {
        warn!(setting = key, value = %value, "ignoring unparseable setting");
        default
    })
}

fn parse_bool(value: &str) -> bool {
    !matches!(
        value.to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> ProviderSettings {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ProviderSettings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn empty_environment() {
        let s = settings(&[]);
        assert_eq!(s, ProviderSettings::default());
        assert_eq!(s.syslog.tag, DEFAULT_SYSLOG_TAG);
        assert_eq!(s.syslog.severity, SyslogSeverity::Warning);
    }

    #[test]
    fn smtp_defaults() {
        let s = settings(&[("SMTP_HOST", "mail.example.com")]);
        let smtp = s.email.smtp.unwrap();
        assert_eq!(smtp.port, DEFAULT_SMTP_PORT);
        assert!(smtp.use_tls);
        assert!(smtp.username.is_none());
    }

    #[test]
    fn smtp_overrides() {
        let s = settings(&[
            ("SMTP_HOST", "mail.example.com"),
            ("SMTP_PORT", "465"),
            ("SMTP_USE_TLS", "false"),
            ("SMTP_FROM_ADDRESS", "wx@example.com"),
        ]);
        let smtp = s.email.smtp.unwrap();
        assert_eq!(smtp.port, 465);
        assert!(!smtp.use_tls);
        assert_eq!(smtp.from_address.as_deref(), Some("wx@example.com"));
    }

    #[test]
    fn bad_port_falls_back() {
        let s = settings(&[("SMTP_HOST", "mail.example.com"), ("SMTP_PORT", "lots")]);
        assert_eq!(s.email.smtp.unwrap().port, DEFAULT_SMTP_PORT);
    }

    #[test]
    fn graph_needs_all_credentials() {
        let partial = settings(&[("MS365_CLIENT_ID", "id"), ("MS365_TENANT_ID", "t")]);
        assert!(partial.email.graph.is_none());

        let full = settings(&[
            ("MS365_CLIENT_ID", "id"),
            ("MS365_CLIENT_SECRET", "secret"),
            ("MS365_TENANT_ID", "t"),
        ]);
        assert!(full.email.graph.is_some());
    }

    #[test]
    fn blank_values_are_unset() {
        let s = settings(&[("SMS_GATEWAY_URL", "   "), ("SYSLOG_TAG", "")]);
        assert!(s.sms.gateway.is_none());
        assert_eq!(s.syslog.tag, DEFAULT_SYSLOG_TAG);
    }

    #[test]
    fn syslog_settings() {
        let s = settings(&[
            ("SYSLOG_NETWORK", "UDP"),
            ("SYSLOG_ADDRESS", "logs.example.com:514"),
            ("SYSLOG_PRIORITY", "err"),
            ("SYSLOG_TAG", "backyard"),
        ]);
        assert_eq!(s.syslog.network.as_deref(), Some("udp"));
        assert_eq!(s.syslog.severity, SyslogSeverity::Error);
        assert_eq!(s.syslog.tag, "backyard");
    }
}
