//! Application configuration.
//!
//! The target site's contract (URLs, field names, marker prefixes, server
//! phrases) drifts in small ways between semesters, so all of it is
//! configuration data with defaults matching the current snapshot, never
//! hard-coded structure. Everything is overridable from one TOML file.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono_tz::Tz;
use serde::Deserialize;

use crate::duration::deserialize_duration;
use crate::http::HttpConfig;
use crate::schedule::SchedulePlan;

/// Login state machine parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    pub login_url: String,
    /// Captcha image endpoint. Empty disables the captcha step.
    pub captcha_url: String,
    pub username_field: String,
    pub secret_field: String,
    pub captcha_field: String,
    /// Expected length of the recognized captcha text.
    pub captcha_len: usize,
    /// Inner bound: captcha fetch+recognize attempts per login attempt.
    pub captcha_attempts: u32,
    #[serde(deserialize_with = "deserialize_duration")]
    pub captcha_backoff: Duration,
    /// Outer bound: login attempts for captcha-class failures.
    pub login_attempts: u32,
    #[serde(deserialize_with = "deserialize_duration")]
    pub retry_delay: Duration,
    /// Hidden-field names harvested from the login page.
    pub hidden_fields: Vec<String>,
    /// Hidden field carrying the hash salt; harvested but never submitted.
    pub salt_field: String,
    /// Hidden field carrying the server's error message on a failed login.
    pub error_field: String,
    /// Server message identifying a wrong captcha (the only retryable
    /// login rejection).
    pub wrong_captcha_message: String,
    /// Fixed pairs always injected into the login form.
    pub fixed_fields: Vec<(String, String)>,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            login_url: "https://authserver.example.edu/authserver/login".to_string(),
            captcha_url: "https://authserver.example.edu/authserver/captcha".to_string(),
            username_field: "username".to_string(),
            secret_field: "password".to_string(),
            captcha_field: "captchaResponse".to_string(),
            captcha_len: 4,
            captcha_attempts: 3,
            captcha_backoff: Duration::from_secs(1),
            login_attempts: 3,
            retry_delay: Duration::from_secs(2),
            hidden_fields: [
                "lt",
                "dllt",
                "execution",
                "rmShown",
                "pwdDefaultEncryptSalt",
                "campusNum",
                "errorMsg",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            salt_field: "pwdDefaultEncryptSalt".to_string(),
            error_field: "errorMsg".to_string(),
            wrong_captcha_message: "Invalid verify code".to_string(),
            fixed_fields: vec![("_eventId".to_string(), "submit".to_string())],
        }
    }
}

/// Form pipeline parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FormConfig {
    /// Form-list endpoint; fetching it makes the form service issue its
    /// session cookie.
    pub session_url: String,
    pub detail_url: String,
    pub submit_url: String,
    /// Cookie name whose presence proves the form session was acquired.
    pub session_cookie: String,
    /// Script line prefix for the quoted widget-id literal.
    pub widget_marker: String,
    /// Script line prefix for the JSON field-map literal.
    pub detail_marker: String,
    /// Field receiving the current date.
    pub date_field: String,
    pub date_format: String,
    /// Field whose value becomes the `userId` query parameter.
    pub user_id_field: String,
    /// Server-assigned fields dropped before submission.
    pub strip_fields: Vec<String>,
    /// Script line prefix for the quoted submission-result literal.
    pub result_marker: String,
    pub success_phrases: Vec<String>,
    pub incomplete_phrase: String,
}

impl Default for FormConfig {
    fn default() -> Self {
        Self {
            session_url: "https://form.example.edu/pdc/form/list".to_string(),
            detail_url: "https://form.example.edu/pdc/formDesignApi/S/xznuDkrk".to_string(),
            submit_url: "https://form.example.edu/pdc/formDesignApi/dataFormSave".to_string(),
            session_cookie: "JSESSIONID".to_string(),
            widget_marker: "var _selfFormWid".to_string(),
            detail_marker: "fillDetail".to_string(),
            date_field: "fillDate".to_string(),
            date_format: "%Y/%m/%d".to_string(),
            user_id_field: "userId".to_string(),
            strip_fields: ["rowNum", "submitTime", "userId"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            result_marker: "var _result".to_string(),
            success_phrases: vec!["success".to_string(), "submitted".to_string()],
            incomplete_phrase: "incomplete".to_string(),
        }
    }
}

/// Daily schedule parameters, validated into a [`SchedulePlan`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub hour: u32,
    pub minute: u32,
    pub time_zone: String,
    pub max_attempts: u8,
    #[serde(deserialize_with = "deserialize_duration")]
    pub retry_after: Duration,
    /// Upper bound for one whole login+submit cycle.
    #[serde(deserialize_with = "deserialize_duration")]
    pub punch_timeout: Duration,
    /// Run one cycle immediately instead of waiting for the first trigger.
    pub run_at_start: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            hour: 8,
            minute: 0,
            time_zone: "Asia/Shanghai".to_string(),
            max_attempts: 16,
            retry_after: Duration::from_secs(5 * 60),
            punch_timeout: Duration::from_secs(30),
            run_at_start: true,
        }
    }
}

impl ScheduleConfig {
    pub fn resolve(&self) -> Result<SchedulePlan> {
        if !(1..=120).contains(&self.max_attempts) {
            bail!(
                "max_attempts must be within 1..=120, got {}",
                self.max_attempts
            );
        }
        if self.hour >= 24 || self.minute >= 60 {
            bail!(
                "schedule time {:02}:{:02} is out of range",
                self.hour,
                self.minute
            );
        }
        let tz: Tz = self
            .time_zone
            .parse()
            .map_err(|_| anyhow::anyhow!("unknown time zone {:?}", self.time_zone))?;
        Ok(SchedulePlan {
            hour: self.hour,
            minute: self.minute,
            tz,
            max_attempts: self.max_attempts,
            retry_after: self.retry_after,
            punch_timeout: self.punch_timeout,
            run_at_start: self.run_at_start,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Sender name used in escalation notifications.
    pub display_name: String,
    pub http: HttpConfig,
    pub login: LoginConfig,
    pub form: FormConfig,
    pub schedule: ScheduleConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            display_name: "punch status".to_string(),
            http: HttpConfig::default(),
            login: LoginConfig::default(),
            form: FormConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parse config file {}", path.display()))
    }

    /// Missing file means defaults, like an empty file would.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.schedule.hour, 8);
        assert_eq!(config.login.captcha_len, 4);
        assert_eq!(config.form.session_cookie, "JSESSIONID");
        config.schedule.resolve().unwrap();
    }

    #[test]
    fn partial_overrides_keep_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [schedule]
            hour = 7
            minute = 30
            retry_after = "1m"

            [login]
            wrong_captcha_message = "bad code"
            "#,
        )
        .unwrap();
        assert_eq!(config.schedule.hour, 7);
        assert_eq!(config.schedule.minute, 30);
        assert_eq!(config.schedule.retry_after, Duration::from_secs(60));
        assert_eq!(config.login.wrong_captcha_message, "bad code");
        assert_eq!(config.schedule.max_attempts, 16);
    }

    #[test]
    fn resolve_validates_attempt_bound() {
        let mut schedule = ScheduleConfig::default();
        schedule.max_attempts = 0;
        assert!(schedule.resolve().is_err());
        schedule.max_attempts = 121;
        assert!(schedule.resolve().is_err());
        schedule.max_attempts = 120;
        assert!(schedule.resolve().is_ok());
    }

    #[test]
    fn resolve_validates_time_and_zone() {
        let mut schedule = ScheduleConfig::default();
        schedule.hour = 24;
        assert!(schedule.resolve().is_err());

        let mut schedule = ScheduleConfig::default();
        schedule.minute = 60;
        assert!(schedule.resolve().is_err());

        let mut schedule = ScheduleConfig::default();
        schedule.time_zone = "Mars/Olympus".to_string();
        assert!(schedule.resolve().is_err());

        let mut schedule = ScheduleConfig::default();
        schedule.time_zone = "Europe/Berlin".to_string();
        assert_eq!(schedule.resolve().unwrap().tz, chrono_tz::Europe::Berlin);
    }
}
