//! Process configuration read from the environment.

use std::time::Duration;

use creditscribe_transcription::ExportFormat;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_SIGNUP_CREDITS: i64 = 300;

/// Job runner timing and export settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    pub poll_interval: Duration,
    /// Overall wall-clock budget for one job, measured from the first poll wait.
    pub max_wait: Duration,
    /// Subtitle formats fetched (best-effort) after completion.
    pub export_formats: Vec<ExportFormat>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: DEFAULT_MAX_WAIT,
            export_formats: vec![ExportFormat::Srt],
        }
    }
}

impl RunnerConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_export_formats(mut self, formats: Vec<ExportFormat>) -> Self {
        self.export_formats = formats;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyAiConfig {
    pub api_key: String,
    pub base_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MercadoPagoConfig {
    pub access_token: String,
    pub base_url: String,
}

/// Application configuration.
///
/// Optional integrations stay `None` when their credentials are absent; the
/// binary then falls back to in-memory stores and in-process providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: Option<String>,
    pub assemblyai: Option<AssemblyAiConfig>,
    pub mercadopago: Option<MercadoPagoConfig>,
    pub webhook_secret: Option<String>,
    /// Public base URL the payment provider posts notifications to.
    pub webhook_url: String,
    pub frontend_url: String,
    pub runner: RunnerConfig,
    pub signup_credits: i64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_source(|key| std::env::var(key).ok())
    }

    pub fn from_source<F>(mut source: F) -> Self
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut get = |key: &str| source(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let assemblyai_base = get("ASSEMBLYAI_BASE_URL").unwrap_or_else(|| "https://api.assemblyai.com".to_string());
        let assemblyai = get("ASSEMBLYAI_API_KEY").map(|api_key| AssemblyAiConfig {
            api_key,
            base_url: trim_base(&assemblyai_base),
        });
        let mercadopago_base =
            get("MERCADOPAGO_BASE_URL").unwrap_or_else(|| "https://api.mercadopago.com".to_string());
        let mercadopago = get("MERCADOPAGO_ACCESS_TOKEN").map(|access_token| MercadoPagoConfig {
            access_token,
            base_url: trim_base(&mercadopago_base),
        });

        let poll_secs = parse_or("JOB_POLL_INTERVAL_SECS", get("JOB_POLL_INTERVAL_SECS"), DEFAULT_POLL_INTERVAL.as_secs());
        let max_wait_secs = parse_or("JOB_MAX_WAIT_SECS", get("JOB_MAX_WAIT_SECS"), DEFAULT_MAX_WAIT.as_secs());

        Self {
            port: parse_or("PORT", get("PORT"), DEFAULT_PORT),
            database_url: get("DATABASE_URL"),
            assemblyai,
            mercadopago,
            webhook_secret: get("MERCADOPAGO_WEBHOOK_SECRET"),
            webhook_url: trim_base(&get("WEBHOOK_URL").unwrap_or_else(|| "http://localhost:8080".to_string())),
            frontend_url: trim_base(&get("FRONTEND_URL").unwrap_or_else(|| "http://localhost:5173".to_string())),
            runner: RunnerConfig::default()
                .with_poll_interval(Duration::from_secs(poll_secs.max(1)))
                .with_max_wait(Duration::from_secs(max_wait_secs.max(1))),
            signup_credits: parse_or("SIGNUP_CREDITS", get("SIGNUP_CREDITS"), DEFAULT_SIGNUP_CREDITS).max(0),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, fallback: T) -> T
where
    T: core::str::FromStr + core::fmt::Display + Copy,
{
    match raw {
        None => fallback,
        Some(value) => value.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %value, fallback = %fallback, "malformed config value, using default");
            fallback
        }),
    }
}

fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}
