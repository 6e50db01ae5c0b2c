use std::{env, net::SocketAddr, time::Duration};

use anyhow::Result;

use crate::{
    ai::gemini::{DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL},
    pagination::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE},
};

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub supabase_url: Option<String>,
    pub supabase_service_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub page_size: usize,
    pub request_timeout: Duration,
    pub api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            supabase_url: None,
            supabase_service_key: None,
            gemini_api_key: None,
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            request_timeout: Duration::from_secs(60),
            api_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let bind_addr = non_empty_var("EXPO_HUB_BIND_ADDR")
            .map(|raw| raw.trim_matches('"').trim_matches('\'').to_string())
            .and_then(|raw| raw.parse::<SocketAddr>().ok())
            .unwrap_or(defaults.bind_addr);

        let supabase_url =
            non_empty_var("SUPABASE_URL").or_else(|| non_empty_var("NEXT_PUBLIC_SUPABASE_URL"));

        let page_size = non_empty_var("EXPO_HUB_PAGE_SIZE")
            .and_then(|raw| parse_page_size(&raw))
            .unwrap_or(defaults.page_size);

        let request_timeout = non_empty_var("EXPO_HUB_REQUEST_TIMEOUT_SECONDS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout);

        Ok(Self {
            bind_addr,
            supabase_url,
            supabase_service_key: non_empty_var("SUPABASE_SERVICE_ROLE_KEY"),
            gemini_api_key: non_empty_var("GOOGLE_GEMINI_API_KEY"),
            gemini_model: non_empty_var("EXPO_HUB_GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            gemini_base_url: non_empty_var("EXPO_HUB_GEMINI_BASE_URL")
                .unwrap_or(defaults.gemini_base_url),
            page_size,
            request_timeout,
            api_key: non_empty_var("EXPO_HUB_API_KEY"),
        })
    }

    /// URL and key for the database, when both look real. Template values
    /// such as `your_supabase_url` count as unset.
    pub fn database_credentials(&self) -> Option<(&str, &str)> {
        let url = self.supabase_url.as_deref()?;
        let key = self.supabase_service_key.as_deref()?;
        if url.starts_with("http") && !url.contains("your_") {
            Some((url, key))
        } else {
            None
        }
    }
}

/// Positive sizes only, capped at what the server returns per request.
fn parse_page_size(raw: &str) -> Option<usize> {
    raw.parse::<usize>()
        .ok()
        .filter(|size| *size > 0)
        .map(|size| size.min(MAX_PAGE_SIZE))
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_database(url: &str) -> Config {
        Config {
            supabase_url: Some(url.to_string()),
            supabase_service_key: Some("service-role".to_string()),
            ..Config::default()
        }
    }

    #[test]
    fn database_requires_real_url_and_key() {
        assert!(with_database("https://abc.supabase.co").database_credentials().is_some());
        assert!(!with_database("your_supabase_url").database_credentials().is_some());
        assert!(!with_database("https://your_project.supabase.co").database_credentials().is_some());
        assert!(!with_database("abc.supabase.co").database_credentials().is_some());

        let missing_key = Config {
            supabase_service_key: None,
            ..with_database("https://abc.supabase.co")
        };
        assert!(!missing_key.database_credentials().is_some());
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.page_size, 1000);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.gemini_model, "gemini-2.0-flash");
        assert!(config.api_key.is_none());
    }

    #[test]
    fn page_size_is_capped_at_server_row_limit() {
        assert_eq!(parse_page_size("250"), Some(250));
        assert_eq!(parse_page_size("5000"), Some(MAX_PAGE_SIZE));
        assert_eq!(parse_page_size("0"), None);
        assert_eq!(parse_page_size("lots"), None);
    }
}
