//! Ad-blocking statistics from a Pi-hole style `api.php` summary endpoint.

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use serde_json::Value;
use std::{fmt, time::Duration};
use url::Url;

use crate::config::Config;
use crate::error::Error;

const UNAVAILABLE: &str = "Stats not available.";

#[derive(Debug, Clone, PartialEq)]
pub enum StatsSummary {
    Available {
        queries_today: u64,
        blocked_today: u64,
        percent_blocked: f64,
        domains_blocked: u64,
    },
    Unavailable,
}

impl StatsSummary {
    /// Extracts the four summary fields. Numbers may arrive as JSON numbers
    /// or as numeric strings; anything else makes the summary unavailable.
    pub fn from_json(data: &Value) -> StatsSummary {
        Self::parse(data).unwrap_or(StatsSummary::Unavailable)
    }

    fn parse(data: &Value) -> Option<StatsSummary> {
        Some(StatsSummary::Available {
            queries_today: integer(data.get("dns_queries_today")?)?,
            blocked_today: integer(data.get("ads_blocked_today")?)?,
            percent_blocked: float(data.get("ads_percentage_today")?)?,
            domains_blocked: integer(data.get("domains_being_blocked")?)?,
        })
    }
}

impl fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatsSummary::Available {
                queries_today,
                blocked_today,
                percent_blocked,
                domains_blocked,
            } => write!(
                f,
                "Total Queries: {}\nQueries Blocked: {}\nPercent Blocked: {}%\nDomains on Blocklist: {}",
                group_digits(*queries_today),
                group_digits(*blocked_today),
                format_percent(*percent_blocked),
                group_digits(*domains_blocked),
            ),
            StatsSummary::Unavailable => f.write_str(UNAVAILABLE),
        }
    }
}

fn integer(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

fn float(value: &Value) -> Option<f64> {
    let f = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    f.is_finite().then_some(f)
}

/// German digit grouping: `1234567` becomes `1.234.567`.
fn group_digits(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('.');
        }
        out.push(c);
    }
    out
}

/// Six significant digits with trailing zeros dropped: `18.996` becomes
/// `18,996`, `25.0` becomes `25`.
fn format_percent(p: f64) -> String {
    let int_digits = format!("{:.0}", p.abs().trunc()).len();
    let decimals = 6usize.saturating_sub(int_digits);
    let mut text = format!("{p:.decimals$}");
    if text.contains('.') {
        let trimmed = text.trim_end_matches('0').trim_end_matches('.').len();
        text.truncate(trimmed);
    }
    text.replace('.', ",")
}

#[async_trait]
pub trait StatsSource: Send + Sync {
    /// Never fails; problems collapse into [`StatsSummary::Unavailable`].
    async fn fetch(&self) -> StatsSummary;
}

pub struct PiholeStats {
    client: Client,
    url: Option<Url>,
    user: Option<String>,
    password: Option<String>,
}

impl PiholeStats {
    pub fn new(
        url: Option<Url>,
        user: Option<String>,
        password: Option<String>,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url,
            user,
            password,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, Error> {
        Self::new(
            config.stats.url.clone(),
            config.stats.user.clone(),
            config.stats.password.clone(),
            config.stats_timeout(),
        )
    }

    async fn request(&self, url: &Url) -> Result<Value, Error> {
        let mut request = self.client.get(url.clone());
        if let Some(user) = &self.user {
            request = request.basic_auth(user, self.password.as_ref());
        }
        let response = request.send().await?.error_for_status()?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl StatsSource for PiholeStats {
    async fn fetch(&self) -> StatsSummary {
        let Some(url) = &self.url else {
            debug!("No stats endpoint configured");
            return StatsSummary::Unavailable;
        };

        match self.request(url).await {
            Ok(data) => {
                let summary = StatsSummary::from_json(&data);
                if summary == StatsSummary::Unavailable {
                    warn!("Stats response is missing summary fields");
                }
                summary
            }
            Err(e) => {
                warn!("Failed to fetch stats: {e}");
                StatsSummary::Unavailable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves `response` verbatim to every connection; `None` accepts and never answers.
    async fn serve(response: Option<&'static str>) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    match response {
                        Some(body) => {
                            let reply = format!(
                                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                                body.len()
                            );
                            let _ = socket.write_all(reply.as_bytes()).await;
                        }
                        None => tokio::time::sleep(Duration::from_secs(30)).await,
                    }
                });
            }
        });
        Url::parse(&format!("http://{addr}/admin/api.php")).unwrap()
    }

    fn fetcher(url: Url, timeout: Duration) -> PiholeStats {
        PiholeStats::new(
            Some(url),
            Some("admin".to_string()),
            Some("secret".to_string()),
            timeout,
        )
        .unwrap()
    }

    #[test]
    fn test_group_digits() {
        assert_eq!(group_digits(0), "0");
        assert_eq!(group_digits(999), "999");
        assert_eq!(group_digits(1000), "1.000");
        assert_eq!(group_digits(1_234_567), "1.234.567");
    }

    #[test]
    fn test_format_percent() {
        assert_eq!(format_percent(18.996), "18,996");
        assert_eq!(format_percent(25.0), "25");
        assert_eq!(format_percent(12.345_678_9), "12,3457");
        assert_eq!(format_percent(100.0), "100");
        assert_eq!(format_percent(0.5), "0,5");
    }

    #[test]
    fn test_summary_text() {
        let summary = StatsSummary::from_json(&json!({
            "dns_queries_today": 12345,
            "ads_blocked_today": "2,345",
            "ads_percentage_today": 18.996,
            "domains_being_blocked": 1_000_000,
        }));

        assert_eq!(
            summary.to_string(),
            "Total Queries: 12.345\nQueries Blocked: 2.345\nPercent Blocked: 18,996%\nDomains on Blocklist: 1.000.000"
        );
    }

    #[test]
    fn test_missing_field_is_unavailable() {
        let summary = StatsSummary::from_json(&json!({
            "dns_queries_today": 1,
            "ads_blocked_today": 1,
            "ads_percentage_today": 1.0,
        }));
        assert_eq!(summary, StatsSummary::Unavailable);
        assert_eq!(summary.to_string(), "Stats not available.");
    }

    #[tokio::test]
    async fn test_fetch_parses_endpoint_response() {
        let url = serve(Some(
            r#"{"dns_queries_today":100,"ads_blocked_today":25,"ads_percentage_today":25.0,"domains_being_blocked":4200}"#,
        ))
        .await;

        let summary = fetcher(url, Duration::from_secs(5)).fetch().await;
        assert_eq!(
            summary,
            StatsSummary::Available {
                queries_today: 100,
                blocked_today: 25,
                percent_blocked: 25.0,
                domains_blocked: 4200,
            }
        );
    }

    #[tokio::test]
    async fn test_malformed_json_is_unavailable() {
        let url = serve(Some("<html>not json</html>")).await;
        let summary = fetcher(url, Duration::from_secs(5)).fetch().await;
        assert_eq!(summary, StatsSummary::Unavailable);
    }

    #[tokio::test]
    async fn test_timeout_is_unavailable() {
        let url = serve(None).await;
        let summary = fetcher(url, Duration::from_millis(300)).fetch().await;
        assert_eq!(summary, StatsSummary::Unavailable);
    }

    #[tokio::test]
    async fn test_no_endpoint_is_unavailable() {
        let stats = PiholeStats::new(None, None, None, Duration::from_secs(1)).unwrap();
        assert_eq!(stats.fetch().await, StatsSummary::Unavailable);
    }
}
