//! Daily insight email: rendering and delivery.

use std::fmt::Write as _;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::advisor::{rule_signal, Advice, RecommendationSource};
use crate::models::AlertPreferences;
use crate::stats::PortfolioStats;

/// Timeout for one SMTP exchange.
pub const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum MailError {
    #[error("mail configuration error: {0}")]
    Config(String),
    #[error("invalid address {0}")]
    Address(String),
    #[error("SMTP error: {0}")]
    Smtp(String),
}

/// Rendered message ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Opaque email sink.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_email(&self, email: &Email) -> Result<(), MailError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SmtpTls {
    /// Implicit TLS (port 465).
    Tls,
    #[default]
    StartTls,
    /// Plaintext, for local relays only.
    None,
}

impl FromStr for SmtpTls {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tls" => Ok(Self::Tls),
            "starttls" => Ok(Self::StartTls),
            "none" | "off" => Ok(Self::None),
            other => Err(format!("unknown SMTP_TLS mode: {}", other)),
        }
    }
}

#[derive(Clone, PartialEq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: String,
    pub tls: SmtpTls,
}

// Keeps the password out of logs.
impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("from_address", &self.from_address)
            .field("tls", &self.tls)
            .finish()
    }
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let from: Mailbox = config
            .from_address
            .parse()
            .map_err(|e| MailError::Config(format!("Invalid from address: {}", e)))?;

        let host = config.host.as_str();
        let mut builder = match config.tls {
            SmtpTls::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(host),
            SmtpTls::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host),
            SmtpTls::None => Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)),
        }
        .map_err(|e| MailError::Smtp(format!("SMTP transport error: {}", e)))?;

        builder = builder.port(config.port).timeout(Some(SMTP_TIMEOUT));

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_email(&self, email: &Email) -> Result<(), MailError> {
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|_| MailError::Address(email.to.clone()))?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&email.subject)
            .header(ContentType::TEXT_HTML)
            .body(email.html.clone())
            .map_err(|e| MailError::Smtp(format!("Failed to build email: {}", e)))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::Smtp(format!("Failed to send email: {}", e)))?;
        Ok(())
    }
}

/// Logs instead of sending. For local runs without an SMTP relay.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunMailer;

#[async_trait]
impl Mailer for DryRunMailer {
    async fn send_email(&self, email: &Email) -> Result<(), MailError> {
        tracing::info!(
            "[dry-run] would send '{}' to {} ({} bytes)",
            email.subject,
            email.to,
            email.html.len()
        );
        Ok(())
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn change_color(pct: f64) -> &'static str {
    if pct > 0.0 {
        "#1a7f37"
    } else if pct < 0.0 {
        "#cf222e"
    } else {
        "#57606a"
    }
}

/// Renders the daily summary email for one user.
pub fn render_daily_email(
    to: &str,
    stats: &PortfolioStats,
    advice: &Advice,
    prefs: Option<&AlertPreferences>,
    date_label: &str,
) -> Email {
    let rec = &advice.recommendation;
    let threshold = prefs.and_then(|p| p.price_move_threshold_pct);
    let show_signals = prefs.map_or(true, |p| p.include_rule_signals);

    let mut html = String::new();
    let _ = write!(
        html,
        "<html><body style=\"font-family:sans-serif\">\
         <h2>Your daily portfolio insight for {}</h2>",
        escape_html(date_label)
    );
    let _ = write!(
        html,
        "<p><strong>Recommendation:</strong> {} &middot; confidence {}% &middot; risk {}</p>\
         <p>{}</p>",
        rec.action,
        rec.confidence,
        rec.risk_level,
        escape_html(&rec.reasoning)
    );
    if let Some(target) = rec.price_target {
        let _ = write!(html, "<p>Price target: {:.2}</p>", target);
    }
    if let Some(stop) = rec.stop_loss {
        let _ = write!(html, "<p>Stop loss: {:.2}</p>", stop);
    }

    html.push_str(
        "<table cellpadding=\"6\" style=\"border-collapse:collapse\">\
         <tr><th align=\"left\">Symbol</th><th align=\"right\">Price</th><th align=\"right\">Change</th>",
    );
    if show_signals {
        html.push_str("<th align=\"left\">Signal</th>");
    }
    html.push_str("</tr>");
    for s in &stats.symbols {
        if threshold.is_some_and(|t| s.change_pct.abs() < t) {
            continue;
        }
        let _ = write!(
            html,
            "<tr><td>{}</td><td align=\"right\">{:.2}</td>\
             <td align=\"right\" style=\"color:{}\">{:+.2} ({:+.2}%)</td>",
            escape_html(s.symbol.as_str()),
            s.current_price,
            change_color(s.change_pct),
            s.change_abs,
            s.change_pct
        );
        if show_signals {
            let _ = write!(html, "<td>{}</td>", rule_signal(s.change_pct));
        }
        html.push_str("</tr>");
    }
    html.push_str("</table>");

    let _ = write!(
        html,
        "<p>Top gainer: {} ({:+.2}%) &middot; Top loser: {} ({:+.2}%) &middot; Average: {:+.2}%</p>",
        stats.top_gainer.symbol,
        stats.top_gainer.change_pct,
        stats.top_loser.symbol,
        stats.top_loser.change_pct,
        stats.average_change_pct
    );
    if !stats.missing.is_empty() {
        let names: Vec<&str> = stats.missing.iter().map(|s| s.as_str()).collect();
        let _ = write!(
            html,
            "<p style=\"color:#57606a\">No price data yet for: {}</p>",
            escape_html(&names.join(", "))
        );
    }
    if advice.source == RecommendationSource::RuleBased {
        html.push_str(
            "<p style=\"color:#57606a\"><em>Generated by rule-based analysis; \
             AI analysis was unavailable.</em></p>",
        );
    }
    html.push_str("<p style=\"font-size:small\">Not investment advice.</p></body></html>");

    Email {
        to: to.to_string(),
        subject: format!(
            "StockPulse daily insight: {} ({:+.2}%)",
            rec.action, stats.average_change_pct
        ),
        html,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisor::{rule_based, Action, Recommendation, RiskLevel};
    use crate::quotes::{Quote, QuotePrices};
    use crate::symbols::Symbol;

    fn stats() -> PortfolioStats {
        let quotes: Vec<Quote> = [("AAPL", 107.0), ("MSFT", 99.5)]
            .iter()
            .map(|(s, c)| {
                Quote::from_prices(
                    Symbol::parse(s).unwrap(),
                    QuotePrices {
                        current: *c,
                        open: 100.0,
                        high: 108.0,
                        low: 99.0,
                        previous_close: 100.0,
                    },
                    0,
                )
            })
            .collect();
        PortfolioStats::compute(&quotes, &[Symbol::parse("GOOG").unwrap()]).unwrap()
    }

    #[test]
    fn renders_table_signals_and_fallback_note() {
        let s = stats();
        let advice = Advice {
            recommendation: rule_based(&s),
            source: RecommendationSource::RuleBased,
            fallback_reason: Some("timeout".into()),
        };
        let email = render_daily_email("a@example.com", &s, &advice, None, "2024-06-03");
        assert_eq!(email.to, "a@example.com");
        assert!(email.subject.contains("HOLD"));
        assert!(email.html.contains("<td>AAPL</td>"));
        assert!(email.html.contains("+7.00 (+7.00%)"));
        assert!(email.html.contains("<td>SELL</td>"));
        assert!(email.html.contains("No price data yet for: GOOG"));
        assert!(email.html.contains("rule-based analysis"));
    }

    #[test]
    fn threshold_filters_rows_and_signals_can_be_hidden() {
        let s = stats();
        let advice = Advice {
            recommendation: Recommendation {
                action: Action::Buy,
                confidence: 70,
                reasoning: "<b>cheap</b>".into(),
                risk_level: RiskLevel::Medium,
                price_target: Some(120.0),
                stop_loss: None,
            },
            source: RecommendationSource::Llm,
            fallback_reason: None,
        };
        let prefs = AlertPreferences {
            price_move_threshold_pct: Some(1.0),
            include_rule_signals: false,
        };
        let email = render_daily_email("a@example.com", &s, &advice, Some(&prefs), "today");
        assert!(email.html.contains("<td>AAPL</td>"));
        assert!(!email.html.contains("<td>MSFT</td>"));
        assert!(!email.html.contains("Signal"));
        assert!(email.html.contains("&lt;b&gt;cheap&lt;/b&gt;"));
        assert!(email.html.contains("Price target: 120.00"));
        assert!(!email.html.contains("rule-based analysis"));
    }

    #[test]
    fn tls_mode_parses() {
        assert_eq!("STARTTLS".parse::<SmtpTls>().unwrap(), SmtpTls::StartTls);
        assert_eq!("tls".parse::<SmtpTls>().unwrap(), SmtpTls::Tls);
        assert_eq!("none".parse::<SmtpTls>().unwrap(), SmtpTls::None);
        assert!("ssl3".parse::<SmtpTls>().is_err());
    }

    #[test]
    fn debug_hides_password() {
        let cfg = SmtpConfig {
            host: "smtp.example.com".into(),
            port: 587,
            username: Some("user".into()),
            password: Some("hunter2".into()),
            from_address: "noreply@example.com".into(),
            tls: SmtpTls::StartTls,
        };
        assert!(!format!("{:?}", cfg).contains("hunter2"));
    }

    #[tokio::test]
    async fn dry_run_always_succeeds() {
        let email = Email {
            to: "a@example.com".into(),
            subject: "s".into(),
            html: "<p/>".into(),
        };
        assert!(DryRunMailer.send_email(&email).await.is_ok());
    }
}
