use anyhow::Result;
use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;

use crate::config::Config;

#[derive(Serialize)]
struct ResendEmailRequest {
    from: String,
    to: Vec<String>,
    subject: String,
    html: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Email {
    pub subject: String,
    pub html: String,
}

/// Sends transactional email through the Resend API.
#[derive(Clone)]
pub struct Mailer {
    api_key: String,
    from: String,
    http: reqwest::Client,
}

impl Mailer {
    pub fn new(config: &Config) -> Self {
        Mailer {
            api_key: config.resend_api_key.clone(),
            from: config.email_from.clone(),
            http: reqwest::Client::new(),
        }
    }

    pub async fn send(&self, to: &str, email: &Email) -> Result<()> {
        // In dev mode without API key, just log the message
        if self.api_key.is_empty() {
            log::info!("DEV MODE: email to {}: {}", to, email.subject);
            log::debug!("{}", email.html);
            return Ok(());
        }

        let request = ResendEmailRequest {
            from: self.from.clone(),
            to: vec![to.to_string()],
            subject: email.subject.clone(),
            html: email.html.clone(),
        };

        let response = self
            .http
            .post("https://api.resend.com/emails")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to send email: {}", error_text);
        }

        log::info!("Email \"{}\" sent to {}", email.subject, to);
        Ok(())
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn base_template(title: &str, body: &str) -> String {
    format!(
        r#"<div style="font-family: sans-serif; max-width: 500px; margin: 0 auto; padding: 24px; background: #ffffff; border-radius: 12px;">
    <h1 style="color: #cfa525; font-size: 24px; margin-bottom: 16px;">{}</h1>
    {}
    <p style="color: #94a3b8; font-size: 13px; margin-top: 32px;">&copy; {} Episodic. All rights reserved.</p>
</div>"#,
        escape_html(title),
        body,
        Utc::now().year()
    )
}

pub fn verification_code(name: &str, code: &str) -> Email {
    let body = format!(
        r#"<p style="color: #475569;">Hello {},</p>
    <p style="color: #475569; margin-bottom: 24px;">Your login code is:</p>
    <div style="background: #f1f5f9; border-radius: 8px; padding: 16px; text-align: center; margin-bottom: 24px;">
        <span style="font-family: monospace; font-size: 32px; font-weight: bold; letter-spacing: 6px; color: #0f172a;">{}</span>
    </div>
    <p style="color: #94a3b8; font-size: 14px;">This code expires in 10 minutes. Do not share it with anyone.</p>"#,
        escape_html(name),
        escape_html(code)
    );
    Email {
        subject: "Your Episodic login code".to_string(),
        html: base_template("Login code", &body),
    }
}

pub fn subscription_created(name: &str) -> Email {
    let body = format!(
        r#"<p style="color: #475569;">Hello {},</p>
    <p style="color: #475569;">Your subscription is now active. Every course is unlocked for you; start with the first episode and the next one opens as you go.</p>"#,
        escape_html(name)
    );
    Email {
        subject: "Your Subscription is Active".to_string(),
        html: base_template("Welcome aboard", &body),
    }
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub customer_name: String,
    pub customer_email: String,
    pub amount: f64,
    pub currency: String,
    pub tx_ref: String,
    pub kind: String,
    pub date: DateTime<Utc>,
}

pub fn admin_transaction_notification(tx: &Transaction) -> Email {
    let body = format!(
        r#"<table style="color: #475569; border-collapse: collapse;">
        <tr><td><b>Customer</b></td><td>{} &lt;{}&gt;</td></tr>
        <tr><td><b>Amount</b></td><td>{} {}</td></tr>
        <tr><td><b>Reference</b></td><td>{}</td></tr>
        <tr><td><b>Type</b></td><td>{}</td></tr>
        <tr><td><b>Date</b></td><td>{}</td></tr>
    </table>"#,
        escape_html(&tx.customer_name),
        escape_html(&tx.customer_email),
        tx.amount,
        escape_html(&tx.currency),
        escape_html(&tx.tx_ref),
        escape_html(&tx.kind),
        tx.date.format("%Y-%m-%d %H:%M UTC")
    );
    Email {
        subject: format!("New Transaction – {} {}", tx.amount, tx.currency),
        html: base_template("New transaction", &body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_without_api_key_logs_only() {
        let mailer = Mailer::new(&Config::default());
        let result = mailer
            .send("test@example.com", &verification_code("Test", "123456"))
            .await;
        assert!(result.is_ok());
    }

    #[test]
    fn test_verification_code_contains_code() {
        let email = verification_code("Ada", "042042");
        assert!(email.html.contains("042042"));
        assert!(email.html.contains("Ada"));
    }

    #[test]
    fn test_templates_escape_user_input() {
        let email = subscription_created("<script>");
        assert!(email.html.contains("&lt;script&gt;"));
        assert!(!email.html.contains("<script>"));
    }

    #[test]
    fn test_transaction_subject() {
        let email = admin_transaction_notification(&Transaction {
            customer_name: "Ada".to_string(),
            customer_email: "ada@example.com".to_string(),
            amount: 25.0,
            currency: "USD".to_string(),
            tx_ref: "ebook_1".to_string(),
            kind: "Product/Ebook".to_string(),
            date: Utc::now(),
        });
        assert_eq!(email.subject, "New Transaction – 25 USD");
        assert!(email.html.contains("ebook_1"));
    }
}
