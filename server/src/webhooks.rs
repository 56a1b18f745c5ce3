//! Payment provider webhook.

use serde::{Deserialize, Serialize};

use crate::auth;
use crate::config::Config;
use crate::db::Pool;
use crate::email::{self, Mailer, Transaction};

pub const SIGNATURE_HEADER: &str = "verif-hash";

const SUBSCRIPTION_PREFIX: &str = "sub_";
const HANDLED_EVENTS: [&str; 3] = ["subscription.created", "charge.completed", "payment.completed"];

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Missing email")]
    MissingEmail,
    #[error("User not found")]
    UnknownCustomer,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub data: EventData,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventData {
    pub tx_ref: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    #[serde(default)]
    pub customer: Customer,
}

#[derive(Debug, Default, Deserialize)]
pub struct Customer {
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookStatus {
    pub status: &'static str,
}

impl WebhookStatus {
    fn ok() -> Self {
        WebhookStatus { status: "ok" }
    }

    fn ignored() -> Self {
        WebhookStatus { status: "ignored" }
    }
}

fn verify_signature(config: &Config, signature: Option<&str>) -> Result<(), WebhookError> {
    match signature {
        Some(sig) if !config.webhook_secret_hash.is_empty() && sig == config.webhook_secret_hash => {
            Ok(())
        }
        _ => Err(WebhookError::InvalidSignature),
    }
}

pub async fn handle_event(
    pool: &Pool,
    mailer: &Mailer,
    config: &Config,
    signature: Option<&str>,
    event: WebhookEvent,
) -> Result<WebhookStatus, WebhookError> {
    verify_signature(config, signature)?;

    let email = event
        .data
        .customer
        .email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .ok_or(WebhookError::MissingEmail)?;
    let account = auth::find_by_email(pool, email)
        .await?
        .ok_or(WebhookError::UnknownCustomer)?;

    if !HANDLED_EVENTS.contains(&event.event.as_str()) {
        log::debug!("Ignoring webhook event {}", event.event);
        return Ok(WebhookStatus::ignored());
    }

    let tx_ref = event.data.tx_ref.clone().unwrap_or_default();
    if tx_ref.starts_with(SUBSCRIPTION_PREFIX) {
        let account = auth::activate_subscription(
            pool,
            &account.email,
            event.data.currency.as_deref(),
            event.data.amount,
        )
        .await?
        .ok_or(WebhookError::UnknownCustomer)?;

        if let Err(e) = mailer
            .send(&account.email, &email::subscription_created(&account.full_name))
            .await
        {
            log::warn!("Failed to send subscription mail to {}: {}", account.email, e);
        }
        return Ok(WebhookStatus::ok());
    }

    let tx = Transaction {
        customer_name: event
            .data
            .customer
            .name
            .clone()
            .unwrap_or_else(|| account.full_name.clone()),
        customer_email: account.email.clone(),
        amount: event.data.amount.unwrap_or_default(),
        currency: event.data.currency.clone().unwrap_or_default(),
        tx_ref,
        kind: "Product/Ebook".to_string(),
        date: chrono::Utc::now(),
    };
    if config.notify_email.is_empty() {
        log::warn!("No admin notification address configured; dropping {}", tx.tx_ref);
    } else {
        mailer
            .send(&config.notify_email, &email::admin_transaction_notification(&tx))
            .await?;
    }
    Ok(WebhookStatus::ok())
}
