use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use shared::{AccountView, Role};

use crate::config::Config;
use crate::db::Pool;
use crate::email::{self, Mailer};

const CODE_EXPIRATION_MS: i64 = 10 * 60 * 1000; // 10 minutes
const SESSION_DURATION_MS: i64 = 30 * 24 * 60 * 60 * 1000; // 30 days
const MAX_ACTIVE_SESSIONS: i64 = 2;

#[derive(Debug, Clone)]
pub struct Account {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    pub is_subscribed: bool,
}

impl Account {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Admins see every episode without a subscription.
    pub fn has_access(&self) -> bool {
        self.is_subscribed || self.is_admin()
    }
}

impl From<&Account> for AccountView {
    fn from(account: &Account) -> Self {
        AccountView {
            id: account.id.clone(),
            email: account.email.clone(),
            full_name: account.full_name.clone(),
            role: account.role.clone(),
            is_subscribed: account.is_subscribed,
        }
    }
}

type AccountRow = (String, String, String, String, bool);

fn account_from_row((id, email, full_name, role, is_subscribed): AccountRow) -> Account {
    Account {
        id,
        email,
        full_name,
        role: if role == "admin" { Role::Admin } else { Role::User },
        is_subscribed,
    }
}

/// Generate a random 6-digit verification code.
fn generate_code() -> String {
    let code: u32 = rand::rng().random_range(0..1_000_000);
    format!("{:06}", code)
}

/// Generate a secure session token.
fn generate_session_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    // Basic check, delivery is the real validation
    if !email.contains('@') || !email.contains('.') {
        anyhow::bail!("Invalid email format");
    }
    Ok(email)
}

/// Start authentication by sending a verification code to the email.
pub async fn start_auth(pool: &Pool, mailer: &Mailer, email: &str) -> Result<()> {
    let email = normalize_email(email)?;

    let code = generate_code();
    let now = chrono::Utc::now().timestamp_millis();
    let expires_at = now + CODE_EXPIRATION_MS;

    sqlx::query("INSERT INTO verification_codes (email, code, expires_at) VALUES (?, ?, ?)")
        .bind(&email)
        .bind(&code)
        .bind(expires_at)
        .execute(pool)
        .await?;

    let name = find_account_by_email(pool, &email)
        .await?
        .map(|a| a.full_name)
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| email.clone());

    mailer
        .send(&email, &email::verification_code(&name, &code))
        .await?;

    Ok(())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResult {
    pub session_token: String,
    pub account: AccountView,
}

/// Verify a code and create a session. Creates the account if it doesn't exist.
pub async fn verify_auth(pool: &Pool, config: &Config, email: &str, code: &str) -> Result<AuthResult> {
    let email = normalize_email(email)?;
    let now = chrono::Utc::now().timestamp_millis();

    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM verification_codes
         WHERE email = ? AND code = ? AND expires_at > ? AND used_at IS NULL
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(&email)
    .bind(code.trim())
    .bind(now)
    .fetch_optional(pool)
    .await?;

    let code_id = match row {
        Some((id,)) => id,
        None => anyhow::bail!("Invalid or expired code"),
    };

    sqlx::query("UPDATE verification_codes SET used_at = ? WHERE id = ?")
        .bind(now)
        .bind(code_id)
        .execute(pool)
        .await?;

    let account = get_or_create_account(pool, config, &email).await?;
    let session_token = create_session(pool, &account.id, now).await?;

    Ok(AuthResult {
        session_token,
        account: (&account).into(),
    })
}

async fn create_session(pool: &Pool, account_id: &str, now: i64) -> Result<String> {
    let token = generate_session_token();

    sqlx::query(
        "INSERT INTO sessions (token, account_id, created_at, expires_at, last_active_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&token)
    .bind(account_id)
    .bind(now)
    .bind(now + SESSION_DURATION_MS)
    .bind(now)
    .execute(pool)
    .await?;

    // Keep only the most recent sessions
    sqlx::query(
        "DELETE FROM sessions WHERE account_id = ? AND token NOT IN (
            SELECT token FROM sessions WHERE account_id = ?
            ORDER BY created_at DESC, rowid DESC LIMIT ?
         )",
    )
    .bind(account_id)
    .bind(account_id)
    .bind(MAX_ACTIVE_SESSIONS)
    .execute(pool)
    .await?;

    Ok(token)
}

async fn find_account_by_email(pool: &Pool, email: &str) -> Result<Option<Account>> {
    let row: Option<AccountRow> = sqlx::query_as(
        "SELECT id, email, full_name, role, is_subscribed FROM accounts WHERE email = ?",
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(account_from_row))
}

pub async fn find_account(pool: &Pool, account_id: &str) -> Result<Option<Account>> {
    let row: Option<AccountRow> = sqlx::query_as(
        "SELECT id, email, full_name, role, is_subscribed FROM accounts WHERE id = ?",
    )
    .bind(account_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(account_from_row))
}

/// Get or create an account for the given email.
async fn get_or_create_account(pool: &Pool, config: &Config, email: &str) -> Result<Account> {
    if let Some(account) = find_account_by_email(pool, email).await? {
        return Ok(account);
    }

    let is_admin = config.is_admin_email(email);
    let account = Account {
        id: uuid::Uuid::new_v4().to_string(),
        email: email.to_string(),
        full_name: email.split('@').next().unwrap_or_default().to_string(),
        role: if is_admin { Role::Admin } else { Role::User },
        is_subscribed: is_admin,
    };

    sqlx::query(
        "INSERT INTO accounts (id, email, full_name, role, is_subscribed) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&account.id)
    .bind(&account.email)
    .bind(&account.full_name)
    .bind(if is_admin { "admin" } else { "user" })
    .bind(account.is_subscribed)
    .execute(pool)
    .await?;

    log::info!("Created new account {} for {}", account.id, email);
    Ok(account)
}

/// Validate a session token and return its account if valid.
/// Also updates last_active_at and extends expiration (sliding window).
pub async fn validate_session(pool: &Pool, token: &str) -> Result<Option<Account>> {
    let now = chrono::Utc::now().timestamp_millis();

    let row: Option<(String,)> =
        sqlx::query_as("SELECT account_id FROM sessions WHERE token = ? AND expires_at > ?")
            .bind(token)
            .bind(now)
            .fetch_optional(pool)
            .await?;

    let Some((account_id,)) = row else {
        return Ok(None);
    };

    sqlx::query("UPDATE sessions SET last_active_at = ?, expires_at = ? WHERE token = ?")
        .bind(now)
        .bind(now + SESSION_DURATION_MS)
        .bind(token)
        .execute(pool)
        .await?;

    find_account(pool, &account_id).await
}

/// Logout by deleting the session.
pub async fn logout(pool: &Pool, token: &str) -> Result<()> {
    sqlx::query("DELETE FROM sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;
    Ok(())
}

/// Clean up expired sessions and verification codes.
pub async fn cleanup_expired(pool: &Pool) -> Result<()> {
    let now = chrono::Utc::now().timestamp_millis();

    let sessions_deleted = sqlx::query("DELETE FROM sessions WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await?
        .rows_affected();

    let codes_deleted = sqlx::query("DELETE FROM verification_codes WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await?
        .rows_affected();

    if sessions_deleted > 0 || codes_deleted > 0 {
        log::info!(
            "Cleaned up {} expired sessions and {} expired codes",
            sessions_deleted,
            codes_deleted
        );
    }

    Ok(())
}

/// Marks the account owning `email` as subscribed. Returns the updated
/// account, or `None` when no account uses that email.
pub async fn activate_subscription(
    pool: &Pool,
    email: &str,
    currency: Option<&str>,
    amount: Option<f64>,
) -> Result<Option<Account>> {
    let email = email.trim().to_lowercase();
    let result = sqlx::query(
        "UPDATE accounts SET is_subscribed = 1,
            subscription_currency = COALESCE(?, subscription_currency),
            subscription_amount = COALESCE(?, subscription_amount)
         WHERE email = ?",
    )
    .bind(currency)
    .bind(amount)
    .bind(&email)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }
    log::info!("Activated subscription for {}", email);
    find_account_by_email(pool, &email).await
}

pub async fn find_by_email(pool: &Pool, email: &str) -> Result<Option<Account>> {
    find_account_by_email(pool, &email.trim().to_lowercase()).await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartAuthRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyAuthRequest {
    pub email: String,
    pub code: String,
}
