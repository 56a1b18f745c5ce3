use once_cell::sync::Lazy;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    /// Private bucket holding episode videos, served through signed URLs.
    pub bucket: String,
    /// Public bucket holding course and episode thumbnails.
    pub public_bucket: String,
    pub public_base_url: Option<String>,
}

fn default_thumbnail_max_bytes() -> u64 {
    20 * 1024 * 1024
}

fn default_video_max_bytes() -> u64 {
    2 * 1024 * 1024 * 1024
}

fn default_email_from() -> String {
    "Episodic <no-reply@episodic.local>".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Comma separated list of emails granted the admin role.
    #[serde(default)]
    pub admin_emails: String,
    #[serde(default)]
    pub resend_api_key: String,
    #[serde(default = "default_email_from")]
    pub email_from: String,
    /// Receives transaction notifications from the payment webhook.
    #[serde(default)]
    pub notify_email: String,
    #[serde(default)]
    pub webhook_secret_hash: String,
    #[serde(default = "default_thumbnail_max_bytes")]
    pub thumbnail_max_bytes: u64,
    #[serde(default = "default_video_max_bytes")]
    pub video_max_bytes: u64,
    #[serde(skip)]
    pub s3: Option<S3Config>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            admin_emails: String::new(),
            resend_api_key: String::new(),
            email_from: default_email_from(),
            notify_email: String::new(),
            webhook_secret_hash: String::new(),
            thumbnail_max_bytes: default_thumbnail_max_bytes(),
            video_max_bytes: default_video_max_bytes(),
            s3: None,
        }
    }
}

impl Config {
    pub fn is_admin_email(&self, email: &str) -> bool {
        let email = email.trim().to_lowercase();
        self.admin_emails
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .any(|admin| !admin.is_empty() && admin == email)
    }
}

pub static CONFIG: Lazy<Config> = Lazy::new(|| {
    let mut config = envy::prefixed("EPISODIC_")
        .from_env::<Config>()
        .expect("Invalid EPISODIC_* configuration");

    config.s3 = match envy::prefixed("EPISODIC_S3_").from_env::<S3Config>() {
        Ok(s3) => Some(s3),
        Err(e) => {
            log::warn!(
                "Object storage not configured ({}); upload & signed URL features will not work until set",
                e
            );
            None
        }
    };

    config
});

pub fn config() -> &'static Config {
    &CONFIG
}
