use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    pub is_subscribed: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseSummary {
    pub id: String,
    pub title: String,
    pub description: String,
    pub slug: String,
    pub thumbnail_key: Option<String>,
    pub thumbnail_public_url: Option<String>,
    pub episode_count: i64,
    pub created_at: i64,
}

/// Episode as seen by a learner, with progress flags.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeView {
    pub id: String,
    pub title: String,
    pub description: String,
    pub order: i64,
    pub duration: Option<i64>,
    pub thumbnail_key: Option<String>,
    pub thumbnail_public_url: Option<String>,
    pub completed: bool,
    pub locked: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseDetail {
    pub id: String,
    pub title: String,
    pub description: String,
    pub thumbnail_key: Option<String>,
    pub thumbnail_public_url: Option<String>,
    pub created_by: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub episodes: Vec<EpisodeView>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeAccess {
    pub signed_url: String,
    pub episode: EpisodeView,
}
