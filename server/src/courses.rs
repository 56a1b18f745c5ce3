//! Course and episode catalog, managed by admins.

use serde::Deserialize;
use shared::{CourseDetail, CourseSummary};
use std::sync::Arc;

use crate::db::Pool;
use crate::storage::{ObjectGateway, StorageError, Visibility};

/// Key prefixes a video may come from: multipart and single-shot uploads
/// write under the first, presigned direct uploads under the second.
const VIDEO_KEY_PREFIXES: [&str; 2] = ["episodes/videos/", "videos/"];

#[derive(Debug, thiserror::Error)]
pub enum CourseError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Invalid(String),
    #[error("You must complete previous episode first")]
    Locked,
    #[error("object storage is not configured")]
    StorageUnavailable,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, CourseError>;

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    pub title: String,
    pub description: String,
    pub thumbnail_key: Option<String>,
    pub slug: String,
    pub created_by: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

type CourseRow = (String, String, String, Option<String>, String, Option<String>, i64, i64);

impl From<CourseRow> for Course {
    fn from(
        (id, title, description, thumbnail_key, slug, created_by, created_at, updated_at): CourseRow,
    ) -> Self {
        Course {
            id,
            title,
            description,
            thumbnail_key,
            slug,
            created_by,
            created_at,
            updated_at,
        }
    }
}

impl Course {
    pub fn detail(&self, episodes: Vec<shared::EpisodeView>, public_url: impl Fn(&str) -> String) -> CourseDetail {
        CourseDetail {
            id: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            thumbnail_key: self.thumbnail_key.clone(),
            thumbnail_public_url: self.thumbnail_key.as_deref().map(public_url),
            created_by: self.created_by.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            episodes,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub id: String,
    pub course_id: String,
    pub title: String,
    pub description: String,
    pub video_key: Option<String>,
    pub thumbnail_key: Option<String>,
    pub order: i64,
    pub duration: Option<i64>,
    pub created_at: i64,
}

type EpisodeRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    i64,
    Option<i64>,
    i64,
);

impl From<EpisodeRow> for Episode {
    fn from(
        (id, course_id, title, description, video_key, thumbnail_key, order, duration, created_at): EpisodeRow,
    ) -> Self {
        Episode {
            id,
            course_id,
            title,
            description,
            video_key,
            thumbnail_key,
            order,
            duration,
            created_at,
        }
    }
}

const COURSE_COLUMNS: &str =
    "id, title, description, thumbnail_key, slug, created_by, created_at, updated_at";
const EPISODE_COLUMNS: &str =
    "id, course_id, title, description, video_key, thumbnail_key, ord, duration, created_at";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseInput {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub thumbnail_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub thumbnail_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeInput {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub video_key: Option<String>,
    pub thumbnail_key: Option<String>,
    pub order: i64,
    pub duration: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub video_key: Option<String>,
    pub thumbnail_key: Option<String>,
    pub order: Option<i64>,
    pub duration: Option<i64>,
}

/// Lower-cases, turns whitespace runs into `-`, drops non-word characters
/// and collapses repeated dashes.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.trim().to_lowercase().chars() {
        if c.is_whitespace() {
            if !in_space {
                slug.push('-');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        if c.is_alphanumeric() || c == '_' || c == '-' {
            slug.push(c);
        }
    }

    let mut collapsed = String::with_capacity(slug.len());
    for c in slug.chars() {
        if c == '-' && collapsed.ends_with('-') {
            continue;
        }
        collapsed.push(c);
    }
    collapsed
}

/// Only keys produced by the upload paths may become an episode video.
pub fn validate_video_key(key: &str) -> Result<()> {
    let known_prefix = VIDEO_KEY_PREFIXES.iter().any(|p| key.starts_with(p));
    if !known_prefix || key.contains("..") || key.len() <= "videos/".len() {
        return Err(CourseError::Invalid(format!("{} is not an uploaded video", key)));
    }
    Ok(())
}

/// Deletes a replaced or orphaned object; failures are only logged.
pub async fn discard_object(
    gateway: Option<&Arc<dyn ObjectGateway>>,
    visibility: Visibility,
    key: Option<&str>,
) {
    let (Some(gateway), Some(key)) = (gateway, key) else {
        return;
    };
    match gateway.delete_object(visibility, key).await {
        Ok(()) => log::info!("Deleted {:?} object {}", visibility, key),
        Err(e) => log::warn!("Failed to delete {:?} object {}: {}", visibility, key, e),
    }
}

async fn unique_slug(pool: &Pool, title: &str, exclude_id: Option<&str>) -> Result<String> {
    let slug = slugify(title);
    if slug.is_empty() {
        return Err(CourseError::Invalid("Course title is required".to_string()));
    }
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM courses WHERE slug = ? AND id != ?")
        .bind(&slug)
        .bind(exclude_id.unwrap_or_default())
        .fetch_one(pool)
        .await?;
    if count > 0 {
        return Ok(format!("{}-{}", slug, chrono::Utc::now().timestamp_millis()));
    }
    Ok(slug)
}

pub async fn create_course(pool: &Pool, input: CourseInput, created_by: Option<&str>) -> Result<Course> {
    let title = input.title.trim().to_string();
    let slug = unique_slug(pool, &title, None).await?;
    let now = chrono::Utc::now().timestamp_millis();

    let course = Course {
        id: uuid::Uuid::new_v4().to_string(),
        title,
        description: input.description,
        thumbnail_key: input.thumbnail_key.filter(|k| !k.is_empty()),
        slug,
        created_by: created_by.map(str::to_string),
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO courses (id, title, description, thumbnail_key, slug, created_by, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&course.id)
    .bind(&course.title)
    .bind(&course.description)
    .bind(&course.thumbnail_key)
    .bind(&course.slug)
    .bind(&course.created_by)
    .bind(course.created_at)
    .bind(course.updated_at)
    .execute(pool)
    .await?;

    log::info!("Created course {} ({})", course.id, course.slug);
    Ok(course)
}

pub async fn get_course(pool: &Pool, id: &str) -> Result<Course> {
    let row: Option<CourseRow> =
        sqlx::query_as(&format!("SELECT {} FROM courses WHERE id = ?", COURSE_COLUMNS))
            .bind(id)
            .fetch_optional(pool)
            .await?;
    row.map(Course::from).ok_or(CourseError::NotFound("Course"))
}

/// Newest first.
pub async fn list_courses(pool: &Pool, public_url: impl Fn(&str) -> String) -> Result<Vec<CourseSummary>> {
    let rows: Vec<(String, String, String, String, Option<String>, i64, i64)> = sqlx::query_as(
        "SELECT c.id, c.title, c.description, c.slug, c.thumbnail_key, c.created_at,
                (SELECT COUNT(*) FROM episodes WHERE course_id = c.id) AS episode_count
         FROM courses c
         ORDER BY c.created_at DESC, c.rowid DESC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(
            |(id, title, description, slug, thumbnail_key, created_at, episode_count)| CourseSummary {
                thumbnail_public_url: thumbnail_key.as_deref().map(&public_url),
                id,
                title,
                description,
                slug,
                thumbnail_key,
                episode_count,
                created_at,
            },
        )
        .collect())
}

pub async fn update_course(
    pool: &Pool,
    gateway: Option<&Arc<dyn ObjectGateway>>,
    id: &str,
    update: CourseUpdate,
) -> Result<Course> {
    let mut course = get_course(pool, id).await?;

    if let Some(title) = update.title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) {
        if title != course.title {
            course.slug = unique_slug(pool, &title, Some(id)).await?;
        }
        course.title = title;
    }
    if let Some(description) = update.description {
        course.description = description;
    }
    if let Some(thumbnail_key) = update.thumbnail_key.filter(|k| !k.is_empty()) {
        if course.thumbnail_key.as_deref() != Some(thumbnail_key.as_str()) {
            discard_object(gateway, Visibility::Public, course.thumbnail_key.as_deref()).await;
            course.thumbnail_key = Some(thumbnail_key);
        }
    }
    course.updated_at = chrono::Utc::now().timestamp_millis();

    sqlx::query(
        "UPDATE courses SET title = ?, description = ?, thumbnail_key = ?, slug = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(&course.title)
    .bind(&course.description)
    .bind(&course.thumbnail_key)
    .bind(&course.slug)
    .bind(course.updated_at)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(course)
}

/// Deletes the course, its episodes, and best-effort all their media.
pub async fn delete_course(pool: &Pool, gateway: Option<&Arc<dyn ObjectGateway>>, id: &str) -> Result<()> {
    let course = get_course(pool, id).await?;
    let episodes = list_episodes(pool, id).await?;

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM episode_progress WHERE course_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM enrollments WHERE course_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM episodes WHERE course_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM courses WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    discard_object(gateway, Visibility::Public, course.thumbnail_key.as_deref()).await;
    for episode in &episodes {
        discard_object(gateway, Visibility::Private, episode.video_key.as_deref()).await;
        discard_object(gateway, Visibility::Public, episode.thumbnail_key.as_deref()).await;
    }

    log::info!("Deleted course {} with {} episodes", id, episodes.len());
    Ok(())
}

/// Episodes of a course sorted by order.
pub async fn list_episodes(pool: &Pool, course_id: &str) -> Result<Vec<Episode>> {
    let rows: Vec<EpisodeRow> = sqlx::query_as(&format!(
        "SELECT {} FROM episodes WHERE course_id = ? ORDER BY ord",
        EPISODE_COLUMNS
    ))
    .bind(course_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(Episode::from).collect())
}

pub async fn get_episode(pool: &Pool, course_id: &str, episode_id: &str) -> Result<Episode> {
    let row: Option<EpisodeRow> = sqlx::query_as(&format!(
        "SELECT {} FROM episodes WHERE course_id = ? AND id = ?",
        EPISODE_COLUMNS
    ))
    .bind(course_id)
    .bind(episode_id)
    .fetch_optional(pool)
    .await?;
    row.map(Episode::from).ok_or(CourseError::NotFound("Episode"))
}

async fn ensure_order_free(pool: &Pool, course_id: &str, order: i64, except: Option<&str>) -> Result<()> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM episodes WHERE course_id = ? AND ord = ? AND id != ?")
            .bind(course_id)
            .bind(order)
            .bind(except.unwrap_or_default())
            .fetch_one(pool)
            .await?;
    if count > 0 {
        return Err(CourseError::Invalid(format!(
            "Episode order {} already exists",
            order
        )));
    }
    Ok(())
}

pub async fn create_episode(pool: &Pool, course_id: &str, input: EpisodeInput) -> Result<Episode> {
    get_course(pool, course_id).await?;

    let title = input.title.trim().to_string();
    if title.is_empty() {
        return Err(CourseError::Invalid("Episode title is required".to_string()));
    }
    if input.order < 0 {
        return Err(CourseError::Invalid("Episode order cannot be negative".to_string()));
    }
    let video_key = input.video_key.filter(|k| !k.is_empty());
    if let Some(key) = &video_key {
        validate_video_key(key)?;
    }
    ensure_order_free(pool, course_id, input.order, None).await?;

    let episode = Episode {
        id: uuid::Uuid::new_v4().to_string(),
        course_id: course_id.to_string(),
        title,
        description: input.description,
        video_key,
        thumbnail_key: input.thumbnail_key.filter(|k| !k.is_empty()),
        order: input.order,
        duration: input.duration,
        created_at: chrono::Utc::now().timestamp_millis(),
    };

    sqlx::query(
        "INSERT INTO episodes (id, course_id, title, description, video_key, thumbnail_key, ord, duration, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&episode.id)
    .bind(&episode.course_id)
    .bind(&episode.title)
    .bind(&episode.description)
    .bind(&episode.video_key)
    .bind(&episode.thumbnail_key)
    .bind(episode.order)
    .bind(episode.duration)
    .bind(episode.created_at)
    .execute(pool)
    .await?;

    touch_course(pool, course_id).await?;
    Ok(episode)
}

pub async fn update_episode(
    pool: &Pool,
    gateway: Option<&Arc<dyn ObjectGateway>>,
    course_id: &str,
    episode_id: &str,
    update: EpisodeUpdate,
) -> Result<Episode> {
    let mut episode = get_episode(pool, course_id, episode_id).await?;

    if let Some(order) = update.order {
        if order < 0 {
            return Err(CourseError::Invalid("Episode order cannot be negative".to_string()));
        }
        ensure_order_free(pool, course_id, order, Some(episode_id)).await?;
        episode.order = order;
    }
    if let Some(title) = update.title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) {
        episode.title = title;
    }
    if let Some(description) = update.description {
        episode.description = description;
    }
    if update.duration.is_some() {
        episode.duration = update.duration;
    }

    let mut replaced_video = None;
    if let Some(video_key) = update.video_key.filter(|k| !k.is_empty()) {
        validate_video_key(&video_key)?;
        if episode.video_key.as_deref() != Some(video_key.as_str()) {
            replaced_video = episode.video_key.replace(video_key);
        }
    }
    let mut replaced_thumbnail = None;
    if let Some(thumbnail_key) = update.thumbnail_key.filter(|k| !k.is_empty()) {
        if episode.thumbnail_key.as_deref() != Some(thumbnail_key.as_str()) {
            replaced_thumbnail = episode.thumbnail_key.replace(thumbnail_key);
        }
    }

    sqlx::query(
        "UPDATE episodes SET title = ?, description = ?, video_key = ?, thumbnail_key = ?, ord = ?, duration = ?
         WHERE id = ? AND course_id = ?",
    )
    .bind(&episode.title)
    .bind(&episode.description)
    .bind(&episode.video_key)
    .bind(&episode.thumbnail_key)
    .bind(episode.order)
    .bind(episode.duration)
    .bind(episode_id)
    .bind(course_id)
    .execute(pool)
    .await?;
    touch_course(pool, course_id).await?;

    discard_object(gateway, Visibility::Private, replaced_video.as_deref()).await;
    discard_object(gateway, Visibility::Public, replaced_thumbnail.as_deref()).await;

    Ok(episode)
}

pub async fn delete_episode(
    pool: &Pool,
    gateway: Option<&Arc<dyn ObjectGateway>>,
    course_id: &str,
    episode_id: &str,
) -> Result<()> {
    let episode = get_episode(pool, course_id, episode_id).await?;

    sqlx::query("DELETE FROM episodes WHERE id = ? AND course_id = ?")
        .bind(episode_id)
        .bind(course_id)
        .execute(pool)
        .await?;
    touch_course(pool, course_id).await?;

    discard_object(gateway, Visibility::Private, episode.video_key.as_deref()).await;
    discard_object(gateway, Visibility::Public, episode.thumbnail_key.as_deref()).await;
    Ok(())
}

async fn touch_course(pool: &Pool, course_id: &str) -> Result<()> {
    sqlx::query("UPDATE courses SET updated_at = ? WHERE id = ?")
        .bind(chrono::Utc::now().timestamp_millis())
        .bind(course_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db;
    use crate::storage::MemoryGateway;
    use bytes::Bytes;

    pub(crate) async fn course_with_episodes(pool: &Pool, orders: &[i64]) -> Course {
        let course = create_course(
            pool,
            CourseInput {
                title: "Rust for Sailors".to_string(),
                description: "From knots to borrowck".to_string(),
                thumbnail_key: None,
            },
            None,
        )
        .await
        .unwrap();
        for order in orders {
            create_episode(
                pool,
                &course.id,
                EpisodeInput {
                    title: format!("Episode {}", order),
                    description: String::new(),
                    video_key: Some(format!("episodes/videos/1_ep{}.mp4", order)),
                    thumbnail_key: None,
                    order: *order,
                    duration: Some(600),
                },
            )
            .await
            .unwrap();
        }
        course
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("  Intro to  Rust! "), "intro-to-rust");
        assert_eq!(slugify("A -- B"), "a-b");
        assert_eq!(slugify("Déjà vu"), "déjà-vu");
    }

    #[test]
    fn test_validate_video_key() {
        assert!(validate_video_key("episodes/videos/123_a.mp4").is_ok());
        assert!(validate_video_key("videos/123_a.mp4").is_ok());
        assert!(validate_video_key("courses/thumbnails/1_a.png").is_err());
        assert!(validate_video_key("episodes/videos/../secret").is_err());
        assert!(validate_video_key("videos/").is_err());
    }

    #[tokio::test]
    async fn test_duplicate_titles_get_distinct_slugs() {
        let pool = db::test_pool().await.unwrap();
        let a = course_with_episodes(&pool, &[]).await;
        let b = course_with_episodes(&pool, &[]).await;
        assert_eq!(a.slug, "rust-for-sailors");
        assert_ne!(a.slug, b.slug);
        assert!(b.slug.starts_with("rust-for-sailors-"));
    }

    #[tokio::test]
    async fn test_episode_order_must_be_unique() {
        let pool = db::test_pool().await.unwrap();
        let course = course_with_episodes(&pool, &[0, 1]).await;

        let result = create_episode(
            &pool,
            &course.id,
            EpisodeInput {
                title: "Dup".to_string(),
                description: String::new(),
                video_key: None,
                thumbnail_key: None,
                order: 1,
                duration: None,
            },
        )
        .await;
        assert!(matches!(result, Err(CourseError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_list_courses_counts_episodes() {
        let pool = db::test_pool().await.unwrap();
        course_with_episodes(&pool, &[0, 1, 2]).await;

        let courses = list_courses(&pool, |k| format!("/r2/{}", k)).await.unwrap();
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].episode_count, 3);
        assert!(courses[0].thumbnail_public_url.is_none());
    }

    #[tokio::test]
    async fn test_replacing_video_deletes_previous_object() {
        let pool = db::test_pool().await.unwrap();
        let memory = Arc::new(MemoryGateway::new());
        memory
            .put_object(Visibility::Private, "episodes/videos/1_ep0.mp4", Bytes::from_static(b"old"), "video/mp4")
            .await
            .unwrap();
        let gateway: Arc<dyn ObjectGateway> = memory.clone();

        let course = course_with_episodes(&pool, &[0]).await;
        let episode = list_episodes(&pool, &course.id).await.unwrap().remove(0);

        let updated = update_episode(
            &pool,
            Some(&gateway),
            &course.id,
            &episode.id,
            EpisodeUpdate {
                video_key: Some("episodes/videos/2_new.mp4".to_string()),
                ..EpisodeUpdate::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(updated.video_key.as_deref(), Some("episodes/videos/2_new.mp4"));
        assert!(memory.object(Visibility::Private, "episodes/videos/1_ep0.mp4").is_none());
    }

    #[tokio::test]
    async fn test_update_rejects_foreign_video_key() {
        let pool = db::test_pool().await.unwrap();
        let course = course_with_episodes(&pool, &[0]).await;
        let episode = list_episodes(&pool, &course.id).await.unwrap().remove(0);

        let result = update_episode(
            &pool,
            None,
            &course.id,
            &episode.id,
            EpisodeUpdate {
                video_key: Some("someone-elses/file.mp4".to_string()),
                ..EpisodeUpdate::default()
            },
        )
        .await;
        assert!(matches!(result, Err(CourseError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_delete_course_removes_media() {
        let pool = db::test_pool().await.unwrap();
        let memory = Arc::new(MemoryGateway::new());
        let gateway: Arc<dyn ObjectGateway> = memory.clone();
        let course = course_with_episodes(&pool, &[0, 1]).await;
        for order in [0, 1] {
            memory
                .put_object(
                    Visibility::Private,
                    &format!("episodes/videos/1_ep{}.mp4", order),
                    Bytes::from_static(b"video"),
                    "video/mp4",
                )
                .await
                .unwrap();
        }

        delete_course(&pool, Some(&gateway), &course.id).await.unwrap();

        assert!(matches!(
            get_course(&pool, &course.id).await,
            Err(CourseError::NotFound(_))
        ));
        assert!(list_episodes(&pool, &course.id).await.unwrap().is_empty());
        assert!(memory.object(Visibility::Private, "episodes/videos/1_ep0.mp4").is_none());
        assert!(memory.object(Visibility::Private, "episodes/videos/1_ep1.mp4").is_none());
    }
}
