//! Enrollment and sequential unlocking of episodes.
//!
//! An episode is unlocked when it has the lowest order in its course, or
//! when the episode at `order - 1` was completed by the account.

use shared::{EpisodeAccess, EpisodeView};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::Account;
use crate::courses::{self, CourseError, Episode, Result};
use crate::db::Pool;
use crate::storage::ObjectGateway;

pub const PLAYBACK_URL_TTL: Duration = Duration::from_secs(30 * 60);

pub fn is_unlocked(order: i64, first_order: Option<i64>, completed: &HashSet<i64>) -> bool {
    first_order == Some(order) || completed.contains(&(order - 1))
}

pub async fn completed_orders(pool: &Pool, account_id: &str, course_id: &str) -> Result<HashSet<i64>> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT episode_order FROM episode_progress WHERE account_id = ? AND course_id = ?",
    )
    .bind(account_id)
    .bind(course_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(order,)| order).collect())
}

pub async fn ensure_enrollment(pool: &Pool, account_id: &str, course_id: &str) -> Result<()> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO enrollments (account_id, course_id, enrolled_at) VALUES (?, ?, ?)",
    )
    .bind(account_id)
    .bind(course_id)
    .bind(chrono::Utc::now().timestamp_millis())
    .execute(pool)
    .await?;
    if result.rows_affected() > 0 {
        log::info!("Enrolled {} in course {}", account_id, course_id);
    }
    Ok(())
}

/// Episode listing with lock and completion flags. An empty `completed`
/// set is what an anonymous visitor sees.
pub fn episode_views(
    episodes: &[Episode],
    completed: &HashSet<i64>,
    public_url: impl Fn(&str) -> String,
) -> Vec<EpisodeView> {
    let first_order = episodes.iter().map(|e| e.order).min();
    episodes
        .iter()
        .map(|e| EpisodeView {
            id: e.id.clone(),
            title: e.title.clone(),
            description: e.description.clone(),
            order: e.order,
            duration: e.duration,
            thumbnail_key: e.thumbnail_key.clone(),
            thumbnail_public_url: e.thumbnail_key.as_deref().map(&public_url),
            completed: completed.contains(&e.order),
            locked: !is_unlocked(e.order, first_order, completed),
        })
        .collect()
}

pub async fn course_detail(
    pool: &Pool,
    gateway: Option<&Arc<dyn ObjectGateway>>,
    course_id: &str,
    account: Option<&Account>,
) -> Result<shared::CourseDetail> {
    let course = courses::get_course(pool, course_id).await?;
    let episodes = courses::list_episodes(pool, course_id).await?;
    let completed = match account {
        Some(account) => completed_orders(pool, &account.id, course_id).await?,
        None => HashSet::new(),
    };

    let public_url = |key: &str| match gateway {
        Some(g) => g.public_url(key),
        None => crate::storage::public_url_for(None, key),
    };
    let views = episode_views(&episodes, &completed, public_url);
    Ok(course.detail(views, public_url))
}

fn find_episode(episodes: &[Episode], order: i64) -> Result<&Episode> {
    episodes
        .iter()
        .find(|e| e.order == order)
        .ok_or(CourseError::NotFound("Episode"))
}

/// Grants playback of one episode: enrolls the account on first access,
/// enforces the unlock rule and issues a short-lived signed URL.
pub async fn episode_access(
    pool: &Pool,
    gateway: Option<&Arc<dyn ObjectGateway>>,
    account: &Account,
    course_id: &str,
    order: i64,
) -> Result<EpisodeAccess> {
    courses::get_course(pool, course_id).await?;
    let episodes = courses::list_episodes(pool, course_id).await?;
    let episode = find_episode(&episodes, order)?;

    ensure_enrollment(pool, &account.id, course_id).await?;
    let completed = completed_orders(pool, &account.id, course_id).await?;
    let first_order = episodes.iter().map(|e| e.order).min();
    if !is_unlocked(order, first_order, &completed) {
        return Err(CourseError::Locked);
    }

    let video_key = episode
        .video_key
        .as_deref()
        .ok_or(CourseError::NotFound("Episode video"))?;
    let gateway = gateway.ok_or(CourseError::StorageUnavailable)?;
    let signed_url = gateway.signed_get_url(video_key, PLAYBACK_URL_TTL).await?;

    sqlx::query(
        "UPDATE enrollments SET last_accessed_order = ? WHERE account_id = ? AND course_id = ?",
    )
    .bind(order)
    .bind(&account.id)
    .bind(course_id)
    .execute(pool)
    .await?;

    let view = episode_views(std::slice::from_ref(episode), &completed, |k| gateway.public_url(k))
        .remove(0);
    Ok(EpisodeAccess {
        signed_url,
        episode: EpisodeView {
            locked: false,
            ..view
        },
    })
}

/// Records completion of an unlocked episode. Repeating it is a no-op.
pub async fn mark_completed(pool: &Pool, account: &Account, course_id: &str, order: i64) -> Result<()> {
    courses::get_course(pool, course_id).await?;
    let episodes = courses::list_episodes(pool, course_id).await?;
    find_episode(&episodes, order)?;

    ensure_enrollment(pool, &account.id, course_id).await?;
    let completed = completed_orders(pool, &account.id, course_id).await?;
    let first_order = episodes.iter().map(|e| e.order).min();
    if !is_unlocked(order, first_order, &completed) {
        return Err(CourseError::Locked);
    }

    sqlx::query(
        "INSERT OR IGNORE INTO episode_progress (account_id, course_id, episode_order, completed_at)
         VALUES (?, ?, ?, ?)",
    )
    .bind(&account.id)
    .bind(course_id)
    .bind(order)
    .bind(chrono::Utc::now().timestamp_millis())
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth;
    use crate::config::Config;
    use crate::courses::tests::course_with_episodes;
    use crate::db;
    use crate::storage::MemoryGateway;

    async fn subscriber(pool: &Pool) -> Account {
        let config = Config::default();
        let result = auth::tests::login(pool, &config, "learner@example.com").await;
        auth::find_account(pool, &result.account.id).await.unwrap().unwrap()
    }

    fn gateway() -> Arc<dyn ObjectGateway> {
        Arc::new(MemoryGateway::new())
    }

    #[test]
    fn test_unlock_rule() {
        let completed: HashSet<i64> = [1].into_iter().collect();
        assert!(is_unlocked(1, Some(1), &HashSet::new()));
        assert!(!is_unlocked(2, Some(1), &HashSet::new()));
        assert!(is_unlocked(2, Some(1), &completed));
        assert!(!is_unlocked(3, Some(1), &completed));
    }

    #[tokio::test]
    async fn test_anonymous_detail_only_unlocks_first() {
        let pool = db::test_pool().await.unwrap();
        let course = course_with_episodes(&pool, &[1, 2, 3]).await;

        let detail = course_detail(&pool, None, &course.id, None).await.unwrap();
        let locked: Vec<bool> = detail.episodes.iter().map(|e| e.locked).collect();
        assert_eq!(locked, vec![false, true, true]);
    }

    #[tokio::test]
    async fn test_locked_episode_is_refused() {
        let pool = db::test_pool().await.unwrap();
        let account = subscriber(&pool).await;
        let course = course_with_episodes(&pool, &[1, 2]).await;
        let gateway = gateway();

        let result = episode_access(&pool, Some(&gateway), &account, &course.id, 2).await;
        assert!(matches!(result, Err(CourseError::Locked)));
    }

    #[tokio::test]
    async fn test_completing_unlocks_next_episode() {
        let pool = db::test_pool().await.unwrap();
        let account = subscriber(&pool).await;
        let course = course_with_episodes(&pool, &[1, 2, 3]).await;
        let gateway = gateway();

        let access = episode_access(&pool, Some(&gateway), &account, &course.id, 1)
            .await
            .unwrap();
        assert!(access.signed_url.contains("1_ep1.mp4"));
        assert!(!access.episode.locked);

        mark_completed(&pool, &account, &course.id, 1).await.unwrap();
        mark_completed(&pool, &account, &course.id, 1).await.unwrap();

        let access = episode_access(&pool, Some(&gateway), &account, &course.id, 2).await;
        assert!(access.is_ok());

        let detail = course_detail(&pool, Some(&gateway), &course.id, Some(&account))
            .await
            .unwrap();
        let flags: Vec<(bool, bool)> = detail
            .episodes
            .iter()
            .map(|e| (e.completed, e.locked))
            .collect();
        assert_eq!(flags, vec![(true, false), (false, false), (false, true)]);
    }

    #[tokio::test]
    async fn test_gap_in_orders_keeps_later_episode_locked() {
        let pool = db::test_pool().await.unwrap();
        let account = subscriber(&pool).await;
        let course = course_with_episodes(&pool, &[1, 3]).await;

        mark_completed(&pool, &account, &course.id, 1).await.unwrap();
        let result = mark_completed(&pool, &account, &course.id, 3).await;
        assert!(matches!(result, Err(CourseError::Locked)));
    }

    #[tokio::test]
    async fn test_missing_episode() {
        let pool = db::test_pool().await.unwrap();
        let account = subscriber(&pool).await;
        let course = course_with_episodes(&pool, &[1]).await;
        let gateway = gateway();

        let result = episode_access(&pool, Some(&gateway), &account, &course.id, 9).await;
        assert!(matches!(result, Err(CourseError::NotFound(_))));
    }
}
