use bytes::{BufMut, Bytes};
use futures::TryStreamExt;
use serde::Serialize;
use shared::{
    AbortUploadRequest, AbortUploadResponse, AccountView, CompleteUploadRequest,
    CompleteUploadResponse, ErrorMessage, PresignUploadRequest, StartUploadRequest,
    StartUploadResponse, UploadPartResponse,
};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use warp::http::StatusCode;
use warp::multipart::FormData;
use warp::{Filter, Rejection, Reply};

use crate::auth::{self, Account, StartAuthRequest, VerifyAuthRequest};
use crate::config::Config;
use crate::courses::{self, CourseInput, CourseUpdate, EpisodeInput, EpisodeUpdate};
use crate::db;
use crate::email::Mailer;
use crate::error::{from_anyhow, ApiRejection};
use crate::multipart::Coordinator;
use crate::progress;
use crate::retry::RetryConfig;
use crate::storage::{ObjectGateway, S3Gateway};
use crate::uploads::{self, ThumbnailTarget, UploadedFile};
use crate::webhooks::{self, WebhookEvent, SIGNATURE_HEADER};

const SESSION_COOKIE: &str = "session";
const SESSION_COOKIE_MAX_AGE: u64 = 30 * 24 * 60 * 60;
const JSON_BODY_LIMIT: u64 = 256 * 1024;
const FORM_OVERHEAD: u64 = 1024 * 1024;
/// One driver chunk plus the form envelope.
const PART_FORM_LIMIT: u64 = shared::MAX_PART_SIZE as u64 + FORM_OVERHEAD;
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Clone)]
pub struct AppState {
    pub pool: db::Pool,
    pub config: Arc<Config>,
    pub gateway: Option<Arc<dyn ObjectGateway>>,
    pub coordinator: Coordinator,
    pub mailer: Mailer,
    pub video_retry: RetryConfig,
}

impl AppState {
    pub fn new(pool: db::Pool, config: Arc<Config>, gateway: Option<Arc<dyn ObjectGateway>>) -> Self {
        AppState {
            mailer: Mailer::new(&config),
            coordinator: Coordinator::new(gateway.clone(), RetryConfig::default()),
            video_retry: RetryConfig::default(),
            pool,
            config,
            gateway,
        }
    }
}

pub async fn run(address: std::net::SocketAddr, database_url: &str) -> anyhow::Result<()> {
    let pool = db::pool(database_url).await?;
    let config = Arc::new(crate::config::config().clone());

    let gateway: Option<Arc<dyn ObjectGateway>> = match &config.s3 {
        Some(s3) => Some(Arc::new(S3Gateway::new(s3)?)),
        None => None,
    };

    let cleanup_pool = pool.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = auth::cleanup_expired(&cleanup_pool).await {
                log::warn!("Session cleanup failed: {}", e);
            }
        }
    });

    let state = AppState::new(pool, config, gateway);
    log::info!("Listening on {}", address);
    warp::serve(routes(state)).run(address).await;
    Ok(())
}

pub fn routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let health_route = warp::path!("health")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(health);

    health_route
        .or(auth_routes(state.clone()))
        .or(catalog_routes(state.clone()))
        .or(admin_course_routes(state.clone()))
        .or(upload_routes(state.clone()))
        .or(webhook_route(state))
        .recover(rejection)
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn json_body<T: serde::de::DeserializeOwned + Send>(
) -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(JSON_BODY_LIMIT).and(warp::body::json())
}

// ============================================================================
// Session filters
// ============================================================================

/// Bearer token from the `Authorization` header, else the session cookie.
fn session_token() -> impl Filter<Extract = (Option<String>,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(warp::cookie::optional::<String>(SESSION_COOKIE))
        .map(|header: Option<String>, cookie: Option<String>| {
            header
                .and_then(|h| h.strip_prefix("Bearer ").map(|t| t.trim().to_string()))
                .filter(|t| !t.is_empty())
                .or_else(|| cookie.filter(|c| !c.is_empty()))
        })
}

fn with_account(state: AppState) -> impl Filter<Extract = (Option<Account>,), Error = Rejection> + Clone {
    session_token()
        .and(with_state(state))
        .and_then(|token: Option<String>, state: AppState| async move {
            match token {
                None => Ok(None),
                Some(token) => auth::validate_session(&state.pool, &token)
                    .await
                    .map_err(|e| Rejection::from(ApiRejection::internal(e))),
            }
        })
}

fn authenticated(state: AppState) -> impl Filter<Extract = (Account,), Error = Rejection> + Clone {
    with_account(state).and_then(|account: Option<Account>| async move {
        account.ok_or_else(|| Rejection::from(ApiRejection::unauthorized()))
    })
}

fn require_admin(state: AppState) -> impl Filter<Extract = (Account,), Error = Rejection> + Clone {
    authenticated(state).and_then(|account: Account| async move {
        if account.is_admin() {
            Ok(account)
        } else {
            Err(Rejection::from(ApiRejection::forbidden("Admin access required")))
        }
    })
}

fn require_subscription(state: AppState) -> impl Filter<Extract = (Account,), Error = Rejection> + Clone {
    authenticated(state).and_then(|account: Account| async move {
        if account.has_access() {
            Ok(account)
        } else {
            Err(Rejection::from(ApiRejection::forbidden("Subscription required")))
        }
    })
}

// ============================================================================
// Auth
// ============================================================================

fn auth_routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let start = warp::path!("api" / "auth" / "start")
        .and(warp::post())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(start_auth);

    let verify = warp::path!("api" / "auth" / "verify")
        .and(warp::post())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(verify_auth);

    let logout_route = warp::path!("api" / "logout")
        .and(warp::post())
        .and(session_token())
        .and(with_state(state.clone()))
        .and_then(logout);

    let me = warp::path!("me")
        .and(warp::get())
        .and(authenticated(state))
        .map(|account: Account| warp::reply::json(&AccountView::from(&account)));

    start.or(verify).or(logout_route).or(me)
}

#[derive(Serialize)]
struct Acknowledged {
    ok: bool,
}

fn ok() -> warp::reply::Json {
    warp::reply::json(&Acknowledged { ok: true })
}

async fn health(state: AppState) -> Result<impl Reply, Rejection> {
    db::health(&state.pool)
        .await
        .map_err(ApiRejection::internal)?;
    Ok(StatusCode::OK)
}

async fn start_auth(req: StartAuthRequest, state: AppState) -> Result<impl Reply, Rejection> {
    auth::start_auth(&state.pool, &state.mailer, &req.email)
        .await
        .map_err(from_anyhow)?;
    Ok(ok())
}

async fn verify_auth(req: VerifyAuthRequest, state: AppState) -> Result<impl Reply, Rejection> {
    let result = auth::verify_auth(&state.pool, &state.config, &req.email, &req.code)
        .await
        .map_err(from_anyhow)?;
    let cookie = format!(
        "{}={}; HttpOnly; Path=/; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE, result.session_token, SESSION_COOKIE_MAX_AGE
    );
    Ok(warp::reply::with_header(
        warp::reply::json(&result),
        "set-cookie",
        cookie,
    ))
}

async fn logout(token: Option<String>, state: AppState) -> Result<impl Reply, Rejection> {
    if let Some(token) = token {
        auth::logout(&state.pool, &token)
            .await
            .map_err(ApiRejection::internal)?;
    }
    Ok(warp::reply::with_header(
        ok(),
        "set-cookie",
        format!("{}=; HttpOnly; Path=/; Max-Age=0", SESSION_COOKIE),
    ))
}

// ============================================================================
// Catalog & progress
// ============================================================================

fn catalog_routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let list = warp::path!("api" / "courses")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(list_courses);

    let detail = warp::path!("api" / "courses" / String)
        .and(warp::get())
        .and(with_account(state.clone()))
        .and(with_state(state.clone()))
        .and_then(course_detail);

    let episode = warp::path!("api" / "courses" / String / "episodes" / i64)
        .and(warp::get())
        .and(require_subscription(state.clone()))
        .and(with_state(state.clone()))
        .and_then(episode_access);

    let complete = warp::path!("api" / "courses" / String / "episodes" / i64 / "complete")
        .and(warp::post())
        .and(require_subscription(state.clone()))
        .and(with_state(state))
        .and_then(complete_episode);

    list.or(detail).or(episode).or(complete)
}

async fn list_courses(state: AppState) -> Result<impl Reply, Rejection> {
    let gateway = state.gateway.clone();
    let summaries = courses::list_courses(&state.pool, |key| public_url(gateway.as_ref(), key))
        .await
        .map_err(ApiRejection::from)?;
    Ok(warp::reply::json(&summaries))
}

fn public_url(gateway: Option<&Arc<dyn ObjectGateway>>, key: &str) -> String {
    match gateway {
        Some(g) => g.public_url(key),
        None => crate::storage::public_url_for(None, key),
    }
}

async fn course_detail(
    course_id: String,
    account: Option<Account>,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let detail = progress::course_detail(&state.pool, state.gateway.as_ref(), &course_id, account.as_ref())
        .await
        .map_err(ApiRejection::from)?;
    Ok(warp::reply::json(&detail))
}

async fn episode_access(
    course_id: String,
    order: i64,
    account: Account,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let access = progress::episode_access(&state.pool, state.gateway.as_ref(), &account, &course_id, order)
        .await
        .map_err(ApiRejection::from)?;
    Ok(warp::reply::json(&access))
}

async fn complete_episode(
    course_id: String,
    order: i64,
    account: Account,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    progress::mark_completed(&state.pool, &account, &course_id, order)
        .await
        .map_err(ApiRejection::from)?;
    Ok(ok())
}

// ============================================================================
// Admin course management
// ============================================================================

fn admin_course_routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let create_course = warp::path!("admin" / "courses")
        .and(warp::post())
        .and(require_admin(state.clone()))
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(create_course);

    let update_course = warp::path!("admin" / "courses" / String)
        .and(warp::put())
        .and(require_admin(state.clone()))
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(update_course);

    let delete_course = warp::path!("admin" / "courses" / String)
        .and(warp::delete())
        .and(require_admin(state.clone()))
        .and(with_state(state.clone()))
        .and_then(delete_course);

    let list_episodes = warp::path!("admin" / "courses" / String / "episodes")
        .and(warp::get())
        .and(require_admin(state.clone()))
        .and(with_state(state.clone()))
        .and_then(list_episodes);

    let create_episode = warp::path!("admin" / "courses" / String / "episodes")
        .and(warp::post())
        .and(require_admin(state.clone()))
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(create_episode);

    let update_episode = warp::path!("admin" / "courses" / String / "episodes" / String)
        .and(warp::put())
        .and(require_admin(state.clone()))
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(update_episode);

    let delete_episode = warp::path!("admin" / "courses" / String / "episodes" / String)
        .and(warp::delete())
        .and(require_admin(state.clone()))
        .and(with_state(state))
        .and_then(delete_episode);

    create_course
        .or(update_course)
        .or(delete_course)
        .or(list_episodes)
        .or(create_episode)
        .or(update_episode)
        .or(delete_episode)
}

async fn create_course(admin: Account, input: CourseInput, state: AppState) -> Result<impl Reply, Rejection> {
    let course = courses::create_course(&state.pool, input, Some(&admin.id))
        .await
        .map_err(ApiRejection::from)?;
    Ok(warp::reply::with_status(
        warp::reply::json(&course),
        StatusCode::CREATED,
    ))
}

async fn update_course(
    course_id: String,
    _admin: Account,
    update: CourseUpdate,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let course = courses::update_course(&state.pool, state.gateway.as_ref(), &course_id, update)
        .await
        .map_err(ApiRejection::from)?;
    Ok(warp::reply::json(&course))
}

async fn delete_course(course_id: String, _admin: Account, state: AppState) -> Result<impl Reply, Rejection> {
    courses::delete_course(&state.pool, state.gateway.as_ref(), &course_id)
        .await
        .map_err(ApiRejection::from)?;
    Ok(ok())
}

async fn list_episodes(course_id: String, _admin: Account, state: AppState) -> Result<impl Reply, Rejection> {
    courses::get_course(&state.pool, &course_id)
        .await
        .map_err(ApiRejection::from)?;
    let episodes = courses::list_episodes(&state.pool, &course_id)
        .await
        .map_err(ApiRejection::from)?;
    Ok(warp::reply::json(&episodes))
}

async fn create_episode(
    course_id: String,
    _admin: Account,
    input: EpisodeInput,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let episode = courses::create_episode(&state.pool, &course_id, input)
        .await
        .map_err(ApiRejection::from)?;
    Ok(warp::reply::with_status(
        warp::reply::json(&episode),
        StatusCode::CREATED,
    ))
}

async fn update_episode(
    course_id: String,
    episode_id: String,
    _admin: Account,
    update: EpisodeUpdate,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let episode =
        courses::update_episode(&state.pool, state.gateway.as_ref(), &course_id, &episode_id, update)
            .await
            .map_err(ApiRejection::from)?;
    Ok(warp::reply::json(&episode))
}

async fn delete_episode(
    course_id: String,
    episode_id: String,
    _admin: Account,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    courses::delete_episode(&state.pool, state.gateway.as_ref(), &course_id, &episode_id)
        .await
        .map_err(ApiRejection::from)?;
    Ok(ok())
}

// ============================================================================
// Uploads
// ============================================================================

fn upload_routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let thumbnail_limit = state.config.thumbnail_max_bytes + FORM_OVERHEAD;
    let video_limit = state.config.video_max_bytes + FORM_OVERHEAD;

    let course_thumbnail = warp::path!("admin" / "upload-course-thumbnail")
        .and(warp::post())
        .and(require_admin(state.clone()))
        .and(warp::multipart::form().max_length(thumbnail_limit))
        .and(with_state(state.clone()))
        .and_then(|admin: Account, form: FormData, state: AppState| {
            upload_thumbnail(ThumbnailTarget::Course, admin, form, state)
        });

    let episode_thumbnail = warp::path!("admin" / "upload-episode-thumbnail")
        .and(warp::post())
        .and(require_admin(state.clone()))
        .and(warp::multipart::form().max_length(thumbnail_limit))
        .and(with_state(state.clone()))
        .and_then(|admin: Account, form: FormData, state: AppState| {
            upload_thumbnail(ThumbnailTarget::Episode, admin, form, state)
        });

    let episode_video = warp::path!("admin" / "upload-episode-video")
        .and(warp::post())
        .and(require_admin(state.clone()))
        .and(warp::multipart::form().max_length(video_limit))
        .and(with_state(state.clone()))
        .and_then(upload_video);

    let presign = warp::path!("admin" / "presign-upload")
        .and(warp::post())
        .and(require_admin(state.clone()))
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(presign_upload);

    let start = warp::path!("admin" / "multipart" / "start-video-upload")
        .and(warp::post())
        .and(require_admin(state.clone()))
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(start_upload);

    let part = warp::path!("admin" / "multipart" / "upload-part")
        .and(warp::post())
        .and(require_admin(state.clone()))
        .and(warp::multipart::form().max_length(PART_FORM_LIMIT))
        .and(with_state(state.clone()))
        .and_then(upload_part);

    let complete = warp::path!("admin" / "multipart" / "complete-video-upload")
        .and(warp::post())
        .and(require_admin(state.clone()))
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(complete_upload);

    let abort = warp::path!("admin" / "multipart" / "abort")
        .and(warp::post())
        .and(require_admin(state.clone()))
        .and(json_body())
        .and(with_state(state))
        .and_then(abort_upload);

    course_thumbnail
        .or(episode_thumbnail)
        .or(episode_video)
        .or(presign)
        .or(start)
        .or(part)
        .or(complete)
        .or(abort)
}

struct FormField {
    filename: Option<String>,
    content_type: Option<String>,
    data: Bytes,
}

impl FormField {
    fn text(&self) -> Result<&str, ApiRejection> {
        std::str::from_utf8(&self.data)
            .map(str::trim)
            .map_err(|_| ApiRejection::bad_request("form field is not valid UTF-8"))
    }
}

async fn read_form(form: FormData) -> Result<HashMap<String, FormField>, Rejection> {
    let parts: Vec<warp::multipart::Part> = form
        .try_collect()
        .await
        .map_err(|e| ApiRejection::bad_request(format!("invalid multipart form: {}", e)))?;

    let mut fields = HashMap::new();
    for part in parts {
        let name = part.name().to_string();
        let filename = part.filename().map(str::to_string);
        let content_type = part.content_type().map(str::to_string);
        let data = part
            .stream()
            .try_fold(Vec::new(), |mut acc, buf| async move {
                acc.put(buf);
                Ok(acc)
            })
            .await
            .map_err(|e| ApiRejection::bad_request(format!("failed to read form field: {}", e)))?;
        fields.insert(
            name,
            FormField {
                filename,
                content_type,
                data: Bytes::from(data),
            },
        );
    }
    Ok(fields)
}

fn take_file(fields: &mut HashMap<String, FormField>, name: &str) -> Result<UploadedFile, ApiRejection> {
    let field = fields
        .remove(name)
        .ok_or_else(|| ApiRejection::bad_request(format!("No {} uploaded", name)))?;
    Ok(UploadedFile {
        filename: field.filename.unwrap_or_else(|| name.to_string()),
        content_type: field.content_type,
        data: field.data,
    })
}

fn text_field<'a>(fields: &'a HashMap<String, FormField>, name: &str) -> Result<&'a str, ApiRejection> {
    fields
        .get(name)
        .ok_or_else(|| ApiRejection::bad_request(format!("{} is required", name)))?
        .text()
}

async fn upload_thumbnail(
    target: ThumbnailTarget,
    _admin: Account,
    form: FormData,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let mut fields = read_form(form).await?;
    let file = take_file(&mut fields, "thumbnail")?;
    let response = uploads::upload_thumbnail(
        state.gateway.as_ref(),
        target,
        file,
        state.config.thumbnail_max_bytes,
    )
    .await
    .map_err(ApiRejection::from)?;
    Ok(warp::reply::json(&response))
}

async fn upload_video(_admin: Account, form: FormData, state: AppState) -> Result<impl Reply, Rejection> {
    let mut fields = read_form(form).await?;
    let file = take_file(&mut fields, "video")?;
    let response = uploads::upload_video(
        state.gateway.as_ref(),
        file,
        state.config.video_max_bytes,
        &state.video_retry,
    )
    .await
    .map_err(ApiRejection::from)?;
    Ok(warp::reply::json(&response))
}

async fn presign_upload(
    _admin: Account,
    req: PresignUploadRequest,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let response = uploads::presign_upload(state.gateway.as_ref(), &req.filename, req.content_type.as_deref().unwrap_or(""))
        .await
        .map_err(ApiRejection::from)?;
    Ok(warp::reply::json(&response))
}

async fn start_upload(
    _admin: Account,
    req: StartUploadRequest,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let (key, upload_id) = state
        .coordinator
        .start(&req.filename, req.content_type.as_deref())
        .await
        .map_err(ApiRejection::from)?;
    Ok(warp::reply::json(&StartUploadResponse { key, upload_id }))
}

async fn upload_part(_admin: Account, form: FormData, state: AppState) -> Result<impl Reply, Rejection> {
    let mut fields = read_form(form).await?;
    let key = text_field(&fields, shared::KEY_FIELD)?.to_string();
    let upload_id = text_field(&fields, shared::UPLOAD_ID_FIELD)?.to_string();
    let part_number: u32 = text_field(&fields, shared::PART_NUMBER_FIELD)?
        .parse()
        .map_err(|_| ApiRejection::bad_request("partNumber must be a positive integer"))?;
    let part = fields
        .remove(shared::PART_FIELD)
        .ok_or_else(|| ApiRejection::bad_request("No part uploaded"))?;

    let e_tag = state
        .coordinator
        .upload_part(&key, &upload_id, part_number, part.data)
        .await
        .map_err(ApiRejection::from)?;
    Ok(warp::reply::json(&UploadPartResponse { e_tag }))
}

async fn complete_upload(
    _admin: Account,
    req: CompleteUploadRequest,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let location = state
        .coordinator
        .complete(&req.key, &req.upload_id, &req.parts)
        .await
        .map_err(ApiRejection::from)?;
    Ok(warp::reply::json(&CompleteUploadResponse {
        key: req.key,
        location,
    }))
}

async fn abort_upload(
    _admin: Account,
    req: AbortUploadRequest,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    state
        .coordinator
        .abort(&req.key, &req.upload_id)
        .await
        .map_err(ApiRejection::from)?;
    Ok(warp::reply::json(&AbortUploadResponse { ok: true }))
}

// ============================================================================
// Payments
// ============================================================================

fn webhook_route(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("payments" / "webhook")
        .and(warp::post())
        .and(warp::header::optional::<String>(SIGNATURE_HEADER))
        .and(json_body())
        .and(with_state(state))
        .and_then(payment_webhook)
}

async fn payment_webhook(
    signature: Option<String>,
    event: WebhookEvent,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let status = webhooks::handle_event(
        &state.pool,
        &state.mailer,
        &state.config,
        signature.as_deref(),
        event,
    )
    .await
    .map_err(ApiRejection::from)?;
    Ok(warp::reply::json(&status))
}

// ============================================================================
// Rejections
// ============================================================================

pub async fn rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (code, message) = if let Some(api) = err.find::<ApiRejection>() {
        (api.status, api.message.clone())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found.".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Payload too large.".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed.".to_string())
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error.".to_string(),
        )
    };

    if code.is_server_error() {
        log::error!("Error: {:?}", err);
    } else {
        log::debug!("Rejected with {}: {}", code, message);
    }

    let json = warp::reply::json(&ErrorMessage {
        code: code.as_u16(),
        message,
    });

    Ok(warp::reply::with_status(json, code))
}
