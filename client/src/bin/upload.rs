use anyhow::Context;
use clap::{Parser, ValueEnum};
use client::{upload_file_with_retry, DriverConfig, HttpUploadApi, UploadSource, Uploader};
use shared::{PreviewUploadResponse, PublicUploadResponse};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Kind {
    /// Chunked multipart upload of an episode video.
    Video,
    /// Whole-file upload of an episode video.
    SmallVideo,
    CourseThumbnail,
    EpisodeThumbnail,
}

#[derive(Debug, Parser)]
#[command(about = "Upload course media to an episodic server.")]
struct Args {
    #[arg(env = "EPISODIC_SERVER_URL", long, default_value = "http://127.0.0.1:3000")]
    server: String,
    /// Admin session token.
    #[arg(env = "EPISODIC_SESSION_TOKEN", long)]
    token: String,
    #[arg(long, value_enum, default_value = "video")]
    kind: Kind,
    #[arg(long)]
    content_type: Option<String>,
    /// Bytes per part, from 5 MiB up to 60 MiB.
    #[arg(long, default_value_t = shared::DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,
    /// Attempts per part before the upload is aborted.
    #[arg(long, default_value_t = 1)]
    part_attempts: u32,
    file: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let api = HttpUploadApi::new(&args.server, Some(args.token.clone()));
    let source = UploadSource::open(&args.file, args.content_type.as_deref())
        .await
        .with_context(|| format!("cannot read {}", args.file.display()))?;

    match args.kind {
        Kind::Video => upload_video(api, source, &args).await,
        Kind::SmallVideo => {
            let res: PreviewUploadResponse =
                upload_file_with_retry(&api, "/admin/upload-episode-video", "video", &source).await?;
            println!("{}\n{}", res.key, res.preview_url);
            Ok(())
        }
        Kind::CourseThumbnail | Kind::EpisodeThumbnail => {
            let path = match args.kind {
                Kind::CourseThumbnail => "/admin/upload-course-thumbnail",
                _ => "/admin/upload-episode-thumbnail",
            };
            let res: PublicUploadResponse =
                upload_file_with_retry(&api, path, "thumbnail", &source).await?;
            println!("{}\n{}", res.key, res.public_url);
            Ok(())
        }
    }
}

async fn upload_video(api: HttpUploadApi, source: UploadSource, args: &Args) -> anyhow::Result<()> {
    let uploader = Uploader::new(
        api,
        DriverConfig {
            chunk_size: args.chunk_size,
            part_attempts: args.part_attempts,
            ..DriverConfig::default()
        },
    );
    let session = uploader.begin(source)?;

    let cancel = session.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, aborting upload");
            cancel.cancel();
        }
    });

    let mut progress = session.progress();
    let reporter = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let p = progress.borrow_and_update().clone();
            log::info!(
                "{:?}: {}/{} parts ({}%)",
                p.state,
                p.completed_parts,
                p.total_parts,
                p.percent()
            );
        }
    });

    let result = session.run().await;
    let _ = reporter.await;

    let done = result?;
    println!("{}\n{}", done.key, done.location);
    Ok(())
}
