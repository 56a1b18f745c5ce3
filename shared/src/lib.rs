pub mod messages;
pub mod models;

pub use messages::*;
pub use models::*;

/// Chunk size used by the admin client for multipart video uploads.
pub const DEFAULT_CHUNK_SIZE: usize = 20 * 1024 * 1024;

/// S3 rejects non-final parts smaller than this.
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Largest part the server's upload-part route accepts.
pub const MAX_PART_SIZE: usize = 60 * 1024 * 1024;
