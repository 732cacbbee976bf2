//! Media annotation pipeline
//!
//! Enriches binary media with text: speech-to-text for audio, captioning
//! for images. Model backends are initialized once per batch and only for
//! the categories actually present; per-file failures degrade to empty
//! annotations instead of aborting the batch. Video files are counted but
//! never annotated.

mod caption;
mod transcribe;

pub use caption::{Captioner, HttpCaptioner};
pub use transcribe::{HttpTranscriber, Transcriber, Transcript, TranscriptSegment};

use crate::archive::FileCategory;
use crate::config::Config;
use crate::error::Result;
use async_trait::async_trait;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Closed vocabulary of folder names used to group media tables
pub const SEMANTIC_BUCKETS: [&str; 4] = ["stories", "posts", "profile", "reels"];

/// Time bucket value for media whose path carries no 6-digit segment
pub const UNKNOWN_TIME_BUCKET: &str = "unknown";

/// Semantic bucket for media outside the known folder vocabulary
pub const DEFAULT_SEMANTIC_BUCKET: &str = "other";

/// Extract the 6-digit time bucket (year-month folder) from a path
pub fn time_bucket(path: &Path) -> Option<String> {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .find(|part| part.len() == 6 && part.chars().all(|c| c.is_ascii_digit()))
        .map(|part| part.into_owned())
}

/// Pick the semantic storage bucket from the path's folder names
pub fn semantic_bucket(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .find(|part| SEMANTIC_BUCKETS.contains(&part.as_ref()))
        .map(|part| part.into_owned())
        .unwrap_or_else(|| DEFAULT_SEMANTIC_BUCKET.to_string())
}

/// Category-specific annotation payload
#[derive(Debug, Clone)]
pub enum AnnotationPayload {
    Audio {
        text: String,
        segments: Vec<TranscriptSegment>,
        language: String,
        duration_secs: Option<f64>,
        bitrate_bps: Option<u64>,
    },
    Image {
        caption: String,
        width: u32,
        height: u32,
        format: String,
        mode: String,
    },
}

/// One annotated media file
#[derive(Debug, Clone)]
pub struct MediaAnnotation {
    pub category: FileCategory,
    pub path: PathBuf,
    pub time_bucket: String,
    pub semantic_bucket: String,
    pub payload: AnnotationPayload,
}

impl MediaAnnotation {
    /// Whether this annotation carries a real time bucket and may be persisted
    pub fn has_time_bucket(&self) -> bool {
        self.time_bucket != UNKNOWN_TIME_BUCKET
    }

    /// The textual content of this annotation, if any (for passage indexing)
    pub fn text_content(&self) -> Option<&str> {
        let text = match &self.payload {
            AnnotationPayload::Audio { text, .. } => text.as_str(),
            AnnotationPayload::Image { caption, .. } => caption.as_str(),
        };
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// Batch-scoped model handles, initialized once per ingestion run
///
/// Only the families needed by the batch are loaded; a load failure is a
/// job-level error because no file of that category could be processed.
pub struct ModelHandles {
    transcriber: Option<Box<dyn Transcriber>>,
    captioner: Option<Box<dyn Captioner>>,
}

impl ModelHandles {
    /// Initialize the model families required by the batch
    pub async fn initialize(config: &Config, needs_audio: bool, needs_images: bool) -> Result<Self> {
        let transcriber: Option<Box<dyn Transcriber>> = if needs_audio {
            Some(Box::new(HttpTranscriber::connect(&config.transcribe).await?))
        } else {
            None
        };

        let captioner: Option<Box<dyn Captioner>> = if needs_images {
            Some(Box::new(
                HttpCaptioner::connect(&config.caption, &config.chat).await?,
            ))
        } else {
            None
        };

        Ok(Self { transcriber, captioner })
    }

    /// Assemble handles from already-built backends (used by tests)
    pub fn from_parts(
        transcriber: Option<Box<dyn Transcriber>>,
        captioner: Option<Box<dyn Captioner>>,
    ) -> Self {
        Self { transcriber, captioner }
    }
}

/// Seam for batch-scoped model initialization
#[async_trait]
pub trait AnnotationModels: Send + Sync {
    /// Load the model families the batch needs; failures are job-level
    async fn initialize(&self, needs_audio: bool, needs_images: bool) -> Result<ModelHandles>;
}

/// Production implementation backed by the HTTP inference servers
pub struct HttpAnnotationModels<'a> {
    pub config: &'a Config,
}

#[async_trait]
impl AnnotationModels for HttpAnnotationModels<'_> {
    async fn initialize(&self, needs_audio: bool, needs_images: bool) -> Result<ModelHandles> {
        ModelHandles::initialize(self.config, needs_audio, needs_images).await
    }
}

/// Annotate a batch of media files
///
/// Every input file yields exactly one annotation; failures are logged and
/// produce records with empty text so the batch never aborts.
pub async fn annotate_batch(
    audio_files: &[PathBuf],
    image_files: &[PathBuf],
    models: &ModelHandles,
) -> Vec<MediaAnnotation> {
    let mut annotations = Vec::with_capacity(audio_files.len() + image_files.len());

    for path in audio_files {
        info!("Processing audio file {:?}", path);
        annotations.push(annotate_audio(path, models.transcriber.as_deref()).await);
    }

    for path in image_files {
        info!("Processing image file {:?}", path);
        annotations.push(annotate_image(path, models.captioner.as_deref()).await);
    }

    info!("Batch annotation completed: {} records", annotations.len());
    annotations
}

async fn annotate_audio(path: &Path, transcriber: Option<&dyn Transcriber>) -> MediaAnnotation {
    let file_size = std::fs::metadata(path).map(|m| m.len()).ok();

    let transcript = match transcriber {
        Some(transcriber) => match transcriber.transcribe(path).await {
            Ok(transcript) => transcript,
            Err(e) => {
                warn!("Error processing audio file {:?}: {}", path, e);
                Transcript::default()
            }
        },
        None => Transcript::default(),
    };

    // Bitrate from container size over decoded duration; good enough for a
    // metadata column, no container parsing involved.
    let bitrate_bps = match (file_size, transcript.duration_secs) {
        (Some(bytes), Some(duration)) if duration > 0.0 => {
            Some((bytes as f64 * 8.0 / duration) as u64)
        }
        _ => None,
    };

    MediaAnnotation {
        category: FileCategory::Audio,
        path: path.to_path_buf(),
        time_bucket: time_bucket(path).unwrap_or_else(|| UNKNOWN_TIME_BUCKET.to_string()),
        semantic_bucket: semantic_bucket(path),
        payload: AnnotationPayload::Audio {
            text: transcript.text,
            segments: transcript.segments,
            language: transcript.language,
            duration_secs: transcript.duration_secs,
            bitrate_bps,
        },
    }
}

async fn annotate_image(path: &Path, captioner: Option<&dyn Captioner>) -> MediaAnnotation {
    let mut caption = String::new();
    let mut width = 0;
    let mut height = 0;
    let mut format = String::new();
    let mut mode = String::new();

    match image::open(path) {
        Ok(img) => {
            width = img.width();
            height = img.height();
            format = image::ImageFormat::from_path(path)
                .map(|f| format!("{:?}", f))
                .unwrap_or_default();
            mode = format!("{:?}", img.color());

            if let Some(captioner) = captioner {
                // Captioning models expect 3-channel input
                let rgb = image::DynamicImage::ImageRgb8(img.to_rgb8());
                let mut png = Cursor::new(Vec::new());
                match rgb.write_to(&mut png, image::ImageFormat::Png) {
                    Ok(()) => {
                        debug!("Getting description for image {:?}", path);
                        match captioner.caption(png.get_ref()).await {
                            Ok(text) => caption = text,
                            Err(e) => warn!("Error captioning image {:?}: {}", path, e),
                        }
                    }
                    Err(e) => warn!("Error re-encoding image {:?}: {}", path, e),
                }
            }
        }
        Err(e) => warn!("Error reading image {:?}: {}", path, e),
    }

    MediaAnnotation {
        category: FileCategory::Image,
        path: path.to_path_buf(),
        time_bucket: time_bucket(path).unwrap_or_else(|| UNKNOWN_TIME_BUCKET.to_string()),
        semantic_bucket: semantic_bucket(path),
        payload: AnnotationPayload::Image {
            caption,
            width,
            height,
            format,
            mode,
        },
    }
}
