//! Ingestion job state machine
//!
//! Drives one archive end to end: extraction, classification, schema
//! inference and media annotation (concurrent), datastore writes, passage
//! indexing, then profile synthesis. The identity record carries the job's
//! externally visible status at every transition. An existing datastore is
//! the idempotency marker: re-entry skips straight to profile synthesis and
//! never rebuilds the store.

use crate::agent::ProfileAnalyzer;
use crate::archive::{extract_archive, scan_files, FileCategory, WorkDir};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::llm::ChatModel;
use crate::media::{annotate_batch, AnnotationModels};
use crate::registry::{IdentityStatus, Registry};
use crate::store::Datastore;
use crate::tables::tables_from_file;
use crate::vector::{passages_from_annotation, passages_from_table, PassageIndexer};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// One ingestion job and its collaborators
pub struct IngestionJob<'a> {
    pub config: &'a Config,
    pub registry: &'a Registry,
    pub chat: &'a dyn ChatModel,
    pub models: &'a dyn AnnotationModels,
    pub indexer: &'a dyn PassageIndexer,
}

impl IngestionJob<'_> {
    /// Run (or re-run) the ingestion job for one identity
    ///
    /// This is also the manual-retry entry point: the idempotency marker
    /// decides whether extraction happens again. All processing failures
    /// land on the identity record as a terminal status; `Err` is reserved
    /// for registry-level failures the job cannot record.
    pub async fn run(&self, identity_id: i64, archive_path: &Path) -> Result<IdentityStatus> {
        self.registry.require_identity(identity_id).await?;

        // Recorded before any extraction so a crash mid-job is observable
        self.registry
            .set_status(
                identity_id,
                IdentityStatus::ProcessingSocialmediaData,
                Some("Started processing social media data"),
            )
            .await?;

        let datastore_path = self.config.datastore_path(identity_id);

        if Datastore::exists(&datastore_path) {
            info!(
                "Datastore already exists for identity {}, skipping to analysis",
                identity_id
            );
            return self.run_analysis(identity_id, &datastore_path, true).await;
        }

        match self
            .ingest_archive(identity_id, archive_path, &datastore_path)
            .await
        {
            Ok(message) => {
                self.registry
                    .set_status(identity_id, IdentityStatus::Concluded, Some(&message))
                    .await?;
                info!("Ingestion concluded for identity {}", identity_id);
                self.run_analysis(identity_id, &datastore_path, false).await
            }
            Err(e) => {
                error!("Error processing identity {}: {}", identity_id, e);
                self.registry
                    .set_status(
                        identity_id,
                        IdentityStatus::Error,
                        Some(&format!("Social media processing failed: {}", e)),
                    )
                    .await?;
                Ok(IdentityStatus::Error)
            }
        }
    }

    /// Re-run profile synthesis alone against an existing datastore
    pub async fn synthesize_profile(&self, identity_id: i64) -> Result<IdentityStatus> {
        let datastore_path = self.config.datastore_path(identity_id);
        if !Datastore::exists(&datastore_path) {
            return Err(Error::DatastoreNotFound(identity_id));
        }
        self.run_analysis(identity_id, &datastore_path, true).await
    }

    /// Extraction, inference, annotation and indexing — the `ERROR` domain
    async fn ingest_archive(
        &self,
        identity_id: i64,
        archive_path: &Path,
        datastore_path: &Path,
    ) -> Result<String> {
        // Guard owns the extraction tree for every exit path below
        let workdir = WorkDir::create(&self.config.paths.work_dir, identity_id)?;

        extract_archive(archive_path, workdir.path())?;
        let inventory = scan_files(workdir.path())?;

        let datastore = Datastore::open(datastore_path).await?;

        let structured: Vec<(PathBuf, bool)> = inventory
            .files
            .iter()
            .filter_map(|f| match f.category {
                FileCategory::StructuredJson => Some((f.path.clone(), false)),
                FileCategory::StructuredMarkup => Some((f.path.clone(), true)),
                _ => None,
            })
            .collect();
        let audio: Vec<PathBuf> = inventory
            .in_category(FileCategory::Audio)
            .into_iter()
            .map(Path::to_path_buf)
            .collect();
        let images: Vec<PathBuf> = inventory
            .in_category(FileCategory::Image)
            .into_iter()
            .map(Path::to_path_buf)
            .collect();

        // Barrier: model families load once, before any file of their
        // category is touched
        let models = self
            .models
            .initialize(!audio.is_empty(), !images.is_empty())
            .await?;

        let extract_root = workdir.path().to_path_buf();

        let infer_bar = crate::progress::batch_bar(structured.len() as u64, "schema inference");
        let infer_task = async {
            let mut tables = Vec::new();
            for (path, is_markup) in &structured {
                info!("Processing structured file {:?}", path);
                let inferred = tables_from_file(path, &extract_root, *is_markup);
                for table in &inferred {
                    datastore.write_table(table).await?;
                }
                tables.extend(inferred);
                infer_bar.inc(1);
            }
            infer_bar.finish_and_clear();
            Ok::<_, Error>(tables)
        };
        let annotate_task = annotate_batch(&audio, &images, &models);

        // Schema inference and media annotation are independent paths
        let (tables, annotations) = tokio::join!(infer_task, annotate_task);
        let tables = tables?;

        let media_rows = datastore.append_media(&annotations, workdir.path()).await?;

        let mut passages = Vec::new();
        for table in &tables {
            passages.extend(passages_from_table(table, &self.config.passage));
        }
        for annotation in &annotations {
            passages.extend(passages_from_annotation(annotation, &self.config.passage));
        }
        self.indexer.index(identity_id, passages).await?;

        let table_count = datastore.list_tables().await?.len();
        Ok(format!(
            "Social media data processed successfully. Found: {} files ({}). \
             Saved {} media records. Created {} database tables.",
            inventory.total_files,
            inventory.summary(),
            media_rows,
            table_count
        ))
    }

    /// Profile synthesis — the `CONCLUDED_WITH_ANALYZER_ERROR` domain
    ///
    /// Reads the identity's language at synthesis time, so a retry after a
    /// language change re-synthesizes in the new language without touching
    /// the datastore.
    async fn run_analysis(
        &self,
        identity_id: i64,
        datastore_path: &Path,
        update_status_on_success: bool,
    ) -> Result<IdentityStatus> {
        let identity = self.registry.require_identity(identity_id).await?;
        info!(
            "Starting user analysis for identity {} in language {}",
            identity_id, identity.language
        );

        let spinner = crate::progress::stage_spinner("profile synthesis");
        let outcome = async {
            let datastore = Datastore::open(datastore_path).await?;
            let analyzer = ProfileAnalyzer::new(self.chat, &datastore, &self.config.analyzer);
            analyzer.analyze(&identity.language).await
        }
        .await;
        spinner.finish_and_clear();

        match outcome {
            Ok(profile) => {
                self.registry
                    .update_profile(
                        identity_id,
                        &profile.short_bio,
                        &profile.detailed_profile,
                        &profile.speak_pattern,
                    )
                    .await?;
                if update_status_on_success {
                    self.registry
                        .set_status(
                            identity_id,
                            IdentityStatus::Concluded,
                            Some("Profile synthesis completed"),
                        )
                        .await?;
                }
                info!("User analysis completed and saved");
                Ok(IdentityStatus::Concluded)
            }
            Err(e) => {
                error!("Error in user analysis: {}", e);
                self.registry
                    .set_status(
                        identity_id,
                        IdentityStatus::ConcludedWithAnalyzerError,
                        Some(&format!("Error in user analysis: {}", e)),
                    )
                    .await?;
                Ok(IdentityStatus::ConcludedWithAnalyzerError)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatMessage;
    use crate::media::{Captioner, ModelHandles, Transcriber};
    use crate::vector::Passage;
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const PROFILE_JSON: &str = r#"ANSWER: {"short_bio": "I like the sea.", "detailed_profile": "Long story.", "speak_pattern": "Casual, emojis."}"#;

    struct FixedChat {
        reply: String,
    }

    #[async_trait]
    impl ChatModel for FixedChat {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
            Ok(self.reply.clone())
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    struct NoModels {
        initialized: Mutex<bool>,
    }

    #[async_trait]
    impl AnnotationModels for NoModels {
        async fn initialize(&self, _audio: bool, _images: bool) -> Result<ModelHandles> {
            *self.initialized.lock().unwrap() = true;
            Ok(ModelHandles::from_parts(None, None))
        }
    }

    struct BrokenModels;

    #[async_trait]
    impl AnnotationModels for BrokenModels {
        async fn initialize(&self, _audio: bool, _images: bool) -> Result<ModelHandles> {
            Err(Error::ModelBackend("speech-to-text backend unreachable".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingIndexer {
        passages: Mutex<Vec<Passage>>,
    }

    #[async_trait]
    impl PassageIndexer for RecordingIndexer {
        async fn index(&self, _identity_id: i64, passages: Vec<Passage>) -> Result<()> {
            self.passages.lock().unwrap().extend(passages);
            Ok(())
        }
    }

    struct FakeCaptioner;

    #[async_trait]
    impl Captioner for FakeCaptioner {
        async fn caption(&self, _image_png: &[u8]) -> Result<String> {
            Ok("a sunny day".to_string())
        }

        fn model_name(&self) -> &str {
            "fake-captioner"
        }
    }

    struct CaptionModels;

    #[async_trait]
    impl AnnotationModels for CaptionModels {
        async fn initialize(&self, needs_audio: bool, needs_images: bool) -> Result<ModelHandles> {
            assert!(!needs_audio);
            assert!(needs_images);
            let captioner: Option<Box<dyn Captioner>> = Some(Box::new(FakeCaptioner));
            let transcriber: Option<Box<dyn Transcriber>> = None;
            Ok(ModelHandles::from_parts(transcriber, captioner))
        }
    }

    struct TestRig {
        _dir: TempDir,
        config: Config,
        registry: Registry,
    }

    async fn rig() -> TestRig {
        let dir = TempDir::new().unwrap();
        let config = Config::with_base_dir(Some(dir.path().to_path_buf()));
        std::fs::create_dir_all(&config.paths.work_dir).unwrap();
        let registry = Registry::connect(&config.paths.registry_file).await.unwrap();
        TestRig {
            _dir: dir,
            config,
            registry,
        }
    }

    /// Archive with one JSON payload and one real JPEG under stories/202007
    fn sample_archive(dir: &Path) -> PathBuf {
        let archive_path = dir.join("export.zip");
        let file = std::fs::File::create(&archive_path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();

        zip.start_file("data/friends.json", options).unwrap();
        zip.write_all(br#"{"friends":[{"name":"A"},{"name":"B"}]}"#)
            .unwrap();

        let mut jpeg = std::io::Cursor::new(Vec::new());
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(2, 2));
        img.write_to(&mut jpeg, image::ImageFormat::Jpeg).unwrap();
        zip.start_file("stories/202007/img1.jpg", options).unwrap();
        zip.write_all(jpeg.get_ref()).unwrap();

        zip.finish().unwrap();
        archive_path
    }

    #[tokio::test]
    async fn test_end_to_end_archive_to_datastore_and_profile() {
        let rig = rig().await;
        let identity = rig.registry.create_identity("Ana", "en").await.unwrap();
        let archive = sample_archive(rig._dir.path());

        let chat = FixedChat {
            reply: PROFILE_JSON.to_string(),
        };
        let indexer = RecordingIndexer::default();
        let job = IngestionJob {
            config: &rig.config,
            registry: &rig.registry,
            chat: &chat,
            models: &CaptionModels,
            indexer: &indexer,
        };

        let status = job.run(identity.id, &archive).await.unwrap();
        assert_eq!(status, IdentityStatus::Concluded);

        // Datastore content
        let store = Datastore::open(&rig.config.datastore_path(identity.id))
            .await
            .unwrap();
        let friends = store.read_table("data__friends").await.unwrap();
        assert_eq!(friends.rows.len(), 2);

        let media = store.read_table("media__stories").await.unwrap();
        assert_eq!(media.rows.len(), 1);
        let date_idx = media.columns.iter().position(|c| c == "date").unwrap();
        assert_eq!(media.rows[0][date_idx], Some("202007".to_string()));
        let desc_idx = media.columns.iter().position(|c| c == "description").unwrap();
        assert_eq!(media.rows[0][desc_idx], Some("a sunny day".to_string()));

        // Profile persisted onto the identity record
        let reloaded = rig.registry.require_identity(identity.id).await.unwrap();
        assert_eq!(reloaded.short_bio.as_deref(), Some("I like the sea."));
        assert_eq!(reloaded.get_status().unwrap(), IdentityStatus::Concluded);

        // Passages from both the table and the caption were indexed
        let passages = indexer.passages.lock().unwrap();
        assert!(passages.iter().any(|p| p.source == "data__friends"));
        assert!(passages.iter().any(|p| p.text.contains("a sunny day")));

        // Working directory cleaned up
        assert!(std::fs::read_dir(&rig.config.paths.work_dir)
            .unwrap()
            .next()
            .is_none());
    }

    #[tokio::test]
    async fn test_existing_datastore_skips_extraction_and_still_synthesizes() {
        let rig = rig().await;
        let identity = rig.registry.create_identity("Ana", "en").await.unwrap();

        // Pre-existing datastore is the idempotency marker
        Datastore::open(&rig.config.datastore_path(identity.id))
            .await
            .unwrap();

        let chat = FixedChat {
            reply: PROFILE_JSON.to_string(),
        };
        let models = NoModels {
            initialized: Mutex::new(false),
        };
        let indexer = RecordingIndexer::default();
        let job = IngestionJob {
            config: &rig.config,
            registry: &rig.registry,
            chat: &chat,
            models: &models,
            indexer: &indexer,
        };

        // Archive path may even be stale; it must not be touched
        let status = job
            .run(identity.id, Path::new("/nonexistent/export.zip"))
            .await
            .unwrap();

        assert_eq!(status, IdentityStatus::Concluded);
        assert!(!*models.initialized.lock().unwrap());

        let reloaded = rig.registry.require_identity(identity.id).await.unwrap();
        assert_eq!(reloaded.short_bio.as_deref(), Some("I like the sea."));
    }

    #[tokio::test]
    async fn test_malformed_analyzer_response_preserves_datastore() {
        let rig = rig().await;
        let identity = rig.registry.create_identity("Ana", "en").await.unwrap();
        let archive = sample_archive(rig._dir.path());

        // Missing closing brace
        let chat = FixedChat {
            reply: r#"ANSWER: {"short_bio": "x", "detailed_profile": "y", "speak_pattern": "z""#
                .to_string(),
        };
        let indexer = RecordingIndexer::default();
        let job = IngestionJob {
            config: &rig.config,
            registry: &rig.registry,
            chat: &chat,
            models: &CaptionModels,
            indexer: &indexer,
        };

        let status = job.run(identity.id, &archive).await.unwrap();
        assert_eq!(status, IdentityStatus::ConcludedWithAnalyzerError);

        // Previously written tables intact
        let store = Datastore::open(&rig.config.datastore_path(identity.id))
            .await
            .unwrap();
        assert_eq!(store.read_table("data__friends").await.unwrap().rows.len(), 2);

        let reloaded = rig.registry.require_identity(identity.id).await.unwrap();
        assert_eq!(
            reloaded.get_status().unwrap(),
            IdentityStatus::ConcludedWithAnalyzerError
        );
        assert!(reloaded
            .status_message
            .unwrap()
            .starts_with("Error in user analysis:"));
    }

    #[tokio::test]
    async fn test_malformed_archive_moves_job_to_error() {
        let rig = rig().await;
        let identity = rig.registry.create_identity("Ana", "en").await.unwrap();

        let bogus = rig._dir.path().join("broken.zip");
        std::fs::write(&bogus, b"not a zip").unwrap();

        let chat = FixedChat {
            reply: PROFILE_JSON.to_string(),
        };
        let models = NoModels {
            initialized: Mutex::new(false),
        };
        let indexer = RecordingIndexer::default();
        let job = IngestionJob {
            config: &rig.config,
            registry: &rig.registry,
            chat: &chat,
            models: &models,
            indexer: &indexer,
        };

        let status = job.run(identity.id, &bogus).await.unwrap();
        assert_eq!(status, IdentityStatus::Error);

        let reloaded = rig.registry.require_identity(identity.id).await.unwrap();
        assert!(reloaded
            .status_message
            .unwrap()
            .starts_with("Social media processing failed:"));

        // Guard removed the partial extraction tree
        assert!(std::fs::read_dir(&rig.config.paths.work_dir)
            .unwrap()
            .next()
            .is_none());
    }

    #[tokio::test]
    async fn test_model_init_failure_escalates_to_error() {
        let rig = rig().await;
        let identity = rig.registry.create_identity("Ana", "en").await.unwrap();
        let archive = sample_archive(rig._dir.path());

        let chat = FixedChat {
            reply: PROFILE_JSON.to_string(),
        };
        let indexer = RecordingIndexer::default();
        let job = IngestionJob {
            config: &rig.config,
            registry: &rig.registry,
            chat: &chat,
            models: &BrokenModels,
            indexer: &indexer,
        };

        let status = job.run(identity.id, &archive).await.unwrap();
        assert_eq!(status, IdentityStatus::Error);
    }
}
