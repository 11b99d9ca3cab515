//! The framework facade
//!
//! `VStore` owns every manager and exposes the operations applications use:
//! providing context, storing files, searching, downloading and deleting.

use crate::communication::{
    Deleter, DownloadMode, DownloadOutcome, Downloader, HttpClients, MasterNode, SearchHandle,
    Searcher, Uploader,
};
use crate::config::VStoreConfig;
use crate::context::{
    apply_filter, now_ms, ContextDescription, ContextFilter, ContextManager, LatLng, Location,
};
use crate::error::{VStoreError, VStoreResult};
use crate::events::{EventBus, VStoreEvent};
use crate::files::{hash_file, mime_and_extension, FileManager, VStoreFile};
use crate::matching::{FileNodeMapper, Matching};
use crate::nodes::NodeManager;
use crate::observability::{EvaluationLogger, HttpEvaluationSink};
use crate::remote_config::ConfigManager;
use crate::rules::RuleManager;
use crate::storage::{Database, FileOrdering, CURRENTLY_DOWNLOADING};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, info, warn, Instrument};

/// Location used by the demonstration flow
pub const DEMO_LOCATION: (f64, f64) = (49.877684, 8.654256);
const DEMO_ACCURACY: f32 = 2.0;

pub struct VStore {
    files: FileManager,
    db: Database,
    events: EventBus,
    context: ContextManager,
    config_manager: ConfigManager,
    rules: Arc<RuleManager>,
    nodes: Arc<NodeManager>,
    uploader: Uploader,
    downloader: Downloader,
    searcher: Searcher,
    deleter: Deleter,
    evaluation: EvaluationLogger,
    device_id: String,
}

impl VStore {
    /// Set up directories, database, managers and the upload queue.
    ///
    /// Uploads left pending by a previous run are restarted.
    pub async fn initialize(config: VStoreConfig) -> VStoreResult<Self> {
        let files = FileManager::new(&config.storage.base_dir)?;
        let master_url = config.master_url()?;
        let clients = HttpClients::from_config(&config)?;
        let device_id = files.device_identifier()?.to_string();
        let db = Database::open(&files.database_dir())?;
        // no download survives a restart
        db.list_clear(CURRENTLY_DOWNLOADING)?;

        let evaluation = match (&config.evaluation.logging_url, config.evaluation.enabled) {
            (Some(url), true) => {
                EvaluationLogger::new(device_id.clone(), Arc::new(HttpEvaluationSink::new(url.as_str())?))
            }
            _ => EvaluationLogger::disabled(),
        };

        let events = EventBus::new();
        let context = ContextManager::new(files.context_file(), events.clone());
        let rules = Arc::new(RuleManager::new(db.clone()));
        let nodes = Arc::new(NodeManager::new(db.clone(), clients.identifier.clone())?);
        let config_manager = ConfigManager::new(
            &config,
            device_id.clone(),
            &clients,
            nodes.clone(),
            rules.clone(),
            events.clone(),
        )?;

        let mapper = Arc::new(FileNodeMapper::new());
        let master = MasterNode::new(master_url, device_id.clone(), clients.mapping.clone(), mapper.clone());
        let uploader = Uploader::new(
            db.clone(),
            nodes.clone(),
            master.clone(),
            events.clone(),
            clients.transfer.clone(),
            device_id.clone(),
        )
        .with_retries(config.upload.max_attempts, config.upload_retry_delay())
        .with_evaluation(evaluation.clone());
        let downloader = Downloader::new(
            db.clone(),
            nodes.clone(),
            master.clone(),
            events.clone(),
            &clients,
            device_id.clone(),
            &files,
        )
        .with_evaluation(evaluation.clone());
        let searcher = Searcher::new(
            nodes.clone(),
            mapper,
            events.clone(),
            clients.node.clone(),
            device_id.clone(),
        );
        let deleter = Deleter::new(
            db.clone(),
            nodes.clone(),
            master,
            events.clone(),
            clients.node.clone(),
            device_id.clone(),
            files.thumbnails_dir(),
        );

        if uploader.load_pending()? > 0 {
            uploader.start_uploads();
        }

        info!(
            device_id = %device_id,
            nodes = nodes.node_count(),
            evaluation = evaluation.is_enabled(),
            "vstore initialized"
        );
        Ok(Self {
            files,
            db,
            events,
            context,
            config_manager,
            rules,
            nodes,
            uploader,
            downloader,
            searcher,
            deleter,
            evaluation,
            device_id,
        })
    }

    // ---- managers ----

    pub fn config_manager(&self) -> &ConfigManager {
        &self.config_manager
    }

    pub fn rule_manager(&self) -> &RuleManager {
        &self.rules
    }

    pub fn node_manager(&self) -> &NodeManager {
        &self.nodes
    }

    pub fn context_manager(&self) -> &ContextManager {
        &self.context
    }

    pub fn file_manager(&self) -> &FileManager {
        &self.files
    }

    pub fn uploader(&self) -> &Uploader {
        &self.uploader
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VStoreEvent> {
        self.events.subscribe()
    }

    pub fn device_identifier(&self) -> &str {
        &self.device_id
    }

    pub fn is_mime_type_supported(&self, mime_type: &str) -> bool {
        crate::files::is_mime_type_supported(mime_type)
    }

    // ---- context ----

    /// Replace the current context. A noise sample is judged against the configured thresholds.
    pub fn provide_context(&self, mut context: ContextDescription) {
        if let Some(noise) = context.noise.as_mut() {
            noise.rms_threshold = self.config_manager.default_rms_threshold();
            noise.db_threshold = self.config_manager.default_db_threshold();
        }
        self.context.provide_context(context);
    }

    pub fn persist_context(&self, make_persistent: bool) -> VStoreResult<()> {
        self.context.persist_context(make_persistent)
    }

    pub fn clear_current_context(&self, keep_persistent: bool) -> VStoreResult<()> {
        self.context.clear_current_context(keep_persistent)
    }

    pub fn current_context(&self) -> ContextDescription {
        self.context.current_context()
    }

    pub fn clear_rules(&self) -> VStoreResult<()> {
        self.rules.clear_rules()
    }

    // ---- storing ----

    /// Store a file: copy it into the framework, match it against the rules
    /// and start uploading it to the decided nodes.
    pub async fn store(&self, path: &Path, is_private: bool) -> VStoreResult<VStoreFile> {
        if path.as_os_str().is_empty() {
            return Err(VStoreError::missing_parameters());
        }
        if !path.is_file() {
            return Err(VStoreError::file_not_found(path.display().to_string()));
        }
        let uuid = uuid::Uuid::new_v4().to_string();
        let span = crate::store_span!(file_id = %uuid, private = is_private);
        self.store_as(path, uuid, is_private).instrument(span).await
    }

    async fn store_as(&self, path: &Path, uuid: String, is_private: bool) -> VStoreResult<VStoreFile> {
        let (mime_type, extension) = mime_and_extension(path);
        let descriptive_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{uuid}.{extension}"));

        let copy = self.files.copy_into_framework(path, &uuid, &extension).await?;
        let hash = hash_file(&copy).await?;
        if self.db.is_already_stored(&hash)? {
            self.files.remove_local_copy(&copy, &uuid).await?;
            return Err(VStoreError::FileAlreadyExists { hash });
        }
        let size = tokio::fs::metadata(&copy).await?.len();

        let mut file = VStoreFile::new(
            uuid,
            &self.files.stored_files_dir(),
            descriptive_name,
            mime_type.to_string(),
            extension,
            size,
            is_private,
        );
        file.hash = hash;
        file.context = Some(self.context.current_context());

        let mode = self.config_manager.matching_mode();
        self.evaluation.start_for_file(&file, mode);

        let started = Instant::now();
        let rules = self.rules.rules()?;
        let result = {
            let _span = crate::matching_span!(mode = %mode, rules = rules.len()).entered();
            Matching::new(&self.nodes)
                .multiple_nodes_per_rule(self.config_manager.is_multiple_nodes_allowed())
                .run(&file, mode, &rules)
        };
        let matching_ms = started.elapsed().as_millis() as u64;

        let targets = result.target_nodes();
        for node in &targets {
            file.add_node_id(node.uuid.as_str());
        }
        if targets.is_empty() {
            file.upload_pending = false;
        }
        if let Some(rule) = &result.used_rule {
            self.evaluation
                .add_rule(&file.uuid, rule, result.decision_layer.unwrap_or(0));
        }

        if let Err(e) = self.db.insert_file(&file) {
            warn!(error = %e, "Storing the file record failed");
            if let Err(cleanup) = self.files.remove_local_copy(&file.full_path(), &file.uuid).await {
                warn!(error = %cleanup, "Could not remove framework copy");
            }
            self.evaluation.abort_for_file(&file.uuid);
            return Err(VStoreError::database(e.to_string()));
        }

        self.evaluation
            .add_decided_node(&file.uuid, targets.first(), matching_ms)
            .await;

        if !targets.is_empty() {
            self.uploader.enqueue(&file);
            self.uploader.start_uploads();
        }
        info!(
            nodes = ?file.stored_node_ids,
            matching_ms,
            "File stored"
        );
        Ok(file)
    }

    // ---- lookups ----

    /// Files stored from this device. Also published as `FilesReady`.
    pub fn get_files_uploaded_by_this_device(
        &self,
        ordering: FileOrdering,
        only_pending: bool,
        only_private: bool,
    ) -> VStoreResult<Vec<VStoreFile>> {
        let files = self.db.list_files(ordering, only_pending, only_private)?;
        self.events.publish(VStoreEvent::FilesReady {
            files: files.clone(),
        });
        Ok(files)
    }

    pub fn is_my_file(&self, uuid: &str) -> VStoreResult<bool> {
        self.db.is_my_file(uuid)
    }

    /// Search all nodes for files matching `context` as narrowed by `filter`.
    /// Returns false when no node is known.
    pub fn get_files_matching_context(
        &self,
        context: &ContextDescription,
        filter: &ContextFilter,
        request_id: &str,
    ) -> bool {
        match self.search_files(context, filter, request_id) {
            Some(handle) => {
                handle.detach();
                true
            }
            None => false,
        }
    }

    /// Like [`VStore::get_files_matching_context`], returning a handle to await the answers
    pub fn search_files(
        &self,
        context: &ContextDescription,
        filter: &ContextFilter,
        request_id: &str,
    ) -> Option<SearchHandle> {
        let search = apply_filter(context, filter);
        self.searcher.search(&search, request_id)
    }

    /// Get a file. Own files are served from local storage, others are downloaded.
    pub async fn get_file(&self, uuid: &str, dir: Option<&Path>) -> VStoreResult<DownloadOutcome> {
        if uuid.trim().is_empty() {
            return Err(VStoreError::missing_parameters());
        }
        if let Some(file) = self.db.get_file(uuid)? {
            let path = file.full_path();
            let metadata = file.metadata();
            debug!(file_id = uuid, "Serving own file from local storage");
            self.events.publish(VStoreEvent::DownloadedFileReady {
                file_id: uuid.to_string(),
                request_id: String::new(),
                path: path.clone(),
                metadata: Some(metadata.clone()),
            });
            return Ok(DownloadOutcome::Ready { path, metadata });
        }
        self.downloader
            .download_file(uuid, DownloadMode::BasedOnMetric, "", dir)
            .await
    }

    /// Download from a given node
    pub async fn get_file_from_node(
        &self,
        uuid: &str,
        node_id: &str,
        request_id: &str,
        dir: Option<&Path>,
    ) -> VStoreResult<DownloadOutcome> {
        self.downloader
            .download_file(uuid, DownloadMode::FromSpecifiedNode(node_id.to_string()), request_id, dir)
            .await
    }

    /// Thumbnail of a file, downloaded unless already present
    pub async fn get_thumbnail(&self, uuid: &str) -> VStoreResult<PathBuf> {
        let local = self.files.thumbnail_path(uuid);
        if local.is_file() {
            self.events.publish(VStoreEvent::NewThumbnail {
                file_id: uuid.to_string(),
                path: local.clone(),
            });
            return Ok(local);
        }
        self.downloader.download_thumbnail(uuid).await
    }

    pub async fn request_metadata(&self, uuid: &str) -> Option<crate::files::FileMetadata> {
        self.downloader.request_metadata(uuid).await
    }

    pub async fn delete_file(&self, uuid: &str) -> VStoreResult<()> {
        self.deleter.delete_file(uuid).await
    }

    /// Remove downloaded files and thumbnails and reset the persisted lists
    pub fn clean(&self) -> VStoreResult<()> {
        self.db.clear_lists()?;
        self.files.clean()
    }

    /// Flush the database and retry undelivered evaluation records
    pub async fn shutdown(&self) -> VStoreResult<()> {
        let undelivered = self.evaluation.flush().await;
        if undelivered > 0 {
            warn!(records = undelivered, "Evaluation records left undelivered");
        }
        self.db.flush().await
    }

    // ---- demonstration ----

    /// Download the configuration, provide and persist a fixed location
    /// context, then report the number of known storage nodes.
    pub async fn run_demo(&self) -> VStoreResult<usize> {
        if let Some(Err(e)) = self.config_manager.download(true).await {
            warn!(error = %e, "Configuration download failed, continuing with known nodes");
        }
        let (lat, lng) = DEMO_LOCATION;
        let context = ContextDescription::with_location(Location::new(
            LatLng::new(lat, lng),
            DEMO_ACCURACY,
            now_ms(),
            "",
        ));
        self.provide_context(context);
        self.persist_context(true)?;
        let count = self.nodes.node_count();
        info!(nodes = count, "Demonstration flow finished");
        Ok(count)
    }
}
