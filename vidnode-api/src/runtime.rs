//! Per-worker state shared by every request handler.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use vidnode_cluster::ipc::{BoxReader, BoxWriter, WorkerId};
use vidnode_cluster::worker::{DatabaseClient, WorkerEvent, WorkerLink};
use vidnode_core::bandwidth::BandwidthBatcher;
use vidnode_core::chat::ContentFilter;
use vidnode_core::hls::{HlsManifestBuilder, LocalFs, MediaFs, MediaLayout};
use vidnode_core::jwt::JwtService;
use vidnode_core::verification::{HumanVerifier, TurnstileVerifier};
use vidnode_core::Config;

use crate::http::websocket::SocketRegistry;
use crate::store::VideoStore;
use crate::uploads::UploadTracker;

const JWT_SECRET_TIMEOUT: Duration = Duration::from_secs(10);

pub type AppState = Arc<WorkerRuntime>;

/// Where a restart re-reads configuration from.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Defaults, optional file, environment.
    Load { path: Option<String> },
    /// Keep the configuration the worker started with.
    Fixed,
}

pub struct WorkerRuntime {
    pub worker_id: WorkerId,
    source: ConfigSource,
    config: RwLock<Arc<Config>>,
    pub link: Arc<WorkerLink>,
    pub jwt: JwtService,
    pub videos: VideoStore,
    pub manifests: HlsManifestBuilder,
    pub bandwidth: Arc<BandwidthBatcher>,
    pub uploads: Arc<UploadTracker>,
    pub sockets: SocketRegistry,
    pub verifier: Arc<dyn HumanVerifier>,
    pub filter: ContentFilter,
}

/// Everything a runtime needs besides the coordinator link.
pub struct RuntimeParts {
    pub config: Config,
    pub source: ConfigSource,
    pub fs: Arc<dyn MediaFs>,
    pub verifier: Arc<dyn HumanVerifier>,
}

impl RuntimeParts {
    /// Local disk and the configured Turnstile client.
    pub fn from_config(config: Config, source: ConfigSource) -> vidnode_core::Result<Self> {
        let verifier = Arc::new(TurnstileVerifier::new(config.turnstile.clone())?);
        Ok(Self {
            config,
            source,
            fs: Arc::new(LocalFs::new()),
            verifier,
        })
    }
}

impl WorkerRuntime {
    /// Attach to the coordinator and fetch the cluster signing secret.
    pub async fn connect(
        worker_id: WorkerId,
        parts: RuntimeParts,
        reader: BoxReader,
        writer: BoxWriter,
    ) -> anyhow::Result<(AppState, mpsc::UnboundedReceiver<WorkerEvent>)> {
        let (link, events) = WorkerLink::connect(worker_id, reader, writer);
        let secret = link.jwt_secret(JWT_SECRET_TIMEOUT).await?;
        tracing::debug!(worker_id, "Received JWT secret");

        let config = parts.config;
        let videos = VideoStore::new(link.database());
        let layout = MediaLayout::new(config.media_dir());
        let manifests = HlsManifestBuilder::new(parts.fs, layout, Arc::new(videos.clone()));
        let bandwidth = Arc::new(BandwidthBatcher::new(
            Arc::new(videos.clone()),
            Duration::from_secs(config.bandwidth.flush_interval_secs),
            config.bandwidth.flush_threshold_bytes,
        ));

        let runtime = Arc::new(Self {
            worker_id,
            source: parts.source,
            filter: ContentFilter::new(config.chat.max_message_length),
            config: RwLock::new(Arc::new(config)),
            link,
            jwt: JwtService::new(&secret),
            videos,
            manifests,
            bandwidth,
            uploads: Arc::new(UploadTracker::new()),
            sockets: SocketRegistry::new(),
            verifier: parts.verifier,
        });
        Ok((runtime, events))
    }

    #[must_use]
    pub fn config(&self) -> Arc<Config> {
        self.config.read().clone()
    }

    /// Re-read the configuration file and environment. On failure the
    /// previous configuration stays active.
    pub fn reload_config(&self) -> Arc<Config> {
        let ConfigSource::Load { path } = &self.source else {
            return self.config();
        };
        match Config::load(path.as_deref()) {
            Ok(config) => match config.validate() {
                Ok(()) => {
                    let config = Arc::new(config);
                    *self.config.write() = config.clone();
                    config
                }
                Err(problems) => {
                    tracing::warn!(worker_id = self.worker_id, ?problems, "Reloaded configuration is invalid, keeping previous");
                    self.config()
                }
            },
            Err(e) => {
                tracing::warn!(worker_id = self.worker_id, error = %e, "Failed to reload configuration, keeping previous");
                self.config()
            }
        }
    }

    /// Put back a configuration that is known to serve.
    pub fn restore_config(&self, config: Arc<Config>) {
        *self.config.write() = config;
    }

    #[must_use]
    pub fn database(&self) -> &DatabaseClient {
        self.videos.database()
    }
}
