//! The runtime: instance construction, the worker pool, the reaper, and run handles.

mod worker;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{info, warn};

use crate::agent::{AgentDefinition, AgentRegistry};
use crate::config::RuntimeConfig;
use crate::db::{Db, StoreError};
use crate::embedding::Embedder;
use crate::event::{Event, EventPayload, IngestDocumentPayload, NewMessagePayload};
use crate::graph::SqliteGraphStore;
use crate::ids;
use crate::llm::{DefaultLlmFactory, LlmClientFactory};
use crate::message::MessageStore;
use crate::processor::{Processor, ProcessorDeps, ProcessorSet};
use crate::queue::{EventQueue, QueueError, SqliteEventQueue};
use crate::rag::{DefaultFetcher, DocumentFetcher, DocumentStore};
use crate::stream::{Emitted, RunEventSink};
use crate::thread::ThreadStore;
use crate::tools::{builtin_registry, Tool};

/// Vector dimension used when no embedder is configured (matches the default
/// `text-embedding-3-small` model so a later upgrade needs no migration).
const DEFAULT_VECTOR_DIMENSION: usize = 1536;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Everything pluggable about an instance. `config` is required; the rest default to the
/// built-in implementations.
pub struct InstanceOptions {
    pub config: RuntimeConfig,
    pub agents: Vec<AgentDefinition>,
    /// Extra tools registered on top of the built-ins.
    pub tools: Vec<Arc<dyn Tool>>,
    /// Custom processors; they take precedence over built-ins per event kind.
    pub custom_processors: Vec<Arc<dyn Processor>>,
    pub llm_factory: Option<Arc<dyn LlmClientFactory>>,
    pub embedder: Option<Arc<dyn Embedder>>,
    pub fetcher: Option<Arc<dyn DocumentFetcher>>,
}

impl InstanceOptions {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            agents: Vec::new(),
            tools: Vec::new(),
            custom_processors: Vec::new(),
            llm_factory: None,
            embedder: None,
            fetcher: None,
        }
    }

    pub fn with_agent(mut self, agent: AgentDefinition) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_llm_factory(mut self, factory: Arc<dyn LlmClientFactory>) -> Self {
        self.llm_factory = Some(factory);
        self
    }
}

/// One running instance: stores, registries, worker pool, reaper.
pub struct Instance {
    deps: ProcessorDeps,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Instance {
    /// Builds the stores, registers agents and tools, and starts the workers and the
    /// reaper. Environment config (`.env`, XDG) is applied first so provider API keys
    /// resolve.
    pub async fn create(options: InstanceOptions) -> Result<Arc<Instance>, RuntimeError> {
        if let Err(e) = env_config::load_and_apply("parley", None) {
            warn!(error = %e, "env config not applied");
        }

        let config = Arc::new(options.config);
        let db = Db::open(&config.db_path)?;
        let dimension = options
            .embedder
            .as_ref()
            .map(|e| e.dimension())
            .unwrap_or(DEFAULT_VECTOR_DIMENSION);
        let graph = Arc::new(SqliteGraphStore::new(db.clone(), dimension).await?);
        let queue: Arc<dyn EventQueue> = Arc::new(SqliteEventQueue::new(db.clone()));

        let agents = Arc::new(AgentRegistry::new());
        for agent in options.agents {
            agents.insert(agent);
        }
        let tools = builtin_registry();
        for tool in options.tools {
            tools.register(tool);
        }

        let deps = ProcessorDeps {
            queue,
            threads: ThreadStore::new(db.clone()),
            messages: MessageStore::new(db.clone()),
            graph,
            documents: DocumentStore::new(db),
            agents,
            tools,
            llm: options
                .llm_factory
                .unwrap_or_else(|| Arc::new(DefaultLlmFactory)),
            embedder: options.embedder,
            fetcher: options
                .fetcher
                .unwrap_or_else(|| Arc::new(DefaultFetcher::new())),
            sink: RunEventSink::new(config.stream_buffer),
            config: config.clone(),
        };

        let processors = Arc::new(ProcessorSet::new(options.custom_processors));
        let (shutdown, _) = watch::channel(false);
        let instance = Arc::new(Instance {
            deps: deps.clone(),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        });

        let mut tasks = instance.tasks.lock().await;
        for index in 0..config.workers.max(1) {
            let worker_id = format!("worker-{index}-{}", ids::new_id());
            tasks.push(tokio::spawn(worker::run_worker(
                worker_id,
                deps.clone(),
                processors.clone(),
                instance.shutdown.subscribe(),
            )));
        }
        tasks.push(tokio::spawn(reaper(
            deps.clone(),
            instance.shutdown.subscribe(),
        )));
        drop(tasks);
        info!(workers = config.workers, "instance started");
        Ok(instance)
    }

    /// Enqueues a `NEW_MESSAGE` for the payload's thread (creating the thread on first
    /// sight of its external id) and returns a handle to the run.
    pub async fn run(&self, payload: NewMessagePayload) -> Result<RunHandle, RuntimeError> {
        let thread_ref = payload.thread.clone().unwrap_or_default();
        let external_id = thread_ref
            .external_id
            .clone()
            .unwrap_or_else(ids::new_id);
        let sender = payload.sender.participant_id();
        let mut participants = thread_ref.participants.clone();
        if participants.is_empty() {
            participants.push(sender.clone());
            for agent in self.deps.agents.all() {
                participants.push(agent.name.clone());
            }
        } else if !participants.contains(&sender) {
            participants.push(sender.clone());
        }
        let thread = self
            .deps
            .threads
            .load_or_create_by_external_id(&external_id, &external_id, &participants)
            .await?;
        self.deps
            .threads
            .append_participant(&thread.id, &sender)
            .await?;

        let events = self.deps.sink.subscribe();
        let event = Event::new(thread.id.clone(), EventPayload::NewMessage(payload));
        let trace_id = event.trace_id.clone();
        self.deps.queue.append(vec![event]).await?;
        Ok(RunHandle {
            thread_id: thread.id,
            trace_id,
            events,
            queue: self.deps.queue.clone(),
            poll_interval: std::time::Duration::from_millis(self.deps.config.poll_interval_ms),
        })
    }

    /// Enqueues a document ingest outside any conversation and returns its run handle.
    pub async fn ingest(&self, payload: IngestDocumentPayload) -> Result<RunHandle, RuntimeError> {
        let external_id = format!("ingest:{}", payload.namespace);
        let thread = self
            .deps
            .threads
            .load_or_create_by_external_id(&external_id, &external_id, &[])
            .await?;
        let events = self.deps.sink.subscribe();
        let event = Event::new(thread.id.clone(), EventPayload::IngestDocument(payload));
        let trace_id = event.trace_id.clone();
        self.deps.queue.append(vec![event]).await?;
        Ok(RunHandle {
            thread_id: thread.id,
            trace_id,
            events,
            queue: self.deps.queue.clone(),
            poll_interval: std::time::Duration::from_millis(self.deps.config.poll_interval_ms),
        })
    }

    /// The instance's stores and registries; processors receive exactly this.
    pub fn deps(&self) -> ProcessorDeps {
        self.deps.clone()
    }

    /// Graceful shutdown: workers finish the event in hand and stop claiming.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
        info!("instance stopped");
    }
}

/// Background TTL/lease sweep.
async fn reaper(deps: ProcessorDeps, mut shutdown: watch::Receiver<bool>) {
    let interval = std::time::Duration::from_millis(deps.config.reap_interval_ms.max(50));
    loop {
        if *shutdown.borrow() {
            break;
        }
        if let Err(e) = deps.queue.reap().await {
            warn!(error = %e, "reaper sweep failed");
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {}
        }
    }
}

/// Handle to one `run()`: the live event stream plus completion tracking.
pub struct RunHandle {
    thread_id: String,
    trace_id: String,
    events: broadcast::Receiver<Emitted>,
    queue: Arc<dyn EventQueue>,
    poll_interval: std::time::Duration,
}

impl RunHandle {
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Next run-stream event for this thread. `None` when the instance shut down. A slow
    /// consumer may skip over dropped events rather than stall the runtime.
    pub async fn next_event(&mut self) -> Option<run_event::RunStreamEvent> {
        loop {
            match self.events.recv().await {
                Ok(emitted) if emitted.thread_id == self.thread_id => {
                    return Some(emitted.event);
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "run stream consumer lagged; dropped oldest events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Resolves when no pending or processing events remain for this run's trace.
    pub async fn wait(&self) -> Result<(), QueueError> {
        loop {
            if self.queue.open_count_for_trace(&self.trace_id).await? == 0 {
                return Ok(());
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// `wait()` with a deadline; `Ok(false)` when the run is still going at the cutoff.
    pub async fn wait_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<bool, QueueError> {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(result) => result.map(|_| true),
            Err(_) => Ok(false),
        }
    }
}

/// Convenience constructor mirroring the common entry point.
pub async fn create_instance(options: InstanceOptions) -> Result<Arc<Instance>, RuntimeError> {
    Instance::create(options).await
}
