//! Wiring: build every service from a resolved [`Config`] and hand out the
//! long-running components.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::Config;
use crate::error::AppError;
use crate::llm::ProviderRegistry;
use crate::subsystems::agents::{ConversationOrchestrator, PromptRefiner};
use crate::subsystems::memory::stores::json_file::JsonFileBackend;
use crate::subsystems::memory::stores::tmp::TmpStore;
use crate::subsystems::memory::stores::transcript::MarkdownTranscriptStore;
use crate::subsystems::memory::sweeper::MemorySweeper;
use crate::subsystems::memory::{
    MemoryBackend, MemoryBackendKind, MemoryManager, MemorySettings, Summarizer, TranscriptStore,
};
use crate::subsystems::routing::RecommendationEngine;
use crate::subsystems::runtime::Component;
use crate::subsystems::search::{SearchDecider, WebSearch};

/// Fully-wired chat core.
pub struct App {
    pub config: Config,
    pub orchestrator: ConversationOrchestrator,
    pub refiner: PromptRefiner,
}

impl App {
    pub fn build(config: Config) -> Result<Self, AppError> {
        let prompts_dir = config.agents.prompts_dir.clone();
        let registry = Arc::new(ProviderRegistry::from_config(&config.llm, &prompts_dir));

        let (backend, transcripts): (Arc<dyn MemoryBackend>, Arc<dyn TranscriptStore>) =
            match config.memory.backend {
                MemoryBackendKind::Tmp => {
                    let store = Arc::new(TmpStore::new().with_transcript_cap(config.memory.transcript_cap));
                    let backend: Arc<dyn MemoryBackend> = store.clone();
                    (backend, store)
                }
                MemoryBackendKind::Json => (
                    Arc::new(JsonFileBackend::new(config.work_dir.join("memory"))?),
                    Arc::new(MarkdownTranscriptStore::new(
                        config.work_dir.join("transcripts"),
                        config.memory.transcript_cap,
                    )?),
                ),
            };

        let summarizer = Summarizer::new(registry.clone(), &config.memory.summarizer, prompts_dir.clone());
        let memory = Arc::new(MemoryManager::new(
            backend,
            summarizer,
            MemorySettings::from(&config.memory),
        ));

        let engine = Arc::new(RecommendationEngine::from_file(
            &config.routing.catalog,
            config.routing.weights.clone(),
        )?);
        let search = WebSearch::new(&config.search)?;

        let orchestrator = ConversationOrchestrator::new(
            registry.clone(),
            memory,
            transcripts,
            SearchDecider::new(registry.clone(), prompts_dir.clone()),
            search,
            engine,
        )
        .with_min_prompt_chars(config.routing.min_prompt_chars);

        let refiner = PromptRefiner::new(
            registry.clone(),
            prompts_dir,
            config.agents.refine_order.clone(),
            config.agents.refine_max_chars,
        );

        info!(
            default_provider = registry.default_provider(),
            available = ?registry.available_ids(),
            search = orchestrator.search().is_configured(),
            memory_backend = ?config.memory.backend,
            "chat core ready"
        );
        Ok(Self { config, orchestrator, refiner })
    }

    /// Components to run until shutdown: the memory sweeper and, when
    /// enabled, the HTTP channel.
    pub fn components(self: &Arc<Self>) -> Vec<Box<dyn Component>> {
        let mut components: Vec<Box<dyn Component>> = vec![Box::new(MemorySweeper::new(
            Arc::clone(self.orchestrator.memory()),
            Duration::from_secs(self.config.memory.sweep_interval_secs),
        ))];

        #[cfg(feature = "channel-axum")]
        if self.config.comms_http_should_load() {
            components.push(Box::new(crate::subsystems::comms::axum_channel::AxumChannel::new(
                "http",
                self.config.comms.http.bind.clone(),
                Arc::clone(self),
            )));
        }

        components
    }
}
