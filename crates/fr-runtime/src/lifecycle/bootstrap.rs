use std::path::Path;
use std::sync::Arc;

use orion_error::compat_prelude::*;
use orion_error::prelude::*;

use fr_config::{EngineConfig, resolve_glob, resolve_path};
use fr_core::cache::{MemoryCache, RetryingCache};
use fr_core::insight::JsonlSink;
use fr_core::memory::{MemoryOutputs, MemoryStore};
use fr_core::model::Rule;
use fr_core::ports::{
    ActorRepository, CommandRepository, InsightRepository, RuleInstanceRepository,
    RuleRepository, TimeSeriesRepository,
};
use fr_core::retry::RetryPolicy;

use crate::emitter::TracingEmitter;
use crate::error::{RuntimeReason, RuntimeResult};
use crate::repository::FileStateStore;
use crate::service::Collaborators;
use crate::source::{FileOntology, FileTelemetry, load_rule_files};

// ---------------------------------------------------------------------------
// Phase 1: wire file-backed collaborators from `[sources]` and `[sink]`
// ---------------------------------------------------------------------------

/// Collaborators plus the rule definitions found under `sources.rules`.
pub(super) struct BootstrapData {
    pub collab: Collaborators,
    pub rules: Vec<Rule>,
}

struct StateRepos {
    rules: Arc<dyn RuleRepository>,
    instances: Arc<dyn RuleInstanceRepository>,
    actors: Arc<dyn ActorRepository>,
    buffers: Arc<dyn TimeSeriesRepository>,
}

fn state_repos<S>(store: Arc<S>) -> StateRepos
where
    S: RuleRepository + RuleInstanceRepository + ActorRepository + TimeSeriesRepository + 'static,
{
    StateRepos {
        rules: store.clone(),
        instances: store.clone(),
        actors: store.clone(),
        buffers: store,
    }
}

/// Load the ontology location, telemetry replay files, rule definitions,
/// the state directory and the output files named by the config.
pub(super) async fn load_sources(
    config: &EngineConfig,
    base_dir: &Path,
) -> RuntimeResult<BootstrapData> {
    let sources = &config.sources;

    // 1. Ontology snapshot (required)
    let ontology_path = sources.ontology.as_deref().ok_or_else(|| {
        StructError::from(RuntimeReason::Bootstrap)
            .with_detail("sources.ontology is not set".to_string())
    })?;
    let ontology = FileOntology::new(resolve_path(ontology_path, base_dir));

    // 2. Telemetry replay files
    let telemetry = match &sources.telemetry {
        Some(pattern) => {
            let paths = resolve_glob(pattern, base_dir).owe_conf()?;
            if paths.is_empty() {
                fr_warn!(conf, pattern = %pattern, "telemetry glob matched no files");
            }
            FileTelemetry::load(&paths).err_conv()?
        }
        None => FileTelemetry::default(),
    };
    fr_info!(conn, points = telemetry.len(), "telemetry replay loaded");

    // 3. Rule definitions
    let rules = match &sources.rules {
        Some(pattern) => load_rule_files(&resolve_glob(pattern, base_dir).owe_conf()?)?,
        None => Vec::new(),
    };

    // 4. State: a snapshot directory, or process memory only
    let state = match &sources.state_dir {
        Some(dir) => {
            let store = FileStateStore::open(resolve_path(dir, base_dir))
                .await
                .err_conv()?;
            fr_info!(conn, dir = %store.dir().display(), "state directory opened");
            state_repos(Arc::new(store))
        }
        None => {
            fr_warn!(conf, "sources.state_dir not set, state is not kept across restarts");
            state_repos(Arc::new(MemoryStore::new()))
        }
    };

    // 5. Insight / command outputs
    let outputs = Arc::new(MemoryOutputs::new());
    let insights: Arc<dyn InsightRepository> = match &config.sink.insights_file {
        Some(path) => Arc::new(JsonlSink::open(resolve_path(path, base_dir)).err_conv()?),
        None => outputs.clone(),
    };
    let commands: Arc<dyn CommandRepository> = match &config.sink.commands_file {
        Some(path) => Arc::new(JsonlSink::open(resolve_path(path, base_dir)).err_conv()?),
        None => outputs,
    };

    let retry = RetryPolicy::from_config(&config.retry);
    Ok(BootstrapData {
        collab: Collaborators {
            ontology: Arc::new(ontology),
            telemetry: Arc::new(telemetry),
            rules: state.rules,
            instances: state.instances,
            actors: state.actors,
            buffers: state.buffers,
            insights,
            commands,
            cache: Arc::new(RetryingCache::new(Arc::new(MemoryCache::new()), retry)),
            events: Arc::new(TracingEmitter),
        },
        rules,
    })
}
