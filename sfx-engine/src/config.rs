//! Engine-wide tunable configuration
//!
//! Resolution order for every knob: environment variable, then TOML config
//! file (via `sfx_common::config`), then the compiled default below.

use serde::Deserialize;
use std::path::PathBuf;
use tracing::info;

/// Chunking/memory knobs for the indexing orchestrator (C8)
#[derive(Debug, Clone)]
pub struct IndexingConfig {
    pub chunk_size_min: usize,
    pub chunk_size_max: usize,
    pub small_threshold: usize,
    pub memory_limit_mb: Option<u64>,
    pub cpu_workers: usize,
    pub per_file_timeout_secs: u64,
    pub inference_batch_size: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            chunk_size_min: 100,
            chunk_size_max: 3000,
            small_threshold: 500,
            memory_limit_mb: None,
            cpu_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            per_file_timeout_secs: 90,
            inference_batch_size: 32,
        }
    }
}

/// Translation provider knobs (C10)
#[derive(Debug, Clone)]
pub struct TranslationConfig {
    pub provider_id: String,
    pub endpoint: String,
    pub api_key: String,
    pub model_id: String,
    pub chunk_size_min: usize,
    pub chunk_size_max: usize,
    pub chunk_size: usize,
    pub concurrency_limit: usize,
    pub temperature: f32,
    pub max_tokens: u32,
    pub http_timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            provider_id: "openai-compatible".to_string(),
            endpoint: String::new(),
            api_key: String::new(),
            model_id: String::new(),
            chunk_size_min: 5,
            chunk_size_max: 200,
            chunk_size: 40,
            concurrency_limit: 4,
            temperature: 0.3,
            max_tokens: 2048,
            http_timeout_secs: 60,
            max_retries: 3,
        }
    }
}

/// Cache sizing knobs (C1-C4)
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub metadata_l1_size: usize,
    pub metadata_l2_size: usize,
    pub metadata_l1_ttl_secs: Option<u64>,
    pub metadata_l2_ttl_secs: Option<u64>,
    pub waveform_memory_size: usize,
    pub waveform_memory_ttl_secs: Option<u64>,
    pub waveform_cache_dir: PathBuf,
    pub query_cache_size: usize,
    pub query_cache_ttl_secs: Option<u64>,
}

impl CacheConfig {
    fn with_defaults(cache_root: PathBuf) -> Self {
        Self {
            metadata_l1_size: 1000,
            metadata_l2_size: 10_000,
            metadata_l1_ttl_secs: Some(60),
            metadata_l2_ttl_secs: None,
            waveform_memory_size: 100,
            waveform_memory_ttl_secs: Some(300),
            waveform_cache_dir: cache_root.join("waveforms"),
            query_cache_size: 500,
            query_cache_ttl_secs: Some(60),
        }
    }
}

/// Top-level engine configuration, library roots plus every subsystem knob
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub library_roots: Vec<PathBuf>,
    pub data_dir: PathBuf,
    pub indexing: IndexingConfig,
    pub translation: TranslationConfig,
    pub cache: CacheConfig,
}

/// Mirror of the on-disk TOML layout consulted by [`EngineConfig::resolve`]
#[derive(Debug, Deserialize, Default)]
struct TomlConfig {
    library_roots: Option<Vec<String>>,
    data_dir: Option<String>,
    indexing_chunk_size: Option<usize>,
    indexing_memory_limit_mb: Option<u64>,
    indexing_cpu_workers: Option<usize>,
    translate_chunk_size: Option<usize>,
    translate_concurrency: Option<usize>,
    translate_provider_id: Option<String>,
    translate_endpoint: Option<String>,
    translate_model_id: Option<String>,
}

impl EngineConfig {
    /// Resolve the engine configuration: environment variables override a
    /// TOML config file, which overrides the compiled defaults.
    pub fn resolve(toml_path: Option<&std::path::Path>) -> sfx_common::Result<Self> {
        let toml_cfg = toml_path
            .filter(|p| p.exists())
            .map(Self::load_toml)
            .transpose()?
            .unwrap_or_default();

        let data_dir = std::env::var("SFX_DATA_DIR")
            .ok()
            .map(PathBuf::from)
            .or_else(|| toml_cfg.data_dir.clone().map(PathBuf::from))
            .unwrap_or_else(|| sfx_common::config::resolve_root_folder(None, "SFX_DATA_DIR", None)
                .unwrap_or_else(|_| PathBuf::from("./sfx-data")));

        let library_roots = std::env::var("SFX_LIBRARY_ROOTS")
            .ok()
            .map(|v| v.split(':').map(PathBuf::from).collect())
            .or_else(|| {
                toml_cfg
                    .library_roots
                    .clone()
                    .map(|v| v.into_iter().map(PathBuf::from).collect())
            })
            .unwrap_or_default();

        let mut indexing = IndexingConfig::default();
        if let Some(v) = toml_cfg.indexing_chunk_size {
            indexing.chunk_size_max = indexing.chunk_size_max.min(v.max(indexing.chunk_size_min));
        }
        if let Some(v) = toml_cfg.indexing_memory_limit_mb {
            indexing.memory_limit_mb = Some(v);
        }
        if let Some(v) = toml_cfg.indexing_cpu_workers {
            indexing.cpu_workers = v;
        }
        if let Ok(v) = std::env::var("SFX_INDEXING_MEMORY_LIMIT_MB") {
            if let Ok(v) = v.parse() {
                indexing.memory_limit_mb = Some(v);
            }
        }

        let mut translation = TranslationConfig::default();
        if let Some(v) = toml_cfg.translate_chunk_size {
            translation.chunk_size = v.clamp(translation.chunk_size_min, translation.chunk_size_max);
        }
        if let Some(v) = toml_cfg.translate_concurrency {
            translation.concurrency_limit = v;
        }
        if let Some(v) = &toml_cfg.translate_provider_id {
            translation.provider_id = v.clone();
        }
        if let Some(v) = &toml_cfg.translate_endpoint {
            translation.endpoint = v.clone();
        }
        if let Some(v) = &toml_cfg.translate_model_id {
            translation.model_id = v.clone();
        }
        if let Ok(key) = std::env::var("SFX_TRANSLATE_API_KEY") {
            translation.api_key = key;
        }

        info!(
            roots = library_roots.len(),
            data_dir = %data_dir.display(),
            "engine configuration resolved"
        );

        Ok(Self {
            cache: CacheConfig::with_defaults(data_dir.clone()),
            library_roots,
            data_dir,
            indexing,
            translation,
        })
    }

    fn load_toml(path: &std::path::Path) -> sfx_common::Result<TomlConfig> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| sfx_common::Error::Config(format!("invalid config file {:?}: {e}", path)))
    }
}
