use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use sift_chunker::ChunkerConfig;
use sift_indexer::{EmbedSettings, IngestConfig};
use sift_search::{Bm25Params, CacheConfig, EngineConfig, EnhancerConfig, FusionConfig};
use sift_vector_store::{EmbedderBackend, EmbedderConfig};
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "SIFT_CONFIG";
pub const EMBEDDING_MODE_ENV: &str = "SIFT_EMBEDDING_MODE";

/// All tunables, one TOML table per component. Missing tables and keys take defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiftConfig {
    pub chunker: ChunkerConfig,
    pub embedder: EmbedderConfig,
    pub bm25: Bm25Params,
    pub fusion: FusionConfig,
    pub cache: CacheConfig,
    pub engine: EngineConfig,
    pub enhancer: EnhancerConfig,
    pub ingest: IngestConfig,
}

impl SiftConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("Invalid sift configuration")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("In {}", path.display()))
    }

    /// Resolve the configuration for this process.
    ///
    /// An explicit path wins over `SIFT_CONFIG`; with neither, defaults are used.
    /// `SIFT_EMBEDDING_MODE` then overrides the embedder backend.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
        let mut config = match path {
            Some(path) => {
                log::debug!("Loading configuration from {}", path.display());
                Self::from_file(&path)?
            }
            None => Self::default(),
        };
        if let Ok(mode) = std::env::var(EMBEDDING_MODE_ENV) {
            config.apply_embedding_mode(&mode)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn apply_embedding_mode(&mut self, mode: &str) -> Result<()> {
        self.embedder.backend = EmbedderBackend::parse(mode).with_context(|| {
            format!("{EMBEDDING_MODE_ENV} must be `local` or `remote`, got {mode:?}")
        })?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.chunker.validate().context("[chunker]")?;
        self.embedder
            .validate()
            .map_err(anyhow::Error::msg)
            .context("[embedder]")?;
        self.bm25
            .validate()
            .map_err(anyhow::Error::msg)
            .context("[bm25]")?;
        self.fusion
            .validate()
            .map_err(anyhow::Error::msg)
            .context("[fusion]")?;
        self.cache
            .validate()
            .map_err(anyhow::Error::msg)
            .context("[cache]")?;
        self.engine
            .validate()
            .map_err(anyhow::Error::msg)
            .context("[engine]")?;
        self.enhancer
            .validate()
            .map_err(anyhow::Error::msg)
            .context("[enhancer]")?;
        self.ingest
            .validate()
            .map_err(anyhow::Error::msg)
            .context("[ingest]")?;
        Ok(())
    }

    #[must_use]
    pub fn embed_settings(&self) -> EmbedSettings {
        EmbedSettings {
            timeout: self.embedder.timeout(),
            max_batch: self.embedder.max_batch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sift_search::Normalization;

    #[test]
    fn empty_file_means_defaults() {
        let config = SiftConfig::from_toml_str("").unwrap();
        assert_eq!(config, SiftConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let config = SiftConfig::from_toml_str(
            r#"
            [chunker]
            size = 200

            [fusion]
            normalization = "reciprocal_rank"

            [cache]
            ttl_secs = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.chunker.size, 200);
        assert_eq!(config.chunker.overlap, 50);
        assert_eq!(config.fusion.normalization, Normalization::ReciprocalRank);
        assert_eq!(config.cache.ttl_secs, 30);
        assert_eq!(config.cache.capacity, CacheConfig::default().capacity);
        assert_eq!(config.engine, EngineConfig::default());
    }

    #[test]
    fn invalid_sections_are_named() {
        let config = SiftConfig::from_toml_str("[chunker]\nsize = 10\noverlap = 10\n").unwrap();
        let err = format!("{:#}", config.validate().unwrap_err());
        assert!(err.contains("[chunker]"), "{err}");
    }

    #[test]
    fn enhancer_table_overrides_vocabulary() {
        let config = SiftConfig::from_toml_str(
            r#"
            [enhancer]
            max_variants = 3

            [enhancer.expansions]
            overdraft = ["nsf", "insufficient funds"]
            "#,
        )
        .unwrap();
        assert!(config.enhancer.enabled);
        assert_eq!(config.enhancer.max_variants, 3);
        assert_eq!(config.enhancer.expansions.len(), 1);
        assert_eq!(
            config.enhancer.products,
            EnhancerConfig::default().products
        );

        let off = SiftConfig::from_toml_str("[enhancer]\nmax_variants = 0\n").unwrap();
        let err = format!("{:#}", off.validate().unwrap_err());
        assert!(err.contains("[enhancer]"), "{err}");
    }

    #[test]
    fn embedding_mode_override() {
        let mut config = SiftConfig::default();
        config.apply_embedding_mode("REMOTE").unwrap();
        assert_eq!(config.embedder.backend, EmbedderBackend::Remote);
        // remote without an endpoint is rejected
        assert!(config.validate().is_err());
        assert!(config.apply_embedding_mode("gpu").is_err());
    }

    #[test]
    fn mistyped_values_are_rejected() {
        assert!(SiftConfig::from_toml_str("[cache]\ncapacity = \"many\"\n").is_err());
    }
}
