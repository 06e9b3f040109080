use crate::error::{ChunkerError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for window chunking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Window size in characters
    pub size: usize,

    /// Characters shared between consecutive windows (must be < size)
    pub overlap: usize,

    /// Documents shorter than this are skipped at ingestion
    pub min_document_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            size: 500,
            overlap: 50,
            min_document_chars: 10,
        }
    }
}

impl ChunkerConfig {
    #[must_use]
    pub fn new(size: usize, overlap: usize) -> Self {
        Self {
            size,
            overlap,
            ..Default::default()
        }
    }

    #[must_use]
    pub const fn min_document_chars(mut self, min: usize) -> Self {
        self.min_document_chars = min;
        self
    }

    /// Distance between the starts of consecutive windows.
    #[must_use]
    pub const fn stride(&self) -> usize {
        self.size - self.overlap
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(ChunkerError::invalid_config("size must be > 0"));
        }

        if self.overlap >= self.size {
            return Err(ChunkerError::invalid_config(format!(
                "overlap ({}) must be smaller than size ({})",
                self.overlap, self.size
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = ChunkerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.stride(), 450);
    }

    #[test]
    fn test_config_validation() {
        assert!(ChunkerConfig::new(0, 0).validate().is_err());
        assert!(ChunkerConfig::new(100, 100).validate().is_err());
        assert!(ChunkerConfig::new(100, 150).validate().is_err());
        assert!(ChunkerConfig::new(1, 0).validate().is_ok());
        assert!(ChunkerConfig::new(100, 99).validate().is_ok());
    }

    #[test]
    fn test_partial_config_deserializes_with_defaults() {
        let config: ChunkerConfig = serde_json::from_str(r#"{"size": 200}"#).unwrap();
        assert_eq!(config.size, 200);
        assert_eq!(config.overlap, 50);
        assert_eq!(config.min_document_chars, 10);
    }
}
