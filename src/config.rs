//! JSON configuration for the build.
//!
//! ```json
//! {
//!   "mph-language-model": {
//!     "arpa-file": "lm.arpa.gz",
//!     "binary-file-prefix": "lm-bin"
//!   }
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LmError, Result};

/// Top-level configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct LmConfig {
    pub mph_language_model: MphLanguageModelConfig,
}

/// Where to read the ARPA model and where to write its maps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct MphLanguageModelConfig {
    pub arpa_file: PathBuf,
    pub binary_file_prefix: PathBuf,
}

impl LmConfig {
    pub fn new(arpa_file: impl Into<PathBuf>, binary_file_prefix: impl Into<PathBuf>) -> Self {
        Self {
            mph_language_model: MphLanguageModelConfig {
                arpa_file: arpa_file.into(),
                binary_file_prefix: binary_file_prefix.into(),
            },
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| LmError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| LmError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Both paths must be non-empty.
    pub fn validate(&self) -> Result<()> {
        let table = &self.mph_language_model;
        if table.arpa_file.as_os_str().is_empty() {
            return Err(LmError::Config("arpa-file must not be empty".into()));
        }
        if table.binary_file_prefix.as_os_str().is_empty() {
            return Err(LmError::Config(
                "binary-file-prefix must not be empty".into(),
            ));
        }
        Ok(())
    }
}
