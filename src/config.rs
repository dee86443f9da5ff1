//! Service configuration, read from TOML.
//!
//! ```toml
//! max_depth = 5
//! max_batch_keys = 500
//! request_timeout_ms = 2000
//! ```

use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_MAX_DEPTH: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Deepest selection nesting a query may have. Root fields are depth 0.
    pub max_depth: usize,

    /// Launch a batch as soon as it holds this many unique keys.
    pub max_batch_keys: Option<usize>,

    /// Abort requests that take longer than this.
    pub request_timeout_ms: Option<u64>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_batch_keys: None,
            request_timeout_ms: None,
        }
    }
}

impl ServiceConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: ServiceConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_depth == 0 {
            return Err(Error::Config {
                message: "max_depth must be at least 1".to_owned(),
            });
        }

        if self.max_batch_keys == Some(0) {
            return Err(Error::Config {
                message: "max_batch_keys must be at least 1".to_owned(),
            });
        }

        if self.request_timeout_ms == Some(0) {
            return Err(Error::Config {
                message: "request_timeout_ms must be at least 1".to_owned(),
            });
        }

        Ok(())
    }

    pub fn max_batch_keys(&self) -> Option<NonZeroUsize> {
        self.max_batch_keys.and_then(NonZeroUsize::new)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = ServiceConfig::from_toml_str("").unwrap();

        assert_eq!(config, ServiceConfig::default());
        assert_eq!(config.max_depth, 5);
        assert_eq!(config.request_timeout(), None);
    }

    #[test]
    fn values_are_read() {
        let config = ServiceConfig::from_toml_str(
            "max_depth = 3\nmax_batch_keys = 50\nrequest_timeout_ms = 250\n",
        )
        .unwrap();

        assert_eq!(config.max_depth, 3);
        assert_eq!(config.max_batch_keys(), NonZeroUsize::new(50));
        assert_eq!(config.request_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn zero_depth_is_rejected() {
        assert!(matches!(
            ServiceConfig::from_toml_str("max_depth = 0"),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            ServiceConfig::from_toml_str("depth = 3"),
            Err(Error::Toml(..))
        ));
    }
}
