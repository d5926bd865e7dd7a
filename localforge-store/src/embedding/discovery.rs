//! Model path discovery utilities
//!
//! Finds the embedding model cache directory across installation scenarios.

use std::path::{Path, PathBuf};

/// Resolve where model files are cached, in priority order:
/// 1. Explicit path from configuration
/// 2. EMBEDDING_MODEL_PATH environment variable
/// 3. LOCALFORGE_MODELS_PATH environment variable
/// 4. User home directory (~/.localforge/models)
/// 5. `models/` relative to the working directory
pub fn find_model_cache_dir(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        log::info!("Using configured model path: {}", path.display());
        return path.to_path_buf();
    }

    for var in ["EMBEDDING_MODEL_PATH", "LOCALFORGE_MODELS_PATH"] {
        if let Ok(value) = std::env::var(var) {
            if !value.trim().is_empty() {
                log::info!("Using {}: {}", var, value);
                return PathBuf::from(value);
            }
        }
    }

    if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
        return PathBuf::from(home).join(".localforge").join("models");
    }

    PathBuf::from("models")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_path_wins() {
        let explicit = Path::new("/opt/models");
        assert_eq!(find_model_cache_dir(Some(explicit)), PathBuf::from("/opt/models"));
    }

    #[test]
    fn test_fallback_is_never_empty() {
        let path = find_model_cache_dir(None);
        assert!(!path.as_os_str().is_empty());
    }
}
