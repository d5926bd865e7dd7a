//! Runtime settings
//!
//! Every value can come from a flag or from the environment variable the
//! LocalForge backend has always read.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use localforge_store::{RetrievalConfig, Retriever, StrategyChoice, Vectorizer, VectorizerConfig};

use crate::error::ServerResult;
use crate::ollama::OllamaConfig;

#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Directory of the vector store
    #[arg(long, env = "VECTOR_DB_PATH", default_value = "./data/localforge", global = true)]
    pub db_path: PathBuf,

    /// Cache directory of the embedding model
    #[arg(long, env = "EMBEDDING_MODEL_PATH", global = true)]
    pub model_path: Option<PathBuf>,

    /// Embedding strategy: auto, model or hashing
    #[arg(long, env = "LOCALFORGE_STRATEGY", default_value = "auto", global = true)]
    pub strategy: StrategyChoice,

    /// Base URL of the Ollama server
    #[arg(long, env = "OLLAMA_URL", default_value = "http://localhost:11434", global = true)]
    pub ollama_url: String,

    /// Ollama model used for answers
    #[arg(long, env = "OLLAMA_MODEL", default_value = "llama3.1", global = true)]
    pub ollama_model: String,

    /// Folder indexed when the server starts
    #[arg(long, env = "AUTO_INDEX_PATH", global = true)]
    pub auto_index_path: Option<PathBuf>,

    /// Time budget of one embedding call, in seconds
    #[arg(long, env = "LOCALFORGE_EMBED_TIMEOUT_SECS", default_value_t = 30, global = true)]
    pub embed_timeout_secs: u64,

    /// Embedding calls run in parallel
    #[arg(long, env = "LOCALFORGE_MAX_CONCURRENCY", default_value_t = 4, global = true)]
    pub max_concurrency: usize,

    /// Character budget of the context sent to the model
    #[arg(long, env = "LOCALFORGE_CONTEXT_BUDGET", default_value_t = 12_000, global = true)]
    pub context_budget: usize,
}

impl Settings {
    pub fn vectorizer_config(&self) -> VectorizerConfig {
        VectorizerConfig {
            strategy: self.strategy,
            model_cache_dir: self.model_path.clone(),
            ..Default::default()
        }
    }

    pub fn retrieval_config(&self) -> RetrievalConfig {
        RetrievalConfig {
            max_concurrent_embeds: self.max_concurrency.max(1),
            embed_timeout: Duration::from_secs(self.embed_timeout_secs.max(1)),
            context_char_budget: self.context_budget,
            ..Default::default()
        }
    }

    pub fn ollama_config(&self) -> OllamaConfig {
        OllamaConfig {
            base_url: self.ollama_url.clone(),
            model: self.ollama_model.clone(),
            ..Default::default()
        }
    }

    /// Build the vectorizer and open the store
    pub fn open_retriever(&self) -> ServerResult<Retriever> {
        let vectorizer = Vectorizer::from_config(&self.vectorizer_config())?;
        tracing::info!("Opening vector store at {:?}", self.db_path);
        Ok(Retriever::open(
            &self.db_path,
            vectorizer,
            self.retrieval_config(),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        settings: Settings,
    }

    fn parse(args: &[&str]) -> Settings {
        TestCli::try_parse_from(std::iter::once("localforge").chain(args.iter().copied()))
            .unwrap()
            .settings
    }

    #[test]
    fn test_flags_map_to_configs() {
        let settings = parse(&[
            "--db-path",
            "/tmp/lf",
            "--strategy",
            "hashing",
            "--embed-timeout-secs",
            "7",
            "--max-concurrency",
            "0",
            "--context-budget",
            "500",
            "--ollama-url",
            "http://gpu-box:11434",
            "--ollama-model",
            "qwen2.5-coder",
        ]);

        assert_eq!(settings.db_path, PathBuf::from("/tmp/lf"));

        let vectorizer = settings.vectorizer_config();
        assert_eq!(vectorizer.strategy, StrategyChoice::Hashing);

        let retrieval = settings.retrieval_config();
        assert_eq!(retrieval.embed_timeout, Duration::from_secs(7));
        assert_eq!(retrieval.max_concurrent_embeds, 1);
        assert_eq!(retrieval.context_char_budget, 500);

        let ollama = settings.ollama_config();
        assert_eq!(ollama.base_url, "http://gpu-box:11434");
        assert_eq!(ollama.model, "qwen2.5-coder");
    }

    #[test]
    fn test_unknown_strategy_is_rejected() {
        assert!(TestCli::try_parse_from(["localforge", "--strategy", "ann"]).is_err());
    }

    #[test]
    fn test_open_retriever_with_hashing() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = dir.path().join("store");
        let settings = parse(&["--db-path", db.to_str().unwrap(), "--strategy", "hashing"]);

        let retriever = settings.open_retriever().unwrap();
        assert_eq!(
            retriever.vectorizer().active_strategy_id().unwrap(),
            "hash-tf-512/v1"
        );
        assert!(db.exists());
    }
}
