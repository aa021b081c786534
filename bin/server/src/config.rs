use serde::{Deserialize, Serialize};
use std::env;

/// Which graph backend the server runs against.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Process-embedded analytical store.
    Embedded,
    /// Bolt-protocol server.
    Bolt,
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// API key for the LM and embedding endpoints
    pub api_key: String,

    /// Base URL override for OpenAI-compatible endpoints (optional)
    pub api_base_url: Option<String>,

    /// Model name for LM operations
    pub model_name: Option<String>,

    /// Embedding model name
    pub embedding_model_name: Option<String>,

    /// Graph backend selection
    pub backend: BackendKind,

    /// Bolt connection URI (required for the bolt backend)
    pub bolt_uri: Option<String>,

    /// Bolt username
    pub bolt_user: Option<String>,

    /// Bolt password
    pub bolt_password: Option<String>,

    /// Checkpoint directory for resumable ingestion
    pub checkpoint_path: Option<String>,

    /// Server host
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok(); // Load .env file if it exists

        let backend = match env::var("GRAPH_BACKEND").as_deref() {
            Ok("bolt") => BackendKind::Bolt,
            Ok("embedded") | Err(_) => BackendKind::Embedded,
            Ok(other) => anyhow::bail!("unknown GRAPH_BACKEND: {}", other),
        };

        let settings = Settings {
            api_key: env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable is required"))?,
            api_base_url: env::var("OPENAI_BASE_URL").ok(),
            model_name: env::var("MODEL_NAME").ok(),
            embedding_model_name: env::var("EMBEDDING_MODEL_NAME").ok(),
            backend,
            bolt_uri: env::var("BOLT_URI").ok(),
            bolt_user: env::var("BOLT_USER").ok(),
            bolt_password: env::var("BOLT_PASSWORD").ok(),
            checkpoint_path: env::var("CHECKPOINT_PATH").ok(),
            host: env::var("HOST").unwrap_or_else(|_| default_host()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or_else(default_port),
        };

        if settings.backend == BackendKind::Bolt && settings.bolt_uri.is_none() {
            anyhow::bail!("BOLT_URI is required when GRAPH_BACKEND=bolt");
        }

        Ok(settings)
    }
}
