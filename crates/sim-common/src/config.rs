use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Synthetic generation strategy for [`crate::config::Config::mode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Random,
    Echo,
}

/// A LoRA adapter entry as accepted by `--lora-modules`: a required `name` plus whatever
/// additional fields the caller supplies (vLLM allows arbitrary metadata here).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LoraModuleSpec {
    pub name: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl FromStr for LoraModuleSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s).map_err(|e| format!("invalid --lora-modules entry {s:?}: {e}"))
    }
}

/// Raw CLI surface. Every field is optional so that an unset flag does not clobber a value
/// already present in a loaded YAML file; [`Config::resolve`] layers these on top of the YAML
/// (or built-in) defaults, flag wins.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "llm-sim", version, about = "OpenAI-compatible synthetic inference server")]
pub struct CliArgs {
    /// YAML file with any subset of the server configuration.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub port: Option<u16>,

    /// Canonical base model name.
    #[arg(long)]
    pub model: Option<String>,

    /// Aliases the base model is served under; first is the display name.
    #[arg(long = "served-model-name", num_args = 1..)]
    pub served_model_names: Option<Vec<String>>,

    /// LoRA adapters to preload, each a JSON object `{"name": "...", ...}`.
    #[arg(long = "lora-modules", num_args = 0..)]
    pub lora_modules: Option<Vec<LoraModuleSpec>>,

    #[arg(long)]
    pub max_num_seqs: Option<u32>,

    /// 0 disables the in-flight token cap.
    #[arg(long)]
    pub max_num_batched_tokens: Option<u32>,

    #[arg(long)]
    pub max_model_len: Option<u32>,

    #[arg(long, value_enum)]
    pub mode: Option<Mode>,

    #[arg(long)]
    pub inter_token_latency_ms: Option<u64>,

    #[arg(long)]
    pub time_to_first_token_ms: Option<u64>,

    #[arg(long)]
    pub kv_cache_transfer_latency_ms: Option<u64>,

    #[arg(long)]
    pub seed: Option<u64>,
}

/// Fully resolved, immutable-after-start server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub model: String,
    pub served_model_names: Vec<String>,
    pub lora_modules: Vec<LoraModuleSpec>,
    pub max_num_seqs: u32,
    pub max_num_batched_tokens: u32,
    pub max_model_len: u32,
    pub mode: Mode,
    pub inter_token_latency_ms: u64,
    pub time_to_first_token_ms: u64,
    pub kv_cache_transfer_latency_ms: u64,
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            model: "synthetic-model".to_string(),
            served_model_names: vec!["synthetic-model".to_string()],
            lora_modules: Vec::new(),
            max_num_seqs: 64,
            max_num_batched_tokens: 0,
            max_model_len: 4096,
            mode: Mode::Random,
            inter_token_latency_ms: 10,
            time_to_first_token_ms: 100,
            kv_cache_transfer_latency_ms: 100,
            seed: None,
        }
    }
}

impl Config {
    /// Parses CLI flags and layers them over a `--config` YAML file (or the built-in defaults).
    pub fn load() -> Self {
        Self::resolve(CliArgs::parse())
    }

    pub fn resolve(cli: CliArgs) -> Self {
        let mut cfg = match &cli.config {
            Some(path) => match std::fs::read_to_string(path) {
                Ok(text) => serde_yaml::from_str(&text).unwrap_or_else(|e| {
                    tracing::warn!(target: "config", error = %e, "failed to parse --config, using defaults");
                    Self::default()
                }),
                Err(e) => {
                    tracing::warn!(target: "config", error = %e, path = %path.display(), "failed to read --config, using defaults");
                    Self::default()
                }
            },
            None => Self::default(),
        };

        if let Some(v) = cli.port {
            cfg.port = v;
        }
        if let Some(v) = cli.model {
            cfg.model = v;
        }
        if let Some(v) = cli.served_model_names {
            cfg.served_model_names = v;
        }
        if let Some(v) = cli.lora_modules {
            cfg.lora_modules = v;
        }
        if let Some(v) = cli.max_num_seqs {
            cfg.max_num_seqs = v;
        }
        if let Some(v) = cli.max_num_batched_tokens {
            cfg.max_num_batched_tokens = v;
        }
        if let Some(v) = cli.max_model_len {
            cfg.max_model_len = v;
        }
        if let Some(v) = cli.mode {
            cfg.mode = v;
        }
        if let Some(v) = cli.inter_token_latency_ms {
            cfg.inter_token_latency_ms = v;
        }
        if let Some(v) = cli.time_to_first_token_ms {
            cfg.time_to_first_token_ms = v;
        }
        if let Some(v) = cli.kv_cache_transfer_latency_ms {
            cfg.kv_cache_transfer_latency_ms = v;
        }
        if cli.seed.is_some() {
            cfg.seed = cli.seed;
        }

        if cfg.served_model_names.is_empty() {
            cfg.served_model_names.push(cfg.model.clone());
        }
        cfg
    }

    /// First served alias: the canonical "display" model name for non-LoRA requests.
    pub fn display_model(&self) -> &str {
        self.served_model_names
            .first()
            .map(String::as_str)
            .unwrap_or(&self.model)
    }

    pub fn is_known_base_model(&self, name: &str) -> bool {
        self.served_model_names.iter().any(|n| n == name) || name == self.model
    }

    pub fn find_lora(&self, name: &str) -> Option<&LoraModuleSpec> {
        self.lora_modules.iter().find(|m| m.name == name)
    }
}
