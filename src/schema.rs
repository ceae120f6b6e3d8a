//! I/O schema inference
//!
//! Derives tensor inputs/outputs from a model's declared architecture type
//! (the `model_type` field of a HuggingFace-style config.json). Inference is
//! total: unknown or unparseable architectures degrade to the generic
//! single-tensor schema.

use crate::manifest::{Io, IoSpec, Preprocessing};
use serde::Deserialize;
use serde_json::json;

/// Tokenizer file referenced by text-model preprocessing hints
pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// Known architecture families
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchitectureFamily {
    /// Encoder-only token models (input_ids, attention_mask, token_type_ids)
    BertLike,
    /// Decoder-only causal LMs
    GptLike,
    /// Encoder-decoder text models
    T5Like,
    /// Vision transformers over normalized pixels
    VisionTransformer,
    Generic,
}

impl ArchitectureFamily {
    pub fn from_model_type(model_type: &str) -> Self {
        match model_type.trim().to_lowercase().as_str() {
            "bert" | "roberta" | "distilbert" | "albert" | "electra" | "xlm-roberta" => {
                Self::BertLike
            }
            "gpt2" | "gpt" | "gpt-neo" | "gpt_neo" | "gpt-j" | "gptj" => Self::GptLike,
            "t5" | "mt5" | "ul2" => Self::T5Like,
            "vit" | "deit" | "swin" => Self::VisionTransformer,
            _ => Self::Generic,
        }
    }

    /// Tokenizer flavour recorded in preprocessing hints
    fn tokenizer_type(&self, model_type: &str) -> String {
        match self {
            Self::GptLike => "gpt2".to_string(),
            Self::T5Like => "t5".to_string(),
            _ => model_type.to_lowercase(),
        }
    }
}

/// Partial view of config.json
#[derive(Debug, Deserialize)]
struct RawConfig {
    model_type: Option<String>,
    #[serde(default)]
    architectures: Vec<String>,
}

/// Extract the architecture type from config.json bytes
///
/// Falls back to the first `architectures` entry when `model_type` is absent
/// (e.g. `BertForMaskedLM` -> `bert`).
pub fn parse_model_type(config_json: &[u8]) -> Option<String> {
    let raw: RawConfig = serde_json::from_slice(config_json).ok()?;
    if let Some(model_type) = raw.model_type.filter(|t| !t.is_empty()) {
        return Some(model_type.to_lowercase());
    }

    let arch = raw.architectures.first()?;
    let base = ["For", "Model", "LMHead"]
        .iter()
        .filter_map(|suffix| arch.find(suffix))
        .min()
        .map(|idx| &arch[..idx])
        .unwrap_or(arch);
    (!base.is_empty()).then(|| base.to_lowercase())
}

/// Infer the I/O schema for an architecture type
pub fn infer_io_schema(model_type: &str) -> Io {
    let family = ArchitectureFamily::from_model_type(model_type);
    let tokenization = || Preprocessing {
        kind: "tokenization".to_string(),
        tokenizer: Some(TOKENIZER_FILE.to_string()),
        tokenizer_type: Some(family.tokenizer_type(model_type)),
        config: serde_json::Map::new(),
    };
    let token_input = |name: &str| IoSpec::new(name, "int64", &[-1, -1]).with_preprocessing(tokenization());
    let sequence_logits = || vec![IoSpec::new("logits", "float32", &[-1, -1, -1])];

    match family {
        ArchitectureFamily::BertLike => Io {
            inputs: vec![
                token_input("input_ids"),
                token_input("attention_mask"),
                token_input("token_type_ids"),
            ],
            outputs: sequence_logits(),
        },
        ArchitectureFamily::GptLike | ArchitectureFamily::T5Like => Io {
            inputs: vec![token_input("input_ids"), token_input("attention_mask")],
            outputs: sequence_logits(),
        },
        ArchitectureFamily::VisionTransformer => {
            let mut config = serde_json::Map::new();
            config.insert("mean".into(), json!([0.485, 0.456, 0.406]));
            config.insert("std".into(), json!([0.229, 0.224, 0.225]));
            config.insert("resize".into(), json!(224));
            let normalization = Preprocessing {
                kind: "normalization".to_string(),
                tokenizer: None,
                tokenizer_type: None,
                config,
            };
            Io {
                inputs: vec![
                    IoSpec::new("pixel_values", "float32", &[-1, 3, 224, 224])
                        .with_preprocessing(normalization),
                ],
                outputs: vec![IoSpec::new("logits", "float32", &[-1, -1])],
            }
        }
        ArchitectureFamily::Generic => Io::generic(),
    }
}

/// Infer the I/O schema from raw config.json bytes, falling back to generic
pub fn io_from_config(config_json: &[u8]) -> Io {
    match parse_model_type(config_json) {
        Some(model_type) => infer_io_schema(&model_type),
        None => {
            tracing::debug!("config.json has no usable model_type, using generic I/O schema");
            Io::generic()
        }
    }
}
