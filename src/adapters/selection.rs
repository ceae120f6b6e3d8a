//! Weight file selection
//!
//! When a repository publishes the same model in several formats, only one
//! weight format is downloaded. Preference, highest first:
//! 1. gguf (pre-quantized, single file; tokenizer embedded)
//! 2. onnx (portable inference graph)
//! 3. safetensors
//! 4. pytorch checkpoints (`.bin`, `.pt`, `.pth`)
//!
//! Small config and tokenizer sidecars ride along with whichever format wins,
//! except that gguf drops tokenizer sidecars. ONNX graphs keep their
//! external-data files (`model.onnx_data`, `model.onnx.data`). Trainer
//! state such as `optimizer.pt` is never treated as weights.

use crate::manifest::ExecutionFormat;
use std::collections::BTreeSet;

/// Tokenizer files requested even when the upstream listing is unknown
pub const TOKENIZER_SIDECARS: [&str; 4] = [
    "tokenizer.json",
    "tokenizer_config.json",
    "vocab.txt",
    "vocab.json",
];

/// Additional files that carry tokenizer state
const TOKENIZER_FILES: [&str; 6] = [
    "merges.txt",
    "special_tokens_map.json",
    "added_tokens.json",
    "spiece.model",
    "sentencepiece.bpe.model",
    "tokenizer.model",
];

/// Checkpoints written by trainers alongside the weights
const TRAINING_STATE_FILES: [&str; 6] = [
    "training_args.bin",
    "optimizer.pt",
    "optimizer.bin",
    "scheduler.pt",
    "scaler.pt",
    "trainer_state.pt",
];

/// gguf quantizations in order of preference
pub const GGUF_QUANT_PREFERENCE: [&str; 5] = ["q4_k_m", "q4_k_s", "q4_0", "q5_k_m", "q8_0"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightFormat {
    Gguf,
    Onnx,
    Safetensors,
    Pytorch,
    Unknown,
}

impl WeightFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gguf => "gguf",
            Self::Onnx => "onnx",
            Self::Safetensors => "safetensors",
            Self::Pytorch => "pytorch",
            Self::Unknown => "unknown",
        }
    }

    pub fn execution_format(&self) -> Option<ExecutionFormat> {
        match self {
            Self::Gguf => Some(ExecutionFormat::Gguf),
            Self::Onnx => Some(ExecutionFormat::Onnx),
            Self::Safetensors => Some(ExecutionFormat::Safetensors),
            Self::Pytorch => Some(ExecutionFormat::Pytorch),
            Self::Unknown => None,
        }
    }

    /// Whether the format is ready to run without a conversion step
    ///
    /// Adapters record these as the manifest's type and execution format.
    pub fn is_runtime_ready(&self) -> bool {
        matches!(self, Self::Gguf | Self::Onnx | Self::Safetensors)
    }
}

/// Files chosen for download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSelection {
    pub format: WeightFormat,
    pub files: Vec<String>,
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn is_config_file(path: &str) -> bool {
    let lower = path.to_lowercase();
    [".json", ".txt", ".model"].iter().any(|ext| lower.ends_with(ext))
}

/// Tokenizer or vocabulary sidecar
pub fn is_tokenizer_file(path: &str) -> bool {
    let name = file_name(path).to_lowercase();
    TOKENIZER_SIDECARS.contains(&name.as_str()) || TOKENIZER_FILES.contains(&name.as_str())
}

fn is_training_state(path: &str) -> bool {
    let name = file_name(path).to_lowercase();
    TRAINING_STATE_FILES.contains(&name.as_str()) || name.starts_with("rng_state")
}

/// External tensor data written next to a large ONNX graph
fn is_onnx_external_data(path: &str, graph: &str) -> bool {
    path.strip_prefix(graph)
        .is_some_and(|rest| rest.starts_with("_data") || rest.starts_with(".data"))
}

fn weight_format_of(path: &str) -> Option<WeightFormat> {
    if is_training_state(path) {
        return None;
    }
    let lower = path.to_lowercase();
    if lower.ends_with(".gguf") {
        Some(WeightFormat::Gguf)
    } else if lower.ends_with(".onnx") {
        Some(WeightFormat::Onnx)
    } else if lower.ends_with(".safetensors") {
        Some(WeightFormat::Safetensors)
    } else if [".bin", ".pt", ".pth"].iter().any(|ext| lower.ends_with(ext)) {
        Some(WeightFormat::Pytorch)
    } else {
        None
    }
}

/// Pick one gguf file, preferring the usual quantization sweet spots
pub fn select_best_gguf<'a>(files: &[&'a str]) -> Option<&'a str> {
    for quant in GGUF_QUANT_PREFERENCE {
        if let Some(file) = files.iter().copied().find(|f| f.to_lowercase().contains(quant)) {
            return Some(file);
        }
    }
    files.iter().min().copied()
}

/// Choose the files to download from a repository listing
///
/// `listing_known` is false when the listing is a guessed fallback; the
/// standard tokenizer sidecars are then requested speculatively.
pub fn select_files<S: AsRef<str>>(listing: &[S], listing_known: bool) -> FileSelection {
    let listing: BTreeSet<&str> = listing.iter().map(|f| f.as_ref()).collect();
    let configs: Vec<&str> = listing.iter().copied().filter(|f| is_config_file(f)).collect();

    let of_format = |format: WeightFormat| -> Vec<&str> {
        listing
            .iter()
            .copied()
            .filter(|f| weight_format_of(f) == Some(format))
            .collect()
    };

    let priority = [
        WeightFormat::Gguf,
        WeightFormat::Onnx,
        WeightFormat::Safetensors,
        WeightFormat::Pytorch,
    ];
    let chosen = priority
        .into_iter()
        .map(|format| (format, of_format(format)))
        .find(|(_, files)| !files.is_empty());

    let mut selected: BTreeSet<String> = BTreeSet::new();
    let format = match chosen {
        Some((WeightFormat::Gguf, files)) => {
            selected.extend(select_best_gguf(&files).map(String::from));
            selected.extend(
                configs
                    .iter()
                    .filter(|f| !is_tokenizer_file(f))
                    .map(|f| f.to_string()),
            );
            WeightFormat::Gguf
        }
        Some((WeightFormat::Onnx, graphs)) => {
            selected.extend(graphs.iter().map(|f| f.to_string()));
            selected.extend(
                listing
                    .iter()
                    .filter(|f| graphs.iter().any(|graph| is_onnx_external_data(f, graph)))
                    .map(|f| f.to_string()),
            );
            selected.extend(configs.iter().map(|f| f.to_string()));
            WeightFormat::Onnx
        }
        Some((format, files)) => {
            selected.extend(files.iter().map(|f| f.to_string()));
            selected.extend(configs.iter().map(|f| f.to_string()));
            format
        }
        None => {
            selected.extend(
                listing
                    .iter()
                    .filter(|f| !is_training_state(f))
                    .map(|f| f.to_string()),
            );
            WeightFormat::Unknown
        }
    };

    if !listing_known && format != WeightFormat::Gguf {
        selected.extend(TOKENIZER_SIDECARS.iter().map(|f| f.to_string()));
    }

    FileSelection {
        format,
        files: selected.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_onnx_beats_pytorch_and_keeps_sidecars() {
        let listing = [
            "config.json",
            "pytorch_model.bin",
            "model.onnx",
            "tokenizer.json",
            "vocab.txt",
            "README.md",
        ];
        let selection = select_files(&listing, true);
        assert_eq!(selection.format, WeightFormat::Onnx);
        assert_eq!(
            selection.files,
            vec!["config.json", "model.onnx", "tokenizer.json", "vocab.txt"]
        );
    }

    #[test]
    fn test_safetensors_beats_pytorch() {
        let listing = [
            "config.json",
            "model.safetensors",
            "pytorch_model.bin",
            "tf_model.h5",
        ];
        let selection = select_files(&listing, true);
        assert_eq!(selection.format, WeightFormat::Safetensors);
        assert_eq!(selection.files, vec!["config.json", "model.safetensors"]);
    }

    #[test]
    fn test_gguf_single_quant_without_tokenizer() {
        let listing = [
            "config.json",
            "model-q8_0.gguf",
            "model-Q4_K_M.gguf",
            "model-f16.gguf",
            "tokenizer.json",
        ];
        let selection = select_files(&listing, true);
        assert_eq!(selection.format, WeightFormat::Gguf);
        assert_eq!(selection.files, vec!["config.json", "model-Q4_K_M.gguf"]);
    }

    #[test]
    fn test_gguf_without_known_quant_picks_first() {
        assert_eq!(
            select_best_gguf(&["b-f16.gguf", "a-f32.gguf"]),
            Some("a-f32.gguf")
        );
        assert_eq!(select_best_gguf(&[]), None);
    }

    #[test]
    fn test_unknown_keeps_everything() {
        let listing = ["README.md", "weights.msgpack"];
        let selection = select_files(&listing, true);
        assert_eq!(selection.format, WeightFormat::Unknown);
        assert_eq!(selection.files, vec!["README.md", "weights.msgpack"]);
    }

    #[test]
    fn test_unknown_listing_adds_sidecars() {
        let listing = ["config.json", "pytorch_model.bin"];
        let selection = select_files(&listing, false);
        assert_eq!(selection.format, WeightFormat::Pytorch);
        for sidecar in TOKENIZER_SIDECARS {
            assert!(selection.files.contains(&sidecar.to_string()));
        }
        assert!(selection.files.contains(&"pytorch_model.bin".to_string()));
    }

    #[test]
    fn test_nested_onnx_files() {
        let listing = [
            "onnx/model.onnx",
            "onnx/model_quantized.onnx",
            "model.safetensors",
            "special_tokens_map.json",
        ];
        let selection = select_files(&listing, true);
        assert_eq!(selection.format, WeightFormat::Onnx);
        assert_eq!(
            selection.files,
            vec![
                "onnx/model.onnx",
                "onnx/model_quantized.onnx",
                "special_tokens_map.json"
            ]
        );
    }

    #[test]
    fn test_onnx_keeps_external_data() {
        let listing = [
            "onnx/model.onnx",
            "onnx/model.onnx_data",
            "decoder.onnx",
            "decoder.onnx.data",
            "model.safetensors",
            "config.json",
        ];
        let selection = select_files(&listing, true);
        assert_eq!(selection.format, WeightFormat::Onnx);
        assert_eq!(
            selection.files,
            vec![
                "config.json",
                "decoder.onnx",
                "decoder.onnx.data",
                "onnx/model.onnx",
                "onnx/model.onnx_data"
            ]
        );
    }

    #[test]
    fn test_external_data_needs_matching_graph() {
        assert!(is_onnx_external_data("onnx/model.onnx_data", "onnx/model.onnx"));
        assert!(!is_onnx_external_data("model.onnx_data", "onnx/model.onnx"));
        assert!(!is_onnx_external_data("onnx/model.onnx", "onnx/model.onnx"));
    }

    #[test]
    fn test_training_state_is_not_weights() {
        let listing = [
            "config.json",
            "pytorch_model.bin",
            "training_args.bin",
            "optimizer.pt",
            "scheduler.pt",
            "rng_state.pth",
            "rng_state_3.pth",
        ];
        let selection = select_files(&listing, true);
        assert_eq!(selection.format, WeightFormat::Pytorch);
        assert_eq!(selection.files, vec!["config.json", "pytorch_model.bin"]);

        let only_state = select_files(&["training_args.bin", "README.md"], true);
        assert_eq!(only_state.format, WeightFormat::Unknown);
        assert_eq!(only_state.files, vec!["README.md"]);
    }

    #[test]
    fn test_tokenizer_file_detection() {
        assert!(is_tokenizer_file("tokenizer.json"));
        assert!(is_tokenizer_file("sub/vocab.txt"));
        assert!(is_tokenizer_file("merges.txt"));
        assert!(!is_tokenizer_file("config.json"));
    }
}
