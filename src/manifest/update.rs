//! Post-assembly execution format update
//!
//! Once a package has been assembled (and possibly converted), the declared
//! execution format is reconciled with the files actually on disk. The scan
//! is a pure function of the sorted file list and the manifest's source type,
//! so running it again on an unchanged directory yields the same answer.

use super::{ExecutionFormat, Manifest};
use crate::error::InstallResult;
use std::path::Path;
use walkdir::WalkDir;

/// Recompute `format.execution_format` from the files under `dir`
pub fn update_execution_format(manifest: &mut Manifest, dir: &Path) -> InstallResult<ExecutionFormat> {
    let files = list_relative_files(dir)?;
    let detected = detect_execution_format(&files, &manifest.format.kind);

    let onnx_graphs = files.iter().filter(|f| has_ext(f, ".onnx")).count();
    manifest.format.multi_encoder = onnx_graphs > 1;

    if manifest.format.execution_format != detected {
        tracing::info!(
            model = %manifest.full_version(),
            from = %manifest.format.execution_format,
            to = %detected,
            "Execution format updated from package contents"
        );
    }
    manifest.format.execution_format = detected;

    Ok(detected)
}

/// Pick an execution format for a file set
///
/// Order: converted ONNX graph, then gguf, safetensors, pytorch and
/// tensorflow artifacts, then the source type hint, then ONNX.
pub fn detect_execution_format<S: AsRef<str>>(files: &[S], type_hint: &str) -> ExecutionFormat {
    let names: Vec<String> = files.iter().map(|f| f.as_ref().to_lowercase()).collect();
    let hint = type_hint.to_lowercase();

    for format in SCAN_ORDER {
        if names.iter().any(|f| matches_format(format, f, &hint)) {
            return format;
        }
    }

    ExecutionFormat::from_hint(&hint).unwrap_or(ExecutionFormat::Onnx)
}

const SCAN_ORDER: [ExecutionFormat; 5] = [
    ExecutionFormat::Onnx,
    ExecutionFormat::Gguf,
    ExecutionFormat::Safetensors,
    ExecutionFormat::Pytorch,
    ExecutionFormat::Tensorflow,
];

fn matches_format(format: ExecutionFormat, name: &str, hint: &str) -> bool {
    match format {
        ExecutionFormat::Onnx => has_ext(name, ".onnx"),
        ExecutionFormat::Gguf => has_ext(name, ".gguf"),
        ExecutionFormat::Safetensors => has_ext(name, ".safetensors"),
        ExecutionFormat::Pytorch => is_pytorch_file(name),
        ExecutionFormat::Tensorflow => is_tensorflow_file(name, hint),
    }
}

fn has_ext(name: &str, ext: &str) -> bool {
    name.to_lowercase().ends_with(ext)
}

fn is_pytorch_file(name: &str) -> bool {
    let file = file_name(name);
    file.contains("pytorch") || [".bin", ".pt", ".pth"].iter().any(|ext| file.ends_with(ext))
}

fn is_tensorflow_file(name: &str, hint: &str) -> bool {
    if name.contains("saved_model") || name.contains("tensorflow") {
        return true;
    }
    if [".pb", ".h5", ".tflite"].iter().any(|ext| name.ends_with(ext)) {
        return true;
    }
    name.ends_with(".tar.gz") && hint == "saved_model"
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Sorted, slash-separated relative paths of regular files under `dir`
pub(crate) fn list_relative_files(dir: &Path) -> InstallResult<Vec<String>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(dir) {
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push(rel);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::ModelSpec;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, rel: &str) {
        let path = dir.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_converted_onnx_wins() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "model.onnx");
        touch(&dir, "pytorch_model.bin");
        touch(&dir, "config.json");

        let mut manifest = Manifest::new(&ModelSpec::new("hf", "bert-base-uncased", "latest"));
        manifest.format.kind = "pytorch".into();
        manifest.format.execution_format = ExecutionFormat::Pytorch;

        let format = update_execution_format(&mut manifest, dir.path()).unwrap();
        assert_eq!(format, ExecutionFormat::Onnx);
        assert_eq!(manifest.format.execution_format, ExecutionFormat::Onnx);
        assert!(!manifest.format.multi_encoder);
    }

    #[test]
    fn test_onnx_subdirectory_counts() {
        let files = ["config.json", "onnx/encoder_model.onnx", "onnx/decoder_model.onnx"];
        assert_eq!(detect_execution_format(&files, "pytorch"), ExecutionFormat::Onnx);
    }

    #[test]
    fn test_multi_encoder_flag() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "onnx/encoder_model.onnx");
        touch(&dir, "onnx/decoder_model.onnx");
        let mut manifest = Manifest::new(&ModelSpec::new("hf", "t5-small", "latest"));
        update_execution_format(&mut manifest, dir.path()).unwrap();
        assert!(manifest.format.multi_encoder);
    }

    #[test]
    fn test_scan_priority() {
        assert_eq!(
            detect_execution_format(&["model-q4_k_m.gguf", "config.json"], "pytorch"),
            ExecutionFormat::Gguf
        );
        assert_eq!(
            detect_execution_format(&["model.safetensors", "pytorch_model.bin"], ""),
            ExecutionFormat::Safetensors
        );
        assert_eq!(
            detect_execution_format(&["resnet50-0676ba61.pth"], ""),
            ExecutionFormat::Pytorch
        );
        assert_eq!(
            detect_execution_format(&["saved_model.pb", "variables/variables.index"], ""),
            ExecutionFormat::Tensorflow
        );
        assert_eq!(
            detect_execution_format(&["model.tar.gz"], "saved_model"),
            ExecutionFormat::Tensorflow
        );
    }

    #[test]
    fn test_falls_back_to_type_hint_then_onnx() {
        assert_eq!(
            detect_execution_format(&["config.json", "model.tar.gz"], "modelscope"),
            ExecutionFormat::Pytorch
        );
        assert_eq!(
            detect_execution_format(&["config.json"], "unknown"),
            ExecutionFormat::Onnx
        );
        let empty: [&str; 0] = [];
        assert_eq!(detect_execution_format(&empty, ""), ExecutionFormat::Onnx);
    }

    #[test]
    fn test_update_is_idempotent() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "model.safetensors");
        touch(&dir, "tokenizer.json");
        let mut manifest = Manifest::new(&ModelSpec::new("hf", "gte-small", "latest"));

        let first = update_execution_format(&mut manifest, dir.path()).unwrap();
        let snapshot = manifest.clone();
        let second = update_execution_format(&mut manifest, dir.path()).unwrap();

        assert_eq!(first, second);
        assert_eq!(manifest, snapshot);
    }

    #[test]
    fn test_list_relative_files_sorted() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "b.json");
        touch(&dir, "a/z.onnx");
        touch(&dir, "a.txt");
        let files = list_relative_files(dir.path()).unwrap();
        assert_eq!(files, vec!["a.txt", "a/z.onnx", "b.json"]);
    }
}
