//! Adapter integration tests against an in-process mock upstream

mod common;

use common::{MockUpstream, bert_config, hf_model_info};
use modelpack::adapters::{
    HuggingFaceAdapter, LocalRegistryAdapter, ModelScopeAdapter, TfHubAdapter,
};
use modelpack::fetch::{ProgressCallback, compute_sha256};
use modelpack::manifest::{ExecutionFormat, Io, Manifest};
use modelpack::package::{PackageBuilder, extract_package};
use modelpack::{AdapterConfig, InstallError, ModelSpec, RepositoryAdapter};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::TempDir;

fn config(base_url: &str) -> AdapterConfig {
    AdapterConfig {
        timeout_secs: 10,
        ..Default::default()
    }
    .with_base_url(base_url)
}

fn packaged_files(archive: &std::path::Path) -> Vec<String> {
    let out = TempDir::new().unwrap();
    let mut files = extract_package(archive, out.path()).unwrap();
    files.sort();
    files
}

// ============================================================================
// HuggingFace
// ============================================================================

#[tokio::test]
async fn test_hf_manifest_infers_bert_io() {
    let base = MockUpstream::new()
        .text("/bert-base-uncased", "bert-base-uncased model card")
        .json("/bert-base-uncased/resolve/main/config.json", bert_config())
        .json(
            "/api/models/bert-base-uncased",
            hf_model_info(&["config.json", "pytorch_model.bin"]),
        )
        .serve()
        .await;

    let adapter = HuggingFaceAdapter::new(&config(&base)).unwrap();
    let manifest = adapter
        .get_manifest("hf", "bert-base-uncased", "latest")
        .await
        .unwrap();

    let inputs: Vec<&str> = manifest.io.inputs.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(inputs, vec!["input_ids", "attention_mask", "token_type_ids"]);
    for input in &manifest.io.inputs {
        assert_eq!(input.dtype, "int64");
        let preprocessing = input.preprocessing.as_ref().unwrap();
        assert_eq!(preprocessing.tokenizer.as_deref(), Some("tokenizer.json"));
    }
    assert_eq!(manifest.metadata.license, "apache-2.0");
    assert_eq!(manifest.metadata.description, "Model from Hugging Face: bert-base-uncased");
    assert_eq!(manifest.distribution.registry.namespace, "huggingface");
    assert!(manifest.validate(false).is_ok());
}

#[tokio::test]
async fn test_hf_missing_config_falls_back_to_generic_io() {
    let base = MockUpstream::new()
        .text("/acme/tiny", "model card")
        .serve()
        .await;

    let adapter = HuggingFaceAdapter::new(&config(&base)).unwrap();
    let manifest = adapter.get_manifest("acme", "tiny", "latest").await.unwrap();
    assert_eq!(manifest.io, Io::generic());
    assert_eq!(manifest.metadata.license, "Unknown");
}

#[tokio::test]
async fn test_hf_unknown_model_is_not_found() {
    let base = MockUpstream::new().serve().await;

    let adapter = HuggingFaceAdapter::new(&config(&base)).unwrap();
    let err = adapter
        .get_manifest("hf", "no-such-model", "latest")
        .await
        .unwrap_err();
    assert!(matches!(err, InstallError::NotFound(_)));
}

#[tokio::test]
async fn test_hf_search_page_is_not_found() {
    let base = MockUpstream::new()
        .html(
            "/hf-missing",
            "<html><head><title>Search - Hugging Face</title></head></html>",
        )
        .serve()
        .await;

    let adapter = HuggingFaceAdapter::new(&config(&base)).unwrap();
    let err = adapter
        .get_manifest("hf", "hf-missing", "latest")
        .await
        .unwrap_err();
    assert!(matches!(err, InstallError::NotFound(_)));
}

#[tokio::test]
async fn test_hf_prefers_onnx_and_keeps_sidecars() {
    let base = MockUpstream::new()
        .text("/acme/encoder", "model card")
        .json(
            "/api/models/acme/encoder",
            hf_model_info(&[
                "config.json",
                "pytorch_model.bin",
                "model.onnx",
                "tokenizer.json",
                "README.md",
            ]),
        )
        .json("/acme/encoder/resolve/main/config.json", bert_config())
        .bytes("/acme/encoder/resolve/main/model.onnx", b"onnx graph".to_vec())
        .bytes("/acme/encoder/resolve/main/pytorch_model.bin", b"weights".to_vec())
        .json("/acme/encoder/resolve/main/tokenizer.json", json!({"version": "1.0"}))
        .serve()
        .await;

    let adapter = HuggingFaceAdapter::new(&config(&base)).unwrap();
    let mut manifest = adapter.get_manifest("acme", "encoder", "latest").await.unwrap();

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("package.tar.gz");
    adapter.download_package(&mut manifest, &dest, None).await.unwrap();

    assert_eq!(
        packaged_files(&dest),
        vec!["config.json", "model.onnx", "tokenizer.json"]
    );
    assert_eq!(manifest.format.execution_format, ExecutionFormat::Onnx);
    assert_eq!(manifest.format.kind, "onnx");
    assert_eq!(manifest.format.files.len(), 3);
    assert!(manifest.format.files.iter().all(|f| f.sha256.len() == 64));

    let (sha256, size) = compute_sha256(&dest).unwrap();
    assert_eq!(manifest.distribution.package.sha256, sha256);
    assert_eq!(manifest.distribution.package.size, size);
}

#[tokio::test]
async fn test_hf_partial_download_continues() {
    let base = MockUpstream::new()
        .text("/acme/partial", "model card")
        .json(
            "/api/models/acme/partial",
            hf_model_info(&["config.json", "pytorch_model.bin", "tokenizer.json"]),
        )
        .json("/acme/partial/resolve/main/config.json", bert_config())
        .bytes("/acme/partial/resolve/main/pytorch_model.bin", vec![7u8; 4096])
        .serve()
        .await;

    let adapter = HuggingFaceAdapter::new(&config(&base)).unwrap();
    let mut manifest = adapter.get_manifest("acme", "partial", "latest").await.unwrap();

    let bytes_seen = Arc::new(AtomicU64::new(0));
    let progress: ProgressCallback = {
        let bytes_seen = bytes_seen.clone();
        Arc::new(move |downloaded, _total| {
            bytes_seen.fetch_max(downloaded, Ordering::Relaxed);
        })
    };

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("package.tar.gz");
    adapter
        .download_package(&mut manifest, &dest, Some(progress))
        .await
        .unwrap();

    assert_eq!(packaged_files(&dest), vec!["config.json", "pytorch_model.bin"]);
    let paths: Vec<&str> = manifest.format.files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec!["config.json", "pytorch_model.bin"]);
    assert!(bytes_seen.load(Ordering::Relaxed) > 0);
}

#[tokio::test]
async fn test_hf_all_downloads_failing_is_an_error() {
    let base = MockUpstream::new()
        .text("/acme/broken", "model card")
        .json(
            "/api/models/acme/broken",
            hf_model_info(&["config.json", "pytorch_model.bin"]),
        )
        .serve()
        .await;

    let adapter = HuggingFaceAdapter::new(&config(&base)).unwrap();
    let mut manifest = adapter.get_manifest("acme", "broken", "latest").await.unwrap();

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("package.tar.gz");
    let err = adapter
        .download_package(&mut manifest, &dest, None)
        .await
        .unwrap_err();
    assert!(matches!(err, InstallError::NoFilesDownloaded(_)));
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_hf_search() {
    let base = MockUpstream::new()
        .json(
            "/api/models?search=bert&limit=20",
            json!([
                {"id": "bert-base-uncased", "pipeline_tag": "fill-mask", "library_name": "transformers"},
                {"id": "google/bert_uncased_L-2_H-128_A-2", "tags": ["bert"]}
            ]),
        )
        .serve()
        .await;

    let adapter = HuggingFaceAdapter::new(&config(&base)).unwrap();
    let results = adapter.search("bert").await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].spec_string(), "hf/bert-base-uncased@latest");
    assert_eq!(results[0].framework, "transformers");

    let offline = HuggingFaceAdapter::new(&config("http://127.0.0.1:9")).unwrap();
    assert!(offline.search("bert").await.unwrap().is_empty());
}

// ============================================================================
// TensorFlow Hub
// ============================================================================

#[tokio::test]
async fn test_tfhub_metadata_manifest() {
    let base = MockUpstream::new()
        .json(
            "/google/universal-sentence-encoder/4?format=json",
            json!({
                "name": "universal-sentence-encoder",
                "description": "Encodes text into 512-dimensional vectors",
                "version": 4,
                "format": "saved_model",
                "inputs": [{"name": "inputs", "dtype": "string", "shape": [null]}],
                "outputs": [{"name": "outputs", "dtype": "float32", "shape": [null, 512]}]
            }),
        )
        .serve()
        .await;

    let adapter = TfHubAdapter::new(&config(&base)).unwrap();
    let manifest = adapter
        .get_manifest("tfhub", "google/universal-sentence-encoder", "4")
        .await
        .unwrap();

    assert_eq!(manifest.metadata.description, "Encodes text into 512-dimensional vectors");
    assert_eq!(manifest.format.execution_format, ExecutionFormat::Tensorflow);
    assert_eq!(manifest.io.inputs[0].name, "inputs");
    assert_eq!(manifest.io.outputs[0].shape, vec![-1, 512]);
    assert_eq!(
        manifest.distribution.package.url,
        format!("{base}/google/universal-sentence-encoder/4?tf-hub-format=compressed")
    );
}

#[tokio::test]
async fn test_tfhub_basic_manifest_when_metadata_unavailable() {
    let base = MockUpstream::new()
        .status("/google/imagenet/mobilenet_v2?format=json", 503)
        .text("/google/imagenet/mobilenet_v2", "TF Hub model page")
        .serve()
        .await;

    let adapter = TfHubAdapter::new(&config(&base)).unwrap();
    let manifest = adapter
        .get_manifest("tfhub", "google/imagenet/mobilenet_v2", "latest")
        .await
        .unwrap();
    assert_eq!(manifest.format.kind, "saved_model");
    assert_eq!(manifest.metadata.license, "Apache-2.0");
    assert_eq!(manifest.framework.name, "TensorFlow");

    let err = adapter
        .get_manifest("tfhub", "google/not-a-model", "latest")
        .await
        .unwrap_err();
    assert!(matches!(err, InstallError::NotFound(_)));
}

#[tokio::test]
async fn test_tfhub_download_compressed_package() {
    let base = MockUpstream::new()
        .status("/google/tiny?format=json", 503)
        .text("/google/tiny", "TF Hub model page")
        .bytes("/google/tiny?tf-hub-format=compressed", b"saved model tarball".to_vec())
        .serve()
        .await;

    let adapter = TfHubAdapter::new(&config(&base)).unwrap();
    let mut manifest = adapter.get_manifest("tf", "google/tiny", "latest").await.unwrap();

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("package.tar.gz");
    adapter.download_package(&mut manifest, &dest, None).await.unwrap();
    assert_eq!(packaged_files(&dest), vec!["model.tar.gz"]);
}

// ============================================================================
// ModelScope
// ============================================================================

#[tokio::test]
async fn test_modelscope_manifest_and_download() {
    let api = "/api/v1/models/damo/nlp_bert_base";
    let base = MockUpstream::new()
        .text("/models/damo/nlp_bert_base", "ModelScope model page")
        .json(
            api,
            json!({
                "Code": 200,
                "Data": {
                    "Description": "Chinese BERT base",
                    "License": "Apache License 2.0",
                    "Frameworks": ["pytorch"],
                    "Tags": ["nlp"]
                }
            }),
        )
        .json(&format!("{api}/repo?Revision=master&FilePath=config.json"), bert_config())
        .json(
            &format!("{api}/repo/files?Revision=master&Recursive=true"),
            json!({
                "Code": 200,
                "Data": {
                    "Files": [
                        {"Path": "config.json", "Type": "blob"},
                        {"Path": "pytorch_model.bin", "Type": "blob"},
                        {"Path": "assets", "Type": "tree"}
                    ]
                }
            }),
        )
        .bytes(
            &format!("{api}/repo?Revision=master&FilePath=pytorch_model.bin"),
            b"weights".to_vec(),
        )
        .serve()
        .await;

    let adapter = ModelScopeAdapter::new(&config(&base)).unwrap();
    let mut manifest = adapter
        .get_manifest("modelscope", "damo/nlp_bert_base", "latest")
        .await
        .unwrap();

    assert_eq!(manifest.metadata.description, "Chinese BERT base");
    assert_eq!(manifest.metadata.license, "Apache License 2.0");
    assert_eq!(manifest.framework.name, "pytorch");
    assert_eq!(manifest.io.inputs.len(), 3);

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("package.tar.gz");
    adapter.download_package(&mut manifest, &dest, None).await.unwrap();
    assert_eq!(packaged_files(&dest), vec!["config.json", "pytorch_model.bin"]);
}

#[tokio::test]
async fn test_modelscope_basic_manifest_without_metadata() {
    let base = MockUpstream::new()
        .text("/models/acme/tiny", "ModelScope model page")
        .serve()
        .await;

    let adapter = ModelScopeAdapter::new(&config(&base)).unwrap();
    let manifest = adapter.get_manifest("ms", "acme/tiny", "latest").await.unwrap();
    assert_eq!(manifest.metadata.description, "Model from ModelScope: acme/tiny");
    assert_eq!(manifest.metadata.license, "Unknown");
    assert_eq!(manifest.io, Io::generic());
}

// ============================================================================
// Local registry
// ============================================================================

fn registry_package() -> (TempDir, Vec<u8>) {
    let dir = TempDir::new().unwrap();
    let builder = PackageBuilder::new().unwrap();
    builder.add_bytes("model.onnx", b"onnx graph").unwrap();
    builder.add_bytes("config.json", b"{}").unwrap();
    let archive = dir.path().join("package.tar.gz");
    builder.build(&archive).unwrap();
    let bytes = std::fs::read(&archive).unwrap();
    (dir, bytes)
}

fn registry_manifest(package_url: &str, sha256: &str, mirrors: Vec<String>) -> serde_json::Value {
    let mut manifest = Manifest::new(&ModelSpec::new("acme", "encoder", "1.0.0"));
    manifest.format.kind = "onnx".into();
    manifest.format.execution_format = ExecutionFormat::Onnx;
    manifest.distribution.package.url = package_url.to_string();
    manifest.distribution.package.sha256 = sha256.to_string();
    manifest.distribution.package.mirrors = mirrors;
    manifest.io = Io::default();
    serde_json::to_value(&manifest).unwrap()
}

#[tokio::test]
async fn test_local_registry_falls_back_to_mirror_on_checksum_mismatch() {
    let (dir, package) = registry_package();
    let (sha256, _) = compute_sha256(&dir.path().join("package.tar.gz")).unwrap();

    let mirror = MockUpstream::new()
        .bytes("/packages/acme-encoder.tar.gz", package)
        .serve()
        .await;

    // Empty package url: the registry's own package endpoint is primary
    let model_path = "/api/v1/models/acme/encoder/1.0.0";
    let manifest = registry_manifest(
        "",
        &sha256,
        vec![format!("{mirror}/packages/acme-encoder.tar.gz")],
    );
    let base = MockUpstream::new()
        .bytes(&format!("{model_path}/package.tar.gz"), b"corrupted".to_vec())
        .json(&format!("{model_path}/manifest.json"), manifest)
        .serve()
        .await;

    let adapter = LocalRegistryAdapter::new(&config(&base)).unwrap();
    let mut manifest = adapter.get_manifest("acme", "encoder", "1.0.0").await.unwrap();
    assert_eq!(manifest.format.execution_format, ExecutionFormat::Onnx);
    assert_eq!(manifest.io, Io::generic());

    let out = TempDir::new().unwrap();
    let dest = out.path().join("package.tar.gz");
    adapter.download_package(&mut manifest, &dest, None).await.unwrap();

    assert_eq!(manifest.distribution.package.sha256, sha256);
    assert_eq!(packaged_files(&dest), vec!["config.json", "model.onnx"]);
    assert!(!out.path().join("package.tar.part").exists());
}

#[tokio::test]
async fn test_local_registry_unknown_model() {
    let base = MockUpstream::new().serve().await;
    let adapter = LocalRegistryAdapter::new(&config(&base)).unwrap();
    let err = adapter
        .get_manifest("acme", "missing", "latest")
        .await
        .unwrap_err();
    assert!(matches!(err, InstallError::NotFound(_)));
}

#[tokio::test]
async fn test_local_registry_every_source_failing() {
    let model_path = "/api/v1/models/acme/encoder/1.0.0";
    let manifest = registry_manifest("", &"0".repeat(64), Vec::new());
    let base = MockUpstream::new()
        .json(&format!("{model_path}/manifest.json"), manifest)
        .serve()
        .await;

    let adapter = LocalRegistryAdapter::new(&config(&base)).unwrap();
    let mut manifest = adapter.get_manifest("acme", "encoder", "1.0.0").await.unwrap();
    assert_eq!(
        manifest.distribution.package.url,
        format!("{base}{model_path}/package.tar.gz")
    );

    let out = TempDir::new().unwrap();
    let err = adapter
        .download_package(&mut manifest, &out.path().join("package.tar.gz"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, InstallError::NoFilesDownloaded(_)));
}
