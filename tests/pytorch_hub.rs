//! PyTorch Hub adapter against mock GitHub hosts

mod common;

use common::MockUpstream;
use modelpack::adapters::PyTorchHubAdapter;
use modelpack::adapters::hubconf::fallback_url;
use modelpack::manifest::ExecutionFormat;
use modelpack::package::extract_package;
use modelpack::{AdapterConfig, InstallError, RepositoryAdapter};
use tempfile::TempDir;

fn hubconf(weights_base: &str) -> String {
    format!(
        r#"dependencies = ["torch"]

from torchvision.models.resnet import resnet18, resnet50

model_urls = {{
    "resnet18": "{weights_base}/weights/resnet18-f37072fd.pth",
    "resnet50": "{weights_base}/weights/resnet50-0676ba61.pth",
}}

def wide_resnet(pretrained=False, **kwargs):
    model = _build(**kwargs)
    if pretrained:
        state_dict = load_state_dict_from_url("{weights_base}/weights/wide_resnet50-32ee1156.pth")
        model.load_state_dict(state_dict)
    return model
"#
    )
}

fn adapter(base: &str) -> PyTorchHubAdapter {
    let config = AdapterConfig {
        timeout_secs: 10,
        ..Default::default()
    };
    PyTorchHubAdapter::new(&config)
        .unwrap()
        .with_endpoints(base, base)
}

#[tokio::test]
async fn test_manifest_from_hubconf_model_urls() {
    let upstream = MockUpstream::new().text("/pytorch/vision", "pytorch/vision on GitHub");
    // Weight URLs point at the same host, so serve twice: once to learn the address
    let probe = upstream.clone().serve().await;
    let base = upstream
        .text("/pytorch/vision/main/hubconf.py", &hubconf(&probe))
        .serve()
        .await;

    let manifest = adapter(&base)
        .get_manifest("pytorch", "vision/resnet50", "latest")
        .await
        .unwrap();

    assert_eq!(
        manifest.distribution.package.url,
        format!("{probe}/weights/resnet50-0676ba61.pth")
    );
    assert!(manifest.distribution.package.mirrors.is_empty());
    assert_eq!(manifest.metadata.description, "Model from PyTorch Hub: vision/resnet50");
    assert_eq!(manifest.metadata.license, "BSD-3-Clause");
    assert_eq!(manifest.format.kind, "pytorch");
    assert_eq!(manifest.format.files[0].path, "resnet50.pth");
    assert_eq!(manifest.distribution.registry.namespace, "pytorch");
}

#[tokio::test]
async fn test_hubconf_on_master_branch_and_function_body() {
    let base = MockUpstream::new()
        .text("/pytorch/vision", "pytorch/vision on GitHub")
        .text(
            "/pytorch/vision/master/hubconf.py",
            &hubconf("https://download.example.org"),
        )
        .serve()
        .await;

    let urls = adapter(&base).candidate_urls("vision", "wide_resnet").await;
    assert_eq!(
        urls,
        vec!["https://download.example.org/weights/wide_resnet50-32ee1156.pth"]
    );
}

#[tokio::test]
async fn test_missing_hubconf_uses_static_weights() {
    let base = MockUpstream::new()
        .text("/pytorch/vision", "pytorch/vision on GitHub")
        .serve()
        .await;

    let adapter = adapter(&base);
    assert_eq!(
        adapter.candidate_urls("vision", "resnet50").await,
        vec![fallback_url("resnet50").unwrap().to_string()]
    );

    let err = adapter
        .get_manifest("pytorch", "vision/not_a_model", "latest")
        .await
        .unwrap_err();
    assert!(matches!(err, InstallError::NotFound(_)));
}

#[tokio::test]
async fn test_unknown_repository_is_not_found() {
    let base = MockUpstream::new().serve().await;
    let err = adapter(&base)
        .get_manifest("torch", "nonexistent/resnet50", "latest")
        .await
        .unwrap_err();
    assert!(matches!(err, InstallError::NotFound(_)));
}

#[tokio::test]
async fn test_download_packages_weight_file() {
    let upstream = MockUpstream::new()
        .text("/pytorch/vision", "pytorch/vision on GitHub")
        .bytes("/weights/resnet18-f37072fd.pth", vec![1u8; 2048]);
    let probe = upstream.clone().serve().await;
    let base = upstream
        .text("/pytorch/vision/main/hubconf.py", &hubconf(&probe))
        .serve()
        .await;

    let adapter = adapter(&base);
    let mut manifest = adapter
        .get_manifest("pytorch", "vision/resnet18", "latest")
        .await
        .unwrap();

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("package.tar.gz");
    adapter.download_package(&mut manifest, &dest, None).await.unwrap();

    let out = TempDir::new().unwrap();
    let files = extract_package(&dest, out.path()).unwrap();
    assert_eq!(files, vec!["resnet18-f37072fd.pth"]);
    assert_eq!(manifest.format.files.len(), 1);
    assert_eq!(manifest.format.files[0].size, 2048);
    assert_eq!(manifest.format.execution_format, ExecutionFormat::Pytorch);
}
