//! Weight URL extraction from PyTorch Hub `hubconf.py` files
//!
//! hubconf files are Python, so extraction is a bounded set of textual
//! patterns tried in order of specificity:
//! 1. a `model_urls = {'name': 'https://...'}` dictionary entry for the model
//! 2. a `<model>_url = 'https://...'` assignment
//! 3. a `load_state_dict_from_url('https://...')` call inside `def <model>(`
//!
//! Matches from every pattern are merged in that order and deduplicated.
//! When nothing matches, a static table of well-known torchvision weights
//! is consulted.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static MODEL_URLS_DICT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)model_urls\s*=\s*\{([^}]*)\}").expect("valid model_urls regex")
});

static DICT_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"['"]([\w.\-]+)['"]\s*:\s*['"](https?://[^'"\s]+)['"]"#)
        .expect("valid dict entry regex")
});

static STATE_DICT_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"load_state_dict_from_url\(\s*['"](https?://[^'"\s]+)['"]"#)
        .expect("valid load_state_dict_from_url regex")
});

static TOP_LEVEL_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?:def\s|class\s|@|if __name__)").expect("valid block regex")
});

/// Well-known torchvision checkpoints
pub const FALLBACK_WEIGHTS: [(&str, &str); 9] = [
    ("resnet18", "https://download.pytorch.org/models/resnet18-f37072fd.pth"),
    ("resnet34", "https://download.pytorch.org/models/resnet34-b627a593.pth"),
    ("resnet50", "https://download.pytorch.org/models/resnet50-0676ba61.pth"),
    ("resnet101", "https://download.pytorch.org/models/resnet101-63fe2227.pth"),
    ("resnet152", "https://download.pytorch.org/models/resnet152-394f9c45.pth"),
    ("alexnet", "https://download.pytorch.org/models/alexnet-owt-7be5be79.pth"),
    ("vgg16", "https://download.pytorch.org/models/vgg16-397923af.pth"),
    ("vgg19", "https://download.pytorch.org/models/vgg19-dcbb9e9d.pth"),
    ("mobilenet_v2", "https://download.pytorch.org/models/mobilenet_v2-7ebf99e0.pth"),
];

/// Lowercase last path segment with dashes folded to underscores
pub fn normalize_model_name(model: &str) -> String {
    model
        .rsplit('/')
        .next()
        .unwrap_or(model)
        .trim()
        .to_lowercase()
        .replace('-', "_")
}

/// URLs from a `model_urls` dictionary whose key names the model
pub fn extract_from_model_urls(hubconf: &str, model: &str) -> Vec<String> {
    let wanted = normalize_model_name(model);
    MODEL_URLS_DICT
        .captures_iter(hubconf)
        .filter_map(|dict| dict.get(1))
        .flat_map(|body| DICT_ENTRY.captures_iter(body.as_str()))
        .filter(|entry| normalize_model_name(&entry[1]) == wanted)
        .map(|entry| entry[2].to_string())
        .collect()
}

/// URLs assigned to `<model>_url`
pub fn extract_from_url_variable(hubconf: &str, model: &str) -> Vec<String> {
    let pattern = format!(
        r#"(?m)\b{}_url\s*=\s*['"](https?://[^'"\s]+)['"]"#,
        regex::escape(&normalize_model_name(model))
    );
    match Regex::new(&pattern) {
        Ok(re) => re.captures_iter(hubconf).map(|c| c[1].to_string()).collect(),
        Err(_) => Vec::new(),
    }
}

/// URLs passed to `load_state_dict_from_url` inside `def <model>(`
pub fn extract_from_function(hubconf: &str, model: &str) -> Vec<String> {
    let pattern = format!(
        r"(?m)^def\s+{}\s*\(",
        regex::escape(&normalize_model_name(model))
    );
    let Ok(def) = Regex::new(&pattern) else {
        return Vec::new();
    };
    let Some(start) = def.find(hubconf) else {
        return Vec::new();
    };

    let rest = &hubconf[start.end()..];
    let end = TOP_LEVEL_BLOCK
        .find(rest)
        .map(|m| m.start())
        .unwrap_or(rest.len());
    let body = &rest[..end];

    STATE_DICT_CALL
        .captures_iter(body)
        .map(|c| c[1].to_string())
        .collect()
}

/// Static table lookup by exact name, then by normalized last segment
pub fn fallback_url(model: &str) -> Option<&'static str> {
    let exact = model.trim().to_lowercase();
    let normalized = normalize_model_name(model);
    FALLBACK_WEIGHTS
        .iter()
        .find(|(name, _)| *name == exact)
        .or_else(|| FALLBACK_WEIGHTS.iter().find(|(name, _)| *name == normalized))
        .map(|(_, url)| *url)
}

/// All candidate weight URLs for `model`, deduplicated in pattern order
pub fn extract_weight_urls(hubconf: &str, model: &str) -> Vec<String> {
    let extractors: [fn(&str, &str) -> Vec<String>; 3] = [
        extract_from_model_urls,
        extract_from_url_variable,
        extract_from_function,
    ];

    let mut seen = HashSet::new();
    extractors
        .iter()
        .flat_map(|extract| extract(hubconf, model))
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

/// Extracted URLs, or the static fallback when the hubconf yields none
pub fn weight_urls(hubconf: Option<&str>, model: &str) -> Vec<String> {
    let urls = hubconf
        .map(|text| extract_weight_urls(text, model))
        .unwrap_or_default();
    if !urls.is_empty() {
        return urls;
    }
    fallback_url(model)
        .map(|url| vec![url.to_string()])
        .unwrap_or_default()
}

/// File name for a weight URL: basename without query string
pub fn file_name_from_url(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("model.pth")
        .to_string()
}
