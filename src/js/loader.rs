use std::cell::RefCell;
use std::collections::HashMap;

use anyhow::{Context, Result};
use url::Url;

/// Fetches the source text of an externally referenced script.
///
/// The injection engine is generic over the loader so tests and embedders
/// with their own network stack can supply one.
pub trait ScriptLoader {
    fn load(&self, url: &Url) -> Result<String>;
}

/// Cache key for fetched scripts: combination of origin and path.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
struct ScriptCacheKey {
    origin: String,
    path: String,
}

/// Loader backed by a blocking HTTP client, caching fetched sources per
/// origin and path for the lifetime of the sandbox document.
pub struct HttpScriptLoader {
    client: reqwest::blocking::Client,
    cache: RefCell<HashMap<ScriptCacheKey, String>>,
}

impl Default for HttpScriptLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpScriptLoader {
    pub fn new() -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            cache: RefCell::new(HashMap::new()),
        }
    }
}

impl ScriptLoader for HttpScriptLoader {
    fn load(&self, url: &Url) -> Result<String> {
        let cache_key = ScriptCacheKey {
            origin: url.origin().ascii_serialization(),
            path: url.path().to_string(),
        };

        if let Some(cached) = self.cache.borrow().get(&cache_key) {
            tracing::debug!(target: "script_fetch", url = %url, "cache hit");
            return Ok(cached.clone());
        }

        tracing::debug!(target: "script_fetch", url = %url, "fetching");
        let content = self
            .client
            .get(url.clone())
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .with_context(|| format!("fetching script at {}", url))?
            .text()
            .with_context(|| format!("script at {} is not valid UTF-8 text", url))?;

        self.cache
            .borrow_mut()
            .insert(cache_key, content.clone());

        Ok(content)
    }
}

/// Resolves a script reference against the document base URL.
pub fn resolve_url(script_url: &str, base_url: &str) -> Result<String> {
    if script_url.starts_with("http://")
        || script_url.starts_with("https://")
        || script_url.starts_with("file://")
    {
        return Ok(script_url.to_string());
    }

    let base = Url::parse(base_url).with_context(|| format!("invalid base URL: {}", base_url))?;

    let resolved = base.join(script_url).with_context(|| {
        format!(
            "failed to resolve URL: {} relative to {}",
            script_url, base_url
        )
    })?;

    Ok(resolved.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_url_absolute() {
        let result = resolve_url(
            "https://example.com/script.js",
            "https://base.com/page.html",
        );
        assert_eq!(result.unwrap(), "https://example.com/script.js");
    }

    #[test]
    fn test_resolve_url_relative() {
        let result = resolve_url("script.js", "https://base.com/page.html");
        assert_eq!(result.unwrap(), "https://base.com/script.js");
    }

    #[test]
    fn test_resolve_url_relative_path() {
        let result = resolve_url("../lib/script.js", "https://base.com/app/page.html");
        assert_eq!(result.unwrap(), "https://base.com/lib/script.js");
    }

    #[test]
    fn test_resolve_url_absolute_path() {
        let result = resolve_url("/assets/script.js", "https://base.com/app/page.html");
        assert_eq!(result.unwrap(), "https://base.com/assets/script.js");
    }
}
