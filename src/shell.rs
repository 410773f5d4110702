//! Generates the document served for the sandbox frame.
//!
//! Serving this document from a genuinely distinct origin is what turns the
//! frame into a sandbox: the only way host and frame can communicate is the
//! message channel, so embedded HTML cannot touch the host's data or
//! intercept its traffic. The injection engine is activated natively when
//! the document is opened, so unlike the classic inline-bootstrap approach
//! the generated markup carries no script of its own.

use thiserror::Error;
use url::Url;

use crate::origin::{OriginSet, WILDCARD_ORIGIN};

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("invalid origin entry {origin:?}: {source}")]
    InvalidOrigin {
        origin: String,
        #[source]
        source: url::ParseError,
    },
    #[error("the origin whitelist was empty")]
    EmptyWhitelist,
}

/// Which origins the sandbox accepts commands from and reports back to.
#[derive(Debug, Clone)]
pub enum OriginPolicy {
    AllowAll,
    Whitelist(Vec<String>),
}

impl OriginPolicy {
    /// Checks every whitelist entry: it must be the literal wildcard or a
    /// syntactically valid URL.
    fn validate_entries(&self) -> Result<(), ShellError> {
        if let OriginPolicy::Whitelist(entries) = self {
            for entry in entries {
                if entry == WILDCARD_ORIGIN {
                    continue;
                }
                if let Err(source) = Url::parse(entry) {
                    return Err(ShellError::InvalidOrigin {
                        origin: entry.clone(),
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    /// Resolves the policy into the engine's origin set. A whitelist must be
    /// non-empty here; an engine configured with an empty set could never
    /// accept or report anything.
    pub fn allowed_origins(&self) -> Result<OriginSet, ShellError> {
        self.validate_entries()?;
        match self {
            OriginPolicy::AllowAll => Ok(OriginSet::single(WILDCARD_ORIGIN)),
            OriginPolicy::Whitelist(entries) => {
                OriginSet::from_list(entries).map_err(|_| ShellError::EmptyWhitelist)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Favicon {
    pub mime_type: String,
    pub href: String,
}

#[derive(Debug, Clone)]
pub struct ShellOptions {
    pub name: Option<String>,
    pub canonical_url: Option<Url>,
    pub favicon: Option<Favicon>,
    pub hide_branding: bool,
    /// Raw markup appended to the generated head, by contract unescaped.
    pub extend_head: Option<String>,
    /// Raw markup appended to the generated body, by contract unescaped.
    pub extend_body: Option<String>,
    pub origins: OriginPolicy,
}

impl ShellOptions {
    pub fn new(origins: OriginPolicy) -> Self {
        Self {
            name: None,
            canonical_url: None,
            favicon: None,
            hide_branding: false,
            extend_head: None,
            extend_body: None,
            origins,
        }
    }
}

/// Generates the sandbox document markup. Fails if any whitelist entry is
/// neither the wildcard nor a syntactically valid origin URL; an empty
/// whitelist is rejected later, when the engine is configured.
pub fn generate_shell_html(options: &ShellOptions) -> Result<String, ShellError> {
    options.origins.validate_entries()?;

    let title = match &options.name {
        Some(name) => format!("Cross-Origin HTML Embed {name}: Active"),
        None => "Cross-Origin HTML Embed: Active".to_string(),
    };

    let mut head = String::new();
    head.push_str(&format!(
        "        <title>{}</title>\n",
        html_escape::encode_text(&title)
    ));
    head.push_str("        <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\" />\n");
    head.push_str("        <meta charset=\"UTF-8\">\n");
    if let Some(favicon) = &options.favicon {
        head.push_str(&format!(
            "        <link rel=\"icon\" type=\"{}\" href=\"{}\" />\n",
            html_escape::encode_double_quoted_attribute(&favicon.mime_type),
            html_escape::encode_double_quoted_attribute(&favicon.href)
        ));
    }
    if let Some(canonical) = &options.canonical_url {
        head.push_str(&format!(
            "        <link rel=\"canonical\" href=\"{}\" />\n",
            html_escape::encode_double_quoted_attribute(canonical.as_str())
        ));
    }
    if let Some(extend_head) = &options.extend_head {
        head.push_str(extend_head);
        head.push('\n');
    }

    let mut body = String::new();
    if !options.hide_branding {
        body.push_str("        <!-- cross-origin html embed sandbox -->\n");
    }
    if let Some(extend_body) = &options.extend_body {
        body.push_str(extend_body);
        body.push('\n');
    }

    Ok(format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n    <head>\n{head}    </head>\n    <body>\n{body}    </body>\n</html>\n"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_whitelist_entry_fails_generation() {
        let options = ShellOptions::new(OriginPolicy::Whitelist(vec![
            "https://a.test".to_string(),
            "not an origin".to_string(),
        ]));
        let err = generate_shell_html(&options).unwrap_err();
        assert!(matches!(err, ShellError::InvalidOrigin { origin, .. } if origin == "not an origin"));
    }

    #[test]
    fn wildcard_entries_are_always_valid() {
        let options = ShellOptions::new(OriginPolicy::Whitelist(vec!["*".to_string()]));
        assert!(generate_shell_html(&options).is_ok());
    }

    #[test]
    fn allow_all_resolves_to_the_wildcard_set() {
        let set = OriginPolicy::AllowAll.allowed_origins().unwrap();
        assert!(set.allows("https://anything.test"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn empty_whitelist_passes_generation_but_not_configuration() {
        let options = ShellOptions::new(OriginPolicy::Whitelist(Vec::new()));
        assert!(generate_shell_html(&options).is_ok());
        assert!(matches!(
            options.origins.allowed_origins(),
            Err(ShellError::EmptyWhitelist)
        ));
    }

    #[test]
    fn generated_document_carries_options() {
        let mut options = ShellOptions::new(OriginPolicy::AllowAll);
        options.name = Some("Widget <1>".to_string());
        options.favicon = Some(Favicon {
            mime_type: "image/png".to_string(),
            href: "https://cdn.test/icon.png".to_string(),
        });
        options.canonical_url = Some(Url::parse("https://sandbox.test/embed").unwrap());
        options.extend_head = Some("<style>body { margin: 0; }</style>".to_string());
        options.extend_body = Some("<noscript>enable scripts</noscript>".to_string());

        let html = generate_shell_html(&options).unwrap();
        assert!(html.contains("Cross-Origin HTML Embed Widget &lt;1&gt;: Active"));
        assert!(html.contains("https://cdn.test/icon.png"));
        assert!(html.contains("rel=\"canonical\""));
        assert!(html.contains("<style>body { margin: 0; }</style>"));
        assert!(html.contains("<noscript>enable scripts</noscript>"));
    }

    #[test]
    fn branding_comment_can_be_hidden() {
        let mut options = ShellOptions::new(OriginPolicy::AllowAll);
        let html = generate_shell_html(&options).unwrap();
        assert!(html.contains("cross-origin html embed sandbox"));

        options.hide_branding = true;
        let html = generate_shell_html(&options).unwrap();
        assert!(!html.contains("cross-origin html embed sandbox"));
    }
}
