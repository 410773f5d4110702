//! Fragment pipeline: parse untrusted markup into a detached fragment, then
//! walk it and replace every executable-script node before anything is
//! attached to the live document.

use html5ever::{LocalName, Namespace, QualName};
use kuchiki::traits::*;
use kuchiki::{Attribute, ExpandedName, NodeRef};

const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

/// Where an injected script's source comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ScriptSource {
    Inline { code: String },
    External { src: String },
}

/// A script queued for evaluation once its element is attached.
#[derive(Debug, Clone)]
pub(crate) struct PendingScript {
    pub source: ScriptSource,
}

/// The parsed fragment: top-level children ready to append in document
/// order, plus the scripts collected while rebuilding them.
pub(crate) struct PreparedFragment {
    pub children: Vec<NodeRef>,
    pub scripts: Vec<PendingScript>,
}

/// Parses `html` the way `innerHTML` on a `<div>` would and rebuilds its
/// `<script>` elements.
///
/// Script elements that arrive through markup parsing are inert; only the
/// freshly constructed replacements are queued for evaluation. Each
/// replacement copies the original's attributes and inline text and takes
/// its place in the fragment, so attribute-dependent styling and selection
/// still see it. Unparsable markup is not an error: whatever DOM the parser
/// produced is used as-is.
pub(crate) fn prepare_fragment(html: &str) -> PreparedFragment {
    let parsed = kuchiki::parse_fragment(fragment_context(), Vec::new()).one(html);
    let container = fragment_container(&parsed);
    let scripts = reactivate_scripts(&container);
    let children = container.children().collect();
    PreparedFragment { children, scripts }
}

fn fragment_context() -> QualName {
    QualName::new(
        None,
        Namespace::from(HTML_NAMESPACE),
        LocalName::from("div"),
    )
}

/// html5ever wraps fragment output in a synthetic root element.
fn fragment_container(parsed: &NodeRef) -> NodeRef {
    parsed
        .first_child()
        .filter(|child| child.as_element().is_some())
        .unwrap_or_else(|| parsed.clone())
}

fn reactivate_scripts(container: &NodeRef) -> Vec<PendingScript> {
    let script_nodes: Vec<NodeRef> = match container.select("script") {
        Ok(found) => found.map(|script| script.as_node().clone()).collect(),
        Err(_) => Vec::new(),
    };

    let mut pending = Vec::with_capacity(script_nodes.len());
    for node in script_nodes {
        let Some(element) = node.as_element() else {
            continue;
        };
        let name = element.name.clone();
        let attributes: Vec<(ExpandedName, Attribute)> = element
            .attributes
            .borrow()
            .map
            .iter()
            .map(|(name, attribute)| (name.clone(), attribute.clone()))
            .collect();
        let code = node.text_contents();

        let replacement = NodeRef::new_element(name, attributes);
        if !code.is_empty() {
            replacement.append(NodeRef::new_text(code.clone()));
        }

        let src = replacement
            .as_element()
            .and_then(|el| el.attributes.borrow().get("src").map(str::to_string))
            .filter(|src| !src.trim().is_empty());

        node.insert_after(replacement);
        node.detach();

        let source = match src {
            Some(src) => ScriptSource::External {
                src: src.trim().to_string(),
            },
            None => ScriptSource::Inline { code },
        };
        pending.push(PendingScript { source });
    }
    pending
}
