//! Origin resolution: normalizes the heterogeneous "who to talk to"
//! descriptors into one canonical [`OriginSet`] so the dispatcher and
//! listener never branch on descriptor shape themselves.

use url::Url;

use crate::error::ChannelError;
use crate::page::{FrameElement, Window};

/// Matches any origin when present in an [`OriginSet`].
pub const WILDCARD_ORIGIN: &str = "*";

/// A resolved, non-empty ordered sequence of origin strings.
///
/// Entries are either fully-qualified origins (`https://a.test`) or the
/// wildcard `"*"`. Membership is textual: no normalization is applied, so an
/// entry must match an event origin verbatim. Sets are recomputed on every
/// send/listen call rather than cached, since frame attributes may change
/// between calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginSet(Vec<String>);

impl OriginSet {
    pub fn single(origin: impl Into<String>) -> Self {
        Self(vec![origin.into()])
    }

    /// Uses the given list verbatim. An empty list is a fatal input error,
    /// never a silent no-op.
    pub fn from_list(origins: &[String]) -> Result<Self, ChannelError> {
        if origins.is_empty() {
            return Err(ChannelError::EmptyTarget);
        }
        Ok(Self(origins.to_vec()))
    }

    /// Whether an event from `origin` is allowed by this set: verbatim
    /// membership, short-circuited by an explicit wildcard entry.
    pub fn allows(&self, origin: &str) -> bool {
        self.0.iter().any(|entry| entry == WILDCARD_ORIGIN || entry == origin)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Resolves the document URL a frame's declared `src` points at, relative to
/// the embedding page's location.
pub(crate) fn frame_document_url(
    page: &Window,
    frame: &FrameElement,
) -> Result<Url, ChannelError> {
    let src = frame
        .src()
        .filter(|src| !src.is_empty())
        .ok_or(ChannelError::MissingSource)?;
    let parsed = match page.location() {
        Some(base) => base.join(&src),
        None => Url::parse(&src),
    };
    parsed.map_err(|source| ChannelError::InvalidSource { src, source })
}

/// Origin inferred from a frame's declared `src` attribute, read live.
pub fn frame_source_origin(page: &Window, frame: &FrameElement) -> Result<String, ChannelError> {
    let url = frame_document_url(page, frame)?;
    Ok(url.origin().ascii_serialization())
}

/// Origin read from a window's live location. Fails when the browser blocks
/// the read (cross-origin embedder) or when no usable origin is loaded.
pub fn window_origin(window: &Window) -> Result<String, ChannelError> {
    let origin = window.try_location_origin()?;
    match origin {
        Some(origin) if !origin.is_empty() && origin != "null" => Ok(origin),
        _ => Err(ChannelError::NullOrigin),
    }
}
