//! Listener: subscribes a callback to inbound messages on a page window,
//! filtered by sender identity/origin and protocol validity. Callbacks run
//! synchronously on the delivery turn and must be reentrant-safe: a
//! callback may itself send or manage subscriptions on the same window.

use serde_json::Value;

use crate::error::ChannelError;
use crate::message::{self, DimensionsUpdate, IframeMessage};
use crate::origin::{self, OriginSet};
use crate::page::{FrameElement, MessageEvent, Subscription, Window};

/// Who to accept messages from. Mirrors the dispatcher's descriptor shapes
/// for the receive direction, where the resolved identity is a filter rather
/// than a destination; bare origins are additionally allowed here.
pub enum ListenTarget<'a> {
    Origin(&'a str),
    Origins(&'a [String]),
    Frame(&'a FrameElement),
    Window(Option<&'a Window>),
}

/// How frame/window descriptors establish the sender's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceCheck {
    /// Accept only events whose sender window is the descriptor's live
    /// content window. Robust against origin spoofing, but requires the
    /// frame to have loaded an origin-bearing document when `listen` is
    /// called.
    #[default]
    Strict,
    /// Accept on the strict check, or when the event origin textually
    /// matches the origin derived from the frame's declared `src`. Tolerates
    /// load-timing gaps at the cost of trusting a host-controlled attribute:
    /// the `src` can be rewritten after load without reflecting the frame's
    /// real live origin.
    SourceOrOrigin,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ListenOptions {
    pub source_check: SourceCheck,
}

enum AcceptFilter {
    Origins(OriginSet),
    Frame {
        page: Window,
        frame: FrameElement,
        mode: SourceCheck,
    },
    Window {
        window: Window,
        origin: String,
        mode: SourceCheck,
    },
}

impl AcceptFilter {
    fn accepts(&self, event: &MessageEvent) -> bool {
        match self {
            AcceptFilter::Origins(set) => set.allows(&event.origin),
            AcceptFilter::Frame { page, frame, mode } => {
                // Re-read the live content window per event; a frame that
                // navigated since `listen` keeps filtering correctly.
                let strict_ok = frame
                    .content_window()
                    .is_some_and(|window| event.source == Some(window.id()));
                match mode {
                    SourceCheck::Strict => strict_ok,
                    SourceCheck::SourceOrOrigin => {
                        strict_ok
                            || origin::frame_source_origin(page, frame)
                                .map(|declared| declared == event.origin)
                                .unwrap_or(false)
                    }
                }
            }
            AcceptFilter::Window { window, origin, mode } => {
                let strict_ok = event.source == Some(window.id());
                match mode {
                    SourceCheck::Strict => strict_ok,
                    SourceCheck::SourceOrOrigin => strict_ok || event.origin == *origin,
                }
            }
        }
    }
}

fn build_filter(
    page: &Window,
    target: &ListenTarget<'_>,
    options: &ListenOptions,
) -> Result<AcceptFilter, ChannelError> {
    match target {
        ListenTarget::Origin(origin) => Ok(AcceptFilter::Origins(OriginSet::single(*origin))),
        ListenTarget::Origins(origins) => Ok(AcceptFilter::Origins(OriginSet::from_list(origins)?)),
        ListenTarget::Frame(frame) => {
            match options.source_check {
                SourceCheck::Strict => {
                    if frame.content_window().is_none() {
                        return Err(ChannelError::NullWindow);
                    }
                }
                // The permissive mode instead needs a declared source to
                // fall back on.
                SourceCheck::SourceOrOrigin => {
                    origin::frame_source_origin(page, frame)?;
                }
            }
            Ok(AcceptFilter::Frame {
                page: page.clone(),
                frame: (*frame).clone(),
                mode: options.source_check,
            })
        }
        ListenTarget::Window(None) => Err(ChannelError::NullTarget),
        ListenTarget::Window(Some(window)) => {
            let origin = origin::window_origin(window)?;
            Ok(AcceptFilter::Window {
                window: (*window).clone(),
                origin,
                mode: options.source_check,
            })
        }
    }
}

fn listen_filtered(
    page: &Window,
    target: ListenTarget<'_>,
    options: ListenOptions,
    source_tag: Option<&'static str>,
    mut callback: Box<dyn FnMut(&Value)>,
) -> Result<Subscription, ChannelError> {
    let filter = build_filter(page, &target, &options)?;
    Ok(page.add_message_listener(Box::new(move |event| {
        if !filter.accepts(event) {
            return;
        }
        if !message::is_valid_message(&event.data) {
            return;
        }
        if let Some(tag) = source_tag {
            if event.data.get("source").and_then(Value::as_str) != Some(tag) {
                return;
            }
        }
        callback(&event.data);
    })))
}

/// Subscribes `callback` to every inbound protocol message accepted by the
/// descriptor's filter. The callback receives the raw wire value, so valid
/// messages with unknown type tags still flow through; non-protocol traffic
/// on the same channel never does.
pub fn listen_for_messages(
    page: &Window,
    target: ListenTarget<'_>,
    options: ListenOptions,
    callback: impl FnMut(&Value) + 'static,
) -> Result<Subscription, ChannelError> {
    listen_filtered(page, target, options, None, Box::new(callback))
}

/// Like [`listen_for_messages`], narrowed to messages sent by the sandbox.
pub fn listen_for_iframe_messages(
    page: &Window,
    target: ListenTarget<'_>,
    options: ListenOptions,
    callback: impl FnMut(&Value) + 'static,
) -> Result<Subscription, ChannelError> {
    listen_filtered(page, target, options, Some("iframe"), Box::new(callback))
}

/// Like [`listen_for_messages`], narrowed to messages sent by the host.
pub fn listen_for_host_messages(
    page: &Window,
    target: ListenTarget<'_>,
    options: ListenOptions,
    callback: impl FnMut(&Value) + 'static,
) -> Result<Subscription, ChannelError> {
    listen_filtered(page, target, options, Some("host"), Box::new(callback))
}

/// Subscribes only to `dimensions-update` reports, handing the callback the
/// typed payload.
pub fn listen_for_dimension_updates(
    page: &Window,
    target: ListenTarget<'_>,
    options: ListenOptions,
    mut callback: impl FnMut(DimensionsUpdate) + 'static,
) -> Result<Subscription, ChannelError> {
    listen_for_iframe_messages(page, target, options, move |value| {
        if let Some(IframeMessage::DimensionsUpdate(update)) = IframeMessage::from_value(value) {
            callback(update);
        }
    })
}
