//! Dispatcher: posts a protocol message to a target window once per
//! resolved origin. Sends are synchronous and fire-and-forget; the recipient
//! may not even exist, and no acknowledgment is ever waited for.

use tracing::debug;

use crate::error::ChannelError;
use crate::message::{HostMessage, Message};
use crate::origin::{self, OriginSet};
use crate::page::{FrameElement, Window};

/// What to post into. Dispatch always needs a window, so bare origin strings
/// are not accepted here; pass them through [`SendOptions::target_origins`]
/// instead.
pub enum SendTarget<'a> {
    Frame(&'a FrameElement),
    Window(Option<&'a Window>),
}

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Overrides automatic origin resolution with an explicit set. The list
    /// is used verbatim; an empty list fails with
    /// [`ChannelError::EmptyTarget`].
    pub target_origins: Option<Vec<String>>,
}

/// Sends `message` to the target: resolves the underlying window handle,
/// resolves the origin set (explicit override, else from the target's own
/// declared src or live location), then posts the message once per origin in
/// set order, each with that origin as the delivery restriction. No
/// deduplication is applied.
pub fn send_message(
    page: &Window,
    target: SendTarget<'_>,
    message: &Message,
    options: Option<&SendOptions>,
) -> Result<(), ChannelError> {
    let window = match &target {
        SendTarget::Frame(frame) => frame.content_window().ok_or(ChannelError::NullWindow)?,
        SendTarget::Window(None) => return Err(ChannelError::NullTarget),
        SendTarget::Window(Some(window)) => (*window).clone(),
    };

    let origins = match options.and_then(|options| options.target_origins.as_ref()) {
        Some(list) => OriginSet::from_list(list)?,
        None => match &target {
            SendTarget::Frame(frame) => {
                OriginSet::single(origin::frame_source_origin(page, frame)?)
            }
            SendTarget::Window(_) => OriginSet::single(origin::window_origin(&window)?),
        },
    };

    let value = message.to_value();
    debug!(
        target: "channel",
        kind = message.type_tag(),
        origins = origins.len(),
        "dispatching message"
    );
    for target_origin in origins.iter() {
        window.post_message(value.clone(), target_origin, Some(page));
    }
    Ok(())
}

/// Sends a `set-head-content` command to the sandbox.
pub fn send_set_head_content(
    page: &Window,
    target: SendTarget<'_>,
    head_content: &str,
    options: Option<&SendOptions>,
) -> Result<(), ChannelError> {
    send_message(
        page,
        target,
        &Message::Host(HostMessage::SetHeadContent(head_content.to_string())),
        options,
    )
}

/// Sends a `set-body-content` command to the sandbox.
pub fn send_set_body_content(
    page: &Window,
    target: SendTarget<'_>,
    body_content: &str,
    options: Option<&SendOptions>,
) -> Result<(), ChannelError> {
    send_message(
        page,
        target,
        &Message::Host(HostMessage::SetBodyContent(body_content.to_string())),
        options,
    )
}
