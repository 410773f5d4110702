//! Secure cross-origin content embedding: a host page swaps head/body
//! content into a sandboxed document served from a different origin,
//! communicating exclusively through an origin-validated message channel.

pub mod channel;
pub mod error;
pub mod js;
pub mod message;
pub mod origin;
pub mod page;
pub mod sandbox;
pub mod shell;

pub use channel::receive::{
    listen_for_dimension_updates, listen_for_host_messages, listen_for_iframe_messages,
    listen_for_messages, ListenOptions, ListenTarget, SourceCheck,
};
pub use channel::send::{
    send_message, send_set_body_content, send_set_head_content, SendOptions, SendTarget,
};
pub use error::ChannelError;
pub use message::{
    is_valid_host_message, is_valid_iframe_message, is_valid_message, DimensionsUpdate,
    HostMessage, IframeMessage, Message,
};
pub use origin::{frame_source_origin, window_origin, OriginSet, WILDCARD_ORIGIN};
pub use page::{FrameElement, MessageEvent, PageRuntime, Subscription, Window, WindowId};
pub use sandbox::{InjectionEngine, SandboxConfig, SandboxDocument};
pub use shell::{generate_shell_html, Favicon, OriginPolicy, ShellError, ShellOptions};
