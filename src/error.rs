use thiserror::Error;

/// Errors surfaced synchronously by the origin resolver, the dispatcher and
/// the listener. Malformed inbound payloads are never errors; they are
/// filtered by the message validity predicates instead.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("no target window or frame reference was given")]
    NullTarget,
    #[error("the target did not resolve to a live window; the frame may be detached")]
    NullWindow,
    #[error("the explicit target origin list was empty")]
    EmptyTarget,
    #[error("the frame has no src attribute to infer an origin from")]
    MissingSource,
    #[error("the frame src {src:?} is not a valid URL: {source}")]
    InvalidSource {
        src: String,
        #[source]
        source: url::ParseError,
    },
    #[error("reading the window origin was blocked: {0}")]
    InaccessibleOrigin(String),
    #[error("the window origin was empty or \"null\"")]
    NullOrigin,
}
