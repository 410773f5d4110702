//! Single-threaded model of the page plumbing the channel runs on: windows,
//! frame elements and the cross-document message queue.
//!
//! The embedding application owns a [`PageRuntime`] and drives it by calling
//! [`PageRuntime::pump`]; everything else in this crate only ever sees
//! [`Window`] and [`FrameElement`] handles. Message delivery enforces the
//! poster's `targetOrigin` restriction against the recipient's current
//! document origin and stamps every event with the sender's origin; these
//! are the two guarantees the rest of the channel trusts as its security
//! boundary.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::Value;
use tracing::{debug, trace};
use url::Url;

use crate::error::ChannelError;
use crate::origin;

/// Identity of a window within its runtime, used for sender-identity checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(u64);

/// A message as observed by a receiving window.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub data: Value,
    /// Origin of the sending document, stamped by the runtime at post time;
    /// `"null"` when the post had no sender window.
    pub origin: String,
    pub source: Option<WindowId>,
}

pub(crate) type MessageCallback = Box<dyn FnMut(&MessageEvent)>;
type ResizeCallback = Box<dyn FnMut()>;

struct MessageSlot {
    id: u64,
    alive: Rc<Cell<bool>>,
    callback: Rc<RefCell<MessageCallback>>,
}

struct ResizeSlot {
    id: u64,
    alive: Rc<Cell<bool>>,
    callback: Rc<RefCell<ResizeCallback>>,
}

struct PendingDelivery {
    target: Weak<WindowState>,
    event: MessageEvent,
    target_origin: String,
}

/// An owned handle to an event subscription.
///
/// `unsubscribe` detaches the underlying listener exactly once; repeated
/// calls are no-ops. A cancelled subscription is never invoked again, not
/// even for deliveries that were already queued when it was cancelled.
/// Dropping the handle without unsubscribing leaves the listener attached.
pub struct Subscription {
    alive: Rc<Cell<bool>>,
    detach: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("alive", &self.alive.get())
            .finish_non_exhaustive()
    }
}

impl Subscription {
    pub(crate) fn new(alive: Rc<Cell<bool>>, detach: Box<dyn FnOnce()>) -> Self {
        Self {
            alive,
            detach: RefCell::new(Some(detach)),
        }
    }

    pub fn unsubscribe(&self) {
        if self.alive.replace(false) {
            if let Some(detach) = self.detach.borrow_mut().take() {
                detach();
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.alive.get()
    }
}

struct WindowState {
    id: WindowId,
    runtime: Weak<RuntimeInner>,
    location: RefCell<Option<Url>>,
    parent: Option<Weak<WindowState>>,
    /// Origin of the document that embedded this window, captured when the
    /// frame was opened. `None` for top-level windows.
    embedder_origin: Option<String>,
    message_listeners: RefCell<Vec<MessageSlot>>,
    resize_listeners: RefCell<Vec<ResizeSlot>>,
    next_slot_id: Cell<u64>,
}

impl WindowState {
    fn next_slot_id(&self) -> u64 {
        let id = self.next_slot_id.get();
        self.next_slot_id.set(id + 1);
        id
    }
}

/// Cheaply cloneable handle to a window in the page runtime.
#[derive(Clone)]
pub struct Window {
    state: Rc<WindowState>,
}

impl PartialEq for Window {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}

impl Eq for Window {}

impl fmt::Debug for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Window")
            .field("id", &self.state.id)
            .field("location", &self.state.location.borrow())
            .finish()
    }
}

impl Window {
    pub fn id(&self) -> WindowId {
        self.state.id
    }

    pub fn location(&self) -> Option<Url> {
        self.state.location.borrow().clone()
    }

    pub fn parent(&self) -> Option<Window> {
        self.state
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|state| Window { state })
    }

    /// Loads a document at `url` into this window.
    pub fn navigate(&self, url: Url) {
        *self.state.location.borrow_mut() = Some(url);
    }

    /// Serialized origin of the current document, if one is loaded. This is
    /// the runtime's own view, used for stamping and delivery checks; user
    /// code goes through [`Window::try_location_origin`].
    pub(crate) fn document_origin(&self) -> Option<String> {
        self.state
            .location
            .borrow()
            .as_ref()
            .map(|url| url.origin().ascii_serialization())
    }

    /// Reads the origin of this window's live location, enforcing the rule
    /// that only a same-origin embedder may do so. Returns `Ok(None)` when
    /// no document is loaded.
    pub fn try_location_origin(&self) -> Result<Option<String>, ChannelError> {
        let origin = self.document_origin();
        if let (Some(embedder), Some(own)) = (self.state.embedder_origin.as_ref(), origin.as_ref())
        {
            if embedder != own {
                return Err(ChannelError::InaccessibleOrigin(format!(
                    "window at {own} is cross-origin to its embedder at {embedder}"
                )));
            }
        }
        Ok(origin)
    }

    /// Queues `data` for delivery to this window, restricted to
    /// `target_origin` (`"*"` delivers regardless of the recipient origin).
    /// Fire-and-forget: the check happens at delivery, and a mismatch drops
    /// the message silently.
    pub fn post_message(&self, data: Value, target_origin: &str, source: Option<&Window>) {
        let origin = source
            .and_then(Window::document_origin)
            .unwrap_or_else(|| "null".to_string());
        let event = MessageEvent {
            data,
            origin,
            source: source.map(Window::id),
        };
        let Some(runtime) = self.state.runtime.upgrade() else {
            debug!(target: "page", "dropping post: runtime is gone");
            return;
        };
        trace!(
            target: "page",
            window = self.state.id.0,
            target_origin,
            "queueing message"
        );
        runtime.queue.borrow_mut().push_back(PendingDelivery {
            target: Rc::downgrade(&self.state),
            event,
            target_origin: target_origin.to_string(),
        });
    }

    pub(crate) fn add_message_listener(&self, callback: MessageCallback) -> Subscription {
        let id = self.state.next_slot_id();
        let alive = Rc::new(Cell::new(true));
        self.state.message_listeners.borrow_mut().push(MessageSlot {
            id,
            alive: Rc::clone(&alive),
            callback: Rc::new(RefCell::new(callback)),
        });
        let weak = Rc::downgrade(&self.state);
        Subscription::new(
            alive,
            Box::new(move || {
                if let Some(state) = weak.upgrade() {
                    state.message_listeners.borrow_mut().retain(|slot| slot.id != id);
                }
            }),
        )
    }

    /// Subscribes to this window's resize events.
    pub fn on_resize(&self, callback: impl FnMut() + 'static) -> Subscription {
        let id = self.state.next_slot_id();
        let alive = Rc::new(Cell::new(true));
        self.state.resize_listeners.borrow_mut().push(ResizeSlot {
            id,
            alive: Rc::clone(&alive),
            callback: Rc::new(RefCell::new(Box::new(callback))),
        });
        let weak = Rc::downgrade(&self.state);
        Subscription::new(
            alive,
            Box::new(move || {
                if let Some(state) = weak.upgrade() {
                    state.resize_listeners.borrow_mut().retain(|slot| slot.id != id);
                }
            }),
        )
    }

    /// Fires this window's resize listeners synchronously.
    pub fn dispatch_resize(&self) {
        let slots: Vec<_> = self
            .state
            .resize_listeners
            .borrow()
            .iter()
            .map(|slot| (Rc::clone(&slot.alive), Rc::clone(&slot.callback)))
            .collect();
        for (alive, callback) in slots {
            if alive.get() {
                let mut guard = callback.borrow_mut();
                (&mut **guard)();
            }
        }
    }
}

/// Models an `<iframe>` element: a mutable `src` attribute plus the content
/// window the runtime attached for it.
#[derive(Clone, Default)]
pub struct FrameElement {
    inner: Rc<FrameInner>,
}

#[derive(Default)]
struct FrameInner {
    src: RefCell<Option<String>>,
    content: RefCell<Option<Window>>,
}

impl FrameElement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_src(&self, src: impl Into<String>) {
        *self.inner.src.borrow_mut() = Some(src.into());
    }

    pub fn src(&self) -> Option<String> {
        self.inner.src.borrow().clone()
    }

    pub fn content_window(&self) -> Option<Window> {
        self.inner.content.borrow().clone()
    }

    fn set_content_window(&self, window: Window) {
        *self.inner.content.borrow_mut() = Some(window);
    }
}

impl fmt::Debug for FrameElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameElement")
            .field("src", &self.inner.src.borrow())
            .finish()
    }
}

struct RuntimeInner {
    queue: RefCell<VecDeque<PendingDelivery>>,
    pumping: Cell<bool>,
    next_window_id: Cell<u64>,
}

/// The single-threaded scheduler for cross-document message delivery.
#[derive(Clone)]
pub struct PageRuntime {
    inner: Rc<RuntimeInner>,
}

impl Default for PageRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl PageRuntime {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RuntimeInner {
                queue: RefCell::new(VecDeque::new()),
                pumping: Cell::new(false),
                next_window_id: Cell::new(0),
            }),
        }
    }

    /// Opens a top-level window with a document at `location`.
    pub fn open_window(&self, location: Url) -> Window {
        self.new_window(Some(location), None)
    }

    /// Loads the frame's declared `src` (resolved against the parent's
    /// location) into a fresh content window.
    pub fn open_frame_window(
        &self,
        parent: &Window,
        frame: &FrameElement,
    ) -> Result<Window, ChannelError> {
        let url = origin::frame_document_url(parent, frame)?;
        let window = self.new_window(Some(url), Some(parent));
        frame.set_content_window(window.clone());
        Ok(window)
    }

    /// Attaches a content window that has not loaded a document yet, the
    /// state a frame is in before its `src` navigation completes.
    pub fn open_blank_frame_window(&self, parent: &Window, frame: &FrameElement) -> Window {
        let window = self.new_window(None, Some(parent));
        frame.set_content_window(window.clone());
        window
    }

    fn new_window(&self, location: Option<Url>, parent: Option<&Window>) -> Window {
        let id = self.inner.next_window_id.get();
        self.inner.next_window_id.set(id + 1);
        let state = Rc::new(WindowState {
            id: WindowId(id),
            runtime: Rc::downgrade(&self.inner),
            location: RefCell::new(location),
            parent: parent.map(|p| Rc::downgrade(&p.state)),
            embedder_origin: parent.and_then(Window::document_origin),
            message_listeners: RefCell::new(Vec::new()),
            resize_listeners: RefCell::new(Vec::new()),
            next_slot_id: Cell::new(0),
        });
        Window { state }
    }

    /// Snapshot of queued, not yet delivered posts as
    /// `(target origin, payload)` pairs, in delivery order.
    pub fn queued_posts(&self) -> Vec<(String, Value)> {
        self.inner
            .queue
            .borrow()
            .iter()
            .map(|delivery| (delivery.target_origin.clone(), delivery.event.data.clone()))
            .collect()
    }

    /// Drains the delivery queue, invoking matching listeners strictly in
    /// order. Posts enqueued by a callback are drained in the same pump.
    /// Not reentrant: a nested call from inside a callback is a no-op.
    /// Returns the number of deliveries that reached a window.
    pub fn pump(&self) -> usize {
        if self.inner.pumping.get() {
            return 0;
        }
        self.inner.pumping.set(true);
        let mut delivered = 0;
        loop {
            let next = self.inner.queue.borrow_mut().pop_front();
            let Some(delivery) = next else { break };
            if Self::deliver(delivery) {
                delivered += 1;
            }
        }
        self.inner.pumping.set(false);
        delivered
    }

    fn deliver(delivery: PendingDelivery) -> bool {
        let Some(target) = delivery.target.upgrade() else {
            trace!(target: "page", "dropping message: window is gone");
            return false;
        };
        let recipient_origin = target
            .location
            .borrow()
            .as_ref()
            .map(|url| url.origin().ascii_serialization());
        if delivery.target_origin != "*"
            && recipient_origin.as_deref() != Some(delivery.target_origin.as_str())
        {
            debug!(
                target: "page",
                expected = %delivery.target_origin,
                actual = ?recipient_origin,
                "dropping message: targetOrigin mismatch"
            );
            return false;
        }
        let slots: Vec<_> = target
            .message_listeners
            .borrow()
            .iter()
            .map(|slot| (Rc::clone(&slot.alive), Rc::clone(&slot.callback)))
            .collect();
        for (alive, callback) in slots {
            // Checked per invocation so an unsubscribe cancels deliveries
            // that were already queued.
            if alive.get() {
                let mut guard = callback.borrow_mut();
                (&mut **guard)(&delivery.event);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn delivery_enforces_target_origin() {
        let runtime = PageRuntime::new();
        let host = runtime.open_window(url("https://host.test/"));
        let other = runtime.open_window(url("https://other.test/"));

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let _sub = other.add_message_listener(Box::new(move |event| {
            sink.borrow_mut().push(event.data.clone());
        }));

        other.post_message(json!(1), "https://other.test", Some(&host));
        other.post_message(json!(2), "https://elsewhere.test", Some(&host));
        other.post_message(json!(3), "*", Some(&host));
        assert_eq!(runtime.pump(), 2);
        assert_eq!(*seen.borrow(), vec![json!(1), json!(3)]);
    }

    #[test]
    fn events_are_stamped_with_sender_origin() {
        let runtime = PageRuntime::new();
        let host = runtime.open_window(url("https://host.test/page"));
        let other = runtime.open_window(url("https://other.test/"));

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let _sub = other.add_message_listener(Box::new(move |event| {
            sink.borrow_mut().push((event.origin.clone(), event.source));
        }));

        other.post_message(json!("hi"), "*", Some(&host));
        other.post_message(json!("anon"), "*", None);
        runtime.pump();

        let seen = seen.borrow();
        assert_eq!(seen[0], ("https://host.test".to_string(), Some(host.id())));
        assert_eq!(seen[1], ("null".to_string(), None));
    }

    #[test]
    fn unsubscribe_cancels_queued_deliveries() {
        let runtime = PageRuntime::new();
        let host = runtime.open_window(url("https://host.test/"));
        let other = runtime.open_window(url("https://other.test/"));

        let count = Rc::new(Cell::new(0));
        let counter = Rc::clone(&count);
        let sub = other.add_message_listener(Box::new(move |_| {
            counter.set(counter.get() + 1);
        }));

        other.post_message(json!(1), "*", Some(&host));
        sub.unsubscribe();
        sub.unsubscribe();
        runtime.pump();
        assert_eq!(count.get(), 0);
        assert!(!sub.is_active());
    }

    #[test]
    fn callbacks_may_send_within_the_same_pump() {
        let runtime = PageRuntime::new();
        let host = runtime.open_window(url("https://host.test/"));
        let other = runtime.open_window(url("https://other.test/"));

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let reply_to = host.clone();
        let from = other.clone();
        let _echo = other.add_message_listener(Box::new(move |event| {
            reply_to.post_message(json!({ "echo": event.data }), "*", Some(&from));
        }));
        let _sub = host.add_message_listener(Box::new(move |event| {
            sink.borrow_mut().push(event.data.clone());
        }));

        other.post_message(json!("ping"), "*", Some(&host));
        assert_eq!(runtime.pump(), 2);
        assert_eq!(*seen.borrow(), vec![json!({ "echo": "ping" })]);
    }

    #[test]
    fn cross_origin_location_reads_are_blocked() {
        let runtime = PageRuntime::new();
        let host = runtime.open_window(url("https://host.test/"));
        let frame = FrameElement::new();
        frame.set_src("https://sandbox.test/embed");
        let content = runtime.open_frame_window(&host, &frame).unwrap();

        assert!(matches!(
            content.try_location_origin(),
            Err(ChannelError::InaccessibleOrigin(_))
        ));
        assert_eq!(
            host.try_location_origin().unwrap(),
            Some("https://host.test".to_string())
        );

        let same_origin = FrameElement::new();
        same_origin.set_src("/widget");
        let widget = runtime.open_frame_window(&host, &same_origin).unwrap();
        assert_eq!(
            widget.try_location_origin().unwrap(),
            Some("https://host.test".to_string())
        );
    }
}
