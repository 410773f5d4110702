use std::cell::{Cell, RefCell};
use std::rc::Rc;

use anyhow::{anyhow, Context, Result};
use kuchiki::traits::*;
use kuchiki::NodeRef;
use tracing::error;
use url::Url;

use crate::js::QuickJsEngine;
use crate::page::{Subscription, Window};

type SizeCallback = Rc<dyn Fn(f64)>;

struct SizeObserverSlot {
    id: u64,
    alive: Rc<Cell<bool>>,
    callback: SizeCallback,
}

/// One sandbox document: the DOM parsed from the shell markup, the script
/// engine injected code runs in, and the window the document lives in.
///
/// The crate carries no layout engine, so the "rendered height" of the root
/// element is a cell the embedding application feeds via
/// [`SandboxDocument::set_root_height`]; every call notifies the size
/// observers, with no change detection, mirroring a continuous size
/// observer.
pub struct SandboxDocument {
    window: Window,
    dom: NodeRef,
    js: QuickJsEngine,
    base_url: Option<Url>,
    root_height: Cell<f64>,
    size_observers: Rc<RefCell<Vec<SizeObserverSlot>>>,
    next_observer_id: Cell<u64>,
}

impl SandboxDocument {
    /// Parses `html` as the document loaded into `window` and prepares a
    /// fresh script engine for it.
    pub fn open(window: &Window, html: &str) -> Result<Rc<Self>> {
        let dom = kuchiki::parse_html().one(html);
        let js = QuickJsEngine::new().context("failed to initialize the sandbox script engine")?;
        Ok(Rc::new(Self {
            window: window.clone(),
            dom,
            js,
            base_url: window.location(),
            root_height: Cell::new(0.0),
            size_observers: Rc::new(RefCell::new(Vec::new())),
            next_observer_id: Cell::new(0),
        }))
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn js(&self) -> &QuickJsEngine {
        &self.js
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    pub fn head(&self) -> Result<NodeRef> {
        self.dom
            .select_first("head")
            .map(|found| found.as_node().clone())
            .map_err(|_| anyhow!("document has no head element"))
    }

    pub fn body(&self) -> Result<NodeRef> {
        self.dom
            .select_first("body")
            .map(|found| found.as_node().clone())
            .map_err(|_| anyhow!("document has no body element"))
    }

    /// Serializes the current document tree.
    pub fn document_html(&self) -> String {
        let mut bytes = Vec::new();
        if let Err(err) = self.dom.serialize(&mut bytes) {
            error!(target: "sandbox", error = %err, "failed to serialize document");
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn root_height(&self) -> f64 {
        self.root_height.get()
    }

    /// Feeds a new rendered height for the document root element and fires
    /// every size observer, even when the value is unchanged.
    pub fn set_root_height(&self, height: f64) {
        self.root_height.set(height);
        let slots: Vec<_> = self
            .size_observers
            .borrow()
            .iter()
            .map(|slot| (Rc::clone(&slot.alive), Rc::clone(&slot.callback)))
            .collect();
        for (alive, callback) in slots {
            if alive.get() {
                callback(height);
            }
        }
    }

    /// Observes the root element's size; the callback fires on every
    /// [`SandboxDocument::set_root_height`] call.
    pub fn observe_size(&self, callback: impl Fn(f64) + 'static) -> Subscription {
        let id = self.next_observer_id.get();
        self.next_observer_id.set(id + 1);
        let alive = Rc::new(Cell::new(true));
        self.size_observers.borrow_mut().push(SizeObserverSlot {
            id,
            alive: Rc::clone(&alive),
            callback: Rc::new(callback),
        });
        let registry = Rc::clone(&self.size_observers);
        Subscription::new(
            alive,
            Box::new(move || {
                registry.borrow_mut().retain(|slot| slot.id != id);
            }),
        )
    }
}
