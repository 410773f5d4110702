use std::rc::Rc;

use anyhow::Result;
use kuchiki::NodeRef;
use tracing::{debug, error, trace};
use url::Url;

use crate::channel::receive::{listen_for_host_messages, ListenOptions, ListenTarget};
use crate::channel::send::{send_message, SendOptions, SendTarget};
use crate::js::{resolve_url, HttpScriptLoader, ScriptLoader};
use crate::message::{DimensionsUpdate, HostMessage, IframeMessage, Message};
use crate::origin::OriginSet;
use crate::page::Subscription;
use crate::shell::{OriginPolicy, ShellError};

use super::document::SandboxDocument;
use super::inject::{prepare_fragment, PendingScript, ScriptSource};

/// Engine configuration: the origins the sandbox accepts commands from and
/// reports dimensions to.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub allowed_origins: OriginSet,
}

impl SandboxConfig {
    pub fn new(allowed_origins: OriginSet) -> Self {
        Self { allowed_origins }
    }

    pub fn from_policy(policy: &OriginPolicy) -> Result<Self, ShellError> {
        Ok(Self {
            allowed_origins: policy.allowed_origins()?,
        })
    }
}

struct EngineCore {
    document: Rc<SandboxDocument>,
    allowed: OriginSet,
    baseline_head: Vec<NodeRef>,
    baseline_body: Vec<NodeRef>,
    loader: Box<dyn ScriptLoader>,
}

/// The content-replacement engine running inside the sandbox document.
///
/// Activation captures the baseline node sets, installs the host-message
/// listener, emits the initial dimension report and attaches the two report
/// triggers (window resize, root size observer). The handle owns the
/// activation: dropping it quiesces the triggers, `deactivate` detaches them
/// explicitly.
pub struct InjectionEngine {
    core: Rc<EngineCore>,
    message_sub: Subscription,
    resize_sub: Subscription,
    observer_sub: Subscription,
}

impl InjectionEngine {
    /// Activates the engine with the default HTTP script loader.
    pub fn activate(document: Rc<SandboxDocument>, config: SandboxConfig) -> Result<Self> {
        Self::activate_with_loader(document, config, Box::new(HttpScriptLoader::new()))
    }

    pub fn activate_with_loader(
        document: Rc<SandboxDocument>,
        config: SandboxConfig,
        loader: Box<dyn ScriptLoader>,
    ) -> Result<Self> {
        // Baselines are captured before the listener exists, so no message
        // can ever observe (or delete) pre-shipped content as injected.
        let baseline_head = document.head()?.children().collect();
        let baseline_body = document.body()?.children().collect();

        let core = Rc::new(EngineCore {
            document,
            allowed: config.allowed_origins,
            baseline_head,
            baseline_body,
            loader,
        });

        let window = core.document.window().clone();
        let handler_core = Rc::downgrade(&core);
        let message_sub = listen_for_host_messages(
            &window,
            ListenTarget::Origins(core.allowed.as_slice()),
            ListenOptions::default(),
            move |value| {
                let Some(core) = handler_core.upgrade() else {
                    return;
                };
                match HostMessage::from_value(value) {
                    Some(HostMessage::SetHeadContent(html)) => core.set_head_content(&html),
                    Some(HostMessage::SetBodyContent(html)) => core.set_body_content(&html),
                    None => {
                        trace!(target: "sandbox", "ignoring host message with unknown type");
                    }
                }
            },
        )?;

        debug!(
            target: "sandbox",
            origins = core.allowed.len(),
            "injection engine active"
        );
        core.report_dimensions();

        let resize_core = Rc::downgrade(&core);
        let resize_sub = window.on_resize(move || {
            if let Some(core) = resize_core.upgrade() {
                core.report_dimensions();
            }
        });
        let observer_core = Rc::downgrade(&core);
        let observer_sub = core.document.observe_size(move |_| {
            if let Some(core) = observer_core.upgrade() {
                core.report_dimensions();
            }
        });

        Ok(Self {
            core,
            message_sub,
            resize_sub,
            observer_sub,
        })
    }

    pub fn document(&self) -> &Rc<SandboxDocument> {
        &self.core.document
    }

    /// Replaces the injected head content. Normally driven by a
    /// `set-head-content` message.
    pub fn set_head_content(&self, html: &str) {
        self.core.set_head_content(html);
    }

    /// Replaces the injected body content. Normally driven by a
    /// `set-body-content` message.
    pub fn set_body_content(&self, html: &str) {
        self.core.set_body_content(html);
    }

    /// Posts one dimension report per configured origin to the parent.
    pub fn report_dimensions(&self) {
        self.core.report_dimensions();
    }

    /// Detaches the message listener and both report triggers.
    pub fn deactivate(self) {
        self.message_sub.unsubscribe();
        self.resize_sub.unsubscribe();
        self.observer_sub.unsubscribe();
    }
}

impl EngineCore {
    fn set_head_content(&self, html: &str) {
        match self.document.head() {
            Ok(head) => self.replace_content(&head, &self.baseline_head, html),
            Err(err) => error!(target: "sandbox", error = %err, "cannot replace head content"),
        }
    }

    fn set_body_content(&self, html: &str) {
        match self.document.body() {
            Ok(body) => self.replace_content(&body, &self.baseline_body, html),
            Err(err) => error!(target: "sandbox", error = %err, "cannot replace body content"),
        }
    }

    /// One full replacement: every non-baseline child is removed, then the
    /// prepared fragment is appended in document order and its scripts run.
    fn replace_content(&self, target: &NodeRef, baseline: &[NodeRef], html: &str) {
        cleanup_node(target, baseline);

        let fragment = prepare_fragment(html);
        let script_count = fragment.scripts.len();
        for child in fragment.children {
            target.append(child);
        }
        self.execute_pending_scripts(fragment.scripts);

        debug!(
            target: "sandbox",
            scripts = script_count,
            "replaced injected content"
        );
    }

    /// Injection is best-effort: a failing script is logged and skipped, the
    /// rest keep running, and there is no rollback.
    fn execute_pending_scripts(&self, scripts: Vec<PendingScript>) {
        for (index, script) in scripts.into_iter().enumerate() {
            match script.source {
                ScriptSource::Inline { code } => {
                    if code.trim().is_empty() {
                        continue;
                    }
                    let filename = format!("injected-script-{index}.js");
                    if let Err(err) = self.document.js().eval(&code, &filename) {
                        error!(
                            target: "sandbox",
                            %filename,
                            error = %err,
                            "injected inline script failed"
                        );
                    }
                }
                ScriptSource::External { src } => {
                    if let Err(err) = self.run_external_script(&src) {
                        error!(
                            target: "sandbox",
                            src = %src,
                            error = %err,
                            "injected external script failed"
                        );
                    }
                }
            }
        }
    }

    fn run_external_script(&self, src: &str) -> Result<()> {
        let resolved = match self.document.base_url() {
            Some(base) => Url::parse(&resolve_url(src, base.as_str())?)?,
            None => Url::parse(src)?,
        };
        let code = self.loader.load(&resolved)?;
        self.document.js().eval(&code, resolved.as_str())
    }

    fn report_dimensions(&self) {
        let window = self.document.window();
        // A sandbox document loaded top-level has nobody to report to.
        let Some(parent) = window.parent() else {
            return;
        };
        let message = Message::Iframe(IframeMessage::DimensionsUpdate(DimensionsUpdate {
            document_element_height: self.document.root_height(),
        }));
        let options = SendOptions {
            target_origins: Some(self.allowed.as_slice().to_vec()),
        };
        if let Err(err) = send_message(
            window,
            SendTarget::Window(Some(&parent)),
            &message,
            Some(&options),
        ) {
            error!(target: "sandbox", error = %err, "failed to dispatch dimensions update");
        }
    }
}

/// Removes every child of `target` that was not present at engine start-up.
/// Nodes the document shipped with are always preserved; injected nodes are
/// removed on every call, so each replacement starts clean.
fn cleanup_node(target: &NodeRef, baseline: &[NodeRef]) {
    let children: Vec<NodeRef> = target.children().collect();
    for child in children {
        if !baseline.contains(&child) {
            child.detach();
        }
    }
}
