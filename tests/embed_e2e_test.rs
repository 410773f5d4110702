//! End-to-end scenarios: a host page, a frame pointing at a cross-origin
//! sandbox document, and the full message loop in both directions.

use std::cell::RefCell;
use std::rc::Rc;

use url::Url;

use crossembed::js::ScriptLoader;
use crossembed::{
    generate_shell_html, listen_for_dimension_updates, send_set_body_content, FrameElement,
    InjectionEngine, ListenOptions, ListenTarget, OriginPolicy, PageRuntime, SandboxConfig,
    SandboxDocument, SendTarget, ShellOptions,
};

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

struct NoNetwork;

impl ScriptLoader for NoNetwork {
    fn load(&self, url: &Url) -> anyhow::Result<String> {
        anyhow::bail!("network disabled in tests: {url}")
    }
}

fn open_sandbox(
    runtime: &PageRuntime,
    host: &crossembed::Window,
    origins: OriginPolicy,
) -> (FrameElement, Rc<SandboxDocument>, InjectionEngine) {
    let frame = FrameElement::new();
    frame.set_src("https://sandbox.test/embed");
    let content = runtime.open_frame_window(host, &frame).unwrap();

    let options = ShellOptions::new(origins);
    let html = generate_shell_html(&options).unwrap();
    let document = SandboxDocument::open(&content, &html).unwrap();
    let config = SandboxConfig::from_policy(&options.origins).unwrap();
    let engine =
        InjectionEngine::activate_with_loader(Rc::clone(&document), config, Box::new(NoNetwork))
            .unwrap();
    (frame, document, engine)
}

#[test]
fn whitelisted_host_can_replace_body_content() {
    let runtime = PageRuntime::new();
    let host = runtime.open_window(url("https://a.test/page"));
    let (frame, document, _engine) = open_sandbox(
        &runtime,
        &host,
        OriginPolicy::Whitelist(vec!["https://a.test".to_string()]),
    );

    send_set_body_content(&host, SendTarget::Frame(&frame), "<h1>Hi</h1>", None).unwrap();
    runtime.pump();

    assert!(document.document_html().contains("<h1>Hi</h1>"));
}

#[test]
fn mismatched_whitelist_produces_no_dom_change() {
    let runtime = PageRuntime::new();
    let host = runtime.open_window(url("https://a.test/page"));
    let (frame, document, _engine) = open_sandbox(
        &runtime,
        &host,
        OriginPolicy::Whitelist(vec!["https://b.test".to_string()]),
    );

    let before = document.document_html();
    send_set_body_content(&host, SendTarget::Frame(&frame), "<h1>Hi</h1>", None).unwrap();
    runtime.pump();

    assert_eq!(document.document_html(), before);
}

#[test]
fn allow_all_sandbox_reports_dimensions_on_load() {
    let runtime = PageRuntime::new();
    let host = runtime.open_window(url("https://a.test/page"));

    // The embedder feeds the rendered height before the engine comes up.
    let frame = FrameElement::new();
    frame.set_src("https://sandbox.test/embed");
    let content = runtime.open_frame_window(&host, &frame).unwrap();
    let options = ShellOptions::new(OriginPolicy::AllowAll);
    let html = generate_shell_html(&options).unwrap();
    let document = SandboxDocument::open(&content, &html).unwrap();
    document.set_root_height(640.0);
    let _engine = InjectionEngine::activate_with_loader(
        Rc::clone(&document),
        SandboxConfig::from_policy(&options.origins).unwrap(),
        Box::new(NoNetwork),
    )
    .unwrap();

    let received = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&received);
    listen_for_dimension_updates(
        &host,
        ListenTarget::Frame(&frame),
        ListenOptions::default(),
        move |update| {
            sink.borrow_mut().push(update.document_element_height);
        },
    )
    .unwrap();

    runtime.pump();
    let received = received.borrow();
    assert_eq!(received.len(), 1);
    assert!(received[0].is_finite());
    assert!(received[0] >= 0.0);
    assert_eq!(received[0], 640.0);
}

#[test]
fn whitelist_restricts_dimension_report_delivery() {
    let runtime = PageRuntime::new();
    // The host is NOT at the whitelisted origin: the sandbox still posts its
    // report, but the delivery restriction drops it at the parent window.
    let host = runtime.open_window(url("https://c.test/page"));
    let (frame, _document, _engine) = open_sandbox(
        &runtime,
        &host,
        OriginPolicy::Whitelist(vec!["https://a.test".to_string()]),
    );

    let received = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&received);
    listen_for_dimension_updates(
        &host,
        ListenTarget::Frame(&frame),
        ListenOptions::default(),
        move |update| {
            sink.borrow_mut().push(update.document_element_height);
        },
    )
    .unwrap();

    runtime.pump();
    assert!(received.borrow().is_empty());
}

#[test]
fn injected_script_runs_inside_the_sandbox() {
    let runtime = PageRuntime::new();
    let host = runtime.open_window(url("https://a.test/page"));
    let (frame, document, _engine) = open_sandbox(
        &runtime,
        &host,
        OriginPolicy::Whitelist(vec!["https://a.test".to_string()]),
    );

    send_set_body_content(
        &host,
        SendTarget::Frame(&frame),
        "<div id=\"app\"></div><script>window.BOOTED = 1;</script>",
        None,
    )
    .unwrap();
    runtime.pump();

    let booted: i32 = document.js().eval_with("window.BOOTED", "probe.js").unwrap();
    assert_eq!(booted, 1);
    assert!(document.document_html().contains("id=\"app\""));
}
