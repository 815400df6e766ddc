//! End-to-end tests of the augmenter against an in-memory reading page.
//!
//! Time is paused: debounce windows, retry delays and the scroll settle delay
//! elapse on tokio's virtual clock.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use readsel_config::Config;
use readsel_core::{
    Augmenter, CoreError, EventTarget, KeyPress, MemoryDocument, NodeId, Operation, Rect,
    ScrollBehavior, Selector, Settings, SyntheticEvent, Transition,
};

// ============================================================================
// Test Helpers
// ============================================================================

const TEXT: &str = "Ownership makes aliasing explicit.";

/// Nodes of one answer on the page.
struct Answer {
    block: NodeId,
    header: NodeId,
    content: NodeId,
    expand: Option<NodeId>,
}

/// Build an answer shaped like the reading view:
/// `.AnswerItem > (.ContentItem-meta, .RichContent-inner > .RichText > p)`, plus
/// a `.ContentItem-expandButton` while collapsed.
fn answer(doc: &MemoryDocument, parent: NodeId, expanded: bool) -> Answer {
    let block = doc.append_element(parent, "div", "List-item AnswerItem");
    let header = doc.append_element(block, "div", "ContentItem-meta");
    doc.append_text(header, "Author");
    let inner = doc.append_element(block, "div", "RichContent-inner");
    let content = doc.append_element(inner, "span", "RichText ztext");
    let paragraph = doc.append_element(content, "p", "");
    doc.append_text(paragraph, TEXT);
    doc.set_rect(content, Rect::new(20.0, 1000.0, 620.0, 1500.0));

    let expand =
        (!expanded).then(|| doc.append_element(block, "button", "ContentItem-expandButton"));
    Answer {
        block,
        header,
        content,
        expand,
    }
}

fn settings() -> Settings {
    Settings::from_config(&Config::default()).unwrap()
}

fn page() -> (Arc<MemoryDocument>, NodeId) {
    let doc = Arc::new(MemoryDocument::new());
    let list = doc.append_element(doc.body(), "div", "List");
    (doc, list)
}

fn augmenter(doc: &Arc<MemoryDocument>) -> Augmenter {
    Augmenter::new(doc.clone(), settings())
}

/// Long enough for any debounce, retry chain and selection to finish.
async fn settle() {
    sleep(Duration::from_secs(3)).await;
}

fn control_pattern() -> Selector {
    Selector::class("zh-select-btn")
}

/// `hasControl` implies expanded and header present, and the control lives
/// in the header.
fn assert_invariant(doc: &MemoryDocument, block: NodeId) {
    let controls = doc.find_all(block, &control_pattern());
    if controls.is_empty() {
        return;
    }
    let settings = settings();
    assert!(
        doc.find_all(block, &settings.patterns.expand).is_empty(),
        "collapsed block {} has a control",
        block
    );
    let headers = doc.find_all(block, &settings.patterns.header);
    assert!(!headers.is_empty(), "block {} without header has a control", block);
    assert_eq!(controls.len(), 1, "block {} has {} controls", block, controls.len());
    assert_eq!(doc.find_all(headers[0], &control_pattern()), controls);
}

fn text_selected_count(doc: &MemoryDocument) -> usize {
    doc.dispatched()
        .iter()
        .filter(|(_, event)| matches!(event, SyntheticEvent::TextSelected { .. }))
        .count()
}

// ============================================================================
// Bootstrap and activation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_click_selects_content() {
    let (doc, list) = page();
    let a = answer(&doc, list, true);
    let augmenter = augmenter(&doc);

    augmenter.start().await.unwrap();
    settle().await;

    let controls = doc.controls_in(a.header);
    assert_eq!(controls.len(), 1);
    assert_eq!(doc.controls_in(a.block), controls);
    assert_eq!(doc.inline_position(a.header).as_deref(), Some("relative"));
    assert_eq!(doc.active_listeners().len(), 1);

    assert!(doc.click(controls[0]));
    sleep(Duration::from_millis(100)).await;
    assert!(doc.scroll_requests().is_empty());
    assert!(doc.dispatched().is_empty());

    settle().await;

    assert_eq!(doc.selection(), Some((a.content, TEXT.to_string())));
    assert_eq!(
        doc.scroll_requests(),
        vec![(0.0 + 1500.0 - 800.0 * 0.66, ScrollBehavior::Smooth)]
    );
    assert_eq!(
        doc.dispatched(),
        vec![
            (EventTarget::Document, SyntheticEvent::SelectionChange),
            (
                EventTarget::Node(a.content),
                SyntheticEvent::MouseUp {
                    client_x: 620.0,
                    client_y: 1500.0
                }
            ),
            (
                EventTarget::Node(a.content),
                SyntheticEvent::TextSelected {
                    selected_text: doc.text_content(a.content),
                    target: a.content
                }
            ),
        ]
    );
    assert_eq!(augmenter.metrics().snapshot().selections, 1);
}

#[tokio::test(start_paused = true)]
async fn test_shortcut_selects_content() {
    let (doc, list) = page();
    let a = answer(&doc, list, true);
    let augmenter = augmenter(&doc);

    augmenter.start().await.unwrap();
    settle().await;

    assert_eq!(doc.press_key(&KeyPress::new("s")), 0);
    assert_eq!(doc.press_key(&KeyPress::new("S").with_alt()), 1);
    settle().await;

    assert_eq!(doc.selection(), Some((a.content, TEXT.to_string())));
    assert_eq!(text_selected_count(&doc), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rapid_activation_selects_once() {
    let (doc, list) = page();
    let a = answer(&doc, list, true);
    let augmenter = augmenter(&doc);

    augmenter.start().await.unwrap();
    settle().await;

    let control = doc.controls_in(a.header)[0];
    for _ in 0..3 {
        doc.click(control);
        sleep(Duration::from_millis(50)).await;
    }
    doc.press_key(&KeyPress::new("s").with_alt());
    settle().await;

    assert_eq!(augmenter.metrics().snapshot().selections, 1);
    assert_eq!(text_selected_count(&doc), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shortcut_fires_every_bound_block() {
    let (doc, list) = page();
    answer(&doc, list, true);
    answer(&doc, list, true);
    let augmenter = augmenter(&doc);

    augmenter.start().await.unwrap();
    settle().await;

    assert_eq!(doc.press_key(&KeyPress::new("s").with_alt()), 2);
    settle().await;

    assert_eq!(augmenter.metrics().snapshot().selections, 2);
    assert_eq!(text_selected_count(&doc), 2);
}

#[tokio::test(start_paused = true)]
async fn test_bootstrap_waits_for_document() {
    let doc = Arc::new(MemoryDocument::loading());
    let list = doc.append_element(doc.body(), "div", "List");
    let a = answer(&doc, list, true);
    let augmenter = Arc::new(augmenter(&doc));

    let starting = {
        let augmenter = augmenter.clone();
        tokio::spawn(async move { augmenter.start().await })
    };
    settle().await;
    assert!(!starting.is_finished());
    assert!(doc.controls_in(a.block).is_empty());

    doc.finish_loading();
    starting.await.unwrap().unwrap();
    settle().await;

    assert!(augmenter.is_running().await);
    assert_eq!(doc.controls_in(a.header).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_block_added_after_start() {
    let (doc, list) = page();
    let augmenter = augmenter(&doc);

    augmenter.start().await.unwrap();
    settle().await;

    let a = answer(&doc, list, true);
    settle().await;

    assert_eq!(doc.controls_in(a.header).len(), 1);
    assert_invariant(&doc, a.block);
}

#[tokio::test(start_paused = true)]
async fn test_block_inserted_during_bootstrap_gets_control() {
    let (doc, list) = page();
    let first = answer(&doc, list, true);
    doc.delay(Operation::Observe, Duration::from_millis(50));
    let augmenter = Arc::new(augmenter(&doc));

    let starting = {
        let augmenter = augmenter.clone();
        tokio::spawn(async move { augmenter.start().await })
    };
    sleep(Duration::from_millis(10)).await;
    let second = answer(&doc, list, true);

    starting.await.unwrap().unwrap();
    settle().await;

    assert_eq!(doc.controls_in(first.block).len(), 1);
    assert_eq!(doc.controls_in(second.block).len(), 1);
}

// ============================================================================
// Reconciliation properties
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_reconcile_is_idempotent() {
    let (doc, list) = page();
    let a = answer(&doc, list, true);
    let augmenter = augmenter(&doc);

    augmenter.start().await.unwrap();
    settle().await;

    assert_eq!(augmenter.reconcile(a.block).await.unwrap(), Transition::Unchanged);
    assert_eq!(augmenter.reconcile(a.block).await.unwrap(), Transition::Unchanged);

    assert_eq!(doc.controls_in(a.block).len(), 1);
    assert_eq!(doc.active_listeners().len(), 1);
    assert_eq!(augmenter.metrics().snapshot().attached, 1);
}

#[tokio::test(start_paused = true)]
async fn test_control_only_on_expanded_blocks_with_header() {
    let (doc, list) = page();
    let expanded = answer(&doc, list, true);
    let collapsed = answer(&doc, list, false);
    let headless = answer(&doc, list, true);
    doc.remove(headless.header);
    let augmenter = augmenter(&doc);

    augmenter.start().await.unwrap();
    settle().await;

    assert_eq!(doc.controls_in(expanded.block).len(), 1);
    assert!(doc.controls_in(collapsed.block).is_empty());
    assert!(doc.controls_in(headless.block).is_empty());
    for block in [expanded.block, collapsed.block, headless.block] {
        assert_invariant(&doc, block);
    }

    // Swap states: collapse the first, expand the second.
    doc.append_element(expanded.block, "button", "ContentItem-more");
    if let Some(expand) = collapsed.expand {
        doc.remove(expand);
    }
    settle().await;

    assert!(doc.controls_in(expanded.block).is_empty());
    assert_eq!(doc.controls_in(collapsed.block).len(), 1);
    for block in [expanded.block, collapsed.block, headless.block] {
        assert_invariant(&doc, block);
    }
    assert_eq!(doc.active_listeners().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_burst_of_mutations_is_one_batch() {
    let (doc, list) = page();
    let a = answer(&doc, list, true);
    let augmenter = augmenter(&doc);

    augmenter.start().await.unwrap();
    settle().await;
    let before = augmenter.metrics().snapshot();

    for i in 0..5 {
        doc.add_class(a.content, &format!("tick-{}", i));
        sleep(Duration::from_millis(20)).await;
    }
    settle().await;

    let after = augmenter.metrics().snapshot();
    assert_eq!(after.batches, before.batches + 1);
    assert_eq!(after.reconciliations, before.reconciliations + 1);
    assert_eq!(doc.controls_in(a.block).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failing_attachment_is_retried_then_reported() {
    let (doc, list) = page();
    let a = answer(&doc, list, true);
    doc.fail_always(Operation::InsertControl);
    let augmenter = augmenter(&doc);

    augmenter.start().await.unwrap();
    settle().await;

    assert_eq!(doc.calls(Operation::InsertControl), 3);
    let metrics = augmenter.metrics().snapshot();
    assert_eq!(metrics.failures, 1);
    assert_eq!(metrics.attached, 0);
    assert!(doc.controls_in(a.block).is_empty());
    assert!(doc.active_listeners().is_empty());

    // The block is picked up again by the next pass once the page settles.
    doc.clear_faults();
    doc.add_class(a.block, "is-ready");
    settle().await;
    assert_eq!(doc.controls_in(a.header).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_recovers_within_retry_bound() {
    let (doc, list) = page();
    let a = answer(&doc, list, true);
    doc.fail_next(Operation::InsertControl, 2);
    let augmenter = augmenter(&doc);

    augmenter.start().await.unwrap();
    settle().await;

    assert_eq!(doc.calls(Operation::InsertControl), 3);
    assert_eq!(doc.controls_in(a.header).len(), 1);
    assert_eq!(augmenter.metrics().snapshot().failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_expand_collapse_expand_keeps_one_binding() {
    let (doc, list) = page();
    let a = answer(&doc, list, true);
    let augmenter = augmenter(&doc);

    augmenter.start().await.unwrap();
    settle().await;
    assert_eq!(doc.controls_in(a.block).len(), 1);

    let more = doc.append_element(a.block, "button", "ContentItem-more");
    settle().await;
    assert!(doc.controls_in(a.block).is_empty());
    assert!(doc.active_listeners().is_empty());

    doc.remove(more);
    settle().await;
    assert_eq!(doc.controls_in(a.header).len(), 1);
    assert_eq!(doc.active_listeners().len(), 1);

    let metrics = augmenter.metrics().snapshot();
    assert_eq!(metrics.attached, 2);
    assert_eq!(metrics.detached, 1);
}

#[tokio::test(start_paused = true)]
async fn test_collapsed_block_never_gets_control() {
    let (doc, list) = page();
    let a = answer(&doc, list, false);
    let augmenter = augmenter(&doc);

    augmenter.start().await.unwrap();
    settle().await;
    assert!(doc.controls_in(a.block).is_empty());

    for _ in 0..3 {
        assert_eq!(augmenter.reconcile(a.block).await.unwrap(), Transition::Unchanged);
    }
    doc.add_class(a.block, "is-hovered");
    settle().await;
    assert!(doc.controls_in(a.block).is_empty());

    if let Some(expand) = a.expand {
        doc.remove(expand);
    }
    settle().await;
    assert_eq!(doc.controls_in(a.header).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_partial_attachment_is_adopted() {
    let (doc, list) = page();
    let a = answer(&doc, list, true);
    doc.fail_next(Operation::AddListener, 1);
    let augmenter = augmenter(&doc);

    augmenter.start().await.unwrap();
    settle().await;

    assert_eq!(doc.controls_in(a.block).len(), 1);
    assert_eq!(doc.active_listeners().len(), 1);
    let metrics = augmenter.metrics().snapshot();
    assert_eq!(metrics.attached, 0);
    assert_eq!(metrics.adopted, 1);
    assert_eq!(metrics.failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_leftover_controls_are_adopted_and_strays_removed() {
    let (doc, list) = page();
    let a = answer(&doc, list, true);
    let leftover = doc.append_element(a.header, "button", "zh-select-btn");
    let stray = doc.append_element(a.block, "button", "zh-select-btn");
    let augmenter = augmenter(&doc);

    augmenter.start().await.unwrap();
    settle().await;

    assert_eq!(doc.find_all(a.block, &control_pattern()), vec![leftover]);
    assert!(!doc.is_attached(stray));
    assert_eq!(augmenter.metrics().snapshot().adopted, 1);

    assert!(doc.click(leftover));
    settle().await;
    assert_eq!(doc.selection(), Some((a.content, TEXT.to_string())));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_passes_attach_once() {
    let (doc, list) = page();
    let a = answer(&doc, list, true);
    let augmenter = Arc::new(augmenter(&doc));

    let passes: Vec<_> = (0..8)
        .map(|_| {
            let augmenter = augmenter.clone();
            tokio::spawn(async move { augmenter.reconcile(a.block).await })
        })
        .collect();

    let mut attached = 0;
    for pass in passes {
        match pass.await.unwrap().unwrap() {
            Transition::Attached => attached += 1,
            Transition::Unchanged => {}
            other => panic!("unexpected transition {:?}", other),
        }
    }

    assert_eq!(attached, 1);
    assert_eq!(doc.controls_in(a.block).len(), 1);
    assert_eq!(doc.active_listeners().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_checks_tracked_blocks_in_one_call() {
    let (doc, list) = page();
    let answers: Vec<Answer> = (0..50).map(|_| answer(&doc, list, true)).collect();
    let augmenter = augmenter(&doc);
    augmenter.start().await.unwrap();
    settle().await;
    assert_eq!(augmenter.tracked_blocks(), 50);

    let connected = doc.calls(Operation::IsConnected);
    let detached = doc.calls(Operation::Detached);

    // One pass over the touched block; class changes never remove a block.
    doc.add_class(answers[0].block, "is-focused");
    settle().await;
    assert_eq!(doc.calls(Operation::IsConnected) - connected, 1);
    assert_eq!(doc.calls(Operation::Detached), detached);

    doc.remove(answers[1].block);
    settle().await;
    assert_eq!(doc.calls(Operation::Detached) - detached, 1);
    assert_eq!(augmenter.tracked_blocks(), 49);
    assert_eq!(doc.active_listeners().len(), 49);
}

// ============================================================================
// Selection edge cases
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_missing_content_selects_nothing() {
    let (doc, list) = page();
    let a = answer(&doc, list, true);
    let augmenter = augmenter(&doc);

    augmenter.start().await.unwrap();
    settle().await;

    doc.remove(a.content);
    settle().await;
    let control = doc.controls_in(a.header)[0];
    assert!(doc.click(control));
    settle().await;

    assert!(doc.scroll_requests().is_empty());
    assert!(doc.dispatched().is_empty());
    assert_eq!(augmenter.metrics().snapshot().selections, 0);
}

#[tokio::test(start_paused = true)]
async fn test_empty_content_dispatches_nothing() {
    let (doc, list) = page();
    let a = answer(&doc, list, true);
    for child in doc.children(a.content) {
        doc.remove(child);
    }
    let augmenter = augmenter(&doc);

    augmenter.start().await.unwrap();
    settle().await;
    doc.click(doc.controls_in(a.header)[0]);
    settle().await;

    assert_eq!(doc.scroll_requests().len(), 1);
    assert_eq!(doc.selection(), None);
    assert!(doc.dispatched().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_failures_are_swallowed() {
    let (doc, list) = page();
    let a = answer(&doc, list, true);
    doc.fail_always(Operation::Dispatch);
    let augmenter = augmenter(&doc);

    augmenter.start().await.unwrap();
    settle().await;
    doc.click(doc.controls_in(a.header)[0]);
    settle().await;

    assert_eq!(doc.calls(Operation::Dispatch), 3);
    assert_eq!(doc.selection(), Some((a.content, TEXT.to_string())));
    assert!(augmenter.is_running().await);
}

// ============================================================================
// Lifecycle and teardown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stop_leaves_page_as_found() {
    let (doc, list) = page();
    let a = answer(&doc, list, true);
    let b = answer(&doc, list, true);
    let augmenter = augmenter(&doc);

    augmenter.start().await.unwrap();
    settle().await;
    assert_eq!(doc.controls_in(doc.body()).len(), 2);

    augmenter.stop().await.unwrap();

    assert!(doc.controls_in(a.block).is_empty());
    assert!(doc.controls_in(b.block).is_empty());
    assert!(doc.active_listeners().is_empty());
    assert!(!doc.is_observed());
    assert!(!augmenter.is_running().await);
    assert_eq!(augmenter.tracked_blocks(), 0);
    assert!(matches!(augmenter.stop().await, Err(CoreError::NotRunning)));

    // Returns immediately once stopped.
    augmenter.closed().await;
}

#[tokio::test(start_paused = true)]
async fn test_start_twice_is_rejected() {
    let (doc, _) = page();
    let augmenter = augmenter(&doc);

    augmenter.start().await.unwrap();
    assert!(matches!(augmenter.start().await, Err(CoreError::AlreadyRunning)));

    augmenter.stop().await.unwrap();
    augmenter.start().await.unwrap();
    assert!(augmenter.is_running().await);
}

#[tokio::test(start_paused = true)]
async fn test_bootstrap_failure_is_logged_and_cleaned_up() {
    let (doc, list) = page();
    answer(&doc, list, true);
    doc.fail_always(Operation::Observe);
    let augmenter = augmenter(&doc);

    augmenter.bootstrap().await;
    settle().await;

    assert!(!augmenter.is_running().await);
    assert!(doc.controls_in(doc.body()).is_empty());
    assert!(doc.active_listeners().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_removed_block_releases_binding() {
    let (doc, list) = page();
    let a = answer(&doc, list, true);
    let augmenter = augmenter(&doc);

    augmenter.start().await.unwrap();
    settle().await;
    assert_eq!(doc.active_listeners().len(), 1);
    assert_eq!(augmenter.tracked_blocks(), 1);

    doc.remove(a.block);
    settle().await;

    assert!(doc.active_listeners().is_empty());
    assert_eq!(augmenter.tracked_blocks(), 0);
    assert_eq!(augmenter.metrics().snapshot().teardowns, 1);
}

#[tokio::test(start_paused = true)]
async fn test_closed_resolves_when_event_stream_ends() {
    let (doc, _) = page();
    let augmenter = augmenter(&doc);
    augmenter.start().await.unwrap();

    // The page goes away underneath the augmenter.
    readsel_core::HostDocument::disconnect(doc.as_ref()).await.unwrap();

    tokio::time::timeout(Duration::from_secs(1), augmenter.closed())
        .await
        .unwrap();
    augmenter.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_slow_attachment_removes_control() {
    let (doc, list) = page();
    let a = answer(&doc, list, true);
    doc.delay(Operation::AddListener, Duration::from_millis(50));
    let augmenter = augmenter(&doc);

    augmenter.start().await.unwrap();
    sleep(Duration::from_millis(10)).await;
    // Inserted, still waiting for its shortcut listener.
    assert_eq!(doc.controls_in(a.block).len(), 1);

    augmenter.stop().await.unwrap();
    assert!(doc.controls_in(a.block).is_empty());
    assert!(doc.active_listeners().is_empty());

    settle().await;
    assert!(doc.controls_in(a.block).is_empty());
    assert!(doc.active_listeners().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_event_stream_ends() {
    let (doc, list) = page();
    let a = answer(&doc, list, true);
    let augmenter = augmenter(&doc);
    augmenter.start().await.unwrap();
    settle().await;

    readsel_core::HostDocument::disconnect(doc.as_ref()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), augmenter.closed())
        .await
        .unwrap();
    augmenter.stop().await.unwrap();
    assert!(doc.controls_in(a.block).is_empty());

    let b = answer(&doc, list, true);
    augmenter.start().await.unwrap();
    settle().await;

    assert_eq!(doc.controls_in(a.block).len(), 1);
    assert_eq!(doc.controls_in(b.block).len(), 1);
    assert_eq!(doc.active_listeners().len(), 2);

    let control = doc.controls_in(b.block)[0];
    assert!(doc.click(control));
    settle().await;
    assert_eq!(doc.selection().map(|(node, _)| node), Some(b.content));
}
