//! Polling lookups and expectations against pages that change while a
//! check is running.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use vigia::prelude::*;

fn quiet_config() -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.base_url = "http://forum.test".into();
    config.wait.timeout_ms = 1000;
    config.wait.interval_ms = 50;
    config.wait.probe_ms = 300;
    config
}

fn composer_page() -> Node {
    Node::new("body").children([
        Node::new("div").class("spinner").text("Loading"),
        Node::new("textarea").class("d-editor-input"),
        Node::new("button").class("create").text("Create Topic").disabled(),
        Node::new("button").class("open-modal").text("Options"),
        Node::new("div").class("toasts").children([
            Node::new("div")
                .class("toast")
                .attr("data-id", "1")
                .text("Draft saved")
                .child(Node::new("button").class("toast-close")),
            Node::new("div")
                .class("toast")
                .attr("data-id", "2")
                .text("Draft synced")
                .child(Node::new("button").class("toast-close")),
        ]),
    ])
}

async fn open(browser: &FakeBrowser) -> (Session, Window) {
    browser.route("/new-topic", composer_page()).unwrap();
    let session = Session::start(Arc::new(browser.clone()), quiet_config())
        .await
        .unwrap();
    let window = session.current().await.unwrap();
    window.visit_path("/new-topic").await.unwrap();
    (session, window)
}

mod lookup_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_missing_element_reports_not_found_after_timeout() {
        let browser = FakeBrowser::new();
        let (session, window) = open(&browser).await;
        let start = Instant::now();
        let err = window.find(&Locator::new(".composer-preview")).await.unwrap_err();
        match err {
            HarnessError::NotFound { selector, waited, .. } => {
                assert!(selector.contains(".composer-preview"));
                assert!(waited.unwrap() >= Duration::from_millis(1000));
            }
            other => panic!("expected not found, got {other:?}"),
        }
        assert!(start.elapsed() >= Duration::from_millis(1000));
        session.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_element_is_found_once_rendered() {
        let browser = FakeBrowser::new();
        let (session, window) = open(&browser).await;
        browser.schedule(window.id(), Duration::from_millis(400), |doc| {
            doc.append("body", Node::new("div").class("composer-preview").text("preview"))
        });
        let start = Instant::now();
        window.find(&Locator::new(".composer-preview")).await.unwrap();
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(400));
        assert!(waited < Duration::from_millis(500));
        session.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_lookup_fails_at_the_timeout() {
        let browser = FakeBrowser::new();
        let (session, window) = open(&browser).await;
        browser.stall_next("query", 1).unwrap();
        let start = Instant::now();
        let err = window.find(&Locator::new(".spinner")).await.unwrap_err();
        assert_eq!(start.elapsed(), Duration::from_millis(1000));
        match err {
            HarnessError::Timeout { last_failure, .. } => {
                assert_eq!(last_failure, "attempt did not complete");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        // the next lookup is answered normally
        window.find(&Locator::new(".spinner")).await.unwrap();
        session.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_handles_are_looked_up_again() {
        let browser = FakeBrowser::new();
        let (session, window) = open(&browser).await;
        let clicks = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&clicks);
        browser
            .on_click(".open-modal", move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        browser.inject_stale(2).unwrap();
        window.click(&Locator::new(".open-modal")).await.unwrap();
        assert_eq!(clicks.load(Ordering::SeqCst), 1);
        session.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_existence_probe_is_bounded_by_probe_window() {
        let browser = FakeBrowser::new();
        let (session, window) = open(&browser).await;
        let start = Instant::now();
        assert!(!window.exists(&Locator::new(".flash-error")).await.unwrap());
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert!(start.elapsed() < Duration::from_millis(1000));

        let start = Instant::now();
        assert!(window.exists(&Locator::new(".spinner")).await.unwrap());
        assert_eq!(start.elapsed(), Duration::ZERO);
        session.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_scoped_lookup_reports_its_scope() {
        let browser = FakeBrowser::new();
        let (session, window) = open(&browser).await;
        let toast = Locator::new(".toasts").child(Selector::css(".toast")).with_text("synced");
        assert_eq!(window.attribute(&toast, "data-id").await.unwrap().as_deref(), Some("2"));

        let missing = Locator::new(".toasts")
            .child(Selector::css(".toast-undo"))
            .with_timeout(Duration::from_millis(100));
        match window.find(&missing).await.unwrap_err() {
            HarnessError::NotFound { scope, .. } => {
                assert!(scope.unwrap().contains(".toasts"));
            }
            other => panic!("expected not found, got {other:?}"),
        }
        session.close().await.unwrap();
    }
}

mod matcher_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_button_becomes_enabled_after_typing() {
        let browser = FakeBrowser::new();
        browser
            .on(FakeEvent::Change, "textarea.d-editor-input", |event| {
                let _ = event.browser.mutate(&event.window, |doc| {
                    doc.remove_attr("button.create", "disabled").map(|_| ())
                });
            })
            .unwrap();
        let (session, window) = open(&browser).await;

        window.expect("button.create").to_be_disabled().await.unwrap();
        window
            .type_text(&Locator::new("textarea.d-editor-input"), "Hello there")
            .await
            .unwrap();
        window.expect("button.create").to_be_enabled().await.unwrap();
        window
            .expect("textarea.d-editor-input")
            .to_have_value("Hello there")
            .await
            .unwrap();
        session.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_waits_for_removal() {
        let browser = FakeBrowser::new();
        let (session, window) = open(&browser).await;
        browser.schedule(window.id(), Duration::from_millis(300), |doc| {
            doc.remove(".spinner").map(|_| ())
        });

        let result = window.expect(".spinner").to_be_absent().await.unwrap();
        assert!(result.ok);
        assert!(result.elapsed >= Duration::from_millis(300));
        session.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stay_absent_catches_late_render() {
        let browser = FakeBrowser::new();
        let (session, window) = open(&browser).await;
        browser.schedule(window.id(), Duration::from_millis(200), |doc| {
            doc.append("body", Node::new("div").class("flash-error").text("Oops"))
        });

        // to_be_absent would pass straight away here
        let err = window.expect(".flash-error").to_stay_absent().await.unwrap_err();
        assert_eq!(err.kind(), "assertion_failed");
        assert!(err.to_string().contains("appeared after"));
        session.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_expectation_collects_every_miss() {
        let browser = FakeBrowser::new();
        let (session, window) = open(&browser).await;

        let mut title = window.expect(".spinner").soft().within(Duration::from_millis(200));
        let first = title.to_have_exact_text("Ready").await.unwrap();
        assert!(!first.ok);
        title.to_be_visible().await.unwrap();
        title.to_stay_absent().await.unwrap();
        assert_eq!(title.errors().len(), 2);

        let err = title.finalize().unwrap_err();
        assert!(err.to_string().contains("2 expectation(s) failed"));
        assert!(err.to_string().contains("Loading"));
        session.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_waits_for_new_rows() {
        let browser = FakeBrowser::new();
        let (session, window) = open(&browser).await;
        browser.schedule(window.id(), Duration::from_millis(150), |doc| {
            doc.append(".toasts", Node::new("div").class("toast").attr("data-id", "3").text("Posted"))
        });

        window.expect(".toast").to_have_count(3).await.unwrap();
        let err = window
            .expect(".toast")
            .within(Duration::from_millis(200))
            .to_have_count(5)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("count was 3"));
        session.close().await.unwrap();
    }
}

mod component_tests {
    use super::*;

    fn with_modal(browser: &FakeBrowser) {
        browser
            .on_click(".open-modal", |event| {
                let _ = event.browser.mutate(&event.window, |doc| {
                    doc.append(
                        "body",
                        Node::new("div").class("modal").children([
                            Node::new("h3").class("modal-title").text("  Topic options "),
                            Node::new("div").class("modal-body").text("Pin this topic?"),
                            Node::new("div").class("modal-footer").children([
                                Node::new("button").text("Pin"),
                                Node::new("button").text("Cancel"),
                            ]),
                            Node::new("button").class("modal-close"),
                        ]),
                    )
                });
            })
            .unwrap();
        browser
            .on_click(".modal-footer button", |event| {
                let _ = event.browser.mutate(&event.window, |doc| {
                    doc.append("body", Node::new("div").class("pinned"))?;
                    doc.remove(".modal").map(|_| ())
                });
            })
            .unwrap();
        browser
            .on_click(".modal-close", |event| {
                let _ = event
                    .browser
                    .mutate(&event.window, |doc| doc.remove(".modal").map(|_| ()));
            })
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_modal_opens_and_closes() {
        let browser = FakeBrowser::new();
        with_modal(&browser);
        let (session, window) = open(&browser).await;
        let modal = Modal::default();

        assert!(!modal.is_open(&window).await.unwrap());
        modal.open_with(&window, &Locator::new(".open-modal")).await.unwrap();
        assert_eq!(modal.title_text(&window).await.unwrap(), "Topic options");
        window.expect(modal.body()).to_have_text("Pin this").await.unwrap();
        modal.close(&window).await.unwrap();
        assert!(!modal.is_open(&window).await.unwrap());

        modal.open_with(&window, &Locator::new(".open-modal")).await.unwrap();
        modal.click_button(&window, "Pin").await.unwrap();
        window.expect(".pinned").to_be_present().await.unwrap();
        session.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_toast_dismissal_removes_only_that_toast() {
        let browser = FakeBrowser::new();
        for id in ["1", "2"] {
            browser
                .on_click(&format!(".toast[data-id='{id}'] .toast-close"), move |event| {
                    let _ = event.browser.mutate(&event.window, |doc| {
                        doc.remove(&format!(".toast[data-id='{id}']")).map(|_| ())
                    });
                })
                .unwrap();
        }
        let (session, window) = open(&browser).await;
        let toasts = Toasts::default();

        toasts.expect_message(&window, "Draft saved").await.unwrap();
        toasts.dismiss(&window, "Draft saved").await.unwrap();
        assert!(!toasts.has_message(&window, "Draft saved").await.unwrap());
        assert!(toasts.has_message(&window, "Draft synced").await.unwrap());
        session.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_escape_key_reaches_focused_element() {
        let browser = FakeBrowser::new();
        let escapes = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&escapes);
        browser
            .on(FakeEvent::Key, "textarea", move |event| {
                if event.key == Some(Key::Escape) {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
            })
            .unwrap();
        let (session, window) = open(&browser).await;
        window.fill(&Locator::new("textarea"), "draft").await.unwrap();
        window.press(Key::Escape).await.unwrap();
        assert_eq!(escapes.load(Ordering::SeqCst), 1);
        session.close().await.unwrap();
    }
}
