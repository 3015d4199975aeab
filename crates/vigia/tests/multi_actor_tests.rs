//! Several signed-in users sharing one topic.
//!
//! Each actor gets its own browser context; replies posted by one show up
//! in the other's window a little later, so the checks poll.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::{Arc, Mutex};
use std::time::Duration;
use vigia::prelude::*;

const TOPIC: &str = "/t/welcome/1";

fn quiet_config() -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.base_url = "http://forum.test".into();
    config.wait.timeout_ms = 2000;
    config.wait.probe_ms = 300;
    config
}

fn post(author: &str, body: &str) -> Node {
    Node::new("article")
        .class("post")
        .attr("data-author", author)
        .child(Node::new("div").class("cooked").text(body))
}

/// Topic page backed by `posts`; replies reach other windows after 250ms
fn forum(posts: &Arc<Mutex<Vec<(String, String)>>>) -> FakeBrowser {
    let browser = FakeBrowser::new();
    let read = Arc::clone(posts);
    browser
        .route_with("/t/:slug/:id", move |request| {
            let user = request.cookie("_vigia_user").unwrap_or("anonymous").to_string();
            let posts = read.lock().unwrap().clone();
            let mut page = Node::new("body").child(Node::new("span").class("current-user").text(&user));
            page = page.child(
                Node::new("section")
                    .class("posts")
                    .children(posts.iter().map(|(author, body)| post(author, body))),
            );
            if user != "anonymous" {
                page = page.children([
                    Node::new("textarea").class("reply-body"),
                    Node::new("button").class("reply").text("Reply"),
                ]);
            }
            page
        })
        .unwrap();

    let write = Arc::clone(posts);
    browser
        .on_click("button.reply", move |event| {
            let author = event
                .browser
                .inspect(&event.window, |doc| doc.text_of(".current-user"))
                .ok()
                .and_then(Result::ok)
                .flatten()
                .unwrap_or_default();
            let body = event
                .browser
                .inspect(&event.window, |doc| doc.value_of("textarea.reply-body"))
                .ok()
                .and_then(Result::ok)
                .flatten()
                .unwrap_or_default();
            write.lock().unwrap().push((author.clone(), body.clone()));

            let _ = event.browser.mutate(&event.window, |doc| {
                doc.append(".posts", post(&author, &body))?;
                doc.set_value("textarea.reply-body", "")?;
                Ok(())
            });
            let others = event.browser.clone();
            let origin = event.window.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(250)).await;
                for window in others.windows().unwrap_or_default() {
                    if window != origin {
                        let _ = others.mutate(&window, |doc| {
                            if doc.count(".posts")? > 0 {
                                doc.append(".posts", post(&author, &body))?;
                            }
                            Ok(())
                        });
                    }
                }
            });
        })
        .unwrap();
    browser
}

#[tokio::test(start_paused = true)]
async fn test_reply_reaches_second_user() {
    let posts = Arc::new(Mutex::new(vec![("system".to_string(), "Welcome!".to_string())]));
    let browser = forum(&posts);
    let session = Session::start(Arc::new(browser.clone()), quiet_config())
        .await
        .unwrap();
    let session = &session;

    session.sign_in("alice").await.unwrap();
    let alice = session.current().await.unwrap();
    alice.visit_path(TOPIC).await.unwrap();

    let bob = session
        .using_session("bob", |window| async move {
            session.sign_in("bob").await?;
            window.visit_path(TOPIC).await?;
            window.expect(".current-user").to_have_exact_text("bob").await?;
            Ok(window)
        })
        .await
        .unwrap();
    assert_eq!(session.current().await.unwrap(), alice);
    assert_eq!(browser.contexts().unwrap().len(), 2);

    alice.fill(&Locator::new("textarea.reply-body"), "hi bob").await.unwrap();
    alice.click(&Locator::new("button.reply")).await.unwrap();

    let reply = Locator::new(".post[data-author='alice'] .cooked");
    // not there yet
    assert!(bob.find_all(&reply).await.unwrap().is_empty());
    try_until_success(|| async {
        let text = bob.text(&reply).await?;
        if text == "hi bob" {
            Ok(())
        } else {
            Err(HarnessError::assertion(format!("reply was {text:?}")))
        }
    })
    .await
    .unwrap();
    bob.expect(".post").to_have_count(2).await.unwrap();

    session
        .using_session("bob", |window| async move {
            window.fill(&Locator::new("textarea.reply-body"), "hey alice").await?;
            window.click(&Locator::new("button.reply")).await
        })
        .await
        .unwrap();
    alice
        .expect(Locator::new(".post[data-author='bob']"))
        .to_have_text("hey alice")
        .await
        .unwrap();
    assert_eq!(posts.lock().unwrap().len(), 3);

    session.close().await.unwrap();
    assert!(browser.contexts().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_actors_do_not_share_cookies_or_storage() {
    let posts = Arc::new(Mutex::new(Vec::new()));
    let browser = forum(&posts);
    let session = Session::start(Arc::new(browser.clone()), quiet_config())
        .await
        .unwrap();

    session.sign_in("alice").await.unwrap();
    let alice = session.current().await.unwrap();
    let guest = session.actor("guest").await.unwrap();
    assert_ne!(alice.context(), guest.context());
    assert_eq!(guest.actor(), "guest");
    assert_eq!(session.actors().await, vec![DEFAULT_ACTOR.to_string(), "guest".to_string()]);

    browser.set_local_storage(alice.context(), "draft", "half a reply").unwrap();
    alice.visit_path(TOPIC).await.unwrap();
    guest.visit_path(TOPIC).await.unwrap();

    alice.expect(".current-user").to_have_exact_text("alice").await.unwrap();
    guest.expect(".current-user").to_have_exact_text("anonymous").await.unwrap();
    guest.expect("button.reply").to_stay_absent().await.unwrap();
    assert_eq!(browser.local_storage(guest.context(), "draft").unwrap(), None);

    session.sign_out().await.unwrap();
    assert_eq!(browser.local_storage(alice.context(), "draft").unwrap(), None);
    alice.visit_path(TOPIC).await.unwrap();
    alice.expect(".current-user").to_have_exact_text("anonymous").await.unwrap();
    session.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_extra_windows_share_the_actor_context() {
    let posts = Arc::new(Mutex::new(Vec::new()));
    let browser = forum(&posts);
    let session = Session::start(Arc::new(browser.clone()), quiet_config())
        .await
        .unwrap();
    session.sign_in("alice").await.unwrap();
    let first = session.current().await.unwrap();

    let second = session.open_new_window().await.unwrap();
    assert_eq!(second.context(), first.context());
    assert_eq!(session.current().await.unwrap(), first);
    assert_eq!(browser.active_window().unwrap().as_ref(), Some(first.id()));

    let url = session
        .within_window(&second, |window| async move {
            window.visit_path(TOPIC).await?;
            window.expect(".current-user").to_have_exact_text("alice").await?;
            window.current_url().await
        })
        .await
        .unwrap();
    assert_eq!(url, "http://forum.test/t/welcome/1");
    assert_eq!(session.current().await.unwrap(), first);

    // the previous window comes back even when the body fails
    let err = session
        .within_window(&second, |window| async move {
            window
                .find(&Locator::new(".missing").with_timeout(Duration::from_millis(100)))
                .await
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");
    assert_eq!(session.current().await.unwrap(), first);

    session.switch_to(&second).await.unwrap();
    session.close_window(&second).await.unwrap();
    assert_eq!(session.current().await.unwrap(), first);
    assert!(session.switch_to(&second).await.is_err());
    session.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_reset_releases_clipboard_and_authenticators() {
    let browser = FakeBrowser::new();
    let session = Session::start(Arc::new(browser.clone()), quiet_config())
        .await
        .unwrap();
    let window = session.current().await.unwrap();

    assert!(matches!(
        window.read_clipboard().await,
        Err(HarnessError::PermissionDenied { .. })
    ));
    window.grant_clipboard().await.unwrap();
    window.write_clipboard("copied link").await.unwrap();
    assert_eq!(window.read_clipboard().await.unwrap(), "copied link");

    window
        .add_virtual_authenticator(AuthenticatorOptions::default())
        .await
        .unwrap();
    assert_eq!(browser.authenticator_count(window.id()).unwrap(), 1);

    let old_context = window.context().clone();
    session.reset().await.unwrap();
    assert!(!browser.contexts().unwrap().contains(&old_context));
    let fresh = session.current().await.unwrap();
    assert_eq!(fresh.actor(), DEFAULT_ACTOR);
    assert!(!browser.clipboard_granted(fresh.context()).unwrap());
    assert_eq!(browser.authenticator_count(fresh.id()).unwrap(), 0);

    let calls = browser.calls().unwrap();
    assert!(calls.iter().any(|c| c.starts_with("remove_virtual_authenticator")));
    assert!(calls.iter().any(|c| c.starts_with("revoke_permissions")));
    session.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_teardown_failures_are_collected() {
    let browser = FakeBrowser::new();
    let session = Session::start(Arc::new(browser.clone()), quiet_config())
        .await
        .unwrap();
    session.actor("moderator").await.unwrap();
    browser.fail_next("close_context", "context refused to close").unwrap();

    match session.close().await.unwrap_err() {
        HarnessError::ContextTeardown { failures } => {
            assert_eq!(failures.len(), 1);
            assert!(failures[0].contains("context refused to close"));
        }
        other => panic!("expected teardown error, got {other:?}"),
    }
    // the other context was still closed
    assert_eq!(browser.contexts().unwrap().len(), 1);
}
