use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message};

use haven_feed::{FeedOptions, FeedService, FeedUpdate, SubscriptionSettings};

const WAIT: Duration = Duration::from_secs(5);

/// What one accepted connection does after reading the subscription request.
#[derive(Clone)]
struct Session {
    delay: Duration,
    messages: Vec<String>,
    close: bool,
}

impl Session {
    fn send(messages: Vec<String>) -> Self {
        Self {
            delay: Duration::ZERO,
            messages,
            close: false,
        }
    }
}

/// In-process relay. The n-th connection plays `sessions[n]` (the last one
/// repeats). Every subscription request received is forwarded on the channel.
async fn relay(path: &str, sessions: Vec<Session>) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (requests_tx, requests_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut index = 0;
        while let Ok((stream, _)) = listener.accept().await {
            let session = sessions[index.min(sessions.len() - 1)].clone();
            index += 1;
            let requests = requests_tx.clone();
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(stream).await else { return };
                if let Some(Ok(Message::Text(request))) = ws.next().await {
                    let _ = requests.send(request);
                }
                tokio::time::sleep(session.delay).await;
                for message in session.messages {
                    if ws.send(Message::Text(message)).await.is_err() {
                        return;
                    }
                }
                if session.close {
                    let _ = ws.close(None).await;
                    return;
                }
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });

    (format!("ws://{addr}/{path}"), requests_rx)
}

fn note(id: &str, created_at: i64, content: &str) -> String {
    serde_json::json!([
        "EVENT",
        "any",
        {
            "id": id,
            "pubkey": "pk",
            "created_at": created_at,
            "kind": 1,
            "tags": [],
            "content": content,
            "sig": "sig"
        }
    ])
    .to_string()
}

fn fast_options() -> FeedOptions {
    FeedOptions {
        subscription: SubscriptionSettings {
            backoff_initial: Duration::from_millis(50),
            backoff_max: Duration::from_millis(200),
            ..SubscriptionSettings::default()
        },
        ..FeedOptions::default()
    }
}

async fn next_update(updates: &mut mpsc::UnboundedReceiver<FeedUpdate>) -> FeedUpdate {
    timeout(WAIT, updates.recv())
        .await
        .expect("update in time")
        .expect("service alive")
}

#[tokio::test]
async fn same_record_from_two_relays_is_published_once() {
    let (first, _r1) = relay("inbox", vec![Session::send(vec![note("abc", 10, "hello")])]).await;
    let (second, _r2) = relay("outbox", vec![Session::send(vec![note("abc", 10, "hello")])]).await;

    let (mut service, mut updates) = FeedService::spawn(fast_options());
    assert_eq!(service.fetch([&first, &second]).expect("fetch"), 2);

    let update = next_update(&mut updates).await;
    assert_eq!(update.new_records, 1);
    assert_eq!(update.snapshot.records.len(), 1);
    assert_eq!(update.snapshot.records[0].id, "abc");

    assert!(
        timeout(Duration::from_millis(800), updates.recv()).await.is_err(),
        "duplicate must not produce another update"
    );
    service.shutdown();
}

#[tokio::test]
async fn sends_one_subscription_request_per_connection() {
    let (endpoint, mut requests) = relay("inbox", vec![Session::send(Vec::new())]).await;

    let (mut service, _updates) = FeedService::spawn(fast_options());
    service.fetch([&endpoint]).expect("fetch");
    assert_eq!(service.fetch([&endpoint]).expect("refetch"), 0);

    let raw = timeout(WAIT, requests.recv()).await.expect("request").expect("open");
    let request: Value = serde_json::from_str(&raw).expect("json");
    assert_eq!(request[0], "REQ");
    assert!(request[1].as_str().expect("id").starts_with("viewer-inbox-"));
    assert_eq!(request[2]["kinds"], serde_json::json!([1, 1063]));
    assert_eq!(request[2]["limit"], 500);

    let status = service.connection_status();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].endpoint, endpoint);
    assert_eq!(status[0].subscription_id, request[1].as_str().expect("id"));
    assert!(status[0].connected);

    assert!(
        timeout(Duration::from_millis(300), requests.recv()).await.is_err(),
        "second fetch must not open another connection"
    );
}

#[tokio::test]
async fn dropped_connection_reconnects_and_resubscribes() {
    let sessions = vec![
        Session {
            close: true,
            ..Session::send(Vec::new())
        },
        Session::send(vec![note("after", 5, "back again")]),
    ];
    let (endpoint, mut requests) = relay("inbox", sessions).await;

    let (mut service, mut updates) = FeedService::spawn(fast_options());
    service.fetch([&endpoint]).expect("fetch");

    let update = next_update(&mut updates).await;
    assert_eq!(update.snapshot.records[0].id, "after");

    let first = requests.recv().await.expect("first request");
    let second = requests.recv().await.expect("second request");
    assert_eq!(first, second, "the same subscription is re-issued");
}

#[tokio::test]
async fn unreachable_relay_does_not_block_others() {
    let (endpoint, _requests) = relay("inbox", vec![Session::send(vec![note("n1", 1, "x")])]).await;

    let (mut service, mut updates) = FeedService::spawn(fast_options());
    service
        .fetch(["ws://127.0.0.1:9/dead", endpoint.as_str()])
        .expect("fetch");

    let update = next_update(&mut updates).await;
    assert_eq!(update.new_records, 1);
    let dead = service
        .connection_status()
        .into_iter()
        .find(|s| s.endpoint.ends_with("/dead"))
        .expect("dead endpoint tracked");
    assert!(!dead.connected);
}

#[tokio::test]
async fn reset_discards_later_messages() {
    let session = Session {
        delay: Duration::from_millis(300),
        ..Session::send(vec![note("late", 1, "too late")])
    };
    let (endpoint, mut requests) = relay("inbox", vec![session]).await;

    let (mut service, mut updates) = FeedService::spawn(fast_options());
    service.fetch([&endpoint]).expect("fetch");
    timeout(WAIT, requests.recv()).await.expect("request").expect("open");

    service.reset();
    assert!(service.connection_status().is_empty());
    assert!(
        timeout(Duration::from_secs(1), updates.recv()).await.is_err(),
        "nothing may be published after reset"
    );
}

#[tokio::test]
async fn media_is_extracted_from_live_notes() {
    let messages = vec![
        note("m1", 100, "pic https://img.example.com/a.png"),
        note("m2", 200, "clip https://vid.example.com/b.mp4 and https://img.example.com/a.png"),
    ];
    let (endpoint, _requests) = relay("inbox", vec![Session::send(messages)]).await;

    let (mut service, mut updates) = FeedService::spawn(fast_options());
    service.fetch([&endpoint]).expect("fetch");

    let mut latest = next_update(&mut updates).await;
    while latest.snapshot.records.len() < 2 {
        latest = next_update(&mut updates).await;
    }
    let ids: Vec<&str> = latest.snapshot.records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["m2", "m1"]);

    let urls: Vec<&str> = latest.snapshot.media.iter().map(|m| m.url.as_str()).collect();
    assert_eq!(urls.len(), 2, "media deduplicated by url: {urls:?}");
    assert!(urls.contains(&"https://vid.example.com/b.mp4"));
}
