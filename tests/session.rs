use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Notify};

use gqlchat::api::models::PageArgs;
use gqlchat::api::subscription::Subscription;
use gqlchat::storage::MessageCache;
use gqlchat::{
    ChatBackend, ChatSession, Composer, Error, Feed, LiveEvent, Message, MessageEdge,
    MessagePage, MessageSender, MessageStatus, MessageUpdate, PageInfo, Reconnect, Result,
};

/// Lets a test hold a backend call open until it says so.
#[derive(Default)]
struct Gate {
    closed: AtomicBool,
    open: Notify,
}

impl Gate {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn release(&self) {
        self.closed.store(false, Ordering::SeqCst);
        self.open.notify_one();
    }

    async fn pass(&self) {
        if self.closed.load(Ordering::SeqCst) {
            self.open.notified().await;
        }
    }
}

struct LiveFeed {
    feed: Feed,
    events: mpsc::UnboundedSender<LiveEvent>,
    cancelled: Option<oneshot::Receiver<()>>,
}

#[derive(Default)]
struct FakeBackend {
    pages: Mutex<VecDeque<Result<MessagePage>>>,
    fetches: Mutex<Vec<PageArgs>>,
    fetch_gate: Gate,
    replies: Mutex<VecDeque<Result<Option<Message>>>>,
    sent: Mutex<Vec<String>>,
    send_gate: Gate,
    feeds: Mutex<Vec<LiveFeed>>,
    subscribes: AtomicUsize,
    refuse_subscribe: AtomicBool,
}

impl FakeBackend {
    fn push_page(&self, page: Result<MessagePage>) {
        self.pages.lock().unwrap().push_back(page);
    }

    fn push_reply(&self, reply: Result<Option<Message>>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    fn fetch_count(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    fn emit(&self, feed: Feed, event: LiveEvent) {
        let feeds = self.feeds.lock().unwrap();
        let live = feeds.iter().rev().find(|f| f.feed == feed).expect("feed not subscribed");
        live.events.send(event).unwrap();
    }

    fn subscribe_count(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    /// End every live feed as if the socket had dropped.
    fn close_feeds(&self) {
        self.feeds.lock().unwrap().clear();
    }

    fn take_cancellations(&self) -> Vec<oneshot::Receiver<()>> {
        self.feeds
            .lock()
            .unwrap()
            .iter_mut()
            .filter_map(|f| f.cancelled.take())
            .collect()
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn fetch_messages(&self, args: PageArgs) -> Result<MessagePage> {
        self.fetches.lock().unwrap().push(args);
        self.fetch_gate.pass().await;
        self.pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(MessagePage::default()))
    }

    async fn send_message(&self, text: &str) -> Result<Option<Message>> {
        self.sent.lock().unwrap().push(text.to_string());
        self.send_gate.pass().await;
        self.replies.lock().unwrap().pop_front().unwrap_or(Ok(None))
    }

    async fn subscribe(&self, feed: Feed) -> Result<Subscription> {
        if self.refuse_subscribe.load(Ordering::SeqCst) {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            return Err(Error::Protocol("connection refused".into()));
        }
        let (events, rx) = mpsc::unbounded_channel();
        let (cancel, cancelled) = oneshot::channel();
        self.feeds.lock().unwrap().push(LiveFeed {
            feed,
            events,
            cancelled: Some(cancelled),
        });
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        Ok(Subscription::new(feed, rx, cancel))
    }
}

fn message(id: &str, text: &str, status: MessageStatus) -> Message {
    Message {
        id: id.into(),
        text: text.into(),
        status,
        updated_at: "2024-03-01T12:00:00.000Z".into(),
        sender: MessageSender::Customer,
    }
}

fn page(messages: Vec<Message>, has_previous_page: bool) -> MessagePage {
    let start_cursor = messages.first().map(|m| m.id.clone());
    let end_cursor = messages.last().map(|m| m.id.clone());
    MessagePage {
        edges: messages.into_iter().map(MessageEdge::for_message).collect(),
        page_info: PageInfo {
            has_next_page: false,
            has_previous_page,
            start_cursor,
            end_cursor,
        },
    }
}

fn server_error() -> Error {
    Error::Status {
        status: 502,
        body: "bad gateway".into(),
    }
}

fn edges(session: &ChatSession<FakeBackend>) -> Vec<Message> {
    session
        .snapshot()
        .page
        .map(|p| p.edges.into_iter().map(|e| e.node).collect())
        .unwrap_or_default()
}

fn quick_reconnect() -> Reconnect {
    Reconnect {
        attempts: 3,
        first_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
    }
}

async fn loaded_session(
    initial: MessagePage,
) -> (Arc<FakeBackend>, Arc<ChatSession<FakeBackend>>) {
    let backend = Arc::new(FakeBackend::default());
    backend.push_page(Ok(initial));
    let session = ChatSession::new(backend.clone(), 20).with_reconnect(quick_reconnect());
    let session = Arc::new(session);
    session.load_initial().await.unwrap();
    (backend, session)
}

async fn wait_until(session: &ChatSession<FakeBackend>, pred: impl Fn(&[Message]) -> bool) {
    let mut rx = session.watch();
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let current: Vec<Message> = rx
                .borrow_and_update()
                .page
                .as_ref()
                .map(|p| p.messages().cloned().collect())
                .unwrap_or_default();
            if pred(&current) {
                return;
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("store never reached the expected state");
}

#[tokio::test]
async fn initial_load_requests_one_page_of_twenty() {
    let (backend, session) = loaded_session(page(vec![], false)).await;
    assert!(session.is_loaded());
    let fetches = backend.fetches.lock().unwrap().clone();
    assert_eq!(fetches, vec![PageArgs::latest(20)]);
}

#[tokio::test]
async fn submitted_message_is_shown_then_replaced_by_confirmation() {
    let (backend, session) = loaded_session(page(vec![], false)).await;

    let mut composer = Composer::new();
    composer.set_text("hi");
    let draft = composer.submit(session.is_loaded()).unwrap();
    assert_eq!(composer.text(), "");

    backend.send_gate.close();
    backend.push_reply(Ok(Some(message("42", "hi", MessageStatus::Sent))));
    let sending = {
        let session = session.clone();
        tokio::spawn(async move { session.send(draft).await })
    };

    wait_until(&session, |m| m.len() == 1).await;
    let shown = edges(&session);
    assert!(shown[0].id.starts_with("temp-"));
    assert_eq!(shown[0].text, "hi");
    assert_eq!(shown[0].status, MessageStatus::Sending);

    backend.send_gate.release();
    sending.await.unwrap().unwrap();

    let shown = edges(&session);
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].id, "42");
    assert_eq!(shown[0].status, MessageStatus::Sent);
    assert_eq!(backend.sent(), ["hi"]);
    let end = session.snapshot().page.unwrap().page_info.end_cursor;
    assert_eq!(end.as_deref(), Some("42"));
}

#[tokio::test]
async fn push_before_mutation_response_leaves_one_edge() {
    let (backend, session) = loaded_session(page(vec![], false)).await;
    let _live = session.mount().await.unwrap();

    let mut composer = Composer::new();
    composer.set_text("hello");
    let draft = composer.submit(true).unwrap();

    backend.send_gate.close();
    backend.push_reply(Ok(Some(message("7", "hello", MessageStatus::Sent))));
    let sending = {
        let session = session.clone();
        tokio::spawn(async move { session.send(draft).await })
    };
    wait_until(&session, |m| m.len() == 1 && m[0].id.starts_with("temp-")).await;

    backend.emit(
        Feed::MessageAdded,
        LiveEvent::MessageAdded(Some(message("7", "hello", MessageStatus::Sent))),
    );
    wait_until(&session, |m| m.len() == 1 && m[0].id == "7").await;

    backend.send_gate.release();
    sending.await.unwrap().unwrap();
    let shown = edges(&session);
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].id, "7");
}

#[tokio::test]
async fn status_push_updates_only_status_and_timestamp() {
    let (backend, session) =
        loaded_session(page(vec![message("5", "see you", MessageStatus::Sent)], false)).await;
    let _live = session.mount().await.unwrap();

    backend.emit(
        Feed::MessageUpdated,
        LiveEvent::MessageUpdated(Some(MessageUpdate {
            id: "5".into(),
            status: MessageStatus::Read,
            updated_at: "2024-03-01T12:05:00.000Z".into(),
        })),
    );
    wait_until(&session, |m| m[0].status == MessageStatus::Read).await;

    let shown = edges(&session);
    assert_eq!(shown[0].text, "see you");
    assert_eq!(shown[0].sender, MessageSender::Customer);
    assert_eq!(shown[0].updated_at, "2024-03-01T12:05:00.000Z");
}

#[tokio::test]
async fn status_push_for_unknown_message_is_dropped() {
    let (_backend, session) =
        loaded_session(page(vec![message("5", "a", MessageStatus::Sent)], false)).await;
    let before = session.snapshot();
    session.apply_event(&LiveEvent::MessageUpdated(Some(MessageUpdate {
        id: "99".into(),
        status: MessageStatus::Read,
        updated_at: "later".into(),
    })));
    session.apply_event(&LiveEvent::MessageAdded(None));
    assert_eq!(session.snapshot(), before);
}

#[tokio::test]
async fn unmount_releases_both_subscriptions() {
    let (backend, session) = loaded_session(page(vec![], false)).await;
    let live = session.mount().await.unwrap();
    let cancellations = backend.take_cancellations();
    assert_eq!(cancellations.len(), 2);

    live.unmount();
    for cancelled in cancellations {
        tokio::time::timeout(Duration::from_secs(2), cancelled)
            .await
            .expect("subscription was not released")
            .ok();
    }
}

async fn wait_for_subscribes(backend: &FakeBackend, count: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while backend.subscribe_count() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("feeds were not re-subscribed");
}

#[tokio::test]
async fn dropped_feeds_are_resubscribed() {
    let (backend, session) = loaded_session(page(vec![], false)).await;
    let _live = session.mount().await.unwrap();
    assert_eq!(backend.subscribe_count(), 2);

    backend.close_feeds();
    wait_for_subscribes(&backend, 4).await;

    backend.emit(
        Feed::MessageAdded,
        LiveEvent::MessageAdded(Some(message("1", "back again", MessageStatus::Sent))),
    );
    wait_until(&session, |m| m.len() == 1 && m[0].id == "1").await;
}

#[tokio::test]
async fn feeds_are_reported_lost_after_reconnects_run_out() {
    let (backend, session) = loaded_session(page(vec![], false)).await;
    let mut live = session.mount().await.unwrap();
    let mut lost = live.lost_feeds().unwrap();
    assert!(live.lost_feeds().is_none());

    backend.refuse_subscribe.store(true, Ordering::SeqCst);
    backend.close_feeds();

    let mut gone = Vec::new();
    for _ in 0..2 {
        let feed = tokio::time::timeout(Duration::from_secs(2), lost.recv())
            .await
            .expect("lost feed was not reported")
            .unwrap();
        gone.push(feed);
    }
    gone.sort_by_key(|f| f.operation_name());
    assert_eq!(gone, [Feed::MessageAdded, Feed::MessageUpdated]);
    // Two initial subscribes, then three attempts per feed.
    assert_eq!(backend.subscribe_count(), 8);
}

#[tokio::test]
async fn push_during_initial_load_is_kept() {
    let backend = Arc::new(FakeBackend::default());
    backend.push_page(Ok(page(vec![message("1", "old", MessageStatus::Read)], false)));
    let session = Arc::new(ChatSession::new(backend.clone(), 20));
    let _live = session.mount().await.unwrap();

    backend.fetch_gate.close();
    let loading = {
        let session = session.clone();
        tokio::spawn(async move { session.load_initial().await })
    };
    while backend.fetch_count() < 1 {
        tokio::task::yield_now().await;
    }

    let mut rx = session.watch();
    backend.emit(
        Feed::MessageAdded,
        LiveEvent::MessageAdded(Some(message("2", "new", MessageStatus::Sent))),
    );
    tokio::time::timeout(Duration::from_secs(2), rx.changed())
        .await
        .expect("push was not consumed")
        .unwrap();
    assert!(!session.is_loaded());

    backend.fetch_gate.release();
    loading.await.unwrap().unwrap();
    let ids: Vec<_> = edges(&session).into_iter().map(|m| m.id).collect();
    assert_eq!(ids, ["1", "2"]);
}

#[tokio::test]
async fn load_earlier_is_single_flight() {
    let (backend, session) =
        loaded_session(page(vec![message("10", "j", MessageStatus::Read)], true)).await;
    backend.push_page(Ok(page(vec![message("9", "i", MessageStatus::Read)], false)));
    backend.fetch_gate.close();

    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.load_earlier().await })
    };
    while backend.fetch_count() < 2 {
        tokio::task::yield_now().await;
    }
    assert!(session.snapshot().loading_earlier);
    assert!(!session.load_earlier().await);
    assert_eq!(backend.fetch_count(), 2);

    backend.fetch_gate.release();
    assert!(first.await.unwrap());

    let fetches = backend.fetches.lock().unwrap().clone();
    assert_eq!(fetches[1], PageArgs::before("10", 20));
    let ids: Vec<_> = edges(&session).into_iter().map(|m| m.id).collect();
    assert_eq!(ids, ["9", "10"]);
    assert!(!session.snapshot().loading_earlier);
    // Nothing older remains.
    assert!(!session.load_earlier().await);
}

#[tokio::test]
async fn failed_load_earlier_is_absorbed_and_can_be_retried() {
    let (backend, session) =
        loaded_session(page(vec![message("10", "j", MessageStatus::Read)], true)).await;
    backend.push_page(Err(server_error()));

    assert!(session.load_earlier().await);
    assert!(!session.snapshot().loading_earlier);
    assert_eq!(edges(&session).len(), 1);

    backend.push_page(Ok(page(vec![message("9", "i", MessageStatus::Read)], false)));
    assert!(session.load_earlier().await);
    assert_eq!(edges(&session).len(), 2);
}

#[tokio::test]
async fn cancelled_load_earlier_clears_the_flag() {
    let (backend, session) =
        loaded_session(page(vec![message("10", "j", MessageStatus::Read)], true)).await;
    backend.fetch_gate.close();

    let loading = {
        let session = session.clone();
        tokio::spawn(async move { session.load_earlier().await })
    };
    while backend.fetch_count() < 2 {
        tokio::task::yield_now().await;
    }
    loading.abort();
    let _ = loading.await;
    assert!(!session.snapshot().loading_earlier);
}

#[tokio::test]
async fn failed_send_can_be_retried() {
    let (backend, session) = loaded_session(page(vec![], false)).await;
    let mut composer = Composer::new();
    composer.set_text("again");
    let draft = composer.submit(true).unwrap();
    let temp_id = draft.temp_id().to_string();

    backend.push_reply(Err(server_error()));
    assert!(session.send(draft).await.is_err());
    let shown = edges(&session);
    assert_eq!(shown[0].id, temp_id);
    assert_eq!(shown[0].status, MessageStatus::Failed);

    backend.push_reply(Ok(Some(message("8", "again", MessageStatus::Sent))));
    session.retry(&temp_id).await.unwrap();
    let shown = edges(&session);
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].id, "8");
    assert_eq!(backend.sent(), ["again", "again"]);
}

#[tokio::test]
async fn only_failed_placeholders_can_be_discarded() {
    let (backend, session) =
        loaded_session(page(vec![message("1", "kept", MessageStatus::Sent)], false)).await;
    let mut composer = Composer::new();
    composer.set_text("oops");
    let draft = composer.submit(true).unwrap();
    let temp_id = draft.temp_id().to_string();
    backend.push_reply(Err(server_error()));
    let _ = session.send(draft).await;

    assert!(matches!(session.discard("1"), Err(Error::NotRetryable(_))));
    assert!(matches!(session.retry("1").await, Err(Error::NotRetryable(_))));
    session.discard(&temp_id).unwrap();
    let ids: Vec<_> = edges(&session).into_iter().map(|m| m.id).collect();
    assert_eq!(ids, ["1"]);
}

#[tokio::test]
async fn cached_page_is_shown_until_the_network_page_arrives() {
    let mut cache = MessageCache::in_memory().unwrap();
    cache.save_page(&page(vec![message("3", "cached", MessageStatus::Read)], true)).unwrap();

    let backend = Arc::new(FakeBackend::default());
    let session = ChatSession::new(backend.clone(), 20).with_cache(cache);
    assert!(session.restore_cached().unwrap());
    assert_eq!(edges(&session)[0].text, "cached");
    // A second restore does not clobber what is shown.
    assert!(!session.restore_cached().unwrap());

    backend.push_page(Ok(page(vec![message("4", "fresh", MessageStatus::Sent)], false)));
    session.load_initial().await.unwrap();
    let ids: Vec<_> = edges(&session).into_iter().map(|m| m.id).collect();
    assert_eq!(ids, ["4"]);
}
