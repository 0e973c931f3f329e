use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::SinkExt;
use jobboard_core::{
    ApiError, ApiErrorKind, BoardView, ConnectionState, Job, JobId, JobMap, JobStatus,
};
use jobboard_engine::{
    BoardError, BoardSettings, Config, JobBoard, JobCache, MemoryJobCache, RequestOptions,
    StreamSettings, Transport,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const WAIT: Duration = Duration::from_secs(5);

/// Serves a settable `/api/status` body and counts requests.
struct FakeTransport {
    status: Mutex<Result<Value, ApiError>>,
    status_calls: AtomicUsize,
}

impl FakeTransport {
    fn new(status: Result<Value, ApiError>) -> Arc<Self> {
        Arc::new(Self {
            status: Mutex::new(status),
            status_calls: AtomicUsize::new(0),
        })
    }

    fn set_status(&self, status: Result<Value, ApiError>) {
        *self.status.lock().unwrap() = status;
    }

    fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn get_json(&self, path: &str, _options: RequestOptions) -> Result<Value, ApiError> {
        if path != "/api/status" {
            return Err(ApiError::new(ApiErrorKind::NotFound, path));
        }
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.status.lock().unwrap().clone()
    }

    async fn post_json(
        &self,
        _path: &str,
        _body: &Value,
        _options: RequestOptions,
    ) -> Result<Value, ApiError> {
        Ok(Value::Null)
    }
}

/// Cache whose load takes long enough for the first poll to finish earlier.
struct SlowCache {
    inner: MemoryJobCache,
    delay: Duration,
}

impl JobCache for SlowCache {
    fn load(&self) -> JobMap {
        std::thread::sleep(self.delay);
        self.inner.load()
    }

    fn save(&self, jobs: &JobMap) {
        self.inner.save(jobs);
    }
}

fn fast_settings() -> BoardSettings {
    board_logging::initialize_for_tests();
    BoardSettings {
        stream: StreamSettings {
            reconnect_delay: Duration::from_millis(50),
            heartbeat_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(2),
        },
        fallback_poll_interval: Duration::from_millis(100),
        backstop_poll_interval: Duration::from_secs(30),
        housekeeping_interval: Duration::from_millis(50),
        ..BoardSettings::default()
    }
}

async fn ws_server() -> (
    String,
    mpsc::UnboundedReceiver<WebSocketStream<tokio::net::TcpStream>>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            if let Ok(socket) = tokio_tungstenite::accept_async(tcp).await {
                if tx.send(socket).is_err() {
                    break;
                }
            }
        }
    });
    (base_url, rx)
}

async fn wait_for_view(board: &JobBoard, check: impl FnMut(&BoardView) -> bool) -> BoardView {
    let mut views = board.subscribe();
    let view = tokio::time::timeout(WAIT, views.wait_for(check))
        .await
        .expect("view in time")
        .expect("board alive")
        .clone();
    view
}

async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !check() {
        assert!(Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn job(id: &str, status: JobStatus) -> Job {
    let mut job = Job::new(JobId::new(id));
    job.repo = "acme/app".into();
    job.issue_number = 7;
    job.status = status;
    job
}

fn job_map(jobs: impl IntoIterator<Item = Job>) -> JobMap {
    jobs.into_iter().map(|job| (job.id.clone(), job)).collect()
}

fn status_of(view: &BoardView, id: &str) -> Option<JobStatus> {
    view.jobs
        .iter()
        .find(|job| job.id.as_str() == id)
        .map(|job| job.status)
}

#[tokio::test]
async fn cached_jobs_show_while_server_is_unreachable() {
    let transport = FakeTransport::new(Err(ApiError::new(ApiErrorKind::Network, "refused")));
    let cache = Arc::new(MemoryJobCache::seeded(job_map([job("j1", JobStatus::Running)])));
    let board = JobBoard::new(Config::unconfigured(), transport, cache, fast_settings());
    board.start().unwrap();

    let view = wait_for_view(&board, |view| view.job_count() == 1 && view.last_error.is_some())
        .await;
    assert_eq!(status_of(&view, "j1"), Some(JobStatus::Running));
    assert!(view.is_reconnecting());
}

#[tokio::test]
async fn slow_cache_load_keeps_cached_jobs_next_to_polled_ones() {
    let transport = FakeTransport::new(Ok(json!([{"id": "fresh", "status": "running"}])));
    let cache = Arc::new(SlowCache {
        inner: MemoryJobCache::seeded(job_map([job("cached", JobStatus::Completed)])),
        delay: Duration::from_millis(300),
    });
    let board = JobBoard::new(
        Config::unconfigured(),
        transport.clone(),
        cache.clone(),
        fast_settings(),
    );
    board.start().unwrap();

    eventually(|| transport.status_calls() >= 1).await;
    let view = wait_for_view(&board, |view| view.job_count() == 2).await;
    assert_eq!(status_of(&view, "cached"), Some(JobStatus::Completed));
    assert_eq!(status_of(&view, "fresh"), Some(JobStatus::Running));

    eventually(|| {
        let saved = cache.inner.load();
        saved.contains_key(&JobId::new("cached")) && saved.contains_key(&JobId::new("fresh"))
    })
    .await;
}

#[tokio::test]
async fn stream_events_update_the_board_and_the_cache() {
    let (base_url, mut clients) = ws_server().await;
    let transport = FakeTransport::new(Ok(json!([])));
    let cache = Arc::new(MemoryJobCache::new());
    let config = Config::with_base_url(&base_url).unwrap();
    let board = JobBoard::new(config, transport, cache.clone(), fast_settings());
    board.start().unwrap();

    let mut client = tokio::time::timeout(WAIT, clients.recv()).await.unwrap().unwrap();
    wait_for_view(&board, |view| view.connection == ConnectionState::Connected).await;

    client
        .send(Message::text(
            r#"{"type":"job_created","job":{"id":"j1","repo":"acme/app","issue_number":7}}"#,
        ))
        .await
        .unwrap();
    wait_for_view(&board, |view| status_of(view, "j1") == Some(JobStatus::Pending)).await;

    client
        .send(Message::text(r#"{"type":"job_completed","job_id":"j1"}"#))
        .await
        .unwrap();
    let view =
        wait_for_view(&board, |view| status_of(view, "j1") == Some(JobStatus::Completed)).await;
    assert!(view.jobs[0].completed_time.is_some());

    eventually(|| {
        cache
            .load()
            .get(&JobId::new("j1"))
            .is_some_and(|job| job.status == JobStatus::Completed)
    })
    .await;
}

#[tokio::test]
async fn connected_stream_slows_polling_to_backstop() {
    let (base_url, mut clients) = ws_server().await;
    let transport = FakeTransport::new(Ok(json!([])));
    let config = Config::with_base_url(&base_url).unwrap();
    let board = JobBoard::new(
        config,
        transport.clone(),
        Arc::new(MemoryJobCache::new()),
        fast_settings(),
    );
    board.start().unwrap();

    let _client = tokio::time::timeout(WAIT, clients.recv()).await.unwrap().unwrap();
    wait_for_view(&board, |view| view.connection == ConnectionState::Connected).await;

    // Let the immediate backstop fetch go out, then expect silence.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let settled = transport.status_calls();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(transport.status_calls(), settled);
}

#[tokio::test]
async fn polling_fills_the_board_without_a_stream() {
    let transport = FakeTransport::new(Ok(json!({
        "j1": {"repo": "acme/app", "issue_number": 7, "status": "waiting_approval"}
    })));
    let board = JobBoard::new(
        Config::unconfigured(),
        transport.clone(),
        Arc::new(MemoryJobCache::new()),
        fast_settings(),
    );
    board.start().unwrap();

    let view = wait_for_view(&board, |view| view.job_count() == 1).await;
    assert_eq!(status_of(&view, "j1"), Some(JobStatus::WaitingApproval));

    eventually(|| transport.status_calls() >= 3).await;
}

#[tokio::test]
async fn refresh_reconciles_immediately() {
    let transport = FakeTransport::new(Ok(json!([])));
    let mut settings = fast_settings();
    settings.fallback_poll_interval = Duration::from_secs(60);
    let board = JobBoard::new(
        Config::unconfigured(),
        transport.clone(),
        Arc::new(MemoryJobCache::new()),
        settings,
    );
    board.start().unwrap();
    eventually(|| transport.status_calls() == 1).await;

    transport.set_status(Ok(json!([{"id": "j9", "status": "running"}])));
    board.refresh().await.unwrap();
    let view = wait_for_view(&board, |view| view.job_count() == 1).await;
    assert_eq!(status_of(&view, "j9"), Some(JobStatus::Running));

    transport.set_status(Err(ApiError::new(ApiErrorKind::ServerError, "down")));
    let err = board.refresh().await.unwrap_err();
    assert!(matches!(err, BoardError::Api(ref e) if e.kind == ApiErrorKind::ServerError));
    let view = wait_for_view(&board, |view| view.last_error.is_some()).await;
    assert_eq!(view.job_count(), 1);
}

#[tokio::test]
async fn hidden_jobs_leave_board_and_cache() {
    let transport = FakeTransport::new(Err(ApiError::new(ApiErrorKind::Network, "refused")));
    let cache = Arc::new(MemoryJobCache::seeded(job_map([
        job("j1", JobStatus::Completed),
        job("j2", JobStatus::Failed),
    ])));
    let board = JobBoard::new(Config::unconfigured(), transport, cache.clone(), fast_settings());
    board.start().unwrap();
    wait_for_view(&board, |view| view.job_count() == 2).await;

    board.hide_job(JobId::new("j1")).unwrap();
    let view = wait_for_view(&board, |view| view.job_count() == 1).await;
    assert_eq!(status_of(&view, "j2"), Some(JobStatus::Failed));
    eventually(|| cache.load().len() == 1).await;
}

#[tokio::test]
async fn invalid_server_url_is_rejected() {
    let board = JobBoard::new(
        Config::unconfigured(),
        FakeTransport::new(Ok(json!([]))),
        Arc::new(MemoryJobCache::new()),
        fast_settings(),
    );

    let err = board.update_base_url("ftp://example.com").unwrap_err();
    assert!(matches!(err, BoardError::Config(_)));
    assert_eq!(board.config().base_url(), None);

    let url = board.update_base_url("http://jobs.local:8000/").unwrap();
    assert_eq!(url, "http://jobs.local:8000");
    assert_eq!(board.config().base_url().as_deref(), Some("http://jobs.local:8000"));
}

#[tokio::test]
async fn server_change_moves_the_stream() {
    let (first_url, mut first_clients) = ws_server().await;
    let (second_url, mut second_clients) = ws_server().await;
    let board = JobBoard::new(
        Config::with_base_url(&first_url).unwrap(),
        FakeTransport::new(Ok(json!([]))),
        Arc::new(MemoryJobCache::new()),
        fast_settings(),
    );
    board.start().unwrap();
    let _first = tokio::time::timeout(WAIT, first_clients.recv()).await.unwrap().unwrap();

    board.update_base_url(&second_url).unwrap();
    let _second = tokio::time::timeout(WAIT, second_clients.recv()).await.unwrap().unwrap();
    wait_for_view(&board, |view| view.connection == ConnectionState::Connected).await;
}

#[tokio::test]
async fn dispose_stops_everything() {
    let transport = FakeTransport::new(Ok(json!([])));
    let board = JobBoard::new(
        Config::unconfigured(),
        transport.clone(),
        Arc::new(MemoryJobCache::new()),
        fast_settings(),
    );
    board.start().unwrap();
    eventually(|| transport.status_calls() >= 1).await;

    board.dispose();
    assert!(board.is_disposed());
    assert_eq!(board.connection_state(), ConnectionState::Disconnected);
    assert!(matches!(board.start(), Err(BoardError::Disposed)));
    assert!(matches!(
        board.hide_job(JobId::new("j1")),
        Err(BoardError::Disposed)
    ));

    // Let any fetch already in flight finish before sampling.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let calls = transport.status_calls();
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(transport.status_calls(), calls);
}
