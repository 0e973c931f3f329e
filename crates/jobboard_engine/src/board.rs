use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use board_logging::{board_debug, board_error, board_info};
use chrono::Utc;
use jobboard_core::{
    update, ApiError, BoardView, ConnectionState, Effect, JobEvent, JobId, JobMap, JobStore,
    JobStreamFrame, Msg, PollMode,
};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::api::JobBoardClient;
use crate::cache::JobCache;
use crate::config::{Config, ConfigError};
use crate::poller::{PollOutcome, PollScheduler};
use crate::sink::EventSink;
use crate::stream::{JobEventDecoder, JobStreamDecoder, StreamConnection, StreamSettings};
use crate::transport::{ReqwestTransport, Transport, TransportSettings};

#[derive(Debug, Clone)]
pub struct BoardSettings {
    pub transport: TransportSettings,
    pub stream: StreamSettings,
    /// Poll cadence while the event stream is down.
    pub fallback_poll_interval: Duration,
    /// Poll cadence while the event stream is up.
    pub backstop_poll_interval: Duration,
    /// How often stale errors are expired.
    pub housekeeping_interval: Duration,
}

impl Default for BoardSettings {
    fn default() -> Self {
        Self {
            transport: TransportSettings::default(),
            stream: StreamSettings::default(),
            fallback_poll_interval: Duration::from_secs(15),
            backstop_poll_interval: Duration::from_secs(60),
            housekeeping_interval: Duration::from_secs(1),
        }
    }
}

impl BoardSettings {
    pub fn poll_interval(&self, mode: PollMode) -> Duration {
        match mode {
            PollMode::Fallback => self.fallback_poll_interval,
            PollMode::Backstop => self.backstop_poll_interval,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    #[error("job board has been disposed")]
    Disposed,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Entry point of background producers into the actor.
struct Inbox {
    tx: mpsc::UnboundedSender<Msg>,
}

impl EventSink<JobEvent> for Inbox {
    fn emit(&self, event: JobEvent) {
        let _ = self.tx.send(Msg::EventReceived {
            event,
            at: Utc::now(),
        });
    }
}

impl EventSink<PollOutcome> for Inbox {
    fn emit(&self, outcome: PollOutcome) {
        let msg = match outcome {
            PollOutcome::Snapshot { jobs, requested_at } => {
                Msg::SnapshotFetched { jobs, requested_at }
            }
            PollOutcome::Failed { error, at } => Msg::SnapshotFailed { error, at },
        };
        let _ = self.tx.send(msg);
    }
}

/// Live job board: event stream, polling fallback and durable cache feeding
/// one [`JobStore`].
///
/// The store lives inside a single actor task; everything else talks to it
/// through messages. Subscribers receive a fresh [`BoardView`] after every
/// change.
pub struct JobBoard {
    config: Config,
    settings: BoardSettings,
    client: JobBoardClient,
    cache: Arc<dyn JobCache>,
    inbox: mpsc::UnboundedSender<Msg>,
    pending: Mutex<Option<mpsc::UnboundedReceiver<Msg>>>,
    stream: StreamConnection<JobEventDecoder>,
    poller: Arc<PollScheduler>,
    view: Arc<watch::Sender<BoardView>>,
    shutdown: CancellationToken,
}

impl JobBoard {
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        cache: Arc<dyn JobCache>,
        settings: BoardSettings,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let client = JobBoardClient::new(transport);
        let (tx, rx) = mpsc::unbounded_channel();
        let inbox = Arc::new(Inbox { tx: tx.clone() });

        let events: Arc<dyn EventSink<JobEvent>> = inbox.clone();
        let stream = StreamConnection::events(config.clone(), settings.stream.clone(), events);

        let outcomes: Arc<dyn EventSink<PollOutcome>> = inbox;
        let poller = PollScheduler::new(Arc::new(client.clone()), outcomes)
            .with_shutdown(shutdown.clone());

        let (view, _rx) = watch::channel(BoardView::default());
        Self {
            config,
            settings,
            client,
            cache,
            inbox: tx,
            pending: Mutex::new(Some(rx)),
            stream,
            poller: Arc::new(poller),
            view: Arc::new(view),
            shutdown,
        }
    }

    /// Board talking HTTP through [`ReqwestTransport`].
    pub fn with_reqwest(
        config: Config,
        cache: Arc<dyn JobCache>,
        settings: BoardSettings,
    ) -> Result<Self, BoardError> {
        let transport = ReqwestTransport::new(config.clone(), settings.transport.clone())?;
        Ok(Self::new(config, Arc::new(transport), cache, settings))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn client(&self) -> &JobBoardClient {
        &self.client
    }

    pub fn subscribe(&self) -> watch::Receiver<BoardView> {
        self.view.subscribe()
    }

    pub fn view(&self) -> BoardView {
        self.view.borrow().clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.stream.state()
    }

    /// Loads the cache, connects the event stream and starts polling.
    /// Calling it again is a no-op. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), BoardError> {
        self.ensure_live()?;
        let Some(rx) = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return Ok(());
        };
        board_info!("Starting job board");

        let actor = Actor {
            store: JobStore::new(),
            cache_loaded: false,
            save_held: false,
            view: Arc::clone(&self.view),
            poller: Arc::clone(&self.poller),
            settings: self.settings.clone(),
        };
        tokio::spawn(actor.run(rx, Arc::clone(&self.cache), self.shutdown.clone()));

        let cache = Arc::clone(&self.cache);
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            let jobs = match tokio::task::spawn_blocking(move || cache.load()).await {
                Ok(jobs) => jobs,
                Err(err) => {
                    board_error!("Job cache load task failed: {}", err);
                    JobMap::new()
                }
            };
            // Sent even when empty: the actor holds cache writes until then.
            let _ = inbox.send(Msg::CacheLoaded(jobs));
        });

        tokio::spawn(forward_connection_states(
            self.stream.subscribe_state(),
            self.inbox.clone(),
            self.shutdown.clone(),
        ));

        self.poller.start(self.settings.poll_interval(PollMode::Fallback));
        self.stream.connect();
        Ok(())
    }

    /// Fetches a snapshot right away, outside the poll schedule. The result
    /// is reconciled like any poll; a failure is also returned.
    pub async fn refresh(&self) -> Result<(), BoardError> {
        self.ensure_live()?;
        let requested_at = Utc::now();
        let result = self.client.fetch_status().await;
        if self.shutdown.is_cancelled() {
            return Err(BoardError::Disposed);
        }
        match result {
            Ok(jobs) => {
                self.send(Msg::SnapshotFetched { jobs, requested_at })?;
                Ok(())
            }
            Err(error) => {
                self.send(Msg::SnapshotFailed {
                    error: error.clone(),
                    at: Utc::now(),
                })?;
                Err(error.into())
            }
        }
    }

    /// Removes a job from the board and the cache. A later snapshot or event
    /// for the same id brings it back.
    pub fn hide_job(&self, id: JobId) -> Result<(), BoardError> {
        self.ensure_live()?;
        self.send(Msg::JobHidden(id))
    }

    /// Points the board at a new server: the stream reconnects and polling
    /// restarts in fallback mode until the stream is up again.
    pub fn update_base_url(&self, raw: &str) -> Result<String, BoardError> {
        self.ensure_live()?;
        let url = self.config.update_base_url(raw)?;
        board_info!("Server changed to {}", url);
        if self.is_started() {
            self.stream.disconnect();
            self.stream.connect();
            self.poller.start(self.settings.poll_interval(PollMode::Fallback));
        }
        Ok(url)
    }

    /// Connection to the log stream of one job, sharing this board's server
    /// configuration. Not connected yet.
    pub fn job_stream(
        &self,
        job_id: JobId,
        sink: Arc<dyn EventSink<JobStreamFrame>>,
    ) -> StreamConnection<JobStreamDecoder> {
        StreamConnection::job(
            self.config.clone(),
            job_id,
            self.settings.stream.clone(),
            sink,
        )
    }

    /// Stops every task and timer. Results still in flight are discarded.
    pub fn dispose(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.poller.stop();
        self.stream.disconnect();
        board_info!("Job board disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn is_started(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    fn ensure_live(&self) -> Result<(), BoardError> {
        if self.shutdown.is_cancelled() {
            Err(BoardError::Disposed)
        } else {
            Ok(())
        }
    }

    fn send(&self, msg: Msg) -> Result<(), BoardError> {
        self.inbox.send(msg).map_err(|_| BoardError::Disposed)
    }
}

impl Drop for JobBoard {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Sole owner of the store.
///
/// Until the cache has been seeded into the store, saves are held back: a
/// snapshot that lands first must not overwrite the file before it is read.
struct Actor {
    store: JobStore,
    cache_loaded: bool,
    save_held: bool,
    view: Arc<watch::Sender<BoardView>>,
    poller: Arc<PollScheduler>,
    settings: BoardSettings,
}

impl Actor {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<Msg>,
        cache: Arc<dyn JobCache>,
        shutdown: CancellationToken,
    ) {
        let (persist, pending_save) = watch::channel(None);
        tokio::spawn(write_cache(cache, pending_save));

        let mut housekeeping = tokio::time::interval(
            self.settings
                .housekeeping_interval
                .max(Duration::from_millis(10)),
        );
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let msg = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = rx.recv() => match received {
                    Some(msg) => msg,
                    None => break,
                },
                _ = housekeeping.tick() => Msg::Tick { now: Utc::now() },
            };

            let seeds_cache = matches!(msg, Msg::CacheLoaded(_));
            let (store, effects) = update(std::mem::take(&mut self.store), msg);
            self.store = store;

            for effect in effects {
                match effect {
                    Effect::PersistJobs(jobs) if self.cache_loaded => {
                        persist.send_replace(Some(jobs));
                    }
                    Effect::PersistJobs(_) => self.save_held = true,
                    Effect::SetPollMode(mode) => {
                        board_debug!("Poll mode -> {:?}", mode);
                        self.poller.start(self.settings.poll_interval(mode));
                    }
                }
            }

            if seeds_cache && !self.cache_loaded {
                self.cache_loaded = true;
                if std::mem::take(&mut self.save_held) {
                    persist.send_replace(Some(self.store.jobs().clone()));
                }
            }

            if self.store.consume_dirty() {
                self.view.send_replace(self.store.view(Utc::now()));
            }
        }
        board_debug!("Job board actor stopped");
    }
}

/// Saves the latest pending job map; intermediate maps queued during a slow
/// save are skipped. Exits after the final save once the actor is gone.
async fn write_cache(cache: Arc<dyn JobCache>, mut pending: watch::Receiver<Option<JobMap>>) {
    while pending.changed().await.is_ok() {
        let Some(jobs) = pending.borrow_and_update().clone() else {
            continue;
        };
        let cache = Arc::clone(&cache);
        if let Err(err) = tokio::task::spawn_blocking(move || cache.save(&jobs)).await {
            board_error!("Job cache save task failed: {}", err);
        }
    }
}

async fn forward_connection_states(
    mut states: watch::Receiver<ConnectionState>,
    inbox: mpsc::UnboundedSender<Msg>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        let state = *states.borrow_and_update();
        if inbox.send(Msg::ConnectionChanged(state)).is_err() {
            break;
        }
    }
}
