//! Fetch-state tracking for a single contract address input.
//!
//! A [`HolderTracker`] task owns the [`FetchState`]. Callers drive it through a
//! cloneable [`TrackerHandle`] and read snapshots from a `watch` channel. Every
//! lookup gets a request id; only the response to the latest id may touch the
//! state, older ones are counted in `discarded` and dropped.

use log::{debug, info, warn};
use metrics::{counter, histogram};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_stream::wrappers::WatchStream;

use crate::config::Config;
use crate::error::{FetchError, TrackerError};
use crate::metrics::{
    METRIC_FETCHES, METRIC_FETCH_DURATION, METRIC_FETCH_FAILURES, METRIC_STALE_RESPONSES,
};
use crate::provider::{
    get_token_holders_on, HolderProvider, HolderRecord, TokenHolders, DEFAULT_BLOCKCHAIN,
};

/// Observable result of the lookups issued so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchState {
    pub holders: Vec<HolderRecord>,
    pub holders_count: u64,
    pub loading: bool,
    /// Last failure. Only a later failure replaces it.
    pub error: Option<FetchError>,
    /// Address the shown holders belong to
    pub address: Option<String>,
    /// Id of the most recent request, 0 before the first one
    pub request_id: u64,
    pub discarded: u64,
}

#[derive(Debug, Clone)]
pub struct TrackerOptions {
    pub blockchain: String,
    pub request_timeout: Option<Duration>,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            blockchain: DEFAULT_BLOCKCHAIN.to_string(),
            request_timeout: None,
        }
    }
}

impl From<&Config> for TrackerOptions {
    fn from(config: &Config) -> Self {
        Self {
            blockchain: config.blockchain.clone(),
            request_timeout: config.request_timeout(),
        }
    }
}

type Ack = oneshot::Sender<Option<u64>>;

enum Command {
    Fetch {
        address: String,
        only_if_changed: bool,
        ack: Ack,
    },
    Refresh {
        ack: Ack,
    },
    Shutdown,
}

struct Completion {
    request_id: u64,
    address: String,
    result: Result<TokenHolders, FetchError>,
}

pub struct HolderTracker {
    provider: Arc<dyn HolderProvider>,
    options: TrackerOptions,
    state: FetchState,
    requested: Option<String>,
    state_tx: watch::Sender<FetchState>,
    done_tx: mpsc::UnboundedSender<Completion>,
}

impl HolderTracker {
    pub fn spawn(provider: Arc<dyn HolderProvider>) -> TrackerHandle {
        Self::spawn_with(provider, TrackerOptions::default())
    }

    /// Starts the tracker task on the current tokio runtime.
    pub fn spawn_with(provider: Arc<dyn HolderProvider>, options: TrackerOptions) -> TrackerHandle {
        let (state_tx, state_rx) = watch::channel(FetchState::default());
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();

        let tracker = Self {
            provider,
            options,
            state: FetchState::default(),
            requested: None,
            state_tx,
            done_tx,
        };
        tokio::spawn(tracker.run(command_rx, done_rx));

        TrackerHandle {
            commands: command_tx,
            state: state_rx,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut done: mpsc::UnboundedReceiver<Completion>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Fetch { address, only_if_changed, ack }) => {
                        let started = if only_if_changed && self.requested.as_deref() == Some(address.as_str()) {
                            debug!("Address unchanged ({}), not fetching", address);
                            None
                        } else {
                            Some(self.start(address))
                        };
                        let _ = ack.send(started);
                    }
                    Some(Command::Refresh { ack }) => {
                        let started = self.requested.clone().map(|address| self.start(address));
                        let _ = ack.send(started);
                    }
                    Some(Command::Shutdown) | None => break,
                },
                Some(completion) = done.recv() => self.complete(completion),
            }
        }
        debug!("Holder tracker stopped");
    }

    fn start(&mut self, address: String) -> u64 {
        self.state.request_id += 1;
        let request_id = self.state.request_id;
        self.requested = Some(address.clone());
        self.state.loading = true;
        self.publish();

        counter!(METRIC_FETCHES, 1);
        info!("Fetching holders of {} (request {})", address, request_id);

        let provider = Arc::clone(&self.provider);
        let blockchain = self.options.blockchain.clone();
        let timeout = self.options.request_timeout;
        let done = self.done_tx.clone();

        tokio::spawn(async move {
            let started = Instant::now();
            let lookup = get_token_holders_on(&*provider, &blockchain, &address);
            let result = match timeout {
                Some(limit) => tokio::time::timeout(limit, lookup)
                    .await
                    .unwrap_or_else(|_| {
                        Err(FetchError::Transport(format!("no response within {:?}", limit)))
                    }),
                None => lookup.await,
            };
            histogram!(METRIC_FETCH_DURATION, started.elapsed().as_secs_f64());

            // The tracker may already be gone
            let _ = done.send(Completion {
                request_id,
                address,
                result,
            });
        });

        request_id
    }

    fn complete(&mut self, completion: Completion) {
        let Completion {
            request_id,
            address,
            result,
        } = completion;

        if request_id != self.state.request_id {
            debug!(
                "Dropping response {} for {}, request {} is newer",
                request_id, address, self.state.request_id
            );
            counter!(METRIC_STALE_RESPONSES, 1);
            self.state.discarded += 1;
            self.publish();
            return;
        }

        match result {
            Ok(found) => {
                info!(
                    "Got {} holders of {} ({} total)",
                    found.holders.len(),
                    address,
                    found.holders_count
                );
                self.state.holders = found.holders;
                self.state.holders_count = found.holders_count;
                self.state.address = Some(address);
            }
            Err(err) => {
                warn!("Fetching holders of {} failed: {}", address, err);
                counter!(METRIC_FETCH_FAILURES, 1);
                self.state.error = Some(err);
            }
        }
        self.state.loading = false;
        self.publish();
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state.clone());
    }
}

/// Cloneable front of a running [`HolderTracker`].
#[derive(Clone)]
pub struct TrackerHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<FetchState>,
}

impl TrackerHandle {
    /// Fetches `address` unless it is the address last requested.
    ///
    /// Returns the id of the started request, `None` when nothing changed.
    /// Once this returns, the published state already shows `loading`.
    pub async fn set_address(&self, address: impl Into<String>) -> Result<Option<u64>, TrackerError> {
        let address = address.into();
        self.request(|ack| Command::Fetch {
            address,
            only_if_changed: true,
            ack,
        })
        .await
    }

    /// Fetches `address` unconditionally.
    pub async fn fetch(&self, address: impl Into<String>) -> Result<u64, TrackerError> {
        let address = address.into();
        self.request(|ack| Command::Fetch {
            address,
            only_if_changed: false,
            ack,
        })
        .await?
        .ok_or(TrackerError::Closed)
    }

    /// Fetches the last requested address again, if there is one.
    pub async fn refresh(&self) -> Result<Option<u64>, TrackerError> {
        self.request(|ack| Command::Refresh { ack }).await
    }

    async fn request(&self, command: impl FnOnce(Ack) -> Command) -> Result<Option<u64>, TrackerError> {
        let (ack, started) = oneshot::channel();
        self.commands
            .send(command(ack))
            .map_err(|_| TrackerError::Closed)?;
        started.await.map_err(|_| TrackerError::Closed)
    }

    pub fn state(&self) -> FetchState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FetchState> {
        self.state.clone()
    }

    /// Stream of snapshots, starting with the current one.
    pub fn updates(&self) -> WatchStream<FetchState> {
        WatchStream::new(self.state.clone())
    }

    pub async fn wait_until<F>(&self, predicate: F) -> Result<FetchState, TrackerError>
    where
        F: Fn(&FetchState) -> bool,
    {
        let mut state = self.state.clone();
        loop {
            {
                let current = state.borrow_and_update();
                if predicate(&*current) {
                    return Ok(current.clone());
                }
            }
            state.changed().await.map_err(|_| TrackerError::Closed)?;
        }
    }

    /// Waits for the latest request to settle.
    pub async fn settled(&self) -> Result<FetchState, TrackerError> {
        self.wait_until(|state| !state.loading).await
    }

    /// Stops the tracker. Lookups already in flight run to completion and are ignored.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockHolderProvider;

    const CODE_TOKEN: &str = "0xb24cd494fae4c180a89975f1328eab2a7d5d8f11";

    fn one_holder() -> TokenHolders {
        TokenHolders {
            holders: vec![HolderRecord::new("0xAAA", "100")],
            holders_count: 1,
        }
    }

    #[tokio::test]
    async fn test_initial_state() {
        let tracker = HolderTracker::spawn(Arc::new(MockHolderProvider::new()));

        let state = tracker.state();
        assert!(state.holders.is_empty());
        assert_eq!(state.holders_count, 0);
        assert!(!state.loading);
        assert!(state.error.is_none());
        assert_eq!(state.request_id, 0);
    }

    #[tokio::test]
    async fn test_successful_fetch() {
        let mut provider = MockHolderProvider::new();
        provider
            .expect_token_holders()
            .withf(|req| req.contract_address == CODE_TOKEN && req.blockchain == "eth")
            .times(1)
            .returning(|_| Ok(one_holder()));
        let tracker = HolderTracker::spawn(Arc::new(provider));

        let started = tracker.set_address(CODE_TOKEN).await.unwrap();
        assert_eq!(started, Some(1));

        let state = tracker.settled().await.unwrap();
        assert_eq!(state.holders, vec![HolderRecord::new("0xAAA", "100")]);
        assert_eq!(state.holders_count, 1);
        assert!(!state.loading);
        assert!(state.error.is_none());
        assert_eq!(state.address.as_deref(), Some(CODE_TOKEN));
    }

    #[tokio::test]
    async fn test_failed_first_fetch() {
        let mut provider = MockHolderProvider::new();
        provider
            .expect_token_holders()
            .times(1)
            .returning(|_| Err(FetchError::Transport("network unreachable".to_string())));
        let tracker = HolderTracker::spawn(Arc::new(provider));

        tracker.set_address(CODE_TOKEN).await.unwrap();
        let state = tracker.settled().await.unwrap();

        assert!(state.holders.is_empty());
        assert_eq!(state.holders_count, 0);
        assert!(!state.loading);
        assert_eq!(
            state.error,
            Some(FetchError::Transport("network unreachable".to_string()))
        );
        assert!(state.address.is_none());
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_holders() {
        let mut provider = MockHolderProvider::new();
        provider
            .expect_token_holders()
            .withf(|req| req.contract_address == "0xgood")
            .returning(|_| Ok(one_holder()));
        provider
            .expect_token_holders()
            .withf(|req| req.contract_address == "0xbad")
            .returning(|_| {
                Err(FetchError::Provider {
                    code: -32000,
                    message: "rate limited".to_string(),
                })
            });
        let tracker = HolderTracker::spawn(Arc::new(provider));

        tracker.set_address("0xgood").await.unwrap();
        tracker.settled().await.unwrap();

        tracker.set_address("0xbad").await.unwrap();
        let state = tracker.settled().await.unwrap();
        assert_eq!(state.holders_count, 1);
        assert_eq!(state.address.as_deref(), Some("0xgood"));
        assert!(matches!(state.error, Some(FetchError::Provider { .. })));

        tracker.set_address("0xgood").await.unwrap();
        let state = tracker.settled().await.unwrap();
        assert_eq!(state.holders_count, 1);
        assert!(matches!(state.error, Some(FetchError::Provider { .. })));
    }

    #[tokio::test]
    async fn test_success_leaves_earlier_error_in_place() {
        let mut provider = MockHolderProvider::new();
        provider
            .expect_token_holders()
            .withf(|req| req.contract_address == "0xbad")
            .returning(|_| Err(FetchError::Transport("net".to_string())));
        provider
            .expect_token_holders()
            .withf(|req| req.contract_address == "0xgood")
            .returning(|_| Ok(one_holder()));
        let tracker = HolderTracker::spawn(Arc::new(provider));

        tracker.set_address("0xbad").await.unwrap();
        tracker.settled().await.unwrap();
        tracker.set_address("0xgood").await.unwrap();
        let state = tracker.settled().await.unwrap();

        assert_eq!(state.holders, vec![HolderRecord::new("0xAAA", "100")]);
        assert_eq!(state.holders_count, 1);
        assert_eq!(state.address.as_deref(), Some("0xgood"));
        assert!(!state.loading);
        assert_eq!(state.error, Some(FetchError::Transport("net".to_string())));
    }

    #[tokio::test]
    async fn test_unchanged_address_is_not_fetched_again() {
        let mut provider = MockHolderProvider::new();
        provider
            .expect_token_holders()
            .times(1)
            .returning(|_| Ok(one_holder()));
        let tracker = HolderTracker::spawn(Arc::new(provider));

        assert_eq!(tracker.set_address(CODE_TOKEN).await.unwrap(), Some(1));
        tracker.settled().await.unwrap();
        assert_eq!(tracker.set_address(CODE_TOKEN).await.unwrap(), None);
        assert_eq!(tracker.state().request_id, 1);
    }

    #[tokio::test]
    async fn test_repeated_fetch_is_idempotent() {
        let mut provider = MockHolderProvider::new();
        provider
            .expect_token_holders()
            .times(2)
            .returning(|_| Ok(one_holder()));
        let tracker = HolderTracker::spawn(Arc::new(provider));

        tracker.fetch(CODE_TOKEN).await.unwrap();
        let first = tracker.settled().await.unwrap();
        tracker.fetch(CODE_TOKEN).await.unwrap();
        let second = tracker.settled().await.unwrap();

        assert_eq!(first.holders, second.holders);
        assert_eq!(first.holders_count, second.holders_count);
        assert_eq!(first.error, second.error);
        assert_eq!(second.request_id, 2);
    }

    #[tokio::test]
    async fn test_empty_holder_list() {
        let mut provider = MockHolderProvider::new();
        provider
            .expect_token_holders()
            .returning(|_| Ok(TokenHolders::default()));
        let tracker = HolderTracker::spawn(Arc::new(provider));

        tracker.set_address("0xnobody").await.unwrap();
        let state = tracker.settled().await.unwrap();
        assert!(state.holders.is_empty());
        assert_eq!(state.holders_count, 0);
        assert!(!state.loading);
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_refresh() {
        let mut provider = MockHolderProvider::new();
        provider
            .expect_token_holders()
            .times(2)
            .returning(|_| Ok(one_holder()));
        let tracker = HolderTracker::spawn(Arc::new(provider));

        assert_eq!(tracker.refresh().await.unwrap(), None);

        tracker.set_address(CODE_TOKEN).await.unwrap();
        tracker.settled().await.unwrap();
        assert_eq!(tracker.refresh().await.unwrap(), Some(2));
        tracker.settled().await.unwrap();
    }

    #[tokio::test]
    async fn test_configured_blockchain_is_used() {
        let mut provider = MockHolderProvider::new();
        provider
            .expect_token_holders()
            .withf(|req| req.blockchain == "polygon")
            .times(1)
            .returning(|_| Ok(one_holder()));
        let options = TrackerOptions {
            blockchain: "polygon".to_string(),
            ..TrackerOptions::default()
        };
        let tracker = HolderTracker::spawn_with(Arc::new(provider), options);

        tracker.set_address(CODE_TOKEN).await.unwrap();
        assert!(tracker.settled().await.unwrap().error.is_none());
    }

    #[tokio::test]
    async fn test_shutdown() {
        let tracker = HolderTracker::spawn(Arc::new(MockHolderProvider::new()));
        tracker.shutdown();

        assert_eq!(
            tracker.set_address(CODE_TOKEN).await,
            Err(TrackerError::Closed)
        );
    }
}
