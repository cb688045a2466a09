//! Per-channel poll loop.
//!
//! ```text
//! Stopped -> Starting -> Polling <-> Backoff -> Stopped
//! ```
//!
//! `Starting` resolves the bot identity (retried with capped exponential
//! backoff). `Polling` runs one long-poll fetch, dispatches the batch, then
//! waits the short inter-poll delay. A failed fetch moves to `Backoff` for the
//! fixed backoff delay. Cancellation moves to `Stopped` from any state and
//! drops any pending fetch or timer. A refresh request cuts the current wait
//! short; requests made during a fetch are coalesced into one follow-up fetch.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{watch, Notify},
    task::JoinHandle,
    time::sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    dispatcher::{DispatchOutcome, Dispatcher, SourceChannel},
    domain::{BotIdentity, ChannelName, UpdateId},
    fetcher::UpdateFetcher,
    ports::IdentityPort,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollState {
    Stopped,
    Starting,
    Polling,
    Backoff,
}

#[derive(Clone, Copy, Debug)]
pub struct PollTiming {
    pub poll_timeout: Duration,
    pub inter_poll_delay: Duration,
    pub backoff_delay: Duration,
    pub identity_retry_initial: Duration,
    pub identity_retry_max: Duration,
}

impl PollTiming {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            poll_timeout: cfg.poll_timeout,
            inter_poll_delay: cfg.inter_poll_delay,
            backoff_delay: cfg.backoff_delay,
            identity_retry_initial: cfg.identity_retry_initial,
            identity_retry_max: cfg.identity_retry_max,
        }
    }
}

impl Default for PollTiming {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(50),
            inter_poll_delay: Duration::from_millis(100),
            backoff_delay: Duration::from_secs(15),
            identity_retry_initial: Duration::from_secs(1),
            identity_retry_max: Duration::from_secs(60),
        }
    }
}

pub struct ChannelPoller {
    source: SourceChannel,
    identity: Arc<dyn IdentityPort>,
    fetcher: UpdateFetcher,
    dispatcher: Arc<Dispatcher>,
    timing: PollTiming,
    state: watch::Sender<PollState>,
    refresh: Arc<Notify>,
    cancel: CancellationToken,
}

/// Control surface of a spawned poll loop.
pub struct PollerHandle {
    name: ChannelName,
    state: watch::Receiver<PollState>,
    refresh: Arc<Notify>,
    cancel: CancellationToken,
    join: JoinHandle<Option<UpdateId>>,
}

impl ChannelPoller {
    pub fn new(
        source: SourceChannel,
        identity: Arc<dyn IdentityPort>,
        dispatcher: Arc<Dispatcher>,
        timing: PollTiming,
        cancel: CancellationToken,
    ) -> Self {
        let fetcher = UpdateFetcher::new(source.name, source.transport.clone(), timing.poll_timeout);
        let (state, _) = watch::channel(PollState::Stopped);
        Self {
            source,
            identity,
            fetcher,
            dispatcher,
            timing,
            state,
            refresh: Arc::new(Notify::new()),
            cancel,
        }
    }

    /// Share a refresh trigger that outlives this loop.
    pub fn with_refresh(mut self, refresh: Arc<Notify>) -> Self {
        self.refresh = refresh;
        self
    }

    /// Start from an acknowledged cursor instead of the latest update only.
    pub fn with_cursor(mut self, last_seen: Option<UpdateId>) -> Self {
        self.fetcher.resume(last_seen);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<PollState> {
        self.state.subscribe()
    }

    pub fn spawn(self) -> PollerHandle {
        let name = self.source.name;
        let state = self.subscribe();
        let refresh = self.refresh.clone();
        let cancel = self.cancel.clone();
        PollerHandle {
            name,
            state,
            refresh,
            cancel,
            join: tokio::spawn(self.run()),
        }
    }

    /// Run until cancelled. Returns the last acknowledged update id.
    pub async fn run(mut self) -> Option<UpdateId> {
        let name = self.source.name;
        self.set_state(PollState::Starting);

        let Some(me) = self.resolve_identity().await else {
            self.set_state(PollState::Stopped);
            return self.fetcher.last_seen();
        };
        info!(channel = %name, bot = %me.username, chat_id = %self.source.chat_id, "channel started");

        loop {
            self.set_state(PollState::Polling);

            let fetched = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                r = self.fetcher.fetch() => r,
            };

            let delay = match fetched {
                Ok(batch) => {
                    self.report_connection(true);
                    for update in &batch {
                        let Some(msg) = &update.message else {
                            debug!(channel = %name, update_id = update.update_id.0, "update without message");
                            continue;
                        };
                        let outcome = self.dispatcher.handle_message(&self.source, msg).await;
                        if outcome != DispatchOutcome::Ignored {
                            debug!(channel = %name, update_id = update.update_id.0, ?outcome, "update processed");
                        }
                    }
                    self.fetcher.acknowledge(&batch);
                    self.timing.inter_poll_delay
                }
                Err(e) => {
                    warn!(channel = %name, error = %e, "fetch failed, backing off");
                    self.report_connection(false);
                    self.set_state(PollState::Backoff);
                    self.timing.backoff_delay
                }
            };

            if !self.pause(delay).await {
                break;
            }
        }

        info!(channel = %name, "channel stopped");
        self.set_state(PollState::Stopped);
        self.fetcher.last_seen()
    }

    async fn resolve_identity(&self) -> Option<BotIdentity> {
        let mut delay = self.timing.identity_retry_initial;
        loop {
            let res = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                r = self.identity.who_am_i() => r,
            };
            match res {
                Ok(me) => return Some(me),
                Err(e) => {
                    warn!(
                        channel = %self.source.name,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "identity handshake failed"
                    );
                    self.report_connection(false);
                }
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                _ = sleep(delay) => {}
            }
            delay = (delay * 2).min(self.timing.identity_retry_max);
        }
    }

    /// Wait `delay`, or less if a refresh arrives. `false` when cancelled.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = self.refresh.notified() => {
                debug!(channel = %self.source.name, "refresh requested");
                true
            }
            _ = sleep(delay) => true,
        }
    }

    fn set_state(&self, state: PollState) {
        self.state.send_replace(state);
    }

    /// Only the primary channel drives the connection indicator.
    fn report_connection(&self, connected: bool) {
        if self.source.name == ChannelName::Primary {
            self.dispatcher
                .shop()
                .display()
                .set_connection_state(connected);
        }
    }
}

impl PollerHandle {
    pub fn name(&self) -> ChannelName {
        self.name
    }

    pub fn state(&self) -> PollState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollState> {
        self.state.clone()
    }

    /// Skip the current inter-poll delay or backoff wait.
    pub fn refresh(&self) {
        self.refresh.notify_one();
    }

    /// Cancel the loop and wait for it to finish. Any in-flight fetch is
    /// abandoned; nothing is scheduled afterwards.
    pub async fn stop(self) -> Option<UpdateId> {
        self.cancel.cancel();
        match self.join.await {
            Ok(last_seen) => last_seen,
            Err(e) => {
                warn!(channel = %self.name, error = %e, "poll task ended abnormally");
                None
            }
        }
    }
}
