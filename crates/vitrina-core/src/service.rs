//! Service supervisor: wires the shop, dispatcher and poll loops together and
//! restarts the loops when credentials change.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    activity::AuditLogger,
    command::RemoteConfig,
    config::{ChannelCredentials, Config},
    dispatcher::{Dispatcher, SourceChannel},
    domain::{ChannelName, UpdateId},
    poller::{ChannelPoller, PollTiming, PollerHandle},
    ports::{DisplayPort, IdentityPort, Storage, Transport},
    shop::Shop,
    storage::keys,
    Result,
};

/// Builds the transport and identity ports for one set of credentials.
pub trait ChannelConnector: Send + Sync {
    fn connect(
        &self,
        creds: &ChannelCredentials,
        cfg: &Config,
    ) -> Result<(Arc<dyn Transport>, Arc<dyn IdentityPort>)>;
}

/// Wakes both poll loops out of their current wait.
///
/// Survives loop restarts: the same triggers are handed to every new loop.
#[derive(Clone, Default)]
pub struct RefreshHandle {
    primary: Arc<Notify>,
    auxiliary: Arc<Notify>,
}

impl RefreshHandle {
    pub fn refresh(&self) {
        self.primary.notify_one();
        self.auxiliary.notify_one();
    }

    fn for_channel(&self, name: ChannelName) -> Arc<Notify> {
        match name {
            ChannelName::Primary => self.primary.clone(),
            ChannelName::Auxiliary => self.auxiliary.clone(),
        }
    }
}

pub struct Service {
    base: Config,
    active: Config,
    shop: Arc<Shop>,
    dispatcher: Arc<Dispatcher>,
    connector: Arc<dyn ChannelConnector>,
    reconfigure: mpsc::UnboundedReceiver<RemoteConfig>,
    refresh: RefreshHandle,
    shutdown: CancellationToken,
}

impl Service {
    /// Restore persisted state and prepare the loops. Nothing is polled until
    /// [`Service::run`].
    pub async fn build(
        cfg: Config,
        storage: Arc<dyn Storage>,
        display: Arc<dyn DisplayPort>,
        connector: Arc<dyn ChannelConnector>,
    ) -> Result<Self> {
        let shop = Arc::new(Shop::restore(storage.clone(), display, cfg.chat_history_limit).await?);
        let audit = Arc::new(AuditLogger::new(
            cfg.audit_log_path.clone(),
            cfg.audit_log_json,
        ));
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(Dispatcher::new(shop.clone(), audit).with_reconfigure(tx));

        let active = match stored_remote_config(storage.as_ref()).await {
            Some(remote) => {
                info!("applying stored remote configuration");
                cfg.with_remote(&remote)
            }
            None => cfg.clone(),
        };

        Ok(Self {
            base: cfg,
            active,
            shop,
            dispatcher,
            connector,
            reconfigure: rx,
            refresh: RefreshHandle::default(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn shop(&self) -> &Arc<Shop> {
        &self.shop
    }

    /// Credentials currently in effect.
    pub fn active_config(&self) -> &Config {
        &self.active
    }

    pub fn refresh_handle(&self) -> RefreshHandle {
        self.refresh.clone()
    }

    /// Cancelling this token stops both loops and ends [`Service::run`].
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the loops until shutdown, restarting them on remote config.
    pub async fn run(mut self) -> Result<()> {
        let mut loops = self.start_loops(&HashMap::new())?;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                Some(remote) = self.reconfigure.recv() => {
                    let next = self.base.with_remote(&remote);
                    if next.primary == self.active.primary && next.auxiliary == self.active.auxiliary {
                        info!("remote configuration unchanged, channels keep running");
                        continue;
                    }
                    info!("remote configuration received, restarting channels");
                    let cursors = stop_all(loops).await;
                    self.active = next;
                    loops = match self.start_loops(&cursors) {
                        Ok(l) => l,
                        Err(e) => {
                            error!(error = %e, "restart with new credentials failed");
                            self.shop.display().set_connection_state(false);
                            Vec::new()
                        }
                    };
                }
            }
        }

        stop_all(loops).await;
        info!("service stopped");
        Ok(())
    }

    /// Spawn a loop per configured channel. A credential that already has a
    /// cursor in `cursors` continues from it; its feed has already served
    /// everything up to there.
    fn start_loops(&self, cursors: &HashMap<String, UpdateId>) -> Result<Vec<RunningChannel>> {
        let mut channels = vec![(ChannelName::Primary, self.active.primary.clone())];
        if let Some(aux) = &self.active.auxiliary {
            channels.push((ChannelName::Auxiliary, aux.clone()));
        }

        let timing = PollTiming::from_config(&self.active);
        let mut running = Vec::with_capacity(channels.len());
        for (name, creds) in channels {
            let (transport, identity) = match self.connector.connect(&creds, &self.active) {
                Ok(ports) => ports,
                Err(e) if name == ChannelName::Auxiliary => {
                    warn!(error = %e, "auxiliary channel unavailable");
                    continue;
                }
                // Primary is always first, so nothing is running yet.
                Err(e) => return Err(e),
            };

            let source = SourceChannel {
                name,
                chat_id: creds.chat_id,
                transport,
            };
            let cursor = cursors.get(&creds.token).copied();
            let poller = ChannelPoller::new(
                source,
                identity,
                self.dispatcher.clone(),
                timing,
                self.shutdown.child_token(),
            )
            .with_refresh(self.refresh.for_channel(name))
            .with_cursor(cursor);
            info!(
                channel = %name,
                chat_id = %creds.chat_id,
                resume_after = cursor.map(|c| c.0),
                "starting channel"
            );
            running.push(RunningChannel {
                token: creds.token,
                handle: poller.spawn(),
            });
        }
        Ok(running)
    }
}

struct RunningChannel {
    token: String,
    handle: PollerHandle,
}

/// Stop every loop and collect the last acknowledged update per credential.
async fn stop_all(loops: Vec<RunningChannel>) -> HashMap<String, UpdateId> {
    let mut cursors = HashMap::new();
    for RunningChannel { token, handle } in loops {
        if let Some(last_seen) = handle.stop().await {
            cursors.insert(token, last_seen);
        }
    }
    cursors
}

async fn stored_remote_config(storage: &dyn Storage) -> Option<RemoteConfig> {
    match storage.get(keys::REMOTE_CONFIG).await {
        Ok(Some(v)) => serde_json::from_value(v)
            .map_err(|e| warn!(error = %e, "stored remote configuration unreadable"))
            .ok(),
        Ok(None) => None,
        Err(e) => {
            warn!(error = %e, "could not read stored remote configuration");
            None
        }
    }
}
