//! Long-poll fetcher for one channel, owning that channel's update cursor.

use std::{sync::Arc, time::Duration};

use tracing::warn;

use crate::{
    domain::{ChannelName, RawUpdate, UpdateId},
    errors::Error,
    ports::Transport,
    Result,
};

/// Offset that asks the feed for only its latest update.
pub const LATEST_ONLY_OFFSET: i64 = -1;

pub struct UpdateFetcher {
    channel: ChannelName,
    transport: Arc<dyn Transport>,
    timeout: Duration,
    last_seen: Option<UpdateId>,
}

impl UpdateFetcher {
    pub fn new(channel: ChannelName, transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self {
            channel,
            transport,
            timeout,
            last_seen: None,
        }
    }

    /// Continue from a cursor carried over from an earlier loop on the same
    /// credential, so acknowledged updates are not served again.
    pub fn resume(&mut self, last_seen: Option<UpdateId>) {
        if last_seen > self.last_seen {
            self.last_seen = last_seen;
        }
    }

    pub fn last_seen(&self) -> Option<UpdateId> {
        self.last_seen
    }

    /// `last_seen + 1`, so the feed purges everything already acknowledged.
    /// A fresh cursor asks for the latest update only instead of the backlog.
    pub fn next_offset(&self) -> i64 {
        match self.last_seen {
            Some(UpdateId(id)) => id + 1,
            None => LATEST_ONLY_OFFSET,
        }
    }

    /// One long-poll round trip.
    ///
    /// Returns updates in ascending id order, minus any the cursor has already
    /// passed. The null sentinel and out-of-order batches are reported as
    /// [`Error::MalformedResponse`].
    pub async fn fetch(&self) -> Result<Vec<RawUpdate>> {
        let offset = self.next_offset();
        let Some(batch) = self.transport.get_updates(offset, self.timeout).await? else {
            return Err(Error::MalformedResponse(format!(
                "{} feed returned an empty sentinel for offset {offset}",
                self.channel
            )));
        };

        if let Some(pair) = batch.windows(2).find(|w| w[0].update_id >= w[1].update_id) {
            return Err(Error::MalformedResponse(format!(
                "{} feed returned update {} after {}",
                self.channel, pair[1].update_id.0, pair[0].update_id.0
            )));
        }

        let Some(last_seen) = self.last_seen else {
            return Ok(batch);
        };
        let (fresh, stale): (Vec<_>, Vec<_>) =
            batch.into_iter().partition(|u| u.update_id > last_seen);
        if !stale.is_empty() {
            warn!(
                channel = %self.channel,
                count = stale.len(),
                last_seen = last_seen.0,
                "dropping already-processed updates"
            );
        }
        Ok(fresh)
    }

    /// Advance the cursor past a fully processed batch. Never moves backwards.
    pub fn acknowledge(&mut self, batch: &[RawUpdate]) {
        let Some(max) = batch.iter().map(|u| u.update_id).max() else {
            return;
        };
        self.last_seen = Some(match self.last_seen {
            Some(prev) if prev >= max => prev,
            _ => max,
        });
    }
}
