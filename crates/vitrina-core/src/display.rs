//! Headless display adapter.
//!
//! Keeps a JSON view model of what the storefront should show. A background
//! writer saves it to a snapshot file after changes, so any front end can
//! render it. Display calls only touch memory; bursts of changes (a
//! renumbering, a restore) collapse into one write.

use std::{
    collections::{BTreeMap, VecDeque},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::Utc;
use serde::Serialize;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, warn};

use crate::{
    activity::ActivityEntry,
    domain::{ChatHistoryEntry, Product, ProductId},
    ports::DisplayPort,
    Result,
};

/// Quiet period before a changed view is written out.
const SNAPSHOT_DEBOUNCE: Duration = Duration::from_millis(50);

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Promotion {
    pub attempts: u32,
    pub win_hour: u8,
    pub code: String,
    pub triggered_at: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ViewModel {
    pub connected: bool,
    pub ticker: Option<String>,
    pub banner: Option<String>,
    pub payment_card: Option<String>,
    pub promotion: Option<Promotion>,
    pub products: BTreeMap<ProductId, Product>,
    pub chat: Vec<ChatHistoryEntry>,
    pub activity: VecDeque<String>,
}

pub struct SnapshotDisplay {
    activity_capacity: usize,
    view: Mutex<ViewModel>,
    /// Bumped on every change; the writer waits on it.
    version: watch::Sender<u64>,
}

impl SnapshotDisplay {
    pub fn new(activity_capacity: usize) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            activity_capacity,
            view: Mutex::new(ViewModel::default()),
            version,
        }
    }

    pub fn view(&self) -> ViewModel {
        self.view.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Write the current view to `path` (temp file, then rename).
    pub async fn write_snapshot(&self, path: &Path) -> Result<()> {
        let body = serde_json::to_vec_pretty(&self.view())?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Spawn the writer that keeps `path` in sync with the view. It ends when
    /// the display is dropped.
    pub fn persist_to(self: &Arc<Self>, path: PathBuf) -> JoinHandle<()> {
        let mut changes = self.version.subscribe();
        let display = Arc::downgrade(self);
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                tokio::time::sleep(SNAPSHOT_DEBOUNCE).await;
                changes.borrow_and_update();

                let Some(display) = display.upgrade() else {
                    break;
                };
                match display.write_snapshot(&path).await {
                    Ok(()) => debug!(path = %path.display(), "display snapshot written"),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "failed to write display snapshot")
                    }
                }
            }
        })
    }

    fn update(&self, f: impl FnOnce(&mut ViewModel)) {
        let Ok(mut view) = self.view.lock() else {
            return;
        };
        f(&mut view);
        drop(view);
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }
}

impl DisplayPort for SnapshotDisplay {
    fn render_or_update_product(&self, product: &Product) {
        self.update(|v| {
            v.products.insert(product.id, product.clone());
        });
    }

    fn remove_product(&self, id: ProductId) {
        self.update(|v| {
            v.products.remove(&id);
        });
    }

    fn set_ticker(&self, text: Option<&str>) {
        self.update(|v| v.ticker = text.map(str::to_string));
    }

    fn show_banner(&self, text: &str) {
        self.update(|v| v.banner = Some(text.to_string()));
    }

    fn set_connection_state(&self, connected: bool) {
        let changed = self.view.lock().map(|v| v.connected != connected).unwrap_or(true);
        if changed {
            self.update(|v| v.connected = connected);
        }
    }

    fn trigger_promotion(&self, attempts: u32, win_hour: u8, code: &str) {
        self.update(|v| {
            v.promotion = Some(Promotion {
                attempts,
                win_hour,
                code: code.to_string(),
                triggered_at: Utc::now().to_rfc3339(),
            })
        });
    }

    fn set_payment_card(&self, digits: Option<&str>) {
        self.update(|v| v.payment_card = digits.map(str::to_string));
    }

    fn append_chat(&self, entry: &ChatHistoryEntry) {
        self.update(|v| v.chat.push(entry.clone()));
    }

    fn clear_chat(&self) {
        self.update(|v| v.chat.clear());
    }

    fn log_activity(&self, entry: &ActivityEntry) {
        let cap = self.activity_capacity.max(1);
        self.update(|v| {
            if v.activity.len() >= cap {
                v.activity.pop_front();
            }
            v.activity.push_back(entry.display_line());
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChannelName;

    fn product(id: ProductId) -> Product {
        Product {
            id,
            name: format!("P{id}"),
            description: String::new(),
            price_primary: None,
            price_secondary: None,
            image_url: None,
        }
    }

    #[test]
    fn view_tracks_products_and_banners() {
        let d = SnapshotDisplay::new(2);
        d.render_or_update_product(&product(2));
        d.render_or_update_product(&product(1));
        d.remove_product(2);
        d.set_ticker(Some("Hoy"));
        d.trigger_promotion(3, 14, "WIN");

        let v = d.view();
        assert_eq!(v.products.keys().copied().collect::<Vec<_>>(), vec![1]);
        assert_eq!(v.ticker.as_deref(), Some("Hoy"));
        assert_eq!(v.promotion.map(|p| p.code), Some("WIN".to_string()));
    }

    #[test]
    fn activity_feed_is_bounded() {
        let d = SnapshotDisplay::new(2);
        for i in 0..3 {
            d.log_activity(&ActivityEntry::info(ChannelName::Primary, format!("e{i}")));
        }
        let v = d.view();
        assert_eq!(v.activity.len(), 2);
        assert!(v.activity[1].ends_with("e2"));
    }

    fn temp_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "vitrina-{tag}-{}-{}.json",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ))
    }

    fn read(path: &Path) -> Option<serde_json::Value> {
        let txt = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&txt).ok()
    }

    #[tokio::test]
    async fn snapshot_file_is_written() {
        let path = temp_path("snapshot");
        let d = SnapshotDisplay::new(10);
        d.set_connection_state(true);
        d.write_snapshot(&path).await.unwrap();

        assert_eq!(read(&path).unwrap()["connected"], true);
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn writer_coalesces_bursts_into_latest_view() {
        let path = temp_path("writer");
        let d = Arc::new(SnapshotDisplay::new(10));
        let writer = d.persist_to(path.clone());

        for id in 1..=20 {
            d.render_or_update_product(&product(id));
        }
        d.set_ticker(Some("Abierto"));

        let mut written = None;
        for _ in 0..100 {
            written = read(&path).filter(|v| v["ticker"] == "Abierto");
            if written.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let written = written.expect("snapshot written");
        assert_eq!(written["products"].as_object().map(|m| m.len()), Some(20));

        drop(d);
        writer.await.unwrap();
        let _ = std::fs::remove_file(path);
    }
}
