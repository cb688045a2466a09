//! Shared application state and the mutations the dispatcher applies to it.
//!
//! Each mutation holds the lock for the piece of state it touches for its
//! whole duration (memory, display and storage), so concurrent dispatches from
//! the two channels never interleave inside one command. Memory and display
//! are updated first; a storage failure is reported but never rolled back.

use std::{collections::HashSet, sync::Arc};

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::{
    catalog::{Catalog, IdMove, UpsertKind},
    chat::ChatHistory,
    command::ProductDraft,
    domain::{ChatHistoryEntry, Product, ProductId},
    ports::{DisplayPort, Storage},
    storage::keys,
    Result,
};

pub struct Shop {
    storage: Arc<dyn Storage>,
    display: Arc<dyn DisplayPort>,
    catalog: Mutex<Catalog>,
    chat: Mutex<ChatHistory>,
    ticker: Mutex<Option<String>>,
    payment_card: Mutex<Option<String>>,
}

impl Shop {
    pub fn new(storage: Arc<dyn Storage>, display: Arc<dyn DisplayPort>, chat_limit: usize) -> Self {
        Self {
            storage,
            display,
            catalog: Mutex::new(Catalog::new()),
            chat: Mutex::new(ChatHistory::new(chat_limit)),
            ticker: Mutex::new(None),
            payment_card: Mutex::new(None),
        }
    }

    /// Rebuild state from storage and push it to the display.
    ///
    /// Indexed products whose record is missing or unreadable are skipped.
    pub async fn restore(
        storage: Arc<dyn Storage>,
        display: Arc<dyn DisplayPort>,
        chat_limit: usize,
    ) -> Result<Self> {
        let ids: Vec<ProductId> = match storage.get(keys::CATALOG_INDEX).await? {
            Some(v) => serde_json::from_value(v).unwrap_or_else(|e| {
                warn!(error = %e, "catalog index unreadable, starting empty");
                Vec::new()
            }),
            None => Vec::new(),
        };

        let mut products = Vec::with_capacity(ids.len());
        for id in ids {
            match storage.get(&keys::product(id)).await? {
                Some(v) => match serde_json::from_value::<Product>(v) {
                    Ok(p) if p.id == id => products.push(p),
                    Ok(p) => warn!(id, stored_id = p.id, "product record id mismatch, skipping"),
                    Err(e) => warn!(id, error = %e, "product record unreadable, skipping"),
                },
                None => warn!(id, "product listed in index but missing from storage"),
            }
        }

        let ticker = storage
            .get(keys::TICKER_TEXT)
            .await?
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|s| !s.is_empty());
        let payment_card = storage
            .get(keys::PAYMENT_CARD)
            .await?
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|s| !s.is_empty());
        let chat_entries: Vec<ChatHistoryEntry> = match storage.get(keys::CHAT_HISTORY).await? {
            Some(v) => serde_json::from_value(v).unwrap_or_else(|e| {
                warn!(error = %e, "chat history unreadable, starting empty");
                Vec::new()
            }),
            None => Vec::new(),
        };

        let catalog = Catalog::from_products(products);
        let chat = ChatHistory::from_entries(chat_entries, chat_limit);
        if catalog.is_empty() && chat.is_empty() {
            info!("no stored catalog or chat history");
        } else {
            info!(
                products = catalog.len(),
                chat_entries = chat.len(),
                "shop state restored"
            );
        }

        for p in catalog.iter() {
            display.render_or_update_product(p);
        }
        display.set_ticker(ticker.as_deref());
        display.set_payment_card(payment_card.as_deref());
        for e in chat.entries() {
            display.append_chat(e);
        }

        Ok(Self {
            storage,
            display,
            catalog: Mutex::new(catalog),
            chat: Mutex::new(chat),
            ticker: Mutex::new(ticker),
            payment_card: Mutex::new(payment_card),
        })
    }

    pub fn display(&self) -> &Arc<dyn DisplayPort> {
        &self.display
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    // === Products ===

    pub async fn upsert_product(
        &self,
        draft: ProductDraft,
        image_url: Option<String>,
    ) -> Result<(UpsertKind, Product)> {
        let mut catalog = self.catalog.lock().await;
        let (kind, product) = catalog.upsert(draft, image_url);
        self.display.render_or_update_product(&product);

        self.storage
            .set(&keys::product(product.id), serde_json::to_value(&product)?)
            .await?;
        if kind == UpsertKind::Inserted {
            self.write_index(&catalog).await?;
        }
        Ok((kind, product))
    }

    /// Delete a product and renumber the rest to `1..=N`.
    ///
    /// Returns `None` when the id is unknown. Each renumbered record is written
    /// under its new id before the old record is removed; a failed write keeps
    /// the old record and the move is still applied in memory. Later moves that
    /// would overwrite a record left behind that way are skipped in storage.
    pub async fn delete_product(&self, id: ProductId) -> Result<Option<Vec<IdMove>>> {
        let mut catalog = self.catalog.lock().await;
        if catalog.remove(id).is_none() {
            return Ok(None);
        }
        self.display.remove_product(id);

        let removed = self.storage.remove(&keys::product(id)).await;

        let moves = catalog.renumber();
        // Ids whose record still sits under the old key after a failed move.
        let mut stranded: HashSet<ProductId> = HashSet::new();
        for mv in &moves {
            let Some(product) = catalog.get(mv.to) else {
                continue;
            };
            self.display.remove_product(mv.from);
            self.display.render_or_update_product(product);

            if stranded.contains(&mv.to) {
                warn!(
                    from = mv.from,
                    to = mv.to,
                    "target key still holds an unmigrated record, leaving this one in place"
                );
                stranded.insert(mv.from);
                continue;
            }
            if let Err(e) = self.migrate_record(product, mv.from).await {
                error!(from = mv.from, to = mv.to, error = %e, "product record migration failed");
                stranded.insert(mv.from);
            }
        }

        let index = self.write_index(&catalog).await;
        removed?;
        index?;
        Ok(Some(moves))
    }

    async fn migrate_record(&self, product: &Product, from: ProductId) -> Result<()> {
        self.storage
            .set(&keys::product(product.id), serde_json::to_value(product)?)
            .await?;
        self.storage.remove(&keys::product(from)).await
    }

    async fn write_index(&self, catalog: &Catalog) -> Result<()> {
        self.storage
            .set(keys::CATALOG_INDEX, json!(catalog.ids()))
            .await
    }

    pub async fn products(&self) -> Vec<Product> {
        self.catalog.lock().await.iter().cloned().collect()
    }

    // === Banners ===

    /// Empty text clears the ticker.
    pub async fn set_ticker(&self, text: &str) -> Result<()> {
        let mut ticker = self.ticker.lock().await;
        let text = text.trim();
        if text.is_empty() {
            *ticker = None;
            self.display.set_ticker(None);
            return self.storage.remove(keys::TICKER_TEXT).await;
        }
        *ticker = Some(text.to_string());
        self.display.set_ticker(Some(text));
        self.storage
            .set(keys::TICKER_TEXT, Value::String(text.to_string()))
            .await
    }

    pub async fn ticker(&self) -> Option<String> {
        self.ticker.lock().await.clone()
    }

    pub fn show_notification(&self, text: &str) {
        self.display.show_banner(text);
    }

    pub fn trigger_promotion(&self, attempts: u32, win_hour: u8, code: &str) {
        self.display.trigger_promotion(attempts, win_hour, code);
    }

    // === Payment card ===

    pub async fn set_payment_card(&self, digits: Option<&str>) -> Result<()> {
        let mut card = self.payment_card.lock().await;
        *card = digits.map(str::to_string);
        self.display.set_payment_card(digits);
        match digits {
            Some(d) => {
                self.storage
                    .set(keys::PAYMENT_CARD, Value::String(d.to_string()))
                    .await
            }
            None => self.storage.remove(keys::PAYMENT_CARD).await,
        }
    }

    pub async fn payment_card(&self) -> Option<String> {
        self.payment_card.lock().await.clone()
    }

    // === Chat ===

    /// Append to the shared chat history. Returns `false` for a suppressed
    /// duplicate.
    pub async fn append_chat(&self, entry: ChatHistoryEntry) -> Result<bool> {
        let mut chat = self.chat.lock().await;
        if !chat.append(entry.clone()) {
            return Ok(false);
        }
        self.display.append_chat(&entry);
        self.storage
            .set(keys::CHAT_HISTORY, serde_json::to_value(chat.entries())?)
            .await?;
        Ok(true)
    }

    pub async fn clear_chat(&self) -> Result<()> {
        let mut chat = self.chat.lock().await;
        chat.clear();
        self.display.clear_chat();
        self.storage.remove(keys::CHAT_HISTORY).await
    }

    pub async fn chat_entries(&self) -> Vec<ChatHistoryEntry> {
        self.chat.lock().await.entries().to_vec()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        activity::ActivityEntry, domain::ChatEntryKind, errors::Error, storage::MemoryStorage,
    };
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::sync::Mutex as StdMutex;

    /// Display fake that records every call as a short string.
    #[derive(Default)]
    pub(crate) struct RecordingDisplay {
        calls: StdMutex<Vec<String>>,
    }

    impl RecordingDisplay {
        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn push(&self, s: String) {
            self.calls.lock().unwrap().push(s);
        }
    }

    impl DisplayPort for RecordingDisplay {
        fn render_or_update_product(&self, product: &Product) {
            self.push(format!("render:{}:{}", product.id, product.name));
        }
        fn remove_product(&self, id: ProductId) {
            self.push(format!("remove:{id}"));
        }
        fn set_ticker(&self, text: Option<&str>) {
            self.push(format!("ticker:{}", text.unwrap_or("")));
        }
        fn show_banner(&self, text: &str) {
            self.push(format!("banner:{text}"));
        }
        fn set_connection_state(&self, connected: bool) {
            self.push(format!("connected:{connected}"));
        }
        fn trigger_promotion(&self, attempts: u32, win_hour: u8, code: &str) {
            self.push(format!("promo:{attempts}:{win_hour}:{code}"));
        }
        fn set_payment_card(&self, digits: Option<&str>) {
            self.push(format!("card:{}", digits.unwrap_or("")));
        }
        fn append_chat(&self, entry: &ChatHistoryEntry) {
            self.push(format!("chat:{}", entry.text.as_deref().unwrap_or("")));
        }
        fn clear_chat(&self) {
            self.push("chat_clear".to_string());
        }
        fn log_activity(&self, entry: &ActivityEntry) {
            self.push(format!("activity:{}", entry.display_line()));
        }
    }

    /// Storage that fails every write to one key.
    struct FailingKey {
        inner: MemoryStorage,
        key: String,
    }

    #[async_trait]
    impl Storage for FailingKey {
        async fn get(&self, key: &str) -> Result<Option<Value>> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: Value) -> Result<()> {
            if key == self.key {
                return Err(Error::Storage("disk full".into()));
            }
            self.inner.set(key, value).await
        }
        async fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key).await
        }
    }

    fn draft(id: ProductId, name: &str) -> ProductDraft {
        ProductDraft {
            id,
            name: name.into(),
            description: "dulce".into(),
            price_primary: Some(Decimal::new(50, 0)),
            price_secondary: None,
        }
    }

    fn shop_with(storage: Arc<dyn Storage>) -> (Shop, Arc<RecordingDisplay>) {
        let display = Arc::new(RecordingDisplay::default());
        (Shop::new(storage, display.clone(), 100), display)
    }

    #[tokio::test]
    async fn delete_renumbers_and_migrates_records() {
        let storage = Arc::new(MemoryStorage::new());
        let (shop, display) = shop_with(storage.clone());
        shop.upsert_product(draft(1, "A"), None).await.unwrap();
        shop.upsert_product(draft(2, "B"), None).await.unwrap();
        shop.upsert_product(draft(3, "C"), Some("http://img/c".into()))
            .await
            .unwrap();

        let moves = shop.delete_product(2).await.unwrap().unwrap();
        assert_eq!(moves, vec![IdMove { from: 3, to: 2 }]);

        let stored: Product =
            serde_json::from_value(storage.get(&keys::product(2)).await.unwrap().unwrap())
                .unwrap();
        assert_eq!(stored.name, "C");
        assert_eq!(stored.id, 2);
        assert_eq!(stored.image_url.as_deref(), Some("http://img/c"));
        assert_eq!(storage.get(&keys::product(3)).await.unwrap(), None);
        assert_eq!(
            storage.get(keys::CATALOG_INDEX).await.unwrap(),
            Some(json!([1, 2]))
        );

        let calls = display.calls();
        assert!(calls.contains(&"remove:2".to_string()));
        assert!(calls.contains(&"remove:3".to_string()));
        assert!(calls.contains(&"render:2:C".to_string()));
    }

    #[tokio::test]
    async fn delete_unknown_product_is_none() {
        let (shop, _) = shop_with(Arc::new(MemoryStorage::new()));
        assert_eq!(shop.delete_product(9).await.unwrap(), None);
    }

    #[tokio::test]
    async fn failed_migration_keeps_old_record() {
        let storage = Arc::new(FailingKey {
            inner: MemoryStorage::new(),
            key: keys::product(1),
        });
        let (shop, _) = shop_with(storage.clone());
        // id 1 can never be written; seed 2 directly.
        shop.upsert_product(draft(2, "B"), None).await.unwrap();

        // Deleting nothing at 1; delete a later product to force 2 -> 1 after
        // inserting 3.
        shop.upsert_product(draft(3, "C"), None).await.unwrap();
        let moves = shop.delete_product(3).await.unwrap().unwrap();
        assert_eq!(moves, vec![IdMove { from: 2, to: 1 }]);

        // In memory the move happened; on disk the old record survived.
        assert_eq!(shop.products().await[0].id, 1);
        assert!(storage.get(&keys::product(2)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failed_migration_is_not_overwritten_by_later_moves() {
        let storage = Arc::new(FailingKey {
            inner: MemoryStorage::new(),
            key: keys::product(1),
        });
        let (shop, _) = shop_with(storage.clone());
        // Memory keeps A even though its record can't be written.
        assert!(shop.upsert_product(draft(1, "A"), None).await.is_err());
        shop.upsert_product(draft(2, "B"), None).await.unwrap();
        shop.upsert_product(draft(3, "C"), None).await.unwrap();

        let moves = shop.delete_product(1).await.unwrap().unwrap();
        assert_eq!(
            moves,
            vec![IdMove { from: 2, to: 1 }, IdMove { from: 3, to: 2 }]
        );

        let name_at = |id: ProductId| {
            let storage = storage.clone();
            async move {
                storage
                    .get(&keys::product(id))
                    .await
                    .unwrap()
                    .and_then(|v| serde_json::from_value::<Product>(v).ok())
                    .map(|p| p.name)
            }
        };
        // Neither B nor C was lost: both stay under their old keys.
        assert_eq!(name_at(2).await.as_deref(), Some("B"));
        assert_eq!(name_at(3).await.as_deref(), Some("C"));
        assert_eq!(name_at(1).await, None);

        let names: Vec<String> = shop.products().await.into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["B", "C"]);
    }

    #[tokio::test]
    async fn storage_failure_still_updates_memory() {
        let storage = Arc::new(FailingKey {
            inner: MemoryStorage::new(),
            key: keys::TICKER_TEXT.to_string(),
        });
        let (shop, display) = shop_with(storage);
        assert!(shop.set_ticker("Abierto").await.is_err());
        assert_eq!(shop.ticker().await.as_deref(), Some("Abierto"));
        assert!(display.calls().contains(&"ticker:Abierto".to_string()));
    }

    #[tokio::test]
    async fn chat_duplicates_are_stored_once() {
        let storage = Arc::new(MemoryStorage::new());
        let (shop, _) = shop_with(storage.clone());
        let entry = ChatHistoryEntry {
            text: Some("hola".into()),
            kind: ChatEntryKind::Received,
            sender: "Ana".into(),
            timestamp: 5,
            image_url: None,
        };
        assert!(shop.append_chat(entry.clone()).await.unwrap());
        assert!(!shop.append_chat(entry).await.unwrap());

        let stored = storage.get(keys::CHAT_HISTORY).await.unwrap().unwrap();
        assert_eq!(stored.as_array().map(|a| a.len()), Some(1));
    }

    #[tokio::test]
    async fn restore_rebuilds_state_and_skips_missing_records() {
        let storage = Arc::new(MemoryStorage::new());
        {
            let (shop, _) = shop_with(storage.clone());
            shop.upsert_product(draft(1, "A"), None).await.unwrap();
            shop.upsert_product(draft(2, "B"), None).await.unwrap();
            shop.set_ticker("Ofertas").await.unwrap();
            shop.set_payment_card(Some("9204 1111")).await.unwrap();
        }
        storage.remove(&keys::product(1)).await.unwrap();

        let display = Arc::new(RecordingDisplay::default());
        let shop = Shop::restore(storage, display.clone(), 100).await.unwrap();

        let names: Vec<_> = shop.products().await.into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["B"]);
        assert_eq!(shop.ticker().await.as_deref(), Some("Ofertas"));
        assert_eq!(shop.payment_card().await.as_deref(), Some("9204 1111"));
        assert!(display.calls().contains(&"render:2:B".to_string()));
    }

    #[tokio::test]
    async fn empty_ticker_clears_storage() {
        let storage = Arc::new(MemoryStorage::new());
        let (shop, _) = shop_with(storage.clone());
        shop.set_ticker("x").await.unwrap();
        shop.set_ticker("  ").await.unwrap();
        assert_eq!(shop.ticker().await, None);
        assert_eq!(storage.get(keys::TICKER_TEXT).await.unwrap(), None);
    }
}
