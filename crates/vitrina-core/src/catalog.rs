//! In-memory product catalog keyed by id, rendered in ascending id order.

use std::collections::BTreeMap;

use crate::{
    command::ProductDraft,
    domain::{Product, ProductId},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertKind {
    Inserted,
    Updated,
}

/// One id change produced by renumbering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdMove {
    pub from: ProductId,
    pub to: ProductId,
}

#[derive(Clone, Debug, Default)]
pub struct Catalog {
    products: BTreeMap<ProductId, Product>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_products(products: impl IntoIterator<Item = Product>) -> Self {
        Self {
            products: products.into_iter().map(|p| (p.id, p)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn get(&self, id: ProductId) -> Option<&Product> {
        self.products.get(&id)
    }

    /// Ids in display order.
    pub fn ids(&self) -> Vec<ProductId> {
        self.products.keys().copied().collect()
    }

    /// Products in display order.
    pub fn iter(&self) -> impl Iterator<Item = &Product> {
        self.products.values()
    }

    /// Insert or overwrite a product. An update without an image keeps the
    /// image already on record.
    pub fn upsert(&mut self, draft: ProductDraft, image_url: Option<String>) -> (UpsertKind, Product) {
        match self.products.get_mut(&draft.id) {
            Some(existing) => {
                existing.name = draft.name;
                existing.description = draft.description;
                existing.price_primary = draft.price_primary;
                existing.price_secondary = draft.price_secondary;
                if image_url.is_some() {
                    existing.image_url = image_url;
                }
                (UpsertKind::Updated, existing.clone())
            }
            None => {
                let product = Product {
                    id: draft.id,
                    name: draft.name,
                    description: draft.description,
                    price_primary: draft.price_primary,
                    price_secondary: draft.price_secondary,
                    image_url,
                };
                self.products.insert(product.id, product.clone());
                (UpsertKind::Inserted, product)
            }
        }
    }

    pub fn remove(&mut self, id: ProductId) -> Option<Product> {
        self.products.remove(&id)
    }

    /// Reassign ids `1..=N` in display order and return the moves made, in
    /// ascending target order. Empty when the ids are already dense.
    pub fn renumber(&mut self) -> Vec<IdMove> {
        let moves: Vec<IdMove> = self
            .products
            .keys()
            .enumerate()
            .filter_map(|(idx, &from)| {
                let to = idx as ProductId + 1;
                (from != to).then_some(IdMove { from, to })
            })
            .collect();

        if moves.is_empty() {
            return moves;
        }

        let old = std::mem::take(&mut self.products);
        for (idx, (_, mut product)) in old.into_iter().enumerate() {
            product.id = idx as ProductId + 1;
            self.products.insert(product.id, product);
        }
        moves
    }
}
