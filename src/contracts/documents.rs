use serde::{Deserialize, Serialize};

use crate::contracts::error::StorageError;
use crate::contracts::sequence::CounterStore;

/// Document store for purchases, inventory and the order counter.
///
/// # Invariants
/// - Every acknowledged `add_purchase` is returned by `list_purchases`
/// - Stock only changes through the transactional `add_stock`
pub trait DocumentStore: CounterStore {
    /// Persists a purchase document.
    fn add_purchase(&self, purchase: &PurchaseRecord) -> Result<(), StorageError>;

    /// Fetches a purchase by id.
    fn get_purchase(&self, id: &str) -> Result<Option<PurchaseRecord>, StorageError>;

    /// Lists all purchases ordered by order number.
    fn list_purchases(&self) -> Result<Vec<PurchaseRecord>, StorageError>;

    /// Lists purchases whose customer fields contain `term`, ignoring case.
    fn search_purchases(&self, term: &str) -> Result<Vec<PurchaseRecord>, StorageError> {
        let needle = term.to_lowercase();
        Ok(self
            .list_purchases()?
            .into_iter()
            .filter(|p| p.matches(&needle))
            .collect())
    }

    /// Adds `cantidad` units to the named item, creating it if absent.
    /// Fails with `StorageError::Conflict` when a concurrent update wins.
    fn add_stock(&self, nombre: &str, cantidad: u64) -> Result<StockItem, StorageError>;

    /// Lists inventory ordered by name.
    fn list_stock(&self) -> Result<Vec<StockItem>, StorageError>;
}

/// A customer purchase with its allocated order number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRecord {
    pub id: String,
    pub numero_pedido: u64,
    pub usuario: String,
    pub email: String,
    pub contacto: String,
    pub nombre: String,
    pub image_url: String,
    pub created_at_ms: i64,
}

impl PurchaseRecord {
    /// `needle` must already be lowercase.
    fn matches(&self, needle: &str) -> bool {
        [&self.usuario, &self.email, &self.contacto, &self.nombre]
            .iter()
            .any(|field| field.to_lowercase().contains(needle))
    }
}

/// An inventory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItem {
    pub nombre: String,
    pub stock: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn purchase() -> PurchaseRecord {
        PurchaseRecord {
            id: "a1".into(),
            numero_pedido: 7,
            usuario: "LuciaG".into(),
            email: "lucia@example.com".into(),
            contacto: "+54 11 5555".into(),
            nombre: "Lucía Gómez".into(),
            image_url: "https://img/a1.png".into(),
            created_at_ms: 0,
        }
    }

    #[test]
    fn matches_is_case_insensitive_across_customer_fields() {
        let p = purchase();
        assert!(p.matches("lucia"));
        assert!(p.matches("example.com"));
        assert!(p.matches("5555"));
        assert!(p.matches("gómez"));
        assert!(!p.matches("img"));
    }

    #[test]
    fn purchase_serializes_with_camel_case_fields() {
        let json = serde_json::to_value(purchase()).unwrap();
        assert_eq!(json["numeroPedido"], 7);
        assert_eq!(json["imageUrl"], "https://img/a1.png");
        assert_eq!(json["createdAtMs"], 0);
    }
}
