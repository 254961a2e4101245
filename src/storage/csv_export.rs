//! CSV export of the purchase collection.

use chrono::{DateTime, SecondsFormat};
use serde::Serialize;

use crate::contracts::{PurchaseRecord, StorageError};

/// One CSV row. Field order is the column order.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PurchaseRow<'a> {
    numero_pedido: u64,
    usuario: &'a str,
    email: &'a str,
    contacto: &'a str,
    nombre: &'a str,
    image_url: &'a str,
    fecha: String,
}

const HEADER: [&str; 7] = [
    "numeroPedido",
    "usuario",
    "email",
    "contacto",
    "nombre",
    "imageUrl",
    "fecha",
];

/// Renders purchases as CSV with a header row, even when empty.
pub fn purchases_to_csv(purchases: &[PurchaseRecord]) -> Result<Vec<u8>, StorageError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    writer
        .write_record(HEADER)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;

    for purchase in purchases {
        writer
            .serialize(PurchaseRow {
                numero_pedido: purchase.numero_pedido,
                usuario: &purchase.usuario,
                email: &purchase.email,
                contacto: &purchase.contacto,
                nombre: &purchase.nombre,
                image_url: &purchase.image_url,
                fecha: format_timestamp(purchase.created_at_ms),
            })
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
    }

    writer
        .into_inner()
        .map_err(|e| StorageError::Serialization(e.to_string()))
}

fn format_timestamp(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}
