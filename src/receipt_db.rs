use rusqlite::{Connection, OptionalExtension, params};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use time::Date;
use tracing::{debug, info};

use crate::catalog::{Product, ProductCatalog, cosine_similarity, normalize_name};
use crate::error::{ReceiptError, Result};
use crate::prices::{LastPrice, PriceHistory, PriceObservation};

/// SQLite-backed catalog, price history and receipt log.
pub struct ReceiptStore {
    conn: Mutex<Connection>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredReceipt {
    pub uid: String,
    pub store_id: Option<i64>,
    pub receipt_date: Option<Date>,
    pub total: Option<f64>,
    pub item_count: usize,
    /// "processed" or "needs_review"
    pub status: String,
    pub parsed_json: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreCounts {
    pub products: usize,
    pub stores: usize,
    pub observations: usize,
    pub receipts: usize,
}

const PRODUCT_COLUMNS: &str = "id, name, normalized_name, category, brand, embedding";

impl ReceiptStore {
    /// Open (or create) the database file, creating parent directories as needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(db_path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS products (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                normalized_name TEXT NOT NULL UNIQUE,
                category TEXT NOT NULL,
                brand TEXT,
                embedding BLOB,
                last_price REAL,
                last_price_date TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS stores (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS price_observations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                product_id INTEGER NOT NULL,
                store_id INTEGER NOT NULL,
                price REAL NOT NULL,
                unit_price REAL NOT NULL,
                unit TEXT NOT NULL,
                date TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (product_id) REFERENCES products(id),
                FOREIGN KEY (store_id) REFERENCES stores(id)
            );

            CREATE TABLE IF NOT EXISTS receipts (
                uid TEXT PRIMARY KEY,
                store_id INTEGER,
                receipt_date TEXT,
                total REAL,
                item_count INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                parsed_json TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (store_id) REFERENCES stores(id)
            );

            CREATE INDEX IF NOT EXISTS idx_observations_product_date
                ON price_observations(product_id, date);
            CREATE INDEX IF NOT EXISTS idx_observations_store
                ON price_observations(store_id);
            CREATE INDEX IF NOT EXISTS idx_receipts_status ON receipts(status);
            ",
        )?;

        info!("Database initialized successfully");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ReceiptError::Lock(e.to_string()))
    }

    /// Stable id for a receipt: sha256 of its raw text.
    pub fn generate_uid(raw_text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(raw_text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Insert-if-absent on the store name; returns its id.
    pub fn upsert_store(&self, name: &str) -> Result<i64> {
        let name = name.trim().to_lowercase();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO stores (name) VALUES (?1) ON CONFLICT(name) DO NOTHING",
            params![name],
        )?;
        let id = conn.query_row(
            "SELECT id FROM stores WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Insert or update a receipt record.
    pub fn save_receipt(&self, receipt: &StoredReceipt) -> Result<()> {
        write_receipt(&*self.conn()?, receipt)?;
        info!(uid = %receipt.uid, status = %receipt.status, "Receipt stored");
        Ok(())
    }

    /// Write a receipt's price observations, their last-price updates and the
    /// receipt row in one transaction. Nothing is kept if any write fails.
    pub fn record_receipt(
        &self,
        observations: &[PriceObservation],
        receipt: &StoredReceipt,
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for obs in observations {
            insert_observation(&tx, obs)?;
            update_last_price(&tx, obs.product_id, obs.price, obs.date)?;
        }
        write_receipt(&tx, receipt)?;
        tx.commit()?;

        info!(
            uid = %receipt.uid,
            status = %receipt.status,
            observations = observations.len(),
            "Receipt stored"
        );
        Ok(())
    }

    pub fn get_receipt(&self, uid: &str) -> Result<Option<StoredReceipt>> {
        let conn = self.conn()?;
        let receipt = conn
            .query_row(
                "SELECT uid, store_id, receipt_date, total, item_count, status, parsed_json
                 FROM receipts
                 WHERE uid = ?1",
                params![uid],
                |row| {
                    Ok(StoredReceipt {
                        uid: row.get(0)?,
                        store_id: row.get(1)?,
                        receipt_date: row.get(2)?,
                        total: row.get(3)?,
                        item_count: row.get::<_, i64>(4)? as usize,
                        status: row.get(5)?,
                        parsed_json: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(receipt)
    }

    pub fn get_product(&self, id: i64) -> Result<Option<Product>> {
        let conn = self.conn()?;
        let product = conn
            .query_row(
                &format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1"),
                params![id],
                Self::row_to_product,
            )
            .optional()?;
        Ok(product)
    }

    pub fn get_counts(&self) -> Result<StoreCounts> {
        let conn = self.conn()?;
        let count = |table: &str| -> Result<usize> {
            let n: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            Ok(n as usize)
        };
        Ok(StoreCounts {
            products: count("products")?,
            stores: count("stores")?,
            observations: count("price_observations")?,
            receipts: count("receipts")?,
        })
    }

    /// Helper: map a row with the product projection to `Product`.
    fn row_to_product(row: &rusqlite::Row<'_>) -> rusqlite::Result<Product> {
        let blob: Option<Vec<u8>> = row.get(5)?;
        Ok(Product {
            id: row.get(0)?,
            name: row.get(1)?,
            normalized_name: row.get(2)?,
            category: row.get(3)?,
            brand: row.get(4)?,
            embedding: blob.map(|b| decode_embedding(&b)),
        })
    }
}

fn write_receipt(conn: &Connection, receipt: &StoredReceipt) -> Result<()> {
    conn.execute(
        "INSERT INTO receipts
            (uid, store_id, receipt_date, total, item_count, status, parsed_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(uid) DO UPDATE SET
            store_id = excluded.store_id,
            receipt_date = excluded.receipt_date,
            total = excluded.total,
            item_count = excluded.item_count,
            status = excluded.status,
            parsed_json = excluded.parsed_json",
        params![
            receipt.uid,
            receipt.store_id,
            receipt.receipt_date,
            receipt.total,
            receipt.item_count as i64,
            receipt.status,
            receipt.parsed_json,
        ],
    )?;
    Ok(())
}

fn insert_observation(conn: &Connection, obs: &PriceObservation) -> Result<i64> {
    conn.execute(
        "INSERT INTO price_observations
            (product_id, store_id, price, unit_price, unit, date)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            obs.product_id,
            obs.store_id,
            obs.price,
            obs.unit_price,
            obs.unit,
            obs.date,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Only moves the cached price forward in time.
fn update_last_price(conn: &Connection, product_id: i64, price: f64, date: Date) -> Result<()> {
    conn.execute(
        "UPDATE products
         SET last_price = ?1, last_price_date = ?2
         WHERE id = ?3 AND (last_price_date IS NULL OR last_price_date <= ?2)",
        params![price, date, product_id],
    )?;
    Ok(())
}

fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

impl ProductCatalog for ReceiptStore {
    fn all_products(&self) -> Result<Vec<Product>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], Self::row_to_product)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn nearest(&self, embedding: &[f32], k: usize) -> Result<Vec<(Product, f32)>> {
        let mut scored: Vec<(Product, f32)> = self
            .all_products()?
            .into_iter()
            .filter_map(|p| {
                let score = cosine_similarity(embedding, p.embedding.as_deref()?);
                Some((p, score))
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    fn upsert_product(&self, name: &str, category: &str, brand: Option<&str>) -> Result<Product> {
        let normalized = normalize_name(name);
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO products (name, normalized_name, category, brand)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(normalized_name) DO NOTHING",
            params![name.trim(), normalized, category, brand],
        )?;
        if inserted > 0 {
            info!(name = %name, category = %category, "Product created");
        }

        let product = conn.query_row(
            &format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE normalized_name = ?1"),
            params![normalized],
            Self::row_to_product,
        )?;
        Ok(product)
    }

    fn set_embedding(&self, product_id: i64, embedding: &[f32]) -> Result<()> {
        self.conn()?.execute(
            "UPDATE products SET embedding = ?1 WHERE id = ?2",
            params![encode_embedding(embedding), product_id],
        )?;
        debug!(product_id, dimension = embedding.len(), "Embedding stored");
        Ok(())
    }
}

impl PriceHistory for ReceiptStore {
    fn insert_observation(&self, obs: &PriceObservation) -> Result<i64> {
        insert_observation(&*self.conn()?, obs)
    }

    fn observations(
        &self,
        product_id: i64,
        store_id: Option<i64>,
        since: Date,
    ) -> Result<Vec<PriceObservation>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT product_id, store_id, price, unit_price, unit, date
             FROM price_observations
             WHERE product_id = ?1
               AND (?2 IS NULL OR store_id = ?2)
               AND date >= ?3
             ORDER BY date, id",
        )?;
        let rows = stmt.query_map(params![product_id, store_id, since], |row| {
            Ok(PriceObservation {
                product_id: row.get(0)?,
                store_id: row.get(1)?,
                price: row.get(2)?,
                unit_price: row.get(3)?,
                unit: row.get(4)?,
                date: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn update_last_price(&self, product_id: i64, price: f64, date: Date) -> Result<()> {
        update_last_price(&*self.conn()?, product_id, price, date)
    }

    fn last_price(&self, product_id: i64) -> Result<Option<LastPrice>> {
        let conn = self.conn()?;
        let row: Option<(Option<f64>, Option<Date>)> = conn
            .query_row(
                "SELECT last_price, last_price_date FROM products WHERE id = ?1",
                params![product_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(match row {
            Some((Some(price), Some(date))) => Some(LastPrice { price, date }),
            _ => None,
        })
    }

    fn store_name(&self, store_id: i64) -> Result<Option<String>> {
        let conn = self.conn()?;
        let name = conn
            .query_row(
                "SELECT name FROM stores WHERE id = ?1",
                params![store_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(name)
    }
}
