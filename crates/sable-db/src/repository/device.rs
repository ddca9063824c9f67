//! # Device Registry Repository
//!
//! Database operations for fiscal devices.
//!
//! Devices are never deleted. Deactivation flips `is_active`; fatal
//! gateway auth errors flip `submissions_locked`, which only
//! re-registration clears. The durable `last_receipt_global_no` counter
//! on this table is written exclusively by the chain manager.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use sable_core::FiscalDevice;

/// Row mirror of the `fiscal_devices` table.
#[derive(Debug, sqlx::FromRow)]
struct DeviceRow {
    device_id: i64,
    serial_no: String,
    taxpayer_name: String,
    taxpayer_tin: String,
    vat_number: Option<String>,
    is_vat_registered: bool,
    cert_valid_from: Option<DateTime<Utc>>,
    cert_valid_until: Option<DateTime<Utc>>,
    signing_seed: Option<Vec<u8>>,
    last_fiscal_day_no: Option<i64>,
    last_receipt_global_no: i64,
    is_active: bool,
    submissions_locked: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<DeviceRow> for FiscalDevice {
    fn from(row: DeviceRow) -> Self {
        FiscalDevice {
            device_id: row.device_id,
            serial_no: row.serial_no,
            taxpayer_name: row.taxpayer_name,
            taxpayer_tin: row.taxpayer_tin,
            vat_number: row.vat_number,
            is_vat_registered: row.is_vat_registered,
            cert_valid_from: row.cert_valid_from,
            cert_valid_until: row.cert_valid_until,
            signing_seed: row.signing_seed,
            last_fiscal_day_no: row.last_fiscal_day_no,
            last_receipt_global_no: row.last_receipt_global_no,
            is_active: row.is_active,
            submissions_locked: row.submissions_locked,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Repository for fiscal device operations.
#[derive(Debug, Clone)]
pub struct DeviceRepository {
    pool: SqlitePool,
}

impl DeviceRepository {
    /// Creates a new DeviceRepository.
    pub fn new(pool: SqlitePool) -> Self {
        DeviceRepository { pool }
    }

    /// Registers a device or refreshes its registration data.
    ///
    /// Counter fields are deliberately NOT written here: registration
    /// never resets chain state.
    pub async fn register(&self, device: &FiscalDevice) -> DbResult<()> {
        info!(device_id = device.device_id, "Registering fiscal device");

        sqlx::query(
            r#"
            INSERT INTO fiscal_devices (
                device_id, serial_no, taxpayer_name, taxpayer_tin, vat_number,
                is_vat_registered, cert_valid_from, cert_valid_until, signing_seed,
                last_fiscal_day_no, last_receipt_global_no,
                is_active, submissions_locked, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(device_id) DO UPDATE SET
                serial_no = excluded.serial_no,
                taxpayer_name = excluded.taxpayer_name,
                taxpayer_tin = excluded.taxpayer_tin,
                vat_number = excluded.vat_number,
                is_vat_registered = excluded.is_vat_registered,
                cert_valid_from = excluded.cert_valid_from,
                cert_valid_until = excluded.cert_valid_until,
                signing_seed = excluded.signing_seed,
                is_active = excluded.is_active,
                submissions_locked = 0,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(device.device_id)
        .bind(&device.serial_no)
        .bind(&device.taxpayer_name)
        .bind(&device.taxpayer_tin)
        .bind(&device.vat_number)
        .bind(device.is_vat_registered)
        .bind(device.cert_valid_from)
        .bind(device.cert_valid_until)
        .bind(&device.signing_seed)
        .bind(device.last_fiscal_day_no)
        .bind(device.last_receipt_global_no)
        .bind(device.is_active)
        .bind(device.submissions_locked)
        .bind(device.created_at)
        .bind(device.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets a device by its gateway-issued id.
    pub async fn get(&self, device_id: i64) -> DbResult<Option<FiscalDevice>> {
        let row: Option<DeviceRow> =
            sqlx::query_as("SELECT * FROM fiscal_devices WHERE device_id = ?1")
                .bind(device_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(FiscalDevice::from))
    }

    /// Gets a device, erroring when absent.
    pub async fn get_required(&self, device_id: i64) -> DbResult<FiscalDevice> {
        self.get(device_id)
            .await?
            .ok_or_else(|| DbError::not_found("FiscalDevice", device_id.to_string()))
    }

    /// Updates the VAT registration flag (registration collaborator).
    pub async fn set_vat_registered(&self, device_id: i64, is_vat_registered: bool) -> DbResult<()> {
        debug!(device_id, is_vat_registered, "Updating VAT registration");
        let result = sqlx::query(
            "UPDATE fiscal_devices SET is_vat_registered = ?2, updated_at = ?3 WHERE device_id = ?1",
        )
        .bind(device_id)
        .bind(is_vat_registered)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Self::affected_or_missing(result, device_id)
    }

    /// Deactivates a device. Devices are never deleted.
    pub async fn deactivate(&self, device_id: i64) -> DbResult<()> {
        info!(device_id, "Deactivating fiscal device");
        let result = sqlx::query(
            "UPDATE fiscal_devices SET is_active = 0, updated_at = ?2 WHERE device_id = ?1",
        )
        .bind(device_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Self::affected_or_missing(result, device_id)
    }

    /// Locks all submissions for a device (fatal gateway auth error).
    pub async fn lock_submissions(&self, device_id: i64) -> DbResult<()> {
        info!(device_id, "Locking device submissions");
        let result = sqlx::query(
            "UPDATE fiscal_devices SET submissions_locked = 1, updated_at = ?2 WHERE device_id = ?1",
        )
        .bind(device_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Self::affected_or_missing(result, device_id)
    }

    /// Clears the submission lock. Called from re-registration only.
    pub async fn unlock_submissions(&self, device_id: i64) -> DbResult<()> {
        info!(device_id, "Unlocking device submissions");
        let result = sqlx::query(
            "UPDATE fiscal_devices SET submissions_locked = 0, updated_at = ?2 WHERE device_id = ?1",
        )
        .bind(device_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Self::affected_or_missing(result, device_id)
    }

    fn affected_or_missing(
        result: sqlx::sqlite::SqliteQueryResult,
        device_id: i64,
    ) -> DbResult<()> {
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("FiscalDevice", device_id.to_string()));
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    fn sample_device(device_id: i64) -> FiscalDevice {
        let now = Utc::now();
        FiscalDevice {
            device_id,
            serial_no: "SN-001".into(),
            taxpayer_name: "Acme Trading".into(),
            taxpayer_tin: "1234567890".into(),
            vat_number: Some("220001122".into()),
            is_vat_registered: true,
            cert_valid_from: Some(now - chrono::Duration::days(1)),
            cert_valid_until: Some(now + chrono::Duration::days(364)),
            signing_seed: Some(vec![7u8; 32]),
            last_fiscal_day_no: None,
            last_receipt_global_no: 0,
            is_active: true,
            submissions_locked: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let device = sample_device(321);

        db.devices().register(&device).await.unwrap();
        let loaded = db.devices().get_required(321).await.unwrap();

        assert_eq!(loaded.taxpayer_tin, "1234567890");
        assert_eq!(loaded.signing_seed, Some(vec![7u8; 32]));
        assert_eq!(loaded.last_receipt_global_no, 0);
    }

    #[tokio::test]
    async fn test_reregistration_clears_lock_but_not_counter() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let device = sample_device(321);
        db.devices().register(&device).await.unwrap();

        db.devices().lock_submissions(321).await.unwrap();
        assert!(db.devices().get_required(321).await.unwrap().submissions_locked);

        // bump the durable counter directly to simulate confirmed receipts
        sqlx::query("UPDATE fiscal_devices SET last_receipt_global_no = 7 WHERE device_id = 321")
            .execute(db.pool())
            .await
            .unwrap();

        db.devices().register(&device).await.unwrap();
        let loaded = db.devices().get_required(321).await.unwrap();
        assert!(!loaded.submissions_locked);
        assert_eq!(loaded.last_receipt_global_no, 7);
    }

    #[tokio::test]
    async fn test_deactivate() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.devices().register(&sample_device(321)).await.unwrap();

        db.devices().deactivate(321).await.unwrap();
        assert!(!db.devices().get_required(321).await.unwrap().is_active);
    }

    #[tokio::test]
    async fn test_missing_device() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.devices().get(999).await.unwrap().is_none());
        assert!(matches!(
            db.devices().lock_submissions(999).await,
            Err(DbError::NotFound { .. })
        ));
    }
}
