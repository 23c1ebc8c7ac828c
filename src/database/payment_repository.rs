use crate::database::error::DatabaseError;
use crate::database::repository::{
    AdminUpdate, NewPayment, PaymentRecord, PaymentStore, PaymentUpdate,
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgArguments;
use sqlx::query::QueryAs;
use sqlx::{PgConnection, PgPool, Postgres};
use uuid::Uuid;

const PAYMENT_COLUMNS: &str = "id, merchant_request_id, checkout_request_id, phone_number, amount, \
     status, result_code, result_desc, mpesa_receipt_number, transaction_date, failure_reason, \
     paid_at, raw_response, created_at, updated_at";

/// Full-row insert; binds follow [`bind_record`].
const INSERT_RECORD: &str = "INSERT INTO payments (id, checkout_request_id, merchant_request_id, \
     phone_number, amount, status, result_code, result_desc, mpesa_receipt_number, \
     transaction_date, failure_reason, paid_at, raw_response)
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)";

/// Status after the merge: a terminal row keeps its status.
const MERGED_STATUS: &str =
    "(CASE WHEN payments.status IN ('completed', 'failed') THEN payments.status ELSE EXCLUDED.status END)";

type RecordQuery<'q> = QueryAs<'q, Postgres, PaymentRecord, PgArguments>;

fn bind_record<'q>(query: RecordQuery<'q>, record: &'q PaymentRecord) -> RecordQuery<'q> {
    query
        .bind(record.id)
        .bind(&record.checkout_request_id)
        .bind(&record.merchant_request_id)
        .bind(&record.phone_number)
        .bind(&record.amount)
        .bind(record.status.as_str())
        .bind(record.result_code)
        .bind(&record.result_desc)
        .bind(&record.mpesa_receipt_number)
        .bind(record.transaction_date)
        .bind(&record.failure_reason)
        .bind(record.paid_at)
        .bind(&record.raw_response)
}

/// Incoming value wins on a pending row; a settled row only fills gaps.
fn settled_merge(column: &str) -> String {
    format!(
        "CASE WHEN payments.status IN ('completed', 'failed') \
         THEN COALESCE(payments.{c}, EXCLUDED.{c}) \
         ELSE COALESCE(EXCLUDED.{c}, payments.{c}) END",
        c = column
    )
}

/// Postgres-backed payment store
pub struct PgPaymentRepository {
    pool: PgPool,
}

impl PgPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn upsert_sql() -> String {
        format!(
            "{insert}
             ON CONFLICT (checkout_request_id) DO UPDATE SET
                 status = {status},
                 merchant_request_id = {merchant_request_id},
                 phone_number = {phone_number},
                 amount = {amount},
                 transaction_date = {transaction_date},
                 result_code = {result_code},
                 result_desc = {result_desc},
                 mpesa_receipt_number = CASE WHEN {status} = 'failed'
                     THEN payments.mpesa_receipt_number
                     ELSE {mpesa_receipt_number} END,
                 failure_reason = CASE WHEN {status} = 'completed'
                     THEN payments.failure_reason
                     ELSE {failure_reason} END,
                 paid_at = CASE WHEN {status} = 'completed'
                     THEN COALESCE(payments.paid_at, EXCLUDED.paid_at)
                     ELSE payments.paid_at END,
                 raw_response = COALESCE(EXCLUDED.raw_response, payments.raw_response),
                 updated_at = NOW()
             RETURNING {columns}",
            insert = INSERT_RECORD,
            status = MERGED_STATUS,
            merchant_request_id = settled_merge("merchant_request_id"),
            phone_number = settled_merge("phone_number"),
            amount = settled_merge("amount"),
            transaction_date = settled_merge("transaction_date"),
            result_code = settled_merge("result_code"),
            result_desc = settled_merge("result_desc"),
            mpesa_receipt_number = settled_merge("mpesa_receipt_number"),
            failure_reason = settled_merge("failure_reason"),
            columns = PAYMENT_COLUMNS,
        )
    }

    async fn insert_record(
        executor: &mut PgConnection,
        record: &PaymentRecord,
    ) -> Result<PaymentRecord, DatabaseError> {
        let sql = format!("{} RETURNING {}", INSERT_RECORD, PAYMENT_COLUMNS);
        bind_record(sqlx::query_as::<_, PaymentRecord>(&sql), record)
            .fetch_one(executor)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn write_back(
        executor: &mut PgConnection,
        record: &PaymentRecord,
    ) -> Result<PaymentRecord, DatabaseError> {
        sqlx::query_as::<_, PaymentRecord>(&format!(
            "UPDATE payments
             SET merchant_request_id = $2, phone_number = $3, amount = $4, status = $5,
                 result_code = $6, result_desc = $7, mpesa_receipt_number = $8,
                 transaction_date = $9, failure_reason = $10, paid_at = $11,
                 raw_response = $12, updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(record.id)
        .bind(&record.merchant_request_id)
        .bind(&record.phone_number)
        .bind(&record.amount)
        .bind(record.status.as_str())
        .bind(record.result_code)
        .bind(&record.result_desc)
        .bind(&record.mpesa_receipt_number)
        .bind(record.transaction_date)
        .bind(&record.failure_reason)
        .bind(record.paid_at)
        .bind(&record.raw_response)
        .fetch_one(executor)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}

#[async_trait]
impl PaymentStore for PgPaymentRepository {
    async fn create(&self, payment: NewPayment) -> Result<PaymentRecord, DatabaseError> {
        sqlx::query_as::<_, PaymentRecord>(&format!(
            "INSERT INTO payments (merchant_request_id, checkout_request_id, phone_number, amount, status, raw_response)
             VALUES ($1, $2, $3, $4, 'pending', $5)
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(&payment.merchant_request_id)
        .bind(&payment.checkout_request_id)
        .bind(&payment.phone_number)
        .bind(&payment.amount)
        .bind(&payment.raw_response)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PaymentRecord>, DatabaseError> {
        sqlx::query_as::<_, PaymentRecord>(&format!(
            "SELECT {} FROM payments WHERE id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_by_checkout_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        sqlx::query_as::<_, PaymentRecord>(&format!(
            "SELECT {} FROM payments WHERE checkout_request_id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(checkout_request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_by_merchant_request_id(
        &self,
        merchant_request_id: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        sqlx::query_as::<_, PaymentRecord>(&format!(
            "SELECT {} FROM payments
             WHERE merchant_request_id = $1
             ORDER BY created_at DESC
             LIMIT 1",
            PAYMENT_COLUMNS
        ))
        .bind(merchant_request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn upsert_by_checkout_id(
        &self,
        checkout_request_id: &str,
        update: PaymentUpdate,
    ) -> Result<PaymentRecord, DatabaseError> {
        // Insert values are the update merged onto a blank pending row.
        let mut seed = PaymentRecord::pending(Some(checkout_request_id.to_string()), Utc::now());
        seed.apply(&update, Utc::now());

        let sql = Self::upsert_sql();
        bind_record(sqlx::query_as::<_, PaymentRecord>(&sql), &seed)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn merge_by_merchant_id(
        &self,
        merchant_request_id: &str,
        update: PaymentUpdate,
    ) -> Result<PaymentRecord, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        // merchant_request_id is not unique; the lock serialises callers
        // that would otherwise both miss and both insert.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(merchant_request_id)
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let current = sqlx::query_as::<_, PaymentRecord>(&format!(
            "SELECT {} FROM payments
             WHERE merchant_request_id = $1
             ORDER BY created_at DESC
             LIMIT 1
             FOR UPDATE",
            PAYMENT_COLUMNS
        ))
        .bind(merchant_request_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let now = Utc::now();
        let saved = match current {
            Some(mut record) => {
                record.apply(&update, now);
                Self::write_back(&mut *tx, &record).await?
            }
            None => {
                let mut record = PaymentRecord::pending(None, now);
                record.merchant_request_id = Some(merchant_request_id.to_string());
                record.apply(&update, now);
                Self::insert_record(&mut *tx, &record).await?
            }
        };

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(saved)
    }

    async fn create_from_update(&self, update: PaymentUpdate) -> Result<PaymentRecord, DatabaseError> {
        let now = Utc::now();
        let mut record = PaymentRecord::pending(None, now);
        record.apply(&update, now);

        let mut conn = self.pool.acquire().await.map_err(DatabaseError::from_sqlx)?;
        Self::insert_record(&mut *conn, &record).await
    }

    async fn list(&self) -> Result<Vec<PaymentRecord>, DatabaseError> {
        sqlx::query_as::<_, PaymentRecord>(&format!(
            "SELECT {} FROM payments ORDER BY created_at DESC",
            PAYMENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn update_admin(
        &self,
        id: Uuid,
        update: AdminUpdate,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let current = sqlx::query_as::<_, PaymentRecord>(&format!(
            "SELECT {} FROM payments WHERE id = $1 FOR UPDATE",
            PAYMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let Some(mut record) = current else {
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            return Ok(None);
        };

        record.apply_admin(&update, Utc::now());
        let saved = Self::write_back(&mut *tx, &record).await?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(Some(saved))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM payments WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        crate::database::health_check(&self.pool).await
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
