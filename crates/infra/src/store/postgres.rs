//! Postgres-backed stores.
//!
//! ## Atomicity
//!
//! Ledger appends lock the account row with `SELECT … FOR UPDATE`, decide the
//! entry through the `Account` aggregate, then insert the entry and update the
//! balance in the same transaction. Concurrent debits and credits on one
//! account therefore serialize on the row lock and never act on a stale
//! balance.
//!
//! Payment resolution locks the payment row the same way and performs the
//! ledger credit inside that transaction, so a duplicate delivery blocks until
//! the first commits and then observes a non-pending status.
//!
//! ## Error Mapping
//!
//! | SQLx error | Postgres code | `StoreError` |
//! |---|---|---|
//! | Database (unique violation) | `23505` | `AlreadyExists` |
//! | Database (check violation) | `23514` | `Storage` |
//! | Database (other) | any | `Storage` |
//! | PoolClosed / other | n/a | `Storage` |

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use creditscribe_core::{AccountId, EntryId, JobId, PaymentId};
use creditscribe_ledger::{Account, LedgerCommand, LedgerEntry};
use creditscribe_payments::{Payment, PaymentResolution, PaymentStatus};
use creditscribe_transcription::TranscriptionJob;

use super::{
    JobStore, LedgerStore, PageRequest, PaymentStore, ResolvedPayment, SIGNUP_CREDITS_DESCRIPTION,
};
use crate::error::StoreError;

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id          UUID PRIMARY KEY,
    email       TEXT NOT NULL UNIQUE,
    plan        TEXT NOT NULL DEFAULT 'free',
    balance     BIGINT NOT NULL CHECK (balance >= 0),
    version     BIGINT NOT NULL DEFAULT 0,
    created_at  TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS ledger_entries (
    seq             BIGSERIAL UNIQUE,
    id              UUID PRIMARY KEY,
    account_id      UUID NOT NULL REFERENCES accounts(id),
    job_id          UUID NULL,
    direction       TEXT NOT NULL CHECK (direction IN ('debit', 'credit')),
    amount          BIGINT NOT NULL CHECK (amount > 0),
    balance_before  BIGINT NOT NULL,
    balance_after   BIGINT NOT NULL CHECK (balance_after >= 0),
    description     TEXT NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS ledger_entries_account_idx ON ledger_entries (account_id, seq);
CREATE INDEX IF NOT EXISTS ledger_entries_job_idx ON ledger_entries (job_id) WHERE job_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS transcriptions (
    id               UUID PRIMARY KEY,
    account_id       UUID NOT NULL REFERENCES accounts(id),
    file_name        TEXT NOT NULL,
    file_url         TEXT NOT NULL,
    file_size        BIGINT NOT NULL,
    language         TEXT NOT NULL,
    status           TEXT NOT NULL,
    provider_job_id  TEXT NULL,
    transcript_text  TEXT NULL,
    srt_content      TEXT NULL,
    vtt_content      TEXT NULL,
    duration_secs    BIGINT NULL,
    credits_charged  BIGINT NULL,
    error_message    TEXT NULL,
    created_at       TIMESTAMPTZ NOT NULL,
    updated_at       TIMESTAMPTZ NOT NULL,
    completed_at     TIMESTAMPTZ NULL
);
CREATE INDEX IF NOT EXISTS transcriptions_account_idx ON transcriptions (account_id, created_at DESC);

CREATE TABLE IF NOT EXISTS payments (
    id                   UUID PRIMARY KEY,
    account_id           UUID NOT NULL REFERENCES accounts(id),
    provider_payment_id  TEXT NULL,
    preference_id        TEXT NULL,
    status               TEXT NOT NULL,
    amount_cents         BIGINT NOT NULL,
    currency             TEXT NOT NULL,
    credits              BIGINT NOT NULL,
    package_id           TEXT NOT NULL,
    package_name         TEXT NOT NULL,
    payment_method       TEXT NULL,
    details              JSONB NULL,
    created_at           TIMESTAMPTZ NOT NULL,
    updated_at           TIMESTAMPTZ NOT NULL,
    completed_at         TIMESTAMPTZ NULL
);
CREATE INDEX IF NOT EXISTS payments_account_idx ON payments (account_id, created_at DESC);
CREATE INDEX IF NOT EXISTS payments_provider_idx ON payments (provider_payment_id);
"#;

const JOB_COLUMNS: &str = "id, account_id, file_name, file_url, file_size, language, status, provider_job_id, \
     transcript_text, srt_content, vtt_content, duration_secs, credits_charged, error_message, \
     created_at, updated_at, completed_at";

const PAYMENT_COLUMNS: &str = "id, account_id, provider_payment_id, preference_id, status, amount_cents, \
     currency, credits, package_id, package_name, payment_method, details, created_at, updated_at, completed_at";

const ENTRY_COLUMNS: &str =
    "id, account_id, job_id, direction, amount, balance_before, balance_after, description, created_at";

/// Postgres implementation of every store trait.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::AlreadyExists(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Storage(format!("connection pool closed in {operation}")),
        sqlx::Error::RowNotFound => StoreError::NotFound(operation.to_string()),
        other => StoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Storage(format!("failed to decode column {name}: {e}")))
}

fn account_from_row(row: &PgRow) -> Result<Account, StoreError> {
    let plan: String = column(row, "plan")?;
    let version: i64 = column(row, "version")?;
    Ok(Account::restore(
        AccountId::from_uuid(column(row, "id")?),
        column(row, "email")?,
        plan.parse()?,
        column(row, "balance")?,
        u64::try_from(version).unwrap_or_default(),
        column(row, "created_at")?,
    ))
}

fn entry_from_row(row: &PgRow) -> Result<LedgerEntry, StoreError> {
    let direction: String = column(row, "direction")?;
    let job_id: Option<Uuid> = column(row, "job_id")?;
    Ok(LedgerEntry {
        id: EntryId::from_uuid(column(row, "id")?),
        account_id: AccountId::from_uuid(column(row, "account_id")?),
        job_id: job_id.map(JobId::from_uuid),
        direction: direction.parse()?,
        amount: column(row, "amount")?,
        balance_before: column(row, "balance_before")?,
        balance_after: column(row, "balance_after")?,
        description: column(row, "description")?,
        created_at: column(row, "created_at")?,
    })
}

fn job_from_row(row: &PgRow) -> Result<TranscriptionJob, StoreError> {
    let status: String = column(row, "status")?;
    Ok(TranscriptionJob {
        id: JobId::from_uuid(column(row, "id")?),
        account_id: AccountId::from_uuid(column(row, "account_id")?),
        file_name: column(row, "file_name")?,
        file_url: column(row, "file_url")?,
        file_size: column(row, "file_size")?,
        language: column(row, "language")?,
        status: status.parse()?,
        provider_job_id: column(row, "provider_job_id")?,
        transcript_text: column(row, "transcript_text")?,
        srt_content: column(row, "srt_content")?,
        vtt_content: column(row, "vtt_content")?,
        duration_secs: column(row, "duration_secs")?,
        credits_charged: column(row, "credits_charged")?,
        error_message: column(row, "error_message")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
        completed_at: column(row, "completed_at")?,
    })
}

fn payment_from_row(row: &PgRow) -> Result<Payment, StoreError> {
    let status: String = column(row, "status")?;
    Ok(Payment {
        id: PaymentId::from_uuid(column(row, "id")?),
        account_id: AccountId::from_uuid(column(row, "account_id")?),
        provider_payment_id: column(row, "provider_payment_id")?,
        preference_id: column(row, "preference_id")?,
        status: status.parse()?,
        amount_cents: column(row, "amount_cents")?,
        currency: column(row, "currency")?,
        credits: column(row, "credits")?,
        package_id: column(row, "package_id")?,
        package_name: column(row, "package_name")?,
        payment_method: column(row, "payment_method")?,
        details: column(row, "details")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
        completed_at: column(row, "completed_at")?,
    })
}

/// Lock the account row, decide the entry, write entry + balance.
async fn post_in_tx(
    tx: &mut Transaction<'static, Postgres>,
    account_id: AccountId,
    command: &LedgerCommand,
) -> Result<LedgerEntry, StoreError> {
    let row = sqlx::query(
        "SELECT id, email, plan, balance, version, created_at FROM accounts WHERE id = $1 FOR UPDATE",
    )
    .bind(account_id.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_account", e))?
    .ok_or_else(|| StoreError::not_found(format!("account {account_id}")))?;

    let mut account = account_from_row(&row)?;
    let entry = account.post(command)?;

    sqlx::query(
        r#"
        INSERT INTO ledger_entries
            (id, account_id, job_id, direction, amount, balance_before, balance_after, description, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(entry.id.as_uuid())
    .bind(entry.account_id.as_uuid())
    .bind(entry.job_id.map(Uuid::from))
    .bind(entry.direction.as_str())
    .bind(entry.amount)
    .bind(entry.balance_before)
    .bind(entry.balance_after)
    .bind(&entry.description)
    .bind(entry.created_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_entry", e))?;

    sqlx::query("UPDATE accounts SET balance = $2, version = version + 1 WHERE id = $1")
        .bind(account_id.as_uuid())
        .bind(account.balance())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("update_balance", e))?;

    Ok(entry)
}

async fn write_payment(
    executor: impl sqlx::PgExecutor<'_>,
    payment: &Payment,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE payments SET
            provider_payment_id = $2, preference_id = $3, status = $4, payment_method = $5,
            details = $6, updated_at = $7, completed_at = $8
        WHERE id = $1
        "#,
    )
    .bind(payment.id.as_uuid())
    .bind(&payment.provider_payment_id)
    .bind(&payment.preference_id)
    .bind(payment.status.as_str())
    .bind(&payment.payment_method)
    .bind(&payment.details)
    .bind(payment.updated_at)
    .bind(payment.completed_at)
    .execute(executor)
    .await
    .map_err(|e| map_sqlx_error("update_payment", e))?;
    Ok(result.rows_affected())
}

async fn write_job(executor: impl sqlx::PgExecutor<'_>, job: &TranscriptionJob) -> Result<u64, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE transcriptions SET
            status = $2, provider_job_id = $3, transcript_text = $4, srt_content = $5,
            vtt_content = $6, duration_secs = $7, credits_charged = $8, error_message = $9,
            updated_at = $10, completed_at = $11
        WHERE id = $1
        "#,
    )
    .bind(job.id.as_uuid())
    .bind(job.status.as_str())
    .bind(&job.provider_job_id)
    .bind(&job.transcript_text)
    .bind(&job.srt_content)
    .bind(&job.vtt_content)
    .bind(job.duration_secs)
    .bind(job.credits_charged)
    .bind(&job.error_message)
    .bind(job.updated_at)
    .bind(job.completed_at)
    .execute(executor)
    .await
    .map_err(|e| map_sqlx_error("update_job", e))?;
    Ok(result.rows_affected())
}

#[async_trait]
impl LedgerStore for PgStore {
    #[instrument(skip(self, account), fields(account_id = %account.id_typed()), err)]
    async fn open_account(&self, account: Account, opening_credits: i64) -> Result<Account, StoreError> {
        let mut tx = self.begin().await?;
        sqlx::query(
            "INSERT INTO accounts (id, email, plan, balance, version, created_at) VALUES ($1, $2, $3, 0, 0, $4)",
        )
        .bind(account.id_typed().as_uuid())
        .bind(account.email())
        .bind(account.plan().as_str())
        .bind(account.created_at())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("open_account", e))?;

        if opening_credits > 0 {
            post_in_tx(
                &mut tx,
                account.id_typed(),
                &LedgerCommand::credit(opening_credits, None, SIGNUP_CREDITS_DESCRIPTION),
            )
            .await?;
        }
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;

        self.get_account(account.id_typed()).await
    }

    async fn get_account(&self, id: AccountId) -> Result<Account, StoreError> {
        let row = sqlx::query("SELECT id, email, plan, balance, version, created_at FROM accounts WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_account", e))?
            .ok_or_else(|| StoreError::not_found(format!("account {id}")))?;
        account_from_row(&row)
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query("SELECT id, email, plan, balance, version, created_at FROM accounts WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_account_by_email", e))?;
        row.as_ref().map(account_from_row).transpose()
    }

    #[instrument(skip(self, command), fields(account_id = %account, direction = command.direction().as_str()), err)]
    async fn append(&self, account: AccountId, command: LedgerCommand) -> Result<LedgerEntry, StoreError> {
        let mut tx = self.begin().await?;
        let entry = post_in_tx(&mut tx, account, &command).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(entry)
    }

    async fn entries(&self, account: AccountId) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE account_id = $1 ORDER BY seq ASC"
        ))
        .bind(account.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("entries", e))?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn has_debit_for_job(&self, job: JobId) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM ledger_entries WHERE job_id = $1 AND direction = 'debit') AS billed",
        )
        .bind(job.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("has_debit_for_job", e))?;
        column(&row, "billed")
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn insert_job(&self, job: TranscriptionJob) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO transcriptions ({JOB_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)"
        ))
        .bind(job.id.as_uuid())
        .bind(job.account_id.as_uuid())
        .bind(&job.file_name)
        .bind(&job.file_url)
        .bind(job.file_size)
        .bind(&job.language)
        .bind(job.status.as_str())
        .bind(&job.provider_job_id)
        .bind(&job.transcript_text)
        .bind(&job.srt_content)
        .bind(&job.vtt_content)
        .bind(job.duration_secs)
        .bind(job.credits_charged)
        .bind(&job.error_message)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_job", e))?;
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> Result<TranscriptionJob, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM transcriptions WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_job", e))?
            .ok_or_else(|| StoreError::not_found(format!("transcription {id}")))?;
        job_from_row(&row)
    }

    async fn update_job(&self, job: &TranscriptionJob) -> Result<(), StoreError> {
        if write_job(&self.pool, job).await? == 0 {
            return Err(StoreError::not_found(format!("transcription {}", job.id)));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %id, account_id = %account), err)]
    async fn claim_job(&self, id: JobId, account: AccountId) -> Result<TranscriptionJob, StoreError> {
        let mut tx = self.begin().await?;
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM transcriptions WHERE id = $1 AND account_id = $2 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .bind(account.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("claim_job", e))?
        .ok_or_else(|| StoreError::not_found(format!("transcription {id}")))?;

        let mut job = job_from_row(&row)?;
        job.mark_processing()?;
        write_job(&mut *tx, &job).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(job)
    }

    async fn list_jobs(
        &self,
        account: AccountId,
        page: PageRequest,
    ) -> Result<(Vec<TranscriptionJob>, usize), StoreError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transcriptions WHERE account_id = $1")
            .bind(account.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_jobs", e))?;

        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM transcriptions WHERE account_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
        ))
        .bind(account.as_uuid())
        .bind(i64::try_from(page.limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(page.offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_jobs", e))?;

        let jobs = rows.iter().map(job_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok((jobs, usize::try_from(total).unwrap_or_default()))
    }

    async fn all_jobs(&self, account: AccountId) -> Result<Vec<TranscriptionJob>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM transcriptions WHERE account_id = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(account.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("all_jobs", e))?;
        rows.iter().map(job_from_row).collect()
    }
}

#[async_trait]
impl PaymentStore for PgStore {
    async fn insert_payment(&self, payment: Payment) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO payments ({PAYMENT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
        ))
        .bind(payment.id.as_uuid())
        .bind(payment.account_id.as_uuid())
        .bind(&payment.provider_payment_id)
        .bind(&payment.preference_id)
        .bind(payment.status.as_str())
        .bind(payment.amount_cents)
        .bind(&payment.currency)
        .bind(payment.credits)
        .bind(&payment.package_id)
        .bind(&payment.package_name)
        .bind(&payment.payment_method)
        .bind(&payment.details)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .bind(payment.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_payment", e))?;
        Ok(())
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Payment, StoreError> {
        let row = sqlx::query(&format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_payment", e))?
            .ok_or_else(|| StoreError::not_found(format!("payment {id}")))?;
        payment_from_row(&row)
    }

    async fn update_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        if write_payment(&self.pool, payment).await? == 0 {
            return Err(StoreError::not_found(format!("payment {}", payment.id)));
        }
        Ok(())
    }

    async fn list_payments(&self, account: AccountId) -> Result<Vec<Payment>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE account_id = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(account.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_payments", e))?;
        rows.iter().map(payment_from_row).collect()
    }

    #[instrument(skip(self, resolution), fields(payment_id = %id, status = resolution.status.as_str()), err)]
    async fn resolve_payment(
        &self,
        id: PaymentId,
        resolution: PaymentResolution,
    ) -> Result<ResolvedPayment, StoreError> {
        let mut tx = self.begin().await?;
        let row = sqlx::query(&format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1 FOR UPDATE"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_payment", e))?
            .ok_or_else(|| StoreError::not_found(format!("payment {id}")))?;

        let mut payment = payment_from_row(&row)?;
        if payment.status.is_terminal() {
            return Err(StoreError::AlreadyResolved(id));
        }
        payment.resolve(resolution)?;

        let credit = if payment.status == PaymentStatus::Approved {
            let command = LedgerCommand::credit(payment.credits, None, payment.credit_description());
            Some(post_in_tx(&mut tx, payment.account_id, &command).await?)
        } else {
            None
        };
        write_payment(&mut *tx, &payment).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;

        Ok(ResolvedPayment { payment, credit })
    }
}
