//! Database service for invoice-engine.

use crate::models::{
    format_invoice_number, Booking, Client, ExpenseClaim, ExtraTimeRecord, GenerationRun, Invoice,
    InvoiceStatus, LineItem, NewInvoice, NewLineItem, Period, RateBasis,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::BillingStore;
use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

fn write_error(context: &str, e: sqlx::Error) -> AppError {
    match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            AppError::Conflict(anyhow::anyhow!("{}: source already invoiced", context))
        }
        _ => AppError::DatabaseError(anyhow::anyhow!("{}: {}", context, e)),
    }
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "invoice-engine"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, AppError> {
        self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })
    }

    async fn commit(tx: Transaction<'static, Postgres>) -> Result<(), AppError> {
        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })
    }

    /// Lock the invoice row for the rest of the transaction.
    async fn lock_invoice(
        tx: &mut Transaction<'static, Postgres>,
        organization_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Invoice, AppError> {
        sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, organization_id, client_id, branch_id, invoice_number, status, total_amount,
                   start_date, end_date, generated_from_booking, created_utc, updated_utc
            FROM invoices
            WHERE organization_id = $1 AND invoice_id = $2
            FOR UPDATE
            "#,
        )
        .bind(organization_id)
        .bind(invoice_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock invoice: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))
    }

    /// Insert line items after any existing ones and flag the sources they
    /// consume. Flags are only flipped when still clear and owned by
    /// `client_id`; anything else is a Conflict and the caller's transaction
    /// rolls back on drop.
    async fn insert_line_items(
        tx: &mut Transaction<'static, Postgres>,
        invoice_id: Uuid,
        client_id: Uuid,
        items: &[NewLineItem],
    ) -> Result<(), AppError> {
        let booking_ids: Vec<Uuid> = items.iter().filter_map(|i| i.booking_id).collect();
        if !booking_ids.is_empty() {
            let owned: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM bookings WHERE booking_id = ANY($1) AND client_id = $2",
            )
            .bind(&booking_ids)
            .bind(client_id)
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to check booking owner: {}", e))
            })?;

            if owned != booking_ids.len() as i64 {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "{} of {} bookings do not belong to client {} or repeat",
                    booking_ids.len() as i64 - owned,
                    booking_ids.len(),
                    client_id
                )));
            }
        }

        let first_sort: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM invoice_line_items WHERE invoice_id = $1",
        )
        .bind(invoice_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to read line item order: {}", e))
        })?;

        for (offset, item) in items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO invoice_line_items (line_item_id, invoice_id, kind, description, quantity, unit_price, amount, booking_id, source_expense_id, source_extra_time_id, staff_id, admin_cost_percentage, sort_order)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(invoice_id)
            .bind(item.kind.as_str())
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.amount)
            .bind(item.booking_id)
            .bind(item.source_expense_id)
            .bind(item.source_extra_time_id)
            .bind(item.staff_id)
            .bind(item.admin_cost_percentage)
            .bind(first_sort + offset as i32)
            .execute(&mut **tx)
            .await
            .map_err(|e| write_error("Failed to insert line item", e))?;
        }

        let expense_ids: Vec<Uuid> = items.iter().filter_map(|i| i.source_expense_id).collect();
        if !expense_ids.is_empty() {
            let result = sqlx::query(
                r#"
                UPDATE expense_claims SET is_invoiced = TRUE, invoice_id = $1
                WHERE expense_id = ANY($2) AND client_id = $3 AND is_invoiced = FALSE
                "#,
            )
            .bind(invoice_id)
            .bind(&expense_ids)
            .bind(client_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to flag expense claims: {}", e))
            })?;

            if result.rows_affected() != expense_ids.len() as u64 {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "{} of {} expense claims were already invoiced or not the client's",
                    expense_ids.len() as u64 - result.rows_affected(),
                    expense_ids.len()
                )));
            }
        }

        let extra_time_ids: Vec<Uuid> = items
            .iter()
            .filter_map(|i| i.source_extra_time_id)
            .collect();
        if !extra_time_ids.is_empty() {
            let result = sqlx::query(
                r#"
                UPDATE extra_time_records SET invoiced = TRUE, invoice_id = $1
                WHERE extra_time_id = ANY($2) AND client_id = $3 AND invoiced = FALSE
                "#,
            )
            .bind(invoice_id)
            .bind(&extra_time_ids)
            .bind(client_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to flag extra time: {}", e))
            })?;

            if result.rows_affected() != extra_time_ids.len() as u64 {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "{} of {} extra time records were already invoiced or not the client's",
                    extra_time_ids.len() as u64 - result.rows_affected(),
                    extra_time_ids.len()
                )));
            }
        }

        Ok(())
    }
}

#[async_trait]
impl BillingStore for Database {
    /// Check database health.
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    // =========================================================================
    // Bookings and Clients
    // =========================================================================

    #[instrument(skip(self, period), fields(branch_id = %branch_id))]
    async fn list_branch_bookings(
        &self,
        branch_id: Uuid,
        period: &Period,
    ) -> Result<Vec<Booking>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_branch_bookings"])
            .start_timer();

        let bookings = sqlx::query_as::<_, Booking>(
            r#"
            SELECT booking_id, client_id, branch_id, staff_id, service_name, start_time, end_time, status
            FROM bookings
            WHERE branch_id = $1 AND start_time >= $2 AND start_time < $3
            ORDER BY start_time
            "#,
        )
        .bind(branch_id)
        .bind(period.starts_at())
        .bind(period.ends_before())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list bookings: {}", e)))?;

        timer.observe_duration();
        Ok(bookings)
    }

    #[instrument(skip(self, period), fields(client_id = %client_id))]
    async fn list_client_bookings(
        &self,
        client_id: Uuid,
        branch_id: Uuid,
        period: &Period,
    ) -> Result<Vec<Booking>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_client_bookings"])
            .start_timer();

        let bookings = sqlx::query_as::<_, Booking>(
            r#"
            SELECT booking_id, client_id, branch_id, staff_id, service_name, start_time, end_time, status
            FROM bookings
            WHERE client_id = $1 AND branch_id = $2 AND start_time >= $3 AND start_time < $4
            ORDER BY start_time
            "#,
        )
        .bind(client_id)
        .bind(branch_id)
        .bind(period.starts_at())
        .bind(period.ends_before())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list bookings: {}", e)))?;

        timer.observe_duration();
        Ok(bookings)
    }

    #[instrument(skip(self), fields(client_id = %client_id))]
    async fn get_client(&self, client_id: Uuid) -> Result<Option<Client>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_client"])
            .start_timer();

        let client = sqlx::query_as::<_, Client>(
            "SELECT client_id, branch_id, first_name, last_name, created_utc FROM clients WHERE client_id = $1",
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get client: {}", e)))?;

        timer.observe_duration();
        Ok(client)
    }

    #[instrument(skip(self, client_ids), fields(count = client_ids.len()))]
    async fn get_clients(&self, client_ids: &[Uuid]) -> Result<Vec<Client>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_clients"])
            .start_timer();

        let clients = sqlx::query_as::<_, Client>(
            "SELECT client_id, branch_id, first_name, last_name, created_utc FROM clients WHERE client_id = ANY($1)",
        )
        .bind(client_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get clients: {}", e)))?;

        timer.observe_duration();
        Ok(clients)
    }

    // =========================================================================
    // Rate Bases
    // =========================================================================

    #[instrument(skip(self, client_ids), fields(count = client_ids.len()))]
    async fn clients_with_active_schedule(
        &self,
        client_ids: &[Uuid],
    ) -> Result<HashSet<Uuid>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["clients_with_active_schedule"])
            .start_timer();

        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT DISTINCT client_id FROM client_rate_schedules WHERE client_id = ANY($1) AND is_active = TRUE",
        )
        .bind(client_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to query rate schedules: {}", e))
        })?;

        timer.observe_duration();
        Ok(ids.into_iter().collect())
    }

    #[instrument(skip(self, client_ids), fields(count = client_ids.len()))]
    async fn clients_with_active_assignment(
        &self,
        client_ids: &[Uuid],
    ) -> Result<HashSet<Uuid>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["clients_with_active_assignment"])
            .start_timer();

        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT DISTINCT client_id FROM client_rate_assignments WHERE client_id = ANY($1) AND is_active = TRUE",
        )
        .bind(client_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to query rate assignments: {}", e))
        })?;

        timer.observe_duration();
        Ok(ids.into_iter().collect())
    }

    #[instrument(skip(self), fields(client_id = %client_id))]
    async fn list_active_rate_bases(&self, client_id: Uuid) -> Result<Vec<RateBasis>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_active_rate_bases"])
            .start_timer();

        let bases = sqlx::query_as::<_, RateBasis>(
            r#"
            SELECT schedule_id AS rate_basis_id, client_id, 'schedule'::TEXT AS mechanism,
                   description, hourly_rate, is_active, effective_from, effective_to, created_utc
            FROM client_rate_schedules
            WHERE client_id = $1 AND is_active = TRUE
            UNION ALL
            SELECT a.assignment_id, a.client_id, 'assignment'::TEXT,
                   r.service_name, r.amount, a.is_active, a.effective_from, a.effective_to, a.created_utc
            FROM client_rate_assignments a
            JOIN service_rates r ON r.service_rate_id = a.service_rate_id
            WHERE a.client_id = $1 AND a.is_active = TRUE
            "#,
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list rate bases: {}", e))
        })?;

        timer.observe_duration();
        Ok(bases)
    }

    // =========================================================================
    // Expense Claims and Extra Time
    // =========================================================================

    #[instrument(skip(self, period), fields(client_id = %client_id))]
    async fn list_expense_claims(
        &self,
        client_id: Uuid,
        period: &Period,
    ) -> Result<Vec<ExpenseClaim>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_expense_claims"])
            .start_timer();

        let claims = sqlx::query_as::<_, ExpenseClaim>(
            r#"
            SELECT expense_id, client_id, staff_id, booking_id, category, description, amount,
                   expense_date, is_invoiced, invoice_id, created_utc
            FROM expense_claims
            WHERE client_id = $1 AND status = 'approved'
              AND expense_date BETWEEN $2 AND $3
            ORDER BY expense_date, created_utc
            "#,
        )
        .bind(client_id)
        .bind(period.start_date)
        .bind(period.end_date)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list expense claims: {}", e))
        })?;

        timer.observe_duration();
        Ok(claims)
    }

    #[instrument(skip(self, period), fields(client_id = %client_id))]
    async fn list_extra_time(
        &self,
        client_id: Uuid,
        period: &Period,
    ) -> Result<Vec<ExtraTimeRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_extra_time"])
            .start_timer();

        let records = sqlx::query_as::<_, ExtraTimeRecord>(
            r#"
            SELECT extra_time_id, client_id, booking_id, staff_id, work_date, extra_time_minutes,
                   hourly_rate, total_cost, invoiced, invoice_id, created_utc
            FROM extra_time_records
            WHERE client_id = $1 AND status = 'approved'
              AND work_date BETWEEN $2 AND $3
            ORDER BY work_date, created_utc
            "#,
        )
        .bind(client_id)
        .bind(period.start_date)
        .bind(period.end_date)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list extra time: {}", e)))?;

        timer.observe_duration();
        Ok(records)
    }

    #[instrument(skip(self, expense_ids), fields(count = expense_ids.len()))]
    async fn get_expense_claims(
        &self,
        expense_ids: &[Uuid],
    ) -> Result<Vec<ExpenseClaim>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_expense_claims"])
            .start_timer();

        let claims = sqlx::query_as::<_, ExpenseClaim>(
            r#"
            SELECT expense_id, client_id, staff_id, booking_id, category, description, amount,
                   expense_date, is_invoiced, invoice_id, created_utc
            FROM expense_claims
            WHERE expense_id = ANY($1)
            "#,
        )
        .bind(expense_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get expense claims: {}", e))
        })?;

        timer.observe_duration();
        Ok(claims)
    }

    #[instrument(skip(self, extra_time_ids), fields(count = extra_time_ids.len()))]
    async fn get_extra_time(
        &self,
        extra_time_ids: &[Uuid],
    ) -> Result<Vec<ExtraTimeRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_extra_time"])
            .start_timer();

        let records = sqlx::query_as::<_, ExtraTimeRecord>(
            r#"
            SELECT extra_time_id, client_id, booking_id, staff_id, work_date, extra_time_minutes,
                   hourly_rate, total_cost, invoiced, invoice_id, created_utc
            FROM extra_time_records
            WHERE extra_time_id = ANY($1)
            "#,
        )
        .bind(extra_time_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get extra time: {}", e)))?;

        timer.observe_duration();
        Ok(records)
    }

    // =========================================================================
    // Invoices
    // =========================================================================

    #[instrument(skip(self, booking_ids), fields(count = booking_ids.len()))]
    async fn get_bookings(&self, booking_ids: &[Uuid]) -> Result<Vec<Booking>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_bookings"])
            .start_timer();

        let bookings = sqlx::query_as::<_, Booking>(
            r#"
            SELECT booking_id, client_id, branch_id, staff_id, service_name, start_time, end_time, status
            FROM bookings
            WHERE booking_id = ANY($1)
            "#,
        )
        .bind(booking_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get bookings: {}", e)))?;

        timer.observe_duration();
        Ok(bookings)
    }

    #[instrument(skip(self, booking_ids), fields(count = booking_ids.len()))]
    async fn invoiced_booking_ids(&self, booking_ids: &[Uuid]) -> Result<HashSet<Uuid>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["invoiced_booking_ids"])
            .start_timer();

        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT DISTINCT booking_id FROM invoice_line_items WHERE booking_id = ANY($1)",
        )
        .bind(booking_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to query invoiced bookings: {}", e))
        })?;

        timer.observe_duration();
        Ok(ids.into_iter().collect())
    }

    #[instrument(skip(self, period), fields(client_id = %client_id))]
    async fn find_period_invoice(
        &self,
        client_id: Uuid,
        period: &Period,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_period_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, organization_id, client_id, branch_id, invoice_number, status, total_amount,
                   start_date, end_date, generated_from_booking, created_utc, updated_utc
            FROM invoices
            WHERE client_id = $1 AND start_date = $2 AND end_date = $3
              AND generated_from_booking = TRUE AND status <> $4
            ORDER BY created_utc
            LIMIT 1
            "#,
        )
        .bind(client_id)
        .bind(period.start_date)
        .bind(period.end_date)
        .bind(InvoiceStatus::Cancelled.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to find period invoice: {}", e))
        })?;

        timer.observe_duration();
        Ok(invoice)
    }

    /// Allocate a number, insert the invoice and its items, and flag sources
    /// in one transaction.
    #[instrument(skip(self, input), fields(organization_id = %input.organization_id, client_id = %input.client_id))]
    async fn create_invoice(&self, input: &NewInvoice) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_invoice"])
            .start_timer();

        let mut tx = self.begin().await?;

        let sequence: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO invoice_sequences (organization_id, last_value)
            VALUES ($1, 1)
            ON CONFLICT (organization_id) DO UPDATE SET last_value = invoice_sequences.last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(input.organization_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to allocate invoice number: {}", e))
        })?;

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            INSERT INTO invoices (invoice_id, organization_id, client_id, branch_id, invoice_number, status, total_amount, start_date, end_date, generated_from_booking)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING invoice_id, organization_id, client_id, branch_id, invoice_number, status, total_amount,
                      start_date, end_date, generated_from_booking, created_utc, updated_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.organization_id)
        .bind(input.client_id)
        .bind(input.branch_id)
        .bind(format_invoice_number(sequence))
        .bind(InvoiceStatus::Draft.as_str())
        .bind(input.total())
        .bind(input.start_date)
        .bind(input.end_date)
        .bind(input.generated_from_booking)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| write_error("Failed to create invoice", e))?;

        Self::insert_line_items(&mut tx, invoice.invoice_id, input.client_id, &input.line_items)
            .await?;
        Self::commit(tx).await?;

        timer.observe_duration();
        info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            line_items = input.line_items.len(),
            "Invoice created"
        );

        Ok(invoice)
    }

    #[instrument(skip(self, items), fields(organization_id = %organization_id, invoice_id = %invoice_id))]
    async fn append_line_items(
        &self,
        organization_id: Uuid,
        invoice_id: Uuid,
        items: &[NewLineItem],
    ) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["append_line_items"])
            .start_timer();

        let mut tx = self.begin().await?;

        let locked = Self::lock_invoice(&mut tx, organization_id, invoice_id).await?;
        if !locked.is_editable() {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Invoice {} is {} and cannot be changed",
                invoice_id,
                locked.status
            )));
        }

        Self::insert_line_items(&mut tx, invoice_id, locked.client_id, items).await?;

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoices
            SET total_amount = (SELECT COALESCE(SUM(amount), 0) FROM invoice_line_items WHERE invoice_id = $1),
                updated_utc = NOW()
            WHERE invoice_id = $1
            RETURNING invoice_id, organization_id, client_id, branch_id, invoice_number, status, total_amount,
                      start_date, end_date, generated_from_booking, created_utc, updated_utc
            "#,
        )
        .bind(invoice_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update invoice total: {}", e))
        })?;

        Self::commit(tx).await?;

        timer.observe_duration();
        info!(
            invoice_id = %invoice_id,
            added = items.len(),
            total_amount = %invoice.total_amount,
            "Line items appended"
        );

        Ok(invoice)
    }

    #[instrument(skip(self), fields(organization_id = %organization_id, invoice_id = %invoice_id))]
    async fn get_invoice(
        &self,
        organization_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, organization_id, client_id, branch_id, invoice_number, status, total_amount,
                   start_date, end_date, generated_from_booking, created_utc, updated_utc
            FROM invoices
            WHERE organization_id = $1 AND invoice_id = $2
            "#,
        )
        .bind(organization_id)
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

        timer.observe_duration();
        Ok(invoice)
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn get_line_items(&self, invoice_id: Uuid) -> Result<Vec<LineItem>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_line_items"])
            .start_timer();

        let items = sqlx::query_as::<_, LineItem>(
            r#"
            SELECT line_item_id, invoice_id, kind, description, quantity, unit_price, amount, booking_id,
                   source_expense_id, source_extra_time_id, staff_id, admin_cost_percentage, sort_order, created_utc
            FROM invoice_line_items
            WHERE invoice_id = $1
            ORDER BY sort_order
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get line items: {}", e)))?;

        timer.observe_duration();
        Ok(items)
    }

    #[instrument(skip(self), fields(organization_id = %organization_id, invoice_id = %invoice_id))]
    async fn delete_invoice(
        &self,
        organization_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_invoice"])
            .start_timer();

        let mut tx = self.begin().await?;

        let locked = match Self::lock_invoice(&mut tx, organization_id, invoice_id).await {
            Ok(locked) => locked,
            Err(AppError::NotFound(_)) => {
                timer.observe_duration();
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        if !locked.is_deletable() {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Invoice {} is {} and cannot be deleted",
                invoice_id,
                locked.status
            )));
        }

        let released_claims = sqlx::query(
            "UPDATE expense_claims SET is_invoiced = FALSE, invoice_id = NULL WHERE invoice_id = $1",
        )
        .bind(invoice_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to release expense claims: {}", e))
        })?
        .rows_affected();

        let released_extra_time = sqlx::query(
            "UPDATE extra_time_records SET invoiced = FALSE, invoice_id = NULL WHERE invoice_id = $1",
        )
        .bind(invoice_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to release extra time: {}", e))
        })?
        .rows_affected();

        // Line items go with the invoice via ON DELETE CASCADE.
        let deleted = sqlx::query("DELETE FROM invoices WHERE organization_id = $1 AND invoice_id = $2")
            .bind(organization_id)
            .bind(invoice_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to delete invoice: {}", e)))?
            .rows_affected();

        if deleted == 0 {
            tx.rollback().await.ok();
            timer.observe_duration();
            return Ok(false);
        }

        Self::commit(tx).await?;

        timer.observe_duration();
        info!(
            invoice_id = %invoice_id,
            released_claims = released_claims,
            released_extra_time = released_extra_time,
            "Invoice deleted"
        );

        Ok(true)
    }

    #[instrument(skip(self, run), fields(run_id = %run.run_id))]
    async fn record_generation_run(&self, run: &GenerationRun) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_generation_run"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO generation_runs (run_id, organization_id, branch_id, period_type, start_date, end_date, success_count, error_count, skipped_count, total_amount, started_utc, completed_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(run.run_id)
        .bind(run.organization_id)
        .bind(run.branch_id)
        .bind(&run.period_type)
        .bind(run.start_date)
        .bind(run.end_date)
        .bind(run.success_count)
        .bind(run.error_count)
        .bind(run.skipped_count)
        .bind(run.total_amount)
        .bind(run.started_utc)
        .bind(run.completed_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to record generation run");
            AppError::DatabaseError(anyhow::anyhow!("Failed to record generation run: {}", e))
        })?;

        timer.observe_duration();
        Ok(())
    }
}
