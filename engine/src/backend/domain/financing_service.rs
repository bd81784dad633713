//! Financing lifecycle outside of payments: creation, schedule lookups, overdue
//! detection and the manual default override.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use shared::{
    AuditEntry, AuditOutcome, CreateFinancingRequest, CreateFinancingResponse, Financing,
    FinancingPayment, FinancingStatus, Installment, PaymentStatus, Periodicity,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::domain::amortization::{generate_spaced_schedule, schedule_for};
use crate::backend::domain::errors::{LedgerError, LedgerResult};
use crate::backend::domain::money::parse_iso_date;
use crate::backend::domain::payment_ledger::PaymentLedgerService;
use crate::backend::storage::{AuditStorage, Connection, FinancingPaymentStorage, FinancingStorage};

/// A scheduled installment whose due date has passed without a ledger entry
#[derive(Debug, Clone, PartialEq)]
pub struct OverdueInstallment {
    pub financing_id: String,
    pub user_id: String,
    pub description: String,
    pub installment: Installment,
}

#[derive(Clone)]
pub struct FinancingService<C: Connection> {
    financing_repository: C::FinancingRepository,
    payment_repository: C::FinancingPaymentRepository,
    audit_repository: C::AuditRepository,
    ledger: PaymentLedgerService<C>,
}

impl<C: Connection> FinancingService<C> {
    pub fn new(connection: Arc<C>) -> Self {
        Self {
            financing_repository: connection.create_financing_repository(),
            payment_repository: connection.create_financing_payment_repository(),
            audit_repository: connection.create_audit_repository(),
            ledger: PaymentLedgerService::new(connection),
        }
    }

    /// Ledger service sharing this service's connection
    pub fn ledger(&self) -> &PaymentLedgerService<C> {
        &self.ledger
    }

    /// Create a financing and return it with its installment plan
    pub async fn create_financing(
        &self,
        request: CreateFinancingRequest,
    ) -> LedgerResult<CreateFinancingResponse> {
        info!(
            "Creating financing for user {}: {} over {} installments",
            request.user_id, request.principal, request.installment_count
        );

        let periodicity = request.periodicity.unwrap_or(Periodicity::Monthly);
        let schedule = generate_spaced_schedule(
            request.principal,
            request.installment_count,
            &request.start_date,
            periodicity,
        )?;
        let start_date = parse_iso_date(&request.start_date)
            .ok_or_else(|| LedgerError::InvalidDate(request.start_date.clone()))?;

        let now = Utc::now();
        let financing = Financing {
            id: Financing::generate_id(),
            user_id: request.user_id,
            description: request.description.trim().to_string(),
            principal: request.principal,
            installment_count: request.installment_count,
            start_date,
            periodicity,
            status: FinancingStatus::Active,
            created_at: now,
            updated_at: now,
        };

        self.financing_repository.store_financing(&financing).await?;
        info!("Created financing {}", financing.id);

        Ok(CreateFinancingResponse { financing, schedule })
    }

    async fn load_financing(&self, financing_id: &str) -> LedgerResult<Financing> {
        self.financing_repository
            .get_financing(financing_id)
            .await?
            .ok_or_else(|| LedgerError::FinancingNotFound(financing_id.to_string()))
    }

    pub async fn get_financing(&self, financing_id: &str) -> LedgerResult<Financing> {
        self.load_financing(financing_id).await
    }

    pub async fn get_schedule(&self, financing_id: &str) -> LedgerResult<Vec<Installment>> {
        let financing = self.load_financing(financing_id).await?;
        schedule_for(&financing)
    }

    pub async fn outstanding_balance(&self, financing_id: &str) -> LedgerResult<Decimal> {
        self.ledger.current_balance(financing_id).await
    }

    /// Payment log of a financing in the order entries were appended
    pub async fn list_payments(&self, financing_id: &str) -> LedgerResult<Vec<FinancingPayment>> {
        self.load_financing(financing_id).await?;
        Ok(self.payment_repository.list_payments(financing_id).await?)
    }

    /// Manually flag an active financing as defaulted
    pub async fn mark_defaulted(&self, financing_id: &str, actor: &str) -> LedgerResult<Financing> {
        info!("{} is marking financing {} as defaulted", actor, financing_id);

        let result = self.default_financing(financing_id).await;

        let entry = match &result {
            Ok(_) => AuditEntry::new(actor, "financing.mark_defaulted", financing_id, AuditOutcome::Success),
            Err(e) => AuditEntry::new(actor, "financing.mark_defaulted", financing_id, AuditOutcome::Failure)
                .with_detail(e.to_string()),
        };
        if let Err(e) = self.audit_repository.record_audit(&entry).await {
            warn!("Failed to audit default of financing {}: {}", financing_id, e);
        }

        result
    }

    async fn default_financing(&self, financing_id: &str) -> LedgerResult<Financing> {
        let mut financing = self.load_financing(financing_id).await?;
        if financing.status != FinancingStatus::Active {
            return Err(LedgerError::FinancingNotActive(financing.id));
        }

        financing.status = FinancingStatus::Defaulted;
        financing.updated_at = Utc::now();
        self.financing_repository
            .update_financing_status(&financing.id, financing.status, financing.updated_at)
            .await?;
        Ok(financing)
    }

    /// Installments of active financings due before `today` that have no live payment
    pub async fn overdue_installments(&self, today: NaiveDate) -> LedgerResult<Vec<OverdueInstallment>> {
        let financings = self
            .financing_repository
            .list_financings_by_status(FinancingStatus::Active)
            .await?;

        let mut overdue = Vec::new();
        for financing in financings {
            let schedule = match schedule_for(&financing) {
                Ok(schedule) => schedule,
                Err(e) => {
                    warn!("Skipping financing {} with unusable terms: {}", financing.id, e);
                    continue;
                }
            };

            let paid: HashSet<u32> = self
                .payment_repository
                .list_payments(&financing.id)
                .await?
                .iter()
                .filter(|entry| entry.status != PaymentStatus::Cancelled)
                .map(|entry| entry.installment_number)
                .collect();

            overdue.extend(
                schedule
                    .into_iter()
                    .filter(|installment| installment.due_date < today)
                    .filter(|installment| !paid.contains(&installment.number))
                    .map(|installment| OverdueInstallment {
                        financing_id: financing.id.clone(),
                        user_id: financing.user_id.clone(),
                        description: financing.description.clone(),
                        installment,
                    }),
            );
        }

        Ok(overdue)
    }
}
