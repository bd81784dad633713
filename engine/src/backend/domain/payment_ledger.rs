//! Payment ledger for financings.
//!
//! The ledger is an append-only log of [`FinancingPayment`] entries per financing. The
//! outstanding balance is never stored on its own: it is the `balance_after` of the
//! last live entry, or the principal while the log is empty.
//!
//! Applying a payment is split in two:
//!
//! - [`plan_payment`] is pure. It validates the request against the financing, its
//!   schedule and the current log, splits interest from principal and builds the entry.
//! - [`PaymentLedgerService::apply_payment`] loads that state, persists the planned
//!   entry and closes the financing when the balance reaches zero, all in one store
//!   transaction. Concurrent writers are resolved by the store's uniqueness constraints.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use shared::{
    ApplyPaymentRequest, Financing, FinancingPayment, FinancingStatus, Installment, Notification,
    NotificationKind, PaymentStatus, PaymentType, RelatedEntity,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::domain::amortization::schedule_for;
use crate::backend::domain::errors::{LedgerError, LedgerResult};
use crate::backend::storage::{
    AppendOutcome, Connection, FinancingPaymentStorage, FinancingStorage, NotificationStorage,
};

pub use crate::backend::domain::money::calculate_balance;

/// Entries that still count towards the balance chain
fn live_entries(log: &[FinancingPayment]) -> impl Iterator<Item = &FinancingPayment> {
    log.iter().filter(|entry| entry.status != PaymentStatus::Cancelled)
}

/// Current outstanding balance folded from the payment log
pub fn fold_balance(financing: &Financing, log: &[FinancingPayment]) -> Decimal {
    live_entries(log)
        .max_by_key(|entry| entry.sequence)
        .map(|entry| entry.balance_after)
        .unwrap_or(financing.principal)
}

/// Log position the next entry must take
pub fn next_sequence(log: &[FinancingPayment]) -> u32 {
    log.iter().map(|entry| entry.sequence).max().unwrap_or(0) + 1
}

/// Split a payment into `(interest, principal)`; interest is settled first
pub fn split_payment(amount: Decimal, accrued_interest: Option<Decimal>) -> (Decimal, Decimal) {
    let interest = accrued_interest.unwrap_or(Decimal::ZERO).min(amount);
    (interest, amount - interest)
}

/// Payment type for an entry that is otherwise valid
pub fn classify_payment(
    amount: Decimal,
    scheduled_amount: Decimal,
    balance_after: Decimal,
    installment_number: u32,
    installment_count: u32,
) -> PaymentType {
    if balance_after.is_zero() && installment_number < installment_count {
        PaymentType::EarlyPayoff
    } else if amount < scheduled_amount {
        PaymentType::Partial
    } else {
        PaymentType::Installment
    }
}

/// Validate a payment request and build the ledger entry it would append
pub fn plan_payment(
    financing: &Financing,
    schedule: &[Installment],
    log: &[FinancingPayment],
    request: &ApplyPaymentRequest,
    now: DateTime<Utc>,
) -> LedgerResult<FinancingPayment> {
    if request.amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(request.amount));
    }
    if let Some(interest) = request.accrued_interest {
        if interest < Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(interest));
        }
    }
    if financing.status != FinancingStatus::Active {
        return Err(LedgerError::FinancingNotActive(financing.id.clone()));
    }

    let installment = schedule
        .iter()
        .find(|installment| installment.number == request.installment_number)
        .ok_or(LedgerError::InvalidInstallment {
            number: request.installment_number,
            count: financing.installment_count,
        })?;

    if live_entries(log).any(|entry| entry.installment_number == request.installment_number) {
        return Err(LedgerError::DuplicateInstallment {
            financing_id: financing.id.clone(),
            installment_number: request.installment_number,
        });
    }

    let balance_before = fold_balance(financing, log);
    let (interest_amount, principal_amount) = split_payment(request.amount, request.accrued_interest);
    let balance_after = balance_before - principal_amount;

    if balance_after < Decimal::ZERO {
        return Err(LedgerError::InsufficientAmount {
            balance: balance_before,
            reason: format!("principal portion {} exceeds what is owed", principal_amount),
        });
    }

    let payment_type = if request.payment_type == Some(PaymentType::EarlyPayoff) {
        if !balance_after.is_zero() {
            return Err(LedgerError::InsufficientAmount {
                balance: balance_before,
                reason: format!("early payoff leaves {} outstanding", balance_after),
            });
        }
        PaymentType::EarlyPayoff
    } else {
        classify_payment(
            request.amount,
            installment.amount,
            balance_after,
            request.installment_number,
            financing.installment_count,
        )
    };

    Ok(FinancingPayment {
        id: FinancingPayment::generate_id(),
        user_id: financing.user_id.clone(),
        financing_id: financing.id.clone(),
        installment_number: request.installment_number,
        sequence: next_sequence(log),
        amount: request.amount,
        principal_amount,
        interest_amount,
        balance_before,
        balance_after,
        payment_type,
        status: PaymentStatus::Paid,
        payment_date: request.date,
        payment_method: request.method.clone(),
        created_at: now,
    })
}

/// Service that owns writes to the financing payment log
#[derive(Clone)]
pub struct PaymentLedgerService<C: Connection> {
    financing_repository: C::FinancingRepository,
    payment_repository: C::FinancingPaymentRepository,
    notification_repository: C::NotificationRepository,
}

impl<C: Connection> PaymentLedgerService<C> {
    pub fn new(connection: Arc<C>) -> Self {
        Self {
            financing_repository: connection.create_financing_repository(),
            payment_repository: connection.create_financing_payment_repository(),
            notification_repository: connection.create_notification_repository(),
        }
    }

    async fn load_financing(&self, financing_id: &str) -> LedgerResult<Financing> {
        self.financing_repository
            .get_financing(financing_id)
            .await?
            .ok_or_else(|| LedgerError::FinancingNotFound(financing_id.to_string()))
    }

    /// Record a payment against one installment of a financing
    pub async fn apply_payment(&self, request: ApplyPaymentRequest) -> LedgerResult<FinancingPayment> {
        info!(
            "Applying payment of {} to installment {} of financing {}",
            request.amount, request.installment_number, request.financing_id
        );

        let financing = self.load_financing(&request.financing_id).await?;
        let schedule = schedule_for(&financing)?;
        let log = self.payment_repository.list_payments(&financing.id).await?;

        let payment = plan_payment(&financing, &schedule, &log, &request, Utc::now())?;
        let settles_financing = payment.balance_after.is_zero();

        match self
            .payment_repository
            .append_payment(&payment, settles_financing)
            .await?
        {
            AppendOutcome::Appended => {}
            AppendOutcome::DuplicateInstallment => {
                warn!(
                    "Installment {} of financing {} was paid concurrently",
                    payment.installment_number, financing.id
                );
                return Err(LedgerError::DuplicateInstallment {
                    financing_id: financing.id,
                    installment_number: payment.installment_number,
                });
            }
            AppendOutcome::StaleSequence => {
                warn!("Payment log of financing {} moved while applying payment", financing.id);
                return Err(LedgerError::ConcurrentUpdate(financing.id));
            }
        }

        info!(
            "Recorded {} payment {}: balance {} -> {}",
            payment.payment_type.as_str(),
            payment.id,
            payment.balance_before,
            payment.balance_after
        );

        if settles_financing {
            info!("Financing {} is fully paid", financing.id);
            if let Err(e) = self.notify_paid_off(&financing, &payment).await {
                warn!("Failed to raise paid-off notification for {}: {}", financing.id, e);
            }
        }

        Ok(payment)
    }

    /// Outstanding balance of a financing, folded from its log
    pub async fn current_balance(&self, financing_id: &str) -> LedgerResult<Decimal> {
        let financing = self.load_financing(financing_id).await?;
        let log = self.payment_repository.list_payments(financing_id).await?;
        Ok(fold_balance(&financing, &log))
    }

    async fn notify_paid_off(
        &self,
        financing: &Financing,
        payment: &FinancingPayment,
    ) -> anyhow::Result<()> {
        let now = Utc::now();
        let notification = Notification {
            id: Notification::generate_id(),
            user_id: financing.user_id.clone(),
            kind: NotificationKind::FinancingPaidOff,
            title: "Financing paid off".to_string(),
            message: format!("{} has been fully repaid", financing.description),
            related: Some(RelatedEntity::FinancingPayment {
                payment_id: payment.id.clone(),
            }),
            is_read: false,
            created_at: now,
            updated_at: now,
        };
        self.notification_repository.upsert_notification(&notification).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::domain::amortization::generate_spaced_schedule;
    use crate::backend::storage::sqlite::test_utils::{date, sample_financing, test_db};
    use crate::backend::storage::sqlite::DbConnection;
    use rust_decimal_macros::dec;
    use shared::Periodicity;

    fn request(financing: &Financing, installment_number: u32, amount: Decimal) -> ApplyPaymentRequest {
        ApplyPaymentRequest {
            financing_id: financing.id.clone(),
            installment_number,
            amount,
            date: date("2024-02-01"),
            method: Some("transfer".to_string()),
            accrued_interest: None,
            payment_type: None,
        }
    }

    fn schedule(financing: &Financing) -> Vec<Installment> {
        generate_spaced_schedule(
            financing.principal,
            financing.installment_count,
            "2024-01-01",
            Periodicity::Monthly,
        )
        .unwrap()
    }

    /// Plan and "persist" a payment in memory
    fn apply_in_memory(
        financing: &Financing,
        log: &mut Vec<FinancingPayment>,
        request: &ApplyPaymentRequest,
    ) -> LedgerResult<FinancingPayment> {
        let payment = plan_payment(financing, &schedule(financing), log, request, Utc::now())?;
        log.push(payment.clone());
        Ok(payment)
    }

    #[test]
    fn test_fold_balance_of_empty_log_is_principal() {
        let financing = sample_financing(dec!(1000), 3, "2024-01-01");
        assert_eq!(fold_balance(&financing, &[]), dec!(1000));
        assert_eq!(next_sequence(&[]), 1);
    }

    #[test]
    fn test_balance_chain_links_entries() {
        let financing = sample_financing(dec!(1000), 3, "2024-01-01");
        let mut log = Vec::new();

        let first = apply_in_memory(&financing, &mut log, &request(&financing, 1, dec!(333.33))).unwrap();
        let second = apply_in_memory(&financing, &mut log, &request(&financing, 2, dec!(333.33))).unwrap();

        assert_eq!(first.balance_before, dec!(1000));
        assert_eq!(first.balance_after, dec!(666.67));
        assert_eq!(second.balance_before, first.balance_after);
        assert_eq!(second.balance_after, dec!(333.34));
        assert_eq!(second.sequence, 2);
        assert_eq!(fold_balance(&financing, &log), dec!(333.34));
        assert_eq!(first.payment_type, PaymentType::Installment);
        assert_eq!(first.status, PaymentStatus::Paid);
    }

    #[test]
    fn test_cancelled_entries_do_not_count() {
        let financing = sample_financing(dec!(300), 3, "2024-01-01");
        let mut log = Vec::new();
        apply_in_memory(&financing, &mut log, &request(&financing, 1, dec!(100))).unwrap();
        log[0].status = PaymentStatus::Cancelled;

        assert_eq!(fold_balance(&financing, &log), dec!(300));
        let retry = apply_in_memory(&financing, &mut log, &request(&financing, 1, dec!(100))).unwrap();
        assert_eq!(retry.balance_before, dec!(300));
        assert_eq!(retry.sequence, 2);
    }

    #[test]
    fn test_interest_is_paid_before_principal() {
        let financing = sample_financing(dec!(1000), 2, "2024-01-01");
        let mut req = request(&financing, 1, dec!(510));
        req.accrued_interest = Some(dec!(10));

        let payment = plan_payment(&financing, &schedule(&financing), &[], &req, Utc::now()).unwrap();
        assert_eq!(payment.interest_amount, dec!(10));
        assert_eq!(payment.principal_amount, dec!(500));
        assert_eq!(payment.balance_after, dec!(500));
        assert_eq!(payment.balance_after, payment.balance_before - payment.principal_amount);
    }

    #[test]
    fn test_split_payment_caps_interest_at_amount() {
        assert_eq!(split_payment(dec!(5), Some(dec!(8))), (dec!(5), dec!(0)));
        assert_eq!(split_payment(dec!(100), None), (dec!(0), dec!(100)));
    }

    #[test]
    fn test_classification() {
        assert_eq!(classify_payment(dec!(50), dec!(100), dec!(250), 1, 3), PaymentType::Partial);
        assert_eq!(classify_payment(dec!(100), dec!(100), dec!(200), 1, 3), PaymentType::Installment);
        assert_eq!(classify_payment(dec!(300), dec!(100), dec!(0), 1, 3), PaymentType::EarlyPayoff);
        assert_eq!(classify_payment(dec!(100), dec!(100), dec!(0), 3, 3), PaymentType::Installment);
    }

    #[test]
    fn test_overpayment_is_rejected() {
        let financing = sample_financing(dec!(300), 3, "2024-01-01");
        let result = plan_payment(
            &financing,
            &schedule(&financing),
            &[],
            &request(&financing, 1, dec!(300.01)),
            Utc::now(),
        );
        assert!(matches!(result, Err(LedgerError::InsufficientAmount { .. })));
    }

    #[test]
    fn test_requested_early_payoff_must_close_balance() {
        let financing = sample_financing(dec!(300), 3, "2024-01-01");
        let mut req = request(&financing, 1, dec!(200));
        req.payment_type = Some(PaymentType::EarlyPayoff);
        assert!(matches!(
            plan_payment(&financing, &schedule(&financing), &[], &req, Utc::now()),
            Err(LedgerError::InsufficientAmount { .. })
        ));

        req.amount = dec!(300);
        let payment = plan_payment(&financing, &schedule(&financing), &[], &req, Utc::now()).unwrap();
        assert_eq!(payment.payment_type, PaymentType::EarlyPayoff);
        assert_eq!(payment.balance_after, Decimal::ZERO);
    }

    #[test]
    fn test_request_validation() {
        let financing = sample_financing(dec!(300), 3, "2024-01-01");
        let plan = |req: ApplyPaymentRequest| {
            plan_payment(&financing, &schedule(&financing), &[], &req, Utc::now())
        };

        assert!(matches!(plan(request(&financing, 1, dec!(0))), Err(LedgerError::InvalidAmount(_))));
        assert!(matches!(plan(request(&financing, 1, dec!(-5))), Err(LedgerError::InvalidAmount(_))));
        assert!(matches!(
            plan(request(&financing, 0, dec!(100))),
            Err(LedgerError::InvalidInstallment { number: 0, count: 3 })
        ));
        assert!(matches!(
            plan(request(&financing, 4, dec!(100))),
            Err(LedgerError::InvalidInstallment { number: 4, count: 3 })
        ));

        let mut negative_interest = request(&financing, 1, dec!(100));
        negative_interest.accrued_interest = Some(dec!(-1));
        assert!(matches!(plan(negative_interest), Err(LedgerError::InvalidAmount(_))));
    }

    #[test]
    fn test_inactive_financing_rejects_payments() {
        let mut financing = sample_financing(dec!(300), 3, "2024-01-01");
        financing.status = FinancingStatus::Defaulted;
        let result = plan_payment(
            &financing,
            &schedule(&financing),
            &[],
            &request(&financing, 1, dec!(100)),
            Utc::now(),
        );
        assert!(matches!(result, Err(LedgerError::FinancingNotActive(_))));
    }

    #[test]
    fn test_balance_never_negative_across_random_walk() {
        let financing = sample_financing(dec!(1000), 5, "2024-01-01");
        let mut log = Vec::new();
        let amounts = [dec!(150), dec!(400), dec!(300), dec!(300), dec!(150)];

        for (index, amount) in amounts.iter().enumerate() {
            let number = index as u32 + 1;
            let before = fold_balance(&financing, &log);
            match apply_in_memory(&financing, &mut log, &request(&financing, number, *amount)) {
                Ok(payment) => {
                    assert!(payment.balance_after <= before);
                    assert!(payment.balance_after >= Decimal::ZERO);
                }
                Err(LedgerError::InsufficientAmount { .. }) => {
                    assert_eq!(fold_balance(&financing, &log), before);
                }
                Err(other) => panic!("unexpected error {other}"),
            }
        }
        assert_eq!(fold_balance(&financing, &log), dec!(0));
    }

    async fn service_with_financing(
        principal: Decimal,
        count: u32,
    ) -> (DbConnection, PaymentLedgerService<DbConnection>, Financing) {
        let db = test_db().await;
        let financing = sample_financing(principal, count, "2024-01-01");
        db.create_financing_repository()
            .store_financing(&financing)
            .await
            .unwrap();
        let service = PaymentLedgerService::new(Arc::new(db.clone()));
        (db, service, financing)
    }

    #[tokio::test]
    async fn test_apply_payment_persists_and_closes_financing() {
        let (db, service, financing) = service_with_financing(dec!(200), 2).await;

        service.apply_payment(request(&financing, 1, dec!(100))).await.unwrap();
        assert_eq!(service.current_balance(&financing.id).await.unwrap(), dec!(100));

        let last = service.apply_payment(request(&financing, 2, dec!(100))).await.unwrap();
        assert_eq!(last.balance_after, dec!(0));
        assert_eq!(last.payment_type, PaymentType::Installment);

        let stored = db
            .create_financing_repository()
            .get_financing(&financing.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, FinancingStatus::Paid);

        let notifications = db
            .create_notification_repository()
            .list_notifications(&financing.user_id)
            .await
            .unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, NotificationKind::FinancingPaidOff);
        assert_eq!(
            notifications[0].related,
            Some(RelatedEntity::FinancingPayment { payment_id: last.id.clone() })
        );

        // Closed financings take no further payments
        assert!(matches!(
            service.apply_payment(request(&financing, 1, dec!(1))).await,
            Err(LedgerError::FinancingNotActive(_))
        ));
    }

    #[tokio::test]
    async fn test_early_payoff_closes_financing() {
        let (db, service, financing) = service_with_financing(dec!(900), 3).await;

        service.apply_payment(request(&financing, 1, dec!(300))).await.unwrap();
        let payoff = service.apply_payment(request(&financing, 2, dec!(600))).await.unwrap();

        assert_eq!(payoff.payment_type, PaymentType::EarlyPayoff);
        let stored = db
            .create_financing_repository()
            .get_financing(&financing.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, FinancingStatus::Paid);
    }

    #[tokio::test]
    async fn test_second_payment_for_same_installment_is_duplicate() {
        let (_, service, financing) = service_with_financing(dec!(300), 3).await;

        service.apply_payment(request(&financing, 1, dec!(100))).await.unwrap();
        let result = service.apply_payment(request(&financing, 1, dec!(100))).await;
        assert!(matches!(
            result,
            Err(LedgerError::DuplicateInstallment { installment_number: 1, .. })
        ));
        assert_eq!(service.current_balance(&financing.id).await.unwrap(), dec!(200));
    }

    #[tokio::test]
    async fn test_concurrent_payments_for_same_installment() {
        let (_, service, financing) = service_with_financing(dec!(300), 3).await;

        let (a, b) = tokio::join!(
            service.apply_payment(request(&financing, 1, dec!(100))),
            service.apply_payment(request(&financing, 1, dec!(100))),
        );

        let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        let failure = if a.is_err() { a } else { b };
        assert!(matches!(
            failure,
            Err(LedgerError::DuplicateInstallment { installment_number: 1, .. })
        ));
        assert_eq!(service.current_balance(&financing.id).await.unwrap(), dec!(200));
    }

    #[tokio::test]
    async fn test_unknown_financing() {
        let db = test_db().await;
        let service = PaymentLedgerService::new(Arc::new(db));
        let financing = sample_financing(dec!(100), 1, "2024-01-01");
        assert!(matches!(
            service.apply_payment(request(&financing, 1, dec!(100))).await,
            Err(LedgerError::FinancingNotFound(_))
        ));
    }

    #[test]
    fn test_calculate_balance_is_available_from_ledger() {
        use shared::{BalanceEntry, EntryType};
        let entries = [
            BalanceEntry { entry_type: EntryType::Income, amount: dec!(1000) },
            BalanceEntry { entry_type: EntryType::Expense, amount: dec!(500) },
        ];
        assert_eq!(calculate_balance(Some(&entries)), dec!(500));
    }
}
