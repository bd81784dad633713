use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

fn generate_prefixed_id(prefix: &str) -> String {
    format!("{}::{}", prefix, Uuid::new_v4())
}

/// Direction of money for balance calculations and fixed obligations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    /// Money coming in
    Income,
    /// Money going out
    Expense,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Income => "income",
            EntryType::Expense => "expense",
        }
    }
}

impl FromStr for EntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "income" => Ok(EntryType::Income),
            "expense" => Ok(EntryType::Expense),
            other => Err(format!("Unknown entry type: {}", other)),
        }
    }
}

/// One signed movement fed into `calculate_balance`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceEntry {
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub amount: Decimal,
}

/// Lifecycle of a financing contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinancingStatus {
    Active,
    Paid,
    Defaulted,
}

impl FinancingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinancingStatus::Active => "active",
            FinancingStatus::Paid => "paid",
            FinancingStatus::Defaulted => "defaulted",
        }
    }
}

impl FromStr for FinancingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(FinancingStatus::Active),
            "paid" => Ok(FinancingStatus::Paid),
            "defaulted" => Ok(FinancingStatus::Defaulted),
            other => Err(format!("Unknown financing status: {}", other)),
        }
    }
}

/// How a ledger entry relates to the installment it settles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    /// Full scheduled installment
    Installment,
    /// Less than the scheduled installment amount
    Partial,
    /// Settles the whole outstanding balance ahead of the final installment
    EarlyPayoff,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Installment => "installment",
            PaymentType::Partial => "partial",
            PaymentType::EarlyPayoff => "early_payoff",
        }
    }
}

impl FromStr for PaymentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "installment" => Ok(PaymentType::Installment),
            "partial" => Ok(PaymentType::Partial),
            "early_payoff" => Ok(PaymentType::EarlyPayoff),
            other => Err(format!("Unknown payment type: {}", other)),
        }
    }
}

/// Settlement state shared by ledger entries and fixed account instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Overdue,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Overdue => "overdue",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    /// Paid and cancelled instances never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Paid | PaymentStatus::Cancelled)
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "overdue" => Ok(PaymentStatus::Overdue),
            "cancelled" => Ok(PaymentStatus::Cancelled),
            other => Err(format!("Unknown payment status: {}", other)),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recurrence unit governing due-date advancement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Periodicity {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl Periodicity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Periodicity::Daily => "daily",
            Periodicity::Weekly => "weekly",
            Periodicity::Monthly => "monthly",
            Periodicity::Quarterly => "quarterly",
            Periodicity::Yearly => "yearly",
        }
    }

    /// Number of calendar months per cycle, or None for day-based periods
    pub fn months(&self) -> Option<u32> {
        match self {
            Periodicity::Daily | Periodicity::Weekly => None,
            Periodicity::Monthly => Some(1),
            Periodicity::Quarterly => Some(3),
            Periodicity::Yearly => Some(12),
        }
    }

    /// Number of days per cycle, or None for month-based periods
    pub fn days(&self) -> Option<u64> {
        match self {
            Periodicity::Daily => Some(1),
            Periodicity::Weekly => Some(7),
            _ => None,
        }
    }
}

impl FromStr for Periodicity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Periodicity::Daily),
            "weekly" => Ok(Periodicity::Weekly),
            "monthly" => Ok(Periodicity::Monthly),
            "quarterly" => Ok(Periodicity::Quarterly),
            "yearly" => Ok(Periodicity::Yearly),
            other => Err(format!("Unknown periodicity: {}", other)),
        }
    }
}

/// One scheduled repayment unit, prior to any actual payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installment {
    /// 1-based position in the schedule
    pub number: u32,
    pub amount: Decimal,
    pub due_date: NaiveDate,
}

/// A financed principal repaid through a fixed sequence of installments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Financing {
    /// Format: "financing::<uuid>"
    pub id: String,
    pub user_id: String,
    pub description: String,
    pub principal: Decimal,
    pub installment_count: u32,
    pub start_date: NaiveDate,
    /// Spacing between installment due dates
    pub periodicity: Periodicity,
    pub status: FinancingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Financing {
    pub fn generate_id() -> String {
        generate_prefixed_id("financing")
    }
}

/// Immutable ledger entry recording an actual payment against an installment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancingPayment {
    /// Format: "payment::<uuid>"
    pub id: String,
    pub user_id: String,
    pub financing_id: String,
    pub installment_number: u32,
    /// Position of this entry in the financing's log, starting at 1
    pub sequence: u32,
    pub amount: Decimal,
    pub principal_amount: Decimal,
    pub interest_amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub payment_type: PaymentType,
    pub status: PaymentStatus,
    pub payment_date: NaiveDate,
    pub payment_method: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FinancingPayment {
    pub fn generate_id() -> String {
        generate_prefixed_id("payment")
    }
}

/// Recurring obligation (bill or income) owned by a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedAccount {
    /// Format: "fixed_account::<uuid>"
    pub id: String,
    pub user_id: String,
    pub description: String,
    pub amount: Decimal,
    pub periodicity: Periodicity,
    pub account_type: EntryType,
    pub start_date: NaiveDate,
    /// Due date of the most recently materialized cycle
    pub next_due_date: NaiveDate,
    pub is_active: bool,
    /// Whether the cycle due on `next_due_date` has been settled
    pub is_paid: bool,
    /// How many days ahead of a due date a reminder is raised
    pub reminder_days: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FixedAccount {
    pub fn generate_id() -> String {
        generate_prefixed_id("fixed_account")
    }
}

/// One dated, stateful instance of a fixed account obligation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedAccountTransaction {
    /// Format: "fixed_account_tx::<uuid>"
    pub id: String,
    pub user_id: String,
    pub fixed_account_id: String,
    pub due_date: NaiveDate,
    /// Obligation amount at the time the instance was materialized
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub payment_date: Option<NaiveDate>,
    pub payment_method: Option<String>,
    /// Realized ledger transaction in the wider tracker, if any
    pub ledger_transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FixedAccountTransaction {
    pub fn generate_id() -> String {
        generate_prefixed_id("fixed_account_tx")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Success,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Error => "error",
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(JobStatus::Running),
            "success" => Ok(JobStatus::Success),
            "error" => Ok(JobStatus::Error),
            other => Err(format!("Unknown job status: {}", other)),
        }
    }
}

/// Durable record of one run of a scheduled maintenance routine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    /// Format: "job::<uuid>"
    pub id: String,
    pub job_name: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub notifications_created: u32,
    pub notifications_updated: u32,
    pub error_message: Option<String>,
    pub error_stack: Option<String>,
    pub metadata: serde_json::Value,
}

impl JobExecution {
    pub fn generate_id() -> String {
        generate_prefixed_id("job")
    }
}

/// Record a notification points at, with its own typed reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelatedEntity {
    Financing { financing_id: String },
    FinancingPayment { payment_id: String },
    FixedAccount { fixed_account_id: String },
    FixedAccountTransaction { transaction_id: String },
}

impl RelatedEntity {
    pub fn kind(&self) -> &'static str {
        match self {
            RelatedEntity::Financing { .. } => "financing",
            RelatedEntity::FinancingPayment { .. } => "financing_payment",
            RelatedEntity::FixedAccount { .. } => "fixed_account",
            RelatedEntity::FixedAccountTransaction { .. } => "fixed_account_transaction",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            RelatedEntity::Financing { financing_id } => financing_id,
            RelatedEntity::FinancingPayment { payment_id } => payment_id,
            RelatedEntity::FixedAccount { fixed_account_id } => fixed_account_id,
            RelatedEntity::FixedAccountTransaction { transaction_id } => transaction_id,
        }
    }

    /// Rebuild from the flattened (kind, id) pair used by storage
    pub fn from_parts(kind: &str, id: String) -> Option<Self> {
        match kind {
            "financing" => Some(RelatedEntity::Financing { financing_id: id }),
            "financing_payment" => Some(RelatedEntity::FinancingPayment { payment_id: id }),
            "fixed_account" => Some(RelatedEntity::FixedAccount { fixed_account_id: id }),
            "fixed_account_transaction" => {
                Some(RelatedEntity::FixedAccountTransaction { transaction_id: id })
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    PaymentDue,
    PaymentOverdue,
    FinancingPaidOff,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::PaymentDue => "payment_due",
            NotificationKind::PaymentOverdue => "payment_overdue",
            NotificationKind::FinancingPaidOff => "financing_paid_off",
        }
    }
}

impl FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "payment_due" => Ok(NotificationKind::PaymentDue),
            "payment_overdue" => Ok(NotificationKind::PaymentOverdue),
            "financing_paid_off" => Ok(NotificationKind::FinancingPaidOff),
            other => Err(format!("Unknown notification kind: {}", other)),
        }
    }
}

/// Notification handed to the external delivery layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Format: "notification::<uuid>"
    pub id: String,
    pub user_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub related: Option<RelatedEntity>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    pub fn generate_id() -> String {
        generate_prefixed_id("notification")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Failure => "failure",
        }
    }
}

impl FromStr for AuditOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(AuditOutcome::Success),
            "failure" => Ok(AuditOutcome::Failure),
            other => Err(format!("Unknown audit outcome: {}", other)),
        }
    }
}

/// Administrative action (job run, manual override) written to the audit sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Format: "audit::<uuid>"
    pub id: String,
    pub actor: String,
    pub action: String,
    pub resource: String,
    pub outcome: AuditOutcome,
    pub detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(actor: &str, action: &str, resource: &str, outcome: AuditOutcome) -> Self {
        Self {
            id: generate_prefixed_id("audit"),
            actor: actor.to_string(),
            action: action.to_string(),
            resource: resource.to_string(),
            outcome,
            detail: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateFinancingRequest {
    pub user_id: String,
    pub description: String,
    pub principal: Decimal,
    pub installment_count: u32,
    /// ISO calendar date (YYYY-MM-DD)
    pub start_date: String,
    /// Defaults to monthly installments
    pub periodicity: Option<Periodicity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateFinancingResponse {
    pub financing: Financing,
    pub schedule: Vec<Installment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyPaymentRequest {
    pub financing_id: String,
    pub installment_number: u32,
    pub amount: Decimal,
    pub date: NaiveDate,
    pub method: Option<String>,
    /// Interest accrued on this installment, paid before principal
    pub accrued_interest: Option<Decimal>,
    /// Only `EarlyPayoff` is meaningful here; it demands the balance be settled exactly
    pub payment_type: Option<PaymentType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateFixedAccountRequest {
    pub user_id: String,
    pub description: String,
    pub amount: Decimal,
    pub periodicity: Periodicity,
    pub account_type: EntryType,
    pub start_date: NaiveDate,
    pub reminder_days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayFixedAccountTransactionRequest {
    pub transaction_id: String,
    pub payment_date: NaiveDate,
    pub payment_method: Option<String>,
    pub ledger_transaction_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_string_round_trip_through_storage_names() {
        assert_eq!("early_payoff".parse::<PaymentType>().unwrap(), PaymentType::EarlyPayoff);
        assert_eq!(PaymentStatus::Cancelled.as_str(), "cancelled");
        assert_eq!("quarterly".parse::<Periodicity>().unwrap(), Periodicity::Quarterly);
        assert!("fortnightly".parse::<Periodicity>().is_err());
        assert!("unknown".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_periodicity_units() {
        assert_eq!(Periodicity::Weekly.days(), Some(7));
        assert_eq!(Periodicity::Weekly.months(), None);
        assert_eq!(Periodicity::Quarterly.months(), Some(3));
        assert_eq!(Periodicity::Yearly.months(), Some(12));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(PaymentStatus::Paid.is_terminal());
        assert!(PaymentStatus::Cancelled.is_terminal());
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(!PaymentStatus::Overdue.is_terminal());
    }

    #[test]
    fn test_related_entity_parts() {
        let related = RelatedEntity::FixedAccountTransaction {
            transaction_id: "fixed_account_tx::1".to_string(),
        };
        assert_eq!(related.kind(), "fixed_account_transaction");
        assert_eq!(related.id(), "fixed_account_tx::1");

        let rebuilt = RelatedEntity::from_parts(related.kind(), related.id().to_string());
        assert_eq!(rebuilt, Some(related));
        assert_eq!(RelatedEntity::from_parts("invoice", "x".to_string()), None);
    }

    #[test]
    fn test_related_entity_serializes_as_tagged_variant() {
        let related = RelatedEntity::Financing {
            financing_id: "financing::1".to_string(),
        };
        let json = serde_json::to_value(&related).unwrap();
        assert_eq!(json["kind"], "financing");
        assert_eq!(json["financing_id"], "financing::1");
    }

    #[test]
    fn test_balance_entry_uses_type_field() {
        let entry: BalanceEntry =
            serde_json::from_str(r#"{"type":"income","amount":"1000"}"#).unwrap();
        assert_eq!(entry.entry_type, EntryType::Income);
        assert_eq!(entry.amount, rust_decimal_macros::dec!(1000));
    }

    #[test]
    fn test_generated_ids_are_prefixed_and_unique() {
        let a = Financing::generate_id();
        let b = Financing::generate_id();
        assert!(a.starts_with("financing::"));
        assert_ne!(a, b);
        assert!(JobExecution::generate_id().starts_with("job::"));
    }
}
