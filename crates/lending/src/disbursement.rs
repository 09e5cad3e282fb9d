//! Disbursement batches handed to a payment provider.
//!
//! `queued → sent → posted`, with `failed` reachable from queued or sent and a
//! requeue path back to queued.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use microfin_core::{Aggregate, AggregateId, AggregateRoot, DomainError, Money, TenantId, UserId};
use microfin_events::Event;

use crate::loan::LoanId;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub AggregateId);

impl BatchId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for BatchId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    pub loan_id: LoanId,
    pub amount: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Queued,
    Sent,
    Failed,
    Posted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisbursementBatch {
    id: BatchId,
    tenant_id: Option<TenantId>,
    reference: String,
    items: Vec<BatchItem>,
    status: BatchStatus,
    attempts: u32,
    provider_reference: Option<String>,
    last_failure: Option<String>,
    version: u64,
}

impl DisbursementBatch {
    pub fn empty(id: BatchId) -> Self {
        Self {
            id,
            tenant_id: None,
            reference: String::new(),
            items: Vec::new(),
            status: BatchStatus::Queued,
            attempts: 0,
            provider_reference: None,
            last_failure: None,
            version: 0,
        }
    }

    pub fn status(&self) -> BatchStatus {
        self.status
    }

    pub fn items(&self) -> &[BatchItem] {
        &self.items
    }

    pub fn total(&self) -> Money {
        self.items.iter().map(|i| i.amount).sum()
    }

    /// Number of times the batch has been queued (1 after creation).
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn provider_reference(&self) -> Option<&str> {
        self.provider_reference.as_deref()
    }

    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    fn exists(&self) -> bool {
        self.tenant_id.is_some()
    }
}

impl AggregateRoot for DisbursementBatch {
    type Id = BatchId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBatch {
    pub tenant_id: TenantId,
    pub batch_id: BatchId,
    pub reference: String,
    pub items: Vec<BatchItem>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkBatchSent {
    pub tenant_id: TenantId,
    pub batch_id: BatchId,
    pub provider_reference: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkBatchFailed {
    pub tenant_id: TenantId,
    pub batch_id: BatchId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequeueBatch {
    pub tenant_id: TenantId,
    pub batch_id: BatchId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkBatchPosted {
    pub tenant_id: TenantId,
    pub batch_id: BatchId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchCommand {
    Create(CreateBatch),
    MarkSent(MarkBatchSent),
    MarkFailed(MarkBatchFailed),
    Requeue(RequeueBatch),
    MarkPosted(MarkBatchPosted),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCreated {
    pub tenant_id: TenantId,
    pub batch_id: BatchId,
    pub reference: String,
    pub items: Vec<BatchItem>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSent {
    pub tenant_id: TenantId,
    pub batch_id: BatchId,
    pub provider_reference: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailed {
    pub tenant_id: TenantId,
    pub batch_id: BatchId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequeued {
    pub tenant_id: TenantId,
    pub batch_id: BatchId,
    pub attempt: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPosted {
    pub tenant_id: TenantId,
    pub batch_id: BatchId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchEvent {
    Created(BatchCreated),
    Sent(BatchSent),
    Failed(BatchFailed),
    Requeued(BatchRequeued),
    Posted(BatchPosted),
}

impl BatchEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            BatchEvent::Created(e) => e.tenant_id,
            BatchEvent::Sent(e) => e.tenant_id,
            BatchEvent::Failed(e) => e.tenant_id,
            BatchEvent::Requeued(e) => e.tenant_id,
            BatchEvent::Posted(e) => e.tenant_id,
        }
    }

    pub fn batch_id(&self) -> BatchId {
        match self {
            BatchEvent::Created(e) => e.batch_id,
            BatchEvent::Sent(e) => e.batch_id,
            BatchEvent::Failed(e) => e.batch_id,
            BatchEvent::Requeued(e) => e.batch_id,
            BatchEvent::Posted(e) => e.batch_id,
        }
    }
}

impl Event for BatchEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BatchEvent::Created(_) => "lending.disbursement_batch.created",
            BatchEvent::Sent(_) => "lending.disbursement_batch.sent",
            BatchEvent::Failed(_) => "lending.disbursement_batch.failed",
            BatchEvent::Requeued(_) => "lending.disbursement_batch.requeued",
            BatchEvent::Posted(_) => "lending.disbursement_batch.posted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            BatchEvent::Created(e) => e.occurred_at,
            BatchEvent::Sent(e) => e.occurred_at,
            BatchEvent::Failed(e) => e.occurred_at,
            BatchEvent::Requeued(e) => e.occurred_at,
            BatchEvent::Posted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for DisbursementBatch {
    type Command = BatchCommand;
    type Event = BatchEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            BatchEvent::Created(e) => {
                self.id = e.batch_id;
                self.tenant_id = Some(e.tenant_id);
                self.reference = e.reference.clone();
                self.items = e.items.clone();
                self.status = BatchStatus::Queued;
                self.attempts = 1;
            }
            BatchEvent::Sent(e) => {
                self.status = BatchStatus::Sent;
                self.provider_reference = Some(e.provider_reference.clone());
            }
            BatchEvent::Failed(e) => {
                self.status = BatchStatus::Failed;
                self.last_failure = Some(e.reason.clone());
            }
            BatchEvent::Requeued(e) => {
                self.status = BatchStatus::Queued;
                self.attempts = e.attempt;
                self.provider_reference = None;
            }
            BatchEvent::Posted(_) => self.status = BatchStatus::Posted,
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            BatchCommand::Create(cmd) => {
                if self.exists() {
                    return Err(DomainError::conflict("batch already exists"));
                }
                if cmd.reference.trim().is_empty() {
                    return Err(DomainError::validation("reference cannot be empty"));
                }
                if cmd.items.is_empty() {
                    return Err(DomainError::validation("batch must contain at least one item"));
                }
                let mut seen = HashSet::new();
                for item in &cmd.items {
                    if !item.amount.is_positive() {
                        return Err(DomainError::validation(format!(
                            "amount for loan {} must be positive",
                            item.loan_id
                        )));
                    }
                    if !seen.insert(item.loan_id) {
                        return Err(DomainError::validation(format!("loan {} appears twice", item.loan_id)));
                    }
                }
                Ok(vec![BatchEvent::Created(BatchCreated {
                    tenant_id: cmd.tenant_id,
                    batch_id: cmd.batch_id,
                    reference: cmd.reference.trim().to_string(),
                    items: cmd.items.clone(),
                    created_by: cmd.created_by,
                    occurred_at: cmd.occurred_at,
                })])
            }
            BatchCommand::MarkSent(cmd) => {
                self.ensure(cmd.tenant_id, &[BatchStatus::Queued], "send")?;
                Ok(vec![BatchEvent::Sent(BatchSent {
                    tenant_id: cmd.tenant_id,
                    batch_id: cmd.batch_id,
                    provider_reference: cmd.provider_reference.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
            BatchCommand::MarkFailed(cmd) => {
                self.ensure(cmd.tenant_id, &[BatchStatus::Queued, BatchStatus::Sent], "fail")?;
                Ok(vec![BatchEvent::Failed(BatchFailed {
                    tenant_id: cmd.tenant_id,
                    batch_id: cmd.batch_id,
                    reason: cmd.reason.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
            BatchCommand::Requeue(cmd) => {
                self.ensure(cmd.tenant_id, &[BatchStatus::Failed], "requeue")?;
                Ok(vec![BatchEvent::Requeued(BatchRequeued {
                    tenant_id: cmd.tenant_id,
                    batch_id: cmd.batch_id,
                    attempt: self.attempts + 1,
                    occurred_at: cmd.occurred_at,
                })])
            }
            BatchCommand::MarkPosted(cmd) => {
                self.ensure(cmd.tenant_id, &[BatchStatus::Sent], "post")?;
                Ok(vec![BatchEvent::Posted(BatchPosted {
                    tenant_id: cmd.tenant_id,
                    batch_id: cmd.batch_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}

impl DisbursementBatch {
    fn ensure(&self, tenant_id: TenantId, allowed: &[BatchStatus], action: &str) -> Result<(), DomainError> {
        if !self.exists() {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if !allowed.contains(&self.status) {
            return Err(DomainError::invariant(format!(
                "cannot {action} a batch in status {:?}",
                self.status
            )));
        }
        Ok(())
    }
}
