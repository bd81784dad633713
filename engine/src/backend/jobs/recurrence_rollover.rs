//! Materializes every fixed-account instance whose cycle has arrived.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;

use super::ScheduledJob;
use crate::backend::domain::{JobOutcome, RecurrenceService};
use crate::backend::storage::Connection;

pub const RECURRENCE_ROLLOVER_JOB: &str = "recurrence_rollover";

pub struct RecurrenceRolloverJob<C: Connection> {
    recurrence_service: RecurrenceService<C>,
}

impl<C: Connection> RecurrenceRolloverJob<C> {
    pub fn new(connection: Arc<C>) -> Self {
        Self {
            recurrence_service: RecurrenceService::new(connection),
        }
    }
}

#[async_trait]
impl<C: Connection> ScheduledJob for RecurrenceRolloverJob<C> {
    fn name(&self) -> &'static str {
        RECURRENCE_ROLLOVER_JOB
    }

    async fn run(&self, today: NaiveDate) -> anyhow::Result<JobOutcome> {
        let created = self.recurrence_service.roll_forward_due(today).await?;
        Ok(JobOutcome::default().with_metadata("instances_created", created.len()))
    }
}
