//! Apply cycle
//!
//! [`Applier::apply`] turns one batch of change events into statements and
//! executes them in a single transaction: normalize, schedule, plan, render,
//! then execute group by group in ascending priority and commit. Any failure
//! rolls the whole cycle back.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

use sluice_rdbc::dialect::{dialect_for, SqlDialect};
use sluice_rdbc::pool::ConnectionPool;

use crate::config::ApplyConfig;
use crate::error::Result;
use crate::event::ChangeEvent;
use crate::executor::ApplyTransaction;
use crate::marshal::MarshalConfig;
use crate::normalize::normalize_all;
use crate::plan::{plan, PlanConfig};
use crate::schedule::{schedule, SchedulePolicy};
use crate::statement::{Statement, StatementRenderer};

/// Summary of one successful apply cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Single-row records after normalization
    pub records: usize,
    /// Priority groups executed
    pub groups: usize,
    /// Statements executed
    pub statements: usize,
    /// Rows affected as reported by the target
    pub affected: u64,
}

/// Statements rendered for one batch, not yet executed
#[derive(Debug, Clone, Default)]
pub struct PreparedBatch {
    /// Single-row records after normalization
    pub records: usize,
    /// Priority groups
    pub groups: usize,
    /// Statements in execution order
    pub statements: Vec<Statement>,
}

/// Applies change-event batches to one target
pub struct Applier {
    pool: Arc<dyn ConnectionPool>,
    dialect: Box<dyn SqlDialect>,
    plan: PlanConfig,
    policy: SchedulePolicy,
    marshal: MarshalConfig,
    table_suffix: Option<String>,
}

impl Applier {
    /// Create an applier; the dialect is resolved from the pool's URL
    pub fn new(pool: Arc<dyn ConnectionPool>, config: &ApplyConfig) -> Result<Self> {
        config.check()?;
        let dialect = dialect_for(pool.url());
        debug!(dialect = dialect.name(), "Resolved target dialect");

        Ok(Self {
            dialect,
            plan: config.plan_config(),
            policy: config.schedule_policy,
            marshal: config.marshal_config()?,
            table_suffix: config.table_suffix.clone(),
            pool,
        })
    }

    /// Dialect statements are rendered for
    pub fn dialect(&self) -> &dyn SqlDialect {
        self.dialect.as_ref()
    }

    /// Render a batch without executing it
    pub fn prepare(&self, events: Vec<ChangeEvent>) -> Result<PreparedBatch> {
        let mut records = normalize_all(events)?;
        let count = records.len();
        schedule(&mut records, self.policy);

        let planned = plan(records, &self.plan);
        let renderer = StatementRenderer::new(
            self.dialect.as_ref(),
            &self.marshal,
            self.table_suffix.as_deref(),
        );
        let statements = planned
            .batches
            .iter()
            .map(|batch| renderer.render(batch))
            .collect::<Result<Vec<_>>>()?;

        Ok(PreparedBatch {
            records: count,
            groups: planned.groups,
            statements,
        })
    }

    /// Apply one batch atomically
    pub async fn apply(&self, events: Vec<ChangeEvent>) -> Result<ApplyOutcome> {
        let start = Instant::now();
        let PreparedBatch {
            records,
            groups,
            statements,
        } = self.prepare(events)?;

        if statements.is_empty() {
            debug!(records, "Nothing to apply");
            return Ok(ApplyOutcome {
                records,
                ..Default::default()
            });
        }

        let mut tx = ApplyTransaction::new(Arc::clone(&self.pool));
        let result = self.execute(&mut tx, &statements).await;

        let affected = match result {
            Ok(affected) => affected,
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    error!(error = %rollback_err, "Rollback failed after batch error");
                }
                tx.close().await;
                return Err(e);
            }
        };
        tx.close().await;

        let outcome = ApplyOutcome {
            records,
            groups,
            statements: statements.len(),
            affected,
        };
        info!(
            records = outcome.records,
            groups = outcome.groups,
            statements = outcome.statements,
            affected = outcome.affected,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Batch applied"
        );
        Ok(outcome)
    }

    async fn execute(&self, tx: &mut ApplyTransaction, statements: &[Statement]) -> Result<u64> {
        tx.begin().await?;
        let mut affected = 0;
        for statement in statements {
            affected += tx.run(statement).await?;
        }
        tx.commit().await?;
        Ok(affected)
    }
}

impl std::fmt::Debug for Applier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Applier")
            .field("dialect", &self.dialect.name())
            .field("plan", &self.plan)
            .field("policy", &self.policy)
            .field("table_suffix", &self.table_suffix)
            .finish()
    }
}
