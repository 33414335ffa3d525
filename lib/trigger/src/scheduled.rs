//! Scheduled triggers.
//!
//! Each registered workspace gets one timer task that sleeps until the next
//! cron fire time and then enqueues a job on the scheduled queue.

use crate::cron::{CronSchedule, DEFAULT_TIMEZONE};
use crate::error::RegistrationError;
use crate::queue::{DispatchQueue, Job, JobProcessor};
use crate::registration::{
    RegistrationOutcome, RegistrationStore, TriggerManager, require_workspace,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rootcause::Report;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use taskloom_core::WorkspaceId;
use taskloom_engine::{
    ExecutionError, TriggerInput, TriggerSource, WorkspaceDataCache, WorkspaceExecutor,
};
use tokio::task::AbortHandle;
use tracing::{info, instrument, warn};

/// Settings for a scheduled trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledConfig {
    /// Five-field cron expression or macro.
    pub cron_expression: String,
    /// IANA timezone the expression is evaluated in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

/// Details returned for a scheduled registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledInfo {
    /// Next time the workspace runs.
    pub next_execution_time: Option<DateTime<Utc>>,
    /// The expression as registered.
    pub cron_expression: String,
    /// The timezone as registered.
    pub timezone: String,
}

/// A registered schedule.
#[derive(Debug, Clone)]
pub struct ScheduledRegistration {
    /// The parsed schedule.
    pub schedule: CronSchedule,
    /// When the trigger was registered.
    pub registered_at: DateTime<Utc>,
    timer: AbortHandle,
}

/// Manages cron timers per workspace.
pub struct ScheduledTriggerManager {
    registrations: RegistrationStore<ScheduledRegistration>,
    cache: Arc<WorkspaceDataCache>,
    executor: Arc<dyn WorkspaceExecutor>,
    queue: DispatchQueue,
}

impl ScheduledTriggerManager {
    /// Creates a manager whose timers enqueue onto `queue`.
    #[must_use]
    pub fn new(
        cache: Arc<WorkspaceDataCache>,
        executor: Arc<dyn WorkspaceExecutor>,
        queue: DispatchQueue,
    ) -> Self {
        Self {
            registrations: RegistrationStore::new(),
            cache,
            executor,
            queue,
        }
    }

    /// Returns the next fire time for `workspace_id`, if it is registered.
    pub async fn next_execution_time(&self, workspace_id: &WorkspaceId) -> Option<DateTime<Utc>> {
        self.registrations
            .get(workspace_id)
            .await
            .and_then(|registration| registration.schedule.next_after(Utc::now()))
    }

    /// Returns the registration for `workspace_id`.
    pub async fn registration(&self, workspace_id: &WorkspaceId) -> Option<ScheduledRegistration> {
        self.registrations.get(workspace_id).await
    }

    /// Runs a job immediately, bypassing the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the run fails to start.
    pub async fn direct_execute(&self, job: Job) -> Result<(), Report<ExecutionError>> {
        let summary = self.executor.execute(&job.workspace_id, job.input).await?;
        info!(
            workspace_id = %job.workspace_id,
            run_id = %summary.run_id,
            status = %summary.status,
            "scheduled run finished"
        );
        Ok(())
    }

    async fn try_register(
        &self,
        workspace_id: &WorkspaceId,
        config: ScheduledConfig,
    ) -> Result<ScheduledInfo, Report<RegistrationError>> {
        require_workspace(&self.cache, workspace_id).await?;
        let schedule = CronSchedule::parse(&config.cron_expression, &config.timezone).map_err(
            |report| RegistrationError::InvalidConfig {
                reason: report.current_context().to_string(),
            },
        )?;
        let next_execution_time = schedule.next_after(Utc::now());

        // The timer travels with its registration, so whichever insert wins
        // also owns the only running timer.
        let timer = self.start_timer(workspace_id.clone(), schedule.clone());
        let previous = self
            .registrations
            .insert(
                workspace_id.clone(),
                ScheduledRegistration {
                    schedule: schedule.clone(),
                    registered_at: Utc::now(),
                    timer,
                },
            )
            .await;
        if let Some(previous) = previous {
            previous.timer.abort();
        }

        Ok(ScheduledInfo {
            next_execution_time,
            cron_expression: schedule.expression().to_string(),
            timezone: schedule.timezone().name().to_string(),
        })
    }

    fn start_timer(&self, workspace_id: WorkspaceId, schedule: CronSchedule) -> AbortHandle {
        let queue = self.queue.clone();
        let timer_workspace = workspace_id.clone();
        let handle = tokio::spawn(async move {
            let mut last_fire: Option<DateTime<Utc>> = None;
            loop {
                let now = Utc::now();
                let from = last_fire.map_or(now, |last| last.max(now));
                let Some(fire_at) = schedule.next_after(from) else {
                    warn!(workspace_id = %timer_workspace, "schedule has no future fire time");
                    return;
                };
                let delay = (fire_at - now).to_std().unwrap_or_default();
                tokio::time::sleep(delay).await;
                last_fire = Some(fire_at);

                let input = TriggerInput::new(TriggerSource::Scheduled)
                    .with_payload(json!({ "scheduledFor": fire_at }));
                if let Err(report) = queue.enqueue(Job::new(timer_workspace.clone(), input)) {
                    warn!(
                        workspace_id = %timer_workspace,
                        error = %report.current_context(),
                        "stopping timer"
                    );
                    return;
                }
            }
        });

        handle.abort_handle()
    }
}

#[async_trait]
impl TriggerManager for ScheduledTriggerManager {
    type Config = ScheduledConfig;
    type Info = ScheduledInfo;

    #[instrument(skip_all, fields(workspace_id = %workspace_id))]
    async fn register(
        &self,
        workspace_id: &WorkspaceId,
        config: ScheduledConfig,
    ) -> RegistrationOutcome<ScheduledInfo> {
        let result = self.try_register(workspace_id, config).await;
        match &result {
            Ok(info) => info!(cron = %info.cron_expression, "scheduled trigger registered"),
            Err(report) => warn!(error = %report.current_context(), "scheduled registration failed"),
        }
        result.into()
    }

    #[instrument(skip_all, fields(workspace_id = %workspace_id))]
    async fn unregister(&self, workspace_id: &WorkspaceId) -> bool {
        let Some(registration) = self.registrations.remove(workspace_id).await else {
            return false;
        };
        registration.timer.abort();
        info!("scheduled trigger unregistered");
        true
    }
}

#[async_trait]
impl JobProcessor for ScheduledTriggerManager {
    async fn process(&self, job: Job) -> Result<(), Report<ExecutionError>> {
        self.direct_execute(job).await
    }
}
