//! Trigger dispatch for taskloom workspaces.
//!
//! This crate provides:
//!
//! - **Trigger Managers**: scheduled, webhook and Telegram registrations,
//!   one per workspace and kind
//! - **Cron Schedules**: five-field expressions evaluated in IANA timezones
//! - **Dispatch Queues**: one ordered, single-worker queue per trigger source
//! - **Telegram Client**: the Bot API calls registration and replies need

pub mod cron;
pub mod error;
pub mod queue;
pub mod registration;
pub mod scheduled;
pub mod secret;
pub mod telegram;
pub mod webhook;

pub use cron::CronSchedule;
pub use error::{QueueError, RegistrationError, ScheduleError, TelegramError};
pub use queue::{DispatchQueue, Job, JobProcessor, QueueWorker};
pub use registration::{RegistrationOutcome, RegistrationStore, TriggerManager};
pub use scheduled::{ScheduledConfig, ScheduledInfo, ScheduledTriggerManager};
pub use telegram::client::{BotInfo, TelegramClient};
pub use telegram::update::FilterReason;
pub use telegram::{
    TelegramConfig, TelegramInfo, TelegramRegistration, TelegramTriggerManager,
    UpdateDisposition,
};
pub use webhook::{WebhookConfig, WebhookInfo, WebhookRegistration, WebhookTriggerManager};
