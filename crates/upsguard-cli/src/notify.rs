use crate::output::print_json;
use clap::Parser;
use std::path::PathBuf;
use upsguard_core::classifier::{Classification, NotificationEvent, Severity};
use upsguard_core::paths;

/// Invoked by the UPS monitor as its notify command: the event code arrives
/// in `NOTIFYTYPE`, the UPS name in `UPSNAME`, and the text as arguments.
#[derive(Debug, Parser)]
#[command(
    name = "upsguard-notify",
    about = "Classify a UPS notification and log it",
    version
)]
pub struct NotifyArgs {
    /// Notification text
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub message: Vec<String>,

    /// Notification type code (ONBATT, LOWBATT, ...)
    #[arg(long = "type", env = "NOTIFYTYPE", default_value = "")]
    pub notify_type: String,

    /// UPS that raised the event
    #[arg(long, env = "UPSNAME")]
    pub ups: Option<String>,

    /// Where the host's root filesystem is mounted
    #[arg(long, env = "HOST_ROOT", default_value = paths::DEFAULT_HOST_ROOT)]
    pub host_root: PathBuf,

    /// Log file (default: var/log/ups-notify.log under the host root)
    #[arg(long, env = "NOTIFY_LOG")]
    pub log_file: Option<PathBuf>,

    /// Also print the classification as JSON
    #[arg(long, short = 'j')]
    pub json: bool,
}

impl NotifyArgs {
    pub fn log_file(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| paths::notify_log(&self.host_root))
    }

    pub fn event(&self) -> NotificationEvent {
        NotificationEvent {
            code: self.notify_type.clone(),
            message: self.message.join(" "),
            source: self.ups.clone(),
        }
    }
}

/// Log the event at a level matching its tier and return the exit code.
pub fn run(args: &NotifyArgs) -> anyhow::Result<i32> {
    let classification = args.event().classify();
    log(&classification);
    if args.json {
        print_json(&classification)?;
    }
    Ok(classification.severity.exit_code())
}

fn log(c: &Classification) {
    let line = c.summary();
    match c.severity {
        Severity::Info if !c.known => tracing::info!(code = %c.code, "{line} (unrecognised code)"),
        Severity::Info => tracing::info!("{line}"),
        Severity::Warning => tracing::warn!("{line}"),
        Severity::Critical | Severity::Error => tracing::error!("{line}"),
    }
}
