use serde::Serialize;
use std::fmt;

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
            Severity::Error => "error",
        }
    }

    /// Exit status of the notify command. Only Critical asks the monitor
    /// for a shutdown.
    pub fn exit_code(self) -> i32 {
        match self {
            Severity::Info => 0,
            Severity::Warning | Severity::Error => 1,
            Severity::Critical => 2,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Event table
// ---------------------------------------------------------------------------

pub struct EventKind {
    pub code: &'static str,
    pub severity: Severity,
    pub headline: &'static str,
}

const fn kind(code: &'static str, severity: Severity, headline: &'static str) -> EventKind {
    EventKind {
        code,
        severity,
        headline,
    }
}

static ONLINE: EventKind = kind("ONLINE", Severity::Info, "POWER RESTORED");
static COMMOK: EventKind = kind("COMMOK", Severity::Info, "COMMUNICATION RESTORED");
static CAL: EventKind = kind("CAL", Severity::Info, "CALIBRATION STARTED");
static NOTCAL: EventKind = kind("NOTCAL", Severity::Info, "CALIBRATION FINISHED");
static NOTOFF: EventKind = kind("NOTOFF", Severity::Info, "UPS BACK ON");
static NOTBYPASS: EventKind = kind("NOTBYPASS", Severity::Info, "BYPASS ENDED");
static ONBATT: EventKind = kind("ONBATT", Severity::Warning, "ON BATTERY");
static COMMBAD: EventKind = kind("COMMBAD", Severity::Warning, "COMMUNICATION LOST");
static REPLBATT: EventKind = kind("REPLBATT", Severity::Warning, "REPLACE BATTERY");
static OFF: EventKind = kind("OFF", Severity::Warning, "UPS OFF");
static BYPASS: EventKind = kind("BYPASS", Severity::Warning, "ON BYPASS");
static LOWBATT: EventKind = kind("LOWBATT", Severity::Critical, "LOW BATTERY");
static FSD: EventKind = kind("FSD", Severity::Critical, "FORCED SHUTDOWN");
static SHUTDOWN: EventKind = kind("SHUTDOWN", Severity::Critical, "SYSTEM SHUTDOWN");
static NOCOMM: EventKind = kind("NOCOMM", Severity::Error, "UPS UNREACHABLE");
static NOPARENT: EventKind = kind("NOPARENT", Severity::Error, "MONITOR PARENT DIED");

/// Every known code, in table order.
pub static EVENT_KINDS: [&EventKind; 16] = [
    &ONLINE,
    &COMMOK,
    &CAL,
    &NOTCAL,
    &NOTOFF,
    &NOTBYPASS,
    &ONBATT,
    &COMMBAD,
    &REPLBATT,
    &OFF,
    &BYPASS,
    &LOWBATT,
    &FSD,
    &SHUTDOWN,
    &NOCOMM,
    &NOPARENT,
];

static UNKNOWN: EventKind = kind("UNKNOWN", Severity::Info, "UNKNOWN EVENT");

/// Table entry for `code`, or `None` for codes the monitor may add later.
pub fn lookup(code: &str) -> Option<&'static EventKind> {
    let kind = match code.trim().to_ascii_uppercase().as_str() {
        "ONLINE" => &ONLINE,
        "COMMOK" => &COMMOK,
        "CAL" => &CAL,
        "NOTCAL" => &NOTCAL,
        "NOTOFF" => &NOTOFF,
        "NOTBYPASS" => &NOTBYPASS,
        "ONBATT" => &ONBATT,
        "COMMBAD" => &COMMBAD,
        "REPLBATT" => &REPLBATT,
        "OFF" => &OFF,
        "BYPASS" => &BYPASS,
        "LOWBATT" => &LOWBATT,
        "FSD" => &FSD,
        "SHUTDOWN" => &SHUTDOWN,
        "NOCOMM" => &NOCOMM,
        "NOPARENT" => &NOPARENT,
        _ => return None,
    };
    Some(kind)
}

/// Never fails: unknown codes are informational.
pub fn classify(code: &str) -> Severity {
    lookup(code).map_or(Severity::Info, |k| k.severity)
}

// ---------------------------------------------------------------------------
// NotificationEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub code: String,
    pub message: String,
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub code: String,
    pub known: bool,
    pub severity: Severity,
    pub headline: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Classification {
    /// One human-readable line, e.g.
    /// `LOW BATTERY [critical] ups=myups@localhost code=LOWBATT: battery is low`.
    pub fn summary(&self) -> String {
        let mut line = format!("{} [{}]", self.headline, self.severity);
        if let Some(source) = &self.source {
            line.push_str(&format!(" ups={source}"));
        }
        line.push_str(&format!(" code={}", self.code));
        if !self.message.is_empty() {
            line.push_str(&format!(": {}", self.message));
        }
        line
    }
}

impl NotificationEvent {
    pub fn classify(&self) -> Classification {
        let code = self.code.trim().to_ascii_uppercase();
        let entry = lookup(&code);
        let kind = entry.unwrap_or(&UNKNOWN);
        Classification {
            known: entry.is_some(),
            severity: kind.severity,
            headline: kind.headline,
            message: self.message.trim().to_string(),
            source: self
                .source
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            code,
        }
    }
}
