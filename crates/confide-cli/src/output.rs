//! Human-readable and JSON rendering of command results.
use confide_engine::{
    MetricsSnapshot, ReceivedShare, ReclaimReport, RoundOutcome, SecretProgress, SweepOutcome,
};
use serde::Serialize;

pub struct Output {
    json: bool,
}

impl Output {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    /// Print `value` as JSON, or its human form.
    pub fn emit<T, F>(&self, value: &T, human: F) -> anyhow::Result<()>
    where
        T: Serialize + ?Sized,
        F: FnOnce() -> String,
    {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            let text = human();
            if !text.is_empty() {
                println!("{text}");
            }
        }
        Ok(())
    }

    /// Counters always go to stderr so they never mix with command output.
    pub fn metrics(&self, snapshot: &MetricsSnapshot) -> anyhow::Result<()> {
        if self.json {
            eprintln!("{}", serde_json::to_string(snapshot)?);
        } else {
            eprintln!("{snapshot}");
        }
        Ok(())
    }
}

pub fn rounds(outcomes: &[RoundOutcome]) -> String {
    if outcomes.is_empty() {
        return "queue empty".into();
    }
    outcomes.iter().map(round).collect::<Vec<_>>().join("\n")
}

pub fn round(outcome: &RoundOutcome) -> String {
    match outcome {
        RoundOutcome::Idle => "queue empty".into(),
        RoundOutcome::Completed {
            secret_id, placed, ..
        } => format!("{secret_id}: placed {placed}, fully distributed"),
        RoundOutcome::Requeued {
            secret_id,
            placed,
            skipped,
            remaining,
        } => {
            let mut line = format!("{secret_id}: placed {placed}, {remaining} left, requeued");
            if *skipped > 0 {
                line.push_str(&format!(" ({skipped} recipients skipped)"));
            }
            line
        }
        RoundOutcome::Vanished { secret_id, .. } => format!("{secret_id}: no longer queued"),
    }
}

pub fn progress(entries: &[SecretProgress]) -> String {
    if entries.is_empty() {
        return "no secrets submitted".into();
    }
    entries
        .iter()
        .map(|p| {
            let state = if p.is_complete() { "done" } else { "pending" };
            format!("{}  {}/{}  {state}", p.secret_id, p.placed, p.total)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn shares(held: &[ReceivedShare]) -> String {
    if held.is_empty() {
        return "no shares held".into();
    }
    held.iter()
        .map(|s| format!("{}\n  {}", s.secret_id, s.payload.to_words()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn reclaim(report: &ReclaimReport) -> String {
    let mut lines = Vec::new();
    for id in &report.ledgered {
        lines.push(format!("ledgered  {id}"));
    }
    for (id, to) in &report.relocated {
        lines.push(format!("moved     {id} -> {to}"));
    }
    for id in &report.dropped {
        lines.push(format!("dropped   {id}"));
    }
    lines.push("account deleted".into());
    lines.join("\n")
}

pub fn sweeps(outcomes: &[SweepOutcome]) -> String {
    if outcomes.is_empty() {
        return "ledger empty".into();
    }
    outcomes.iter().map(sweep).collect::<Vec<_>>().join("\n")
}

pub fn sweep(outcome: &SweepOutcome) -> String {
    match outcome {
        SweepOutcome::Empty => "ledger empty".into(),
        SweepOutcome::Resolved { secret_id } => format!("{secret_id}: resolved"),
        SweepOutcome::Purged { secret_id, holders } => {
            format!("{secret_id}: purged from {holders} holders")
        }
    }
}
