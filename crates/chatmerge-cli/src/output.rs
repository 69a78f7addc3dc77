//! Report rendering for pretty, text and JSON output.
//!
//! # Output mode resolution
//!
//! 1. `FORMAT` env var: `"pretty"` | `"text"` | `"json"`
//! 2. Default: [`OutputMode::Pretty`] if stdout is a TTY; [`OutputMode::Text`] if piped.

use chatmerge_core::engine::Superseded;
use chatmerge_core::report::RunMode;
use chatmerge_core::{Action, EntityOutcome, RunReport};
use std::io::{self, IsTerminal, Write};

/// Shared width for human pretty separators.
pub const PRETTY_RULE_WIDTH: usize = 72;

pub fn pretty_rule(w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{:-<width$}", "", width = PRETTY_RULE_WIDTH)
}

pub fn pretty_section(w: &mut dyn Write, heading: &str) -> io::Result<()> {
    writeln!(w, "{heading}")?;
    pretty_rule(w)
}

/// Render a left-aligned key/value line in human output.
pub fn pretty_kv(w: &mut dyn Write, key: &str, value: impl AsRef<str>) -> io::Result<()> {
    writeln!(w, "{:<20} {}", format!("{key}:"), value.as_ref())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Sections and aligned counters for a terminal.
    Pretty,
    /// One line per fact, for pipes and log capture.
    Text,
    /// The full report as one JSON object.
    Json,
}

fn resolve_output_mode_inner(format_env: Option<&str>, is_tty: bool) -> OutputMode {
    if let Some(val) = format_env {
        match val.to_lowercase().as_str() {
            "json" => return OutputMode::Json,
            "text" => return OutputMode::Text,
            "pretty" => return OutputMode::Pretty,
            _ => {}
        }
    }

    if is_tty {
        OutputMode::Pretty
    } else {
        OutputMode::Text
    }
}

pub fn resolve_output_mode() -> OutputMode {
    let env_val = std::env::var("FORMAT").ok();
    resolve_output_mode_inner(env_val.as_deref(), io::stdout().is_terminal())
}

/// Write `report` in the given mode.
///
/// # Errors
///
/// I/O errors from the writer, or JSON serialization failure.
pub fn render_report(report: &RunReport, mode: OutputMode, w: &mut dyn Write) -> anyhow::Result<()> {
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut *w, report)?;
            writeln!(w)?;
        }
        OutputMode::Text => render_text(report, w)?,
        OutputMode::Pretty => render_pretty(report, w)?,
    }
    Ok(())
}

fn outcome_line(outcome: &EntityOutcome) -> String {
    match outcome {
        EntityOutcome::Skipped { chat_id, reason } => format!("skip {chat_id}: {reason}"),
        EntityOutcome::Planned { chat_id, action } => match action.target() {
            Some(target) if matches!(action, Action::CreateCanonicalAndReassign(_)) => {
                format!("plan {chat_id}: create {} and reassign", target.key)
            }
            Some(target) => format!("plan {chat_id}: reassign to {}", target.key),
            None => format!("plan {chat_id}: nothing to do"),
        },
        EntityOutcome::Migrated {
            chat_id,
            key,
            result,
        } => {
            let mut line = format!(
                "done {chat_id} -> {key}: {} message(s)",
                result.reassigned_count
            );
            if result.created {
                line.push_str(", created canonical");
            }
            if let Some(superseded) = result.superseded {
                line.push_str(match superseded {
                    Superseded::Marked => ", marked superseded",
                    Superseded::Deleted => ", deleted old chat",
                });
            }
            line
        }
        EntityOutcome::Failed {
            chat_id, result, ..
        } => format!("fail {chat_id}: {} error(s)", result.errors.len()),
    }
}

fn render_text(report: &RunReport, w: &mut dyn Write) -> io::Result<()> {
    let s = &report.summary;
    writeln!(
        w,
        "mode={} policy={} chats={}",
        report.mode.as_str(),
        report.superseded_policy,
        report.chats_seen
    )?;
    for outcome in &report.outcomes {
        if !matches!(outcome, EntityOutcome::Skipped { .. }) {
            writeln!(w, "{}", outcome_line(outcome))?;
        }
    }
    for err in report.errors() {
        writeln!(w, "error {err}")?;
    }
    match report.mode {
        RunMode::DryRun => writeln!(
            w,
            "planned_creates={} planned_reassigns={} skipped={}",
            s.planned_creates,
            s.planned_reassigns,
            s.skipped_total()
        ),
        RunMode::Live => writeln!(
            w,
            "created={} conflicts={} migrated={} reassigned={} marked={} deleted={} skipped={} failed={} errors={}",
            s.created,
            s.create_conflicts,
            s.migrated,
            s.messages_reassigned,
            s.marked,
            s.deleted,
            s.skipped_total(),
            s.failed,
            s.errors
        ),
    }
}

fn render_pretty(report: &RunReport, w: &mut dyn Write) -> io::Result<()> {
    let s = &report.summary;
    let heading = match report.mode {
        RunMode::DryRun => "Chat migration (dry run, nothing written)",
        RunMode::Live => "Chat migration",
    };
    pretty_section(w, heading)?;
    pretty_kv(w, "Chats seen", report.chats_seen.to_string())?;
    pretty_kv(w, "Superseded policy", report.superseded_policy.as_str())?;

    match report.mode {
        RunMode::DryRun => {
            pretty_kv(w, "Would create", s.planned_creates.to_string())?;
            pretty_kv(w, "Would reassign", s.planned_reassigns.to_string())?;
        }
        RunMode::Live => {
            pretty_kv(w, "Created", s.created.to_string())?;
            pretty_kv(w, "Create races", s.create_conflicts.to_string())?;
            pretty_kv(w, "Migrated", s.migrated.to_string())?;
            pretty_kv(w, "Messages moved", s.messages_reassigned.to_string())?;
            pretty_kv(w, "Marked", s.marked.to_string())?;
            pretty_kv(w, "Deleted", s.deleted.to_string())?;
            pretty_kv(w, "Failed", s.failed.to_string())?;
        }
    }

    if !s.skipped.is_empty() {
        writeln!(w)?;
        pretty_section(w, "Skipped")?;
        for (reason, count) in &s.skipped {
            pretty_kv(w, reason, count.to_string())?;
        }
    }

    let actions: Vec<&EntityOutcome> = report
        .outcomes
        .iter()
        .filter(|o| !matches!(o, EntityOutcome::Skipped { .. }))
        .collect();
    if !actions.is_empty() {
        writeln!(w)?;
        pretty_section(w, "Chats")?;
        for outcome in actions {
            writeln!(w, "  {}", outcome_line(outcome))?;
        }
    }

    if report.has_failures() {
        writeln!(w)?;
        pretty_section(w, "Errors")?;
        for err in report.errors() {
            writeln!(w, "  {err}")?;
            if let Some(hint) = err.code().hint() {
                writeln!(w, "    hint: {hint}")?;
            }
        }
    }
    Ok(())
}
