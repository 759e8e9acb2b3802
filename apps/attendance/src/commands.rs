//! Line commands read from stdin, standing in for the picker and scanner.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use client_core::Selection;
use shared::domain::{LocationId, SessionId, WorkerSort};

pub const HELP: &str = "\
commands:
  select <location name|absent>   change the picker
  scan <payload>                  feed a QR payload
  checkout                        go absent
  status                          show the current state
  locations                       list known locations
  workers [--by-location] [text]  list workers, optionally filtered
  stats                           list your sessions
  edit <session> <location> <check-in> [check-out]
  delete <session>
  refresh                         reload locations and resync
  quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Select(Selection),
    Scan(String),
    Checkout,
    Status,
    Locations,
    Workers { search: String, sort: WorkerSort },
    Stats,
    Edit {
        session_id: SessionId,
        location_id: LocationId,
        check_in: DateTime<Utc>,
        check_out: Option<DateTime<Utc>>,
    },
    Delete(SessionId),
    Refresh,
    Help,
    Quit,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Select(_) => "select",
            Self::Scan(_) => "scan",
            Self::Checkout => "checkout",
            Self::Status => "status",
            Self::Locations => "locations",
            Self::Workers { .. } => "workers",
            Self::Stats => "stats",
            Self::Edit { .. } => "edit",
            Self::Delete(_) => "delete",
            Self::Refresh => "refresh",
            Self::Help => "help",
            Self::Quit => "quit",
        }
    }
}

/// `Ok(None)` for blank lines.
pub fn parse_line(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, rest) = line
        .split_once(char::is_whitespace)
        .map_or((line, ""), |(verb, rest)| (verb, rest.trim()));

    let command = match verb.to_ascii_lowercase().as_str() {
        "select" => {
            if rest.is_empty() {
                bail!("select needs a location name or `absent`");
            }
            Command::Select(Selection::parse(rest))
        }
        "scan" => {
            if rest.is_empty() {
                bail!("scan needs a payload");
            }
            Command::Scan(rest.to_string())
        }
        "checkout" => Command::Checkout,
        "status" => Command::Status,
        "locations" => Command::Locations,
        "workers" => parse_workers(rest),
        "stats" => Command::Stats,
        "edit" => parse_edit(rest)?,
        "delete" => Command::Delete(SessionId(parse_id(rest, "session id")?)),
        "refresh" => Command::Refresh,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => bail!("unknown command `{other}`; try `help`"),
    };
    Ok(Some(command))
}

fn parse_workers(rest: &str) -> Command {
    let (sort, search) = match rest.strip_prefix("--by-location") {
        Some(search) => (WorkerSort::Location, search.trim()),
        None => (WorkerSort::Name, rest),
    };
    Command::Workers {
        search: search.to_string(),
        sort,
    }
}

fn parse_edit(rest: &str) -> Result<Command> {
    let parts: Vec<&str> = rest.split_whitespace().collect();
    if !(3..=4).contains(&parts.len()) {
        bail!("usage: edit <session> <location> <check-in> [check-out]");
    }
    let check_out = parts
        .get(3)
        .map(|raw| parse_timestamp(raw))
        .transpose()?;
    Ok(Command::Edit {
        session_id: SessionId(parse_id(parts[0], "session id")?),
        location_id: LocationId(parse_id(parts[1], "location id")?),
        check_in: parse_timestamp(parts[2])?,
        check_out,
    })
}

fn parse_id(raw: &str, what: &str) -> Result<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(anyhow!("missing {what}"));
    }
    raw.parse()
        .with_context(|| format!("invalid {what} `{raw}`"))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .with_context(|| format!("invalid timestamp `{raw}`; expected RFC 3339"))
}

#[cfg(test)]
#[path = "tests/commands_tests.rs"]
mod tests;
