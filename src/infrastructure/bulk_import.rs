use crate::domain::models::{CalendarEvent, DedupKey, DraftEvent, EventType};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::ics_decoder::decode_feed;
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashSet;

pub const EXPORT_FILE_PREFIX: &str = "calendar-events-";
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportFormat {
    Json,
    Csv,
    Ics,
}

impl ImportFormat {
    pub fn from_hint(hint: &str) -> Result<Self, InfraError> {
        let lowered = hint.trim().to_ascii_lowercase();
        let extension = lowered
            .rsplit_once('.')
            .map(|(_, extension)| extension)
            .unwrap_or(lowered.as_str());
        match extension {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            "ics" | "ical" => Ok(Self::Ics),
            _ => Err(InfraError::Validation {
                valid: 0,
                rejected: 0,
                message: format!("unsupported import format: '{}'", hint.trim()),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Ics => "ics",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRecord {
    pub id: Option<String>,
    pub draft: DraftEvent,
    pub source: Option<String>,
    pub recurring: Option<bool>,
}

impl ImportRecord {
    fn from_draft(draft: DraftEvent) -> Self {
        Self {
            id: None,
            draft,
            source: None,
            recurring: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportPlan {
    pub events: Vec<CalendarEvent>,
    pub duplicates: usize,
}

#[derive(Debug, Deserialize)]
struct JsonRecord {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, rename = "type")]
    event_type: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    recurring: Option<bool>,
}

/// Parses and validates every record. A single bad record rejects the whole
/// import; the error reports how many records were fine and how many were not.
pub fn parse_import(content: &str, format: ImportFormat) -> Result<Vec<ImportRecord>, InfraError> {
    let results = match format {
        ImportFormat::Json => parse_json_records(content)?,
        ImportFormat::Csv => parse_csv_records(content)?,
        ImportFormat::Ics => decode_feed(content)
            .into_iter()
            .map(|draft| Ok(ImportRecord::from_draft(draft)))
            .collect(),
    };

    let total = results.len();
    let mut records = Vec::with_capacity(total);
    let mut first_problem = None;
    for result in results {
        match result {
            Ok(record) => records.push(record),
            Err(problem) if first_problem.is_none() => first_problem = Some(problem),
            Err(_) => {}
        }
    }

    if let Some(problem) = first_problem {
        return Err(InfraError::Validation {
            valid: records.len(),
            rejected: total - records.len(),
            message: problem,
        });
    }
    if records.is_empty() {
        return Err(InfraError::Validation {
            valid: 0,
            rejected: 0,
            message: "No valid events found".to_string(),
        });
    }
    Ok(records)
}

fn parse_json_records(content: &str) -> Result<Vec<Result<ImportRecord, String>>, InfraError> {
    let values: Vec<serde_json::Value> = serde_json::from_str(content)?;
    Ok(values
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            let position = index + 1;
            let record: JsonRecord = serde_json::from_value(value)
                .map_err(|error| format!("record {position}: {error}"))?;
            build_record(
                record.date.as_deref(),
                record.name.as_deref(),
                record.event_type.as_deref(),
            )
            .map(|draft| ImportRecord {
                id: record.id.filter(|id| !id.trim().is_empty()),
                draft,
                source: record.source.filter(|source| !source.trim().is_empty()),
                recurring: record.recurring,
            })
            .map_err(|problem| format!("record {position}: {problem}"))
        })
        .collect())
}

fn parse_csv_records(content: &str) -> Result<Vec<Result<ImportRecord, String>>, InfraError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers = reader.headers()?.clone();
    let column = |wanted: &str| {
        headers
            .iter()
            .position(|header| header.trim().eq_ignore_ascii_case(wanted))
    };
    let (Some(date_column), Some(name_column)) = (column("date"), column("name")) else {
        return Err(InfraError::Validation {
            valid: 0,
            rejected: 0,
            message: "CSV header must contain 'date' and 'name' columns".to_string(),
        });
    };
    let type_column = column("type");

    let mut results = Vec::new();
    for row in reader.records() {
        let row = row?;
        if row.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        let line = row
            .position()
            .map(|position| position.line())
            .unwrap_or_default();
        let result = build_record(
            row.get(date_column),
            row.get(name_column),
            type_column.and_then(|index| row.get(index)),
        )
        .map(ImportRecord::from_draft)
        .map_err(|problem| format!("line {line}: {problem}"));
        results.push(result);
    }
    Ok(results)
}

fn build_record(
    date: Option<&str>,
    name: Option<&str>,
    event_type: Option<&str>,
) -> Result<DraftEvent, String> {
    let date_raw = date
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| "date is required".to_string())?;
    let date = NaiveDate::parse_from_str(date_raw, DATE_FORMAT)
        .map_err(|_| format!("invalid date '{date_raw}', expected YYYY-MM-DD"))?;
    let name = name
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| "name is required".to_string())?;
    let event_type = match event_type.map(str::trim).filter(|value| !value.is_empty()) {
        None => EventType::Other,
        Some(raw) => EventType::parse(raw).ok_or_else(|| format!("unknown event type '{raw}'"))?,
    };

    Ok(DraftEvent {
        event_type,
        date,
        name: name.to_string(),
    })
}

pub fn plan_import(
    records: Vec<ImportRecord>,
    existing: &[CalendarEvent],
    mut next_id: impl FnMut() -> String,
) -> ImportPlan {
    let mut keys: HashSet<DedupKey> = existing.iter().map(CalendarEvent::dedup_key).collect();
    let mut ids: HashSet<String> = existing.iter().map(|event| event.id.clone()).collect();
    let mut events = Vec::new();
    let mut duplicates = 0;

    for record in records {
        if !keys.insert(record.draft.dedup_key()) {
            duplicates += 1;
            continue;
        }
        let id = match record.id {
            Some(id) if !ids.contains(&id) => id,
            _ => next_id(),
        };
        ids.insert(id.clone());
        let mut event = record.draft.into_event(id, record.source.as_deref());
        event.recurring = record.recurring;
        events.push(event);
    }

    ImportPlan { events, duplicates }
}

pub fn export_events_json(events: &[CalendarEvent]) -> Result<String, InfraError> {
    Ok(serde_json::to_string_pretty(events)?)
}

pub fn export_file_name(date: NaiveDate) -> String {
    format!("{EXPORT_FILE_PREFIX}{}.json", date.format(DATE_FORMAT))
}
