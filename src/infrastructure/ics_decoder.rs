use crate::domain::models::{DraftEvent, EventType};
use chrono::NaiveDate;

const BEGIN_EVENT: &str = "BEGIN:VEVENT";
const END_EVENT: &str = "END:VEVENT";
const PROP_START: &str = "DTSTART";
const PROP_SUMMARY: &str = "SUMMARY";
const PROP_DESCRIPTION: &str = "DESCRIPTION";
const UNTITLED_EVENT: &str = "Untitled Event";
const DESCRIPTION_NAME_LIMIT: usize = 100;

const BIRTHDAY_KEYWORDS: &[&str] = &["birthday", "bday", "birth day"];
const ANNIVERSARY_KEYWORDS: &[&str] = &["anniversary", "wedding"];
const HOLIDAY_KEYWORDS: &[&str] = &[
    "holiday",
    "christmas",
    "new year",
    "easter",
    "thanksgiving",
    "independence",
    "diwali",
    "holi",
    "ramadan",
    "eid",
];

pub const FEED_MARKERS: &[&str] = &["BEGIN:VCALENDAR", BEGIN_EVENT];

pub fn looks_like_feed(body: &str) -> bool {
    FEED_MARKERS.iter().any(|marker| body.contains(marker))
}

pub fn decode_feed(content: &str) -> Vec<DraftEvent> {
    let mut drafts = Vec::new();
    let mut current: Option<BlockAccumulator> = None;

    for logical_line in unfold_lines(content) {
        let line = logical_line.trim();

        if line.starts_with(BEGIN_EVENT) {
            current = Some(BlockAccumulator::default());
            continue;
        }
        if line.starts_with(END_EVENT) {
            if let Some(draft) = current.take().and_then(BlockAccumulator::finish) {
                drafts.push(draft);
            }
            continue;
        }

        let Some(block) = current.as_mut() else {
            continue;
        };
        let Some((name, value)) = split_property(line) else {
            continue;
        };

        if name.eq_ignore_ascii_case(PROP_START) {
            // Last resolvable occurrence wins.
            if let Some(date) = parse_start_date(value) {
                block.date = Some(date);
            }
        } else if name.eq_ignore_ascii_case(PROP_SUMMARY) {
            let summary = unescape_text(value);
            block.summary = Some(if summary.trim().is_empty() {
                UNTITLED_EVENT.to_string()
            } else {
                summary
            });
        } else if name.eq_ignore_ascii_case(PROP_DESCRIPTION) && block.description.is_none() {
            let description = unescape_text(value);
            let truncated = description
                .chars()
                .take(DESCRIPTION_NAME_LIMIT)
                .collect::<String>();
            let truncated = truncated.trim();
            if !truncated.is_empty() {
                block.description = Some(truncated.to_string());
            }
        }
    }

    drafts
}

pub fn classify_event_name(name: &str) -> EventType {
    let lowered = name.to_lowercase();
    let matches_any = |keywords: &[&str]| keywords.iter().any(|keyword| lowered.contains(keyword));

    if matches_any(BIRTHDAY_KEYWORDS) {
        EventType::Birthday
    } else if matches_any(ANNIVERSARY_KEYWORDS) {
        EventType::Anniversary
    } else if matches_any(HOLIDAY_KEYWORDS) {
        EventType::Holiday
    } else {
        EventType::Other
    }
}

#[derive(Debug, Default)]
struct BlockAccumulator {
    date: Option<NaiveDate>,
    summary: Option<String>,
    description: Option<String>,
}

impl BlockAccumulator {
    fn finish(self) -> Option<DraftEvent> {
        let date = self.date?;
        let name = self.summary.or(self.description)?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        Some(DraftEvent {
            event_type: classify_event_name(name),
            date,
            name: name.to_string(),
        })
    }
}

fn unfold_lines(content: &str) -> Vec<String> {
    let mut logical = Vec::new();
    let mut current: Option<String> = None;

    for raw in content.split('\n') {
        let line = raw.strip_suffix('\r').unwrap_or(raw);

        if starts_property(line) || line.trim().is_empty() {
            logical.extend(current.take());
            current = Some(line.to_string());
        } else if line.starts_with([' ', '\t']) {
            let continuation = &line[1..];
            match current.as_mut() {
                Some(previous) => previous.push_str(continuation),
                None => current = Some(continuation.to_string()),
            }
        } else {
            logical.extend(current.take());
            current = Some(line.to_string());
        }
    }
    logical.extend(current);
    logical
}

fn starts_property(line: &str) -> bool {
    let name_len = line
        .bytes()
        .take_while(|byte| byte.is_ascii_uppercase() || byte.is_ascii_digit() || *byte == b'-')
        .count();
    name_len > 0 && matches!(line.as_bytes().get(name_len), Some(b';' | b':'))
}

fn split_property(line: &str) -> Option<(&str, &str)> {
    let name_end = line.find([';', ':'])?;
    let name = &line[..name_end];
    if name.is_empty() {
        return None;
    }
    let value = line
        .find(':')
        .map(|index| &line[index + 1..])
        .unwrap_or_default();
    Some((name, value))
}

fn parse_start_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    let date_part = match value.find('T') {
        Some(index) => &value[..index],
        None => value,
    };
    let date_part = date_part.trim_end_matches('Z');
    let digits = date_part.get(..8)?;
    if !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }

    let year = digits[0..4].parse::<i32>().ok()?;
    let month = digits[4..6].parse::<u32>().ok()?;
    let day = digits[6..8].parse::<u32>().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn unescape_text(value: &str) -> String {
    let mut unescaped = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(current) = chars.next() {
        if current != '\\' {
            unescaped.push(current);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => unescaped.push('\n'),
            Some(',') => unescaped.push(','),
            Some(';') => unescaped.push(';'),
            Some('\\') => unescaped.push('\\'),
            Some(other) => {
                unescaped.push('\\');
                unescaped.push(other);
            }
            None => unescaped.push('\\'),
        }
    }
    unescaped
}
