//! Worker log classification for `haven-classifier`.
//!
//! [`classify`] maps one line of relay output to zero or more [`Signal`]s and
//! [`level_of`] assigns its severity. The relay's text format is not a stable
//! contract, so matching is substring based: structural markers are
//! case-sensitive, boot phase keywords are not. Unknown lines yield no signals.

use chrono::NaiveDate;

use haven_core::types::LogLevel;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// A semantic event inferred from a single output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// Human-readable description of the current boot step.
    BootPhase(String),
    /// The worker is now serving its inbox subscription; booting is over.
    BootComplete,
    ImportConnected,
    /// The import has reached notes up to this day.
    ImportProgressHint(NaiveDate),
    /// Notes were found; carries the start of the reported range when present.
    ImportRangeFound(Option<String>),
    ImportTaggedStarted,
    ImportTaggedDone(Option<u64>),
    ImportComplete,
    /// An import window came back empty.
    ImportNoneFound {
        until: Option<NaiveDate>,
        checking: Option<String>,
    },
    EventCountDelta(u64),
    /// `+1` for an opened client connection, `-1` for a closed one.
    ConnectionDelta(i32),
    LockDetected,
}

/// What the supervisor is doing when the line arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClassifyContext {
    pub importing: bool,
    pub booting: bool,
}

// ---------------------------------------------------------------------------
// Vocabulary
// ---------------------------------------------------------------------------

const NEW_EVENT_MARKERS: &[&str] = &[
    "new note",
    "new reaction",
    "new zap",
    "new encrypted message",
    "new gift-wrapped",
    "new repost",
];

const CONNECTION_OPENED: &[&str] = &["accepted connection", "new connection", "WS connect"];
const CONNECTION_CLOSED: &[&str] = &["connection closed", "WS disconnect", "disconnected"];

const LOCK_MARKERS: &[&str] = &[
    "Cannot acquire directory lock",
    "Another process is using this Badger database",
];

const INBOX_READY: &[&str] = &["subscribing to inbox", "Subscribing to inbox"];

/// Digit runs this long or longer are hashes or identifiers, not counts.
const MAX_COUNT_DIGITS: usize = 10;

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Severity of a line. `ERROR` wins over `WARN`; both are case-sensitive.
pub fn level_of(line: &str) -> LogLevel {
    if line.contains("ERROR") {
        LogLevel::Error
    } else if line.contains("WARN") {
        LogLevel::Warn
    } else {
        LogLevel::Info
    }
}

/// Classify one line of worker output.
///
/// Signals are returned in the order the supervisor should apply them.
pub fn classify(line: &str, context: ClassifyContext) -> Vec<Signal> {
    let mut signals = Vec::new();

    if context.booting {
        if let Some(phase) = boot_phase(line) {
            signals.push(Signal::BootPhase(phase));
        }
    }
    if contains_any(line, INBOX_READY) {
        signals.push(Signal::BootComplete);
    }

    if context.importing {
        import_signals(line, &mut signals);
    }

    if let Some(count) = stored_event_count(line) {
        signals.push(Signal::EventCountDelta(count));
    }

    if contains_any(line, CONNECTION_OPENED) {
        signals.push(Signal::ConnectionDelta(1));
    } else if contains_any(line, CONNECTION_CLOSED) {
        signals.push(Signal::ConnectionDelta(-1));
    }

    if contains_any(line, LOCK_MARKERS) {
        signals.push(Signal::LockDetected);
    }

    signals
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

fn boot_phase(line: &str) -> Option<String> {
    // ASCII lowering keeps byte offsets aligned with `line`.
    let lower = line.to_ascii_lowercase();

    if lower.contains("subscribing to") {
        let topic = tail_after_last(line, &lower, "subscribing to ")
            .map(trim_punctuation)
            .filter(|topic| !topic.is_empty())?;
        return Some(format!("Subscribing to {topic}..."));
    }
    if lower.contains("starting") {
        let service = tail_after_last(line, &lower, "starting ")
            .map(trim_punctuation)
            .filter(|service| !service.is_empty())?;
        return Some(format!("Starting {service}..."));
    }
    if lower.contains("loading") {
        return Some("Loading databases...".to_string());
    }
    if lower.contains("listening on") {
        return Some("Establishing listener...".to_string());
    }
    if ["wot", "pubkeys", "analysed", "network size"]
        .iter()
        .any(|keyword| lower.contains(keyword))
    {
        let count = last_short_number(line)?;
        let phase = if lower.contains("analysed") {
            format!("Analysing {count} pubkeys...")
        } else if lower.contains("network size") {
            format!("Network: {count} profiles...")
        } else if lower.contains("minimum followers") {
            format!("WoT: {count} trusted keys...")
        } else {
            format!("WoT: Loading {count} keys...")
        };
        return Some(phase);
    }
    None
}

fn import_signals(line: &str, signals: &mut Vec<Signal>) {
    if line.contains("connected successfully") {
        signals.push(Signal::ImportConnected);
    } else if line.contains("Imported") && line.contains("notes") {
        if let Some(day) = date_after_last(line, "to ") {
            signals.push(Signal::ImportProgressHint(day));
        }
        signals.push(Signal::ImportRangeFound(
            text_between(line, "from ", " to").map(str::to_string),
        ));
    } else if line.contains("importing inbox notes") || line.contains("Importing inbox notes") {
        signals.push(Signal::ImportTaggedStarted);
    } else if line.contains("imported") && line.contains("tagged notes") {
        signals.push(Signal::ImportTaggedDone(first_number_token(line)));
    } else if line.contains("Import complete") || line.contains("import complete") {
        signals.push(Signal::ImportComplete);
    } else if line.contains("No notes found") {
        signals.push(Signal::ImportNoneFound {
            until: date_after_last(line, "to "),
            checking: line
                .rfind("for ")
                .map(|idx| line[idx + "for ".len()..].chars().take(10).collect()),
        });
    }
}

fn stored_event_count(line: &str) -> Option<u64> {
    if line.contains("Imported") && line.contains("notes") {
        count_after_token(line, "Imported")
    } else if line.contains("imported") && line.contains("tagged notes") {
        count_after_token(line, "imported")
    } else if contains_any(line, NEW_EVENT_MARKERS) {
        Some(1)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Text helpers
// ---------------------------------------------------------------------------

fn contains_any(line: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| line.contains(needle))
}

/// Slice of `line` after the last case-insensitive `needle` (already lowered).
fn tail_after_last<'a>(line: &'a str, lower: &str, needle: &str) -> Option<&'a str> {
    lower
        .rfind(needle)
        .map(|idx| &line[idx + needle.len()..])
}

fn trim_punctuation(text: &str) -> &str {
    text.trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
}

/// `YYYY-MM-DD` taken from the first ten characters after the last `marker`.
fn date_after_last(line: &str, marker: &str) -> Option<NaiveDate> {
    let idx = line.rfind(marker)?;
    let label: String = line[idx + marker.len()..].chars().take(10).collect();
    NaiveDate::parse_from_str(&label, "%Y-%m-%d").ok()
}

fn text_between<'a>(line: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let from = line.find(start)? + start.len();
    let to = line[from..].find(end)? + from;
    Some(&line[from..to])
}

/// The last run of ASCII digits, unless it is long enough to be an identifier.
fn last_short_number(line: &str) -> Option<&str> {
    let mut last: Option<(usize, usize)> = None;
    let mut run_start: Option<usize> = None;
    for (idx, byte) in line.bytes().enumerate() {
        match (byte.is_ascii_digit(), run_start) {
            (true, None) => run_start = Some(idx),
            (false, Some(start)) => {
                last = Some((start, idx));
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start {
        last = Some((start, line.len()));
    }
    let (start, end) = last?;
    (end - start < MAX_COUNT_DIGITS).then(|| &line[start..end])
}

fn count_after_token(line: &str, token: &str) -> Option<u64> {
    let mut words = line.split(' ');
    words.find(|word| *word == token)?;
    words.next()?.parse().ok()
}

fn first_number_token(line: &str) -> Option<u64> {
    line.split(' ').find_map(|word| word.parse().ok())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_short_number_prefers_last_run() {
        assert_eq!(last_short_number("wot: 12 of 3400 keys"), Some("3400"));
        assert_eq!(last_short_number("no digits here"), None);
        assert_eq!(last_short_number("ends with 77"), Some("77"));
    }

    #[test]
    fn last_short_number_rejects_identifiers() {
        assert_eq!(last_short_number("pubkeys 42 from 12345678901234"), None);
        assert_eq!(last_short_number("pubkeys 123456789"), Some("123456789"));
    }

    #[test]
    fn text_between_requires_end_after_start() {
        assert_eq!(
            text_between("Imported 4 notes from 2023-01-01 to 2023-02-01", "from ", " to"),
            Some("2023-01-01")
        );
        assert_eq!(text_between("to the moon from here", "from ", " to"), None);
    }

    #[test]
    fn date_after_last_uses_final_marker() {
        assert_eq!(
            date_after_last("from 2023-01-01 to 2023-03-05 (ok)", "to "),
            NaiveDate::from_ymd_opt(2023, 3, 5)
        );
        assert_eq!(date_after_last("to nowhere", "to "), None);
    }

    #[test]
    fn count_after_token_needs_exact_word() {
        assert_eq!(count_after_token("Imported 15 notes", "Imported"), Some(15));
        assert_eq!(count_after_token("Imported: 15 notes", "Imported"), None);
        assert_eq!(count_after_token("Imported", "Imported"), None);
    }

    #[test]
    fn trim_punctuation_strips_both_ends() {
        assert_eq!(trim_punctuation(" inbox... "), "inbox");
        assert_eq!(trim_punctuation("[chat]"), "chat");
    }
}
