use std::path::Path;

use chrono::{DateTime, Datelike, FixedOffset, Offset, Utc, Weekday};

use crate::config::Config;
use crate::counter::{PersistentCounter, Sequence};
use crate::geo::maidenhead_grid;
use crate::report::{MessageReport, Report, MAX_MESSAGE_LEN};
use crate::storage::{JsonFile, MessageTracking};
use crate::types::Fix;
use crate::APP_NAME;

pub const MSG_SEQUENCE: &str = "msg_sequence";
pub const MSG_SEQUENCE_MODULO: u32 = 100_000;

/// A weekly on-air check-in net
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CheckInNet {
    pub name: &'static str,
    pub weekday: Weekday,
    /// Zone in which "today" is decided, as hours east of UTC
    pub utc_offset_hours: i32,
    pub addressee: &'static str,
    /// Text before the hashtag, e.g. `CQ HOTG`
    pub greeting: &'static str,
}

impl CheckInNet {
    pub fn text_prefix(&self) -> String {
        format!("{} #{}", self.greeting, self.name)
    }

    fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix())
    }
}

pub const APRS_THURSDAY: CheckInNet = CheckInNet {
    name: "APRSThursday",
    weekday: Weekday::Thu,
    utc_offset_hours: 0,
    addressee: "ANSRVR",
    greeting: "CQ HOTG",
};

pub const APRSMY_SUNDAY: CheckInNet = CheckInNet {
    name: "APRSMYSunday",
    weekday: Weekday::Sun,
    utc_offset_hours: 8,
    addressee: "APRSMY",
    greeting: "CHECK",
};

/// One check-in that should go out now
#[derive(Clone, Debug, PartialEq)]
pub struct DueMessage {
    pub net: CheckInNet,
    /// Station the message is sent as
    pub source: String,
    /// Own callsign when `source` is an additional sender
    pub via: Option<String>,
    pub text: String,
    tracking_key: String,
    local_time: DateTime<FixedOffset>,
}

impl DueMessage {
    pub fn tracking_key(&self) -> &str {
        &self.tracking_key
    }

    pub fn report(&self, sequence: u32) -> Report {
        Report::Message(MessageReport {
            name: self.net.name.to_string(),
            from: self.source.clone(),
            via: self.via.clone(),
            addressee: self.net.addressee.to_string(),
            text: self.text.clone(),
            sequence,
        })
    }
}

#[derive(Clone, Debug)]
struct Entry {
    net: CheckInNet,
    sender: Option<String>,
}

/// Weekly check-in messages, at most one per net and sender per local day.
///
/// Send times live in `msg_tracking.json`; the message sequence is committed
/// only once a message has actually been sent.
pub struct ScheduledMessages {
    from_call: String,
    entries: Vec<Entry>,
    tracking: JsonFile<MessageTracking>,
    sequence: PersistentCounter,
}

impl ScheduledMessages {
    pub fn new(from_call: &str, nets: &[CheckInNet], additional_senders: &[String], state_dir: &Path) -> Self {
        let senders: Vec<Option<String>> = std::iter::once(None)
            .chain(additional_senders.iter().cloned().map(Some))
            .collect();
        let entries = nets
            .iter()
            .flat_map(|net| {
                senders.iter().map(move |sender| Entry {
                    net: *net,
                    sender: sender.clone(),
                })
            })
            .collect();

        ScheduledMessages {
            from_call: from_call.to_string(),
            entries,
            tracking: JsonFile::new(state_dir.join("msg_tracking.json")),
            sequence: Sequence::counter(state_dir, MSG_SEQUENCE, MSG_SEQUENCE_MODULO),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        let mut nets = Vec::new();
        if cfg.thursday_checkin {
            nets.push(APRS_THURSDAY);
        }
        if cfg.sunday_checkin {
            nets.push(APRSMY_SUNDAY);
        }
        Self::new(&cfg.from_call(), &nets, &cfg.additional_senders(), &cfg.state_dir)
    }

    /// Messages due at `now`, located at `location`. Over-long texts are
    /// logged and left out.
    pub fn due(&self, now: DateTime<Utc>, location: &Fix) -> Vec<DueMessage> {
        if self.entries.is_empty() {
            return Vec::new();
        }
        let tracking = self.tracking.load();
        let grid = maidenhead_grid(location.latitude, location.longitude, 6);

        self.entries
            .iter()
            .filter_map(|entry| {
                let local = now.with_timezone(&entry.net.offset());
                if local.weekday() != entry.net.weekday {
                    return None;
                }

                let source = entry.sender.clone().unwrap_or_else(|| self.from_call.clone());
                let tracking_key = format!("{},{}", entry.net.name, source);
                let today = local.format("%Y-%m-%d").to_string();
                if tracking
                    .get(&tracking_key)
                    .is_some_and(|last| last.starts_with(&today))
                {
                    return None;
                }

                let text = format!(
                    "{} from ({}) via {}",
                    entry.net.text_prefix(),
                    grid,
                    APP_NAME
                );
                if text.chars().count() > MAX_MESSAGE_LEN {
                    log::error!(
                        "Message length {} exceeds limit of {} characters: {}",
                        text.chars().count(),
                        MAX_MESSAGE_LEN,
                        text
                    );
                    return None;
                }

                Some(DueMessage {
                    net: entry.net,
                    via: entry.sender.as_ref().map(|_| self.from_call.clone()),
                    source,
                    text,
                    tracking_key,
                    local_time: local,
                })
            })
            .collect()
    }

    /// Sequence number the next sent message will carry.
    pub fn peek_sequence(&self) -> u32 {
        self.sequence.peek_next()
    }

    /// Commit the sequence number and record today's send.
    pub fn mark_sent(&mut self, message: &DueMessage) {
        self.sequence.acquire().next();
        let mut tracking = self.tracking.load();
        tracking.insert(message.tracking_key.clone(), message.local_time.to_rfc3339());
        self.tracking.save_or_log(&tracking);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::TempDir;

    fn location() -> Fix {
        Fix::stationary(Utc::now(), 3.139, 101.6869, 0.0)
    }

    /// Thursday 2025-06-05, 10:00 UTC
    fn thursday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 5, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_nothing_due_on_other_days() {
        let dir = TempDir::new().unwrap();
        let scheduled = ScheduledMessages::new("N0CALL", &[APRS_THURSDAY], &[], dir.path());
        let wednesday = thursday() - chrono::Duration::days(1);
        assert!(scheduled.due(wednesday, &location()).is_empty());
    }

    #[test]
    fn test_thursday_message_once_per_day() {
        let dir = TempDir::new().unwrap();
        let mut scheduled = ScheduledMessages::new("N0CALL", &[APRS_THURSDAY], &[], dir.path());

        let due = scheduled.due(thursday(), &location());
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].text, format!("CQ HOTG #APRSThursday from (OJ03UD) via {}", APP_NAME));
        assert_eq!(due[0].tracking_key(), "APRSThursday,N0CALL");
        assert_eq!(scheduled.peek_sequence(), 1);

        scheduled.mark_sent(&due[0]);
        assert_eq!(scheduled.peek_sequence(), 2);
        assert!(scheduled.due(thursday(), &location()).is_empty());

        // Next Thursday it is due again
        let next_week = thursday() + chrono::Duration::days(7);
        assert_eq!(scheduled.due(next_week, &location()).len(), 1);
    }

    #[test]
    fn test_unsent_message_stays_due_and_keeps_sequence() {
        let dir = TempDir::new().unwrap();
        let scheduled = ScheduledMessages::new("N0CALL", &[APRS_THURSDAY], &[], dir.path());
        assert_eq!(scheduled.due(thursday(), &location()).len(), 1);
        assert_eq!(scheduled.due(thursday(), &location()).len(), 1);
        assert_eq!(scheduled.peek_sequence(), 1);
        assert!(!dir.path().join("msg_sequence.tmp").exists());
    }

    #[test]
    fn test_sunday_uses_utc_plus_8() {
        let dir = TempDir::new().unwrap();
        let scheduled = ScheduledMessages::new("N0CALL", &[APRSMY_SUNDAY], &[], dir.path());

        // Saturday 20:00 UTC is already Sunday 04:00 in UTC+8
        let saturday_evening = Utc.with_ymd_and_hms(2025, 6, 7, 20, 0, 0).unwrap();
        let due = scheduled.due(saturday_evening, &location());
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].net.addressee, "APRSMY");
        assert!(due[0].text.starts_with("CHECK #APRSMYSunday"));

        // Sunday 17:00 UTC is Monday in UTC+8
        let sunday_evening = Utc.with_ymd_and_hms(2025, 6, 8, 17, 0, 0).unwrap();
        assert!(scheduled.due(sunday_evening, &location()).is_empty());
    }

    #[test]
    fn test_additional_senders_go_via_own_call() {
        let dir = TempDir::new().unwrap();
        let mut scheduled = ScheduledMessages::new(
            "N0CALL-9",
            &[APRS_THURSDAY],
            &["9W2ABC".to_string()],
            dir.path(),
        );

        let due = scheduled.due(thursday(), &location());
        assert_eq!(due.len(), 2);
        assert_eq!((due[0].source.as_str(), due[0].via.as_deref()), ("N0CALL-9", None));
        assert_eq!((due[1].source.as_str(), due[1].via.as_deref()), ("9W2ABC", Some("N0CALL-9")));

        scheduled.mark_sent(&due[1]);
        let remaining = scheduled.due(thursday(), &location());
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].source, "N0CALL-9");

        let tracking = fs::read_to_string(dir.path().join("msg_tracking.json")).unwrap();
        assert!(tracking.contains("APRSThursday,9W2ABC"));
    }

    #[test]
    fn test_report_carries_sequence() {
        let dir = TempDir::new().unwrap();
        let scheduled = ScheduledMessages::new("N0CALL", &[APRS_THURSDAY], &[], dir.path());
        let due = scheduled.due(thursday(), &location());
        match due[0].report(7) {
            Report::Message(msg) => {
                assert_eq!(msg.sequence, 7);
                assert_eq!(msg.addressee, "ANSRVR");
            }
            other => panic!("unexpected report {:?}", other),
        }
    }
}
