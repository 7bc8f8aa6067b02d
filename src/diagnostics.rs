use crate::hal::DiagnosticSink;
use heapless::{HistoryBuffer, Vec};
use serde::{Deserialize, Serialize};
use std::fmt;

const MAX_EVENT_ENTRIES: usize = 16;
const MAX_EVENT_HISTORY: usize = 64;

/// Diagnostic trouble code, displayed as six hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DtcCode(pub u32);

impl DtcCode {
    pub const STEER_PLAUSIBILITY: DtcCode = DtcCode(0x00D0_0100);
    pub const STEER_RANGE: DtcCode = DtcCode(0x00D0_0200);
    /// Allocated to the rate limiter, which clamps and never reports it.
    pub const STEER_RATE: DtcCode = DtcCode(0x00D0_0300);
    pub const STEER_TIMEOUT: DtcCode = DtcCode(0x00D0_0400);
    pub const STEER_SENSOR: DtcCode = DtcCode(0x00D0_0500);
    pub const BRAKE_FAULT: DtcCode = DtcCode(0x00D1_0100);
    pub const BRAKE_TIMEOUT: DtcCode = DtcCode(0x00D1_0200);
    pub const BRAKE_PWM_FAIL: DtcCode = DtcCode(0x00D1_0300);
}

impl fmt::Display for DtcCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:06X}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventStatus {
    Passed,
    Failed,
}

/// Per-DTC status as kept by the event store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtcEntry {
    pub code: DtcCode,
    pub test_failed: bool,
    /// Set on the first FAILED report, survives PASSED reports.
    pub confirmed: bool,
    pub occurrences: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub sequence: u32,
    pub code: DtcCode,
    pub status: EventStatus,
}

/// Bounded in-memory diagnostic event store.
///
/// Keeps the current status of every DTC it has seen plus a rolling history
/// of reports, oldest evicted first.
#[derive(Debug, Default)]
pub struct EventStore {
    entries: Vec<DtcEntry, MAX_EVENT_ENTRIES>,
    history: HistoryBuffer<EventRecord, MAX_EVENT_HISTORY>,
    next_sequence: u32,
    dropped_codes: u32,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, code: DtcCode, status: EventStatus) {
        let failed = status == EventStatus::Failed;

        if let Some(entry) = self.entries.iter_mut().find(|e| e.code == code) {
            if failed && !entry.test_failed {
                entry.occurrences = entry.occurrences.saturating_add(1);
            }
            entry.test_failed = failed;
            entry.confirmed |= failed;
        } else {
            let entry = DtcEntry {
                code,
                test_failed: failed,
                confirmed: failed,
                occurrences: u16::from(failed),
            };
            if self.entries.push(entry).is_err() {
                self.dropped_codes = self.dropped_codes.saturating_add(1);
            }
        }

        self.history.write(EventRecord {
            sequence: self.next_sequence,
            code,
            status,
        });
        self.next_sequence = self.next_sequence.wrapping_add(1);
    }

    pub fn entry(&self, code: DtcCode) -> Option<&DtcEntry> {
        self.entries.iter().find(|e| e.code == code)
    }

    pub fn entries(&self) -> &[DtcEntry] {
        &self.entries
    }

    pub fn is_failed(&self, code: DtcCode) -> bool {
        self.entry(code).is_some_and(|e| e.test_failed)
    }

    pub fn active_codes(&self) -> impl Iterator<Item = DtcCode> + '_ {
        self.entries.iter().filter(|e| e.test_failed).map(|e| e.code)
    }

    /// Reports oldest first.
    pub fn history(&self) -> impl Iterator<Item = &EventRecord> + '_ {
        self.history.oldest_ordered()
    }

    /// Reports for `code` in arrival order.
    pub fn reports_for(&self, code: DtcCode) -> impl Iterator<Item = EventStatus> + '_ {
        self.history().filter(move |r| r.code == code).map(|r| r.status)
    }

    /// Codes that could not be tracked because the entry table was full.
    pub fn dropped_codes(&self) -> u32 {
        self.dropped_codes
    }

    /// Wipe all entries and history, as a tester's clear-DTC request would.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.history.clear();
    }
}

impl DiagnosticSink for EventStore {
    fn report_event(&mut self, code: DtcCode, status: EventStatus) {
        self.record(code, status);
    }
}
