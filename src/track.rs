//! Branch-track recorder.
//!
//! A passive observer of the branch tree: every fork, join, activation,
//! deactivation, and line pursuit is appended as one structured event.
//! The stream is written as newline-delimited JSON, one document per
//! event, for offline rendering of the branch timeline.

use std::io::{self, Write};

use serde::Serialize;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    LogicLinePursue,
    CcbranchFork,
    CcbranchJoin,
    CcbranchJoinForks,
    CcbranchActivate,
    CcbranchDeactivate,
}

/// One record of the branch track. Optional fields are omitted from the
/// serialized document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackEvent {
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fork_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub into_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub second_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl TrackEvent {
    fn new(kind: EventKind) -> Self {
        Self {
            kind,
            branch_id: None,
            fork_id: None,
            parent_id: None,
            into_id: None,
            first_id: None,
            second_id: None,
            from_id: None,
            condition: None,
            content: None,
        }
    }
}

/// Collects the event stream for one translation unit.
#[derive(Debug, Default)]
pub struct Track {
    events: Vec<TrackEvent>,
}

impl Track {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[TrackEvent] {
        &self.events
    }

    pub fn line(&mut self, branch_id: &str, content: &str) {
        let mut e = TrackEvent::new(EventKind::LogicLinePursue);
        e.branch_id = Some(branch_id.to_string());
        e.content = Some(content.to_string());
        self.events.push(e);
    }

    pub fn fork(&mut self, branch_id: &str, fork_id: &str, condition: &str) {
        let mut e = TrackEvent::new(EventKind::CcbranchFork);
        e.branch_id = Some(branch_id.to_string());
        e.fork_id = Some(fork_id.to_string());
        e.condition = Some(condition.to_string());
        self.events.push(e);
    }

    pub fn join(&mut self, first_id: &str, second_id: &str, into_id: &str, condition: &str) {
        let mut e = TrackEvent::new(EventKind::CcbranchJoin);
        e.first_id = Some(first_id.to_string());
        e.second_id = Some(second_id.to_string());
        e.into_id = Some(into_id.to_string());
        e.condition = Some(condition.to_string());
        self.events.push(e);
    }

    pub fn join_forks(&mut self, branch_id: &str, from_id: &str) {
        let mut e = TrackEvent::new(EventKind::CcbranchJoinForks);
        e.branch_id = Some(branch_id.to_string());
        e.from_id = Some(from_id.to_string());
        self.events.push(e);
    }

    pub fn activate(&mut self, branch_id: &str) {
        let mut e = TrackEvent::new(EventKind::CcbranchActivate);
        e.branch_id = Some(branch_id.to_string());
        self.events.push(e);
    }

    pub fn deactivate(&mut self, branch_id: &str) {
        let mut e = TrackEvent::new(EventKind::CcbranchDeactivate);
        e.branch_id = Some(branch_id.to_string());
        self.events.push(e);
    }

    /// Writes the stream as newline-delimited JSON.
    pub fn write_jsonl<W: Write>(&self, mut w: W) -> io::Result<()> {
        for event in &self.events {
            serde_json::to_writer(&mut w, event)?;
            writeln!(w)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_stream_schema() {
        let mut track = Track::new();
        track.fork("*", "*:1", "defined(A)");
        track.deactivate("*");
        track.line("*:1", "int x;");
        track.join("*:1", "*:2", "*:3", "1");

        let mut out = Vec::new();
        track.write_jsonl(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[0],
            r#"{"kind":"ccbranch_fork","branch_id":"*","fork_id":"*:1","condition":"defined(A)"}"#
        );
        assert_eq!(lines[1], r#"{"kind":"ccbranch_deactivate","branch_id":"*"}"#);
        assert!(lines[2].contains(r#""content":"int x;""#));
        assert!(lines[3].contains(r#""kind":"ccbranch_join""#));
    }
}
