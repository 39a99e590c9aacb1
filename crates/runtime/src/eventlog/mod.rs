//! C1 — Event Log: an append-only, per-line-atomic JSON stream with a
//! monotonic, process-wide sequence number, and the basis for every other
//! component's coordination state (§4.1).

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{Read as _, Write as _};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::state::BoardState;
use crate::types::error::EventLogError;
use crate::types::{EventType, Seq};

const MAX_FILE_BYTES: u64 = 50 * 1024 * 1024;
const SEQ_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// One immutable `(seq, type, ts, data)` tuple (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub seq: Seq,
    #[serde(rename = "type")]
    pub event_type_raw: String,
    pub ts: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl Event {
    pub fn event_type(&self) -> Option<EventType> {
        EventType::parse(&self.event_type_raw)
    }
}

struct ReadCache {
    latest_seq: Seq,
    state: BoardState,
}

/// Append-only log rooted at `<project>/.coordination/`.
pub struct EventLog {
    dir: PathBuf,
    cache: Mutex<Option<ReadCache>>,
}

impl EventLog {
    pub fn open(project_root: &Path) -> Result<Self, EventLogError> {
        let dir = project_root.join(".coordination");
        std::fs::create_dir_all(&dir).map_err(|e| EventLogError::Io(e.to_string()))?;
        Ok(Self {
            dir,
            cache: Mutex::new(None),
        })
    }

    fn events_path(&self) -> PathBuf {
        self.dir.join("events.jsonl")
    }

    fn seq_path(&self) -> PathBuf {
        self.dir.join(".events.seq")
    }

    /// Atomically assigns the next `seq` and appends one checksummed line.
    /// The only locked section is the `.events.seq` counter
    /// (read-modify-write under an exclusive advisory lock); the append
    /// itself relies on `O_APPEND` plus a single-syscall write of the full
    /// line, which is the atomicity boundary (§4.1, §5).
    pub fn append(&self, event_type: EventType, data: serde_json::Value) -> Result<Seq, EventLogError> {
        let events_path = self.events_path();
        if let Ok(meta) = std::fs::metadata(&events_path) {
            if meta.len() >= MAX_FILE_BYTES {
                return Err(EventLogError::FileTooLarge);
            }
        }

        let seq = self.next_seq()?;
        let ts = Utc::now();
        let event = Event {
            seq,
            event_type_raw: event_type.as_str().to_string(),
            ts,
            data,
        };
        let json = serde_json::to_string(&event).map_err(|e| EventLogError::Serialization(e.to_string()))?;
        let checksum = checksum8(&json);
        let line = format!("{json}|{checksum}\n");

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&events_path)
            .map_err(|e| EventLogError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| EventLogError::Io(e.to_string()))?;

        *self.cache.lock() = None;
        Ok(seq)
    }

    fn next_seq(&self) -> Result<Seq, EventLogError> {
        let seq_path = self.seq_path();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&seq_path)
            .map_err(|e| EventLogError::Io(e.to_string()))?;
        let mut locked = fd_lock::RwLock::new(file);
        let mut guard = locked
            .try_write()
            .or_else(|_| {
                // Fall back to a blocking wait bounded by SEQ_LOCK_TIMEOUT; fd-lock's
                // try_write polling loop stands in for a timed blocking acquire.
                let start = std::time::Instant::now();
                loop {
                    if let Ok(guard) = locked.try_write() {
                        return Ok(guard);
                    }
                    if start.elapsed() > SEQ_LOCK_TIMEOUT {
                        return Err(());
                    }
                    std::thread::sleep(Duration::from_millis(20));
                }
            })
            .map_err(|_| EventLogError::LockTimeout {
                resource: ".events.seq".to_string(),
                timeout_secs: SEQ_LOCK_TIMEOUT.as_secs(),
            })?;

        let mut contents = String::new();
        guard.read_to_string(&mut contents).map_err(|e| EventLogError::Io(e.to_string()))?;
        let current: Seq = contents.trim().parse().unwrap_or(0);
        let next = current + 1;

        use std::io::Seek;
        guard.seek(std::io::SeekFrom::Start(0)).map_err(|e| EventLogError::Io(e.to_string()))?;
        guard.set_len(0).map_err(|e| EventLogError::Io(e.to_string()))?;
        guard
            .write_all(next.to_string().as_bytes())
            .map_err(|e| EventLogError::Io(e.to_string()))?;
        guard.sync_all().map_err(|e| EventLogError::Io(e.to_string()))?;
        Ok(next)
    }

    /// Full scan from `since_seq` (exclusive of nothing before it); corrupt
    /// or short-checksum lines are skipped with a warning and counted, but
    /// replay continues (§4.1).
    pub fn read(&self, since_seq: Seq) -> Result<Vec<Event>, EventLogError> {
        let path = self.events_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| EventLogError::Io(e.to_string()))?;
        let mut events = Vec::new();
        let mut corrupt_count = 0usize;

        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_line(line) {
                Some(event) => {
                    if event.seq > since_seq {
                        events.push(event);
                    }
                }
                None => {
                    corrupt_count += 1;
                    tracing::warn!(line_preview = %line.chars().take(80).collect::<String>(), "skipping corrupt event log line");
                }
            }
        }
        if corrupt_count > 0 {
            tracing::warn!(corrupt_count, "event log replay skipped corrupt lines");
        }
        events.sort_by_key(|e| e.seq);
        Ok(events)
    }

    /// Folds every event from `seq=0` through a closed dispatch table into
    /// the same `BoardState` shape the blackboard persists (§4.1, §8
    /// property 2). A cache keyed on "latest observed seq" is invalidated
    /// on append and whenever the on-disk latest seq no longer matches.
    pub fn current_state(&self, use_cache: bool) -> Result<BoardState, EventLogError> {
        let events = self.read(0)?;
        let latest = events.last().map(|e| e.seq).unwrap_or(0);

        if use_cache {
            let mut guard = self.cache.lock();
            if let Some(cache) = guard.as_ref() {
                if cache.latest_seq == latest {
                    return Ok(cache.state.clone());
                }
            }
            let state = self.fold(&events);
            *guard = Some(ReadCache {
                latest_seq: latest,
                state: state.clone(),
            });
            return Ok(state);
        }

        Ok(self.fold(&events))
    }

    fn fold(&self, events: &[Event]) -> BoardState {
        let mut state = BoardState::default();
        for event in events {
            match event.event_type() {
                Some(event_type) => state.apply(event_type, event.ts, &event.data),
                None => tracing::warn!(event_type = %event.event_type_raw, "skipping unknown event type during replay"),
            }
        }
        state.expire_stale_chains(Utc::now());
        state
    }
}

fn checksum8(json: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(json.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..8].to_string()
}

/// Parses one on-disk line. Accepts both the checksummed
/// `<json>|<md5_8>\n` format and legacy bare-JSON lines (§6).
fn parse_line(line: &str) -> Option<Event> {
    if let Some((json_part, checksum)) = line.rsplit_once('|') {
        if checksum8(json_part) == checksum {
            return serde_json::from_str(json_part).ok();
        }
        return None;
    }
    serde_json::from_str(line).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn open_tmp() -> (tempfile::TempDir, EventLog) {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(dir.path()).unwrap();
        (dir, log)
    }

    #[test]
    fn append_assigns_monotonic_gap_free_seq() {
        let (_dir, log) = open_tmp();
        let a = log.append(EventType::AgentRegistered, json!({"agent_id": "a1"})).unwrap();
        let b = log.append(EventType::FindingAdded, json!({"seq": 1, "agent_id": "a1"})).unwrap();
        let c = log.append(EventType::AgentHeartbeat, json!({"agent_id": "a1"})).unwrap();
        assert_eq!((a, b, c), (1, 2, 3));
    }

    #[test]
    fn corrupt_line_is_skipped_not_fatal() {
        let (_dir, log) = open_tmp();
        log.append(EventType::AgentRegistered, json!({"agent_id": "a1"})).unwrap();
        let mut f = OpenOptions::new().append(true).open(log.events_path()).unwrap();
        f.write_all(b"not json at all|deadbeef\n").unwrap();
        log.append(EventType::AgentHeartbeat, json!({"agent_id": "a1"})).unwrap();

        let events = log.read(0).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn legacy_line_without_checksum_still_parses() {
        let (_dir, log) = open_tmp();
        let event = Event {
            seq: 1,
            event_type_raw: "agent.registered".to_string(),
            ts: Utc::now(),
            data: json!({"agent_id": "a1"}),
        };
        let json_line = serde_json::to_string(&event).unwrap();
        std::fs::write(log.events_path(), format!("{json_line}\n")).unwrap();

        let events = log.read(0).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].seq, 1);
    }

    #[test]
    fn current_state_replays_agent_registration() {
        let (_dir, log) = open_tmp();
        log.append(
            EventType::AgentRegistered,
            json!({"agent_id": "a1", "task": "explore", "scope": ["src/**"], "interests": ["perf"]}),
        )
        .unwrap();
        let state = log.current_state(false).unwrap();
        assert!(state.agents.contains_key("a1"));
        assert_eq!(state.agents["a1"].task, "explore");
    }

    #[test]
    fn unknown_event_type_is_skipped_not_fatal() {
        let (_dir, log) = open_tmp();
        let mut f = OpenOptions::new().append(true).create(true).open(log.events_path()).unwrap();
        let json = serde_json::to_string(&json!({
            "seq": 1, "type": "totally.unknown", "ts": Utc::now(), "data": {}
        }))
        .unwrap();
        let checksum = checksum8(&json);
        f.write_all(format!("{json}|{checksum}\n").as_bytes()).unwrap();

        let state = log.current_state(false).unwrap();
        assert!(state.agents.is_empty());
    }
}
