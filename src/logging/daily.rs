use std::{
    collections::HashMap,
    fs::File,
    io::{LineWriter, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use chrono::NaiveDate;
use eyre::Context;

use super::{
    formatters::ContextFormatter, record::LogRecord, report_sink_failure, LogFormatter, LogSink,
};

/// Directory used for records that carry no entity id at all. Distinct from
/// `_unknown`, which is what an explicitly empty id maps to. Neither can be
/// produced by escaping a real id.
pub const NO_ENTITY_PLACEHOLDER: &str = "_none";
const EMPTY_ENTITY: &str = "_unknown";
const DISPLAY_NAME_FILE: &str = "display_name.txt";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileHandleKey {
    pub entity_id: String,
    pub day: NaiveDate,
}

type SharedHandle = Arc<Mutex<LineWriter<File>>>;

/// One append-mode file per (entity, day). An entity only ever has the
/// handle for the most recent day it was written on; moving to a new day
/// closes the previous one.
pub struct DailyPerEntitySink {
    root: PathBuf,
    formatter: ContextFormatter,
    handles: RwLock<HashMap<FileHandleKey, SharedHandle>>,
    // Serialises the slow path: rotation, directory creation, opening.
    open_lock: Mutex<()>,
    display_names: Mutex<HashMap<String, String>>,
}

impl DailyPerEntitySink {
    pub fn new(root: impl Into<PathBuf>, formatter: ContextFormatter) -> Self {
        Self {
            root: root.into(),
            formatter,
            handles: RwLock::new(HashMap::new()),
            open_lock: Mutex::new(()),
            display_names: Mutex::new(HashMap::new()),
        }
    }

    pub fn key_for(&self, record: &LogRecord) -> FileHandleKey {
        let entity_id = match record.context.entity_id.as_deref() {
            None => NO_ENTITY_PLACEHOLDER.to_string(),
            Some("") => EMPTY_ENTITY.to_string(),
            Some(id) => escape_entity_id(id),
        };

        FileHandleKey {
            entity_id,
            day: self.formatter.time().local(record.timestamp).date_naive(),
        }
    }

    pub fn entity_dir(&self, entity_id: &str) -> PathBuf {
        self.root.join(format!("entity_{}", entity_id))
    }

    pub fn log_path(&self, key: &FileHandleKey) -> PathBuf {
        self.entity_dir(&key.entity_id)
            .join(format!("{}.log", key.day.format("%Y-%m-%d")))
    }

    /// Keys of every handle currently open, sorted.
    pub fn open_handles(&self) -> Vec<FileHandleKey> {
        let handles = self.handles.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<_> = handles.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Writes one record. Failures are reported to stderr and the record is
    /// dropped; nothing is returned to the caller.
    pub fn write(&self, record: &LogRecord) {
        if let Err(err) = self.try_write(record) {
            report_sink_failure("daily-per-entity", &err);
        }
    }

    fn try_write(&self, record: &LogRecord) -> eyre::Result<()> {
        let key = self.key_for(record);
        let handle = match self.cached_handle(&key) {
            Some(handle) => handle,
            None => self.open_handle(&key, record)?,
        };

        let line = self.formatter.format(record);
        let mut writer = handle.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{}", line)
            .with_context(|| format!("Failed writing to {}", self.log_path(&key).display()))?;
        writer.flush().context("Can't flush entity log")
    }

    fn cached_handle(&self, key: &FileHandleKey) -> Option<SharedHandle> {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn open_handle(&self, key: &FileHandleKey, record: &LogRecord) -> eyre::Result<SharedHandle> {
        let _guard = self.open_lock.lock().unwrap_or_else(PoisonError::into_inner);

        // Another writer may have opened it while we waited for the lock.
        if let Some(handle) = self.cached_handle(key) {
            return Ok(handle);
        }

        self.close_entity(&key.entity_id);

        let dir = self.entity_dir(&key.entity_id);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed creating entity directory {}", dir.display()))?;

        if let Some(name) = record.context.entity_display_name.as_deref() {
            self.store_display_name(&key.entity_id, &dir, name);
        }

        let path = self.log_path(key);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed opening or creating log file {}", path.display()))?;

        let handle: SharedHandle = Arc::new(Mutex::new(LineWriter::new(file)));
        self.handles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), handle.clone());

        tracing::trace!(entity = %key.entity_id, day = %key.day, "opened entity log");
        Ok(handle)
    }

    /// Drops every handle the entity holds for other days.
    fn close_entity(&self, entity_id: &str) {
        let stale: Vec<SharedHandle> = {
            let mut handles = self.handles.write().unwrap_or_else(PoisonError::into_inner);
            let keys: Vec<_> = handles
                .keys()
                .filter(|k| k.entity_id == entity_id)
                .cloned()
                .collect();
            keys.iter().filter_map(|k| handles.remove(k)).collect()
        };

        for handle in stale {
            close_handle(handle);
        }
    }

    fn store_display_name(&self, entity_id: &str, dir: &Path, name: &str) {
        let mut cache = self
            .display_names
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if cache.get(entity_id).map(String::as_str) == Some(name) {
            return;
        }

        let path = dir.join(DISPLAY_NAME_FILE);
        match std::fs::write(&path, name) {
            Ok(()) => {
                cache.insert(entity_id.to_string(), name.to_string());
            }
            Err(err) => eprintln!(
                "chatlog: failed writing display name to {}: {}",
                path.display(),
                err
            ),
        }
    }

    /// Closes every open handle. Close errors are ignored.
    pub fn close_all(&self) {
        let drained: Vec<SharedHandle> = {
            let mut handles = self.handles.write().unwrap_or_else(PoisonError::into_inner);
            handles.drain().map(|(_, handle)| handle).collect()
        };

        for handle in drained {
            close_handle(handle);
        }
    }
}

fn close_handle(handle: SharedHandle) {
    let mut writer = handle.lock().unwrap_or_else(PoisonError::into_inner);
    let _ = writer.flush();
    // The file itself closes when the last clone of the handle is dropped.
}

/// Maps an entity id onto a single path component, injectively: `_` doubles
/// and any byte outside `[A-Za-z0-9-]` becomes `_xx` (lowercase hex). An
/// escaped id never contains `_` followed by a non-hex letter.
fn escape_entity_id(id: &str) -> String {
    let mut escaped = String::with_capacity(id.len());
    for byte in id.bytes() {
        match byte {
            b'_' => escaped.push_str("__"),
            b if b.is_ascii_alphanumeric() || b == b'-' => escaped.push(char::from(b)),
            b => escaped.push_str(&format!("_{:02x}", b)),
        }
    }
    escaped
}

impl LogSink for DailyPerEntitySink {
    fn write_log(&self, record: &LogRecord) -> eyre::Result<()> {
        self.write(record);
        Ok(())
    }

    fn flush(&self) {
        let handles: Vec<SharedHandle> = self
            .handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        for handle in handles {
            let _ = handle.lock().unwrap_or_else(PoisonError::into_inner).flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{
        formatters::{TimeFormatter, DEFAULT_TIME_FORMAT},
        record::{Channel, LogContext},
    };
    use chrono::{DateTime, FixedOffset, TimeZone, Utc};
    use tempfile::TempDir;

    fn sink(dir: &TempDir) -> DailyPerEntitySink {
        DailyPerEntitySink::new(dir.path(), ContextFormatter::default())
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn chat(entity: LogContext, when: DateTime<Utc>, message: &str) -> LogRecord {
        LogRecord::new(Channel::Chat, log::Level::Info, message)
            .with_context(entity)
            .with_timestamp(when)
    }

    fn lines(path: PathBuf) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn one_handle_per_entity_tracks_the_latest_day() {
        let dir = TempDir::new().expect("create temp dir");
        let sink = sink(&dir);

        for day in 1..=3 {
            for hour in [1, 5, 9] {
                sink.write(&chat(LogContext::entity("42"), at(2024, 3, day, hour), "m"));
                let open = sink.open_handles();
                assert_eq!(open.len(), 1);
                assert_eq!(open[0].day, NaiveDate::from_ymd_opt(2024, 3, day).unwrap());
            }
        }
    }

    #[test]
    fn day_change_rotates_into_a_new_file() {
        let dir = TempDir::new().expect("create temp dir");
        let sink = sink(&dir);

        sink.write(&chat(LogContext::entity("7"), at(2024, 1, 1, 23), "first"));
        sink.write(&chat(LogContext::entity("7"), at(2024, 1, 2, 0), "second"));

        let day1 = lines(dir.path().join("entity_7/2024-01-01.log"));
        let day2 = lines(dir.path().join("entity_7/2024-01-02.log"));
        assert_eq!(day1.len(), 1);
        assert!(day1[0].ends_with("- first"));
        assert_eq!(day2.len(), 1);
        assert!(day2[0].ends_with("- second"));
    }

    #[test]
    fn days_follow_the_configured_timezone() {
        let dir = TempDir::new().expect("create temp dir");
        let offset = FixedOffset::east_opt(3 * 3600 + 30 * 60).unwrap();
        let sink = DailyPerEntitySink::new(
            dir.path(),
            ContextFormatter::new(TimeFormatter::new(offset, DEFAULT_TIME_FORMAT)),
        );

        // 21:00 UTC is already the next day at +03:30.
        let record = chat(LogContext::entity("9"), at(2024, 1, 1, 21), "late");
        assert_eq!(
            sink.key_for(&record).day,
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
        );
        sink.write(&record);
        assert!(dir.path().join("entity_9/2024-01-02.log").exists());
    }

    #[test]
    fn missing_and_empty_entity_ids_are_kept_apart() {
        let dir = TempDir::new().expect("create temp dir");
        let sink = sink(&dir);
        let when = at(2024, 1, 1, 12);

        let absent = chat(LogContext::default(), when, "no id");
        let empty = chat(LogContext::entity(""), when, "empty id");

        assert_eq!(sink.key_for(&absent).entity_id, NO_ENTITY_PLACEHOLDER);
        assert_eq!(sink.key_for(&empty).entity_id, EMPTY_ENTITY);

        // Literal ids spelled like the reserved directories stay separate.
        let literal = |id: &str| sink.key_for(&chat(LogContext::entity(id), when, "x")).entity_id;
        assert_eq!(literal("_none"), "__none");
        assert_eq!(literal("unknown"), "unknown");
        assert_eq!(literal("_unknown"), "__unknown");
    }

    #[test]
    fn distinct_entity_ids_never_share_a_directory() {
        let dir = TempDir::new().expect("create temp dir");
        let sink = sink(&dir);
        let when = at(2024, 1, 1, 12);

        let ids = ["a.b", "a_b", "a_2eb", "a__b", "", "_none", "unknown", "ü", "_c3_bc"];
        let mut dirs: Vec<String> = ids
            .iter()
            .map(|id| sink.key_for(&chat(LogContext::entity(*id), when, "x")).entity_id)
            .collect();
        dirs.push(sink.key_for(&chat(LogContext::default(), when, "x")).entity_id);

        let total = dirs.len();
        dirs.sort();
        dirs.dedup();
        assert_eq!(dirs.len(), total);

        sink.write(&chat(LogContext::entity("a.b"), when, "dotted"));
        sink.write(&chat(LogContext::entity("a_b"), when, "underscored"));
        assert_eq!(lines(dir.path().join("entity_a_2eb/2024-01-01.log")).len(), 1);
        assert_eq!(lines(dir.path().join("entity_a__b/2024-01-01.log")).len(), 1);
    }

    #[test]
    fn entity_ids_cannot_escape_the_root() {
        let dir = TempDir::new().expect("create temp dir");
        let sink = sink(&dir);
        let record = chat(LogContext::entity("../../etc"), at(2024, 1, 1, 0), "x");

        let key = sink.key_for(&record);
        assert_eq!(key.entity_id, "_2e_2e_2f_2e_2e_2fetc");
        assert!(sink.log_path(&key).starts_with(dir.path()));
    }

    #[test]
    fn negative_chat_ids_are_preserved() {
        let dir = TempDir::new().expect("create temp dir");
        let sink = sink(&dir);
        let record = chat(LogContext::entity("-100123"), at(2024, 1, 1, 0), "x");
        assert_eq!(sink.key_for(&record).entity_id, "-100123");
    }

    #[test]
    fn display_name_is_written_once_per_change() {
        let dir = TempDir::new().expect("create temp dir");
        let sink = sink(&dir);
        let named = LogContext::entity("5").with_display_name("Book Club");
        let sidecar = dir.path().join("entity_5").join(DISPLAY_NAME_FILE);

        sink.write(&chat(named.clone(), at(2024, 1, 1, 0), "a"));
        assert_eq!(std::fs::read_to_string(&sidecar).unwrap(), "Book Club");

        // Same name on a new day: the cache short-circuits, so a removed
        // sidecar is not recreated.
        std::fs::remove_file(&sidecar).unwrap();
        sink.write(&chat(named, at(2024, 1, 2, 0), "b"));
        assert!(!sidecar.exists());

        let renamed = LogContext::entity("5").with_display_name("Reading Club");
        sink.write(&chat(renamed, at(2024, 1, 3, 0), "c"));
        assert_eq!(std::fs::read_to_string(&sidecar).unwrap(), "Reading Club");
    }

    #[test]
    fn unwritable_root_drops_the_record_without_panicking() {
        let dir = TempDir::new().expect("create temp dir");
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let sink = DailyPerEntitySink::new(&blocker, ContextFormatter::default());

        sink.write(&chat(LogContext::entity("1"), at(2024, 1, 1, 0), "lost"));

        assert!(sink.open_handles().is_empty());
        assert!(sink.write_log(&chat(LogContext::entity("1"), at(2024, 1, 1, 0), "x")).is_ok());
    }

    #[test]
    fn close_all_releases_every_handle() {
        let dir = TempDir::new().expect("create temp dir");
        let sink = sink(&dir);
        for id in ["1", "2", "3"] {
            sink.write(&chat(LogContext::entity(id), at(2024, 1, 1, 0), "x"));
        }
        assert_eq!(sink.open_handles().len(), 3);

        sink.close_all();
        assert!(sink.open_handles().is_empty());
    }

    #[test]
    fn concurrent_writers_share_one_handle() {
        let dir = TempDir::new().expect("create temp dir");
        let sink = Arc::new(sink(&dir));
        let when = at(2024, 6, 1, 8);

        let workers: Vec<_> = (0..8)
            .map(|n| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        sink.write(&chat(LogContext::entity("77"), when, &format!("{}-{}", n, i)));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(sink.open_handles().len(), 1);
        assert_eq!(lines(dir.path().join("entity_77/2024-06-01.log")).len(), 200);
    }
}
