use std::{
    fs::File,
    io::{LineWriter, Write},
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use eyre::Context;

use super::{record::LogRecord, LogFormatter, LogSink};

struct ActiveFile {
    writer: LineWriter<File>,
    written: u64,
    // Set while `writer` still points at a file rotated away from the base
    // path, i.e. reopening the base path after a rollover failed.
    detached: bool,
}

/// Append-only file that rolls over to `<name>.1 .. <name>.N` once it would
/// grow past `max_bytes`.
pub struct RotatingFileSink {
    file: Mutex<ActiveFile>,
    file_path: PathBuf,
    formatter: Box<dyn LogFormatter>,
    max_bytes: u64,
    backup_count: u32,
}

fn open_append(path: &Path) -> eyre::Result<File> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed opening or creating log file {}", path.display()))
}

impl RotatingFileSink {
    pub fn new(
        path: impl Into<PathBuf>,
        formatter: Box<dyn LogFormatter>,
        max_bytes: u64,
        backup_count: u32,
    ) -> eyre::Result<Self> {
        let file_path: PathBuf = path.into();
        let file = open_append(&file_path)?;
        let written = file
            .metadata()
            .with_context(|| format!("Can't stat log file {}", file_path.display()))?
            .len();

        Ok(Self {
            file: Mutex::new(ActiveFile {
                writer: LineWriter::new(file),
                written,
                detached: false,
            }),
            file_path,
            formatter,
            max_bytes,
            backup_count,
        })
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    fn backup_path(&self, index: u32) -> PathBuf {
        let mut name = self.file_path.clone().into_os_string();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    fn rotate(&self, active: &mut ActiveFile) -> eyre::Result<()> {
        active.writer.flush().context("Can't flush file before rotation")?;

        if self.backup_count == 0 {
            std::fs::OpenOptions::new()
                .write(true)
                .truncate(true)
                .open(&self.file_path)
                .with_context(|| format!("Failed truncating {}", self.file_path.display()))?;
            // The writer appends, so it simply continues at the new end.
            active.written = 0;
            return Ok(());
        }

        let oldest = self.backup_path(self.backup_count);
        if oldest.exists() {
            std::fs::remove_file(&oldest)
                .with_context(|| format!("Failed removing {}", oldest.display()))?;
        }

        for index in (1..self.backup_count).rev() {
            let from = self.backup_path(index);
            if from.exists() {
                std::fs::rename(&from, self.backup_path(index + 1))
                    .with_context(|| format!("Failed rolling over {}", from.display()))?;
            }
        }

        std::fs::rename(&self.file_path, self.backup_path(1))
            .with_context(|| format!("Failed rolling over {}", self.file_path.display()))?;
        active.detached = true;

        tracing::debug!(path = %self.file_path.display(), "rotated log file");
        self.reattach(active)
    }

    /// Points the writer back at the base path.
    fn reattach(&self, active: &mut ActiveFile) -> eyre::Result<()> {
        let file = open_append(&self.file_path)?;
        active.written = file
            .metadata()
            .with_context(|| format!("Can't stat log file {}", self.file_path.display()))?
            .len();
        active.writer = LineWriter::new(file);
        active.detached = false;
        Ok(())
    }
}

impl LogSink for RotatingFileSink {
    fn write_log(&self, record: &LogRecord) -> eyre::Result<()> {
        let line = format!("{}\n", self.formatter.format(record));
        let mut active = self.file.lock().unwrap_or_else(PoisonError::into_inner);

        if active.detached {
            self.reattach(&mut active)?;
        }

        let incoming = line.len() as u64;
        if self.max_bytes > 0 && active.written > 0 && active.written + incoming > self.max_bytes {
            self.rotate(&mut active)?;
        }

        active.writer.write_all(line.as_bytes())?;
        active.writer.flush().context("Can't flush file")?;
        active.written += incoming;
        Ok(())
    }

    fn flush(&self) {
        let mut active = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = active.writer.flush() {
            eprintln!("chatlog: flushing {} failed: {}", self.file_path.display(), err);
        }
    }
}

pub struct ConsoleSink {
    handle: std::io::Stderr,
    formatter: Box<dyn LogFormatter>,
}

impl ConsoleSink {
    pub fn new(formatter: Box<dyn LogFormatter>) -> Self {
        Self {
            handle: std::io::stderr(),
            formatter,
        }
    }
}

impl LogSink for ConsoleSink {
    fn write_log(&self, record: &LogRecord) -> eyre::Result<()> {
        let mut writer = self.handle.lock();

        writeln!(writer, "{}", self.formatter.format(record))?;
        writer.flush().context("Can't flush stderr")
    }

    fn flush(&self) {
        let _ = self.handle.lock().flush();
    }
}
