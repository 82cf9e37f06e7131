use crate::error::{Error, Result};
use crate::writer::ActiveLogWriter;

use chrono::{Local, NaiveDate};
use flate2::write::GzEncoder;
use flate2::Compression;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

// Regex to parse archive names like: "2024-03-09-12.log.gz"
// Captures: 1=date prefix, 2=index
static ARCHIVE_NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r"^(\d{4}-\d{2}-\d{2})-(\d+)\.log\.gz$").expect("Archive name regex should be valid")
});

const ARCHIVE_DATE_FORMAT: &str = "%Y-%m-%d";

/// What an archival attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
  /// The active file was missing or empty.
  Skipped,
  /// The active file was compressed into this archive and removed.
  Archived(PathBuf),
}

/// Rotates the active log file into `{date}-{index}.log.gz` files.
pub struct Archiver {
  writer: Arc<ActiveLogWriter>,
  archive_dir: PathBuf,
  timeout: Duration,
  lock: Mutex<()>,
}

impl Archiver {
  pub(crate) fn new(writer: Arc<ActiveLogWriter>, archive_dir: PathBuf, timeout: Duration) -> Self {
    Self {
      writer,
      archive_dir,
      timeout,
      lock: Mutex::new(()),
    }
  }

  pub fn archive_dir(&self) -> &Path {
    &self.archive_dir
  }

  /// Archives the active file, then resumes the writer on a fresh file.
  pub fn archive(&self) -> Result<ArchiveOutcome> {
    self.archive_on(Local::now().date_naive(), true)
  }

  /// Archives the active file without resuming the writer.
  pub(crate) fn archive_final(&self) -> Result<ArchiveOutcome> {
    self.archive_on(Local::now().date_naive(), false)
  }

  /// Testable archival that allows injecting the current date.
  pub(crate) fn archive_on(&self, today: NaiveDate, resume: bool) -> Result<ArchiveOutcome> {
    // Held until return on every path, so attempts never interleave.
    let _guard = self.lock.lock();

    // Lines already handed to the writer must be on disk before the file is
    // judged empty, and it must not be appended to while being compressed.
    self.writer.stop(self.timeout)?;

    let active_path = self.writer.path().to_path_buf();
    let non_empty = match has_content(&active_path) {
      Ok(non_empty) => non_empty,
      Err(e) => {
        if resume {
          self.writer.restart()?;
        }
        return Err(e);
      }
    };
    if !non_empty {
      if resume {
        self.writer.restart()?;
      }
      return Ok(ArchiveOutcome::Skipped);
    }

    let result = self.compress_and_remove(&active_path, today);

    if resume {
      if let Err(e) = self.writer.restart() {
        return Err(result.err().unwrap_or(e));
      }
    }
    result.map(ArchiveOutcome::Archived)
  }

  fn compress_and_remove(&self, active_path: &Path, today: NaiveDate) -> Result<PathBuf> {
    fs::create_dir_all(&self.archive_dir)?;
    let archive_path = self.archive_dir.join(next_archive_name(&self.archive_dir, today)?);

    if let Err(e) = compress_file(active_path, &archive_path) {
      // The active file is intact; a half-written archive would only burn an index.
      let _ = fs::remove_file(&archive_path);
      return Err(e);
    }

    fs::remove_file(active_path)?;
    Ok(archive_path)
  }
}

fn has_content(path: &Path) -> Result<bool> {
  match fs::metadata(path) {
    Ok(metadata) => Ok(metadata.len() > 0),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
    Err(e) => Err(Error::Io(e)),
  }
}

/// Streams `source` into a new gzip file at `destination`.
fn compress_file(source: &Path, destination: &Path) -> Result<()> {
  let mut input = BufReader::new(File::open(source)?);

  let output_file = File::options()
    .write(true)
    .create_new(true)
    .open(destination)?;
  let mut encoder = GzEncoder::new(BufWriter::new(output_file), Compression::default());
  io::copy(&mut input, &mut encoder)?;
  let mut output = encoder.finish()?;
  output.flush()?;
  Ok(())
}

/// Picks `{today}-{max(existing)+1}.log.gz`. Names that do not parse, other
/// dates and index 0 never count towards the maximum.
pub fn next_archive_name(dir: &Path, today: NaiveDate) -> Result<String> {
  let prefix = today.format(ARCHIVE_DATE_FORMAT).to_string();

  let entries = match fs::read_dir(dir) {
    Ok(entries) => entries,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(format!("{}-1.log.gz", prefix)),
    Err(e) => return Err(Error::Io(e)),
  };

  let mut max_index = 0u64;
  for entry in entries {
    let entry = entry?;
    let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
      continue;
    };
    if let Some(caps) = ARCHIVE_NAME_REGEX.captures(&file_name) {
      if caps[1] != prefix {
        continue;
      }
      if let Ok(index) = caps[2].parse::<u64>() {
        max_index = max_index.max(index);
      }
    }
  }

  Ok(format!("{}-{}.log.gz", prefix, max_index + 1))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error_handling::Diagnostics;
  use flate2::read::GzDecoder;
  use std::io::Read;
  use tempfile::{tempdir, TempDir};

  const TIMEOUT: Duration = Duration::from_secs(5);

  struct TestSetup {
    _temp_dir: TempDir,
    active_path: PathBuf,
    archive_dir: PathBuf,
    writer: Arc<ActiveLogWriter>,
    archiver: Archiver,
  }

  fn setup(timeout: Duration) -> TestSetup {
    let temp_dir = tempdir().unwrap();
    let active_path = temp_dir.path().join("logs").join("latest.log");
    let archive_dir = temp_dir.path().join("logs");
    let writer = Arc::new(
      ActiveLogWriter::start(active_path.clone(), 1024, Arc::new(Diagnostics::stderr())).unwrap(),
    );
    let archiver = Archiver::new(writer.clone(), archive_dir.clone(), timeout);
    TestSetup {
      _temp_dir: temp_dir,
      active_path,
      archive_dir,
      writer,
      archiver,
    }
  }

  fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 20).unwrap()
  }

  fn list_archives(dir: &Path) -> Vec<String> {
    let mut files = fs::read_dir(dir)
      .unwrap()
      .map(|res| res.unwrap().file_name().into_string().unwrap())
      .filter(|name| name.ends_with(".log.gz"))
      .collect::<Vec<String>>();
    files.sort();
    files
  }

  fn decompress(path: &Path) -> String {
    let mut decoder = GzDecoder::new(File::open(path).unwrap());
    let mut content = String::new();
    decoder.read_to_string(&mut content).unwrap();
    content
  }

  fn write_lines(setup: &TestSetup, lines: &[&str]) {
    for line in lines {
      setup.writer.append(line.to_string()).unwrap();
    }
    setup.writer.flush(TIMEOUT).unwrap();
  }

  #[test]
  fn naming_starts_at_one_for_missing_directory() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("nope");
    assert_eq!(next_archive_name(&missing, today()).unwrap(), "2025-06-20-1.log.gz");
  }

  #[test]
  fn naming_ignores_foreign_and_malformed_names() {
    let dir = tempdir().unwrap();
    for name in [
      "2025-06-20-2.log.gz",
      "2025-06-20-abc.log.gz",
      "2025-06-20-0.log.gz",
      "2025-06-19-9.log.gz",
      "2025-06-20-7.log",
      "notes.txt",
      "x2025-06-20-5.log.gz",
    ] {
      fs::write(dir.path().join(name), b"").unwrap();
    }
    assert_eq!(next_archive_name(dir.path(), today()).unwrap(), "2025-06-20-3.log.gz");
  }

  #[test]
  fn naming_uses_max_not_count() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("2025-06-20-1.log.gz"), b"").unwrap();
    fs::write(dir.path().join("2025-06-20-5.log.gz"), b"").unwrap();
    assert_eq!(next_archive_name(dir.path(), today()).unwrap(), "2025-06-20-6.log.gz");
  }

  #[test]
  fn archive_of_empty_active_file_is_a_noop() {
    let setup = setup(TIMEOUT);
    setup.writer.flush(TIMEOUT).unwrap();
    assert!(setup.active_path.exists());

    let outcome = setup.archiver.archive_on(today(), true).unwrap();
    assert_eq!(outcome, ArchiveOutcome::Skipped);
    assert!(list_archives(&setup.archive_dir).is_empty());
    assert!(setup.writer.is_running());
  }

  #[test]
  fn archive_of_missing_active_file_is_a_noop() {
    let setup = setup(TIMEOUT);
    setup.writer.stop(TIMEOUT).unwrap();
    fs::remove_file(&setup.active_path).unwrap();

    let outcome = setup.archiver.archive_on(today(), false).unwrap();
    assert_eq!(outcome, ArchiveOutcome::Skipped);
    assert!(list_archives(&setup.archive_dir).is_empty());
  }

  #[test]
  fn archive_round_trips_content_and_removes_active_file() {
    let setup = setup(TIMEOUT);
    write_lines(&setup, &["alpha", "beta"]);
    let before = fs::read(&setup.active_path).unwrap();

    let outcome = setup.archiver.archive_on(today(), false).unwrap();
    let expected = setup.archive_dir.join("2025-06-20-1.log.gz");
    assert_eq!(outcome, ArchiveOutcome::Archived(expected.clone()));
    assert!(!setup.active_path.exists());
    assert_eq!(list_archives(&setup.archive_dir), vec!["2025-06-20-1.log.gz"]);
    assert_eq!(decompress(&expected).into_bytes(), before);
  }

  #[test]
  fn repeated_archives_get_increasing_indices() {
    let setup = setup(TIMEOUT);
    fs::write(setup.archive_dir.join("2025-06-19-4.log.gz"), b"").unwrap();
    fs::write(setup.archive_dir.join("readme.md"), b"").unwrap();

    for round in 1..=3 {
      write_lines(&setup, &[&format!("round {}", round)]);
      setup.archiver.archive_on(today(), true).unwrap();
    }

    assert_eq!(
      list_archives(&setup.archive_dir),
      vec![
        "2025-06-19-4.log.gz",
        "2025-06-20-1.log.gz",
        "2025-06-20-2.log.gz",
        "2025-06-20-3.log.gz",
      ]
    );
    assert_eq!(
      decompress(&setup.archive_dir.join("2025-06-20-2.log.gz")),
      "round 2\n"
    );
  }

  #[test]
  fn writer_resumes_on_fresh_file_after_archive() {
    let setup = setup(TIMEOUT);
    write_lines(&setup, &["old"]);
    setup.archiver.archive_on(today(), true).unwrap();

    write_lines(&setup, &["new"]);
    assert_eq!(fs::read_to_string(&setup.active_path).unwrap(), "new\n");
  }

  #[test]
  fn lines_still_queued_are_archived() {
    let setup = setup(TIMEOUT);
    setup.writer.append("not yet flushed".to_string()).unwrap();

    let outcome = setup.archiver.archive_on(today(), true).unwrap();
    let expected = setup.archive_dir.join("2025-06-20-1.log.gz");
    assert_eq!(outcome, ArchiveOutcome::Archived(expected.clone()));
    assert_eq!(decompress(&expected), "not yet flushed\n");
    assert!(setup.writer.is_running());
  }

  #[test]
  fn writer_keeps_running_after_a_timed_out_archive() {
    let setup = setup(Duration::from_millis(100));
    write_lines(&setup, &["before"]);

    let release = setup.writer.stall();
    let result = setup.archiver.archive_on(today(), true);
    assert!(matches!(result, Err(Error::ArchiveTimeout(_))));

    release.set();
    setup.writer.append("after".to_string()).unwrap();
    setup.writer.flush(TIMEOUT).unwrap();
    assert_eq!(fs::read_to_string(&setup.active_path).unwrap(), "before\nafter\n");
  }

  #[test]
  fn timeout_leaves_active_file_untouched() {
    let setup = setup(Duration::from_millis(100));
    write_lines(&setup, &["keep me"]);

    let release = setup.writer.stall();
    let result = setup.archiver.archive_on(today(), true);
    assert!(matches!(result, Err(Error::ArchiveTimeout(_))));
    assert_eq!(fs::read_to_string(&setup.active_path).unwrap(), "keep me\n");
    assert!(list_archives(&setup.archive_dir).is_empty());

    // Once the writer lets go, a retry completes the rotation.
    release.set();
    let archiver = Archiver::new(setup.writer.clone(), setup.archive_dir.clone(), TIMEOUT);
    let outcome = archiver.archive_on(today(), true).unwrap();
    assert!(matches!(outcome, ArchiveOutcome::Archived(_)));
    assert_eq!(
      decompress(&setup.archive_dir.join("2025-06-20-1.log.gz")),
      "keep me\n"
    );
  }

  #[test]
  fn lines_queued_during_archive_land_in_the_fresh_file() {
    let setup = setup(TIMEOUT);
    write_lines(&setup, &["first"]);

    let release = setup.writer.stall();
    let writer = setup.writer.clone();
    let producer = std::thread::spawn(move || {
      writer.append("during".to_string()).unwrap();
      release.set();
    });
    setup.archiver.archive_on(today(), true).unwrap();
    producer.join().unwrap();
    setup.writer.flush(TIMEOUT).unwrap();

    let archived = decompress(&setup.archive_dir.join("2025-06-20-1.log.gz"));
    let active = fs::read_to_string(&setup.active_path).unwrap_or_default();
    let mut all: Vec<&str> = archived.lines().chain(active.lines()).collect();
    all.sort();
    assert_eq!(all, vec!["during", "first"]);
  }
}
