//! Daily CSV log of transmitted uplinks.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, Utc};
use tracing::{debug, info, warn};

use crate::error::{NodeError, Result};
use crate::payload::to_hex;

/// First line of every log file.
pub const CSV_HEADER: &str = "time,dev_eui,f_port,PayloadHex";

fn invalid_input(msg: String) -> NodeError {
    NodeError::Io(io::Error::new(io::ErrorKind::InvalidInput, msg))
}

/// One transmitted uplink.
#[derive(Debug, Clone, Copy)]
pub struct UplinkRecord<'a> {
    /// UNIX seconds of the transmission.
    pub time: i64,
    /// Local offset from UTC in minutes.
    pub utc_offset_min: i32,
    pub dev_eui: Option<[u8; 8]>,
    pub port: u8,
    pub payload: &'a [u8],
}

/// Writer for `<dir>/<YYYY-MM-DD>.csv` files, keeping only the newest few.
#[derive(Debug, Clone)]
pub struct UplinkLog {
    dir: PathBuf,
    max_files: usize,
}

impl UplinkLog {
    pub fn new<P: AsRef<Path>>(dir: P, max_files: usize) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            max_files: max_files.max(1),
        }
    }

    fn local_time(record: &UplinkRecord<'_>) -> Result<DateTime<FixedOffset>> {
        let offset = FixedOffset::east_opt(record.utc_offset_min * 60).ok_or_else(|| {
            invalid_input(format!("UTC offset {} min out of range", record.utc_offset_min))
        })?;
        let utc = DateTime::<Utc>::from_timestamp(record.time, 0)
            .ok_or_else(|| invalid_input(format!("timestamp {} out of range", record.time)))?;
        Ok(utc.with_timezone(&offset))
    }

    /// Append one record to the file of its local date.
    ///
    /// # Returns
    ///
    /// * `Result<PathBuf>` - File the record went to
    ///
    /// # Errors
    ///
    /// Returns error if the directory or file cannot be written
    pub fn append(&mut self, record: &UplinkRecord<'_>) -> Result<PathBuf> {
        let local = Self::local_time(record)?;
        fs::create_dir_all(&self.dir)?;

        let path = self.dir.join(format!("{}.csv", local.format("%Y-%m-%d")));
        let is_new = !path.exists();

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if is_new {
            writeln!(file, "{}", CSV_HEADER)?;
            info!("Started uplink log {}", path.display());
        }

        let dev_eui = record.dev_eui.map(|eui| to_hex(&eui)).unwrap_or_default();
        writeln!(
            file,
            "{},{},{},{}",
            local.format("%H:%M:%S"),
            dev_eui,
            record.port,
            to_hex(record.payload)
        )?;
        debug!("Logged uplink on port {} to {}", record.port, path.display());

        if is_new {
            self.prune()?;
        }
        Ok(path)
    }

    /// Delete the oldest daily files beyond the retention limit.
    fn prune(&self) -> Result<()> {
        let mut files: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().map_or(false, |ext| ext == "csv"))
            .collect();
        if files.len() <= self.max_files {
            return Ok(());
        }

        // Date-named files sort chronologically.
        files.sort();
        let excess = files.len() - self.max_files;
        for old in files.into_iter().take(excess) {
            match fs::remove_file(&old) {
                Ok(()) => info!("Removed old uplink log {}", old.display()),
                Err(e) => warn!("Could not remove {}: {}", old.display(), e),
            }
        }
        Ok(())
    }
}
