use std::collections::BTreeMap;
use std::fs::{File, OpenOptions, create_dir_all};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use block_locator::Record;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::RecordStore;

#[derive(Serialize, Deserialize)]
struct Line {
    number: u64,
    timestamp: i64,
}

pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let p = path.as_ref().to_path_buf();
        if let Some(dir) = p.parent()
            && !dir.as_os_str().is_empty()
            && !dir.exists()
        {
            create_dir_all(dir)?;
        }
        if !p.exists() {
            File::create(&p)?;
        }
        Ok(FileStore { path: p })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, records: &[Record]) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        for record in records {
            let line = serde_json::to_string(&Line {
                number: record.number,
                timestamp: record.timestamp,
            })
            .map_err(|e| io::Error::other(e.to_string()))?;
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        writer.flush()
    }

    /// Latest value per number. Unparseable lines are skipped.
    fn read_all(&self) -> io::Result<BTreeMap<u64, Record>> {
        let f = File::open(&self.path)?;
        let mut records = BTreeMap::new();
        for (i, line) in BufReader::new(f).lines().enumerate() {
            let l = line?;
            if l.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Line>(&l) {
                Ok(line) => {
                    records.insert(line.number, Record::new(line.number, line.timestamp));
                }
                Err(e) => warn!(path = %self.path.display(), line = i + 1, error = %e, "Skipping bad cache line"),
            }
        }
        Ok(records)
    }
}

impl RecordStore for FileStore {
    fn put_many(&self, records: &[Record]) -> io::Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.append(records)
    }

    fn tip(&self) -> io::Result<Option<u64>> {
        Ok(self.read_all()?.keys().next_back().copied())
    }

    fn all(&self) -> io::Result<Vec<Record>> {
        Ok(self.read_all()?.into_values().collect())
    }
}
