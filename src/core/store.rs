// Shared control and log files: opened (never created) by producers, created by the operator tool.
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::core::error::{Error, ErrorKind, open_error_kind};
use crate::core::io::{read_at, write_at};
use crate::core::record::{LogRecord, RECORD_LEN, slot_offset};

const INDEX_OFFSET: u64 = 0;
const INDEX_LEN: usize = 4;

pub struct ControlFile {
    path: PathBuf,
    file: File,
}

impl ControlFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let file = open_existing(&path)?;
        ensure_len(&file, &path, INDEX_LEN as u64)?;
        Ok(Self { path, file })
    }

    pub fn create(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let file = create_zeroed(&path, INDEX_LEN as u64)?;
        Ok(Self { path, file })
    }

    pub fn read_index(&mut self) -> Result<u32, Error> {
        let buf = read_at(&mut self.file, INDEX_OFFSET, INDEX_LEN)
            .map_err(|err| err.with_path(&self.path))?;
        let mut out = [0u8; INDEX_LEN];
        out.copy_from_slice(&buf);
        Ok(u32::from_le_bytes(out))
    }

    pub fn write_index(&mut self, write_index: u32) -> Result<(), Error> {
        write_at(&mut self.file, INDEX_OFFSET, &write_index.to_le_bytes())
            .map_err(|err| err.with_path(&self.path))
    }
}

#[cfg(all(test, unix))]
impl std::os::fd::AsRawFd for ControlFile {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.file.as_raw_fd()
    }
}

pub struct LogFile {
    path: PathBuf,
    file: File,
    capacity: u32,
}

impl LogFile {
    pub fn open(path: impl AsRef<Path>, capacity: u32) -> Result<Self, Error> {
        check_capacity(capacity)?;
        let path = path.as_ref().to_path_buf();
        let file = open_existing(&path)?;
        ensure_len(&file, &path, slot_offset(capacity))?;
        Ok(Self {
            path,
            file,
            capacity,
        })
    }

    pub fn create(path: impl AsRef<Path>, capacity: u32) -> Result<Self, Error> {
        check_capacity(capacity)?;
        let path = path.as_ref().to_path_buf();
        let file = create_zeroed(&path, slot_offset(capacity))?;
        Ok(Self {
            path,
            file,
            capacity,
        })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn write_record(&mut self, slot: u32, record: &LogRecord) -> Result<(), Error> {
        self.check_slot(slot)?;
        write_at(&mut self.file, slot_offset(slot), &record.encode())
            .map_err(|err| err.with_path(&self.path))
    }

    pub fn read_record(&mut self, slot: u32) -> Result<LogRecord, Error> {
        self.check_slot(slot)?;
        let buf = read_at(&mut self.file, slot_offset(slot), RECORD_LEN)
            .map_err(|err| err.with_path(&self.path))?;
        LogRecord::decode(&buf)
    }

    fn check_slot(&self, slot: u32) -> Result<(), Error> {
        if slot >= self.capacity {
            return Err(Error::new(ErrorKind::Internal)
                .with_message(format!("slot {slot} outside capacity {}", self.capacity))
                .with_path(&self.path));
        }
        Ok(())
    }
}

fn check_capacity(capacity: u32) -> Result<(), Error> {
    if capacity == 0 {
        return Err(Error::new(ErrorKind::Usage).with_message("capacity must be positive"));
    }
    Ok(())
}

fn open_existing(path: &Path) -> Result<File, Error> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|err| Error::new(open_error_kind(&err)).with_path(path).with_source(err))
}

fn create_zeroed(path: &Path, len: u64) -> Result<File, Error> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|err| Error::new(open_error_kind(&err)).with_path(path).with_source(err))?;
    file.set_len(len)
        .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?;
    Ok(file)
}

fn ensure_len(file: &File, path: &Path, required: u64) -> Result<(), Error> {
    let actual = file
        .metadata()
        .map(|meta| meta.len())
        .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?;
    if actual < required {
        return Err(Error::new(ErrorKind::Corrupt)
            .with_message(format!("file holds {actual} bytes, need {required}"))
            .with_path(path));
    }
    Ok(())
}
