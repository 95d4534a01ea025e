// Exact-count positioned reads and writes; a short transfer is an error, never retried.
use std::io::{Read, Seek, SeekFrom, Write};

use crate::core::error::{Error, ErrorKind};

pub fn read_at<F: Read + Seek>(file: &mut F, offset: u64, len: usize) -> Result<Vec<u8>, Error> {
    file.seek(SeekFrom::Start(offset))
        .map_err(|err| Error::new(ErrorKind::Io).with_offset(offset).with_source(err))?;
    let mut buf = vec![0u8; len];
    let actual = file
        .read(&mut buf)
        .map_err(|err| Error::new(ErrorKind::Io).with_offset(offset).with_source(err))?;
    if actual != len {
        return Err(Error::new(ErrorKind::Io)
            .with_message(format!("short read: {actual} of {len} bytes"))
            .with_offset(offset));
    }
    Ok(buf)
}

pub fn write_at<F: Write + Seek>(file: &mut F, offset: u64, buf: &[u8]) -> Result<(), Error> {
    file.seek(SeekFrom::Start(offset))
        .map_err(|err| Error::new(ErrorKind::Io).with_offset(offset).with_source(err))?;
    let actual = file
        .write(buf)
        .map_err(|err| Error::new(ErrorKind::Io).with_offset(offset).with_source(err))?;
    if actual != buf.len() {
        return Err(Error::new(ErrorKind::Io)
            .with_message(format!("short write: {actual} of {} bytes", buf.len()))
            .with_offset(offset));
    }
    file.flush()
        .map_err(|err| Error::new(ErrorKind::Io).with_offset(offset).with_source(err))?;
    Ok(())
}
