//! Shared fixtures: an in-memory file-content cache and a scripted
//! non-blocking sink.
#![allow(dead_code, reason = "not every test binary uses every fixture")]

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use strand_accel::data::AccelData;
use strand_accel::store::{DataKind, FileCache, FileEntry, NonBlockingSink, TransmitStatus};
use strand_http::buffer::SourceBuf;
use strand_http::parser::RequestParser;
use strand_http::protocol::Request;

pub fn request(raw: &[u8]) -> Request {
    let mut buf = SourceBuf::new();
    buf.push_bytes(raw);
    RequestParser::new().parse_buffered(&mut buf).unwrap().unwrap()
}

pub struct MemEntry {
    body: Vec<u8>,
    valid: AtomicBool,
    attached: Mutex<[Option<Arc<AccelData>>; 2]>,
}

impl MemEntry {
    pub fn new(body: &[u8]) -> Arc<Self> {
        Arc::new(Self { body: body.to_vec(), valid: AtomicBool::new(true), attached: Mutex::new([None, None]) })
    }

    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Relaxed);
    }

    fn slot(kind: DataKind) -> usize {
        match kind {
            DataKind::Ok200 => 0,
            DataKind::NotModified304 => 1,
        }
    }
}

impl FileEntry for MemEntry {
    fn accel_data(&self, kind: DataKind) -> Option<Arc<AccelData>> {
        self.attached.lock().unwrap()[Self::slot(kind)].clone()
    }

    fn attach_accel_data(&self, kind: DataKind, data: Arc<AccelData>) -> bool {
        let mut attached = self.attached.lock().unwrap();
        let slot = &mut attached[Self::slot(kind)];
        if slot.is_some() {
            return false;
        }
        *slot = Some(data);
        true
    }

    fn detach_accel_data(&self, kind: DataKind) {
        self.attached.lock().unwrap()[Self::slot(kind)] = None;
    }

    fn check(&self) -> bool {
        self.valid.load(Ordering::Relaxed)
    }

    fn transmit(&self, prefix: &[u8], sink: &mut dyn io::Write) -> io::Result<u64> {
        sink.write_all(prefix)?;
        sink.write_all(&self.body)?;
        Ok((prefix.len() + self.body.len()) as u64)
    }

    fn try_transmit(&self, sink: &mut dyn NonBlockingSink, offset: &mut u64) -> io::Result<TransmitStatus> {
        let remaining = &self.body[*offset as usize..];
        if remaining.is_empty() {
            return Ok(TransmitStatus::Done);
        }
        match sink.try_write(remaining) {
            Ok(0) => Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                *offset += n as u64;
                Ok(if *offset as usize == self.body.len() { TransmitStatus::Done } else { TransmitStatus::Again })
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(TransmitStatus::WouldBlock),
            Err(e) => Err(e),
        }
    }

    fn len(&self) -> u64 {
        self.body.len() as u64
    }
}

pub struct MemFileCache {
    entries: Mutex<Vec<Arc<MemEntry>>>,
}

impl MemFileCache {
    pub fn new(entries: Vec<Arc<MemEntry>>) -> Arc<Self> {
        Arc::new(Self { entries: Mutex::new(entries) })
    }
}

impl FileCache for MemFileCache {
    fn entries(&self) -> Vec<Arc<dyn FileEntry>> {
        self.entries.lock().unwrap().iter().map(|e| Arc::clone(e) as Arc<dyn FileEntry>).collect()
    }
}

/// One scripted behavior per `try_write` call; once the script runs out,
/// every write is accepted in full.
pub enum SinkStep {
    Accept(usize),
    Block,
    Fail,
}

pub struct ScriptedSink {
    pub written: Vec<u8>,
    script: VecDeque<SinkStep>,
}

impl ScriptedSink {
    pub fn new(script: Vec<SinkStep>) -> Self {
        Self { written: Vec::new(), script: script.into() }
    }

    pub fn accepting() -> Self {
        Self::new(Vec::new())
    }
}

impl NonBlockingSink for ScriptedSink {
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.script.pop_front() {
            None => {
                self.written.extend_from_slice(buf);
                Ok(buf.len())
            }
            Some(SinkStep::Accept(n)) => {
                let n = n.min(buf.len());
                self.written.extend_from_slice(&buf[..n]);
                Ok(n)
            }
            Some(SinkStep::Block) => Err(io::ErrorKind::WouldBlock.into()),
            Some(SinkStep::Fail) => Err(io::ErrorKind::BrokenPipe.into()),
        }
    }
}
