//! In-process collaborators: a PLC register image and a scripted serial port.
//!
//! `MemoryPlc` backs `--simulate` and both types drive the test suite; each
//! exposes switches to inject the failures the bridge has to survive.

use crate::domain::model::RegisterAddress;
use crate::domain::ports::{PlcLink, SerialPort};
use crate::utils::error::{BridgeError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlcOp {
    WriteWords(RegisterAddress, Vec<u16>),
    ReadWords(RegisterAddress, u16),
    WriteBit(RegisterAddress, bool),
    ReadBit(RegisterAddress),
}

#[derive(Debug)]
struct PlcImage {
    words: HashMap<RegisterAddress, u16>,
    bits: HashMap<RegisterAddress, bool>,
    operations: Vec<PlcOp>,
    reachable: bool,
    reachability_hangs: bool,
    reconnect_succeeds: bool,
    reconnects: u32,
    fail_writes: bool,
    ignore_word_writes: bool,
    ignore_bit_writes: bool,
    closed: bool,
}

impl Default for PlcImage {
    fn default() -> Self {
        Self {
            words: HashMap::new(),
            bits: HashMap::new(),
            operations: Vec::new(),
            reachable: true,
            reachability_hangs: false,
            reconnect_succeeds: true,
            reconnects: 0,
            fail_writes: false,
            ignore_word_writes: false,
            ignore_bit_writes: false,
            closed: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryPlc {
    image: Mutex<PlcImage>,
}

impl MemoryPlc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn word(&self, address: &RegisterAddress) -> u16 {
        lock(&self.image).words.get(address).copied().unwrap_or(0)
    }

    pub fn words(&self, address: &RegisterAddress, count: u16) -> Vec<u16> {
        let image = lock(&self.image);
        (0..u32::from(count))
            .map(|i| image.words.get(&address.offset(i)).copied().unwrap_or(0))
            .collect()
    }

    pub fn bit(&self, address: &RegisterAddress) -> bool {
        lock(&self.image).bits.get(address).copied().unwrap_or(false)
    }

    pub fn operations(&self) -> Vec<PlcOp> {
        lock(&self.image).operations.clone()
    }

    /// 只列出寫入動作，方便比對
    pub fn writes(&self) -> Vec<PlcOp> {
        self.operations()
            .into_iter()
            .filter(|op| matches!(op, PlcOp::WriteWords(..) | PlcOp::WriteBit(..)))
            .collect()
    }

    pub fn set_reachable(&self, reachable: bool) {
        lock(&self.image).reachable = reachable;
    }

    /// Reachability checks never complete until the next successful reconnect.
    pub fn set_reachability_hangs(&self, hangs: bool) {
        lock(&self.image).reachability_hangs = hangs;
    }

    pub fn set_reconnect_succeeds(&self, succeeds: bool) {
        lock(&self.image).reconnect_succeeds = succeeds;
    }

    /// Every write returns an error.
    pub fn set_fail_writes(&self, fail: bool) {
        lock(&self.image).fail_writes = fail;
    }

    /// Word writes report success but never land, so read-back mismatches.
    pub fn set_ignore_word_writes(&self, ignore: bool) {
        lock(&self.image).ignore_word_writes = ignore;
    }

    pub fn set_ignore_bit_writes(&self, ignore: bool) {
        lock(&self.image).ignore_bit_writes = ignore;
    }

    pub fn reconnect_count(&self) -> u32 {
        lock(&self.image).reconnects
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.image).closed
    }
}

#[async_trait]
impl PlcLink for MemoryPlc {
    async fn write_words(&self, address: &RegisterAddress, words: &[u16]) -> Result<()> {
        let mut image = lock(&self.image);
        image
            .operations
            .push(PlcOp::WriteWords(address.clone(), words.to_vec()));
        if image.fail_writes || !image.reachable {
            return Err(BridgeError::plc(format!("write to {} refused", address)));
        }
        if !image.ignore_word_writes {
            for (i, word) in (0u32..).zip(words) {
                image.words.insert(address.offset(i), *word);
            }
        }
        tracing::debug!("🧪 Simulated PLC {} <- {:?}", address, words);
        Ok(())
    }

    async fn read_words(&self, address: &RegisterAddress, count: u16) -> Result<Vec<u16>> {
        {
            let mut image = lock(&self.image);
            image.operations.push(PlcOp::ReadWords(address.clone(), count));
            if !image.reachable {
                return Err(BridgeError::plc(format!("read from {} timed out", address)));
            }
        }
        Ok(self.words(address, count))
    }

    async fn write_bit(&self, address: &RegisterAddress, value: bool) -> Result<()> {
        let mut image = lock(&self.image);
        image.operations.push(PlcOp::WriteBit(address.clone(), value));
        if image.fail_writes || !image.reachable {
            return Err(BridgeError::plc(format!("write to {} refused", address)));
        }
        if !image.ignore_bit_writes {
            image.bits.insert(address.clone(), value);
        }
        tracing::debug!("🧪 Simulated PLC {} <- {}", address, value);
        Ok(())
    }

    async fn read_bit(&self, address: &RegisterAddress) -> Result<bool> {
        let mut image = lock(&self.image);
        image.operations.push(PlcOp::ReadBit(address.clone()));
        if !image.reachable {
            return Err(BridgeError::plc(format!("read from {} timed out", address)));
        }
        Ok(image.bits.get(address).copied().unwrap_or(false))
    }

    async fn is_reachable(&self) -> bool {
        let (hangs, reachable) = {
            let image = lock(&self.image);
            (image.reachability_hangs, image.reachable)
        };
        if hangs {
            std::future::pending::<()>().await;
        }
        reachable
    }

    async fn reconnect(&self) -> Result<()> {
        let mut image = lock(&self.image);
        image.reconnects += 1;
        if image.reconnect_succeeds {
            image.reachable = true;
            image.reachability_hangs = false;
            Ok(())
        } else {
            Err(BridgeError::plc("simulated PLC refused the connection"))
        }
    }

    async fn close(&self) {
        lock(&self.image).closed = true;
    }
}

#[derive(Debug, Default)]
struct SerialImage {
    pending: VecDeque<u8>,
    open: bool,
    fail_open: bool,
    fail_reads: bool,
    flushes: u32,
}

/// Scripted serial port. Clones share the same byte stream, so a test can
/// keep one handle to feed data while the bridge owns another.
#[derive(Debug, Clone)]
pub struct MemorySerial {
    name: String,
    image: Arc<Mutex<SerialImage>>,
}

impl MemorySerial {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: Arc::new(Mutex::new(SerialImage {
                open: true,
                ..SerialImage::default()
            })),
        }
    }

    pub fn closed(name: impl Into<String>) -> Self {
        let port = Self::new(name);
        lock(&port.image).open = false;
        port
    }

    pub fn push(&self, bytes: &[u8]) {
        lock(&self.image).pending.extend(bytes.iter().copied());
    }

    pub fn pending(&self) -> usize {
        lock(&self.image).pending.len()
    }

    pub fn set_fail_open(&self, fail: bool) {
        lock(&self.image).fail_open = fail;
    }

    pub fn set_fail_reads(&self, fail: bool) {
        lock(&self.image).fail_reads = fail;
    }

    /// 模擬線材被拔除
    pub fn disconnect(&self) {
        lock(&self.image).open = false;
    }

    pub fn flush_count(&self) -> u32 {
        lock(&self.image).flushes
    }
}

impl SerialPort for MemorySerial {
    fn name(&self) -> &str {
        &self.name
    }

    fn bytes_available(&mut self) -> Result<usize> {
        let image = lock(&self.image);
        if !image.open {
            return Err(BridgeError::serial(&self.name, "port is closed"));
        }
        Ok(image.pending.len())
    }

    fn read(&mut self, max_bytes: usize) -> Result<Vec<u8>> {
        let mut image = lock(&self.image);
        if !image.open || image.fail_reads {
            return Err(BridgeError::serial(&self.name, "read failed"));
        }
        let count = max_bytes.min(image.pending.len());
        Ok(image.pending.drain(..count).collect())
    }

    fn is_open(&self) -> bool {
        lock(&self.image).open
    }

    fn open(&mut self) -> Result<()> {
        let mut image = lock(&self.image);
        if image.fail_open {
            return Err(BridgeError::serial(&self.name, "device not found"));
        }
        image.open = true;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        lock(&self.image).flushes += 1;
        Ok(())
    }

    fn close(&mut self) {
        lock(&self.image).open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_plc_word_image() {
        let plc = MemoryPlc::new();
        let head: RegisterAddress = "D6364".parse().unwrap();

        plc.write_words(&head, &[930, 1]).await.unwrap();
        assert_eq!(plc.read_words(&head, 2).await.unwrap(), vec![930, 1]);
        assert_eq!(plc.word(&head.offset(1)), 1);

        plc.set_ignore_word_writes(true);
        plc.write_words(&head, &[0, 0]).await.unwrap();
        assert_eq!(plc.words(&head, 2), vec![930, 1]);
    }

    #[tokio::test]
    async fn test_memory_plc_unreachable() {
        let plc = MemoryPlc::new();
        let bit: RegisterAddress = "M3300".parse().unwrap();

        plc.set_reachable(false);
        assert!(!plc.is_reachable().await);
        assert!(plc.write_bit(&bit, true).await.is_err());

        plc.reconnect().await.unwrap();
        assert!(plc.is_reachable().await);
        assert_eq!(plc.reconnect_count(), 1);
    }

    #[test]
    fn test_memory_serial_shared_stream() {
        let feeder = MemorySerial::new("/dev/ttyUSB0");
        let mut port: Box<dyn SerialPort> = Box::new(feeder.clone());

        feeder.push(b"ST,+000009.3  g\r\n");
        assert_eq!(port.bytes_available().unwrap(), 17);
        assert_eq!(port.read(4).unwrap(), b"ST,+".to_vec());
        assert_eq!(feeder.pending(), 13);

        feeder.disconnect();
        assert!(!port.is_open());
        assert!(port.bytes_available().is_err());
        port.open().unwrap();
        assert!(port.is_open());
    }
}
