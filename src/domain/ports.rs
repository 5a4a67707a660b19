use crate::domain::model::RegisterAddress;
use crate::utils::error::Result;
use async_trait::async_trait;

/// A scale attached over RS-232/USB. Reads never block: callers check
/// [`SerialPort::bytes_available`] first.
pub trait SerialPort: Send {
    fn name(&self) -> &str;
    fn bytes_available(&mut self) -> Result<usize>;
    fn read(&mut self, max_bytes: usize) -> Result<Vec<u8>>;
    fn is_open(&self) -> bool;
    fn open(&mut self) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
    fn close(&mut self);
}

/// Register-level access to the PLC. Shared by every worker, so
/// implementations must tolerate concurrent calls on distinct addresses.
#[async_trait]
pub trait PlcLink: Send + Sync {
    async fn write_words(&self, address: &RegisterAddress, words: &[u16]) -> Result<()>;
    async fn read_words(&self, address: &RegisterAddress, count: u16) -> Result<Vec<u16>>;
    async fn write_bit(&self, address: &RegisterAddress, value: bool) -> Result<()>;
    async fn read_bit(&self, address: &RegisterAddress) -> Result<bool>;
    /// 存活檢查（只確認可達，不做通訊協定往返）
    async fn is_reachable(&self) -> bool;
    async fn reconnect(&self) -> Result<()>;
    async fn close(&self);
}
