//! PLC link over Modbus/TCP.
//!
//! Word devices map onto holding registers and bit devices onto coils, using
//! the device index as the register offset.

use crate::domain::model::{RegisterAddress, RegisterKind};
use crate::domain::ports::PlcLink;
use crate::utils::error::{BridgeError, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_modbus::client::{tcp, Context};
use tokio_modbus::prelude::*;

pub struct ModbusPlcLink {
    addr: SocketAddr,
    unit_id: u8,
    timeout: Duration,
    ctx: Mutex<Option<Context>>,
}

impl ModbusPlcLink {
    /// Resolves `host:port` and opens the first connection.
    pub async fn connect(host: &str, port: u16, unit_id: u8, timeout: Duration) -> Result<Self> {
        let addr = tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| BridgeError::plc(format!("cannot resolve PLC host {}", host)))?;

        let link = Self {
            addr,
            unit_id,
            timeout,
            ctx: Mutex::new(None),
        };
        link.reconnect().await?;
        Ok(link)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    async fn open_context(&self) -> Result<Context> {
        match tokio::time::timeout(self.timeout, tcp::connect_slave(self.addr, Slave(self.unit_id))).await {
            Ok(Ok(ctx)) => Ok(ctx),
            Ok(Err(e)) => Err(BridgeError::plc(format!("connect to {} failed: {}", self.addr, e))),
            Err(_) => Err(BridgeError::plc(format!("connect to {} timed out", self.addr))),
        }
    }

    fn offset(address: &RegisterAddress, expected: RegisterKind) -> Result<u16> {
        if address.kind() != Some(expected) {
            return Err(BridgeError::plc(format!(
                "{} is not a {:?} device",
                address, expected
            )));
        }
        u16::try_from(address.index)
            .map_err(|_| BridgeError::plc(format!("{} is outside the Modbus register range", address)))
    }

    /// Runs one request against the live context. Any transport error drops
    /// the context; the next request opens a fresh one.
    async fn request<T, F>(&self, what: &str, call: F) -> Result<T>
    where
        F: for<'c> FnOnce(
            &'c mut Context,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = tokio_modbus::Result<T>> + Send + 'c>,
        >,
    {
        let mut guard = self.ctx.lock().await;
        if guard.is_none() {
            tracing::debug!("{}: no live Modbus context, reconnecting to {}", what, self.addr);
            *guard = Some(self.open_context().await?);
        }
        let ctx = guard
            .as_mut()
            .ok_or_else(|| BridgeError::plc(format!("{}: not connected", what)))?;

        match tokio::time::timeout(self.timeout, call(ctx)).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(code))) => Err(BridgeError::plc(format!("{}: exception {:?}", what, code))),
            Ok(Err(e)) => {
                *guard = None;
                Err(BridgeError::plc(format!("{}: {}", what, e)))
            }
            Err(_) => {
                *guard = None;
                Err(BridgeError::plc(format!("{}: timed out", what)))
            }
        }
    }
}

#[async_trait]
impl PlcLink for ModbusPlcLink {
    async fn write_words(&self, address: &RegisterAddress, words: &[u16]) -> Result<()> {
        let offset = Self::offset(address, RegisterKind::Word)?;
        let words = words.to_vec();
        self.request(&format!("write {}", address), move |ctx| {
            Box::pin(async move { ctx.write_multiple_registers(offset, &words).await })
        })
        .await
    }

    async fn read_words(&self, address: &RegisterAddress, count: u16) -> Result<Vec<u16>> {
        let offset = Self::offset(address, RegisterKind::Word)?;
        self.request(&format!("read {}", address), move |ctx| {
            Box::pin(async move { ctx.read_holding_registers(offset, count).await })
        })
        .await
    }

    async fn write_bit(&self, address: &RegisterAddress, value: bool) -> Result<()> {
        let offset = Self::offset(address, RegisterKind::Bit)?;
        self.request(&format!("write {}", address), move |ctx| {
            Box::pin(async move { ctx.write_single_coil(offset, value).await })
        })
        .await
    }

    async fn read_bit(&self, address: &RegisterAddress) -> Result<bool> {
        let offset = Self::offset(address, RegisterKind::Bit)?;
        let coils = self
            .request(&format!("read {}", address), move |ctx| {
                Box::pin(async move { ctx.read_coils(offset, 1).await })
            })
            .await?;
        coils
            .first()
            .copied()
            .ok_or_else(|| BridgeError::plc(format!("read {}: empty response", address)))
    }

    /// A dropped context counts as unreachable. Otherwise only TCP
    /// reachability is checked, with no Modbus round-trip.
    async fn is_reachable(&self) -> bool {
        // 請求進行中時 context 仍視為存活
        if let Ok(guard) = self.ctx.try_lock() {
            if guard.is_none() {
                return false;
            }
        }
        matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect(self.addr)).await,
            Ok(Ok(_))
        )
    }

    async fn reconnect(&self) -> Result<()> {
        let ctx = self.open_context().await?;
        let mut guard = self.ctx.lock().await;
        if let Some(mut old) = guard.replace(ctx) {
            let _ = old.disconnect().await;
        }
        tracing::info!("🔌 Connected to PLC at {} (unit {})", self.addr, self.unit_id);
        Ok(())
    }

    async fn close(&self) {
        if let Some(mut ctx) = self.ctx.lock().await.take() {
            let _ = ctx.disconnect().await;
        }
    }
}
