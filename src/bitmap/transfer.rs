//! Image transfer over the link
//!
//! Each write unit is awaited before the next goes out. The transfer holds the
//! link mutably for its whole duration, so a second transfer (or a chat send)
//! cannot interleave with it.

use std::sync::Arc;

use tokio::sync::watch;

use super::BitmapResult;
use crate::link::LinkManager;
use crate::protocol::{ImageEncoder, ValueRaster};

/// Cooperative cancellation shared between a transfer and whoever may stop it
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress after a row has been fully delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub rows_sent: u32,
    pub rows_total: u32,
}

impl TransferProgress {
    pub fn percent(&self) -> u8 {
        if self.rows_total == 0 {
            return 100;
        }
        ((self.rows_sent as u64 * 100) / self.rows_total as u64) as u8
    }
}

/// How a transfer ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed { rows: u32, bytes: usize },
    Cancelled { rows_sent: u32 },
}

/// Streams a raster through the link using an image encoder
pub struct ImageTransfer {
    encoder: ImageEncoder,
}

impl ImageTransfer {
    pub fn new(encoder: ImageEncoder) -> Self {
        Self { encoder }
    }

    pub async fn run<F>(
        &self,
        link: &mut LinkManager,
        raster: &ValueRaster,
        cancel: &CancelToken,
        mut on_progress: F,
    ) -> BitmapResult<TransferOutcome>
    where
        F: FnMut(TransferProgress),
    {
        let frame = self.encoder.encode(raster);
        tracing::info!(
            "Sending {}x{} image: {} bytes in {} writes ({}, header {})",
            frame.width,
            frame.height,
            frame.total_bytes(),
            frame.units.len(),
            self.encoder.batching(),
            if self.encoder.sends_header() { "on" } else { "off" }
        );

        let mut rows_sent = 0;
        let mut bytes_sent = 0;

        for unit in &frame.units {
            if cancel.is_cancelled() {
                tracing::info!("Image transfer cancelled after {} rows", rows_sent);
                return Ok(TransferOutcome::Cancelled { rows_sent });
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Image transfer cancelled after {} rows", rows_sent);
                    return Ok(TransferOutcome::Cancelled { rows_sent });
                }
                result = link.write(unit.bytes.clone()) => result?,
            }
            bytes_sent += unit.bytes.len();

            if unit.rows_done > rows_sent {
                rows_sent = unit.rows_done;
                tracing::debug!("Row {}/{} sent", rows_sent, frame.height);
                on_progress(TransferProgress {
                    rows_sent,
                    rows_total: frame.height,
                });
            }
        }

        tracing::info!("Image transfer complete: {} rows", rows_sent);
        Ok(TransferOutcome::Completed {
            rows: rows_sent,
            bytes: bytes_sent,
        })
    }
}
