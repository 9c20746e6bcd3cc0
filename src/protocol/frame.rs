//! Image frame encoding
//!
//! An image goes out row by row: a row marker, then one decimal brightness
//! value per pixel, each on its own line. An optional header line carries the
//! geometry so the receiver does not have to infer it.

use std::fmt::{self, Write as _};
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use super::{CodecError, CodecResult, FRAME_HEADER_TAG, LINE_TERMINATOR, ROW_MARKER};

/// HSV value channel of an RGB pixel
pub fn value_channel(r: u8, g: u8, b: u8) -> u8 {
    r.max(g).max(b)
}

/// Brightness values of an image, row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueRaster {
    width: u32,
    height: u32,
    values: Vec<u8>,
    grayscale: bool,
}

impl ValueRaster {
    /// Build a raster from RGB triples in row-major order
    pub fn from_rgb(width: u32, height: u32, pixels: &[[u8; 3]]) -> Option<Self> {
        if pixels.len() != (width as usize) * (height as usize) {
            return None;
        }
        let grayscale = pixels.iter().all(|[r, g, b]| r == g && g == b);
        let values = pixels
            .iter()
            .map(|[r, g, b]| value_channel(*r, *g, *b))
            .collect();
        Some(Self {
            width,
            height,
            values,
            grayscale,
        })
    }

    /// Build a raster from gray levels in row-major order
    pub fn from_gray(width: u32, height: u32, values: Vec<u8>) -> Option<Self> {
        if values.len() != (width as usize) * (height as usize) {
            return None;
        }
        Some(Self {
            width,
            height,
            values,
            grayscale: true,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Whether every source pixel had equal R, G and B
    pub fn is_grayscale(&self) -> bool {
        self.grayscale
    }

    pub fn row(&self, y: u32) -> &[u8] {
        let w = self.width as usize;
        let start = y as usize * w;
        &self.values[start..start + w]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        (0..self.height).map(move |y| self.row(y))
    }
}

/// How the encoded byte stream is grouped into write units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Batching {
    /// Marker and each value are written and confirmed one at a time
    #[default]
    PerValue,
    /// A whole row (marker plus values) per write
    PerRow,
    /// Fixed-size chunks of the byte stream
    Chunked(usize),
}

impl FromStr for Batching {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "per-value" => Ok(Batching::PerValue),
            "per-row" => Ok(Batching::PerRow),
            other => {
                let size = other
                    .strip_prefix("chunked:")
                    .and_then(|n| n.parse::<usize>().ok())
                    .ok_or_else(|| CodecError::InvalidBatching(s.to_string()))?;
                if size == 0 {
                    return Err(CodecError::ZeroChunkSize);
                }
                Ok(Batching::Chunked(size))
            }
        }
    }
}

impl fmt::Display for Batching {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Batching::PerValue => write!(f, "per-value"),
            Batching::PerRow => write!(f, "per-row"),
            Batching::Chunked(n) => write!(f, "chunked:{}", n),
        }
    }
}

/// One write handed to the link and awaited before the next
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteUnit {
    pub bytes: Bytes,
    /// Rows fully contained in this and all earlier units
    pub rows_done: u32,
}

/// Result of encoding an image
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub width: u32,
    pub height: u32,
    pub units: Vec<WriteUnit>,
}

impl EncodedFrame {
    pub fn total_bytes(&self) -> usize {
        self.units.iter().map(|u| u.bytes.len()).sum()
    }

    /// The whole stream as one buffer
    #[cfg(test)]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.total_bytes());
        for unit in &self.units {
            buf.put_slice(&unit.bytes);
        }
        buf.freeze()
    }
}

/// Encodes value rasters into the row-marker wire format
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageEncoder {
    send_header: bool,
    batching: Batching,
}

impl ImageEncoder {
    pub fn new(send_header: bool, batching: Batching) -> CodecResult<Self> {
        if batching == Batching::Chunked(0) {
            return Err(CodecError::ZeroChunkSize);
        }
        Ok(Self {
            send_header,
            batching,
        })
    }

    pub fn batching(&self) -> Batching {
        self.batching
    }

    pub fn sends_header(&self) -> bool {
        self.send_header
    }

    /// Encode a raster into write units
    pub fn encode(&self, raster: &ValueRaster) -> EncodedFrame {
        let mut stream = BytesMut::with_capacity(
            raster.values.len() * 4 + raster.height as usize * ROW_MARKER.len() + 32,
        );
        // End offsets of every token, and of every complete row
        let mut token_ends = Vec::with_capacity(raster.values.len() + raster.height as usize + 1);
        let mut row_ends = Vec::with_capacity(raster.height as usize);
        let mut header_end = None;

        if self.send_header {
            // BytesMut grows on demand, so formatting into it cannot fail
            let _ = write!(stream, "{} {} {}", FRAME_HEADER_TAG, raster.width, raster.height);
            stream.put_u8(LINE_TERMINATOR);
            token_ends.push(stream.len());
            header_end = Some(stream.len());
        }

        for row in raster.rows() {
            stream.put_slice(ROW_MARKER);
            token_ends.push(stream.len());
            for value in row {
                let _ = write!(stream, "{}", value);
                stream.put_u8(LINE_TERMINATOR);
                token_ends.push(stream.len());
            }
            row_ends.push(stream.len());
        }

        let cuts: Vec<usize> = match self.batching {
            Batching::PerValue => token_ends,
            Batching::PerRow => header_end.into_iter().chain(row_ends.iter().copied()).collect(),
            Batching::Chunked(size) => {
                let mut cuts: Vec<usize> = (1..)
                    .map(|i| i * size)
                    .take_while(|end| *end < stream.len())
                    .collect();
                if !stream.is_empty() {
                    cuts.push(stream.len());
                }
                cuts
            }
        };

        let stream = stream.freeze();
        let mut units = Vec::with_capacity(cuts.len());
        let mut start = 0;
        for end in cuts {
            let rows_done = row_ends.partition_point(|row_end| *row_end <= end) as u32;
            units.push(WriteUnit {
                bytes: stream.slice(start..end),
                rows_done,
            });
            start = end;
        }

        EncodedFrame {
            width: raster.width,
            height: raster.height,
            units,
        }
    }
}
