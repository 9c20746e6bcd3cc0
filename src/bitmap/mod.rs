//! Bitmap module - Loads BMP files and streams them over the link
//!
//! Only the BMP container is accepted. Pixels are reduced to their HSV value
//! channel before encoding.

mod transfer;

pub use transfer::*;

use std::io;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat, ImageReader};
use thiserror::Error;

use crate::link::LinkError;
use crate::protocol::ValueRaster;

/// Bitmap errors
#[derive(Error, Debug)]
pub enum BitmapError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Not a BMP file: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("Decode error: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),
}

pub type BitmapResult<T> = Result<T, BitmapError>;

/// A decoded bitmap ready for transfer
#[derive(Debug, Clone)]
pub struct BitmapSource {
    path: PathBuf,
    raster: ValueRaster,
}

impl BitmapSource {
    /// Load a BMP file from disk
    pub fn load(path: &Path) -> BitmapResult<Self> {
        let mut reader = ImageReader::open(path)?.with_guessed_format()?;
        let format = reader
            .format()
            .or_else(|| ImageFormat::from_path(path).ok());
        if format != Some(ImageFormat::Bmp) {
            return Err(BitmapError::UnsupportedFormat(path.to_path_buf()));
        }
        reader.set_format(ImageFormat::Bmp);

        let raster = match reader.decode()? {
            DynamicImage::ImageLuma8(gray) => {
                let (width, height) = gray.dimensions();
                ValueRaster::from_gray(width, height, gray.into_raw())
            }
            other => {
                let rgb = other.to_rgb8();
                let (width, height) = rgb.dimensions();
                let pixels: Vec<[u8; 3]> = rgb.pixels().map(|p| p.0).collect();
                ValueRaster::from_rgb(width, height, &pixels)
            }
        };
        let raster = raster.ok_or_else(|| {
            BitmapError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "pixel count does not match dimensions",
            ))
        })?;

        tracing::info!(
            "Loaded {} ({}x{})",
            path.display(),
            raster.width(),
            raster.height()
        );
        if raster.is_grayscale() {
            tracing::info!("{} is grayscale", path.display());
        }

        Ok(Self {
            path: path.to_path_buf(),
            raster,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn raster(&self) -> &ValueRaster {
        &self.raster
    }
}
