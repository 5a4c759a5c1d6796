//! Firmware image loading and block chunking.

use std::path::Path;

use thiserror::Error;
use tracing::info;

use crate::protocol::{BLOCK_SIZE, FLASH_SIZE};

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Firmware image is empty")]
    Empty,
    #[error("Firmware image too large: {len} bytes, flash holds {max}")]
    TooLarge { len: usize, max: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Raw binary image destined for the start of code flash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Accept an image that fits the CH32V203 code flash.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, ImageError> {
        Self::with_limit(data, FLASH_SIZE)
    }

    /// Accept an image no larger than `max` bytes.
    pub fn with_limit(data: Vec<u8>, max: usize) -> Result<Self, ImageError> {
        if data.is_empty() {
            return Err(ImageError::Empty);
        }
        if data.len() > max {
            return Err(ImageError::TooLarge {
                len: data.len(),
                max,
            });
        }
        Ok(Self { data })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ImageError> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        info!(path = %path.display(), len = data.len(), "Loaded firmware image");
        Self::from_bytes(data)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of 256-byte blocks the image occupies.
    pub fn block_count(&self) -> usize {
        self.data.len().div_ceil(BLOCK_SIZE)
    }

    /// Iterate `(offset, block)` pairs; the last block is zero-padded.
    pub fn blocks(&self) -> BlockIterator<'_> {
        padded_blocks(&self.data)
    }
}

/// Iterate `(offset, block)` pairs over any byte slice.
pub fn padded_blocks(data: &[u8]) -> BlockIterator<'_> {
    BlockIterator { data, offset: 0 }
}

/// Iterator over zero-padded 256-byte blocks.
pub struct BlockIterator<'a> {
    data: &'a [u8],
    offset: usize,
}

impl Iterator for BlockIterator<'_> {
    type Item = (usize, [u8; BLOCK_SIZE]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }
        let end = (self.offset + BLOCK_SIZE).min(self.data.len());
        let mut block = [0u8; BLOCK_SIZE];
        block[..end - self.offset].copy_from_slice(&self.data[self.offset..end]);

        let offset = self.offset;
        self.offset = end;
        Some((offset, block))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.data.len() - self.offset).div_ceil(BLOCK_SIZE);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for BlockIterator<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty() {
        assert!(matches!(
            FirmwareImage::from_bytes(Vec::new()),
            Err(ImageError::Empty)
        ));
    }

    #[test]
    fn test_rejects_oversize() {
        let err = FirmwareImage::with_limit(vec![0; 1025], 1024).unwrap_err();
        assert!(matches!(err, ImageError::TooLarge { len: 1025, max: 1024 }));
    }

    #[test]
    fn test_blocks_pad_last() {
        let data: Vec<u8> = (0..300).map(|i| i as u8).collect();
        let image = FirmwareImage::from_bytes(data.clone()).unwrap();
        assert_eq!(image.block_count(), 2);

        let blocks: Vec<_> = image.blocks().collect();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].0, 0);
        assert_eq!(&blocks[0].1[..], &data[..256]);
        assert_eq!(blocks[1].0, 256);
        assert_eq!(&blocks[1].1[..44], &data[256..]);
        assert!(blocks[1].1[44..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_blocks_exact_multiple() {
        let image = FirmwareImage::from_bytes(vec![0xAB; 512]).unwrap();
        let mut blocks = image.blocks();
        assert_eq!(blocks.len(), 2);
        blocks.next();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks.next().map(|(o, _)| o), Some(256));
        assert!(blocks.next().is_none());
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("rvswd-image-{}.bin", std::process::id()));
        std::fs::write(&path, [1u8, 2, 3, 4]).unwrap();
        let image = FirmwareImage::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(image.as_bytes(), &[1, 2, 3, 4]);
    }
}
