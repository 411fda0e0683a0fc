use std::any::Any;
use std::borrow::Cow;
use std::sync::Arc;

use super::{be_u32, Format, FormatValue, HeaderHint};
use crate::error::{ArchiverError, Result};
use crate::graph::LinkedNode;
use crate::stream::{read_up_to, ByteStream, StreamFactory};
use crate::vocab::{Class, Property};

const SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
/// Signature, IHDR length and type, IHDR payload.
const IHDR_END: usize = 8 + 8 + 13;

pub struct PngFormat;

impl Format for PngFormat {
    fn name(&self) -> &'static str {
        "png"
    }

    fn header_length(&self) -> usize {
        SIGNATURE.len()
    }

    fn could_match(&self, header: &[u8], _hint: &HeaderHint) -> bool {
        header.starts_with(SIGNATURE)
    }

    fn parse(
        &self,
        mut stream: Box<dyn ByteStream>,
        _source: Arc<dyn StreamFactory>,
    ) -> Result<Arc<dyn FormatValue>> {
        let mut head = [0u8; IHDR_END];
        if read_up_to(&mut stream, &mut head)? < IHDR_END || &head[12..16] != b"IHDR" {
            return Err(ArchiverError::format("png", "missing IHDR chunk"));
        }
        let width = be_u32(&head, 16).unwrap_or(0);
        let height = be_u32(&head, 20).unwrap_or(0);
        if width == 0 || height == 0 {
            return Err(ArchiverError::format("png", "zero image dimension"));
        }

        Ok(Arc::new(PngImage {
            width,
            height,
            bit_depth: head[24],
            color_type: head[25],
            interlaced: head[28] == 1,
        }))
    }
}

#[derive(Debug)]
pub struct PngImage {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub color_type: u8,
    pub interlaced: bool,
}

impl PngImage {
    fn channels(&self) -> u32 {
        match self.color_type {
            2 => 3,
            4 => 2,
            6 => 4,
            _ => 1,
        }
    }

    pub fn color_type_name(&self) -> &'static str {
        match self.color_type {
            0 => "grayscale",
            2 => "truecolor",
            3 => "indexed",
            4 => "grayscale-alpha",
            6 => "truecolor-alpha",
            _ => "unknown",
        }
    }

    /// Bits per pixel.
    pub fn color_depth(&self) -> u32 {
        self.bit_depth as u32 * self.channels()
    }
}

impl FormatValue for PngImage {
    fn media_type(&self) -> Cow<'static, str> {
        Cow::Borrowed("image/png")
    }

    fn extension(&self) -> Option<Cow<'static, str>> {
        Some(Cow::Borrowed("png"))
    }

    fn describe(&self, node: &LinkedNode) {
        node.set_class(Class::Image);
        node.set_class(Class::RasterImage);
        node.set(Property::Width, self.width);
        node.set(Property::Height, self.height);
        node.set(Property::ColorDepth, self.color_depth());
        node.set(Property::ColorType, self.color_type_name());
        node.set(Property::Interlaced, self.interlaced);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemoryStreamFactory;
    use std::io::Cursor;

    fn png_header(width: u32, height: u32) -> Vec<u8> {
        let mut data = SIGNATURE.to_vec();
        data.extend_from_slice(&13u32.to_be_bytes());
        data.extend_from_slice(b"IHDR");
        data.extend_from_slice(&width.to_be_bytes());
        data.extend_from_slice(&height.to_be_bytes());
        data.extend_from_slice(&[8, 6, 0, 0, 0]);
        data.extend_from_slice(&[0, 0, 0, 0]);
        data
    }

    fn parse(data: Vec<u8>) -> Result<Arc<dyn FormatValue>> {
        let source: Arc<dyn StreamFactory> = Arc::new(MemoryStreamFactory::new(data.clone()));
        PngFormat.parse(Box::new(Cursor::new(data)), source)
    }

    #[test]
    fn test_parse_ihdr() {
        let value = parse(png_header(640, 480)).unwrap();
        let image = value.as_any().downcast_ref::<PngImage>().unwrap();
        assert_eq!((image.width, image.height), (640, 480));
        assert_eq!(image.color_depth(), 32);
        assert_eq!(image.color_type_name(), "truecolor-alpha");
        assert!(!image.interlaced);
    }

    #[test]
    fn test_signature_only_fails() {
        assert!(parse(SIGNATURE.to_vec()).is_err());
        assert!(parse(png_header(0, 10)).is_err());
    }
}
