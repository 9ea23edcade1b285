//! Media sniffing and the annotation engine.
//!
//! The media type is decided from the leading bytes of the payload only;
//! file extensions and response headers are never consulted.

use crate::animation::{self, CoalescedFrame};
use crate::caption::{ANIMATED_CAPTION, STILL_CAPTION};
use crate::error::IngestError;
use bytes::Bytes;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use lgtm_catalog::blob_store::content_type_for;
use std::io::Cursor;
use tracing::debug;

/// Processed canvas for still images.
pub const STILL_SIZE: (u32, u32) = (800, 600);
/// Processed canvas for animations.
pub const ANIMATED_SIZE: (u32, u32) = (400, 300);

/// Supported media types, detected by magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Gif,
    Jpeg,
    Png,
}

impl MediaKind {
    pub fn sniff(bytes: &[u8]) -> Result<Self, IngestError> {
        match image::guess_format(bytes) {
            Ok(ImageFormat::Gif) => Ok(MediaKind::Gif),
            Ok(ImageFormat::Jpeg) => Ok(MediaKind::Jpeg),
            Ok(ImageFormat::Png) => Ok(MediaKind::Png),
            Ok(other) => Err(IngestError::UnsupportedMediaType(format!("{other:?}"))),
            Err(_) => Err(IngestError::UnsupportedMediaType(
                "unrecognized content".to_string(),
            )),
        }
    }

    /// Extension used in the processed blob key.
    pub fn extension(&self) -> &'static str {
        match self {
            MediaKind::Gif => "gif",
            MediaKind::Jpeg => "jpeg",
            MediaKind::Png => "png",
        }
    }

    pub fn content_type(&self) -> &'static str {
        content_type_for(self.extension())
    }

    pub fn is_animated(&self) -> bool {
        matches!(self, MediaKind::Gif)
    }

    fn format(&self) -> ImageFormat {
        match self {
            MediaKind::Gif => ImageFormat::Gif,
            MediaKind::Jpeg => ImageFormat::Jpeg,
            MediaKind::Png => ImageFormat::Png,
        }
    }
}

/// Decoded media, one variant per annotation strategy.
pub enum MediaVariant {
    Still {
        kind: MediaKind,
        image: DynamicImage,
    },
    Animated {
        frames: Vec<CoalescedFrame>,
    },
}

/// Output of the annotation engine for one item.
#[derive(Debug, Clone)]
pub struct AnnotatedMedia {
    pub kind: MediaKind,
    /// Captioned media in the sniffed format
    pub processed: Bytes,
    /// Unannotated first frame as JPEG, input for label detection
    pub original: Bytes,
    pub frame_count: usize,
}

impl MediaVariant {
    pub fn decode(kind: MediaKind, bytes: &[u8]) -> Result<Self, IngestError> {
        if kind.is_animated() {
            let frames = animation::coalesce(bytes)
                .map_err(|e| IngestError::Annotation(format!("GIF decode failed: {e}")))?;
            if frames.is_empty() {
                return Err(IngestError::Annotation("GIF has no frames".to_string()));
            }
            Ok(MediaVariant::Animated { frames })
        } else {
            let image = image::load_from_memory_with_format(bytes, kind.format())
                .map_err(|e| IngestError::Annotation(format!("image decode failed: {e}")))?;
            Ok(MediaVariant::Still { kind, image })
        }
    }

    pub fn annotate(self) -> Result<AnnotatedMedia, IngestError> {
        match self {
            MediaVariant::Still { kind, image } => annotate_still(kind, image),
            MediaVariant::Animated { frames } => annotate_animated(frames),
        }
    }
}

fn annotate_still(kind: MediaKind, image: DynamicImage) -> Result<AnnotatedMedia, IngestError> {
    let original = encode_jpeg(&image)?;

    let (width, height) = STILL_SIZE;
    let mut canvas = image
        .resize_to_fill(width, height, FilterType::Lanczos3)
        .into_rgba8();
    STILL_CAPTION.draw(&mut canvas);

    let processed = match kind {
        MediaKind::Png => encode(&DynamicImage::ImageRgba8(canvas), ImageFormat::Png)?,
        _ => encode_jpeg(&DynamicImage::ImageRgba8(canvas))?,
    };

    Ok(AnnotatedMedia {
        kind,
        processed,
        original,
        frame_count: 1,
    })
}

fn annotate_animated(frames: Vec<CoalescedFrame>) -> Result<AnnotatedMedia, IngestError> {
    let frame_count = frames.len();
    let original = match frames.first() {
        Some(first) => encode_jpeg(&DynamicImage::ImageRgba8(first.image.clone()))?,
        None => return Err(IngestError::Annotation("GIF has no frames".to_string())),
    };

    let (width, height) = ANIMATED_SIZE;
    let captioned: Vec<CoalescedFrame> = frames
        .into_iter()
        .map(|frame| {
            let mut image = animation::resize_to_fill(frame.image, width, height);
            ANIMATED_CAPTION.draw(&mut image);
            CoalescedFrame {
                image,
                delay_ms: frame.delay_ms,
            }
        })
        .collect();

    let layers = animation::optimize_layers(&captioned);
    let processed = animation::encode_gif(layers, width, height)
        .map_err(|e| IngestError::Annotation(format!("GIF encode failed: {e}")))?;

    debug!(frames = frame_count, bytes = processed.len(), "Annotated animation");

    Ok(AnnotatedMedia {
        kind: MediaKind::Gif,
        processed: Bytes::from(processed),
        original,
        frame_count,
    })
}

fn encode(image: &DynamicImage, format: ImageFormat) -> Result<Bytes, IngestError> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, format)
        .map_err(|e| IngestError::Annotation(format!("{format:?} encode failed: {e}")))?;
    Ok(Bytes::from(buffer.into_inner()))
}

/// JPEG has no alpha channel, so flatten to RGB first.
fn encode_jpeg(image: &DynamicImage) -> Result<Bytes, IngestError> {
    encode(&DynamicImage::ImageRgb8(image.to_rgb8()), ImageFormat::Jpeg)
}

/// Sniff, decode, and caption raw media bytes.
pub fn annotate(bytes: &[u8]) -> Result<AnnotatedMedia, IngestError> {
    let kind = MediaKind::sniff(bytes)?;
    MediaVariant::decode(kind, bytes)?.annotate()
}

/// Run [`annotate`] on the blocking thread pool.
pub async fn annotate_blocking(bytes: Bytes) -> Result<AnnotatedMedia, IngestError> {
    tokio::task::spawn_blocking(move || annotate(&bytes))
        .await
        .map_err(|e| IngestError::Annotation(format!("annotation task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::tests::solid_gif;
    use image::{Rgba, RgbaImage};

    const BACKGROUND: [u8; 4] = [20, 60, 160, 255];

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, Rgba(BACKGROUND));
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(image)
            .write_to(&mut buffer, ImageFormat::Png)
            .unwrap();
        buffer.into_inner()
    }

    fn close_to(actual: [u8; 4], expected: [u8; 4]) -> bool {
        actual
            .iter()
            .zip(expected.iter())
            .all(|(a, e)| (*a as i16 - *e as i16).abs() <= 2)
    }

    #[test]
    fn test_sniff_by_magic_bytes() {
        assert_eq!(MediaKind::sniff(b"GIF89a\x01\x00").unwrap(), MediaKind::Gif);
        assert_eq!(MediaKind::sniff(&png_bytes(2, 2)).unwrap(), MediaKind::Png);
        assert_eq!(
            MediaKind::sniff(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00]).unwrap(),
            MediaKind::Jpeg
        );
        assert!(matches!(
            MediaKind::sniff(b"<html>not an image</html>"),
            Err(IngestError::UnsupportedMediaType(_))
        ));
        assert!(matches!(
            MediaKind::sniff(b"BM\x00\x00\x00\x00\x00\x00\x00\x00"),
            Err(IngestError::UnsupportedMediaType(_))
        ));
    }

    #[test]
    fn test_kind_extensions() {
        assert_eq!(MediaKind::Gif.extension(), "gif");
        assert_eq!(MediaKind::Jpeg.content_type(), "image/jpeg");
        assert!(MediaKind::Gif.is_animated());
        assert!(!MediaKind::Png.is_animated());
    }

    #[test]
    fn test_still_is_resized_and_captioned() {
        let annotated = annotate(&png_bytes(1600, 1000)).unwrap();
        assert_eq!(annotated.kind, MediaKind::Png);
        assert_eq!(annotated.frame_count, 1);

        let processed = image::load_from_memory(&annotated.processed).unwrap().into_rgba8();
        assert_eq!(processed.dimensions(), STILL_SIZE);

        // Content outside the caption bands is preserved.
        assert!(close_to(processed.get_pixel(5, 5).0, BACKGROUND));
        assert!(close_to(processed.get_pixel(795, 595).0, BACKGROUND));

        let white_in = |(top, bottom): (u32, u32)| {
            (top..bottom).any(|y| {
                (0..processed.width()).any(|x| processed.get_pixel(x, y).0 == [255, 255, 255, 255])
            })
        };
        assert!(white_in(STILL_CAPTION.title.rows()));
        assert!(white_in(STILL_CAPTION.subtitle.rows()));
        assert!(STILL_CAPTION.title.size > STILL_CAPTION.subtitle.size);
    }

    #[test]
    fn test_still_original_is_unresized_jpeg() {
        let annotated = annotate(&png_bytes(1600, 1000)).unwrap();
        assert_eq!(MediaKind::sniff(&annotated.original).unwrap(), MediaKind::Jpeg);

        let original = image::load_from_memory(&annotated.original).unwrap();
        assert_eq!((original.width(), original.height()), (1600, 1000));
    }

    #[test]
    fn test_animation_keeps_frame_count() {
        let colors = [[255, 0, 0], [0, 255, 0], [0, 0, 255], [255, 255, 0]];
        let annotated = annotate(&solid_gif(120, 60, &colors)).unwrap();
        assert_eq!(annotated.kind, MediaKind::Gif);
        assert_eq!(annotated.frame_count, colors.len());

        let frames = animation::coalesce(&annotated.processed).unwrap();
        assert_eq!(frames.len(), colors.len());
        for frame in &frames {
            assert_eq!(frame.image.dimensions(), ANIMATED_SIZE);
        }

        let original = image::load_from_memory(&annotated.original).unwrap();
        assert_eq!((original.width(), original.height()), (120, 60));
    }

    #[test]
    fn test_animation_frames_carry_caption() {
        let annotated = annotate(&solid_gif(80, 60, &[[0, 0, 0], [40, 40, 40]])).unwrap();
        let frames = animation::coalesce(&annotated.processed).unwrap();

        let (top, bottom) = ANIMATED_CAPTION.title.rows();
        for frame in &frames {
            let white = (top..bottom).any(|y| {
                (0..frame.image.width())
                    .any(|x| frame.image.get_pixel(x, y).0 == [255, 255, 255, 255])
            });
            assert!(white);
        }
    }

    #[test]
    fn test_corrupt_gif_is_annotation_error() {
        assert!(matches!(
            annotate(b"GIF89a\x01\x00garbage"),
            Err(IngestError::Annotation(_))
        ));
    }

    #[tokio::test]
    async fn test_annotate_blocking_rejects_unknown_media() {
        let result = annotate_blocking(Bytes::from_static(b"plain text")).await;
        assert!(matches!(result, Err(IngestError::UnsupportedMediaType(_))));
    }
}
