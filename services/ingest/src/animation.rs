//! Animated GIF handling: coalesce, per-frame transforms, layer
//! optimization, and encoding.

use image::codecs::gif::GifDecoder;
use image::imageops::FilterType;
use image::{AnimationDecoder, DynamicImage, Rgba, RgbaImage};
use std::io::Cursor;

/// NeuQuant sampling speed for palette quantization (1 best, 30 fastest).
const QUANTIZE_SPEED: i32 = 10;
const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// A fully composited animation frame.
#[derive(Debug, Clone)]
pub struct CoalescedFrame {
    pub image: RgbaImage,
    /// Display time in milliseconds
    pub delay_ms: u32,
}

/// A frame as written to the GIF stream, positioned on the logical screen.
#[derive(Debug, Clone)]
pub struct Layer {
    pub image: RgbaImage,
    pub left: u32,
    pub top: u32,
    pub delay_ms: u32,
    /// Keep the layer on screen as the base for the next one
    pub keep: bool,
}

/// Decode a GIF into fully composited frames.
///
/// The decoder applies each frame's disposal method against the logical
/// screen, so delta-encoded sources come out as standalone frames.
pub fn coalesce(bytes: &[u8]) -> anyhow::Result<Vec<CoalescedFrame>> {
    let decoder = GifDecoder::new(Cursor::new(bytes))?;
    let frames = decoder.into_frames().collect_frames()?;

    Ok(frames
        .into_iter()
        .map(|frame| {
            let (numer, denom) = frame.delay().numer_denom_ms();
            let delay_ms = if denom == 0 { 0 } else { numer / denom };
            CoalescedFrame {
                image: frame.into_buffer(),
                delay_ms,
            }
        })
        .collect())
}

/// Crop-to-fill resize of one frame.
pub fn resize_to_fill(image: RgbaImage, width: u32, height: u32) -> RgbaImage {
    DynamicImage::ImageRgba8(image)
        .resize_to_fill(width, height, FilterType::Lanczos3)
        .into_rgba8()
}

fn is_opaque(frames: &[CoalescedFrame]) -> bool {
    frames
        .iter()
        .all(|frame| frame.image.pixels().all(|p| p[3] == u8::MAX))
}

/// Bounding box `(left, top, width, height)` of pixels that differ.
fn changed_bounds(previous: &RgbaImage, current: &RgbaImage) -> Option<(u32, u32, u32, u32)> {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, pixel) in current.enumerate_pixels() {
        if previous.get_pixel(x, y) != pixel {
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        }
    }
    bounds.map(|(x0, y0, x1, y1)| (x0, y0, x1 - x0 + 1, y1 - y0 + 1))
}

/// Turn composited frames into layers for storage.
///
/// Opaque animations keep the first frame whole; every later frame is
/// cropped to the region that changed since the previous frame, unchanged
/// pixels inside that region become transparent, and each layer stays on
/// screen under the next. Animations with transparency are written as full
/// frames cleared between draws, since a transparent pixel cannot express
/// "clear to background" on top of a kept layer.
pub fn optimize_layers(frames: &[CoalescedFrame]) -> Vec<Layer> {
    if !is_opaque(frames) {
        return frames
            .iter()
            .map(|frame| Layer {
                image: frame.image.clone(),
                left: 0,
                top: 0,
                delay_ms: frame.delay_ms,
                keep: false,
            })
            .collect();
    }

    let mut layers = Vec::with_capacity(frames.len());
    let mut previous: Option<&RgbaImage> = None;

    for frame in frames {
        let layer = match previous {
            None => Layer {
                image: frame.image.clone(),
                left: 0,
                top: 0,
                delay_ms: frame.delay_ms,
                keep: true,
            },
            Some(prev) => match changed_bounds(prev, &frame.image) {
                // Identical frame: a single transparent pixel keeps the timing.
                None => Layer {
                    image: RgbaImage::from_pixel(1, 1, TRANSPARENT),
                    left: 0,
                    top: 0,
                    delay_ms: frame.delay_ms,
                    keep: true,
                },
                Some((left, top, width, height)) => {
                    let image = RgbaImage::from_fn(width, height, |x, y| {
                        let current = *frame.image.get_pixel(left + x, top + y);
                        if *prev.get_pixel(left + x, top + y) == current {
                            TRANSPARENT
                        } else {
                            current
                        }
                    });
                    Layer {
                        image,
                        left,
                        top,
                        delay_ms: frame.delay_ms,
                        keep: true,
                    }
                }
            },
        };
        layers.push(layer);
        previous = Some(&frame.image);
    }

    layers
}

/// Encode layers as a looping GIF on a `width` x `height` logical screen.
pub fn encode_gif(layers: Vec<Layer>, width: u32, height: u32) -> anyhow::Result<Vec<u8>> {
    let mut out = Vec::new();
    {
        let mut encoder = gif::Encoder::new(&mut out, width as u16, height as u16, &[])?;
        encoder.set_repeat(gif::Repeat::Infinite)?;

        for layer in layers {
            let (layer_width, layer_height) = layer.image.dimensions();
            let mut pixels = layer.image.into_raw();
            let mut frame = gif::Frame::from_rgba_speed(
                layer_width as u16,
                layer_height as u16,
                &mut pixels,
                QUANTIZE_SPEED,
            );
            frame.left = layer.left as u16;
            frame.top = layer.top as u16;
            frame.delay = centiseconds(layer.delay_ms);
            frame.dispose = if layer.keep {
                gif::DisposalMethod::Keep
            } else {
                gif::DisposalMethod::Background
            };
            encoder.write_frame(&frame)?;
        }
    }
    Ok(out)
}

fn centiseconds(delay_ms: u32) -> u16 {
    ((delay_ms + 5) / 10).min(u16::MAX as u32) as u16
}
