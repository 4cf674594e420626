//! Animated GIF of a message's reactions: one lane per eight reactions, each
//! cell an emoji glyph followed by its count.

use super::{EmojiCatalog, ReactionRenderer, RenderError};
use crate::channels::SlackTransport;
use async_trait::async_trait;
use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::imageops::{self, FilterType};
use image::{AnimationDecoder, Delay, Frame, ImageFormat, ImageResult, Rgba, RgbaImage};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

pub const EMOJI_SIZE: u32 = 50;
pub const NUM_WIDTH: u32 = 50;
pub const MARGIN: u32 = 5;
pub const LANE: u32 = 8;
pub const REACTION_WIDTH: u32 = EMOJI_SIZE + NUM_WIDTH + MARGIN * 2;
pub const LANE_HEIGHT: u32 = EMOJI_SIZE + MARGIN * 2;
pub const FRAME_DELAY_MS: u32 = 40;
const MAX_FRAMES: usize = 50;

const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);
const INK: Rgba<u8> = Rgba([96, 96, 96, 255]);
const PLACEHOLDER_FILL: Rgba<u8> = Rgba([221, 221, 221, 255]);

/// 3x5 digit bitmaps, one row per entry, high bit on the left.
const DIGITS: [[u8; 5]; 10] = [
    [0b111, 0b101, 0b101, 0b101, 0b111],
    [0b010, 0b110, 0b010, 0b010, 0b111],
    [0b111, 0b001, 0b111, 0b100, 0b111],
    [0b111, 0b001, 0b111, 0b001, 0b111],
    [0b101, 0b101, 0b111, 0b001, 0b001],
    [0b111, 0b100, 0b111, 0b001, 0b111],
    [0b111, 0b100, 0b111, 0b101, 0b111],
    [0b111, 0b001, 0b001, 0b001, 0b001],
    [0b111, 0b101, 0b111, 0b101, 0b111],
    [0b111, 0b101, 0b111, 0b001, 0b111],
];

pub struct GifRenderer {
    slack: Arc<dyn SlackTransport>,
    catalog: Arc<EmojiCatalog>,
    emoji_dir: PathBuf,
}

/// Raw glyph bytes and the count shown next to them.
struct GlyphSource {
    name: String,
    bytes: Option<Vec<u8>>,
    count: u64,
}

struct Glyph {
    frames: Vec<RgbaImage>,
    count: u64,
}

impl GifRenderer {
    pub fn new(slack: Arc<dyn SlackTransport>, catalog: Arc<EmojiCatalog>, emoji_dir: PathBuf) -> Self {
        Self {
            slack,
            catalog,
            emoji_dir,
        }
    }

    async fn load(&self, name: &str) -> Option<Vec<u8>> {
        // Skin tone variants ("+1::skin-tone-2") use the base glyph.
        let base = name.split("::").next().unwrap_or(name);
        if let Some(url) = self.catalog.url(base) {
            return match self.slack.fetch_file(&url).await {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    tracing::warn!("Failed to fetch custom emoji :{}: {}", base, e);
                    None
                }
            };
        }
        for ext in ["png", "gif"] {
            let path = self.emoji_dir.join(format!("{}.{}", base, ext));
            if let Ok(bytes) = tokio::fs::read(&path).await {
                return Some(bytes);
            }
        }
        tracing::debug!("No glyph for :{}:, using placeholder", base);
        None
    }
}

#[async_trait]
impl ReactionRenderer for GifRenderer {
    async fn render(&self, channel: &str, ts: &str) -> Result<Vec<u8>, RenderError> {
        let reactions = self.slack.reactions(channel, ts).await?;
        if reactions.is_empty() {
            return Err(RenderError::NoReactions);
        }

        let mut sources = Vec::with_capacity(reactions.len());
        for reaction in reactions {
            sources.push(GlyphSource {
                bytes: self.load(&reaction.name).await,
                name: reaction.name,
                count: reaction.count,
            });
        }

        tokio::task::spawn_blocking(move || {
            let glyphs: Vec<Glyph> = sources.into_iter().map(decode_source).collect();
            compose(&glyphs)
        })
        .await
        .map_err(|e| RenderError::Join(e.to_string()))?
        .map_err(RenderError::from)
    }
}

fn decode_source(source: GlyphSource) -> Glyph {
    let frames = match source.bytes.as_deref().map(decode_glyph) {
        Some(Ok(frames)) if !frames.is_empty() => frames,
        Some(Err(e)) => {
            tracing::warn!("Undecodable glyph :{}: {}", source.name, e);
            vec![placeholder()]
        }
        _ => vec![placeholder()],
    };
    Glyph {
        frames,
        count: source.count,
    }
}

/// Decode a still or animated image into frames fitted to the emoji cell.
fn decode_glyph(bytes: &[u8]) -> ImageResult<Vec<RgbaImage>> {
    let frames: Vec<RgbaImage> = if image::guess_format(bytes)? == ImageFormat::Gif {
        GifDecoder::new(Cursor::new(bytes))?
            .into_frames()
            .collect_frames()?
            .into_iter()
            .take(MAX_FRAMES)
            .map(Frame::into_buffer)
            .collect()
    } else {
        vec![image::load_from_memory(bytes)?.to_rgba8()]
    };
    Ok(frames.iter().map(fit).collect())
}

fn fit(img: &RgbaImage) -> RgbaImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return placeholder();
    }
    let scale = f64::from(EMOJI_SIZE) / f64::from(w.max(h));
    let nw = ((f64::from(w) * scale).round() as u32).clamp(1, EMOJI_SIZE);
    let nh = ((f64::from(h) * scale).round() as u32).clamp(1, EMOJI_SIZE);
    imageops::resize(img, nw, nh, FilterType::Triangle)
}

fn placeholder() -> RgbaImage {
    let mut img = RgbaImage::from_pixel(EMOJI_SIZE, EMOJI_SIZE, PLACEHOLDER_FILL);
    for i in 0..EMOJI_SIZE {
        for (x, y) in [(i, 0), (i, EMOJI_SIZE - 1), (0, i), (EMOJI_SIZE - 1, i)] {
            img.put_pixel(x, y, INK);
        }
    }
    img
}

fn compose(glyphs: &[Glyph]) -> ImageResult<Vec<u8>> {
    let rows = (glyphs.len() as u32).div_ceil(LANE).max(1);
    let columns = (glyphs.len() as u32).clamp(1, LANE);
    let width = REACTION_WIDTH * columns;
    let height = LANE_HEIGHT * rows;
    let frame_count = glyphs
        .iter()
        .map(|g| g.frames.len())
        .max()
        .unwrap_or(1)
        .clamp(1, MAX_FRAMES);

    let frames = render_frames(frame_count, |i| draw_frame(glyphs, i, width, height));

    let mut out = Vec::new();
    {
        let mut encoder = GifEncoder::new_with_speed(&mut out, 10);
        encoder.set_repeat(Repeat::Infinite)?;
        encoder.encode_frames(frames.into_iter().map(|f| {
            Frame::from_parts(f, 0, 0, Delay::from_numer_denom_ms(FRAME_DELAY_MS, 1))
        }))?;
    }
    Ok(out)
}

/// Draw frames across the available cores, keeping frame order.
fn render_frames<F>(count: usize, draw: F) -> Vec<RgbaImage>
where
    F: Fn(usize) -> RgbaImage + Sync,
{
    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .clamp(1, count.max(1));
    let chunk = count.div_ceil(workers).max(1);
    let draw = &draw;

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..count)
            .step_by(chunk)
            .map(|start| {
                let end = (start + chunk).min(count);
                scope.spawn(move || (start..end).map(draw).collect::<Vec<_>>())
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap_or_default())
            .collect()
    })
}

fn draw_frame(glyphs: &[Glyph], index: usize, width: u32, height: u32) -> RgbaImage {
    let mut canvas = RgbaImage::from_pixel(width, height, BACKGROUND);
    for (j, glyph) in glyphs.iter().enumerate() {
        let j = j as u32;
        let cell_x = REACTION_WIDTH * (j % LANE);
        let cell_y = LANE_HEIGHT * (j / LANE);

        let frame = &glyph.frames[index % glyph.frames.len()];
        let (fw, fh) = frame.dimensions();
        let x = cell_x + MARGIN + (EMOJI_SIZE - fw.min(EMOJI_SIZE)) / 2;
        let y = cell_y + MARGIN + (EMOJI_SIZE - fh.min(EMOJI_SIZE)) / 2;
        imageops::overlay(&mut canvas, frame, i64::from(x), i64::from(y));

        draw_number(
            &mut canvas,
            glyph.count,
            cell_x + MARGIN + EMOJI_SIZE,
            cell_y + MARGIN,
        );
    }
    canvas
}

/// Count centered in the NUM_WIDTH x EMOJI_SIZE box at `(x0, y0)`.
fn draw_number(canvas: &mut RgbaImage, count: u64, x0: u32, y0: u32) {
    let digits: Vec<usize> = count
        .to_string()
        .bytes()
        .map(|b| usize::from(b - b'0'))
        .collect();
    let n = digits.len() as u32;
    let scale = ((NUM_WIDTH + 1) / (4 * n)).clamp(1, 7);
    let text_width = (4 * n * scale).saturating_sub(scale);
    let left = x0 + NUM_WIDTH.saturating_sub(text_width) / 2;
    let top = y0 + EMOJI_SIZE.saturating_sub(5 * scale) / 2;

    for (k, digit) in digits.into_iter().enumerate() {
        let dx = left + k as u32 * 4 * scale;
        for (row, bits) in DIGITS[digit].iter().enumerate() {
            for col in 0..3u32 {
                if bits & (0b100 >> col) == 0 {
                    continue;
                }
                for sy in 0..scale {
                    for sx in 0..scale {
                        let px = dx + col * scale + sx;
                        let py = top + row as u32 * scale + sy;
                        if px < canvas.width() && py < canvas.height() {
                            canvas.put_pixel(px, py, INK);
                        }
                    }
                }
            }
        }
    }
}
