use std::fs;
use std::path::Path;

use anyhow::Context;
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, DynamicImage, Frame as GifFrame};

use crate::pipeline::Frame;

/// Frame hold time. Matches the 10 fps the upstream exporter produces.
const FRAME_DELAY_MS: u32 = 100;

/// Encodes frames into an in-memory looping GIF.
pub fn encode_gif(frames: &[Frame]) -> anyhow::Result<Vec<u8>> {
    anyhow::ensure!(!frames.is_empty(), "pipeline produced no frames");

    let mut bytes = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut bytes);
        encoder
            .set_repeat(Repeat::Infinite)
            .context("setting gif repeat")?;
        for frame in frames {
            let rgba = DynamicImage::ImageRgb8(frame.clone()).to_rgba8();
            let delay = Delay::from_numer_denom_ms(FRAME_DELAY_MS, 1);
            encoder
                .encode_frame(GifFrame::from_parts(rgba, 0, 0, delay))
                .context("encoding gif frame")?;
        }
    }
    Ok(bytes)
}

/// Encodes `frames` and persists the artifact at `path`. Returns the encoded
/// bytes so the caller does not have to read the file back.
pub fn write_gif(frames: &[Frame], path: &Path) -> anyhow::Result<Vec<u8>> {
    let bytes = encode_gif(frames)?;
    fs::write(path, &bytes).with_context(|| format!("writing {}", path.display()))?;
    Ok(bytes)
}
