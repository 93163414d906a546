use std::path::Path;

use image::{Rgb, RgbImage};
use ndarray::{Array3, ArrayView2};

use super::{Compression, PixelType, RasterData, RasterIo, RasterProfile};
use crate::consts::{GTIFF_BLOCK_SIZE, QUICKLOOK_GAIN, QUICKLOOK_MAX_DN, QUICKLOOK_OVERVIEWS};
use crate::error::{CompositeError, Result};

/// Stretch a digital number into 8 bits: `dn * gain` clipped to `0..=QUICKLOOK_MAX_DN`.
pub fn stretch(dn: u16) -> u8 {
    let v = (dn as f32 * QUICKLOOK_GAIN).clamp(0.0, QUICKLOOK_MAX_DN);
    (v / QUICKLOOK_MAX_DN * 255.0).round() as u8
}

/// Build an 8-bit true-colour preview from red (B04), green (B03) and blue (B02).
pub fn rgb_quicklook(
    red: ArrayView2<u16>,
    green: ArrayView2<u16>,
    blue: ArrayView2<u16>,
) -> Result<RgbImage> {
    let (h, w) = red.dim();
    for other in [green.dim(), blue.dim()] {
        if other != (h, w) {
            return Err(CompositeError::ShapeMismatch {
                expected: vec![h, w],
                found: vec![other.0, other.1],
            });
        }
    }

    let mut img = RgbImage::new(w as u32, h as u32);
    for row in 0..h {
        for col in 0..w {
            let px = Rgb([
                stretch(red[[row, col]]),
                stretch(green[[row, col]]),
                stretch(blue[[row, col]]),
            ]);
            img.put_pixel(col as u32, row as u32, px);
        }
    }
    Ok(img)
}

/// Write a quicklook as a tiled, georeferenced 3-band u8 raster with
/// reduced-resolution overviews.
pub fn write_quicklook(
    io: &dyn RasterIo,
    path: &Path,
    img: &RgbImage,
    donor: &RasterProfile,
) -> Result<()> {
    let (w, h) = img.dimensions();
    let (w, h) = (w as usize, h as usize);
    let mut bands = Array3::<u8>::zeros((3, h, w));
    for (col, row, px) in img.enumerate_pixels() {
        for b in 0..3 {
            bands[[b, row as usize, col as usize]] = px.0[b];
        }
    }

    let mut profile = donor.resized(h, w);
    profile.dtype = PixelType::U8;
    profile.compression = Compression::Jpeg;
    profile.block_size = Some((GTIFF_BLOCK_SIZE, GTIFF_BLOCK_SIZE));
    profile.overviews = QUICKLOOK_OVERVIEWS.to_vec();
    profile.nodata = None;
    io.write(path, RasterData::U8(bands.view()), &profile)
}
