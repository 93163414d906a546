use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, Write};
use std::path::Path;

use ndarray::{s, Array2, ArrayView3, Axis};
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::colortype::{self, ColorType as EncodeColorType};
use tiff::encoder::compression::{
    Compression as TiffCompression, CompressionAlgorithm, Deflate, DeflateLevel, Lzw,
    Uncompressed,
};
use tiff::encoder::{DirectoryEncoder, TiffEncoder, TiffKindStandard, TiffValue};
use tiff::tags::Tag;
use tiff::{ColorType, TiffError};
use tracing::debug;

use super::{
    Compression, GeoTransform, PixelType, RasterData, RasterIo, RasterProfile, Resampling,
    Window,
};
use crate::error::{CompositeError, Result};

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

const GT_MODEL_TYPE_KEY: u16 = 1024;
const GT_RASTER_TYPE_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;

fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// GeoTIFF implementation of [`RasterIo`] on top of the `tiff` crate.
///
/// Reads the first image directory as band 1. JPEG2000 sources and cross-CRS
/// warping need a GDAL-backed implementation.
#[derive(Clone, Copy, Debug, Default)]
pub struct GeoTiffIo;

impl GeoTiffIo {
    pub fn new() -> Self {
        Self
    }
}

fn check_tiff_path(path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(CompositeError::FileNotFound(path.to_path_buf()));
    }
    match path.extension().and_then(|e| e.to_str()) {
        Some("jp2" | "j2k" | "JP2") => Err(CompositeError::UnsupportedFormat(format!(
            "{} is JPEG2000, the GeoTIFF backend reads .tif only",
            path.display()
        ))),
        _ => Ok(()),
    }
}

fn open_decoder(path: &Path) -> Result<Decoder<BufReader<File>>> {
    check_tiff_path(path)?;
    let file = File::open(path)?;
    let decoder = Decoder::new(BufReader::new(file))?.with_limits(Limits::unlimited());
    Ok(decoder)
}

fn samples_per_pixel(color: ColorType) -> usize {
    match color {
        ColorType::GrayA(_) => 2,
        ColorType::RGB(_) => 3,
        ColorType::RGBA(_) => 4,
        _ => 1,
    }
}

/// Convert any decoded sample buffer into digital numbers.
fn to_dn(result: DecodingResult) -> Result<Vec<u16>> {
    Ok(match result {
        DecodingResult::U8(v) => v.into_iter().map(u16::from).collect(),
        DecodingResult::U16(v) => v,
        DecodingResult::U32(v) => v.into_iter().map(|x| x.min(u16::MAX as u32) as u16).collect(),
        DecodingResult::I16(v) => v.into_iter().map(|x| x.max(0) as u16).collect(),
        DecodingResult::F32(v) => v
            .into_iter()
            .map(|x| if x.is_finite() { x.round().clamp(0.0, u16::MAX as f32) as u16 } else { 0 })
            .collect(),
        _ => {
            return Err(CompositeError::UnsupportedFormat(
                "sample type cannot be represented as 16-bit digital numbers".into(),
            ))
        }
    })
}

fn read_crs(decoder: &mut Decoder<BufReader<File>>) -> Result<String> {
    let keys = match decoder.find_tag(tag(GEO_KEY_DIRECTORY))? {
        Some(value) => value.into_u16_vec()?,
        None => return Ok(String::new()),
    };
    // Header is 4 shorts, then (key, location, count, value) entries.
    for entry in keys.get(4..).unwrap_or_default().chunks_exact(4) {
        let (key, location, value) = (entry[0], entry[1], entry[3]);
        if location == 0 && (key == PROJECTED_CS_TYPE_KEY || key == GEOGRAPHIC_TYPE_KEY) {
            return Ok(format!("EPSG:{value}"));
        }
    }
    Ok(String::new())
}

fn read_transform(decoder: &mut Decoder<BufReader<File>>) -> Result<GeoTransform> {
    if let Some(value) = decoder.find_tag(tag(MODEL_TRANSFORMATION))? {
        let m = value.into_f64_vec()?;
        if m.len() >= 8 {
            return Ok(GeoTransform([m[3], m[0], m[1], m[7], m[4], m[5]]));
        }
    }
    let scale = decoder.find_tag(tag(MODEL_PIXEL_SCALE))?;
    let tie = decoder.find_tag(tag(MODEL_TIEPOINT))?;
    match (scale, tie) {
        (Some(scale), Some(tie)) => {
            let s = scale.into_f64_vec()?;
            let t = tie.into_f64_vec()?;
            if s.len() < 2 || t.len() < 6 {
                return Ok(GeoTransform::default());
            }
            Ok(GeoTransform([
                t[3] - t[0] * s[0],
                s[0],
                0.0,
                t[4] + t[1] * s[1],
                0.0,
                -s[1],
            ]))
        }
        _ => Ok(GeoTransform::default()),
    }
}

fn read_profile(decoder: &mut Decoder<BufReader<File>>) -> Result<RasterProfile> {
    let (width, height) = decoder.dimensions()?;
    let color = decoder.colortype()?;
    // One entry per sample, all equal for the layouts read here.
    let sample_format = match decoder.find_tag(Tag::SampleFormat)? {
        Some(value) => value.into_u16_vec()?.first().copied().unwrap_or(1),
        None => 1,
    };
    let dtype = match color {
        ColorType::Gray(8) | ColorType::RGB(8) => PixelType::U8,
        ColorType::Gray(32) if sample_format == 3 => PixelType::F32,
        _ => PixelType::U16,
    };
    let compression = match decoder.find_tag_unsigned::<u16>(Tag::Compression)?.unwrap_or(1) {
        5 => Compression::Lzw,
        8 | 32946 => Compression::Deflate,
        6 | 7 => Compression::Jpeg,
        _ => Compression::None,
    };
    let nodata = match decoder.find_tag(tag(GDAL_NODATA))? {
        Some(value) => value.into_string().ok().and_then(|s| s.trim_matches(char::from(0)).trim().parse().ok()),
        None => None,
    };
    let (chunk_w, chunk_h) = decoder.chunk_dimensions();
    Ok(RasterProfile {
        crs: read_crs(decoder)?,
        transform: read_transform(decoder)?,
        width: width as usize,
        height: height as usize,
        dtype,
        block_size: Some((chunk_w, chunk_h)),
        compression,
        nodata,
        overviews: Vec::new(),
    })
}

/// Walk the remaining directories and collect the decimation factor of every
/// reduced-resolution image. Leaves the decoder on the last directory.
fn read_overviews(decoder: &mut Decoder<BufReader<File>>, width: usize) -> Result<Vec<u32>> {
    let mut factors = Vec::new();
    while decoder.more_images() {
        decoder.next_image()?;
        let subfile = decoder.find_tag_unsigned::<u32>(Tag::NewSubfileType)?.unwrap_or(0);
        if subfile & 1 == 1 {
            let (w, _) = decoder.dimensions()?;
            factors.push((width as f64 / w.max(1) as f64).round() as u32);
        }
    }
    Ok(factors)
}

fn epsg_code(crs: &str) -> Option<u16> {
    crs.strip_prefix("EPSG:")
        .or_else(|| crs.strip_prefix("epsg:"))
        .and_then(|code| code.parse().ok())
}

fn write_geotags<W: Write + Seek>(
    encoder: &mut DirectoryEncoder<'_, W, TiffKindStandard>,
    profile: &RasterProfile,
) -> Result<()> {
    let t = profile.transform.0;
    if t[2] == 0.0 && t[4] == 0.0 {
        encoder.write_tag(tag(MODEL_PIXEL_SCALE), &[t[1], -t[5], 0.0][..])?;
        encoder.write_tag(tag(MODEL_TIEPOINT), &[0.0, 0.0, 0.0, t[0], t[3], 0.0][..])?;
    } else {
        let m = [
            t[1], t[2], 0.0, t[0], //
            t[4], t[5], 0.0, t[3], //
            0.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ];
        encoder.write_tag(tag(MODEL_TRANSFORMATION), &m[..])?;
    }

    let mut keys: Vec<u16> = vec![1, 1, 0, 0];
    let mut push_key = |key: u16, value: u16| keys.extend_from_slice(&[key, 0, 1, value]);
    match epsg_code(&profile.crs) {
        Some(code) if (4000..5000).contains(&code) => {
            push_key(GT_MODEL_TYPE_KEY, 2);
            push_key(GT_RASTER_TYPE_KEY, 1);
            push_key(GEOGRAPHIC_TYPE_KEY, code);
        }
        Some(code) => {
            push_key(GT_MODEL_TYPE_KEY, 1);
            push_key(GT_RASTER_TYPE_KEY, 1);
            push_key(PROJECTED_CS_TYPE_KEY, code);
        }
        None => push_key(GT_RASTER_TYPE_KEY, 1),
    }
    keys[3] = ((keys.len() - 4) / 4) as u16;
    encoder.write_tag(tag(GEO_KEY_DIRECTORY), &keys[..])?;

    if let Some(nodata) = profile.nodata {
        let text = format!("{nodata}");
        encoder.write_tag(tag(GDAL_NODATA), text.as_str())?;
    }
    Ok(())
}

/// Pixel-interleaved samples of one image directory.
struct Page<T> {
    width: u32,
    height: u32,
    samples: Vec<T>,
}

impl<T: Copy> Page<T> {
    /// Interleave a `(bands, rows, cols)` stack, keeping every `step`-th row and column.
    fn interleave(stack: ArrayView3<'_, T>, step: usize) -> Self {
        let step = step.max(1) as isize;
        let view = stack.slice(s![.., ..;step, ..;step]);
        let (_, h, w) = view.dim();
        Self {
            width: w as u32,
            height: h as u32,
            samples: view.permuted_axes([1, 2, 0]).iter().copied().collect(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Layout {
    Strips(Option<u32>),
    Tiles(u32, u32),
}

/// Tile sides must be multiples of 16, anything else falls back to strips.
fn layout(profile: &RasterProfile) -> Layout {
    match profile.block_size {
        Some((w, h)) if w > 0 && h > 0 && w % 16 == 0 && h % 16 == 0 => Layout::Tiles(w, h),
        Some((_, h)) => Layout::Strips(Some(h.max(1))),
        None => Layout::Strips(None),
    }
}

fn write_strips<W, C, D>(
    encoder: &mut TiffEncoder<W>,
    profile: &RasterProfile,
    page: &Page<C::Inner>,
    rows_per_strip: Option<u32>,
    overview: bool,
    compression: D,
) -> Result<()>
where
    W: Write + Seek,
    C: EncodeColorType,
    D: TiffCompression,
    [C::Inner]: TiffValue,
{
    let mut image =
        encoder.new_image_with_compression::<C, D>(page.width, page.height, compression)?;
    if let Some(rows) = rows_per_strip {
        image.rows_per_strip(rows)?;
    }
    if overview {
        image.encoder().write_tag(Tag::NewSubfileType, 1u32)?;
    } else {
        write_geotags(image.encoder(), profile)?;
    }
    image.write_data(&page.samples)?;
    Ok(())
}

/// Write one tiled image directory. Edge tiles are zero padded to full size.
fn write_tiles<W, C, D>(
    mut dir: DirectoryEncoder<'_, W, TiffKindStandard>,
    profile: &RasterProfile,
    page: &Page<C::Inner>,
    (tile_w, tile_h): (u32, u32),
    overview: bool,
    compression: D,
) -> Result<()>
where
    W: Write + Seek,
    C: EncodeColorType,
    C::Inner: Copy + Default,
    D: TiffCompression,
    [C::Inner]: TiffValue,
{
    let spp = C::BITS_PER_SAMPLE.len();
    let (width, height) = (page.width as usize, page.height as usize);
    let (tw, th) = (tile_w as usize, tile_h as usize);
    let mut algorithm = compression.get_algorithm();
    let mut tile = vec![C::Inner::default(); tw * th * spp];
    let mut offsets: Vec<u32> = Vec::new();
    let mut byte_counts: Vec<u32> = Vec::new();

    for row_off in (0..height).step_by(th) {
        for col_off in (0..width).step_by(tw) {
            tile.fill(C::Inner::default());
            let rows = th.min(height - row_off);
            let run = tw.min(width - col_off) * spp;
            for r in 0..rows {
                let src = ((row_off + r) * width + col_off) * spp;
                let dst = r * tw * spp;
                tile[dst..dst + run].copy_from_slice(&page.samples[src..src + run]);
            }
            let mut compressed = Vec::new();
            algorithm.write_to(&mut compressed, &tile[..].data())?;
            let offset = dir.write_data(&compressed[..])?;
            offsets.push(u32::try_from(offset).map_err(TiffError::from)?);
            byte_counts.push(u32::try_from(compressed.len()).map_err(TiffError::from)?);
        }
    }

    let sample_format: Vec<u16> = C::SAMPLE_FORMAT.iter().map(|f| f.to_u16()).collect();
    dir.write_tag(Tag::NewSubfileType, u32::from(overview))?;
    dir.write_tag(Tag::ImageWidth, page.width)?;
    dir.write_tag(Tag::ImageLength, page.height)?;
    dir.write_tag(Tag::BitsPerSample, C::BITS_PER_SAMPLE)?;
    dir.write_tag(Tag::Compression, D::COMPRESSION_METHOD.to_u16())?;
    dir.write_tag(Tag::PhotometricInterpretation, C::TIFF_VALUE.to_u16())?;
    dir.write_tag(Tag::SamplesPerPixel, spp as u16)?;
    dir.write_tag(Tag::PlanarConfiguration, 1u16)?;
    dir.write_tag(Tag::SampleFormat, &sample_format[..])?;
    dir.write_tag(Tag::TileWidth, tile_w)?;
    dir.write_tag(Tag::TileLength, tile_h)?;
    dir.write_tag(Tag::TileOffsets, &offsets[..])?;
    dir.write_tag(Tag::TileByteCounts, &byte_counts[..])?;
    if !overview {
        write_geotags(&mut dir, profile)?;
    }
    dir.finish()?;
    Ok(())
}

/// Write every band of `stack` as its own directory (or one RGB directory when
/// `interleaved`), followed by the overview levels named in the profile.
fn write_pages<W, C, D>(
    encoder: &mut TiffEncoder<W>,
    profile: &RasterProfile,
    stack: ArrayView3<'_, C::Inner>,
    interleaved: bool,
    compression: D,
) -> Result<()>
where
    W: Write + Seek,
    C: EncodeColorType,
    C::Inner: Copy + Default,
    D: TiffCompression + Copy,
    [C::Inner]: TiffValue,
{
    let groups: Vec<ArrayView3<'_, C::Inner>> = if interleaved {
        vec![stack]
    } else {
        stack.axis_chunks_iter(Axis(0), 1).collect()
    };
    let levels = std::iter::once(1).chain(profile.overviews.iter().copied().filter(|&f| f > 1));
    for (level, factor) in levels.enumerate() {
        let overview = level > 0;
        for group in &groups {
            let page = Page::interleave(group.view(), factor as usize);
            match layout(profile) {
                Layout::Strips(rows) => {
                    write_strips::<W, C, D>(encoder, profile, &page, rows, overview, compression)?
                }
                Layout::Tiles(w, h) => write_tiles::<W, C, D>(
                    encoder.new_directory()?,
                    profile,
                    &page,
                    (w, h),
                    overview,
                    compression,
                )?,
            }
        }
    }
    Ok(())
}

fn encode_pages<W, D>(
    encoder: &mut TiffEncoder<W>,
    data: RasterData<'_>,
    profile: &RasterProfile,
    compression: D,
) -> Result<()>
where
    W: Write + Seek,
    D: TiffCompression + Copy,
{
    match data {
        RasterData::U8(stack) if stack.dim().0 == 3 => {
            write_pages::<W, colortype::RGB8, D>(encoder, profile, stack, true, compression)
        }
        RasterData::U8(stack) => {
            write_pages::<W, colortype::Gray8, D>(encoder, profile, stack, false, compression)
        }
        RasterData::U16(stack) => {
            write_pages::<W, colortype::Gray16, D>(encoder, profile, stack, false, compression)
        }
        RasterData::F32(stack) => {
            write_pages::<W, colortype::Gray32Float, D>(encoder, profile, stack, false, compression)
        }
    }
}

impl RasterIo for GeoTiffIo {
    fn profile(&self, path: &Path) -> Result<RasterProfile> {
        let mut decoder = open_decoder(path)?;
        let mut profile = read_profile(&mut decoder)?;
        profile.overviews = read_overviews(&mut decoder, profile.width)?;
        Ok(profile)
    }

    fn read(&self, path: &Path) -> Result<(Array2<u16>, RasterProfile)> {
        let mut decoder = open_decoder(path)?;
        let mut profile = read_profile(&mut decoder)?;
        let spp = samples_per_pixel(decoder.colortype()?);
        let samples = to_dn(decoder.read_image()?)?;
        profile.overviews = read_overviews(&mut decoder, profile.width)?;
        let (h, w) = profile.shape();
        if samples.len() != h * w * spp {
            return Err(CompositeError::storage(
                path,
                format!("decoded {} samples, expected {}", samples.len(), h * w * spp),
            ));
        }
        let band: Vec<u16> = if spp == 1 {
            samples
        } else {
            samples.into_iter().step_by(spp).collect()
        };
        let data = Array2::from_shape_vec((h, w), band)
            .map_err(|e| CompositeError::storage(path, e))?;
        debug!(path = %path.display(), h, w, "Raster read");
        Ok((data, profile))
    }

    fn read_window(&self, path: &Path, window: Window) -> Result<Array2<u16>> {
        let mut decoder = open_decoder(path)?;
        let (width, height) = decoder.dimensions()?;
        if window.row_off + window.height > height as usize
            || window.col_off + window.width > width as usize
        {
            return Err(CompositeError::storage(
                path,
                format!("window {window:?} exceeds {width}x{height} raster"),
            ));
        }
        let spp = samples_per_pixel(decoder.colortype()?);
        let (chunk_w, chunk_h) = decoder.chunk_dimensions();
        let (chunk_w, chunk_h) = (chunk_w as usize, chunk_h as usize);
        let chunks_per_row = (width as usize).div_ceil(chunk_w);

        let mut out = Array2::<u16>::zeros((window.height, window.width));
        let first_chunk_row = window.row_off / chunk_h;
        let last_chunk_row = (window.row_off + window.height - 1) / chunk_h;
        let first_chunk_col = window.col_off / chunk_w;
        let last_chunk_col = (window.col_off + window.width - 1) / chunk_w;

        for chunk_row in first_chunk_row..=last_chunk_row {
            for chunk_col in first_chunk_col..=last_chunk_col {
                let index = (chunk_row * chunks_per_row + chunk_col) as u32;
                let (data_w, data_h) = decoder.chunk_data_dimensions(index);
                let (data_w, data_h) = (data_w as usize, data_h as usize);
                let samples = to_dn(decoder.read_chunk(index)?)?;
                let origin_row = chunk_row * chunk_h;
                let origin_col = chunk_col * chunk_w;

                let r0 = window.row_off.max(origin_row);
                let r1 = (window.row_off + window.height).min(origin_row + data_h);
                let c0 = window.col_off.max(origin_col);
                let c1 = (window.col_off + window.width).min(origin_col + data_w);
                for row in r0..r1 {
                    for col in c0..c1 {
                        let idx = ((row - origin_row) * data_w + (col - origin_col)) * spp;
                        let value = samples.get(idx).copied().ok_or_else(|| {
                            CompositeError::storage(path, format!("chunk {index} is truncated"))
                        })?;
                        out[[row - window.row_off, col - window.col_off]] = value;
                    }
                }
            }
        }
        Ok(out)
    }

    fn write(&self, path: &Path, data: RasterData<'_>, profile: &RasterProfile) -> Result<()> {
        if matches!(path.extension().and_then(|e| e.to_str()), Some("jp2" | "j2k")) {
            return Err(CompositeError::UnsupportedFormat(format!(
                "cannot encode JPEG2000 at {}",
                path.display()
            )));
        }
        let (bands, h, w) = data.dim();
        if (h, w) != profile.shape() {
            return Err(CompositeError::ShapeMismatch {
                expected: vec![profile.height, profile.width],
                found: vec![h, w],
            });
        }
        let mut encoder = TiffEncoder::new(BufWriter::new(File::create(path)?))?;
        match profile.compression {
            Compression::None => encode_pages(&mut encoder, data, profile, Uncompressed)?,
            Compression::Lzw => encode_pages(&mut encoder, data, profile, Lzw)?,
            Compression::Deflate => encode_pages(
                &mut encoder,
                data,
                profile,
                Deflate::with_level(DeflateLevel::Balanced),
            )?,
            Compression::Jpeg => {
                debug!("JPEG-in-TIFF is not available in this backend, writing LZW");
                encode_pages(&mut encoder, data, profile, Lzw)?
            }
        }
        debug!(path = %path.display(), bands, h, w, "Raster written");
        Ok(())
    }

    fn reproject(
        &self,
        src: &Path,
        dst: &Path,
        target_crs: &str,
        _resampling: Resampling,
    ) -> Result<RasterProfile> {
        let profile = self.profile(src)?;
        if profile.crs == target_crs {
            std::fs::copy(src, dst)?;
            return Ok(profile);
        }
        Err(CompositeError::Unsupported(format!(
            "warping {} from {} to {target_crs} needs a GDAL-backed RasterIo",
            src.display(),
            profile.crs
        )))
    }
}
