//! Native GeoTIFF reading/writing
//!
//! Uses the `tiff` crate directly. Georeferencing is carried through the
//! ModelPixelScale (33550) and ModelTiepoint (33922) tags; rasters are
//! written as single-band 32-bit float.

use crate::error::{Error, Result};
use crate::raster::{GeoTransform, Raster, RasterElement};
use std::fs::File;
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::Gray32Float;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

const MODEL_PIXEL_SCALE: Tag = Tag::Unknown(33550);
const MODEL_TIEPOINT: Tag = Tag::Unknown(33922);
const GEO_KEY_DIRECTORY: Tag = Tag::Unknown(34735);

/// Read a GeoTIFF file into a Raster
pub fn read_geotiff<T, P>(path: P) -> Result<Raster<T>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::InputMissing(path.to_path_buf()));
    }

    let file = File::open(path)?;
    let mut decoder =
        Decoder::new(file).map_err(|e| Error::Other(format!("TIFF decode error: {}", e)))?;

    let (width, height) = decoder
        .dimensions()
        .map_err(|e| Error::Other(format!("Cannot read dimensions: {}", e)))?;
    let (rows, cols) = (height as usize, width as usize);

    let result = decoder
        .read_image()
        .map_err(|e| Error::Other(format!("Cannot read image data: {}", e)))?;

    fn cast_buf<S: num_traits::NumCast + Copy, T: RasterElement>(buf: &[S]) -> Vec<T> {
        buf.iter()
            .map(|&v| num_traits::cast(v).unwrap_or_else(T::default_nodata))
            .collect()
    }

    let data: Vec<T> = match result {
        DecodingResult::U8(buf) => cast_buf(&buf),
        DecodingResult::U16(buf) => cast_buf(&buf),
        DecodingResult::U32(buf) => cast_buf(&buf),
        DecodingResult::I16(buf) => cast_buf(&buf),
        DecodingResult::I32(buf) => cast_buf(&buf),
        DecodingResult::F32(buf) => cast_buf(&buf),
        DecodingResult::F64(buf) => cast_buf(&buf),
        _ => {
            return Err(Error::UnsupportedDataType(
                "Unsupported TIFF pixel format".to_string(),
            ))
        }
    };

    if data.len() != rows * cols {
        return Err(Error::InvalidDimensions {
            width: cols,
            height: rows,
        });
    }

    let mut raster = Raster::from_vec(data, rows, cols)?;
    if let Some(transform) = read_geotransform(&mut decoder) {
        raster.set_transform(transform);
    }

    Ok(raster)
}

/// Attempt to read the geotransform from TIFF tags
fn read_geotransform<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
) -> Option<GeoTransform> {
    let scale = decoder.get_tag_f64_vec(MODEL_PIXEL_SCALE).ok()?;
    let tiepoint = decoder.get_tag_f64_vec(MODEL_TIEPOINT).ok()?;

    if scale.len() < 2 || tiepoint.len() < 6 {
        return None;
    }

    // tiepoint: [I, J, K, X, Y, Z]; scale: [ScaleX, ScaleY, ScaleZ]
    let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
    let origin_y = tiepoint[4] + tiepoint[1] * scale[1];

    Some(GeoTransform::new(origin_x, origin_y, scale[0], -scale[1]))
}

/// Write a Raster to a GeoTIFF file as 32-bit float
pub fn write_geotiff<T, P>(raster: &Raster<T>, path: P) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::create(path.as_ref())?;
    let mut encoder =
        TiffEncoder::new(file).map_err(|e| Error::Other(format!("TIFF encoder error: {}", e)))?;

    let (rows, cols) = raster.shape();
    let data: Vec<f32> = raster
        .data()
        .iter()
        .map(|&v| num_traits::cast(v).unwrap_or(f32::NAN))
        .collect();

    let mut image = encoder
        .new_image::<Gray32Float>(cols as u32, rows as u32)
        .map_err(|e| Error::Other(format!("Cannot create TIFF image: {}", e)))?;

    let gt = raster.transform();

    let scale = [gt.pixel_width, gt.pixel_height.abs(), 0.0];
    image
        .encoder()
        .write_tag(MODEL_PIXEL_SCALE, &scale[..])
        .map_err(|e| Error::Other(format!("Cannot write scale tag: {}", e)))?;

    let tiepoint = [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0];
    image
        .encoder()
        .write_tag(MODEL_TIEPOINT, &tiepoint[..])
        .map_err(|e| Error::Other(format!("Cannot write tiepoint tag: {}", e)))?;

    // Minimal geokey directory: projected model, pixel-is-area
    let geokeys: [u16; 12] = [
        1, 1, 0, 2, //
        1024, 0, 1, 1, //
        1025, 0, 1, 1, //
    ];
    image
        .encoder()
        .write_tag(GEO_KEY_DIRECTORY, &geokeys[..])
        .map_err(|e| Error::Other(format!("Cannot write geokey tag: {}", e)))?;

    image
        .write_data(&data)
        .map_err(|e| Error::Other(format!("Cannot write image data: {}", e)))?;

    Ok(())
}
