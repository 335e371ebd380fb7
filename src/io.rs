use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::codecs::png::PngEncoder;
use image::{ColorType, DynamicImage, ImageEncoder, ImageFormat};
use serde::{Deserialize, Serialize};

use crate::canvas::{ColorModel, PixelBuffer};
use crate::error::{EditorError, Result};

/// Largest edge an icon directory entry can describe.
pub const MAX_ICON_EDGE: u32 = 256;

const ICON_HEADER_LEN: usize = 6;
const ICON_ENTRY_LEN: usize = 16;
/// Payload offset of a single-image container: header + one entry.
const SINGLE_PAYLOAD_OFFSET: u32 = (ICON_HEADER_LEN + ICON_ENTRY_LEN) as u32;
const ICON_TYPE: u16 = 1;
const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

// ============================================================================
// BINARY WRITER / READER
// ============================================================================

/// Append-only little-endian byte composer.
#[derive(Default, Debug, Clone)]
pub struct BinaryWriter {
    buf: Vec<u8>,
}

impl BinaryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { buf: Vec::with_capacity(capacity) }
    }

    pub fn write_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn write_u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn write_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Bytes written so far, which is also the offset of the next write.
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a little-endian byte slice. Reading past the end is an
/// [`EditorError::InvalidImage`].
pub struct BinaryReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BinaryReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|end| *end <= self.data.len()).ok_or_else(|| {
            EditorError::invalid_image(format!(
                "unexpected end of data: wanted {} bytes at offset {}, {} available",
                len,
                self.pos,
                self.remaining()
            ))
        })?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

// ============================================================================
// PNG PAYLOAD
// ============================================================================

/// Encode a raster as an RGBA PNG.
pub fn encode_png(buf: &PixelBuffer) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    PngEncoder::new(&mut out).write_image(buf.data(), buf.width(), buf.height(), ColorType::Rgba8)?;
    Ok(out)
}

pub fn decode_png(bytes: &[u8]) -> Result<PixelBuffer> {
    let img = image::load_from_memory_with_format(bytes, ImageFormat::Png)?;
    Ok(buffer_from_dynamic(&img))
}

fn buffer_from_dynamic(img: &DynamicImage) -> PixelBuffer {
    let model = if img.color().has_alpha() { ColorModel::Rgba } else { ColorModel::Rgb };
    PixelBuffer::from_rgba_image(&img.to_rgba8()).with_color_model(model)
}

// ============================================================================
// ICON CONTAINER
// ============================================================================

/// One decoded container entry. `width`/`height` are what the directory
/// declared (0 read back as 256); `pixels` carries the payload's own size.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IconImage {
    pub width: u32,
    pub height: u32,
    pub pixels: PixelBuffer,
}

fn entry_edge(v: u32) -> u8 {
    if v >= MAX_ICON_EDGE { 0 } else { v as u8 }
}

/// Encode `buf` as a single-image icon container with a PNG payload.
///
/// Layout: header (reserved 0, type 1, count 1), one 16-byte directory entry
/// (width, height, color count 0, reserved 0, planes 1, bits per pixel 8,
/// payload size, payload offset 22), then the payload.
pub fn encode_icon(buf: &PixelBuffer) -> Result<Vec<u8>> {
    if buf.width() == 0 || buf.height() == 0 {
        return Err(EditorError::invalid_image("cannot encode an empty raster"));
    }
    if buf.width() > MAX_ICON_EDGE || buf.height() > MAX_ICON_EDGE {
        return Err(EditorError::invalid_image(format!(
            "{}x{} exceeds the {}x{} icon limit",
            buf.width(),
            buf.height(),
            MAX_ICON_EDGE,
            MAX_ICON_EDGE
        )));
    }
    let payload = encode_png(buf)?;

    let mut w = BinaryWriter::with_capacity(SINGLE_PAYLOAD_OFFSET as usize + payload.len());
    w.write_u16(0).write_u16(ICON_TYPE).write_u16(1);
    w.write_u8(entry_edge(buf.width()))
        .write_u8(entry_edge(buf.height()))
        .write_u8(0)
        .write_u8(0)
        .write_u16(1)
        .write_u16(8)
        .write_u32(payload.len() as u32)
        .write_u32(SINGLE_PAYLOAD_OFFSET);
    w.write_bytes(&payload);
    Ok(w.into_bytes())
}

struct DirEntry {
    width: u8,
    height: u8,
    color_count: u8,
    planes: u16,
    bpp: u16,
    size: u32,
    offset: u32,
}

/// Decode every image of an icon container. Entries may carry PNG or
/// classic BMP (DIB) payloads.
pub fn decode_icon(bytes: &[u8]) -> Result<Vec<IconImage>> {
    let mut r = BinaryReader::new(bytes);
    let reserved = r.read_u16()?;
    let kind = r.read_u16()?;
    let count = r.read_u16()?;
    if reserved != 0 || kind != ICON_TYPE {
        return Err(EditorError::invalid_image(format!(
            "not an icon container (reserved {}, type {})",
            reserved, kind
        )));
    }
    if count == 0 {
        return Err(EditorError::invalid_image("icon container has no images"));
    }

    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let width = r.read_u8()?;
        let height = r.read_u8()?;
        let color_count = r.read_u8()?;
        let _reserved = r.read_u8()?;
        let planes = r.read_u16()?;
        let bpp = r.read_u16()?;
        let size = r.read_u32()?;
        let offset = r.read_u32()?;
        entries.push(DirEntry { width, height, color_count, planes, bpp, size, offset });
    }

    let mut images = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let start = entry.offset as usize;
        let end = start.checked_add(entry.size as usize).filter(|end| *end <= bytes.len()).ok_or_else(|| {
            EditorError::invalid_image(format!(
                "entry {} points outside the container ({} bytes at {})",
                i, entry.size, entry.offset
            ))
        })?;
        let payload = &bytes[start..end];

        let pixels = if payload.starts_with(&PNG_SIGNATURE) {
            decode_png(payload)?
        } else {
            decode_dib_entry(entry, payload)?
        };
        let width = if entry.width == 0 { MAX_ICON_EDGE } else { entry.width as u32 };
        let height = if entry.height == 0 { MAX_ICON_EDGE } else { entry.height as u32 };
        if pixels.width() != width || pixels.height() != height {
            log::debug!(
                "icon entry {} declares {}x{} but payload is {}x{}",
                i, width, height, pixels.width(), pixels.height()
            );
        }
        images.push(IconImage { width, height, pixels });
    }
    Ok(images)
}

/// A headerless DIB only makes sense next to its directory entry, so
/// re-wrap it as a one-entry container and let the `image` ICO decoder
/// handle the BMP details (AND mask, bottom-up rows, palettes).
fn decode_dib_entry(entry: &DirEntry, payload: &[u8]) -> Result<PixelBuffer> {
    let mut w = BinaryWriter::with_capacity(SINGLE_PAYLOAD_OFFSET as usize + payload.len());
    w.write_u16(0).write_u16(ICON_TYPE).write_u16(1);
    w.write_u8(entry.width)
        .write_u8(entry.height)
        .write_u8(entry.color_count)
        .write_u8(0)
        .write_u16(entry.planes)
        .write_u16(entry.bpp)
        .write_u32(payload.len() as u32)
        .write_u32(SINGLE_PAYLOAD_OFFSET);
    w.write_bytes(payload);
    let img = image::load_from_memory_with_format(w.as_bytes(), ImageFormat::Ico)?;
    Ok(buffer_from_dynamic(&img))
}

// ============================================================================
// IMAGE IMPORT
// ============================================================================

fn file_error(path: &Path, e: impl std::fmt::Display) -> EditorError {
    EditorError::File { path: path.to_path_buf(), message: e.to_string() }
}

/// Load an image file: one raster per entry for icon containers, a single
/// raster for anything else the `image` crate can decode.
pub fn import_image(path: &Path) -> Result<Vec<PixelBuffer>> {
    let bytes = fs::read(path).map_err(|e| file_error(path, e))?;
    import_bytes(&bytes)
}

pub fn import_bytes(bytes: &[u8]) -> Result<Vec<PixelBuffer>> {
    if bytes.starts_with(&[0, 0, 1, 0]) {
        return Ok(decode_icon(bytes)?.into_iter().map(|e| e.pixels).collect());
    }
    let img = image::load_from_memory(bytes)?;
    Ok(vec![buffer_from_dynamic(&img)])
}

/// Write `bytes` to `path`, creating parent directories.
pub fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| file_error(parent, e))?;
    }
    fs::write(path, bytes).map_err(|e| file_error(path, e))
}

// ============================================================================
// RASTER PERSISTENCE
// ============================================================================

/// Durable home for a document's rasters.
pub trait RasterStore {
    fn save_rasters(&mut self, rasters: &[PixelBuffer]) -> Result<()>;

    fn restore_rasters(&self) -> Result<Vec<PixelBuffer>>;
}

/// Serialized form of one raster: geometry plus hex-encoded bytes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct StoredRaster {
    width: u32,
    height: u32,
    color_model: String,
    data: String,
}

impl StoredRaster {
    fn from_buffer(buf: &PixelBuffer) -> Self {
        Self {
            width: buf.width(),
            height: buf.height(),
            color_model: buf.color_model().name().to_string(),
            data: to_hex(buf.data()),
        }
    }

    fn into_buffer(self) -> Result<PixelBuffer> {
        let model = ColorModel::from_name(&self.color_model).ok_or_else(|| EditorError::Storage {
            message: format!("unknown color model '{}'", self.color_model),
        })?;
        let data = from_hex(&self.data)?;
        Ok(PixelBuffer::from_raw(self.width, self.height, data)?.with_color_model(model))
    }
}

/// Stores rasters as `<dir>/<key>.bin` (bincode).
pub struct FileRasterStore {
    dir: PathBuf,
    key: String,
}

impl FileRasterStore {
    pub fn new(dir: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        Self { dir: dir.into(), key: key.into() }
    }

    /// Store under the platform data directory (`IconFE/rasters`).
    pub fn in_data_dir(key: impl Into<String>) -> Self {
        Self::new(crate::logger::data_dir().join("IconFE").join("rasters"), key)
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.bin", self.key))
    }
}

impl RasterStore for FileRasterStore {
    fn save_rasters(&mut self, rasters: &[PixelBuffer]) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| file_error(&self.dir, e))?;
        let records: Vec<StoredRaster> = rasters.iter().map(StoredRaster::from_buffer).collect();
        let path = self.path();
        let file = File::create(&path).map_err(|e| file_error(&path, e))?;
        bincode::serialize_into(BufWriter::new(file), &records)?;
        Ok(())
    }

    /// Nothing stored yet is an empty list, not an error.
    fn restore_rasters(&self) -> Result<Vec<PixelBuffer>> {
        let path = self.path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read(&path).map_err(|e| file_error(&path, e))?;
        let records: Vec<StoredRaster> = bincode::deserialize(&raw)?;
        records.into_iter().map(StoredRaster::into_buffer).collect()
    }
}

/// In-memory store for headless sessions and tests.
#[derive(Default, Debug, Clone)]
pub struct MemoryRasterStore {
    pub saved: Vec<PixelBuffer>,
    pub save_count: usize,
}

impl RasterStore for MemoryRasterStore {
    fn save_rasters(&mut self, rasters: &[PixelBuffer]) -> Result<()> {
        self.saved = rasters.to_vec();
        self.save_count += 1;
        Ok(())
    }

    fn restore_rasters(&self) -> Result<Vec<PixelBuffer>> {
        Ok(self.saved.clone())
    }
}

pub fn to_hex(bytes: &[u8]) -> String {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push(DIGITS[(b >> 4) as usize] as char);
        s.push(DIGITS[(b & 0x0f) as usize] as char);
    }
    s
}

pub fn from_hex(hex: &str) -> Result<Vec<u8>> {
    let bad = |msg: String| EditorError::Storage { message: msg };
    if hex.len() % 2 != 0 {
        return Err(bad(format!("odd hex length {}", hex.len())));
    }
    hex.as_bytes()
        .chunks_exact(2)
        .map(|pair| {
            let s = std::str::from_utf8(pair).map_err(|e| bad(e.to_string()))?;
            u8::from_str_radix(s, 16).map_err(|_| bad(format!("invalid hex byte '{}'", s)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn writer_is_little_endian() {
        let mut w = BinaryWriter::new();
        w.write_u8(0xAB).write_u16(0x0102).write_u32(0x0A0B_0C0D);
        assert_eq!(w.as_bytes(), &[0xAB, 0x02, 0x01, 0x0D, 0x0C, 0x0B, 0x0A]);
        assert_eq!(w.position(), 7);
    }

    #[test]
    fn reader_reports_truncation() {
        let data = [1u8, 0, 2];
        let mut r = BinaryReader::new(&data);
        assert_eq!(r.read_u16().unwrap(), 1);
        assert!(matches!(r.read_u16(), Err(EditorError::InvalidImage { .. })));
    }

    #[test]
    fn icon_header_and_entry_are_byte_exact() {
        let buf = PixelBuffer::new_filled(16, 8, Rgba([1, 2, 3, 255]));
        let bytes = encode_icon(&buf).unwrap();
        assert_eq!(&bytes[0..6], &[0, 0, 1, 0, 1, 0]);
        assert_eq!(bytes[6], 16);
        assert_eq!(bytes[7], 8);
        assert_eq!(&bytes[8..10], &[0, 0]);
        assert_eq!(&bytes[10..12], &[1, 0]);
        assert_eq!(&bytes[12..14], &[8, 0]);
        let size = u32::from_le_bytes([bytes[14], bytes[15], bytes[16], bytes[17]]) as usize;
        assert_eq!(size, bytes.len() - 22);
        assert_eq!(&bytes[18..22], &[22, 0, 0, 0]);
        assert!(bytes[22..].starts_with(&PNG_SIGNATURE));
    }

    #[test]
    fn full_size_edge_is_written_as_zero() {
        let buf = PixelBuffer::new(256, 1);
        let bytes = encode_icon(&buf).unwrap();
        assert_eq!(bytes[6], 0);
        assert_eq!(bytes[7], 1);
        let decoded = decode_icon(&bytes).unwrap();
        assert_eq!(decoded[0].width, 256);
        assert_eq!(decoded[0].pixels.width(), 256);
    }

    #[test]
    fn oversized_raster_is_rejected() {
        assert!(encode_icon(&PixelBuffer::new(257, 4)).is_err());
        assert!(encode_icon(&PixelBuffer::new(0, 4)).is_err());
    }

    #[test]
    fn malformed_containers_are_rejected() {
        assert!(decode_icon(&[0, 0, 2, 0, 1, 0]).is_err());
        assert!(decode_icon(&[0, 0, 1, 0, 0, 0]).is_err());
        let mut bytes = encode_icon(&PixelBuffer::new(2, 2)).unwrap();
        bytes.truncate(30);
        assert!(matches!(decode_icon(&bytes), Err(EditorError::InvalidImage { .. })));
    }

    #[test]
    fn hex_round_trip_and_errors() {
        assert_eq!(to_hex(&[0, 15, 255]), "000fff");
        assert_eq!(from_hex("000fff").unwrap(), vec![0, 15, 255]);
        assert!(from_hex("abc").is_err());
        assert!(from_hex("zz").is_err());
    }

    #[test]
    fn file_store_restores_what_it_saved() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileRasterStore::new(dir.path(), "doc-1");
        assert!(store.restore_rasters().unwrap().is_empty());

        let mut a = PixelBuffer::new_filled(3, 2, Rgba([9, 8, 7, 6]));
        a.set_color_model(ColorModel::Indexed);
        let b = PixelBuffer::new(1, 1);
        store.save_rasters(&[a.clone(), b.clone()]).unwrap();
        assert!(dir.path().join("doc-1.bin").exists());
        assert_eq!(store.restore_rasters().unwrap(), vec![a, b]);
    }

    #[test]
    fn import_reports_missing_files() {
        let err = import_image(Path::new("/definitely/not/here.png")).unwrap_err();
        assert!(matches!(err, EditorError::File { .. }));
    }

    #[test]
    fn import_reads_png_and_icon_files() {
        let dir = tempfile::tempdir().unwrap();
        let buf = PixelBuffer::new_filled(4, 3, Rgba([200, 100, 50, 255]));

        let png = dir.path().join("a.png");
        write_file(&png, &encode_png(&buf).unwrap()).unwrap();
        let loaded = import_image(&png).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].data(), buf.data());

        let ico = dir.path().join("nested").join("a.ico");
        write_file(&ico, &encode_icon(&buf).unwrap()).unwrap();
        assert_eq!(import_image(&ico).unwrap()[0].data(), buf.data());

        let junk = dir.path().join("junk.png");
        write_file(&junk, b"not an image").unwrap();
        assert!(matches!(import_image(&junk), Err(EditorError::InvalidImage { .. })));
    }
}
