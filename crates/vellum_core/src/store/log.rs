//! On-disk format of the data file.
//!
//! ```text
//! header: magic(8) | major(2) | minor(2) | page_size(4)
//!         | lower(8) | growth(8) | upper(8) | shrink(8) | crc32(4)
//! frame:  len(4) | txnid(8) | ops(len) | crc32(4)
//! ```
//!
//! All integers are little-endian. A frame's checksum covers its txnid and
//! its ops. One frame is one committed write transaction.

use crate::config::EffectiveGeometry;
use crate::error::{CoreError, CoreResult};
use crate::map::{KeyOrder, MapLayout};

/// Magic bytes at the start of every data file.
pub(crate) const MAGIC: [u8; 8] = *b"VELLUMDB";

/// Current format version.
pub(crate) const FORMAT_VERSION: (u16, u16) = (1, 0);

/// Size of the encoded header.
pub(crate) const HEADER_LEN: usize = 52;

/// Bytes a frame adds around its ops.
pub(crate) const FRAME_OVERHEAD: usize = 16;

/// Name of a map inside the data file; `None` is the default map.
pub(crate) type MapName = Option<String>;

/// Data file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LogHeader {
    pub(crate) format_version: (u16, u16),
    pub(crate) geometry: EffectiveGeometry,
}

impl LogHeader {
    pub(crate) fn new(geometry: EffectiveGeometry) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            geometry,
        }
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN);
        buf.extend_from_slice(&MAGIC);
        buf.extend_from_slice(&self.format_version.0.to_le_bytes());
        buf.extend_from_slice(&self.format_version.1.to_le_bytes());
        buf.extend_from_slice(&self.geometry.page_size.to_le_bytes());
        buf.extend_from_slice(&self.geometry.lower.to_le_bytes());
        buf.extend_from_slice(&self.geometry.growth_step.to_le_bytes());
        buf.extend_from_slice(&self.geometry.upper.to_le_bytes());
        buf.extend_from_slice(&self.geometry.shrink_threshold.to_le_bytes());
        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    pub(crate) fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < HEADER_LEN {
            return Err(CoreError::corrupted("header too short"));
        }
        if data[0..8] != MAGIC {
            return Err(CoreError::environment("not a vellum data file"));
        }
        let body = &data[..HEADER_LEN - 4];
        let mut reader = ByteReader::new(&data[8..HEADER_LEN]);
        let major = reader.u16()?;
        let minor = reader.u16()?;
        if major != FORMAT_VERSION.0 {
            return Err(CoreError::environment(format!(
                "unsupported format version {major}.{minor}"
            )));
        }
        let page_size = reader.u32()?;
        let lower = reader.u64()?;
        let growth_step = reader.u64()?;
        let upper = reader.u64()?;
        let shrink_threshold = reader.u64()?;
        let stored_crc = reader.u32()?;
        let actual = compute_crc32(body);
        if stored_crc != actual {
            return Err(CoreError::corrupted(format!(
                "header checksum mismatch: expected {stored_crc:08x}, got {actual:08x}"
            )));
        }

        Ok(Self {
            format_version: (major, minor),
            geometry: EffectiveGeometry {
                lower,
                growth_step,
                upper,
                shrink_threshold,
                page_size,
            },
        })
    }
}

/// One logged mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LogOp {
    CreateMap { name: MapName, layout: MapLayout },
    DropMap { name: MapName },
    ClearMap { name: MapName },
    Put { name: MapName, key: Vec<u8>, value: Vec<u8> },
    Delete { name: MapName, key: Vec<u8>, value: Option<Vec<u8>> },
}

const OP_CREATE: u8 = 1;
const OP_DROP: u8 = 2;
const OP_CLEAR: u8 = 3;
const OP_PUT: u8 = 4;
const OP_DELETE: u8 = 5;

impl LogOp {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Self::CreateMap { name, layout } => {
                buf.push(OP_CREATE);
                put_name(buf, name);
                buf.push(u8::from(layout.dup_sort));
                buf.push(layout.key_order.code());
                buf.push(layout.value_order.code());
            }
            Self::DropMap { name } => {
                buf.push(OP_DROP);
                put_name(buf, name);
            }
            Self::ClearMap { name } => {
                buf.push(OP_CLEAR);
                put_name(buf, name);
            }
            Self::Put { name, key, value } => {
                buf.push(OP_PUT);
                put_name(buf, name);
                put_bytes(buf, key);
                put_bytes(buf, value);
            }
            Self::Delete { name, key, value } => {
                buf.push(OP_DELETE);
                put_name(buf, name);
                put_bytes(buf, key);
                match value {
                    Some(value) => {
                        buf.push(1);
                        put_bytes(buf, value);
                    }
                    None => buf.push(0),
                }
            }
        }
    }

    fn decode_from(reader: &mut ByteReader<'_>) -> CoreResult<Self> {
        let op = match reader.u8()? {
            OP_CREATE => {
                let name = reader.name()?;
                let dup_sort = reader.u8()? != 0;
                let key_order = KeyOrder::from_code(reader.u8()?)?;
                let value_order = KeyOrder::from_code(reader.u8()?)?;
                Self::CreateMap {
                    name,
                    layout: MapLayout {
                        dup_sort,
                        key_order,
                        value_order,
                    },
                }
            }
            OP_DROP => Self::DropMap {
                name: reader.name()?,
            },
            OP_CLEAR => Self::ClearMap {
                name: reader.name()?,
            },
            OP_PUT => Self::Put {
                name: reader.name()?,
                key: reader.bytes()?,
                value: reader.bytes()?,
            },
            OP_DELETE => {
                let name = reader.name()?;
                let key = reader.bytes()?;
                let value = match reader.u8()? {
                    0 => None,
                    _ => Some(reader.bytes()?),
                };
                Self::Delete { name, key, value }
            }
            other => return Err(CoreError::corrupted(format!("unknown op tag {other}"))),
        };
        Ok(op)
    }
}

/// Encodes a commit frame.
pub(crate) fn encode_frame(txnid: u64, ops: &[LogOp]) -> CoreResult<Vec<u8>> {
    let mut body = Vec::new();
    body.extend_from_slice(&txnid.to_le_bytes());
    for op in ops {
        op.encode_into(&mut body);
    }
    let len = u32::try_from(body.len() - 8)
        .map_err(|_| CoreError::usage("transaction is too large for one commit frame"))?;

    let mut frame = Vec::with_capacity(body.len() + 8);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&body);
    frame.extend_from_slice(&compute_crc32(&body).to_le_bytes());
    Ok(frame)
}

/// Outcome of reading the frame at some offset.
#[derive(Debug)]
pub(crate) enum FrameRead {
    /// A complete frame and its encoded length.
    Frame {
        txnid: u64,
        ops: Vec<LogOp>,
        len: usize,
    },
    /// The bytes end before the frame does, or the checksum fails.
    Torn,
}

/// Decodes the frame at the start of `data`.
pub(crate) fn read_frame(data: &[u8]) -> CoreResult<FrameRead> {
    if data.len() < FRAME_OVERHEAD {
        return Ok(FrameRead::Torn);
    }
    let len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let total = FRAME_OVERHEAD + len;
    if data.len() < total {
        return Ok(FrameRead::Torn);
    }

    let body = &data[4..total - 4];
    let stored_crc = u32::from_le_bytes([
        data[total - 4],
        data[total - 3],
        data[total - 2],
        data[total - 1],
    ]);
    if compute_crc32(body) != stored_crc {
        return Ok(FrameRead::Torn);
    }

    let mut reader = ByteReader::new(body);
    let txnid = reader.u64()?;
    let mut ops = Vec::new();
    while !reader.is_empty() {
        ops.push(LogOp::decode_from(&mut reader)?);
    }
    Ok(FrameRead::Frame {
        txnid,
        ops,
        len: total,
    })
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

fn put_name(buf: &mut Vec<u8>, name: &MapName) {
    match name {
        None => buf.push(0),
        Some(name) => {
            buf.push(1);
            put_bytes(buf, name.as_bytes());
        }
    }
}

struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn take(&mut self, n: usize) -> CoreResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| CoreError::corrupted("frame truncated"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> CoreResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> CoreResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> CoreResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> CoreResult<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn bytes(&mut self) -> CoreResult<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn name(&mut self) -> CoreResult<MapName> {
        match self.u8()? {
            0 => Ok(None),
            _ => {
                let raw = self.bytes()?;
                String::from_utf8(raw)
                    .map(Some)
                    .map_err(|_| CoreError::corrupted("map name is not UTF-8"))
            }
        }
    }
}

/// Computes the CRC32 (IEEE) checksum of `data`.
pub(crate) fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
