//! GeoPackage binary geometry: a small header followed by WKB.
//!
//! ```text
//! magic "GP" | version | flags | srs_id (i32) | envelope (0-8 f64) | WKB
//! flags: R R X Y E E E B
//!        X = extended type, Y = empty, E = envelope type, B = byte order
//! ```

use geozero::wkb::Wkb;
use geozero::ToGeo;

use features_common::{FeaturesError, FeaturesResult};

const MAGIC: [u8; 2] = *b"GP";
const HEADER_LEN: usize = 8;

const MASK_BYTE_ORDER: u8 = 1 << 0;
const MASK_ENVELOPE_TYPE: u8 = (1 << 3) | (1 << 2) | (1 << 1);
const MASK_EMPTY_GEOMETRY: u8 = 1 << 4;

/// Envelope stored in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeType {
    None,
    Xy,
    Xyz,
    Xym,
    Xyzm,
}

impl EnvelopeType {
    fn from_code(code: u8) -> FeaturesResult<Self> {
        match code {
            0 => Ok(EnvelopeType::None),
            1 => Ok(EnvelopeType::Xy),
            2 => Ok(EnvelopeType::Xyz),
            3 => Ok(EnvelopeType::Xym),
            4 => Ok(EnvelopeType::Xyzm),
            other => Err(FeaturesError::GeometryDecode(format!("invalid envelope type {}", other))),
        }
    }

    pub fn number_of_elements(self) -> usize {
        match self {
            EnvelopeType::None => 0,
            EnvelopeType::Xy => 4,
            EnvelopeType::Xyz | EnvelopeType::Xym => 6,
            EnvelopeType::Xyzm => 8,
        }
    }
}

/// Header preceding every GeoPackage geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryHeader {
    pub version: u8,
    pub little_endian: bool,
    pub envelope_type: EnvelopeType,
    pub is_empty: bool,
    pub srs_id: i32,
    pub envelope: Vec<f64>,
}

impl BinaryHeader {
    pub fn decode(data: &[u8]) -> FeaturesResult<Self> {
        if data.len() < HEADER_LEN {
            return Err(FeaturesError::GeometryDecode("not enough bytes".to_string()));
        }
        if data[0..2] != MAGIC {
            return Err(FeaturesError::GeometryDecode("invalid magic number".to_string()));
        }
        let flags = data[3];
        let little_endian = flags & MASK_BYTE_ORDER != 0;
        let envelope_type = EnvelopeType::from_code((flags & MASK_ENVELOPE_TYPE) >> 1)?;
        let read_f64 = |b: &[u8]| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(b);
            if little_endian {
                f64::from_le_bytes(buf)
            } else {
                f64::from_be_bytes(buf)
            }
        };

        let mut srs = [0u8; 4];
        srs.copy_from_slice(&data[4..8]);
        let srs_id = if little_endian {
            i32::from_le_bytes(srs)
        } else {
            i32::from_be_bytes(srs)
        };

        let num = envelope_type.number_of_elements();
        let body = &data[HEADER_LEN..];
        if body.len() < num * 8 {
            return Err(FeaturesError::GeometryDecode("not enough bytes for envelope".to_string()));
        }
        let envelope = body[..num * 8].chunks_exact(8).map(read_f64).collect();

        Ok(Self {
            version: data[2],
            little_endian,
            envelope_type,
            is_empty: flags & MASK_EMPTY_GEOMETRY != 0,
            srs_id,
            envelope,
        })
    }

    /// Size of the header including the envelope.
    pub fn size(&self) -> usize {
        HEADER_LEN + self.envelope_type.number_of_elements() * 8
    }
}

/// Decode a GeoPackage geometry. Empty geometries decode to `None`.
pub fn decode_geometry(data: &[u8]) -> FeaturesResult<Option<geo_types::Geometry<f64>>> {
    let header = BinaryHeader::decode(data)?;
    if header.is_empty {
        return Ok(None);
    }
    let wkb = &data[header.size()..];
    let geom = Wkb(wkb.to_vec())
        .to_geo()
        .map_err(|e| FeaturesError::GeometryDecode(e.to_string()))?;
    Ok(Some(geom))
}
