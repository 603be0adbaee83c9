//! The boot area at the start of the NAND: secure kernel followed by one or
//! two signed system apps, each preceded by a one-block signature area.

pub mod structs;

use serde::Serialize;
use std::io::{self, Write};
use std::ops::Range;
use tracing::debug;

use crate::error::{NandError, Result};
use crate::geometry::{SIG_AREA_SIZE, SK_SIZE};
pub use structs::{
    AUTHORITY_ADDR_OFFSET, BigEndianRecord, ContentMetadataHead, CrlHead, RsaCert, SysAppSigArea,
};

/// Value of `authority_addr` in every signature area seen so far.
pub const EXPECTED_AUTHORITY_ADDR: u32 = 0x53C;

/// Offset of the content size inside the signature area.
const CONTENT_SIZE_OFFSET: usize = 0x0C;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SysAppLayout {
    pub sig_area: Range<usize>,
    pub payload: Range<usize>,
}

/// Byte ranges of the SKSA parts, relative to the buffer they were found in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SksaLayout {
    pub kernel: Range<usize>,
    pub sa1: SysAppLayout,
    pub sa2: Option<SysAppLayout>,
}

impl SksaLayout {
    pub fn end(&self) -> usize {
        self.sa2
            .as_ref()
            .map_or(self.sa1.payload.end, |sa2| sa2.payload.end)
    }
}

fn read_be_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

fn authority_addr(sig_area: &[u8]) -> Option<u32> {
    read_be_u32(sig_area, AUTHORITY_ADDR_OFFSET)
}

fn require(bytes: &[u8], needed: usize) -> Result<()> {
    if bytes.len() < needed {
        return Err(NandError::TruncatedSksa {
            needed,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn locate_sys_app(bytes: &[u8], start: usize) -> Result<SysAppLayout> {
    let sig_area = start..start + SIG_AREA_SIZE;
    require(bytes, sig_area.end)?;

    let size = read_be_u32(bytes, start + CONTENT_SIZE_OFFSET).unwrap_or_default() as usize;
    let payload = sig_area.end..sig_area.end.saturating_add(size);
    require(bytes, payload.end)?;

    Ok(SysAppLayout { sig_area, payload })
}

/// Finds the SKSA parts using the fixed boot-area layout. SA2 is only taken
/// when its signature area carries the expected authority address.
pub fn locate_sksa(bytes: &[u8]) -> Result<SksaLayout> {
    require(bytes, SK_SIZE + SIG_AREA_SIZE)?;

    let sa1_sig = &bytes[SK_SIZE..SK_SIZE + SIG_AREA_SIZE];
    let addr = authority_addr(sa1_sig).unwrap_or_default();
    if addr != EXPECTED_AUTHORITY_ADDR {
        return Err(NandError::UnrecognizedSksaLayout(addr));
    }

    let sa1 = locate_sys_app(bytes, SK_SIZE)?;

    let sa2_start = sa1.payload.end;
    let sa2 = match bytes
        .get(sa2_start..sa2_start + SIG_AREA_SIZE)
        .and_then(authority_addr)
    {
        Some(EXPECTED_AUTHORITY_ADDR) => Some(locate_sys_app(bytes, sa2_start)?),
        other => {
            debug!(
                offset = %format!("0x{sa2_start:X}"),
                authority_addr = ?other,
                "no second system app"
            );
            None
        }
    };

    Ok(SksaLayout {
        kernel: 0..SK_SIZE,
        sa1,
        sa2,
    })
}

/// The raw SKSA bytes, borrowed from `image`.
pub fn extract_sksa(image: &[u8]) -> Result<&[u8]> {
    let layout = locate_sksa(image)?;
    Ok(&image[..layout.end()])
}

#[derive(Debug, Clone)]
pub struct SysApp<'a> {
    pub sig_area: SysAppSigArea,
    /// The whole signature-area block, padding included.
    pub sig_area_raw: &'a [u8],
    pub payload: &'a [u8],
}

impl SysApp<'_> {
    fn decode<'a>(bytes: &'a [u8], layout: &SysAppLayout) -> Result<SysApp<'a>> {
        let sig_area_raw = &bytes[layout.sig_area.clone()];
        Ok(SysApp {
            sig_area: SysAppSigArea::decode(sig_area_raw)?,
            sig_area_raw,
            payload: &bytes[layout.payload.clone()],
        })
    }

    /// Signature area re-encoded over its original padding, then the payload.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.sig_area.write_to(w)?;
        w.write_all(&self.sig_area_raw[SysAppSigArea::SIZE..])?;
        w.write_all(self.payload)
    }

    pub fn summary(&self) -> SysAppSummary {
        let area = &self.sig_area;
        SysAppSummary {
            content_id: area.content_metadata.content_id,
            size: area.content_metadata.size,
            issuer: area.content_metadata.issuer_string(),
            certificate: area.certificate.full_name(),
            authority: area.authority.full_name(),
            crl_issuer: area.revocation.issuer_string(),
            crl_version: area.revocation.version,
            revocation_addr: area.revocation_addr,
            revocation_name_addr: area.revocation_name_addr,
            authority_addr: area.authority_addr,
            reserved_8cc: hex::encode_upper(area.reserved_8cc),
            reserved_910: hex::encode_upper(area.reserved_910),
        }
    }
}

/// Decoded SKSA. Payloads borrow from the parsed buffer.
#[derive(Debug, Clone)]
pub struct SksaRegion<'a> {
    pub kernel: &'a [u8],
    pub sa1: SysApp<'a>,
    pub sa2: Option<SysApp<'a>>,
}

impl SksaRegion<'_> {
    pub fn len(&self) -> usize {
        self.kernel.len()
            + [Some(&self.sa1), self.sa2.as_ref()]
                .into_iter()
                .flatten()
                .map(|sa| sa.sig_area_raw.len() + sa.payload.len())
                .sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Re-serialises the region, signature areas encoded back to big-endian.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(self.kernel)?;
        self.sa1.write_to(w)?;
        if let Some(sa2) = &self.sa2 {
            sa2.write_to(w)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.len());
        self.write_to(&mut out)?;
        Ok(out)
    }

    pub fn summary(&self) -> SksaSummary {
        SksaSummary {
            length: self.len(),
            sa1: self.sa1.summary(),
            sa2: self.sa2.as_ref().map(SysApp::summary),
        }
    }
}

/// Decodes an SKSA blob (or a whole image, which starts with one).
///
/// Fails with [`NandError::UnrecognizedSksaLayout`] before decoding anything
/// when the first signature area's authority address is not 0x53C.
pub fn parse_sksa(bytes: &[u8]) -> Result<SksaRegion<'_>> {
    let layout = locate_sksa(bytes)?;
    Ok(SksaRegion {
        kernel: &bytes[layout.kernel.clone()],
        sa1: SysApp::decode(bytes, &layout.sa1)?,
        sa2: layout
            .sa2
            .as_ref()
            .map(|sa2| SysApp::decode(bytes, sa2))
            .transpose()?,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SysAppSummary {
    pub content_id: u32,
    pub size: u32,
    pub issuer: String,
    pub certificate: String,
    pub authority: String,
    pub crl_issuer: String,
    pub crl_version: u32,
    pub revocation_addr: u32,
    pub revocation_name_addr: u32,
    pub authority_addr: u32,
    pub reserved_8cc: String,
    pub reserved_910: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SksaSummary {
    pub length: usize,
    pub sa1: SysAppSummary,
    pub sa2: Option<SysAppSummary>,
}
