//! Fixed-layout signed structures of the system-app signature area.
//!
//! All integers are big-endian on the device. Each structure decodes into
//! host integers and encodes back to the exact device bytes.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::error::{NandError, Result};

/// A structure with a fixed big-endian device encoding.
pub trait BigEndianRecord: Sized {
    const SIZE: usize;

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self>;

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()>;

    fn decode(bytes: &[u8]) -> Result<Self> {
        let raw = bytes.get(..Self::SIZE).ok_or(NandError::TruncatedSksa {
            needed: Self::SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self::read_from(&mut &raw[..])?)
    }

    fn encode(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(Self::SIZE);
        self.write_to(&mut out)?;
        Ok(out)
    }
}

fn read_array<const N: usize, R: Read>(r: &mut R) -> io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// NUL-terminated ASCII field as a string.
pub fn c_string(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentMetadataHead {
    pub unused_padding: u32,
    pub ca_crl_version: u32,
    pub cp_crl_version: u32,
    /// Payload length that follows the signature area.
    pub size: u32,
    pub desc_flags: u32,
    pub common_cmd_iv: [u8; 16],
    pub hash: [u8; 20],
    pub iv: [u8; 16],
    pub exec_flags: u32,
    pub hw_access_rights: u32,
    pub secure_kernel_rights: u32,
    pub bbid: u32,
    pub issuer: [u8; 64],
    pub content_id: u32,
    pub key: [u8; 16],
    pub signature: [u8; 256],
}

impl BigEndianRecord for ContentMetadataHead {
    const SIZE: usize = 0x1AC;

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Self {
            unused_padding: r.read_u32::<BigEndian>()?,
            ca_crl_version: r.read_u32::<BigEndian>()?,
            cp_crl_version: r.read_u32::<BigEndian>()?,
            size: r.read_u32::<BigEndian>()?,
            desc_flags: r.read_u32::<BigEndian>()?,
            common_cmd_iv: read_array(r)?,
            hash: read_array(r)?,
            iv: read_array(r)?,
            exec_flags: r.read_u32::<BigEndian>()?,
            hw_access_rights: r.read_u32::<BigEndian>()?,
            secure_kernel_rights: r.read_u32::<BigEndian>()?,
            bbid: r.read_u32::<BigEndian>()?,
            issuer: read_array(r)?,
            content_id: r.read_u32::<BigEndian>()?,
            key: read_array(r)?,
            signature: read_array(r)?,
        })
    }

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<BigEndian>(self.unused_padding)?;
        w.write_u32::<BigEndian>(self.ca_crl_version)?;
        w.write_u32::<BigEndian>(self.cp_crl_version)?;
        w.write_u32::<BigEndian>(self.size)?;
        w.write_u32::<BigEndian>(self.desc_flags)?;
        w.write_all(&self.common_cmd_iv)?;
        w.write_all(&self.hash)?;
        w.write_all(&self.iv)?;
        w.write_u32::<BigEndian>(self.exec_flags)?;
        w.write_u32::<BigEndian>(self.hw_access_rights)?;
        w.write_u32::<BigEndian>(self.secure_kernel_rights)?;
        w.write_u32::<BigEndian>(self.bbid)?;
        w.write_all(&self.issuer)?;
        w.write_u32::<BigEndian>(self.content_id)?;
        w.write_all(&self.key)?;
        w.write_all(&self.signature)
    }
}

impl ContentMetadataHead {
    pub fn issuer_string(&self) -> String {
        c_string(&self.issuer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaCert {
    pub cert_type: u32,
    pub sig_type: u32,
    pub date: u32,
    pub issuer: [u8; 64],
    pub name: [u8; 64],
    pub public_key: [u8; 256],
    pub exponent: u32,
    pub signature: [u8; 512],
}

impl BigEndianRecord for RsaCert {
    const SIZE: usize = 0x390;

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Self {
            cert_type: r.read_u32::<BigEndian>()?,
            sig_type: r.read_u32::<BigEndian>()?,
            date: r.read_u32::<BigEndian>()?,
            issuer: read_array(r)?,
            name: read_array(r)?,
            public_key: read_array(r)?,
            exponent: r.read_u32::<BigEndian>()?,
            signature: read_array(r)?,
        })
    }

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<BigEndian>(self.cert_type)?;
        w.write_u32::<BigEndian>(self.sig_type)?;
        w.write_u32::<BigEndian>(self.date)?;
        w.write_all(&self.issuer)?;
        w.write_all(&self.name)?;
        w.write_all(&self.public_key)?;
        w.write_u32::<BigEndian>(self.exponent)?;
        w.write_all(&self.signature)
    }
}

impl RsaCert {
    pub fn issuer_string(&self) -> String {
        c_string(&self.issuer)
    }

    pub fn name_string(&self) -> String {
        c_string(&self.name)
    }

    /// Full chain path as used by certificate stores, e.g. `Root-CA00000001`.
    pub fn full_name(&self) -> String {
        format!("{}-{}", self.issuer_string(), self.name_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrlHead {
    pub signature: [u8; 512],
    pub cert_type: u32,
    pub sig_type: u32,
    pub unused_padding: u32,
    pub version: u32,
    pub date: u32,
    pub issuer: [u8; 64],
    pub number_revoked: u32,
}

impl BigEndianRecord for CrlHead {
    const SIZE: usize = 0x258;

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Self {
            signature: read_array(r)?,
            cert_type: r.read_u32::<BigEndian>()?,
            sig_type: r.read_u32::<BigEndian>()?,
            unused_padding: r.read_u32::<BigEndian>()?,
            version: r.read_u32::<BigEndian>()?,
            date: r.read_u32::<BigEndian>()?,
            issuer: read_array(r)?,
            number_revoked: r.read_u32::<BigEndian>()?,
        })
    }

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.signature)?;
        w.write_u32::<BigEndian>(self.cert_type)?;
        w.write_u32::<BigEndian>(self.sig_type)?;
        w.write_u32::<BigEndian>(self.unused_padding)?;
        w.write_u32::<BigEndian>(self.version)?;
        w.write_u32::<BigEndian>(self.date)?;
        w.write_all(&self.issuer)?;
        w.write_u32::<BigEndian>(self.number_revoked)
    }
}

impl CrlHead {
    pub fn issuer_string(&self) -> String {
        c_string(&self.issuer)
    }
}

/// Offset of `authority_addr` inside the signature area.
pub const AUTHORITY_ADDR_OFFSET: usize = 0x90C;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysAppSigArea {
    pub content_metadata: ContentMetadataHead,
    pub certificate: RsaCert,
    pub authority: RsaCert,
    pub reserved_8cc: [u8; 0x38],
    pub revocation_addr: u32,
    pub revocation_name_addr: u32,
    pub authority_addr: u32,
    pub reserved_910: [u8; 0x10],
    pub revocation: CrlHead,
}

impl BigEndianRecord for SysAppSigArea {
    const SIZE: usize = ContentMetadataHead::SIZE
        + 2 * RsaCert::SIZE
        + 0x38
        + 3 * 4
        + 0x10
        + CrlHead::SIZE;

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Self {
            content_metadata: ContentMetadataHead::read_from(r)?,
            certificate: RsaCert::read_from(r)?,
            authority: RsaCert::read_from(r)?,
            reserved_8cc: read_array(r)?,
            revocation_addr: r.read_u32::<BigEndian>()?,
            revocation_name_addr: r.read_u32::<BigEndian>()?,
            authority_addr: r.read_u32::<BigEndian>()?,
            reserved_910: read_array(r)?,
            revocation: CrlHead::read_from(r)?,
        })
    }

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.content_metadata.write_to(w)?;
        self.certificate.write_to(w)?;
        self.authority.write_to(w)?;
        w.write_all(&self.reserved_8cc)?;
        w.write_u32::<BigEndian>(self.revocation_addr)?;
        w.write_u32::<BigEndian>(self.revocation_name_addr)?;
        w.write_u32::<BigEndian>(self.authority_addr)?;
        w.write_all(&self.reserved_910)?;
        self.revocation.write_to(w)
    }
}
