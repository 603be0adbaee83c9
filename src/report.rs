use serde::Serialize;
use std::fmt;

use crate::fs::{CandidateStatus, FatUsage, FsCandidate, Inode};
use crate::nand::{Nand, NandConfig};
use crate::sksa::{SksaSummary, SysAppSummary};

/// Everything known about an opened image, ready for JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct NandSummary {
    pub image_size: usize,
    pub config: NandConfig,
    pub selected: FsCandidate,
    pub recovered_from_corruption: bool,
    pub candidates: Vec<FsCandidate>,
    pub fat: FatUsage,
    pub inode_slots: usize,
    pub inodes: Vec<Inode>,
    pub invalid_inodes: Vec<Inode>,
    pub sksa: Option<SksaSummary>,
    /// Why the SKSA could not be decoded, when it could not.
    pub sksa_error: Option<String>,
}

impl NandSummary {
    pub fn from_nand<D: AsRef<[u8]>>(nand: &Nand<D>) -> Self {
        let (inodes, invalid_inodes): (Vec<Inode>, Vec<Inode>) =
            nand.inodes().iter().cloned().partition(Inode::is_valid);
        let (sksa, sksa_error) = match nand.sksa() {
            Ok(region) => (Some(region.summary()), None),
            Err(e) => (None, Some(e.to_string())),
        };

        Self {
            image_size: nand.len(),
            config: nand.config(),
            selected: *nand.selected_candidate(),
            recovered_from_corruption: nand.recovered_from_corruption(),
            candidates: nand.candidates().to_vec(),
            fat: nand.filesystem().fat_usage(),
            inode_slots: nand.inodes().len(),
            inodes,
            invalid_inodes,
            sksa,
            sksa_error,
        }
    }
}

/// Text rendering of a [`NandSummary`].
pub struct NandReport<'a> {
    summary: &'a NandSummary,
    full_detail: bool,
    show_all_candidates: bool,
}

impl<'a> NandReport<'a> {
    pub fn new(summary: &'a NandSummary, full_detail: bool, show_all_candidates: bool) -> Self {
        Self {
            summary,
            full_detail,
            show_all_candidates,
        }
    }

    fn write_candidate(f: &mut fmt::Formatter<'_>, c: &FsCandidate) -> fmt::Result {
        match c.status {
            CandidateStatus::Missing => {
                writeln!(f, "  slot {:2}  block 0x{:03X}  {}", c.slot, c.block, c.status.describe())
            }
            _ => writeln!(
                f,
                "  slot {:2}  block 0x{:03X}  seqno {:<8} sum 0x{:04X}  link 0x{:04X}  {}",
                c.slot,
                c.block,
                c.seqno,
                c.sum,
                c.link_block,
                c.status.describe()
            ),
        }
    }

    fn write_inode(f: &mut fmt::Formatter<'_>, inode: &Inode) -> fmt::Result {
        writeln!(
            f,
            "  [{:3}] {:<12}  size 0x{:08X}  start block 0x{:04X}  valid {}",
            inode.index, inode.name, inode.size, inode.start_block, inode.valid
        )
    }

    fn write_sys_app(&self, f: &mut fmt::Formatter<'_>, label: &str, sa: &SysAppSummary) -> fmt::Result {
        writeln!(f, "  {label}:")?;
        writeln!(f, "    Content id:          0x{:08X}", sa.content_id)?;
        writeln!(f, "    Size:                0x{:X}", sa.size)?;
        writeln!(f, "    Issuer:              {}", sa.issuer)?;
        writeln!(f, "    Certificate:         {}", sa.certificate)?;
        writeln!(f, "    Authority:           {}", sa.authority)?;
        writeln!(f, "    CRL:                 {} (version {})", sa.crl_issuer, sa.crl_version)?;
        writeln!(f, "    RevocationAddr:      0x{:X}", sa.revocation_addr)?;
        writeln!(f, "    RevocationNameAddr:  0x{:X}", sa.revocation_name_addr)?;
        writeln!(f, "    AuthorityAddr:       0x{:X}", sa.authority_addr)?;
        if self.full_detail {
            writeln!(f, "    Reserved 0x8CC:      {}", sa.reserved_8cc)?;
            writeln!(f, "    Reserved 0x910:      {}", sa.reserved_910)?;
        }
        Ok(())
    }
}

impl fmt::Display for NandReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.summary;
        let selected = &s.selected;

        writeln!(f, "NAND image: 0x{:X} bytes", s.image_size)?;
        writeln!(
            f,
            "Filesystem: block 0x{:03X} (slot {}), seqno {}, sum 0x{:04X}, {}",
            selected.block,
            selected.slot,
            selected.seqno,
            selected.sum,
            selected.status.describe()
        )?;
        if s.recovered_from_corruption {
            writeln!(f, "[!] Selected filesystem block failed its checksum; data may be corrupt")?;
        }
        let mismatches = s
            .candidates
            .iter()
            .filter(|c| c.status == CandidateStatus::BadChecksum)
            .count();
        if mismatches > 0 {
            writeln!(f, "[!] {mismatches} filesystem block(s) with checksum mismatch")?;
        }
        writeln!(
            f,
            "FAT: {} free, {} used, {} bad, {} reserved",
            s.fat.free, s.fat.used, s.fat.bad, s.fat.reserved
        )?;

        if self.show_all_candidates {
            writeln!(f)?;
            writeln!(f, "Filesystem blocks:")?;
            for c in &s.candidates {
                Self::write_candidate(f, c)?;
            }
        }

        writeln!(f)?;
        writeln!(f, "Inodes: {} valid of {} slots", s.inodes.len(), s.inode_slots)?;
        for inode in &s.inodes {
            Self::write_inode(f, inode)?;
        }
        if self.full_detail {
            let leftovers: Vec<&Inode> = s
                .invalid_inodes
                .iter()
                .filter(|i| i.size != 0 || !i.name.is_empty())
                .collect();
            if !leftovers.is_empty() {
                writeln!(f, "Invalid inode slots with data:")?;
                for inode in leftovers {
                    Self::write_inode(f, inode)?;
                }
            }
        }

        writeln!(f)?;
        match (&s.sksa, &s.sksa_error) {
            (Some(sksa), _) => {
                writeln!(f, "SKSA: 0x{:X} bytes", sksa.length)?;
                self.write_sys_app(f, "SA1", &sksa.sa1)?;
                match &sksa.sa2 {
                    Some(sa2) => self.write_sys_app(f, "SA2", sa2)?,
                    None => writeln!(f, "  SA2: not present")?,
                }
            }
            (None, Some(err)) => writeln!(f, "SKSA: {err}")?,
            (None, None) => writeln!(f, "SKSA: not decoded")?,
        }

        Ok(())
    }
}

pub fn describe<D: AsRef<[u8]>>(nand: &Nand<D>, full_detail: bool, show_all_candidates: bool) -> String {
    let summary = NandSummary::from_nand(nand);
    NandReport::new(&summary, full_detail, show_all_candidates).to_string()
}
