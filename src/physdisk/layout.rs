// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! Byte layouts shared with the hypervisor block interface.
//!
//! The wire structures are described by explicit offsets and sizes instead of `#[repr(C)]`
//! aggregates. Both follow the i386 ABI of the hypervisor interface (little endian, 32-bit
//! `int` and `long`, natural alignment).
//!
//! The handlers only ever look at [`WireLayout::size`]. Field accessors exist for callers that
//! build requests or decode probe results, and for diagnostics.

use byteorder::{ByteOrder, LittleEndian};

use super::{Error, Result};

const XEN_BLOCK_PHYSDEV_GRANT: u32 = 10;
const XEN_BLOCK_PHYSDEV_PROBE: u32 = 11;

/// Maximum number of access control entries returned by one probe; keeps the buffer in a page.
pub const PHYSDISK_MAX_ACES_PER_REQUEST: usize = 254;

/// Grant mode revoking any existing access.
pub const PHYSDISK_MODE_REVOKE: u32 = 0;
/// Grant mode bit for read access.
pub const PHYSDISK_MODE_R: u32 = 1;
/// Grant mode bit for write access.
pub const PHYSDISK_MODE_W: u32 = 2;

/// Type of control message sent to the hypervisor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opcode {
    /// Grant (or revoke) a domain's access to a physical disk extent.
    PhysdevGrant,
    /// List the physical disk extents a domain can access.
    PhysdevProbe,
    /// Unknown message.
    Unsupported(u32),
}

impl From<u32> for Opcode {
    fn from(value: u32) -> Self {
        match value {
            XEN_BLOCK_PHYSDEV_GRANT => Opcode::PhysdevGrant,
            XEN_BLOCK_PHYSDEV_PROBE => Opcode::PhysdevProbe,
            t => Opcode::Unsupported(t),
        }
    }
}

impl From<Opcode> for u32 {
    fn from(op: Opcode) -> u32 {
        match op {
            Opcode::PhysdevGrant => XEN_BLOCK_PHYSDEV_GRANT,
            Opcode::PhysdevProbe => XEN_BLOCK_PHYSDEV_PROBE,
            Opcode::Unsupported(t) => t,
        }
    }
}

/// A little endian integer field at a fixed offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Field {
    /// Field name, as in the interface header.
    pub name: &'static str,
    /// Offset from the start of the enclosing structure.
    pub offset: usize,
    /// Width in bytes; either 2 or 4.
    pub width: usize,
}

impl Field {
    const fn new(name: &'static str, offset: usize, width: usize) -> Self {
        Field {
            name,
            offset,
            width,
        }
    }

    /// The same field, shifted by `base` bytes (for fields of array elements).
    pub fn at(self, base: usize) -> Self {
        Field {
            offset: base + self.offset,
            ..self
        }
    }

    /// The offset one past the last byte of the field.
    pub fn end(&self) -> usize {
        self.offset + self.width
    }

    /// Read the field from `buf`, or `None` if `buf` is too short.
    pub fn read(&self, buf: &[u8]) -> Option<u32> {
        let bytes = buf.get(self.offset..self.end())?;
        match self.width {
            2 => Some(u32::from(LittleEndian::read_u16(bytes))),
            4 => Some(LittleEndian::read_u32(bytes)),
            _ => None,
        }
    }

    /// Write `value` (truncated to the field width) into `buf`. Returns `None` if `buf` is too
    /// short.
    pub fn write(&self, buf: &mut [u8], value: u32) -> Option<()> {
        let end = self.end();
        let bytes = buf.get_mut(self.offset..end)?;
        match self.width {
            // Truncation to the field width is intended.
            2 => LittleEndian::write_u16(bytes, value as u16),
            4 => LittleEndian::write_u32(bytes, value),
            _ => return None,
        }
        Some(())
    }
}

/// Size and field offsets of a fixed-size wire structure.
#[derive(Debug, PartialEq, Eq)]
pub struct WireLayout {
    /// Structure name, as in the interface header.
    pub name: &'static str,
    /// Total size in bytes.
    pub size: usize,
    /// Scalar fields at the top level of the structure.
    pub fields: &'static [Field],
}

impl WireLayout {
    /// Check that a caller-asserted length matches the structure size exactly.
    pub fn check_len(&self, len: usize) -> Result<()> {
        if len != self.size {
            return Err(Error::SizeMismatch {
                expected: self.size,
                actual: len,
            });
        }
        Ok(())
    }

    /// Look up a top-level field by name.
    pub fn field(&self, name: &str) -> Option<Field> {
        self.fields.iter().find(|f| f.name == name).copied()
    }
}

/// `physdisk_probebuf_t.n_aces`
pub const N_ACES: Field = Field::new("n_aces", 0, 4);
/// `physdisk_probebuf_t.domain`
pub const PROBE_DOMAIN: Field = Field::new("domain", 4, 4);
/// `physdisk_probebuf_t.start_ind`
pub const START_IND: Field = Field::new("start_ind", 8, 4);

/// Offset of the first entry in `physdisk_probebuf_t.entries`.
pub const PROBE_ENTRIES_OFFSET: usize = 12;

const ACE_DEVICE: Field = Field::new("device", 0, 2);
const ACE_PARTITION: Field = Field::new("partition", 2, 2);
const ACE_START_SECT: Field = Field::new("start_sect", 4, 4);
const ACE_N_SECTORS: Field = Field::new("n_sectors", 8, 4);
const ACE_MODE: Field = Field::new("mode", 12, 4);

/// One element of `physdisk_probebuf_t.entries`.
pub const ACE: WireLayout = WireLayout {
    name: "physdisk_ace_t",
    size: 16,
    fields: &[ACE_DEVICE, ACE_PARTITION, ACE_START_SECT, ACE_N_SECTORS, ACE_MODE],
};

/// Probe buffer, `physdisk_probebuf_t`.
pub const PROBE_BUF: WireLayout = WireLayout {
    name: "physdisk_probebuf_t",
    size: PROBE_ENTRIES_OFFSET + PHYSDISK_MAX_ACES_PER_REQUEST * ACE.size,
    fields: &[N_ACES, PROBE_DOMAIN, START_IND],
};

const XP_MODE: Field = Field::new("mode", 0, 4);
const XP_DOMAIN: Field = Field::new("domain", 4, 4);
const XP_DEVICE: Field = Field::new("device", 8, 2);
const XP_PARTITION: Field = Field::new("partition", 10, 2);
const XP_START_SECT: Field = Field::new("start_sect", 12, 4);
const XP_N_SECTORS: Field = Field::new("n_sectors", 16, 4);

/// Grant request, `xp_disk_t`.
pub const XP_DISK: WireLayout = WireLayout {
    name: "xp_disk_t",
    size: 20,
    fields: &[
        XP_MODE,
        XP_DOMAIN,
        XP_DEVICE,
        XP_PARTITION,
        XP_START_SECT,
        XP_N_SECTORS,
    ],
};

/// An access control entry: a disk extent some domain may access.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ace {
    /// Device number (`XENDEV_*` + index).
    pub device: u16,
    /// Partition number.
    pub partition: u16,
    /// First sector of the extent.
    pub start_sect: u32,
    /// Length of the extent in sectors.
    pub n_sectors: u32,
    /// `PHYSDISK_MODE_*` bits.
    pub mode: u32,
}

/// Build a probe buffer asking for up to `max_aces` entries of `domain`, starting at entry
/// `start_ind`.
pub fn probe_request(domain: u32, start_ind: u32, max_aces: u32) -> Vec<u8> {
    let mut buf = vec![0u8; PROBE_BUF.size];
    // The buffer is sized from the same layout, so the writes cannot be out of bounds.
    let _ = N_ACES.write(&mut buf, max_aces);
    let _ = PROBE_DOMAIN.write(&mut buf, domain);
    let _ = START_IND.write(&mut buf, start_ind);
    buf
}

/// Read-only view over a probe buffer returned by the hypervisor.
pub struct ProbeView<'a> {
    buf: &'a [u8],
}

impl<'a> ProbeView<'a> {
    /// Wrap `buf`, which must be exactly one probe buffer long.
    pub fn new(buf: &'a [u8]) -> Result<Self> {
        PROBE_BUF.check_len(buf.len())?;
        Ok(ProbeView { buf })
    }

    fn get(&self, field: Field) -> u32 {
        // The length was checked against the layout in `new`.
        field.read(self.buf).unwrap_or(0)
    }

    /// Number of valid entries.
    pub fn n_aces(&self) -> u32 {
        self.get(N_ACES)
    }

    /// Domain the entries belong to.
    pub fn domain(&self) -> u32 {
        self.get(PROBE_DOMAIN)
    }

    /// Index of the first returned entry in the domain's full list.
    pub fn start_ind(&self) -> u32 {
        self.get(START_IND)
    }

    /// Returns the valid entries. A count beyond the buffer capacity is clamped.
    pub fn entries(&self) -> impl Iterator<Item = Ace> + '_ {
        let n = (self.n_aces() as usize).min(PHYSDISK_MAX_ACES_PER_REQUEST);
        (0..n).map(move |i| {
            let base = PROBE_ENTRIES_OFFSET + i * ACE.size;
            Ace {
                device: self.get(ACE_DEVICE.at(base)) as u16,
                partition: self.get(ACE_PARTITION.at(base)) as u16,
                start_sect: self.get(ACE_START_SECT.at(base)),
                n_sectors: self.get(ACE_N_SECTORS.at(base)),
                mode: self.get(ACE_MODE.at(base)),
            }
        })
    }
}

/// Parameters of a single physical disk grant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GrantRequest {
    /// `PHYSDISK_MODE_*` bits, or [`PHYSDISK_MODE_REVOKE`].
    pub mode: u32,
    /// Target domain.
    pub domain: u32,
    /// Device number.
    pub device: u16,
    /// Partition number.
    pub partition: u16,
    /// First sector of the extent.
    pub start_sect: u32,
    /// Length of the extent in sectors.
    pub n_sectors: u32,
}

impl GrantRequest {
    /// Encode as an `xp_disk_t`.
    pub fn to_bytes(&self) -> [u8; 20] {
        let mut buf = [0u8; 20];
        // `buf` is exactly `XP_DISK.size` bytes, so every write fits.
        let _ = XP_MODE.write(&mut buf, self.mode);
        let _ = XP_DOMAIN.write(&mut buf, self.domain);
        let _ = XP_DEVICE.write(&mut buf, u32::from(self.device));
        let _ = XP_PARTITION.write(&mut buf, u32::from(self.partition));
        let _ = XP_START_SECT.write(&mut buf, self.start_sect);
        let _ = XP_N_SECTORS.write(&mut buf, self.n_sectors);
        buf
    }

    /// Decode an `xp_disk_t`.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        XP_DISK.check_len(buf.len())?;
        let get = |f: Field| f.read(buf).unwrap_or(0);
        Ok(GrantRequest {
            mode: get(XP_MODE),
            domain: get(XP_DOMAIN),
            device: get(XP_DEVICE) as u16,
            partition: get(XP_PARTITION) as u16,
            start_sect: get(XP_START_SECT),
            n_sectors: get(XP_N_SECTORS),
        })
    }
}
