//! Windows PE modules (`MZ` stub followed by a `PE\0\0` header).

use std::any::Any;
use std::borrow::Cow;
use std::io::{Seek, SeekFrom};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::dos::MZ_HEADER_LEN;
use super::{le_u16, le_u32, Format, FormatValue, HeaderHint};
use crate::error::{ArchiverError, Result};
use crate::graph::LinkedNode;
use crate::stream::{read_up_to, ByteStream, StreamFactory};
use crate::vocab::{Class, Property};

const LFANEW_OFFSET: usize = 0x3C;
const COFF_LEN: usize = 20;
const SECTION_LEN: usize = 40;
const MAX_SECTIONS: u16 = 96;

const IMAGE_FILE_DLL: u16 = 0x2000;
const PE32_PLUS_MAGIC: u16 = 0x20B;
/// Offset of `Subsystem` in both PE32 and PE32+ optional headers.
const SUBSYSTEM_OFFSET: usize = 68;

pub struct PeFormat;

fn lfanew(header: &[u8]) -> Option<usize> {
    le_u32(header, LFANEW_OFFSET).map(|v| v as usize)
}

impl Format for PeFormat {
    fn name(&self) -> &'static str {
        "pe"
    }

    fn header_length(&self) -> usize {
        MZ_HEADER_LEN
    }

    /// Checks the `PE` signature when it lies inside `header`; a signature
    /// further in is left to the parser.
    fn could_match(&self, header: &[u8], _hint: &HeaderHint) -> bool {
        if !header.starts_with(b"MZ") {
            return false;
        }
        match lfanew(header) {
            Some(offset) if offset < MZ_HEADER_LEN => false,
            Some(offset) => match header.get(offset..offset + 4) {
                Some(signature) => signature == b"PE\0\0",
                None => true,
            },
            None => false,
        }
    }

    fn parse(
        &self,
        mut stream: Box<dyn ByteStream>,
        _source: Arc<dyn StreamFactory>,
    ) -> Result<Arc<dyn FormatValue>> {
        let mut mz = [0u8; MZ_HEADER_LEN];
        if read_up_to(&mut stream, &mut mz)? < MZ_HEADER_LEN {
            return Err(ArchiverError::format("pe", "truncated MZ header"));
        }
        let offset = lfanew(&mz).ok_or_else(|| ArchiverError::format("pe", "missing e_lfanew"))?;
        stream.seek(SeekFrom::Start(offset as u64))?;

        let mut nt = [0u8; 4 + COFF_LEN];
        if read_up_to(&mut stream, &mut nt)? < nt.len() || &nt[..4] != b"PE\0\0" {
            return Err(ArchiverError::format("pe", "missing PE signature"));
        }
        let coff = &nt[4..];
        let machine = le_u16(coff, 0).unwrap_or(0);
        let section_count = le_u16(coff, 2).unwrap_or(0);
        let timestamp = le_u32(coff, 4).unwrap_or(0);
        let optional_len = le_u16(coff, 16).unwrap_or(0) as usize;
        let characteristics = le_u16(coff, 18).unwrap_or(0);

        let mut optional = vec![0u8; optional_len];
        let n = read_up_to(&mut stream, &mut optional)?;
        optional.truncate(n);
        let magic = le_u16(&optional, 0);
        let subsystem = le_u16(&optional, SUBSYSTEM_OFFSET);

        let mut sections = Vec::new();
        for _ in 0..section_count.min(MAX_SECTIONS) {
            let mut raw = [0u8; SECTION_LEN];
            if read_up_to(&mut stream, &mut raw)? < SECTION_LEN {
                break;
            }
            let end = raw[..8].iter().position(|&b| b == 0).unwrap_or(8);
            sections.push(String::from_utf8_lossy(&raw[..end]).into_owned());
        }

        Ok(Arc::new(PeModule {
            machine,
            timestamp,
            characteristics,
            is_64_bit: magic == Some(PE32_PLUS_MAGIC),
            subsystem,
            sections,
        }))
    }
}

#[derive(Debug)]
pub struct PeModule {
    pub machine: u16,
    pub timestamp: u32,
    pub characteristics: u16,
    pub is_64_bit: bool,
    pub subsystem: Option<u16>,
    pub sections: Vec<String>,
}

impl PeModule {
    pub fn is_dll(&self) -> bool {
        self.characteristics & IMAGE_FILE_DLL != 0
    }

    pub fn machine_name(&self) -> Cow<'static, str> {
        match self.machine {
            0x014c => "x86".into(),
            0x8664 => "x86-64".into(),
            0x01c0 | 0x01c4 => "arm".into(),
            0xaa64 => "arm64".into(),
            0x0200 => "ia64".into(),
            other => format!("0x{:04x}", other).into(),
        }
    }

    pub fn subsystem_name(&self) -> Option<&'static str> {
        Some(match self.subsystem? {
            1 => "native",
            2 => "windows-gui",
            3 => "windows-cui",
            7 => "posix-cui",
            9 => "windows-ce-gui",
            10 => "efi-application",
            11 => "efi-boot-service-driver",
            12 => "efi-runtime-driver",
            13 => "efi-rom",
            14 => "xbox",
            16 => "windows-boot-application",
            _ => return None,
        })
    }

    pub fn built(&self) -> Option<DateTime<Utc>> {
        (self.timestamp != 0)
            .then(|| DateTime::from_timestamp(self.timestamp as i64, 0))
            .flatten()
    }
}

impl FormatValue for PeModule {
    fn media_type(&self) -> Cow<'static, str> {
        Cow::Borrowed("application/vnd.microsoft.portable-executable")
    }

    fn extension(&self) -> Option<Cow<'static, str>> {
        let ext = if self.is_dll() {
            "dll"
        } else if self.subsystem == Some(1) {
            "sys"
        } else if matches!(self.subsystem, Some(10..=13)) {
            "efi"
        } else {
            "exe"
        };
        Some(Cow::Borrowed(ext))
    }

    fn describe(&self, node: &LinkedNode) {
        node.set_class(Class::Executable);
        if self.is_dll() {
            node.set_class(Class::DynamicLibrary);
        }
        node.set(Property::Machine, self.machine_name().into_owned());
        if let Some(subsystem) = self.subsystem_name() {
            node.set(Property::Subsystem, subsystem);
        }
        if let Some(built) = self.built() {
            node.set(Property::Created, built);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
