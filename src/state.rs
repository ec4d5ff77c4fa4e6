//! Save-state protocol
//!
//! A save blob is a little-endian, length-prefixed sequence of named
//! regions behind a "MEMU" header. Region order is fixed: Z80 core,
//! host adapter, PPU, scheduler counters. Each region carries a magic
//! tag identifying its component, a schema version, and a byte body
//! produced by that component's snapshot.
//!
//! Loading verifies the header and every tag before touching any
//! component; a refused blob leaves the target machine unchanged.
//! Framebuffer contents are never serialized - they regenerate on the
//! next frame. No compression or encryption in the core profile.

use log::warn;
use thiserror::Error;

use crate::sched::Scheduler;

/// Blob header magic
pub const STATE_MAGIC: [u8; 4] = *b"MEMU";

/// Container format version
pub const STATE_VERSION: u32 = 1;

/// Region tags (little-endian FourCC)
pub const TAG_CPU: u32 = u32::from_le_bytes(*b"Z80C");
pub const TAG_ADAPTER: u32 = u32::from_le_bytes(*b"ZADP");
pub const TAG_PPU: u32 = u32::from_le_bytes(*b"PPUC");
pub const TAG_SCHED: u32 = u32::from_le_bytes(*b"SCHD");

/// Per-region schema versions
const CPU_SCHEMA: u32 = 1;
const ADAPTER_SCHEMA: u32 = 1;
const PPU_SCHEMA: u32 = 1;
const SCHED_SCHEMA: u32 = 1;

/// Save-state failures. Everything is a return value; a failed load
/// leaves the machine exactly as it was.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("save state truncated")]
    Truncated,
    #[error("bad save state magic")]
    BadMagic,
    #[error("unexpected region tag {found:#010X} (expected {expected:#010X})")]
    BadTag { expected: u32, found: u32 },
    #[error("schema version {found} not supported (expected {expected})")]
    SchemaMismatch { expected: u32, found: u32 },
    #[error("component rejected region body (code {0})")]
    BadBody(i32),
}

impl StateError {
    /// Stable negative code for the C ABI
    pub fn code(&self) -> i32 {
        match self {
            StateError::Truncated => -102,
            StateError::BadMagic => -103,
            StateError::BadTag { .. } => -104,
            StateError::BadBody(_) => -106,
            StateError::SchemaMismatch { .. } => -107,
        }
    }
}

struct RegionWriter {
    buf: Vec<u8>,
    count: u32,
}

impl RegionWriter {
    fn new() -> Self {
        Self {
            buf: Vec::new(),
            count: 0,
        }
    }

    fn push_region(&mut self, tag: u32, schema: u32, body: &[u8]) {
        self.buf.extend_from_slice(&tag.to_le_bytes());
        self.buf.extend_from_slice(&schema.to_le_bytes());
        self.buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(body);
        self.count += 1;
    }

    fn finish(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12 + self.buf.len());
        out.extend_from_slice(&STATE_MAGIC);
        out.extend_from_slice(&STATE_VERSION.to_le_bytes());
        out.extend_from_slice(&self.count.to_le_bytes());
        out.extend_from_slice(&self.buf);
        out
    }
}

struct RegionReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> RegionReader<'a> {
    fn new(data: &'a [u8]) -> Result<(Self, u32), StateError> {
        if data.len() < 12 {
            return Err(StateError::Truncated);
        }
        if data[0..4] != STATE_MAGIC {
            return Err(StateError::BadMagic);
        }
        let version = u32::from_le_bytes(data[4..8].try_into().unwrap());
        if version != STATE_VERSION {
            return Err(StateError::SchemaMismatch {
                expected: STATE_VERSION,
                found: version,
            });
        }
        let count = u32::from_le_bytes(data[8..12].try_into().unwrap());
        Ok((Self { data, pos: 12 }, count))
    }

    /// Read the next region and check its tag and schema.
    fn expect_region(&mut self, tag: u32, schema: u32) -> Result<&'a [u8], StateError> {
        if self.pos + 12 > self.data.len() {
            return Err(StateError::Truncated);
        }
        let found_tag = u32::from_le_bytes(self.data[self.pos..self.pos + 4].try_into().unwrap());
        let found_schema =
            u32::from_le_bytes(self.data[self.pos + 4..self.pos + 8].try_into().unwrap());
        let len =
            u32::from_le_bytes(self.data[self.pos + 8..self.pos + 12].try_into().unwrap()) as usize;
        self.pos += 12;

        if found_tag != tag {
            return Err(StateError::BadTag {
                expected: tag,
                found: found_tag,
            });
        }
        if found_schema != schema {
            return Err(StateError::SchemaMismatch {
                expected: schema,
                found: found_schema,
            });
        }
        if self.pos + len > self.data.len() {
            return Err(StateError::Truncated);
        }
        let body = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(body)
    }
}

/// Serialize the full observable machine state.
pub fn save_state(machine: &Scheduler) -> Vec<u8> {
    let mut writer = RegionWriter::new();
    writer.push_region(TAG_CPU, CPU_SCHEMA, &machine.adapter.cpu.to_bytes());
    writer.push_region(TAG_ADAPTER, ADAPTER_SCHEMA, &machine.adapter.to_bytes());
    writer.push_region(TAG_PPU, PPU_SCHEMA, &machine.ppu.to_bytes());
    writer.push_region(TAG_SCHED, SCHED_SCHEMA, &machine.to_bytes());
    writer.finish()
}

/// Deserialize a blob produced by [`save_state`]. Every header and tag
/// is verified before any component is touched; on error the machine is
/// unchanged.
pub fn load_state(machine: &mut Scheduler, data: &[u8]) -> Result<(), StateError> {
    let (mut reader, count) = RegionReader::new(data)?;
    if count < 4 {
        warn!("save state region count {count} too small");
        return Err(StateError::Truncated);
    }

    // Validation pass: collect every body before applying anything.
    let cpu_body = reader.expect_region(TAG_CPU, CPU_SCHEMA)?;
    let adapter_body = reader.expect_region(TAG_ADAPTER, ADAPTER_SCHEMA)?;
    let ppu_body = reader.expect_region(TAG_PPU, PPU_SCHEMA)?;
    let sched_body = reader.expect_region(TAG_SCHED, SCHED_SCHEMA)?;

    // The PPU body is the only one that can be rejected for content
    // (family tag); probe it on a scratch check before mutating.
    {
        use crate::cpu::Cpu;
        use crate::ppu::PpuCore;
        use crate::sched::Scheduler as Sched;
        use crate::adapter::Z80HostAdapter;
        if cpu_body.len() < Cpu::SNAPSHOT_SIZE
            || adapter_body.len() < Z80HostAdapter::SNAPSHOT_SIZE
            || ppu_body.len() < PpuCore::SNAPSHOT_SIZE
            || sched_body.len() < Sched::SNAPSHOT_SIZE
        {
            return Err(StateError::Truncated);
        }
        let family_offset = 18 + 256;
        if ppu_body[family_offset] != machine.ppu.family().id() {
            return Err(StateError::BadBody(-106));
        }
    }

    machine
        .adapter
        .cpu
        .from_bytes(cpu_body)
        .map_err(StateError::BadBody)?;
    machine
        .adapter
        .from_bytes(adapter_body)
        .map_err(StateError::BadBody)?;
    machine
        .ppu
        .from_bytes(ppu_body)
        .map_err(StateError::BadBody)?;
    machine.from_bytes(sched_body).map_err(StateError::BadBody)?;

    Ok(())
}
