//! Flash-backed settings store.
//!
//! One object instance per flash sector: a header table at a fixed start
//! address maps `(object id, instance id)` to a slot, and each record
//! lives at `base + sector_size · slot` as `{id: u32, inst_id: u16,
//! size: u16}` followed by the payload and a single CRC-8 trailer byte.
//! Table magic and record magic are distinct; a mismatch on either forces
//! a full format.
//!
//! The backend is the small [`Flash`] trait; every erase/program sequence
//! must sit inside a `start_transaction`/`end_transaction` bracket.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::crc::crc8_update;

/// Marks a valid object table.
pub const TABLE_MAGIC: u32 = 0x99AB_CEEF;
/// Marks a valid table entry. Deliberately distinct from [`TABLE_MAGIC`].
pub const OBJECT_MAGIC: u32 = 0x3015_AE71;

/// Errors from the settings store and its flash backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FlashFsError {
    #[error("flash access outside a transaction")]
    NoTransaction,
    #[error("address {0:#x} out of range")]
    OutOfRange(u32),
    #[error("object not found: id {id:#x} instance {inst_id}")]
    NotFound { id: u32, inst_id: u16 },
    #[error("record corrupt: id {id:#x} instance {inst_id}")]
    Corrupt { id: u32, inst_id: u16 },
    #[error("object table full")]
    TableFull,
    #[error("object too large for a sector: {size} bytes")]
    TooLarge { size: usize },
}

/// Flash backend contract. Erase granularity is the sector; programming
/// is byte-wise within erased space.
pub trait Flash {
    fn start_transaction(&mut self) -> Result<(), FlashFsError>;
    fn end_transaction(&mut self);
    fn erase_sector(&mut self, addr: u32) -> Result<(), FlashFsError>;
    fn write_data(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashFsError>;
    fn read_data(&self, addr: u32, buf: &mut [u8]) -> Result<(), FlashFsError>;
}

/// Store geometry.
#[derive(Debug, Clone, Copy)]
pub struct FlashFsConfig {
    /// First byte of the object table (holds the table magic).
    pub table_start: u32,
    /// First byte past the table; object sectors start here.
    pub table_end: u32,
    pub sector_size: u32,
    pub chip_size: u32,
}

impl Default for FlashFsConfig {
    fn default() -> Self {
        Self {
            table_start: 0,
            table_end: 0x0400,
            sector_size: 0x0400,
            chip_size: 0x2_0000,
        }
    }
}

/// One table entry, 16 bytes on flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TableEntry {
    obj_magic: u32,
    obj_id: u32,
    inst_id: u32,
    address: u32,
}

const TABLE_ENTRY_SIZE: u32 = 16;

impl TableEntry {
    fn to_bytes(self) -> [u8; TABLE_ENTRY_SIZE as usize] {
        let mut out = [0u8; 16];
        out[0..4].copy_from_slice(&self.obj_magic.to_le_bytes());
        out[4..8].copy_from_slice(&self.obj_id.to_le_bytes());
        out[8..12].copy_from_slice(&self.inst_id.to_le_bytes());
        out[12..16].copy_from_slice(&self.address.to_le_bytes());
        out
    }

    fn from_bytes(bytes: &[u8; 16]) -> Self {
        let word = |i: usize| {
            u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]])
        };
        Self {
            obj_magic: word(0),
            obj_id: word(4),
            inst_id: word(8),
            address: word(12),
        }
    }
}

/// Record header ahead of each payload, 8 bytes on flash.
const RECORD_HEADER_SIZE: usize = 8;

fn record_header(id: u32, inst_id: u16, size: u16) -> [u8; RECORD_HEADER_SIZE] {
    let mut out = [0u8; RECORD_HEADER_SIZE];
    out[0..4].copy_from_slice(&id.to_le_bytes());
    out[4..6].copy_from_slice(&inst_id.to_le_bytes());
    out[6..8].copy_from_slice(&size.to_le_bytes());
    out
}

/// The settings store.
pub struct FlashFs<F: Flash> {
    flash: F,
    cfg: FlashFsConfig,
    num_objects: u32,
}

impl<F: Flash> FlashFs<F> {
    /// Mount the store, formatting on a bad table magic.
    pub fn mount(flash: F, cfg: FlashFsConfig) -> Result<Self, FlashFsError> {
        let mut fs = Self {
            flash,
            cfg,
            num_objects: 0,
        };
        let mut magic = [0u8; 4];
        fs.flash.read_data(cfg.table_start, &mut magic)?;
        if u32::from_le_bytes(magic) != TABLE_MAGIC {
            warn!("object table magic mismatch, formatting");
            fs.format()?;
            return Ok(fs);
        }
        fs.num_objects = fs.count_objects()?;
        info!(objects = fs.num_objects, "settings store mounted");
        Ok(fs)
    }

    /// Erase everything and write a fresh table.
    pub fn format(&mut self) -> Result<(), FlashFsError> {
        self.flash.start_transaction()?;
        let result = (|| {
            let mut addr = self.cfg.table_start;
            while addr < self.cfg.chip_size {
                self.flash.erase_sector(addr)?;
                addr += self.cfg.sector_size;
            }
            self.flash
                .write_data(self.cfg.table_start, &TABLE_MAGIC.to_le_bytes())
        })();
        self.flash.end_transaction();
        self.num_objects = 0;
        result
    }

    pub fn object_count(&self) -> u32 {
        self.num_objects
    }

    /// Persist one object instance.
    pub fn save_object(
        &mut self,
        obj_id: u32,
        inst_id: u16,
        data: &[u8],
    ) -> Result<(), FlashFsError> {
        let max_payload =
            self.cfg.sector_size as usize - RECORD_HEADER_SIZE - 1;
        if data.len() > max_payload {
            return Err(FlashFsError::TooLarge { size: data.len() });
        }

        let addr = match self.object_address(obj_id, inst_id)? {
            Some(addr) => addr,
            None => self.allocate(obj_id, inst_id)?,
        };

        let size = data.len() as u16;
        let header = record_header(obj_id, inst_id, size);
        let mut crc = crc8_update(0, &header);
        crc = crc8_update(crc, data);

        self.flash.start_transaction()?;
        let result = (|| {
            self.flash.erase_sector(addr)?;
            self.flash.write_data(addr, &header)?;
            self.flash.write_data(addr + RECORD_HEADER_SIZE as u32, data)?;
            self.flash.write_data(
                addr + RECORD_HEADER_SIZE as u32 + u32::from(size),
                &[crc],
            )
        })();
        self.flash.end_transaction();
        debug!(obj_id, inst_id, size, "object saved");
        result
    }

    /// Load one object instance; `data` must be the expected size.
    pub fn load_object(
        &mut self,
        obj_id: u32,
        inst_id: u16,
        data: &mut [u8],
    ) -> Result<(), FlashFsError> {
        let addr = self
            .object_address(obj_id, inst_id)?
            .ok_or(FlashFsError::NotFound { id: obj_id, inst_id })?;

        let mut header = [0u8; RECORD_HEADER_SIZE];
        self.flash.read_data(addr, &mut header)?;
        let stored_id = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let stored_inst = u16::from_le_bytes([header[4], header[5]]);
        let stored_size = u16::from_le_bytes([header[6], header[7]]);
        if stored_id != obj_id
            || stored_inst != inst_id
            || usize::from(stored_size) != data.len()
        {
            return Err(FlashFsError::Corrupt { id: obj_id, inst_id });
        }

        self.flash
            .read_data(addr + RECORD_HEADER_SIZE as u32, data)?;
        let mut trailer = [0u8; 1];
        self.flash.read_data(
            addr + RECORD_HEADER_SIZE as u32 + u32::from(stored_size),
            &mut trailer,
        )?;

        let mut crc = crc8_update(0, &header);
        crc = crc8_update(crc, data);
        if crc != trailer[0] {
            return Err(FlashFsError::Corrupt { id: obj_id, inst_id });
        }
        Ok(())
    }

    /// Remove an object by erasing its sector. The table slot stays (the
    /// original store never compacts); a later save reuses the address.
    pub fn delete_object(&mut self, obj_id: u32, inst_id: u16) -> Result<(), FlashFsError> {
        let addr = self
            .object_address(obj_id, inst_id)?
            .ok_or(FlashFsError::NotFound { id: obj_id, inst_id })?;
        self.flash.start_transaction()?;
        let result = self.flash.erase_sector(addr);
        self.flash.end_transaction();
        result
    }

    fn count_objects(&mut self) -> Result<u32, FlashFsError> {
        let mut count = 0;
        loop {
            let addr = self.cfg.table_start + 4 + count * TABLE_ENTRY_SIZE;
            if addr + TABLE_ENTRY_SIZE > self.cfg.table_end {
                break;
            }
            let mut bytes = [0u8; 16];
            self.flash.read_data(addr, &mut bytes)?;
            if TableEntry::from_bytes(&bytes).obj_magic != OBJECT_MAGIC {
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    fn object_address(
        &mut self,
        obj_id: u32,
        inst_id: u16,
    ) -> Result<Option<u32>, FlashFsError> {
        for slot in 0..self.num_objects {
            let addr = self.cfg.table_start + 4 + slot * TABLE_ENTRY_SIZE;
            let mut bytes = [0u8; 16];
            self.flash.read_data(addr, &mut bytes)?;
            let entry = TableEntry::from_bytes(&bytes);
            if entry.obj_magic == OBJECT_MAGIC
                && entry.obj_id == obj_id
                && entry.inst_id == u32::from(inst_id)
            {
                return Ok(Some(entry.address));
            }
        }
        Ok(None)
    }

    /// Claim the next table slot and its sector.
    fn allocate(&mut self, obj_id: u32, inst_id: u16) -> Result<u32, FlashFsError> {
        let entry_addr = self.cfg.table_start + 4 + self.num_objects * TABLE_ENTRY_SIZE;
        if entry_addr + TABLE_ENTRY_SIZE > self.cfg.table_end {
            return Err(FlashFsError::TableFull);
        }
        let address = self.cfg.table_end + self.cfg.sector_size * self.num_objects;
        if address + self.cfg.sector_size > self.cfg.chip_size {
            return Err(FlashFsError::TableFull);
        }

        let entry = TableEntry {
            obj_magic: OBJECT_MAGIC,
            obj_id,
            inst_id: u32::from(inst_id),
            address,
        };
        self.flash.start_transaction()?;
        let result = self.flash.write_data(entry_addr, &entry.to_bytes());
        self.flash.end_transaction();
        result?;
        self.num_objects += 1;
        Ok(address)
    }
}

// ─── Host flash backend ─────────────────────────────────────────────

/// RAM-backed flash with real erase semantics (erased bytes read 0xFF)
/// and transaction enforcement. `image`/`restore` round-trip the raw
/// bytes for persistence tests.
pub struct RamFlash {
    data: Vec<u8>,
    sector_size: u32,
    in_transaction: bool,
}

impl RamFlash {
    pub fn new(size: u32, sector_size: u32) -> Self {
        Self {
            data: vec![0xFF; size as usize],
            sector_size,
            in_transaction: false,
        }
    }

    pub fn image(&self) -> &[u8] {
        &self.data
    }

    pub fn restore(image: Vec<u8>, sector_size: u32) -> Self {
        Self {
            data: image,
            sector_size,
            in_transaction: false,
        }
    }
}

impl Flash for RamFlash {
    fn start_transaction(&mut self) -> Result<(), FlashFsError> {
        self.in_transaction = true;
        Ok(())
    }

    fn end_transaction(&mut self) {
        self.in_transaction = false;
    }

    fn erase_sector(&mut self, addr: u32) -> Result<(), FlashFsError> {
        if !self.in_transaction {
            return Err(FlashFsError::NoTransaction);
        }
        let start = (addr - addr % self.sector_size) as usize;
        let end = start + self.sector_size as usize;
        if end > self.data.len() {
            return Err(FlashFsError::OutOfRange(addr));
        }
        self.data[start..end].fill(0xFF);
        Ok(())
    }

    fn write_data(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashFsError> {
        if !self.in_transaction {
            return Err(FlashFsError::NoTransaction);
        }
        let start = addr as usize;
        let end = start + data.len();
        if end > self.data.len() {
            return Err(FlashFsError::OutOfRange(addr));
        }
        self.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn read_data(&self, addr: u32, buf: &mut [u8]) -> Result<(), FlashFsError> {
        let start = addr as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            return Err(FlashFsError::OutOfRange(addr));
        }
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }
}
