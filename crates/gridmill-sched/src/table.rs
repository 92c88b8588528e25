//! Shared work table
//!
//! A file-backed arena of fixed-size (workunit, result) slots shared by the
//! feeder and every scheduler request process. The feeder creates it; every
//! other process attaches and must pass the layout check, so a stale binary
//! compiled against different record sizes refuses to touch the memory
//! instead of corrupting it.
//!
//! All integers are little-endian; records are serialized with explicit
//! offsets, never by reinterpreting struct memory. Slot-state transitions
//! happen only while holding [`TableLock`], an exclusive advisory lock on a
//! sibling `.lock` file: the single synchronization primitive. Critical
//! sections are check/flip/copy only.

use std::fs::{File, OpenOptions};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use nix::fcntl::{Flock, FlockArg};

use crate::error::{Result, SchedError};
use crate::types::{ResultRow, Workunit};

/// Magic bytes identifying a gridmill work table file.
pub const TABLE_MAGIC: [u8; 4] = *b"GMWT";

/// Table format version.
pub const TABLE_VERSION: u16 = 1;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 64;

/// Fixed width of name fields in slot records.
pub const NAME_LEN: usize = 256;

/// Fixed width of the workunit xml blob in slot records.
pub const XML_BLOB_LEN: usize = 2048;

/// Serialized workunit record size.
pub const WU_RECORD_SIZE: usize = 72 + NAME_LEN + XML_BLOB_LEN;

/// Serialized result record size.
pub const RESULT_RECORD_SIZE: usize = 24 + NAME_LEN;

/// Whole slot: state + infeasible count + workunit + result.
pub const SLOT_SIZE: usize = 8 + WU_RECORD_SIZE + RESULT_RECORD_SIZE;

/// Slot occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Empty,
    Present,
    CheckedOut,
}

impl SlotState {
    pub fn as_u32(self) -> u32 {
        match self {
            SlotState::Empty => 0,
            SlotState::Present => 1,
            SlotState::CheckedOut => 2,
        }
    }

    pub fn from_u32(v: u32) -> Result<Self> {
        match v {
            0 => Ok(SlotState::Empty),
            1 => Ok(SlotState::Present),
            2 => Ok(SlotState::CheckedOut),
            other => Err(SchedError::InvalidState(other)),
        }
    }
}

/// Hash of everything that must agree between writer and reader binaries.
pub fn layout_hash() -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    TABLE_VERSION.hash(&mut hasher);
    SLOT_SIZE.hash(&mut hasher);
    WU_RECORD_SIZE.hash(&mut hasher);
    RESULT_RECORD_SIZE.hash(&mut hasher);
    hasher.finish()
}

/// Exclusive hold on the table's slot states.
///
/// Unlocks on drop. The guard holds its own file handle, so it does not
/// borrow the table.
pub struct TableLock {
    _lock: Flock<File>,
}

/// Owning handle to the shared table mapping.
#[derive(Debug)]
pub struct WorkTable {
    mmap: MmapMut,
    capacity: u32,
    lock_path: PathBuf,
}

impl WorkTable {
    /// Create a fresh table. Feeder only: creation zeroes every slot and
    /// stamps the header, including the ready flag.
    pub fn create(path: &Path, capacity: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let len = HEADER_SIZE + capacity as usize * SLOT_SIZE;
        file.set_len(len as u64)?;
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };

        let header = &mut mmap[..HEADER_SIZE];
        header[0..4].copy_from_slice(&TABLE_MAGIC);
        header[4..6].copy_from_slice(&TABLE_VERSION.to_le_bytes());
        header[6] = 1; // ready
        header[8..12].copy_from_slice(&capacity.to_le_bytes());
        header[12..16].copy_from_slice(&(SLOT_SIZE as u32).to_le_bytes());
        header[16..20].copy_from_slice(&(WU_RECORD_SIZE as u32).to_le_bytes());
        header[20..24].copy_from_slice(&(RESULT_RECORD_SIZE as u32).to_le_bytes());
        header[24..32].copy_from_slice(&layout_hash().to_le_bytes());
        mmap.flush()?;

        tracing::info!(path = %path.display(), capacity, slot_size = SLOT_SIZE, "Created work table");

        Ok(Self {
            mmap,
            capacity,
            lock_path: lock_path_for(path),
        })
    }

    /// Attach to an existing table, verifying the recorded layout against
    /// this binary's compiled constants.
    pub fn attach(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        if mmap.len() < HEADER_SIZE {
            return Err(SchedError::LayoutMismatch {
                field: "file_size",
                expected: HEADER_SIZE as u64,
                actual: mmap.len() as u64,
            });
        }

        let header = &mmap[..HEADER_SIZE];
        if header[0..4] != TABLE_MAGIC {
            return Err(SchedError::LayoutMismatch {
                field: "magic",
                expected: u32::from_le_bytes(TABLE_MAGIC) as u64,
                actual: u32::from_le_bytes(header[0..4].try_into().expect("4 bytes")) as u64,
            });
        }
        check_field(
            "version",
            TABLE_VERSION as u64,
            u16::from_le_bytes(header[4..6].try_into().expect("2 bytes")) as u64,
        )?;
        let capacity = u32::from_le_bytes(header[8..12].try_into().expect("4 bytes"));
        check_field(
            "slot_size",
            SLOT_SIZE as u64,
            u32::from_le_bytes(header[12..16].try_into().expect("4 bytes")) as u64,
        )?;
        check_field(
            "wu_record_size",
            WU_RECORD_SIZE as u64,
            u32::from_le_bytes(header[16..20].try_into().expect("4 bytes")) as u64,
        )?;
        check_field(
            "result_record_size",
            RESULT_RECORD_SIZE as u64,
            u32::from_le_bytes(header[20..24].try_into().expect("4 bytes")) as u64,
        )?;
        check_field(
            "layout_hash",
            layout_hash(),
            u64::from_le_bytes(header[24..32].try_into().expect("8 bytes")),
        )?;
        let expected_len = (HEADER_SIZE + capacity as usize * SLOT_SIZE) as u64;
        check_field("file_size", expected_len, mmap.len() as u64)?;
        if header[6] != 1 {
            return Err(SchedError::TableNotReady(path.display().to_string()));
        }

        Ok(Self {
            mmap,
            capacity,
            lock_path: lock_path_for(path),
        })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Acquire the table semaphore. Blocks; holders only check and flip
    /// states, so waits are short.
    pub fn lock(&self) -> Result<TableLock> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)?;
        let lock = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| std::io::Error::from_raw_os_error(errno as i32))?;
        Ok(TableLock { _lock: lock })
    }

    pub fn slot_state(&self, _guard: &TableLock, index: u32) -> Result<SlotState> {
        let off = self.slot_offset(index)?;
        SlotState::from_u32(u32::from_le_bytes(
            self.mmap[off..off + 4].try_into().expect("4 bytes"),
        ))
    }

    pub fn set_slot_state(&mut self, _guard: &TableLock, index: u32, state: SlotState) -> Result<()> {
        let off = self.slot_offset(index)?;
        self.mmap[off..off + 4].copy_from_slice(&state.as_u32().to_le_bytes());
        Ok(())
    }

    pub fn infeasible_count(&self, _guard: &TableLock, index: u32) -> Result<u32> {
        let off = self.slot_offset(index)?;
        Ok(u32::from_le_bytes(
            self.mmap[off + 4..off + 8].try_into().expect("4 bytes"),
        ))
    }

    /// Record one more host that could not take this slot's work.
    /// Deliberately unbounded; saturates rather than wraps.
    pub fn bump_infeasible(&mut self, guard: &TableLock, index: u32) -> Result<()> {
        let n = self.infeasible_count(guard, index)?.saturating_add(1);
        let off = self.slot_offset(index)?;
        self.mmap[off + 4..off + 8].copy_from_slice(&n.to_le_bytes());
        Ok(())
    }

    /// Copy a slot's cached records out of the table.
    pub fn read_slot(&self, _guard: &TableLock, index: u32) -> Result<(Workunit, ResultRow)> {
        let off = self.slot_offset(index)?;
        let wu = decode_workunit(&self.mmap[off + 8..off + 8 + WU_RECORD_SIZE]);
        let res = decode_result(
            &self.mmap[off + 8 + WU_RECORD_SIZE..off + 8 + WU_RECORD_SIZE + RESULT_RECORD_SIZE],
        );
        Ok((wu, res))
    }

    /// Fill a slot and mark it PRESENT with a fresh infeasibility count.
    pub fn write_slot(
        &mut self,
        _guard: &TableLock,
        index: u32,
        wu: &Workunit,
        res: &ResultRow,
    ) -> Result<()> {
        let off = self.slot_offset(index)?;
        let mut wu_buf = vec![0u8; WU_RECORD_SIZE];
        encode_workunit(wu, &mut wu_buf)?;
        let mut res_buf = vec![0u8; RESULT_RECORD_SIZE];
        encode_result(res, &mut res_buf)?;
        self.mmap[off + 8..off + 8 + WU_RECORD_SIZE].copy_from_slice(&wu_buf);
        self.mmap[off + 8 + WU_RECORD_SIZE..off + 8 + WU_RECORD_SIZE + RESULT_RECORD_SIZE]
            .copy_from_slice(&res_buf);
        self.mmap[off + 4..off + 8].copy_from_slice(&0u32.to_le_bytes());
        self.mmap[off..off + 4].copy_from_slice(&SlotState::Present.as_u32().to_le_bytes());
        Ok(())
    }

    /// Release a slot back to EMPTY.
    pub fn clear_slot(&mut self, _guard: &TableLock, index: u32) -> Result<()> {
        let off = self.slot_offset(index)?;
        self.mmap[off..off + 4].copy_from_slice(&SlotState::Empty.as_u32().to_le_bytes());
        Ok(())
    }

    /// Is this result id cached in any non-empty slot? O(capacity) scan,
    /// used by the feeder to avoid duplicate entries.
    pub fn contains_result(&self, guard: &TableLock, result_id: u64) -> Result<bool> {
        for i in 0..self.capacity {
            if self.slot_state(guard, i)? == SlotState::Empty {
                continue;
            }
            let off = self.slot_offset(i)? + 8 + WU_RECORD_SIZE;
            let id = u64::from_le_bytes(self.mmap[off..off + 8].try_into().expect("8 bytes"));
            if id == result_id {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn slot_offset(&self, index: u32) -> Result<usize> {
        if index >= self.capacity {
            return Err(SchedError::InvalidRecord(format!(
                "slot index {} out of range 0..{}",
                index, self.capacity
            )));
        }
        Ok(HEADER_SIZE + index as usize * SLOT_SIZE)
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".lock");
    PathBuf::from(os)
}

fn check_field(field: &'static str, expected: u64, actual: u64) -> Result<()> {
    if expected != actual {
        return Err(SchedError::LayoutMismatch {
            field,
            expected,
            actual,
        });
    }
    Ok(())
}

fn put_str(dst: &mut [u8], s: &str, what: &str) -> Result<()> {
    let bytes = s.as_bytes();
    if bytes.len() > dst.len() {
        return Err(SchedError::InvalidRecord(format!(
            "{} of {} bytes exceeds fixed field of {}",
            what,
            bytes.len(),
            dst.len()
        )));
    }
    dst[..bytes.len()].copy_from_slice(bytes);
    dst[bytes.len()..].fill(0);
    Ok(())
}

fn get_str(src: &[u8]) -> String {
    let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
    String::from_utf8_lossy(&src[..end]).into_owned()
}

fn encode_workunit(wu: &Workunit, buf: &mut [u8]) -> Result<()> {
    buf[0..8].copy_from_slice(&wu.id.to_le_bytes());
    buf[8..16].copy_from_slice(&wu.appid.to_le_bytes());
    buf[16..24].copy_from_slice(&wu.rsc_fpops_est.to_le_bytes());
    buf[24..32].copy_from_slice(&wu.rsc_fpops_bound.to_le_bytes());
    buf[32..40].copy_from_slice(&wu.rsc_memory_bound.to_le_bytes());
    buf[40..48].copy_from_slice(&wu.rsc_disk_bound.to_le_bytes());
    buf[48..56].copy_from_slice(&wu.delay_bound.to_le_bytes());
    buf[56..64].copy_from_slice(&wu.transition_time.to_le_bytes());
    buf[64] = wu.need_validate as u8;
    put_str(&mut buf[72..72 + NAME_LEN], &wu.name, "workunit name")?;
    put_str(
        &mut buf[72 + NAME_LEN..72 + NAME_LEN + XML_BLOB_LEN],
        &wu.xml_doc,
        "workunit xml_doc",
    )?;
    Ok(())
}

fn decode_workunit(buf: &[u8]) -> Workunit {
    Workunit {
        id: u64::from_le_bytes(buf[0..8].try_into().expect("8 bytes")),
        appid: u64::from_le_bytes(buf[8..16].try_into().expect("8 bytes")),
        rsc_fpops_est: f64::from_le_bytes(buf[16..24].try_into().expect("8 bytes")),
        rsc_fpops_bound: f64::from_le_bytes(buf[24..32].try_into().expect("8 bytes")),
        rsc_memory_bound: f64::from_le_bytes(buf[32..40].try_into().expect("8 bytes")),
        rsc_disk_bound: f64::from_le_bytes(buf[40..48].try_into().expect("8 bytes")),
        delay_bound: f64::from_le_bytes(buf[48..56].try_into().expect("8 bytes")),
        transition_time: u64::from_le_bytes(buf[56..64].try_into().expect("8 bytes")),
        need_validate: buf[64] != 0,
        name: get_str(&buf[72..72 + NAME_LEN]),
        xml_doc: get_str(&buf[72 + NAME_LEN..72 + NAME_LEN + XML_BLOB_LEN]),
    }
}

fn encode_result(res: &ResultRow, buf: &mut [u8]) -> Result<()> {
    buf[0..8].copy_from_slice(&res.id.to_le_bytes());
    buf[8..16].copy_from_slice(&res.workunitid.to_le_bytes());
    buf[16..20].copy_from_slice(&res.server_state.to_le_bytes());
    put_str(&mut buf[24..24 + NAME_LEN], &res.name, "result name")?;
    Ok(())
}

fn decode_result(buf: &[u8]) -> ResultRow {
    ResultRow {
        id: u64::from_le_bytes(buf[0..8].try_into().expect("8 bytes")),
        workunitid: u64::from_le_bytes(buf[8..16].try_into().expect("8 bytes")),
        server_state: u32::from_le_bytes(buf[16..20].try_into().expect("4 bytes")),
        name: get_str(&buf[24..24 + NAME_LEN]),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_wu() -> Workunit {
        Workunit {
            id: 42,
            appid: 7,
            name: "wu_sample_001".into(),
            rsc_fpops_est: 1.5e12,
            rsc_fpops_bound: 3.0e12,
            rsc_memory_bound: 6.4e7,
            rsc_disk_bound: 1.0e8,
            delay_bound: 86_400.0,
            need_validate: true,
            transition_time: 1_700_000_000,
            xml_doc: "<file_info><name>in_001</name></file_info>".into(),
        }
    }

    fn sample_result() -> ResultRow {
        ResultRow {
            id: 4242,
            workunitid: 42,
            name: "wu_sample_001_0".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_record_roundtrip() {
        let wu = sample_wu();
        let mut buf = vec![0u8; WU_RECORD_SIZE];
        encode_workunit(&wu, &mut buf).unwrap();
        assert_eq!(decode_workunit(&buf), wu);

        let res = sample_result();
        let mut buf = vec![0u8; RESULT_RECORD_SIZE];
        encode_result(&res, &mut buf).unwrap();
        assert_eq!(decode_result(&buf), res);
    }

    #[test]
    fn test_oversize_name_rejected() {
        let mut wu = sample_wu();
        wu.name = "x".repeat(NAME_LEN + 1);
        let mut buf = vec![0u8; WU_RECORD_SIZE];
        assert!(matches!(
            encode_workunit(&wu, &mut buf),
            Err(SchedError::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_create_attach_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("work_table");
        let mut table = WorkTable::create(&path, 8).unwrap();
        {
            let g = table.lock().unwrap();
            assert_eq!(table.slot_state(&g, 0).unwrap(), SlotState::Empty);
            table.write_slot(&g, 3, &sample_wu(), &sample_result()).unwrap();
        }

        let attached = WorkTable::attach(&path).unwrap();
        assert_eq!(attached.capacity(), 8);
        let g = attached.lock().unwrap();
        assert_eq!(attached.slot_state(&g, 3).unwrap(), SlotState::Present);
        let (wu, res) = attached.read_slot(&g, 3).unwrap();
        assert_eq!(wu, sample_wu());
        assert_eq!(res.id, sample_result().id);
        assert!(attached.contains_result(&g, 4242).unwrap());
        assert!(!attached.contains_result(&g, 4243).unwrap());
    }

    #[test]
    fn test_attach_rejects_bad_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("work_table");
        WorkTable::create(&path, 4).unwrap();

        // Corrupt the recorded slot size.
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[12..16].copy_from_slice(&999u32.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        let err = WorkTable::attach(&path).unwrap_err();
        assert!(matches!(
            err,
            SchedError::LayoutMismatch {
                field: "slot_size",
                ..
            }
        ));
    }

    #[test]
    fn test_attach_rejects_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("work_table");
        WorkTable::create(&path, 4).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0..4].copy_from_slice(b"XXXX");
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            WorkTable::attach(&path).unwrap_err(),
            SchedError::LayoutMismatch { field: "magic", .. }
        ));
    }

    #[test]
    fn test_attach_rejects_unready_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("work_table");
        WorkTable::create(&path, 4).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[6] = 0;
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            WorkTable::attach(&path).unwrap_err(),
            SchedError::TableNotReady(_)
        ));
    }

    #[test]
    fn test_state_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("work_table");
        let mut table = WorkTable::create(&path, 2).unwrap();
        let g = table.lock().unwrap();

        table.write_slot(&g, 0, &sample_wu(), &sample_result()).unwrap();
        table.set_slot_state(&g, 0, SlotState::CheckedOut).unwrap();
        assert_eq!(table.slot_state(&g, 0).unwrap(), SlotState::CheckedOut);
        // Undo path.
        table.set_slot_state(&g, 0, SlotState::Present).unwrap();
        assert_eq!(table.slot_state(&g, 0).unwrap(), SlotState::Present);
        // Consume path.
        table.clear_slot(&g, 0).unwrap();
        assert_eq!(table.slot_state(&g, 0).unwrap(), SlotState::Empty);
    }

    #[test]
    fn test_infeasible_counter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("work_table");
        let mut table = WorkTable::create(&path, 1).unwrap();
        let g = table.lock().unwrap();
        table.write_slot(&g, 0, &sample_wu(), &sample_result()).unwrap();
        assert_eq!(table.infeasible_count(&g, 0).unwrap(), 0);
        table.bump_infeasible(&g, 0).unwrap();
        table.bump_infeasible(&g, 0).unwrap();
        assert_eq!(table.infeasible_count(&g, 0).unwrap(), 2);
        // Refilling resets the counter.
        table.write_slot(&g, 0, &sample_wu(), &sample_result()).unwrap();
        assert_eq!(table.infeasible_count(&g, 0).unwrap(), 0);
    }

    #[test]
    fn test_slot_index_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("work_table");
        let table = WorkTable::create(&path, 2).unwrap();
        let g = table.lock().unwrap();
        assert!(table.slot_state(&g, 2).is_err());
    }
}
