use std::fs;
use std::sync::Arc;

use aok::{OK, Void};
use log::info;
use vm_pager::memory::{BackingStore, Disk, FileDisk};
use vm_pager::noff::ByteOrder;
use vm_pager::{
    AddressSpace, BAD_VADDR_REG, Error, HostFileStore, Machine, MemFileStore, MemoryConfig, MemoryManager,
    NoffBuilder, STACK_REG, SlotId, SpaceState,
};

#[static_init::constructor(0)]
extern "C" fn _log_init() {
    log_init::init();
}

fn code(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 + 1).collect()
}

/// 2 frames, 4 slots, 128-byte pages; a 50-byte program with a 256-byte
/// stack spans 3 pages, so the last page is born evicted
#[test]
fn test_overcommitted_load_scenario() -> Void {
    let config = MemoryConfig::default()
        .with_frames(2)
        .with_slots(4)
        .with_user_stack_size(256);
    let disk = Arc::new(Disk::new(4, 128));
    let mm = Arc::new(MemoryManager::new(config, disk.clone())?);
    let program = code(50);
    let store = MemFileStore::new().with("prog", NoffBuilder::new().code(program.clone()).build());

    let mut machine = Machine::new(mm.clone());
    let mut space = AddressSpace::new(mm.clone());
    space.execute(&store, "prog", &mut machine)?;

    assert_eq!(space.page_count(), 3);
    assert_eq!(space.resident_pages(), vec![0, 1]);
    assert_eq!(mm.free_frame_count(), 0);
    assert_eq!(mm.used_slot_count(), 1);
    assert_eq!(disk.slot(0), vec![0; 128]);
    assert_eq!(machine.read_register(STACK_REG), 3 * 128 - 16);

    let p0 = mm.read_frame(0);
    assert_eq!(&p0[..50], &program[..]);
    assert!(p0[50..].iter().all(|&b| b == 0));

    // touching the stack page evicts page 0, the least recently touched
    assert_eq!(machine.read_mem(2 * 128 + 4, 4)?, 0);
    assert_eq!(machine.read_register(BAD_VADDR_REG), 2 * 128 + 4);
    assert_eq!(space.resident_pages(), vec![1, 2]);
    assert_eq!(mm.stats().evictions, 1);

    // and page 0 comes back intact
    assert_eq!(machine.read_mem(0, 1)?, program[0] as u32);
    assert_eq!(machine.read_mem(48, 2)?, u16::from_le_bytes([program[48], program[49]]) as u32);
    mm.check_accounting()?;
    info!("{}", mm.stats());
    OK
}

#[test]
fn test_excess_pages_recoverable_by_fault() -> Void {
    let config = MemoryConfig::default()
        .with_page_size(16)
        .with_frames(2)
        .with_slots(16)
        .with_user_stack_size(16);
    let mm = Arc::new(MemoryManager::with_disk(config)?);
    let program = code(80);
    let store = MemFileStore::new().with(
        "prog",
        NoffBuilder::new().code(program.clone()).init_data(vec![0xEE; 8]).build(),
    );

    let mut machine = Machine::new(mm.clone());
    let mut space = AddressSpace::new(mm.clone());
    space.execute(&store, "prog", &mut machine)?;
    assert_eq!(space.page_count(), 7);

    for (i, &byte) in program.iter().enumerate() {
        assert_eq!(machine.read_mem(i as u32, 1)?, byte as u32, "byte {}", i);
    }
    for i in 80..88 {
        assert_eq!(machine.read_mem(i, 1)?, 0xEE);
    }
    assert_eq!(machine.read_mem(100, 4)?, 0);
    mm.check_accounting()?;
    OK
}

#[test]
fn test_big_endian_executable() -> Void {
    let config = MemoryConfig::default().with_page_size(16).with_frames(4);
    let mm = Arc::new(MemoryManager::with_disk(config)?);
    let image = NoffBuilder::new()
        .code(code(20))
        .byte_order(ByteOrder::Big)
        .build();
    let store = MemFileStore::new().with("be", image);

    let mut space = AddressSpace::new(mm.clone());
    space.load(&store, "be")?;
    let frame = mm.entry(space.page_table().get(1).unwrap()).unwrap().physical_frame;
    assert_eq!(&mm.read_frame(frame)[..4], &code(20)[16..]);
    OK
}

#[test]
fn test_spaces_compete_for_frames() -> Void {
    let config = MemoryConfig::default()
        .with_page_size(16)
        .with_frames(3)
        .with_slots(32)
        .with_user_stack_size(16);
    let mm = Arc::new(MemoryManager::with_disk(config)?);
    let store = MemFileStore::new()
        .with("a", NoffBuilder::new().code(vec![0xA0; 32]).build())
        .with("b", NoffBuilder::new().code(vec![0xB0; 32]).build());

    let mut machine = Machine::new(mm.clone());
    let mut a = AddressSpace::new(mm.clone());
    let mut b = AddressSpace::new(mm.clone());
    a.load(&store, "a")?;
    b.load(&store, "b")?;

    for _ in 0..3 {
        for (space, byte) in [(&mut a, 0xA0u32), (&mut b, 0xB0)] {
            space.init_registers(&mut machine)?;
            space.restore_state(&mut machine);
            assert_eq!(space.state(), SpaceState::Running);
            for page in 0..2u32 {
                assert_eq!(machine.read_mem(page * 16, 1)?, byte);
            }
            space.save_state(&machine);
            assert_eq!(space.state(), SpaceState::Ready);
        }
    }
    assert_eq!(mm.resident_count(), 3);
    mm.check_accounting()?;

    drop(a);
    assert_eq!(mm.resident_count() + mm.free_frame_count(), 3);
    drop(b);
    assert_eq!(mm.free_frame_count(), 3);
    assert_eq!(mm.used_slot_count(), 0);
    OK
}

#[test]
fn test_host_files_and_file_disk() -> Void {
    let dir = tempfile::tempdir()?;
    fs::write(dir.path().join("prog"), NoffBuilder::new().code(code(40)).build())?;

    let config = MemoryConfig::default()
        .with_page_size(16)
        .with_frames(1)
        .with_slots(8)
        .with_user_stack_size(16);
    let disk = Arc::new(FileDisk::open(dir.path().join("swap"), 8, 16)?);
    let mm = Arc::new(MemoryManager::new(config, disk)?);
    let store = HostFileStore::new(dir.path());

    let mut machine = Machine::new(mm.clone());
    let mut space = AddressSpace::new(mm.clone());
    space.execute(&store, "prog", &mut machine)?;
    assert_eq!(space.page_count(), 4);
    assert_eq!(mm.used_slot_count(), 3);

    let program = code(40);
    for i in (0..40).rev() {
        assert_eq!(machine.read_mem(i, 1)?, program[i as usize] as u32);
    }
    assert_eq!(fs::metadata(dir.path().join("swap"))?.len(), 8 * 16);

    let err = AddressSpace::new(mm.clone()).load(&store, "missing").unwrap_err();
    assert!(matches!(err, Error::ExecutableNotFound(name) if name == "missing"));
    OK
}

#[test]
fn test_bad_executables() -> Void {
    let config = MemoryConfig::default().with_page_size(16).with_frames(2);
    let mm = Arc::new(MemoryManager::with_disk(config)?);

    let mut truncated = NoffBuilder::new().code(code(40)).build();
    truncated.truncate(60);
    let store = MemFileStore::new()
        .with("short", vec![0xAD, 0xDF])
        .with("garbage", vec![0x11; 64])
        .with("truncated", truncated);

    for name in ["short", "garbage", "truncated"] {
        let mut space = AddressSpace::new(mm.clone());
        let err = space.load(&store, name).unwrap_err();
        assert!(matches!(err, Error::BadExecutableFormat(_)), "{}: {}", name, err);
        assert_eq!(space.state(), SpaceState::Failed);
    }
    assert_eq!(mm.free_frame_count(), 2);
    assert_eq!(mm.used_slot_count(), 0);
    mm.check_accounting()?;
    OK
}

type Hook = Box<dyn FnOnce() + Send>;

/// Disk that runs a one-shot hook in the middle of the next write
struct HookDisk {
    inner: Disk,
    hook: spin::Mutex<Option<Hook>>,
}

impl BackingStore for HookDisk {
    fn slot_count(&self) -> usize {
        self.inner.slot_count()
    }

    fn page_size(&self) -> usize {
        self.inner.page_size()
    }

    fn write_slot(&self, slot: SlotId, page: &[u8]) -> vm_pager::Result<()> {
        let hook = self.hook.lock().take();
        if let Some(hook) = hook {
            hook();
        }
        self.inner.write_slot(slot, page)
    }

    fn read_slot(&self, slot: SlotId, page: &mut [u8]) -> vm_pager::Result<()> {
        self.inner.read_slot(slot, page)
    }
}

#[test]
fn test_space_replaced_during_write_back() -> Void {
    let config = MemoryConfig::default()
        .with_page_size(16)
        .with_frames(2)
        .with_slots(4)
        .with_user_stack_size(16);
    let disk = Arc::new(HookDisk {
        inner: Disk::new(4, 16),
        hook: spin::Mutex::new(None),
    });
    let mm = Arc::new(MemoryManager::new(config, disk.clone())?);
    let store = Arc::new(
        MemFileStore::new()
            .with("a", NoffBuilder::new().code(vec![0xA1; 16]).build())
            .with("b", NoffBuilder::new().code(vec![0xB2; 16]).build()),
    );

    let mut a = AddressSpace::new(mm.clone());
    a.load(&*store, "a")?;
    let victim = a.page_table().get(0).unwrap();
    assert_eq!(mm.eviction_candidate(), Some(victim));

    // while A's page 0 is being written out, A goes away and B moves in
    let loaded = Arc::new(spin::Mutex::new(None));
    {
        let (mm, store, loaded) = (mm.clone(), store.clone(), loaded.clone());
        *disk.hook.lock() = Some(Box::new(move || {
            drop(a);
            let mut b = AddressSpace::new(mm);
            b.load(&*store, "b").unwrap();
            *loaded.lock() = Some(b);
        }));
    }
    assert_eq!(mm.evict_tail()?, 0);
    let mut b = loaded.lock().take().unwrap();

    assert!(mm.entry(victim).is_none());
    assert!(mm.update_entry(victim, |e| e.flags).is_none());

    let resident = mm.entry(b.page_table().get(0).unwrap()).unwrap();
    assert!(resident.is_valid());
    assert_eq!(resident.physical_frame, 1);
    assert_eq!(mm.read_frame(1), vec![0xB2; 16]);

    let staged = mm.entry(b.page_table().get(1).unwrap()).unwrap();
    assert!(!staged.is_valid());
    assert!(staged.ever_swapped_out());
    let slot = staged.backing_slot().unwrap();
    assert_eq!(disk.inner.slot(slot), vec![0; 16]);

    // A's slot went back once its write-back finished
    assert_eq!(mm.used_slot_count(), 1);
    assert_eq!(mm.free_frame_count(), 1);
    assert_eq!(mm.resident_count(), 1);
    mm.check_accounting()?;

    let mut machine = Machine::new(mm.clone());
    b.restore_state(&mut machine);
    assert_eq!(machine.read_mem(16, 4)?, 0);
    assert_eq!(machine.read_mem(0, 1)?, 0xB2);
    mm.check_accounting()?;
    OK
}
