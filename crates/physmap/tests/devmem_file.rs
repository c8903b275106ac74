#![cfg(unix)]

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom};

use physmap::{DevMem, DevMemConfig, MappedRegister, MappingError};

const FILE_LEN: u64 = 0x4000;

/// A sparse file standing in for `/dev/mem`: file offsets are physical addresses.
fn fake_phys_mem() -> tempfile::NamedTempFile {
    let file = tempfile::NamedTempFile::new().expect("failed to create temp file");
    file.as_file().set_len(FILE_LEN).expect("failed to size temp file");
    file
}

fn mapper_for(file: &tempfile::NamedTempFile) -> DevMem {
    DevMem::new(DevMemConfig {
        path: file.path().to_path_buf(),
        sync: false,
    })
}

fn file_bytes(file: &tempfile::NamedTempFile, at: u64, len: usize) -> Vec<u8> {
    let mut f = OpenOptions::new().read(true).open(file.path()).unwrap();
    f.seek(SeekFrom::Start(at)).unwrap();
    let mut buf = vec![0u8; len];
    f.read_exact(&mut buf).unwrap();
    buf
}

#[test]
fn unaligned_base_maps_the_requested_bytes() {
    let file = fake_phys_mem();
    let mut reg = MappedRegister::open_with(mapper_for(&file), 0x1010, 0x20).unwrap();

    reg.write32(0, 0xDEAD_BEEF).unwrap();
    reg.write(8, b"physmap").unwrap();
    assert_eq!(reg.read32(0).unwrap(), 0xDEAD_BEEF);
    reg.close();

    assert_eq!(file_bytes(&file, 0x1010, 4), 0xDEAD_BEEFu32.to_ne_bytes());
    assert_eq!(file_bytes(&file, 0x1018, 7), b"physmap");
}

#[test]
fn misaligned_wide_accesses_round_trip() {
    let file = fake_phys_mem();
    let mut reg = MappedRegister::open_with(mapper_for(&file), 0x2000, 0x40).unwrap();

    reg.write64(3, 0x0102_0304_0506_0708).unwrap();
    assert_eq!(reg.read64(3).unwrap(), 0x0102_0304_0506_0708);
    reg.write16(17, 0xBEEF).unwrap();
    assert_eq!(reg.read16(17).unwrap(), 0xBEEF);
    assert_eq!(reg.read(3, 8).unwrap(), 0x0102_0304_0506_0708u64.to_ne_bytes());
}

#[test]
fn mapping_spanning_a_page_boundary() {
    let file = fake_phys_mem();
    let mut reg = MappedRegister::open_with(mapper_for(&file), 0x0FF8, 0x10).unwrap();
    reg.write(0, &[0x11; 0x10]).unwrap();
    drop(reg);

    assert_eq!(file_bytes(&file, 0x0FF8, 0x10), vec![0x11; 0x10]);
}

#[test]
fn writes_are_visible_to_a_second_mapping() {
    let file = fake_phys_mem();
    let mut a = MappedRegister::open_with(mapper_for(&file), 0x3000, 0x10).unwrap();
    let mut b = MappedRegister::open_with(mapper_for(&file), 0x3004, 0x4).unwrap();

    a.write32(4, 0x1234_5678).unwrap();
    assert_eq!(b.read32(0).unwrap(), 0x1234_5678);
}

#[test]
fn missing_device_is_a_device_open_error() {
    let mapper = DevMem::new(DevMemConfig {
        path: "/nonexistent/physmap/mem".into(),
        sync: true,
    });
    let err = MappedRegister::open_with(mapper, 0x1000, 4).unwrap_err();
    assert!(matches!(err, MappingError::DeviceOpen { .. }), "{err}");
}
