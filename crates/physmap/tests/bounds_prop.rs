use physmap::{AccessError, MappedRegister, SimulatedPhysicalMemory};
use proptest::prelude::*;

const PHYS_BASE: u64 = 0x3F20_0000;
const WINDOW: usize = 0x200;

fn open(size: usize) -> (SimulatedPhysicalMemory, MappedRegister<SimulatedPhysicalMemory>) {
    let mem = SimulatedPhysicalMemory::new(PHYS_BASE, WINDOW);
    // Seed the whole window so unchanged-memory checks are not trivially all zeroes.
    let seed: Vec<u8> = (0..WINDOW).map(|i| (i * 7 + 3) as u8).collect();
    mem.poke(PHYS_BASE, &seed);
    let reg = MappedRegister::open_with(mem.clone(), PHYS_BASE, size).unwrap();
    (mem, reg)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        rng_algorithm: proptest::test_runner::RngAlgorithm::ChaCha,
        rng_seed: proptest::test_runner::RngSeed::Fixed(0x5EED_0F_3A),
        .. ProptestConfig::default()
    })]

    #[test]
    fn out_of_bounds_accesses_fail_and_leave_memory_untouched(
        size in 1usize..=64,
        overshoot in 1usize..=16,
        width in prop::sample::select(vec![1usize, 2, 4, 8]),
    ) {
        let (mem, mut reg) = open(size);
        let before = mem.peek(PHYS_BASE, WINDOW);
        // Any offset with offset + width > size.
        let offset = (size + overshoot).saturating_sub(width);

        let res = match width {
            1 => reg.write8(offset, 0xA5),
            2 => reg.write16(offset, 0xA5A5),
            4 => reg.write32(offset, 0xA5A5_A5A5),
            _ => reg.write64(offset, 0xA5A5_A5A5_A5A5_A5A5),
        };
        prop_assert!(matches!(res, Err(AccessError::OutOfBounds { .. })), "{res:?}");

        let res = match width {
            1 => reg.read8(offset).map(drop),
            2 => reg.read16(offset).map(drop),
            4 => reg.read32(offset).map(drop),
            _ => reg.read64(offset).map(drop),
        };
        prop_assert!(matches!(res, Err(AccessError::OutOfBounds { .. })), "{res:?}");

        let res = reg.write(offset, &vec![0xA5; width]);
        prop_assert!(matches!(res, Err(AccessError::OutOfBounds { .. })), "{res:?}");

        prop_assert_eq!(mem.peek(PHYS_BASE, WINDOW), before);
    }

    #[test]
    fn in_bounds_writes_round_trip(
        (size, offset) in (8usize..=WINDOW).prop_flat_map(|size| (Just(size), 0..=size - 8)),
        v8 in any::<u8>(),
        v16 in any::<u16>(),
        v32 in any::<u32>(),
        v64 in any::<u64>(),
    ) {
        let (_mem, mut reg) = open(size);

        reg.write8(offset, v8).unwrap();
        prop_assert_eq!(reg.read8(offset).unwrap(), v8);
        reg.write16(offset, v16).unwrap();
        prop_assert_eq!(reg.read16(offset).unwrap(), v16);
        reg.write32(offset, v32).unwrap();
        prop_assert_eq!(reg.read32(offset).unwrap(), v32);
        reg.write64(offset, v64).unwrap();
        prop_assert_eq!(reg.read64(offset).unwrap(), v64);
    }

    #[test]
    fn byte_ranges_round_trip(
        (size, offset, bytes) in (1usize..=WINDOW).prop_flat_map(|size| {
            (0..=size).prop_flat_map(move |offset| {
                (Just(size), Just(offset), proptest::collection::vec(any::<u8>(), 0..=size - offset))
            })
        }),
    ) {
        let (_mem, mut reg) = open(size);
        reg.write(offset, &bytes).unwrap();
        prop_assert_eq!(reg.read(offset, bytes.len()).unwrap(), bytes);
    }

    #[test]
    fn zero_length_reads_never_fail_within_size(size in 1usize..=WINDOW, frac in 0.0f64..=1.0) {
        let (_mem, mut reg) = open(size);
        let offset = ((size as f64) * frac) as usize;
        prop_assert!(reg.read(offset.min(size), 0).unwrap().is_empty());
    }

    #[test]
    fn closed_register_rejects_every_offset(offset in any::<usize>()) {
        let (_mem, mut reg) = open(16);
        reg.close();
        prop_assert!(
            matches!(reg.read8(offset), Err(AccessError::NotOpen { .. })),
            "read8 at {offset:#x} on closed register",
        );
        prop_assert!(
            matches!(reg.write32(offset, 0), Err(AccessError::NotOpen { .. })),
            "write32 at {offset:#x} on closed register",
        );
    }
}
