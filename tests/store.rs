mod common;

fn sample(index: u32) -> flashlog::Sample {
    flashlog::Sample {
        elapsed_seconds: (index + 1) * common::INTERVAL,
        value: 20.0 + (index % 50) as f32 * 0.25,
        aux: (index % 3 == 0).then_some((index % 256) as u8),
    }
}

mod recover {
    use crate::common;
    use crate::sample;
    use flashlog::raw::{SAMPLE_RECORD_SIZE, encode_sample};
    use flashlog::store::LogStore;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty() {
        let (mut flash, regions) = common::flash_with_regions(2);
        let mut store = LogStore::new(&mut flash, regions);

        assert_eq!(store.recover_index().unwrap(), 0);
        assert_eq!(store.read_all().count(), 0);
    }

    #[test]
    fn counts_appended_records() {
        for n in [1, 2, 255, 256, 257, 300] {
            let (mut flash, regions) = common::flash_with_regions(2);

            let mut store = LogStore::new(&mut flash, regions);
            store.recover_index().unwrap();
            for i in 0..n {
                store.append(&sample(i)).unwrap();
            }
            assert_eq!(store.index(), n);

            let mut store = LogStore::new(&mut flash, regions);
            assert_eq!(store.recover_index().unwrap(), n, "after {n} appends");
        }
    }

    #[test]
    fn is_idempotent() {
        let (mut flash, regions) = common::flash_with_regions(1);
        let mut store = LogStore::new(&mut flash, regions);
        store.recover_index().unwrap();
        for i in 0..7 {
            store.append(&sample(i)).unwrap();
        }

        let mut store = LogStore::new(&mut flash, regions);
        assert_eq!(store.recover_index().unwrap(), 7);
        assert_eq!(store.recover_index().unwrap(), 7);
    }

    #[test]
    fn stops_at_implausible_record() {
        let (mut flash, regions) = common::flash_with_regions(1);
        let mut store = LogStore::new(&mut flash, regions);
        store.recover_index().unwrap();
        for i in 0..5 {
            store.append(&sample(i)).unwrap();
        }

        // garbage in the middle of the log hides everything behind it
        let mut garbage = sample(2);
        garbage.value = 250.0;
        let offset = regions.data().start as usize + 2 * SAMPLE_RECORD_SIZE;
        flash.buf[offset..offset + SAMPLE_RECORD_SIZE].copy_from_slice(&encode_sample(&garbage));

        let mut store = LogStore::new(&mut flash, regions);
        assert_eq!(store.recover_index().unwrap(), 2);
    }

    #[test]
    fn stops_at_torn_record() {
        let (mut flash, regions) = common::flash_with_regions(1);
        let mut store = LogStore::new(&mut flash, regions);
        store.recover_index().unwrap();
        for i in 0..4 {
            store.append(&sample(i)).unwrap();
        }

        // only the timestamp of the last record made it to flash
        let offset = regions.data().start as usize + 3 * SAMPLE_RECORD_SIZE;
        flash.buf[offset + 4..offset + SAMPLE_RECORD_SIZE].fill(0xFF);

        let mut store = LogStore::new(&mut flash, regions);
        assert_eq!(store.recover_index().unwrap(), 3);
    }
}

mod append {
    use crate::common::{self, Operation};
    use crate::sample;
    use flashlog::error::Error;
    use flashlog::raw::{SAMPLE_RECORD_SIZE, Sample, encode_sample};
    use flashlog::store::LogStore;
    use pretty_assertions::assert_eq;

    #[test]
    fn read_back_in_order() {
        let (mut flash, regions) = common::flash_with_regions(1);
        let mut store = LogStore::new(&mut flash, regions);
        store.recover_index().unwrap();

        let written: Vec<Sample> = (0..10).map(sample).collect();
        for s in &written {
            store.append(s).unwrap();
        }

        let mut store = LogStore::new(&mut flash, regions);
        store.recover_index().unwrap();
        let read: Vec<Sample> = store.read_all().map(Result::unwrap).collect();
        assert_eq!(read, written);
    }

    #[test]
    fn until_full() {
        let (mut flash, regions) = common::flash_with_regions(1);
        let mut store = LogStore::new(&mut flash, regions);
        store.recover_index().unwrap();

        let capacity = store.capacity();
        assert_eq!(capacity, common::SAMPLES_PER_PAGE);
        for i in 0..capacity {
            store.append(&sample(i)).unwrap();
        }
        assert!(store.is_full());

        assert_eq!(store.append(&sample(capacity)), Err(Error::OutOfSpace));
        assert_eq!(store.index(), capacity);
        assert_eq!(store.read_all().count(), capacity as usize);

        let mut store = LogStore::new(&mut flash, regions);
        assert_eq!(store.recover_index().unwrap(), capacity);
    }

    #[test]
    fn erases_each_page_before_its_first_record() {
        let (mut flash, regions) = common::flash_with_regions(2);
        let data = regions.data().start;

        let mut store = LogStore::new(&mut flash, regions);
        store.recover_index().unwrap();
        for i in 0..common::SAMPLES_PER_PAGE + 1 {
            store.append(&sample(i)).unwrap();
        }

        assert_eq!(
            flash.erases(),
            vec![
                Operation::Erase {
                    offset: data,
                    len: common::FLASH_SECTOR_SIZE
                },
                Operation::Erase {
                    offset: data + common::FLASH_SECTOR_SIZE as u32,
                    len: common::FLASH_SECTOR_SIZE
                },
            ]
        );
    }

    #[test]
    fn stale_page_is_erased() {
        let (mut flash, regions) = common::flash_with_regions(1);
        let data = regions.data().start as usize;
        // leftovers of an earlier session that were not erased
        flash.buf[data + SAMPLE_RECORD_SIZE..data + 2 * SAMPLE_RECORD_SIZE]
            .copy_from_slice(&encode_sample(&sample(40)));

        let mut store = LogStore::new(&mut flash, regions);
        assert_eq!(store.recover_index().unwrap(), 0);
        store.append(&sample(0)).unwrap();

        let mut store = LogStore::new(&mut flash, regions);
        assert_eq!(store.recover_index().unwrap(), 1);
    }

    #[test]
    fn flash_fault_keeps_index() {
        let (_, regions) = common::flash_with_regions(1);
        // recovery reads one slot, the first append erases, writes and reads back
        let mut flash = common::Flash::new_with_fault(common::AUX_PAGES + 1, 4);

        let mut store = LogStore::new(&mut flash, regions);
        store.recover_index().unwrap();
        store.append(&sample(0)).unwrap();
        assert_eq!(store.append(&sample(1)), Err(Error::FlashError));
        assert_eq!(store.index(), 1);

        flash.disable_faults();
        let mut store = LogStore::new(&mut flash, regions);
        assert_eq!(store.recover_index().unwrap(), 1);
    }

    #[test]
    fn verify_detects_programmed_slot() {
        let (mut flash, regions) = common::flash_with_regions(1);
        let mut store = LogStore::new(&mut flash, regions);
        store.recover_index().unwrap();
        store.append(&sample(0)).unwrap();

        let mut stale = sample(1);
        stale.elapsed_seconds = 0;
        stale.value = 1000.0;
        let offset = regions.data().start as usize + SAMPLE_RECORD_SIZE;
        flash.buf[offset..offset + SAMPLE_RECORD_SIZE].copy_from_slice(&encode_sample(&stale));

        let mut store = LogStore::new(&mut flash, regions);
        assert_eq!(store.recover_index().unwrap(), 1);
        assert_eq!(store.append(&sample(1)), Err(Error::VerifyFailed));
        assert_eq!(store.index(), 1);
    }
}

mod reset {
    use crate::common::{self, Operation};
    use crate::sample;
    use flashlog::store::LogStore;
    use pretty_assertions::assert_eq;

    #[test]
    fn erases_everything() {
        let (mut flash, regions) = common::flash_with_regions(2);
        let mut store = LogStore::new(&mut flash, regions);
        store.recover_index().unwrap();
        for i in 0..20 {
            store.append(&sample(i)).unwrap();
        }
        store.reset().unwrap();
        assert_eq!(store.index(), 0);

        assert!(flash.buf.iter().all(|&b| b == 0xFF));
        assert_eq!(
            flash.erases().last(),
            Some(&Operation::Erase {
                offset: 0,
                len: (common::AUX_PAGES + 2) * common::FLASH_SECTOR_SIZE
            })
        );

        let mut store = LogStore::new(&mut flash, regions);
        assert_eq!(store.recover_index().unwrap(), 0);
    }
}
