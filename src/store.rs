use crate::error::Error;
use crate::platform::{AlignedOps, Platform};
use crate::raw::{
    CONFIG_RECORD_SIZE, ConfigRecord, SAMPLE_RECORD_SIZE, Sample, decode_config, decode_sample,
    encode_config, encode_sample,
};
use crate::region::RegionMap;
use core::ops::Range;
#[cfg(feature = "defmt")]
use defmt::{trace, warn};

/// Largest chunk that is ever read or written in one go. Big enough for the config record
/// rounded up to any read/write granularity `RegionMap` accepts.
const SCRATCH_SIZE: usize = 64;

/// Value of the planned reset marker word. Anything else, including erased flash, means the
/// next reset is not planned.
pub(crate) const PLANNED_RESET_MAGIC: u32 = 0x504C_414E;

const ERASED_WORD: u32 = u32::MAX;

/// Append-only sample log on raw flash pages. The only persisted notion of "how far did we get"
/// is the data itself: after a reset, [`LogStore::recover_index`] scans for the first slot that
/// does not hold a plausible record.
pub struct LogStore<T: Platform> {
    pub(crate) hal: T,
    regions: RegionMap,
    index: u32,
}

impl<T: Platform> LogStore<T> {
    /// Wraps the flash without touching it. Call [`LogStore::recover_index`] before appending.
    pub fn new(hal: T, regions: RegionMap) -> Self {
        Self {
            hal,
            regions,
            index: 0,
        }
    }

    pub fn regions(&self) -> &RegionMap {
        &self.regions
    }

    /// Number of records written so far.
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn capacity(&self) -> u32 {
        self.regions.sample_capacity()
    }

    pub fn is_full(&self) -> bool {
        self.index >= self.capacity()
    }

    /// Gives back the flash, e.g. to simulate a reset.
    pub fn release(self) -> T {
        self.hal
    }

    /// Counts the valid leading records of the data region and resumes appending after them.
    /// Scanning an unmodified region always yields the same result.
    pub fn recover_index(&mut self) -> Result<u32, Error> {
        let capacity = self.capacity();
        let mut index = 0;
        while index < capacity {
            let sample = self.load_sample(index)?;
            if !sample.is_plausible() {
                break;
            }
            index += 1;
        }

        #[cfg(feature = "defmt")]
        trace!("recover_index: {} of {}", index, capacity);

        self.index = index;
        Ok(index)
    }

    /// Writes the sample into the next free slot. The erase unit a record starts is erased
    /// first. Fails with [`Error::OutOfSpace`] once the data region is full, leaving the index
    /// untouched.
    pub fn append(&mut self, sample: &Sample) -> Result<(), Error> {
        if self.is_full() {
            return Err(Error::OutOfSpace);
        }

        let address = self.regions.sample_address(self.index);
        let fresh_page = self.regions.fresh_page_at(self.index);
        let raw = encode_sample(sample);

        #[cfg(feature = "defmt")]
        trace!("append: #{} @{:#08x}", self.index, address);

        critical_section::with(|_| {
            if let Some(page) = fresh_page {
                erase(&mut self.hal, page)?;
            }
            program_verified(&mut self.hal, address, &raw)
        })?;

        self.index += 1;
        Ok(())
    }

    /// Records in address order, bounded by the recovered index.
    pub fn read_all(&mut self) -> Samples<'_, T> {
        let end = self.index;
        Samples {
            store: self,
            next: 0,
            end,
        }
    }

    /// Erases the config page, both scheduling words and the complete data region.
    pub fn reset(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("reset: {:#08x}..{:#08x}", self.regions.all().start, self.regions.all().end);

        let all = self.regions.all();
        critical_section::with(|_| erase(&mut self.hal, all))?;
        self.index = 0;
        Ok(())
    }

    /// The most recent record, `None` for an empty log.
    pub fn last(&mut self) -> Result<Option<Sample>, Error> {
        match self.index.checked_sub(1) {
            Some(index) => self.load_sample(index).map(Some),
            None => Ok(None),
        }
    }

    fn load_sample(&mut self, index: u32) -> Result<Sample, Error> {
        let mut buf = [0u8; SAMPLE_RECORD_SIZE];
        read(&mut self.hal, self.regions.sample_address(index), &mut buf)?;
        Ok(decode_sample(&buf))
    }

    /// The stored config, or `None` if the page does not hold an intact record.
    pub(crate) fn load_config(&mut self) -> Result<Option<ConfigRecord>, Error> {
        let mut buf = [0u8; CONFIG_RECORD_SIZE];
        read(&mut self.hal, self.regions.config().start, &mut buf)?;
        Ok(decode_config(&buf))
    }

    /// Erase, program and read back. The caller only adopts `config` after this returns `Ok`.
    pub(crate) fn save_config(&mut self, config: &ConfigRecord) -> Result<(), Error> {
        let page = self.regions.config();
        let raw = encode_config(config);

        #[cfg(feature = "defmt")]
        trace!("save_config: mode {}", config.mode);

        critical_section::with(|_| {
            erase(&mut self.hal, page.clone())?;
            program_verified(&mut self.hal, page.start, &raw)
        })
    }

    pub(crate) fn load_word(&mut self, page: Range<u32>) -> Result<Option<u32>, Error> {
        let mut buf = [0u8; 4];
        read(&mut self.hal, page.start, &mut buf)?;
        let word = u32::from_le_bytes(buf);
        Ok((word != ERASED_WORD).then_some(word))
    }

    pub(crate) fn save_word(&mut self, page: Range<u32>, word: u32) -> Result<(), Error> {
        critical_section::with(|_| {
            erase(&mut self.hal, page.clone())?;
            program_verified(&mut self.hal, page.start, &word.to_le_bytes())
        })
    }

    /// Two consecutive words of one page, each `None` if erased.
    pub(crate) fn load_word_pair(
        &mut self,
        page: Range<u32>,
    ) -> Result<(Option<u32>, Option<u32>), Error> {
        let mut buf = [0u8; 8];
        read(&mut self.hal, page.start, &mut buf)?;
        let word = |bytes: &[u8]| {
            let word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            (word != ERASED_WORD).then_some(word)
        };
        Ok((word(&buf[..4]), word(&buf[4..])))
    }

    pub(crate) fn save_word_pair(
        &mut self,
        page: Range<u32>,
        first: u32,
        second: u32,
    ) -> Result<(), Error> {
        let mut buf = [0u8; 8];
        buf[..4].copy_from_slice(&first.to_le_bytes());
        buf[4..].copy_from_slice(&second.to_le_bytes());
        critical_section::with(|_| {
            erase(&mut self.hal, page.clone())?;
            program_verified(&mut self.hal, page.start, &buf)
        })
    }

    pub(crate) fn clear_word(&mut self, page: Range<u32>) -> Result<(), Error> {
        critical_section::with(|_| erase(&mut self.hal, page))
    }
}

/// Iterator returned by [`LogStore::read_all`]. Ends after the recovered index even if more
/// plausible data follows, and after the first flash error.
pub struct Samples<'a, T: Platform> {
    store: &'a mut LogStore<T>,
    next: u32,
    end: u32,
}

impl<T: Platform> Iterator for Samples<'_, T> {
    type Item = Result<Sample, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }

        let result = self.store.load_sample(self.next);
        self.next = if result.is_ok() {
            self.next + 1
        } else {
            self.end
        };
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.end - self.next) as usize;
        (remaining, Some(remaining))
    }
}

fn erase<T: Platform>(hal: &mut T, range: Range<u32>) -> Result<(), Error> {
    hal.erase(range.start, range.end)
        .map_err(|_| Error::FlashError)
}

fn read<T: Platform>(hal: &mut T, offset: u32, bytes: &mut [u8]) -> Result<(), Error> {
    let mut scratch = [0u8; SCRATCH_SIZE];
    let aligned = &mut scratch[..T::align_read(bytes.len())];
    hal.read(offset, aligned).map_err(|_| Error::FlashError)?;
    bytes.copy_from_slice(&aligned[..bytes.len()]);
    Ok(())
}

/// Writes `bytes`, padding the tail up to the write granularity with the erased value.
fn write_aligned<T: Platform>(hal: &mut T, offset: u32, bytes: &[u8]) -> Result<(), Error> {
    if bytes.len().is_multiple_of(T::WRITE_SIZE) {
        return hal.write(offset, bytes).map_err(|_| Error::FlashError);
    }

    let pivot = T::align_write_floor(bytes.len());
    let (header, trailer) = bytes.split_at(pivot);
    if !header.is_empty() {
        hal.write(offset, header).map_err(|_| Error::FlashError)?;
    }

    let mut scratch = [0xFFu8; SCRATCH_SIZE];
    scratch[..trailer.len()].copy_from_slice(trailer);
    hal.write(offset + pivot as u32, &scratch[..T::WRITE_SIZE])
        .map_err(|_| Error::FlashError)
}

fn program_verified<T: Platform>(hal: &mut T, offset: u32, bytes: &[u8]) -> Result<(), Error> {
    write_aligned(hal, offset, bytes)?;

    let mut scratch = [0u8; SCRATCH_SIZE];
    let readback = &mut scratch[..bytes.len()];
    read(hal, offset, readback)?;
    if readback != bytes {
        #[cfg(feature = "defmt")]
        warn!("verify failed @{:#08x}", offset);
        return Err(Error::VerifyFailed);
    }
    Ok(())
}
