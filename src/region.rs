use crate::error::Error;
use crate::platform::Platform;
use crate::raw::{CONFIG_RECORD_SIZE, SAMPLE_RECORD_SIZE};
use core::ops::Range;

/// Pages in front of the data region: config, planned reset marker, wake state.
const AUX_PAGES: u32 = 3;

/// Static address contract of the log. Every region starts and ends on an erase unit boundary:
///
/// ```text
/// base                                                              end
/// | config | planned reset marker | wake state | data 0 | ... | data n-1 |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegionMap {
    base: u32,
    erase_size: u32,
    data_pages: u32,
}

impl RegionMap {
    /// Lays out the regions starting at `base` for a flash of type `T` with `flash_capacity`
    /// bytes, e.g. `RegionMap::new::<Flash>(0x3000, 8, flash.capacity())`.
    pub fn new<T: Platform>(
        base: u32,
        data_pages: u32,
        flash_capacity: usize,
    ) -> Result<Self, Error> {
        if !T::ERASE_SIZE.is_multiple_of(SAMPLE_RECORD_SIZE)
            || !SAMPLE_RECORD_SIZE.is_multiple_of(T::WRITE_SIZE)
            || !SAMPLE_RECORD_SIZE.is_multiple_of(T::READ_SIZE)
            || T::ERASE_SIZE < CONFIG_RECORD_SIZE
        {
            return Err(Error::UnsupportedGeometry);
        }

        let erase_size = u32::try_from(T::ERASE_SIZE).map_err(|_| Error::UnsupportedGeometry)?;
        if !base.is_multiple_of(erase_size) {
            return Err(Error::InvalidRegionOffset);
        }

        if data_pages == 0 {
            return Err(Error::InvalidRegionSize);
        }

        let end = (AUX_PAGES as u64 + data_pages as u64) * erase_size as u64 + base as u64;
        if end > flash_capacity as u64 || end > u32::MAX as u64 {
            return Err(Error::InvalidRegionSize);
        }

        Ok(Self {
            base,
            erase_size,
            data_pages,
        })
    }

    fn page(&self, index: u32) -> Range<u32> {
        let start = self.base + index * self.erase_size;
        start..start + self.erase_size
    }

    pub fn erase_size(&self) -> u32 {
        self.erase_size
    }

    pub fn config(&self) -> Range<u32> {
        self.page(0)
    }

    pub fn planned_reset(&self) -> Range<u32> {
        self.page(1)
    }

    /// Watchdog expiries left and the number of the sample slot they count down to.
    pub fn wake_state(&self) -> Range<u32> {
        self.page(2)
    }

    pub fn data(&self) -> Range<u32> {
        let start = self.page(AUX_PAGES).start;
        start..start + self.data_pages * self.erase_size
    }

    pub fn data_pages(&self) -> u32 {
        self.data_pages
    }

    /// Everything the log owns, from the config page to the end of the data region.
    pub fn all(&self) -> Range<u32> {
        self.base..self.data().end
    }

    /// Number of sample records the data region holds.
    pub fn sample_capacity(&self) -> u32 {
        (self.data_pages * self.erase_size) / SAMPLE_RECORD_SIZE as u32
    }

    pub(crate) fn sample_address(&self, index: u32) -> u32 {
        self.data().start + index * SAMPLE_RECORD_SIZE as u32
    }

    /// The erase unit holding the record at `index`, if the record is the first one in it.
    pub(crate) fn fresh_page_at(&self, index: u32) -> Option<Range<u32>> {
        let address = self.sample_address(index);
        let offset = address - self.data().start;
        offset.is_multiple_of(self.erase_size).then(|| {
            let page = offset / self.erase_size;
            self.page(AUX_PAGES + page)
        })
    }
}
