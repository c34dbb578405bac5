// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Bitmap-compressed update payloads.
//!
//! An update capsule carries the new firmware as a PBC ("page bitmap
//! compression") structure, which describes a flash image one 4 KiB page at
//! a time:
//! ```ignore
//! struct Pbc {
//!     tag: u32, // 0x5F504243
//!     version: u32, // 2
//!     page_size: u32, // 0x1000
//!     pattern_size: u32, // 1
//!     pattern: u32, // 0xff
//!     bitmap_nbit: u32, // A multiple of 8.
//!     payload_len: u32,
//!     _: [u32; 25],
//!
//!     active_bitmap: [u8; bitmap_nbit / 8],
//!     compression_bitmap: [u8; bitmap_nbit / 8],
//!     payload: [u8; payload_len],
//! }
//! ```
//!
//! Bit `n` of a bitmap describes page `n` of the flash device; bits are
//! taken most significant first within each byte. A page marked in the
//! active bitmap is erased. A page marked in the compression bitmap is
//! programmed with the next page of the payload; the payload holds exactly
//! one page per marked bit, in page order.
//!
//! A capsule is a signed payload whose content is the signed PFM, then the
//! signed FVMs it names at the same offsets they occupy on active flash,
//! then the PBC.

use static_assertions::assert_eq_size;
use zerocopy::AsBytes;
use zerocopy::FromBytes;

use crate::hardware::flash;
use crate::hardware::flash::Flash;
use crate::hardware::flash::FlashExt as _;
use crate::hardware::flash::Ptr;
use crate::hardware::flash::Region;
use crate::hardware::Watchdog;
use crate::io;
use crate::io::PageBits;
use crate::keychain;
use crate::keychain::block::SIGNATURE_LEN;
use crate::manifest;
use crate::manifest::def::FvmAddr;
use crate::manifest::def::Protection;
use crate::manifest::def::SpiRegion;
use crate::manifest::Definition;
use crate::manifest::Definitions;
use crate::manifest::Tag;
use crate::provision::Layout;
use crate::Result;

#[cfg(feature = "std")]
pub mod owned;

/// The length of a PBC header.
pub const HEADER_LEN: u32 = 128;

/// The tag that opens a PBC header.
pub const TAG: u32 = 0x5F504243;

/// The only supported PBC version.
pub const VERSION: u32 = 2;

/// The size of the page each bitmap bit describes.
pub const PAGE_SIZE: u32 = 0x1000;

/// The only supported erase-pattern size.
pub const PATTERN_SIZE: u32 = 1;

/// The only supported erase pattern.
pub const PATTERN: u32 = 0xff;

/// The length of the active PFM area, which a static recovery rewrites
/// with the capsule's signed PFM and FVMs.
pub const PFM_AREA_LEN: u32 = 0x10000;

/// Errors returned while decompressing an update.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Indicates a PBC header with a bad tag, an unsupported format, or
    /// sizes that do not fit in the address space.
    BadHeader,

    /// Indicates that a region, or the payload page for it, lies outside
    /// what the structure describes.
    OutOfBounds,

    /// Indicates that a flash operation failed.
    Flash,

    /// Indicates a failure decoding a bitmap.
    Io(io::Error),

    /// Indicates that a manifest in the capsule was malformed.
    Manifest(manifest::Error),
}

impl From<manifest::Error> for Error {
    fn from(e: manifest::Error) -> Self {
        match e {
            manifest::Error::Flash => Self::Flash,
            e => Self::Manifest(e),
        }
    }
}

impl From<keychain::Error> for Error {
    fn from(e: keychain::Error) -> Self {
        manifest::Error::from(e).into()
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<flash::Error> for Error {
    fn from(_: flash::Error) -> Self {
        Self::Flash
    }
}

debug_from!(Error => manifest::Error, keychain::Error, io::Error);
debug_from!(@plain Error => flash::Error);

/// The header of a PBC.
#[derive(Copy, Clone, Debug, Default, AsBytes, FromBytes)]
#[repr(C)]
pub struct Header {
    /// [`TAG`].
    pub tag: u32,
    /// [`VERSION`].
    pub version: u32,
    /// [`PAGE_SIZE`].
    pub page_size: u32,
    /// [`PATTERN_SIZE`].
    pub pattern_size: u32,
    /// [`PATTERN`].
    pub pattern: u32,
    /// The number of pages each bitmap describes.
    pub bitmap_nbit: u32,
    /// The length of the payload.
    pub payload_len: u32,
    /// Reserved.
    pub reserved: [u32; 25],
}
assert_eq_size!(Header, [u8; HEADER_LEN as usize]);

/// A validated PBC on flash.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PbcCursor {
    addr: u32,
    pages: u32,
    payload: Region,
    manifests: Region,
}

impl PbcCursor {
    /// Reads and validates the PBC header at `addr`.
    pub fn read<F: Flash + ?Sized>(flash: &F, addr: u32) -> Result<Self, Error> {
        let header = flash.read_object::<Header>(Ptr::new(addr))?;
        check!(
            header.tag == TAG
                && header.version == VERSION
                && header.page_size == PAGE_SIZE
                && header.pattern_size == PATTERN_SIZE
                && header.pattern == PATTERN,
            Error::BadHeader
        );
        check!(header.bitmap_nbit % 8 == 0, Error::BadHeader);

        let bitmaps = 2 * (header.bitmap_nbit / 8);
        let payload = match addr
            .checked_add(HEADER_LEN)
            .and_then(|a| a.checked_add(bitmaps))
        {
            Some(payload) => Region::new(payload, header.payload_len),
            None => return fail!(Error::BadHeader),
        };
        check!(payload.end().is_some(), Error::BadHeader);

        Ok(Self {
            addr,
            pages: header.bitmap_nbit,
            payload,
            manifests: Region::new(addr, 0),
        })
    }

    /// Finds and validates the PBC in the capsule at `capsule`.
    ///
    /// `active` is the provisioned address of the device's active PFM; the
    /// capsule's FVMs sit at their active-flash offsets from it, and the
    /// PBC follows the last of them.
    pub fn locate<F: Flash + ?Sized>(
        flash: &F,
        capsule: u32,
        active: u32,
    ) -> Result<Self, Error> {
        let signed_pfm = match capsule.checked_add(SIGNATURE_LEN) {
            Some(addr) => addr,
            None => return fail!(Error::OutOfBounds),
        };
        let (_, body) = manifest::read_header(flash, signed_pfm, Tag::Pfm)?;

        let mut last_fvm: Option<FvmAddr> = None;
        manifest::for_each_definition(flash, body, |def| {
            if let Definition::FvmAddr(fvm) = def {
                if last_fvm.map_or(true, |last| fvm.fvm_addr > last.fvm_addr) {
                    last_fvm = Some(fvm);
                }
            }
            Ok(())
        })?;

        let last = match last_fvm {
            Some(fvm) => match fvm.in_capsule(signed_pfm, active) {
                Some(addr) => addr,
                None => return fail!(Error::OutOfBounds),
            },
            None => signed_pfm,
        };
        let addr = match last
            .checked_add(keychain::signed_payload_size(flash, last)?)
        {
            Some(addr) => addr,
            None => return fail!(Error::OutOfBounds),
        };
        trace!("capsule at {:#x} has its PBC at {:#x}", capsule, addr);

        let mut cursor = Self::read(flash, addr)?;
        cursor.manifests = Region::new(signed_pfm, addr - signed_pfm);
        Ok(cursor)
    }

    /// Returns the address of the PBC header.
    pub fn addr(&self) -> u32 {
        self.addr
    }

    /// Returns the number of pages the bitmaps describe.
    pub fn pages(&self) -> u32 {
        self.pages
    }

    /// Returns the address of the active (erase) bitmap.
    pub fn active_bitmap(&self) -> u32 {
        self.addr + HEADER_LEN
    }

    /// Returns the address of the compression (program) bitmap.
    pub fn compression_bitmap(&self) -> u32 {
        self.active_bitmap() + self.pages / 8
    }

    /// Returns the payload pages.
    pub fn payload(&self) -> Region {
        self.payload
    }

    /// Returns the signed PFM and FVMs that precede this PBC in its
    /// capsule; this is empty if the cursor was not found with
    /// [`PbcCursor::locate()`].
    pub fn manifests(&self) -> Region {
        self.manifests
    }
}

/// Which SPI regions a capsule decompression rewrites.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Scope {
    /// Read-only regions, plus the active PFM area.
    Static,
    /// Read-write regions, except the staging area.
    Dynamic,
    /// Both of the above.
    Both,
}

impl Scope {
    fn includes_static(self) -> bool {
        self != Self::Dynamic
    }

    fn includes_dynamic(self) -> bool {
        self != Self::Static
    }
}

/// Returns the flash span of pages `[first, last)`.
fn pages(first: u32, last: u32) -> Region {
    Region::new(first * PAGE_SIZE, (last - first) * PAGE_SIZE)
}

/// Reads the bits of the bitmap at `bitmap` from `page` up to the end of
/// that page's byte.
fn bitmap_bits<F: Flash + ?Sized>(
    flash: &F,
    bitmap: u32,
    page: u32,
) -> Result<PageBits, Error> {
    let mut byte = [0];
    flash.read(Ptr::new(bitmap + page / 8), &mut byte)?;
    let mut bits = PageBits::from_byte(byte[0]);
    bits.skip((page % 8) as usize)?;
    Ok(bits)
}

/// Applies PBC payloads to flash.
///
/// The watchdog is kicked once per bitmap byte, which is every eight pages.
pub struct Patcher<'w> {
    watchdog: &'w mut dyn Watchdog,
}

impl<'w> Patcher<'w> {
    /// Creates a new `Patcher`.
    pub fn new(watchdog: &'w mut dyn Watchdog) -> Self {
        Self { watchdog }
    }

    /// Rewrites the pages of `region` described by the PBC at `cursor`.
    ///
    /// Marked pages of the active bitmap are erased first. Then the
    /// compression bitmap is walked from page zero, so that the payload
    /// position can be counted; marked pages inside `region` are programmed
    /// from the payload.
    ///
    /// Only whole pages are rewritten. A failed erase or program stops the
    /// patch immediately, leaving the region partially written.
    pub fn patch_region<F: Flash + ?Sized>(
        &mut self,
        flash: &mut F,
        cursor: &PbcCursor,
        region: Region,
    ) -> Result<(), Error> {
        let end = match region.end() {
            Some(end) => end,
            None => return fail!(Error::OutOfBounds),
        };
        let first = region.ptr.address / PAGE_SIZE;
        let last = end / PAGE_SIZE;
        check!(last <= cursor.pages, Error::OutOfBounds);
        trace!("patching [{:#x}, {:#x})", region.ptr.address, end);

        self.erase_pass(flash, cursor, first, last)?;
        self.copy_pass(flash, cursor, first, last)
    }

    fn erase_pass<F: Flash + ?Sized>(
        &mut self,
        flash: &mut F,
        cursor: &PbcCursor,
        first: u32,
        last: u32,
    ) -> Result<(), Error> {
        let mut bits = PageBits::new();
        let mut run = None;
        for page in first..last {
            if bits.is_empty() {
                bits = bitmap_bits(&*flash, cursor.active_bitmap(), page)?;
            }
            match (bits.next_page()?, run) {
                (true, None) => run = Some(page),
                (false, Some(start)) => {
                    flash.erase_region(pages(start, page))?;
                    run = None;
                }
                _ => {}
            }
            if bits.is_empty() {
                self.watchdog.kick();
            }
        }
        if let Some(start) = run {
            flash.erase_region(pages(start, last))?;
        }
        Ok(())
    }

    fn copy_pass<F: Flash + ?Sized>(
        &mut self,
        flash: &mut F,
        cursor: &PbcCursor,
        first: u32,
        last: u32,
    ) -> Result<(), Error> {
        let payload_end = cursor.payload.ptr.address + cursor.payload.len;
        let mut src = cursor.payload.ptr.address;

        // Whole bitmap bytes are walked; `pages` is a multiple of eight, so
        // this never leaves the bitmap.
        let limit = (last + 7) / 8 * 8;
        let mut bits = PageBits::new();
        for page in 0..limit {
            if bits.is_empty() {
                bits = bitmap_bits(&*flash, cursor.compression_bitmap(), page)?;
            }
            if bits.next_page()? {
                if (first..last).contains(&page) {
                    check!(
                        payload_end - src.min(payload_end) >= PAGE_SIZE,
                        Error::OutOfBounds
                    );
                    flash.copy_within(
                        Ptr::new(src),
                        Ptr::new(page * PAGE_SIZE),
                        PAGE_SIZE,
                    )?;
                }
                src = src.saturating_add(PAGE_SIZE);
            }
            if bits.is_empty() {
                self.watchdog.kick();
            }
        }
        Ok(())
    }

    /// Erases the active PFM area and copies the capsule's signed PFM and
    /// FVMs into it.
    fn rewrite_manifests<F: Flash + ?Sized>(
        &mut self,
        flash: &mut F,
        cursor: &PbcCursor,
        active: u32,
    ) -> Result<(), Error> {
        let manifests = cursor.manifests;
        check!(manifests.len <= PFM_AREA_LEN, Error::OutOfBounds);
        info!("rewriting the active PFM at {:#x}", active);

        flash.erase_region(Region::new(active, PFM_AREA_LEN))?;
        let mut offset = 0;
        while offset < manifests.len {
            let len = PAGE_SIZE.min(manifests.len - offset);
            flash.copy_within(
                Ptr::new(manifests.ptr.address + offset),
                Ptr::new(active + offset),
                len,
            )?;
            self.watchdog.kick();
            offset += len;
        }
        Ok(())
    }

    /// Patches every SPI region in `body`, and in the FVMs it names, for
    /// which `wanted` returns true.
    ///
    /// Regions are visited in manifest order. Inside an FVM, anything other
    /// than a SPI region or a capability ends that FVM's walk.
    fn walk<F, P>(
        &mut self,
        flash: &mut F,
        cursor: &PbcCursor,
        active: u32,
        body: Region,
        in_fvm: bool,
        wanted: &mut P,
    ) -> Result<(), Error>
    where
        F: Flash + ?Sized,
        P: FnMut(&SpiRegion) -> bool,
    {
        let mut rest = body;
        loop {
            // The cursor borrows `flash`, so it is rebuilt after every
            // definition.
            let def = {
                let mut defs = Definitions::new(&*flash, rest);
                let def = defs.read_next()?;
                rest = defs.remaining();
                def
            };

            match def {
                None => break,
                Some(Definition::SpiRegion(r)) => {
                    if wanted(&r) {
                        self.patch_region(flash, cursor, r.region)?;
                    }
                }
                Some(Definition::Capability) => {}
                Some(Definition::SmbusRule(_)) if !in_fvm => {}
                Some(Definition::FvmAddr(fvm)) if !in_fvm => {
                    let signed_pfm = cursor.manifests.ptr.address;
                    let addr = match fvm.in_capsule(signed_pfm, active) {
                        Some(addr) => addr,
                        None => return fail!(Error::OutOfBounds),
                    };
                    let (_, fvm_body) =
                        manifest::read_fvm_header(&*flash, addr)?;
                    self.walk(flash, cursor, active, fvm_body, true, wanted)?;
                }
                Some(_) => break,
            }
        }
        Ok(())
    }
}

/// Decompresses the capsule at `capsule` onto the device described by
/// `layout`.
///
/// The capsule must already have been authenticated, and the device
/// selected. Dynamic regions that start at the staging area are never
/// rewritten. If `scope` includes static regions, the active PFM area is
/// also replaced with the capsule's signed PFM and FVMs.
pub fn decompress_capsule<F: Flash + ?Sized>(
    flash: &mut F,
    capsule: u32,
    layout: &Layout,
    scope: Scope,
    watchdog: &mut dyn Watchdog,
) -> Result<(), Error> {
    info!("decompressing capsule at {:#x} ({:?})", capsule, scope);
    let cursor = PbcCursor::locate(&*flash, capsule, layout.active)?;
    let (_, body) =
        manifest::read_header(&*flash, cursor.manifests.ptr.address, Tag::Pfm)?;

    let staging = layout.staging;
    let mut wanted = |r: &SpiRegion| {
        (scope.includes_static() && r.is_static())
            || (scope.includes_dynamic()
                && r.is_dynamic()
                && r.region.ptr.address != staging)
    };

    let mut patcher = Patcher::new(watchdog);
    patcher.walk(flash, &cursor, layout.active, body, false, &mut wanted)?;
    if scope.includes_static() {
        patcher.rewrite_manifests(flash, &cursor, layout.active)?;
    }
    Ok(())
}

/// Decompresses, from the capsule at `capsule`, the dynamic regions marked
/// for watchdog recovery at `level` (one of 1, 2, or 3).
///
/// Returns whether any static region is marked for watchdog recovery at
/// any level; static regions are not rewritten here, since doing so also
/// requires rewriting the active PFM (see [`decompress_capsule()`]). Any
/// other `level` is an [`Error::OutOfBounds`].
pub fn decompress_region_by_level<F: Flash + ?Sized>(
    flash: &mut F,
    capsule: u32,
    layout: &Layout,
    level: u8,
    watchdog: &mut dyn Watchdog,
) -> Result<bool, Error> {
    let bit = match Protection::recovery_level(level) {
        Some(bit) => bit,
        None => return fail!(Error::OutOfBounds),
    };
    info!("watchdog recovery at level {} from {:#x}", level, capsule);
    let cursor = PbcCursor::locate(&*flash, capsule, layout.active)?;
    let (_, body) =
        manifest::read_header(&*flash, cursor.manifests.ptr.address, Tag::Pfm)?;

    let any_level = Protection::RecoveryLevel1
        | Protection::RecoveryLevel2
        | Protection::RecoveryLevel3;
    let mut needs_static = false;
    let mut wanted = |r: &SpiRegion| {
        if r.is_static() && r.protection.intersects(any_level) {
            needs_static = true;
        }
        r.is_dynamic() && r.protection.contains(bit)
    };

    let mut patcher = Patcher::new(watchdog);
    patcher.walk(flash, &cursor, layout.active, body, false, &mut wanted)?;
    Ok(needs_static)
}
