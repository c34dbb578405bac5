// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! The recovery matrix.
//!
//! Each flash device carries three copies of its firmware: the *active*
//! image the device boots, a signed *recovery* capsule, and a signed
//! *staging* capsule holding a pending update. An [`Orchestrator`] pass
//! decides which copies are authentic, rebuilds bad copies from good ones,
//! and records the outcome in the device's persistent [`TrustState`].
//!
//! Within a pass, every failure to authenticate or repair a copy simply
//! makes that copy invalid; the only errors a pass returns are failures to
//! persist its outcome.

use enumflags2::BitFlags;

use crate::crypto::ecdsa;
use crate::crypto::ecdsa::Curve;
use crate::crypto::hash;
use crate::hardware::flash;
use crate::hardware::flash::Flash;
use crate::hardware::flash::FlashExt as _;
use crate::hardware::flash::Ptr;
use crate::hardware::flash::Region;
use crate::hardware::nvm;
use crate::hardware::nvm::Nvm;
use crate::hardware::nvm::SvnFloor;
use crate::hardware::Device;
use crate::hardware::Filter;
use crate::hardware::Mux;
use crate::hardware::Watchdog;
use crate::keychain;
use crate::keychain::block::Block0;
use crate::keychain::block::SIGNATURE_LEN;
use crate::keychain::PcType;
use crate::keychain::Verifier;
use crate::manifest;
use crate::manifest::ManifestInfo;
use crate::manifest::Tag;
use crate::manifest::Validator;
use crate::pbc;
use crate::pbc::Scope;
use crate::provision::AfmLayout;
use crate::provision::Layout;
use crate::wire::WireEnum as _;
use crate::Result;

mod state;
pub use state::DeviceState;
pub use state::TrustState;

/// How many times a pair of copies is re-checked while both are invalid.
const AUTH_RETRIES: usize = 3;

/// The watchdog is kicked after copying this many bytes.
const COPY_CHUNK: u32 = 0x1000;

/// Errors returned by the explicit recovery operations.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Indicates that a copy failed authentication.
    Unauthenticated(keychain::Error),

    /// Indicates that an authentic manifest was malformed, or did not match
    /// the flash it describes.
    Manifest(manifest::Error),

    /// Indicates that decompressing a capsule failed.
    Pbc(pbc::Error),

    /// Indicates that a staged capsule does not carry the active PFM.
    StagedImageMismatch,

    /// Indicates that a payload does not fit where it would be copied.
    NoSpace,

    /// Indicates that a flash operation failed.
    Flash,

    /// Indicates that NVM could not be accessed.
    Nvm,
}

impl From<keychain::Error> for Error {
    fn from(e: keychain::Error) -> Self {
        match e {
            keychain::Error::Flash => Self::Flash,
            keychain::Error::Nvm => Self::Nvm,
            e => Self::Unauthenticated(e),
        }
    }
}

impl From<manifest::Error> for Error {
    fn from(e: manifest::Error) -> Self {
        match e {
            manifest::Error::Flash => Self::Flash,
            manifest::Error::Unauthenticated(e) => e.into(),
            e => Self::Manifest(e),
        }
    }
}

impl From<pbc::Error> for Error {
    fn from(e: pbc::Error) -> Self {
        match e {
            pbc::Error::Flash => Self::Flash,
            e => Self::Pbc(e),
        }
    }
}

impl From<flash::Error> for Error {
    fn from(_: flash::Error) -> Self {
        Self::Flash
    }
}

impl From<nvm::Error> for Error {
    fn from(_: nvm::Error) -> Self {
        Self::Nvm
    }
}

debug_from!(Error => keychain::Error, manifest::Error, pbc::Error);
debug_from!(@plain Error => flash::Error, nvm::Error);

/// Caller-controlled knobs for one authentication pass.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Request {
    /// Rebuild the active image from recovery even if it is authentic.
    pub force_recovery: bool,
}

/// The outcome of one authentication pass over a device.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Summary {
    /// The device's trust flags after the pass.
    pub state: BitFlags<TrustState>,
    /// Whether the active image ended the pass authentic.
    pub active_valid: bool,
    /// Whether the recovery capsule ended the pass authentic.
    pub recovery_valid: bool,
    /// The version of the active PFM, if it is authentic.
    pub active_info: Option<ManifestInfo>,
    /// The version of the recovery capsule's PFM, if it is authentic.
    pub recovery_info: Option<ManifestInfo>,
}

/// Options struct for initializing an [`Orchestrator`].
pub struct Options<'a, F: ?Sized, H, V, N> {
    /// The verifier used for every copy. Its key cancellation NVM also holds
    /// trust state and SVN floors.
    pub verifier: Verifier<'a, H, V, N>,
    /// The flash devices, behind their mux.
    pub flash: &'a mut F,
    /// The bus filters configured from each authentic active PFM.
    pub filters: &'a mut dyn Filter,
    /// The watchdog serviced during long erases and copies.
    pub watchdog: &'a mut dyn Watchdog,
}

/// Sequences authentication, retry, and repair across the copies of each
/// device's image.
pub struct Orchestrator<'a, F: ?Sized, H, V, N> {
    opts: Options<'a, F, H, V, N>,
}

impl<'a, F, H, V, N> Orchestrator<'a, F, H, V, N>
where
    F: Flash + Mux + ?Sized,
    H: hash::Engine,
    V: ecdsa::Verify,
    N: Nvm,
{
    /// Create a new `Orchestrator` with the given `Options`.
    pub fn new(opts: Options<'a, F, H, V, N>) -> Self {
        Self { opts }
    }

    /// Returns the verifier.
    pub fn verifier(&self) -> &Verifier<'a, H, V, N> {
        &self.opts.verifier
    }

    /// Returns the verifier, mutably; for example, to process a key
    /// cancellation certificate between passes.
    pub fn verifier_mut(&mut self) -> &mut Verifier<'a, H, V, N> {
        &mut self.opts.verifier
    }

    /// Returns the flash devices.
    pub fn flash(&self) -> &F {
        &*self.opts.flash
    }

    /// Loads the persistent state of `device`.
    pub fn device_state(&self, device: Device) -> Result<DeviceState, Error> {
        let base = self.opts.verifier.provisioning().nvm.trust_state;
        let nvm = self.opts.verifier.key_cancellation().nvm();
        Ok(DeviceState::load(nvm, base, device)?)
    }

    /// Overwrites the persistent state of `device`.
    ///
    /// Integrations use this to raise [`TrustState::RequireWdtRecovery`] or
    /// [`TrustState::HasPendingRecoveryUpdate`], and to reset the watchdog
    /// recovery count once a device boots cleanly.
    pub fn set_device_state(
        &mut self,
        device: Device,
        state: DeviceState,
    ) -> Result<(), Error> {
        let base = self.opts.verifier.provisioning().nvm.trust_state;
        let nvm = self.opts.verifier.key_cancellation_mut().nvm_mut();
        state.store(nvm, base, device)?;
        Ok(())
    }

    /// Authenticates the active, recovery, and staging copies of `device`'s
    /// image, repairing what can be repaired.
    ///
    /// A bad recovery capsule is replaced from staging; a bad active image
    /// (or any active image, if `request.force_recovery` is set) is rebuilt
    /// from recovery. If the device provisions an AFM pair and the pass left
    /// a bootable device, the AFM pair is checked the same way.
    ///
    /// The filters are configured from every authentic active PFM seen along
    /// the way.
    pub fn authenticate_and_recover(
        &mut self,
        device: Device,
        request: Request,
    ) -> Result<Summary, Error> {
        info!("authenticating {:?} flash", device);
        self.opts.flash.select(device);
        let layout = *self.opts.verifier.provisioning().layout(device);
        let capsule_type = PcType::capsule_for(device);

        let mut state = self.device_state(device)?;
        state.flags.remove(TrustState::auth_results());

        let mut active = None;
        let mut recovery = None;
        for _ in 0..=AUTH_RETRIES {
            self.opts.watchdog.kick();
            active = self.check_active(device, &layout).ok();
            recovery = self
                .check_capsule(layout.recovery, capsule_type, Tag::Pfm)
                .ok();
            if active.is_some() || recovery.is_some() {
                break;
            }
            warn!("no authentic {:?} image or recovery capsule", device);
        }

        if recovery.is_none() {
            let skip_hash_check = active.is_none();
            let promoted =
                self.promote_staging(device, &layout, skip_hash_check);
            recovery = match promoted {
                Ok(_) => self
                    .check_capsule(layout.recovery, capsule_type, Tag::Pfm)
                    .ok(),
                Err(_) => None,
            };
            if recovery.is_none() {
                state.flags |= if active.is_some() {
                    TrustState::RecoveryFailedAuth
                } else {
                    TrustState::AllRegionsFailedAuth
                };
            }
        }

        if recovery.is_some() && (active.is_none() || request.force_recovery) {
            info!("rebuilding active {:?} image from recovery", device);
            let opts = &mut self.opts;
            let rebuilt = pbc::decompress_capsule(
                &mut *opts.flash,
                layout.recovery,
                &layout,
                Scope::Both,
                &mut *opts.watchdog,
            );
            active = match rebuilt {
                Ok(()) => self.check_active(device, &layout).ok(),
                Err(_) => None,
            };
            if active.is_none() {
                state.flags |= TrustState::AllRegionsFailedAuth;
            }
        }

        if let Some(afm) = layout.afm {
            if !state.flags.intersects(TrustState::auth_results()) {
                self.authenticate_afm(&layout, afm, &mut state)?;
            }
        }

        self.set_device_state(device, state)?;
        Ok(Summary {
            state: state.flags,
            active_valid: active.is_some(),
            recovery_valid: recovery.is_some(),
            active_info: active,
            recovery_info: recovery,
        })
    }

    /// Promotes the staged capsule of `device` to recovery.
    ///
    /// Unless `skip_hash_check` is set, the capsule must carry the same PFM
    /// as the active image; that is, the active image must already have been
    /// updated from it. The device's SVN floor is raised to the capsule's.
    ///
    /// [`TrustState::HasPendingRecoveryUpdate`] is cleared whether or not the
    /// promotion succeeds, so a bad staged capsule is tried only once.
    pub fn recovery_update(
        &mut self,
        device: Device,
        skip_hash_check: bool,
    ) -> Result<(), Error> {
        self.opts.flash.select(device);
        let layout = *self.opts.verifier.provisioning().layout(device);
        let promoted = self.promote_staging(device, &layout, skip_hash_check);

        let mut state = self.device_state(device)?;
        state.flags.remove(TrustState::HasPendingRecoveryUpdate);
        self.set_device_state(device, state)?;
        promoted.map(|_| ())
    }

    /// Recovers `device` after its boot watchdog expired.
    ///
    /// Each call escalates: the first recovers the dynamic regions marked
    /// for recovery level 1, the second level 2, and the third level 3. If
    /// the PFM marks any static region for watchdog recovery, static regions
    /// are recovered too. Returns the level used, or `None` once all three
    /// have been tried; the count is reset through
    /// [`Orchestrator::set_device_state()`].
    pub fn wdt_recovery(
        &mut self,
        device: Device,
    ) -> Result<Option<u8>, Error> {
        self.opts.flash.select(device);
        let layout = *self.opts.verifier.provisioning().layout(device);
        let mut state = self.device_state(device)?;
        state.flags.remove(TrustState::RequireWdtRecovery);

        let level = match state.wdt_level() {
            Some(level) => level,
            None => {
                warn!("{:?} watchdog recovery levels exhausted", device);
                self.set_device_state(device, state)?;
                return Ok(None);
            }
        };

        let capsule_type = PcType::capsule_for(device);
        self.check_capsule(layout.recovery, capsule_type, Tag::Pfm)?;
        let opts = &mut self.opts;
        let needs_static = pbc::decompress_region_by_level(
            &mut *opts.flash,
            layout.recovery,
            &layout,
            level,
            &mut *opts.watchdog,
        )?;
        if needs_static {
            pbc::decompress_capsule(
                &mut *opts.flash,
                layout.recovery,
                &layout,
                Scope::Static,
                &mut *opts.watchdog,
            )?;
        }

        state.wdt_recoveries += 1;
        self.set_device_state(device, state)?;
        Ok(Some(level))
    }

    fn authenticate_afm(
        &mut self,
        layout: &Layout,
        afm: AfmLayout,
        state: &mut DeviceState,
    ) -> Result<(), Error> {
        state.flags.remove(TrustState::afm_auth_results());

        let mut active = None;
        let mut recovery = None;
        for _ in 0..=AUTH_RETRIES {
            self.opts.watchdog.kick();
            active = self.check_active_afm(afm.active).ok();
            recovery =
                self.check_capsule(afm.recovery, PcType::Afm, Tag::Afm).ok();
            if active.is_some() || recovery.is_some() {
                break;
            }
            warn!("no authentic AFM copy");
        }

        if recovery.is_none() {
            let current = active.map(|_| afm.active);
            let promoted = self.promote(
                layout.staging,
                afm.recovery,
                PcType::Afm,
                Tag::Afm,
                current,
                None,
            );
            recovery = match promoted {
                Ok(_) => {
                    self.check_capsule(afm.recovery, PcType::Afm, Tag::Afm).ok()
                }
                Err(_) => None,
            };
        }

        let recovery = match recovery {
            Some(info) => info,
            None => {
                state.flags |= TrustState::AfmRecoveryFailedAuth;
                if active.is_some() {
                    state.flags |= TrustState::ReadyForAttestation;
                }
                return Ok(());
            }
        };

        if active.is_none() {
            info!("restoring active AFM from recovery");
            let inner = afm.recovery + SIGNATURE_LEN;
            active = match self.copy_signed_payload(inner, afm.active_slot()) {
                Ok(()) => self.check_active_afm(afm.active).ok(),
                Err(_) => None,
            };
        }

        if active.is_some() {
            state.flags |= TrustState::ReadyForAttestation;
            self.raise_svn(None, recovery.svn)?;
        }
        Ok(())
    }

    /// Authenticates the active PFM of `device` and applies its policy.
    fn check_active(
        &mut self,
        device: Device,
        layout: &Layout,
    ) -> Result<ManifestInfo, Error> {
        let opts = &mut self.opts;
        let pfm_type = PcType::pfm_for(device);
        opts.verifier.verify_as(&*opts.flash, layout.active, pfm_type)?;
        let info = Validator::new(&mut opts.verifier).validate_and_apply(
            &*opts.flash,
            layout.active,
            device,
            &mut *opts.filters,
        )?;
        Ok(info)
    }

    fn check_active_afm(&mut self, addr: u32) -> Result<ManifestInfo, Error> {
        let opts = &mut self.opts;
        opts.verifier.verify_as(&*opts.flash, addr, PcType::Afm)?;
        let (header, _) = manifest::read_header(&*opts.flash, addr, Tag::Afm)?;
        Ok(ManifestInfo::from(&header))
    }

    /// Authenticates the capsule at `addr`, which must wrap a signed
    /// manifest carrying `tag`.
    fn check_capsule(
        &mut self,
        addr: u32,
        pc_type: PcType,
        tag: Tag,
    ) -> Result<ManifestInfo, Error> {
        let opts = &mut self.opts;
        opts.verifier.verify_as(&*opts.flash, addr, pc_type)?;
        let inner = addr + SIGNATURE_LEN;
        let (header, _) = manifest::read_header(&*opts.flash, inner, tag)?;
        Ok(ManifestInfo::from(&header))
    }

    fn promote_staging(
        &mut self,
        device: Device,
        layout: &Layout,
        skip_hash_check: bool,
    ) -> Result<ManifestInfo, Error> {
        let active = if skip_hash_check {
            None
        } else {
            Some(layout.active)
        };
        self.promote(
            layout.staging,
            layout.recovery,
            PcType::capsule_for(device),
            Tag::Pfm,
            active,
            Some(device),
        )
    }

    /// Copies the capsule at `staging` to `dest`, raising the SVN floor of
    /// `svn_owner` (or of the AFM, for `None`) to the capsule's SVN.
    ///
    /// An authentic capsule is promoted whatever its SVN; the floor only
    /// ever rises.
    ///
    /// If `active` is given, the capsule's inner manifest must carry the
    /// same Block0 digest as the signed manifest at that address.
    fn promote(
        &mut self,
        staging: u32,
        dest: u32,
        pc_type: PcType,
        tag: Tag,
        active: Option<u32>,
        svn_owner: Option<Device>,
    ) -> Result<ManifestInfo, Error> {
        let opts = &mut self.opts;
        let payload = opts.verifier.verify_as(&*opts.flash, staging, pc_type)?;
        let inner = staging + SIGNATURE_LEN;
        let (header, _) = manifest::read_header(&*opts.flash, inner, tag)?;
        let info = ManifestInfo::from(&header);

        if let Some(active) = active {
            let current = opts.flash.read_object::<Block0>(Ptr::new(active))?;
            let staged = opts.flash.read_object::<Block0>(Ptr::new(inner))?;
            let same = match payload.curve {
                Curve::P256 => current.hash256 == staged.hash256,
                Curve::P384 => current.hash384 == staged.hash384,
            };
            check!(same, Error::StagedImageMismatch);
        }

        info!("promoting staged capsule to {:#x}", dest);
        let len = keychain::signed_payload_size(&*self.opts.flash, staging)?;
        self.copy_signed_payload(staging, Region::new(dest, len))?;
        self.raise_svn(svn_owner, info.svn)?;
        Ok(info)
    }

    /// Erases `dest`, then copies the signed payload at `src` to its start.
    fn copy_signed_payload(
        &mut self,
        src: u32,
        dest: Region,
    ) -> Result<(), Error> {
        let opts = &mut self.opts;
        let len = keychain::signed_payload_size(&*opts.flash, src)?;
        check!(len <= dest.len, Error::NoSpace);

        opts.flash.erase_region(dest)?;
        opts.watchdog.kick();
        let mut offset = 0;
        while offset < len {
            let chunk = COPY_CHUNK.min(len - offset);
            opts.flash.copy_within(
                Ptr::new(src + offset),
                Ptr::new(dest.ptr.address + offset),
                chunk,
            )?;
            opts.watchdog.kick();
            offset += chunk;
        }
        Ok(())
    }

    /// Returns the SVN floor of `device`'s images, or of the AFM for `None`.
    fn svn_floor(&self, device: Option<Device>) -> SvnFloor {
        let base = self.opts.verifier.provisioning().nvm.svn;
        let slot = device.map_or(2, |d| d.to_wire_value() as u32);
        SvnFloor::new(base + 2 * slot)
    }

    fn raise_svn(
        &mut self,
        device: Option<Device>,
        svn: u8,
    ) -> Result<(), Error> {
        let floor = self.svn_floor(device);
        let nvm = self.opts.verifier.key_cancellation_mut().nvm_mut();
        floor.raise(nvm, svn as u32)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::Cell;

    use crate::crypto::hash::EngineExt as _;
    use crate::crypto::ring;
    use crate::hardware::fake;
    use crate::hardware::flash::EraseBlock;
    use crate::keychain::block::B0_ENTRY_OFFSET;
    use crate::keychain::block::BLOCK0_LEN;
    use crate::keychain::test::verifier;
    use crate::keychain::test::TestKeys;
    use crate::manifest::def::Protection;
    use crate::manifest::def::SpiRegion;
    use crate::manifest::owned::Afm;
    use crate::manifest::owned::Pfm;
    use crate::manifest::Definition;
    use crate::provision::Provisioning;
    use pretty_assertions::assert_eq;

    type TestOrchestrator<'a> = Orchestrator<
        'a,
        fake::Flash,
        ring::hash::Engine,
        ring::ecdsa::Verifier,
        fake::Nvm,
    >;

    fn orchestrator<'a>(
        prov: &'a Provisioning,
        flash: &'a mut fake::Flash,
        filters: &'a mut fake::Filter,
        watchdog: &'a mut fake::Watchdog,
    ) -> TestOrchestrator<'a> {
        Orchestrator::new(Options {
            verifier: verifier(prov),
            flash,
            filters,
            watchdog,
        })
    }

    const STATIC: u32 = 0x2_0000;
    const DYNAMIC: u32 = 0x3_0000;
    const AFM: AfmLayout = AfmLayout {
        active: 0xd_0000,
        recovery: 0xf_0000,
    };

    /// One signed build of a BMC image: a hashed static region at `STATIC`
    /// and a level-1 dynamic region at `DYNAMIC`.
    struct Build {
        firmware: Vec<u8>,
        pfm: Vec<u8>,
        capsule: Vec<u8>,
    }

    fn build(keys: &mut TestKeys, svn: u8, fill: u8) -> Build {
        let firmware = (0..0x2000u32)
            .map(|i| fill ^ i as u8)
            .collect::<Vec<_>>();
        let mut digest = [0; 32];
        ring::hash::Engine::new()
            .contiguous_hash(hash::Algo::Sha256, &firmware, &mut digest)
            .unwrap();

        let pfm = Pfm {
            svn,
            definitions: vec![
                Definition::SpiRegion(
                    SpiRegion::new(
                        Protection::Read.into(),
                        Region::new(STATIC, 0x2000),
                    )
                    .with_sha256(digest),
                ),
                Definition::SpiRegion(SpiRegion::new(
                    Protection::Read
                        | Protection::Write
                        | Protection::RecoveryLevel1,
                    Region::new(DYNAMIC, 0x1000),
                )),
            ],
            ..Default::default()
        };
        let pfm = keys
            .signer()
            .sign(PcType::BmcPfm, BitFlags::empty(), &pfm.to_bytes())
            .unwrap();

        let pbc = pbc::owned::Pbc::new(0x40)
            .replace(STATIC, &firmware)
            .erase(Region::new(DYNAMIC, 0x1000))
            .to_bytes();
        let content = pbc::owned::Capsule {
            pfm: pfm.clone(),
            fvms: vec![],
            pbc,
        }
        .to_bytes()
        .unwrap();
        let capsule = keys
            .signer()
            .sign(PcType::BmcUpdateCapsule, BitFlags::empty(), &content)
            .unwrap();

        Build {
            firmware,
            pfm,
            capsule,
        }
    }

    struct Images {
        keys: TestKeys,
        prov: Provisioning,
        build: Build,
    }

    impl Images {
        fn new() -> Self {
            let mut keys = TestKeys::new(Curve::P256);
            let prov = keys.provisioning();
            let build = build(&mut keys, 1, 0x5a);
            Self { keys, prov, build }
        }

        /// Returns a flash holding the requested copies on the BMC.
        fn flash(&self, active: bool, recovery: bool, staging: bool) -> fake::Flash {
            let layout = self.prov.bmc;
            let mut flash = fake::Flash::new(0x10_0000);
            if active {
                flash.load(Device::Bmc, layout.active, &self.build.pfm);
                flash.load(Device::Bmc, STATIC, &self.build.firmware);
            }
            if recovery {
                flash.load(Device::Bmc, layout.recovery, &self.build.capsule);
            }
            if staging {
                flash.load(Device::Bmc, layout.staging, &self.build.capsule);
            }
            flash
        }
    }

    fn bmc_floor(nvm: &fake::Nvm, prov: &Provisioning) -> u32 {
        SvnFloor::new(prov.nvm.svn).get(nvm).unwrap()
    }

    fn info(svn: u8) -> Option<ManifestInfo> {
        Some(ManifestInfo {
            svn,
            ..Default::default()
        })
    }

    fn slice(flash: &fake::Flash, addr: u32, len: usize) -> &[u8] {
        &flash.contents(Device::Bmc)[addr as usize..addr as usize + len]
    }

    #[test]
    fn all_valid_is_idempotent() {
        let img = Images::new();
        let mut flash = img.flash(true, true, true);
        let mut filters = fake::Filter::default();
        let mut wd = fake::Watchdog::default();

        let mut orch =
            orchestrator(&img.prov, &mut flash, &mut filters, &mut wd);
        let summary = orch
            .authenticate_and_recover(Device::Bmc, Request::default())
            .unwrap();
        let nvm = orch.verifier().key_cancellation().nvm();
        assert!(nvm.words.iter().all(|&w| w == !0));

        assert_eq!(
            summary,
            Summary {
                state: BitFlags::empty(),
                active_valid: true,
                recovery_valid: true,
                active_info: info(1),
                recovery_info: info(1),
            }
        );
        assert!(flash.writes.is_empty());
        assert!(flash.erases.is_empty());
        assert_eq!(flash.selections, vec![Device::Bmc]);
        assert_eq!(filters.write_protection.len(), 2);
        assert_eq!(wd.kicks, 1);
    }

    /// A flash whose first `bad_reads` reads of Block0 at any of `addrs`
    /// come back with a corrupted magic.
    struct FlakyFlash {
        inner: fake::Flash,
        addrs: Vec<u32>,
        bad_reads: Cell<usize>,
    }

    impl Flash for FlakyFlash {
        fn size(&self) -> core::result::Result<u32, flash::Error> {
            self.inner.size()
        }

        fn read(
            &self,
            offset: Ptr,
            out: &mut [u8],
        ) -> core::result::Result<(), flash::Error> {
            self.inner.read(offset, out)?;
            let is_block0 = out.len() == BLOCK0_LEN as usize
                && self.addrs.contains(&offset.address);
            if is_block0 && self.bad_reads.get() > 0 {
                self.bad_reads.set(self.bad_reads.get() - 1);
                out[0] ^= 0xff;
            }
            Ok(())
        }

        fn program(
            &mut self,
            offset: Ptr,
            buf: &[u8],
        ) -> core::result::Result<(), flash::Error> {
            self.inner.program(offset, buf)
        }

        fn erase(
            &mut self,
            offset: Ptr,
            block: EraseBlock,
        ) -> core::result::Result<(), flash::Error> {
            self.inner.erase(offset, block)
        }
    }

    impl Mux for FlakyFlash {
        fn select(&mut self, device: Device) {
            self.inner.select(device)
        }
    }

    #[test]
    fn transient_failures_are_retried() {
        let img = Images::new();
        let layout = img.prov.bmc;
        // Both copies read badly for the first two attempts.
        let mut flash = FlakyFlash {
            inner: img.flash(true, true, false),
            addrs: vec![layout.active, layout.recovery],
            bad_reads: Cell::new(4),
        };
        let mut filters = fake::Filter::default();
        let mut wd = fake::Watchdog::default();

        let summary = Orchestrator::new(Options {
            verifier: verifier(&img.prov),
            flash: &mut flash,
            filters: &mut filters,
            watchdog: &mut wd,
        })
        .authenticate_and_recover(Device::Bmc, Request::default())
        .unwrap();
        assert_eq!(summary.state, BitFlags::empty());
        assert!(summary.active_valid);
        assert!(summary.recovery_valid);

        assert_eq!(flash.bad_reads.get(), 0);
        assert_eq!(wd.kicks, 3);
        assert!(flash.inner.writes.is_empty());
        assert!(flash.inner.erases.is_empty());
    }

    #[test]
    fn bad_active_signature_is_rebuilt() {
        let img = Images::new();
        let layout = img.prov.bmc;
        let mut flash = img.flash(true, true, false);
        // One byte of `r` in the Block0 entry's signature.
        let offset = BLOCK0_LEN + B0_ENTRY_OFFSET + 8;
        let flipped = img.build.pfm[offset as usize] ^ 0x01;
        flash.load(Device::Bmc, layout.active + offset, &[flipped]);
        let mut filters = fake::Filter::default();
        let mut wd = fake::Watchdog::default();

        let summary =
            orchestrator(&img.prov, &mut flash, &mut filters, &mut wd)
                .authenticate_and_recover(Device::Bmc, Request::default())
                .unwrap();
        assert_eq!(summary.state, BitFlags::empty());
        assert!(summary.active_valid);
        assert!(summary.recovery_valid);
        assert_eq!(
            slice(&flash, layout.active, img.build.pfm.len()),
            &img.build.pfm[..]
        );
        assert!(flash.touched(Device::Bmc, Region::new(layout.active, 0x1000)));
    }

    #[test]
    fn active_rebuilt_from_recovery() {
        let img = Images::new();
        let layout = img.prov.bmc;
        let mut flash = img.flash(false, true, false);
        let mut filters = fake::Filter::default();
        let mut wd = fake::Watchdog::default();

        let summary =
            orchestrator(&img.prov, &mut flash, &mut filters, &mut wd)
                .authenticate_and_recover(Device::Bmc, Request::default())
                .unwrap();
        assert!(summary.active_valid);
        assert!(summary.recovery_valid);
        assert_eq!(summary.state, BitFlags::empty());
        assert_eq!(summary.active_info, info(1));

        assert_eq!(slice(&flash, STATIC, 0x2000), &img.build.firmware[..]);
        assert_eq!(
            slice(&flash, layout.active, img.build.pfm.len()),
            &img.build.pfm[..]
        );
        assert!(!flash.touched(Device::Bmc, Region::new(layout.recovery, 0x4_0000)));
        assert!(wd.kicks > 0);
    }

    #[test]
    fn staging_promoted_then_active_rebuilt() {
        let img = Images::new();
        let layout = img.prov.bmc;
        let mut flash = img.flash(false, false, true);
        let mut filters = fake::Filter::default();
        let mut wd = fake::Watchdog::default();

        let mut orch =
            orchestrator(&img.prov, &mut flash, &mut filters, &mut wd);
        let summary = orch
            .authenticate_and_recover(Device::Bmc, Request::default())
            .unwrap();
        let nvm = orch.verifier().key_cancellation().nvm();
        assert_eq!(bmc_floor(nvm, &img.prov), 1);

        assert!(summary.active_valid);
        assert!(summary.recovery_valid);
        assert_eq!(summary.state, BitFlags::empty());
        assert_eq!(
            slice(&flash, layout.recovery, img.build.capsule.len()),
            &img.build.capsule[..]
        );
        assert_eq!(slice(&flash, STATIC, 0x2000), &img.build.firmware[..]);
        assert!(!flash.touched(Device::Bmc, Region::new(layout.staging, 0x4_0000)));
    }

    #[test]
    fn all_invalid() {
        let img = Images::new();
        let layout = img.prov.bmc;
        let mut flash = img.flash(false, false, false);
        let mut filters = fake::Filter::default();
        let mut wd = fake::Watchdog::default();

        let mut orch =
            orchestrator(&img.prov, &mut flash, &mut filters, &mut wd);
        let summary = orch
            .authenticate_and_recover(Device::Bmc, Request::default())
            .unwrap();
        assert_eq!(
            summary,
            Summary {
                state: TrustState::AllRegionsFailedAuth.into(),
                active_valid: false,
                recovery_valid: false,
                active_info: None,
                recovery_info: None,
            }
        );
        assert_eq!(
            orch.device_state(Device::Bmc).unwrap().flags,
            TrustState::AllRegionsFailedAuth
        );
        assert_eq!(
            orch.device_state(Device::Pch).unwrap(),
            DeviceState::default()
        );

        assert!(!flash.touched(Device::Bmc, Region::new(layout.active, 0x7_0000)));
        assert!(!flash.touched(Device::Bmc, Region::new(layout.recovery, 0x4_0000)));
        assert!(filters.write_protection.is_empty());
        assert_eq!(wd.kicks, AUTH_RETRIES + 1);
    }

    #[test]
    fn auth_results_are_cleared() {
        let img = Images::new();
        let mut flash = img.flash(true, true, false);
        let mut filters = fake::Filter::default();
        let mut wd = fake::Watchdog::default();

        let mut orch =
            orchestrator(&img.prov, &mut flash, &mut filters, &mut wd);
        orch.set_device_state(
            Device::Bmc,
            DeviceState {
                flags: TrustState::AllRegionsFailedAuth
                    | TrustState::HasPendingRecoveryUpdate,
                wdt_recoveries: 1,
            },
        )
        .unwrap();
        let summary = orch
            .authenticate_and_recover(Device::Bmc, Request::default())
            .unwrap();
        assert_eq!(summary.state, TrustState::HasPendingRecoveryUpdate);
        assert_eq!(orch.device_state(Device::Bmc).unwrap().wdt_recoveries, 1);
    }

    #[test]
    fn recovery_lost_with_active_valid() {
        let img = Images::new();
        let mut flash = img.flash(true, false, false);
        let mut filters = fake::Filter::default();
        let mut wd = fake::Watchdog::default();

        let summary =
            orchestrator(&img.prov, &mut flash, &mut filters, &mut wd)
                .authenticate_and_recover(Device::Bmc, Request::default())
                .unwrap();
        assert_eq!(summary.state, TrustState::RecoveryFailedAuth);
        assert!(summary.active_valid);
        assert!(!summary.recovery_valid);
        assert!(flash.writes.is_empty());
        assert!(flash.erases.is_empty());
    }

    #[test]
    fn staged_image_must_match_active() {
        let mut img = Images::new();
        let layout = img.prov.bmc;
        let other = build(&mut img.keys, 1, 0xa5);
        let mut flash = img.flash(true, false, false);
        flash.load(Device::Bmc, layout.staging, &other.capsule);
        let mut filters = fake::Filter::default();
        let mut wd = fake::Watchdog::default();

        let mut orch =
            orchestrator(&img.prov, &mut flash, &mut filters, &mut wd);
        let summary = orch
            .authenticate_and_recover(Device::Bmc, Request::default())
            .unwrap();
        assert_eq!(summary.state, TrustState::RecoveryFailedAuth);
        assert_eq!(
            orch.recovery_update(Device::Bmc, false)
                .unwrap_err()
                .into_inner(),
            Error::StagedImageMismatch
        );
        assert!(orch.flash().writes.is_empty());

        orch.recovery_update(Device::Bmc, true).unwrap();
        let summary = orch
            .authenticate_and_recover(Device::Bmc, Request::default())
            .unwrap();
        assert_eq!(summary.state, BitFlags::empty());
        assert!(summary.recovery_valid);
        assert_eq!(
            slice(&flash, layout.recovery, other.capsule.len()),
            &other.capsule[..]
        );
    }

    #[test]
    fn staging_below_floor_still_repairs() {
        let img = Images::new();
        let layout = img.prov.bmc;
        let mut flash = img.flash(false, false, true);
        let mut filters = fake::Filter::default();
        let mut wd = fake::Watchdog::default();

        let mut orch =
            orchestrator(&img.prov, &mut flash, &mut filters, &mut wd);
        let nvm = orch.verifier_mut().key_cancellation_mut().nvm_mut();
        SvnFloor::new(img.prov.nvm.svn).raise(nvm, 2).unwrap();

        let summary = orch
            .authenticate_and_recover(Device::Bmc, Request::default())
            .unwrap();
        assert_eq!(summary.state, BitFlags::empty());
        assert!(summary.active_valid);
        assert_eq!(summary.recovery_info, info(1));
        let nvm = orch.verifier().key_cancellation().nvm();
        assert_eq!(bmc_floor(nvm, &img.prov), 2);

        assert_eq!(
            slice(&flash, layout.recovery, img.build.capsule.len()),
            &img.build.capsule[..]
        );
        assert_eq!(slice(&flash, STATIC, 0x2000), &img.build.firmware[..]);
    }

    #[test]
    fn failed_recovery_update_clears_pending_flag() {
        let img = Images::new();
        let layout = img.prov.bmc;
        let mut flash = img.flash(true, true, false);
        let mut filters = fake::Filter::default();
        let mut wd = fake::Watchdog::default();

        let mut orch =
            orchestrator(&img.prov, &mut flash, &mut filters, &mut wd);
        let state = DeviceState {
            flags: TrustState::HasPendingRecoveryUpdate.into(),
            wdt_recoveries: 1,
        };
        orch.set_device_state(Device::Bmc, state).unwrap();

        assert!(orch.recovery_update(Device::Bmc, false).is_err());
        assert_eq!(
            orch.device_state(Device::Bmc).unwrap(),
            DeviceState {
                flags: BitFlags::empty(),
                wdt_recoveries: 1,
            }
        );
        assert!(!flash.touched(Device::Bmc, Region::new(layout.recovery, 0x4_0000)));
    }

    #[test]
    fn recovery_update_clears_pending_flag() {
        let img = Images::new();
        let layout = img.prov.bmc;
        let mut flash = img.flash(true, true, true);
        let mut filters = fake::Filter::default();
        let mut wd = fake::Watchdog::default();

        let mut orch =
            orchestrator(&img.prov, &mut flash, &mut filters, &mut wd);
        let state = DeviceState {
            flags: TrustState::HasPendingRecoveryUpdate.into(),
            ..Default::default()
        };
        orch.set_device_state(Device::Bmc, state).unwrap();
        orch.recovery_update(Device::Bmc, false).unwrap();
        assert_eq!(
            orch.device_state(Device::Bmc).unwrap(),
            DeviceState::default()
        );
        let nvm = orch.verifier().key_cancellation().nvm();
        assert_eq!(bmc_floor(nvm, &img.prov), 1);

        assert!(flash.touched(Device::Bmc, Region::new(layout.recovery, 0x1000)));
        assert!(!flash.touched(Device::Bmc, Region::new(layout.active, 0x1000)));
        assert!(wd.kicks > 0);
    }

    #[test]
    fn forced_recovery_rewrites_dynamic_regions() {
        let img = Images::new();
        let mut flash = img.flash(true, true, false);
        flash.load(Device::Bmc, DYNAMIC, &[0; 0x1000]);
        let mut filters = fake::Filter::default();
        let mut wd = fake::Watchdog::default();

        let request = Request {
            force_recovery: true,
        };
        let summary =
            orchestrator(&img.prov, &mut flash, &mut filters, &mut wd)
                .authenticate_and_recover(Device::Bmc, request)
                .unwrap();
        assert!(summary.active_valid);
        assert_eq!(summary.state, BitFlags::empty());
        assert!(slice(&flash, DYNAMIC, 0x1000).iter().all(|&b| b == 0xff));
        assert_eq!(slice(&flash, STATIC, 0x2000), &img.build.firmware[..]);
    }

    #[test]
    fn wdt_recovery_escalates() {
        let img = Images::new();
        let mut flash = img.flash(true, true, false);
        flash.load(Device::Bmc, DYNAMIC, &[0; 0x1000]);
        let mut filters = fake::Filter::default();
        let mut wd = fake::Watchdog::default();

        let mut orch =
            orchestrator(&img.prov, &mut flash, &mut filters, &mut wd);
        let timed_out = DeviceState {
            flags: TrustState::RequireWdtRecovery.into(),
            ..Default::default()
        };
        orch.set_device_state(Device::Bmc, timed_out).unwrap();

        assert_eq!(orch.wdt_recovery(Device::Bmc).unwrap(), Some(1));
        assert_eq!(
            orch.device_state(Device::Bmc).unwrap(),
            DeviceState {
                flags: BitFlags::empty(),
                wdt_recoveries: 1,
            }
        );
        assert_eq!(orch.wdt_recovery(Device::Bmc).unwrap(), Some(2));
        assert_eq!(orch.wdt_recovery(Device::Bmc).unwrap(), Some(3));
        assert_eq!(orch.wdt_recovery(Device::Bmc).unwrap(), None);
        assert_eq!(orch.device_state(Device::Bmc).unwrap().wdt_recoveries, 3);

        // Only the first level names the dynamic region, and no static
        // region is marked for recovery at all.
        assert!(slice(&flash, DYNAMIC, 0x1000).iter().all(|&b| b == 0xff));
        let dynamic_erases = flash
            .erases
            .iter()
            .filter(|(_, r)| r.ptr.address == DYNAMIC)
            .count();
        assert_eq!(dynamic_erases, 1);
        assert!(!flash.touched(Device::Bmc, Region::new(STATIC, 0x2000)));
    }

    /// Returns a signed AFM, and a recovery capsule wrapping it.
    fn afm(keys: &mut TestKeys, svn: u8) -> (Vec<u8>, Vec<u8>) {
        let afm = Afm {
            svn,
            body: vec![0x11; 64],
            ..Default::default()
        };
        let signed = keys
            .signer()
            .sign(PcType::Afm, BitFlags::empty(), &afm.to_bytes())
            .unwrap();
        let capsule = keys
            .signer()
            .sign(PcType::Afm, BitFlags::empty(), &signed)
            .unwrap();
        (signed, capsule)
    }

    #[test]
    fn afm_restored_from_recovery() {
        let mut img = Images::new();
        img.prov.bmc.afm = Some(AFM);
        let (signed, capsule) = afm(&mut img.keys, 2);
        let mut flash = img.flash(true, true, false);
        flash.load(Device::Bmc, AFM.recovery, &capsule);
        let mut filters = fake::Filter::default();
        let mut wd = fake::Watchdog::default();

        let mut orch =
            orchestrator(&img.prov, &mut flash, &mut filters, &mut wd);
        let summary = orch
            .authenticate_and_recover(Device::Bmc, Request::default())
            .unwrap();
        assert_eq!(summary.state, TrustState::ReadyForAttestation);
        let nvm = orch.verifier().key_cancellation().nvm();
        let afm_floor = SvnFloor::new(img.prov.nvm.svn + 4);
        assert_eq!(afm_floor.get(nvm).unwrap(), 2);
        assert_eq!(
            orch.device_state(Device::Bmc).unwrap().flags,
            TrustState::ReadyForAttestation
        );

        assert_eq!(slice(&flash, AFM.active, signed.len()), &signed[..]);
        assert_eq!(
            flash.erases,
            vec![
                (Device::Bmc, Region::new(AFM.active, 0x1_0000)),
                (Device::Bmc, Region::new(AFM.active + 0x1_0000, 0x1_0000)),
            ]
        );
    }

    #[test]
    fn afm_recovery_missing() {
        let mut img = Images::new();
        img.prov.bmc.afm = Some(AFM);
        let (signed, _) = afm(&mut img.keys, 2);
        let mut flash = img.flash(true, true, false);
        flash.load(Device::Bmc, AFM.active, &signed);
        let mut filters = fake::Filter::default();
        let mut wd = fake::Watchdog::default();

        let summary =
            orchestrator(&img.prov, &mut flash, &mut filters, &mut wd)
                .authenticate_and_recover(Device::Bmc, Request::default())
                .unwrap();
        assert_eq!(
            summary.state,
            TrustState::ReadyForAttestation | TrustState::AfmRecoveryFailedAuth
        );
        assert!(flash.writes.is_empty());
    }

    #[test]
    fn afm_skipped_when_device_failed() {
        let mut img = Images::new();
        img.prov.bmc.afm = Some(AFM);
        let (signed, capsule) = afm(&mut img.keys, 2);
        let mut flash = img.flash(false, false, false);
        flash.load(Device::Bmc, AFM.active, &signed);
        flash.load(Device::Bmc, AFM.recovery, &capsule);
        let mut filters = fake::Filter::default();
        let mut wd = fake::Watchdog::default();

        let summary =
            orchestrator(&img.prov, &mut flash, &mut filters, &mut wd)
                .authenticate_and_recover(Device::Bmc, Request::default())
                .unwrap();
        assert_eq!(summary.state, TrustState::AllRegionsFailedAuth);
    }
}
