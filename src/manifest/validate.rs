// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! PFM validation and policy application.

use crate::crypto::ecdsa;
use crate::crypto::hash;
use crate::hardware::flash::Flash;
use crate::hardware::flash::Region;
use crate::hardware::nvm::Nvm;
use crate::hardware::Device;
use crate::hardware::Filter;
use crate::keychain;
use crate::keychain::Verifier;
use crate::manifest::def::FvmAddr;
use crate::manifest::def::Protection;
use crate::manifest::def::SmbusRule;
use crate::manifest::def::SpiRegion;
use crate::manifest::read_fvm_header;
use crate::manifest::read_header;
use crate::manifest::Definition;
use crate::manifest::Definitions;
use crate::manifest::Error;
use crate::manifest::ManifestInfo;
use crate::manifest::Tag;
use crate::manifest::MAX_FVM_TYPE;
use crate::Result;

/// FVMs must start on a 4 KiB boundary.
const FVM_ALIGN: u32 = 0x1000;

/// Validates an authenticated PFM against live flash, and applies its policy
/// to the bus filters as it goes.
///
/// Validation is a single forward walk. A failure stops it where it is:
/// policy applied for earlier definitions stays applied, and nothing is
/// applied for later ones.
pub struct Validator<'v, 'p, H, V, N> {
    verifier: &'v mut Verifier<'p, H, V, N>,
}

impl<'v, 'p, H, V, N> Validator<'v, 'p, H, V, N>
where
    H: hash::Engine,
    V: ecdsa::Verify,
    N: Nvm,
{
    /// Creates a new `Validator`.
    ///
    /// `verifier` authenticates FVMs, and provides the hash engine and SMBus
    /// topology.
    pub fn new(verifier: &'v mut Verifier<'p, H, V, N>) -> Self {
        Self { verifier }
    }

    /// Walks the PFM in the signed payload at `pfm_addr` on `device`.
    ///
    /// The payload itself must already have been authenticated; this checks
    /// the manifest tag, the contents of every hashed static region, every
    /// SMBus rule, and every FVM the PFM names.
    pub fn validate_and_apply<F: Flash + ?Sized>(
        &mut self,
        flash: &F,
        pfm_addr: u32,
        device: Device,
        filters: &mut dyn Filter,
    ) -> Result<ManifestInfo, Error> {
        let (header, body) = read_header(flash, pfm_addr, Tag::Pfm)?;
        self.walk(flash, body, device, filters, false)?;
        Ok(ManifestInfo::from(&header))
    }

    fn walk<F: Flash + ?Sized>(
        &mut self,
        flash: &F,
        body: Region,
        device: Device,
        filters: &mut dyn Filter,
        in_fvm: bool,
    ) -> Result<(), Error> {
        let mut defs = Definitions::new(flash, body);
        while let Some(def) = defs.read_next()? {
            match def {
                Definition::SpiRegion(region) => {
                    self.apply_region(flash, device, &region, filters)?
                }
                Definition::SmbusRule(rule) if !in_fvm => {
                    self.apply_rule(device, &rule, filters)?
                }
                Definition::FvmAddr(fvm) if !in_fvm => {
                    self.check_fvm(flash, device, fvm, filters)?
                }
                Definition::Capability => {}
                _ => {
                    trace!("{} definition ends FVM body", def.def_type());
                    break;
                }
            }
        }
        Ok(())
    }

    fn apply_region<F: Flash + ?Sized>(
        &mut self,
        flash: &F,
        device: Device,
        region: &SpiRegion,
        filters: &mut dyn Filter,
    ) -> Result<(), Error> {
        if region.is_static() {
            if let Some((algo, expected)) = region.expected_hash() {
                let digest = keychain::hash_flash(
                    flash,
                    self.verifier.hash_engine(),
                    algo,
                    region.region,
                )?;
                check!(digest.matches(expected), Error::BadHash);
            }
        }

        filters.apply_write_protection(
            device,
            region.region,
            region.protection.contains(Protection::Write),
        );
        Ok(())
    }

    fn apply_rule(
        &mut self,
        device: Device,
        rule: &SmbusRule,
        filters: &mut dyn Filter,
    ) -> Result<(), Error> {
        if device == Device::Pch {
            trace!("ignoring SMBus rule {} in PCH PFM", rule.rule_id);
            return Ok(());
        }

        let topology = &self.verifier.provisioning().smbus;
        check!(
            topology.address(rule.bus_id, rule.rule_id) == Some(rule.device_addr),
            Error::BadRule
        );
        filters.enable_smbus_commands(rule.bus_id, rule.rule_id, &rule.whitelist);
        Ok(())
    }

    fn check_fvm<F: Flash + ?Sized>(
        &mut self,
        flash: &F,
        device: Device,
        fvm: FvmAddr,
        filters: &mut dyn Filter,
    ) -> Result<(), Error> {
        check!(fvm.fvm_addr % FVM_ALIGN == 0, Error::BadAlignment);
        self.verifier.verify_signed_payload(flash, fvm.fvm_addr)?;

        let (header, body) = read_fvm_header(flash, fvm.fvm_addr)?;
        check!(
            header.fv_type == fvm.fv_type && header.fv_type <= MAX_FVM_TYPE,
            Error::BadFvType
        );
        self.walk(flash, body, device, filters, true)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::ecdsa::Curve;
    use crate::crypto::hash::EngineExt as _;
    use crate::crypto::ring;
    use crate::hardware::fake;
    use crate::hardware::Mux as _;
    use crate::keychain::test::verifier;
    use crate::keychain::test::TestKeys;
    use crate::keychain::PcType;
    use crate::manifest::owned;
    use crate::provision::Provisioning;
    use enumflags2::BitFlags;
    use pretty_assertions::assert_eq;

    const FIRMWARE: u32 = 0x2_0000;
    const FVM: u32 = 0x3_0000;

    struct Fixture {
        keys: TestKeys,
        prov: Provisioning,
        flash: fake::Flash,
        filter: fake::Filter,
    }

    impl Fixture {
        fn new() -> Self {
            let mut keys = TestKeys::new(Curve::P256);
            let mut prov = keys.provisioning();
            prov.smbus.addresses[0][1] = 0xb0;

            let mut flash = fake::Flash::new(0x10_0000);
            for &device in &[Device::Bmc, Device::Pch] {
                let firmware = (0..0x2000u32)
                    .map(|i| (i * 7) as u8)
                    .collect::<Vec<_>>();
                flash.load(device, FIRMWARE, &firmware);
            }
            Self {
                keys,
                prov,
                flash,
                filter: fake::Filter::default(),
            }
        }

        /// Returns a static region definition over `region`, hashed with its
        /// current contents on `device`.
        fn hashed(&self, device: Device, region: Region) -> Definition {
            let start = region.ptr.address as usize;
            let bytes = &self.flash.contents(device)
                [start..start + region.len as usize];
            let mut digest = [0; 32];
            ring::hash::Engine::new()
                .contiguous_hash(hash::Algo::Sha256, bytes, &mut digest)
                .unwrap();
            Definition::SpiRegion(
                SpiRegion::new(Protection::Read.into(), region)
                    .with_sha256(digest),
            )
        }

        fn install(&mut self, device: Device, addr: u32, content: &[u8]) {
            let signed = self
                .keys
                .signer()
                .sign(PcType::pfm_for(device), BitFlags::empty(), content)
                .unwrap();
            self.flash.load(device, addr, &signed);
        }

        fn install_pfm(&mut self, device: Device, defs: Vec<Definition>) {
            let pfm = owned::Pfm {
                svn: 1,
                bkc: 2,
                major: 3,
                minor: 4,
                definitions: defs,
            };
            let active = self.prov.layout(device).active;
            self.install(device, active, &pfm.to_bytes());
        }

        fn validate(&mut self, device: Device) -> Result<ManifestInfo, Error> {
            let mut v = verifier(&self.prov);
            let active = self.prov.layout(device).active;
            self.flash.select(device);
            Validator::new(&mut v).validate_and_apply(
                &self.flash,
                active,
                device,
                &mut self.filter,
            )
        }
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn applies_policy() {
        let mut f = Fixture::new();
        let first = Region::new(FIRMWARE, 0x1000);
        let second = Region::new(FIRMWARE + 0x1000, 0x1000);
        let dynamic = Region::new(0x4_0000, 0x1_0000);

        let mut digest = [0; 48];
        let start = second.ptr.address as usize;
        ring::hash::Engine::new()
            .contiguous_hash(
                hash::Algo::Sha384,
                &f.flash.contents(Device::Bmc)[start..start + 0x1000],
                &mut digest,
            )
            .unwrap();

        let whitelist = [0x0f; 32];
        let defs = vec![
            f.hashed(Device::Bmc, first),
            Definition::SpiRegion(
                SpiRegion::new(Protection::Read.into(), second)
                    .with_sha384(digest),
            ),
            Definition::Capability,
            Definition::SpiRegion(SpiRegion::new(
                Protection::Read | Protection::Write,
                dynamic,
            )),
            Definition::SmbusRule(SmbusRule {
                bus_id: 1,
                rule_id: 2,
                device_addr: 0xb0,
                whitelist,
            }),
        ];
        f.install_pfm(Device::Bmc, defs);

        let info = f.validate(Device::Bmc).unwrap();
        assert_eq!(
            info,
            ManifestInfo {
                svn: 1,
                bkc: 2,
                major: 3,
                minor: 4
            }
        );
        assert_eq!(
            f.filter.write_protection,
            vec![
                (Device::Bmc, first, false),
                (Device::Bmc, second, false),
                (Device::Bmc, dynamic, true),
            ]
        );
        assert_eq!(f.filter.smbus, vec![(1, 2, whitelist)]);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn bad_hash_stops_walk() {
        let mut f = Fixture::new();
        let first = Region::new(FIRMWARE, 0x1000);
        let second = Region::new(FIRMWARE + 0x1000, 0x1000);
        let defs = vec![f.hashed(Device::Pch, first), f.hashed(Device::Pch, second)];
        f.install_pfm(Device::Pch, defs);

        // Corrupt the first region after hashing it.
        f.flash.load(Device::Pch, FIRMWARE + 5, &[0x00]);

        let err = f.validate(Device::Pch).unwrap_err();
        assert_eq!(err.into_inner(), Error::BadHash);
        assert!(f.filter.write_protection.is_empty());
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn smbus_rules() {
        let mut f = Fixture::new();
        let bogus = Definition::SmbusRule(SmbusRule {
            bus_id: 0,
            rule_id: 2,
            device_addr: 0xb0,
            whitelist: [0xff; 32],
        });
        f.install_pfm(Device::Pch, vec![bogus]);
        f.install_pfm(Device::Bmc, vec![bogus]);

        // The PCH does not own the SMBus.
        f.validate(Device::Pch).unwrap();
        assert!(f.filter.smbus.is_empty());

        let err = f.validate(Device::Bmc).unwrap_err();
        assert_eq!(err.into_inner(), Error::BadRule);

        let wrong_device = Definition::SmbusRule(SmbusRule {
            bus_id: 1,
            rule_id: 2,
            device_addr: 0xb2,
            whitelist: [0xff; 32],
        });
        f.install_pfm(Device::Bmc, vec![wrong_device]);
        let err = f.validate(Device::Bmc).unwrap_err();
        assert_eq!(err.into_inner(), Error::BadRule);
        assert!(f.filter.smbus.is_empty());
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn unknown_definition_stops_walk() {
        let mut f = Fixture::new();
        let first = Region::new(FIRMWARE, 0x1000);
        let mut pfm = owned::Pfm {
            definitions: vec![f.hashed(Device::Pch, first)],
            ..Default::default()
        }
        .to_bytes();

        // An unknown type, followed by a region that would fail its hash.
        pfm.push(0x7f);
        let bad = SpiRegion::new(Protection::Read.into(), first)
            .with_sha256([0; 32]);
        owned::encode_definition(&Definition::SpiRegion(bad), &mut pfm);
        let len = pfm.len() as u32;
        pfm[28..32].copy_from_slice(&len.to_le_bytes());

        let active = f.prov.pch.active;
        f.install(Device::Pch, active, &pfm);
        f.validate(Device::Pch).unwrap();
        assert_eq!(f.filter.write_protection, vec![(Device::Pch, first, false)]);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn truncated_body() {
        let mut f = Fixture::new();
        let mut pfm = owned::Pfm {
            definitions: vec![f.hashed(Device::Pch, Region::new(FIRMWARE, 16))],
            ..Default::default()
        }
        .to_bytes();
        // Cut the digest short, but keep the payload long enough.
        let len = pfm.len() as u32 - 8;
        pfm[28..32].copy_from_slice(&len.to_le_bytes());

        let active = f.prov.pch.active;
        f.install(Device::Pch, active, &pfm);
        let err = f.validate(Device::Pch).unwrap_err();
        assert_eq!(err.into_inner(), Error::Overrun);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn fvms() {
        let mut f = Fixture::new();
        let region = Region::new(FIRMWARE + 0x1000, 0x1000);
        let fvm = owned::Fvm {
            fv_type: 2,
            definitions: vec![
                f.hashed(Device::Pch, region),
                // Not meaningful in an FVM; ends its walk.
                Definition::SmbusRule(SmbusRule {
                    bus_id: 0,
                    rule_id: 0,
                    device_addr: 0,
                    whitelist: [0; 32],
                }),
            ],
            ..Default::default()
        };
        f.install(Device::Pch, FVM, &fvm.to_bytes());

        let fvm_def = |fv_type, fvm_addr| {
            Definition::FvmAddr(FvmAddr { fv_type, fvm_addr })
        };
        f.install_pfm(Device::Pch, vec![fvm_def(2, FVM)]);
        f.validate(Device::Pch).unwrap();
        assert_eq!(
            f.filter.write_protection,
            vec![(Device::Pch, region, false)]
        );

        f.install_pfm(Device::Pch, vec![fvm_def(2, FVM + 0x100)]);
        let err = f.validate(Device::Pch).unwrap_err();
        assert_eq!(err.into_inner(), Error::BadAlignment);

        f.install_pfm(Device::Pch, vec![fvm_def(3, FVM)]);
        let err = f.validate(Device::Pch).unwrap_err();
        assert_eq!(err.into_inner(), Error::BadFvType);

        // Nothing is signed here.
        f.install_pfm(Device::Pch, vec![fvm_def(2, FVM + 0x1_0000)]);
        let err = f.validate(Device::Pch).unwrap_err();
        assert!(matches!(err.into_inner(), Error::Unauthenticated(_)));
    }
}
