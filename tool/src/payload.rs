// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Signed payload commands.

use std::fs;
use std::io::Write as _;
use std::path::PathBuf;

use enumflags2::BitFlags;
use serde::Serialize;

use pfr::crypto::ecdsa::Curve;
use pfr::crypto::ring;
use pfr::hardware::flash::FlashExt as _;
use pfr::hardware::flash::Ptr;
use pfr::hardware::flash::Ram;
use pfr::hardware::nvm;
use pfr::keychain::block::Block0;
use pfr::keychain::block::SIGNATURE_LEN;
use pfr::keychain::owned::Signer;
use pfr::keychain::PcType;
use pfr::keychain::Verifier;
use pfr::manifest;
use pfr::manifest::Tag;
use pfr::provision::Provisioning;
use pfr::wire::WireEnum as _;

use crate::util::parse_curve;

/// Commands for producing and checking "Block0 + Block1" signed payloads.
#[derive(structopt::StructOpt)]
pub enum Payload {
    /// Sign raw protected content.
    ///
    /// The content is zero-padded to a multiple of 128 bytes. The CSK is
    /// granted only the permission the content type requires.
    SignPayload {
        /// PKCS#8-encoded root key.
        #[structopt(long, parse(from_os_str))]
        root_key: PathBuf,

        /// PKCS#8-encoded code signing key.
        #[structopt(long, parse(from_os_str))]
        csk: PathBuf,

        /// The CSK's id, for cancellation.
        #[structopt(long, default_value = "0")]
        csk_id: u32,

        /// The curve both keys lie on: p256 or p384.
        #[structopt(long, parse(try_from_str = parse_curve), default_value = "p384")]
        curve: Curve,

        /// The content type, such as `BmcPfm` or `PchUpdateCapsule`.
        #[structopt(long = "type")]
        pc_type: PcType,

        /// Input file, defaults to stdin.
        #[structopt(short = "i", long, parse(from_os_str))]
        input: Option<PathBuf>,

        /// Output file, defaults to stdout.
        #[structopt(short = "o", long, parse(from_os_str))]
        output: Option<PathBuf>,
    },

    /// Describe a signed payload as JSON, without authenticating it.
    ShowPayload {
        /// Whether to pretty-print the resulting JSON.
        #[structopt(long)]
        pretty: bool,

        /// Input file, defaults to stdin.
        #[structopt(short = "i", long, parse(from_os_str))]
        input: Option<PathBuf>,

        /// Output file, defaults to stdout.
        #[structopt(short = "o", long, parse(from_os_str))]
        output: Option<PathBuf>,
    },

    /// Authenticate a signed payload against a JSON provisioning file.
    ///
    /// No keys are treated as cancelled.
    VerifyPayload {
        /// JSON provisioning file.
        #[structopt(long, parse(from_os_str))]
        provisioning: PathBuf,

        /// Also require the payload to be an unflagged payload of this type.
        #[structopt(long = "type")]
        pc_type: Option<PcType>,

        /// Input file, defaults to stdin.
        #[structopt(short = "i", long, parse(from_os_str))]
        input: Option<PathBuf>,
    },
}

/// NVM as shipped: every key valid, every floor at zero.
struct ErasedNvm;

impl nvm::Nvm for ErasedNvm {
    fn read_word(&self, _: u32) -> Result<u32, nvm::Error> {
        Ok(!0)
    }

    fn write_word(&mut self, _: u32, _: u32) -> Result<(), nvm::Error> {
        Err(nvm::Error::Unspecified)
    }
}

#[derive(Serialize)]
struct PayloadInfo {
    pc_type: Option<PcType>,
    flags: u32,
    pc_length: u32,
    signed_length: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    manifest: Option<ManifestInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    capsule_of: Option<ManifestInfo>,
}

#[derive(Serialize)]
struct ManifestInfo {
    tag: Tag,
    svn: u8,
    major: u8,
    minor: u8,
    length: u32,
}

/// Returns the PFM or AFM header of the signed payload at `addr`, if any.
fn manifest_at(flash: &Ram<&[u8]>, addr: u32) -> Option<ManifestInfo> {
    [Tag::Pfm, Tag::Afm].iter().find_map(|&tag| {
        let (header, _) = manifest::read_header(flash, addr, tag).ok()?;
        Some(ManifestInfo {
            tag,
            svn: header.svn,
            major: header.major,
            minor: header.minor,
            length: header.length,
        })
    })
}

impl Payload {
    pub fn run(self) {
        match self {
            Self::SignPayload {
                root_key,
                csk,
                csk_id,
                curve,
                pc_type,
                input,
                output,
            } => {
                let (r, mut w) =
                    crate::util::stdio(input.as_deref(), output.as_deref());
                let content = crate::util::read_all(r);

                let mut root = crate::util::load_key(&root_key, curve);
                let mut csk = crate::util::load_key(&csk, curve);
                let mut hash = ring::hash::Engine::new();
                let mut signer = Signer {
                    root: &mut root,
                    csk: &mut csk,
                    csk_id,
                    csk_permissions: pc_type.required_permission().into(),
                    hash: &mut hash,
                };
                let signed = check!(
                    signer.sign(pc_type, BitFlags::empty(), &content),
                    "failed to sign payload"
                );
                check!(w.write_all(&signed), "failed to write payload");
            }

            Self::ShowPayload {
                pretty,
                input,
                output,
            } => {
                let (r, w) =
                    crate::util::stdio(input.as_deref(), output.as_deref());
                let buf = crate::util::read_all(r);
                let flash = Ram(buf.as_slice());

                let b0 = check!(
                    flash.read_object::<Block0>(Ptr::new(0)),
                    "input is shorter than Block0"
                );
                let info = PayloadInfo {
                    pc_type: PcType::from_wire_value(b0.pc_type as u8),
                    flags: b0.pc_type & !0xff,
                    pc_length: b0.pc_length,
                    signed_length: b0.pc_length.saturating_add(SIGNATURE_LEN),
                    manifest: manifest_at(&flash, 0),
                    capsule_of: manifest_at(&flash, SIGNATURE_LEN),
                };

                let r = match pretty {
                    true => serde_json::to_writer_pretty(w, &info),
                    false => serde_json::to_writer(w, &info),
                };
                check!(r, "failed to serialize payload description");
            }

            Self::VerifyPayload {
                provisioning,
                pc_type,
                input,
            } => {
                let json = check!(
                    fs::read(&provisioning),
                    "failed to read {}",
                    provisioning.display()
                );
                let prov: Provisioning = check!(
                    serde_json::from_slice(&json),
                    "failed to parse provisioning"
                );

                let (r, _) = crate::util::stdio(input.as_deref(), None);
                let buf = crate::util::read_all(r);
                let flash = Ram(buf.as_slice());

                let mut verifier = Verifier::new(
                    &prov,
                    ring::hash::Engine::new(),
                    ring::ecdsa::Verifier::new(),
                    ErasedNvm,
                );
                let result = match pc_type {
                    Some(ty) => verifier.verify_as(&flash, 0, ty),
                    None => verifier.verify_signed_payload(&flash, 0),
                };
                let payload = check!(result, "payload failed authentication");
                println!(
                    "ok: {} payload, {} bytes of content, {:?} chain, CSK {:?}",
                    payload.pc_type,
                    payload.pc_length,
                    payload.curve,
                    payload.csk_id,
                );
            }
        }
    }
}
