//! The volume facade: lifecycle, credential registration, the unlock
//! state machine and random-access reads.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use zeroize::Zeroizing;

use bde_dtyp::{FileTime, Guid};
use bde_fve::{
    BlockHeader, EncryptionMethod, FveError, FveMetadata, MetadataHeader, MetadataLayout,
    ProtectionType, StartupKeyFile, VolumeHeader,
};

use crate::keys::{
    Credentials, ExternalKey, RawFvek, RecoveryPassword, decode_hex_key, password_to_utf16le,
};
use crate::region::{RegionLayout, RegionMap};
use crate::source::{ByteSource, read_exact_at};
use crate::virtual_volume::VirtualVolume;
use crate::{Error, crypto, unlock};

/// Unlock progression of an opened volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockState {
    /// Metadata parsed; no key material recovered yet.
    Locked,
    /// A volume master key was recovered but the FVEK was not; reads stay
    /// unavailable.
    PartiallyUnlocked,
    /// FVEK recovered; reads are available.
    Unlocked,
}

/// Descriptive view of one key protector, for enumeration APIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyProtectorInfo {
    pub identifier: Guid,
    pub protection_type: ProtectionType,
    pub last_modified: FileTime,
}

/// Cloneable handle that cancels long-running unlock work from another
/// thread. The key stretch polls it every few thousand rounds.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

struct MetadataCandidate {
    offset: u64,
    block: BlockHeader,
    metadata: FveMetadata,
}

struct SelectedMetadata {
    offsets: [u64; 3],
    block: BlockHeader,
    metadata: FveMetadata,
}

/// A BitLocker-protected volume over a byte source.
///
/// Lifecycle: [`open`][Volume::open] parses and reconciles the metadata,
/// leaving the volume locked; `set_*` registers credentials;
/// [`unlock`][Volume::unlock] runs the protector chain; afterwards
/// [`read_at`][Volume::read_at] serves the plaintext view. Key material
/// and credentials are zeroised when the volume is dropped.
///
/// A volume handle is single-threaded; distinct handles are independent.
pub struct Volume<S: ByteSource> {
    source: S,
    volume_header: VolumeHeader,
    block: BlockHeader,
    metadata: FveMetadata,
    metadata_offsets: [u64; 3],
    method: EncryptionMethod,
    volume_size: u64,
    credentials: Credentials,
    state: UnlockState,
    virtual_volume: Option<VirtualVolume>,
    abort: Arc<AtomicBool>,
}

impl<S: ByteSource> Volume<S> {
    /// Opens a volume: parses the boot sector, locates the three FVE
    /// metadata blocks (trying the Windows 7+ layout before the Vista
    /// one), validates and reconciles them, and extracts the geometry.
    ///
    /// The returned volume is locked. At least one intact metadata copy is
    /// required; corrupt copies are skipped with a diagnostic.
    pub fn open(mut source: S) -> crate::Result<Volume<S>> {
        let mut sector0 = [0u8; VolumeHeader::SIZE];
        read_exact_at(&mut source, 0, &mut sector0)?;
        let volume_header = VolumeHeader::parse(&sector0)?;
        if volume_header.bytes_per_sector == 0 {
            return Err(Error::InvalidData("boot sector has zero sector size".to_string()));
        }

        let mut selected = None;
        let mut last_error = None;
        for layout in volume_header.metadata_layouts()? {
            match Self::select_metadata(&mut source, layout) {
                Ok(found) => {
                    selected = Some(found);
                    break;
                }
                Err(error) => {
                    log::debug!("metadata layout {layout:?} yielded nothing: {error}");
                    last_error = Some(error);
                }
            }
        }
        let Some(selected) = selected else {
            return Err(
                last_error.unwrap_or(Error::Format(FveError::UnsupportedVolumeSignature)),
            );
        };

        let raw_method = selected.metadata.header.encryption_method;
        let method = EncryptionMethod::from_raw(raw_method)
            .ok_or(Error::UnsupportedEncryptionMethod(raw_method))?;

        let source_size = source.size()?;
        let mut volume_size = volume_header.volume_size();
        if volume_size == 0 {
            volume_size = selected.block.encrypted_volume_size;
        }
        if volume_size == 0 || volume_size > source_size {
            log::warn!(
                "advertised volume size {volume_size:#x} unusable, clamping to source size {source_size:#x}"
            );
            volume_size = source_size;
        }

        log::debug!(
            "opened volume {} ({method}, {volume_size:#x} bytes, {} key protectors)",
            selected.metadata.volume_identifier(),
            selected.metadata.volume_master_keys().count()
        );
        Ok(Volume {
            source,
            volume_header,
            block: selected.block,
            metadata: selected.metadata,
            metadata_offsets: selected.offsets,
            method,
            volume_size,
            credentials: Credentials::default(),
            state: UnlockState::Locked,
            virtual_volume: None,
            abort: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Reads, validates and reconciles the three metadata copies of one
    /// discovery layout. Tie-break between surviving copies that disagree:
    /// highest nonce counter first, earliest offset on ties.
    fn select_metadata(source: &mut S, layout: MetadataLayout) -> crate::Result<SelectedMetadata> {
        let offsets = match layout {
            MetadataLayout::Version2 { offsets } | MetadataLayout::ToGo { offsets } => offsets,
            MetadataLayout::Version1 { first_offset } => {
                // The Vista boot sector names only the first block; the
                // block's own header carries the full triple.
                Self::read_block_header(source, first_offset)?.metadata_offsets
            }
        };

        let mut candidates: Vec<MetadataCandidate> = Vec::new();
        let mut last_error = None;
        for (index, offset) in offsets.into_iter().enumerate() {
            match Self::read_metadata_copy(source, offset, &offsets) {
                Ok((block, metadata)) => {
                    candidates.push(MetadataCandidate {
                        offset,
                        block,
                        metadata,
                    });
                }
                Err(error) => {
                    log::warn!("metadata copy {index} at {offset:#x} rejected: {error}");
                    last_error = Some(error);
                }
            }
        }

        let best = candidates.into_iter().max_by_key(|candidate| {
            (
                candidate.metadata.header.next_nonce_counter,
                std::cmp::Reverse(candidate.offset),
            )
        });
        match best {
            Some(candidate) => {
                log::debug!(
                    "selected metadata copy at {:#x} (nonce counter {})",
                    candidate.offset,
                    candidate.metadata.header.next_nonce_counter
                );
                Ok(SelectedMetadata {
                    offsets,
                    block: candidate.block,
                    metadata: candidate.metadata,
                })
            }
            None => Err(last_error.unwrap_or_else(|| {
                Error::Format(FveError::corrupt(offsets[0], "no usable metadata copy"))
            })),
        }
    }

    fn read_block_header(source: &mut S, offset: u64) -> crate::Result<BlockHeader> {
        let mut raw = [0u8; BlockHeader::SIZE];
        read_exact_at(source, offset, &mut raw)?;
        Ok(BlockHeader::parse(&raw, offset)?)
    }

    fn read_metadata_copy(
        source: &mut S,
        offset: u64,
        discovered: &[u64; 3],
    ) -> crate::Result<(BlockHeader, FveMetadata)> {
        let block = Self::read_block_header(source, offset)?;
        block.validate_offsets(offset, discovered)?;

        let metadata_offset = offset + BlockHeader::SIZE as u64;
        let mut header_raw = [0u8; MetadataHeader::SIZE];
        read_exact_at(source, metadata_offset, &mut header_raw)?;
        let metadata_header = MetadataHeader::parse(&header_raw, metadata_offset)?;
        if u64::from(metadata_header.metadata_size) > block.region_size() - BlockHeader::SIZE as u64
        {
            return Err(Error::Format(FveError::corrupt(
                metadata_offset,
                format!(
                    "metadata size {:#x} overruns its block",
                    metadata_header.metadata_size
                ),
            )));
        }

        let mut raw = vec![0u8; metadata_header.metadata_size as usize];
        read_exact_at(source, metadata_offset, &mut raw)?;
        let metadata = FveMetadata::parse(&raw, metadata_offset)?;
        Ok((block, metadata))
    }

    /// Registers a 48-digit recovery password. Validated eagerly; a
    /// malformed password never reaches the unlock chain.
    pub fn set_recovery_password(&mut self, text: &str) -> crate::Result<()> {
        self.credentials.recovery_password = Some(RecoveryPassword::parse(text)?);
        Ok(())
    }

    /// Registers a user password (UTF-8 in; hashed as UTF-16LE).
    pub fn set_password(&mut self, password: &str) -> crate::Result<()> {
        if password.is_empty() {
            return Err(Error::InvalidCredential("empty password".to_string()));
        }
        self.credentials.password = Some(password_to_utf16le(password));
        Ok(())
    }

    /// Loads a `.BEK` startup-key file from disk.
    pub fn set_startup_key_path(&mut self, path: impl AsRef<Path>) -> crate::Result<()> {
        let data = std::fs::read(path)?;
        self.set_startup_key_bytes(&data)
    }

    /// Registers the contents of a `.BEK` startup-key file.
    pub fn set_startup_key_bytes(&mut self, data: &[u8]) -> crate::Result<()> {
        let file = StartupKeyFile::parse(data)?;
        let external = file.external_key().ok_or_else(|| {
            Error::InvalidCredential("startup key file carries no external key".to_string())
        })?;
        let key = external.key().ok_or_else(|| {
            Error::InvalidCredential("startup key file carries no key material".to_string())
        })?;
        self.credentials.external_key = Some(ExternalKey {
            identifier: external.identifier,
            key: Zeroizing::new(key.data.clone()),
        });
        Ok(())
    }

    /// Supplies the FVEK (and, for the diffuser methods, the tweak key)
    /// directly as hex, bypassing the protector chain entirely.
    pub fn set_keys(&mut self, fvek_hex: &str, tweak_hex: Option<&str>) -> crate::Result<()> {
        let key = decode_hex_key(fvek_hex)?;
        let tweak = tweak_hex.map(decode_hex_key).transpose()?;
        self.credentials.raw_fvek = Some(RawFvek { key, tweak });
        Ok(())
    }

    /// Runs the key-protector unwrap chain with the registered
    /// credentials and, on success, assembles the decrypted view.
    ///
    /// Clear-key protectors and fully decrypted volumes need no
    /// credentials at all.
    pub fn unlock(&mut self) -> crate::Result<()> {
        if self.state == UnlockState::Unlocked {
            return Ok(());
        }
        let bytes_per_sector = u32::from(self.volume_header.bytes_per_sector);

        if self.method == EncryptionMethod::None {
            self.virtual_volume = Some(VirtualVolume::new(
                RegionMap::unencrypted(self.volume_size),
                None,
                bytes_per_sector,
            )?);
            self.state = UnlockState::Unlocked;
            return Ok(());
        }

        let fvek: Zeroizing<Vec<u8>> = if let Some(raw) = &self.credentials.raw_fvek {
            let combined = raw.combined();
            if combined.len() < self.method.key_size() {
                return Err(Error::InvalidCredential(format!(
                    "raw FVEK of {} bytes is too short for {}",
                    combined.len(),
                    self.method
                )));
            }
            combined
        } else {
            let vmk = unlock::recover_vmk(&self.metadata, &self.credentials, &self.abort)?;
            self.state = UnlockState::PartiallyUnlocked;
            unlock::recover_fvek(&self.metadata, &vmk, self.method)?
        };

        let decryptor = crypto::make_sector_decryptor(self.method, &fvek, bytes_per_sector)?;
        let map = RegionMap::build(&self.region_layout())?;
        self.virtual_volume = Some(VirtualVolume::new(map, Some(decryptor), bytes_per_sector)?);
        self.state = UnlockState::Unlocked;
        log::debug!("volume {} unlocked", self.volume_identifier());
        Ok(())
    }

    fn region_layout(&self) -> RegionLayout {
        let bytes_per_sector = u64::from(self.volume_header.bytes_per_sector);
        // Windows 7+ records the relocated volume header as a dedicated
        // entry; Vista only has the block-header fields.
        let (volume_header_offset, volume_header_size) = match self.metadata.volume_header_block()
        {
            Some(block) => (block.offset, block.size),
            None => (
                self.block.volume_header_offset,
                u64::from(self.block.volume_header_sectors) * bytes_per_sector,
            ),
        };
        let encrypted_size = if self.block.encrypted_volume_size == 0 {
            self.volume_size
        } else {
            self.block.encrypted_volume_size.min(self.volume_size)
        };
        RegionLayout {
            volume_size: self.volume_size,
            encrypted_size,
            volume_header_offset,
            volume_header_size,
            metadata_offsets: self.metadata_offsets,
            metadata_region_size: self.block.region_size(),
        }
    }

    /// Reads up to `buf.len()` bytes of the plaintext view at `offset`.
    /// Reads clip at the volume end; the volume must be unlocked.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> crate::Result<usize> {
        if self.state != UnlockState::Unlocked {
            return Err(Error::NotUnlocked);
        }
        let virtual_volume = self.virtual_volume.as_mut().ok_or(Error::NotUnlocked)?;
        virtual_volume.read_random(&mut self.source, offset, buf)
    }

    pub fn is_locked(&self) -> bool {
        self.state != UnlockState::Unlocked
    }

    pub fn state(&self) -> UnlockState {
        self.state
    }

    pub fn volume_size(&self) -> u64 {
        self.volume_size
    }

    pub fn encryption_method(&self) -> EncryptionMethod {
        self.method
    }

    pub fn volume_identifier(&self) -> Guid {
        self.metadata.volume_identifier()
    }

    pub fn creation_time(&self) -> FileTime {
        self.metadata.header.creation_time
    }

    /// The drive label / encryption timestamp description, if recorded.
    pub fn description(&self) -> Option<&str> {
        self.metadata.description()
    }

    pub fn number_of_key_protectors(&self) -> u32 {
        self.metadata.volume_master_keys().count() as u32
    }

    /// Descriptive information about the key protector at `index`, in
    /// dataset order.
    pub fn key_protector(&self, index: u32) -> Option<KeyProtectorInfo> {
        self.metadata
            .volume_master_keys()
            .nth(index as usize)
            .map(|vmk| KeyProtectorInfo {
                identifier: vmk.identifier,
                protection_type: vmk.protection_type,
                last_modified: vmk.last_modified,
            })
    }

    /// A handle for cancelling long-running unlock work from another
    /// thread.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle(self.abort.clone())
    }

    /// Closes the volume. Credentials and key material are zeroised; this
    /// is equivalent to dropping the volume and exists for call-site
    /// clarity.
    pub fn close(self) {}
}
