//! The region map: an ordered, non-overlapping cover of the volume that
//! tells the virtual volume how each byte range is served.

use crate::Error;

/// How reads inside a region are satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// Ciphertext in place; decrypt per sector with the disk offset.
    Encrypted,
    /// Ciphertext relocated: logical reads are served by decrypting the
    /// run starting at `source_offset`, using the offsets the data is
    /// stored at. This is how the original boot sectors survive.
    Relocated { source_offset: u64 },
    /// An FVE metadata block. Virtualized: reads return zero bytes, so
    /// downstream filesystem parsers never see `-FVE-FS-` structures.
    MetadataBlock,
    /// Plaintext in place (the tail of a partially-encrypted volume, or
    /// everything on a fully decrypted one).
    Unencrypted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub offset: u64,
    pub size: u64,
    pub kind: RegionKind,
}

impl Region {
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Inputs for building the region map, gathered from the selected
/// metadata block and the boot sector.
#[derive(Debug, Clone)]
pub(crate) struct RegionLayout {
    pub volume_size: u64,
    /// Bytes from offset 0 that are encrypted; the rest is a plaintext
    /// tail.
    pub encrypted_size: u64,
    /// Where the relocated volume-header run is stored.
    pub volume_header_offset: u64,
    /// Length of the relocated run; 0 when nothing is relocated.
    pub volume_header_size: u64,
    pub metadata_offsets: [u64; 3],
    pub metadata_region_size: u64,
}

/// Ordered, gap-free partition of `[0, volume_size)`.
#[derive(Debug, Clone)]
pub struct RegionMap {
    regions: Vec<Region>,
    volume_size: u64,
}

impl RegionMap {
    /// A single unencrypted region covering the whole volume.
    pub(crate) fn unencrypted(volume_size: u64) -> RegionMap {
        RegionMap {
            regions: vec![Region {
                offset: 0,
                size: volume_size,
                kind: RegionKind::Unencrypted,
            }],
            volume_size,
        }
    }

    pub(crate) fn build(layout: &RegionLayout) -> crate::Result<RegionMap> {
        if layout.volume_size == 0 {
            return Err(Error::InvalidData("volume size is zero".to_string()));
        }

        // Fixed-purpose regions first, in precedence order: later entries
        // only occupy ranges earlier ones left free.
        let mut placed: Vec<Region> = Vec::new();
        if layout.volume_header_size > 0 {
            place(
                &mut placed,
                Region {
                    offset: 0,
                    size: layout.volume_header_size.min(layout.volume_size),
                    kind: RegionKind::Relocated {
                        source_offset: layout.volume_header_offset,
                    },
                },
            );
        }
        for metadata_offset in layout.metadata_offsets {
            if metadata_offset >= layout.volume_size {
                continue;
            }
            let size = layout
                .metadata_region_size
                .min(layout.volume_size - metadata_offset);
            place(
                &mut placed,
                Region {
                    offset: metadata_offset,
                    size,
                    kind: RegionKind::MetadataBlock,
                },
            );
        }
        if layout.encrypted_size < layout.volume_size {
            place(
                &mut placed,
                Region {
                    offset: layout.encrypted_size,
                    size: layout.volume_size - layout.encrypted_size,
                    kind: RegionKind::Unencrypted,
                },
            );
        }

        // Everything still uncovered is the encrypted body.
        placed.sort_by_key(|region| region.offset);
        let mut regions = Vec::with_capacity(placed.len() * 2 + 1);
        let mut cursor = 0u64;
        for region in placed {
            if region.offset > cursor {
                regions.push(Region {
                    offset: cursor,
                    size: region.offset - cursor,
                    kind: RegionKind::Encrypted,
                });
            }
            cursor = region.end();
            regions.push(region);
        }
        if cursor < layout.volume_size {
            regions.push(Region {
                offset: cursor,
                size: layout.volume_size - cursor,
                kind: RegionKind::Encrypted,
            });
        }

        let map = RegionMap {
            regions,
            volume_size: layout.volume_size,
        };
        debug_assert!(map.covers_exactly());
        Ok(map)
    }

    pub fn volume_size(&self) -> u64 {
        self.volume_size
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// The region containing `offset`.
    pub fn region_at(&self, offset: u64) -> Option<&Region> {
        if offset >= self.volume_size {
            return None;
        }
        let index = self
            .regions
            .partition_point(|region| region.offset <= offset);
        self.regions.get(index.checked_sub(1)?)
    }

    /// True when the regions tile `[0, volume_size)` without gaps or
    /// overlaps.
    fn covers_exactly(&self) -> bool {
        let mut cursor = 0u64;
        for region in &self.regions {
            if region.offset != cursor || region.size == 0 {
                return false;
            }
            cursor = region.end();
        }
        cursor == self.volume_size
    }
}

/// Inserts `candidate` into `placed`, keeping only the parts that do not
/// overlap already-placed regions. Relocated fragments keep their source
/// correspondence.
fn place(placed: &mut Vec<Region>, candidate: Region) {
    let mut fragments = vec![candidate];
    for existing in placed.iter() {
        let mut next = Vec::new();
        for fragment in fragments {
            // Left part before the existing region.
            if fragment.offset < existing.offset {
                let size = fragment.size.min(existing.offset - fragment.offset);
                next.push(Region {
                    offset: fragment.offset,
                    size,
                    kind: fragment.kind,
                });
            }
            // Right part after the existing region.
            if fragment.end() > existing.end() {
                let offset = fragment.offset.max(existing.end());
                let kind = match fragment.kind {
                    RegionKind::Relocated { source_offset } => RegionKind::Relocated {
                        source_offset: source_offset + (offset - fragment.offset),
                    },
                    other => other,
                };
                next.push(Region {
                    offset,
                    size: fragment.end() - offset,
                    kind,
                });
            }
        }
        fragments = next;
    }
    placed.extend(fragments.into_iter().filter(|region| region.size > 0));
}
