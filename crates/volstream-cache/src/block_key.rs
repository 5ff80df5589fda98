use volstream_core::glam::IVec3;

/// A stable identifier of a volume source. Block keys from different volumes never collide as long as their sources
/// report distinct ids.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct VolumeId(pub u64);

/// Identifies one block of source data: the grid cell `coords` at resolution `level` of volume `volume`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct BlockKey {
    pub volume: VolumeId,
    pub level: u8,
    pub coords: IVec3,
}

impl BlockKey {
    pub fn new(volume: VolumeId, level: u8, coords: IVec3) -> Self {
        Self {
            volume,
            level,
            coords,
        }
    }
}
