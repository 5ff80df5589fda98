use crate::volume_blocks::VolumeBlocks;

/// What admission control had to give up to fit the cache.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AdmissionReport {
    /// Number of base level increments.
    pub coarsened: usize,
    /// Required blocks dropped after every volume reached its coarsest level.
    pub truncated: usize,
}

/// Keeps the total number of required blocks within `capacity`.
///
/// While demand exceeds capacity, the volume with the most required blocks is coarsened by one level; a volume that is
/// already at its coarsest level is no longer considered. If that is not enough, required blocks are truncated, keeping
/// blocks of lower volume index first and, within a volume, the nearest blocks. Base levels are never lowered here.
pub fn admit(volumes: &mut [&mut VolumeBlocks], capacity: usize) -> AdmissionReport {
    let mut report = AdmissionReport::default();
    let mut candidates: Vec<bool> = vec![true; volumes.len()];

    loop {
        let total: usize = volumes.iter().map(|v| v.num_required()).sum();
        if total <= capacity {
            return report;
        }

        // Largest demand first. Ties go to the lower index.
        let largest = volumes
            .iter()
            .enumerate()
            .filter(|(i, _)| candidates[*i])
            .max_by_key(|(i, v)| (v.num_required(), std::cmp::Reverse(*i)))
            .map(|(i, _)| i);

        match largest {
            Some(i) if volumes[i].can_coarsen() => {
                let v = &mut volumes[i];
                let level = v.base_level() + 1;
                v.set_base_level(level);
                report.coarsened += 1;
                log::debug!(
                    "Coarsened {:?} to base level {}, {} blocks required",
                    v.volume_id(),
                    level,
                    v.num_required()
                );
            }
            Some(i) => candidates[i] = false,
            None => break,
        }
    }

    let mut remaining = capacity;
    for v in volumes.iter_mut() {
        let keep = v.num_required().min(remaining);
        report.truncated += v.num_required() - keep;
        v.truncate_required(keep);
        remaining -= keep;
    }
    log::warn!(
        "Cache capacity of {} tiles is too small for the current view, dropped {} blocks",
        capacity,
        report.truncated
    );

    report
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
