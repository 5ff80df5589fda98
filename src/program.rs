use crate::gpu::NumVolumes;

use volstream_core::SmallKeyHashMap;

/// Shader programs, generated on first use for each combination of volume counts.
pub struct ProgramCache<P> {
    programs: SmallKeyHashMap<NumVolumes, P>,
}

impl<P> Default for ProgramCache<P> {
    fn default() -> Self {
        Self {
            programs: SmallKeyHashMap::default(),
        }
    }
}

impl<P> ProgramCache<P> {
    /// There is no program for zero volumes.
    pub fn get_or_create(&mut self, num_volumes: NumVolumes, create: impl FnOnce(NumVolumes) -> P) -> Option<&P> {
        if num_volumes.is_empty() {
            return None;
        }
        Some(self.programs.entry(num_volumes).or_insert_with(|| {
            log::debug!("Creating program for {:?}", num_volumes);
            create(num_volumes)
        }))
    }

    pub fn get(&self, num_volumes: NumVolumes) -> Option<&P> {
        self.programs.get(&num_volumes)
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn creates_each_program_once() {
        let mut cache = ProgramCache::default();
        let mut created = 0;
        let key = NumVolumes { cached: 2, simple: 1 };
        for _ in 0..3 {
            let program = cache.get_or_create(key, |n| {
                created += 1;
                format!("{}+{}", n.cached, n.simple)
            });
            assert_eq!(program.map(String::as_str), Some("2+1"));
        }
        assert_eq!(created, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn no_program_without_volumes() {
        let mut cache = ProgramCache::<u32>::default();
        assert!(cache.get_or_create(NumVolumes::default(), |_| 1).is_none());
        assert!(cache.is_empty());
    }
}
