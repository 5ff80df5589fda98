/// How much work the next draw has to do, from least to most.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum RepaintType {
    /// Nothing is outstanding.
    #[default]
    None,
    /// Only overlay content changed. Blocks and dithering are left alone.
    Scene,
    /// Continue the progressive refinement toward the current target.
    Dither,
    /// Blocks are missing or new data arrived. Re-select blocks with the current base levels and extend dithering.
    Load,
    /// The view or the render settings changed. Start over.
    Full,
}

impl RepaintType {
    pub fn max(self, other: Self) -> Self {
        std::cmp::max(self, other)
    }

    /// Whether the block selection has to be recomputed.
    pub fn updates_blocks(self) -> bool {
        self >= RepaintType::Load
    }
}

/// Accumulates repaint requests until the next draw consumes them.
#[derive(Clone, Copy, Debug, Default)]
pub struct Repaint {
    pending: RepaintType,
}

impl Repaint {
    /// Requesting a lower severity never downgrades a pending one.
    pub fn request(&mut self, severity: RepaintType) {
        self.pending = self.pending.max(severity);
    }

    pub fn pending(&self) -> RepaintType {
        self.pending
    }

    pub fn take(&mut self) -> RepaintType {
        std::mem::take(&mut self.pending)
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
    fn severity_order() {
        assert!(RepaintType::None < RepaintType::Scene);
        assert!(RepaintType::Scene < RepaintType::Dither);
        assert!(RepaintType::Dither < RepaintType::Load);
        assert!(RepaintType::Load < RepaintType::Full);
        assert!(RepaintType::Full.updates_blocks());
        assert!(!RepaintType::Dither.updates_blocks());
    }

    #[test]
    fn request_never_downgrades() {
        let mut repaint = Repaint::default();
        repaint.request(RepaintType::Full);
        repaint.request(RepaintType::Scene);
        assert_eq!(repaint.pending(), RepaintType::Full);
        assert_eq!(repaint.take(), RepaintType::Full);
        assert_eq!(repaint.pending(), RepaintType::None);

        repaint.request(RepaintType::Dither);
        repaint.request(RepaintType::Load);
        assert_eq!(repaint.take(), RepaintType::Load);
    }
}
