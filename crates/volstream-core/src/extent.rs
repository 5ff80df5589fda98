use glam::IVec3;
use itertools::iproduct;

/// An axis-aligned box of integer lattice points, given by its minimum and shape.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Extent3i {
    pub minimum: IVec3,
    pub shape: IVec3,
}

impl Extent3i {
    pub const EMPTY: Self = Self {
        minimum: IVec3::ZERO,
        shape: IVec3::ZERO,
    };

    pub fn from_min_and_shape(minimum: IVec3, shape: IVec3) -> Self {
        Self {
            minimum,
            shape: shape.max(IVec3::ZERO),
        }
    }

    /// `max` is inclusive.
    pub fn from_min_and_max(minimum: IVec3, max: IVec3) -> Self {
        Self::from_min_and_shape(minimum, max - minimum + IVec3::ONE)
    }

    /// `lub` is exclusive.
    pub fn from_min_and_lub(minimum: IVec3, lub: IVec3) -> Self {
        Self::from_min_and_shape(minimum, lub - minimum)
    }

    /// The least upper bound (exclusive maximum).
    pub fn least_upper_bound(&self) -> IVec3 {
        self.minimum + self.shape
    }

    /// The inclusive maximum.
    pub fn max(&self) -> IVec3 {
        self.least_upper_bound() - IVec3::ONE
    }

    pub fn is_empty(&self) -> bool {
        self.shape.cmple(IVec3::ZERO).any()
    }

    pub fn volume(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            self.shape.x as u64 * self.shape.y as u64 * self.shape.z as u64
        }
    }

    pub fn contains(&self, p: IVec3) -> bool {
        p.cmpge(self.minimum).all() && p.cmplt(self.least_upper_bound()).all()
    }

    pub fn intersection(&self, other: &Self) -> Self {
        let minimum = self.minimum.max(other.minimum);
        let lub = self.least_upper_bound().min(other.least_upper_bound());
        Self::from_min_and_lub(minimum, lub)
    }

    /// The smallest extent containing both `self` and `other`. Empty extents are ignored.
    pub fn union(&self, other: &Self) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let minimum = self.minimum.min(other.minimum);
        let lub = self.least_upper_bound().max(other.least_upper_bound());
        Self::from_min_and_lub(minimum, lub)
    }

    /// Iterates over all points in x-fastest order.
    pub fn iter3(&self) -> impl Iterator<Item = IVec3> {
        let min = self.minimum;
        let lub = if self.is_empty() {
            min
        } else {
            self.least_upper_bound()
        };
        iproduct!(min.z..lub.z, min.y..lub.y, min.x..lub.x).map(|(z, y, x)| IVec3::new(x, y, z))
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
    fn intersection_of_disjoint_extents_is_empty() {
        let a = Extent3i::from_min_and_shape(IVec3::ZERO, IVec3::splat(2));
        let b = Extent3i::from_min_and_shape(IVec3::splat(3), IVec3::splat(2));
        assert!(a.intersection(&b).is_empty());
        assert_eq!(a.intersection(&b).volume(), 0);
    }

    #[test]
    fn iter3_is_x_fastest() {
        let e = Extent3i::from_min_and_max(IVec3::new(1, 0, 0), IVec3::new(2, 1, 0));
        let points: Vec<_> = e.iter3().collect();
        assert_eq!(
            points,
            vec![
                IVec3::new(1, 0, 0),
                IVec3::new(2, 0, 0),
                IVec3::new(1, 1, 0),
                IVec3::new(2, 1, 0),
            ]
        );
        assert_eq!(e.volume(), 4);
    }

    #[test]
    fn union_ignores_empty() {
        let a = Extent3i::from_min_and_shape(IVec3::splat(-1), IVec3::splat(2));
        assert_eq!(Extent3i::EMPTY.union(&a), a);
        let b = Extent3i::from_min_and_shape(IVec3::splat(4), IVec3::ONE);
        assert_eq!(a.union(&b), Extent3i::from_min_and_max(IVec3::splat(-1), IVec3::splat(4)));
    }
}
