use anyhow::{ensure, Result};
use bevy::math::IVec2;

/// Apex offset directions for the eight triangle orientations.
///
/// Even orientations point along the grid diagonals, odd ones along the axes.
/// Rotating `omega` by two steps rotates the triangle by 90 degrees around its
/// apex, rotating by four selects the opposite half of the diamond.
const DIAGONAL: [IVec2; 4] = [
    IVec2::new(1, -1),
    IVec2::new(1, 1),
    IVec2::new(-1, 1),
    IVec2::new(-1, -1),
];
const AXIS: [IVec2; 4] = [
    IVec2::new(1, 0),
    IVec2::new(0, 1),
    IVec2::new(-1, 0),
    IVec2::new(0, -1),
];

/// One right triangle of the implicit longest-edge-bisection hierarchy.
///
/// The apex is the diamond point of the triangle, the midpoint of its longest
/// edge. It is stored in half-sample steps (range `[0, 2N]`), so that the
/// cell-center apexes of the finest even-level triangles stay exactly
/// representable. `base_length` is measured in samples, along the short edge
/// for even levels and along the long edge for odd levels. `omega` encodes the
/// orientation in 45 degree steps; its lowest bit equals the level parity.
///
/// No node storage exists anywhere. Parents, children and diamond neighbours
/// are all derived arithmetically from these four values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TriangleNode {
    pub apex: IVec2,
    pub base_length: u32,
    pub omega: u8,
}

impl TriangleNode {
    #[inline]
    fn direction(self, step: u8) -> IVec2 {
        let j = (((self.omega >> 1) + step) & 3) as usize;
        if self.omega & 1 == 0 {
            DIAGONAL[j]
        } else {
            AXIS[j]
        }
    }

    /// The right-angle vertex, in half-sample steps.
    #[inline]
    pub fn right_angle_vertex(self) -> IVec2 {
        self.apex + self.base_length as i32 * self.direction(0)
    }

    /// Both endpoints of the longest edge, in half-sample steps.
    ///
    /// The apex is their midpoint; the diamond mate shares them.
    #[inline]
    pub fn hypotenuse(self) -> [IVec2; 2] {
        [
            self.apex + self.base_length as i32 * self.direction(1),
            self.apex + self.base_length as i32 * self.direction(3),
        ]
    }

    /// The three corners `[right angle, hyp a, hyp b]`, in half-sample steps.
    ///
    /// Corners always lie on sample positions (even coordinates), even for the
    /// finest leaf triangles whose apex does not.
    #[inline]
    pub fn corners(self) -> [IVec2; 3] {
        let [a, b] = self.hypotenuse();
        [self.right_angle_vertex(), a, b]
    }

    /// The apex position in whole samples, or `None` for the cell-center
    /// apexes of the finest even-level leaves.
    #[inline]
    pub fn apex_sample(self) -> Option<(u32, u32)> {
        if self.apex.x & 1 == 0 && self.apex.y & 1 == 0 {
            Some(((self.apex.x / 2) as u32, (self.apex.y / 2) as u32))
        } else {
            None
        }
    }
}

/// The implicit binary tree of right triangles over an `(N+1)x(N+1)`
/// heightfield. Holds only the two resolution parameters; every query is a
/// pure function of a [`TriangleNode`] value.
#[derive(Clone, Copy, Debug)]
pub struct TriangleHierarchy {
    size: u32,
    subdivide: u32,
}

impl TriangleHierarchy {
    /// Creates the hierarchy for a grid of `size`x`size` cells rendered with
    /// `subdivide`x`subdivide` triangle batches.
    ///
    /// Fails for resolutions that would corrupt the traversal: `size` and
    /// `subdivide` must be powers of two with `subdivide <= size`.
    pub fn new(size: u32, subdivide: u32) -> Result<Self> {
        ensure!(
            size > 0 && size.is_power_of_two(),
            "heightfield resolution {size} is not a power of two"
        );
        ensure!(
            subdivide > 0 && subdivide.is_power_of_two(),
            "subdivide count {subdivide} is not a power of two"
        );
        ensure!(
            subdivide <= size,
            "subdivide count {subdivide} exceeds the heightfield resolution {size}"
        );

        Ok(Self { size, subdivide })
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    pub fn subdivide(&self) -> u32 {
        self.subdivide
    }

    /// The level of the finest selectable triangles. A traversal that refines
    /// down to this level produces the full leaf tessellation of
    /// `2 * (size / subdivide)^2` triangles.
    #[inline]
    pub fn tree_depth(&self) -> u16 {
        2 * (self.size / self.subdivide).ilog2() as u16
    }

    /// One of the two triangles covering the whole square domain, split along
    /// its diagonal. Their shared apex sits at the grid center.
    pub fn root(&self, i: u8) -> TriangleNode {
        debug_assert!(i < 2);
        TriangleNode {
            apex: IVec2::splat(self.size as i32),
            base_length: self.size,
            omega: 4 * i,
        }
    }

    /// True once a triangle batch reaches the tessellation granularity.
    #[inline]
    pub fn is_leaf(&self, node: TriangleNode) -> bool {
        node.base_length <= self.subdivide
    }

    #[inline]
    pub fn level(&self, node: TriangleNode) -> u16 {
        2 * (self.size / node.base_length).ilog2() as u16 + (node.omega & 1) as u16
    }

    /// The half of the parent containing the first hypotenuse endpoint.
    ///
    /// Bisection inserts the new apex at the midpoint of the parent's longest
    /// edge. Both children together cover the parent exactly, sharing the
    /// edge from the parent's apex to its right-angle vertex.
    pub fn left_child(&self, node: TriangleNode) -> TriangleNode {
        let [a, _] = node.hypotenuse();
        TriangleNode {
            apex: (a + node.right_angle_vertex()) / 2,
            base_length: self.child_base_length(node),
            omega: (node.omega + 5) & 7,
        }
    }

    /// The half of the parent containing the second hypotenuse endpoint.
    pub fn right_child(&self, node: TriangleNode) -> TriangleNode {
        let [_, b] = node.hypotenuse();
        TriangleNode {
            apex: (b + node.right_angle_vertex()) / 2,
            base_length: self.child_base_length(node),
            omega: (node.omega + 3) & 7,
        }
    }

    #[inline]
    fn child_base_length(&self, node: TriangleNode) -> u32 {
        if node.omega & 1 == 0 {
            node.base_length
        } else {
            node.base_length / 2
        }
    }

    /// The triangle sharing this node's longest edge from the other half of
    /// the diamond, or `None` if the apex lies on the domain boundary.
    pub fn diamond_neighbor(&self, node: TriangleNode) -> Option<TriangleNode> {
        let max = 2 * self.size as i32;
        if node.apex.x == 0 || node.apex.y == 0 || node.apex.x == max || node.apex.y == max {
            return None;
        }
        Some(TriangleNode {
            omega: node.omega ^ 4,
            ..node
        })
    }
}
