//! Fixed structured 2-D grid
//!
//! The domain is a box [0, lx] × [0, lz] with z = 0 at the base and z = lz
//! at the surface, discretized into nx × nz quadrilateral cells. Nodal
//! fields (temperature, velocity) live on the (nx+1) × (nz+1) nodes;
//! material properties projected from the swarm live on cells. Because the
//! grid is structured, point-in-cell lookup is O(1) arithmetic rather than
//! a search structure.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Grid {
    /// Domain width (m)
    pub lx: f64,
    /// Domain thickness (m)
    pub lz: f64,
    /// Cells in x
    pub nx: usize,
    /// Cells in z
    pub nz: usize,
    /// Cell spacing (m)
    pub dx: f64,
    pub dz: f64,
}

impl Grid {
    pub fn new(lx: f64, lz: f64, nx: usize, nz: usize) -> Self {
        Self {
            lx,
            lz,
            nx,
            nz,
            dx: lx / nx as f64,
            dz: lz / nz as f64,
        }
    }

    /// Nodes per row (x direction)
    #[inline]
    pub fn nnx(&self) -> usize {
        self.nx + 1
    }

    /// Nodes per column (z direction)
    #[inline]
    pub fn nnz(&self) -> usize {
        self.nz + 1
    }

    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.nnx() * self.nnz()
    }

    #[inline]
    pub fn num_cells(&self) -> usize {
        self.nx * self.nz
    }

    /// Flat node index from (i, k) grid coordinates; i runs in x, k in z
    #[inline]
    pub fn node_index(&self, i: usize, k: usize) -> usize {
        k * self.nnx() + i
    }

    /// Flat cell index from (i, k) cell coordinates
    #[inline]
    pub fn cell_index(&self, i: usize, k: usize) -> usize {
        k * self.nx + i
    }

    /// Node position
    #[inline]
    pub fn node_pos(&self, i: usize, k: usize) -> (f64, f64) {
        (i as f64 * self.dx, k as f64 * self.dz)
    }

    /// Cell-center position
    #[inline]
    pub fn cell_center(&self, i: usize, k: usize) -> (f64, f64) {
        (
            (i as f64 + 0.5) * self.dx,
            (k as f64 + 0.5) * self.dz,
        )
    }

    /// Depth below the surface for a z coordinate
    #[inline]
    pub fn depth(&self, z: f64) -> f64 {
        self.lz - z
    }

    #[inline]
    pub fn contains(&self, x: f64, z: f64) -> bool {
        x >= 0.0 && x <= self.lx && z >= 0.0 && z <= self.lz
    }

    /// Cell containing (x, z), or None outside the domain.
    /// Points exactly on the far boundary map into the last cell.
    pub fn cell_of(&self, x: f64, z: f64) -> Option<(usize, usize)> {
        if !self.contains(x, z) {
            return None;
        }
        let i = ((x / self.dx) as usize).min(self.nx - 1);
        let k = ((z / self.dz) as usize).min(self.nz - 1);
        Some((i, k))
    }

    /// Cell coordinates plus local coordinates (ξ, η) ∈ [0,1]² inside it
    pub fn local_coords(&self, x: f64, z: f64) -> Option<(usize, usize, f64, f64)> {
        let (i, k) = self.cell_of(x, z)?;
        let xi = (x - i as f64 * self.dx) / self.dx;
        let eta = (z - k as f64 * self.dz) / self.dz;
        Some((i, k, xi, eta))
    }

    /// The four corner-node indices of cell (i, k), counter-clockwise from
    /// the lower-left: (i,k), (i+1,k), (i+1,k+1), (i,k+1)
    #[inline]
    pub fn cell_nodes(&self, i: usize, k: usize) -> [usize; 4] {
        [
            self.node_index(i, k),
            self.node_index(i + 1, k),
            self.node_index(i + 1, k + 1),
            self.node_index(i, k + 1),
        ]
    }

    /// Bilinear shape functions at local coordinates, matching `cell_nodes`
    /// ordering
    #[inline]
    pub fn shape_functions(xi: f64, eta: f64) -> [f64; 4] {
        [
            (1.0 - xi) * (1.0 - eta),
            xi * (1.0 - eta),
            xi * eta,
            (1.0 - xi) * eta,
        ]
    }

    /// Bilinear interpolation of a nodal field at (x, z)
    pub fn interpolate(&self, nodal: &[f64], x: f64, z: f64) -> Option<f64> {
        let (i, k, xi, eta) = self.local_coords(x, z)?;
        let nodes = self.cell_nodes(i, k);
        let n = Self::shape_functions(xi, eta);
        Some(
            n[0] * nodal[nodes[0]]
                + n[1] * nodal[nodes[1]]
                + n[2] * nodal[nodes[2]]
                + n[3] * nodal[nodes[3]],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_indexing() {
        let grid = Grid::new(200e3, 40e3, 20, 8);
        assert_eq!(grid.num_nodes(), 21 * 9);
        assert_eq!(grid.num_cells(), 160);
        assert_eq!(grid.node_index(0, 0), 0);
        assert_eq!(grid.node_index(20, 0), 20);
        assert_eq!(grid.node_index(0, 1), 21);
        assert_relative_eq!(grid.dx, 10e3);
        assert_relative_eq!(grid.dz, 5e3);
    }

    #[test]
    fn test_cell_lookup() {
        let grid = Grid::new(100.0, 50.0, 10, 5);
        assert_eq!(grid.cell_of(5.0, 5.0), Some((0, 0)));
        assert_eq!(grid.cell_of(99.9, 49.9), Some((9, 4)));
        // Far boundary maps into the last cell
        assert_eq!(grid.cell_of(100.0, 50.0), Some((9, 4)));
        assert_eq!(grid.cell_of(-1.0, 5.0), None);
        assert_eq!(grid.cell_of(5.0, 51.0), None);
    }

    #[test]
    fn test_bilinear_interpolation_recovers_linear_field() {
        let grid = Grid::new(10.0, 10.0, 4, 4);
        // f(x, z) = 2x + 3z is reproduced exactly by bilinear interpolation
        let mut nodal = vec![0.0; grid.num_nodes()];
        for k in 0..grid.nnz() {
            for i in 0..grid.nnx() {
                let (x, z) = grid.node_pos(i, k);
                nodal[grid.node_index(i, k)] = 2.0 * x + 3.0 * z;
            }
        }
        for &(x, z) in &[(0.3, 0.7), (5.5, 2.2), (9.99, 9.99), (0.0, 10.0)] {
            let v = grid.interpolate(&nodal, x, z).unwrap();
            assert_relative_eq!(v, 2.0 * x + 3.0 * z, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_shape_functions_partition_of_unity() {
        for &(xi, eta) in &[(0.0, 0.0), (1.0, 1.0), (0.25, 0.75), (0.5, 0.5)] {
            let n = Grid::shape_functions(xi, eta);
            assert_relative_eq!(n.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        }
    }
}
