//! Uniform grid bucketing for fixed-radius proximity queries.

/// Upper bound on the number of cells along each axis.
const MAX_CELLS_PER_SIDE: usize = 256;

#[derive(Debug, Clone, Copy)]
struct Point {
    x: f64,
    y: f64,
    weight: f64,
}

/// Weighted points bucketed into square cells no smaller than the query radius.
///
/// Every point within `radius` of a query position lies in the 3x3 block
/// of cells around it, so queries give the same answer as a pairwise scan.
pub struct SpatialGrid {
    radius: f64,
    cell_size: f64,
    n_cells: usize,
    cells: Vec<Vec<Point>>,
}

impl SpatialGrid {
    /// Create an empty grid over `[0, world_size]^2`.
    pub fn new(world_size: f64, radius: f64) -> Self {
        let cell_size = radius.max(world_size / MAX_CELLS_PER_SIDE as f64);
        let n_cells = ((world_size / cell_size).ceil() as usize).clamp(1, MAX_CELLS_PER_SIDE);
        let mut cells = Vec::new();
        cells.resize_with(n_cells * n_cells, Vec::new);
        Self {
            radius,
            cell_size,
            n_cells,
            cells,
        }
    }

    fn cell_coord(&self, pos: f64) -> usize {
        ((pos / self.cell_size).floor().max(0.0) as usize).min(self.n_cells - 1)
    }

    pub fn insert(&mut self, x: f64, y: f64, weight: f64) {
        let i_cell = self.cell_coord(y) * self.n_cells + self.cell_coord(x);
        self.cells[i_cell].push(Point { x, y, weight });
    }

    pub fn len(&self) -> usize {
        self.cells.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(Vec::is_empty)
    }

    /// Call `f` with the weight of every point within the radius of `(x, y)`.
    pub fn for_each_within<F: FnMut(f64)>(&self, x: f64, y: f64, mut f: F) {
        let r2 = self.radius * self.radius;
        let cx = self.cell_coord(x);
        let cy = self.cell_coord(y);
        for iy in cy.saturating_sub(1)..=(cy + 1).min(self.n_cells - 1) {
            for ix in cx.saturating_sub(1)..=(cx + 1).min(self.n_cells - 1) {
                for p in &self.cells[iy * self.n_cells + ix] {
                    let dx = p.x - x;
                    let dy = p.y - y;
                    if dx * dx + dy * dy <= r2 {
                        f(p.weight);
                    }
                }
            }
        }
    }

    /// Sum of the weights of all points within the radius of `(x, y)`.
    pub fn weight_within(&self, x: f64, y: f64) -> f64 {
        let mut sum = 0.0;
        self.for_each_within(x, y, |w| sum += w);
        sum
    }
}
