use crate::{Messenger, StrError};
use russell_lab::Vector;
use tracing::debug;

const TAG_EAST: i32 = 11; // message travelling toward +x
const TAG_WEST: i32 = 12; // message travelling toward -x
const TAG_NORTH: i32 = 13; // message travelling toward +y
const TAG_SOUTH: i32 = 14; // message travelling toward -y
const TAG_GATHER: i32 = 15;
const ROOT: usize = 0;

/// Holds the grid dimensions and the index ranges of this process
///
/// ```text
///  gys+gym ┌─────────────────────┐
///          │   ghosts (width 1)  │
///    ys+ym │   ┌─────────────┐   │
///          │   │    owned    │   │
///       ys │   └─────────────┘   │
///      gys └─────────────────────┘
///         gxs  xs          xs+xm  gxs+gxm
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocalInfo {
    pub mx: usize,  // number of points along x (whole grid)
    pub my: usize,  // number of points along y (whole grid)
    pub xs: usize,  // first owned i
    pub ys: usize,  // first owned j
    pub xm: usize,  // number of owned points along x
    pub ym: usize,  // number of owned points along y
    pub gxs: usize, // first ghosted i
    pub gys: usize, // first ghosted j
    pub gxm: usize, // number of ghosted points along x
    pub gym: usize, // number of ghosted points along y
}

/// Implements a two-dimensional structured grid distributed over a grid of processes
///
/// **Notes:**
///
/// * One degree of freedom per grid point.
/// * Star stencil of width 1 and no periodicity; thus, corner ghosts are never exchanged.
/// * The rank of the process at position `(p, q)` of the process grid is `q * px + p`.
/// * Global vectors hold the owned points only, ordered along x first.
/// * Local vectors hold the ghosted box, ordered along x first.
pub struct DistributedArray2d {
    px: usize,              // number of processes along x
    py: usize,              // number of processes along y
    rank: usize,            // rank of this process
    xstarts: Vec<usize>,    // (px + 1) first i owned by each process column
    ystarts: Vec<usize>,    // (py + 1) first j owned by each process row
    info: LocalInfo,        // index ranges of this process
    left: Option<usize>,    // neighbour rank toward -x
    right: Option<usize>,   // neighbour rank toward +x
    down: Option<usize>,    // neighbour rank toward -y
    up: Option<usize>,      // neighbour rank toward +y
    bounds: [f64; 4],       // xmin, xmax, ymin, ymax
}

/// Decides the process grid `(px, py)` for a `mx × my` grid and `size` processes
///
/// If neither `px` nor `py` is given, tries for a squarish distribution, giving the
/// longer grid direction more processes.
pub fn decide_process_grid(
    mx: usize,
    my: usize,
    size: usize,
    px: Option<usize>,
    py: Option<usize>,
) -> Result<(usize, usize), StrError> {
    if size == 0 {
        return Err("the number of processes must be ≥ 1");
    }
    let (m, n) = match (px, py) {
        (Some(m), Some(n)) => {
            if m * n != size {
                return Err("px * py must equal the number of processes");
            }
            (m, n)
        }
        (Some(m), None) => {
            if m == 0 || size % m != 0 {
                return Err("px must divide the number of processes");
            }
            (m, size / m)
        }
        (None, Some(n)) => {
            if n == 0 || size % n != 0 {
                return Err("py must divide the number of processes");
            }
            (size / n, n)
        }
        (None, None) => {
            let mut m = (0.5 + f64::sqrt((mx as f64) * (size as f64) / (my as f64))) as usize;
            m = usize::max(1, usize::min(m, size));
            while size % m != 0 {
                m -= 1;
            }
            let n = size / m;
            if mx > my && m < n {
                (n, m)
            } else {
                (m, n)
            }
        }
    };
    if m > mx {
        return Err("partition in x direction is too fine");
    }
    if n > my {
        return Err("partition in y direction is too fine");
    }
    Ok((m, n))
}

/// Splits `npoint` points over `nproc` processes and returns the (nproc + 1) start indices
///
/// The first `npoint % nproc` processes receive one extra point.
fn split_points(npoint: usize, nproc: usize) -> Vec<usize> {
    let mut starts = Vec::with_capacity(nproc + 1);
    starts.push(0);
    for p in 0..nproc {
        let count = npoint / nproc + if p < npoint % nproc { 1 } else { 0 };
        starts.push(starts[p] + count);
    }
    starts
}

/// Finds the process column (or row) owning index `k`
fn owner(starts: &[usize], k: usize) -> usize {
    starts.partition_point(|s| *s <= k) - 1
}

impl DistributedArray2d {
    /// Allocates a new instance
    ///
    /// # Input
    ///
    /// * `comm` -- the communicator shared by all processes holding the grid
    /// * `mx` -- number of points along x (≥ 2)
    /// * `my` -- number of points along y (≥ 2)
    /// * `px` -- number of processes along x (None means decide)
    /// * `py` -- number of processes along y (None means decide)
    pub fn new<C: Messenger>(
        comm: &mut C,
        mx: usize,
        my: usize,
        px: Option<usize>,
        py: Option<usize>,
    ) -> Result<Self, StrError> {
        if mx < 2 {
            return Err("mx must be ≥ 2");
        }
        if my < 2 {
            return Err("my must be ≥ 2");
        }
        let rank = comm.rank()?;
        let size = comm.size()?;
        let (px, py) = decide_process_grid(mx, my, size, px, py)?;
        let xstarts = split_points(mx, px);
        let ystarts = split_points(my, py);
        let (p, q) = (rank % px, rank / px);
        let (xs, ys) = (xstarts[p], ystarts[q]);
        let (xm, ym) = (xstarts[p + 1] - xs, ystarts[q + 1] - ys);
        let left = if p > 0 { Some(rank - 1) } else { None };
        let right = if p + 1 < px { Some(rank + 1) } else { None };
        let down = if q > 0 { Some(rank - px) } else { None };
        let up = if q + 1 < py { Some(rank + px) } else { None };
        let gxs = if left.is_some() { xs - 1 } else { xs };
        let gys = if down.is_some() { ys - 1 } else { ys };
        let gxe = if right.is_some() { xs + xm + 1 } else { xs + xm };
        let gye = if up.is_some() { ys + ym + 1 } else { ys + ym };
        let info = LocalInfo {
            mx,
            my,
            xs,
            ys,
            xm,
            ym,
            gxs,
            gys,
            gxm: gxe - gxs,
            gym: gye - gys,
        };
        debug!(rank, px, py, ?info, "created distributed array");
        Ok(DistributedArray2d {
            px,
            py,
            rank,
            xstarts,
            ystarts,
            info,
            left,
            right,
            down,
            up,
            bounds: [0.0, 1.0, 0.0, 1.0],
        })
    }

    /// Returns the index ranges of this process
    pub fn local_info(&self) -> LocalInfo {
        self.info
    }

    /// Returns the process grid `(px, py)`
    pub fn process_grid(&self) -> (usize, usize) {
        (self.px, self.py)
    }

    /// Returns the neighbour ranks `[left, right, down, up]`
    pub fn neighbors(&self) -> [Option<usize>; 4] {
        [self.left, self.right, self.down, self.up]
    }

    /// Sets uniformly spaced coordinates spanning the given rectangle
    pub fn set_uniform_coordinates(&mut self, xmin: f64, xmax: f64, ymin: f64, ymax: f64) -> Result<(), StrError> {
        if xmax <= xmin {
            return Err("xmax must be greater than xmin");
        }
        if ymax <= ymin {
            return Err("ymax must be greater than ymin");
        }
        self.bounds = [xmin, xmax, ymin, ymax];
        Ok(())
    }

    /// Returns the grid spacing `(hx, hy)`
    pub fn spacing(&self) -> (f64, f64) {
        let [xmin, xmax, ymin, ymax] = self.bounds;
        (
            (xmax - xmin) / ((self.info.mx - 1) as f64),
            (ymax - ymin) / ((self.info.my - 1) as f64),
        )
    }

    /// Returns the coordinates of grid point (i, j)
    pub fn coordinates(&self, i: usize, j: usize) -> (f64, f64) {
        let (hx, hy) = self.spacing();
        (self.bounds[0] + (i as f64) * hx, self.bounds[2] + (j as f64) * hy)
    }

    /// Returns the total number of grid points
    pub fn dim(&self) -> usize {
        self.info.mx * self.info.my
    }

    /// Tells whether (i, j) lies on the boundary of the grid
    pub fn is_boundary(&self, i: usize, j: usize) -> bool {
        i == 0 || j == 0 || i == self.info.mx - 1 || j == self.info.my - 1
    }

    /// Allocates a vector holding the owned points
    pub fn create_global_vector(&self) -> Vector {
        Vector::new(self.info.xm * self.info.ym)
    }

    /// Allocates a vector holding the ghosted box
    pub fn create_local_vector(&self) -> Vector {
        Vector::new(self.info.gxm * self.info.gym)
    }

    /// Returns the position of owned point (i, j) within a global vector
    pub fn owned_index(&self, i: usize, j: usize) -> usize {
        (j - self.info.ys) * self.info.xm + (i - self.info.xs)
    }

    /// Returns the position of point (i, j) within a local (ghosted) vector
    pub fn ghosted_index(&self, i: usize, j: usize) -> usize {
        (j - self.info.gys) * self.info.gxm + (i - self.info.gxs)
    }

    /// Returns the position of point (i, j) in the global ordering
    ///
    /// The global ordering numbers the points of rank 0 first, then rank 1, and so on.
    pub fn global_index(&self, i: usize, j: usize) -> usize {
        let mx = self.info.mx;
        let (p, q) = (owner(&self.xstarts, i), owner(&self.ystarts, j));
        let (xs, ys) = (self.xstarts[p], self.ystarts[q]);
        let (xm, ym) = (self.xstarts[p + 1] - xs, self.ystarts[q + 1] - ys);
        ys * mx + ym * xs + (j - ys) * xm + (i - xs)
    }

    /// Returns the position of point (i, j) in the natural (lexicographic) ordering
    pub fn natural_index(&self, i: usize, j: usize) -> usize {
        j * self.info.mx + i
    }

    /// Executes a function over all owned points
    ///
    /// The arguments of the callback are `(k, i, j, x, y)` where `k` is the position
    /// within a global vector.
    pub fn loop_over_owned_points<F>(&self, mut callback: F)
    where
        F: FnMut(usize, usize, usize, f64, f64),
    {
        let LocalInfo { xs, ys, xm, ym, .. } = self.info;
        let mut k = 0;
        for j in ys..(ys + ym) {
            for i in xs..(xs + xm) {
                let (x, y) = self.coordinates(i, j);
                callback(k, i, j, x, y);
                k += 1;
            }
        }
    }

    /// Copies the owned values into a local vector and fills its ghost points
    ///
    /// Neighbours exchange with their partner in two phases per direction: processes in an
    /// even position send first while processes in an odd position receive first.
    pub fn global_to_local<C: Messenger>(&self, comm: &mut C, global: &Vector, local: &mut Vector) -> Result<(), StrError> {
        let LocalInfo { xs, ys, xm, ym, .. } = self.info;
        if global.dim() != xm * ym {
            return Err("global vector has the wrong dimension");
        }
        if local.dim() != self.info.gxm * self.info.gym {
            return Err("local vector has the wrong dimension");
        }
        for j in ys..(ys + ym) {
            for i in xs..(xs + xm) {
                local[self.ghosted_index(i, j)] = global[self.owned_index(i, j)];
            }
        }

        // along x: columns of ym values
        let even = (self.rank % self.px) % 2 == 0;
        let mut outgoing = vec![0.0; ym];
        let mut incoming = vec![0.0; ym];
        let column = |i: usize, buf: &mut [f64]| {
            for (k, j) in (ys..(ys + ym)).enumerate() {
                buf[k] = global[self.owned_index(i, j)];
            }
        };
        let phases = if even {
            [(self.right, true), (self.left, false)]
        } else {
            [(self.left, false), (self.right, true)]
        };
        for (partner, toward_plus) in phases {
            if let Some(partner) = partner {
                let (send_col, recv_col, send_tag, recv_tag) = if toward_plus {
                    (xs + xm - 1, xs + xm, TAG_EAST, TAG_WEST)
                } else {
                    (xs, xs - 1, TAG_WEST, TAG_EAST)
                };
                column(send_col, outgoing.as_mut_slice());
                exchange(comm, partner, even, &outgoing, send_tag, &mut incoming, recv_tag)?;
                for (k, j) in (ys..(ys + ym)).enumerate() {
                    local[self.ghosted_index(recv_col, j)] = incoming[k];
                }
            }
        }

        // along y: rows of xm values
        let even = (self.rank / self.px) % 2 == 0;
        let mut outgoing = vec![0.0; xm];
        let mut incoming = vec![0.0; xm];
        let phases = if even {
            [(self.up, true), (self.down, false)]
        } else {
            [(self.down, false), (self.up, true)]
        };
        for (partner, toward_plus) in phases {
            if let Some(partner) = partner {
                let (send_row, recv_row, send_tag, recv_tag) = if toward_plus {
                    (ys + ym - 1, ys + ym, TAG_NORTH, TAG_SOUTH)
                } else {
                    (ys, ys - 1, TAG_SOUTH, TAG_NORTH)
                };
                let start = self.owned_index(xs, send_row);
                outgoing.copy_from_slice(&global.as_data()[start..(start + xm)]);
                exchange(comm, partner, even, &outgoing, send_tag, &mut incoming, recv_tag)?;
                let start = self.ghosted_index(xs, recv_row);
                local.as_mut_data()[start..(start + xm)].copy_from_slice(&incoming);
            }
        }
        Ok(())
    }

    /// Collects a global vector on the root process in natural ordering
    ///
    /// Returns `None` on the other processes.
    pub fn gather_natural<C: Messenger>(&self, comm: &mut C, global: &Vector) -> Result<Option<Vec<f64>>, StrError> {
        if global.dim() != self.info.xm * self.info.ym {
            return Err("global vector has the wrong dimension");
        }
        if self.rank != ROOT {
            comm.send(global.as_data(), ROOT, TAG_GATHER)?;
            return Ok(None);
        }
        let mx = self.info.mx;
        let mut natural = vec![0.0; self.dim()];
        for r in 0..(self.px * self.py) {
            let (p, q) = (r % self.px, r / self.px);
            let (xs, ys) = (self.xstarts[p], self.ystarts[q]);
            let (xm, ym) = (self.xstarts[p + 1] - xs, self.ystarts[q + 1] - ys);
            let received;
            let values = if r == ROOT {
                global.as_data().as_slice()
            } else {
                let mut buffer = vec![0.0; xm * ym];
                comm.receive(&mut buffer, r, TAG_GATHER)?;
                received = buffer;
                received.as_slice()
            };
            for jj in 0..ym {
                let start = (ys + jj) * mx + xs;
                natural[start..(start + xm)].copy_from_slice(&values[(jj * xm)..((jj + 1) * xm)]);
            }
        }
        Ok(Some(natural))
    }
}

/// Sends to and receives from `partner` in an order that cannot deadlock
fn exchange<C: Messenger>(
    comm: &mut C,
    partner: usize,
    send_first: bool,
    outgoing: &[f64],
    send_tag: i32,
    incoming: &mut [f64],
    recv_tag: i32,
) -> Result<(), StrError> {
    if send_first {
        comm.send(outgoing, partner, send_tag)?;
        comm.receive(incoming, partner, recv_tag)
    } else {
        comm.receive(incoming, partner, recv_tag)?;
        comm.send(outgoing, partner, send_tag)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
