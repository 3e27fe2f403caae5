use crate::{DistributedArray2d, LocalInfo, Messenger, StrError};
use rayon::prelude::*;
use russell_lab::Vector;
use russell_sparse::CooMatrix;
use tracing::debug;

/// Holds the rows of a distributed matrix owned by this process
///
/// **Notes:**
///
/// * Rows follow the ordering of the owned points (x first).
/// * Column indices refer to positions within the ghosted (local) box.
/// * Rows are inserted in order with [StencilMatrix::push_row] and then sealed with [StencilMatrix::assemble].
pub struct StencilMatrix {
    info: LocalInfo,      // index ranges of this process
    row_ptr: Vec<usize>,  // (nrow + 1) start of each row in cols/values
    cols: Vec<usize>,     // ghosted column indices
    values: Vec<f64>,     // entries
    assembled: bool,      // all rows have been set
}

impl StencilMatrix {
    /// Allocates an empty matrix for the points owned by a process
    pub fn new(info: LocalInfo, max_nnz: usize) -> Self {
        let mut row_ptr = Vec::with_capacity(info.xm * info.ym + 1);
        row_ptr.push(0);
        StencilMatrix {
            info,
            row_ptr,
            cols: Vec::with_capacity(max_nnz),
            values: Vec::with_capacity(max_nnz),
            assembled: false,
        }
    }

    /// Sets the next row, identified by grid point (i, j)
    ///
    /// Each entry is `(ci, cj, value)` where (ci, cj) must lie within the ghosted box.
    pub fn push_row(&mut self, i: usize, j: usize, entries: &[(usize, usize, f64)]) -> Result<(), StrError> {
        let LocalInfo { xs, ys, xm, ym, gxs, gys, gxm, gym, .. } = self.info;
        if self.assembled {
            return Err("cannot push rows after assembly");
        }
        let next = self.row_ptr.len() - 1;
        if next >= xm * ym {
            return Err("all rows have already been set");
        }
        if i < xs || j < ys || i >= xs + xm || (j - ys) * xm + (i - xs) != next {
            return Err("rows must be pushed in the order of the owned points");
        }
        let outside = |ci: usize, cj: usize| ci < gxs || ci >= gxs + gxm || cj < gys || cj >= gys + gym;
        if entries.iter().any(|(ci, cj, _)| outside(*ci, *cj)) {
            return Err("column lies outside the ghosted box");
        }
        for (ci, cj, value) in entries {
            self.cols.push((cj - gys) * gxm + (ci - gxs));
            self.values.push(*value);
        }
        self.row_ptr.push(self.cols.len());
        Ok(())
    }

    /// Seals the matrix
    pub fn assemble(&mut self) -> Result<(), StrError> {
        if self.row_ptr.len() - 1 != self.nrow() {
            return Err("some rows have not been set");
        }
        self.assembled = true;
        Ok(())
    }

    /// Returns the number of rows owned by this process
    pub fn nrow(&self) -> usize {
        self.info.xm * self.info.ym
    }

    /// Returns the number of stored entries
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Returns the entry at row (i, j) and column (ci, cj)
    ///
    /// Returns zero if the entry is absent, if the row is not owned by this process,
    /// or if the column lies outside the ghosted box.
    pub fn get(&self, i: usize, j: usize, ci: usize, cj: usize) -> f64 {
        let LocalInfo { xs, ys, xm, ym, gxs, gys, gxm, gym, .. } = self.info;
        if i < xs || i >= xs + xm || j < ys || j >= ys + ym {
            return 0.0;
        }
        if ci < gxs || ci >= gxs + gxm || cj < gys || cj >= gys + gym {
            return 0.0;
        }
        let r = (j - ys) * xm + (i - xs);
        let c = (cj - gys) * gxm + (ci - gxs);
        (self.row_ptr[r]..self.row_ptr[r + 1])
            .filter(|p| self.cols[*p] == c)
            .map(|p| self.values[p])
            .sum()
    }

    /// Returns the diagonal entries of the owned rows
    pub fn diagonal(&self) -> Vector {
        let LocalInfo { xs, ys, xm, ym, .. } = self.info;
        let mut diag = Vector::new(self.nrow());
        for j in ys..(ys + ym) {
            for i in xs..(xs + xm) {
                diag[(j - ys) * xm + (i - xs)] = self.get(i, j, i, j);
            }
        }
        diag
    }

    /// Executes a function over all entries as `((i, j), (ci, cj), value)`
    pub fn loop_over_entries<F>(&self, mut callback: F)
    where
        F: FnMut((usize, usize), (usize, usize), f64),
    {
        let LocalInfo { xs, ys, xm, gxs, gys, gxm, .. } = self.info;
        for r in 0..(self.row_ptr.len() - 1) {
            let row = (xs + r % xm, ys + r / xm);
            for p in self.row_ptr[r]..self.row_ptr[r + 1] {
                let col = (gxs + self.cols[p] % gxm, gys + self.cols[p] / gxm);
                callback(row, col, self.values[p]);
            }
        }
    }

    /// Performs the matrix-vector multiplication y := A ⋅ x
    ///
    /// The ghost values of `x` are exchanged first. Returns the number of floating point operations.
    pub fn mat_vec<C: Messenger>(
        &self,
        comm: &mut C,
        da: &DistributedArray2d,
        y: &mut Vector,
        x: &Vector,
    ) -> Result<f64, StrError> {
        if !self.assembled {
            return Err("matrix must be assembled first");
        }
        if y.dim() != self.nrow() {
            return Err("y vector has the wrong dimension");
        }
        let mut local = da.create_local_vector();
        da.global_to_local(comm, x, &mut local)?;
        let xl = local.as_data();
        y.as_mut_data().par_iter_mut().enumerate().for_each(|(r, yr)| {
            *yr = (self.row_ptr[r]..self.row_ptr[r + 1])
                .map(|p| self.values[p] * xl[self.cols[p]])
                .sum();
        });
        Ok(2.0 * self.nnz() as f64)
    }

    /// Converts the owned rows into a COO matrix with global numbering
    ///
    /// The COO matrix has the dimension of the whole grid; rows of other processes are empty.
    pub fn to_coo(&self, da: &DistributedArray2d) -> Result<CooMatrix, StrError> {
        if !self.assembled {
            return Err("matrix must be assembled first");
        }
        let dim = da.dim();
        let mut coo = CooMatrix::new(dim, dim, usize::max(1, self.nnz()), None, false)?;
        let mut status = Ok(());
        self.loop_over_entries(|(i, j), (ci, cj), value| {
            if status.is_ok() {
                status = coo.put(da.global_index(i, j), da.global_index(ci, cj), value);
            }
        });
        status?;
        Ok(coo)
    }
}

/// Assembles the five-point Dirichlet Laplacian on the points owned by this process
///
/// ```text
///                     -hx/hy
///                       │
///   -hy/hx ── 2(hy/hx + hx/hy) ── -hy/hx
///                       │
///                     -hx/hy
/// ```
///
/// The operator approximates `-hx hy (∂²u/∂x² + ∂²u/∂y²)`.
///
/// **Notes:**
///
/// * A boundary row holds `diag_ent` on the diagonal only.
/// * Couplings to boundary points are dropped; thus, the matrix is symmetric
///   (boundary values are zero).
/// * The result does not depend on how the grid is partitioned.
pub fn form_dirichlet_laplacian(da: &DistributedArray2d, diag_ent: f64) -> Result<StencilMatrix, StrError> {
    let info = da.local_info();
    let LocalInfo { mx, my, xs, ys, xm, ym, .. } = info;
    let (hx, hy) = da.spacing();
    let (hxdhy, hydhx) = (hx / hy, hy / hx);
    let mut aa = StencilMatrix::new(info, 5 * xm * ym);
    let mut entries = Vec::with_capacity(5);
    for j in ys..(ys + ym) {
        for i in xs..(xs + xm) {
            entries.clear();
            if da.is_boundary(i, j) {
                entries.push((i, j, diag_ent));
            } else {
                entries.push((i, j, 2.0 * (hydhx + hxdhy)));
                if i - 1 > 0 {
                    entries.push((i - 1, j, -hydhx));
                }
                if i + 1 < mx - 1 {
                    entries.push((i + 1, j, -hydhx));
                }
                if j - 1 > 0 {
                    entries.push((i, j - 1, -hxdhy));
                }
                if j + 1 < my - 1 {
                    entries.push((i, j + 1, -hxdhy));
                }
            }
            aa.push_row(i, j, &entries)?;
        }
    }
    aa.assemble()?;
    debug!(nrow = aa.nrow(), nnz = aa.nnz(), "assembled Dirichlet Laplacian");
    Ok(aa)
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
