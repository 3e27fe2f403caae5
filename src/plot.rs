use crate::{DistributedArray2d, StrError};
use plotpy::{Contour, Plot};

/// Arranges values given in natural ordering as a (my × mx) table
fn to_table(values: &[f64], mx: usize, my: usize) -> Result<Vec<Vec<f64>>, StrError> {
    if values.len() != mx * my {
        return Err("values must have mx * my entries");
    }
    Ok(values.chunks(mx).map(|row| row.to_vec()).collect())
}

/// Returns the coordinate tables (xx, yy) of the whole grid
fn coordinate_tables(da: &DistributedArray2d) -> (Vec<Vec<f64>>, Vec<Vec<f64>>) {
    let info = da.local_info();
    let mut xx = vec![vec![0.0; info.mx]; info.my];
    let mut yy = vec![vec![0.0; info.mx]; info.my];
    for j in 0..info.my {
        for i in 0..info.mx {
            let (x, y) = da.coordinates(i, j);
            xx[j][i] = x;
            yy[j][i] = y;
        }
    }
    (xx, yy)
}

/// Saves contour plots of the numerical solution and of the error side by side
///
/// Both fields are given in natural ordering (see [DistributedArray2d::gather_natural]).
pub fn plot_solution(da: &DistributedArray2d, solution: &[f64], error: &[f64], path: &str) -> Result<(), StrError> {
    let info = da.local_info();
    let (xx, yy) = coordinate_tables(da);
    let uu = to_table(solution, info.mx, info.my)?;
    let ee = to_table(error, info.mx, info.my)?;
    let mut contour_u = Contour::new();
    let mut contour_e = Contour::new();
    contour_u.draw(&xx, &yy, &uu);
    contour_e.draw(&xx, &yy, &ee);
    let mut plot = Plot::new();
    plot.set_subplot(1, 2, 1)
        .add(&contour_u)
        .set_title("u")
        .set_labels("x", "y");
    plot.set_subplot(1, 2, 2)
        .add(&contour_e)
        .set_title("u - uexact")
        .set_labels("x", "y");
    plot.save(path)
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
