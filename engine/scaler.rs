//! Feature standardization: `(x - mean) / std` per column, with statistics
//! estimated from a reference (training) matrix only.

use ndarray::{Array1, Array2, ArrayView2, Axis};

/// Per-column centering and scaling statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct Standardizer {
    pub means: Array1<f64>,
    /// Population standard deviations. Constant columns store 1.0 so they map to zero.
    pub scales: Array1<f64>,
}

impl Standardizer {
    /// Estimates column means and population standard deviations.
    pub fn fit(x: ArrayView2<f64>) -> Self {
        let n = x.nrows().max(1) as f64;
        let means = x.sum_axis(Axis(0)) / n;
        let mut scales = Array1::zeros(x.ncols());
        for (j, column) in x.axis_iter(Axis(1)).enumerate() {
            let variance = column
                .iter()
                .map(|&v| (v - means[j]).powi(2))
                .sum::<f64>()
                / n;
            let std = variance.sqrt();
            scales[j] = if std > 0.0 && std.is_finite() { std } else { 1.0 };
        }
        Self { means, scales }
    }

    /// Applies the stored statistics to `x`.
    pub fn transform(&self, x: ArrayView2<f64>) -> Array2<f64> {
        let mut out = x.to_owned();
        for mut row in out.axis_iter_mut(Axis(0)) {
            row -= &self.means;
            row /= &self.scales;
        }
        out
    }
}
