// src/interp.rs
//! Linear interpolation of irregular samples onto a bin grid.

/// Assigns each query point to an interval of `x`.
///
/// `x` must be strictly increasing and `xi` non-decreasing; the scan only moves forward,
/// so unsorted queries give wrong intervals. `Some(j)` means `x[j] <= xi < x[j + 1]`,
/// with the right edge `x[N-1]` mapped into the last interval. Points outside
/// `[x[0], x[N-1]]` are `None`.
pub fn histc(xi: &[f64], x: &[f64]) -> Vec<Option<usize>> {
    let n = x.len();
    if n == 0 {
        return vec![None; xi.len()];
    }
    let (lo, hi) = (x[0], x[n - 1]);
    let last_interval = n.saturating_sub(2);
    let mut j = 0;
    xi.iter()
        .map(|&q| {
            if q.is_nan() || q < lo || q > hi {
                return None;
            }
            while j < last_interval && q >= x[j + 1] {
                j += 1;
            }
            Some(j)
        })
        .collect()
}

/// Interpolated values with a per-point validity mask. Invalid points hold 0.
#[derive(Debug, Clone, PartialEq)]
pub struct Interpolated {
    pub values: Vec<f32>,
    pub valid: Vec<bool>,
}

/// Reusable bucket assignment of `xi` against `x`, for interpolating several channels
/// sampled at the same times.
#[derive(Debug, Clone)]
pub struct Interpolator {
    x: Vec<f64>,
    xi: Vec<f64>,
    buckets: Vec<Option<usize>>,
}

impl Interpolator {
    pub fn new(x: &[f64], xi: &[f64]) -> Self {
        Self {
            buckets: histc(xi, x),
            x: x.to_vec(),
            xi: xi.to_vec(),
        }
    }

    pub fn apply(&self, y: &[f32]) -> Interpolated {
        let mut values = Vec::with_capacity(self.xi.len());
        let mut valid = Vec::with_capacity(self.xi.len());
        for (&q, bucket) in self.xi.iter().zip(&self.buckets) {
            match bucket {
                Some(j) if *j < y.len() => {
                    let j = *j;
                    let v = if j + 1 >= self.x.len() || j + 1 >= y.len() {
                        y[j]
                    } else {
                        let h = self.x[j + 1] - self.x[j];
                        if h <= 0.0 {
                            y[j]
                        } else {
                            let s = ((q - self.x[j]) / h) as f32;
                            y[j] + s * (y[j + 1] - y[j])
                        }
                    };
                    values.push(v);
                    valid.push(true);
                }
                _ => {
                    values.push(0.0);
                    valid.push(false);
                }
            }
        }
        Interpolated { values, valid }
    }
}

/// One-shot piecewise-linear interpolation of `(x, y)` at `xi`.
pub fn interp1(x: &[f64], y: &[f32], xi: &[f64]) -> Interpolated {
    Interpolator::new(x, xi).apply(y)
}
