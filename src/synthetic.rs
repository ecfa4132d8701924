use faer::Mat;
use num_traits::{Float, FromPrimitive};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Generate data with Gaussian cluster structure
///
/// Cluster centres are drawn uniformly from `[-1, 1]^dim`; samples are
/// assigned to clusters round-robin and scattered around their centre.
///
/// ### Params
///
/// * `n_samples` - Number of samples
/// * `dim` - Dimensionality
/// * `n_clusters` - Number of distinct clusters
/// * `cluster_std` - Standard deviation within clusters
/// * `seed` - Random seed for reproducibility
///
/// ### Returns
///
/// Matrix of shape (n_samples, dim)
pub fn generate_clustered_data<T>(
    n_samples: usize,
    dim: usize,
    n_clusters: usize,
    cluster_std: f64,
    seed: u64,
) -> Mat<T>
where
    T: Float + FromPrimitive,
{
    let mut rng = StdRng::seed_from_u64(seed);
    let n_clusters = n_clusters.max(1);

    let centres: Vec<Vec<f64>> = (0..n_clusters)
        .map(|_| (0..dim).map(|_| rng.random_range(-1.0..1.0)).collect())
        .collect();

    let mut values = Vec::with_capacity(n_samples * dim);
    for i in 0..n_samples {
        let centre = &centres[i % n_clusters];
        for &c in centre {
            let z: f64 = rng.sample(StandardNormal);
            values.push(c + cluster_std * z);
        }
    }

    Mat::from_fn(n_samples, dim, |i, j| {
        T::from_f64(values[i * dim + j]).unwrap_or_else(T::zero)
    })
}

/// Generate the x-coordinate series of the Hénon map
///
/// `x[t+1] = 1 - a * x[t]^2 + y[t]`, `y[t+1] = b * x[t]` with the classic
/// `a = 1.4`, `b = 0.3`. The first `transient` iterations are discarded.
///
/// ### Params
///
/// * `n` - Length of the returned series
/// * `transient` - Number of initial iterations to discard
/// * `seed` - Seed for the initial condition
///
/// ### Returns
///
/// The scalar time series
pub fn henon_series(n: usize, transient: usize, seed: u64) -> Vec<f64> {
    const A: f64 = 1.4;
    const B: f64 = 0.3;

    let mut rng = StdRng::seed_from_u64(seed);
    let mut x: f64 = rng.random_range(-0.1..0.1);
    let mut y: f64 = rng.random_range(-0.1..0.1);

    let mut series = Vec::with_capacity(n);
    for t in 0..(n + transient) {
        let x_next = 1.0 - A * x * x + y;
        y = B * x;
        x = x_next;
        if t >= transient {
            series.push(x);
        }
    }
    series
}

/// Time-delay embedding of a scalar series
///
/// Row `i` is `(s[i], s[i + tau], ..., s[i + (dim - 1) * tau])`, so consecutive
/// rows are temporal neighbours.
///
/// ### Params
///
/// * `series` - Scalar time series
/// * `dim` - Embedding dimension
/// * `tau` - Delay in samples
///
/// ### Returns
///
/// Matrix of shape (len - (dim - 1) * tau, dim); empty if the series is too
/// short
pub fn delay_embedding<T>(series: &[f64], dim: usize, tau: usize) -> Mat<T>
where
    T: Float + FromPrimitive,
{
    let span = dim.saturating_sub(1) * tau;
    let n_rows = if dim == 0 {
        0
    } else {
        series.len().saturating_sub(span)
    };

    Mat::from_fn(n_rows, dim, |i, j| {
        T::from_f64(series[i + j * tau]).unwrap_or_else(T::zero)
    })
}

/// Noisy sine wave, a smooth trajectory with strong temporal correlation
///
/// ### Params
///
/// * `n` - Length of the series
/// * `period` - Period in samples
/// * `noise_std` - Standard deviation of the additive Gaussian noise
/// * `seed` - Random seed for reproducibility
///
/// ### Returns
///
/// The scalar time series
pub fn noisy_sine(n: usize, period: f64, noise_std: f64, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let omega = 2.0 * std::f64::consts::PI / period;

    (0..n)
        .map(|t| {
            let z: f64 = rng.sample(StandardNormal);
            (omega * t as f64).sin() + noise_std * z
        })
        .collect()
}

///////////
// Tests //
///////////
