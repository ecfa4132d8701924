#![allow(dead_code)]

use atria_nn::prelude::*;
use atria_nn::synthetic::*;
use atria_nn::utils::{unzip_neighbours, KnnValidation};
use clap::Parser;
use faer::Mat;
use num_traits::ToPrimitive;
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;
use rustc_hash::FxHashSet;

////////////
// Consts //
////////////

pub const DEFAULT_N_SAMPLES: usize = 100_000;
pub const DEFAULT_N_QUERY: usize = DEFAULT_N_SAMPLES / 10;
pub const DEFAULT_DIM: usize = 8;
pub const DEFAULT_N_CLUSTERS: usize = 25;
pub const DEFAULT_K: usize = 15;
pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_DISTANCE: &str = "euclidean";
pub const DEFAULT_DATA: &str = "clustered";
pub const DEFAULT_LEAF_SIZE: usize = 64;
pub const DEFAULT_DELAY: usize = 1;

////////////
// Parser //
////////////

/// Parsing structure
///
/// ### Fields
///
/// * `n_samples` - Number of samples
/// * `dim` - Number of dimensions (embedding dimension for time series)
/// * `n_clusters` - Number of clusters in the data
/// * `k` - Number of neighbours to search
/// * `seed` - Random seed for reproducibility
/// * `distance` - One of `"euclidean"`, `"maximum"` or `"manhattan"`.
/// * `data` - One of `"clustered"`, `"henon"` or `"sine"`.
/// * `leaf_size` - Maximum points per leaf cluster
/// * `delay` - Delay of the time series embedding
#[derive(Parser)]
pub struct Cli {
    #[arg(long, default_value_t = DEFAULT_N_SAMPLES)]
    pub n_samples: usize,

    #[arg(long, default_value_t = DEFAULT_DIM)]
    pub dim: usize,

    #[arg(long, default_value_t = DEFAULT_N_CLUSTERS)]
    pub n_clusters: usize,

    #[arg(long, default_value_t = DEFAULT_K)]
    pub k: usize,

    #[arg(long, default_value_t = DEFAULT_SEED)]
    pub seed: u64,

    #[arg(long, default_value = DEFAULT_DISTANCE)]
    pub distance: String,

    #[arg(long, default_value = DEFAULT_DATA)]
    pub data: String,

    #[arg(long, default_value_t = DEFAULT_LEAF_SIZE)]
    pub leaf_size: usize,

    #[arg(long, default_value_t = DEFAULT_DELAY)]
    pub delay: usize,
}

//////////
// Data //
//////////

#[derive(Default)]
pub enum SyntheticData {
    #[default]
    Clustered,
    Henon,
    Sine,
}

/// Helper function to parse the data type
///
/// ### Params
///
/// * `s` - The string to parse
///
/// ### Returns
///
/// `Option<SyntheticData>`
pub fn parse_data(s: &str) -> Option<SyntheticData> {
    match s.to_lowercase().as_str() {
        "clustered" | "gaussian" => Some(SyntheticData::Clustered),
        "henon" => Some(SyntheticData::Henon),
        "sine" => Some(SyntheticData::Sine),
        _ => None,
    }
}

/// Generate the benchmark data set from the command line options
pub fn generate_data(cli: &Cli) -> Mat<f32> {
    let span = cli.dim.saturating_sub(1) * cli.delay;
    match parse_data(&cli.data).unwrap_or_default() {
        SyntheticData::Clustered => {
            generate_clustered_data(cli.n_samples, cli.dim, cli.n_clusters, 0.15, cli.seed)
        }
        SyntheticData::Henon => {
            let series = henon_series(cli.n_samples + span, 1_000, cli.seed);
            delay_embedding(&series, cli.dim, cli.delay)
        }
        SyntheticData::Sine => {
            let series = noisy_sine(cli.n_samples + span, 250.0, 0.05, cli.seed);
            delay_embedding(&series, cli.dim, cli.delay)
        }
    }
}

/// Parse the metric, falling back to Euclidean
pub fn metric_from_cli(cli: &Cli) -> Dist {
    parse_dist(&cli.distance).unwrap_or_else(|| {
        println!("Unknown distance '{}', using euclidean.", cli.distance);
        Dist::Euclidean
    })
}

/// Randomly subsample a matrix and add Gaussian noise
///
/// ### Params
///
/// * `data` - The input matrix to subsample
/// * `n_samples` - Number of samples to draw
/// * `seed` - Random seed for reproducibility
///
/// ### Returns
///
/// Matrix of shape (n_samples, dim) with noise added
pub fn subsample_with_noise(data: &Mat<f32>, n_samples: usize, seed: u64) -> Mat<f32> {
    let mut rng = StdRng::seed_from_u64(seed + 1000);
    let (n_rows, n_cols) = data.shape();

    let mut indices: Vec<usize> = (0..n_rows).collect();
    indices.shuffle(&mut rng);
    indices.truncate(n_samples.min(n_rows));

    let noise: Vec<f32> = (0..indices.len() * n_cols)
        .map(|_| {
            let z: f64 = rng.sample(StandardNormal);
            (z * 0.01) as f32
        })
        .collect();

    Mat::from_fn(indices.len(), n_cols, |i, j| {
        data[(indices[i], j)] + noise[i * n_cols + j]
    })
}

/// Brute-force k-NN for every query row
///
/// ### Params
///
/// * `index` - The index whose points are scanned
/// * `queries` - The query matrix
/// * `k` - Number of neighbours
///
/// ### Returns
///
/// `(indices, distances)` per query
pub fn exhaustive_knn(
    index: &BallTreeIndex<f32>,
    queries: &Mat<f32>,
    k: usize,
) -> (Vec<Vec<usize>>, Vec<Vec<f32>>) {
    (0..queries.nrows())
        .into_par_iter()
        .map(|i| {
            let q: Vec<f32> = queries.row(i).iter().copied().collect();
            unzip_neighbours(index.exhaustive_query(&q, k, None))
        })
        .unzip()
}

/// Brute-force k-NN of every stored point with a Theiler window
pub fn exhaustive_self_knn(
    index: &BallTreeIndex<f32>,
    k: usize,
    window: usize,
) -> (Vec<Vec<usize>>, Vec<Vec<f32>>) {
    (0..index.point_count())
        .into_par_iter()
        .map(|i| {
            let exclude = Some(ExclusionWindow::around(i, window));
            unzip_neighbours(index.exhaustive_query(index.points().point(i), k, exclude))
        })
        .unzip()
}

////////////////
// Structures //
////////////////

/// BenchmarkResult
///
/// ### Fields
///
/// * `method` - Name of the method
/// * `build_time_ms` - The build time of the index in ms
/// * `query_time_ms` - The query time of the index in ms
/// * `total_time_ms` - Total time the index build & query takes in ms
/// * `recall_at_k` - Recall@k neighbours against ground truth
/// * `mean_dist_err` - Mean distance error against ground truth
/// * `index_size_mb` - Index size in MB
pub struct BenchmarkResultSize {
    pub method: String,
    pub build_time_ms: f64,
    pub query_time_ms: f64,
    pub total_time_ms: f64,
    pub recall_at_k: f64,
    pub mean_dist_err: f64,
    pub index_size_mb: f64,
}

/////////////
// Helpers //
/////////////

/// Calculate Recall@k
///
/// ### Params
///
/// * `true_neighbors` - Slice of true neighbours
/// * `approx_neighbors` - Slice of the approximate neighbours
/// * `k` - Number of selected k
///
/// ### Returns
///
/// The Recall@k
pub fn calculate_recall(
    true_neighbors: &[Vec<usize>],
    approx_neighbors: &[Vec<usize>],
    k: usize,
) -> f64 {
    let mut total_recall = 0.0;

    for (true_nn, approx_nn) in true_neighbors.iter().zip(approx_neighbors.iter()) {
        let true_set: FxHashSet<_> = true_nn.iter().take(k).collect();
        let matches = approx_nn
            .iter()
            .take(k)
            .filter(|&idx| true_set.contains(idx))
            .count();
        total_recall += matches as f64 / k as f64;
    }

    total_recall / true_neighbors.len().max(1) as f64
}

/// Calculate mean distance error
///
/// ### Params
///
/// * `true_dist` - Slice of true distances to the neighbours
/// * `approx_dist` - Slice of approximate distances to the neighbours
/// * `k` - Number of selected k
///
/// ### Returns
///
/// The mean distance error
pub fn calculate_dist_error(true_dist: &[Vec<f32>], approx_dist: &[Vec<f32>], k: usize) -> f64 {
    let mut total_error = 0.0;

    for (true_dist, approx_dist) in true_dist.iter().zip(approx_dist.iter()) {
        for i in 0..k.min(true_dist.len()).min(approx_dist.len()) {
            let t = true_dist[i].to_f64().unwrap_or(0.0);
            let a = approx_dist[i].to_f64().unwrap_or(0.0);
            total_error += (t - a).abs();
        }
    }

    total_error / (true_dist.len() * k).max(1) as f64
}

////////////
// Prints //
////////////

/// Helper to print results to console
///
/// ### Params
///
/// * `config` - Benchmark configuration
/// * `results` - Benchmark results to print
pub fn print_results_size(config: &str, results: &[BenchmarkResultSize]) {
    println!("\n{:=>123}", "");
    println!("Benchmark: {}", config);
    println!("{:=>123}", "");
    println!(
        "{:<45} {:>12} {:>12} {:>12} {:>12} {:>12} {:>12}",
        "Method", "Build (ms)", "Query (ms)", "Total (ms)", "Recall@k", "Dist Error", "Size (MB)"
    );
    println!("{:->123}", "");
    for result in results {
        println!(
            "{:<45} {:>12.2} {:>12.2} {:>12.2} {:>12.4} {:>12.6} {:>12.2}",
            result.method,
            result.build_time_ms,
            result.query_time_ms,
            result.total_time_ms,
            result.recall_at_k,
            result.mean_dist_err,
            result.index_size_mb
        );
    }
    println!("{:->123}\n", "");
}
