mod commons;
use atria_nn::prelude::*;
use clap::Parser;
use commons::*;
use faer::Mat;
use std::time::Instant;
use thousands::*;

/// Self-query of a delay embedded time series with growing Theiler windows.
///
/// Without a window the nearest neighbours of a trajectory point are its own
/// temporal predecessors and successors; the window removes them.
fn main() {
    let cli = Cli::parse();
    let metric = metric_from_cli(&cli);

    println!("-----------------------------");
    println!(
        "Delay embedding of '{}' data: {} samples, dimension {}, delay {}.",
        cli.data,
        cli.n_samples.separate_with_underscores(),
        cli.dim,
        cli.delay
    );
    println!("-----------------------------");

    let data: Mat<f32> = generate_data(&cli);
    let params = AtriaParams::default()
        .with_cluster_max_points(cli.leaf_size)
        .with_seed(cli.seed);

    let start = Instant::now();
    let index = match build_atria_index(data.as_ref(), metric, &params, true) {
        Ok(index) => index,
        Err(e) => {
            eprintln!("Index construction failed: {}", e);
            std::process::exit(1);
        }
    };
    let build_time = start.elapsed().as_secs_f64() * 1000.0;
    let index_size_mb = index.memory_usage_bytes() as f64 / (1024.0 * 1024.0);
    let mut results = Vec::new();

    for window in [0_usize, 5, 25, 100] {
        println!("Theiler window {}...", window);

        let start = Instant::now();
        let (true_neighbours, true_distances) = exhaustive_self_knn(&index, cli.k, window);
        let exhaustive_time = start.elapsed().as_secs_f64() * 1000.0;

        results.push(BenchmarkResultSize {
            method: format!("Exhaustive-w:{} (self)", window),
            build_time_ms: 0.0,
            query_time_ms: exhaustive_time,
            total_time_ms: exhaustive_time,
            recall_at_k: 1.0,
            mean_dist_err: 0.0,
            index_size_mb: 0.0,
        });

        let start = Instant::now();
        let (neighbours, distances) = match query_atria_self(&index, cli.k, window, 0.0, false) {
            Ok(res) => res,
            Err(e) => {
                eprintln!("Self query failed: {}", e);
                continue;
            }
        };
        let query_time = start.elapsed().as_secs_f64() * 1000.0;

        let temporal = neighbours
            .iter()
            .enumerate()
            .map(|(i, row)| row.iter().filter(|&&j| j.abs_diff(i) <= 2 * window + 1).count())
            .sum::<usize>();
        println!(
            "  {} neighbours lie just outside the window.",
            temporal.separate_with_underscores()
        );

        results.push(BenchmarkResultSize {
            method: format!("ATRIA-w:{} (self)", window),
            build_time_ms: build_time,
            query_time_ms: query_time,
            total_time_ms: build_time + query_time,
            recall_at_k: calculate_recall(&true_neighbours, &neighbours, cli.k),
            mean_dist_err: calculate_dist_error(&true_distances, &distances, cli.k),
            index_size_mb,
        });
    }

    print_results_size(
        &format!(
            "{}k samples, embedding dimension {}",
            cli.n_samples / 1000,
            cli.dim
        ),
        &results,
    );
}
