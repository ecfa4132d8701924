mod commons;
use atria_nn::prelude::*;
use clap::Parser;
use commons::*;
use faer::Mat;
use std::time::Instant;
use thousands::*;

fn main() {
    let cli = Cli::parse();
    let metric = metric_from_cli(&cli);

    println!("-----------------------------");
    println!(
        "Generating synthetic data: {} samples, {} dimensions, '{}' data, {:?} dist.",
        cli.n_samples.separate_with_underscores(),
        cli.dim,
        cli.data,
        metric
    );
    println!("-----------------------------");

    let data: Mat<f32> = generate_data(&cli);
    let query_data = subsample_with_noise(&data, DEFAULT_N_QUERY, cli.seed + 1);
    let mut results = Vec::new();

    println!("Building ATRIA index...");
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

    println!("Computing exhaustive ground truth...");
    let start = Instant::now();
    let (true_neighbours, true_distances) = exhaustive_knn(&index, &query_data, cli.k);
    let exhaustive_time = start.elapsed().as_secs_f64() * 1000.0;

    results.push(BenchmarkResultSize {
        method: "Exhaustive (query)".to_string(),
        build_time_ms: 0.0,
        query_time_ms: exhaustive_time,
        total_time_ms: exhaustive_time,
        recall_at_k: 1.0,
        mean_dist_err: 0.0,
        index_size_mb: 0.0,
    });

    println!("-----------------------------");

    for epsilon in [0.0_f32, 0.1, 0.5, 1.0, 2.0] {
        println!("Querying ATRIA index with epsilon {}...", epsilon);
        let start = Instant::now();
        let res = query_atria_k_nearest(query_data.as_ref(), &index, cli.k, None, epsilon, false);
        let query_time = start.elapsed().as_secs_f64() * 1000.0;

        let (approx_neighbours, approx_distances) = match res {
            Ok(res) => res,
            Err(e) => {
                eprintln!("Query failed: {}", e);
                continue;
            }
        };

        results.push(BenchmarkResultSize {
            method: format!("ATRIA-eps:{} (query)", epsilon),
            build_time_ms: build_time,
            query_time_ms: query_time,
            total_time_ms: build_time + query_time,
            recall_at_k: calculate_recall(&true_neighbours, &approx_neighbours, cli.k),
            mean_dist_err: calculate_dist_error(&true_distances, &approx_distances, cli.k),
            index_size_mb,
        });
    }

    println!("Range query with the exact k-th distance of the first query...");
    if let Some(&radius) = true_distances.first().and_then(|d| d.last()) {
        let start = Instant::now();
        match query_atria_range(query_data.as_ref(), &index, radius, None, false) {
            Ok((indices, _)) => {
                let total: usize = indices.iter().map(|row| row.len()).sum();
                println!(
                    "  {} hits within {:.4} over {} queries in {:.2} ms.",
                    total.separate_with_underscores(),
                    radius,
                    indices.len().separate_with_underscores(),
                    start.elapsed().as_secs_f64() * 1000.0
                );
            }
            Err(e) => eprintln!("Range query failed: {}", e),
        }
    }

    print_results_size(
        &format!(
            "{}k samples, {}D, leaf size {}",
            cli.n_samples / 1000,
            cli.dim,
            cli.leaf_size
        ),
        &results,
    );
}
