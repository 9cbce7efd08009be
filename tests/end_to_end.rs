//! Whole-layer searches on small convolution shapes

use convtile::{
    search_network, CandidateStatus, LayerStatus, NetworkDescription, Param, SearchConfig,
    SearchDriver, SearchError, SolverConfig, TensorRole,
};
use std::collections::BTreeSet;
use std::time::Duration;

fn untiled_layer(onchip_mem_size: u64) -> Param {
    let mut param = Param::default();
    param.batch = 1;
    param.height = 4;
    param.width = 4;
    param.op.kernel = 1;
    param.op.stride = 1;
    param.op.in_chan = 2;
    param.op.out_chan = 2;
    param.hw.onchip_mem_size = onchip_mem_size;
    param
}

fn small_layer(onchip_mem_size: u64) -> Param {
    let mut param = Param::default();
    param.batch = 1;
    param.height = 8;
    param.width = 8;
    param.op.kernel = 3;
    param.op.stride = 1;
    param.op.in_chan = 4;
    param.op.out_chan = 8;
    param.hw.onchip_mem_size = onchip_mem_size;
    param
}

fn solution_set(result: &convtile::LayerResult) -> BTreeSet<(String, u64, u64, u64, u64)> {
    result
        .solutions
        .iter()
        .map(|s| (s.label(), s.tiles.n, s.tiles.c, s.tiles.h, s.tiles.w))
        .collect()
}

#[test]
fn test_untiled_layer_all_orders_tie() {
    let driver = SearchDriver::new(SearchConfig::default());
    let result = driver.search(&untiled_layer(1000)).unwrap();

    // input 2*4*4 + output 2*4*4 + weight 2*2, each moved once
    let param = untiled_layer(1000);
    let untiled: u64 = TensorRole::ALL.iter().map(|r| param.untiled_size(*r)).sum();
    assert_eq!(untiled, 68);
    assert!((result.min_value - 68.0).abs() < 1e-6, "{}", result.min_value);
    let labels: Vec<String> = result.solutions.iter().map(|s| s.label()).collect();
    assert_eq!(labels, vec!["BHWIO", "BHWOI", "OIBHW"]);
    assert_eq!(result.status(), LayerStatus::Solved);
    assert!(result
        .candidates
        .iter()
        .all(|c| c.status == CandidateStatus::Solved));
}

#[test]
fn test_capacity_below_minimal_tile_is_infeasible() {
    // the smallest tiles (all 1) still need 1 + 1 + 1 elements on chip
    let driver = SearchDriver::new(SearchConfig::default());
    let result = driver.search(&untiled_layer(2)).unwrap();

    assert_eq!(result.min_value, f64::INFINITY);
    assert!(result.solutions.is_empty());
    assert!(result
        .candidates
        .iter()
        .all(|c| c.status == CandidateStatus::Infeasible && c.objective == f64::INFINITY));
    assert_eq!(result.status(), LayerStatus::NoFeasibleDataflow);
    assert!(matches!(
        result.into_feasible("conv"),
        Err(SearchError::NoFeasibleDataflow { .. })
    ));
}

#[test]
fn test_more_capacity_never_costs_more() {
    let driver = SearchDriver::new(SearchConfig::default());
    let mut previous = f64::INFINITY;
    for capacity in [100, 200, 400, 10_000] {
        let result = driver.search(&small_layer(capacity)).unwrap();
        assert_eq!(result.status(), LayerStatus::Solved);
        assert!(
            result.min_value <= previous * (1.0 + 1e-9),
            "capacity {}: {} > {}",
            capacity,
            result.min_value,
            previous
        );
        previous = result.min_value;
    }
}

#[test]
fn test_search_is_idempotent() {
    let driver = SearchDriver::new(SearchConfig::default());
    let param = small_layer(200);
    let first = driver.search(&param).unwrap();
    let second = driver.search(&param).unwrap();
    assert_eq!(first.min_value, second.min_value);
    assert_eq!(solution_set(&first), solution_set(&second));
}

#[test]
fn test_parallel_matches_sequential() {
    let param = small_layer(200);
    let sequential = SearchDriver::new(SearchConfig::default())
        .search(&param)
        .unwrap();
    let parallel = SearchDriver::new(SearchConfig {
        parallel: true,
        ..SearchConfig::default()
    })
    .search(&param)
    .unwrap();

    assert_eq!(sequential.min_value, parallel.min_value);
    assert_eq!(solution_set(&sequential), solution_set(&parallel));
    let order = |r: &convtile::LayerResult| -> Vec<String> {
        r.candidates.iter().map(|c| c.order.clone()).collect()
    };
    assert_eq!(order(&sequential), order(&parallel));
}

#[test]
fn test_solutions_respect_capacity() {
    let param = small_layer(200);
    let result = SearchDriver::new(SearchConfig::default())
        .search(&param)
        .unwrap();
    for solution in &result.solutions {
        let total: u64 = convtile::TensorRole::ALL
            .iter()
            .map(|role| convtile::tensor::tiled_size(*role, &solution.tiles, &param))
            .sum();
        assert!(total <= 200, "{} uses {}", solution.label(), total);
        assert!(solution.tiles.n <= 8 && solution.tiles.c <= 4);
        assert!(solution.tiles.h <= 8 && solution.tiles.w <= 8);
    }
}

fn assert_all_limited(solver: SolverConfig) {
    let driver = SearchDriver::new(SearchConfig {
        solver,
        ..SearchConfig::default()
    });
    let result = driver.search(&small_layer(200)).unwrap();

    assert_eq!(result.candidates.len(), 3);
    for candidate in &result.candidates {
        assert_eq!(candidate.status, CandidateStatus::TimedOut, "{}", candidate.order);
        assert_eq!(candidate.objective, f64::INFINITY);
        assert!(candidate.tiles.is_none());
    }
    assert!(result.solutions.is_empty());
    assert_eq!(result.status(), LayerStatus::TimedOut);
    match result.into_feasible("conv") {
        Err(SearchError::AllCandidatesTimedOut { layer }) => assert_eq!(layer, "conv"),
        other => panic!("unexpected result: {:?}", other.map(|r| r.min_value)),
    }
}

#[test]
fn test_zero_timeout_reports_timed_out_layer() {
    assert_all_limited(SolverConfig {
        timeout: Some(Duration::ZERO),
        ..SolverConfig::default()
    });
}

#[test]
fn test_node_limit_reports_timed_out_layer() {
    assert_all_limited(SolverConfig {
        max_nodes: 1,
        ..SolverConfig::default()
    });
}

#[test]
fn test_network_totals_and_failure() {
    let json = r#"{
        "name": "pair",
        "batch": 1,
        "layers": [
            { "name": "a", "height": 4, "width": 4, "in_chan": 2, "out_chan": 2,
              "kernel": 1, "stride": 1 },
            { "name": "b", "height": 4, "width": 4, "in_chan": 2, "out_chan": 2,
              "kernel": 1, "stride": 1 }
        ]
    }"#;
    let network = NetworkDescription::from_json(json).unwrap();

    let result = search_network(&network, 1000, &SearchConfig::default()).unwrap();
    assert_eq!(result.layers.len(), 2);
    assert!((result.total_bytes - 136.0).abs() < 1e-6);

    let err = search_network(&network, 2, &SearchConfig::default()).unwrap_err();
    match err {
        SearchError::NoFeasibleDataflow { layer } => assert_eq!(layer, "a"),
        other => panic!("unexpected error: {}", other),
    }
}
