//! Memory-operation placement on the canonical loop orders
//!
//! Every role must be loaded exactly once (the output also stored once) at
//! the first loop where its dependency set has been fully visited.

use convtile::dataflow::{first_satisfying_loop, verify_placement};
use convtile::{DataflowGenerator, Dimension, MemOpKind, Param, TensorRole, CANONICAL_ORDERS};

fn count_ops(order: &convtile::LoopOrder, role: TensorRole, kind: MemOpKind) -> usize {
    order
        .loops
        .iter()
        .flat_map(|l| &l.mem_ops)
        .filter(|op| op.tensor == role && op.kind == kind)
        .count()
}

#[test]
fn test_each_role_placed_once_at_first_satisfying_loop() {
    let param = Param::default();
    let orders = DataflowGenerator::new(&param).candidates().unwrap();
    assert_eq!(orders.len(), CANONICAL_ORDERS.len());

    for order in &orders {
        verify_placement(order).unwrap();
        let dims = order.dims();
        for role in TensorRole::ALL {
            assert_eq!(count_ops(order, role, MemOpKind::Load), 1, "{} {}", order.label(), role);
            let stores = if role == TensorRole::Output { 1 } else { 0 };
            assert_eq!(count_ops(order, role, MemOpKind::Store), stores);
            assert_eq!(
                order.placement_of(role),
                first_satisfying_loop(&dims, role.dependencies())
            );
        }
    }
}

#[test]
fn test_documented_placements() {
    let param = Param::default();
    let generator = DataflowGenerator::new(&param);
    // (input, output, weight) loop index per canonical order
    let expected = [(3, 4, 4), (4, 3, 4), (4, 4, 1)];

    for (dims, (input, output, weight)) in CANONICAL_ORDERS.iter().zip(expected) {
        let order = generator.build(dims).unwrap();
        assert_eq!(order.placement_of(TensorRole::Input), Some(input));
        assert_eq!(order.placement_of(TensorRole::Output), Some(output));
        assert_eq!(order.placement_of(TensorRole::Weight), Some(weight));
    }
}

#[test]
fn test_outer_loops_snapshot() {
    let param = Param::default();
    let order = DataflowGenerator::new(&param)
        .build(&CANONICAL_ORDERS[2])
        .unwrap();

    let weight_load = &order.loops[1].mem_ops[0];
    assert_eq!(weight_load.tensor, TensorRole::Weight);
    assert_eq!(
        weight_load.outer_loops,
        vec![Dimension::OutChan, Dimension::InChan]
    );

    // input and output both become placeable at the innermost loop; input first
    let innermost: Vec<(TensorRole, MemOpKind)> = order.loops[4]
        .mem_ops
        .iter()
        .map(|op| (op.tensor, op.kind))
        .collect();
    assert_eq!(
        innermost,
        vec![
            (TensorRole::Input, MemOpKind::Load),
            (TensorRole::Output, MemOpKind::Load),
            (TensorRole::Output, MemOpKind::Store),
        ]
    );
    assert!(order.loops[4].mem_ops.iter().all(|op| op.outer_loops.len() == 5));
}

#[test]
fn test_placement_ignores_layer_shape() {
    let small = Param {
        batch: 1,
        height: 2,
        width: 2,
        ..Param::default()
    };
    let large = Param::default();
    for dims in &CANONICAL_ORDERS {
        let a = DataflowGenerator::new(&small).build(dims).unwrap();
        let b = DataflowGenerator::new(&large).build(dims).unwrap();
        for role in TensorRole::ALL {
            assert_eq!(a.placement_of(role), b.placement_of(role));
        }
    }
}

#[test]
fn test_loop_nest_rendering() {
    let param = Param::default();
    let order = DataflowGenerator::new(&param)
        .build(&CANONICAL_ORDERS[2])
        .unwrap();
    let rendered = order.to_string();
    assert_eq!(rendered.lines().count(), 5);
    assert!(rendered
        .lines()
        .nth(1)
        .unwrap()
        .contains("(LOAD Weight / Outer Loops: OI)"));
}
