//! Benchmarks for end-to-end planning and multi-channel grouping.
//!
//! Run with: cargo bench --bench planning_bench

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use liquid_planner::catalog;
use liquid_planner::hardware::Orientation;
use liquid_planner::planner::{group_parallel, PendingGrid, PendingRequest};
use liquid_planner::{
    Liquid, LiquidHandler, LiquidType, Request, TransferRequest, Volume, WellCoords, WellRef,
};
use std::hint::black_box;

const EPS: f64 = 1e-4;

/// A trough of water feeding the first `columns` columns of a PCR plate.
fn fill_columns(columns: usize) -> (LiquidHandler, Vec<Request>) {
    let mut deck = catalog::standard_deck();
    let mut trough = catalog::trough_12("trough");
    trough
        .add_liquid(
            WellCoords::new(0, 0),
            Liquid::new("water", LiquidType::Water, Volume::ml(15.0)),
            EPS,
        )
        .unwrap();
    deck.add_plate("position_4", trough).unwrap();
    let plate = catalog::pcr_plate_96("plate");
    let plate_id = plate.id.clone();
    deck.add_plate("position_8", plate).unwrap();

    let requests = (0..columns)
        .flat_map(|x| (0..8).map(move |y| WellCoords::new(x, y)))
        .map(|well| {
            Request::Transfer(
                TransferRequest::new(WellRef::new(plate_id.clone(), well))
                    .with_component("water", Volume::ul(20.0 + well.x as f64)),
            )
        })
        .collect();
    (LiquidHandler::with_defaults(deck), requests)
}

fn bench_plan_plate(c: &mut Criterion) {
    let mut group = c.benchmark_group("planning/fill_columns");
    for columns in [1, 4, 12] {
        let (handler, requests) = fill_columns(columns);
        group.bench_with_input(BenchmarkId::from_parameter(columns), &requests, |b, requests| {
            b.iter(|| black_box(handler.plan_requests(requests.clone()).unwrap()))
        });
    }
    group.finish();
}

fn bench_grouping(c: &mut Criterion) {
    let mut group = c.benchmark_group("planning/group_parallel");
    for (rows, cols) in [(8, 12), (16, 24)] {
        let mut grid = PendingGrid::new(rows, cols);
        for y in 0..rows {
            for x in 0..cols {
                grid.push(
                    WellCoords::new(x, y),
                    PendingRequest {
                        id: format!("{x}:{y}"),
                        volume: Volume::ul(10.0),
                    },
                );
            }
        }
        group.bench_with_input(
            BenchmarkId::new("contiguous", rows * cols),
            &grid,
            |b, grid| {
                b.iter(|| {
                    let mut pending = grid.clone();
                    black_box(group_parallel(&mut pending, 8, Orientation::Vertical, true, EPS))
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_plan_plate, bench_grouping);
criterion_main!(benches);
