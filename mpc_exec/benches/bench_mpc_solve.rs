//! # MPC Solve Benchmark

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use mpc_lib::traj_ctrl::{
    error_state::ErrorState,
    mpc::{Control, CostWeights, GaussNewtonSolver, MpcParams, Solver},
};

fn mpc_solve_benchmark(c: &mut Criterion) {
    // ---- Build the problem ----

    let params = MpcParams {
        horizon_steps: 10,
        dt_s: 0.1,
        lf_m: 2.67,
        ref_speed: 60.0,
        max_steer_rad: 0.436332,
        max_throttle: 1.0,
        weights: CostWeights {
            cte: 2000.0,
            epsi: 2000.0,
            speed: 1.0,
            steer: 5.0,
            throttle: 5.0,
            steer_rate: 200.0,
            throttle_rate: 10.0,
        },
        max_iterations: 1000,
        max_solve_time_ms: 1e6,
        grad_tolerance: 1e-6,
        cost_tolerance: 1e-12,
        warm_start: true,
    };

    // A bend to the right with the vehicle offset from the curve
    let coeffs = [1.5, -0.05, 0.003, -2e-5];
    let initial = ErrorState::from_curve(&coeffs).unwrap().initial_state(40.0);

    let solver = GaussNewtonSolver::default();

    // ---- Benchmark ----

    c.bench_function("mpc_solve_cold", |b| {
        b.iter(|| {
            solver
                .solve(black_box(&initial), black_box(&coeffs), &params, None)
                .unwrap()
        })
    });

    let warm = Some(Control {
        steer_rad: -0.05,
        accel: 0.5,
    });

    c.bench_function("mpc_solve_warm", |b| {
        b.iter(|| {
            solver
                .solve(black_box(&initial), black_box(&coeffs), &params, warm)
                .unwrap()
        })
    });
}

criterion_group!(benches, mpc_solve_benchmark);
criterion_main!(benches);
