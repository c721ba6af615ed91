//! End-to-end tests of the sparse factorization, refinement and QP layers.

use gridla_core::ipm::{mehrotra, QpProblem};
use gridla_core::linalg::dense;
use gridla_core::linalg::ldl::{self, nested_dissection, Front};
use gridla_core::linalg::refined::{refined_solve, refined_solve_traced};
use gridla_core::linalg::{Orientation, SparseMatrix};
use gridla_core::{BisectCtrl, MehrotraCtrl, RefineCtrl};
use nalgebra::DMatrix;

/// 5-point Laplacian of a `k x k` grid plus `shift` on the diagonal.
fn laplacian(k: usize, shift: f64) -> SparseMatrix<f64> {
    let n = k * k;
    let mut t = Vec::new();
    for x in 0..k {
        for y in 0..k {
            let i = x * k + y;
            t.push((i, i, 4.0 + shift));
            if x + 1 < k {
                t.push((i, i + k, -1.0));
                t.push((i + k, i, -1.0));
            }
            if y + 1 < k {
                t.push((i, i + 1, -1.0));
                t.push((i + 1, i, -1.0));
            }
        }
    }
    SparseMatrix::from_triplets(n, n, t).unwrap()
}

fn rhs(n: usize, ncols: usize) -> DMatrix<f64> {
    DMatrix::from_fn(n, ncols, |i, j| ((i * 7 + j * 3) % 11) as f64 - 5.0)
}

#[test]
fn test_sparse_ldl_solves_across_cutoffs() {
    let a = laplacian(9, 0.0);
    let n = a.height();
    for cutoff in [4, 16, 128] {
        let (r, info) = nested_dissection(&a, &BisectCtrl { cutoff }).unwrap();
        let mut front = Front::pull(&a, &r, &info, false).unwrap();
        ldl::ldl(&info, &mut front).unwrap();
        let b = rhs(n, 2);
        let mut x = b.clone();
        ldl::solve_after(&info, &r, &front, &mut x).unwrap();
        let res = dense::relative_residual(&a.to_dense().unwrap(), &x, &b).unwrap();
        assert!(res < 1e-12, "cutoff {}: residual {:e}", cutoff, res);
        assert!(front.factor_gflops() > 0.0);
    }
}

#[test]
fn test_pull_push_round_trip_on_irregular_pattern() {
    let n = 40;
    let mut t = Vec::new();
    for i in 0..n {
        t.push((i, i, 10.0 + i as f64));
        for j in [(i * 7 + 3) % n, (i * 13 + 5) % n] {
            if j != i {
                t.push((i, j, 1.0));
                t.push((j, i, 1.0));
            }
        }
    }
    let a = SparseMatrix::from_triplets(n, n, t).unwrap();
    let (r, info) = nested_dissection(&a, &BisectCtrl { cutoff: 6 }).unwrap();
    let front = Front::pull(&a, &r, &info, false).unwrap();
    let back = front.push(&info, &r).unwrap();
    assert_eq!(back.to_dense().unwrap(), a.to_dense().unwrap());
}

#[test]
fn test_refinement_with_sparse_ldl_inverse() {
    let a = laplacian(6, 1e-3);
    let n = a.height();
    let (r, info) = nested_dissection(&a, &BisectCtrl { cutoff: 8 }).unwrap();
    let mut front = Front::pull(&a, &r, &info, false).unwrap();
    ldl::ldl(&info, &mut front).unwrap();

    let b = rhs(n, 1);
    let mut x = b.clone();
    let ctrl = RefineCtrl {
        rel_tol: 1e-14,
        max_refine_its: 4,
        progress: false,
        ..Default::default()
    };
    let out = refined_solve_traced(
        |x: &DMatrix<f64>, y: &mut DMatrix<f64>| a.multiply(Orientation::Normal, 1.0, x, 0.0, y),
        |x: &mut DMatrix<f64>| ldl::solve_after(&info, &r, &front, x),
        &mut x,
        &ctrl,
    )
    .unwrap();
    assert!(out.its <= ctrl.max_refine_its);
    assert!(out.history.windows(2).all(|w| w[1] <= w[0]));
    assert!(dense::relative_residual(&a.to_dense().unwrap(), &x, &b).unwrap() < 1e-12);

    // a batch of right-hand sides goes through the fixed-count path
    let wide = rhs(n, 4);
    let mut xw = wide.clone();
    let its = refined_solve(
        |x: &DMatrix<f64>, y: &mut DMatrix<f64>| a.multiply(Orientation::Normal, 1.0, x, 0.0, y),
        |x: &mut DMatrix<f64>| ldl::solve_after(&info, &r, &front, x),
        &mut xw,
        &ctrl,
    )
    .unwrap();
    assert_eq!(its, ctrl.max_refine_its);
    assert!(dense::relative_residual(&a.to_dense().unwrap(), &xw, &wide).unwrap() < 1e-12);
}

#[test]
fn test_mehrotra_projects_onto_the_simplex() {
    let problem: QpProblem<f64> = QpProblem {
        q: SparseMatrix::identity(2),
        a: SparseMatrix::from_triplets(1, 2, vec![(0, 0, 1.0), (0, 1, 1.0)]).unwrap(),
        g: SparseMatrix::from_triplets(2, 2, vec![(0, 0, -1.0), (1, 1, -1.0)]).unwrap(),
        b: DMatrix::from_column_slice(1, 1, &[1.0]),
        c: DMatrix::zeros(2, 1),
        h: DMatrix::zeros(2, 1),
    };
    let ctrl = MehrotraCtrl {
        tol: 1e-8,
        print: false,
        ..Default::default()
    };
    let sol = mehrotra(&problem, None, &ctrl).unwrap();
    assert!(sol.num_its <= 30, "took {} iterations", sol.num_its);
    assert!((sol.x[(0, 0)] - 0.5).abs() < 1e-6);
    assert!((sol.x[(1, 0)] - 0.5).abs() < 1e-6);
    // G x + s = h
    assert!((sol.s[(0, 0)] - sol.x[(0, 0)]).abs() < 1e-6);
}

#[test]
fn test_mehrotra_bounded_least_squares() {
    // min 1/2 |x - t|^2 s.t. sum x = 2, x >= 0 with t = (3, -1, 0.5)
    let t = [3.0, -1.0, 0.5];
    let n = t.len();
    let problem: QpProblem<f64> = QpProblem {
        q: SparseMatrix::identity(n),
        a: SparseMatrix::from_triplets(1, n, (0..n).map(|j| (0, j, 1.0))).unwrap(),
        g: SparseMatrix::from_triplets(n, n, (0..n).map(|j| (j, j, -1.0))).unwrap(),
        b: DMatrix::from_column_slice(1, 1, &[2.0]),
        c: DMatrix::from_iterator(n, 1, t.iter().map(|v| -v)),
        h: DMatrix::zeros(n, 1),
    };
    let ctrl = MehrotraCtrl {
        equilibrate: true,
        print: false,
        ..Default::default()
    };
    let sol = mehrotra(&problem, None, &ctrl).unwrap();
    // projection of t onto {sum x = 2, x >= 0} is (2, 0, 0)
    let want = [2.0, 0.0, 0.0];
    for (j, w) in want.iter().enumerate() {
        assert!((sol.x[(j, 0)] - w).abs() < 1e-5, "x = {}", sol.x);
    }
}
