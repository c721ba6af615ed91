//! Multifrontal numeric factorization and triangular solves.

use super::front::{Front, FrontState};
use super::sparse_leaf::SparseLdl;
use super::symbolic::{Reordering, SymmInfo};
use crate::error::{LaError, LaResult};
use crate::linalg::dense::{self, Diag, Orientation, Side, Uplo};
use crate::scalar::Field;
use nalgebra::DMatrix;
use num_traits::{Float, One, Zero};

/// What to do with each pivot as it is produced.
pub enum Pivoting<'a, F: Field> {
    /// Accept pivots as they are; a zero pivot is a runtime error.
    Plain,
    /// Quasi-semidefinite regularization, indexed in nodal ordering.
    Regularized {
        /// Signed candidate shift for every pivot.
        cand: &'a [F::Real],
        /// Always add the candidate instead of only for small or wrong-signed pivots.
        a_priori: bool,
        piv_tol: F::Real,
        /// Receives the shift actually applied to every pivot.
        reg: &'a mut [F::Real],
    },
}

impl<F: Field> Pivoting<'_, F> {
    pub fn pivot(&mut self, idx: usize, d: F) -> LaResult<F> {
        let d = match self {
            Pivoting::Plain => d,
            Pivoting::Regularized {
                cand,
                a_priori,
                piv_tol,
                reg,
            } => {
                let c = cand[idx];
                let wrong_sign = d.real_part() * c < F::Real::zero();
                if *a_priori || d.modulus() <= *piv_tol || wrong_sign {
                    reg[idx] += c;
                    d + F::from_real(c)
                } else {
                    d
                }
            }
        };
        if d.is_zero() || !d.finite() {
            return Err(LaError::runtime(format!("zero pivot at nodal index {}", idx)));
        }
        Ok(d)
    }
}

/// Factor a pulled front tree in place, unpivoted.
pub fn ldl<F: Field>(info: &SymmInfo, front: &mut Front<F>) -> LaResult<()> {
    factor_tree(info, front, &mut Pivoting::Plain)
}

/// Factor a pulled front tree in place with the given pivot policy.
pub fn factor_tree<F: Field>(info: &SymmInfo, front: &mut Front<F>, pivoting: &mut Pivoting<F>) -> LaResult<()> {
    let root = info.root().ok_or_else(|| LaError::logic("empty elimination tree"))?;
    if front.state != FrontState::Built {
        return Err(LaError::logic("front tree is already factored"));
    }
    factor_node(info, root, front, pivoting)?;
    // the root has no parent to receive its update
    front.work = DMatrix::zeros(0, 0);
    Ok(())
}

fn factor_node<F: Field>(info: &SymmInfo, id: usize, front: &mut Front<F>, piv: &mut Pivoting<F>) -> LaResult<()> {
    let node = &info.nodes[id];
    for (&c, child) in node.children.iter().zip(front.children.iter_mut()) {
        factor_node(info, c, child, piv)?;
    }
    if front.sparse_leaf {
        factor_leaf(node.offset, front, piv)?;
    } else {
        factor_dense(info, id, front, piv)?;
    }
    front.state = FrontState::Factored;
    Ok(())
}

fn adjoint_of(conjugate: bool) -> Orientation {
    if conjugate {
        Orientation::Adjoint
    } else {
        Orientation::Transpose
    }
}

fn factor_leaf<F: Field>(offset: usize, front: &mut Front<F>, piv: &mut Pivoting<F>) -> LaResult<()> {
    let conj = front.conjugate;
    let fac = SparseLdl::factor(&front.work_sparse, conj, piv, offset)?;
    // X = A21 L11^-H, then L21 = X D^-1 and S = -L21 X^H
    let l11 = fac.to_dense_l();
    dense::trsm(Side::Right, Uplo::Lower, adjoint_of(conj), Diag::Unit, F::one(), &l11, &mut front.l_dense)?;
    let x = front.l_dense.clone();
    for (t, &d) in fac.diag.iter().enumerate() {
        for v in front.l_dense.column_mut(t).iter_mut() {
            *v /= d;
        }
    }
    let lower = x.nrows();
    let mut work = DMatrix::zeros(lower, lower);
    dense::gemm(Orientation::Normal, adjoint_of(conj), -F::one(), &front.l_dense, &x, F::zero(), &mut work)?;
    front.work = work;
    front.l_sparse = fac;
    Ok(())
}

fn factor_dense<F: Field>(info: &SymmInfo, id: usize, front: &mut Front<F>, piv: &mut Pivoting<F>) -> LaResult<()> {
    let node = &info.nodes[id];
    let conj = front.conjugate;
    let size = node.size;
    let total = front.l_dense.nrows();
    let mut full = DMatrix::zeros(total, total);
    full.columns_mut(0, size).copy_from(&front.l_dense);

    // extend-add
    for (rel, child) in node.child_rel_inds.iter().zip(front.children.iter_mut()) {
        let update = std::mem::replace(&mut child.work, DMatrix::zeros(0, 0));
        if update.nrows() != rel.len() {
            return Err(LaError::logic("child update does not match its relative indices"));
        }
        for b in 0..rel.len() {
            for a in b..rel.len() {
                full[(rel[a], rel[b])] += update[(a, b)];
            }
        }
    }

    let mut diag = Vec::with_capacity(size);
    let mut col = vec![F::zero(); total];
    for k in 0..size {
        let mut d = full[(k, k)];
        if conj {
            d = F::from_real(d.real_part());
        }
        let d = piv.pivot(node.offset + k, d)?;
        diag.push(d);
        for i in k + 1..total {
            col[i] = full[(i, k)];
        }
        for j in k + 1..total {
            let cj = col[j].conj_if(conj);
            if cj.is_zero() {
                continue;
            }
            for i in j..total {
                full[(i, j)] -= col[i] / d * cj;
            }
        }
        full[(k, k)] = F::one();
        for i in k + 1..total {
            full[(i, k)] = col[i] / d;
        }
    }

    front.l_dense = full.columns(0, size).clone_owned();
    front.diag = diag;
    let lower = total - size;
    let mut work = full.view((size, size), (lower, lower)).clone_owned();
    for j in 0..lower {
        for i in 0..j {
            work[(i, j)] = F::zero();
        }
    }
    front.work = work;
    Ok(())
}

/// Solve `A X = B` in place with a factored tree. `B` is in the original
/// ordering; every column is an independent right-hand side.
pub fn solve_after<F: Field>(
    info: &SymmInfo,
    reordering: &Reordering,
    front: &Front<F>,
    b: &mut DMatrix<F>,
) -> LaResult<()> {
    let root = info.root().ok_or_else(|| LaError::logic("empty elimination tree"))?;
    if front.state != FrontState::Factored {
        return Err(LaError::logic("solve_after requires a factored front tree"));
    }
    let n = info.order();
    if b.nrows() != n {
        return Err(LaError::DimensionMismatch {
            expected: n,
            actual: b.nrows(),
        });
    }
    let mut x = DMatrix::zeros(n, b.ncols());
    for i in 0..n {
        x.row_mut(reordering.map[i]).copy_from(&b.row(i));
    }
    forward(info, root, front, &mut x)?;
    diagonal(info, root, front, &mut x)?;
    backward(info, root, front, &mut x)?;
    for i in 0..n {
        b.row_mut(i).copy_from(&x.row(reordering.map[i]));
    }
    Ok(())
}

/// Top-left unit lower block and the connectivity block of a factored front.
fn blocks<F: Field>(front: &Front<F>, size: usize) -> (Option<DMatrix<F>>, DMatrix<F>) {
    if front.sparse_leaf {
        (None, front.l_dense.clone())
    } else {
        let lower = front.l_dense.nrows() - size;
        (
            Some(front.l_dense.rows(0, size).clone_owned()),
            front.l_dense.rows(size, lower).clone_owned(),
        )
    }
}

fn forward<F: Field>(info: &SymmInfo, id: usize, front: &Front<F>, x: &mut DMatrix<F>) -> LaResult<()> {
    let node = &info.nodes[id];
    for (&c, child) in node.children.iter().zip(front.children.iter()) {
        forward(info, c, child, x)?;
    }
    let (off, size) = (node.offset, node.size);
    let mut xs = x.rows(off, size).clone_owned();
    let (l11, l21) = blocks(front, size);
    match l11 {
        None => front.l_sparse.forward(&mut xs),
        Some(l11) => dense::trsm(Side::Left, Uplo::Lower, Orientation::Normal, Diag::Unit, F::one(), &l11, &mut xs)?,
    }
    x.rows_mut(off, size).copy_from(&xs);
    for (k, &g) in node.lower_struct.iter().enumerate() {
        for c in 0..x.ncols() {
            let mut s = F::zero();
            for t in 0..size {
                s += l21[(k, t)] * xs[(t, c)];
            }
            x[(g, c)] -= s;
        }
    }
    Ok(())
}

fn diagonal<F: Field>(info: &SymmInfo, id: usize, front: &Front<F>, x: &mut DMatrix<F>) -> LaResult<()> {
    let node = &info.nodes[id];
    for (&c, child) in node.children.iter().zip(front.children.iter()) {
        diagonal(info, c, child, x)?;
    }
    let d = if front.sparse_leaf {
        &front.l_sparse.diag
    } else {
        &front.diag
    };
    for (t, &dt) in d.iter().enumerate() {
        if dt.is_zero() {
            return Err(LaError::runtime(format!("zero pivot at nodal index {}", node.offset + t)));
        }
        for c in 0..x.ncols() {
            x[(node.offset + t, c)] /= dt;
        }
    }
    Ok(())
}

fn backward<F: Field>(info: &SymmInfo, id: usize, front: &Front<F>, x: &mut DMatrix<F>) -> LaResult<()> {
    let node = &info.nodes[id];
    let (off, size) = (node.offset, node.size);
    let conj = front.conjugate;
    let (l11, l21) = blocks(front, size);
    let mut xs = x.rows(off, size).clone_owned();
    for (k, &g) in node.lower_struct.iter().enumerate() {
        for c in 0..x.ncols() {
            let xg = x[(g, c)];
            for t in 0..size {
                xs[(t, c)] -= l21[(k, t)].conj_if(conj) * xg;
            }
        }
    }
    match l11 {
        None => front.l_sparse.backward(&mut xs, conj),
        Some(l11) => dense::trsm(Side::Left, Uplo::Lower, adjoint_of(conj), Diag::Unit, F::one(), &l11, &mut xs)?,
    }
    x.rows_mut(off, size).copy_from(&xs);
    for (&c, child) in node.children.iter().zip(front.children.iter()).rev() {
        backward(info, c, child, x)?;
    }
    Ok(())
}

/// Largest pivot magnitude over the tree.
pub fn max_pivot<F: Field>(front: &Front<F>) -> F::Real {
    let own = if front.sparse_leaf {
        &front.l_sparse.diag
    } else {
        &front.diag
    };
    let mut m = own.iter().fold(F::Real::zero(), |m, d| m.max(d.modulus()));
    for c in &front.children {
        m = m.max(max_pivot(c));
    }
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::ldl::symbolic::nested_dissection;
    use crate::linalg::sparse::SparseMatrix;
    use crate::settings::BisectCtrl;
    use num_complex::Complex64;

    fn laplacian_2d(k: usize, shift: f64) -> SparseMatrix<f64> {
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

    #[test]
    fn test_multifrontal_solve_matches_dense() {
        let a = laplacian_2d(6, 0.0);
        let (r, info) = nested_dissection(&a, &BisectCtrl { cutoff: 5 }).unwrap();
        assert!(info.nodes.len() > 3);
        let mut front = Front::pull(&a, &r, &info, false).unwrap();
        ldl(&info, &mut front).unwrap();
        let n = a.height();
        let b = DMatrix::from_fn(n, 2, |i, j| (i as f64 + 1.0) * if j == 0 { 1.0 } else { -0.5 });
        let mut x = b.clone();
        solve_after(&info, &r, &front, &mut x).unwrap();
        let res = dense::relative_residual(&a.to_dense().unwrap(), &x, &b).unwrap();
        assert!(res < 1e-12, "residual {}", res);
        assert!(max_pivot(&front) >= 4.0 - 1e-12);
    }

    #[test]
    fn test_indefinite_hermitian_solve() {
        let n = 9;
        let mut t = Vec::new();
        for i in 0..n {
            let d = if i % 3 == 0 { -3.0 } else { 5.0 };
            t.push((i, i, Complex64::new(d, 0.0)));
            if i + 1 < n {
                t.push((i + 1, i, Complex64::new(1.0, 0.5)));
                t.push((i, i + 1, Complex64::new(1.0, -0.5)));
            }
        }
        let a = SparseMatrix::from_triplets(n, n, t).unwrap();
        let (r, info) = nested_dissection(&a, &BisectCtrl { cutoff: 2 }).unwrap();
        let mut front = Front::pull(&a, &r, &info, true).unwrap();
        ldl(&info, &mut front).unwrap();
        let b = DMatrix::from_fn(n, 1, |i, _| Complex64::new(i as f64, 1.0));
        let mut x = b.clone();
        solve_after(&info, &r, &front, &mut x).unwrap();
        let res = dense::relative_residual(&a.to_dense().unwrap(), &x, &b).unwrap();
        assert!(res < 1e-12, "residual {}", res);
    }

    #[test]
    fn test_refactoring_is_rejected() {
        let a = laplacian_2d(2, 1.0);
        let (r, info) = nested_dissection(&a, &BisectCtrl::default()).unwrap();
        let mut front = Front::pull(&a, &r, &info, false).unwrap();
        ldl(&info, &mut front).unwrap();
        assert!(matches!(ldl(&info, &mut front), Err(LaError::Logic(_))));
        assert!(matches!(front.pull_update(&a, &r, &info), Err(LaError::Logic(_))));
    }

    #[test]
    fn test_regularization_rules() {
        let cand = [1.0, -1.0, 1.0];
        let mut reg = [0.0; 3];
        let mut piv: Pivoting<'_, f64> = Pivoting::Regularized {
            cand: &cand,
            a_priori: false,
            piv_tol: 1e-8,
            reg: &mut reg,
        };
        assert_eq!(piv.pivot(0, 3.0).unwrap(), 3.0);
        assert_eq!(piv.pivot(1, 2.0).unwrap(), 1.0);
        assert_eq!(piv.pivot(2, 1e-12).unwrap(), 1.0 + 1e-12);
        assert_eq!(reg, [0.0, -1.0, 1.0]);

        let mut reg = [0.0; 3];
        let mut piv: Pivoting<'_, f64> = Pivoting::Regularized {
            cand: &cand,
            a_priori: true,
            piv_tol: 0.0,
            reg: &mut reg,
        };
        assert_eq!(piv.pivot(0, 3.0).unwrap(), 4.0);
        assert!(matches!(Pivoting::<f64>::Plain.pivot(0, 0.0), Err(LaError::Runtime(_))));
    }
}
