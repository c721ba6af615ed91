//! Nested dissection and the symbolic elimination tree.
//!
//! The matrix graph is bisected recursively: each connected piece is split by
//! the median level of a breadth-first search from a pseudo-peripheral vertex,
//! and disconnected pieces are split without a separator, until pieces are no
//! larger than [`BisectCtrl::cutoff`]. Vertices are numbered in post-order
//! (left subtree, right subtree, separator), so every node owns a contiguous
//! range of the reordered indices and the root comes last.

use crate::error::{LaError, LaResult};
use crate::linalg::sparse::SparseMatrix;
use crate::scalar::Field;
use crate::settings::BisectCtrl;
use std::collections::VecDeque;

/// Symmetric permutation: `map[original] = reordered`, `inverse[reordered] =
/// original`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reordering {
    pub map: Vec<usize>,
    pub inverse: Vec<usize>,
}

impl Reordering {
    pub fn identity(n: usize) -> Self {
        Self {
            map: (0..n).collect(),
            inverse: (0..n).collect(),
        }
    }

    /// Build from `inverse[reordered] = original`.
    pub fn from_inverse(inverse: Vec<usize>) -> LaResult<Self> {
        let n = inverse.len();
        let mut map = vec![usize::MAX; n];
        for (new, &old) in inverse.iter().enumerate() {
            if old >= n || map[old] != usize::MAX {
                return Err(LaError::logic("reordering is not a permutation"));
            }
            map[old] = new;
        }
        Ok(Self { map, inverse })
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// One node of the elimination tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeInfo {
    /// First reordered index owned by the node.
    pub offset: usize,
    pub size: usize,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// Sorted reordered indices of ancestors the node's front couples to.
    pub lower_struct: Vec<usize>,
    /// The part of `lower_struct` coming from the original matrix entries.
    pub orig_lower_struct: Vec<usize>,
    /// Position of each `orig_lower_struct` entry within `lower_struct`.
    pub orig_lower_rel_inds: Vec<usize>,
    /// For child `c`, the row of this front receiving each row of the child's
    /// update matrix: `< size` for the node's own indices, `size + k` for
    /// `lower_struct[k]`.
    pub child_rel_inds: Vec<Vec<usize>>,
}

/// Elimination tree stored as an arena in post-order; the root is last.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymmInfo {
    pub nodes: Vec<NodeInfo>,
}

impl SymmInfo {
    pub fn root(&self) -> Option<usize> {
        self.nodes.len().checked_sub(1)
    }

    /// Total number of reordered indices covered by the tree.
    pub fn order(&self) -> usize {
        self.nodes.iter().map(|n| n.size).sum()
    }

    /// Fill in the lower structures and relative indices of a tree whose
    /// offsets, sizes and parent links are already set.
    pub fn analyze(&mut self, adjacency: &[Vec<usize>], reordering: &Reordering) -> LaResult<()> {
        for s in 0..self.nodes.len() {
            let (off, size) = (self.nodes[s].offset, self.nodes[s].size);
            let end = off + size;
            let mut orig: Vec<usize> = Vec::new();
            for &v in &reordering.inverse[off..end] {
                for &u in &adjacency[v] {
                    let r = reordering.map[u];
                    if r >= end {
                        orig.push(r);
                    }
                }
            }
            orig.sort_unstable();
            orig.dedup();

            let mut lower = orig.clone();
            for &c in &self.nodes[s].children {
                lower.extend(self.nodes[c].lower_struct.iter().copied().filter(|&e| e >= end));
            }
            lower.sort_unstable();
            lower.dedup();

            let find = |e: usize| -> LaResult<usize> {
                lower
                    .binary_search(&e)
                    .map_err(|_| LaError::logic(format!("index {} missing from lower structure", e)))
            };
            let orig_rel = orig.iter().map(|&e| find(e)).collect::<LaResult<Vec<_>>>()?;
            let mut child_rel = Vec::with_capacity(self.nodes[s].children.len());
            for &c in &self.nodes[s].children {
                let rel = self.nodes[c]
                    .lower_struct
                    .iter()
                    .map(|&e| {
                        if e < off {
                            Err(LaError::logic(format!("child couples to index {} below its parent", e)))
                        } else if e < end {
                            Ok(e - off)
                        } else {
                            find(e).map(|k| size + k)
                        }
                    })
                    .collect::<LaResult<Vec<_>>>()?;
                child_rel.push(rel);
            }
            let node = &mut self.nodes[s];
            node.lower_struct = lower;
            node.orig_lower_struct = orig;
            node.orig_lower_rel_inds = orig_rel;
            node.child_rel_inds = child_rel;
        }
        Ok(())
    }
}

/// Off-diagonal adjacency lists of the symmetrized pattern of `a`.
pub fn adjacency<F: Field>(a: &SparseMatrix<F>) -> LaResult<Vec<Vec<usize>>> {
    if a.height() != a.width() {
        return Err(LaError::DimensionMismatch {
            expected: a.height(),
            actual: a.width(),
        });
    }
    let mut adj = vec![Vec::new(); a.height()];
    for (i, j, _) in a.csr()?.iter().map(|(&v, (i, j))| (i, j, v)) {
        if i != j {
            adj[i].push(j);
            adj[j].push(i);
        }
    }
    for list in &mut adj {
        list.sort_unstable();
        list.dedup();
    }
    Ok(adj)
}

/// Separator tree before numbering.
struct Piece {
    vertices: Vec<usize>,
    children: Vec<Piece>,
}

struct Dissector<'a> {
    adj: &'a [Vec<usize>],
    cutoff: usize,
    stamp: Vec<usize>,
    generation: usize,
}

impl Dissector<'_> {
    fn mark(&mut self, set: &[usize]) -> usize {
        self.generation += 1;
        for &v in set {
            self.stamp[v] = self.generation;
        }
        self.generation
    }

    /// Breadth-first levels from `root` inside the marked set. Visited vertices
    /// are re-stamped with `visited`.
    fn levels(&mut self, root: usize, inside: usize, visited: usize) -> Vec<Vec<usize>> {
        let mut levels = vec![vec![root]];
        self.stamp[root] = visited;
        loop {
            let mut next = Vec::new();
            for &v in levels.last().map(|l| l.as_slice()).unwrap_or(&[]) {
                for &u in &self.adj[v] {
                    if self.stamp[u] == inside {
                        self.stamp[u] = visited;
                        next.push(u);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            levels.push(next);
        }
        levels
    }

    fn components(&mut self, set: &[usize]) -> Vec<Vec<usize>> {
        let inside = self.mark(set);
        self.generation += 1;
        let visited = self.generation;
        let mut comps = Vec::new();
        for &v in set {
            if self.stamp[v] != inside {
                continue;
            }
            let mut comp = Vec::new();
            let mut queue = VecDeque::from([v]);
            self.stamp[v] = visited;
            while let Some(x) = queue.pop_front() {
                comp.push(x);
                for &u in &self.adj[x] {
                    if self.stamp[u] == inside {
                        self.stamp[u] = visited;
                        queue.push_back(u);
                    }
                }
            }
            comps.push(comp);
        }
        comps
    }

    /// Level structure rooted at a pseudo-peripheral vertex of a connected set.
    fn peripheral_levels(&mut self, set: &[usize]) -> Vec<Vec<usize>> {
        let degree = |adj: &[Vec<usize>], v: usize| adj[v].len();
        let mut root = set[0];
        let mut best: Vec<Vec<usize>> = Vec::new();
        for _ in 0..8 {
            let inside = self.mark(set);
            self.generation += 1;
            let visited = self.generation;
            let levels = self.levels(root, inside, visited);
            let improved = levels.len() > best.len();
            let last = levels.last().cloned().unwrap_or_default();
            if !best.is_empty() && !improved {
                break;
            }
            best = levels;
            match last.iter().copied().min_by_key(|&v| (degree(self.adj, v), v)) {
                Some(v) if v != root => root = v,
                _ => break,
            }
        }
        best
    }

    fn dissect(&mut self, mut set: Vec<usize>) -> Piece {
        set.sort_unstable();
        if set.len() <= self.cutoff {
            return Piece {
                vertices: set,
                children: Vec::new(),
            };
        }
        let mut comps = self.components(&set);
        if comps.len() > 1 {
            comps.sort_by(|a, b| b.len().cmp(&a.len()).then(a[0].cmp(&b[0])));
            let half = set.len() / 2;
            let (mut left, mut right) = (Vec::new(), Vec::new());
            for comp in comps {
                if left.len() < half && (left.len() + comp.len() <= half || left.is_empty()) {
                    left.extend(comp);
                } else {
                    right.extend(comp);
                }
            }
            if right.is_empty() || left.is_empty() {
                return Piece {
                    vertices: set,
                    children: Vec::new(),
                };
            }
            return Piece {
                vertices: Vec::new(),
                children: vec![self.dissect(left), self.dissect(right)],
            };
        }
        let levels = self.peripheral_levels(&set);
        if levels.len() < 3 {
            return Piece {
                vertices: set,
                children: Vec::new(),
            };
        }
        let half = set.len() / 2;
        let mut seen = 0;
        let mut median = 1;
        for (l, level) in levels.iter().enumerate() {
            seen += level.len();
            if seen >= half {
                median = l;
                break;
            }
        }
        let median = median.clamp(1, levels.len() - 2);
        let left: Vec<usize> = levels[..median].iter().flatten().copied().collect();
        let right: Vec<usize> = levels[median + 1..].iter().flatten().copied().collect();
        let mut sep = levels[median].clone();
        sep.sort_unstable();
        Piece {
            vertices: sep,
            children: vec![self.dissect(left), self.dissect(right)],
        }
    }
}

fn number(piece: Piece, next: &mut usize, inverse: &mut Vec<usize>, nodes: &mut Vec<NodeInfo>) -> usize {
    let children: Vec<usize> = piece
        .children
        .into_iter()
        .map(|c| number(c, next, inverse, nodes))
        .collect();
    let offset = *next;
    let size = piece.vertices.len();
    inverse.extend(piece.vertices);
    *next += size;
    let id = nodes.len();
    for &c in &children {
        nodes[c].parent = Some(id);
    }
    nodes.push(NodeInfo {
        offset,
        size,
        children,
        ..NodeInfo::default()
    });
    id
}

/// Nested dissection of the graph of a square sparse matrix.
pub fn nested_dissection<F: Field>(a: &SparseMatrix<F>, ctrl: &BisectCtrl) -> LaResult<(Reordering, SymmInfo)> {
    let adj = adjacency(a)?;
    let n = adj.len();
    let mut d = Dissector {
        adj: &adj,
        cutoff: ctrl.cutoff.max(1),
        stamp: vec![0; n],
        generation: 0,
    };
    let tree = d.dissect((0..n).collect());
    let mut inverse = Vec::with_capacity(n);
    let mut nodes = Vec::new();
    let mut next = 0;
    number(tree, &mut next, &mut inverse, &mut nodes);
    let reordering = Reordering::from_inverse(inverse)?;
    let mut info = SymmInfo { nodes };
    info.analyze(&adj, &reordering)?;
    log::debug!(
        "nested dissection of order {}: {} nodes, largest {}",
        n,
        info.nodes.len(),
        info.nodes.iter().map(|x| x.size).max().unwrap_or(0)
    );
    Ok((reordering, info))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn laplacian_1d(n: usize) -> SparseMatrix<f64> {
        let mut t = Vec::new();
        for i in 0..n {
            t.push((i, i, 2.0));
            if i + 1 < n {
                t.push((i, i + 1, -1.0));
                t.push((i + 1, i, -1.0));
            }
        }
        SparseMatrix::from_triplets(n, n, t).unwrap()
    }

    #[test]
    fn test_path_is_split_by_a_middle_vertex() {
        let a = laplacian_1d(15);
        let (r, info) = nested_dissection(&a, &BisectCtrl { cutoff: 4 }).unwrap();
        assert_eq!(r.len(), 15);
        assert_eq!(info.order(), 15);
        let root = &info.nodes[info.root().unwrap()];
        assert_eq!(root.offset + root.size, 15);
        assert!(root.parent.is_none());
        assert_eq!(root.children.len(), 2);
        assert!(root.lower_struct.is_empty());
        // post-order: children precede parents
        for (id, node) in info.nodes.iter().enumerate() {
            if let Some(p) = node.parent {
                assert!(p > id);
            }
        }
    }

    #[test]
    fn test_lower_structs_point_at_ancestors() {
        let a = laplacian_1d(20);
        let (r, info) = nested_dissection(&a, &BisectCtrl { cutoff: 3 }).unwrap();
        for node in &info.nodes {
            let end = node.offset + node.size;
            assert!(node.lower_struct.iter().all(|&e| e >= end));
            for (k, &e) in node.orig_lower_struct.iter().enumerate() {
                assert_eq!(node.lower_struct[node.orig_lower_rel_inds[k]], e);
            }
        }
        for v in 0..20 {
            assert_eq!(r.inverse[r.map[v]], v);
        }
    }

    #[test]
    fn test_disconnected_pieces_split_without_separator() {
        let a = SparseMatrix::<f64>::identity(6);
        let (_, info) = nested_dissection(&a, &BisectCtrl { cutoff: 2 }).unwrap();
        let root = &info.nodes[info.root().unwrap()];
        assert_eq!(root.size, 0);
        assert_eq!(info.order(), 6);
    }
}
