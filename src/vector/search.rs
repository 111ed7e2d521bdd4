//! Neighbor Search Backends
//!
//! Exact brute-force scan and an approximate navigable similarity graph,
//! both over unit-normalized vectors.

use hashbrown::HashSet;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use tracing::debug;

use super::similarity::{dot_product, normalize_vector, unit_distance};
use crate::config::{GraphParams, NnMethod};

/// Unit-normalized row-major vectors the backends search over
#[derive(Debug, Clone)]
pub struct VectorSpace {
    dim: usize,
    rows: Vec<f32>,
}

impl VectorSpace {
    /// Normalizes every row of `data`
    pub fn new(mut data: Vec<f32>, dim: usize) -> Self {
        if dim > 0 {
            for row in data.chunks_exact_mut(dim) {
                normalize_vector(row);
            }
        }
        Self { dim, rows: data }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.rows.len() / self.dim
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn row(&self, id: u32) -> &[f32] {
        let start = id as usize * self.dim;
        &self.rows[start..start + self.dim]
    }
}

/// One ranked row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub id: u32,
    /// Cosine distance to the query
    pub distance: f32,
}

#[derive(Debug)]
struct Ranked<'a> {
    distance: f32,
    token: &'a str,
    id: u32,
}

impl PartialEq for Ranked<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked<'_> {}

impl Ord for Ranked<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.token.cmp(other.token))
    }
}

impl PartialOrd for Ranked<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Keeps the `k` best rows by (distance, token)
pub(crate) struct TopK<'a> {
    k: usize,
    tokens: &'a [String],
    heap: BinaryHeap<Ranked<'a>>,
}

impl<'a> TopK<'a> {
    pub(crate) fn new(k: usize, tokens: &'a [String]) -> Self {
        Self {
            k,
            tokens,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    pub(crate) fn push(&mut self, id: u32, distance: f32) {
        if self.k == 0 {
            return;
        }
        let tokens = self.tokens;
        let ranked = Ranked {
            distance,
            token: tokens[id as usize].as_str(),
            id,
        };
        if self.heap.len() < self.k {
            self.heap.push(ranked);
        } else if let Some(worst) = self.heap.peek() {
            if ranked < *worst {
                self.heap.pop();
                self.heap.push(ranked);
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    /// Best first
    pub(crate) fn into_hits(self) -> Vec<Hit> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|r| Hit {
                id: r.id,
                distance: r.distance,
            })
            .collect()
    }
}

/// A nearest-neighbor search strategy over a [`VectorSpace`]
pub trait NeighborSearch: Send + Sync {
    fn method(&self) -> NnMethod;

    /// Up to `k` rows closest to the unit vector `query`, skipping
    /// `exclude`, ordered by ascending distance then token.
    fn search(
        &self,
        space: &VectorSpace,
        tokens: &[String],
        query: &[f32],
        k: usize,
        exclude: &[u32],
    ) -> Vec<Hit>;
}

/// Full scan, O(n) per query
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactSearch;

impl NeighborSearch for ExactSearch {
    fn method(&self) -> NnMethod {
        NnMethod::Exact
    }

    fn search(
        &self,
        space: &VectorSpace,
        tokens: &[String],
        query: &[f32],
        k: usize,
        exclude: &[u32],
    ) -> Vec<Hit> {
        let mut top = TopK::new(k, tokens);
        for id in 0..space.len() as u32 {
            if exclude.contains(&id) {
                continue;
            }
            top.push(id, unit_distance(query, space.row(id)));
        }
        top.into_hits()
    }
}

#[derive(Debug, Clone, Copy)]
struct Scored {
    id: u32,
    similarity: f32,
}

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scored {}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.similarity
            .total_cmp(&other.similarity)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Single-layer navigable similarity graph.
///
/// Nodes are inserted in row order, each linked to its `m` best
/// candidates found by a greedy walk over the nodes already inserted;
/// back-links are pruned to `2 * m`. Queries walk the graph best-first
/// with a pool of `ef_search` candidates.
#[derive(Debug, Clone)]
pub struct GraphSearch {
    params: GraphParams,
    entry: Option<u32>,
    neighbors: Vec<Vec<u32>>,
}

impl GraphSearch {
    /// Build over every row of `space`
    pub fn build(space: &VectorSpace, params: GraphParams) -> Self {
        let mut graph = Self {
            params,
            entry: None,
            neighbors: vec![Vec::new(); space.len()],
        };
        for id in 0..space.len() as u32 {
            graph.insert(space, id);
        }
        graph
    }

    pub fn params(&self) -> GraphParams {
        self.params
    }

    /// Out-degree of node `id`
    pub fn degree(&self, id: u32) -> usize {
        self.neighbors[id as usize].len()
    }

    fn insert(&mut self, space: &VectorSpace, id: u32) {
        let Some(entry) = self.entry else {
            self.entry = Some(id);
            return;
        };
        let ef = self.params.ef_construction.max(self.params.m);
        let mut candidates = self.walk(space, space.row(id), ef, entry);
        candidates.retain(|c| c.id != id);
        candidates.sort_by(|a, b| b.cmp(a));
        candidates.truncate(self.params.m);

        let linked: Vec<u32> = candidates.iter().map(|c| c.id).collect();
        for &n in &linked {
            let mut list = std::mem::take(&mut self.neighbors[n as usize]);
            list.push(id);
            self.prune(space, n, &mut list, self.params.m * 2);
            self.neighbors[n as usize] = list;
        }
        self.neighbors[id as usize] = linked;
    }

    fn prune(&self, space: &VectorSpace, target: u32, list: &mut Vec<u32>, max: usize) {
        if list.len() <= max {
            return;
        }
        let origin = space.row(target);
        list.sort_by(|&a, &b| {
            let sa = dot_product(origin, space.row(a));
            let sb = dot_product(origin, space.row(b));
            sb.total_cmp(&sa).then_with(|| a.cmp(&b))
        });
        list.truncate(max);
    }

    /// Best-first walk from `entry`, returns up to `ef` visited nodes
    fn walk(&self, space: &VectorSpace, query: &[f32], ef: usize, entry: u32) -> Vec<Scored> {
        let mut visited = HashSet::new();
        let mut candidates = BinaryHeap::new();
        let mut results: BinaryHeap<Reverse<Scored>> = BinaryHeap::new();

        let start = Scored {
            id: entry,
            similarity: dot_product(query, space.row(entry)),
        };
        visited.insert(entry);
        candidates.push(start);
        results.push(Reverse(start));

        while let Some(best) = candidates.pop() {
            let worst = results.peek().map(|r| r.0.similarity).unwrap_or(f32::MIN);
            if results.len() >= ef && best.similarity < worst {
                break;
            }
            for &neighbor in &self.neighbors[best.id as usize] {
                if !visited.insert(neighbor) {
                    continue;
                }
                let scored = Scored {
                    id: neighbor,
                    similarity: dot_product(query, space.row(neighbor)),
                };
                let worst = results.peek().map(|r| r.0.similarity).unwrap_or(f32::MIN);
                if results.len() < ef || scored.similarity > worst {
                    candidates.push(scored);
                    results.push(Reverse(scored));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }
        results.into_iter().map(|r| r.0).collect()
    }
}

impl NeighborSearch for GraphSearch {
    fn method(&self) -> NnMethod {
        NnMethod::Approximate
    }

    fn search(
        &self,
        space: &VectorSpace,
        tokens: &[String],
        query: &[f32],
        k: usize,
        exclude: &[u32],
    ) -> Vec<Hit> {
        let Some(entry) = self.entry else {
            return Vec::new();
        };
        let ef = self.params.ef_search.max(k + exclude.len());
        let mut top = TopK::new(k, tokens);
        for scored in self.walk(space, query, ef, entry) {
            if !exclude.contains(&scored.id) {
                top.push(scored.id, unit_distance(query, space.row(scored.id)));
            }
        }

        let eligible = space.len().saturating_sub(exclude.len());
        if top.len() < k.min(eligible) {
            debug!(
                "Graph walk returned {} of {} neighbors, falling back to exact scan",
                top.len(),
                k
            );
            return ExactSearch.search(space, tokens, query, k, exclude);
        }
        top.into_hits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space_of(rows: &[[f32; 2]]) -> (VectorSpace, Vec<String>) {
        let data: Vec<f32> = rows.iter().flatten().copied().collect();
        let tokens = (0..rows.len()).map(|i| format!("t{:02}", i)).collect();
        (VectorSpace::new(data, 2), tokens)
    }

    /// Points on the unit circle at increasing angles
    fn circle(n: usize) -> (VectorSpace, Vec<String>) {
        let rows: Vec<[f32; 2]> = (0..n)
            .map(|i| {
                let a = i as f32 * 0.05;
                [a.cos(), a.sin()]
            })
            .collect();
        space_of(&rows)
    }

    #[test]
    fn test_space_normalizes_rows() {
        let (space, _) = space_of(&[[3.0, 4.0], [0.0, 0.0]]);
        assert_eq!(space.len(), 2);
        assert!((space.row(0)[0] - 0.6).abs() < 1e-6);
        assert_eq!(space.row(1), &[0.0, 0.0]);
    }

    #[test]
    fn test_exact_orders_by_distance() {
        let (space, tokens) = circle(10);
        let hits = ExactSearch.search(&space, &tokens, space.row(0), 3, &[0]);
        let ids: Vec<u32> = hits.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn test_ties_broken_by_token() {
        let data = vec![1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0];
        let space = VectorSpace::new(data, 2);
        let tokens: Vec<String> = ["query", "zeta", "alpha", "mid"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let hits = ExactSearch.search(&space, &tokens, space.row(0), 3, &[0]);
        let names: Vec<&str> = hits.iter().map(|h| tokens[h.id as usize].as_str()).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_k_larger_than_table() {
        let (space, tokens) = circle(4);
        let hits = ExactSearch.search(&space, &tokens, space.row(2), 10, &[2]);
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|h| h.id != 2));
    }

    #[test]
    fn test_graph_degree_bounded() {
        let (space, _) = circle(200);
        let params = GraphParams {
            m: 4,
            ef_construction: 16,
            ef_search: 16,
        };
        let graph = GraphSearch::build(&space, params);
        assert_eq!(graph.params(), params);
        for id in 0..200 {
            assert!(graph.degree(id) <= 2 * graph.params().m);
        }
        assert!(graph.degree(199) >= 1);
    }

    #[test]
    fn test_graph_returns_requested_count() {
        let (space, tokens) = circle(120);
        let graph = GraphSearch::build(&space, GraphParams::default());
        for query in [0u32, 37, 119] {
            let hits = graph.search(&space, &tokens, space.row(query), 15, &[query]);
            assert_eq!(hits.len(), 15);
            assert!(hits.iter().all(|h| h.id != query));
            assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
        }
    }

    #[test]
    fn test_graph_matches_exact_on_easy_data() {
        let (space, tokens) = circle(100);
        let graph = GraphSearch::build(&space, GraphParams::default());
        let approx = graph.search(&space, &tokens, space.row(50), 2, &[50]);
        let exact = ExactSearch.search(&space, &tokens, space.row(50), 2, &[50]);
        assert_eq!(approx, exact);
    }

    #[test]
    fn test_graph_is_deterministic() {
        let (space, tokens) = circle(80);
        let a = GraphSearch::build(&space, GraphParams::default());
        let b = GraphSearch::build(&space, GraphParams::default());
        let query = space.row(10);
        assert_eq!(
            a.search(&space, &tokens, query, 5, &[]),
            b.search(&space, &tokens, query, 5, &[])
        );
    }
}
