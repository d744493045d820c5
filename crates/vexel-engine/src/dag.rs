//! Dependency graph over a TAC program
//!
//! Nodes are TAC indices. A single forward pass maintains, per base, the
//! last writer and the readers since that write, and materializes RAW, WAW
//! and WAR edges between touching views (provably disjoint views produce no
//! edge). FREE and DISCARD act as writers so system ops cannot float past
//! user ops on the same base; SYNC acts as a reader.
//!
//! An edge is *fusible* when both endpoint ops may live in one loop nest
//! (MAP/ZIP/GENERATE) and the touching views are aligned; every other edge
//! is a *barrier*. Weakly connected components over fusible edges form the
//! subgraphs; barrier edges order the subgraphs.

use std::collections::HashMap;
use std::fmt::Write as _;
use vexel_core::{BaseHandle, SymbolTable, Tac, TacOp, TacSub, View};

/// Edge classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Endpoints may share a loop nest
    Fusible,
    /// Endpoints must execute in separate kernels, in order
    Barrier,
}

#[derive(Debug, Clone, Copy)]
pub struct Edge {
    pub src: usize,
    pub dst: usize,
    pub kind: EdgeKind,
}

/// One weakly connected component over fusible edges
#[derive(Debug, Clone)]
pub struct Subgraph {
    /// Member TAC indices, ascending (program order)
    pub vertices: Vec<usize>,
    /// OR of member op bits
    pub omask: u32,
}

impl Subgraph {
    pub fn min_vertex(&self) -> usize {
        self.vertices[0]
    }
}

/// Dependency DAG plus its subgraph partition
#[derive(Debug)]
pub struct Dag {
    edges: Vec<Edge>,
    subgraphs: Vec<Subgraph>,
}

struct UnionFind(Vec<usize>);

impl UnionFind {
    fn new(n: usize) -> Self {
        Self((0..n).collect())
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.0[root] != root {
            root = self.0[root];
        }
        let mut cur = x;
        while self.0[cur] != root {
            let next = self.0[cur];
            self.0[cur] = root;
            cur = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.0[hi] = lo;
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Access {
    Read,
    Write,
}

/// Views touched by one TAC, with direction
fn accesses<'t>(tac: &Tac, table: &'t SymbolTable) -> Vec<(&'t View, Access)> {
    let mut out = Vec::with_capacity(3);
    match tac.op {
        TacOp::Noop => {}
        TacOp::System => {
            if let Some(h) = tac.output() {
                if let Some(view) = table[h].view() {
                    let access = match tac.sub {
                        TacSub::Sync => Access::Read,
                        _ => Access::Write,
                    };
                    out.push((view, access));
                }
            }
        }
        _ => {
            // Inputs are read before the output is written
            for h in [tac.input1(), tac.input2()].into_iter().flatten() {
                if let Some(view) = table[h].view() {
                    out.push((view, Access::Read));
                }
            }
            if let Some(h) = tac.output() {
                if let Some(view) = table[h].view() {
                    out.push((view, Access::Write));
                }
            }
        }
    }
    out
}

fn classify(program: &[Tac], src: usize, dst: usize, a: &View, b: &View) -> EdgeKind {
    if program[src].op.is_fusible() && program[dst].op.is_fusible() && a.aligned(b) {
        EdgeKind::Fusible
    } else {
        EdgeKind::Barrier
    }
}

impl Dag {
    pub fn new(table: &SymbolTable, program: &[Tac]) -> Self {
        let mut edges: Vec<Edge> = Vec::new();
        let mut last_writer: HashMap<BaseHandle, (usize, View)> = HashMap::new();
        let mut readers: HashMap<BaseHandle, Vec<(usize, View)>> = HashMap::new();

        for (i, tac) in program.iter().enumerate() {
            for (view, access) in accesses(tac, table) {
                let base = view.base;
                match access {
                    Access::Read => {
                        if let Some((w, wv)) = last_writer.get(&base) {
                            if *w != i && !view.disjoint(wv) {
                                edges.push(Edge {
                                    src: *w,
                                    dst: i,
                                    kind: classify(program, *w, i, wv, view),
                                });
                            }
                        }
                        readers.entry(base).or_default().push((i, view.clone()));
                    }
                    Access::Write => {
                        if let Some((w, wv)) = last_writer.get(&base) {
                            if *w != i && !view.disjoint(wv) {
                                edges.push(Edge {
                                    src: *w,
                                    dst: i,
                                    kind: classify(program, *w, i, wv, view),
                                });
                            }
                        }
                        if let Some(rs) = readers.get(&base) {
                            for (r, rv) in rs {
                                if *r != i && !view.disjoint(rv) {
                                    edges.push(Edge {
                                        src: *r,
                                        dst: i,
                                        kind: classify(program, *r, i, rv, view),
                                    });
                                }
                            }
                        }
                        last_writer.insert(base, (i, view.clone()));
                        readers.remove(&base);
                    }
                }
            }
        }

        let subgraphs = Self::partition(program, &edges);
        Self { edges, subgraphs }
    }

    /// Components over fusible edges, ordered so every barrier edge points
    /// from an earlier subgraph to a later one. If fusion closed an order
    /// cycle through barrier edges, the offending components fall back to
    /// singletons (per-TAC execution is always a valid linearization).
    fn partition(program: &[Tac], edges: &[Edge]) -> Vec<Subgraph> {
        let n = program.len();
        let mut uf = UnionFind::new(n);
        for e in edges {
            if e.kind == EdgeKind::Fusible {
                uf.union(e.src, e.dst);
            }
        }

        loop {
            // Collect components
            let mut members: HashMap<usize, Vec<usize>> = HashMap::new();
            for v in 0..n {
                members.entry(uf.find(v)).or_default().push(v);
            }

            // Quotient edges from barriers crossing components
            let mut succs: HashMap<usize, Vec<usize>> = HashMap::new();
            let mut indeg: HashMap<usize, usize> = members.keys().map(|&r| (r, 0)).collect();
            for e in edges {
                let (cs, cd) = (uf.find(e.src), uf.find(e.dst));
                if cs != cd {
                    succs.entry(cs).or_default().push(cd);
                    *indeg.get_mut(&cd).expect("component exists") += 1;
                }
            }

            // Kahn's sweep; ready components drain in program order
            let mut ready: Vec<usize> = indeg
                .iter()
                .filter(|(_, &d)| d == 0)
                .map(|(&r, _)| r)
                .collect();
            let mut order: Vec<usize> = Vec::with_capacity(members.len());
            while !ready.is_empty() {
                ready.sort_unstable_by_key(|&r| members[&r][0]);
                let root = ready.remove(0);
                order.push(root);
                if let Some(ss) = succs.get(&root) {
                    for &s in ss {
                        let d = indeg.get_mut(&s).expect("component exists");
                        *d -= 1;
                        if *d == 0 {
                            ready.push(s);
                        }
                    }
                }
            }

            if order.len() == members.len() {
                return order
                    .into_iter()
                    .map(|root| {
                        let vertices = members.remove(&root).expect("ordered component");
                        let omask = vertices.iter().fold(0u32, |m, &v| m | program[v].op.bit());
                        Subgraph { vertices, omask }
                    })
                    .collect();
            }

            // Cycle through a fused component: demote stalled components
            tracing::warn!("fusion closed an ordering cycle; splitting affected subgraphs");
            let stalled: Vec<usize> = indeg
                .iter()
                .filter(|(_, &d)| d > 0)
                .map(|(&r, _)| r)
                .collect();
            uf = UnionFind::new(n);
            for e in edges {
                if e.kind == EdgeKind::Fusible {
                    let mut keep = true;
                    for &root in &stalled {
                        if members[&root].contains(&e.src) || members[&root].contains(&e.dst) {
                            keep = false;
                            break;
                        }
                    }
                    if keep {
                        uf.union(e.src, e.dst);
                    }
                }
            }
        }
    }

    /// Subgraphs in execution order
    pub fn subgraphs(&self) -> &[Subgraph] {
        &self.subgraphs
    }

    pub fn omask(&self, subgraph_idx: usize) -> u32 {
        self.subgraphs[subgraph_idx].omask
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Graphviz rendering of the TAC graph, for `dump_rep` debugging
    pub fn dot(&self, program: &[Tac]) -> String {
        let mut out = String::from("digraph program {\n");
        for (sg_idx, sg) in self.subgraphs.iter().enumerate() {
            let _ = writeln!(out, "  subgraph cluster_{sg_idx} {{");
            let _ = writeln!(out, "    label=\"sg{sg_idx} omask={:#x}\";", sg.omask);
            for &v in &sg.vertices {
                let _ = writeln!(out, "    n{v} [label=\"{v}: {}\"];", program[v]);
            }
            let _ = writeln!(out, "  }}");
        }
        for e in &self.edges {
            let style = match e.kind {
                EdgeKind::Fusible => "dashed",
                EdgeKind::Barrier => "solid",
            };
            let _ = writeln!(out, "  n{} -> n{} [style={style}];", e.src, e.dst);
        }
        out.push_str("}\n");
        out
    }
}
