use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ccgraph::core::query::{diagram_subgraph, reachable};
use ccgraph::{build, AnalysisConfig, EdgeKind, SourceEntry, SourceTree};
use petgraph::Direction;

fn python_project(modules: usize) -> SourceTree {
    let mut entries = Vec::with_capacity(modules);
    for i in 0..modules {
        let previous = i.saturating_sub(1);
        let content = format!(
            r#"
from pkg.mod_{previous} import Handler{previous}

class Handler{i}(Handler{previous}):
    def __init__(self):
        self.value = {i}

    def process(self):
        return self.calculate() * 2

    def calculate(self):
        if self.value > 10:
            return self.value + 10
        return helper_{i}(self.value)

def helper_{i}(value):
    return value * 3

def main():
    instance = Handler{i}()
    return instance.process()
"#
        );
        entries.push(SourceEntry::new(format!("pkg/mod_{i}.py"), content));
    }
    SourceTree::from_entries(entries)
}

fn typescript_project(components: usize) -> SourceTree {
    let mut entries = Vec::with_capacity(components);
    for i in 0..components {
        let content = format!(
            r#"
import {{ Base }} from './base';

export class Component{i} extends Base {{
    constructor(private id: number = {i}) {{
        super();
    }}

    render(): string {{
        return `<div id="${{this.id}}">${{this.process()}}</div>`;
    }}

    process(): string {{
        return this.helper().toUpperCase();
    }}

    private helper(): string {{
        return `component_${{this.id}}`;
    }}
}}
"#
        );
        entries.push(SourceEntry::new(format!("src/component_{i}.ts"), content));
    }
    entries.push(SourceEntry::new(
        "src/base.ts",
        "export class Base {\n    mount(): void {}\n}\n",
    ));
    SourceTree::from_entries(entries)
}

fn benchmark_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_build");
    let config = AnalysisConfig::default().with_max_files(500);

    let small = python_project(10);
    group.bench_function("python_10_files", |b| {
        b.iter(|| black_box(build(black_box(&small), &config)))
    });

    let large = python_project(200);
    group.bench_function("python_200_files", |b| {
        b.iter(|| black_box(build(black_box(&large), &config)))
    });

    let components = typescript_project(100);
    group.bench_function("typescript_100_files", |b| {
        b.iter(|| black_box(build(black_box(&components), &config)))
    });

    group.finish();
}

fn benchmark_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_queries");
    let config = AnalysisConfig::default().with_max_files(500);
    let Ok((graph, _)) = build(&python_project(200), &config) else {
        return;
    };
    let Some(start) = graph.find("pkg/mod_199.py::Handler199") else {
        return;
    };

    group.bench_function("inheritance_reachability", |b| {
        b.iter(|| black_box(reachable(&graph, black_box(start), EdgeKind::Inherits, Direction::Outgoing)))
    });

    group.bench_function("diagram_subgraph", |b| {
        b.iter(|| black_box(diagram_subgraph(&graph, black_box(15), None)))
    });

    group.finish();
}

criterion_group!(benches, benchmark_build, benchmark_queries);
criterion_main!(benches);
