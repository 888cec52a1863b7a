//! Routing benchmarks for the coalescing backend

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pathwatcher::coalesce::router::{aggregate, route_batch};
use pathwatcher::coalesce::{RawFlags, RawNotification, Routes};
use pathwatcher::{Action, WatchHandle};
use pathwatcher_core::FileActionListener;
use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

struct Inert;

impl FileActionListener for Inert {
    fn handle_file_action(
        &self,
        _handle: WatchHandle,
        _dir: &Path,
        _filename: &OsStr,
        _action: Action,
        _old_filename: Option<&OsStr>,
    ) {
    }
}

fn routes(watches: usize) -> Routes {
    let mut routes = Routes::default();
    let listener: Arc<dyn FileActionListener> = Arc::new(Inert);
    for i in 0..watches {
        routes.insert(
            WatchHandle::from_raw(i as i32 + 1),
            PathBuf::from(format!("/project/dir{i}")),
            listener.clone(),
        );
    }
    routes
}

/// Mixed batch: creates, modifications and same-dir rename pairs
fn batch(watches: usize, size: usize) -> Vec<RawNotification> {
    let mut batch = Vec::with_capacity(size);
    let mut id = 0u64;
    while batch.len() < size {
        let dir = format!("/project/dir{}", id as usize % watches);
        let flags = match id % 4 {
            0 => RawFlags::ITEM_CREATED | RawFlags::IS_FILE,
            1 => RawFlags::ITEM_MODIFIED | RawFlags::IS_FILE,
            _ => RawFlags::ITEM_RENAMED | RawFlags::IS_FILE,
        };
        let raw = RawNotification::new(format!("{dir}/file{id}"), flags, id);
        let raw = if flags.is_rename() {
            raw.with_inode(id / 2)
        } else {
            raw
        };
        batch.push(raw);
        id += 1;
    }
    batch
}

fn bench_route_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("route_batch");

    for &(watches, size) in &[(1, 16), (64, 256), (1024, 4096)] {
        let routes = routes(watches);
        let batch = batch(watches, size);
        // Skip the disk: half the paths "exist"
        let exists = |p: &Path| p.as_os_str().len() % 2 == 0;

        group.bench_with_input(
            BenchmarkId::new("watches_batch", format!("{watches}x{size}")),
            &batch,
            |b, batch| {
                b.iter(|| {
                    let plan = route_batch(&routes, black_box(batch), exists);
                    black_box(plan.actions.len())
                });
            },
        );
    }

    group.finish();
}

fn bench_aggregate(c: &mut Criterion) {
    let routes = routes(1024);
    let plan = route_batch(&routes, &batch(1024, 4096), |_| true);
    let dirs: BTreeSet<PathBuf> = (0..1024)
        .map(|i| PathBuf::from(format!("/project/dir{i}")))
        .collect();

    c.bench_function("aggregate_1024_dirs", |b| {
        b.iter(|| black_box(aggregate(&routes, black_box(&dirs), &plan.actions)).len());
    });
}

criterion_group!(benches, bench_route_batch, bench_aggregate);
criterion_main!(benches);
