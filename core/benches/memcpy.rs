// Copyright (C) 2022  Pierre Krieger
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use datamover_core::future::busy_poll;
use datamover_core::runtime::Runtime;
use datamover_core::vdm::sync::DataMoverSync;
use datamover_core::vdm::threads::DataMoverThreads;
use datamover_core::vdm::DataMover as _;
use datamover_core::NotifierKind;

const SIZES: [usize; 3] = [4 * 1024, 64 * 1024, 1024 * 1024];

fn memcpy_sync(c: &mut Criterion) {
    let mover = DataMoverSync::new();
    let mut group = c.benchmark_group("memcpy_sync");
    for size in SIZES.iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let src = vec![0xa5u8; size];
            let mut dest = vec![0u8; size];
            b.iter(|| {
                let mut fut = mover.memcpy(&mut dest[..], &src[..], 0);
                busy_poll(&mut fut);
            });
        });
    }
    group.finish();
}

fn memcpy_threads(c: &mut Criterion) {
    let mover = DataMoverThreads::new(4, 128, NotifierKind::Waker).unwrap();
    let runtime = Runtime::new();
    let mut group = c.benchmark_group("memcpy_threads");
    for size in SIZES.iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let src = vec![0xa5u8; size];
            let mut dest = vec![0u8; size];
            b.iter(|| {
                let mut fut = mover.memcpy(&mut dest[..], &src[..], 0);
                runtime.wait(&mut fut);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, memcpy_sync, memcpy_threads);
criterion_main!(benches);
