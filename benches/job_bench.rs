// Benchmarks for job correlation and property queries

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio::runtime::Runtime;
use storwatch::properties::{
    BLOCK_INTERFACE, DRIVE_INTERFACE, FILESYSTEM_INTERFACE, FORMAT_MKFS, JOB_INTERFACE,
};
use storwatch::{DeviceGraph, Event, InterfacesAndProperties, JobManager, JobTracker};

const DRIVE: &str = "/org/freedesktop/UDisks2/drives/Kingston_DataTraveler_1234";

fn job_added(index: usize) -> Event {
    let props = InterfacesAndProperties::new()
        .with(JOB_INTERFACE, "Operation", FORMAT_MKFS)
        .with(
            JOB_INTERFACE,
            "Objects",
            &["/org/freedesktop/UDisks2/block_devices/sdb1"][..],
        );
    Event::addition(format!("/org/freedesktop/UDisks2/jobs/{}", index), props)
}

fn job_removed(index: usize) -> Event {
    Event::removal(
        format!("/org/freedesktop/UDisks2/jobs/{}", index),
        [JOB_INTERFACE],
    )
}

fn block(index: usize) -> (String, InterfacesAndProperties) {
    let props = InterfacesAndProperties::new()
        .with(BLOCK_INTERFACE, "Drive", DRIVE)
        .with(BLOCK_INTERFACE, "IdType", "vfat")
        .with(FILESYSTEM_INTERFACE, "MountPoints", Vec::<String>::new());
    (
        format!("/org/freedesktop/UDisks2/block_devices/sdb{}", index),
        props,
    )
}

fn bench_job_tracker(c: &mut Criterion) {
    let mut group = c.benchmark_group("job_tracker");

    for count in [1usize, 16, 256].iter() {
        let added: Vec<Event> = (0..*count).map(job_added).collect();
        let removed: Vec<Event> = (0..*count).map(job_removed).collect();

        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, _| {
            b.iter(|| {
                let mut tracker = JobTracker::new();
                for event in added.iter().cloned() {
                    black_box(tracker.process(event));
                }
                for event in removed.iter().cloned() {
                    black_box(tracker.process(event));
                }
                assert!(tracker.is_empty());
            });
        });
    }

    group.finish();
}

fn bench_job_manager(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("job_manager");

    group.bench_function("start_and_complete", |b| {
        b.to_async(&rt).iter(|| async {
            let (tx, rx) = flume::bounded(0);
            let manager = JobManager::spawn(rx);
            let mkfs = manager.mkfs_jobs();

            tx.send_async(job_added(1)).await.unwrap();
            black_box(mkfs.recv_async().await.unwrap());
            tx.send_async(job_removed(1)).await.unwrap();
            black_box(mkfs.recv_async().await.unwrap());

            drop(tx);
            manager.join().await;
        });
    });

    group.finish();
}

fn bench_mountable_check(c: &mut Criterion) {
    let supported = vec!["exfat".to_string(), "vfat".to_string()];
    let mut graph = DeviceGraph::new();
    let drive = Event::addition(
        DRIVE,
        InterfacesAndProperties::new().with(DRIVE_INTERFACE, "MediaRemovable", true),
    );
    graph.add_interface(&drive).unwrap();

    let events: Vec<Event> = (1..=8)
        .map(|index| {
            let (path, props) = block(index);
            let event = Event::addition(path, props);
            graph.add_interface(&event).unwrap();
            event
        })
        .collect();

    c.bench_function("desired_mountable_event", |b| {
        b.iter(|| {
            for event in &events {
                black_box(graph.desired_mountable_event(event, &supported).unwrap());
            }
        });
    });
}

criterion_group!(
    benches,
    bench_job_tracker,
    bench_job_manager,
    bench_mountable_check
);
criterion_main!(benches);
