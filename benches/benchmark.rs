use criterion::{Criterion, black_box, criterion_group, criterion_main};
use infra_camera_calibration::camera_model::{GenericModel, KannalaBrandt4};
use infra_camera_calibration::correspondence::{CorrespondenceFinder, CorrespondenceOptions};
use infra_camera_calibration::synthetic;
use infra_camera_calibration::types::Pose;
use nalgebra as na;

fn bench_projection(c: &mut Criterion) {
    let pinhole = synthetic::default_model();
    let fisheye = GenericModel::KannalaBrandt4(KannalaBrandt4::new(
        380.0, 380.0, 376.0, 240.0, 0.01, -0.005, 0.002, -0.0005, 752, 480,
    ));
    let pt = na::Vector3::new(0.4, -0.2, 5.0);

    c.bench_function("project_pinhole", |b| {
        b.iter(|| pinhole.project_one(black_box(&pt)))
    });
    c.bench_function("project_kb4", |b| {
        b.iter(|| fisheye.project_one(black_box(&pt)))
    });
}

fn bench_matching(c: &mut Criterion) {
    let model = synthetic::default_model();
    let graph = synthetic::build_graph(1, 5, 300, &model);
    let pose = Pose::new(
        na::UnitQuaternion::identity(),
        na::Vector3::new(0.1, 0.0, -0.2),
    );
    let observations = synthetic::camera_observations(&graph, &model, &pose, 150, 0.2, 2);
    let finder = CorrespondenceFinder::new(&graph, CorrespondenceOptions::default());

    c.bench_function("find_correspondences_150x300", |b| {
        b.iter(|| finder.find_correspondences(black_box(&observations), graph.keyframes()))
    });
}

criterion_group!(benches, bench_projection, bench_matching);
criterion_main!(benches);
