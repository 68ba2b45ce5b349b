use criterion::Criterion;
use iothub_device::hub::sas;
use std::hint::black_box;

pub fn bench_generate(c: &mut Criterion) {
    let mut group = c.benchmark_group("sas");
    let resource = sas::resource_uri("myhub.azure-devices.net", "dev1");
    group.bench_function("generate", |b| {
        b.iter(|| {
            sas::generate(
                black_box("ZGV2aWNlLXNlY3JldC1rZXktMDEyMzQ1Njc4OWFiY2Q="),
                black_box(&resource),
                "",
                black_box(1_700_003_600),
            )
            .expect("Failed to sign")
        })
    });
    group.finish();
}
