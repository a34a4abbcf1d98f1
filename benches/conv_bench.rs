use accelconv::case::{CaseData, ConvCase};
use accelconv::cfu::CfuEmulator;
use accelconv::{conv_accelerated, conv_reference, ConvParams, Padding};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn grouped_case(name: &str, size: usize, groups: usize) -> CaseData<i8> {
    let case = ConvCase {
        name: name.into(),
        input: [1, size, size, 4 * groups],
        filter: [4 * groups, 3, 3, 4],
        params: ConvParams { padding: Padding { height: 1, width: 1 }, input_offset: 128, ..ConvParams::default() },
        scales: vec![0.003],
        bias: true,
        width: Default::default(),
        seed: 0xbe7c,
    };
    case.materialize().expect("bench case")
}

fn bench_conv(c: &mut Criterion) {
    let mut group = c.benchmark_group("conv_per_channel");
    for &(size, groups) in &[(8usize, 1usize), (16, 4)] {
        let data = grouped_case("bench", size, groups);
        let problem = data.problem();
        let id = format!("{size}x{size}x{}", 4 * groups);

        group.bench_with_input(BenchmarkId::new("reference", &id), &problem, |b, p| {
            let mut out = data.output_buffer();
            b.iter(|| {
                conv_reference(black_box(p), &mut out).unwrap();
                black_box(out[0])
            })
        });

        group.bench_with_input(BenchmarkId::new("emulated_accelerator", &id), &problem, |b, p| {
            let mut emu = CfuEmulator::new();
            let mut out = data.output_buffer();
            b.iter(|| {
                conv_accelerated(&mut emu, black_box(p), &mut out).unwrap();
                black_box(out[0])
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_conv);
criterion_main!(benches);
