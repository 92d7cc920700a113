use criterion::{black_box, criterion_group, criterion_main, Criterion};

use xllr::engine::{construct_cdts, traverse_cdts, ValueBuilder, ValueSource};
use xllr::{local_runtime, CallBuffer, TypeInfo, TypeTag, Value, Xllr};

fn scalars() -> Vec<Value> {
    vec![
        Value::I64(42),
        Value::F64(2.5),
        Value::Bool(true),
        Value::from("hello"),
    ]
}

fn matrix(rows: i64, cols: i64) -> Value {
    Value::Array(
        (0..rows)
            .map(|r| Value::Array((0..cols).map(|c| Value::I64(r * cols + c)).collect()))
            .collect(),
    )
}

fn bench_construct(c: &mut Criterion) {
    let values = scalars();
    let declared: Vec<TypeInfo> = values.iter().map(Value::type_info).collect();
    c.bench_function("construct_scalars", |b| {
        b.iter(|| {
            let mut buffer = CallBuffer::new(values.len() as u64, 0);
            construct_cdts(buffer.params_mut(), &mut ValueSource::new(&values, &declared), &declared).unwrap();
            black_box(buffer);
        });
    });

    let values = vec![matrix(32, 32)];
    let declared = vec![TypeInfo::array(TypeTag::INT64, 2)];
    c.bench_function("construct_matrix_32x32", |b| {
        b.iter(|| {
            let mut buffer = CallBuffer::new(1, 0);
            construct_cdts(buffer.params_mut(), &mut ValueSource::new(&values, &declared), &declared).unwrap();
            black_box(buffer);
        });
    });
}

fn bench_traverse(c: &mut Criterion) {
    let values = vec![matrix(32, 32)];
    let declared = vec![TypeInfo::array(TypeTag::INT64, 2)];
    let mut buffer = CallBuffer::new(1, 0);
    construct_cdts(buffer.params_mut(), &mut ValueSource::new(&values, &declared), &declared).unwrap();

    c.bench_function("traverse_matrix_32x32", |b| {
        b.iter(|| {
            let mut builder = ValueBuilder::new(1);
            traverse_cdts(buffer.params(), &mut builder).unwrap();
            black_box(builder.into_values());
        });
    });
}

fn bench_xcall(c: &mut Criterion) {
    let i64_t = TypeInfo::new(TypeTag::INT64);
    local_runtime().register_fn("bench", "add", vec![i64_t.clone(), i64_t.clone()], vec![i64_t.clone()], |args| {
        let a: i64 = args[0].clone().into_native()?;
        let b: i64 = args[1].clone().into_native()?;
        Ok(vec![Value::I64(a + b)])
    });
    let engine = Xllr::default();
    let add = engine
        .load_entity("rust", "bench", "callable=add", &[i64_t.clone(), i64_t.clone()], &[i64_t])
        .unwrap();

    c.bench_function("xcall_params_ret", |b| {
        b.iter(|| black_box(add.call(vec![Value::I64(1), Value::I64(2)]).unwrap()));
    });
}

criterion_group!(benches, bench_construct, bench_traverse, bench_xcall);
criterion_main!(benches);
