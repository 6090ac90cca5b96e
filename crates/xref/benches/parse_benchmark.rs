use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::path::Path;
use xref::parse::asm::AsmParser;
use xref::parse::generic::{GenericConfig, GenericParser};

fn create_c_source(functions: usize) -> String {
    let mut source = String::from("#include <stdio.h>\n#include \"util.h\"\n\n");

    for i in 0..functions {
        source.push_str(&format!("#define LIMIT_{} {}\n", i, i * 10));
        source.push_str(&format!("struct state_{} {{\n    int count;\n}};\n\n", i));
        source.push_str(&format!("static int handler_{}(struct state_{} *s)\n{{\n", i, i));
        source.push_str("    /* walk the table */\n");
        source.push_str(&format!("    if (check_{}(s->count) < LIMIT_{})\n", i, i));
        source.push_str("        goto done;\n");
        source.push_str(&format!("    printf(\"%d\\n\", helper_{}(s));\n", i));
        source.push_str("done:\n    return 0;\n}\n\n");
    }

    source
}

fn create_asm_source(labels: usize) -> String {
    let mut source = String::from("#include \"regs.h\"\n\t.text\n");

    for i in 0..labels {
        source.push_str(&format!("routine_{}:\n", i));
        source.push_str("\tpush %rbp\n\tmov %rsp, %rbp\n");
        source.push_str(&format!("\tcall helper_{}\n", i));
        source.push_str(&format!("\tjne routine_{}\n", (i + 1) % labels));
        source.push_str("\tpop %rbp\n\tret\n");
    }

    source
}

fn benchmark_generic(c: &mut Criterion) {
    let parser = GenericParser::new(&GenericConfig::default()).unwrap();
    let source = create_c_source(1000);
    let path = Path::new("src/bench.c");

    c.bench_function("generic_parse_1000_functions", |b| {
        b.iter(|| parser.symbols(black_box(path), black_box(&source)).count())
    });
}

fn benchmark_asm(c: &mut Criterion) {
    let parser = AsmParser::new().unwrap();
    let source = create_asm_source(1000);
    let path = Path::new("arch/bench.s");

    c.bench_function("asm_parse_1000_labels", |b| {
        b.iter(|| parser.symbols(black_box(path), black_box(&source)).count())
    });
}

criterion_group!(benches, benchmark_generic, benchmark_asm);
criterion_main!(benches);
