use std::fs;
use std::path::Path;
use std::process::Command;

use depmat::artifact::read_values;
use tempfile::tempdir;

fn depmat(dir: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_depmat"))
        .current_dir(dir)
        .env("RUST_LOG", "warn")
        .args(args)
        .output()
        .expect("run depmat cli")
}

#[test]
fn import_batch_compile_from_the_command_line() {
    let tmp = tempdir().expect("temporary directory");
    fs::write(
        tmp.path().join("expr.tab"),
        "a\t1\t2\t3\t4\n\
         b\t2\t4\t6\t8\n\
         c\t4\t3\t2\t1\n",
    )
    .expect("write input");

    let import = depmat(tmp.path(), &["import", "expr.tab", "--outdir", "."]);
    assert!(import.status.success(), "import failed: {import:?}");
    assert!(tmp.path().join("expr.matrix").exists());
    assert_eq!(
        fs::read_to_string(tmp.path().join("expr.varlist.txt")).expect("varlist"),
        "a\nb\nc\n"
    );

    let batch = depmat(
        tmp.path(),
        &[
            "batch", "--matrix", "expr.matrix", "--statistic", "pearson", "--start", "0", "--end",
            "3", "--work-dir", "work",
        ],
    );
    assert!(batch.status.success(), "batch failed: {batch:?}");
    assert!(tmp.path().join("work/expr_pearson_0_3.PEARSON").exists());

    let compile = depmat(
        tmp.path(),
        &[
            "compile", "--matrix", "expr.matrix", "--work-dir", "work", "--outdir", "out",
            "--prefix", "expr", "--precision", "f64",
        ],
    );
    assert!(compile.status.success(), "compile failed: {compile:?}");
    let values = read_values(&tmp.path().join("out/expr.PEARSON.values")).expect("values");
    assert_eq!(values.data.len(), 3);
    assert!((values.data[0] - 1.0).abs() < 1e-12);
    assert!((values.data[1] + 1.0).abs() < 1e-12);
    assert!(!tmp.path().join("out/expr.PEARSON.isset").exists());
}

#[test]
fn out_of_range_batch_exits_with_failure() {
    let tmp = tempdir().expect("temporary directory");
    fs::write(tmp.path().join("m.tab"), "x\t1\t2\ny\t3\t1\n").expect("write input");
    let import = depmat(tmp.path(), &["import", "m.tab"]);
    assert!(import.status.success(), "import failed: {import:?}");

    let batch = depmat(
        tmp.path(),
        &[
            "batch", "--matrix", "m.matrix", "--statistic", "pearson", "--start", "0", "--end",
            "5", "--work-dir", "work",
        ],
    );
    assert!(!batch.status.success());
    assert!(String::from_utf8_lossy(&batch.stderr).contains("Error:"));
}

#[test]
fn empty_source_is_rejected_before_any_work() {
    let tmp = tempdir().expect("temporary directory");
    fs::write(tmp.path().join("m.tab"), "x\t1\t2\ny\t3\t1\n").expect("write input");
    let import = depmat(tmp.path(), &["import", "m.tab"]);
    assert!(import.status.success(), "import failed: {import:?}");

    let batch = depmat(
        tmp.path(),
        &[
            "batch", "--matrix", "m.matrix", "--statistic", "pearson", "--start", "0", "--end",
            "1", "--work-dir", "work", "--source", "",
        ],
    );
    assert!(!batch.status.success());
    assert!(String::from_utf8_lossy(&batch.stderr).contains("cannot name artifacts"));
    assert!(!tmp.path().join("work").exists());
}

#[test]
fn plan_can_save_the_effective_configuration() {
    let tmp = tempdir().expect("temporary directory");
    fs::write(tmp.path().join("m.tab"), "a\t1\t2\t3\nb\t3\t1\t2\nc\t2\t2\t1\n")
        .expect("write input");
    let import = depmat(tmp.path(), &["import", "m.tab"]);
    assert!(import.status.success(), "import failed: {import:?}");

    let plan = depmat(
        tmp.path(),
        &[
            "plan", "--matrix", "m.matrix", "--range-size", "2", "--output", "plan.tsv",
            "--save-config", "job.toml",
        ],
    );
    assert!(plan.status.success(), "plan failed: {plan:?}");
    assert_eq!(
        fs::read_to_string(tmp.path().join("plan.tsv")).expect("plan"),
        "0\t2\n2\t3\n"
    );
    let saved = depmat::config::JobConfig::load(&tmp.path().join("job.toml")).expect("saved config");
    assert_eq!(saved.range_size, 2);
}
