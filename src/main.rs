mod benchmark;

use benchmark::run_benchmarks;

fn main() {
    if let Err(e) = run_benchmarks() {
        eprintln!("Benchmark failed: {e}");
        std::process::exit(1);
    }
}
