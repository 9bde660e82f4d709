fn main() {
    if let Err(err) = stepwatch_lib::run() {
        eprintln!("stepwatch failed: {err:#}");
        std::process::exit(1);
    }
}
