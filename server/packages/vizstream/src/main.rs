fn main() {
    if let Err(err) = vizstream::cli::run_vizstream() {
        tracing::error!(error = %err, "vizstream failed");
        std::process::exit(1);
    }
}
