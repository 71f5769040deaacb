fn main() {
    if let Err(e) = sqlbridge::run() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
