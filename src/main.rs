fn main() {
    if let Err(err) = curation_loader::run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
