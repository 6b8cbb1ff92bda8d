fn main() {
    if let Err(e) = mobdbg::run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
