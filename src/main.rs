fn main() {
    if let Err(err) = studio_pulse_lib::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
